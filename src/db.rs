//! SQLite connection setup and versioned schema migrations.
//!
//! Each migration runs in its own transaction and records itself in
//! `schema_version`. Opening a database that is newer than this build, or
//! failing any step, yields [`Error::Migration`]: callers must not continue
//! with a half-migrated schema.

use std::path::Path;

use log::{debug, info};
use rusqlite::Connection;

use crate::error::{Error, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "attribute and task tables with default attributes",
        sql: "
CREATE TABLE categories (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(name) > 0),
    color         TEXT NOT NULL,
    display_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE priorities (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(name) > 0),
    color         TEXT NOT NULL,
    display_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE statuses (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(name) > 0),
    color         TEXT NOT NULL,
    display_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE tasks (
    id          INTEGER PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    parent_id   INTEGER REFERENCES tasks(id),
    position    INTEGER NOT NULL DEFAULT 0 CHECK(position >= 0),
    category_id INTEGER REFERENCES categories(id),
    priority_id INTEGER REFERENCES priorities(id),
    status_id   INTEGER REFERENCES statuses(id),
    due_date    TEXT,
    CHECK (parent_id IS NULL OR parent_id != id)
);

INSERT INTO categories (name, color, display_order) VALUES
    ('Work', '#F0F7FF', 1),
    ('Personal', '#E8F5E9', 2),
    ('Shopping', '#FFF8E1', 3),
    ('Health', '#FFEBEE', 4),
    ('Learning', '#F3E5F5', 5);

INSERT INTO priorities (name, color, display_order) VALUES
    ('High', '#F44336', 1),
    ('Medium', '#FFC107', 2),
    ('Low', '#4CAF50', 3),
    ('Unprioritized', '#AAAAAA', 4);

INSERT INTO statuses (name, color, display_order) VALUES
    ('Not Started', '#F44336', 1),
    ('In Progress', '#FFC107', 2),
    ('On Hold', '#9E9E9E', 3),
    ('Backlog', '#9C27B0', 4),
    ('Completed', '#4CAF50', 5);
",
    },
    Migration {
        version: 2,
        description: "links attached to tasks",
        sql: "
CREATE TABLE links (
    id       INTEGER PRIMARY KEY,
    task_id  INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    url      TEXT NOT NULL CHECK(length(url) > 0),
    label    TEXT,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX idx_links_task_id ON links(task_id);
",
    },
    Migration {
        version: 3,
        description: "completion tracking",
        sql: "
ALTER TABLE statuses ADD COLUMN marks_complete INTEGER NOT NULL DEFAULT 0;
ALTER TABLE categories ADD COLUMN marks_complete INTEGER NOT NULL DEFAULT 0;
ALTER TABLE priorities ADD COLUMN marks_complete INTEGER NOT NULL DEFAULT 0;
UPDATE statuses SET marks_complete = 1 WHERE name = 'Completed';
ALTER TABLE tasks ADD COLUMN completed_at TEXT;
",
    },
    Migration {
        version: 4,
        description: "sibling lookup index",
        sql: "CREATE INDEX idx_tasks_parent_position ON tasks(parent_id, position);",
    },
];

fn set_pragmas(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};"
    ))?;
    Ok(())
}

pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn, busy_timeout_ms)?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn, 0)?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::Migration {
        version: 0,
        message: format!("failed to read schema_version: {e}"),
    })
}

/// Bring the schema up to [`latest_version`]. Returns how many steps ran.
pub fn migrate(conn: &Connection) -> Result<usize> {
    migrate_with(conn, MIGRATIONS)
}

fn migrate_with(conn: &Connection, migrations: &[Migration]) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            description TEXT NOT NULL
        );",
    )
    .map_err(|e| Error::Migration {
        version: 0,
        message: format!("failed to create schema_version: {e}"),
    })?;

    let current = current_version(conn)?;
    let latest = migrations.last().map_or(0, |m| m.version);
    if current > latest {
        return Err(Error::Migration {
            version: current,
            message: format!("database schema v{current} is newer than supported v{latest}"),
        });
    }

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        info!(
            "applying migration v{} ({})",
            migration.version, migration.description
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }
    debug!("schema at v{latest}, {applied} migration(s) applied");
    Ok(applied)
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let fail = |e: rusqlite::Error| Error::Migration {
        version: migration.version,
        message: e.to_string(),
    };
    let tx = conn.unchecked_transaction().map_err(fail)?;
    tx.execute_batch(migration.sql).map_err(fail)?;
    tx.execute(
        "INSERT INTO schema_version (version, description) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.description],
    )
    .map_err(fail)?;
    tx.commit().map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn fresh_database_is_at_latest_version() {
        let conn = open_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());
        assert_eq!(count(&conn, "categories"), 5);
        assert_eq!(count(&conn, "priorities"), 4);
        assert_eq!(count(&conn, "statuses"), 5);
        assert_eq!(count(&conn, "tasks"), 0);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = open_memory().unwrap();
        assert_eq!(migrate(&conn).unwrap(), 0);
        assert_eq!(count(&conn, "statuses"), 5);
    }

    #[test]
    fn completed_status_marks_complete() {
        let conn = open_memory().unwrap();
        let flag: bool = conn
            .query_row(
                "SELECT marks_complete FROM statuses WHERE name = 'Completed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(flag);
    }

    #[test]
    fn upgrades_from_older_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_with(&conn, &MIGRATIONS[..1]).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);
        conn.execute("INSERT INTO tasks (title) VALUES ('kept')", [])
            .unwrap();

        assert_eq!(migrate(&conn).unwrap(), MIGRATIONS.len() - 1);
        assert_eq!(current_version(&conn).unwrap(), latest_version());
        let completed_at: Option<String> = conn
            .query_row("SELECT completed_at FROM tasks WHERE title = 'kept'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(completed_at.is_none());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = open_memory().unwrap();
        conn.execute(
            "INSERT INTO schema_version (version, description) VALUES (?1, 'future')",
            [latest_version() + 1],
        )
        .unwrap();
        let err = migrate(&conn).unwrap_err();
        assert!(matches!(err, Error::Migration { .. }), "{err:?}");
    }

    #[test]
    fn failing_step_rolls_back_and_reports_version() {
        let broken = [
            Migration {
                version: 1,
                description: "ok",
                sql: "CREATE TABLE a (x INTEGER);",
            },
            Migration {
                version: 2,
                description: "broken",
                sql: "CREATE TABLE b (x INTEGER); ALTER TABLE missing ADD COLUMN y;",
            },
        ];
        let conn = Connection::open_in_memory().unwrap();
        let err = migrate_with(&conn, &broken).unwrap_err();
        assert!(matches!(err, Error::Migration { version: 2, .. }), "{err:?}");
        assert_eq!(current_version(&conn).unwrap(), 1);
        let b_exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'b'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(b_exists, 0);
    }
}
