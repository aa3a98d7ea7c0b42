use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDateTime;
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db;
use crate::error::{Error, Result};
use crate::model::{Attribute, AttributeId, AttributeKind, Link, Placement, Task, TaskId};
use crate::tree::{Mutation, TaskTree};

const SELECT_TASKS: &str = "
SELECT id, title, description, parent_id, position,
       category_id, priority_id, status_id, due_date, completed_at
FROM tasks";

const INSERT_TASK: &str = "
INSERT INTO tasks (id, title, description, parent_id, position,
                   category_id, priority_id, status_id, due_date, completed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const UPDATE_TASK_FIELDS: &str = "
UPDATE tasks SET title = ?1, description = ?2, category_id = ?3, priority_id = ?4,
                 status_id = ?5, due_date = ?6, completed_at = ?7
WHERE id = ?8";

const UPDATE_PLACEMENT: &str = "UPDATE tasks SET parent_id = ?1, position = ?2 WHERE id = ?3";

const SCOPE_SAVEPOINT: &str = "scoped_operation";

fn read_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        parent: row.get(3)?,
        position: row.get(4)?,
        category: row.get(5)?,
        priority: row.get(6)?,
        status: row.get(7)?,
        due_date: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

fn read_attribute_row(kind: AttributeKind, row: &Row) -> rusqlite::Result<Attribute> {
    Ok(Attribute {
        id: row.get(0)?,
        kind,
        name: row.get(1)?,
        color: row.get(2)?,
        display_order: row.get(3)?,
        marks_complete: row.get(4)?,
    })
}

fn read_link_row(row: &Row) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        task: row.get(1)?,
        url: row.get(2)?,
        label: row.get(3)?,
        position: row.get(4)?,
    })
}

fn update_placements(conn: &Connection, placements: &[Placement]) -> Result<()> {
    let mut stmt = conn.prepare_cached(UPDATE_PLACEMENT)?;
    for p in placements {
        let rows = stmt.execute(params![p.parent, p.position, p.id])?;
        if rows != 1 {
            return Err(Error::ConstraintViolation(format!(
                "task {} is missing from the store",
                p.id
            )));
        }
    }
    Ok(())
}

/// What deleting an attribute did to the tasks that referenced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub fallback: Option<AttributeId>,
    /// `Some` when the touched tasks crossed the completion boundary.
    pub completed_at: Option<Option<NaiveDateTime>>,
    /// Ascending.
    pub touched: Vec<TaskId>,
}

/// Durable side of the task tree. Every call that writes runs inside its own
/// savepoint, so it either fully lands or leaves the database untouched.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            conn: db::open(path, busy_timeout_ms)?,
        })
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            conn: db::open_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a savepoint. Savepoints nest, so this works both
    /// standalone and inside an enclosing scoped operation.
    fn with_savepoint<T>(&self, name: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        let result = f(&self.conn).and_then(|v| {
            self.conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(v)
        });
        if result.is_err() {
            let _ = self
                .conn
                .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"));
        }
        result
    }

    pub(crate) fn begin_scope(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {SCOPE_SAVEPOINT}"))?;
        Ok(())
    }

    pub(crate) fn commit_scope(&self) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE {SCOPE_SAVEPOINT}"))?;
        Ok(())
    }

    pub(crate) fn rollback_scope(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO {SCOPE_SAVEPOINT}; RELEASE {SCOPE_SAVEPOINT}"
        ))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    pub fn load_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_TASKS} ORDER BY id"))?;
        let rows = stmt.query_map([], read_task_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self
            .conn
            .query_row(&format!("{SELECT_TASKS} WHERE id = ?1"), [id], read_task_row)
            .optional()?)
    }

    /// Build the in-memory tree. Gaps or duplicates in stored positions are
    /// renumbered and written back.
    pub fn load_tree(&self) -> Result<TaskTree> {
        let (tree, repaired) = TaskTree::from_tasks(self.load_tasks()?)?;
        if !repaired.is_empty() {
            warn!("renumbering {} task position(s) found out of order", repaired.len());
            self.with_savepoint("repair_positions", |conn| update_placements(conn, &repaired))?;
        }
        debug!("loaded {} task(s)", tree.len());
        Ok(tree)
    }

    /// Persist one tree mutation atomically.
    pub fn apply(&self, mutation: &Mutation) -> Result<()> {
        self.with_savepoint("apply_mutation", |conn| {
            match mutation {
                Mutation::Insert { task, shifted } => {
                    update_placements(conn, shifted)?;
                    conn.execute(
                        INSERT_TASK,
                        params![
                            task.id,
                            task.title,
                            task.description,
                            task.parent,
                            task.position,
                            task.category,
                            task.priority,
                            task.status,
                            task.due_date,
                            task.completed_at,
                        ],
                    )?;
                }
                Mutation::Move { to, shifted, .. } => {
                    update_placements(conn, std::slice::from_ref(to))?;
                    update_placements(conn, shifted)?;
                }
                Mutation::Remove { removed, shifted } => {
                    // Lift surviving children off the doomed rows before deleting them.
                    update_placements(conn, shifted)?;
                    let mut stmt = conn.prepare_cached("DELETE FROM tasks WHERE id = ?1")?;
                    for task in removed {
                        if stmt.execute([task.id])? != 1 {
                            return Err(Error::ConstraintViolation(format!(
                                "task {} is missing from the store",
                                task.id
                            )));
                        }
                    }
                }
                Mutation::Edit { after, .. } => {
                    let rows = conn.execute(
                        UPDATE_TASK_FIELDS,
                        params![
                            after.title,
                            after.description,
                            after.category,
                            after.priority,
                            after.status,
                            after.due_date,
                            after.completed_at,
                            after.id,
                        ],
                    )?;
                    if rows != 1 {
                        return Err(Error::ConstraintViolation(format!(
                            "task {} is missing from the store",
                            after.id
                        )));
                    }
                }
            }
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Categories, priorities, statuses
    // -------------------------------------------------------------------------

    pub fn attributes(&self, kind: AttributeKind) -> Result<Vec<Attribute>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT id, name, color, display_order, marks_complete FROM {} ORDER BY display_order, id",
            kind.table()
        ))?;
        let rows = stmt.query_map([], |row| read_attribute_row(kind, row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn attribute(&self, kind: AttributeKind, id: AttributeId) -> Result<Option<Attribute>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT id, name, color, display_order, marks_complete FROM {} WHERE id = ?1",
                    kind.table()
                ),
                [id],
                |row| read_attribute_row(kind, row),
            )
            .optional()?)
    }

    /// Case-insensitive lookup by name.
    pub fn find_attribute(&self, kind: AttributeKind, name: &str) -> Result<Option<Attribute>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT id, name, color, display_order, marks_complete FROM {} WHERE name = ?1",
                    kind.table()
                ),
                [name.trim()],
                |row| read_attribute_row(kind, row),
            )
            .optional()?)
    }

    fn require_attribute(&self, kind: AttributeKind, id: AttributeId) -> Result<Attribute> {
        self.attribute(kind, id)?
            .ok_or_else(|| Error::AttributeNotFound {
                kind,
                name: id.to_string(),
            })
    }

    pub fn add_attribute(&self, kind: AttributeKind, name: &str, color: &str) -> Result<Attribute> {
        let id = self.with_savepoint("add_attribute", |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (name, color, display_order)
                     VALUES (?1, ?2, (SELECT COALESCE(MAX(display_order), 0) + 1 FROM {table}))",
                    table = kind.table()
                ),
                params![name.trim(), color],
            )?;
            Ok(AttributeId(conn.last_insert_rowid()))
        })?;
        self.require_attribute(kind, id)
    }

    pub fn rename_attribute(&self, kind: AttributeKind, id: AttributeId, name: &str) -> Result<()> {
        let rows = self.conn.execute(
            &format!("UPDATE {} SET name = ?1 WHERE id = ?2", kind.table()),
            params![name.trim(), id],
        )?;
        if rows == 0 {
            return Err(Error::AttributeNotFound {
                kind,
                name: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_attribute_color(&self, kind: AttributeKind, id: AttributeId, color: &str) -> Result<()> {
        let rows = self.conn.execute(
            &format!("UPDATE {} SET color = ?1 WHERE id = ?2", kind.table()),
            params![color, id],
        )?;
        if rows == 0 {
            return Err(Error::AttributeNotFound {
                kind,
                name: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_marks_complete(&self, id: AttributeId, marks_complete: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE statuses SET marks_complete = ?1 WHERE id = ?2",
            params![marks_complete, id],
        )?;
        if rows == 0 {
            return Err(Error::AttributeNotFound {
                kind: AttributeKind::Status,
                name: id.to_string(),
            });
        }
        Ok(())
    }

    /// Move an attribute to `position` in display order (clamped) and
    /// renumber the rest as 1..n.
    pub fn move_attribute(&self, kind: AttributeKind, id: AttributeId, position: usize) -> Result<()> {
        let mut order: Vec<AttributeId> = self.attributes(kind)?.into_iter().map(|a| a.id).collect();
        let index = order
            .iter()
            .position(|a| *a == id)
            .ok_or_else(|| Error::AttributeNotFound {
                kind,
                name: id.to_string(),
            })?;
        order.remove(index);
        order.insert(position.min(order.len()), id);

        self.with_savepoint("move_attribute", |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "UPDATE {} SET display_order = ?1 WHERE id = ?2",
                kind.table()
            ))?;
            for (i, attr) in order.iter().enumerate() {
                stmt.execute(params![i as i64 + 1, attr])?;
            }
            Ok(())
        })
    }

    /// Delete an attribute and re-point the tasks that used it. Categories
    /// fall back to none; priorities and statuses fall back to the first
    /// remaining entry in display order. Deleting a status also moves
    /// `completed_at` across the completion boundary, using `now` as the
    /// stamp when the fallback completes tasks.
    pub fn delete_attribute(
        &self,
        kind: AttributeKind,
        id: AttributeId,
        now: NaiveDateTime,
    ) -> Result<Reassignment> {
        let deleted = self.require_attribute(kind, id)?;
        let remaining = match kind {
            AttributeKind::Category => None,
            AttributeKind::Priority | AttributeKind::Status => self
                .attributes(kind)?
                .into_iter()
                .find(|a| a.id != id),
        };
        let fallback = remaining.as_ref().map(|a| a.id);
        let completed_at = match kind {
            AttributeKind::Status => {
                let completes = remaining.as_ref().is_some_and(|a| a.marks_complete);
                match (deleted.marks_complete, completes) {
                    (true, false) => Some(None),
                    (false, true) => Some(Some(now)),
                    _ => None,
                }
            }
            _ => None,
        };

        let column = kind.task_column();
        self.with_savepoint("delete_attribute", |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT id FROM tasks WHERE {column} = ?1 ORDER BY id"))?;
            let touched = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<TaskId>>>()?;
            match completed_at {
                Some(stamp) => conn.execute(
                    &format!("UPDATE tasks SET {column} = ?1, completed_at = ?2 WHERE {column} = ?3"),
                    params![fallback, stamp, id],
                )?,
                None => conn.execute(
                    &format!("UPDATE tasks SET {column} = ?1 WHERE {column} = ?2"),
                    params![fallback, id],
                )?,
            };
            conn.execute(&format!("DELETE FROM {} WHERE id = ?1", kind.table()), [id])?;
            Ok(Reassignment {
                fallback,
                completed_at,
                touched,
            })
        })
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    pub fn add_link(&self, task: TaskId, url: &str, label: Option<&str>) -> Result<Link> {
        let id = self.with_savepoint("add_link", |conn| {
            conn.execute(
                "INSERT INTO links (task_id, url, label, position)
                 VALUES (?1, ?2, ?3, (SELECT COUNT(*) FROM links WHERE task_id = ?1))",
                params![task, url.trim(), label],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(self.conn.query_row(
            "SELECT id, task_id, url, label, position FROM links WHERE id = ?1",
            [id],
            read_link_row,
        )?)
    }

    pub fn links(&self, task: TaskId) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, task_id, url, label, position FROM links WHERE task_id = ?1 ORDER BY position, id",
        )?;
        let rows = stmt.query_map([task], read_link_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn all_links(&self) -> Result<HashMap<TaskId, Vec<Link>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, url, label, position FROM links ORDER BY task_id, position, id",
        )?;
        let mut by_task: HashMap<TaskId, Vec<Link>> = HashMap::new();
        for link in stmt.query_map([], read_link_row)? {
            let link = link?;
            by_task.entry(link.task).or_default().push(link);
        }
        Ok(by_task)
    }

    pub fn remove_link(&self, id: i64) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM links WHERE id = ?1", [id])? > 0)
    }
}
