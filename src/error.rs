use crate::model::{AttributeKind, TaskId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parent task {0} does not exist")]
    InvalidParent(TaskId),

    #[error("placing task {task} under {parent} would create a cycle")]
    CycleDetected { task: TaskId, parent: TaskId },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("{kind} '{name}' not found")]
    AttributeNotFound { kind: AttributeKind, name: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("persistence error: {0}")]
    Persistence(rusqlite::Error),

    #[error("schema migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("import failed at line {line}: {message}")]
    Import { line: u64, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Validation failures the user can fix by choosing different input.
    /// The tree is untouched when one of these is returned.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::InvalidParent(_)
                | Self::CycleDetected { .. }
                | Self::TaskNotFound(_)
                | Self::AttributeNotFound { .. }
        )
    }
}

impl Error {
    /// Process exit status for a command that failed with this error: 2 for
    /// input the user can correct, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        if self.is_user_correctable() {
            2
        } else {
            1
        }
    }

    /// Whether the failure happened while writing, after which the store
    /// was rolled back.
    pub fn rolled_back(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::ConstraintViolation(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, ref msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            other => Self::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn unique_failure_maps_to_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: Error = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::ConstraintViolation(_)), "{err:?}");
    }

    #[test]
    fn other_sqlite_failures_map_to_persistence() {
        let conn = Connection::open_in_memory().unwrap();
        let err: Error = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Persistence(_)), "{err:?}");
        assert!(!err.is_user_correctable());
    }

    #[test]
    fn validation_errors_are_user_correctable() {
        assert!(Error::InvalidParent(TaskId(3)).is_user_correctable());
        assert!(Error::CycleDetected {
            task: TaskId(1),
            parent: TaskId(2)
        }
        .is_user_correctable());
        assert!(!Error::ConstraintViolation("dup".into()).is_user_correctable());
    }

    #[test]
    fn exit_codes_separate_user_errors_from_store_failures() {
        assert_eq!(Error::TaskNotFound(TaskId(9)).exit_code(), 2);
        assert!(!Error::TaskNotFound(TaskId(9)).rolled_back());
        let dup = Error::ConstraintViolation("dup".into());
        assert_eq!(dup.exit_code(), 1);
        assert!(dup.rolled_back());
        let import = Error::Import {
            line: 4,
            message: "bad date".into(),
        };
        assert_eq!(import.exit_code(), 1);
        assert!(!import.rolled_back());
    }
}
