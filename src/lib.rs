//! A hierarchical task manager: an ordered forest of tasks kept in memory,
//! mirrored to SQLite, with change notification and CSV interchange.

pub mod config;
pub mod csv_io;
pub mod db;
pub mod error;
pub mod model;
pub mod notify;
pub mod output;
pub mod paths;
pub mod repo;
pub mod store;
pub mod tree;

pub use error::{Error, Result};
pub use model::{Attribute, AttributeId, AttributeKind, Link, NewTask, Task, TaskEdit, TaskId};
pub use notify::{ChangeEvent, ChangeKind, Observer};
pub use store::TaskStore;
pub use tree::{Mutation, TaskTree};
