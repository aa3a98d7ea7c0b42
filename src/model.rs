use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeId(pub i64);

macro_rules! sql_id {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($ty)
            }
        }
    };
}

sql_id!(TaskId);
sql_id!(AttributeId);

/// The three user-defined enumerations a task can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Category,
    Priority,
    Status,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 3] = [Self::Category, Self::Priority, Self::Status];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Priority => "priority",
            Self::Status => "status",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Priority => "priorities",
            Self::Status => "statuses",
        }
    }

    pub(crate) fn task_column(self) -> &'static str {
        match self {
            Self::Category => "category_id",
            Self::Priority => "priority_id",
            Self::Status => "status_id",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub kind: AttributeKind,
    pub name: String,
    pub color: String,
    pub display_order: i64,
    /// Only meaningful for statuses: entering this status stamps `completed_at`.
    pub marks_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub parent: Option<TaskId>,
    pub position: usize,
    pub category: Option<AttributeId>,
    pub priority: Option<AttributeId>,
    pub status: Option<AttributeId>,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<NaiveDateTime>,
}

impl Task {
    pub fn attribute(&self, kind: AttributeKind) -> Option<AttributeId> {
        match kind {
            AttributeKind::Category => self.category,
            AttributeKind::Priority => self.priority,
            AttributeKind::Status => self.status,
        }
    }

    pub(crate) fn attribute_mut(&mut self, kind: AttributeKind) -> &mut Option<AttributeId> {
        match kind {
            AttributeKind::Category => &mut self.category,
            AttributeKind::Priority => &mut self.priority,
            AttributeKind::Status => &mut self.status,
        }
    }

    pub fn placement(&self) -> Placement {
        Placement {
            id: self.id,
            parent: self.parent,
            position: self.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub id: i64,
    pub task: TaskId,
    pub url: String,
    pub label: Option<String>,
    pub position: i64,
}

/// Where a task sits in the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Placement {
    pub id: TaskId,
    pub parent: Option<TaskId>,
    pub position: usize,
}

/// Fields for a task that does not exist yet. The store assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub parent: Option<TaskId>,
    /// Appended after the last sibling when `None`.
    pub position: Option<usize>,
    pub category: Option<AttributeId>,
    pub priority: Option<AttributeId>,
    pub status: Option<AttributeId>,
    pub due_date: Option<NaiveDate>,
    /// Completion stamp to keep; ignored unless `status` completes tasks.
    pub completed_at: Option<NaiveDateTime>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn under(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// A partial update. `None` leaves a field alone; `Some(None)` clears an
/// optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Option<AttributeId>>,
    pub priority: Option<Option<AttributeId>>,
    pub status: Option<Option<AttributeId>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub completed_at: Option<Option<NaiveDateTime>>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = completed_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            id: TaskId(1),
            title: "Write report".into(),
            description: String::new(),
            parent: None,
            position: 0,
            category: Some(AttributeId(1)),
            priority: None,
            status: None,
            due_date: None,
            completed_at: None,
        }
    }

    #[test]
    fn edit_only_touches_given_fields() {
        let mut t = task();
        let edit = TaskEdit {
            title: Some("Write final report".into()),
            category: Some(None),
            ..TaskEdit::default()
        };
        edit.apply_to(&mut t);
        assert_eq!(t.title, "Write final report");
        assert_eq!(t.category, None);
        assert_eq!(t.description, "");
    }

    #[test]
    fn empty_edit() {
        assert!(TaskEdit::default().is_empty());
        assert!(!TaskEdit {
            due_date: Some(None),
            ..TaskEdit::default()
        }
        .is_empty());
    }

    #[test]
    fn attribute_accessors_agree() {
        let mut t = task();
        *t.attribute_mut(AttributeKind::Status) = Some(AttributeId(9));
        assert_eq!(t.attribute(AttributeKind::Status), Some(AttributeId(9)));
        assert_eq!(t.attribute(AttributeKind::Category), Some(AttributeId(1)));
    }

    #[test]
    fn ids_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&TaskId(42)).unwrap(), "42");
        assert_eq!(TaskId(42).to_string(), "#42");
    }
}
