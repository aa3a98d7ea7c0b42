//! CSV interchange. One row per task in pre-order, so every row's parent
//! appears above it and an import can resolve parents as it goes.
//!
//! Files that carry an `Id` column are read as exports: blank attribute
//! cells mean "none". Hand-written files without one get the configured
//! default priority and status for blank cells. The `Links` cell holds one
//! link per line, a URL optionally followed by its label.

use std::collections::HashMap;
use std::io;

use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{AttributeId, AttributeKind, NewTask, TaskId};
use crate::store::TaskStore;

pub const HEADER: [&str; 10] = [
    "Id",
    "Parent",
    "Title",
    "Description",
    "Status",
    "Priority",
    "Due Date",
    "Category",
    "Links",
    "Completed At",
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const NEW_ATTRIBUTE_COLOR: &str = "#AAAAAA";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Row {
    #[serde(rename = "Id", default)]
    id: Option<i64>,
    #[serde(rename = "Parent", default)]
    parent: String,
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Priority", default)]
    priority: String,
    #[serde(rename = "Due Date", default)]
    due_date: String,
    #[serde(rename = "Category", default)]
    category: String,
    #[serde(rename = "Links", default)]
    links: String,
    #[serde(rename = "Completed At", default)]
    completed_at: String,
}

fn writer<W: io::Write>(out: W) -> Result<csv::Writer<W>> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(HEADER)?;
    Ok(wtr)
}

fn names(store: &TaskStore, kind: AttributeKind) -> Result<HashMap<AttributeId, String>> {
    Ok(store
        .attributes(kind)?
        .into_iter()
        .map(|a| (a.id, a.name))
        .collect())
}

/// Write every task. Returns the number of rows written.
pub fn export<W: io::Write>(store: &TaskStore, out: W) -> Result<usize> {
    let categories = names(store, AttributeKind::Category)?;
    let priorities = names(store, AttributeKind::Priority)?;
    let statuses = names(store, AttributeKind::Status)?;
    let links = store.repository().all_links()?;
    let name_of = |table: &HashMap<AttributeId, String>, id: Option<AttributeId>| {
        id.and_then(|id| table.get(&id).cloned()).unwrap_or_default()
    };

    let mut wtr = writer(out)?;
    let mut count = 0;
    for task in store.tree().walk() {
        wtr.serialize(Row {
            id: Some(task.id.0),
            parent: task.parent.map(|p| p.0.to_string()).unwrap_or_default(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: name_of(&statuses, task.status),
            priority: name_of(&priorities, task.priority),
            due_date: task
                .due_date
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            category: name_of(&categories, task.category),
            links: links
                .get(&task.id)
                .map(|l| {
                    l.iter()
                        .map(|l| match &l.label {
                            Some(label) => format!("{} {label}", l.url),
                            None => l.url.clone(),
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default(),
            completed_at: task
                .completed_at
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default(),
        })?;
        count += 1;
    }
    wtr.flush()?;
    info!("exported {count} task(s)");
    Ok(count)
}

/// Write the header and a small example hierarchy.
pub fn write_template<W: io::Write>(out: W) -> Result<()> {
    let mut wtr = writer(out)?;
    let rows = [
        Row {
            id: Some(1),
            title: "Plan trip".into(),
            description: "Top-level task".into(),
            status: "In Progress".into(),
            priority: "High".into(),
            category: "Personal".into(),
            ..Row::default()
        },
        Row {
            id: Some(2),
            parent: "1".into(),
            title: "Book flights".into(),
            status: "Not Started".into(),
            priority: "Medium".into(),
            due_date: "2030-01-15".into(),
            links: "https://example.com/flights".into(),
            ..Row::default()
        },
        Row {
            parent: "Plan trip".into(),
            title: "Pack".into(),
            ..Row::default()
        },
    ];
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn import_attribute(
    store: &mut TaskStore,
    kind: AttributeKind,
    name: &str,
    create_missing: bool,
) -> Result<Option<AttributeId>> {
    if name.is_empty() {
        return Ok(None);
    }
    if let Some(attr) = store.find_attribute(kind, name)? {
        return Ok(Some(attr.id));
    }
    if !create_missing {
        return Err(Error::AttributeNotFound {
            kind,
            name: name.to_string(),
        });
    }
    info!("import: creating {kind} '{name}'");
    Ok(Some(store.add_attribute(kind, name, NEW_ATTRIBUTE_COLOR)?.id))
}

/// Split a `Links` cell into `(url, label)` pairs. A line made only of URLs
/// is read as several unlabelled links.
fn parse_links(cell: &str) -> Vec<(&str, Option<&str>)> {
    let mut links = Vec::new();
    for line in cell.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.split_whitespace().all(|token| token.contains("://")) {
            links.extend(line.split_whitespace().map(|url| (url, None)));
            continue;
        }
        match line.split_once(char::is_whitespace) {
            Some((url, label)) => links.push((url, Some(label.trim()))),
            None => links.push((line, None)),
        }
    }
    links
}

/// Import rows as new tasks, all or nothing. The `Parent` column names an
/// earlier row by its `Id` column or, failing that, by title. Returns the
/// created ids in file order.
pub fn import<R: io::Read>(store: &mut TaskStore, input: R) -> Result<Vec<TaskId>> {
    let create_missing = store.config().import.create_missing_attributes;
    let created = store.scoped(|store| {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input);
        let headers = rdr.headers()?.clone();
        let exported = headers.iter().any(|h| h == "Id");

        let mut by_source_id: HashMap<i64, TaskId> = HashMap::new();
        let mut by_title: HashMap<String, TaskId> = HashMap::new();
        let mut created = Vec::new();

        for record in rdr.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let row: Row = record.deserialize(Some(&headers))?;
            let import_err = |message: String| Error::Import { line, message };

            if row.title.is_empty() {
                return Err(import_err("title is empty".into()));
            }

            let parent = if row.parent.is_empty() {
                None
            } else {
                let source = row.parent.parse::<i64>().ok();
                let found = source
                    .and_then(|n| by_source_id.get(&n))
                    .or_else(|| by_title.get(&row.parent))
                    .copied();
                match (found, source) {
                    (Some(id), _) => Some(id),
                    (None, Some(n)) => return Err(Error::InvalidParent(TaskId(n))),
                    (None, None) => {
                        return Err(import_err(format!(
                            "parent '{}' does not match an earlier row",
                            row.parent
                        )))
                    }
                }
            };

            let due_date = if row.due_date.is_empty() {
                None
            } else {
                Some(
                    NaiveDate::parse_from_str(&row.due_date, DATE_FORMAT).map_err(|e| {
                        import_err(format!("bad due date '{}': {e}", row.due_date))
                    })?,
                )
            };

            let completed_at = if row.completed_at.is_empty() {
                None
            } else {
                Some(
                    NaiveDateTime::parse_from_str(&row.completed_at, TIMESTAMP_FORMAT).map_err(
                        |e| import_err(format!("bad completion time '{}': {e}", row.completed_at)),
                    )?,
                )
            };

            let new = NewTask {
                title: row.title.clone(),
                description: row.description,
                parent,
                position: None,
                category: import_attribute(store, AttributeKind::Category, &row.category, create_missing)?,
                priority: import_attribute(store, AttributeKind::Priority, &row.priority, create_missing)?,
                status: import_attribute(store, AttributeKind::Status, &row.status, create_missing)?,
                due_date,
                completed_at,
            };
            let id = if exported {
                store.insert_task(new)?
            } else {
                store.create_task(new)?
            };
            for (url, label) in parse_links(&row.links) {
                store.add_link(id, url, label)?;
            }

            if let Some(source) = row.id {
                by_source_id.insert(source, id);
            }
            by_title.insert(row.title, id);
            created.push(id);
        }
        Ok(created)
    })?;
    info!("imported {} task(s)", created.len());
    Ok(created)
}
