use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::Result;
use crate::model::{Attribute, AttributeId, AttributeKind, Link, Task, TaskId};
use crate::store::TaskStore;
use crate::tree::TaskTree;

/// Attribute lookups for rendering tasks by name rather than id.
#[derive(Debug, Default)]
pub struct Labels {
    by_kind: HashMap<AttributeKind, HashMap<AttributeId, Attribute>>,
}

impl Labels {
    pub fn load(store: &TaskStore) -> Result<Self> {
        let mut by_kind = HashMap::new();
        for kind in AttributeKind::ALL {
            let attrs = store
                .attributes(kind)?
                .into_iter()
                .map(|a| (a.id, a))
                .collect();
            by_kind.insert(kind, attrs);
        }
        Ok(Self { by_kind })
    }

    pub fn attribute(&self, kind: AttributeKind, id: Option<AttributeId>) -> Option<&Attribute> {
        self.by_kind.get(&kind)?.get(&id?)
    }

    pub fn name(&self, kind: AttributeKind, id: Option<AttributeId>) -> Option<&str> {
        self.attribute(kind, id).map(|a| a.name.as_str())
    }

    fn icon(&self, task: &Task) -> char {
        if task.completed_at.is_some() {
            'x'
        } else {
            '.'
        }
    }

    fn summary(&self, task: &Task) -> String {
        let tags: Vec<&str> = [AttributeKind::Priority, AttributeKind::Status]
            .into_iter()
            .filter_map(|kind| self.name(kind, task.attribute(kind)))
            .collect();
        let mut out = format!("{} {} {}", self.icon(task), task.id, task.title);
        if !tags.is_empty() {
            out.push_str(&format!("  [{}]", tags.join(", ")));
        }
        if let Some(due) = task.due_date {
            out.push_str(&format!("  due {due}"));
        }
        out
    }
}

/// The three status-based task views: open work, the backlog, and done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Neither in the backlog nor complete.
    Current,
    Backlog,
    Completed,
}

const BACKLOG: &str = "Backlog";

impl View {
    pub fn matches(self, task: &Task, labels: &Labels) -> bool {
        let status = labels.attribute(AttributeKind::Status, task.status);
        let completed = status.is_some_and(|s| s.marks_complete);
        let backlog = status.is_some_and(|s| s.name.eq_ignore_ascii_case(BACKLOG));
        match self {
            Self::Current => !completed && !backlog,
            Self::Backlog => backlog,
            Self::Completed => completed,
        }
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "backlog" => Ok(Self::Backlog),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("unknown view '{s}' (expected current, backlog or completed)")),
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Current => "current",
            Self::Backlog => "backlog",
            Self::Completed => "completed",
        })
    }
}

/// Which tasks `list` shows. An empty filter shows everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub view: Option<View>,
    pub status: Option<AttributeId>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task, labels: &Labels) -> bool {
        self.view.map_or(true, |v| v.matches(task, labels))
            && self.status.map_or(true, |s| task.status == Some(s))
    }

    /// Matching tasks plus their ancestors, so a filtered tree stays connected.
    fn visible(&self, tree: &TaskTree, labels: &Labels) -> HashSet<TaskId> {
        let mut visible = HashSet::new();
        for task in tree.iter().filter(|t| self.matches(t, labels)) {
            visible.insert(task.id);
            visible.extend(tree.ancestors(task.id).map(|a| a.id));
        }
        visible
    }
}

#[derive(Serialize)]
pub struct TaskDetail<'a> {
    #[serde(flatten)]
    pub task: &'a Task,
    pub links: &'a [Link],
    pub children: &'a [TaskId],
}

pub fn format_task_detail(task: &Task, labels: &Labels, links: &[Link], tree: &TaskTree) -> String {
    let mut out = String::new();
    out.push_str(&format!("Title:       {}\n", task.title));
    out.push_str(&format!("Id:          {}\n", task.id));
    if let Some(p) = task.parent {
        let title = tree.get(p).map(|t| t.title.as_str()).unwrap_or("?");
        out.push_str(&format!("Parent:      {p} {title}\n"));
    }
    out.push_str(&format!(
        "Position:    {} of {}\n",
        task.position,
        tree.siblings(task.id).len()
    ));
    for (label, kind) in [
        ("Category:   ", AttributeKind::Category),
        ("Priority:   ", AttributeKind::Priority),
        ("Status:     ", AttributeKind::Status),
    ] {
        if let Some(name) = labels.name(kind, task.attribute(kind)) {
            out.push_str(&format!("{label} {name}\n"));
        }
    }
    if let Some(due) = task.due_date {
        out.push_str(&format!("Due:         {due}\n"));
    }
    if let Some(done) = task.completed_at {
        out.push_str(&format!("Completed:   {done}\n"));
    }
    if !task.description.is_empty() {
        out.push_str(&format!("Description: {}\n", task.description));
    }

    let children = tree.children(Some(task.id));
    if !children.is_empty() {
        out.push_str(&format!("Children:    {}\n", children.len()));
    }

    if !links.is_empty() {
        out.push('\n');
        out.push_str("Links:\n");
        for link in links {
            match &link.label {
                Some(label) => out.push_str(&format!("  [{}] {} ({label})\n", link.id, link.url)),
                None => out.push_str(&format!("  [{}] {}\n", link.id, link.url)),
            }
        }
    }

    out
}

/// One line per task in display order.
pub fn format_task_list<'a>(tasks: impl IntoIterator<Item = &'a Task>, labels: &Labels) -> String {
    let mut out = String::new();
    for task in tasks {
        let parent_info = task
            .parent
            .map(|p| format!(" (parent: {p})"))
            .unwrap_or_default();
        out.push_str(&format!("{}{}\n", labels.summary(task), parent_info));
    }
    out
}

/// Render the forest, or the subtree under `root`, with box-drawing
/// connectors. Tasks outside `filter` are hidden unless a descendant matches.
pub fn format_task_tree(
    tree: &TaskTree,
    labels: &Labels,
    root: Option<TaskId>,
    filter: &TaskFilter,
) -> String {
    let visible = filter.visible(tree, labels);
    let tops = match root {
        Some(id) => vec![id],
        None => tree.roots().to_vec(),
    };
    let mut out = String::new();
    for id in tops.iter().filter(|id| visible.contains(*id)) {
        if let Some(task) = tree.get(*id) {
            write_tree(&mut out, tree, labels, &visible, task, "", "");
        }
    }
    out
}

/// Write a task line and recurse into children.
/// `line_prefix` is what goes before the icon on this task's line.
/// `child_prefix` is the base prefix for this task's children's tree connectors.
fn write_tree(
    out: &mut String,
    tree: &TaskTree,
    labels: &Labels,
    visible: &HashSet<TaskId>,
    task: &Task,
    line_prefix: &str,
    child_prefix: &str,
) {
    out.push_str(&format!("{line_prefix}{}\n", labels.summary(task)));

    let children: Vec<&Task> = tree
        .children(Some(task.id))
        .iter()
        .filter(|id| visible.contains(*id))
        .filter_map(|id| tree.get(*id))
        .collect();
    for (i, child) in children.iter().enumerate() {
        let is_last = i == children.len() - 1;
        let (connector, extension) = if is_last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        write_tree(
            out,
            tree,
            labels,
            visible,
            child,
            &format!("{child_prefix}{connector}"),
            &format!("{child_prefix}{extension}"),
        );
    }
}

pub fn format_attributes(attrs: &[Attribute]) -> String {
    let mut out = String::new();
    for attr in attrs {
        let marker = if attr.marks_complete { "  (completes)" } else { "" };
        out.push_str(&format!(
            "{:>3}  {:<16} {}{}\n",
            attr.display_order, attr.name, attr.color, marker
        ));
    }
    out
}

pub fn format_links(links: &[Link]) -> String {
    let mut out = String::new();
    for link in links {
        match &link.label {
            Some(label) => out.push_str(&format!("[{}] {}  {label}\n", link.id, link.url)),
            None => out.push_str(&format!("[{}] {}\n", link.id, link.url)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::NewTask;
    use pretty_assertions::assert_eq;

    fn sample() -> (TaskStore, TaskId, TaskId, TaskId) {
        let mut config = Config::default();
        config.tasks.default_priority = None;
        config.tasks.default_status = None;
        let mut store = TaskStore::open_in_memory(config).unwrap();
        let root = store.create_task(NewTask::titled("root")).unwrap();
        let a = store.create_task(NewTask::titled("a").under(root)).unwrap();
        let b = store.create_task(NewTask::titled("b").under(root)).unwrap();
        (store, root, a, b)
    }

    #[test]
    fn tree_with_children() {
        let (store, ..) = sample();
        let labels = Labels::load(&store).unwrap();
        let out = format_task_tree(store.tree(), &labels, None, &TaskFilter::default());
        assert_eq!(out, ". #1 root\n├── . #2 a\n└── . #3 b\n");
    }

    #[test]
    fn subtree_only() {
        let (store, _, a, _) = sample();
        let labels = Labels::load(&store).unwrap();
        assert_eq!(
            format_task_tree(store.tree(), &labels, Some(a), &TaskFilter::default()),
            ". #2 a\n"
        );
    }

    #[test]
    fn flat_list_shows_parent_and_tags() {
        let (mut store, _, a, _) = sample();
        let high = store
            .resolve_attribute(AttributeKind::Priority, "High")
            .unwrap();
        store
            .edit_task(
                a,
                crate::model::TaskEdit {
                    priority: Some(Some(high.id)),
                    ..Default::default()
                },
            )
            .unwrap();
        let labels = Labels::load(&store).unwrap();
        let out = format_task_list(store.tree().walk(), &labels);
        assert!(out.contains(". #2 a  [High] (parent: #1)"), "{out}");
        assert!(out.starts_with(". #1 root\n"));
    }

    fn set_status(store: &mut TaskStore, id: TaskId, name: &str) {
        let status = store.resolve_attribute(AttributeKind::Status, name).unwrap();
        store
            .edit_task(
                id,
                crate::model::TaskEdit {
                    status: Some(Some(status.id)),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn views_split_tasks_by_status() {
        let (mut store, root, a, b) = sample();
        set_status(&mut store, a, "Backlog");
        set_status(&mut store, b, "Completed");
        let labels = Labels::load(&store).unwrap();
        let shown = |view: View| -> Vec<TaskId> {
            let filter = TaskFilter {
                view: Some(view),
                status: None,
            };
            store
                .tree()
                .walk()
                .filter(|t| filter.matches(t, &labels))
                .map(|t| t.id)
                .collect()
        };
        assert_eq!(shown(View::Current), vec![root]);
        assert_eq!(shown(View::Backlog), vec![a]);
        assert_eq!(shown(View::Completed), vec![b]);
        assert_eq!("Completed".parse::<View>(), Ok(View::Completed));
        assert!("someday".parse::<View>().is_err());
    }

    #[test]
    fn filtered_tree_keeps_ancestors() {
        let (mut store, _, a, b) = sample();
        set_status(&mut store, a, "In Progress");
        let labels = Labels::load(&store).unwrap();
        let in_progress = store
            .resolve_attribute(AttributeKind::Status, "In Progress")
            .unwrap();
        let filter = TaskFilter {
            view: None,
            status: Some(in_progress.id),
        };
        let out = format_task_tree(store.tree(), &labels, None, &filter);
        assert_eq!(out, ". #1 root\n└── . #2 a  [In Progress]\n");
        assert!(!out.contains(&b.to_string()));
    }

    #[test]
    fn detail_lists_links() {
        let (mut store, root, ..) = sample();
        store.add_link(root, "https://example.com", Some("home")).unwrap();
        let labels = Labels::load(&store).unwrap();
        let links = store.links(root).unwrap();
        let out = format_task_detail(store.task(root).unwrap(), &labels, &links, store.tree());
        assert!(out.contains("Title:       root\n"));
        assert!(out.contains("Position:    0 of 1\n"));
        assert!(out.contains("Children:    2\n"));
        assert!(out.contains("https://example.com (home)"));
    }
}
