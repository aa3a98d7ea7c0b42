//! The task store ties the in-memory tree, the repository and the notifier
//! together. A mutation is validated against the tree, persisted in one
//! savepoint, and only then announced. If persistence fails the tree is put
//! back exactly as it was and nothing is announced.

use std::path::Path;

use chrono::{Local, NaiveDateTime, Timelike};
use log::{debug, info, warn};
use rusqlite::OptionalExtension;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    Attribute, AttributeId, AttributeKind, Link, NewTask, Task, TaskEdit, TaskId,
};
use crate::notify::{ChangeKind, Notifier, Observer, SubscriptionId};
use crate::repo::Repository;
use crate::tree::{Mutation, TaskTree};

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub struct TaskStore {
    repo: Repository,
    tree: TaskTree,
    notifier: Notifier,
    config: Config,
    /// Events held back while a scoped operation is open.
    pending: Option<Vec<(ChangeKind, Vec<TaskId>)>>,
}

impl TaskStore {
    /// Open (creating and migrating if needed) the database at `path`.
    pub fn open(config: Config, path: &Path) -> Result<Self> {
        let repo = Repository::open(path, config.database.busy_timeout_ms)?;
        info!("opened {}", path.display());
        Self::with_repository(config, repo)
    }

    pub fn open_in_memory(config: Config) -> Result<Self> {
        Self::with_repository(config, Repository::open_memory()?)
    }

    fn with_repository(config: Config, repo: Repository) -> Result<Self> {
        let tree = repo.load_tree()?;
        Ok(Self {
            repo,
            tree,
            notifier: Notifier::new(),
            config,
            pending: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tree.get(id)
    }

    fn require_task(&self, id: TaskId) -> Result<&Task> {
        self.tree.get(id).ok_or(Error::TaskNotFound(id))
    }

    pub fn subscribe(&mut self, observer: impl Observer + 'static) -> SubscriptionId {
        self.notifier.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn emit(&mut self, kind: ChangeKind, affected: Vec<TaskId>) {
        match &mut self.pending {
            Some(queue) => queue.push((kind, affected)),
            None => {
                self.notifier.publish(kind, affected);
            }
        }
    }

    /// Persist an already-applied tree mutation, restoring `snapshot` if the
    /// write fails.
    fn commit(&mut self, snapshot: TaskTree, mutation: Mutation) -> Result<Mutation> {
        let kind = ChangeKind::from(&mutation);
        if let Err(e) = self.repo.apply(&mutation) {
            warn!("{kind:?} rolled back: {e}");
            self.tree = snapshot;
            return Err(e);
        }
        let affected = mutation.affected();
        debug!("{kind:?} committed, {} node(s) affected", affected.len());
        self.emit(kind, affected);
        Ok(mutation)
    }

    fn check_attribute(&self, kind: AttributeKind, id: Option<AttributeId>) -> Result<()> {
        match id {
            Some(id) if self.repo.attribute(kind, id)?.is_none() => Err(Error::AttributeNotFound {
                kind,
                name: id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn configured_default(&self, kind: AttributeKind, name: Option<&str>) -> Result<Option<AttributeId>> {
        let Some(name) = name else {
            return Ok(None);
        };
        match self.repo.find_attribute(kind, name)? {
            Some(attr) => Ok(Some(attr.id)),
            None => {
                warn!("configured default {kind} '{name}' does not exist");
                Ok(None)
            }
        }
    }

    fn marks_complete(&self, status: Option<AttributeId>) -> Result<bool> {
        let Some(id) = status else {
            return Ok(false);
        };
        Ok(self
            .repo
            .attribute(AttributeKind::Status, id)?
            .is_some_and(|s| s.marks_complete))
    }

    // -------------------------------------------------------------------------
    // Task mutations
    // -------------------------------------------------------------------------

    /// Create a task. Priority and status default to the configured names.
    pub fn create_task(&mut self, mut new: NewTask) -> Result<TaskId> {
        if new.priority.is_none() {
            new.priority = self.configured_default(
                AttributeKind::Priority,
                self.config.tasks.default_priority.as_deref(),
            )?;
        }
        if new.status.is_none() {
            new.status = self.configured_default(
                AttributeKind::Status,
                self.config.tasks.default_status.as_deref(),
            )?;
        }
        self.insert_task(new)
    }

    /// Create a task exactly as described: attributes left `None` stay
    /// empty. `completed_at` is kept only under a completing status, which
    /// stamps the current time when none is given.
    pub fn insert_task(&mut self, new: NewTask) -> Result<TaskId> {
        self.check_attribute(AttributeKind::Category, new.category)?;
        self.check_attribute(AttributeKind::Priority, new.priority)?;
        self.check_attribute(AttributeKind::Status, new.status)?;

        let completed_at = if self.marks_complete(new.status)? {
            Some(new.completed_at.unwrap_or_else(now))
        } else {
            None
        };
        let id = self.tree.next_id();
        let task = Task {
            id,
            title: new.title,
            description: new.description,
            parent: new.parent,
            position: 0,
            category: new.category,
            priority: new.priority,
            status: new.status,
            due_date: new.due_date,
            completed_at,
        };

        let snapshot = self.tree.clone();
        let mutation = self
            .tree
            .insert(task, new.parent, new.position.unwrap_or(usize::MAX))?;
        self.commit(snapshot, mutation)?;
        Ok(id)
    }

    /// Reparent and/or reorder a task together with its subtree.
    pub fn move_task(&mut self, id: TaskId, parent: Option<TaskId>, position: usize) -> Result<()> {
        let snapshot = self.tree.clone();
        let mutation = self.tree.move_task(id, parent, position)?;
        self.commit(snapshot, mutation)?;
        Ok(())
    }

    /// Delete a task. Returns every deleted id, leaf-first.
    pub fn remove_task(&mut self, id: TaskId, cascade: bool) -> Result<Vec<TaskId>> {
        let snapshot = self.tree.clone();
        let mutation = self.tree.remove(id, cascade)?;
        match self.commit(snapshot, mutation)? {
            Mutation::Remove { removed, .. } => Ok(removed.iter().map(|t| t.id).collect()),
            _ => Ok(vec![id]),
        }
    }

    /// Apply a field edit. Changing status into or out of a completing
    /// status stamps or clears `completed_at` unless the edit sets it.
    pub fn edit_task(&mut self, id: TaskId, mut edit: TaskEdit) -> Result<()> {
        let current_status = self.require_task(id)?.status;
        for (kind, field) in [
            (AttributeKind::Category, edit.category),
            (AttributeKind::Priority, edit.priority),
            (AttributeKind::Status, edit.status),
        ] {
            self.check_attribute(kind, field.flatten())?;
        }

        if let (Some(status), None) = (edit.status, edit.completed_at) {
            let was = self.marks_complete(current_status)?;
            let is = self.marks_complete(status)?;
            if is && !was {
                edit.completed_at = Some(Some(now()));
            } else if was && !is {
                edit.completed_at = Some(None);
            }
        }
        if edit.is_empty() {
            return Ok(());
        }

        let snapshot = self.tree.clone();
        let mutation = self.tree.edit(id, &edit)?;
        self.commit(snapshot, mutation)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    pub fn attributes(&self, kind: AttributeKind) -> Result<Vec<Attribute>> {
        self.repo.attributes(kind)
    }

    pub fn attribute(&self, kind: AttributeKind, id: AttributeId) -> Result<Option<Attribute>> {
        self.repo.attribute(kind, id)
    }

    pub fn find_attribute(&self, kind: AttributeKind, name: &str) -> Result<Option<Attribute>> {
        self.repo.find_attribute(kind, name)
    }

    /// Like [`find_attribute`](Self::find_attribute) but missing names are an error.
    pub fn resolve_attribute(&self, kind: AttributeKind, name: &str) -> Result<Attribute> {
        self.repo
            .find_attribute(kind, name)?
            .ok_or_else(|| Error::AttributeNotFound {
                kind,
                name: name.to_string(),
            })
    }

    pub fn add_attribute(&mut self, kind: AttributeKind, name: &str, color: &str) -> Result<Attribute> {
        let attr = self.repo.add_attribute(kind, name, color)?;
        debug!("added {kind} '{}' as {}", attr.name, attr.id);
        Ok(attr)
    }

    pub fn rename_attribute(&mut self, kind: AttributeKind, id: AttributeId, name: &str) -> Result<()> {
        self.repo.rename_attribute(kind, id, name)
    }

    pub fn set_attribute_color(&mut self, kind: AttributeKind, id: AttributeId, color: &str) -> Result<()> {
        self.repo.set_attribute_color(kind, id, color)
    }

    pub fn set_marks_complete(&mut self, status: AttributeId, marks_complete: bool) -> Result<()> {
        self.repo.set_marks_complete(status, marks_complete)
    }

    pub fn move_attribute(&mut self, kind: AttributeKind, id: AttributeId, position: usize) -> Result<()> {
        self.repo.move_attribute(kind, id, position)
    }

    /// Delete an attribute; tasks using it are re-pointed, and their
    /// completion stamp follows the fallback status, as described on
    /// [`Repository::delete_attribute`]. Returns the re-pointed tasks.
    pub fn delete_attribute(&mut self, kind: AttributeKind, id: AttributeId) -> Result<Vec<TaskId>> {
        let reassignment = self.repo.delete_attribute(kind, id, now())?;
        let touched = reassignment.touched;
        let in_memory =
            self.tree
                .reassign(kind, id, reassignment.fallback, reassignment.completed_at);
        if in_memory != touched {
            warn!(
                "{kind} {id}: store re-pointed {} task(s), tree held {}",
                touched.len(),
                in_memory.len()
            );
        }
        if !touched.is_empty() {
            self.emit(ChangeKind::Reassigned, touched.clone());
        }
        Ok(touched)
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    pub fn links(&self, task: TaskId) -> Result<Vec<Link>> {
        self.repo.links(task)
    }

    pub fn add_link(&mut self, task: TaskId, url: &str, label: Option<&str>) -> Result<Link> {
        self.require_task(task)?;
        let link = self.repo.add_link(task, url, label)?;
        self.emit(ChangeKind::Edited, vec![task]);
        Ok(link)
    }

    pub fn remove_link(&mut self, id: i64) -> Result<bool> {
        let owner = self
            .repo
            .connection()
            .query_row("SELECT task_id FROM links WHERE id = ?1", [id], |row| {
                row.get::<_, TaskId>(0)
            })
            .optional()?;
        let removed = self.repo.remove_link(id)?;
        if let (true, Some(task)) = (removed, owner) {
            self.emit(ChangeKind::Edited, vec![task]);
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Scoped operations
    // -------------------------------------------------------------------------

    /// Run `f` with exclusive access to the store as one all-or-nothing
    /// unit. Events raised inside are delivered, in order, only after the
    /// whole operation commits; on failure the database and the tree are
    /// restored and the events are dropped. Nested calls join the outer scope.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.pending.is_some() {
            return f(self);
        }

        let snapshot = self.tree.clone();
        self.repo.begin_scope()?;
        self.pending = Some(Vec::new());

        let result = f(self).and_then(|v| {
            self.repo.commit_scope()?;
            Ok(v)
        });
        let events = self.pending.take().unwrap_or_default();

        match result {
            Ok(v) => {
                for (kind, affected) in events {
                    self.notifier.publish(kind, affected);
                }
                Ok(v)
            }
            Err(e) => {
                if let Err(rollback) = self.repo.rollback_scope() {
                    warn!("scoped rollback failed: {rollback}");
                }
                self.tree = snapshot;
                warn!("scoped operation rolled back: {e}");
                Err(e)
            }
        }
    }
}
