//! In-memory task forest.
//!
//! Tasks live in an arena keyed by id. Each node keeps its ordered child
//! list; root order lives in `roots`. `Task::position` always equals the
//! task's index in its sibling list, and every mutation reports the
//! placements it changed so they can be persisted.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::model::{AttributeId, AttributeKind, Placement, Task, TaskEdit, TaskId};

/// A validated change to the tree, with enough before/after data to persist
/// it and to tell observers which nodes moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert {
        task: Task,
        shifted: Vec<Placement>,
    },
    Move {
        id: TaskId,
        from: Placement,
        to: Placement,
        shifted: Vec<Placement>,
    },
    /// `removed` is ordered leaf-first.
    Remove {
        removed: Vec<Task>,
        shifted: Vec<Placement>,
    },
    Edit {
        before: Task,
        after: Task,
    },
}

impl Mutation {
    /// Siblings whose parent or position changed as a side effect.
    pub fn shifted(&self) -> &[Placement] {
        match self {
            Self::Insert { shifted, .. }
            | Self::Move { shifted, .. }
            | Self::Remove { shifted, .. } => shifted,
            Self::Edit { .. } => &[],
        }
    }

    /// The nodes an observer needs to redraw: the primary node(s) first,
    /// followed by renumbered siblings.
    pub fn affected(&self) -> Vec<TaskId> {
        let primary: Vec<TaskId> = match self {
            Self::Insert { task, .. } => vec![task.id],
            Self::Move { id, .. } => vec![*id],
            Self::Remove { removed, .. } => removed.iter().map(|t| t.id).collect(),
            Self::Edit { after, .. } => vec![after.id],
        };
        let mut seen = HashSet::new();
        primary
            .into_iter()
            .chain(self.shifted().iter().map(|p| p.id))
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    task: Task,
    children: Vec<TaskId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskTree {
    nodes: HashMap<TaskId, Node>,
    roots: Vec<TaskId>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from stored rows. Siblings are ordered by
    /// `(position, id)` and then renumbered densely; the returned placements
    /// are the rows whose stored position was wrong.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<(Self, Vec<Placement>)> {
        let mut order: Vec<(usize, TaskId, Option<TaskId>)> =
            tasks.iter().map(|t| (t.position, t.id, t.parent)).collect();
        order.sort();

        let mut tree = Self::default();
        for task in tasks {
            let id = task.id;
            let node = Node {
                task,
                children: Vec::new(),
            };
            if tree.nodes.insert(id, node).is_some() {
                return Err(Error::ConstraintViolation(format!("duplicate task id {id}")));
            }
        }
        for (_, id, parent) in order {
            match parent {
                None => tree.roots.push(id),
                Some(p) => tree
                    .nodes
                    .get_mut(&p)
                    .ok_or(Error::InvalidParent(p))?
                    .children
                    .push(id),
            }
        }

        // Members of a parent cycle are unreachable from every root.
        let reachable: HashSet<TaskId> = tree.walk().map(|t| t.id).collect();
        if reachable.len() != tree.nodes.len() {
            let stray = tree
                .nodes
                .values()
                .map(|n| &n.task)
                .filter(|t| !reachable.contains(&t.id))
                .min_by_key(|t| t.id);
            if let Some(task) = stray {
                return Err(Error::CycleDetected {
                    task: task.id,
                    parent: task.parent.unwrap_or(task.id),
                });
            }
        }

        let mut scopes: Vec<Option<TaskId>> = tree.nodes.keys().copied().map(Some).collect();
        scopes.sort();
        scopes.insert(0, None);
        let mut repaired = Vec::new();
        for scope in scopes {
            repaired.extend(tree.renumber(scope));
        }
        Ok((tree, repaired))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.nodes.get(&id).map(|n| &n.task)
    }

    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    /// Ordered children of `parent`, or the roots for `None`.
    pub fn children(&self, parent: Option<TaskId>) -> &[TaskId] {
        match parent {
            None => &self.roots,
            Some(p) => self.nodes.get(&p).map_or(&[][..], |n| &n.children[..]),
        }
    }

    /// The sibling list `id` belongs to, including `id` itself.
    pub fn siblings(&self, id: TaskId) -> &[TaskId] {
        match self.get(id) {
            Some(task) => self.children(task.parent),
            None => &[],
        }
    }

    pub fn depth(&self, id: TaskId) -> usize {
        self.ancestors(id).count()
    }

    /// Tasks in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.nodes.values().map(|n| &n.task)
    }

    /// Parent, grandparent, ... up to the root.
    pub fn ancestors(&self, id: TaskId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).and_then(|t| t.parent),
        }
    }

    /// Every task below `id`, in pre-order. Does not include `id`.
    pub fn descendants(&self, id: TaskId) -> Descendants<'_> {
        Descendants {
            tree: self,
            stack: self.children(Some(id)).iter().rev().copied().collect(),
        }
    }

    /// The whole forest in pre-order.
    pub fn walk(&self) -> Descendants<'_> {
        Descendants {
            tree: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    pub fn next_id(&self) -> TaskId {
        TaskId(self.nodes.keys().map(|id| id.0).max().unwrap_or(0) + 1)
    }

    fn is_within(&self, candidate: TaskId, root: TaskId) -> bool {
        candidate == root || self.ancestors(candidate).any(|t| t.id == root)
    }

    fn scope_mut(&mut self, parent: Option<TaskId>) -> Result<&mut Vec<TaskId>> {
        match parent {
            None => Ok(&mut self.roots),
            Some(p) => self
                .nodes
                .get_mut(&p)
                .map(|n| &mut n.children)
                .ok_or(Error::InvalidParent(p)),
        }
    }

    /// Rewrite parent and position for every member of a sibling list,
    /// returning the placements that changed.
    fn renumber(&mut self, parent: Option<TaskId>) -> Vec<Placement> {
        let ids = self.children(parent).to_vec();
        let mut changed = Vec::new();
        for (position, id) in ids.into_iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.task.position != position || node.task.parent != parent {
                    node.task.position = position;
                    node.task.parent = parent;
                    changed.push(node.task.placement());
                }
            }
        }
        changed
    }

    /// Add `task` under `parent` at `position` (clamped to the sibling count).
    pub fn insert(
        &mut self,
        mut task: Task,
        parent: Option<TaskId>,
        position: usize,
    ) -> Result<Mutation> {
        if let Some(p) = parent {
            if self.is_within(p, task.id) {
                return Err(Error::CycleDetected {
                    task: task.id,
                    parent: p,
                });
            }
            if !self.contains(p) {
                return Err(Error::InvalidParent(p));
            }
        }
        if self.contains(task.id) {
            return Err(Error::ConstraintViolation(format!(
                "task {} already exists",
                task.id
            )));
        }

        let siblings = self.scope_mut(parent)?;
        let position = position.min(siblings.len());
        siblings.insert(position, task.id);
        task.parent = parent;
        task.position = position;
        let inserted = task.clone();
        self.nodes.insert(
            task.id,
            Node {
                task,
                children: Vec::new(),
            },
        );

        let mut shifted = self.renumber(parent);
        shifted.retain(|p| p.id != inserted.id);
        Ok(Mutation::Insert {
            task: inserted,
            shifted,
        })
    }

    /// Detach `id` with its subtree and reattach it under `new_parent`.
    /// `new_position` is clamped against the destination list after the
    /// task has left its old slot.
    pub fn move_task(
        &mut self,
        id: TaskId,
        new_parent: Option<TaskId>,
        new_position: usize,
    ) -> Result<Mutation> {
        let from = self.get(id).ok_or(Error::TaskNotFound(id))?.placement();
        if let Some(p) = new_parent {
            if !self.contains(p) {
                return Err(Error::InvalidParent(p));
            }
            if self.is_within(p, id) {
                return Err(Error::CycleDetected { task: id, parent: p });
            }
        }

        self.scope_mut(from.parent)?.retain(|&s| s != id);
        let dest = self.scope_mut(new_parent)?;
        let position = new_position.min(dest.len());
        dest.insert(position, id);

        let mut shifted = self.renumber(from.parent);
        if new_parent != from.parent {
            shifted.extend(self.renumber(new_parent));
        }
        let to = self.get(id).ok_or(Error::TaskNotFound(id))?.placement();
        shifted.retain(|p| p.id != id);
        Ok(Mutation::Move {
            id,
            from,
            to,
            shifted,
        })
    }

    /// Delete `id`. With `cascade` the whole subtree goes; otherwise the
    /// children take over the removed task's slot, in their existing order.
    pub fn remove(&mut self, id: TaskId, cascade: bool) -> Result<Mutation> {
        let node = self.nodes.get(&id).ok_or(Error::TaskNotFound(id))?;
        let parent = node.task.parent;
        let children = node.children.clone();

        let mut doomed: Vec<TaskId> = if cascade {
            self.descendants(id).map(|t| t.id).collect()
        } else {
            Vec::new()
        };
        doomed.reverse();
        doomed.push(id);

        let siblings = self.scope_mut(parent)?;
        let index = siblings
            .iter()
            .position(|&s| s == id)
            .ok_or(Error::TaskNotFound(id))?;
        let tail = siblings.split_off(index + 1);
        siblings.pop();
        if !cascade {
            siblings.extend(children);
        }
        siblings.extend(tail);

        let removed = doomed
            .iter()
            .filter_map(|d| self.nodes.remove(d).map(|n| n.task))
            .collect();
        let shifted = self.renumber(parent);
        Ok(Mutation::Remove { removed, shifted })
    }

    pub fn edit(&mut self, id: TaskId, edit: &TaskEdit) -> Result<Mutation> {
        let node = self.nodes.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        let before = node.task.clone();
        edit.apply_to(&mut node.task);
        Ok(Mutation::Edit {
            before,
            after: node.task.clone(),
        })
    }

    /// Point every task referencing `from` at `to` instead, overwriting
    /// `completed_at` on those tasks when `completed_at` is `Some`. Returns
    /// the touched ids in ascending order.
    pub fn reassign(
        &mut self,
        kind: AttributeKind,
        from: AttributeId,
        to: Option<AttributeId>,
        completed_at: Option<Option<NaiveDateTime>>,
    ) -> Vec<TaskId> {
        let mut touched = Vec::new();
        for node in self.nodes.values_mut() {
            let slot = node.task.attribute_mut(kind);
            if *slot == Some(from) {
                *slot = to;
                if let Some(stamp) = completed_at {
                    node.task.completed_at = stamp;
                }
                touched.push(node.task.id);
            }
        }
        touched.sort();
        touched
    }

    /// Verify the forest and density invariants.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        let mut scopes: Vec<(Option<TaskId>, &[TaskId])> = vec![(None, &self.roots[..])];
        scopes.extend(self.nodes.iter().map(|(id, n)| (Some(*id), &n.children[..])));

        for (parent, members) in scopes {
            for (position, id) in members.iter().enumerate() {
                let task = self
                    .get(*id)
                    .ok_or_else(|| format!("{id} is listed under {parent:?} but missing"))?;
                if task.parent != parent {
                    return Err(format!(
                        "{id} is listed under {parent:?} but points at {:?}",
                        task.parent
                    ));
                }
                if task.position != position {
                    return Err(format!(
                        "{id} has position {} but sits at index {position}",
                        task.position
                    ));
                }
                if !seen.insert(*id) {
                    return Err(format!("{id} appears in more than one sibling list"));
                }
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(format!(
                "{} task(s) are not in any sibling list",
                self.nodes.len() - seen.len()
            ));
        }
        let reachable = self.walk().count();
        if reachable != self.nodes.len() {
            return Err(format!(
                "only {reachable} of {} tasks are reachable from the roots",
                self.nodes.len()
            ));
        }
        Ok(())
    }
}

pub struct Ancestors<'a> {
    tree: &'a TaskTree,
    next: Option<TaskId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.tree.get(self.next?)?;
        self.next = task.parent;
        Some(task)
    }
}

pub struct Descendants<'a> {
    tree: &'a TaskTree,
    stack: Vec<TaskId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.nodes.get(&self.stack.pop()?)?;
        self.stack.extend(node.children.iter().rev().copied());
        Some(&node.task)
    }
}
