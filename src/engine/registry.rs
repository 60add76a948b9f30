// src/engine/registry.rs

//! Process-wide bookkeeping of live tasks.
//!
//! The registry is the only state shared between tasks. Tasks insert
//! themselves when they start and remove themselves on their terminal
//! transition; nothing else mutates it. It is reference counted and `!Send`,
//! so every access happens on the scheduler's thread.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, info, trace};

use crate::types::{Metadata, TagValue};

use super::task::{ProcessTask, TaskId};

#[derive(Default)]
struct RegistryInner {
    tasks: RefCell<Vec<ProcessTask>>,
    next_id: Cell<u64>,
}

/// Insertion-ordered set of running tasks.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Rc<RegistryInner>,
}

/// Non-owning reference held by tasks, so a task never keeps the registry
/// alive on its own.
#[derive(Clone, Default)]
pub(crate) struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<TaskRegistry> {
        self.inner.upgrade().map(|inner| TaskRegistry { inner })
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn next_id(&self) -> TaskId {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        TaskId::new(id)
    }

    pub(crate) fn insert(&self, task: ProcessTask) {
        trace!(task_id = %task.id(), "registering task");
        self.inner.tasks.borrow_mut().push(task);
    }

    /// Remove a task by id. Removing an absent task is a no-op.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        // The removed handle is dropped after the borrow ends.
        let removed = {
            let mut tasks = self.inner.tasks.borrow_mut();
            tasks
                .iter()
                .position(|t| t.id() == id)
                .map(|pos| tasks.remove(pos))
        };

        match removed {
            Some(_) => {
                trace!(task_id = %id, remaining = self.len(), "deregistered task");
                true
            }
            None => {
                debug!(task_id = %id, "task already deregistered");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.borrow().is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.tasks.borrow().iter().any(|t| t.id() == id)
    }

    /// Copy of the current contents, in registration order.
    pub fn snapshot(&self) -> Vec<ProcessTask> {
        self.inner.tasks.borrow().clone()
    }

    /// Tasks whose metadata contains every pair in `filter`.
    pub fn query(&self, filter: &TagFilter) -> Vec<ProcessTask> {
        self.inner
            .tasks
            .borrow()
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    /// Whether any task matches `filter`.
    pub fn any(&self, filter: &TagFilter) -> bool {
        self.inner.tasks.borrow().iter().any(|t| filter.matches(t))
    }

    /// Kill every registered task. Returns how many kills were issued.
    ///
    /// Works on a snapshot: each kill deregisters its task, and callbacks may
    /// start new tasks, neither of which disturbs the iteration.
    pub fn kill_all(&self) -> usize {
        let tasks = self.snapshot();
        info!(count = tasks.len(), "killing all registered tasks");
        for task in &tasks {
            task.kill();
        }
        tasks.len()
    }
}

/// Exact-match tag filter for [`TaskRegistry::query`].
///
/// Tasks without metadata never match, not even an empty filter. Tasks that
/// are mid-teardown are skipped unless `include_disabled` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: Metadata,
    include_disabled: bool,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn include_disabled(mut self, include: bool) -> Self {
        self.include_disabled = include;
        self
    }

    pub fn matches(&self, task: &ProcessTask) -> bool {
        let metadata = task.metadata();
        if metadata.is_empty() {
            return false;
        }
        if !self.include_disabled && task.is_disabled() {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let registry = TaskRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert!(b > a);
        assert_eq!(a.get(), 1);
    }

    #[test]
    fn removing_unknown_id_is_harmless() {
        let registry = TaskRegistry::new();
        assert!(!registry.remove(TaskId::new(42)));
        assert!(registry.is_empty());
    }

    #[test]
    fn weak_handle_does_not_keep_registry_alive() {
        let registry = TaskRegistry::new();
        let weak = registry.downgrade();
        assert!(weak.upgrade().is_some());
        drop(registry);
        assert!(weak.upgrade().is_none());
    }
}
