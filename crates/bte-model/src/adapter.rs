use std::fmt;

use bte_runtime::{
    Blackboard, RuntimeError, TaskId, TaskKind, TaskStatus, TaskTemplate, TaskTree,
};
use tracing::{debug, trace};

use crate::error::AdapterError;

/// One structural mutation of the runtime tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalOp {
    Insert {
        parent: TaskId,
        at: usize,
        task: TaskId,
    },
    Remove {
        parent: TaskId,
        task: TaskId,
    },
    SetGuard {
        task: TaskId,
        guard: Option<TaskId>,
    },
}

impl PhysicalOp {
    /// Whether the op names `task` in any role.
    pub fn mentions(&self, task: TaskId) -> bool {
        match *self {
            Self::Insert {
                parent, task: t, ..
            }
            | Self::Remove { parent, task: t } => parent == task || t == task,
            Self::SetGuard { task: t, guard } => t == task || guard == Some(task),
        }
    }
}

impl fmt::Display for PhysicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert { parent, at, task } => write!(f, "insert {task} into {parent} at {at}"),
            Self::Remove { parent, task } => write!(f, "remove {task} from {parent}"),
            Self::SetGuard {
                task,
                guard: Some(guard),
            } => write!(f, "guard {task} with {guard}"),
            Self::SetGuard { task, guard: None } => write!(f, "clear guard of {task}"),
        }
    }
}

/// Sole owner of the executable tree on the model side.
///
/// Structural changes only go through [`apply`](Self::apply) and the spawn/release helpers;
/// everything else is read access, stepping and the stepped subject's blackboard.
#[derive(Debug, Default)]
pub struct RuntimeAdapter {
    tree: TaskTree,
}

impl RuntimeAdapter {
    pub fn new(tree: TaskTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub fn into_inner(self) -> TaskTree {
        self.tree
    }

    pub fn host(&self) -> TaskId {
        self.tree.host()
    }

    pub fn apply(&mut self, op: PhysicalOp) -> Result<(), AdapterError> {
        let result = match op {
            PhysicalOp::Insert { parent, at, task } => self.tree.insert_child(parent, at, task),
            PhysicalOp::Remove { parent, task } => self.tree.remove_child(parent, task),
            PhysicalOp::SetGuard { task, guard } => self.tree.set_guard(task, guard).map(drop),
        };
        result.map_err(|source| AdapterError { op, source })?;
        trace!(%op, "physical edit applied");
        Ok(())
    }

    pub fn spawn(&mut self, kind: TaskKind) -> TaskId {
        self.tree.spawn(kind)
    }

    pub fn build(&mut self, template: &TaskTemplate) -> TaskId {
        self.tree.build(template)
    }

    /// Frees exactly `tasks`. Tasks still reachable from the host are left alone, and so are
    /// children the listed tasks hold but do not own.
    pub fn release_tasks(&mut self, tasks: &[TaskId]) -> usize {
        let released = self.tree.release_tasks(tasks);
        if released < tasks.len() {
            debug!(requested = tasks.len(), released, "some tasks kept");
        }
        released
    }

    /// Detaches and frees every child of `task`.
    pub fn release_children(&mut self, task: TaskId) -> Result<usize, RuntimeError> {
        let mut released = 0;
        for child in self.tree.children(task).to_vec() {
            self.tree.remove_child(task, child)?;
            released += self.tree.release(child)?;
        }
        Ok(released)
    }

    pub fn set_include_subtree(&mut self, task: TaskId, name: &str) -> Result<(), RuntimeError> {
        self.tree.set_include_subtree(task, name)
    }

    pub fn status(&self, task: TaskId) -> Option<TaskStatus> {
        self.tree.status(task)
    }

    pub fn reset(&mut self) {
        self.tree.reset();
    }

    pub fn step(&mut self) -> TaskStatus {
        self.tree.step()
    }

    pub fn blackboard(&self) -> &Blackboard {
        self.tree.blackboard()
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        self.tree.blackboard_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bte_runtime::Succeed;

    #[test]
    fn rejected_ops_report_the_op() {
        let mut adapter = RuntimeAdapter::default();
        let seq = adapter.spawn(TaskKind::Sequence);
        let leaf = adapter.spawn(TaskKind::leaf(Succeed));
        let op = PhysicalOp::Insert {
            parent: seq,
            at: 3,
            task: leaf,
        };
        let err = adapter.apply(op).unwrap_err();
        assert_eq!(err.op, op);
        assert_eq!(err.source, RuntimeError::IndexOutOfRange { at: 3, len: 0 });
    }

    #[test]
    fn release_keeps_attached_tasks() {
        let mut adapter = RuntimeAdapter::default();
        let host = adapter.host();
        let leaf = adapter.spawn(TaskKind::leaf(Succeed));
        adapter
            .apply(PhysicalOp::Insert {
                parent: host,
                at: 0,
                task: leaf,
            })
            .unwrap();
        assert_eq!(adapter.release_tasks(&[leaf]), 0);
        assert!(adapter.tree().contains(leaf));

        adapter
            .apply(PhysicalOp::Remove {
                parent: host,
                task: leaf,
            })
            .unwrap();
        assert_eq!(adapter.release_tasks(&[leaf]), 1);
        assert!(!adapter.tree().contains(leaf));
    }

    #[test]
    fn a_moved_task_cannot_be_inserted_twice() {
        let mut adapter = RuntimeAdapter::default();
        let a = adapter.spawn(TaskKind::Sequence);
        let b = adapter.spawn(TaskKind::Selector);
        let leaf = adapter.spawn(TaskKind::leaf(Succeed));
        let into = |parent| PhysicalOp::Insert {
            parent,
            at: 0,
            task: leaf,
        };
        adapter.apply(into(a)).unwrap();
        let err = adapter.apply(into(b)).unwrap_err();
        assert_eq!(err.source, RuntimeError::AlreadyChild { parent: a, child: leaf });
        assert!(adapter.tree().children(b).is_empty());
    }

    #[test]
    fn mentions_covers_every_role() {
        let mut adapter = RuntimeAdapter::default();
        let a = adapter.spawn(TaskKind::Sequence);
        let b = adapter.spawn(TaskKind::leaf(Succeed));
        let guard = PhysicalOp::SetGuard {
            task: a,
            guard: Some(b),
        };
        assert!(guard.mentions(a) && guard.mentions(b));
        assert!(!PhysicalOp::SetGuard { task: a, guard: None }.mentions(b));
    }
}
