use std::collections::VecDeque;
use std::fmt;

use bte_runtime::{ChildConstraint, TaskClass, TaskId};
use generational_arena::Index;

use crate::adapter::PhysicalOp;

/// Handle to a node stored in a [`ModelTree`](crate::ModelTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) Index);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.0.into_raw_parts();
        write!(f, "n{slot}v{generation}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Leaf,
    Branch,
    Decorator,
    Include,
    /// Editor-only node presenting a guard and its guarded task as two children.
    Guard,
    /// Synthetic root wrapping the runtime host task.
    Root,
    /// Root of a model that has no tree loaded.
    Null,
}

impl NodeKind {
    pub fn of(class: TaskClass) -> Self {
        match class {
            TaskClass::Host => Self::Root,
            TaskClass::Leaf => Self::Leaf,
            TaskClass::Branch => Self::Branch,
            TaskClass::Decorator => Self::Decorator,
            TaskClass::Include => Self::Include,
        }
    }
}

/// Resolution state of an Include node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeState {
    #[default]
    Unresolved,
    Resolved,
    /// Last attempt failed; retried on the next validation pass.
    Missing,
}

/// One editable position in the model tree.
#[derive(Debug, Clone)]
pub struct ModelNode {
    pub(crate) kind: NodeKind,
    pub(crate) type_name: String,
    pub(crate) task: Option<TaskId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) constraint: ChildConstraint,
    pub(crate) valid: bool,
    pub(crate) read_only: bool,
    pub(crate) is_guard: bool,
    // Node guarding this one.
    pub(crate) guard: Option<NodeId>,
    // Node this one guards, set while `is_guard`.
    pub(crate) guarded: Option<NodeId>,
    pub(crate) comment: Option<String>,
    // Queued edits tagged with their submission number.
    pub(crate) pending: VecDeque<(u64, PhysicalOp)>,
    pub(crate) include: IncludeState,
}

impl ModelNode {
    pub(crate) fn new(
        kind: NodeKind,
        type_name: impl Into<String>,
        task: Option<TaskId>,
        constraint: ChildConstraint,
    ) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            task,
            parent: None,
            children: Vec::new(),
            constraint,
            valid: false,
            read_only: false,
            is_guard: false,
            guard: None,
            guarded: None,
            comment: None,
            pending: VecDeque::new(),
            include: IncludeState::default(),
        }
    }

    pub(crate) fn guard_pseudo() -> Self {
        Self::new(NodeKind::Guard, "Guard", None, ChildConstraint::new(0, 2))
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Runtime counterpart. `None` for Guard pseudo-nodes and an uninitialized root.
    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, index: usize) -> Option<NodeId> {
        self.children.get(index).copied()
    }

    /// Ordinal of `child` among this node's children.
    pub fn child_index(&self, child: NodeId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }

    pub fn min_children(&self) -> usize {
        self.constraint.min
    }

    pub fn max_children(&self) -> usize {
        self.constraint.max
    }

    pub fn constraint(&self) -> ChildConstraint {
        self.constraint
    }

    /// Validity as of the last validation pass.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_guard(&self) -> bool {
        self.is_guard
    }

    pub fn guard(&self) -> Option<NodeId> {
        self.guard
    }

    pub fn guarded(&self) -> Option<NodeId> {
        self.guarded
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Physical edits queued on this node, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PhysicalOp> {
        self.pending.iter().map(|(_, op)| op)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn include_state(&self) -> IncludeState {
        self.include
    }
}
