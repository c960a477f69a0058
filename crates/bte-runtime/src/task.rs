use std::fmt;

use generational_arena::Index;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::leaf::Leaf;

/// Handle to a task stored in a [`TaskTree`](crate::TaskTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) Index);

impl TaskId {
    /// Arena slot, stable for the lifetime of the task. Used as trace payload.
    pub fn slot(self) -> u64 {
        self.0.into_raw_parts().0 as u64
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.0.into_raw_parts();
        write!(f, "#{slot}v{generation}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TaskStatus {
    #[default]
    Fresh,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl TaskStatus {
    pub fn code(self) -> u64 {
        match self {
            Self::Fresh => 0,
            Self::Running => 1,
            Self::Success => 2,
            Self::Failure => 3,
            Self::Cancelled => 4,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Structural category of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
    /// The tree's own root slot.
    Host,
    Leaf,
    Branch,
    Decorator,
    Include,
}

/// Inclusive bounds on how many children a task may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChildConstraint {
    pub min: usize,
    pub max: usize,
}

impl ChildConstraint {
    pub const UNBOUNDED: usize = usize::MAX;

    pub const NONE: Self = Self::exactly(0);

    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: n }
    }

    pub const fn at_least(min: usize) -> Self {
        Self {
            min,
            max: Self::UNBOUNDED,
        }
    }

    pub fn admits(&self, count: usize) -> bool {
        self.min <= count && count <= self.max
    }

    pub fn has_room(&self, count: usize) -> bool {
        count < self.max
    }
}

impl fmt::Display for ChildConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max == Self::UNBOUNDED {
            write!(f, "{}..", self.min)
        } else {
            write!(f, "{}..={}", self.min, self.max)
        }
    }
}

/// What a task does when stepped.
#[derive(Debug)]
pub enum TaskKind {
    Host,
    /// Runs children in order until one fails.
    Sequence,
    /// Runs children in order until one succeeds.
    Selector,
    /// Ticks every child each step; fails on the first failure, succeeds when all succeed.
    Parallel,
    Invert,
    AlwaysSucceed,
    AlwaysFail,
    Repeat {
        times: u32,
    },
    /// Splices in a named subtree resolved from a library.
    Include {
        subtree: String,
    },
    Leaf(Box<dyn Leaf>),
}

impl Clone for TaskKind {
    fn clone(&self) -> Self {
        match self {
            Self::Host => Self::Host,
            Self::Sequence => Self::Sequence,
            Self::Selector => Self::Selector,
            Self::Parallel => Self::Parallel,
            Self::Invert => Self::Invert,
            Self::AlwaysSucceed => Self::AlwaysSucceed,
            Self::AlwaysFail => Self::AlwaysFail,
            Self::Repeat { times } => Self::Repeat { times: *times },
            Self::Include { subtree } => Self::Include {
                subtree: subtree.clone(),
            },
            Self::Leaf(leaf) => Self::Leaf(leaf.clone_leaf()),
        }
    }
}

impl TaskKind {
    pub fn leaf(leaf: impl Leaf) -> Self {
        Self::Leaf(Box::new(leaf))
    }

    pub fn include(subtree: impl Into<String>) -> Self {
        Self::Include {
            subtree: subtree.into(),
        }
    }

    /// Identifier used for archetype lookup and constraint registration.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Host => "Host",
            Self::Sequence => "Sequence",
            Self::Selector => "Selector",
            Self::Parallel => "Parallel",
            Self::Invert => "Invert",
            Self::AlwaysSucceed => "AlwaysSucceed",
            Self::AlwaysFail => "AlwaysFail",
            Self::Repeat { .. } => "Repeat",
            Self::Include { .. } => "Include",
            Self::Leaf(leaf) => leaf.name(),
        }
    }

    pub fn class(&self) -> TaskClass {
        match self {
            Self::Host => TaskClass::Host,
            Self::Sequence | Self::Selector | Self::Parallel => TaskClass::Branch,
            Self::Invert | Self::AlwaysSucceed | Self::AlwaysFail | Self::Repeat { .. } => {
                TaskClass::Decorator
            }
            Self::Include { .. } => TaskClass::Include,
            Self::Leaf(_) => TaskClass::Leaf,
        }
    }

    /// Child bounds the task type declares for itself.
    pub fn declared_constraint(&self) -> ChildConstraint {
        match self.class() {
            TaskClass::Host | TaskClass::Include => ChildConstraint::new(0, 1),
            TaskClass::Branch => ChildConstraint::at_least(1),
            TaskClass::Decorator => ChildConstraint::exactly(1),
            TaskClass::Leaf => ChildConstraint::NONE,
        }
    }
}

/// A node of the executable tree.
#[derive(Debug)]
pub struct Task {
    pub(crate) kind: TaskKind,
    pub(crate) children: Vec<TaskId>,
    pub(crate) guard: Option<TaskId>,
    pub(crate) status: TaskStatus,
    // Running child for memory composites, completed iterations for Repeat.
    pub(crate) cursor: usize,
}

impl Task {
    pub(crate) fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            guard: None,
            status: TaskStatus::Fresh,
            cursor: 0,
        }
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn guard(&self) -> Option<TaskId> {
        self.guard
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }
}
