use thiserror::Error;

use crate::task::TaskId;

/// Contract violations reported by the structural API of [`TaskTree`](crate::TaskTree).
///
/// Every failing call leaves the tree untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {task} ({type_name}) cannot hold children")]
    ChildrenNotAllowed { task: TaskId, type_name: String },

    #[error("insert index {at} out of range for {len} children")]
    IndexOutOfRange { at: usize, len: usize },

    #[error("{child} is already a child of {parent}")]
    AlreadyChild { parent: TaskId, child: TaskId },

    #[error("{parent} already holds its only child")]
    SlotOccupied { parent: TaskId },

    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: TaskId, child: TaskId },

    #[error("task {0} cannot be attached to itself")]
    SelfReference(TaskId),

    #[error("task {0} is not an include")]
    NotAnInclude(TaskId),

    #[error("the host task cannot be attached or released")]
    HostTask,
}
