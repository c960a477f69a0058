//! Behavior tree runtime with a structural editing API.
//!
//! Tasks are stored in a [`TaskTree`] arena and addressed by [`TaskId`]. Besides stepping, the
//! tree exposes the small set of structural operations an editor needs: insert or remove a child
//! at an index, replace a guard, and release detached subtrees.

#![forbid(unsafe_code)]

pub mod blackboard;
pub mod error;
pub mod leaf;
pub mod library;
pub mod task;
pub mod template;
pub mod trace;
pub mod tree;

pub use blackboard::{BbKey, Blackboard};
pub use error::RuntimeError;
pub use leaf::{Count, Fail, Flag, FnLeaf, Leaf, Succeed, Wait};
pub use library::{ArchetypeLibrary, SubtreeLibrary};
pub use task::{ChildConstraint, Task, TaskClass, TaskId, TaskKind, TaskStatus};
pub use template::TaskTemplate;
pub use trace::{NullTraceSink, TraceEvent, TraceLog, TraceSink, VecTraceSink};
pub use tree::TaskTree;
