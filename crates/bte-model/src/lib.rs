//! Editable behavior tree model.
//!
//! A [`Model`] mirrors a running [`TaskTree`](bte_runtime::TaskTree) with a tree of
//! [`ModelNode`]s. Structural edits land on the model immediately; the matching runtime edits
//! are applied only while the affected part of the tree is valid and are otherwise queued until
//! a validation pass finds it valid again. Edits go through undoable commands kept in a linear
//! history.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod command;
pub mod config;
pub mod constraint;
pub mod error;
pub mod history;
pub mod listener;
pub mod model;
pub mod node;
pub mod registry;
mod structure;
pub mod tree;
mod validate;

pub use adapter::{PhysicalOp, RuntimeAdapter};
pub use command::{AddCommand, Command, MoveCommand, RemoveCommand};
pub use config::{ConstraintOverride, EditorConfig};
pub use constraint::ConstraintRegistry;
pub use error::{AdapterError, ModelError, Result};
pub use history::CommandManager;
pub use listener::{ChangeListener, ListenerId};
pub use model::Model;
pub use node::{IncludeState, ModelNode, NodeId, NodeKind};
pub use registry::{ArchetypeFactory, SubtreeRegistry};
pub use tree::ModelTree;
pub use validate::IntegrityReport;
