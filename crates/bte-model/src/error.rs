use bte_runtime::RuntimeError;
use thiserror::Error;

use crate::adapter::PhysicalOp;
use crate::node::NodeId;

/// A physical edit the runtime tree refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("runtime rejected {op}: {source}")]
pub struct AdapterError {
    pub op: PhysicalOp,
    #[source]
    pub source: RuntimeError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model is not initialized")]
    NotInitialized,

    #[error("unknown model node {0}")]
    UnknownNode(NodeId),

    #[error("no archetype registered for task type {0:?}")]
    UnknownArchetype(String),

    #[error("edit not permitted: {0}")]
    NotPermitted(&'static str),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
