use std::collections::HashMap;

use bte_runtime::{ChildConstraint, TaskKind};
use tracing::trace;

/// Per-type child-count bounds.
///
/// A type resolves to its registered override if there is one, otherwise to the bounds the task
/// kind declares. Resolved values are cached by type name.
#[derive(Debug, Default, Clone)]
pub struct ConstraintRegistry {
    overrides: HashMap<String, ChildConstraint>,
    cache: HashMap<String, ChildConstraint>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the bounds for `type_name`, replacing any cached value.
    pub fn register(&mut self, type_name: impl Into<String>, constraint: ChildConstraint) {
        let type_name = type_name.into();
        self.cache.remove(&type_name);
        self.overrides.insert(type_name, constraint);
    }

    pub fn get(&self, type_name: &str) -> Option<ChildConstraint> {
        self.overrides
            .get(type_name)
            .or_else(|| self.cache.get(type_name))
            .copied()
    }

    pub fn resolve(&mut self, kind: &TaskKind) -> ChildConstraint {
        let type_name = kind.type_name();
        if let Some(constraint) = self.get(type_name) {
            return constraint;
        }
        let constraint = kind.declared_constraint();
        trace!(task_type = type_name, %constraint, "constraint cached");
        self.cache.insert(type_name.to_string(), constraint);
        constraint
    }

    pub fn len(&self) -> usize {
        self.overrides.len() + self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops cached lookups; registered overrides stay.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
