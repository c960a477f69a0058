//! Lookup seams the model consumes: named subtrees for Include nodes and archetypes for fresh
//! nodes.

use bte_runtime::{ArchetypeLibrary, SubtreeLibrary, TaskKind, TaskTemplate, TaskTree};

pub trait SubtreeRegistry {
    /// Resolves a subtree name; `None` leaves the including node invalid.
    fn resolve(&self, name: &str) -> Option<TaskTemplate>;
}

impl SubtreeRegistry for SubtreeLibrary {
    fn resolve(&self, name: &str) -> Option<TaskTemplate> {
        self.get(name).cloned()
    }
}

pub trait ArchetypeFactory {
    /// A fresh, default-configured task of the given type.
    fn create(&self, type_name: &str) -> Option<TaskKind>;

    /// Called with every newly loaded tree.
    fn learn_from(&mut self, _tree: &TaskTree) {}
}

impl ArchetypeFactory for ArchetypeLibrary {
    fn create(&self, type_name: &str) -> Option<TaskKind> {
        self.get(type_name).cloned()
    }

    fn learn_from(&mut self, tree: &TaskTree) {
        ArchetypeLibrary::learn_from(self, tree);
    }
}
