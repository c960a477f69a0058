use std::collections::BTreeMap;

use tracing::debug;

use crate::task::{TaskId, TaskKind};
use crate::template::TaskTemplate;
use crate::tree::TaskTree;

/// Named subtrees that `Include` tasks resolve against.
#[derive(Debug, Default, Clone)]
pub struct SubtreeLibrary {
    subtrees: BTreeMap<String, TaskTemplate>,
}

impl SubtreeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `template` under `name`, returning the template it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        template: TaskTemplate,
    ) -> Option<TaskTemplate> {
        let name = name.into();
        debug!(subtree = %name, tasks = template.size(), "subtree registered");
        self.subtrees.insert(name, template)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.subtrees.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&TaskTemplate> {
        self.subtrees.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TaskTemplate> {
        self.subtrees.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.subtrees.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.subtrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtrees.is_empty()
    }

    /// Builds a fresh, detached copy of the named subtree inside `tree`.
    pub fn instantiate(&self, name: &str, tree: &mut TaskTree) -> Option<TaskId> {
        self.get(name).map(|template| tree.build(template))
    }
}

/// Prototype tasks keyed by type name, used to create new tasks in the editor.
#[derive(Debug, Default, Clone)]
pub struct ArchetypeLibrary {
    archetypes: BTreeMap<String, TaskKind>,
}

impl ArchetypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library preloaded with every built-in composite and decorator plus the trivial leaves.
    pub fn with_builtins() -> Self {
        use crate::leaf::{Fail, Succeed, Wait};

        let mut library = Self::new();
        for kind in [
            TaskKind::Sequence,
            TaskKind::Selector,
            TaskKind::Parallel,
            TaskKind::Invert,
            TaskKind::AlwaysSucceed,
            TaskKind::AlwaysFail,
            TaskKind::Repeat { times: 2 },
            TaskKind::include(""),
            TaskKind::leaf(Succeed),
            TaskKind::leaf(Fail),
            TaskKind::leaf(Wait::default()),
        ] {
            library.register(kind);
        }
        library
    }

    /// Registers `kind` under its type name, returning the archetype it replaced.
    pub fn register(&mut self, kind: TaskKind) -> Option<TaskKind> {
        let name = kind.type_name().to_string();
        self.archetypes.insert(name, kind)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.archetypes.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&TaskKind> {
        self.archetypes.get(type_name)
    }

    pub fn remove(&mut self, type_name: &str) -> Option<TaskKind> {
        self.archetypes.remove(type_name)
    }

    pub fn clear(&mut self) {
        self.archetypes.clear();
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.archetypes.keys().map(String::as_str)
    }

    /// Spawns a detached task cloned from the named archetype.
    pub fn instantiate(&self, type_name: &str, tree: &mut TaskTree) -> Option<TaskId> {
        self.get(type_name).cloned().map(|kind| tree.spawn(kind))
    }

    /// Registers an archetype for every task type found in `tree` that is not yet known.
    pub fn learn_from(&mut self, tree: &TaskTree) -> usize {
        let mut learned = 0;
        for id in tree.descendants(tree.host()) {
            let Some(kind) = tree.kind(id) else {
                continue;
            };
            if matches!(kind, TaskKind::Host) || self.contains(kind.type_name()) {
                continue;
            }
            self.register(kind.clone());
            learned += 1;
        }
        learned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::Succeed;

    #[test]
    fn instantiate_builds_independent_copies() {
        let mut library = SubtreeLibrary::new();
        library.register(
            "patrol",
            TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]),
        );
        let mut tree = TaskTree::new();
        let a = library.instantiate("patrol", &mut tree).unwrap();
        let b = library.instantiate("patrol", &mut tree).unwrap();
        assert_ne!(a, b);
        assert_ne!(tree.child(a, 0), tree.child(b, 0));
        assert!(library.instantiate("missing", &mut tree).is_none());
    }

    #[test]
    fn learn_from_skips_known_types_and_the_host() {
        let tree = TaskTree::from_template(&TaskTemplate::selector(vec![
            TaskTemplate::leaf(Succeed),
            TaskTemplate::leaf(Succeed),
        ]));
        let mut library = ArchetypeLibrary::new();
        assert_eq!(library.learn_from(&tree), 2);
        assert_eq!(library.type_names().collect::<Vec<_>>(), ["Selector", "Success"]);
        assert_eq!(library.learn_from(&tree), 0);
    }
}
