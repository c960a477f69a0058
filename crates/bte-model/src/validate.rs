use std::collections::HashMap;
use std::fmt;

use bte_runtime::TaskId;
use tracing::{debug, error, warn};

use crate::adapter::PhysicalOp;
use crate::node::{IncludeState, ModelNode, NodeId, NodeKind};
use crate::tree::ModelTree;

/// Nodes and runtime tasks reachable through more than one path in the model.
///
/// Anything listed here is a bug in the editing core, never a user error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub duplicate_nodes: Vec<(NodeId, usize)>,
    pub duplicate_tasks: Vec<(TaskId, usize)>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_nodes.is_empty() && self.duplicate_tasks.is_empty()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "no duplicates");
        }
        let mut first = true;
        for (node, count) in &self.duplicate_nodes {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "node {node} x{count}")?;
        }
        for (task, count) in &self.duplicate_tasks {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "task {task} x{count}")?;
        }
        Ok(())
    }
}

impl ModelTree {
    /// Recomputes the validity of `id` without side effects.
    ///
    /// Include nodes count as valid only once their subtree has been resolved by a validation
    /// pass.
    pub fn check_valid(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        self.own_valid(node)
            && node.children.iter().all(|child| self.check_valid(*child))
            && self
                .loose_guard(id)
                .map_or(true, |guard| self.check_valid(guard))
    }

    // Cardinality counts only children that occupy a runtime slot, so an empty Guard fills
    // nothing in its parent.
    fn own_valid(&self, node: &ModelNode) -> bool {
        let filled = node
            .children
            .iter()
            .filter(|child| self.slot_task(**child).is_some())
            .count();
        match node.kind {
            NodeKind::Null => false,
            NodeKind::Root => self.initialized && filled == 1,
            NodeKind::Guard => matches!(node.children.len(), 0 | 2),
            NodeKind::Include => {
                node.include == IncludeState::Resolved && node.constraint.admits(filled)
            }
            NodeKind::Leaf | NodeKind::Branch | NodeKind::Decorator => {
                node.constraint.admits(filled)
            }
        }
    }

    /// Runs a full validation pass.
    ///
    /// Walks the tree bottom-up resolving Include nodes, then replays queued edits in submission
    /// order. Ends with the integrity check.
    pub fn validate(&mut self) -> bool {
        self.include_stack.clear();
        let mut valid = self.validate_node(self.root);
        valid &= self.flush_pending();
        self.valid = valid;
        self.dirty = false;
        self.check_integrity();
        debug!(valid, nodes = self.nodes.len(), "validation pass");
        valid
    }

    fn validate_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let include = match (node.kind, node.task) {
            (NodeKind::Include, Some(task)) => self
                .runtime
                .tree()
                .include_subtree(task)
                .map(str::to_string),
            _ => None,
        };
        if let Some(name) = &include {
            self.resolve_include(id, name);
            self.include_stack.push(name.clone());
        }

        let mut valid = self.own_valid(self.n(id));
        for child in self.n(id).children.clone() {
            valid &= self.validate_node(child);
        }
        if let Some(guard) = self.loose_guard(id) {
            valid &= self.validate_node(guard);
        }
        if include.is_some() {
            self.include_stack.pop();
        }

        self.n_mut(id).valid = valid;
        valid
    }

    // Replays queued edits of every node, attached or not, in submission order. An edit is ready
    // once its owner is valid or has left the tree. Stops at the first edit that is not ready so
    // a later insert never overtakes an earlier remove of the same task. Returns whether every
    // queue drained.
    fn flush_pending(&mut self) -> bool {
        let mut queued: Vec<(u64, NodeId)> = self
            .nodes
            .iter()
            .flat_map(|(index, node)| {
                node.pending
                    .iter()
                    .map(move |(seq, _)| (*seq, NodeId(index)))
            })
            .collect();
        if queued.is_empty() {
            return true;
        }
        queued.sort_unstable_by_key(|(seq, _)| *seq);

        let total = queued.len();
        for (applied, (seq, owner)) in queued.into_iter().enumerate() {
            if !self.n(owner).valid && self.is_attached(owner) {
                let held = total - applied;
                debug!(node = %owner, seq, held, "pending edits held back");
                return false;
            }
            let Some((_, op)) = self.n_mut(owner).pending.pop_front() else {
                continue;
            };
            if let Err(err) = self.runtime.apply(op) {
                warn!(node = %owner, seq, %err, "pending edit rejected");
            }
        }
        debug!(ops = total, "pending edits flushed");
        true
    }

    fn resolve_include(&mut self, id: NodeId, name: &str) {
        let node = self.n(id);
        if node.include == IncludeState::Resolved {
            return;
        }
        let Some(task) = node.task else {
            return;
        };

        self.free_children(id);
        if let Err(err) = self.runtime.release_children(task) {
            warn!(node = %id, %err, "stale include children not released");
        }

        if self.include_stack.iter().any(|open| open == name) {
            warn!(node = %id, subtree = name, "include cycle");
            self.n_mut(id).include = IncludeState::Missing;
            return;
        }
        let Some(template) = self.subtrees.resolve(name) else {
            warn!(node = %id, subtree = name, "include subtree not found");
            self.n_mut(id).include = IncludeState::Missing;
            return;
        };

        let subtree = self.runtime.build(&template);
        let op = PhysicalOp::Insert {
            parent: task,
            at: 0,
            task: subtree,
        };
        if let Err(err) = self.runtime.apply(op) {
            warn!(node = %id, %err, "include subtree not attached");
            self.n_mut(id).include = IncludeState::Missing;
            return;
        }
        let child = self.wrap_slot(subtree, true);
        self.attach(id, 0, child);
        self.n_mut(id).include = IncludeState::Resolved;
        debug!(node = %id, subtree = name, tasks = template.size(), "include resolved");
    }

    /// Drops the cached resolution of an Include node; the next pass resolves it again.
    pub fn invalidate_include(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if node.kind == NodeKind::Include {
                node.include = IncludeState::Unresolved;
                self.dirty = true;
            }
        }
    }

    /// Counts every node and runtime task reachable from the root and records duplicates.
    pub fn check_integrity(&mut self) -> &IntegrityReport {
        let mut nodes: HashMap<NodeId, usize> = HashMap::new();
        let mut tasks: HashMap<TaskId, usize> = HashMap::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let seen = nodes.entry(id).or_default();
            *seen += 1;
            if *seen > 1 {
                continue;
            }
            let Some(node) = self.node(id) else {
                continue;
            };
            if let Some(task) = node.task {
                *tasks.entry(task).or_default() += 1;
            }
            stack.extend(node.children.iter().rev().copied());
            if let Some(guard) = self.loose_guard(id) {
                stack.push(guard);
            }
        }

        let mut report = IntegrityReport {
            duplicate_nodes: nodes.into_iter().filter(|(_, n)| *n > 1).collect(),
            duplicate_tasks: tasks.into_iter().filter(|(_, n)| *n > 1).collect(),
        };
        report.duplicate_nodes.sort();
        report.duplicate_tasks.sort();

        if !report.is_clean() {
            error!(%report, "model integrity violated");
            if self.strict_integrity {
                panic!("model integrity violated: {report}");
            }
        }
        self.integrity = report;
        &self.integrity
    }
}

#[cfg(test)]
mod tests {
    use bte_runtime::{Succeed, SubtreeLibrary, TaskKind, TaskTemplate, TaskTree};

    use std::collections::HashSet;

    use super::*;
    use crate::constraint::ConstraintRegistry;

    fn with_library(library: SubtreeLibrary, template: &TaskTemplate) -> ModelTree {
        let mut tree = ModelTree::new(ConstraintRegistry::new(), Box::new(library));
        tree.load(TaskTree::from_template(template));
        tree
    }

    #[test]
    fn aliased_nodes_are_reported() {
        let mut tree = with_library(
            SubtreeLibrary::new(),
            &TaskTemplate::sequence(vec![
                TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]),
                TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]),
            ]),
        );
        assert!(tree.validate());
        assert!(tree.integrity().is_clean());

        let top = tree.n(tree.root()).children()[0];
        let first = tree.n(top).children()[0];
        let second = tree.n(top).children()[1];
        let leaf = tree.n(first).children()[0];
        tree.alias_child(second, leaf);

        tree.validate();
        let report = tree.integrity();
        assert_eq!(report.duplicate_nodes, [(leaf, 2)]);
        assert!(report.duplicate_tasks.is_empty());
    }

    #[test]
    #[should_panic(expected = "model integrity violated")]
    fn strict_mode_panics_on_duplicates() {
        let mut tree = with_library(
            SubtreeLibrary::new(),
            &TaskTemplate::parallel(vec![
                TaskTemplate::leaf(Succeed),
                TaskTemplate::invert(TaskTemplate::leaf(Succeed)),
            ]),
        );
        tree.set_strict_integrity(true);
        let top = tree.n(tree.root()).children()[0];
        let leaf = tree.n(top).children()[0];
        tree.alias_child(top, leaf);
        tree.validate();
    }

    #[test]
    fn include_resolves_into_read_only_children() {
        let mut library = SubtreeLibrary::new();
        library.register(
            "patrol",
            TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]),
        );
        let mut tree = with_library(library, &TaskTemplate::include("patrol"));
        assert!(tree.validate());

        let include = tree.n(tree.root()).children()[0];
        assert_eq!(tree.n(include).include_state(), IncludeState::Resolved);
        let mirror = tree.n(include).children()[0];
        assert!(tree.n(mirror).is_read_only());
        assert!(tree.descendants(mirror).iter().all(|n| tree.n(*n).is_read_only()));
        assert!(!tree.n(include).is_read_only());

        let include_task = tree.n(include).task().unwrap();
        assert_eq!(tree.task_tree().child(include_task, 0), tree.n(mirror).task());
    }

    #[test]
    fn missing_include_is_invalid_until_registered() {
        let mut tree = with_library(SubtreeLibrary::new(), &TaskTemplate::include("later"));
        assert!(!tree.validate());
        let include = tree.n(tree.root()).children()[0];
        assert_eq!(tree.n(include).include_state(), IncludeState::Missing);
        assert_eq!(tree.n(include).child_count(), 0);

        let mut library = SubtreeLibrary::new();
        library.register("later", TaskTemplate::leaf(Succeed));
        tree.set_subtrees(Box::new(library));
        assert!(tree.validate());
        assert_eq!(tree.n(include).child_count(), 1);
    }

    #[test]
    fn self_including_subtree_is_rejected() {
        let mut library = SubtreeLibrary::new();
        library.register(
            "loop",
            TaskTemplate::sequence(vec![TaskTemplate::include("loop")]),
        );
        let mut tree = with_library(library, &TaskTemplate::include("loop"));
        assert!(!tree.validate());
    }

    #[test]
    fn invalidated_include_rebuilds_its_mirror() {
        let mut library = SubtreeLibrary::new();
        library.register("a", TaskTemplate::leaf(Succeed));
        let mut tree = with_library(library, &TaskTemplate::include("a"));
        assert!(tree.validate());
        let include = tree.n(tree.root()).children()[0];
        let before = tree.n(include).children()[0];

        tree.invalidate_include(include);
        assert!(tree.is_dirty());
        assert!(tree.validate());
        let after = tree.n(include).children()[0];
        assert_ne!(before, after);
        assert!(!tree.contains(before));
        let include_task = tree.n(include).task().unwrap();
        assert_eq!(tree.task_tree().child_count(include_task), 1);
    }

    #[test]
    fn loose_guards_count_towards_validity() {
        let mut tree = with_library(SubtreeLibrary::new(), &TaskTemplate::leaf(Succeed));
        assert!(tree.validate());
        let leaf = tree.n(tree.root()).children()[0];
        let guard = tree.create_node(TaskKind::Sequence);
        tree.set_guard(leaf, guard);
        assert!(!tree.validate());
        tree.remove_guard(leaf);
        assert!(tree.validate());
    }

    #[test]
    fn edits_queued_on_a_detached_owner_still_replay() {
        let mut tree = with_library(
            SubtreeLibrary::new(),
            &TaskTemplate::sequence(vec![
                TaskTemplate::invert(TaskTemplate::leaf(Succeed)),
                TaskTemplate::leaf(Succeed),
            ]),
        );
        assert!(tree.validate());
        let seq = tree.n(tree.root()).children()[0];
        let invert = tree.n(seq).children()[0];
        let leaf = tree.n(invert).children()[0];
        let leaf_task = tree.n(leaf).task().unwrap();

        tree.remove_child(invert, leaf);
        tree.remove_child(seq, invert);
        assert!(tree.n(invert).has_pending());
        assert!(tree.n(seq).has_pending());

        assert!(tree.validate());
        assert!(!tree.n(invert).has_pending());
        assert!(!tree.n(seq).has_pending());
        assert_eq!(tree.task_tree().parent_of(leaf_task), None);

        tree.destroy(invert, &HashSet::new());
        assert!(tree.task_tree().contains(leaf_task));
    }

    #[test]
    fn empty_guards_fill_no_slot() {
        let mut tree = with_library(
            SubtreeLibrary::new(),
            &TaskTemplate::invert(TaskTemplate::leaf(Succeed)),
        );
        assert!(tree.validate());
        let invert = tree.n(tree.root()).children()[0];
        let leaf = tree.n(invert).children()[0];
        tree.remove_child(invert, leaf);
        let guard = tree.create_guard();
        tree.insert_child(invert, 0, guard);

        assert!(!tree.check_valid(invert));
        assert!(!tree.validate());
    }
}
