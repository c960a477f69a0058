use std::collections::HashSet;
use std::fmt;

use bte_runtime::{ChildConstraint, TaskClass, TaskId, TaskKind, TaskStatus, TaskTemplate, TaskTree};
use generational_arena::Arena;
use tracing::{debug, warn};

use crate::adapter::RuntimeAdapter;
use crate::constraint::ConstraintRegistry;
use crate::error::{ModelError, Result};
use crate::node::{ModelNode, NodeId, NodeKind};
use crate::registry::SubtreeRegistry;
use crate::validate::IntegrityReport;

/// The editable tree and the runtime tree it mirrors.
///
/// Nodes live in an arena and are addressed by [`NodeId`]. The low-level structural operations
/// in this type (`insert_child`, `remove_child`, `set_guard`, ...) do not check whether an edit
/// is permitted; callers are expected to ask `can_add` first. [`Model`](crate::Model) wraps them
/// in undoable commands.
pub struct ModelTree {
    pub(crate) nodes: Arena<ModelNode>,
    pub(crate) root: NodeId,
    pub(crate) runtime: RuntimeAdapter,
    pub(crate) constraints: ConstraintRegistry,
    pub(crate) subtrees: Box<dyn SubtreeRegistry>,
    pub(crate) initialized: bool,
    pub(crate) dirty: bool,
    pub(crate) valid: bool,
    pub(crate) strict_integrity: bool,
    pub(crate) integrity: IntegrityReport,
    // Submission counter for queued physical edits, shared by every node.
    pub(crate) next_seq: u64,
    // Include names being resolved on the current validation path.
    pub(crate) include_stack: Vec<String>,
}

impl fmt::Debug for ModelTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelTree")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("initialized", &self.initialized)
            .field("dirty", &self.dirty)
            .field("valid", &self.valid)
            .finish()
    }
}

impl Default for ModelTree {
    fn default() -> Self {
        Self::new(ConstraintRegistry::new(), Box::new(bte_runtime::SubtreeLibrary::new()))
    }
}

impl ModelTree {
    pub fn new(constraints: ConstraintRegistry, subtrees: Box<dyn SubtreeRegistry>) -> Self {
        let mut nodes = Arena::new();
        let root = NodeId(nodes.insert(Self::null_root()));
        Self {
            nodes,
            root,
            runtime: RuntimeAdapter::default(),
            constraints,
            subtrees,
            initialized: false,
            dirty: true,
            valid: false,
            strict_integrity: false,
            integrity: IntegrityReport::default(),
            next_seq: 0,
            include_stack: Vec::new(),
        }
    }

    fn null_root() -> ModelNode {
        ModelNode::new(NodeKind::Null, "Null", None, ChildConstraint::NONE)
    }

    /// Takes ownership of `tree` and mirrors it, replacing whatever was loaded.
    pub(crate) fn load(&mut self, tree: TaskTree) {
        self.nodes.clear();
        self.runtime = RuntimeAdapter::new(tree);
        let host = self.runtime.host();
        let root = ModelNode::new(NodeKind::Root, "Root", Some(host), ChildConstraint::exactly(1));
        self.root = NodeId(self.nodes.insert(root));
        if let Some(top) = self.runtime.tree().root() {
            let child = self.wrap_slot(top, false);
            self.attach(self.root, 0, child);
        }
        self.initialized = true;
        self.dirty = true;
        self.valid = false;
        self.integrity = IntegrityReport::default();
        debug!(nodes = self.nodes.len(), "model loaded");
    }

    /// Drops every node and hands the runtime tree back.
    pub(crate) fn unload(&mut self) -> TaskTree {
        self.nodes.clear();
        self.root = NodeId(self.nodes.insert(Self::null_root()));
        self.initialized = false;
        self.dirty = true;
        self.valid = false;
        self.integrity = IntegrityReport::default();
        std::mem::take(&mut self.runtime).into_inner()
    }

    // Wraps a task that occupies a child slot, adding a Guard pseudo-node when it is guarded.
    pub(crate) fn wrap_slot(&mut self, task: TaskId, read_only: bool) -> NodeId {
        let Some(guard_task) = self.runtime.tree().guard(task) else {
            return self.wrap_task(task, read_only);
        };
        let mut pseudo = ModelNode::guard_pseudo();
        pseudo.read_only = read_only;
        let pseudo = NodeId(self.nodes.insert(pseudo));
        // Guards of guard tasks stay on the runtime side only.
        let guard = self.wrap_task(guard_task, read_only);
        let guarded = self.wrap_task(task, read_only);
        self.attach(pseudo, 0, guard);
        self.attach(pseudo, 1, guarded);
        self.link_guard(guarded, guard);
        pseudo
    }

    pub(crate) fn wrap_task(&mut self, task: TaskId, read_only: bool) -> NodeId {
        let tree = self.runtime.tree();
        let Some(kind) = tree.kind(task) else {
            warn!(%task, "wrapping a task the runtime does not know");
            return NodeId(self.nodes.insert(Self::null_root()));
        };
        let class = kind.class();
        let constraint = match class {
            TaskClass::Host => ChildConstraint::exactly(1),
            _ => self.constraints.resolve(kind),
        };
        let mut node = ModelNode::new(NodeKind::of(class), kind.type_name(), Some(task), constraint);
        node.read_only = read_only;
        let children = tree.children(task).to_vec();
        let id = NodeId(self.nodes.insert(node));

        // Include children are rebuilt when the subtree resolves.
        if class != TaskClass::Include {
            for child_task in children {
                let child = self.wrap_slot(child_task, read_only);
                let at = self.n(id).children.len();
                self.attach(id, at, child);
            }
        }
        id
    }

    /// Spawns a detached runtime task of `kind` and wraps it.
    pub(crate) fn create_node(&mut self, kind: TaskKind) -> NodeId {
        let task = self.runtime.spawn(kind);
        self.wrap_task(task, false)
    }

    pub(crate) fn create_from_template(&mut self, template: &TaskTemplate) -> NodeId {
        let task = self.runtime.build(template);
        self.wrap_slot(task, false)
    }

    pub(crate) fn create_guard(&mut self) -> NodeId {
        NodeId(self.nodes.insert(ModelNode::guard_pseudo()))
    }

    pub(crate) fn n(&self, id: NodeId) -> &ModelNode {
        &self.nodes[id.0]
    }

    pub(crate) fn n_mut(&mut self, id: NodeId) -> &mut ModelNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn attach(&mut self, parent: NodeId, at: usize, node: NodeId) {
        self.n_mut(parent).children.insert(at, node);
        self.n_mut(node).parent = Some(parent);
    }

    pub(crate) fn detach(&mut self, parent: NodeId, node: NodeId) -> usize {
        let index = self.n(parent).child_index(node).unwrap_or_else(|| {
            panic!("{node} is not a child of {parent}");
        });
        self.n_mut(parent).children.remove(index);
        self.n_mut(node).parent = None;
        index
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&ModelNode> {
        self.nodes.get(id.0)
    }

    pub fn get(&self, id: NodeId) -> Result<&ModelNode> {
        self.node(id).ok_or(ModelError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Validity as of the last validation pass; stale while [`is_dirty`](Self::is_dirty).
    pub fn cached_valid(&self) -> bool {
        self.valid
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn runtime(&self) -> &RuntimeAdapter {
        &self.runtime
    }

    pub fn task_tree(&self) -> &TaskTree {
        self.runtime.tree()
    }

    pub fn constraints(&self) -> &ConstraintRegistry {
        &self.constraints
    }

    pub fn integrity(&self) -> &IntegrityReport {
        &self.integrity
    }

    pub fn status(&self, id: NodeId) -> Option<TaskStatus> {
        self.node(id)?.task.and_then(|task| self.runtime.status(task))
    }

    pub fn node_for_task(&self, task: TaskId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.task == Some(task))
            .map(|(index, _)| NodeId(index))
    }

    // Guard node hanging off `id` without being anyone's child.
    pub(crate) fn loose_guard(&self, id: NodeId) -> Option<NodeId> {
        let guard = self.node(id)?.guard?;
        self.node(guard)?.parent.is_none().then_some(guard)
    }

    /// `id` and everything below it, including loose guards.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else {
                continue;
            };
            out.push(current);
            if let Some(guard) = self.loose_guard(current) {
                stack.push(guard);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Whether `node` is `ancestor` or sits below it.
    pub fn has_descendant(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.descendants(ancestor).contains(&node)
    }

    /// Whether `id` is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            if current == self.root {
                return true;
            }
            let Some(node) = self.node(current) else {
                return false;
            };
            match node.parent.or(node.guarded) {
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    /// Runtime task occupying `id`'s slot in its parent.
    pub fn slot_task(&self, id: NodeId) -> Option<TaskId> {
        let node = self.node(id)?;
        match node.kind {
            NodeKind::Guard => node.children.last().and_then(|c| self.slot_task(*c)),
            _ => node.task,
        }
    }

    /// Position in the parent's runtime child list of the model child at `index`.
    pub fn physical_index(&self, parent: NodeId, index: usize) -> usize {
        self.n(parent).children[..index]
            .iter()
            .filter(|child| self.slot_task(**child).is_some())
            .count()
    }

    /// Removes the subtree at `id` from the arena and returns the freed runtime tasks, top first.
    ///
    /// Nodes in `keep` and their subtrees are detached instead of freed.
    pub(crate) fn free_subtree(&mut self, id: NodeId, keep: &HashSet<NodeId>) -> Vec<TaskId> {
        let mut tasks = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if keep.contains(&current) {
                if let Some(node) = self.nodes.get_mut(current.0) {
                    node.parent = None;
                }
                continue;
            }
            if let Some(guard) = self.loose_guard(current) {
                stack.push(guard);
            }
            let Some(node) = self.nodes.remove(current.0) else {
                continue;
            };
            if let Some(guarded) = node.guarded {
                if let Some(guarded) = self.nodes.get_mut(guarded.0) {
                    guarded.guard = None;
                }
            }
            tasks.extend(node.task);
            stack.extend(node.children);
        }
        tasks
    }

    /// Frees the model subtree at `id` and releases the runtime tasks its nodes owned.
    ///
    /// Runtime children those tasks still point at are left alone; they may belong to nodes that
    /// were moved elsewhere.
    pub(crate) fn destroy(&mut self, id: NodeId, keep: &HashSet<NodeId>) -> usize {
        let tasks = self.free_subtree(id, keep);
        for (_, node) in self.nodes.iter_mut() {
            node.pending
                .retain(|(_, op)| !tasks.iter().any(|task| op.mentions(*task)));
        }
        let released = self.runtime.release_tasks(&tasks);
        debug!(node = %id, released, "subtree destroyed");
        released
    }

    pub(crate) fn free_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.n_mut(id).children);
        let keep = HashSet::new();
        for child in children {
            self.free_subtree(child, &keep);
        }
    }

    pub(crate) fn set_strict_integrity(&mut self, strict: bool) {
        self.strict_integrity = strict;
    }

    pub(crate) fn set_subtrees(&mut self, subtrees: Box<dyn SubtreeRegistry>) {
        self.subtrees = subtrees;
    }

    pub(crate) fn constraints_mut(&mut self) -> &mut ConstraintRegistry {
        &mut self.constraints
    }

    pub(crate) fn runtime_mut(&mut self) -> &mut RuntimeAdapter {
        &mut self.runtime
    }

    pub fn set_comment(&mut self, id: NodeId, comment: Option<String>) -> Result<()> {
        self.nodes
            .get_mut(id.0)
            .ok_or(ModelError::UnknownNode(id))?
            .comment = comment;
        Ok(())
    }
}

#[cfg(test)]
impl ModelTree {
    /// Places `node` under `parent` a second time without detaching it.
    pub(crate) fn alias_child(&mut self, parent: NodeId, node: NodeId) {
        self.n_mut(parent).children.push(node);
    }
}
