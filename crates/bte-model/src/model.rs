use std::collections::HashSet;
use std::fmt;

use bte_runtime::{
    ArchetypeLibrary, Blackboard, ChildConstraint, SubtreeLibrary, TaskId, TaskStatus,
    TaskTemplate, TaskTree,
};
use tracing::{debug, info};

use crate::adapter::RuntimeAdapter;
use crate::command::{AddCommand, Command, MoveCommand, RemoveCommand};
use crate::config::EditorConfig;
use crate::constraint::ConstraintRegistry;
use crate::error::{ModelError, Result};
use crate::history::CommandManager;
use crate::listener::{ChangeListener, ListenerId};
use crate::node::{ModelNode, NodeId, NodeKind};
use crate::registry::{ArchetypeFactory, SubtreeRegistry};
use crate::tree::ModelTree;
use crate::validate::IntegrityReport;

/// Editing session over one behavior tree.
///
/// Every structural edit is checked, recorded as an undoable [`Command`], validated and then
/// announced to listeners. The runtime tree is stepped only while the model is valid.
pub struct Model {
    tree: ModelTree,
    history: CommandManager,
    archetypes: Box<dyn ArchetypeFactory>,
    listeners: Vec<(ListenerId, Box<dyn ChangeListener>)>,
    next_listener: u64,
    config: EditorConfig,
    // Nodes named by dropped commands, freed once nothing else holds them.
    orphans: Vec<NodeId>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("tree", &self.tree)
            .field("history", &self.history.len())
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        let mut constraints = ConstraintRegistry::new();
        config.apply_constraints(&mut constraints);
        let mut tree = ModelTree::new(constraints, Box::new(SubtreeLibrary::new()));
        tree.set_strict_integrity(config.strict_integrity);
        Self {
            tree,
            history: CommandManager::with_limit(config.history_limit),
            archetypes: Box::new(ArchetypeLibrary::with_builtins()),
            listeners: Vec::new(),
            next_listener: 0,
            config,
            orphans: Vec::new(),
        }
    }

    pub fn with_subtrees(mut self, subtrees: impl SubtreeRegistry + 'static) -> Self {
        self.set_subtrees(Box::new(subtrees));
        self
    }

    pub fn with_archetypes(mut self, archetypes: impl ArchetypeFactory + 'static) -> Self {
        self.archetypes = Box::new(archetypes);
        self
    }

    /// Replaces the registry Include nodes resolve against. Unresolved includes retry on the
    /// next validation pass.
    pub fn set_subtrees(&mut self, subtrees: Box<dyn SubtreeRegistry>) {
        self.tree.set_subtrees(subtrees);
        self.tree.mark_dirty();
    }

    /// Overrides the child bounds of `type_name`, including nodes already in the model.
    pub fn register_constraint(&mut self, type_name: &str, constraint: ChildConstraint) {
        self.tree.constraints_mut().register(type_name, constraint);
        for (_, node) in self.tree.nodes.iter_mut() {
            let typed = matches!(
                node.kind,
                NodeKind::Leaf | NodeKind::Branch | NodeKind::Decorator | NodeKind::Include
            );
            if typed && node.type_name == type_name {
                node.constraint = constraint;
            }
        }
        self.tree.mark_dirty();
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Loads `tree`, dropping any previous one.
    pub fn init(&mut self, tree: TaskTree) {
        self.reset();
        self.tree.load(tree);
        self.archetypes.learn_from(self.tree.task_tree());
        let valid = self.is_valid();
        info!(nodes = self.tree.len(), valid, "model initialized");
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_init(&self.tree);
        }
    }

    /// Drops the loaded tree and the history, returning the runtime tree.
    pub fn reset(&mut self) -> Option<TaskTree> {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_reset(&self.tree);
        }
        self.history.clear();
        self.orphans.clear();
        if !self.tree.is_initialized() {
            return None;
        }
        debug!("model reset");
        Some(self.tree.unload())
    }

    pub fn is_initialized(&self) -> bool {
        self.tree.is_initialized()
    }

    pub fn tree(&self) -> &ModelTree {
        &self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn node(&self, id: NodeId) -> Option<&ModelNode> {
        self.tree.node(id)
    }

    pub fn history(&self) -> &CommandManager {
        &self.history
    }

    pub fn runtime(&self) -> &RuntimeAdapter {
        self.tree.runtime()
    }

    pub fn blackboard(&self) -> &Blackboard {
        self.tree.runtime().blackboard()
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        self.tree.runtime_mut().blackboard_mut()
    }

    pub fn integrity(&self) -> &IntegrityReport {
        self.tree.integrity()
    }

    pub fn status(&self, node: NodeId) -> Option<TaskStatus> {
        self.tree.status(node)
    }

    pub fn node_for_task(&self, task: TaskId) -> Option<NodeId> {
        self.tree.node_for_task(task)
    }

    fn require_init(&self) -> Result<()> {
        if self.tree.is_initialized() {
            Ok(())
        } else {
            Err(ModelError::NotInitialized)
        }
    }

    fn permit(&self, allowed: bool, reason: &'static str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(ModelError::NotPermitted(reason))
        }
    }

    // Detached, editable and not acting as anyone's guard.
    fn is_free(&self, node: NodeId) -> bool {
        self.tree.node(node).is_some_and(|n| {
            n.parent.is_none()
                && !n.is_guard
                && !n.read_only
                && !matches!(n.kind, NodeKind::Root | NodeKind::Null)
        }) && node != self.tree.root()
    }

    // Attached with an editable parent.
    fn is_movable(&self, node: NodeId) -> bool {
        let Some(n) = self.tree.node(node) else {
            return false;
        };
        let Some(parent) = n.parent else {
            return false;
        };
        !n.read_only && !self.tree.n(parent).read_only && self.tree.is_attached(node)
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.tree.node(node)?.parent
    }

    fn index_in_parent(&self, node: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent_of(node)?;
        Some((parent, self.tree.n(parent).child_index(node)?))
    }

    pub fn can_add(&self, node: NodeId, target: NodeId) -> bool {
        self.tree.is_initialized()
            && self.is_free(node)
            && self.tree.is_attached(target)
            && self.tree.can_add(target, node)
    }

    /// Appends a detached node to `target`.
    pub fn add(&mut self, node: NodeId, target: NodeId) -> Result<()> {
        self.require_init()?;
        self.tree.get(node)?;
        self.tree.get(target)?;
        self.permit(self.can_add(node, target), "node cannot be added to target")?;
        let command = AddCommand::new(&self.tree, target, node, None);
        self.execute(command.into());
        Ok(())
    }

    pub fn add_at(&mut self, node: NodeId, target: NodeId, at: usize) -> Result<()> {
        self.require_init()?;
        self.tree.get(node)?;
        let len = self.tree.get(target)?.child_count();
        self.permit(
            self.can_add(node, target) && at <= len,
            "node cannot be added at that position",
        )?;
        let command = AddCommand::new(&self.tree, target, node, Some(at));
        self.execute(command.into());
        Ok(())
    }

    pub fn can_add_before(&self, node: NodeId, sibling: NodeId) -> bool {
        self.parent_of(sibling)
            .is_some_and(|parent| self.can_add(node, parent))
    }

    pub fn can_add_after(&self, node: NodeId, sibling: NodeId) -> bool {
        self.can_add_before(node, sibling)
    }

    pub fn add_before(&mut self, node: NodeId, sibling: NodeId) -> Result<()> {
        self.add_beside(node, sibling, 0)
    }

    pub fn add_after(&mut self, node: NodeId, sibling: NodeId) -> Result<()> {
        self.add_beside(node, sibling, 1)
    }

    fn add_beside(&mut self, node: NodeId, sibling: NodeId, offset: usize) -> Result<()> {
        self.require_init()?;
        self.tree.get(node)?;
        self.tree.get(sibling)?;
        self.permit(self.can_add_before(node, sibling), "node cannot be added next to sibling")?;
        let (parent, index) = self
            .index_in_parent(sibling)
            .ok_or(ModelError::NotPermitted("sibling has no parent"))?;
        let command = AddCommand::new(&self.tree, parent, node, Some(index + offset));
        self.execute(command.into());
        Ok(())
    }

    /// Whether `node` can be moved under `target`; false when `target` is `node` or lies below
    /// it.
    pub fn can_move(&self, node: NodeId, target: NodeId) -> bool {
        self.tree.is_initialized()
            && self.is_movable(node)
            && self.tree.is_attached(target)
            && self.tree.can_add(target, node)
    }

    /// Moves `node` to the end of `target`.
    pub fn move_to(&mut self, node: NodeId, target: NodeId) -> Result<()> {
        self.require_init()?;
        self.tree.get(node)?;
        self.tree.get(target)?;
        self.permit(self.can_move(node, target), "node cannot be moved to target")?;
        let command = MoveCommand::new(&self.tree, node, target, None)
            .ok_or(ModelError::NotPermitted("node has no parent"))?;
        self.execute(command.into());
        Ok(())
    }

    pub fn can_move_before(&self, node: NodeId, sibling: NodeId) -> bool {
        if !self.tree.is_initialized() || node == sibling || !self.is_movable(node) {
            return false;
        }
        let Some(parent) = self.parent_of(sibling) else {
            return false;
        };
        if !self.tree.is_attached(parent) {
            return false;
        }
        if self.parent_of(node) == Some(parent) {
            return !self.tree.n(parent).read_only;
        }
        self.tree.can_add(parent, node)
    }

    pub fn can_move_after(&self, node: NodeId, sibling: NodeId) -> bool {
        self.can_move_before(node, sibling)
    }

    pub fn move_before(&mut self, node: NodeId, sibling: NodeId) -> Result<()> {
        self.move_beside(node, sibling, 0)
    }

    pub fn move_after(&mut self, node: NodeId, sibling: NodeId) -> Result<()> {
        self.move_beside(node, sibling, 1)
    }

    fn move_beside(&mut self, node: NodeId, sibling: NodeId, offset: usize) -> Result<()> {
        self.require_init()?;
        self.tree.get(node)?;
        self.tree.get(sibling)?;
        self.permit(self.can_move_before(node, sibling), "node cannot be moved next to sibling")?;
        let (parent, index) = self
            .index_in_parent(sibling)
            .ok_or(ModelError::NotPermitted("sibling has no parent"))?;
        let mut at = index + offset;
        // Positions are counted after the node leaves its old slot.
        if let Some((old_parent, old_index)) = self.index_in_parent(node) {
            if old_parent == parent && old_index < at {
                at -= 1;
            }
        }
        let command = MoveCommand::new(&self.tree, node, parent, Some(at))
            .ok_or(ModelError::NotPermitted("node has no parent"))?;
        self.execute(command.into());
        Ok(())
    }

    pub fn can_remove(&self, node: NodeId) -> bool {
        self.tree.is_initialized() && self.is_movable(node)
    }

    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        self.require_init()?;
        self.tree.get(node)?;
        self.permit(self.can_remove(node), "node cannot be removed")?;
        let command = RemoveCommand::new(&self.tree, node)
            .ok_or(ModelError::NotPermitted("node has no parent"))?;
        self.execute(command.into());
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Reverts the last edit. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        if !self.history.undo(&mut self.tree) {
            return false;
        }
        debug!(applied = self.history.applied(), "undo");
        self.after_edit();
        true
    }

    /// Reapplies the last undone edit. Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        if !self.history.redo(&mut self.tree) {
            return false;
        }
        debug!(applied = self.history.applied(), "redo");
        self.after_edit();
        true
    }

    fn execute(&mut self, command: Command) {
        debug!(%command, "command executed");
        let dropped = self.history.execute(command, &mut self.tree);
        self.orphans.extend(dropped.iter().flat_map(Command::nodes));
        self.after_edit();
    }

    fn after_edit(&mut self) {
        self.tree.mark_dirty();
        self.is_valid();
        if self.config.reset_on_edit {
            self.tree.runtime_mut().reset();
        }
        self.notify_changed();
    }

    /// Validates if anything changed since the last pass.
    ///
    /// Becoming valid resets the runtime tree so stepping starts from a clean state.
    pub fn is_valid(&mut self) -> bool {
        if !self.tree.is_dirty() {
            return self.tree.cached_valid();
        }
        let was_valid = self.tree.cached_valid();
        let valid = self.tree.validate();
        if valid && !was_valid {
            info!("model became valid, resetting runtime");
            self.tree.runtime_mut().reset();
        }
        if valid {
            self.collect_garbage();
        }
        valid
    }

    /// Steps the runtime tree once if the model is valid.
    pub fn update(&mut self) -> Option<TaskStatus> {
        if !self.is_valid() {
            return None;
        }
        Some(self.tree.runtime_mut().step())
    }

    // Frees dropped-command nodes that are neither in the tree nor named by the history.
    fn collect_garbage(&mut self) {
        if self.orphans.is_empty() {
            return;
        }
        let mut live: HashSet<NodeId> = self.tree.descendants(self.tree.root()).into_iter().collect();
        for command in self.history.commands() {
            for node in command.nodes() {
                live.extend(self.tree.descendants(node));
            }
        }

        let mut freed = 0;
        for orphan in std::mem::take(&mut self.orphans) {
            let Some(node) = self.tree.node(orphan) else {
                continue;
            };
            if node.parent.is_some() || live.contains(&orphan) || self.tree.is_attached(orphan) {
                continue;
            }
            self.tree.destroy(orphan, &live);
            freed += 1;
        }
        debug!(freed, "orphaned nodes collected");
    }

    /// Creates a detached node from the archetype registered for `type_name`.
    pub fn instantiate(&mut self, type_name: &str) -> Result<NodeId> {
        let kind = self
            .archetypes
            .create(type_name)
            .ok_or_else(|| ModelError::UnknownArchetype(type_name.to_string()))?;
        Ok(self.tree.create_node(kind))
    }

    /// Creates a detached, empty Guard pseudo-node.
    pub fn instantiate_guard(&mut self) -> NodeId {
        self.tree.create_guard()
    }

    /// Creates a detached subtree from `template`.
    pub fn instantiate_template(&mut self, template: &TaskTemplate) -> NodeId {
        self.tree.create_from_template(template)
    }

    /// Frees a detached node that no command refers to. Returns the number of runtime tasks
    /// released.
    pub fn discard(&mut self, node: NodeId) -> Result<usize> {
        let n = self.tree.get(node)?;
        let in_use = node == self.tree.root()
            || n.parent.is_some()
            || n.is_guard
            || self.tree.is_attached(node)
            || self.history.references(node);
        self.permit(!in_use, "node is still in use")?;
        Ok(self.tree.destroy(node, &HashSet::new()))
    }

    pub fn set_comment(&mut self, node: NodeId, comment: Option<String>) -> Result<()> {
        self.tree.set_comment(node, comment)?;
        self.notify_changed();
        Ok(())
    }

    /// Points an Include node at another subtree and resolves it.
    pub fn set_include_subtree(&mut self, node: NodeId, name: &str) -> Result<()> {
        let n = self.tree.get(node)?;
        self.permit(n.kind == NodeKind::Include, "node is not an include")?;
        self.permit(!n.read_only, "node is read-only")?;
        let task = n.task.ok_or(ModelError::NotPermitted("include has no task"))?;
        self.tree.runtime_mut().set_include_subtree(task, name)?;
        self.tree.invalidate_include(node);
        self.after_edit();
        Ok(())
    }

    /// Forces an Include node to resolve again on the next validation pass.
    pub fn invalidate_include(&mut self, node: NodeId) -> Result<()> {
        let n = self.tree.get(node)?;
        self.permit(n.kind == NodeKind::Include, "node is not an include")?;
        self.tree.invalidate_include(node);
        self.after_edit();
        Ok(())
    }

    /// Attaches `guard` directly as the guard of `node`. Not recorded in the history.
    ///
    /// Returns the loose guard it replaced, now detached. The caller owns it and may reuse it or
    /// hand it to [`discard`](Self::discard).
    pub fn set_guard(&mut self, node: NodeId, guard: NodeId) -> Result<Option<NodeId>> {
        self.require_init()?;
        let n = self.tree.get(node)?;
        self.tree.get(guard)?;
        let allowed = n.task.is_some()
            && !n.read_only
            && !n.is_guard
            && n.guard.map_or(true, |g| self.tree.n(g).parent.is_none())
            && n.kind != NodeKind::Root
            && self.is_free(guard)
            && self.tree.n(guard).task.is_some()
            && !self.tree.has_descendant(guard, node);
        self.permit(allowed, "guard cannot be attached to node")?;
        let replaced = n.guard;
        self.tree.set_guard(node, guard);
        self.after_edit();
        Ok(replaced)
    }

    /// Detaches the guard set with [`set_guard`](Self::set_guard) and returns it.
    pub fn remove_guard(&mut self, node: NodeId) -> Result<Option<NodeId>> {
        self.require_init()?;
        let guard = self.tree.get(node)?.guard;
        if let Some(guard) = guard {
            self.permit(
                self.tree.n(guard).parent.is_none(),
                "guard is owned by a Guard node",
            )?;
        }
        self.tree.remove_guard(node);
        self.after_edit();
        Ok(guard)
    }

    pub fn subscribe(&mut self, mut listener: Box<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        listener.on_listener_added(&self.tree);
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> Option<Box<dyn ChangeListener>> {
        let index = self.listeners.iter().position(|(l, _)| *l == id)?;
        let (_, mut listener) = self.listeners.remove(index);
        listener.on_listener_removed(&self.tree);
        Some(listener)
    }

    pub fn notify_changed(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_change(&self.tree);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use bte_runtime::{Succeed, TaskTemplate};

    use super::*;

    #[derive(Default)]
    struct Recorder(Rc<RefCell<Vec<&'static str>>>);

    impl ChangeListener for Recorder {
        fn on_init(&mut self, _model: &ModelTree) {
            self.0.borrow_mut().push("init");
        }

        fn on_reset(&mut self, _model: &ModelTree) {
            self.0.borrow_mut().push("reset");
        }

        fn on_change(&mut self, _model: &ModelTree) {
            self.0.borrow_mut().push("change");
        }

        fn on_listener_added(&mut self, _model: &ModelTree) {
            self.0.borrow_mut().push("added");
        }

        fn on_listener_removed(&mut self, _model: &ModelTree) {
            self.0.borrow_mut().push("removed");
        }
    }

    fn model() -> Model {
        let mut model = Model::new();
        model.init(TaskTree::from_template(&TaskTemplate::sequence(vec![
            TaskTemplate::leaf(Succeed),
        ])));
        model
    }

    fn top(model: &Model) -> NodeId {
        model.node(model.root()).unwrap().children()[0]
    }

    #[test]
    fn listeners_see_lifecycle_in_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut model = Model::new();
        let id = model.subscribe(Box::new(Recorder(events.clone())));
        model.init(TaskTree::from_template(&TaskTemplate::leaf(Succeed)));
        let leaf = model.instantiate("Success").unwrap();
        assert!(model.add(leaf, top(&model)).is_err());
        model.remove(top(&model)).unwrap();
        assert!(model.unsubscribe(id).is_some());
        assert!(model.unsubscribe(id).is_none());

        assert_eq!(*events.borrow(), ["added", "reset", "init", "change", "removed"]);
    }

    #[test]
    fn edits_need_an_initialized_model() {
        let mut model = Model::new();
        let leaf = model.instantiate("Success").unwrap();
        assert_eq!(model.add(leaf, model.root()), Err(ModelError::NotInitialized));
        assert_eq!(model.update(), None);
    }

    #[test]
    fn unknown_archetypes_are_reported() {
        let mut model = model();
        assert_eq!(
            model.instantiate("Teleport"),
            Err(ModelError::UnknownArchetype("Teleport".into()))
        );
    }

    #[test]
    fn discarded_redo_branch_frees_its_nodes() {
        let mut model = model();
        let seq = top(&model);
        let a = model.instantiate("Success").unwrap();
        model.add(a, seq).unwrap();
        assert!(model.undo());
        let a_task = model.node(a).unwrap().task().unwrap();

        let b = model.instantiate("Success").unwrap();
        model.add(b, seq).unwrap();
        assert!(!model.can_redo());
        assert!(model.node(a).is_none());
        assert!(!model.runtime().tree().contains(a_task));
        assert!(model.node(b).is_some());
    }

    #[test]
    fn discard_refuses_nodes_in_use() {
        let mut model = model();
        let seq = top(&model);
        assert!(model.discard(seq).is_err());

        let spare = model.instantiate("Sequence").unwrap();
        assert_eq!(model.discard(spare), Ok(1));
        assert!(model.node(spare).is_none());
    }

    #[test]
    fn becoming_valid_resets_the_runtime() {
        let mut model = Model::with_config(EditorConfig {
            reset_on_edit: false,
            ..EditorConfig::default()
        });
        model.init(TaskTree::from_template(&TaskTemplate::sequence(vec![
            TaskTemplate::leaf(bte_runtime::Wait::new(5)),
        ])));
        let seq = top(&model);
        assert_eq!(model.update(), Some(TaskStatus::Running));

        let wait = model.node(seq).unwrap().children()[0];
        model.remove(wait).unwrap();
        assert_eq!(model.update(), None);
        model.undo();
        assert_eq!(model.status(seq), Some(TaskStatus::Fresh));
    }

    #[test]
    fn constraint_overrides_apply_to_loaded_nodes() {
        let mut model = model();
        assert!(model.is_valid());
        model.register_constraint("Sequence", ChildConstraint::at_least(2));
        assert!(!model.is_valid());
        assert_eq!(model.node(top(&model)).unwrap().min_children(), 2);
    }
}
