//! Structural edits on the model tree and their physical counterparts.
//!
//! Each model edit yields at most a few [`PhysicalOp`]s. An op is applied to the runtime right
//! away only when the tree is globally valid, the owning node has nothing queued and (for child
//! edits) the owner is still valid afterwards. Otherwise it is queued on the owner. Validation
//! replays queued edits across the whole tree in submission order, stopping at the first one
//! whose owner is still attached and invalid.
//!
//! A Guard pseudo-node has no runtime task. Its guarded child occupies the Guard's slot in the
//! parent and the guard child is stored as that task's guard attribute, so Guard edits turn into
//! slot and guard ops queued on the Guard's parent.

use bte_runtime::TaskId;
use tracing::{debug, warn};

use crate::adapter::PhysicalOp;
use crate::node::{NodeId, NodeKind};
use crate::tree::ModelTree;

impl ModelTree {
    /// Whether `candidate` may become a child of `target`.
    ///
    /// Rejects read-only targets, full targets, nodes that cannot hold children and edits that
    /// would place a node inside itself.
    pub fn can_add(&self, target: NodeId, candidate: NodeId) -> bool {
        let (Some(t), Some(c)) = (self.node(target), self.node(candidate)) else {
            return false;
        };
        if t.read_only || self.has_descendant(candidate, target) {
            return false;
        }
        if matches!(c.kind, NodeKind::Root | NodeKind::Null) {
            return false;
        }
        match t.kind {
            NodeKind::Root => self.initialized && t.children.is_empty(),
            NodeKind::Guard => c.kind != NodeKind::Guard && t.children.len() < 2,
            NodeKind::Include | NodeKind::Null | NodeKind::Leaf => false,
            NodeKind::Branch | NodeKind::Decorator => t.children.len() < t.constraint.max,
        }
    }

    /// Inserts `node` as the `at`-th child of `parent`.
    ///
    /// # Panics
    ///
    /// On unknown nodes, and on a Guard position outside the guard transition table.
    pub fn insert_child(&mut self, parent: NodeId, at: usize, node: NodeId) {
        self.dirty = true;
        if self.n(parent).kind == NodeKind::Guard {
            self.guard_insert(parent, at, node);
            return;
        }
        let at = at.min(self.n(parent).children.len());
        self.attach(parent, at, node);
        if let (Some(parent_task), Some(task)) = (self.n(parent).task, self.slot_task(node)) {
            let op = PhysicalOp::Insert {
                parent: parent_task,
                at: self.physical_index(parent, at),
                task,
            };
            self.submit(parent, op, true);
        }
    }

    /// Detaches `node` from `parent` and returns the index it had.
    pub fn remove_child(&mut self, parent: NodeId, node: NodeId) -> usize {
        self.dirty = true;
        if self.n(parent).kind == NodeKind::Guard {
            return self.guard_remove(parent, node);
        }
        let slot = self.slot_task(node);
        let index = self.detach(parent, node);
        if let (Some(parent_task), Some(task)) = (self.n(parent).task, slot) {
            self.submit(
                parent,
                PhysicalOp::Remove {
                    parent: parent_task,
                    task,
                },
                true,
            );
        }
        index
    }

    pub fn add_child(&mut self, parent: NodeId, node: NodeId) {
        let at = self.n(parent).children.len();
        self.insert_child(parent, at, node);
    }

    /// Makes `guard` the guard of `node`, replacing any previous guard on both sides.
    pub fn set_guard(&mut self, node: NodeId, guard: NodeId) {
        self.link_guard(node, guard);
        if let Some(task) = self.n(node).task {
            let op = PhysicalOp::SetGuard {
                task,
                guard: self.n(guard).task,
            };
            self.apply_now(op);
        }
        self.dirty = true;
    }

    pub fn remove_guard(&mut self, node: NodeId) {
        self.unlink_guard(node);
        if let Some(task) = self.n(node).task {
            self.apply_now(PhysicalOp::SetGuard { task, guard: None });
        }
        self.dirty = true;
    }

    pub(crate) fn link_guard(&mut self, node: NodeId, guard: NodeId) {
        self.unlink_guard(node);
        let guard_node = self.n_mut(guard);
        guard_node.is_guard = true;
        guard_node.guarded = Some(node);
        self.n_mut(node).guard = Some(guard);
    }

    pub(crate) fn unlink_guard(&mut self, node: NodeId) {
        if let Some(guard) = self.n_mut(node).guard.take() {
            if let Some(guard) = self.nodes.get_mut(guard.0) {
                guard.is_guard = false;
                guard.guarded = None;
            }
        }
    }

    fn apply_now(&mut self, op: PhysicalOp) {
        if let Err(err) = self.runtime.apply(op) {
            warn!(%err, "physical edit rejected");
        }
    }

    // Applies `op` now or queues it on `owner`.
    fn submit(&mut self, owner: NodeId, op: PhysicalOp, needs_valid_owner: bool) {
        let immediate = self.valid
            && !self.n(owner).has_pending()
            && (!needs_valid_owner || self.check_valid(owner));
        if immediate {
            self.apply_now(op);
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            debug!(node = %owner, seq, %op, "physical edit deferred");
            self.n_mut(owner).pending.push_back((seq, op));
            self.valid = false;
        }
    }

    // Guard slot position inside the Guard's parent, plus the parent's task.
    fn guard_host(&self, guard: NodeId) -> Option<(TaskId, usize)> {
        let parent = self.n(guard).parent?;
        let task = self.n(parent).task?;
        let index = self.n(parent).child_index(guard)?;
        Some((task, self.physical_index(parent, index)))
    }

    fn guard_insert(&mut self, guard: NodeId, at: usize, node: NodeId) {
        let len = self.n(guard).children.len();
        let owner = self.n(guard).parent.unwrap_or(guard);
        let host = self.guard_host(guard);
        let task = self.n(node).task;

        match (at, len) {
            // Sole child: takes the Guard's slot as the guarded task.
            (0, 0) => {
                self.attach(guard, 0, node);
                if let (Some((parent, at)), Some(task)) = (host, task) {
                    self.submit(owner, PhysicalOp::Insert { parent, at, task }, false);
                }
            }
            // New first child guards the existing one.
            (0, 1) => {
                let guarded = self.n(guard).children[0];
                self.attach(guard, 0, node);
                self.link_guard(guarded, node);
                if let Some(guarded_task) = self.n(guarded).task {
                    let op = PhysicalOp::SetGuard {
                        task: guarded_task,
                        guard: task,
                    };
                    self.submit(owner, op, false);
                }
            }
            // New second child becomes guarded; the existing child leaves the slot to guard it.
            (1, 1) => {
                let existing = self.n(guard).children[0];
                let existing_task = self.n(existing).task;
                self.attach(guard, 1, node);
                self.link_guard(node, existing);
                if let (Some((parent, _)), Some(existing_task)) = (host, existing_task) {
                    let op = PhysicalOp::Remove {
                        parent,
                        task: existing_task,
                    };
                    self.submit(owner, op, false);
                }
                if let Some(task) = task {
                    let op = PhysicalOp::SetGuard {
                        task,
                        guard: existing_task,
                    };
                    self.submit(owner, op, false);
                    if let Some((parent, at)) = host {
                        self.submit(owner, PhysicalOp::Insert { parent, at, task }, false);
                    }
                }
            }
            _ => panic!("guard {guard} cannot take a child at {at} while holding {len}"),
        }
        self.note_guard_validity(guard);
    }

    fn guard_remove(&mut self, guard: NodeId, node: NodeId) -> usize {
        let len = self.n(guard).children.len();
        let Some(index) = self.n(guard).child_index(node) else {
            panic!("{node} is not a child of guard {guard}");
        };
        let owner = self.n(guard).parent.unwrap_or(guard);
        let task = self.n(node).task;

        match (index, len) {
            // Guard dropped, guarded task keeps the slot.
            (0, 2) => {
                let guarded = self.n(guard).children[1];
                self.detach(guard, node);
                self.unlink_guard(guarded);
                if let Some(guarded_task) = self.n(guarded).task {
                    let op = PhysicalOp::SetGuard {
                        task: guarded_task,
                        guard: None,
                    };
                    self.submit(owner, op, false);
                }
            }
            // Last child leaves the slot.
            (0, 1) => {
                let host = self.guard_host(guard);
                self.detach(guard, node);
                if let (Some((parent, _)), Some(task)) = (host, task) {
                    self.submit(owner, PhysicalOp::Remove { parent, task }, false);
                }
            }
            // Guarded task removed, its guard is promoted into the slot.
            (1, 2) => {
                let promoted = self.n(guard).children[0];
                self.unlink_guard(node);
                self.detach(guard, node);
                let host = self.guard_host(guard);
                if let Some(task) = task {
                    self.submit(owner, PhysicalOp::SetGuard { task, guard: None }, false);
                    if let Some((parent, _)) = host {
                        self.submit(owner, PhysicalOp::Remove { parent, task }, false);
                    }
                }
                if let (Some((parent, at)), Some(promoted)) = (host, self.n(promoted).task) {
                    let op = PhysicalOp::Insert {
                        parent,
                        at,
                        task: promoted,
                    };
                    self.submit(owner, op, false);
                }
            }
            _ => panic!("guard {guard} cannot drop child {index} while holding {len}"),
        }
        self.note_guard_validity(guard);
        index
    }

    // A half-filled Guard invalidates the tree even though its ops went through.
    fn note_guard_validity(&mut self, guard: NodeId) {
        if !self.check_valid(guard) {
            self.valid = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use bte_runtime::{Succeed, TaskKind, TaskTemplate, TaskTree};

    use super::*;

    fn loaded(template: &TaskTemplate) -> (ModelTree, NodeId) {
        let mut tree = ModelTree::default();
        tree.load(TaskTree::from_template(template));
        assert!(tree.validate());
        let top = tree.n(tree.root()).children()[0];
        (tree, top)
    }

    fn runtime_children(tree: &ModelTree, node: NodeId) -> Vec<TaskId> {
        let task = tree.n(node).task().unwrap();
        tree.task_tree().children(task).to_vec()
    }

    #[test]
    fn valid_edits_reach_the_runtime_immediately() {
        let (mut tree, seq) = loaded(&TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]));
        let leaf = tree.create_node(TaskKind::leaf(Succeed));
        tree.insert_child(seq, 0, leaf);
        assert!(!tree.n(seq).has_pending());
        assert_eq!(runtime_children(&tree, seq)[0], tree.n(leaf).task().unwrap());
    }

    #[test]
    fn edits_that_break_the_owner_are_deferred() {
        let (mut tree, invert) = loaded(&TaskTemplate::invert(TaskTemplate::leaf(Succeed)));
        let child = tree.n(invert).children()[0];
        tree.remove_child(invert, child);
        assert!(tree.n(invert).has_pending());
        assert_eq!(runtime_children(&tree, invert).len(), 1);

        let other = tree.create_node(TaskKind::leaf(Succeed));
        tree.insert_child(invert, 0, other);
        assert_eq!(tree.n(invert).pending().count(), 2);
        assert!(tree.validate());
        assert!(!tree.n(invert).has_pending());
        assert_eq!(runtime_children(&tree, invert), [tree.n(other).task().unwrap()]);
    }

    #[test]
    fn can_add_rejects_cycles_and_full_targets() {
        let (mut tree, invert) = loaded(&TaskTemplate::invert(TaskTemplate::leaf(Succeed)));
        let leaf = tree.n(invert).children()[0];
        let fresh = tree.create_node(TaskKind::Sequence);
        assert!(!tree.can_add(invert, fresh));
        assert!(!tree.can_add(leaf, fresh));
        assert!(!tree.can_add(leaf, invert));
        assert!(!tree.can_add(fresh, fresh));
        assert!(tree.can_add(fresh, leaf));
    }

    #[test]
    fn guard_promotion_moves_the_guard_into_the_slot() {
        let (mut tree, seq) = loaded(&TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]));
        let pseudo = tree.create_guard();
        tree.add_child(seq, pseudo);
        let guard = tree.create_node(TaskKind::leaf(Succeed));
        let guarded = tree.create_node(TaskKind::leaf(Succeed));
        tree.insert_child(pseudo, 0, guarded);
        tree.insert_child(pseudo, 0, guard);
        assert!(tree.validate());

        let guarded_task = tree.n(guarded).task().unwrap();
        let guard_task = tree.n(guard).task().unwrap();
        assert_eq!(tree.task_tree().guard(guarded_task), Some(guard_task));

        assert_eq!(tree.remove_child(pseudo, guarded), 1);
        assert!(!tree.validate());
        assert_eq!(tree.n(pseudo).children(), [guard]);
        assert!(!tree.n(guard).is_guard());
        assert_eq!(tree.task_tree().guard(guarded_task), None);

        // Reinserting at 1 swaps roles back through the same table.
        tree.insert_child(pseudo, 1, guarded);
        assert!(tree.validate());
        assert_eq!(tree.task_tree().guard(guarded_task), Some(guard_task));
        assert_eq!(runtime_children(&tree, seq)[1], guarded_task);
    }

    #[test]
    #[should_panic(expected = "cannot take a child")]
    fn guard_rejects_positions_outside_the_table() {
        let (mut tree, seq) = loaded(&TaskTemplate::sequence(vec![TaskTemplate::leaf(Succeed)]));
        let pseudo = tree.create_guard();
        tree.add_child(seq, pseudo);
        let leaf = tree.create_node(TaskKind::leaf(Succeed));
        tree.insert_child(pseudo, 1, leaf);
    }
}
