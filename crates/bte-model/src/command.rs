use std::fmt;

use tracing::trace;

use crate::node::NodeId;
use crate::tree::ModelTree;

/// Inserts a detached node under `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddCommand {
    pub target: NodeId,
    pub node: NodeId,
    pub at: usize,
}

impl AddCommand {
    /// `at` defaults to appending.
    pub fn new(tree: &ModelTree, target: NodeId, node: NodeId, at: Option<usize>) -> Self {
        let at = at.unwrap_or_else(|| tree.n(target).child_count());
        Self { target, node, at }
    }

    fn execute(&self, tree: &mut ModelTree) {
        tree.insert_child(self.target, self.at, self.node);
    }

    fn undo(&self, tree: &mut ModelTree) {
        tree.remove_child(self.target, self.node);
    }
}

/// Detaches a node, remembering where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveCommand {
    pub parent: NodeId,
    pub node: NodeId,
    pub index: usize,
}

impl RemoveCommand {
    /// `None` when `node` has no parent.
    pub fn new(tree: &ModelTree, node: NodeId) -> Option<Self> {
        let parent = tree.node(node)?.parent?;
        let index = tree.n(parent).child_index(node)?;
        Some(Self {
            parent,
            node,
            index,
        })
    }

    fn execute(&self, tree: &mut ModelTree) {
        tree.remove_child(self.parent, self.node);
    }

    fn undo(&self, tree: &mut ModelTree) {
        tree.insert_child(self.parent, self.index, self.node);
    }
}

/// A remove followed by an add of the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCommand {
    pub remove: RemoveCommand,
    pub add: AddCommand,
}

impl MoveCommand {
    /// `at` is the position in `target` once `node` has been detached; it defaults to appending.
    pub fn new(tree: &ModelTree, node: NodeId, target: NodeId, at: Option<usize>) -> Option<Self> {
        let remove = RemoveCommand::new(tree, node)?;
        let at = at.unwrap_or_else(|| {
            let len = tree.n(target).child_count();
            if remove.parent == target {
                len - 1
            } else {
                len
            }
        });
        Some(Self {
            remove,
            add: AddCommand { target, node, at },
        })
    }

    fn execute(&self, tree: &mut ModelTree) {
        self.remove.execute(tree);
        self.add.execute(tree);
    }

    fn undo(&self, tree: &mut ModelTree) {
        self.add.undo(tree);
        self.remove.undo(tree);
    }
}

/// A reversible structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add(AddCommand),
    Remove(RemoveCommand),
    Move(MoveCommand),
}

impl Command {
    pub fn execute(&self, tree: &mut ModelTree) {
        trace!(command = %self, "execute");
        match self {
            Self::Add(cmd) => cmd.execute(tree),
            Self::Remove(cmd) => cmd.execute(tree),
            Self::Move(cmd) => cmd.execute(tree),
        }
    }

    pub fn undo(&self, tree: &mut ModelTree) {
        trace!(command = %self, "undo");
        match self {
            Self::Add(cmd) => cmd.undo(tree),
            Self::Remove(cmd) => cmd.undo(tree),
            Self::Move(cmd) => cmd.undo(tree),
        }
    }

    /// Every node the command refers to.
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Self::Add(cmd) => vec![cmd.target, cmd.node],
            Self::Remove(cmd) => vec![cmd.parent, cmd.node],
            Self::Move(cmd) => vec![cmd.remove.parent, cmd.add.target, cmd.add.node],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(cmd) => write!(f, "add {} to {} at {}", cmd.node, cmd.target, cmd.at),
            Self::Remove(cmd) => {
                write!(f, "remove {} from {} at {}", cmd.node, cmd.parent, cmd.index)
            }
            Self::Move(cmd) => write!(
                f,
                "move {} from {} to {} at {}",
                cmd.add.node, cmd.remove.parent, cmd.add.target, cmd.add.at
            ),
        }
    }
}

impl From<AddCommand> for Command {
    fn from(cmd: AddCommand) -> Self {
        Self::Add(cmd)
    }
}

impl From<RemoveCommand> for Command {
    fn from(cmd: RemoveCommand) -> Self {
        Self::Remove(cmd)
    }
}

impl From<MoveCommand> for Command {
    fn from(cmd: MoveCommand) -> Self {
        Self::Move(cmd)
    }
}
