use tracing::debug;

use crate::command::Command;
use crate::node::NodeId;
use crate::tree::ModelTree;

/// Linear undo/redo log.
///
/// `applied` counts the commands currently in effect; everything after it is the redo branch,
/// which the next `execute` discards.
#[derive(Debug, Default, Clone)]
pub struct CommandManager {
    commands: Vec<Command>,
    applied: usize,
    limit: Option<usize>,
}

impl CommandManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` commands, evicting the oldest.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Runs `command` and records it. Returns the commands dropped from the log.
    pub fn execute(&mut self, command: Command, tree: &mut ModelTree) -> Vec<Command> {
        let mut dropped = self.commands.split_off(self.applied);
        command.execute(tree);
        self.commands.push(command);
        self.applied = self.commands.len();

        if let Some(limit) = self.limit {
            let excess = self.commands.len().saturating_sub(limit);
            if excess > 0 {
                dropped.extend(self.commands.drain(..excess));
                self.applied -= excess;
            }
        }
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), kept = self.commands.len(), "history trimmed");
        }
        dropped
    }

    /// Reverts the last applied command. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self, tree: &mut ModelTree) -> bool {
        if self.applied == 0 {
            return false;
        }
        self.applied -= 1;
        self.commands[self.applied].undo(tree);
        true
    }

    /// Reapplies the next undone command. Returns `false` at the end of the log.
    pub fn redo(&mut self, tree: &mut ModelTree) -> bool {
        let Some(command) = self.commands.get(self.applied) else {
            return false;
        };
        command.execute(tree);
        self.applied += 1;
        true
    }

    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn can_redo(&self) -> bool {
        self.applied < self.commands.len()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Whether any recorded command refers to `node`.
    pub fn references(&self, node: NodeId) -> bool {
        self.commands.iter().any(|cmd| cmd.nodes().contains(&node))
    }

    /// Forgets every command and returns them.
    pub fn clear(&mut self) -> Vec<Command> {
        self.applied = 0;
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
mod tests {
    use bte_runtime::{Succeed, TaskKind, TaskTemplate, TaskTree};

    use super::*;
    use crate::command::AddCommand;

    fn fixture() -> (ModelTree, NodeId) {
        let mut tree = ModelTree::default();
        tree.load(TaskTree::from_template(&TaskTemplate::sequence(vec![
            TaskTemplate::leaf(Succeed),
        ])));
        tree.validate();
        let seq = tree.n(tree.root()).children()[0];
        (tree, seq)
    }

    fn add(tree: &mut ModelTree, seq: NodeId) -> Command {
        let leaf = tree.create_node(TaskKind::leaf(Succeed));
        AddCommand::new(tree, seq, leaf, None).into()
    }

    #[test]
    fn undo_and_redo_are_noops_at_the_ends() {
        let (mut tree, _) = fixture();
        let mut history = CommandManager::new();
        assert!(!history.undo(&mut tree));
        assert!(!history.redo(&mut tree));
    }

    #[test]
    fn execute_after_undo_discards_the_redo_branch() {
        let (mut tree, seq) = fixture();
        let mut history = CommandManager::new();
        let first = add(&mut tree, seq);
        let second = add(&mut tree, seq);
        history.execute(first, &mut tree);
        assert!(history.undo(&mut tree));
        assert!(history.can_redo());

        let dropped = history.execute(second, &mut tree);
        assert_eq!(dropped, [first]);
        assert!(!history.can_redo());
        assert!(!history.redo(&mut tree));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn limit_evicts_oldest_commands() {
        let (mut tree, seq) = fixture();
        let mut history = CommandManager::with_limit(Some(2));
        let commands: Vec<_> = (0..3).map(|_| add(&mut tree, seq)).collect();
        for command in &commands {
            history.execute(*command, &mut tree);
        }
        assert_eq!(history.commands(), &commands[1..]);
        assert_eq!(history.applied(), 2);
        assert_eq!(tree.n(seq).child_count(), 4);
    }
}
