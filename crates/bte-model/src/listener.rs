use std::fmt;

use crate::tree::ModelTree;

/// Observer of model lifecycle and edits.
///
/// Notifications carry no delta; views re-read the tree on `on_change`.
pub trait ChangeListener {
    /// A tree was loaded.
    fn on_init(&mut self, _model: &ModelTree) {}

    /// The loaded tree is about to be dropped.
    fn on_reset(&mut self, _model: &ModelTree) {}

    fn on_change(&mut self, _model: &ModelTree) {}

    fn on_listener_added(&mut self, _model: &ModelTree) {}

    fn on_listener_removed(&mut self, _model: &ModelTree) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}
