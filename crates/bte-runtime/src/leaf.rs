use std::fmt;
use std::rc::Rc;

use crate::blackboard::{BbKey, Blackboard};
use crate::task::TaskStatus;

/// Behaviour of a leaf task.
///
/// Leaves are cloned when an archetype is instantiated, so `clone_leaf` must return a fresh,
/// reset copy.
pub trait Leaf: fmt::Debug + 'static {
    fn name(&self) -> &str;

    fn tick(&mut self, blackboard: &mut Blackboard) -> TaskStatus;

    fn reset(&mut self) {}

    fn clone_leaf(&self) -> Box<dyn Leaf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Succeed;

impl Leaf for Succeed {
    fn name(&self) -> &str {
        "Success"
    }

    fn tick(&mut self, _blackboard: &mut Blackboard) -> TaskStatus {
        TaskStatus::Success
    }

    fn clone_leaf(&self) -> Box<dyn Leaf> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fail;

impl Leaf for Fail {
    fn name(&self) -> &str {
        "Failure"
    }

    fn tick(&mut self, _blackboard: &mut Blackboard) -> TaskStatus {
        TaskStatus::Failure
    }

    fn clone_leaf(&self) -> Box<dyn Leaf> {
        Box::new(*self)
    }
}

/// Runs for `steps` steps, then succeeds.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    steps: u32,
    elapsed: u32,
}

impl Wait {
    pub fn new(steps: u32) -> Self {
        Self { steps, elapsed: 0 }
    }
}

impl Default for Wait {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Leaf for Wait {
    fn name(&self) -> &str {
        "Wait"
    }

    fn tick(&mut self, _blackboard: &mut Blackboard) -> TaskStatus {
        if self.elapsed >= self.steps {
            return TaskStatus::Success;
        }
        self.elapsed += 1;
        if self.elapsed >= self.steps {
            TaskStatus::Success
        } else {
            TaskStatus::Running
        }
    }

    fn reset(&mut self) {
        self.elapsed = 0;
    }

    fn clone_leaf(&self) -> Box<dyn Leaf> {
        Box::new(Self::new(self.steps))
    }
}

/// Succeeds while a boolean blackboard flag is set.
#[derive(Debug, Clone, Copy)]
pub struct Flag {
    key: BbKey<bool>,
}

impl Flag {
    pub fn new(key: BbKey<bool>) -> Self {
        Self { key }
    }
}

impl Leaf for Flag {
    fn name(&self) -> &str {
        "Flag"
    }

    fn tick(&mut self, blackboard: &mut Blackboard) -> TaskStatus {
        if blackboard.get(self.key).copied().unwrap_or(false) {
            TaskStatus::Success
        } else {
            TaskStatus::Failure
        }
    }

    fn clone_leaf(&self) -> Box<dyn Leaf> {
        Box::new(*self)
    }
}

/// Increments a counter on the blackboard and succeeds.
#[derive(Debug, Clone, Copy)]
pub struct Count {
    key: BbKey<u64>,
}

impl Count {
    pub fn new(key: BbKey<u64>) -> Self {
        Self { key }
    }
}

impl Leaf for Count {
    fn name(&self) -> &str {
        "Count"
    }

    fn tick(&mut self, blackboard: &mut Blackboard) -> TaskStatus {
        *blackboard.get_or_default(self.key) += 1;
        TaskStatus::Success
    }

    fn clone_leaf(&self) -> Box<dyn Leaf> {
        Box::new(*self)
    }
}

type LeafFn = dyn Fn(&mut Blackboard) -> TaskStatus;

/// Named leaf backed by a closure, for subject-specific actions.
#[derive(Clone)]
pub struct FnLeaf {
    name: String,
    f: Rc<LeafFn>,
}

impl FnLeaf {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&mut Blackboard) -> TaskStatus + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Rc::new(f),
        }
    }
}

impl fmt::Debug for FnLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLeaf").field("name", &self.name).finish()
    }
}

impl Leaf for FnLeaf {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self, blackboard: &mut Blackboard) -> TaskStatus {
        (self.f)(blackboard)
    }

    fn clone_leaf(&self) -> Box<dyn Leaf> {
        Box::new(self.clone())
    }
}
