use crate::leaf::Leaf;
use crate::task::TaskKind;

/// Detached description of a subtree, instantiated with [`TaskTree::build`](crate::TaskTree::build).
#[derive(Debug, Clone)]
pub struct TaskTemplate {
    pub kind: TaskKind,
    pub children: Vec<TaskTemplate>,
    pub guard: Option<Box<TaskTemplate>>,
}

impl TaskTemplate {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            guard: None,
        }
    }

    pub fn sequence(children: Vec<TaskTemplate>) -> Self {
        Self::new(TaskKind::Sequence).with_children(children)
    }

    pub fn selector(children: Vec<TaskTemplate>) -> Self {
        Self::new(TaskKind::Selector).with_children(children)
    }

    pub fn parallel(children: Vec<TaskTemplate>) -> Self {
        Self::new(TaskKind::Parallel).with_children(children)
    }

    pub fn invert(child: TaskTemplate) -> Self {
        Self::new(TaskKind::Invert).with_child(child)
    }

    pub fn always_succeed(child: TaskTemplate) -> Self {
        Self::new(TaskKind::AlwaysSucceed).with_child(child)
    }

    pub fn always_fail(child: TaskTemplate) -> Self {
        Self::new(TaskKind::AlwaysFail).with_child(child)
    }

    pub fn repeat(times: u32, child: TaskTemplate) -> Self {
        Self::new(TaskKind::Repeat { times }).with_child(child)
    }

    pub fn include(subtree: impl Into<String>) -> Self {
        Self::new(TaskKind::include(subtree))
    }

    pub fn leaf(leaf: impl Leaf) -> Self {
        Self::new(TaskKind::leaf(leaf))
    }

    pub fn with_child(mut self, child: TaskTemplate) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<TaskTemplate>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_guard(mut self, guard: TaskTemplate) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Number of tasks the template instantiates, guards included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TaskTemplate::size).sum::<usize>()
            + self.guard.as_ref().map_or(0, |guard| guard.size())
    }
}
