use std::fmt;

use generational_arena::Arena;
use tracing::{debug, trace};

use crate::blackboard::Blackboard;
use crate::error::RuntimeError;
use crate::task::{ChildConstraint, Task, TaskClass, TaskId, TaskKind, TaskStatus};
use crate::template::TaskTemplate;
use crate::trace::{TraceEvent, TraceLog, TraceSink};

#[derive(Debug, Clone, Copy)]
enum Shape {
    Leaf,
    Single(SingleMode),
    Ordered { continue_on: TaskStatus },
    Parallel,
    Repeat { times: u32 },
}

#[derive(Debug, Clone, Copy)]
enum SingleMode {
    Pass,
    Invert,
    Succeed,
    Fail,
}

impl Shape {
    fn of(kind: &TaskKind) -> Self {
        match kind {
            TaskKind::Leaf(_) => Self::Leaf,
            TaskKind::Host | TaskKind::Include { .. } => Self::Single(SingleMode::Pass),
            TaskKind::Invert => Self::Single(SingleMode::Invert),
            TaskKind::AlwaysSucceed => Self::Single(SingleMode::Succeed),
            TaskKind::AlwaysFail => Self::Single(SingleMode::Fail),
            TaskKind::Sequence => Self::Ordered {
                continue_on: TaskStatus::Success,
            },
            TaskKind::Selector => Self::Ordered {
                continue_on: TaskStatus::Failure,
            },
            TaskKind::Parallel => Self::Parallel,
            TaskKind::Repeat { times } => Self::Repeat { times: *times },
        }
    }
}

/// Executable behavior tree.
///
/// Tasks live in a generational arena. The permanent host task is the tree's root slot and holds
/// at most one child, the top-level task. Structural edits go through [`insert_child`],
/// [`remove_child`] and [`set_guard`], which reject anything that would corrupt the tree.
///
/// [`insert_child`]: TaskTree::insert_child
/// [`remove_child`]: TaskTree::remove_child
/// [`set_guard`]: TaskTree::set_guard
pub struct TaskTree {
    tasks: Arena<Task>,
    host: TaskId,
    blackboard: Blackboard,
    steps: u64,
    trace_log: Option<TraceLog>,
    trace_sink: Option<Box<dyn TraceSink>>,
}

impl Default for TaskTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTree")
            .field("tasks", &self.tasks.len())
            .field("root", &self.root())
            .field("steps", &self.steps)
            .finish()
    }
}

impl TaskTree {
    pub fn new() -> Self {
        let mut tasks = Arena::new();
        let host = TaskId(tasks.insert(Task::new(TaskKind::Host)));
        Self {
            tasks,
            host,
            blackboard: Blackboard::new(),
            steps: 0,
            trace_log: None,
            trace_sink: None,
        }
    }

    /// Builds a tree whose top-level task is instantiated from `template`.
    pub fn from_template(template: &TaskTemplate) -> Self {
        let mut tree = Self::new();
        let root = tree.build(template);
        tree.tasks[tree.host.0].children.push(root);
        tree
    }

    pub fn host(&self) -> TaskId {
        self.host
    }

    /// The top-level task, if the host slot is filled.
    pub fn root(&self) -> Option<TaskId> {
        self.tasks.get(self.host.0)?.children.first().copied()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains(id.0)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    fn task_ref(&self, id: TaskId) -> Result<&Task, RuntimeError> {
        self.tasks.get(id.0).ok_or(RuntimeError::UnknownTask(id))
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, RuntimeError> {
        self.tasks.get_mut(id.0).ok_or(RuntimeError::UnknownTask(id))
    }

    pub fn kind(&self, id: TaskId) -> Option<&TaskKind> {
        self.task(id).map(Task::kind)
    }

    pub fn type_name(&self, id: TaskId) -> Option<&str> {
        self.kind(id).map(TaskKind::type_name)
    }

    pub fn class(&self, id: TaskId) -> Option<TaskClass> {
        self.kind(id).map(TaskKind::class)
    }

    pub fn declared_constraint(&self, id: TaskId) -> Option<ChildConstraint> {
        self.kind(id).map(TaskKind::declared_constraint)
    }

    pub fn child_count(&self, id: TaskId) -> usize {
        self.children(id).len()
    }

    pub fn child(&self, id: TaskId, index: usize) -> Option<TaskId> {
        self.children(id).get(index).copied()
    }

    pub fn children(&self, id: TaskId) -> &[TaskId] {
        self.task(id).map(Task::children).unwrap_or(&[])
    }

    pub fn guard(&self, id: TaskId) -> Option<TaskId> {
        self.task(id).and_then(Task::guard)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.task(id).map(Task::status)
    }

    pub fn include_subtree(&self, id: TaskId) -> Option<&str> {
        match self.kind(id)? {
            TaskKind::Include { subtree } => Some(subtree.as_str()),
            _ => None,
        }
    }

    pub fn set_include_subtree(
        &mut self,
        id: TaskId,
        name: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        match &mut self.task_mut(id)?.kind {
            TaskKind::Include { subtree } => {
                *subtree = name.into();
                Ok(())
            }
            _ => Err(RuntimeError::NotAnInclude(id)),
        }
    }

    /// Creates a detached task.
    pub fn spawn(&mut self, kind: TaskKind) -> TaskId {
        TaskId(self.tasks.insert(Task::new(kind)))
    }

    /// Instantiates a detached copy of `template`, children and guards included.
    pub fn build(&mut self, template: &TaskTemplate) -> TaskId {
        let id = self.spawn(template.kind.clone());
        for child in &template.children {
            let child = self.build(child);
            self.tasks[id.0].children.push(child);
        }
        if let Some(guard) = &template.guard {
            let guard = self.build(guard);
            self.tasks[id.0].guard = Some(guard);
        }
        id
    }

    /// Captures the subtree rooted at `id` as a template.
    pub fn template_of(&self, id: TaskId) -> Option<TaskTemplate> {
        let task = self.task(id)?;
        Some(TaskTemplate {
            kind: task.kind.clone(),
            children: task
                .children
                .iter()
                .filter_map(|child| self.template_of(*child))
                .collect(),
            guard: task
                .guard
                .and_then(|guard| self.template_of(guard))
                .map(Box::new),
        })
    }

    /// Every task reachable from `id` through children and guards, `id` first.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(task) = self.task(current) else {
                continue;
            };
            out.push(current);
            if let Some(guard) = task.guard {
                stack.push(guard);
            }
            for &child in task.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    pub fn insert_child(
        &mut self,
        parent: TaskId,
        at: usize,
        child: TaskId,
    ) -> Result<(), RuntimeError> {
        if child == self.host {
            return Err(RuntimeError::HostTask);
        }
        if child == parent {
            return Err(RuntimeError::SelfReference(child));
        }
        self.task_ref(child)?;

        let target = self.task_ref(parent)?;
        let constraint = target.kind.declared_constraint();
        if constraint.max == 0 {
            return Err(RuntimeError::ChildrenNotAllowed {
                task: parent,
                type_name: target.kind.type_name().to_string(),
            });
        }
        let len = target.children.len();
        if at > len {
            return Err(RuntimeError::IndexOutOfRange { at, len });
        }
        if let Some(existing) = self.parent_of(child) {
            return Err(RuntimeError::AlreadyChild {
                parent: existing,
                child,
            });
        }
        if !constraint.has_room(len) {
            return Err(RuntimeError::SlotOccupied { parent });
        }

        let target = self.task_mut(parent)?;
        target.children.insert(at, child);
        target.cursor = 0;
        trace!(parent = %parent, child = %child, at, "task inserted");
        Ok(())
    }

    /// Detaches `child` from `parent`. A running child is cancelled.
    pub fn remove_child(&mut self, parent: TaskId, child: TaskId) -> Result<(), RuntimeError> {
        let target = self.task_mut(parent)?;
        let Some(position) = target.children.iter().position(|c| *c == child) else {
            return Err(RuntimeError::NotAChild { parent, child });
        };
        target.children.remove(position);
        target.cursor = 0;

        if self.status(child) == Some(TaskStatus::Running) {
            self.cancel(child);
        }
        trace!(parent = %parent, child = %child, "task removed");
        Ok(())
    }

    /// Replaces the guard of `task`, returning the previous one.
    pub fn set_guard(
        &mut self,
        task: TaskId,
        guard: Option<TaskId>,
    ) -> Result<Option<TaskId>, RuntimeError> {
        if task == self.host {
            return Err(RuntimeError::HostTask);
        }
        if let Some(guard) = guard {
            if guard == task {
                return Err(RuntimeError::SelfReference(task));
            }
            if guard == self.host {
                return Err(RuntimeError::HostTask);
            }
            self.task_ref(guard)?;
        }
        let target = self.task_mut(task)?;
        let previous = std::mem::replace(&mut target.guard, guard);
        trace!(task = %task, guard = ?guard, "guard set");
        Ok(previous)
    }

    /// The task holding `child` in its child list, if any.
    pub fn parent_of(&self, child: TaskId) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|(_, task)| task.children.contains(&child))
            .map(|(index, _)| TaskId(index))
    }

    /// Whether `id` is reachable from the host through children and guards.
    pub fn is_attached(&self, id: TaskId) -> bool {
        self.descendants(self.host).contains(&id)
    }

    /// Frees the subtree rooted at `id`. The caller must have detached it first.
    pub fn release(&mut self, id: TaskId) -> Result<usize, RuntimeError> {
        if id == self.host {
            return Err(RuntimeError::HostTask);
        }
        self.task_ref(id)?;
        let doomed = self.descendants(id);
        for task in &doomed {
            self.tasks.remove(task.0);
        }
        debug!(task = %id, released = doomed.len(), "subtree released");
        Ok(doomed.len())
    }

    /// Frees exactly the listed tasks, leaving their children alone.
    /// The host, attached tasks and unknown ids are skipped.
    pub fn release_tasks(&mut self, ids: &[TaskId]) -> usize {
        let attached = self.descendants(self.host);
        let mut freed = Vec::new();
        for &id in ids {
            if attached.contains(&id) || self.tasks.remove(id.0).is_none() {
                continue;
            }
            freed.push(id);
        }
        // Surviving tasks must not point at freed ones.
        if !freed.is_empty() {
            for (_, task) in self.tasks.iter_mut() {
                task.children.retain(|child| !freed.contains(child));
                if task.guard.is_some_and(|guard| freed.contains(&guard)) {
                    task.guard = None;
                }
            }
        }
        debug!(requested = ids.len(), released = freed.len(), "tasks released");
        freed.len()
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    /// Number of completed `step` calls.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn enable_trace_log(&mut self) {
        self.trace_log.get_or_insert_with(TraceLog::default);
    }

    pub fn trace_log(&self) -> Option<&TraceLog> {
        self.trace_log.as_ref()
    }

    pub fn take_trace_log(&mut self) -> Option<TraceLog> {
        self.trace_log.take()
    }

    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace_sink = Some(sink);
    }

    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace_sink.take()
    }

    /// Returns every task to `Fresh` and clears all execution state.
    pub fn reset(&mut self) {
        for (_, task) in self.tasks.iter_mut() {
            task.status = TaskStatus::Fresh;
            task.cursor = 0;
            if let TaskKind::Leaf(leaf) = &mut task.kind {
                leaf.reset();
            }
        }
        trace!("tree reset");
    }

    /// Advances the tree by one step and returns the top-level status.
    pub fn step(&mut self) -> TaskStatus {
        self.steps += 1;
        let Some(root) = self.root() else {
            debug!("step on an empty tree");
            return self.set_status(self.host, TaskStatus::Failure);
        };
        let status = self.tick_task(root);
        self.set_status(self.host, status)
    }

    fn tick_task(&mut self, id: TaskId) -> TaskStatus {
        let Some(task) = self.tasks.get(id.0) else {
            return TaskStatus::Failure;
        };
        let shape = Shape::of(&task.kind);

        if let Some(guard) = task.guard {
            self.rewind(guard);
            if self.tick_task(guard) != TaskStatus::Success {
                self.rewind(id);
                return self.set_status(id, TaskStatus::Failure);
            }
        }

        let status = match shape {
            Shape::Leaf => match self.tasks.get_mut(id.0).map(|t| &mut t.kind) {
                Some(TaskKind::Leaf(leaf)) => leaf.tick(&mut self.blackboard),
                _ => TaskStatus::Failure,
            },
            Shape::Single(mode) => self.tick_single(id, mode),
            Shape::Ordered { continue_on } => self.tick_ordered(id, continue_on),
            Shape::Parallel => self.tick_parallel(id),
            Shape::Repeat { times } => self.tick_repeat(id, times),
        };
        self.set_status(id, status)
    }

    fn tick_single(&mut self, id: TaskId, mode: SingleMode) -> TaskStatus {
        let Some(child) = self.child(id, 0) else {
            return TaskStatus::Failure;
        };
        let status = self.tick_task(child);
        match (mode, status) {
            (_, TaskStatus::Running) => TaskStatus::Running,
            (SingleMode::Pass, status) => status,
            (SingleMode::Invert, TaskStatus::Success) => TaskStatus::Failure,
            (SingleMode::Invert, _) => TaskStatus::Success,
            (SingleMode::Succeed, _) => TaskStatus::Success,
            (SingleMode::Fail, _) => TaskStatus::Failure,
        }
    }

    // Sequence continues on success, selector on failure; either resumes at the running child.
    fn tick_ordered(&mut self, id: TaskId, continue_on: TaskStatus) -> TaskStatus {
        let children = self.children(id).to_vec();
        let mut index = self.tasks.get(id.0).map(|t| t.cursor).unwrap_or(0);

        while index < children.len() {
            let status = self.tick_task(children[index]);
            match status {
                TaskStatus::Running => {
                    self.set_cursor(id, index);
                    return TaskStatus::Running;
                }
                s if s == continue_on => index += 1,
                other => {
                    self.rewind_children(id);
                    return other;
                }
            }
        }

        self.rewind_children(id);
        continue_on
    }

    fn tick_parallel(&mut self, id: TaskId) -> TaskStatus {
        let children = self.children(id).to_vec();
        let mut running = false;
        for child in children {
            match self.tick_task(child) {
                TaskStatus::Failure => {
                    self.rewind_children(id);
                    return TaskStatus::Failure;
                }
                TaskStatus::Running => running = true,
                _ => {}
            }
        }
        if running {
            TaskStatus::Running
        } else {
            self.rewind_children(id);
            TaskStatus::Success
        }
    }

    fn tick_repeat(&mut self, id: TaskId, times: u32) -> TaskStatus {
        let Some(child) = self.child(id, 0) else {
            return TaskStatus::Failure;
        };
        match self.tick_task(child) {
            TaskStatus::Running => TaskStatus::Running,
            TaskStatus::Success => {
                let done = self.tasks.get(id.0).map(|t| t.cursor).unwrap_or(0) + 1;
                self.rewind(child);
                if done >= times as usize {
                    self.set_cursor(id, 0);
                    TaskStatus::Success
                } else {
                    self.set_cursor(id, done);
                    TaskStatus::Running
                }
            }
            _ => {
                self.rewind_children(id);
                TaskStatus::Failure
            }
        }
    }

    fn set_cursor(&mut self, id: TaskId, cursor: usize) {
        if let Some(task) = self.tasks.get_mut(id.0) {
            task.cursor = cursor;
        }
    }

    fn set_status(&mut self, id: TaskId, status: TaskStatus) -> TaskStatus {
        let Some(task) = self.tasks.get_mut(id.0) else {
            return status;
        };
        if task.status != status {
            task.status = status;
            let event = TraceEvent::new(self.steps, "task.status")
                .with_a(id.slot())
                .with_b(status.code());
            if let Some(log) = self.trace_log.as_mut() {
                log.push(event.clone());
            }
            if let Some(sink) = self.trace_sink.as_mut() {
                sink.emit(event);
            }
        }
        status
    }

    // Clears cursors and leaf state below `id`, keeping the last reported statuses.
    fn rewind(&mut self, id: TaskId) {
        for task in self.descendants(id) {
            if let Some(task) = self.tasks.get_mut(task.0) {
                task.cursor = 0;
                if let TaskKind::Leaf(leaf) = &mut task.kind {
                    leaf.reset();
                }
            }
        }
    }

    fn rewind_children(&mut self, id: TaskId) {
        self.set_cursor(id, 0);
        for child in self.children(id).to_vec() {
            self.rewind(child);
        }
    }

    fn cancel(&mut self, id: TaskId) {
        for task in self.descendants(id) {
            if self.status(task) == Some(TaskStatus::Running) {
                self.set_status(task, TaskStatus::Cancelled);
            }
        }
        self.rewind(id);
    }
}
