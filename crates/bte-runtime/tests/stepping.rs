use bte_runtime::{
    BbKey, Count, Fail, Flag, Succeed, TaskStatus, TaskTemplate, TaskTree, VecTraceSink, Wait,
};

const OPEN: BbKey<bool> = BbKey::new(1);
const HITS: BbKey<u64> = BbKey::new(2);

#[test]
fn empty_tree_fails_every_step() {
    let mut tree = TaskTree::new();
    assert_eq!(tree.step(), TaskStatus::Failure);
    assert_eq!(tree.steps(), 1);
}

#[test]
fn sequence_resumes_at_the_running_child() {
    let mut tree = TaskTree::from_template(&TaskTemplate::sequence(vec![
        TaskTemplate::leaf(Count::new(HITS)),
        TaskTemplate::leaf(Wait::new(2)),
    ]));

    assert_eq!(tree.step(), TaskStatus::Running);
    assert_eq!(tree.step(), TaskStatus::Success);
    assert_eq!(tree.blackboard().get(HITS), Some(&1));

    assert_eq!(tree.step(), TaskStatus::Running);
    assert_eq!(tree.blackboard().get(HITS), Some(&2));
}

#[test]
fn selector_stops_at_first_success() {
    let mut tree = TaskTree::from_template(&TaskTemplate::selector(vec![
        TaskTemplate::leaf(Fail),
        TaskTemplate::leaf(Succeed),
        TaskTemplate::leaf(Count::new(HITS)),
    ]));
    assert_eq!(tree.step(), TaskStatus::Success);
    assert!(!tree.blackboard().contains(HITS));
}

#[test]
fn failing_guard_fails_the_guarded_task() {
    let mut tree = TaskTree::from_template(
        &TaskTemplate::leaf(Count::new(HITS)).with_guard(TaskTemplate::leaf(Flag::new(OPEN))),
    );
    assert_eq!(tree.step(), TaskStatus::Failure);
    assert!(!tree.blackboard().contains(HITS));

    tree.blackboard_mut().set(OPEN, true);
    assert_eq!(tree.step(), TaskStatus::Success);
    assert_eq!(tree.blackboard().get(HITS), Some(&1));
}

#[test]
fn decorators_map_child_results() {
    let mut invert = TaskTree::from_template(&TaskTemplate::invert(TaskTemplate::leaf(Fail)));
    assert_eq!(invert.step(), TaskStatus::Success);

    let mut fail = TaskTree::from_template(&TaskTemplate::always_fail(TaskTemplate::leaf(Succeed)));
    assert_eq!(fail.step(), TaskStatus::Failure);

    let mut repeat = TaskTree::from_template(&TaskTemplate::repeat(
        3,
        TaskTemplate::leaf(Count::new(HITS)),
    ));
    assert_eq!(repeat.step(), TaskStatus::Running);
    assert_eq!(repeat.step(), TaskStatus::Running);
    assert_eq!(repeat.step(), TaskStatus::Success);
    assert_eq!(repeat.blackboard().get(HITS), Some(&3));
}

#[test]
fn parallel_waits_for_every_child() {
    let mut tree = TaskTree::from_template(&TaskTemplate::parallel(vec![
        TaskTemplate::leaf(Succeed),
        TaskTemplate::leaf(Wait::new(2)),
    ]));
    assert_eq!(tree.step(), TaskStatus::Running);
    assert_eq!(tree.step(), TaskStatus::Success);
}

#[test]
fn reset_returns_every_task_to_fresh() {
    let mut tree = TaskTree::from_template(&TaskTemplate::sequence(vec![
        TaskTemplate::leaf(Wait::new(5)),
    ]));
    tree.step();
    let root = tree.root().unwrap();
    assert_eq!(tree.status(root), Some(TaskStatus::Running));

    tree.reset();
    assert_eq!(tree.status(root), Some(TaskStatus::Fresh));
    assert_eq!(tree.step(), TaskStatus::Running);
}

#[test]
fn status_changes_reach_the_log_and_the_sink() {
    let mut tree = TaskTree::from_template(&TaskTemplate::leaf(Succeed));
    tree.enable_trace_log();
    tree.set_trace_sink(Box::<VecTraceSink>::default());
    tree.step();
    tree.step();

    let log = tree.trace_log().unwrap();
    // Leaf and host each change once; the second step repeats the same statuses.
    assert_eq!(log.with_tag("task.status").count(), 2);
    assert!(log.events.iter().all(|e| e.b == TaskStatus::Success.code()));
    assert!(tree.take_trace_sink().is_some());
}
