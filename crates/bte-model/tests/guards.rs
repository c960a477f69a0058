use bte_model::{Model, NodeId, NodeKind};
use bte_runtime::{Succeed, TaskId, TaskStatus, TaskTemplate, TaskTree, Wait};

fn with_guard() -> (Model, NodeId, NodeId) {
    let mut model = Model::new();
    model.init(TaskTree::from_template(&TaskTemplate::sequence(vec![
        TaskTemplate::leaf(Succeed),
    ])));
    let seq = model.node(model.root()).unwrap().children()[0];
    let guard = model.instantiate_guard();
    model.add(guard, seq).unwrap();
    assert!(model.is_valid());
    (model, seq, guard)
}

fn task(model: &Model, node: NodeId) -> TaskId {
    model.node(node).unwrap().task().unwrap()
}

fn runtime_children(model: &Model, node: NodeId) -> Vec<TaskId> {
    model.runtime().tree().children(task(model, node)).to_vec()
}

#[test]
fn empty_guard_has_no_runtime_presence() {
    let (model, seq, guard) = with_guard();
    assert_eq!(model.node(guard).unwrap().kind(), NodeKind::Guard);
    assert!(model.node(guard).unwrap().task().is_none());
    assert_eq!(runtime_children(&model, seq).len(), 1);
}

#[test]
fn guard_children_follow_the_transition_table() {
    let (mut model, seq, guard) = with_guard();

    let a = model.instantiate("Wait").unwrap();
    model.add(a, guard).unwrap();
    assert_eq!(runtime_children(&model, seq)[1], task(&model, a));
    assert!(!model.is_valid());

    let b = model.instantiate("Success").unwrap();
    model.add_at(b, guard, 0).unwrap();
    assert!(model.is_valid());
    assert_eq!(model.runtime().tree().guard(task(&model, a)), Some(task(&model, b)));
    assert_eq!(model.node(a).unwrap().guard(), Some(b));

    model.remove(b).unwrap();
    assert_eq!(model.runtime().tree().guard(task(&model, a)), None);
    assert_eq!(runtime_children(&model, seq)[1], task(&model, a));
    assert!(model.node(a).unwrap().guard().is_none());
}

#[test]
fn second_child_takes_the_slot_and_is_guarded_by_the_first() {
    let (mut model, seq, guard) = with_guard();
    let x = model.instantiate("Success").unwrap();
    let y = model.instantiate("Wait").unwrap();
    model.add(x, guard).unwrap();
    model.add_at(y, guard, 1).unwrap();

    assert!(model.is_valid());
    assert_eq!(runtime_children(&model, seq).len(), 2);
    assert_eq!(runtime_children(&model, seq)[1], task(&model, y));
    assert_eq!(model.runtime().tree().guard(task(&model, y)), Some(task(&model, x)));

    // Dropping the guarded child promotes the guard into the slot.
    model.remove(y).unwrap();
    assert_eq!(runtime_children(&model, seq)[1], task(&model, x));
    assert_eq!(model.runtime().tree().guard(task(&model, y)), None);
}

#[test]
fn guard_edits_round_trip_through_history() {
    let (mut model, seq, guard) = with_guard();
    let before = runtime_children(&model, seq);
    let guarded = model.instantiate("Wait").unwrap();
    let condition = model.instantiate("Success").unwrap();
    model.add(guarded, guard).unwrap();
    model.add_at(condition, guard, 0).unwrap();
    let after = runtime_children(&model, seq);

    assert!(model.undo());
    assert!(model.undo());
    assert_eq!(runtime_children(&model, seq), before);
    assert!(model.node(guard).unwrap().children().is_empty());

    assert!(model.redo());
    assert!(model.redo());
    assert!(model.is_valid());
    assert_eq!(runtime_children(&model, seq), after);
    assert_eq!(
        model.runtime().tree().guard(task(&model, guarded)),
        Some(task(&model, condition))
    );
}

#[test]
fn guard_moves_with_its_children() {
    let mut model = Model::new();
    model.init(TaskTree::from_template(&TaskTemplate::sequence(vec![
        TaskTemplate::leaf(Succeed),
        TaskTemplate::selector(vec![TaskTemplate::leaf(Succeed)]),
    ])));
    let seq = model.node(model.root()).unwrap().children()[0];
    let selector = model.node(seq).unwrap().children()[1];
    let guard = model.instantiate_guard();
    model.add_before(guard, selector).unwrap();
    let condition = model.instantiate("Success").unwrap();
    let body = model.instantiate("Wait").unwrap();
    model.add(body, guard).unwrap();
    model.add_at(condition, guard, 0).unwrap();
    assert!(model.is_valid());

    model.move_to(guard, selector).unwrap();
    assert!(model.is_valid());
    assert_eq!(runtime_children(&model, selector)[1], task(&model, body));
    assert!(!runtime_children(&model, seq).contains(&task(&model, body)));
    assert_eq!(
        model.runtime().tree().guard(task(&model, body)),
        Some(task(&model, condition))
    );
}

#[test]
fn guards_cannot_nest() {
    let (mut model, _, guard) = with_guard();
    let inner = model.instantiate_guard();
    assert!(!model.can_add(inner, guard));
}

#[test]
fn loose_guard_gates_its_task() {
    let mut model = Model::new();
    model.init(TaskTree::from_template(&TaskTemplate::sequence(vec![
        TaskTemplate::leaf(Wait::new(3)),
    ])));
    let seq = model.node(model.root()).unwrap().children()[0];
    let wait = model.node(seq).unwrap().children()[0];

    let condition = model.instantiate("Failure").unwrap();
    assert_eq!(model.set_guard(wait, condition), Ok(None));
    assert!(model.is_valid());
    assert_eq!(model.update(), Some(TaskStatus::Failure));

    assert_eq!(model.remove_guard(wait), Ok(Some(condition)));
    assert_eq!(model.update(), Some(TaskStatus::Running));
}

#[test]
fn replacing_a_loose_guard_hands_back_the_old_one() {
    let mut model = Model::new();
    model.init(TaskTree::from_template(&TaskTemplate::sequence(vec![
        TaskTemplate::leaf(Wait::new(3)),
    ])));
    let seq = model.node(model.root()).unwrap().children()[0];
    let wait = model.node(seq).unwrap().children()[0];
    let first = model.instantiate("Failure").unwrap();
    let second = model.instantiate("Success").unwrap();
    model.set_guard(wait, first).unwrap();
    let first_task = task(&model, first);

    assert_eq!(model.set_guard(wait, second), Ok(Some(first)));
    assert_eq!(model.node(wait).unwrap().guard(), Some(second));
    assert_eq!(model.runtime().tree().guard(task(&model, wait)), Some(task(&model, second)));
    assert!(!model.node(first).unwrap().is_guard());
    assert_eq!(model.update(), Some(TaskStatus::Running));

    assert_eq!(model.discard(first), Ok(1));
    assert!(!model.runtime().tree().contains(first_task));
}
