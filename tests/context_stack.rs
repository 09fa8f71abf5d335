use prism_engine::context::{ContextError, ContextStack, ContextUsage};
use prism_engine::handle::ObjectHandle;
use prism_engine::scene::{ObjectKind, SceneGraph};

#[test]
fn reserve_of_one_bounds_the_push_count() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(4);

    assert_eq!(stack.push(&mut scene).expect("first push"), 1);
    assert_eq!(stack.push(&mut scene).expect("second push"), 2);
    assert_eq!(stack.push(&mut scene).expect("third push"), 3);
    assert_eq!(stack.push(&mut scene).expect_err("reserve frame must stay free"), ContextError::Exhausted);

    assert_eq!(stack.pop(&mut scene).expect("first pop"), 2);
    assert_eq!(stack.pop(&mut scene).expect("second pop"), 1);
    assert_eq!(stack.pop(&mut scene).expect("third pop"), 0);
    assert_eq!(stack.pop(&mut scene).expect_err("stack is empty"), ContextError::Empty);
}

#[test]
fn pop_on_empty_stack_leaves_usage_untouched() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(4);
    let before = stack.usage();
    assert_eq!(stack.pop(&mut scene).expect_err("nothing stacked"), ContextError::Empty);
    assert_eq!(stack.usage(), before);
    assert_eq!(before, ContextUsage { active: 1, limit: 4 });
}

#[test]
fn push_switches_to_an_empty_context_and_pop_restores() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(4);
    let kept = scene.alloc(ObjectKind::Video);
    scene.get_mut(kept).expect("live").tracetag = Some("menu".to_string());

    stack.push(&mut scene).expect("push");
    assert_eq!(scene.live_count(), 0, "new context starts empty");
    scene.alloc(ObjectKind::Video);

    stack.pop(&mut scene).expect("pop");
    assert_eq!(scene.live_count(), 1);
    assert_eq!(scene.get(kept).expect("restored").tracetag.as_deref(), Some("menu"));
}

#[test]
fn external_push_carries_the_designated_object() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(4);
    let stays = scene.alloc(ObjectKind::Video);
    let carried = scene.alloc(ObjectKind::Video);
    scene.get_mut(carried).expect("live").tracetag = Some("proxy".to_string());

    let (depth, rehomed) = stack.push_external(&mut scene, carried).expect("push_external");
    assert_eq!(depth, 1);
    assert!(scene.is_alive(rehomed), "carried object exists in the new frame");
    assert_ne!(rehomed, carried, "re-homed under a fresh handle");
    assert_eq!(scene.get(rehomed).expect("carried").tracetag.as_deref(), Some("proxy"));
    assert_eq!(scene.live_count(), 1, "everything else stayed in the saved frame");

    let (depth, back) = stack.pop_external(&mut scene, rehomed).expect("pop_external");
    assert_eq!(depth, 0);
    assert!(scene.is_alive(back));
    assert!(scene.is_alive(stays), "saved frame restored around the carried object");
    assert_eq!(scene.live_count(), 2);
}

#[test]
fn external_variants_enforce_the_same_reserve() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(3);
    let carried = scene.alloc(ObjectKind::Video);
    let (_, carried) = stack.push_external(&mut scene, carried).expect("first push fits");
    let (_, carried) = stack.push_external(&mut scene, carried).expect("second push fits");
    assert_eq!(
        stack.push_external(&mut scene, carried).expect_err("reserve holds for the external variant"),
        ContextError::Exhausted
    );
    assert!(scene.is_alive(carried), "refused push must not consume the object");
}

#[test]
fn external_push_of_a_dead_object_is_refused() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(4);
    let gone = scene.alloc(ObjectKind::Video);
    scene.delete(gone);
    assert_eq!(
        stack.push_external(&mut scene, gone).expect_err("missing object"),
        ContextError::MissingObject(gone)
    );
    assert_eq!(stack.depth(), 0, "nothing was stacked");
}

#[test]
fn unwind_pops_everything_back_to_the_bottom_frame() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(8);
    let bottom = scene.alloc(ObjectKind::Video);
    stack.push(&mut scene).expect("push one");
    scene.alloc(ObjectKind::Video);
    stack.push(&mut scene).expect("push two");

    let unwound = stack.unwind(&mut scene);
    assert_eq!(unwound, 2);
    assert_eq!(stack.depth(), 0);
    assert!(scene.is_alive(bottom), "bottom frame is live again");
    assert_eq!(scene.live_count(), 1);
}

#[test]
fn empty_handle_is_reported_for_refused_external_pop() {
    let mut scene = SceneGraph::new();
    let mut stack = ContextStack::new(4);
    let object = scene.alloc(ObjectKind::Video);
    assert_eq!(
        stack.pop_external(&mut scene, object).expect_err("nothing stacked"),
        ContextError::Empty
    );
    assert!(scene.is_alive(object), "refused pop must not consume the object");
    assert_ne!(object, ObjectHandle::NONE);
}
