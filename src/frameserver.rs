use thiserror::Error;

use crate::handle::ObjectHandle;
use crate::registry::{CallbackHandle, CallbackRegistry};
use crate::scene::{ObjectKind, SceneGraph, SceneObject};

/// What kind of feed an external companion process delivers through its
/// proxy object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Media,
    Net,
    Interactive,
}

impl FeedKind {
    pub fn label(self) -> &'static str {
        match self {
            FeedKind::Media => "media",
            FeedKind::Net => "net",
            FeedKind::Interactive => "interactive",
        }
    }
}

/// Proxy-side state for an external process, carried by the scene object
/// that represents it. The transport itself lives outside the bridge; only
/// the bookkeeping the translator needs is kept here.
#[derive(Debug, Clone)]
pub struct FrameserverState {
    pub feed: FeedKind,
    pub looping: bool,
    pub callback: Option<CallbackHandle>,
}

impl FrameserverState {
    pub fn new(feed: FeedKind) -> Self {
        FrameserverState { feed, looping: false, callback: None }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("object {0} is not alive")]
    DeadObject(ObjectHandle),
    #[error("object {0} is not a frameserver proxy")]
    NotFrameserver(ObjectHandle),
}

/// Allocate a video object acting as the proxy for an external process.
pub fn spawn_proxy(scene: &mut SceneGraph, feed: FeedKind, looping: bool) -> ObjectHandle {
    let handle = scene.alloc(ObjectKind::Video);
    if let Some(object) = scene.get_mut(handle) {
        let mut state = FrameserverState::new(feed);
        state.looping = looping;
        object.frameserver = Some(state);
    }
    handle
}

/// Attach a callback binding to a proxy object. At most one binding exists
/// per object; rebinding releases the previous registry slot first so the
/// slot is returned exactly once.
pub fn bind_callback(
    scene: &mut SceneGraph,
    registry: &mut CallbackRegistry,
    handle: ObjectHandle,
    callback: CallbackHandle,
) -> Result<(), BindError> {
    let Some(object) = scene.get_mut(handle) else {
        return Err(BindError::DeadObject(handle));
    };
    let Some(state) = object.frameserver.as_mut() else {
        return Err(BindError::NotFrameserver(handle));
    };
    if let Some(previous) = state.callback.take() {
        registry.release(previous);
    }
    state.callback = Some(callback);
    Ok(())
}

pub fn bound_callback(scene: &SceneGraph, handle: ObjectHandle) -> Option<CallbackHandle> {
    scene.get(handle)?.frameserver.as_ref()?.callback
}

/// Return a dead object's registry slot. Called once when the owning object
/// is reclaimed; the release itself is idempotent.
pub fn release_object_bindings(registry: &mut CallbackRegistry, object: &SceneObject) {
    if let Some(state) = object.frameserver.as_ref() {
        if let Some(callback) = state.callback {
            registry.release(callback);
        }
    }
}
