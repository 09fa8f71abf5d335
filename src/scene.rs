use std::collections::BTreeMap;

use log::debug;

use crate::frameserver::FrameserverState;
use crate::handle::ObjectHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Video,
    Audio,
}

impl ObjectKind {
    pub fn label(self) -> &'static str {
        match self {
            ObjectKind::Video => "video",
            ObjectKind::Audio => "audio",
        }
    }
}

/// One engine-owned object. The rendering and audio subsystems own the heavy
/// state; the bridge only tracks what it needs for identity, liveness and
/// diagnostics.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub kind: ObjectKind,
    pub parent: ObjectHandle,
    pub lifetime: Option<u32>,
    pub position: [f32; 2],
    pub scale: [f32; 2],
    pub rotation: f32,
    pub opacity: f32,
    pub order: i32,
    pub tracetag: Option<String>,
    pub frameserver: Option<FrameserverState>,
}

impl SceneObject {
    fn new(kind: ObjectKind) -> Self {
        SceneObject {
            kind,
            parent: ObjectHandle::ROOT,
            lifetime: None,
            position: [0.0, 0.0],
            scale: [1.0, 1.0],
            rotation: 0.0,
            opacity: 1.0,
            order: 0,
            tracetag: None,
            frameserver: None,
        }
    }
}

/// Whole-graph snapshot used as a context frame. Opaque outside the crate;
/// the context stack and the state dump iterate it.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    objects: BTreeMap<i64, SceneObject>,
}

impl SceneSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &SceneObject)> {
        self.objects.iter().map(|(raw, object)| (ObjectHandle::from_raw(*raw), object))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// The live object graph. Handles are allocated monotonically and never
/// reused within a process, so a destroyed handle can only ever probe dead.
pub struct SceneGraph {
    objects: BTreeMap<i64, SceneObject>,
    next_id: i64,
}

impl SceneGraph {
    pub fn new() -> Self {
        SceneGraph { objects: BTreeMap::new(), next_id: 1 }
    }

    pub fn alloc(&mut self, kind: ObjectKind) -> ObjectHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, SceneObject::new(kind));
        ObjectHandle::from_raw(id)
    }

    /// Re-home an object taken out of another context frame. A fresh handle
    /// is assigned; the old one stays dead.
    pub(crate) fn adopt(&mut self, object: SceneObject) -> ObjectHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        ObjectHandle::from_raw(id)
    }

    /// Remove an object, returning it so the caller can release any registry
    /// bindings it carried. Children are re-linked to the root surface.
    pub fn delete(&mut self, handle: ObjectHandle) -> Option<SceneObject> {
        let removed = self.objects.remove(&handle.raw())?;
        for object in self.objects.values_mut() {
            if object.parent == handle {
                object.parent = ObjectHandle::ROOT;
            }
        }
        debug!("reclaimed object {handle}");
        Some(removed)
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&SceneObject> {
        self.objects.get(&handle.raw())
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut SceneObject> {
        self.objects.get_mut(&handle.raw())
    }

    pub fn is_alive(&self, handle: ObjectHandle) -> bool {
        handle == ObjectHandle::ROOT || self.objects.contains_key(&handle.raw())
    }

    /// The liveness probe used before dispatch: `NONE` means the handle was
    /// already reclaimed and any event naming it is dangling.
    pub fn parent_of(&self, handle: ObjectHandle) -> ObjectHandle {
        if handle == ObjectHandle::ROOT {
            return ObjectHandle::ROOT;
        }
        match self.objects.get(&handle.raw()) {
            Some(object) => object.parent,
            None => ObjectHandle::NONE,
        }
    }

    pub fn link(&mut self, child: ObjectHandle, parent: ObjectHandle) -> bool {
        if !self.is_alive(parent) && parent != ObjectHandle::ROOT {
            return false;
        }
        match self.objects.get_mut(&child.raw()) {
            Some(object) => {
                object.parent = parent;
                true
            }
            None => false,
        }
    }

    pub fn set_lifetime(&mut self, handle: ObjectHandle, ticks: u32) -> bool {
        match self.objects.get_mut(&handle.raw()) {
            Some(object) => {
                object.lifetime = Some(ticks);
                true
            }
            None => false,
        }
    }

    /// Advance lifetime counters by one tick. Objects whose counter reaches
    /// zero are reported but left alive: the expire notice must still be
    /// dispatchable, so the caller reaps them after the queue drains.
    pub fn tick_lifetimes(&mut self) -> Vec<ObjectHandle> {
        let mut expired = Vec::new();
        for (raw, object) in self.objects.iter_mut() {
            if let Some(remaining) = object.lifetime.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                }
                if *remaining == 0 {
                    expired.push(ObjectHandle::from_raw(*raw));
                }
            }
        }
        expired
    }

    pub fn live_count(&self) -> usize {
        self.objects.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &SceneObject)> {
        self.objects.iter().map(|(raw, object)| (ObjectHandle::from_raw(*raw), object))
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot { objects: self.objects.clone() }
    }

    pub fn restore(&mut self, snapshot: SceneSnapshot) {
        self.objects = snapshot.objects;
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_probe_distinguishes_live_and_reclaimed() {
        let mut scene = SceneGraph::new();
        let a = scene.alloc(ObjectKind::Video);
        let b = scene.alloc(ObjectKind::Video);
        assert!(scene.link(b, a));
        assert_eq!(scene.parent_of(b), a);
        scene.delete(a);
        assert_eq!(scene.parent_of(a), ObjectHandle::NONE);
        // orphaned children fall back to the root surface
        assert_eq!(scene.parent_of(b), ObjectHandle::ROOT);
    }

    #[test]
    fn lifetimes_report_but_do_not_reap() {
        let mut scene = SceneGraph::new();
        let short = scene.alloc(ObjectKind::Video);
        let long = scene.alloc(ObjectKind::Video);
        scene.set_lifetime(short, 1);
        scene.set_lifetime(long, 3);
        let expired = scene.tick_lifetimes();
        assert_eq!(expired, vec![short]);
        assert!(scene.is_alive(short), "expired objects are reaped by the caller, not here");
    }

    #[test]
    fn snapshot_restore_round_trip_preserves_objects() {
        let mut scene = SceneGraph::new();
        let a = scene.alloc(ObjectKind::Video);
        scene.get_mut(a).expect("live").tracetag = Some("background".to_string());
        let snap = scene.snapshot();
        scene.clear();
        assert_eq!(scene.live_count(), 0);
        scene.restore(snap);
        assert_eq!(scene.live_count(), 1);
        assert_eq!(scene.get(a).expect("restored").tracetag.as_deref(), Some("background"));
    }

    #[test]
    fn handles_are_never_reused() {
        let mut scene = SceneGraph::new();
        let a = scene.alloc(ObjectKind::Video);
        scene.delete(a);
        let b = scene.alloc(ObjectKind::Video);
        assert_ne!(a, b);
        assert!(!scene.is_alive(a));
    }
}
