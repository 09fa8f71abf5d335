use thiserror::Error;

use crate::handle::ObjectHandle;
use crate::scene::{SceneGraph, SceneSnapshot};

pub const DEFAULT_CONTEXT_DEPTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// Pushing would consume the frame held in reserve for external-process
    /// launch.
    #[error("context stack exhausted, the reserve frame must stay free")]
    Exhausted,
    #[error("context stack is empty")]
    Empty,
    #[error("object {0} does not exist in the current context")]
    MissingObject(ObjectHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    /// Frames in use, the active context included.
    pub active: usize,
    pub limit: usize,
}

/// Bounded stack of whole scene-graph snapshots. One frame slot is always
/// kept in reserve so launching an external process is guaranteed a free
/// frame to allocate into.
pub struct ContextStack {
    frames: Vec<SceneSnapshot>,
    limit: usize,
}

impl ContextStack {
    pub fn new(limit: usize) -> Self {
        ContextStack { frames: Vec::new(), limit: limit.max(2) }
    }

    fn free(&self) -> usize {
        self.limit - self.frames.len()
    }

    /// Snapshot the live graph and switch to a fresh, empty context. Returns
    /// the new stacked depth. Refused once only the reserve frame remains.
    pub fn push(&mut self, scene: &mut SceneGraph) -> Result<usize, ContextError> {
        if self.free() < 2 {
            return Err(ContextError::Exhausted);
        }
        self.frames.push(scene.snapshot());
        scene.clear();
        Ok(self.frames.len())
    }

    /// Discard the live graph and restore the most recent frame. Returns the
    /// stacked depth after the pop.
    pub fn pop(&mut self, scene: &mut SceneGraph) -> Result<usize, ContextError> {
        let frame = self.frames.pop().ok_or(ContextError::Empty)?;
        scene.restore(frame);
        Ok(self.frames.len())
    }

    /// Like `push`, but one designated object is carried across into the new
    /// context instead of being saved with the old one. Its re-homed handle
    /// is returned alongside the depth.
    pub fn push_external(
        &mut self,
        scene: &mut SceneGraph,
        keep: ObjectHandle,
    ) -> Result<(usize, ObjectHandle), ContextError> {
        if self.free() < 2 {
            return Err(ContextError::Exhausted);
        }
        let carried = scene.delete(keep).ok_or(ContextError::MissingObject(keep))?;
        self.frames.push(scene.snapshot());
        scene.clear();
        let rehomed = scene.adopt(carried);
        Ok((self.frames.len(), rehomed))
    }

    /// Like `pop`, but one designated object survives into the restored
    /// context under a fresh handle.
    pub fn pop_external(
        &mut self,
        scene: &mut SceneGraph,
        keep: ObjectHandle,
    ) -> Result<(usize, ObjectHandle), ContextError> {
        if self.frames.is_empty() {
            return Err(ContextError::Empty);
        }
        let carried = scene.delete(keep).ok_or(ContextError::MissingObject(keep))?;
        let frame = self.frames.pop().expect("checked non-empty above");
        scene.restore(frame);
        let rehomed = scene.adopt(carried);
        Ok((self.frames.len(), rehomed))
    }

    /// Pop every stacked frame, leaving the bottom-most context live. Used by
    /// the fatal-fault path. Returns the number of frames unwound.
    pub fn unwind(&mut self, scene: &mut SceneGraph) -> usize {
        let mut count = 0;
        while let Some(frame) = self.frames.pop() {
            scene.restore(frame);
            count += 1;
        }
        count
    }

    pub fn usage(&self) -> ContextUsage {
        ContextUsage { active: self.frames.len() + 1, limit: self.limit }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[SceneSnapshot] {
        &self.frames
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_DEPTH)
    }
}
