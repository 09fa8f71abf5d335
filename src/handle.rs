use std::fmt;

use log::info;
use rand::Rng;
use thiserror::Error;

/// Engine-side identifier for a video or audio object owned by the scene
/// graph. Script-visible values are produced by [`HandleCodec`]; never hand a
/// raw handle to a script directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(i64);

impl ObjectHandle {
    /// "No object". Also what `decode` yields for anything unrecognizable.
    pub const NONE: ObjectHandle = ObjectHandle(-1);
    /// The implicit top-level display surface.
    pub const ROOT: ObjectHandle = ObjectHandle(0);

    pub(crate) fn from_raw(raw: i64) -> Self {
        ObjectHandle(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::NONE || self == Self::ROOT
    }

    /// True for handles that can name an allocated object.
    pub fn is_object(self) -> bool {
        self.0 >= 1
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ObjectHandle::NONE => write!(f, "none"),
            ObjectHandle::ROOT => write!(f, "root"),
            ObjectHandle(raw) => write!(f, "{raw}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("bad object id {raw} passed to {callsite}")]
pub struct BadHandle {
    pub raw: i64,
    pub callsite: &'static str,
}

/// Bidirectional mapping between engine handles and the numeric identifiers
/// scripts see. All non-sentinel handles are shifted by a process-lifetime
/// offset; the sentinels always map to themselves.
pub struct HandleCodec {
    base: i64,
}

impl HandleCodec {
    pub fn new() -> Self {
        HandleCodec { base: 0 }
    }

    /// Diagnostic-mode constructor: a randomized offset makes any script that
    /// hardcodes raw engine indices observably broken instead of silently
    /// working on one machine.
    pub fn scrambled() -> Self {
        let base = rand::thread_rng().gen_range(1..32_768);
        info!("handle codec base set to {base}");
        HandleCodec { base }
    }

    pub fn base(&self) -> i64 {
        self.base
    }

    pub fn encode(&self, handle: ObjectHandle) -> i64 {
        if handle.is_sentinel() {
            handle.raw()
        } else {
            handle.raw() + self.base
        }
    }

    /// Lenient decode used on hot input-validation paths: anything that does
    /// not decode to a representable handle comes back as `NONE`.
    pub fn decode(&self, external: i64) -> ObjectHandle {
        if external == ObjectHandle::NONE.raw() {
            return ObjectHandle::NONE;
        }
        if external == ObjectHandle::ROOT.raw() {
            return ObjectHandle::ROOT;
        }
        let raw = external - self.base;
        if raw >= 1 {
            ObjectHandle::from_raw(raw)
        } else {
            ObjectHandle::NONE
        }
    }

    /// Strict decode for required operation arguments. A script passing a
    /// value that decodes to `NONE` here is an application bug and must be
    /// surfaced, not ignored.
    pub fn decode_strict(&self, external: i64, callsite: &'static str) -> Result<ObjectHandle, BadHandle> {
        let handle = self.decode(external);
        if handle.is_none() {
            Err(BadHandle { raw: external, callsite })
        } else {
            Ok(handle)
        }
    }

    /// Audio identifiers cross the boundary unmodified; kept as explicit
    /// passes so call-sites stay symmetrical with the video side.
    pub fn encode_audio(&self, handle: ObjectHandle) -> i64 {
        handle.raw()
    }

    pub fn decode_audio(&self, external: i64) -> ObjectHandle {
        ObjectHandle::from_raw(external)
    }
}

impl Default for HandleCodec {
    fn default() -> Self {
        Self::new()
    }
}
