use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::handle::ObjectHandle;
use crate::registry::CallbackHandle;

bitflags! {
    /// Keyboard modifier state carried on translated key events. The bit
    /// layout is part of the script-visible protocol (`modifiers` field).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyModifiers: u16 {
        const LSHIFT   = 0x0001;
        const RSHIFT   = 0x0002;
        const LCTRL    = 0x0040;
        const RCTRL    = 0x0080;
        const LALT     = 0x0100;
        const RALT     = 0x0200;
        const LMETA    = 0x0400;
        const RMETA    = 0x0800;
        const NUMLOCK  = 0x1000;
        const CAPSLOCK = 0x2000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Mouse,
    Joystick,
}

impl DeviceKind {
    pub fn label(self) -> &'static str {
        match self {
            DeviceKind::Mouse => "mouse",
            DeviceKind::Joystick => "joystick",
        }
    }
}

pub type AxisSamples = SmallVec<[i16; 8]>;

#[derive(Debug, Clone)]
pub enum IoEvent {
    Analog { device: DeviceKind, devid: u16, subid: u16, samples: AxisSamples, relative: bool },
    Touch { devid: u16, subid: u16, pressure: f32, size: f32, x: i16, y: i16 },
    Digital(DigitalInput),
}

#[derive(Debug, Clone)]
pub enum DigitalInput {
    /// Keyboard events that went through layout translation.
    Translated { devid: u16, subid: u16, scancode: u32, keysym: u32, modifiers: KeyModifiers, active: bool },
    /// Raw button state from mice and game devices.
    Untranslated { device: DeviceKind, devid: u16, subid: u16, active: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    Launched,
    Shutdown,
}

impl SystemEvent {
    pub fn label(self) -> &'static str {
        match self {
            SystemEvent::Launched => "launched",
            SystemEvent::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone)]
pub enum NetEvent {
    Connected { id: u32, host: String },
    Disconnected { id: u32, host: String },
    NoResponse { host: String },
    Message { id: u32, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Text,
    Overlay,
}

impl StreamKind {
    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Text => "text",
            StreamKind::Overlay => "overlay",
        }
    }
}

/// Notices raised by an external companion process through its proxy object.
#[derive(Debug, Clone)]
pub enum ExternalEvent {
    Ident(String),
    Message(String),
    Failure { code: i32 },
    FrameStatus { frame: u64 },
    StreamInfo { lang: String, stream_id: u32, kind: StreamKind },
    StreamStatus { position: String, limit: String, completion: f32, frame: u64, streaming: bool },
    StateSize(u64),
    Resource(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameserverEvent {
    Looped,
    Terminated,
    Resized { width: u32, height: u32, mirrored: bool, source_audio: ObjectHandle },
}

#[derive(Debug, Clone)]
pub enum VideoEvent {
    Expired,
    Scaled,
    Moved,
    Blended,
    Rotated,
    /// Async image decode finished; the one-shot completion callback rides in
    /// the event itself rather than in a stored binding.
    ImageLoaded { width: u32, height: u32, callback: Option<CallbackHandle> },
    ImageLoadFailed { resource: String, width: u32, height: u32, callback: Option<CallbackHandle> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEvent {
    BufferUnderrun,
    GainTransformed,
    PlaybackFinished,
    PlaybackAborted,
    ObjectGone,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    System(SystemEvent),
    Io(IoEvent),
    Timer { tick: u64, pulses: u32 },
    Net { source: ObjectHandle, kind: NetEvent },
    External { source: ObjectHandle, kind: ExternalEvent },
    Frameserver { source: ObjectHandle, kind: FrameserverEvent },
    Video { source: ObjectHandle, kind: VideoEvent },
    Audio { source: ObjectHandle, kind: AudioEvent },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    System,
    Io,
    Timer,
    Net,
    External,
    Frameserver,
    Video,
    Audio,
}

impl EventCategory {
    pub fn label(self) -> &'static str {
        match self {
            EventCategory::System => "system",
            EventCategory::Io => "input",
            EventCategory::Timer => "clock",
            EventCategory::Net => "net",
            EventCategory::External => "external",
            EventCategory::Frameserver => "frameserver",
            EventCategory::Video => "video",
            EventCategory::Audio => "audio",
        }
    }
}

impl EngineEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            EngineEvent::System(_) => EventCategory::System,
            EngineEvent::Io(_) => EventCategory::Io,
            EngineEvent::Timer { .. } => EventCategory::Timer,
            EngineEvent::Net { .. } => EventCategory::Net,
            EngineEvent::External { .. } => EventCategory::External,
            EngineEvent::Frameserver { .. } => EventCategory::Frameserver,
            EngineEvent::Video { .. } => EventCategory::Video,
            EngineEvent::Audio { .. } => EventCategory::Audio,
        }
    }

    /// The object an event is attributed to, when it names one.
    pub fn source(&self) -> Option<ObjectHandle> {
        match self {
            EngineEvent::System(_) | EngineEvent::Io(_) | EngineEvent::Timer { .. } => None,
            EngineEvent::Net { source, .. }
            | EngineEvent::External { source, .. }
            | EngineEvent::Frameserver { source, .. }
            | EngineEvent::Video { source, .. }
            | EngineEvent::Audio { source, .. } => Some(*source),
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source() {
            Some(source) => write!(f, "{} event (source {})", self.category().label(), source),
            None => write!(f, "{} event", self.category().label()),
        }
    }
}

/// Per-tick event queue. The engine pushes as it produces, the bridge drains
/// once per tick and dispatches synchronously.
#[derive(Default)]
pub struct EventQueue {
    events: Vec<EngineEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
