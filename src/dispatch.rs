use log::debug;
use rhai::{Dynamic, Map};

use crate::context::ContextStack;
use crate::escalation::{DispatchSource, Escalation, FaultAction, SourceKind};
use crate::events::{
    AudioEvent, DigitalInput, EngineEvent, ExternalEvent, FrameserverEvent, IoEvent, NetEvent,
    SystemEvent, VideoEvent,
};
use crate::frameserver;
use crate::handle::{HandleCodec, ObjectHandle};
use crate::registry::{CallbackHandle, CallbackRegistry};
use crate::scene::SceneGraph;
use crate::script::{CallOutcome, Convention, ScriptFault, ScriptHost};

/// Where one event ends up, resolved once per event: either the callback
/// registered against the source object, or a globally named convention
/// entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    Bound(CallbackHandle),
    Convention(Convention),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The application defines no handler for this category; not an error.
    NoHandler,
    /// The source object was reclaimed before the event was processed.
    DroppedDangling,
    /// System events stop after payload staging; the entry point only fires
    /// for explicit lifecycle calls.
    SystemTableOnly,
    /// The handler faulted but the escalation policy kept the engine alive.
    Faulted,
    /// The handler faulted and the policy requires termination.
    Fatal,
}

/// Everything one dispatch may touch, borrowed explicitly for the duration
/// of the call instead of living in process globals.
pub struct DispatchWorld<'a> {
    pub scene: &'a mut SceneGraph,
    pub host: &'a mut ScriptHost,
    pub registry: &'a mut CallbackRegistry,
    pub escalation: &'a mut Escalation,
    pub stack: &'a mut ContextStack,
}

/// Translates tagged engine events into script invocations. Stateless apart
/// from the identifier codec; all mutable state comes in through
/// [`DispatchWorld`].
pub struct Translator {
    codec: HandleCodec,
}

impl Translator {
    pub fn new(codec: HandleCodec) -> Self {
        Translator { codec }
    }

    pub fn codec(&self) -> &HandleCodec {
        &self.codec
    }

    pub fn dispatch(&self, event: &EngineEvent, world: &mut DispatchWorld) -> DispatchOutcome {
        match event {
            EngineEvent::System(kind) => self.dispatch_system(*kind, world),
            EngineEvent::Io(io) => self.dispatch_io(io, world),
            EngineEvent::Timer { tick, pulses } => self.dispatch_timer(*tick, *pulses, world),
            EngineEvent::Net { source, kind } => self.dispatch_net(*source, kind, world),
            EngineEvent::External { source, kind } => self.dispatch_external(*source, kind, world),
            EngineEvent::Frameserver { source, kind } => {
                self.dispatch_frameserver(*source, kind, world)
            }
            EngineEvent::Video { source, kind } => self.dispatch_video(*source, kind, world),
            EngineEvent::Audio { source, kind } => self.dispatch_audio(*source, kind, world),
        }
    }

    fn dispatch_system(&self, kind: SystemEvent, world: &mut DispatchWorld) -> DispatchOutcome {
        let symbol = world.host.convention_symbol(Convention::System);
        if !world.host.has_symbol(&symbol) {
            return DispatchOutcome::NoHandler;
        }
        let mut tbl = Map::new();
        tbl_str(&mut tbl, "kind", kind.label());
        debug!("system event ({}) staged for {symbol}, not delivered", kind.label());
        DispatchOutcome::SystemTableOnly
    }

    fn dispatch_io(&self, io: &IoEvent, world: &mut DispatchWorld) -> DispatchOutcome {
        let payload = io_payload(io);
        self.invoke_convention(world, Convention::Input, vec![payload.into()])
    }

    fn dispatch_timer(&self, tick: u64, pulses: u32, world: &mut DispatchWorld) -> DispatchOutcome {
        world.host.set_tick(tick);
        world.escalation.note_tick(tick);
        let args = vec![Dynamic::from(tick as i64), Dynamic::from(pulses as i64)];
        self.invoke_convention(world, Convention::ClockPulse, args)
    }

    fn dispatch_net(
        &self,
        source: ObjectHandle,
        kind: &NetEvent,
        world: &mut DispatchWorld,
    ) -> DispatchOutcome {
        if self.dangling(world, source) {
            return DispatchOutcome::DroppedDangling;
        }
        let mut tbl = Map::new();
        match kind {
            NetEvent::Connected { id, host } => {
                tbl_str(&mut tbl, "kind", "connected");
                tbl_int(&mut tbl, "id", *id as i64);
                tbl_str(&mut tbl, "host", host);
            }
            NetEvent::Disconnected { id, host } => {
                tbl_str(&mut tbl, "kind", "disconnected");
                tbl_int(&mut tbl, "id", *id as i64);
                tbl_str(&mut tbl, "host", host);
            }
            NetEvent::NoResponse { host } => {
                tbl_str(&mut tbl, "kind", "noresponse");
                tbl_str(&mut tbl, "host", host);
            }
            NetEvent::Message { id, text } => {
                tbl_str(&mut tbl, "kind", "message");
                tbl_str(&mut tbl, "message", text);
                tbl_int(&mut tbl, "id", *id as i64);
            }
        }
        self.deliver_source_event(world, source, tbl, Convention::NetEvent, "event_net")
    }

    fn dispatch_external(
        &self,
        source: ObjectHandle,
        kind: &ExternalEvent,
        world: &mut DispatchWorld,
    ) -> DispatchOutcome {
        if self.dangling(world, source) {
            return DispatchOutcome::DroppedDangling;
        }
        // a proxy that died during initialization can leave queued notices
        // behind without ever having carried frameserver state
        match world.scene.get(source) {
            Some(object) if object.frameserver.is_some() => {}
            _ => {
                debug!("dropping external notice for non-frameserver object {source}");
                return DispatchOutcome::DroppedDangling;
            }
        }
        let mut tbl = Map::new();
        match kind {
            ExternalEvent::Ident(message) => {
                tbl_str(&mut tbl, "kind", "ident");
                tbl_str(&mut tbl, "message", message);
            }
            ExternalEvent::Message(message) => {
                tbl_str(&mut tbl, "kind", "message");
                tbl_str(&mut tbl, "message", message);
            }
            ExternalEvent::Failure { code } => {
                tbl_str(&mut tbl, "kind", "failure");
                tbl_int(&mut tbl, "code", *code as i64);
            }
            ExternalEvent::FrameStatus { frame } => {
                tbl_str(&mut tbl, "kind", "frame");
                tbl_int(&mut tbl, "frame", *frame as i64);
            }
            ExternalEvent::StreamInfo { lang, stream_id, kind } => {
                tbl_str(&mut tbl, "kind", "streaminfo");
                tbl_str(&mut tbl, "lang", lang);
                tbl_int(&mut tbl, "streamid", *stream_id as i64);
                tbl_str(&mut tbl, "type", kind.label());
            }
            ExternalEvent::StreamStatus { position, limit, completion, frame, streaming } => {
                tbl_str(&mut tbl, "kind", "streamstatus");
                tbl_str(&mut tbl, "ctime", position);
                tbl_str(&mut tbl, "endtime", limit);
                tbl_float(&mut tbl, "completion", *completion as f64);
                tbl_int(&mut tbl, "frameno", *frame as i64);
                tbl_bool(&mut tbl, "streaming", *streaming);
            }
            ExternalEvent::StateSize(size) => {
                tbl_str(&mut tbl, "kind", "state_size");
                tbl_int(&mut tbl, "state_size", *size as i64);
            }
            ExternalEvent::Resource(message) => {
                tbl_str(&mut tbl, "kind", "resource_status");
                tbl_str(&mut tbl, "message", message);
            }
        }
        self.deliver_source_event(world, source, tbl, Convention::FrameserverEvent, "event_external")
    }

    fn dispatch_frameserver(
        &self,
        source: ObjectHandle,
        kind: &FrameserverEvent,
        world: &mut DispatchWorld,
    ) -> DispatchOutcome {
        if self.dangling(world, source) {
            return DispatchOutcome::DroppedDangling;
        }
        let mut tbl = Map::new();
        match kind {
            FrameserverEvent::Looped => tbl_str(&mut tbl, "kind", "frameserver_loop"),
            FrameserverEvent::Terminated => tbl_str(&mut tbl, "kind", "frameserver_terminated"),
            FrameserverEvent::Resized { width, height, mirrored, source_audio } => {
                tbl_str(&mut tbl, "kind", "resized");
                tbl_int(&mut tbl, "width", *width as i64);
                tbl_int(&mut tbl, "height", *height as i64);
                tbl_bool(&mut tbl, "mirrored", *mirrored);
                tbl_int(&mut tbl, "source_audio", self.codec.encode_audio(*source_audio));
            }
        }
        self.deliver_source_event(world, source, tbl, Convention::FrameserverEvent, "frameserver_event")
    }

    fn dispatch_video(
        &self,
        source: ObjectHandle,
        kind: &VideoEvent,
        world: &mut DispatchWorld,
    ) -> DispatchOutcome {
        if self.dangling(world, source) {
            return DispatchOutcome::DroppedDangling;
        }
        let mut tbl = Map::new();
        let mut one_shot: Option<CallbackHandle> = None;
        let callsite;
        match kind {
            VideoEvent::Expired => {
                tbl_str(&mut tbl, "kind", "expired");
                callsite = "video_event(expire)";
            }
            VideoEvent::Scaled => {
                tbl_str(&mut tbl, "kind", "scaled");
                callsite = "video_event(scale)";
            }
            VideoEvent::Moved => {
                tbl_str(&mut tbl, "kind", "moved");
                callsite = "video_event(move)";
            }
            VideoEvent::Blended => {
                tbl_str(&mut tbl, "kind", "blended");
                callsite = "video_event(blend)";
            }
            VideoEvent::Rotated => {
                tbl_str(&mut tbl, "kind", "rotated");
                callsite = "video_event(rotate)";
            }
            VideoEvent::ImageLoaded { width, height, callback } => {
                tbl_str(&mut tbl, "kind", "loaded");
                tbl_int(&mut tbl, "width", *width as i64);
                tbl_int(&mut tbl, "height", *height as i64);
                one_shot = *callback;
                callsite = "video_event(image_loaded)";
            }
            VideoEvent::ImageLoadFailed { resource, width, height, callback } => {
                tbl_str(&mut tbl, "kind", "load_failed");
                tbl_str(&mut tbl, "resource", resource);
                tbl_int(&mut tbl, "width", *width as i64);
                tbl_int(&mut tbl, "height", *height as i64);
                one_shot = *callback;
                callsite = "video_event(image_load_fail)";
            }
        }
        let args = vec![Dynamic::from(self.codec.encode(source)), tbl.into()];
        match one_shot {
            // the completion callback rides in the event and is consumed by
            // this single delivery
            Some(callback) => {
                self.invoke_bound(world, callback, source, SourceKind::Image, args, callsite, true)
            }
            None => self.invoke_convention(world, Convention::VideoEvent, args),
        }
    }

    fn dispatch_audio(
        &self,
        source: ObjectHandle,
        kind: &AudioEvent,
        world: &mut DispatchWorld,
    ) -> DispatchOutcome {
        if self.dangling(world, source) {
            return DispatchOutcome::DroppedDangling;
        }
        let mut tbl = Map::new();
        let label = match kind {
            AudioEvent::BufferUnderrun => "audio buffer underrun",
            AudioEvent::GainTransformed => "gain transformed",
            AudioEvent::PlaybackFinished => "playback finished",
            AudioEvent::PlaybackAborted => "playback aborted",
            AudioEvent::ObjectGone => "gone",
        };
        tbl_str(&mut tbl, "kind", label);
        let args = vec![Dynamic::from(self.codec.encode_audio(source)), tbl.into()];
        self.invoke_convention(world, Convention::AudioEvent, args)
    }

    /// The liveness probe: an event naming an already-reclaimed object is
    /// dropped so a dangling handle can never resurface in script space.
    fn dangling(&self, world: &DispatchWorld, source: ObjectHandle) -> bool {
        if world.scene.parent_of(source) == ObjectHandle::NONE {
            debug!("dropping event for reclaimed object {source}");
            true
        } else {
            false
        }
    }

    /// Resolve the target for an object-sourced event: a stored binding wins
    /// over the named convention entry.
    fn deliver_source_event(
        &self,
        world: &mut DispatchWorld,
        source: ObjectHandle,
        payload: Map,
        fallback: Convention,
        callsite: &str,
    ) -> DispatchOutcome {
        let args = vec![Dynamic::from(self.codec.encode(source)), payload.into()];
        let target = match frameserver::bound_callback(world.scene, source) {
            Some(callback) => DispatchTarget::Bound(callback),
            None => DispatchTarget::Convention(fallback),
        };
        match target {
            DispatchTarget::Bound(callback) => self.invoke_bound(
                world,
                callback,
                source,
                SourceKind::Frameserver,
                args,
                callsite,
                false,
            ),
            DispatchTarget::Convention(convention) => self.invoke_convention(world, convention, args),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn invoke_bound(
        &self,
        world: &mut DispatchWorld,
        callback: CallbackHandle,
        source: ObjectHandle,
        kind: SourceKind,
        args: Vec<Dynamic>,
        callsite: &str,
        one_shot: bool,
    ) -> DispatchOutcome {
        let Some(fn_ptr) = world.registry.get(callback).cloned() else {
            // harmless race between object death and in-flight events
            debug!("callback for {source} no longer registered, ignoring");
            return DispatchOutcome::NoHandler;
        };
        world.escalation.set_source(DispatchSource { object: source, kind });
        let result = world.host.call_fnptr(&fn_ptr, args, callsite);
        let outcome = match result {
            Ok(_) => DispatchOutcome::Delivered,
            Err(fault) => self.escalate(world, fault),
        };
        world.escalation.clear_source();
        if one_shot {
            world.registry.release(callback);
        }
        outcome
    }

    fn invoke_convention(
        &self,
        world: &mut DispatchWorld,
        convention: Convention,
        args: Vec<Dynamic>,
    ) -> DispatchOutcome {
        match world.host.call_convention(convention, args) {
            Ok(CallOutcome::Called) => DispatchOutcome::Delivered,
            Ok(CallOutcome::Missing) => DispatchOutcome::NoHandler,
            Err(fault) => self.escalate(world, fault),
        }
    }

    fn escalate(&self, world: &mut DispatchWorld, fault: ScriptFault) -> DispatchOutcome {
        match world.escalation.script_fault(&fault, world.scene, world.stack, &self.codec) {
            FaultAction::Continue => DispatchOutcome::Faulted,
            FaultAction::Fatal => DispatchOutcome::Fatal,
        }
    }
}

fn io_payload(io: &IoEvent) -> Map {
    let mut tbl = Map::new();
    match io {
        IoEvent::Analog { device, devid, subid, samples, relative } => {
            tbl_str(&mut tbl, "kind", "analog");
            tbl_str(&mut tbl, "source", device.label());
            tbl_int(&mut tbl, "devid", *devid as i64);
            tbl_int(&mut tbl, "subid", *subid as i64);
            tbl_bool(&mut tbl, "active", true);
            tbl_bool(&mut tbl, "relative", *relative);
            let samples: Vec<Dynamic> =
                samples.iter().map(|sample| Dynamic::from(*sample as i64)).collect();
            tbl.insert("samples".into(), samples.into());
        }
        IoEvent::Touch { devid, subid, pressure, size, x, y } => {
            tbl_str(&mut tbl, "kind", "touch");
            tbl_int(&mut tbl, "devid", *devid as i64);
            tbl_int(&mut tbl, "subid", *subid as i64);
            tbl_float(&mut tbl, "pressure", *pressure as f64);
            tbl_float(&mut tbl, "size", *size as f64);
            tbl_int(&mut tbl, "x", *x as i64);
            tbl_int(&mut tbl, "y", *y as i64);
        }
        IoEvent::Digital(DigitalInput::Translated {
            devid,
            subid,
            scancode,
            keysym,
            modifiers,
            active,
        }) => {
            tbl_str(&mut tbl, "kind", "digital");
            tbl_bool(&mut tbl, "translated", true);
            tbl_int(&mut tbl, "number", *scancode as i64);
            tbl_int(&mut tbl, "keysym", *keysym as i64);
            tbl_int(&mut tbl, "modifiers", modifiers.bits() as i64);
            tbl_int(&mut tbl, "devid", *devid as i64);
            tbl_int(&mut tbl, "subid", *subid as i64);
            tbl_str(&mut tbl, "utf8", &keysym_utf8(*keysym));
            tbl_bool(&mut tbl, "active", *active);
            tbl_str(&mut tbl, "device", "translated");
            tbl_str(&mut tbl, "subdevice", "keyboard");
        }
        IoEvent::Digital(DigitalInput::Untranslated { device, devid, subid, active }) => {
            tbl_str(&mut tbl, "kind", "digital");
            tbl_str(&mut tbl, "source", device.label());
            tbl_bool(&mut tbl, "translated", false);
            tbl_int(&mut tbl, "devid", *devid as i64);
            tbl_int(&mut tbl, "subid", *subid as i64);
            tbl_bool(&mut tbl, "active", *active);
        }
    }
    tbl
}

/// UTF-8 form of a translated key symbol; empty when the symbol has no
/// printable representation.
fn keysym_utf8(keysym: u32) -> String {
    char::from_u32(keysym).filter(|ch| !ch.is_control()).map(String::from).unwrap_or_default()
}

fn tbl_str(tbl: &mut Map, key: &str, value: &str) {
    tbl.insert(key.into(), value.into());
}

fn tbl_int(tbl: &mut Map, key: &str, value: i64) {
    tbl.insert(key.into(), value.into());
}

fn tbl_float(tbl: &mut Map, key: &str, value: f64) {
    tbl.insert(key.into(), value.into());
}

fn tbl_bool(tbl: &mut Map, key: &str, value: bool) {
    tbl.insert(key.into(), value.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KeyModifiers;

    #[test]
    fn translated_key_payload_carries_protocol_fields() {
        let event = IoEvent::Digital(DigitalInput::Translated {
            devid: 0,
            subid: 97,
            scancode: 30,
            keysym: 97,
            modifiers: KeyModifiers::LSHIFT,
            active: true,
        });
        let tbl = io_payload(&event);
        assert_eq!(tbl.get("kind").expect("kind").clone().into_string().expect("str"), "digital");
        assert_eq!(tbl.get("number").expect("number").as_int().expect("int"), 30);
        assert_eq!(tbl.get("utf8").expect("utf8").clone().into_string().expect("str"), "a");
        assert_eq!(
            tbl.get("modifiers").expect("modifiers").as_int().expect("int"),
            KeyModifiers::LSHIFT.bits() as i64
        );
        assert!(tbl.get("active").expect("active").as_bool().expect("bool"));
    }

    #[test]
    fn analog_payload_preserves_sample_order() {
        let event = IoEvent::Analog {
            device: crate::events::DeviceKind::Mouse,
            devid: 1,
            subid: 0,
            samples: [3i16, -4, 11].into_iter().collect(),
            relative: true,
        };
        let tbl = io_payload(&event);
        let samples: rhai::Array =
            tbl.get("samples").expect("samples").clone().into_array().expect("array");
        let values: Vec<i64> = samples.into_iter().map(|v| v.as_int().expect("int")).collect();
        assert_eq!(values, vec![3, -4, 11]);
        assert!(tbl.get("relative").expect("relative").as_bool().expect("bool"));
    }
}
