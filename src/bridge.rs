use std::io::Write;

use anyhow::Result;
use log::warn;
use rhai::FnPtr;

use crate::config::BridgeConfig;
use crate::context::{ContextStack, ContextUsage};
use crate::dispatch::{DispatchOutcome, DispatchWorld, Translator};
use crate::escalation::{Escalation, FatalFault, FaultAction, RunMode};
use crate::events::{EngineEvent, EventQueue, VideoEvent};
use crate::frameserver;
use crate::handle::{HandleCodec, ObjectHandle};
use crate::registry::{CallbackHandle, CallbackRegistry};
use crate::scene::SceneGraph;
use crate::script::ScriptHost;
use crate::statesnap;
use crate::time::TickClock;

/// The bridge singleton: one instance per scripting runtime, created when
/// the runtime comes up and torn down with the process. Owns the script
/// host, the callback registry, the identifier codec, the escalation state
/// and the context stack; the scene graph stays with the engine and is
/// borrowed per call.
pub struct Bridge {
    host: ScriptHost,
    registry: CallbackRegistry,
    translator: Translator,
    escalation: Escalation,
    stack: ContextStack,
    clock: TickClock,
    queue: EventQueue,
}

impl Bridge {
    pub fn new(config: &BridgeConfig) -> Self {
        let host = ScriptHost::new(&config.appname, &config.script_path);
        Self::assemble(config, host)
    }

    /// Bridge over an inline script. Used by harness code and tests.
    pub fn with_source(config: &BridgeConfig, source: &str) -> Result<Self> {
        let host = ScriptHost::from_source(&config.appname, source)?;
        Ok(Self::assemble(config, host))
    }

    fn assemble(config: &BridgeConfig, host: ScriptHost) -> Self {
        let codec =
            if config.scramble_handles { HandleCodec::scrambled() } else { HandleCodec::new() };
        let mode = if config.debug_verbosity == 0 {
            RunMode::Normal
        } else {
            RunMode::Debug(config.debug_verbosity)
        };
        Bridge {
            host,
            registry: CallbackRegistry::new(),
            translator: Translator::new(codec),
            escalation: Escalation::new(mode, config.crash_dir.clone()),
            stack: ContextStack::new(config.context_depth),
            clock: TickClock::new(),
            queue: EventQueue::default(),
        }
    }

    /// Load the application script (when file-backed) and run its entry
    /// point, the bare appname function.
    pub fn boot(&mut self, scene: &mut SceneGraph) -> Result<()> {
        if !self.host.is_loaded() {
            self.host.load_script()?;
        }
        if let RunMode::Debug(verbosity) = self.escalation.mode() {
            self.host.set_global_int("DEBUGLEVEL", verbosity as i64);
        }
        self.host.set_tick(self.clock.ticks());
        if let Err(fault) = self.host.call_void("", true) {
            let action = self.escalation.script_fault(
                &fault,
                scene,
                &mut self.stack,
                self.translator.codec(),
            );
            if action == FaultAction::Fatal {
                return Err(FatalFault(fault.to_string()).into());
            }
        }
        Ok(())
    }

    /// Run the application shutdown hook and drop any state the script side
    /// still holds through the registry.
    pub fn shutdown(&mut self, scene: &mut SceneGraph) -> Result<()> {
        if let Err(fault) = self.host.call_void("shutdown", false) {
            let action = self.escalation.script_fault(
                &fault,
                scene,
                &mut self.stack,
                self.translator.codec(),
            );
            if action == FaultAction::Fatal {
                return Err(FatalFault(fault.to_string()).into());
            }
        }
        Ok(())
    }

    pub fn push_event(&mut self, event: EngineEvent) {
        self.queue.push(event);
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// One cooperative engine tick: advance the clock, expire lifetimes,
    /// drain the queue through the translator. Expired objects stay alive
    /// until after the drain so their expire notices are still deliverable,
    /// then are reaped with their bindings released.
    pub fn tick(&mut self, scene: &mut SceneGraph, pulses: u32) -> Result<()> {
        if let Err(err) = self.host.reload_if_needed() {
            warn!("script reload failed: {err:#}");
        }
        let timer = self.clock.pulse(pulses);
        self.escalation.note_tick(self.clock.ticks());
        self.queue.push(timer);

        let expired = scene.tick_lifetimes();
        for handle in &expired {
            self.queue.push(EngineEvent::Video { source: *handle, kind: VideoEvent::Expired });
        }

        let mut fatal = None;
        for event in self.queue.drain() {
            if self.dispatch_now(scene, &event) == DispatchOutcome::Fatal {
                fatal = Some(FatalFault(format!("fatal fault dispatching {event}")));
                break;
            }
        }

        for handle in expired {
            if let Some(object) = scene.delete(handle) {
                frameserver::release_object_bindings(&mut self.registry, &object);
            }
        }

        match fatal {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    /// Synchronously translate and deliver a single event.
    pub fn dispatch_now(&mut self, scene: &mut SceneGraph, event: &EngineEvent) -> DispatchOutcome {
        let mut world = DispatchWorld {
            scene,
            host: &mut self.host,
            registry: &mut self.registry,
            escalation: &mut self.escalation,
            stack: &mut self.stack,
        };
        self.translator.dispatch(event, &mut world)
    }

    /// Store a script callable; rejects native built-ins.
    pub fn register_callback(&mut self, fn_ptr: FnPtr) -> Result<CallbackHandle> {
        Ok(self.host.register_callback(&mut self.registry, fn_ptr)?)
    }

    pub fn release_callback(&mut self, handle: CallbackHandle) {
        self.registry.release(handle);
    }

    /// Attach a callback to the frameserver proxy named by a script-space
    /// identifier. The identifier is a required argument, so a value that
    /// does not decode to a live handle is a programming error and fatal.
    pub fn bind_frameserver_callback(
        &mut self,
        scene: &mut SceneGraph,
        external_id: i64,
        fn_ptr: FnPtr,
    ) -> Result<()> {
        let handle = match self
            .translator
            .codec()
            .decode_strict(external_id, "bind_frameserver_callback")
        {
            Ok(handle) => handle,
            Err(err) => {
                self.escalation.bad_handle(&err);
                return Err(err.into());
            }
        };
        let callback = self.host.register_callback(&mut self.registry, fn_ptr)?;
        frameserver::bind_callback(scene, &mut self.registry, handle, callback)?;
        Ok(())
    }

    /// Delete an object and return its registry binding, exactly once.
    pub fn delete_object(&mut self, scene: &mut SceneGraph, handle: ObjectHandle) -> bool {
        match scene.delete(handle) {
            Some(object) => {
                frameserver::release_object_bindings(&mut self.registry, &object);
                true
            }
            None => false,
        }
    }

    /// Context stack operations with the script-visible error indicator:
    /// -1 for a refused push or an empty pop.
    pub fn push_context(&mut self, scene: &mut SceneGraph) -> i64 {
        match self.stack.push(scene) {
            Ok(depth) => depth as i64,
            Err(_) => -1,
        }
    }

    pub fn pop_context(&mut self, scene: &mut SceneGraph) -> i64 {
        match self.stack.pop(scene) {
            Ok(depth) => depth as i64,
            Err(_) => -1,
        }
    }

    pub fn push_context_external(
        &mut self,
        scene: &mut SceneGraph,
        keep: ObjectHandle,
    ) -> (i64, i64) {
        match self.stack.push_external(scene, keep) {
            Ok((depth, handle)) => (depth as i64, self.translator.codec().encode(handle)),
            Err(_) => (-1, self.translator.codec().encode(ObjectHandle::NONE)),
        }
    }

    pub fn pop_context_external(
        &mut self,
        scene: &mut SceneGraph,
        keep: ObjectHandle,
    ) -> (i64, i64) {
        match self.stack.pop_external(scene, keep) {
            Ok((depth, handle)) => (depth as i64, self.translator.codec().encode(handle)),
            Err(_) => (-1, self.translator.codec().encode(ObjectHandle::NONE)),
        }
    }

    pub fn context_usage(&self) -> ContextUsage {
        self.stack.usage()
    }

    /// Entry point for the scripting runtime's unrecoverable-fault hook.
    pub fn panic(&mut self, scene: &mut SceneGraph) -> FatalFault {
        self.escalation.panic(scene, &mut self.stack, self.translator.codec())
    }

    /// Producer side of the sampling/debugger protocol: dump the whole
    /// engine state as one `#ENDBLOCK`-framed block.
    pub fn write_state_dump<W: Write>(&self, scene: &SceneGraph, dst: &mut W) -> std::io::Result<()> {
        statesnap::write_state(dst, scene, &self.stack, self.translator.codec(), self.clock.ticks())
    }

    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    pub fn codec(&self) -> &HandleCodec {
        self.translator.codec()
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut ScriptHost {
        &mut self.host
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn escalation(&self) -> &Escalation {
        &self.escalation
    }
}
