use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

use crate::context::ContextStack;
use crate::handle::{BadHandle, HandleCodec, ObjectHandle};
use crate::scene::SceneGraph;
use crate::script::ScriptFault;
use crate::statesnap;

/// Highest debug verbosity at which a script fault is still fatal. Above it
/// the engine stays alive so the script author can keep iterating.
pub const STAY_ALIVE_VERBOSITY: u8 = 2;

const MAX_VERBOSITY: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Fail fast: a script in an unknown state is unsafe for a live display.
    Normal,
    /// Verbose diagnostics at the given verbosity.
    Debug(u8),
    /// The scripting runtime hit an unrecoverable fault; one-way.
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Frameserver,
    Image,
}

/// Attribution for the dispatch currently executing, so a fault inside a
/// callback can name the object it was delivered for.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSource {
    pub object: ObjectHandle,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Continue,
    Fatal,
}

/// Carried up through the tick loop when the policy decides the process must
/// not continue. The embedding binary performs the actual abort.
#[derive(Debug, Error)]
#[error("unrecoverable script fault: {0}")]
pub struct FatalFault(pub String);

#[derive(Serialize)]
struct CrashReport<'a> {
    callsite: &'a str,
    message: &'a str,
    source_object: Option<i64>,
    verbosity: u8,
}

/// Single decision point for fault visibility and fatality. Nothing in the
/// translator or registry swallows a fault; it all lands here.
pub struct Escalation {
    mode: RunMode,
    crash_dir: PathBuf,
    active_source: Option<DispatchSource>,
    last_tick: u64,
}

impl Escalation {
    pub fn new(mode: RunMode, crash_dir: impl Into<PathBuf>) -> Self {
        Escalation { mode, crash_dir: crash_dir.into(), active_source: None, last_tick: 0 }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn verbosity(&self) -> u8 {
        match self.mode {
            RunMode::Normal => 0,
            RunMode::Debug(v) => v,
            RunMode::Panic => MAX_VERBOSITY,
        }
    }

    pub fn note_tick(&mut self, tick: u64) {
        self.last_tick = tick;
    }

    pub fn set_source(&mut self, source: DispatchSource) {
        self.active_source = Some(source);
    }

    pub fn clear_source(&mut self) {
        self.active_source = None;
    }

    pub fn active_source(&self) -> Option<DispatchSource> {
        self.active_source
    }

    /// A script callable faulted during dispatch or a direct call.
    pub fn script_fault(
        &mut self,
        fault: &ScriptFault,
        scene: &mut SceneGraph,
        stack: &mut ContextStack,
        codec: &HandleCodec,
    ) -> FaultAction {
        match self.mode {
            RunMode::Normal => {
                let unwound = stack.unwind(scene);
                error!("{fault} (context stack unwound {unwound} frames)");
                FaultAction::Fatal
            }
            RunMode::Debug(verbosity) => {
                warn!("{fault}");
                if let Some(source) = self.active_source {
                    warn!("  while dispatching for object {} ({:?})", codec.encode(source.object), source.kind);
                }
                if verbosity >= 1 {
                    match self.persist_crash_dump(fault, scene, stack, codec, verbosity) {
                        Ok(path) => warn!("crash snapshot written to {}", path.display()),
                        Err(err) => warn!("failed to persist crash snapshot: {err:#}"),
                    }
                }
                if verbosity > STAY_ALIVE_VERBOSITY {
                    FaultAction::Continue
                } else {
                    FaultAction::Fatal
                }
            }
            RunMode::Panic => FaultAction::Fatal,
        }
    }

    /// A required-object argument decoded to `NONE`: an application bug that
    /// must surface immediately, never be ignored.
    pub fn bad_handle(&mut self, err: &BadHandle) -> FaultAction {
        error!("{err}");
        if cfg!(debug_assertions) {
            error!("  (strict handle check, aborting to surface the bug early)");
        }
        FaultAction::Fatal
    }

    /// One-way entry from the scripting runtime's unrecoverable-fault hook.
    /// Forces maximum verbosity for the final dump, attributes the fault to
    /// the active dispatch when there is one, and always reports fatal.
    pub fn panic(
        &mut self,
        scene: &mut SceneGraph,
        stack: &mut ContextStack,
        codec: &HandleCodec,
    ) -> FatalFault {
        self.mode = RunMode::Panic;
        let message = match self.active_source {
            Some(source) => {
                format!("script panic in callback for object {}", codec.encode(source.object))
            }
            None => "script panic".to_string(),
        };
        error!("{message}");
        let fault = ScriptFault { callsite: "(panic)".to_string(), message: message.clone() };
        if let Err(err) = self.persist_crash_dump(&fault, scene, stack, codec, MAX_VERBOSITY) {
            warn!("failed to persist panic snapshot: {err:#}");
        }
        FatalFault(message)
    }

    fn persist_crash_dump(
        &self,
        fault: &ScriptFault,
        scene: &SceneGraph,
        stack: &ContextStack,
        codec: &HandleCodec,
        verbosity: u8,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.crash_dir)
            .with_context(|| format!("creating crash dir {}", self.crash_dir.display()))?;
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let path = self.crash_dir.join(format!("crash_{stamp}.rhai"));
        let mut file = File::create(&path)
            .with_context(|| format!("creating crash snapshot {}", path.display()))?;
        statesnap::write_state(&mut file, scene, stack, codec, self.last_tick)
            .with_context(|| "writing crash snapshot")?;
        self.write_sidecar(&path, fault, verbosity)?;
        Ok(path)
    }

    fn write_sidecar(&self, snapshot_path: &Path, fault: &ScriptFault, verbosity: u8) -> Result<()> {
        let report = CrashReport {
            callsite: &fault.callsite,
            message: &fault.message,
            source_object: self.active_source.map(|s| s.object.raw()),
            verbosity,
        };
        let path = snapshot_path.with_extension("json");
        let file = File::create(&path)
            .with_context(|| format!("creating crash report {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report).with_context(|| "writing crash report")?;
        Ok(())
    }
}
