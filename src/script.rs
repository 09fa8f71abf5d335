use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use log::warn;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, FuncArgs, Scope, AST};
use thiserror::Error;

use crate::registry::{CallbackHandle, CallbackRegistry, RegistryError};

/// A fault raised by script code while the bridge was calling into it.
/// Carries the dispatch call-site for attribution; never swallowed here,
/// always handed to error escalation by the caller.
#[derive(Debug, Error, Clone)]
#[error("script fault in {callsite}: {message}")]
pub struct ScriptFault {
    pub callsite: String,
    pub message: String,
}

impl ScriptFault {
    fn new(callsite: &str, err: Box<EvalAltResult>) -> Self {
        ScriptFault { callsite: callsite.to_string(), message: err.to_string() }
    }
}

/// Convention entry points resolved by name from the application prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    System,
    Input,
    ClockPulse,
    VideoEvent,
    AudioEvent,
    FrameserverEvent,
    NetEvent,
}

impl Convention {
    /// `None` means the bare application name itself is the symbol.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Convention::System => None,
            Convention::Input => Some("input"),
            Convention::ClockPulse => Some("clock_pulse"),
            Convention::VideoEvent => Some("video_event"),
            Convention::AudioEvent => Some("audio_event"),
            Convention::FrameserverEvent => Some("frameserver_event"),
            Convention::NetEvent => Some("event_net"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Called,
    /// The application does not define the symbol; not an error.
    Missing,
}

/// Owns the rhai engine, the compiled application script and its scope.
/// All script execution funnels through here so that faults surface as
/// [`ScriptFault`] values with a call-site attached.
pub struct ScriptHost {
    engine: Engine,
    ast: Option<AST>,
    scope: Scope<'static>,
    appname: String,
    script_path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
    clock: Arc<AtomicU64>,
}

impl ScriptHost {
    pub fn new(appname: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let mut host = Self::bare(appname);
        host.script_path = Some(path.as_ref().to_path_buf());
        host
    }

    /// Host with an inline script, no backing file. Used by harness code and
    /// tests.
    pub fn from_source(appname: impl Into<String>, source: &str) -> Result<Self> {
        let mut host = Self::bare(appname);
        host.load_source(source)?;
        Ok(host)
    }

    fn bare(appname: impl Into<String>) -> Self {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        let clock = Arc::new(AtomicU64::new(0));
        let ticks = clock.clone();
        engine.register_fn("clock_ticks", move || ticks.load(Ordering::Relaxed) as rhai::INT);
        Self {
            engine,
            ast: None,
            scope: Scope::new(),
            appname: appname.into(),
            script_path: None,
            last_modified: None,
            clock,
        }
    }

    pub fn appname(&self) -> &str {
        &self.appname
    }

    /// Seam for the embedding engine to register its operation bindings
    /// (object query/mutate primitives and the rest of the script API).
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn load_script(&mut self) -> Result<()> {
        let path = self
            .script_path
            .clone()
            .context("no script path configured for this host")?;
        let source = fs::read_to_string(&path)
            .with_context(|| format!("Reading {}", path.display()))?;
        self.compile(&source).with_context(|| format!("Compiling {}", path.display()))?;
        self.last_modified = fs::metadata(&path).ok().and_then(|meta| meta.modified().ok());
        Ok(())
    }

    pub fn load_source(&mut self, source: &str) -> Result<()> {
        self.compile(source).context("Compiling inline script")
    }

    fn compile(&mut self, source: &str) -> Result<()> {
        let ast = self.engine.compile(source).map_err(|err| anyhow::anyhow!("{err}"))?;
        self.scope = Scope::new();
        self.ast = Some(ast);
        Ok(())
    }

    /// Recompile when the backing file changed on disk. No-op for inline
    /// scripts.
    pub fn reload_if_needed(&mut self) -> Result<()> {
        let Some(path) = self.script_path.clone() else {
            return Ok(());
        };
        let metadata = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) => return Err(anyhow::anyhow!("Script file not accessible: {err}")),
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if self.ast.is_none() || self.last_modified.map_or(true, |prev| modified > prev) {
            self.load_script()?;
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.ast.is_some()
    }

    /// The global symbol name a convention entry resolves to.
    pub fn convention_symbol(&self, convention: Convention) -> String {
        match convention.suffix() {
            None => self.appname.clone(),
            Some(suffix) => format!("{}_{}", self.appname, suffix),
        }
    }

    /// True if the loaded script defines a top-level function by this name.
    pub fn has_symbol(&self, name: &str) -> bool {
        match &self.ast {
            Some(ast) => ast.iter_functions().any(|f| f.name == name),
            None => false,
        }
    }

    pub fn call_convention(
        &mut self,
        convention: Convention,
        args: impl FuncArgs,
    ) -> Result<CallOutcome, ScriptFault> {
        let symbol = self.convention_symbol(convention);
        self.call_symbol(&symbol, args)
    }

    /// Call `<appname>` (empty suffix) or `<appname>_<suffix>` with no
    /// arguments; used for application lifecycle hooks.
    pub fn call_void(&mut self, suffix: &str, warn_if_missing: bool) -> Result<bool, ScriptFault> {
        let symbol = if suffix.is_empty() {
            self.appname.clone()
        } else {
            format!("{}_{}", self.appname, suffix)
        };
        match self.call_symbol(&symbol, ())? {
            CallOutcome::Called => Ok(true),
            CallOutcome::Missing => {
                if warn_if_missing {
                    warn!("missing expected symbol ({symbol})");
                }
                Ok(false)
            }
        }
    }

    fn call_symbol(&mut self, symbol: &str, args: impl FuncArgs) -> Result<CallOutcome, ScriptFault> {
        let Some(ast) = &self.ast else {
            return Ok(CallOutcome::Missing);
        };
        match self.engine.call_fn::<Dynamic>(&mut self.scope, ast, symbol, args) {
            Ok(_) => Ok(CallOutcome::Called),
            Err(err) => {
                if matches!(err.as_ref(), EvalAltResult::ErrorFunctionNotFound(..)) {
                    Ok(CallOutcome::Missing)
                } else {
                    Err(ScriptFault::new(symbol, err))
                }
            }
        }
    }

    /// Invoke a registered callable by value. The registry keeps ownership;
    /// the caller passes a clone of the stored pointer.
    pub fn call_fnptr(
        &mut self,
        fn_ptr: &FnPtr,
        args: impl FuncArgs,
        callsite: &str,
    ) -> Result<Dynamic, ScriptFault> {
        let Some(ast) = &self.ast else {
            return Err(ScriptFault {
                callsite: callsite.to_string(),
                message: "no script loaded".to_string(),
            });
        };
        fn_ptr
            .call::<Dynamic>(&self.engine, ast, args)
            .map_err(|err| ScriptFault::new(callsite, err))
    }

    /// Store a script callable in the registry. Native built-in functions are
    /// rejected: only functions defined by the loaded script (anonymous
    /// closures included) are valid long-lived handles.
    pub fn register_callback(
        &self,
        registry: &mut CallbackRegistry,
        fn_ptr: FnPtr,
    ) -> Result<CallbackHandle, RegistryError> {
        let Some(ast) = &self.ast else {
            return Err(RegistryError::NoScript);
        };
        let name = fn_ptr.fn_name();
        if !ast.iter_functions().any(|f| f.name == name) {
            return Err(RegistryError::NotScriptFunction(name.to_string()));
        }
        Ok(registry.register(fn_ptr))
    }

    /// Evaluate one complete state-dump block and feed the result to the
    /// stream-side `sample(...)` function.
    pub fn feed_sample(&mut self, block: &str) -> Result<CallOutcome, ScriptFault> {
        let value = self
            .engine
            .eval::<Dynamic>(block)
            .map_err(|err| ScriptFault::new("state sample block", err))?;
        self.call_symbol("sample", (value,))
    }

    /// Update the script-visible tick counter (`clock_ticks()` and the
    /// top-level `CLOCK` constant).
    pub fn set_tick(&mut self, tick: u64) {
        self.clock.store(tick, Ordering::Relaxed);
        self.scope.set_value("CLOCK", tick as rhai::INT);
    }

    pub fn set_global_int(&mut self, key: &str, value: i64) {
        self.scope.set_value(key.to_string(), value);
    }

    pub fn set_global_str(&mut self, key: &str, value: &str) {
        self.scope.set_value(key.to_string(), value.to_string());
    }
}
