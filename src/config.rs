use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::DEFAULT_CONTEXT_DEPTH;

/// Configuration for one bridge instance. `appname` doubles as the prefix of
/// every convention entry point the application script exposes.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub appname: String,
    #[serde(default = "BridgeConfig::default_script_path")]
    pub script_path: PathBuf,
    /// 0 runs the escalation policy in normal (fail-fast) mode; anything
    /// higher enables debug mode at that verbosity.
    #[serde(default)]
    pub debug_verbosity: u8,
    #[serde(default = "BridgeConfig::default_crash_dir")]
    pub crash_dir: PathBuf,
    #[serde(default = "BridgeConfig::default_context_depth")]
    pub context_depth: usize,
    /// Randomize the identifier offset so scripts coupling to raw engine
    /// indices break loudly.
    #[serde(default)]
    pub scramble_handles: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            appname: "app".to_string(),
            script_path: Self::default_script_path(),
            debug_verbosity: 0,
            crash_dir: Self::default_crash_dir(),
            context_depth: Self::default_context_depth(),
            scramble_handles: false,
        }
    }
}

impl BridgeConfig {
    fn default_script_path() -> PathBuf {
        PathBuf::from("app/app.rhai")
    }

    fn default_crash_dir() -> PathBuf {
        PathBuf::from("logs")
    }

    const fn default_context_depth() -> usize {
        DEFAULT_CONTEXT_DEPTH
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>, appname: &str) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("config load error: {err:?}, falling back to defaults");
                Self { appname: appname.to_string(), ..Self::default() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: BridgeConfig = serde_json::from_str(r#"{ "appname": "player" }"#).expect("parse");
        assert_eq!(cfg.appname, "player");
        assert_eq!(cfg.debug_verbosity, 0);
        assert_eq!(cfg.context_depth, DEFAULT_CONTEXT_DEPTH);
        assert!(!cfg.scramble_handles);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = BridgeConfig::load_or_default("/nonexistent/bridge.json", "viewer");
        assert_eq!(cfg.appname, "viewer");
        assert_eq!(cfg.crash_dir, PathBuf::from("logs"));
    }
}
