use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use bitflags::bitflags;
use log::debug;

bitflags! {
    /// Search-mask over the resource namespaces. Order of precedence when
    /// both are set: application first, then shared.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Namespace: u32 {
        const APP    = 0b01;
        const SHARED = 0b10;
    }
}

/// Resolves resource names against the application and shared namespaces.
/// Roots come from explicit overrides, else environment variables, else a
/// discovered default next to the working directory.
pub struct ResourceResolver {
    app_root: PathBuf,
    shared_root: PathBuf,
}

impl ResourceResolver {
    pub fn new(app_root: impl Into<PathBuf>, shared_root: impl Into<PathBuf>) -> Self {
        ResourceResolver { app_root: app_root.into(), shared_root: shared_root.into() }
    }

    /// Environment-driven construction: `PRISM_APPPATH` / `PRISM_RESOURCEPATH`
    /// override the discovered defaults (`./<appname>`, `./resources`).
    pub fn from_env(appname: &str) -> Self {
        let app_root = env::var_os("PRISM_APPPATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(appname));
        let shared_root = env::var_os("PRISM_RESOURCEPATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("resources"));
        ResourceResolver::new(app_root, shared_root)
    }

    pub fn root(&self, namespace: Namespace) -> Option<&Path> {
        if namespace.contains(Namespace::APP) {
            Some(&self.app_root)
        } else if namespace.contains(Namespace::SHARED) {
            Some(&self.shared_root)
        } else {
            None
        }
    }

    fn roots(&self, mask: Namespace) -> Vec<&Path> {
        let mut out = Vec::new();
        if mask.contains(Namespace::APP) {
            out.push(self.app_root.as_path());
        }
        if mask.contains(Namespace::SHARED) {
            out.push(self.shared_root.as_path());
        }
        out
    }

    /// First existing match for `name` across the masked namespaces, in
    /// precedence order. Relative traversal outside a namespace root is
    /// rejected outright.
    pub fn find(&self, name: &str, mask: Namespace) -> Option<PathBuf> {
        if !is_safe_relative(name) {
            debug!("rejected unsafe resource name '{name}'");
            return None;
        }
        for root in self.roots(mask) {
            let candidate = root.join(name);
            if candidate.exists() {
                debug!("resource lookup for {name} yielded {}", candidate.display());
                return Some(candidate);
            }
        }
        None
    }

    /// All entry names matching a `*` wildcard pattern across the masked
    /// namespaces. Namespaces resolving to the same directory are only
    /// scanned once, and the result is deduplicated and sorted for
    /// deterministic iteration.
    pub fn glob(&self, pattern: &str, mask: Namespace) -> Vec<String> {
        if !is_safe_relative(pattern) {
            debug!("rejected unsafe glob pattern '{pattern}'");
            return Vec::new();
        }
        let (subdir, file_pattern) = match pattern.rfind('/') {
            Some(split) => (&pattern[..split], &pattern[split + 1..]),
            None => ("", pattern),
        };

        let mut scanned: Vec<PathBuf> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        for root in self.roots(mask) {
            let dir = if subdir.is_empty() { root.to_path_buf() } else { root.join(subdir) };
            let canonical = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
            if scanned.iter().any(|seen| *seen == canonical) {
                continue;
            }
            scanned.push(canonical);

            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if wildcard_match(file_pattern, name) && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }
}

/// A resource name must stay inside its namespace root: no absolute paths,
/// no parent-directory components.
fn is_safe_relative(name: &str) -> bool {
    let path = Path::new(name);
    if path.is_absolute() {
        return false;
    }
    path.components().all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if index == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(at) => rest = &rest[at + part.len()..],
                None => return false,
            }
        }
    }
    // pattern ended with '*'
    true
}
