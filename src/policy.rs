//! Script policy: which modules a script may import and which calls it may
//! never make.
//!
//! The policy is a plain value. It is consulted twice: statically by the
//! validator before anything runs, and at environment-build time to decide
//! which module capabilities exist at all.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Denylist/allowlist configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptPolicy {
    /// Module roots a script must never import (process, network, low-level
    /// system access)
    pub denied_modules: HashSet<String>,
    /// Identifiers a script must never call directly (dynamic evaluation,
    /// file access, reflective attribute access, namespace introspection)
    pub denied_calls: HashSet<String>,
    /// Module names the execution environment exposes by reference
    pub approved_modules: HashSet<String>,
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self {
            denied_modules: Self::default_denied_modules(),
            denied_calls: Self::default_denied_calls(),
            approved_modules: Self::default_approved_modules(),
        }
    }
}

impl ScriptPolicy {
    /// Default set of module roots that are rejected statically.
    pub fn default_denied_modules() -> HashSet<String> {
        [
            "os",
            "sys",
            "subprocess",
            "socket",
            "urllib",
            "requests",
            "http",
            "ftplib",
            "smtplib",
            "multiprocessing",
            "threading",
            "ctypes",
            "pty",
            "fcntl",
            "resource",
            "shutil",
            "tempfile",
            "pathlib",
            "glob",
            "pickle",
            "importlib",
            "signal",
            "webbrowser",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Default set of identifiers whose call is rejected statically.
    pub fn default_denied_calls() -> HashSet<String> {
        [
            "eval",
            "exec",
            "compile",
            "open",
            "__import__",
            "input",
            "getattr",
            "setattr",
            "hasattr",
            "delattr",
            "globals",
            "locals",
            "vars",
            "dir",
            "breakpoint",
            "exit",
            "quit",
            "help",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Modules the environment exposes; anything else fails at runtime with
    /// an import fault (denied modules never get that far).
    pub fn default_approved_modules() -> HashSet<String> {
        ["pd", "pandas", "np", "numpy", "re", "datetime"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Check the root segment of a dotted module path against the denylist.
    pub fn is_module_denied(&self, module: &str) -> bool {
        let root = module.split('.').next().unwrap_or(module);
        self.denied_modules.contains(root)
    }

    pub fn is_call_denied(&self, name: &str) -> bool {
        self.denied_calls.contains(name)
    }

    pub fn is_module_approved(&self, module: &str) -> bool {
        let root = module.split('.').next().unwrap_or(module);
        self.approved_modules.contains(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_module_paths_match_on_root() {
        let policy = ScriptPolicy::default();
        assert!(policy.is_module_denied("os"));
        assert!(policy.is_module_denied("os.path"));
        assert!(policy.is_module_denied("urllib.request"));
        assert!(!policy.is_module_denied("pandas"));
    }

    #[test]
    fn reflective_access_is_denied() {
        let policy = ScriptPolicy::default();
        for call in ["eval", "exec", "open", "getattr", "setattr", "globals"] {
            assert!(policy.is_call_denied(call), "{call} should be denied");
        }
        assert!(!policy.is_call_denied("len"));
    }

    #[test]
    fn approved_modules_cover_both_aliases() {
        let policy = ScriptPolicy::default();
        assert!(policy.is_module_approved("pd"));
        assert!(policy.is_module_approved("pandas"));
        assert!(policy.is_module_approved("np"));
        assert!(!policy.is_module_approved("os"));
    }
}
