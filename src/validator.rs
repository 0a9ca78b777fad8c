//! Static policy gate.
//!
//! The cheapest and first line of defense: a script is rejected on its
//! syntax tree alone, before any code runs. Length bound, parse, then a walk
//! rejecting denylisted imports and denylisted direct or method calls.

use crate::ast::{self, Expr, Stmt};
use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::parser;
use crate::policy::ScriptPolicy;
use tracing::warn;

/// Pure, stateless validator; safe to call repeatedly and concurrently.
#[derive(Debug, Clone)]
pub struct Validator {
    max_script_length: usize,
    policy: ScriptPolicy,
}

impl Validator {
    pub fn new(config: &EngineConfig, policy: ScriptPolicy) -> Self {
        Self {
            max_script_length: config.max_script_length,
            policy,
        }
    }

    pub fn policy(&self) -> &ScriptPolicy {
        &self.policy
    }

    /// Boolean gate: true means safe to hand to the runner.
    pub fn validate(&self, script: &str) -> bool {
        match self.check(script) {
            Ok(_) => true,
            Err(reason) => {
                warn!("script rejected: {reason}");
                false
            }
        }
    }

    /// Full check, returning the reject reason.
    pub fn check(&self, script: &str) -> Result<()> {
        self.checked_parse(script).map(|_| ())
    }

    /// Check and keep the parse so the runner does not parse twice.
    pub fn checked_parse(&self, script: &str) -> Result<Vec<Stmt>> {
        if script.chars().count() > self.max_script_length {
            return Err(EngineError::PolicyViolation(format!(
                "script exceeds maximum length of {} characters",
                self.max_script_length
            )));
        }

        let stmts = parser::parse(script)
            .map_err(|e| EngineError::PolicyViolation(format!("syntax error: {e}")))?;

        let mut violation: Option<String> = None;
        ast::walk_stmts(&stmts, &mut |stmt| {
            if violation.is_some() {
                return;
            }
            match stmt {
                Stmt::Import { module, line, .. } if self.policy.is_module_denied(module) => {
                    violation = Some(format!("line {line}: import of denied module '{module}'"));
                }
                Stmt::FromImport { module, line, .. } if self.policy.is_module_denied(module) => {
                    violation = Some(format!("line {line}: import from denied module '{module}'"));
                }
                _ => {}
            }
        });
        if violation.is_none() {
            ast::walk_exprs(&stmts, &mut |expr| {
                if violation.is_some() {
                    return;
                }
                if let Expr::Call { func, line, .. } = expr {
                    let called = match &**func {
                        Expr::Name { id, .. } => Some(id.as_str()),
                        Expr::Attribute { attr, .. } => Some(attr.as_str()),
                        _ => None,
                    };
                    if let Some(name) = called {
                        if self.policy.is_call_denied(name) {
                            violation = Some(format!("line {line}: call to denied '{name}'"));
                        }
                    }
                }
            });
        }

        match violation {
            Some(reason) => Err(EngineError::PolicyViolation(reason)),
            None => Ok(stmts),
        }
    }

    /// Best-effort repair of generated scripts before validation: strips
    /// blank lines, import lines naming denied modules, and oversized
    /// comment lines.
    pub fn sanitize(&self, script: &str) -> String {
        let mut kept = Vec::new();
        for line in script.lines() {
            let stripped = line.trim();
            if stripped.is_empty() || (stripped.starts_with('#') && stripped.len() > 100) {
                continue;
            }
            if stripped.starts_with("import ") || stripped.starts_with("from ") {
                let module = stripped
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("")
                    .trim_end_matches(',');
                if self.policy.is_module_denied(module) {
                    continue;
                }
            }
            kept.push(line);
        }
        kept.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(&EngineConfig::default(), ScriptPolicy::default())
    }

    #[test]
    fn os_import_is_rejected_before_execution() {
        let v = validator();
        assert!(!v.validate("import os\nos.system('ls')"));
    }

    #[test]
    fn from_import_matches_root_module() {
        let v = validator();
        assert!(!v.validate("from os import path"));
        assert!(!v.validate("from urllib.request import urlopen"));
    }

    #[test]
    fn clean_transform_passes() {
        let v = validator();
        assert!(v.validate("df['x'] = df['x'] * 2"));
        assert!(v.validate("df = df.dropna()"));
    }

    #[test]
    fn dynamic_evaluation_calls_rejected() {
        let v = validator();
        for script in [
            "eval('1+1')",
            "exec('x = 1')",
            "open('/etc/passwd')",
            "__import__('os')",
            "x = getattr(df, 'values')",
            "globals()",
        ] {
            assert!(!v.validate(script), "{script} should fail validation");
        }
    }

    #[test]
    fn denied_method_call_rejected() {
        // reflective access through an attribute is still a denied call
        let v = validator();
        assert!(!v.validate("builtins.eval('1')"));
    }

    #[test]
    fn referencing_a_denied_name_without_calling_is_allowed() {
        let v = validator();
        assert!(v.validate("x = 'eval'"));
    }

    #[test]
    fn overlong_script_rejected() {
        let config = EngineConfig {
            max_script_length: 10,
            ..Default::default()
        };
        let v = Validator::new(&config, ScriptPolicy::default());
        assert!(!v.validate("df = df.dropna()"));
    }

    #[test]
    fn unparsable_script_rejected() {
        let v = validator();
        assert!(!v.validate("df['x' = 2"));
        assert!(!v.validate("while"));
    }

    #[test]
    fn check_reports_reason() {
        let v = validator();
        let err = v.check("import socket").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("socket"), "{msg}");
    }

    #[test]
    fn sanitize_strips_denied_imports_and_long_comments() {
        let v = validator();
        let long_comment = format!("# {}", "x".repeat(120));
        let script = format!("import os\nimport pandas as pd\n{long_comment}\ndf = df.dropna()");
        let cleaned = v.sanitize(&script);
        assert!(!cleaned.contains("import os"));
        assert!(cleaned.contains("import pandas as pd"));
        assert!(!cleaned.contains(&long_comment));
        assert!(cleaned.contains("df = df.dropna()"));
    }
}
