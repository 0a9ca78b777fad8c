//! Capability-restricted execution environment.
//!
//! Rebuilt from scratch for every run: the approved builtins, the approved
//! module references, and a deep working copy of the input dataset bound
//! under the well-known `df` name. Nothing else exists from the script's
//! point of view: no filesystem, no network, no host internals.
//!
//! Captured output is an owned buffer on the environment rather than a
//! redirected process stream, so "restore the prior sink" holds on every
//! exit path by construction.

use crate::dataset::Dataset;
use crate::policy::ScriptPolicy;
use crate::value::{Builtin, ModuleRef, Value};
use std::collections::HashMap;

/// The well-known name the dataset is bound under.
pub const DATASET_BINDING: &str = "df";

#[derive(Debug)]
pub struct CapabilityEnv {
    vars: HashMap<String, Value>,
    output: String,
    output_limit: usize,
    truncated: bool,
}

impl CapabilityEnv {
    /// Build a fresh environment around a working copy of `dataset`.
    ///
    /// No two environments share state; the caller's dataset is cloned and
    /// never mutated through the returned value.
    pub fn build(policy: &ScriptPolicy, dataset: &Dataset, output_limit: usize) -> Self {
        let mut vars = HashMap::new();
        for (name, builtin) in Builtin::all() {
            vars.insert(name.to_string(), Value::Builtin(*builtin));
        }
        for name in &policy.approved_modules {
            if let Some(module) = ModuleRef::for_name(name) {
                vars.insert(name.clone(), Value::Module(module));
            }
        }
        vars.insert(DATASET_BINDING.to_string(), Value::Frame(dataset.clone()));
        Self {
            vars,
            output: String::new(),
            output_limit,
            truncated: false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    /// Append to the captured output, silently truncating at the limit.
    pub fn write_output(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let remaining = self.output_limit.saturating_sub(self.output.len());
        if text.len() <= remaining {
            self.output.push_str(text);
        } else {
            let mut end = remaining;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            self.output.push_str(&text[..end]);
            self.truncated = true;
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// The script's final dataset binding, if it still holds a frame.
    pub fn produced_dataset(&self) -> Option<&Dataset> {
        match self.vars.get(DATASET_BINDING) {
            Some(Value::Frame(df)) => Some(df),
            _ => None,
        }
    }

    pub fn into_parts(self) -> (HashMap<String, Value>, String) {
        (self.vars, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, Column};

    fn one_column() -> Dataset {
        Dataset::from_columns(vec![Column::new(
            "x",
            vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)],
        )])
        .unwrap()
    }

    #[test]
    fn environment_exposes_only_the_approved_surface() {
        let env = CapabilityEnv::build(&ScriptPolicy::default(), &one_column(), 1024);
        assert!(matches!(env.get("df"), Some(Value::Frame(_))));
        assert!(matches!(env.get("pd"), Some(Value::Module(ModuleRef::Pandas))));
        assert!(matches!(env.get("len"), Some(Value::Builtin(Builtin::Len))));
        assert!(env.get("open").is_none());
        assert!(env.get("os").is_none());
        assert!(env.get("__builtins__").is_none());
    }

    #[test]
    fn working_copy_is_independent() {
        let original = one_column();
        let mut env = CapabilityEnv::build(&ScriptPolicy::default(), &original, 1024);
        if let Some(Value::Frame(df)) = env.get("df").cloned().as_ref() {
            let mut mutated = df.clone();
            mutated.set_column("x", vec![Cell::Int(9), Cell::Int(9), Cell::Int(9)]).unwrap();
            env.set(DATASET_BINDING, Value::Frame(mutated));
        }
        // caller's dataset untouched
        assert!(original.column("x").unwrap().cells[0].same(&Cell::Int(1)));
        assert!(env
            .produced_dataset()
            .unwrap()
            .column("x")
            .unwrap()
            .cells[0]
            .same(&Cell::Int(9)));
    }

    #[test]
    fn output_buffer_truncates_at_limit() {
        let mut env = CapabilityEnv::build(&ScriptPolicy::default(), &one_column(), 8);
        env.write_output("12345");
        env.write_output("67890");
        assert_eq!(env.output(), "12345678");
        env.write_output("more");
        assert_eq!(env.output().len(), 8);
    }

    #[test]
    fn missing_binding_reports_no_dataset() {
        let mut env = CapabilityEnv::build(&ScriptPolicy::default(), &one_column(), 1024);
        env.remove(DATASET_BINDING);
        assert!(env.produced_dataset().is_none());
        env.set(DATASET_BINDING, Value::Int(42));
        assert!(env.produced_dataset().is_none());
    }
}
