//! Sandboxed tabular script execution.
//!
//! Runs third-party transformation scripts against in-memory datasets
//! without ever letting them reach the filesystem, the network, a process,
//! or the host's internals. Scripts pass a static policy gate first, then
//! run inside a natively interpreted, capability-restricted environment that
//! exposes only approved primitives, approved data-processing modules and a
//! working copy of the dataset.
//!
//! The second half of the crate is the pipeline status store: a per-dataset
//! record of the upload → generate → execute → ready flags, kept in an
//! external cache behind the [`StatusStore`] trait.
//!
//! ```no_run
//! use dfsandbox::{Cell, Column, DataEngine, Dataset, EngineConfig, MemoryStatusStore};
//! use std::sync::Arc;
//!
//! # async fn demo() -> dfsandbox::Result<()> {
//! let engine = DataEngine::new(EngineConfig::default(), Arc::new(MemoryStatusStore::new()));
//!
//! let df = Dataset::from_columns(vec![Column::new(
//!     "x",
//!     vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)],
//! )])
//! .expect("uniform columns");
//!
//! engine.initialize_status("job-1").await?;
//! let outcome = engine.execute_script("df['x'] = df['x'] * 2", &df).await;
//! engine.set_status_flag("job-1", "script_executed", outcome.success).await?;
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod env;
pub mod errors;
pub mod interp;
pub mod lexer;
mod methods;
mod modules;
pub mod outcome;
pub mod parser;
pub mod policy;
pub mod runner;
pub mod status;
pub mod validator;
pub mod value;

pub use config::EngineConfig;
pub use dataset::{Cell, Column, DataError, Dataset, Series};
pub use engine::{EngineCapabilities, TransformEngine};
pub use errors::{EngineError, Result};
pub use outcome::{ExecutionOutcome, FailureKind};
pub use policy::ScriptPolicy;
pub use runner::InterpreterEngine;
pub use status::{MemoryStatusStore, PipelineStatus, RedisStatusStore, StatusStore};
pub use validator::Validator;

use std::sync::Arc;

/// Facade bundling the execution engine with an injected status store;
/// exposes exactly the operations the surrounding API layer consumes.
pub struct DataEngine {
    engine: InterpreterEngine,
    store: Arc<dyn StatusStore>,
}

impl DataEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn StatusStore>) -> Self {
        Self {
            engine: InterpreterEngine::new(config),
            store,
        }
    }

    pub fn with_policy(
        config: EngineConfig,
        policy: ScriptPolicy,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            engine: InterpreterEngine::with_policy(config, policy),
            store,
        }
    }

    pub fn engine(&self) -> &InterpreterEngine {
        &self.engine
    }

    /// Static gate; true means the script is safe to execute.
    pub fn validate_script(&self, script: &str) -> bool {
        self.engine.validator().validate(script)
    }

    /// Run a script against a working copy of `dataset`; never faults.
    pub async fn execute_script(&self, script: &str, dataset: &Dataset) -> ExecutionOutcome {
        self.engine.execute(script, dataset).await
    }

    pub async fn initialize_status(&self, id: &str) -> Result<()> {
        self.store.initialize(id).await
    }

    pub async fn set_status_flag(&self, id: &str, flag: &str, value: bool) -> Result<()> {
        self.store.set_flag(id, flag, value).await
    }

    pub async fn get_status(&self, id: &str) -> Result<Option<PipelineStatus>> {
        self.store.get_status(id).await
    }

    pub async fn delete_status(&self, id: &str) -> Result<bool> {
        self.store.delete_status(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_columns(vec![Column::new(
            "x",
            vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)],
        )])
        .unwrap()
    }

    fn data_engine() -> DataEngine {
        DataEngine::new(EngineConfig::default(), Arc::new(MemoryStatusStore::new()))
    }

    #[tokio::test]
    async fn full_pipeline_pass() {
        let engine = data_engine();
        let id = "f2c54f42";

        engine.initialize_status(id).await.unwrap();
        engine.set_status_flag(id, "uploaded", true).await.unwrap();

        assert!(engine.validate_script("df['x'] = df['x'] * 2"));
        engine
            .set_status_flag(id, "processed_by_generator", true)
            .await
            .unwrap();

        let outcome = engine.execute_script("df['x'] = df['x'] * 2", &sample()).await;
        assert!(outcome.success);
        assert_eq!(outcome.processed_rows, Some(3));
        engine
            .set_status_flag(id, "script_executed", true)
            .await
            .unwrap();
        engine.set_status_flag(id, "ready", true).await.unwrap();

        let status = engine.get_status(id).await.unwrap().unwrap();
        assert!(status.uploaded && status.processed_by_generator);
        assert!(status.script_executed && status.ready);

        assert!(engine.delete_status(id).await.unwrap());
        assert!(engine.get_status(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_script_reports_a_structured_failure() {
        let engine = data_engine();
        assert!(!engine.validate_script("import socket"));
        let outcome = engine.execute_script("import socket", &sample()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Policy));
        assert!(outcome.error_message.is_some());
        assert!(outcome.dataset.is_none());
    }

    #[tokio::test]
    async fn failed_validation_and_failed_execution_share_a_shape() {
        let engine = data_engine();
        let policy_failure = engine.execute_script("open('x')", &sample()).await;
        let runtime_failure = engine.execute_script("df = missing_name", &sample()).await;
        for outcome in [&policy_failure, &runtime_failure] {
            assert!(!outcome.success);
            assert!(outcome.error_message.is_some());
            assert!(outcome.dataset.is_none());
            assert!(outcome.is_well_formed());
        }
        assert_ne!(policy_failure.failure, runtime_failure.failure);
    }
}
