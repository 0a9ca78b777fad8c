use crate::dataset::Dataset;
use crate::errors::Result;
use crate::outcome::ExecutionOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capabilities of a script execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine name
    pub name: String,
    /// Maximum accepted script length in characters
    pub max_script_length: usize,
    /// Wall clock timeout in seconds
    pub timeout_secs: u64,
    /// Interpreter step budget per execution
    pub max_fuel: u64,
    /// Whether the timeout is enforced by forcible cut-off
    pub enforced_timeout: bool,
}

/// Trait for engines that run a third-party script against a dataset.
///
/// Implementations hold no per-call mutable state and are safe to invoke
/// concurrently for different datasets.
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Statically check a script; the error carries the reject reason.
    async fn validate(&self, script: &str) -> Result<()>;

    /// Run a script against a working copy of `dataset`. Every path
    /// terminates in a well-formed outcome; script faults never escape.
    async fn execute(&self, script: &str, dataset: &Dataset) -> ExecutionOutcome;

    /// Get engine capabilities
    fn capabilities(&self) -> EngineCapabilities;
}
