use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied to a single script execution.
///
/// Supplied at engine construction, never read from ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum script length in characters
    pub max_script_length: usize,
    /// Wall clock timeout for one execution
    pub timeout: Duration,
    /// Maximum number of interpreter steps before the run is cut off
    pub max_fuel: u64,
    /// Maximum bytes of captured script output
    pub max_output_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_script_length: 10_000,
            timeout: Duration::from_secs(30),
            max_fuel: 5_000_000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Config with a custom timeout, other limits at their defaults
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.max_script_length, 10_000);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
