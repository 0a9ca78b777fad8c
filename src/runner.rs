//! The execution runner: validate, build the environment, interpret under a
//! deadline, and fold whatever happened into an [`ExecutionOutcome`].
//!
//! A single invocation is a single attempt; there are no retries here. The
//! timeout is enforced twice over: the interpreter re-checks the deadline as
//! it spends fuel, and the async side wraps the blocking task in a timeout
//! with a small grace period as a backstop.

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::engine::{EngineCapabilities, TransformEngine};
use crate::env::CapabilityEnv;
use crate::errors::Result;
use crate::interp;
use crate::outcome::{ExecutionOutcome, FailureKind};
use crate::policy::ScriptPolicy;
use crate::validator::Validator;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Extra wall clock allowance before the exterior timeout fires; the
/// interior deadline check is expected to win.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Engine that interprets scripts natively inside a capability-restricted
/// environment.
pub struct InterpreterEngine {
    config: EngineConfig,
    validator: Validator,
}

impl InterpreterEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_policy(config, ScriptPolicy::default())
    }

    pub fn with_policy(config: EngineConfig, policy: ScriptPolicy) -> Self {
        let validator = Validator::new(&config, policy);
        Self { config, validator }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[async_trait]
impl TransformEngine for InterpreterEngine {
    async fn validate(&self, script: &str) -> Result<()> {
        self.validator.check(script)
    }

    async fn execute(&self, script: &str, dataset: &Dataset) -> ExecutionOutcome {
        let run_id = Uuid::new_v4();
        info!(%run_id, rows = dataset.row_count(), "executing script");

        let stmts = match self.validator.checked_parse(script) {
            Ok(stmts) => stmts,
            Err(reason) => {
                warn!(%run_id, "script rejected: {reason}");
                return ExecutionOutcome::failed(FailureKind::Policy, reason.to_string());
            }
        };

        let policy = self.validator.policy().clone();
        let mut env = CapabilityEnv::build(&policy, dataset, self.config.max_output_bytes);
        let fuel = self.config.max_fuel;
        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;

        let handle = tokio::task::spawn_blocking(move || {
            let result = interp::run(&mut env, &policy, &stmts, fuel, deadline);
            (env, result)
        });

        let joined = tokio::time::timeout(timeout + TIMEOUT_GRACE, handle).await;
        let (env, ran) = match joined {
            Err(_) => {
                // interior deadline failed to fire in time; the detached task
                // will still stop itself at its next check
                error!(%run_id, "execution passed the timeout backstop");
                return ExecutionOutcome::failed(
                    FailureKind::Resource,
                    format!("execution exceeded time limit of {}s", timeout.as_secs()),
                );
            }
            Ok(Err(join_error)) => {
                error!(%run_id, "execution task failed: {join_error}");
                return ExecutionOutcome::failed(
                    FailureKind::Runtime,
                    "execution failed unexpectedly",
                );
            }
            Ok(Ok(pair)) => pair,
        };

        if let Err(fault) = ran {
            return if fault.is_resource_fault() {
                warn!(%run_id, "execution cut off: {fault}");
                let message = match fault {
                    interp::ScriptError::FuelExhausted => {
                        "execution exceeded the step budget".to_string()
                    }
                    _ => format!("execution exceeded time limit of {}s", timeout.as_secs()),
                };
                ExecutionOutcome::failed(FailureKind::Resource, message)
            } else {
                warn!(%run_id, "execution error: {fault}");
                ExecutionOutcome::failed(FailureKind::Runtime, format!("execution error: {fault}"))
            };
        }

        match env.produced_dataset() {
            None => {
                warn!(%run_id, "script completed without a dataset binding");
                ExecutionOutcome::failed(FailureKind::Contract, "script did not produce a dataset")
            }
            Some(df) => {
                let dataset = df.clone();
                info!(%run_id, rows = dataset.row_count(), "execution succeeded");
                ExecutionOutcome::succeeded(dataset, env.output().to_string())
            }
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            name: "Capability-Restricted Interpreter".to_string(),
            max_script_length: self.config.max_script_length,
            timeout_secs: self.config.timeout.as_secs(),
            max_fuel: self.config.max_fuel,
            enforced_timeout: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, Column};

    fn engine() -> InterpreterEngine {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        InterpreterEngine::new(EngineConfig::default())
    }

    fn numeric(vals: &[i64]) -> Dataset {
        Dataset::from_columns(vec![Column::new(
            "x",
            vals.iter().map(|&v| Cell::Int(v)).collect(),
        )])
        .unwrap()
    }

    #[tokio::test]
    async fn doubles_a_numeric_column() {
        let outcome = engine()
            .execute("df['x'] = df['x'] * 2", &numeric(&[1, 2, 3]))
            .await;
        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(outcome.processed_rows, Some(3));
        let produced = outcome.dataset.as_ref().unwrap();
        let expected = Dataset::from_columns(vec![Column::new(
            "x",
            vec![Cell::Int(2), Cell::Int(4), Cell::Int(6)],
        )])
        .unwrap();
        assert!(produced.same_as(&expected));
        assert!(outcome.is_well_formed());
    }

    #[tokio::test]
    async fn os_import_never_executes() {
        let outcome = engine()
            .execute("import os\nos.system('ls')", &numeric(&[1]))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Policy));
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("policy violation"));
        assert!(outcome.is_well_formed());
    }

    #[tokio::test]
    async fn dropna_removes_the_fully_null_row() {
        let df = Dataset::from_columns(vec![
            Column::new(
                "a",
                vec![
                    Cell::Int(1),
                    Cell::Int(2),
                    Cell::Null,
                    Cell::Int(4),
                    Cell::Int(5),
                ],
            ),
            Column::new(
                "b",
                vec![
                    Cell::Str("p".into()),
                    Cell::Str("q".into()),
                    Cell::Null,
                    Cell::Str("s".into()),
                    Cell::Str("t".into()),
                ],
            ),
        ])
        .unwrap();
        let outcome = engine().execute("df = df.dropna()", &df).await;
        assert!(outcome.success);
        assert_eq!(outcome.processed_rows, Some(4));
    }

    #[tokio::test]
    async fn identity_transform_is_a_no_op() {
        let df = numeric(&[7, 8, 9]);
        let outcome = engine().execute("x = 1\n", &df).await;
        assert!(outcome.success);
        assert!(outcome.dataset.as_ref().unwrap().same_as(&df));
        assert_eq!(outcome.output, crate::outcome::EMPTY_OUTPUT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn unbounded_loop_is_cut_off_near_the_timeout() {
        let engine = InterpreterEngine::new(EngineConfig {
            timeout: Duration::from_millis(100),
            max_fuel: u64::MAX / 2,
            ..Default::default()
        });
        let started = Instant::now();
        let outcome = engine
            .execute("while True:\n    pass", &numeric(&[1]))
            .await;
        let elapsed = started.elapsed();
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Resource));
        assert!(
            elapsed < Duration::from_secs(3),
            "overrun too large: {elapsed:?}"
        );
        assert!(outcome.is_well_formed());
    }

    #[tokio::test]
    async fn runtime_fault_becomes_a_failed_outcome() {
        let outcome = engine()
            .execute("df['missing'] = df['nope'] * 2", &numeric(&[1]))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Runtime));
        let message = outcome.error_message.as_deref().unwrap();
        assert!(message.starts_with("execution error:"), "{message}");
        assert!(outcome.is_well_formed());
    }

    #[tokio::test]
    async fn losing_the_binding_is_a_contract_failure() {
        let outcome = engine().execute("del df", &numeric(&[1])).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Contract));
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("script did not produce a dataset")
        );
    }

    #[tokio::test]
    async fn captured_output_is_returned() {
        let outcome = engine()
            .execute("print('checking', len(df), 'rows')", &numeric(&[1, 2]))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "checking 2 rows\n");
    }

    #[tokio::test]
    async fn original_dataset_is_never_mutated() {
        let df = numeric(&[1, 2, 3]);
        let outcome = engine().execute("df['x'] = df['x'] * 10", &df).await;
        assert!(outcome.success);
        assert!(df.column("x").unwrap().cells[0].same(&Cell::Int(1)));
    }

    #[tokio::test]
    async fn concurrent_executions_do_not_interfere() {
        let engine = std::sync::Arc::new(engine());
        let mut handles = Vec::new();
        for i in 1..=8i64 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let df = numeric(&[i]);
                let script = format!("df['x'] = df['x'] * {i}");
                (i, engine.execute(&script, &df).await)
            }));
        }
        for handle in handles {
            let (i, outcome) = handle.await.unwrap();
            assert!(outcome.success);
            let produced = outcome.dataset.unwrap();
            assert!(produced.column("x").unwrap().cells[0].same(&Cell::Int(i * i)));
        }
    }

    #[tokio::test]
    async fn validate_reports_reason_and_bool_gate_matches() {
        let engine = engine();
        assert!(engine.validate("df = df.head(10)").await.is_ok());
        let err = engine.validate("eval('1')").await.unwrap_err();
        assert!(err.to_string().contains("eval"));
        assert!(!engine.validator().validate("eval('1')"));
    }
}
