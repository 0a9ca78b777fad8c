//! The fixed-shape result contract handed back to callers.
//!
//! Pure data. Whatever happens inside the runner, callers see this shape
//! and never an internal error object or a stack trace.

use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// Why an execution failed, when it did. Lets callers decide whether a
/// retry with a shorter or simpler script makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by static validation
    Policy,
    /// Ran, but left no usable dataset binding
    Contract,
    /// A fault raised while the script ran
    Runtime,
    /// Timeout or step budget exceeded
    Resource,
}

/// Placeholder used when a successful script printed nothing.
pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "script executed without output";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// The script's final dataset binding; absent on failure
    pub dataset: Option<Dataset>,
    /// Captured textual output
    pub output: String,
    /// Row count of the produced dataset
    pub processed_rows: Option<usize>,
    pub error_message: Option<String>,
    pub failure: Option<FailureKind>,
}

impl ExecutionOutcome {
    pub fn succeeded(dataset: Dataset, output: String) -> Self {
        let output = if output.is_empty() {
            EMPTY_OUTPUT_PLACEHOLDER.to_string()
        } else {
            output
        };
        let processed_rows = dataset.row_count();
        Self {
            success: true,
            dataset: Some(dataset),
            output,
            processed_rows: Some(processed_rows),
            error_message: None,
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            dataset: None,
            output: String::new(),
            processed_rows: None,
            error_message: Some(message.into()),
            failure: Some(kind),
        }
    }

    /// JSON shape handed to the API layer verbatim.
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// The invariant callers rely on: success exactly when a dataset is
    /// present and no error message is set.
    pub fn is_well_formed(&self) -> bool {
        if self.success {
            self.dataset.is_some()
                && self.error_message.is_none()
                && self.processed_rows == self.dataset.as_ref().map(|d| d.row_count())
        } else {
            self.dataset.is_none() && self.error_message.is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, Column};

    #[test]
    fn success_fills_row_count_and_placeholder() {
        let df = Dataset::from_columns(vec![Column::new("x", vec![Cell::Int(1)])]).unwrap();
        let outcome = ExecutionOutcome::succeeded(df, String::new());
        assert!(outcome.success);
        assert_eq!(outcome.processed_rows, Some(1));
        assert_eq!(outcome.output, EMPTY_OUTPUT_PLACEHOLDER);
        assert!(outcome.is_well_formed());
    }

    #[test]
    fn failure_shape() {
        let outcome = ExecutionOutcome::failed(FailureKind::Runtime, "execution error: boom");
        assert!(!outcome.success);
        assert!(outcome.dataset.is_none());
        assert_eq!(outcome.failure, Some(FailureKind::Runtime));
        assert!(outcome.is_well_formed());
    }

    #[test]
    fn serializes_failure_kind_as_snake_case() {
        let outcome = ExecutionOutcome::failed(FailureKind::Resource, "too slow");
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"resource\""));
    }
}
