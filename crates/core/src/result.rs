//! The single result shape returned for every accepted invocation.

use serde::Serialize;

use crate::scripting::engine::EngineOutput;
use crate::status::InvocationStatus;

/// Exit status reported by the engine for a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status forced onto results whose invocation faulted instead of
/// reporting a status (spawn failure, panic, timeout, shutdown).
pub const EXIT_ENGINE_FAULT: i32 = -1;

/// Outcome of one invocation, created once by the pool and consumed once by
/// the front-end that routes it back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// `true` exactly when `exit_status` is [`EXIT_SUCCESS`].
    pub succeeded: bool,
    pub exit_status: i32,
    /// On success, all output items joined with the pool delimiter. On
    /// failure, the engine's first reported error (or empty).
    pub output: String,
    /// Output items in the order the engine emitted them.
    pub items: Vec<String>,
    /// Human-readable failure description when `succeeded` is false.
    pub error_detail: Option<String>,
}

impl ExecutionResult {
    /// Map a controlled engine run onto a result.
    pub fn from_engine(output: EngineOutput, delimiter: &str) -> Self {
        if output.exit_code == EXIT_SUCCESS {
            Self {
                succeeded: true,
                exit_status: EXIT_SUCCESS,
                output: output.items.join(delimiter),
                items: output.items,
                error_detail: None,
            }
        } else {
            Self {
                succeeded: false,
                exit_status: output.exit_code,
                output: output.first_error.clone().unwrap_or_default(),
                items: output.items,
                error_detail: output.first_error,
            }
        }
    }

    /// A failure that did not come from a controlled engine status.
    pub fn fault(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            succeeded: false,
            exit_status: EXIT_ENGINE_FAULT,
            output: String::new(),
            items: Vec::new(),
            error_detail: Some(message),
        }
    }

    /// Text a front-end sends back to the caller.
    pub fn body(&self) -> &str {
        if self.succeeded {
            &self.output
        } else {
            self.error_detail.as_deref().unwrap_or(&self.output)
        }
    }

    pub fn status(&self) -> InvocationStatus {
        InvocationStatus::for_result(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, items: &[&str], first_error: Option<&str>) -> EngineOutput {
        EngineOutput {
            exit_code,
            items: items.iter().map(|s| s.to_string()).collect(),
            first_error: first_error.map(str::to_string),
        }
    }

    #[test]
    fn zero_exit_is_success_with_joined_output() {
        let result = ExecutionResult::from_engine(output(0, &["a", "b", "c"], None), ",");
        assert!(result.succeeded);
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.output, "a,b,c");
        assert_eq!(result.body(), "a,b,c");
        assert!(result.error_detail.is_none());
    }

    #[test]
    fn join_keeps_duplicates_and_order_without_trailing_delimiter() {
        let result = ExecutionResult::from_engine(output(0, &["x", "x", "y", "x"], None), "\n");
        assert_eq!(result.output, "x\nx\ny\nx");
        assert_eq!(result.items, ["x", "x", "y", "x"]);
    }

    #[test]
    fn single_item_is_output_verbatim() {
        let result = ExecutionResult::from_engine(output(0, &["OK"], None), "\n");
        assert_eq!(result.output, "OK");
    }

    #[test]
    fn zero_exit_without_items_is_empty_success() {
        let result = ExecutionResult::from_engine(output(0, &[], None), "\n");
        assert!(result.succeeded);
        assert_eq!(result.output, "");
    }

    #[test]
    fn non_zero_exit_carries_first_error() {
        let result = ExecutionResult::from_engine(
            output(1, &["partial"], Some("Cannot find path")),
            "\n",
        );
        assert!(!result.succeeded);
        assert_eq!(result.exit_status, 1);
        assert_eq!(result.output, "Cannot find path");
        assert_eq!(result.error_detail.as_deref(), Some("Cannot find path"));
        assert_eq!(result.body(), "Cannot find path");
        assert_eq!(result.items, ["partial"]);
    }

    #[test]
    fn non_zero_exit_without_error_has_empty_body() {
        let result = ExecutionResult::from_engine(output(3, &[], None), "\n");
        assert!(!result.succeeded);
        assert_eq!(result.body(), "");
    }

    #[test]
    fn fault_uses_sentinel_status() {
        let result = ExecutionResult::fault("engine exploded");
        assert!(!result.succeeded);
        assert_eq!(result.exit_status, EXIT_ENGINE_FAULT);
        assert_eq!(result.body(), "engine exploded");
    }

    #[test]
    fn succeeded_matches_exit_status_for_any_code() {
        for code in [-1, 0, 1, 2, 255] {
            let result = ExecutionResult::from_engine(output(code, &["o"], None), "\n");
            assert_eq!(result.succeeded, code == 0, "exit code {code}");
        }
    }
}
