//! Panic recovery utilities for kernel operations.
//!
//! Guard evaluators and behavior units run application code supplied by the
//! agent front-end; a panic in either must stay contained at the unit
//! boundary instead of taking the dispatcher down with it.

use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a function with panic recovery.
///
/// If the function panics, the panic is captured, logged, and converted
/// to an error.
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                "panic_recovered: operation={}, panic={}",
                operation_name,
                panic_msg
            );

            Err(Error::internal(format!(
                "panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
pub(crate) fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_passes_through_success() {
        let result = with_recovery(|| Ok(42), "test_operation");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn recovery_passes_through_errors() {
        let result: Result<()> = with_recovery(
            || Err(Error::validation("test error".to_string())),
            "test_operation",
        );
        assert!(result.is_err());
    }

    #[test]
    fn recovery_captures_str_panics() {
        let result: Result<()> = with_recovery(
            || {
                panic!("test panic");
            },
            "test_operation",
        );

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("panic in test_operation"));
        assert!(err_msg.contains("test panic"));
    }

    #[test]
    fn recovery_captures_string_panics() {
        let result: Result<()> = with_recovery(
            || {
                std::panic::panic_any(format!("dynamic {}", 7));
            },
            "test_operation",
        );

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("dynamic 7"));
    }
}
