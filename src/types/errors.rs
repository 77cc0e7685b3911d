//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Hive kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (malformed input to a kernel API).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (unknown agent, space, context, or service).
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists (duplicate root context, duplicate service name).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid agent or service state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// A strong service dependency names an unregistered service.
    /// Fatal at kernel startup.
    #[error("missing dependency: service '{service}' requires '{dependency}', which is not registered")]
    MissingDependency { service: String, dependency: String },

    /// A cycle among strong service dependencies.
    /// Fatal at kernel startup; no service is started.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Operation rejected because the kernel is shutting down.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Internal errors (recovered panics, broken invariants).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn missing_dependency(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::MissingDependency {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    pub fn cyclic_dependency(cycle: Vec<String>) -> Self {
        Self::CyclicDependency { cycle }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_dependency_names_the_cycle() {
        let err = Error::cyclic_dependency(vec![
            "context".to_string(),
            "logging".to_string(),
            "context".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "cyclic dependency: context -> logging -> context"
        );
    }

    #[test]
    fn missing_dependency_names_both_services() {
        let err = Error::missing_dependency("context", "logging");
        let msg = err.to_string();
        assert!(msg.contains("'context'"));
        assert!(msg.contains("'logging'"));
    }
}
