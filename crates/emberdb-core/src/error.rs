use thiserror::Error;

/// Canonical error type for query-planning operations.
///
/// Planning errors are raised synchronously while the plan tree is being
/// composed, never deferred to execution. Matcher and partition-planner
/// failures reuse this type and flow through `?` unchanged.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Operation cannot be decomposed across a multi-partition expansion.
    #[error("{operation} is not supported across shard-key regex expansion: {reason}")]
    UnsupportedOperation {
        /// Query-language name of the offending operation (e.g. `"topk"`).
        operation: String,
        /// Human-readable explanation of the restriction.
        reason: String,
    },

    /// The shard-key matcher resolved the selector to zero partitions.
    #[error("no partitions match shard-key selector {selector}")]
    NoMatchingPartitions {
        /// Rendered shard-key predicate set that failed to match.
        selector: String,
    },

    /// Input or configuration failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl PlanError {
    /// Creates an `UnsupportedOperation` variant.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `NoMatchingPartitions` variant.
    #[must_use]
    pub fn no_partitions(selector: impl Into<String>) -> Self {
        Self::NoMatchingPartitions {
            selector: selector.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Convenient result alias for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_operation_names_the_operator() {
        let err = PlanError::unsupported("topk", "partial results cannot be merged");
        assert_eq!(
            err.to_string(),
            "topk is not supported across shard-key regex expansion: partial results cannot be merged"
        );
    }

    #[test]
    fn no_partitions_renders_selector() {
        let err = PlanError::no_partitions("tenant=~\"acme.*\"");
        assert!(err.to_string().contains("tenant=~\"acme.*\""));
    }
}
