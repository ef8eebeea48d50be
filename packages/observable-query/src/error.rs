//! Structured error types for observable operations.
//!
//! `OperationError` provides pattern-matchable errors for every synchronous,
//! local failure an [`Operation`](crate::Operation) can report. None of them
//! corrupt lifecycle state: a failed call leaves the operation exactly as it
//! was.
//!
//! # The Stream Boundary Rule
//!
//! > **No error ever crosses the result stream as an `Err`.**
//!
//! - Request failures travel inside a [`ResultValue`](crate::ResultValue) as
//!   an [`OperationException`](crate::OperationException)
//! - Stale results are dropped silently, they are race noise and not errors
//! - Side-effect callback failures use `anyhow` and are logged, never
//!   propagated
//!
//! # Example
//!
//! ```ignore
//! use observable_query::OperationError;
//!
//! match operation.refetch() {
//!     Ok(pending) => { let _ = pending.wait().await?; }
//!     Err(OperationError::IllegalState { lifecycle, .. }) => {
//!         tracing::debug!(%lifecycle, "refetch ignored");
//!     }
//!     Err(other) => return Err(other.into()),
//! }
//! ```

use thiserror::Error;

use crate::core::OperationId;
use crate::lifecycle::Lifecycle;

/// Errors reported synchronously by operation methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The requested action is not legal in the current lifecycle state.
    #[error("cannot {action} operation {operation} while {lifecycle}")]
    IllegalState {
        /// The operation the action was attempted on.
        operation: OperationId,
        /// Lifecycle state at the time of the attempt.
        lifecycle: Lifecycle,
        /// Short name of the attempted action.
        action: &'static str,
    },

    /// The operation's configuration does not permit the request.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// The request arguments are incomplete or invalid.
    #[error("validation error: {message}")]
    Validation {
        /// What failed validation.
        message: String,
    },

    /// The request executor has no record of the operation.
    #[error("operation {operation} is unknown to the request executor")]
    UnknownOperation {
        /// The identity the executor did not recognize.
        operation: OperationId,
    },

    /// The task routing an asynchronous result was cancelled or panicked.
    #[error("result routing for operation {operation} was interrupted")]
    Interrupted {
        /// The operation whose result was lost.
        operation: OperationId,
    },
}

impl OperationError {
    /// Build a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
