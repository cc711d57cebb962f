//! Error types shared by every backend and composite cache in the workspace.
//!
//! The taxonomy follows the cache contract's error kinds rather than a
//! type-per-backend scheme: `NotFound` is deliberately absent here because
//! it is never raised — it is only ever surfaced through the boolean/`Option`
//! return of `try_get`/`remove` (see [`crate::backend::CacheBackend`]).

use miette::Diagnostic;
use thiserror::Error;

/// Error type shared by cache backends, composite caches, and the pipeline.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A null/empty key, empty bucket name, or empty mapped object name was supplied.
    #[error("invalid argument: {message}")]
    #[diagnostic(
        code(lattice::invalid_argument),
        help("keys and bucket/object names must be non-null and non-empty")
    )]
    InvalidArgument {
        /// Description of what was invalid.
        message: String,
    },

    /// A capability (enumeration, events, timestamps) was requested on a
    /// backend that does not implement it.
    #[error("operation not supported: {operation}")]
    #[diagnostic(
        code(lattice::not_supported),
        help("check which capability traits this backend implements")
    )]
    NotSupported {
        /// The operation that was attempted.
        operation: String,
    },

    /// I/O or transport failure. Read paths convert this to "not found";
    /// write paths log and swallow it so one tier cannot poison a composite.
    #[error("backend failure during {context}")]
    #[diagnostic(
        code(lattice::backend_failure),
        help("the underlying I/O or transport error is attached as the source")
    )]
    BackendFailure {
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        /// What the backend was doing when the failure occurred.
        context: String,
    },

    /// The operation observed its cancellation token tripped.
    #[error("operation cancelled")]
    #[diagnostic(code(lattice::cancelled))]
    Cancelled,

    /// A `Timeout` modifier's deadline elapsed before the inner transform completed.
    #[error("operation timed out after {elapsed_ms}ms")]
    #[diagnostic(code(lattice::timeout))]
    Timeout {
        /// How long the operation ran before being aborted, in milliseconds.
        elapsed_ms: u64,
    },

    /// Pipeline misuse (write after dispose, double `build`, reorder-buffer
    /// overflow) or enumeration failure during a hybrid cache's sync pass.
    #[error("invalid operation: {message}")]
    #[diagnostic(code(lattice::invalid_operation))]
    InvalidOperation {
        /// Description of the misuse.
        message: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build an [`Error::NotSupported`].
    #[must_use]
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Build an [`Error::BackendFailure`] wrapping an arbitrary source error.
    #[must_use]
    pub fn backend_failure(
        source: impl std::error::Error + Send + Sync + 'static,
        context: impl Into<String>,
    ) -> Self {
        Self::BackendFailure {
            source: Box::new(source),
            context: context.into(),
        }
    }

    /// Build an [`Error::InvalidOperation`].
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Result type used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_message() {
        let err = Error::invalid_argument("key must not be null");
        assert_eq!(err.to_string(), "invalid argument: key must not be null");
    }

    #[test]
    fn not_supported_message() {
        let err = Error::not_supported("keys()");
        assert_eq!(err.to_string(), "operation not supported: keys()");
    }

    #[test]
    fn backend_failure_wraps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::backend_failure(io_err, "reading value file");
        assert_eq!(err.to_string(), "backend failure during reading value file");
        assert!(std::error::Error::source(&err).is_some());
    }
}
