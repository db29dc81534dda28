//! nanoblock error types

/// nanoblock result type
pub type Result<T> = std::result::Result<T, Error>;

/// nanoblock errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations (shape mismatches, dtype errors, backend failures)
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Invalid hyperparameter or layer configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of what went wrong
        reason: String,
    },

    /// Gradient representation the optimizer cannot consume
    #[error("unsupported gradient representation: {reason}")]
    UnsupportedGradient {
        /// Description of what went wrong
        reason: String,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Weight lookup or config loading error
    #[error("model error: {reason}")]
    ModelError {
        /// Description of what went wrong
        reason: String,
    },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }
}
