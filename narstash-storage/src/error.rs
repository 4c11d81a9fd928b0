use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage key {key:?}")]
    InvalidKey { key: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend could not be reached or answered with an unexpected error.
    /// Never means "absent".
    #[error("{operation} failed: {reason}")]
    Transient { operation: String, reason: String },

    /// A mutating remote call was refused.
    #[error("{operation} rejected with status {status}: {body}")]
    Rejected {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid storage configuration: {reason}")]
    Config { reason: String },
}

impl StorageError {
    pub fn transient(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether the failure came from a remote service rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Rejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Extension trait for adding context to IO errors
pub trait IoErrorContext<T> {
    fn io_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> IoErrorContext<T> for std::result::Result<T, std::io::Error> {
    fn io_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| StorageError::Io {
            context: context.into(),
            source: e,
        })
    }
}
