use narstash_storage::StorageError;
use narstash_store_core::{NarInfoError, SigningError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("NARInfo error: {0}")]
    NarInfo(#[from] NarInfoError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Upload refused: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid signing key: {reason}")]
    InvalidSigningKey { reason: String },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to read request body: {reason}")]
    Payload { reason: String },

    #[error("`{command}` needs the github backend, configured backend is {backend}")]
    UnsupportedBackend {
        command: &'static str,
        backend: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no upload token configured")]
    UploadsDisabled,

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Extension trait for adding context to IO errors
pub trait IoErrorContext<T> {
    fn io_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> IoErrorContext<T> for std::result::Result<T, std::io::Error> {
    fn io_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CacheError::Io {
            context: context.into(),
            source: e,
        })
    }
}
