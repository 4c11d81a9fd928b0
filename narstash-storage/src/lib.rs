//! Storage backends for a Nix binary cache.
//!
//! Every backend stores two kinds of resources: narinfo records, keyed by
//! the hash part of a store path, and NAR files, keyed by file name.
//! [`StorageBackend`] is the capability surface the HTTP endpoint and the
//! maintenance tooling are written against; [`Backend`] picks one of the
//! concrete implementations at runtime.
//!
//! Absence is only ever reported for a confirmed miss. If a backend cannot
//! tell whether something exists, the call fails instead.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;

pub mod config;
pub mod error;
pub mod github;
pub mod local;
pub mod s3;
mod spool;

pub use config::StorageConfig;
pub use error::{Result, StorageError};
pub use github::{GithubBackend, PruneOptions, PruneReport};
pub use local::LocalBackend;
pub use s3::S3Backend;

/// Streaming NAR body.
pub type NarStream = BoxStream<'static, std::io::Result<Bytes>>;

pub const NARINFO_SUFFIX: &str = ".narinfo";

pub fn narinfo_filename(hash: &str) -> String {
    format!("{hash}{NARINFO_SUFFIX}")
}

/// Reject keys that could escape their directory or key prefix.
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

pub trait StorageBackend: Send + Sync {
    fn has_narinfo(&self, hash: &str) -> impl Future<Output = Result<bool>> + Send;

    fn get_narinfo(&self, hash: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store a narinfo, replacing any previous record for `hash`.
    fn put_narinfo(&self, hash: &str, content: &str) -> impl Future<Output = Result<()>> + Send;

    fn has_nar(&self, filename: &str) -> impl Future<Output = Result<bool>> + Send;

    fn get_nar_stream(
        &self,
        filename: &str,
    ) -> impl Future<Output = Result<Option<NarStream>>> + Send;

    /// Store a NAR, replacing any previous file of the same name.
    fn put_nar_stream(
        &self,
        filename: &str,
        stream: NarStream,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Hashes of all narinfo records, sorted.
    fn list_narinfo(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Public download location for a NAR, if the backend has one that
    /// clients can fetch without going through the cache endpoint.
    fn nar_download_url(&self, _filename: &str) -> Option<String> {
        None
    }
}

/// The backend selected by configuration.
pub enum Backend {
    Local(LocalBackend),
    S3(S3Backend),
    GitHub(GithubBackend),
}

impl Backend {
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        Ok(match config {
            StorageConfig::Local(local) => Self::Local(LocalBackend::new(&local.root).await?),
            StorageConfig::S3(s3) => Self::S3(S3Backend::from_config(s3).await?),
            StorageConfig::GitHub(gh) => Self::GitHub(GithubBackend::from_config(gh).await?),
        })
    }

    pub fn as_github(&self) -> Option<&GithubBackend> {
        match self {
            Self::GitHub(gh) => Some(gh),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::S3(_) => "s3",
            Self::GitHub(_) => "github",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $b:ident => $call:expr) => {
        match $self {
            Backend::Local($b) => $call,
            Backend::S3($b) => $call,
            Backend::GitHub($b) => $call,
        }
    };
}

impl StorageBackend for Backend {
    async fn has_narinfo(&self, hash: &str) -> Result<bool> {
        dispatch!(self, b => b.has_narinfo(hash).await)
    }

    async fn get_narinfo(&self, hash: &str) -> Result<Option<String>> {
        dispatch!(self, b => b.get_narinfo(hash).await)
    }

    async fn put_narinfo(&self, hash: &str, content: &str) -> Result<()> {
        dispatch!(self, b => b.put_narinfo(hash, content).await)
    }

    async fn has_nar(&self, filename: &str) -> Result<bool> {
        dispatch!(self, b => b.has_nar(filename).await)
    }

    async fn get_nar_stream(&self, filename: &str) -> Result<Option<NarStream>> {
        dispatch!(self, b => b.get_nar_stream(filename).await)
    }

    async fn put_nar_stream(&self, filename: &str, stream: NarStream) -> Result<()> {
        dispatch!(self, b => b.put_nar_stream(filename, stream).await)
    }

    async fn list_narinfo(&self) -> Result<Vec<String>> {
        dispatch!(self, b => b.list_narinfo().await)
    }

    fn nar_download_url(&self, filename: &str) -> Option<String> {
        dispatch!(self, b => b.nar_download_url(filename))
    }
}
