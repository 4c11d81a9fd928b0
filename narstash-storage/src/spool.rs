//! Spooling of upload streams to disk.
//!
//! Remote APIs that need a `Content-Length` up front get a file to stream
//! from instead of a fully buffered body.

use crate::NarStream;
use crate::error::{IoErrorContext, Result};
use bytes::Bytes;
use futures::StreamExt;
use std::io::{self, ErrorKind};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

pub(crate) struct Spooled {
    pub(crate) file: NamedTempFile,
    pub(crate) len: u64,
}

impl Spooled {
    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    /// Rename the spool file to `path`, replacing whatever is there.
    pub(crate) async fn persist(self, path: &Path) -> io::Result<()> {
        let target = path.to_path_buf();
        blocking(move || self.file.persist(&target).map(drop).map_err(|e| e.error)).await
    }

    /// Rename the spool file to `path` unless it already exists. Returns
    /// whether the file was moved.
    pub(crate) async fn persist_noclobber(self, path: &Path) -> io::Result<bool> {
        let target = path.to_path_buf();
        blocking(move || match self.file.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        })
        .await
    }
}

/// Run synchronous filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

/// Drain `stream` into a temporary file, in `dir` when given.
pub(crate) async fn spool(mut stream: NarStream, dir: Option<&Path>) -> Result<Spooled> {
    let dir = dir.map(Path::to_path_buf);
    let (tmp, file) = blocking(move || {
        let tmp = match &dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }?;
        let file = tmp.reopen()?;
        Ok((tmp, file))
    })
    .await
    .io_context("Failed to create spool file")?;

    let mut file = tokio::fs::File::from_std(file);
    let mut len = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.io_context("Failed to read upload stream")?;
        file.write_all(&chunk)
            .await
            .io_context("Failed to write spool file")?;
        len += chunk.len() as u64;
    }
    file.flush().await.io_context("Failed to flush spool file")?;
    file.sync_all().await.io_context("Failed to sync spool file")?;

    Ok(Spooled { file: tmp, len })
}

pub(crate) async fn spool_bytes(content: &[u8], dir: Option<&Path>) -> Result<Spooled> {
    let chunk: std::io::Result<Bytes> = Ok(Bytes::copy_from_slice(content));
    spool(futures::stream::iter([chunk]).boxed(), dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spool_counts_length() {
        let dir = TempDir::new().unwrap();
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
        ];
        let spooled = spool(futures::stream::iter(chunks).boxed(), Some(dir.path()))
            .await
            .unwrap();

        assert_eq!(spooled.len, 7);
        assert_eq!(std::fs::read(spooled.path()).unwrap(), b"abcdefg");
    }

    #[tokio::test]
    async fn test_persist_noclobber_leaves_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("x.narinfo");

        let first = spool_bytes(b"first", Some(dir.path())).await.unwrap();
        assert!(first.persist_noclobber(&target).await.unwrap());

        let second = spool_bytes(b"second", Some(dir.path())).await.unwrap();
        assert!(!second.persist_noclobber(&target).await.unwrap());
        assert_eq!(std::fs::read(&target).unwrap(), b"first");

        let third = spool_bytes(b"third", Some(dir.path())).await.unwrap();
        third.persist(&target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"third");
    }
}
