use crate::error::{IoErrorContext, Result};
use crate::spool::{spool, spool_bytes};
use crate::{NARINFO_SUFFIX, NarStream, StorageBackend, narinfo_filename, validate_key};
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Narinfo and NAR files in two directories under a root.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    narinfo_dir: PathBuf,
    nar_dir: PathBuf,
}

impl LocalBackend {
    pub async fn new(root: &Path) -> Result<Self> {
        let backend = Self {
            narinfo_dir: root.join("narinfo"),
            nar_dir: root.join("nar"),
        };
        for dir in [&backend.narinfo_dir, &backend.nar_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .io_context(format!("Failed to create {}", dir.display()))?;
        }
        Ok(backend)
    }

    fn narinfo_path(&self, hash: &str) -> Result<PathBuf> {
        validate_key(hash)?;
        Ok(self.narinfo_dir.join(narinfo_filename(hash)))
    }

    fn nar_path(&self, filename: &str) -> Result<PathBuf> {
        validate_key(filename)?;
        Ok(self.nar_dir.join(filename))
    }
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .io_context(format!("Failed to stat {}", path.display()))
}

/// Write `content` next to `path` and rename it into place.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let spooled = spool_bytes(content, Some(dir)).await?;
    spooled
        .persist(path)
        .await
        .io_context(format!("Failed to move file into place at {}", path.display()))?;
    Ok(())
}

impl StorageBackend for LocalBackend {
    async fn has_narinfo(&self, hash: &str) -> Result<bool> {
        exists(&self.narinfo_path(hash)?).await
    }

    async fn get_narinfo(&self, hash: &str) -> Result<Option<String>> {
        let path = self.narinfo_path(hash)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).io_context(format!("Failed to read {}", path.display())),
        }
    }

    async fn put_narinfo(&self, hash: &str, content: &str) -> Result<()> {
        let path = self.narinfo_path(hash)?;
        write_atomic(&path, content.as_bytes()).await?;
        debug!("stored narinfo {}", path.display());
        Ok(())
    }

    async fn has_nar(&self, filename: &str) -> Result<bool> {
        exists(&self.nar_path(filename)?).await
    }

    async fn get_nar_stream(&self, filename: &str) -> Result<Option<NarStream>> {
        let path = self.nar_path(filename)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(ReaderStream::new(file).boxed())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).io_context(format!("Failed to open {}", path.display())),
        }
    }

    async fn put_nar_stream(&self, filename: &str, stream: NarStream) -> Result<()> {
        let path = self.nar_path(filename)?;
        let spooled = spool(stream, Some(&self.nar_dir)).await?;
        let len = spooled.len;
        spooled
            .persist(&path)
            .await
            .io_context(format!("Failed to move NAR into place at {}", path.display()))?;
        debug!("stored NAR {} ({len} bytes)", path.display());
        Ok(())
    }

    async fn list_narinfo(&self) -> Result<Vec<String>> {
        list_narinfo_dir(&self.narinfo_dir).await
    }
}

/// Hashes of all `*.narinfo` files in `dir`, sorted.
pub(crate) async fn list_narinfo_dir(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .io_context(format!("Failed to list {}", dir.display()))?;
    let mut hashes = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .io_context(format!("Failed to list {}", dir.display()))?
    {
        let name = entry.file_name();
        if let Some(hash) = name.to_str().and_then(|n| n.strip_suffix(NARINFO_SUFFIX)) {
            if !hash.is_empty() && !hash.starts_with('.') {
                hashes.push(hash.to_string());
            }
        }
    }
    hashes.sort();
    Ok(hashes)
}
