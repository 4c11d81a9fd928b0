//! GitHub Releases as a NAR host.
//!
//! Narinfo records stay on local disk, where the process that just wrote
//! them can read them back immediately. NAR files live as assets of a
//! single release, which is durable and free to download from, but only
//! reachable through a paginated, eventually consistent REST API.
//!
//! Several writers (for example the jobs of a CI matrix) may share one
//! release. [`GithubBackend::fetch_all_narinfo`] pulls the narinfo records
//! the other writers mirrored into the release, and
//! [`GithubBackend::prune_assets`] removes NARs no narinfo refers to any
//! more, leaving a grace period for writes that have not propagated yet.

mod api;
mod prune;

pub use api::{GithubClient, ReleaseApi, ReleaseAsset};
pub use prune::{PruneOptions, PruneReport};

use crate::config::GithubConfig;
use crate::error::{IoErrorContext, Result, StorageError};
use crate::local::{list_narinfo_dir, write_atomic};
use crate::spool::{Spooled, spool, spool_bytes};
use crate::{NARINFO_SUFFIX, NarStream, StorageBackend, narinfo_filename, validate_key};
use api::encode_component;
use bytes::Bytes;
use futures::TryStreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Assets requested per page when listing a release.
pub const ASSETS_PER_PAGE: u32 = 100;

pub struct GithubBackend<A = GithubClient> {
    api: A,
    owner: String,
    repo: String,
    tag: String,
    download_host: String,
    narinfo_dir: PathBuf,
    mirror_narinfo: bool,
    /// Resolved on first use and kept for the lifetime of the process.
    /// A release deleted behind our back is not noticed until restart.
    release_id: OnceCell<u64>,
}

impl GithubBackend<GithubClient> {
    pub async fn from_config(config: &GithubConfig) -> Result<Self> {
        Self::new(GithubClient::new(config)?, config).await
    }
}

impl<A: ReleaseApi> GithubBackend<A> {
    pub async fn new(api: A, config: &GithubConfig) -> Result<Self> {
        for (field, value) in [
            ("owner", &config.owner),
            ("repo", &config.repo),
            ("tag", &config.tag),
        ] {
            if value.is_empty() {
                return Err(StorageError::config(format!("github {field} must not be empty")));
            }
        }

        tokio::fs::create_dir_all(&config.narinfo_dir)
            .await
            .io_context(format!(
                "Failed to create {}",
                config.narinfo_dir.display()
            ))?;

        Ok(Self {
            api,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            tag: config.tag.clone(),
            download_host: config.download_host.clone(),
            narinfo_dir: config.narinfo_dir.clone(),
            mirror_narinfo: config.mirror_narinfo,
            release_id: OnceCell::new(),
        })
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn narinfo_dir(&self) -> &Path {
        &self.narinfo_dir
    }

    fn narinfo_path(&self, hash: &str) -> Result<PathBuf> {
        validate_key(hash)?;
        Ok(self.narinfo_dir.join(narinfo_filename(hash)))
    }

    /// Look the release up by tag, creating it if it does not exist yet.
    async fn release_id(&self) -> Result<u64> {
        self.release_id
            .get_or_try_init(|| async {
                match self.api.release_by_tag(&self.tag).await {
                    Ok(Some(id)) => Ok(id),
                    Ok(None) => {
                        info!("release {} not found, creating it", self.tag);
                        self.api.create_release(&self.tag).await
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .copied()
    }

    /// Every asset of the release, across all pages.
    pub async fn list_all_assets(&self) -> Result<Vec<ReleaseAsset>> {
        let release_id = self.release_id().await?;
        let mut assets = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .api
                .list_assets(release_id, page, ASSETS_PER_PAGE)
                .await?;
            let full = batch.len() == ASSETS_PER_PAGE as usize;
            assets.extend(batch);
            if !full {
                break;
            }
            page += 1;
        }
        debug!("release {} has {} assets", self.tag, assets.len());
        Ok(assets)
    }

    async fn find_asset(&self, name: &str) -> Result<Option<ReleaseAsset>> {
        Ok(self
            .list_all_assets()
            .await?
            .into_iter()
            .find(|asset| asset.name == name))
    }

    /// Upload `spooled` as `name`, deleting any asset already using that name.
    ///
    /// The API has no atomic replace. If the delete fails the upload is
    /// still attempted, and a lingering duplicate makes it fail on its own.
    async fn replace_asset(&self, name: &str, spooled: &Spooled) -> Result<ReleaseAsset> {
        let release_id = self.release_id().await?;
        if let Some(existing) = self.find_asset(name).await? {
            debug!("replacing asset {name} ({})", existing.id);
            if let Err(e) = self.api.delete_asset(existing.id).await {
                warn!("failed to delete existing asset {name}: {e}");
            }
        }
        let asset = self
            .api
            .upload_asset(release_id, name, spooled.path(), spooled.len)
            .await?;
        info!("uploaded asset {name} ({} bytes)", spooled.len);
        Ok(asset)
    }

    /// Copy narinfo records other writers mirrored into the release.
    ///
    /// Files already present locally are left alone. Returns how many
    /// records were fetched.
    pub async fn fetch_all_narinfo(&self) -> Result<usize> {
        let assets = self.list_all_assets().await?;
        let mut fetched = 0;

        for asset in assets {
            let Some(hash) = asset.name.strip_suffix(NARINFO_SUFFIX) else {
                continue;
            };
            if validate_key(hash).is_err() {
                warn!("skipping asset with unusable name {:?}", asset.name);
                continue;
            }
            let path = self.narinfo_dir.join(&asset.name);
            if tokio::fs::try_exists(&path)
                .await
                .io_context(format!("Failed to stat {}", path.display()))?
            {
                continue;
            }

            let content: Vec<Bytes> = self
                .api
                .download_asset(&asset)
                .await?
                .try_collect()
                .await
                .map_err(|e| StorageError::transient(format!("download asset {}", asset.name), e))?;

            if write_new(&path, &content.concat()).await? {
                debug!("fetched {}", asset.name);
                fetched += 1;
            }
        }

        info!("fetched {fetched} narinfo records from release {}", self.tag);
        Ok(fetched)
    }

    /// Public URL for a NAR asset, served by GitHub without authentication.
    pub fn download_url(&self, filename: &str) -> String {
        format!(
            "https://{}/{}/{}/releases/download/{}/{}",
            self.download_host,
            self.owner,
            self.repo,
            encode_component(&self.tag),
            encode_component(filename)
        )
    }
}

/// NARs and mirrored narinfo records share the release's asset names, so a
/// NAR may never be called `*.narinfo`.
fn validate_nar_name(filename: &str) -> Result<()> {
    validate_key(filename)?;
    if filename.ends_with(NARINFO_SUFFIX) {
        return Err(StorageError::InvalidKey {
            key: filename.to_string(),
        });
    }
    Ok(())
}

/// Write `content` to `path` unless something is already there.
async fn write_new(path: &Path, content: &[u8]) -> Result<bool> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let spooled = spool_bytes(content, Some(dir)).await?;
    spooled
        .persist_noclobber(path)
        .await
        .io_context(format!("Failed to write {}", path.display()))
}

impl<A: ReleaseApi> StorageBackend for GithubBackend<A> {
    async fn has_narinfo(&self, hash: &str) -> Result<bool> {
        let path = self.narinfo_path(hash)?;
        tokio::fs::try_exists(&path)
            .await
            .io_context(format!("Failed to stat {}", path.display()))
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

        if self.mirror_narinfo {
            let spooled = spool_bytes(content.as_bytes(), None).await?;
            self.replace_asset(&narinfo_filename(hash), &spooled).await?;
        }
        Ok(())
    }

    async fn has_nar(&self, filename: &str) -> Result<bool> {
        validate_nar_name(filename)?;
        Ok(self.find_asset(filename).await?.is_some())
    }

    async fn get_nar_stream(&self, filename: &str) -> Result<Option<NarStream>> {
        validate_nar_name(filename)?;
        match self.find_asset(filename).await? {
            Some(asset) => Ok(Some(self.api.download_asset(&asset).await?)),
            None => Ok(None),
        }
    }

    async fn put_nar_stream(&self, filename: &str, stream: NarStream) -> Result<()> {
        validate_nar_name(filename)?;
        let spooled = spool(stream, None).await?;
        self.replace_asset(filename, &spooled).await?;
        Ok(())
    }

    async fn list_narinfo(&self) -> Result<Vec<String>> {
        list_narinfo_dir(&self.narinfo_dir).await
    }

    fn nar_download_url(&self, filename: &str) -> Option<String> {
        Some(self.download_url(filename))
    }
}
