use super::{GithubBackend, ReleaseApi};
use crate::NARINFO_SUFFIX;
use crate::error::{IoErrorContext, Result};
use chrono::{DateTime, Duration, Utc};
use narstash_store_core::narinfo::{nar_filename, url_of};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default)]
pub struct PruneOptions {
    /// Orphaned assets younger than this many days are kept. `0` deletes
    /// orphans immediately.
    pub retention_days: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    /// Orphans inside the retention window, and orphans whose deletion failed.
    pub kept: Vec<String>,
    pub referenced: Vec<String>,
}

impl<A: ReleaseApi> GithubBackend<A> {
    /// Delete NAR assets that no local narinfo refers to.
    pub async fn prune_assets(&self, options: PruneOptions) -> Result<PruneReport> {
        self.prune_assets_at(options, Utc::now()).await
    }

    /// Pull the narinfo records other writers mirrored into the release,
    /// then prune. Without the fetch, a NAR whose narinfo only exists as
    /// an asset looks orphaned.
    pub async fn fetch_and_prune(&self, options: PruneOptions) -> Result<PruneReport> {
        self.fetch_and_prune_at(options, Utc::now()).await
    }

    pub async fn fetch_and_prune_at(
        &self,
        options: PruneOptions,
        now: DateTime<Utc>,
    ) -> Result<PruneReport> {
        self.fetch_all_narinfo().await?;
        self.prune_assets_at(options, now).await
    }

    /// [`Self::prune_assets`] with an explicit notion of "now".
    pub async fn prune_assets_at(
        &self,
        options: PruneOptions,
        now: DateTime<Utc>,
    ) -> Result<PruneReport> {
        let (assets, referenced) =
            tokio::try_join!(self.list_all_assets(), self.referenced_nars())?;

        let cutoff = (options.retention_days > 0)
            .then(|| now - Duration::days(i64::from(options.retention_days)));

        let mut report = PruneReport::default();
        for asset in assets {
            if asset.name.ends_with(NARINFO_SUFFIX) {
                continue;
            }
            if referenced.contains(&asset.name) {
                report.referenced.push(asset.name);
                continue;
            }
            if cutoff.is_some_and(|cutoff| asset.created_at >= cutoff) {
                report.kept.push(asset.name);
                continue;
            }
            match self.api.delete_asset(asset.id).await {
                Ok(()) => {
                    info!("deleted orphaned asset {}", asset.name);
                    report.deleted.push(asset.name);
                }
                Err(e) => {
                    warn!("failed to delete orphaned asset {}: {e}", asset.name);
                    report.kept.push(asset.name);
                }
            }
        }

        report.deleted.sort();
        report.kept.sort();
        report.referenced.sort();
        info!(
            "pruned release {}: {} deleted, {} kept, {} referenced",
            self.tag,
            report.deleted.len(),
            report.kept.len(),
            report.referenced.len()
        );
        Ok(report)
    }

    /// NAR file names named by the `URL:` field of every local narinfo.
    async fn referenced_nars(&self) -> Result<HashSet<String>> {
        let mut referenced = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.narinfo_dir)
            .await
            .io_context(format!("Failed to list {}", self.narinfo_dir.display()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .io_context(format!("Failed to list {}", self.narinfo_dir.display()))?
        {
            let path = entry.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(NARINFO_SUFFIX) && !n.starts_with('.'))
            {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .io_context(format!("Failed to read {}", path.display()))?;
            if let Some(url) = url_of(&content) {
                referenced.insert(nar_filename(url).to_string());
            }
        }

        Ok(referenced)
    }
}
