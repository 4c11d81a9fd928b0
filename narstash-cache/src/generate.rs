//! Static snapshot of the cache.
//!
//! The output directory can be published by any static file host and used
//! as a substituter. Narinfo records are copied verbatim. When the backend
//! hands out public NAR URLs the `URL:` field points there, otherwise the
//! NAR files are copied next to the records.

use std::collections::HashSet;
use std::path::Path;

use futures::StreamExt;
use narstash_storage::{Backend, StorageBackend, narinfo_filename};
use narstash_store_core::narinfo::{nar_filename, rewrite_url, url_of};
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::error::{IoErrorContext, Result};
use crate::{cacheinfo, root};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct GenerateReport {
    /// Narinfo records written.
    pub narinfo: usize,
    /// NAR files copied into `nar/`.
    pub nars_copied: usize,
    /// Hashes left out because their record or NAR could not be found.
    pub skipped: Vec<String>,
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .io_context(format!("Failed to write {}", path.display()))
}

/// Write the snapshot into `out_dir`. `base_url` is the address the
/// snapshot will be served from and only ends up on the landing page.
pub async fn generate(
    config: &Config,
    backend: &Backend,
    out_dir: &Path,
    base_url: &str,
) -> Result<GenerateReport> {
    let nar_dir = out_dir.join("nar");
    tokio::fs::create_dir_all(out_dir)
        .await
        .io_context(format!("Failed to create {}", out_dir.display()))?;

    // Existence checks against a release would list every asset once per
    // record. Take one listing up front instead.
    let remote_nars: Option<HashSet<String>> = match backend.as_github() {
        Some(github) => Some(
            github
                .list_all_assets()
                .await?
                .into_iter()
                .map(|asset| asset.name)
                .collect(),
        ),
        None => None,
    };

    let mut report = GenerateReport::default();
    for hash in backend.list_narinfo().await? {
        let Some(narinfo) = backend.get_narinfo(&hash).await? else {
            log::warn!("narinfo {hash} disappeared while generating, skipping");
            report.skipped.push(hash);
            continue;
        };
        let Some(url) = url_of(&narinfo) else {
            log::warn!("narinfo {hash} has no URL field, skipping");
            report.skipped.push(hash);
            continue;
        };
        let filename = nar_filename(url).to_string();

        let narinfo = match backend.nar_download_url(&filename) {
            Some(download_url) => {
                let present = match &remote_nars {
                    Some(names) => names.contains(&filename),
                    None => backend.has_nar(&filename).await?,
                };
                if !present {
                    log::warn!("NAR {filename} for {hash} is missing, skipping");
                    report.skipped.push(hash);
                    continue;
                }
                rewrite_url(&narinfo, &download_url)
            }
            None => {
                let Some(mut stream) = backend.get_nar_stream(&filename).await? else {
                    log::warn!("NAR {filename} for {hash} is missing, skipping");
                    report.skipped.push(hash);
                    continue;
                };
                tokio::fs::create_dir_all(&nar_dir)
                    .await
                    .io_context(format!("Failed to create {}", nar_dir.display()))?;
                let path = nar_dir.join(&filename);
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .io_context(format!("Failed to create {}", path.display()))?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.io_context(format!("Failed to read NAR {filename}"))?;
                    file.write_all(&chunk)
                        .await
                        .io_context(format!("Failed to write {}", path.display()))?;
                }
                file.flush()
                    .await
                    .io_context(format!("Failed to write {}", path.display()))?;
                report.nars_copied += 1;
                narinfo
            }
        };

        write_file(&out_dir.join(narinfo_filename(&hash)), narinfo.as_bytes()).await?;
        report.narinfo += 1;
    }

    write_file(
        &out_dir.join("nix-cache-info"),
        cacheinfo::render(config).as_bytes(),
    )
    .await?;
    write_file(
        &out_dir.join("index.html"),
        root::render_landing(config, backend, base_url).as_bytes(),
    )
    .await?;

    log::info!(
        "generated {} narinfo records in {} ({} NARs copied, {} skipped)",
        report.narinfo,
        out_dir.display(),
        report.nars_copied,
        report.skipped.len()
    );
    Ok(report)
}
