//! The slice of the GitHub REST API the release backend needs.

use crate::NarStream;
use crate::config::GithubConfig;
use crate::error::{IoErrorContext, Result, StorageError};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Characters left alone by `encodeURIComponent`.
pub(crate) const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// One binary attached to a release.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// API location of the asset; fetch with `Accept: application/octet-stream`.
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

pub trait ReleaseApi: Send + Sync {
    /// Look up a release by tag. `None` only for a confirmed 404.
    fn release_by_tag(&self, tag: &str) -> impl Future<Output = Result<Option<u64>>> + Send;

    fn create_release(&self, tag: &str) -> impl Future<Output = Result<u64>> + Send;

    /// One page of the release's assets; pages start at 1.
    fn list_assets(
        &self,
        release_id: u64,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = Result<Vec<ReleaseAsset>>> + Send;

    /// Upload `len` bytes from `source` as a new asset called `name`.
    fn upload_asset(
        &self,
        release_id: u64,
        name: &str,
        source: &Path,
        len: u64,
    ) -> impl Future<Output = Result<ReleaseAsset>> + Send;

    fn delete_asset(&self, asset_id: u64) -> impl Future<Output = Result<()>> + Send;

    fn download_asset(&self, asset: &ReleaseAsset)
    -> impl Future<Output = Result<NarStream>> + Send;
}

#[derive(Deserialize)]
struct Release {
    id: u64,
}

/// `reqwest` implementation of [`ReleaseApi`].
#[derive(Clone, Debug)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    uploads_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::warn!("no GitHub token configured, uploads and deletes will be rejected");
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StorageError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            uploads_url: config.uploads_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token,
        })
    }

    fn repo_url(&self, base: &str, path: &str) -> String {
        format!(
            "{base}/repos/{}/{}/{path}",
            encode_component(&self.owner),
            encode_component(&self.repo)
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| StorageError::transient(operation, e))
    }
}

async fn body_of(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}

async fn rejected(operation: &str, response: Response) -> StorageError {
    StorageError::Rejected {
        operation: operation.to_string(),
        status: response.status().as_u16(),
        body: body_of(response).await,
    }
}

async fn unexpected(operation: &str, response: Response) -> StorageError {
    let status = response.status();
    StorageError::transient(operation, format!("status {status}: {}", body_of(response).await))
}

async fn json<T: serde::de::DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| StorageError::transient(operation, e))
}

impl ReleaseApi for GithubClient {
    async fn release_by_tag(&self, tag: &str) -> Result<Option<u64>> {
        let op = format!("get release {tag}");
        let url = self.repo_url(
            &self.api_url,
            &format!("releases/tags/{}", encode_component(tag)),
        );
        let response = self.send(&op, self.request(Method::GET, &url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(json::<Release>(&op, response).await?.id)),
            _ => Err(unexpected(&op, response).await),
        }
    }

    async fn create_release(&self, tag: &str) -> Result<u64> {
        let op = format!("create release {tag}");
        let url = self.repo_url(&self.api_url, "releases");
        let body = serde_json::json!({
            "tag_name": tag,
            "name": tag,
            "body": "Nix binary cache",
        });
        let response = self
            .send(&op, self.request(Method::POST, &url).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(rejected(&op, response).await);
        }
        Ok(json::<Release>(&op, response).await?.id)
    }

    async fn list_assets(
        &self,
        release_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ReleaseAsset>> {
        let op = format!("list assets page {page}");
        let url = self.repo_url(&self.api_url, &format!("releases/{release_id}/assets"));
        let response = self
            .send(
                &op,
                self.request(Method::GET, &url)
                    .query(&[("per_page", per_page), ("page", page)]),
            )
            .await?;
        if !response.status().is_success() {
            return Err(unexpected(&op, response).await);
        }
        json(&op, response).await
    }

    async fn upload_asset(
        &self,
        release_id: u64,
        name: &str,
        source: &Path,
        len: u64,
    ) -> Result<ReleaseAsset> {
        let op = format!("upload asset {name}");
        let file = tokio::fs::File::open(source)
            .await
            .io_context(format!("Failed to open {}", source.display()))?;
        let url = self.repo_url(&self.uploads_url, &format!("releases/{release_id}/assets"));
        let response = self
            .send(
                &op,
                self.request(Method::POST, &url)
                    .query(&[("name", name)])
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .header(header::CONTENT_LENGTH, len)
                    .body(reqwest::Body::wrap_stream(ReaderStream::new(file))),
            )
            .await?;
        if !response.status().is_success() {
            return Err(rejected(&op, response).await);
        }
        json(&op, response).await
    }

    async fn delete_asset(&self, asset_id: u64) -> Result<()> {
        let op = format!("delete asset {asset_id}");
        let url = self.repo_url(&self.api_url, &format!("releases/assets/{asset_id}"));
        let response = self.send(&op, self.request(Method::DELETE, &url)).await?;
        match response.status() {
            // Already gone is as good as deleted.
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(rejected(&op, response).await),
        }
    }

    async fn download_asset(&self, asset: &ReleaseAsset) -> Result<NarStream> {
        let op = format!("download asset {}", asset.name);
        let response = self
            .send(
                &op,
                self.request(Method::GET, &asset.url)
                    .header(header::ACCEPT, "application/octet-stream"),
            )
            .await?;
        if !response.status().is_success() {
            return Err(unexpected(&op, response).await);
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("nix-cache"), "nix-cache");
        assert_eq!(encode_component("v1.0/latest"), "v1.0%2Flatest");
        assert_eq!(encode_component("a b+c"), "a%20b%2Bc");
    }

    #[test]
    fn test_asset_from_api_json() {
        let asset: ReleaseAsset = serde_json::from_str(
            r#"{
                "url": "https://api.github.com/repos/o/r/releases/assets/1",
                "id": 1,
                "name": "abc.nar",
                "label": "",
                "content_type": "application/octet-stream",
                "state": "uploaded",
                "size": 1024,
                "created_at": "2024-01-02T03:04:05Z",
                "updated_at": "2024-01-02T03:04:05Z"
            }"#,
        )
        .unwrap();
        assert_eq!(asset.id, 1);
        assert_eq!(asset.name, "abc.nar");
        assert_eq!(asset.size, 1024);
        assert_eq!(asset.created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }
}
