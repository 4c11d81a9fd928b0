use serde::Deserialize;
use std::path::PathBuf;

fn default_root() -> PathBuf {
    PathBuf::from("cache")
}

fn default_narinfo_dir() -> PathBuf {
    PathBuf::from("narinfo")
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

fn default_uploads_url() -> String {
    "https://uploads.github.com".into()
}

fn default_download_host() -> String {
    "github.com".into()
}

fn default_mirror_narinfo() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// Which backend to use and how to reach it.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local(LocalConfig),
    S3(S3Config),
    #[serde(rename = "github")]
    GitHub(GithubConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local(LocalConfig {
            root: default_root(),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of an S3-compatible service (MinIO, R2, ...).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Prepended to the `narinfo/` and `nar/` prefixes.
    #[serde(default)]
    pub key_prefix: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    pub owner: String,
    pub repo: String,
    pub tag: String,
    /// Falls back to the `GITHUB_TOKEN` environment variable.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_narinfo_dir")]
    pub narinfo_dir: PathBuf,
    #[serde(default = "default_mirror_narinfo")]
    pub mirror_narinfo: bool,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_uploads_url")]
    pub uploads_url: String,
    #[serde(default = "default_download_host")]
    pub download_host: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_config() {
        let config: StorageConfig = toml::from_str(
            r#"
type = "github"
owner = "example"
repo = "nix-cache"
tag = "cache-v1"
"#,
        )
        .unwrap();

        let StorageConfig::GitHub(gh) = config else {
            panic!("expected github config");
        };
        assert_eq!(gh.owner, "example");
        assert_eq!(gh.api_url, "https://api.github.com");
        assert!(gh.mirror_narinfo);
        assert_eq!(gh.narinfo_dir, PathBuf::from("narinfo"));
    }

    #[test]
    fn test_parse_s3_config() {
        let config: StorageConfig = toml::from_str(
            r#"
type = "s3"
bucket = "cache"
endpoint = "http://127.0.0.1:9000"
force_path_style = true
"#,
        )
        .unwrap();
        assert!(matches!(config, StorageConfig::S3(S3Config { force_path_style: true, .. })));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(toml::from_str::<StorageConfig>("type = \"ftp\"").is_err());
    }
}
