use crate::error::{CacheError, ConfigError, Result};
use narstash_storage::StorageConfig;
use narstash_store_core::SigningKey;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

fn default_bind() -> String {
    "[::]:5000".into()
}

fn default_workers() -> usize {
    4
}

fn default_priority() -> usize {
    30
}

fn default_store_dir() -> String {
    "/nix/store".into()
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_priority")]
    pub priority: usize,

    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    #[serde(default)]
    pub sign_key_path: Option<PathBuf>,
    /// Bearer token required for uploads. Uploads are refused without one.
    #[serde(default)]
    pub upload_token: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(skip)]
    pub secret_key: Option<SigningKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: default_workers(),
            priority: default_priority(),
            store_dir: default_store_dir(),
            sign_key_path: None,
            upload_token: None,
            storage: StorageConfig::default(),
            secret_key: None,
        }
    }
}

impl Config {
    pub fn load(settings_file: &Path) -> Result<Config> {
        let contents = read_to_string(settings_file).map_err(|e| ConfigError::ReadFile {
            path: settings_file.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        toml::from_str(contents).map_err(|e| CacheError::from(ConfigError::from(e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                reason: "workers must be greater than 0".to_string(),
            }
            .into());
        }
        if !self.store_dir.starts_with('/') {
            return Err(ConfigError::Invalid {
                reason: format!("store_dir must be absolute, got {:?}", self.store_dir),
            }
            .into());
        }
        if self.upload_token.as_deref() == Some("") {
            return Err(ConfigError::Invalid {
                reason: "upload_token must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Read the key named by `sign_key_path`, if any.
    pub fn load_secret_key(&mut self) -> Result<()> {
        let Some(path) = &self.sign_key_path else {
            return Ok(());
        };
        let key = SigningKey::from_file(path).map_err(|e| ConfigError::InvalidSigningKey {
            reason: format!("Couldn't parse secret key from '{}': {}", path.display(), e),
        })?;
        log::info!("signing narinfo uploads with key {}", key.name);
        self.secret_key = Some(key);
        Ok(())
    }
}

pub fn load() -> Result<Config> {
    let mut settings = match std::env::var("CONFIG_FILE") {
        Err(_) => {
            if Path::new("settings.toml").exists() {
                Config::load(Path::new("settings.toml"))?
            } else {
                Config::default()
            }
        }
        Ok(settings_file) => Config::load(Path::new(&settings_file))?,
    };

    if let Ok(sign_key_path) = std::env::var("SIGN_KEY_PATH") {
        settings.sign_key_path = Some(PathBuf::from(sign_key_path));
    }
    if let Ok(token) = std::env::var("UPLOAD_TOKEN") {
        settings.upload_token = Some(token);
    }
    if let Ok(store_dir) = std::env::var("NIX_STORE_DIR") {
        settings.store_dir = store_dir;
    }

    settings.validate()?;
    settings.load_secret_key()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use narstash_storage::config::GithubConfig;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.bind, "[::]:5000");
        assert_eq!(config.workers, 4);
        assert_eq!(config.priority, 30);
        assert_eq!(config.store_dir, "/nix/store");
        assert!(matches!(config.storage, StorageConfig::Local(_)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_github_storage_section() {
        let config = Config::from_toml(
            r#"
priority = 40
upload_token = "secret"

[storage]
type = "github"
owner = "example"
repo = "nix-cache"
tag = "nix-cache"
narinfo_dir = "/var/lib/narstash/narinfo"
"#,
        )
        .unwrap();

        assert_eq!(config.priority, 40);
        assert_eq!(config.upload_token.as_deref(), Some("secret"));
        let StorageConfig::GitHub(GithubConfig { tag, narinfo_dir, .. }) = config.storage else {
            panic!("expected github storage");
        };
        assert_eq!(tag, "nix-cache");
        assert_eq!(narinfo_dir, PathBuf::from("/var/lib/narstash/narinfo"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Config::from_toml("bogus = 1"),
            Err(CacheError::Config(ConfigError::TomlParse(_)))
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = Config::from_toml("workers = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(CacheError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_relative_store_dir_rejected() {
        let config = Config::from_toml("store_dir = \"nix/store\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_secret_key() {
        let key = SigningKey::generate("cache.example.org-1").unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", key.to_text()).unwrap();

        let mut config = Config {
            sign_key_path: Some(file.path().to_path_buf()),
            ..Config::default()
        };
        config.load_secret_key().unwrap();
        assert_eq!(
            config.secret_key.unwrap().public_key(),
            key.public_key()
        );
    }

    #[test]
    fn test_bad_secret_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a key").unwrap();

        let mut config = Config {
            sign_key_path: Some(file.path().to_path_buf()),
            ..Config::default()
        };
        assert!(matches!(
            config.load_secret_key(),
            Err(CacheError::Config(ConfigError::InvalidSigningKey { .. }))
        ));
    }
}
