use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use dedup_storage::{DedupOptions, PresignConfig};

/// Environment variable overriding `presign_secret`.
pub const PRESIGN_SECRET_ENV: &str = "S3_DEDUP_PRESIGN_SECRET";

/// Store configuration, usually read from `s3-dedup.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the blob and index keyspaces.
    pub data_root: PathBuf,
    /// Base URL presigned download links are rooted at.
    pub base_url: String,
    pub presign_secret: Option<String>,
    pub presign_ttl_secs: u64,
    pub content_index: String,
    pub usage_index: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let options = DedupOptions::default();
        Self {
            data_root: PathBuf::from("./data"),
            base_url: "http://localhost:8014".to_string(),
            presign_secret: None,
            presign_ttl_secs: options.presign_ttl.as_secs(),
            content_index: options.content_index,
            usage_index: options.usage_index,
        }
    }
}

impl StoreConfig {
    /// Load the configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the config file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Loads `path` if given, defaults otherwise, then applies the
    /// environment override for the presign secret.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        if let Ok(secret) = std::env::var(PRESIGN_SECRET_ENV) {
            config.presign_secret = Some(secret);
        }
        Ok(config)
    }

    pub fn presign_config(&self) -> Result<PresignConfig> {
        let secret = match self.presign_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.to_string(),
            _ => bail!("no presign secret configured, set presign_secret or {PRESIGN_SECRET_ENV}"),
        };
        Ok(PresignConfig {
            base_url: self.base_url.clone(),
            secret,
        })
    }

    pub fn dedup_options(&self) -> DedupOptions {
        DedupOptions {
            content_index: self.content_index.clone(),
            usage_index: self.usage_index.clone(),
            presign_ttl: Duration::from_secs(self.presign_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_library() {
        let config = StoreConfig::parse("").unwrap();
        assert_eq!(config.presign_ttl_secs, 3600);
        assert_eq!(config.content_index, "file_hashes");
        assert_eq!(config.usage_index, "user_usage");
        assert!(config.presign_config().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
data_root = "/var/lib/s3-dedup"
base_url = "https://files.example.com/"
presign_secret = "hunter2"
presign_ttl_secs = 600
content_index = "hashes_v2"
"#
        )
        .unwrap();

        let config = StoreConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/var/lib/s3-dedup"));
        assert_eq!(config.usage_index, "user_usage");

        let presign = config.presign_config().unwrap();
        assert_eq!(presign.secret, "hunter2");

        let options = config.dedup_options();
        assert_eq!(options.content_index, "hashes_v2");
        assert_eq!(options.presign_ttl, Duration::from_secs(600));
    }

    #[test]
    fn unknown_file_is_an_error() {
        assert!(StoreConfig::load_from_file("/nonexistent/s3-dedup.toml").is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(StoreConfig::parse("presign_ttl_secs = \"soon\"").is_err());
    }
}
