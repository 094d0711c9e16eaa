//! Configuration for `hub-publish`.
//!
//! Non-secret settings come from a TOML file (default `./hub-publish.toml`).
//! Credentials come only from the environment, never from the file:
//!
//! | Variable | Used by |
//! |----------|---------|
//! | `CONNECTOR_PUBLICATION_KEY` | registry GraphQL requests |
//! | `HUB_STORAGE_ACCESS_KEY_ID` | package uploads |
//! | `HUB_STORAGE_SECRET_ACCESS_KEY` | package uploads |
//! | `IMAGE_HOST_API_KEY` | logo uploads |
//! | `IMAGE_HOST_API_SECRET` | logo uploads |
//!
//! ```toml
//! [registry]
//! graphql_url = "https://registry.example.com/v1/graphql"
//!
//! [storage]
//! bucket = "connector-hub-packages"
//!
//! [images]
//! cloud_name = "acme"
//!
//! [pipeline]
//! repo_root = "."
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGISTRY_ROLE: &str = "connector_publishing_automation";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
    pub images: ImagesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub graphql_url: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    DEFAULT_REGISTRY_ROLE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Base of the URLs recorded in the registry. Defaults to `endpoint/bucket`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}
fn default_region() -> String {
    "auto".to_string()
}

impl StorageConfig {
    pub fn public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImagesConfig {
    pub cloud_name: String,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            scratch_dir: default_scratch_dir(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("hub-publish")
}
fn default_timeout_secs() -> u64 {
    60
}

/// Credentials read from the process environment.
#[derive(Clone)]
pub struct Secrets {
    pub publication_key: String,
    pub storage_access_key_id: String,
    pub storage_secret_access_key: String,
    pub image_api_key: String,
    pub image_api_secret: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secrets { .. }")
    }
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => bail!("{} environment variable is empty", name),
        Err(_) => bail!("{} environment variable not set", name),
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            publication_key: required_env("CONNECTOR_PUBLICATION_KEY")?,
            storage_access_key_id: required_env("HUB_STORAGE_ACCESS_KEY_ID")?,
            storage_secret_access_key: required_env("HUB_STORAGE_SECRET_ACCESS_KEY")?,
            image_api_key: required_env("IMAGE_HOST_API_KEY")?,
            image_api_secret: required_env("IMAGE_HOST_API_SECRET")?,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;

    let url = config.registry.graphql_url.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        bail!("registry.graphql_url must be an http(s) URL, got '{}'", url);
    }
    if config.registry.role.trim().is_empty() {
        bail!("registry.role must not be empty");
    }

    if config.storage.bucket.trim().is_empty() {
        bail!("storage.bucket must not be empty");
    }
    if config.storage.region.trim().is_empty() {
        bail!("storage.region must not be empty");
    }

    if config.images.cloud_name.trim().is_empty() {
        bail!("images.cloud_name must not be empty");
    }

    if config.pipeline.timeout_secs == 0 {
        bail!("pipeline.timeout_secs must be > 0");
    }

    Ok(config)
}
