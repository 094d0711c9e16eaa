//! Core data models used throughout the publish pipeline.
//!
//! These types describe what arrives from the pull request (changed files,
//! registry documents) and the identities everything else is keyed by.
//! Payload shapes sent to the registry live in [`crate::payload`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Directory name for connectors that only alias another connector's slug.
///
/// Nothing under it is ever published.
pub const ALIASED_CONNECTORS_DIR: &str = "aliased_connectors";

/// Relative path of the release-metadata document inside an extracted release.
pub const RELEASE_METADATA_PATH: &str = ".hasura-connector/connector-metadata.yaml";

// ═══════════════════════════════════════════════════════════════════════
// Identities and inputs
// ═══════════════════════════════════════════════════════════════════════

/// Natural key of a connector.
///
/// Comparison is exact and case-sensitive. The derived ordering (namespace,
/// then name) is what every report and bucket iteration is sorted by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectorIdentity {
    pub namespace: String,
    pub name: String,
}

impl ConnectorIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Public id used for the connector's hosted logo: `"{namespace}-{name}"`.
    pub fn logo_public_id(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for ConnectorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Raw list of files touched by a pull request, as produced by the diff tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFileSet {
    #[serde(rename = "added_files", default)]
    pub added: Vec<String>,
    #[serde(rename = "modified_files", default)]
    pub modified: Vec<String>,
    /// Never acted upon; deletes and unpublishing are not supported.
    #[serde(rename = "deleted_files", default)]
    pub deleted: Vec<String>,
}

impl ChangedFileSet {
    /// Read the diff tool's JSON document from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read changed files: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse changed files: {}", path.display()))
    }
}

/// Target registry environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => anyhow::bail!(
                "Unknown environment: '{}'. Must be staging or production.",
                other
            ),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Staging => f.write_str("staging"),
            Environment::Production => f.write_str("production"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Classified changes
// ═══════════════════════════════════════════════════════════════════════

/// Image format of a connector logo, taken from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoFormat {
    Png,
    Svg,
}

impl LogoFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(LogoFormat::Png),
            "svg" => Some(LogoFormat::Svg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogoFormat::Png => "png",
            LogoFormat::Svg => "svg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            LogoFormat::Png => "image/png",
            LogoFormat::Svg => "image/svg+xml",
        }
    }
}

/// A logo file together with its format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoDescriptor {
    pub path: String,
    pub format: LogoFormat,
}

/// One changed file, mapped to the operation it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedChange {
    NewConnectorMetadata {
        identity: ConnectorIdentity,
        path: String,
    },
    ModifiedConnectorMetadata {
        identity: ConnectorIdentity,
        path: String,
    },
    NewLogo {
        identity: ConnectorIdentity,
        logo: LogoDescriptor,
    },
    ModifiedLogo {
        identity: ConnectorIdentity,
        logo: LogoDescriptor,
    },
    NewReadme {
        identity: ConnectorIdentity,
        path: String,
    },
    ModifiedReadme {
        identity: ConnectorIdentity,
        path: String,
    },
    NewVersionRelease {
        identity: ConnectorIdentity,
        version: String,
        packaging_path: String,
    },
}

impl ClassifiedChange {
    pub fn identity(&self) -> &ConnectorIdentity {
        match self {
            ClassifiedChange::NewConnectorMetadata { identity, .. }
            | ClassifiedChange::ModifiedConnectorMetadata { identity, .. }
            | ClassifiedChange::NewLogo { identity, .. }
            | ClassifiedChange::ModifiedLogo { identity, .. }
            | ClassifiedChange::NewReadme { identity, .. }
            | ClassifiedChange::ModifiedReadme { identity, .. }
            | ClassifiedChange::NewVersionRelease { identity, .. } => identity,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry documents
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingSource {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingTest {
    #[serde(default)]
    pub test_config_path: String,
}

/// Parsed `connector-packaging.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingDescriptor {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "uri", default)]
    pub source_uri: String,
    #[serde(default)]
    pub checksum: Checksum,
    #[serde(default)]
    pub source: PackagingSource,
    #[serde(default)]
    pub test: PackagingTest,
}

impl PackagingDescriptor {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read packaging file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse packaging file: {}", path.display()))
    }

    /// Location of the referenced test config, resolved against the
    /// directory holding the packaging file.
    pub fn test_config_path(&self, packaging_path: &Path) -> Option<PathBuf> {
        if self.test.test_config_path.is_empty() {
            return None;
        }
        let dir = packaging_path.parent().unwrap_or_else(|| Path::new(""));
        Some(dir.join(&self.test.test_config_path))
    }
}

/// Check that a release identifier is a `v`-prefixed semantic version.
pub fn parse_release_version(version: &str) -> Result<semver::Version> {
    let Some(bare) = version.strip_prefix('v') else {
        anyhow::bail!("version must start with 'v': but got {}", version);
    };
    semver::Version::parse(bare)
        .with_context(|| format!("invalid semantic version: {}", version))
}

/// Order release identifiers by semantic version. Identifiers that do not
/// parse sort after every valid one, among themselves by text.
pub fn compare_release_versions(a: &str, b: &str) -> Ordering {
    let key = |v: &str| {
        let parsed = parse_release_version(v).ok();
        (parsed.is_none(), parsed)
    };
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overview {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub latest_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub support_email: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConnectorRef {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCode {
    #[serde(default)]
    pub is_open_source: bool,
    #[serde(default)]
    pub repository: String,
}

/// Parsed `metadata.json` of a connector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorMetadata {
    #[serde(default)]
    pub overview: Overview,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_hosted_by_hasura: bool,
    #[serde(default)]
    pub hasura_hub_connector: Option<HubConnectorRef>,
    #[serde(default)]
    pub source_code: SourceCode,
}

impl ConnectorMetadata {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read connector metadata: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse connector metadata: {}", path.display()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Release metadata document
// ═══════════════════════════════════════════════════════════════════════

/// Packaging generation this pipeline does not publish. Releases declaring
/// it are skipped rather than failed.
pub const UNSUPPORTED_GENERATION: &str = "v2";

/// How a connector release is packaged and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackagingType {
    PrebuiltDockerImage,
    ManagedDockerBuild,
}

impl PackagingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackagingType::PrebuiltDockerImage => "PrebuiltDockerImage",
            PackagingType::ManagedDockerBuild => "ManagedDockerBuild",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagingDefinition {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub docker_image: Option<String>,
}

/// A CLI plugin declaration. Only the Docker variant references an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliPluginDefinition {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// A lifecycle command: either an inline shell string or a typed definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandDefinition {
    Inline(String),
    Typed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "dockerImage", default)]
        docker_image: Option<String>,
    },
}

impl CommandDefinition {
    fn docker_image(&self) -> Option<&str> {
        match self {
            CommandDefinition::Typed {
                kind,
                docker_image: Some(image),
            } if kind == "Dockerized" && !image.is_empty() => Some(image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commands {
    #[serde(default)]
    pub update: Option<CommandDefinition>,
    #[serde(default)]
    pub watch: Option<CommandDefinition>,
    #[serde(default)]
    pub print_schema_and_capabilities: Option<CommandDefinition>,
    #[serde(default)]
    pub upgrade_configuration: Option<CommandDefinition>,
}

/// The `connector-metadata.yaml` document shipped inside a release tarball.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMetadataDocument {
    /// Packaging-spec generation (`v1`, `v2`).
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub ndc_spec_generation: Option<String>,
    #[serde(default)]
    pub packaging_definition: Option<PackagingDefinition>,
    #[serde(default)]
    pub cli_plugin: Option<CliPluginDefinition>,
    #[serde(default)]
    pub commands: Commands,
    #[serde(default)]
    pub documentation_page: Option<String>,
}

impl ReleaseMetadataDocument {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse connector-metadata.yaml")
    }

    pub fn is_unsupported_generation(&self) -> bool {
        self.version.as_deref() == Some(UNSUPPORTED_GENERATION)
    }

    /// Every Docker image the release references, de-duplicated and sorted.
    pub fn docker_images(&self) -> Vec<String> {
        let mut images = BTreeSet::new();
        if let Some(def) = &self.packaging_definition {
            if def.kind == PackagingType::PrebuiltDockerImage.as_str() {
                if let Some(image) = def.docker_image.as_deref().filter(|i| !i.is_empty()) {
                    images.insert(image.to_string());
                }
            }
        }
        if let Some(plugin) = &self.cli_plugin {
            if plugin.kind.as_deref() == Some("Docker") {
                if let Some(image) = plugin.docker_image.as_deref().filter(|i| !i.is_empty()) {
                    images.insert(image.to_string());
                }
            }
        }
        let commands = [
            &self.commands.update,
            &self.commands.watch,
            &self.commands.print_schema_and_capabilities,
            &self.commands.upgrade_configuration,
        ];
        for command in commands.into_iter().flatten() {
            if let Some(image) = command.docker_image() {
                images.insert(image.to_string());
            }
        }
        images.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_files_lists_default_to_empty() {
        let files: ChangedFileSet =
            serde_json::from_str(r#"{"added_files": ["a"]}"#).unwrap();
        assert_eq!(files.added, vec!["a".to_string()]);
        assert!(files.modified.is_empty());
        assert!(files.deleted.is_empty());
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!(
            "PRODUCTION".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("prod".parse::<Environment>().is_err());
    }

    #[test]
    fn release_version_requires_v_prefix() {
        assert!(parse_release_version("v1.0.0").is_ok());
        assert!(parse_release_version("v1.2.0-beta.1").is_ok());
        assert!(parse_release_version("1.0.0").is_err());
        assert!(parse_release_version("v1.0").is_err());
    }

    #[test]
    fn release_versions_order_numerically() {
        let mut versions = vec!["v1.10.0", "garbage", "v1.9.0", "v1.10.0-rc.1", "v0.2.0", "alpha"];
        versions.sort_by(|a, b| compare_release_versions(a, b));
        assert_eq!(
            versions,
            vec!["v0.2.0", "v1.9.0", "v1.10.0-rc.1", "v1.10.0", "alpha", "garbage"]
        );
    }

    #[test]
    fn identity_orders_by_namespace_then_name() {
        let mut ids = vec![
            ConnectorIdentity::new("b", "a"),
            ConnectorIdentity::new("a", "z"),
            ConnectorIdentity::new("a", "b"),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered, vec!["a/b", "a/z", "b/a"]);
    }

    #[test]
    fn release_document_collects_docker_images() {
        let doc = ReleaseMetadataDocument::from_yaml(
            r#"
packagingDefinition:
  type: PrebuiltDockerImage
  dockerImage: ghcr.io/acme/db:v1
cliPlugin:
  type: Docker
  dockerImage: ghcr.io/acme/db-cli:v1
commands:
  update: "docker run ghcr.io/acme/db:v1 update"
  printSchemaAndCapabilities:
    type: Dockerized
    dockerImage: ghcr.io/acme/db:v1
    commandArgs: []
"#,
        )
        .unwrap();
        assert_eq!(
            doc.docker_images(),
            vec![
                "ghcr.io/acme/db-cli:v1".to_string(),
                "ghcr.io/acme/db:v1".to_string()
            ]
        );
        assert!(!doc.is_unsupported_generation());
    }

    #[test]
    fn release_document_detects_unsupported_generation() {
        let doc = ReleaseMetadataDocument::from_yaml("version: v2\n").unwrap();
        assert!(doc.is_unsupported_generation());
        assert!(doc.packaging_definition.is_none());
    }
}
