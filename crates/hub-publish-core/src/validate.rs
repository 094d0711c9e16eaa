//! Pre-flight validation rules for the registry tree.
//!
//! Pure checks over already-parsed documents. Walking the tree and
//! downloading tarballs for checksum comparison is the binary's job; these
//! functions only decide what is wrong.
//!
//! | Check | Applies to |
//! |-------|------------|
//! | `v`-prefixed semver, equal to its directory | `connector-packaging.json` |
//! | referenced test config exists and is complete | `connector-packaging.json` |
//! | SHA-256 of the tarball matches `checksum.value` | `connector-packaging.json` (opt-in) |
//! | `latest_version` is the highest stable release | `metadata.json` |

use std::fmt;
use std::io::Read;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{parse_release_version, Checksum, PackagingDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// `test-config.json` referenced from a packaging file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub hub_id: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub snapshots_dir: String,
}

/// Version rules for one packaging file living under `releases/<dir_version>/`.
pub fn check_packaging(
    path: &str,
    descriptor: &PackagingDescriptor,
    dir_version: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if let Err(e) = parse_release_version(&descriptor.version) {
        issues.push(ValidationIssue::new(path, format!("{:#}", e)));
    } else if descriptor.version != dir_version {
        issues.push(ValidationIssue::new(
            path,
            format!(
                "version {} does not match release directory {}",
                descriptor.version, dir_version
            ),
        ));
    }
    if descriptor.source_uri.trim().is_empty() {
        issues.push(ValidationIssue::new(path, "uri is empty"));
    }
    issues
}

/// Parse a test config and check its required fields.
pub fn check_test_config(path: &str, content: &str) -> Vec<ValidationIssue> {
    let config: TestConfig = match serde_json::from_str(content) {
        Ok(config) => config,
        Err(e) => return vec![ValidationIssue::new(path, format!("invalid test config: {}", e))],
    };
    let mut issues = Vec::new();
    if config.hub_id.is_empty() {
        issues.push(ValidationIssue::new(path, "hub_id is empty"));
    }
    if config.snapshots_dir.is_empty() {
        issues.push(ValidationIssue::new(path, "snapshots_dir is empty"));
    }
    issues
}

/// Highest non-pre-release version among `versions`. Invalid identifiers
/// are ignored.
pub fn latest_stable<'v, I>(versions: I) -> Option<(&'v str, semver::Version)>
where
    I: IntoIterator<Item = &'v str>,
{
    versions
        .into_iter()
        .filter_map(|v| parse_release_version(v).ok().map(|parsed| (v, parsed)))
        .filter(|(_, parsed)| parsed.pre.is_empty())
        .max_by(|a, b| a.1.cmp(&b.1))
}

/// `latest_version` must name the highest stable release. Passes when the
/// connector has no stable release yet. Build metadata does not count.
pub fn check_latest_version<'v, I>(path: &str, declared: &str, releases: I) -> Option<ValidationIssue>
where
    I: IntoIterator<Item = &'v str>,
{
    let (latest, latest_parsed) = latest_stable(releases)?;
    let declared_parsed = match parse_release_version(declared) {
        Ok(v) => v,
        Err(e) => {
            return Some(ValidationIssue::new(
                path,
                format!("latest_version is invalid: {:#}", e),
            ))
        }
    };
    if same_precedence(&declared_parsed, &latest_parsed) {
        None
    } else {
        Some(ValidationIssue::new(
            path,
            format!(
                "latest_version is '{}' but the highest stable release is {}",
                declared, latest
            ),
        ))
    }
}

fn same_precedence(a: &semver::Version, b: &semver::Version) -> bool {
    (a.major, a.minor, a.patch, &a.pre) == (b.major, b.minor, b.patch, &b.pre)
}

/// Hex SHA-256 of everything `reader` yields.
pub fn sha256_hex<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a tarball against its declared checksum. Only `sha256` is supported.
pub fn verify_checksum<R: Read>(checksum: &Checksum, reader: R) -> Result<()> {
    if !checksum.kind.eq_ignore_ascii_case("sha256") {
        bail!("unsupported checksum type '{}'", checksum.kind);
    }
    let actual = sha256_hex(reader)?;
    if !actual.eq_ignore_ascii_case(checksum.value.trim()) {
        bail!(
            "checksum mismatch: declared {} but downloaded {}",
            checksum.value,
            actual
        );
    }
    Ok(())
}
