//! `hub-publish validate`: pre-flight checks over the whole registry tree.
//!
//! Walks `<repo_root>/registry` (skipping `aliased_connectors`), applies
//! the rules in [`hub_publish_core::validate`] to every packaging and
//! metadata file, and collects every problem instead of stopping at the
//! first. Checksum verification downloads each release tarball and is
//! opt-in because it is slow.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Serialize;
use walkdir::WalkDir;

use hub_publish_core::models::{ConnectorMetadata, PackagingDescriptor, ALIASED_CONNECTORS_DIR};
use hub_publish_core::validate::{
    check_latest_version, check_packaging, check_test_config, verify_checksum, ValidationIssue,
};

use crate::archive::download_to;

const PACKAGING_FILE: &str = "connector-packaging.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub repo_root: PathBuf,
    pub verify_checksums: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub packaging_files: usize,
    pub metadata_files: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

struct MetadataEntry {
    path: String,
    latest_version: String,
}

pub fn validate_registry(opts: &ValidateOptions) -> Result<ValidationReport> {
    let registry = opts.repo_root.join("registry");
    if !registry.is_dir() {
        bail!("registry folder does not exist: {}", registry.display());
    }

    let client = if opts.verify_checksums {
        Some(
            reqwest::blocking::Client::builder()
                .timeout(opts.timeout)
                .build()
                .context("Failed to build download HTTP client")?,
        )
    } else {
        None
    };

    let mut report = ValidationReport::default();
    // connector dir → release versions found under it
    let mut releases: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    let mut metadata: BTreeMap<PathBuf, MetadataEntry> = BTreeMap::new();

    let walker = WalkDir::new(&registry)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ALIASED_CONNECTORS_DIR);

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", registry.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let display = relative(&opts.repo_root, path);

        if entry.file_name() == PACKAGING_FILE {
            report.packaging_files += 1;
            let Some(release_dir) = path.parent() else {
                continue;
            };
            let dir_version = file_name(release_dir);
            if let Some(connector_dir) = release_dir.parent().and_then(Path::parent) {
                releases
                    .entry(connector_dir.to_path_buf())
                    .or_default()
                    .push(dir_version.clone());
            }
            check_packaging_file(path, &display, &dir_version, client.as_ref(), &mut report);
        } else if entry.file_name() == METADATA_FILE && entry.depth() == 3 {
            report.metadata_files += 1;
            match ConnectorMetadata::from_file(path) {
                Ok(doc) => {
                    if let Some(connector_dir) = path.parent() {
                        metadata.insert(
                            connector_dir.to_path_buf(),
                            MetadataEntry {
                                path: display,
                                latest_version: doc.overview.latest_version,
                            },
                        );
                    }
                }
                Err(e) => report
                    .issues
                    .push(ValidationIssue::new(display, format!("{:#}", e))),
            }
        }
    }

    for (connector_dir, entry) in &metadata {
        let versions = releases.get(connector_dir).cloned().unwrap_or_default();
        debug!(
            "{}: latest_version {} against {} releases",
            entry.path,
            entry.latest_version,
            versions.len()
        );
        if let Some(issue) = check_latest_version(
            &entry.path,
            &entry.latest_version,
            versions.iter().map(String::as_str),
        ) {
            report.issues.push(issue);
        }
    }

    info!(
        "validated {} packaging files and {} metadata files: {} issues",
        report.packaging_files,
        report.metadata_files,
        report.issues.len()
    );
    Ok(report)
}

/// Print every issue on stdout; any issue makes the command fail.
pub fn run_validate(opts: &ValidateOptions) -> Result<()> {
    let report = validate_registry(opts)?;
    for issue in &report.issues {
        println!("{}", issue);
    }
    if !report.is_ok() {
        bail!("registry validation found {} issue(s)", report.issues.len());
    }
    println!(
        "ok: {} packaging files, {} metadata files",
        report.packaging_files, report.metadata_files
    );
    Ok(())
}

fn check_packaging_file(
    path: &Path,
    display: &str,
    dir_version: &str,
    client: Option<&reqwest::blocking::Client>,
    report: &mut ValidationReport,
) {
    let descriptor = match PackagingDescriptor::from_file(path) {
        Ok(d) => d,
        Err(e) => {
            report
                .issues
                .push(ValidationIssue::new(display, format!("{:#}", e)));
            return;
        }
    };

    report
        .issues
        .extend(check_packaging(display, &descriptor, dir_version));

    if let Some(test_config) = descriptor.test_config_path(path) {
        match std::fs::read_to_string(&test_config) {
            Ok(content) => report.issues.extend(check_test_config(
                &test_config.display().to_string(),
                &content,
            )),
            Err(e) => report.issues.push(ValidationIssue::new(
                display,
                format!("test config {} unreadable: {}", test_config.display(), e),
            )),
        }
    }

    if let Some(client) = client {
        if let Err(e) = verify_download(client, &descriptor) {
            report
                .issues
                .push(ValidationIssue::new(display, format!("{:#}", e)));
        }
    }
}

fn verify_download(client: &reqwest::blocking::Client, descriptor: &PackagingDescriptor) -> Result<()> {
    let mut file = tempfile::tempfile().context("Failed to create temporary file")?;
    download_to(client, &descriptor.source_uri, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    verify_checksum(&descriptor.checksum, file)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
