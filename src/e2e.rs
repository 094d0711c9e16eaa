//! `hub-publish e2e`: select the releases the end-to-end suite should run.
//!
//! | Selection | Releases | Release without a test config |
//! |-----------|----------|-------------------------------|
//! | `changed` | packaging files added by a diff | error |
//! | `all` | every packaging file under `registry/` | skipped |
//! | `latest` | each connector's `latest_version` | skipped |
//!
//! The result is printed as one compact JSON array, which CI feeds to a
//! job matrix. Test config paths are relative to the repository root.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use hub_publish_core::classify::{added_releases, classify, ChangeOrigin};
use hub_publish_core::models::{
    compare_release_versions, ChangedFileSet, ClassifiedChange, ConnectorIdentity,
    ConnectorMetadata, PackagingDescriptor, ALIASED_CONNECTORS_DIR,
};

const PACKAGING_FILE: &str = "connector-packaging.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum E2eSelection {
    Changed { changed_files: PathBuf },
    All,
    Latest,
}

/// One matrix entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct E2eTarget {
    pub namespace: String,
    pub connector_name: String,
    pub version: String,
    pub test_config_file_path: String,
}

pub fn select_targets(repo_root: &Path, selection: &E2eSelection) -> Result<Vec<E2eTarget>> {
    let targets = match selection {
        E2eSelection::Changed { changed_files } => {
            let files = ChangedFileSet::from_json_file(changed_files)?;
            changed_targets(repo_root, &files)?
        }
        E2eSelection::All => all_targets(repo_root)?,
        E2eSelection::Latest => latest_targets(repo_root)?,
    };
    info!("selected {} end-to-end target(s)", targets.len());
    Ok(targets)
}

pub fn run_e2e(repo_root: &Path, selection: &E2eSelection) -> Result<()> {
    let targets = select_targets(repo_root, selection)?;
    println!("{}", serde_json::to_string(&targets)?);
    Ok(())
}

/// Every release added by the diff must name a test config.
pub fn changed_targets(repo_root: &Path, files: &ChangedFileSet) -> Result<Vec<E2eTarget>> {
    let mut targets = Vec::new();
    for release in added_releases(files)? {
        let Some(target) = target_for(
            repo_root,
            &release.identity,
            &release.version,
            &release.packaging_path,
        )?
        else {
            bail!(
                "test config must be provided for all new connector releases. No test config found for {}",
                release.packaging_path
            );
        };
        targets.push(target);
    }
    Ok(targets)
}

pub fn all_targets(repo_root: &Path) -> Result<Vec<E2eTarget>> {
    let registry = registry_dir(repo_root)?;
    let mut releases = Vec::new();

    let walker = WalkDir::new(&registry)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ALIASED_CONNECTORS_DIR);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", registry.display()))?;
        if !entry.file_type().is_file() || entry.file_name() != PACKAGING_FILE {
            continue;
        }
        let rel = repo_relative(repo_root, entry.path());
        match classify(&rel, ChangeOrigin::Added)? {
            Some(ClassifiedChange::NewVersionRelease {
                identity,
                version,
                packaging_path,
            }) => releases.push((identity, version, packaging_path)),
            _ => debug!("{}: not a release packaging file", rel),
        }
    }
    releases.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| compare_release_versions(&a.1, &b.1))
    });

    let mut targets = Vec::new();
    for (identity, version, packaging_path) in releases {
        match target_for(repo_root, &identity, &version, &packaging_path)? {
            Some(target) => targets.push(target),
            None => info!("{} @ {}: no test config, skipping", identity, version),
        }
    }
    Ok(targets)
}

pub fn latest_targets(repo_root: &Path) -> Result<Vec<E2eTarget>> {
    let registry = registry_dir(repo_root)?;
    let mut targets = Vec::new();

    for namespace in sorted_dirs(&registry)? {
        if namespace == ALIASED_CONNECTORS_DIR {
            continue;
        }
        for name in sorted_dirs(&registry.join(&namespace))? {
            let identity = ConnectorIdentity::new(&namespace, &name);
            let connector_dir = registry.join(&namespace).join(&name);

            let metadata_path = connector_dir.join(METADATA_FILE);
            if !metadata_path.is_file() {
                debug!("{}: no {}, skipping", identity, METADATA_FILE);
                continue;
            }
            let metadata = ConnectorMetadata::from_file(&metadata_path)?;
            let latest = metadata.overview.latest_version;
            if latest.is_empty() {
                warn!("{}: latest_version is empty, skipping", identity);
                continue;
            }

            let packaging_path = format!(
                "registry/{}/{}/releases/{}/{}",
                namespace, name, latest, PACKAGING_FILE
            );
            if !repo_root.join(&packaging_path).is_file() {
                warn!("{}: {} does not exist, skipping", identity, packaging_path);
                continue;
            }
            match target_for(repo_root, &identity, &latest, &packaging_path)? {
                Some(target) => targets.push(target),
                None => info!("{} @ {}: no test config, skipping", identity, latest),
            }
        }
    }
    Ok(targets)
}

/// `None` when the packaging file names no test config.
fn target_for(
    repo_root: &Path,
    identity: &ConnectorIdentity,
    version: &str,
    packaging_path: &str,
) -> Result<Option<E2eTarget>> {
    let descriptor = PackagingDescriptor::from_file(&repo_root.join(packaging_path))?;
    let Some(test_config) = descriptor.test_config_path(Path::new(packaging_path)) else {
        return Ok(None);
    };
    let test_config = clean_relative(&test_config).with_context(|| {
        format!(
            "{}: test config path leaves the repository",
            packaging_path
        )
    })?;
    Ok(Some(E2eTarget {
        namespace: identity.namespace.clone(),
        connector_name: identity.name.clone(),
        version: version.to_string(),
        test_config_file_path: test_config.to_string_lossy().replace('\\', "/"),
    }))
}

/// Resolve `.` and `..` lexically in a relative path. Fails if the path is
/// absolute or climbs above its starting point.
fn clean_relative(path: &Path) -> Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    bail!("{} climbs above the repository root", path.display());
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                bail!("{} is absolute", path.display())
            }
        }
    }
    Ok(cleaned)
}

fn registry_dir(repo_root: &Path) -> Result<PathBuf> {
    let registry = repo_root.join("registry");
    if !registry.is_dir() {
        bail!("registry folder does not exist: {}", registry.display());
    }
    Ok(registry)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn repo_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
