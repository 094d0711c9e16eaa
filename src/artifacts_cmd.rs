//! `hub-publish download-artifacts`: unpack the releases a diff adds and
//! list their Docker images.
//!
//! Tarballs land under `<scratch>/<namespace>/<name>/<version>`. The list is
//! printed as indented JSON for the CI step that pre-pulls images.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use hub_publish_core::artifacts::{collect_artifacts, ReleaseArtifacts};
use hub_publish_core::models::ChangedFileSet;

use crate::archive::HttpReleaseArchive;

pub fn download_artifacts(
    changed_files: &Path,
    repo_root: &Path,
    scratch_dir: &Path,
    timeout: Duration,
) -> Result<Vec<ReleaseArtifacts>> {
    let files = ChangedFileSet::from_json_file(changed_files)?;
    let archive = HttpReleaseArchive::new(scratch_dir, timeout)?;
    collect_artifacts(&files, repo_root, &archive).context("Failed to download release artifacts")
}

pub fn run_download_artifacts(
    changed_files: &Path,
    repo_root: &Path,
    scratch_dir: &Path,
    timeout: Duration,
) -> Result<()> {
    let artifacts = download_artifacts(changed_files, repo_root, scratch_dir, timeout)?;
    println!("{}", serde_json::to_string_pretty(&artifacts)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn changed(root: &Path, added: &[&str]) -> std::path::PathBuf {
        let path = root.join("changed.json");
        fs::write(
            &path,
            serde_json::json!({"added_files": added, "modified_files": [], "deleted_files": []})
                .to_string(),
        )
        .unwrap();
        path
    }

    #[test]
    fn diff_without_releases_downloads_nothing() {
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("scratch");
        let changed = changed(tmp.path(), &["registry/acme/db/README.md"]);
        let artifacts =
            download_artifacts(&changed, tmp.path(), &scratch, Duration::from_secs(1)).unwrap();
        assert!(artifacts.is_empty());
        assert!(!scratch.exists());
    }

    #[test]
    fn unreachable_release_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let rel = "registry/acme/db/releases/v1.0.0/connector-packaging.json";
        let path = tmp.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"version":"v1.0.0","uri":"http://127.0.0.1:9/package.tgz"}"#,
        )
        .unwrap();
        let changed = changed(tmp.path(), &[rel]);

        let err = download_artifacts(
            &changed,
            tmp.path(),
            &tmp.path().join("scratch"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("acme/db @ v1.0.0"));
    }
}
