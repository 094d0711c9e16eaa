//! Artifacts of newly added releases.
//!
//! For every packaging file a diff adds, fetch and unpack the release and
//! report the Docker images its metadata references. CI uses the list to
//! pull images ahead of the end-to-end runs. Releases of the unsupported
//! packaging generation are left out. The first failure stops the run.

use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::classify::added_releases;
use crate::collab::ReleaseArchive;
use crate::error::PublishError;
use crate::models::{ChangedFileSet, PackagingDescriptor};
use crate::resolve::{ArtifactResolver, Resolution};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseArtifacts {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub docker_images: Vec<String>,
    /// Where the release tarball was unpacked.
    pub artifacts_dir: PathBuf,
}

pub fn collect_artifacts(
    files: &ChangedFileSet,
    repo_root: &Path,
    archive: &dyn ReleaseArchive,
) -> Result<Vec<ReleaseArtifacts>, PublishError> {
    let resolver = ArtifactResolver::new(archive);
    let mut artifacts = Vec::new();

    for release in added_releases(files)? {
        let identity = &release.identity;
        let descriptor = PackagingDescriptor::from_file(&repo_root.join(&release.packaging_path))
            .map_err(|e| PublishError::io(identity, release.packaging_path.as_str(), &e))?;

        match resolver.resolve(identity, &release.version, &descriptor)? {
            Resolution::Resolved(resolved) => {
                let docker_images = resolved.document.docker_images();
                info!(
                    "{} @ {}: {} docker image(s)",
                    identity,
                    release.version,
                    docker_images.len()
                );
                artifacts.push(ReleaseArtifacts {
                    namespace: identity.namespace.clone(),
                    name: identity.name.clone(),
                    version: release.version.clone(),
                    docker_images,
                    artifacts_dir: resolved.extracted_dir,
                });
            }
            Resolution::Unsupported { generation } => {
                info!(
                    "{} @ {}: skipping {} release",
                    identity, release.version, generation
                );
            }
        }
    }

    Ok(artifacts)
}
