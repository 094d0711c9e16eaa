//! Release artifact resolution.
//!
//! Given a parsed packaging descriptor, fetch the release tarball through a
//! [`ReleaseArchive`] and read the release-metadata document it ships.
//! Checksums are not verified here; see [`crate::validate`].
//!
//! ```text
//! PackagingDescriptor ──uri──▶ ReleaseArchive::fetch ──▶ (yaml, tarball)
//!                                                          │
//!                                   version: v2 ◀──────────┤
//!                                   Unsupported            ▼
//!                                                    Resolved{document, tarball}
//! ```

use std::path::PathBuf;

use log::{debug, info};

use crate::collab::ReleaseArchive;
use crate::error::PublishError;
use crate::models::{ConnectorIdentity, PackagingDescriptor, ReleaseMetadataDocument};

/// A release whose tarball is staged locally and whose metadata is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub document: ReleaseMetadataDocument,
    pub tarball: PathBuf,
    pub extracted_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedRelease),
    /// The release declares a packaging generation this pipeline skips.
    Unsupported { generation: String },
}

pub struct ArtifactResolver<'a> {
    archive: &'a dyn ReleaseArchive,
}

impl<'a> ArtifactResolver<'a> {
    pub fn new(archive: &'a dyn ReleaseArchive) -> Self {
        Self { archive }
    }

    /// Fetch and parse one release. `version` is the release directory name.
    pub fn resolve(
        &self,
        identity: &ConnectorIdentity,
        version: &str,
        descriptor: &PackagingDescriptor,
    ) -> Result<Resolution, PublishError> {
        let uri = descriptor.source_uri.trim();
        if uri.is_empty() {
            return Err(resolution_error(identity, version, "uri", "no source URI declared"));
        }

        info!("{} @ {}: fetching {}", identity, version, uri);
        let fetched = self
            .archive
            .fetch(uri, identity, version)
            .map_err(|e| resolution_error(identity, version, "uri", format!("{:#}", e)))?;

        let document = ReleaseMetadataDocument::from_yaml(&fetched.metadata_document).map_err(
            |e| resolution_error(identity, version, "connector-metadata.yaml", format!("{:#}", e)),
        )?;

        if document.is_unsupported_generation() {
            let generation = document.version.clone().unwrap_or_default();
            debug!(
                "{} @ {}: packaging generation {} is not published",
                identity, version, generation
            );
            return Ok(Resolution::Unsupported { generation });
        }

        Ok(Resolution::Resolved(ResolvedRelease {
            document,
            tarball: fetched.tarball,
            extracted_dir: fetched.extracted_dir,
        }))
    }
}

fn resolution_error(
    identity: &ConnectorIdentity,
    version: &str,
    field: &'static str,
    detail: impl Into<String>,
) -> PublishError {
    PublishError::Resolution {
        identity: identity.clone(),
        version: version.to_string(),
        field,
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::memory::MemoryReleaseArchive;

    fn descriptor(uri: &str) -> PackagingDescriptor {
        PackagingDescriptor {
            version: "v1.0.0".into(),
            source_uri: uri.into(),
            ..Default::default()
        }
    }

    fn acme() -> ConnectorIdentity {
        ConnectorIdentity::new("acme", "db")
    }

    #[test]
    fn empty_uri_is_a_resolution_error_without_fetching() {
        let archive = MemoryReleaseArchive::new();
        let resolver = ArtifactResolver::new(&archive);
        let err = resolver
            .resolve(&acme(), "v1.0.0", &descriptor("  "))
            .unwrap_err();
        assert!(err.is_release_scoped());
        assert!(err.to_string().contains("(uri)"));
        assert!(archive.fetches().is_empty());
    }

    #[test]
    fn download_failure_is_release_scoped() {
        let archive = MemoryReleaseArchive::new();
        let resolver = ArtifactResolver::new(&archive);
        let err = resolver
            .resolve(&acme(), "v1.0.0", &descriptor("https://x/missing.tgz"))
            .unwrap_err();
        assert!(err.is_release_scoped());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn malformed_document_is_release_scoped() {
        let archive =
            MemoryReleaseArchive::new().with_release("https://x/y.tgz", "packagingDefinition: [");
        let resolver = ArtifactResolver::new(&archive);
        let err = resolver
            .resolve(&acme(), "v1.0.0", &descriptor("https://x/y.tgz"))
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Resolution {
                field: "connector-metadata.yaml",
                ..
            }
        ));
    }

    #[test]
    fn v2_generation_is_skipped() {
        let archive = MemoryReleaseArchive::new()
            .with_release("https://x/y.tgz", "version: v2\npackagingDefinition: {}\n");
        let resolver = ArtifactResolver::new(&archive);
        let resolution = resolver
            .resolve(&acme(), "v1.0.0", &descriptor("https://x/y.tgz"))
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Unsupported {
                generation: "v2".into()
            }
        );
    }

    #[test]
    fn resolved_release_carries_document_and_tarball() {
        let archive = MemoryReleaseArchive::new().with_release(
            "https://x/y.tgz",
            "packagingDefinition:\n  type: ManagedDockerBuild\n",
        );
        let resolver = ArtifactResolver::new(&archive);
        match resolver
            .resolve(&acme(), "v1.0.0", &descriptor("https://x/y.tgz"))
            .unwrap()
        {
            Resolution::Resolved(release) => {
                let def = release.document.packaging_definition.unwrap();
                assert_eq!(def.kind, "ManagedDockerBuild");
                assert!(release.tarball.ends_with("acme/db/v1.0.0/package.tgz"));
                assert!(release.extracted_dir.ends_with("acme/db/v1.0.0"));
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }
}
