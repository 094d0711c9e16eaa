//! Payload builders: one entry point per change bucket.
//!
//! Each builder reads what it needs from the registry tree under
//! `repo_root`, consults the collaborators, and returns the row(s) the
//! registry should receive. Side effects (logo and tarball uploads) happen
//! as the last step of a builder, after every fallible derivation, so a
//! failed build never leaves an orphaned upload behind.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::collab::{package_key, BlobStore, ImageHost, Registry, ReleaseArchive};
use crate::error::PublishError;
use crate::models::{
    parse_release_version, ConnectorIdentity, ConnectorMetadata, Environment, LogoDescriptor,
    LogoFormat, PackagingDescriptor, PackagingType, ReleaseMetadataDocument,
};
use crate::payload::{
    AuthorInsert, ConnectorOverviewInsert, ConnectorOverviewUpdate, ConnectorVersionRecord,
    HubRegistryConnectorInsertInput, OverviewAuthor, OverviewSet,
};
use crate::resolve::{ArtifactResolver, Resolution};

/// Rows emitted for a brand-new connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectorRows {
    pub connector: HubRegistryConnectorInsertInput,
    pub overview: ConnectorOverviewInsert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Built(ConnectorVersionRecord),
    /// Unsupported packaging generation. Not an error.
    Skipped { generation: String },
}

pub struct PayloadBuilder<'a> {
    repo_root: PathBuf,
    environment: Environment,
    images: &'a dyn ImageHost,
    blobs: &'a dyn BlobStore,
    registry: &'a dyn Registry,
    resolver: ArtifactResolver<'a>,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        environment: Environment,
        images: &'a dyn ImageHost,
        blobs: &'a dyn BlobStore,
        registry: &'a dyn Registry,
        archive: &'a dyn ReleaseArchive,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            environment,
            images,
            blobs,
            registry,
            resolver: ArtifactResolver::new(archive),
        }
    }

    fn connector_dir(&self, identity: &ConnectorIdentity) -> PathBuf {
        self.repo_root
            .join("registry")
            .join(&identity.namespace)
            .join(&identity.name)
    }

    fn read_metadata(
        &self,
        identity: &ConnectorIdentity,
        path: &str,
    ) -> Result<ConnectorMetadata, PublishError> {
        ConnectorMetadata::from_file(&self.repo_root.join(path))
            .map_err(|e| PublishError::io(identity, path, &e))
    }

    fn read_text(&self, identity: &ConnectorIdentity, path: &Path) -> Result<String, PublishError> {
        std::fs::read_to_string(path).map_err(|e| PublishError::Io {
            identity: identity.clone(),
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    fn upload_logo(
        &self,
        identity: &ConnectorIdentity,
        path: &Path,
        format: LogoFormat,
    ) -> Result<String, PublishError> {
        let bytes = std::fs::read(path).map_err(|e| PublishError::Io {
            identity: identity.clone(),
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        self.images
            .upload(&bytes, &identity.logo_public_id(), format)
            .map_err(|e| PublishError::ImageUpload {
                identity: identity.clone(),
                path: path.display().to_string(),
                detail: format!("{:#}", e),
            })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Connectors
    // ═══════════════════════════════════════════════════════════════════

    /// Insert rows for a connector that first appears in this change set.
    pub fn new_connector(
        &self,
        identity: &ConnectorIdentity,
        metadata_path: &str,
    ) -> Result<NewConnectorRows, PublishError> {
        let metadata = self.read_metadata(identity, metadata_path)?;
        let overview = &metadata.overview;
        if overview.namespace.is_empty() {
            return Err(PublishError::consistency(
                identity,
                None,
                "overview.namespace",
                "missing",
            ));
        }
        if overview.namespace != identity.namespace {
            return Err(PublishError::consistency(
                identity,
                None,
                "overview.namespace",
                format!(
                    "declares '{}' but the connector lives under registry/{}",
                    overview.namespace, identity.namespace
                ),
            ));
        }
        if overview.title.is_empty() {
            return Err(PublishError::consistency(identity, None, "overview.title", "missing"));
        }

        let dir = self.connector_dir(identity);
        let docs = self.read_text(identity, &dir.join("README.md"))?;
        let (logo_path, logo_format) = find_logo(&dir).ok_or_else(|| PublishError::Io {
            identity: identity.clone(),
            path: dir.join("logo.png").display().to_string(),
            detail: "no logo.png or logo.svg found".to_string(),
        })?;

        let existing = self
            .registry
            .connector_info(identity)
            .map_err(|e| PublishError::Registry {
                identity: identity.clone(),
                detail: format!("{:#}", e),
            })?;
        if existing.is_some() {
            match self.environment {
                Environment::Production => {
                    return Err(PublishError::consistency(
                        identity,
                        None,
                        "connector",
                        "already exists in the production registry",
                    ));
                }
                Environment::Staging => {
                    warn!("{}: already exists in staging, overwriting", identity);
                }
            }
        }

        let logo_url = self.upload_logo(identity, &logo_path, logo_format)?;
        info!("{}: uploaded logo to {}", identity, logo_url);

        Ok(NewConnectorRows {
            connector: HubRegistryConnectorInsertInput {
                name: identity.name.clone(),
                title: overview.title.clone(),
                namespace: identity.namespace.clone(),
            },
            overview: ConnectorOverviewInsert {
                namespace: identity.namespace.clone(),
                name: identity.name.clone(),
                title: overview.title.clone(),
                description: overview.description.clone(),
                logo: logo_url,
                docs,
                is_verified: metadata.is_verified,
                is_hosted: metadata.is_hosted_by_hasura,
                author: AuthorInsert {
                    data: OverviewAuthor {
                        name: metadata.author.name.clone(),
                        support_email: metadata.author.support_email.clone(),
                        website: metadata.author.homepage.clone(),
                    },
                },
            },
        })
    }

    /// Overview update for an edited `metadata.json`.
    ///
    /// Only `latest_version`, `title` and `description` are carried; logo
    /// and docs have their own operations.
    pub fn modified_connector(
        &self,
        identity: &ConnectorIdentity,
        metadata_path: &str,
    ) -> Result<ConnectorOverviewUpdate, PublishError> {
        let metadata = self.read_metadata(identity, metadata_path)?;
        let overview = metadata.overview;
        let set = OverviewSet {
            latest_version: non_empty(overview.latest_version),
            title: non_empty(overview.title),
            description: non_empty(overview.description),
            ..Default::default()
        };
        if set.is_empty() {
            return Err(PublishError::consistency(
                identity,
                None,
                "overview",
                "none of latest_version, title, description is set",
            ));
        }
        Ok(ConnectorOverviewUpdate::new(identity, set))
    }

    pub fn logo(
        &self,
        identity: &ConnectorIdentity,
        logo: &LogoDescriptor,
    ) -> Result<ConnectorOverviewUpdate, PublishError> {
        let url = self.upload_logo(identity, &self.repo_root.join(&logo.path), logo.format)?;
        Ok(ConnectorOverviewUpdate::logo(identity, url))
    }

    pub fn readme(
        &self,
        identity: &ConnectorIdentity,
        readme_path: &str,
    ) -> Result<ConnectorOverviewUpdate, PublishError> {
        let docs = self.read_text(identity, &self.repo_root.join(readme_path))?;
        Ok(ConnectorOverviewUpdate::docs(identity, docs))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Releases
    // ═══════════════════════════════════════════════════════════════════

    /// Version record for one added release.
    ///
    /// `connector_is_new` says whether the same run also creates the
    /// connector, which is the only case where a connector unknown to the
    /// registry gets a default multitenancy of `false`.
    pub fn release(
        &self,
        identity: &ConnectorIdentity,
        version: &str,
        packaging_path: &str,
        connector_is_new: bool,
    ) -> Result<ReleaseOutcome, PublishError> {
        let descriptor = PackagingDescriptor::from_file(&self.repo_root.join(packaging_path))
            .map_err(|e| PublishError::io(identity, packaging_path, &e))?;

        parse_release_version(&descriptor.version).map_err(|e| {
            PublishError::consistency(identity, Some(version), "version", format!("{:#}", e))
        })?;
        if descriptor.version != version {
            return Err(PublishError::consistency(
                identity,
                Some(version),
                "version",
                format!(
                    "packaging file declares {} but lives under releases/{}",
                    descriptor.version, version
                ),
            ));
        }

        let release = match self.resolver.resolve(identity, version, &descriptor)? {
            Resolution::Resolved(release) => release,
            Resolution::Unsupported { generation } => {
                return Ok(ReleaseOutcome::Skipped { generation });
            }
        };

        let (packaging_type, image) = packaging_of(identity, version, &release.document)?;
        let is_multitenant = self.multitenancy(identity, version, connector_is_new)?;

        let key = package_key(identity, version);
        let url = self
            .blobs
            .put(&key, &release.tarball)
            .map_err(|e| PublishError::Storage {
                identity: identity.clone(),
                version: version.to_string(),
                key: key.clone(),
                detail: format!("{:#}", e),
            })?;
        info!("{} @ {}: uploaded package to {}", identity, version, url);

        Ok(ReleaseOutcome::Built(ConnectorVersionRecord {
            namespace: identity.namespace.clone(),
            name: identity.name.clone(),
            version: version.to_string(),
            image,
            package_definition_url: url,
            is_multitenant,
            packaging_type,
        }))
    }

    fn multitenancy(
        &self,
        identity: &ConnectorIdentity,
        version: &str,
        connector_is_new: bool,
    ) -> Result<bool, PublishError> {
        let info = self
            .registry
            .connector_info(identity)
            .map_err(|e| PublishError::Registry {
                identity: identity.clone(),
                detail: format!("{:#}", e),
            })?;
        match info {
            Some(info) => Ok(info.multitenant),
            None if connector_is_new => Ok(false),
            None => Err(PublishError::consistency(
                identity,
                Some(version),
                "connector",
                "release targets a connector that does not exist in the registry",
            )),
        }
    }
}

fn packaging_of(
    identity: &ConnectorIdentity,
    version: &str,
    document: &ReleaseMetadataDocument,
) -> Result<(PackagingType, Option<String>), PublishError> {
    let Some(def) = &document.packaging_definition else {
        return Err(PublishError::consistency(
            identity,
            Some(version),
            "packagingDefinition",
            "missing",
        ));
    };
    match def.kind.as_str() {
        "PrebuiltDockerImage" => match def.docker_image.as_deref().map(str::trim) {
            Some(image) if !image.is_empty() => {
                Ok((PackagingType::PrebuiltDockerImage, Some(image.to_string())))
            }
            _ => Err(PublishError::consistency(
                identity,
                Some(version),
                "packagingDefinition.dockerImage",
                "required for PrebuiltDockerImage",
            )),
        },
        "ManagedDockerBuild" => Ok((PackagingType::ManagedDockerBuild, None)),
        "" => Err(PublishError::consistency(
            identity,
            Some(version),
            "packagingDefinition.type",
            "missing",
        )),
        other => Err(PublishError::consistency(
            identity,
            Some(version),
            "packagingDefinition.type",
            format!("unknown packaging type '{}'", other),
        )),
    }
}

fn find_logo(dir: &Path) -> Option<(PathBuf, LogoFormat)> {
    [LogoFormat::Png, LogoFormat::Svg]
        .into_iter()
        .map(|format| (dir.join(format!("logo.{}", format.as_str())), format))
        .find(|(path, _)| path.is_file())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
