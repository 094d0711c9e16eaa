//! Collaborator seams for the publish pipeline.
//!
//! The pipeline never talks to the network or unpacks archives itself. It
//! goes through these traits, which keeps the policy code testable against
//! the recording implementations in [`memory`] and lets the binary plug in
//! the real object store, image host, registry, and tarball fetcher.
//!
//! All calls are blocking. A run is single-threaded end to end, so the
//! traits carry no `Send`/`Sync` bounds.

pub mod memory;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{ConnectorIdentity, LogoFormat};
use crate::mutation::PublishMutation;

/// Object storage for re-hosted release tarballs.
pub trait BlobStore {
    /// Store the file at `key` and return its public URL.
    fn put(&self, key: &str, local_file: &Path) -> Result<String>;

    /// Remove the object at `key`.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Image hosting for connector logos.
pub trait ImageHost {
    /// Upload image bytes under `public_id` and return the secure URL.
    fn upload(&self, bytes: &[u8], public_id: &str, format: LogoFormat) -> Result<String>;
}

/// What the registry knows about an existing connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub multitenant: bool,
}

/// The registry database behind its GraphQL API.
pub trait Registry {
    /// Look up a connector by identity. `Ok(None)` means it does not exist.
    fn connector_info(&self, identity: &ConnectorIdentity) -> Result<Option<ConnectorInfo>>;

    /// Execute the single publish mutation.
    fn publish(&self, mutation: &PublishMutation) -> Result<()>;
}

/// A release tarball fetched and unpacked into scratch storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRelease {
    /// Raw text of the embedded release-metadata document.
    pub metadata_document: String,
    /// Local copy of the downloaded tarball, handed to [`BlobStore::put`].
    pub tarball: PathBuf,
    /// Where the tarball was unpacked.
    pub extracted_dir: PathBuf,
}

/// Fetch + extract of a release artifact.
pub trait ReleaseArchive {
    fn fetch(&self, uri: &str, identity: &ConnectorIdentity, version: &str)
        -> Result<FetchedRelease>;
}

/// Deterministic object key of a release tarball.
pub fn package_key(identity: &ConnectorIdentity, version: &str) -> String {
    format!(
        "packages/{}/{}/{}/package.tgz",
        identity.namespace, identity.name, version
    )
}
