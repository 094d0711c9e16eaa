//! In-memory collaborators for tests and dry runs.
//!
//! Each implementation records every call it receives and can be told to
//! fail specific calls, so scenario tests can assert exactly which uploads,
//! deletes and mutations a run attempted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Result};

use super::{BlobStore, ConnectorInfo, FetchedRelease, ImageHost, Registry, ReleaseArchive};
use crate::models::{ConnectorIdentity, LogoFormat};
use crate::mutation::PublishMutation;

// ═══════════════════════════════════════════════════════════════════════
// Blob store
// ═══════════════════════════════════════════════════════════════════════

/// Object store that keeps `key → local file` pairs in memory.
pub struct MemoryBlobStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, PathBuf>>,
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    failing_puts: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            base_url: "https://storage.example.test/packages-bucket".to_string(),
            objects: Mutex::new(BTreeMap::new()),
            puts: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            failing_puts: BTreeSet::new(),
            failing_deletes: BTreeSet::new(),
        }
    }

    /// Make `put` fail for this key.
    pub fn fail_put(mut self, key: impl Into<String>) -> Self {
        self.failing_puts.insert(key.into());
        self
    }

    /// Make `delete` fail for this key.
    pub fn fail_delete(mut self, key: impl Into<String>) -> Self {
        self.failing_deletes.insert(key.into());
        self
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    /// Keys passed to `put`, in call order (including failed calls).
    pub fn put_calls(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    /// Keys passed to `delete`, in call order (including failed calls).
    pub fn delete_calls(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, local_file: &Path) -> Result<String> {
        self.puts.lock().unwrap().push(key.to_string());
        if self.failing_puts.contains(key) {
            bail!("simulated upload failure for {}", key);
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), local_file.to_path_buf());
        Ok(self.url_for(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.failing_deletes.contains(key) {
            bail!("simulated delete failure for {}", key);
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Image host
// ═══════════════════════════════════════════════════════════════════════

/// Image host returning predictable URLs.
#[derive(Default)]
pub struct MemoryImageHost {
    uploads: Mutex<Vec<(String, LogoFormat, usize)>>,
    fail: bool,
}

impl MemoryImageHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(public_id, format, byte length)` of every upload.
    pub fn uploads(&self) -> Vec<(String, LogoFormat, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

impl ImageHost for MemoryImageHost {
    fn upload(&self, bytes: &[u8], public_id: &str, format: LogoFormat) -> Result<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((public_id.to_string(), format, bytes.len()));
        if self.fail {
            bail!("simulated image upload failure for {}", public_id);
        }
        Ok(format!(
            "https://images.example.test/{}.{}",
            public_id,
            format.as_str()
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry holding a fixed set of known connectors.
#[derive(Default)]
pub struct MemoryRegistry {
    connectors: BTreeMap<ConnectorIdentity, ConnectorInfo>,
    lookups: Mutex<Vec<ConnectorIdentity>>,
    published: Mutex<Vec<PublishMutation>>,
    publish_error: Option<String>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connector(mut self, identity: ConnectorIdentity, multitenant: bool) -> Self {
        self.connectors
            .insert(identity, ConnectorInfo { multitenant });
        self
    }

    /// Reject every publish call with `message`.
    pub fn failing_publish(mut self, message: impl Into<String>) -> Self {
        self.publish_error = Some(message.into());
        self
    }

    pub fn lookups(&self) -> Vec<ConnectorIdentity> {
        self.lookups.lock().unwrap().clone()
    }

    /// Mutations passed to `publish`, including rejected ones.
    pub fn published(&self) -> Vec<PublishMutation> {
        self.published.lock().unwrap().clone()
    }
}

impl Registry for MemoryRegistry {
    fn connector_info(&self, identity: &ConnectorIdentity) -> Result<Option<ConnectorInfo>> {
        self.lookups.lock().unwrap().push(identity.clone());
        Ok(self.connectors.get(identity).copied())
    }

    fn publish(&self, mutation: &PublishMutation) -> Result<()> {
        self.published.lock().unwrap().push(mutation.clone());
        if let Some(message) = &self.publish_error {
            bail!("{}", message);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Release archive
// ═══════════════════════════════════════════════════════════════════════

/// Serves release-metadata documents by URI without touching the network.
#[derive(Default)]
pub struct MemoryReleaseArchive {
    documents: BTreeMap<String, String>,
    fetches: Mutex<Vec<String>>,
}

impl MemoryReleaseArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` (YAML text) for `uri`. Unknown URIs fail like a 404.
    pub fn with_release(mut self, uri: impl Into<String>, document: impl Into<String>) -> Self {
        self.documents.insert(uri.into(), document.into());
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

impl ReleaseArchive for MemoryReleaseArchive {
    fn fetch(
        &self,
        uri: &str,
        identity: &ConnectorIdentity,
        version: &str,
    ) -> Result<FetchedRelease> {
        self.fetches.lock().unwrap().push(uri.to_string());
        let dir = PathBuf::from(format!(
            "memory/{}/{}/{}",
            identity.namespace, identity.name, version
        ));
        match self.documents.get(uri) {
            Some(document) => Ok(FetchedRelease {
                metadata_document: document.clone(),
                tarball: dir.join("package.tgz"),
                extracted_dir: dir,
            }),
            None => bail!("Error downloading file: 404 Not Found ({})", uri),
        }
    }
}
