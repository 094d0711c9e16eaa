//! Aggregation of classified changes into per-connector buckets.
//!
//! All buckets are keyed by [`ConnectorIdentity`] in ordered maps, so
//! iteration is sorted by identity and reports come out deterministic.
//! Releases of one connector are ordered by semantic version through
//! [`ChangeSet::ordered_releases`], not by their map order.

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;

use crate::classify::ClassifyError;
use crate::models::{compare_release_versions, ClassifiedChange, ConnectorIdentity, LogoDescriptor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// New connectors → path of their `metadata.json`.
    pub new_connectors: BTreeMap<ConnectorIdentity, String>,
    /// Modified connectors → path of their `metadata.json`.
    pub modified_connectors: BTreeMap<ConnectorIdentity, String>,
    pub new_logos: BTreeMap<ConnectorIdentity, LogoDescriptor>,
    pub modified_logos: BTreeMap<ConnectorIdentity, LogoDescriptor>,
    pub new_readmes: BTreeMap<ConnectorIdentity, String>,
    pub modified_readmes: BTreeMap<ConnectorIdentity, String>,
    /// Connector → release version → path of its `connector-packaging.json`.
    pub new_versions: BTreeMap<ConnectorIdentity, BTreeMap<String, String>>,
}

impl ChangeSet {
    /// Fold classified changes into buckets.
    ///
    /// A connector may be added at most once; several releases per
    /// connector accumulate under one entry.
    pub fn aggregate<I>(changes: I) -> Result<Self, ClassifyError>
    where
        I: IntoIterator<Item = ClassifiedChange>,
    {
        let mut set = ChangeSet::default();
        for change in changes {
            set.push(change)?;
        }
        Ok(set)
    }

    fn push(&mut self, change: ClassifiedChange) -> Result<(), ClassifyError> {
        match change {
            ClassifiedChange::NewConnectorMetadata { identity, path } => {
                if self.new_connectors.contains_key(&identity) {
                    return Err(ClassifyError::DuplicateNewConnector { path, identity });
                }
                self.new_connectors.insert(identity, path);
            }
            ClassifiedChange::ModifiedConnectorMetadata { identity, path } => {
                self.modified_connectors.insert(identity, path);
            }
            ClassifiedChange::NewLogo { identity, logo } => {
                insert_logo(&mut self.new_logos, identity, logo);
            }
            ClassifiedChange::ModifiedLogo { identity, logo } => {
                insert_logo(&mut self.modified_logos, identity, logo);
            }
            ClassifiedChange::NewReadme { identity, path } => {
                self.new_readmes.insert(identity, path);
            }
            ClassifiedChange::ModifiedReadme { identity, path } => {
                self.modified_readmes.insert(identity, path);
            }
            ClassifiedChange::NewVersionRelease {
                identity,
                version,
                packaging_path,
            } => {
                self.new_versions
                    .entry(identity)
                    .or_default()
                    .insert(version, packaging_path);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.new_connectors.is_empty()
            && self.modified_connectors.is_empty()
            && self.new_logos.is_empty()
            && self.modified_logos.is_empty()
            && self.new_readmes.is_empty()
            && self.modified_readmes.is_empty()
            && self.new_versions.is_empty()
    }

    pub fn is_new_connector(&self, identity: &ConnectorIdentity) -> bool {
        self.new_connectors.contains_key(identity)
    }

    pub fn release_count(&self) -> usize {
        self.new_versions.values().map(BTreeMap::len).sum()
    }

    /// `(version, packaging path)` of every new release of `identity`, in
    /// semantic version order.
    pub fn ordered_releases(&self, identity: &ConnectorIdentity) -> Vec<(&str, &str)> {
        let mut releases: Vec<(&str, &str)> = self
            .new_versions
            .get(identity)
            .into_iter()
            .flatten()
            .map(|(version, path)| (version.as_str(), path.as_str()))
            .collect();
        releases.sort_by(|a, b| compare_release_versions(a.0, b.0));
        releases
    }

    /// Flat report of every bucket entry, sorted by bucket, identity, version.
    pub fn summary(&self) -> ChangeSetSummary {
        let mut entries = Vec::new();

        let simple = [
            (Bucket::NewConnector, &self.new_connectors),
            (Bucket::ModifiedConnector, &self.modified_connectors),
            (Bucket::NewReadme, &self.new_readmes),
            (Bucket::ModifiedReadme, &self.modified_readmes),
        ];
        for (bucket, map) in simple {
            for (identity, path) in map {
                entries.push(SummaryEntry::new(bucket, identity, None, path));
            }
        }
        for (bucket, map) in [
            (Bucket::NewLogo, &self.new_logos),
            (Bucket::ModifiedLogo, &self.modified_logos),
        ] {
            for (identity, logo) in map {
                entries.push(SummaryEntry::new(bucket, identity, None, &logo.path));
            }
        }
        for identity in self.new_versions.keys() {
            for (version, path) in self.ordered_releases(identity) {
                entries.push(SummaryEntry::new(
                    Bucket::NewVersion,
                    identity,
                    Some(version),
                    path,
                ));
            }
        }

        entries.sort_by(|a, b| {
            (a.bucket, &a.namespace, &a.name)
                .cmp(&(b.bucket, &b.namespace, &b.name))
                .then_with(|| match (&a.version, &b.version) {
                    (Some(x), Some(y)) => compare_release_versions(x, y),
                    (x, y) => x.cmp(y),
                })
        });
        ChangeSetSummary { entries }
    }
}

fn insert_logo(
    bucket: &mut BTreeMap<ConnectorIdentity, LogoDescriptor>,
    identity: ConnectorIdentity,
    logo: LogoDescriptor,
) {
    if let Some(previous) = bucket.get(&identity) {
        warn!(
            "{}: both {} and {} changed, using {}",
            identity, previous.path, logo.path, logo.path
        );
    }
    bucket.insert(identity, logo);
}

/// Bucket names as they appear in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    NewConnector,
    ModifiedConnector,
    NewLogo,
    ModifiedLogo,
    NewReadme,
    ModifiedReadme,
    NewVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub bucket: Bucket,
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub path: String,
}

impl SummaryEntry {
    fn new(bucket: Bucket, identity: &ConnectorIdentity, version: Option<&str>, path: &str) -> Self {
        Self {
            bucket,
            namespace: identity.namespace.clone(),
            name: identity.name.clone(),
            version: version.map(str::to_string),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSetSummary {
    pub entries: Vec<SummaryEntry>,
}
