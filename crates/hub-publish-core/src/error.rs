//! Error taxonomy for a publish run.
//!
//! Every variant names the connector it concerns and, where it applies, the
//! release version and the field or file that failed, so the offending file
//! can be found in the pull request.

use std::fmt;

use thiserror::Error;

use crate::models::ConnectorIdentity;

/// Optional release version, rendered as ` @ v1.2.3` when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTag(pub Option<String>);

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => write!(f, " @ {}", v),
            None => Ok(()),
        }
    }
}

impl From<Option<&str>> for VersionTag {
    fn from(v: Option<&str>) -> Self {
        VersionTag(v.map(str::to_string))
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// The pull request violates a structural rule of the registry tree.
    #[error("{path}: {message}")]
    Classification { path: String, message: String },

    /// Download, extraction or parsing of one release failed.
    #[error("{identity} @ {version}: failed to resolve release ({field}): {detail}")]
    Resolution {
        identity: ConnectorIdentity,
        version: String,
        field: &'static str,
        detail: String,
    },

    /// A payload field could not be derived.
    #[error("{identity}{version}: {field}: {message}")]
    Consistency {
        identity: ConnectorIdentity,
        version: VersionTag,
        field: &'static str,
        message: String,
    },

    /// A file that must exist in the registry tree could not be read.
    #[error("{identity}: failed to read {path}: {detail}")]
    Io {
        identity: ConnectorIdentity,
        path: String,
        detail: String,
    },

    #[error("{identity} @ {version}: failed to upload package to {key}: {detail}")]
    Storage {
        identity: ConnectorIdentity,
        version: String,
        key: String,
        detail: String,
    },

    #[error("{identity}: failed to upload logo {path}: {detail}")]
    ImageUpload {
        identity: ConnectorIdentity,
        path: String,
        detail: String,
    },

    /// A read-only registry lookup failed.
    #[error("{identity}: registry lookup failed: {detail}")]
    Registry {
        identity: ConnectorIdentity,
        detail: String,
    },

    /// The single publish mutation was rejected.
    #[error("publish mutation failed ({versions} version records rolled back): {detail}")]
    Submission { versions: usize, detail: String },
}

impl PublishError {
    /// Errors confined to one release; sibling releases keep processing.
    pub fn is_release_scoped(&self) -> bool {
        matches!(self, PublishError::Resolution { .. })
    }

    pub fn consistency(
        identity: &ConnectorIdentity,
        version: Option<&str>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        PublishError::Consistency {
            identity: identity.clone(),
            version: version.into(),
            field,
            message: message.into(),
        }
    }

    pub fn io(identity: &ConnectorIdentity, path: impl Into<String>, err: &anyhow::Error) -> Self {
        PublishError::Io {
            identity: identity.clone(),
            path: path.into(),
            detail: format!("{:#}", err),
        }
    }
}
