//! Publish progress events.
//!
//! The pipeline emits one event per stage transition and per item it
//! builds. Rendering (human lines or JSON on stderr) lives in the binary;
//! the core only defines the events and the reporter seam.

use serde::Serialize;

use crate::changeset::Bucket;
use crate::models::ConnectorIdentity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PublishProgressEvent {
    /// The diff was classified and grouped.
    Classified { changes: usize, releases: usize },
    /// Building the payload for one bucket entry.
    Building {
        bucket: Bucket,
        identity: ConnectorIdentity,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    ReleaseSkipped {
        identity: ConnectorIdentity,
        version: String,
        generation: String,
    },
    ReleaseFailed {
        identity: ConnectorIdentity,
        version: String,
        error: String,
    },
    Submitting { rows: usize, versions: usize },
    Committed { rows: usize },
    RolledBack {
        attempted: usize,
        deleted: usize,
        failed: usize,
    },
}

pub trait PublishProgressReporter {
    fn report(&self, event: PublishProgressEvent);
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl PublishProgressReporter for NoProgress {
    fn report(&self, _event: PublishProgressEvent) {}
}
