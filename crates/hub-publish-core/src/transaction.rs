//! All-or-nothing submission of a run's rows, with compensating cleanup.
//!
//! ```text
//! Collecting ──commit()──▶ Submitting ──ok──▶ Committed
//!     │                        │
//!     │ abort()                └──err──▶ RolledBack (cleanup, then fail)
//!     └────────────────────────────────▶ RolledBack (cleanup)
//! ```
//!
//! Atomicity comes from the registry executing one multi-field mutation.
//! The transaction's own job is to undo the side effects this run already
//! made outside the database: the release tarballs uploaded to the blob
//! store. Cleanup is one best-effort pass, one delete per version record.

use std::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::builder::NewConnectorRows;
use crate::collab::{package_key, BlobStore, Registry};
use crate::error::PublishError;
use crate::mutation::{build_publish_mutation, ConflictPolicy};
use crate::payload::{ConnectorOverviewUpdate, ConnectorVersionRecord, PublishBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Collecting,
    Submitting,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Collecting => "collecting",
            TransactionState::Submitting => "submitting",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub attempted: usize,
    pub deleted: usize,
    /// `(key, error)` for every delete that failed.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub rows: usize,
    pub versions: usize,
}

pub struct PublishTransaction<'a> {
    state: TransactionState,
    policy: ConflictPolicy,
    batch: PublishBatch,
    registry: &'a dyn Registry,
    blobs: &'a dyn BlobStore,
    cleanup: Option<CleanupReport>,
}

impl<'a> PublishTransaction<'a> {
    pub fn new(policy: ConflictPolicy, registry: &'a dyn Registry, blobs: &'a dyn BlobStore) -> Self {
        Self {
            state: TransactionState::Collecting,
            policy,
            batch: PublishBatch::default(),
            registry,
            blobs,
            cleanup: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn batch(&self) -> &PublishBatch {
        &self.batch
    }

    /// Report of the cleanup pass, once one has run.
    pub fn cleanup_report(&self) -> Option<&CleanupReport> {
        self.cleanup.as_ref()
    }

    pub fn add_new_connector(&mut self, rows: NewConnectorRows) {
        self.batch.connector_inserts.push(rows.connector);
        self.batch.overview_inserts.push(rows.overview);
    }

    pub fn add_overview_update(&mut self, update: ConnectorOverviewUpdate) {
        self.batch.overview_updates.push(update);
    }

    /// Record a version row. Its tarball must already be uploaded.
    pub fn add_version(&mut self, record: ConnectorVersionRecord) {
        self.batch.version_inserts.push(record);
    }

    /// Submit everything collected as one mutation.
    ///
    /// An empty batch commits without contacting the registry. On failure
    /// every uploaded tarball is deleted (best effort) and the original
    /// submission error is returned.
    pub fn commit(&mut self) -> Result<CommitReport, PublishError> {
        if self.state != TransactionState::Collecting {
            return Err(PublishError::Submission {
                versions: 0,
                detail: format!("transaction is already {}", self.state),
            });
        }

        let report = CommitReport {
            rows: self.batch.row_count(),
            versions: self.batch.version_inserts.len(),
        };
        if self.batch.is_empty() {
            info!("nothing to publish");
            self.state = TransactionState::Committed;
            return Ok(report);
        }

        self.state = TransactionState::Submitting;
        let mutation = build_publish_mutation(&self.batch, self.policy);
        info!(
            "submitting {} rows ({} versions) in one mutation",
            report.rows, report.versions
        );

        match self.registry.publish(&mutation) {
            Ok(()) => {
                self.state = TransactionState::Committed;
                Ok(report)
            }
            Err(err) => {
                let detail = format!("{:#}", err);
                warn!("publish mutation failed: {}", detail);
                self.roll_back();
                Err(PublishError::Submission {
                    versions: report.versions,
                    detail,
                })
            }
        }
    }

    /// Abandon the run after a fatal error while collecting.
    pub fn abort(&mut self) -> CleanupReport {
        if self.state == TransactionState::Collecting {
            self.roll_back();
        }
        self.cleanup.clone().unwrap_or_default()
    }

    fn roll_back(&mut self) {
        let report = compensating_cleanup(self.blobs, &self.batch.version_inserts);
        if !report.failed.is_empty() {
            warn!(
                "cleanup left {} of {} uploaded packages behind",
                report.failed.len(),
                report.attempted
            );
        }
        self.cleanup = Some(report);
        self.state = TransactionState::RolledBack;
    }
}

/// Delete the uploaded tarball of every record, continuing past failures.
pub fn compensating_cleanup(
    blobs: &dyn BlobStore,
    records: &[ConnectorVersionRecord],
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for record in records {
        let key = package_key(&record.identity(), &record.version);
        report.attempted += 1;
        match blobs.delete(&key) {
            Ok(()) => {
                info!("deleted {}", key);
                report.deleted += 1;
            }
            Err(e) => {
                warn!("failed to delete {}: {:#}", key, e);
                report.failed.push((key, format!("{:#}", e)));
            }
        }
    }
    report
}
