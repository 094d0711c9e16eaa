//! The publish run, end to end.
//!
//! ```text
//! ChangedFileSet ─▶ classify_all ─▶ ChangeSet::aggregate
//!                                        │
//!      ┌─────────────────────────────────┘
//!      ▼
//!  new connectors ─▶ modified connectors ─▶ logos ─▶ readmes ─▶ releases
//!      │                  (each bucket in sorted identity order)
//!      ▼
//!  PublishTransaction::commit ─▶ Committed | RolledBack
//! ```
//!
//! An empty change set returns right after classification. Releases of one
//! connector are built in semantic version order.
//!
//! A resolution failure is confined to its release: it is recorded in the
//! outcome, the remaining releases are still built, and the batch is still
//! submitted. The outcome is then not a full success. Any other error
//! aborts the transaction, which removes this run's uploaded tarballs.

use std::path::PathBuf;

use log::{info, warn};
use serde::Serialize;

use crate::builder::{PayloadBuilder, ReleaseOutcome};
use crate::changeset::{Bucket, ChangeSet};
use crate::classify::classify_all;
use crate::collab::{BlobStore, ImageHost, Registry, ReleaseArchive};
use crate::error::PublishError;
use crate::models::{ChangedFileSet, ConnectorIdentity, Environment};
use crate::progress::{PublishProgressEvent, PublishProgressReporter};
use crate::transaction::{CleanupReport, PublishTransaction, TransactionState};

/// Everything a run needs, passed in explicitly.
pub struct PipelineContext<'a> {
    pub environment: Environment,
    pub repo_root: PathBuf,
    pub images: &'a dyn ImageHost,
    pub blobs: &'a dyn BlobStore,
    pub registry: &'a dyn Registry,
    pub archive: &'a dyn ReleaseArchive,
    pub progress: &'a dyn PublishProgressReporter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRelease {
    pub identity: ConnectorIdentity,
    pub version: String,
    pub generation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRelease {
    pub identity: ConnectorIdentity,
    pub version: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub state: TransactionState,
    pub connector_inserts: usize,
    pub overview_inserts: usize,
    pub overview_updates: usize,
    pub versions: usize,
    pub skipped_releases: Vec<SkippedRelease>,
    pub failed_releases: Vec<FailedRelease>,
}

impl PublishOutcome {
    /// Committed with no release left behind.
    pub fn is_success(&self) -> bool {
        self.state == TransactionState::Committed && self.failed_releases.is_empty()
    }
}

#[derive(Default)]
struct ReleaseLedger {
    skipped: Vec<SkippedRelease>,
    failed: Vec<FailedRelease>,
}

pub fn run(changed: &ChangedFileSet, ctx: &PipelineContext) -> Result<PublishOutcome, PublishError> {
    let changes = classify_all(changed)?;
    let set = ChangeSet::aggregate(changes)?;
    let entries = set.summary().entries.len();
    info!(
        "classified {} changes ({} releases)",
        entries,
        set.release_count()
    );
    ctx.progress.report(PublishProgressEvent::Classified {
        changes: entries,
        releases: set.release_count(),
    });

    if set.is_empty() {
        info!("nothing to publish");
        return Ok(PublishOutcome {
            state: TransactionState::Committed,
            connector_inserts: 0,
            overview_inserts: 0,
            overview_updates: 0,
            versions: 0,
            skipped_releases: Vec::new(),
            failed_releases: Vec::new(),
        });
    }

    let builder = PayloadBuilder::new(
        ctx.repo_root.clone(),
        ctx.environment,
        ctx.images,
        ctx.blobs,
        ctx.registry,
        ctx.archive,
    );
    let mut tx = PublishTransaction::new(ctx.environment.conflict_policy(), ctx.registry, ctx.blobs);
    let mut ledger = ReleaseLedger::default();

    if let Err(err) = collect(&set, &builder, &mut tx, &mut ledger, ctx.progress) {
        let cleanup = tx.abort();
        report_rollback(ctx.progress, &cleanup);
        return Err(err);
    }

    let batch = tx.batch();
    let (connector_inserts, overview_inserts, overview_updates, versions) = (
        batch.connector_inserts.len(),
        batch.overview_inserts.len(),
        batch.overview_updates.len(),
        batch.version_inserts.len(),
    );
    ctx.progress.report(PublishProgressEvent::Submitting {
        rows: batch.row_count(),
        versions,
    });

    match tx.commit() {
        Ok(report) => {
            ctx.progress
                .report(PublishProgressEvent::Committed { rows: report.rows });
        }
        Err(err) => {
            if let Some(cleanup) = tx.cleanup_report() {
                report_rollback(ctx.progress, cleanup);
            }
            return Err(err);
        }
    }

    Ok(PublishOutcome {
        state: tx.state(),
        connector_inserts,
        overview_inserts,
        overview_updates,
        versions,
        skipped_releases: ledger.skipped,
        failed_releases: ledger.failed,
    })
}

fn report_rollback(progress: &dyn PublishProgressReporter, cleanup: &CleanupReport) {
    progress.report(PublishProgressEvent::RolledBack {
        attempted: cleanup.attempted,
        deleted: cleanup.deleted,
        failed: cleanup.failed.len(),
    });
}

fn building(progress: &dyn PublishProgressReporter, bucket: Bucket, identity: &ConnectorIdentity) {
    progress.report(PublishProgressEvent::Building {
        bucket,
        identity: identity.clone(),
        version: None,
    });
}

fn collect(
    set: &ChangeSet,
    builder: &PayloadBuilder,
    tx: &mut PublishTransaction,
    ledger: &mut ReleaseLedger,
    progress: &dyn PublishProgressReporter,
) -> Result<(), PublishError> {
    for (identity, path) in &set.new_connectors {
        building(progress, Bucket::NewConnector, identity);
        tx.add_new_connector(builder.new_connector(identity, path)?);
    }

    for (identity, path) in &set.modified_connectors {
        building(progress, Bucket::ModifiedConnector, identity);
        tx.add_overview_update(builder.modified_connector(identity, path)?);
    }

    for (bucket, logos) in [
        (Bucket::NewLogo, &set.new_logos),
        (Bucket::ModifiedLogo, &set.modified_logos),
    ] {
        for (identity, logo) in logos {
            // Already part of the overview insert.
            if set.is_new_connector(identity) {
                continue;
            }
            building(progress, bucket, identity);
            tx.add_overview_update(builder.logo(identity, logo)?);
        }
    }

    for (bucket, readmes) in [
        (Bucket::NewReadme, &set.new_readmes),
        (Bucket::ModifiedReadme, &set.modified_readmes),
    ] {
        for (identity, path) in readmes {
            if set.is_new_connector(identity) {
                continue;
            }
            building(progress, bucket, identity);
            tx.add_overview_update(builder.readme(identity, path)?);
        }
    }

    for identity in set.new_versions.keys() {
        let connector_is_new = set.is_new_connector(identity);
        for (version, path) in set.ordered_releases(identity) {
            progress.report(PublishProgressEvent::Building {
                bucket: Bucket::NewVersion,
                identity: identity.clone(),
                version: Some(version.to_string()),
            });
            match builder.release(identity, version, path, connector_is_new) {
                Ok(ReleaseOutcome::Built(record)) => tx.add_version(record),
                Ok(ReleaseOutcome::Skipped { generation }) => {
                    info!(
                        "{} @ {}: skipping {} release",
                        identity, version, generation
                    );
                    progress.report(PublishProgressEvent::ReleaseSkipped {
                        identity: identity.clone(),
                        version: version.to_string(),
                        generation: generation.clone(),
                    });
                    ledger.skipped.push(SkippedRelease {
                        identity: identity.clone(),
                        version: version.to_string(),
                        generation,
                    });
                }
                Err(err) if err.is_release_scoped() => {
                    warn!("{}", err);
                    progress.report(PublishProgressEvent::ReleaseFailed {
                        identity: identity.clone(),
                        version: version.to_string(),
                        error: err.to_string(),
                    });
                    ledger.failed.push(FailedRelease {
                        identity: identity.clone(),
                        version: version.to_string(),
                        error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::memory::{
        MemoryBlobStore, MemoryImageHost, MemoryRegistry, MemoryReleaseArchive,
    };
    use crate::models::PackagingType;
    use crate::payload::ConnectorVersionRecord;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    const URI: &str = "https://x/y.tgz";
    const MANAGED: &str = "packagingDefinition:\n  type: ManagedDockerBuild\n";

    #[derive(Default)]
    struct RecordingProgress {
        events: RefCell<Vec<PublishProgressEvent>>,
    }

    impl PublishProgressReporter for RecordingProgress {
        fn report(&self, event: PublishProgressEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    struct Harness {
        root: TempDir,
        images: MemoryImageHost,
        blobs: MemoryBlobStore,
        registry: MemoryRegistry,
        archive: MemoryReleaseArchive,
        progress: RecordingProgress,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                images: MemoryImageHost::new(),
                blobs: MemoryBlobStore::new(),
                registry: MemoryRegistry::new(),
                archive: MemoryReleaseArchive::new().with_release(URI, MANAGED),
                progress: RecordingProgress::default(),
            }
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.root.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn acme_db(&self) {
            self.write(
                "registry/acme/db/metadata.json",
                r#"{"overview": {"namespace": "acme", "title": "DB", "description": "A database",
                                 "logo": "logo.png", "tags": ["sql"], "latest_version": "v1.0.0"},
                    "author": {"name": "Acme", "support_email": "help@acme.test", "homepage": "https://acme.test"},
                    "is_verified": false, "is_hosted_by_hasura": false}"#,
            );
            self.write("registry/acme/db/logo.png", "png");
            self.write("registry/acme/db/README.md", "# DB");
        }

        fn release(&self, ns: &str, name: &str, version: &str, uri: &str) -> String {
            let path = format!(
                "registry/{}/{}/releases/{}/connector-packaging.json",
                ns, name, version
            );
            self.write(
                &path,
                &format!(
                    r#"{{"version":"{}","uri":"{}","checksum":{{"type":"sha256","value":"abc"}}}}"#,
                    version, uri
                ),
            );
            path
        }

        fn run(&self, env: Environment, files: &ChangedFileSet) -> Result<PublishOutcome, PublishError> {
            let ctx = PipelineContext {
                environment: env,
                repo_root: self.root.path().to_path_buf(),
                images: &self.images,
                blobs: &self.blobs,
                registry: &self.registry,
                archive: &self.archive,
                progress: &self.progress,
            };
            run(files, &ctx)
        }
    }

    fn acme() -> ConnectorIdentity {
        ConnectorIdentity::new("acme", "db")
    }

    fn end_to_end_files(h: &Harness) -> ChangedFileSet {
        h.acme_db();
        let release = h.release("acme", "db", "v1.0.0", URI);
        ChangedFileSet {
            added: vec![
                "registry/acme/db/metadata.json".into(),
                "registry/acme/db/logo.png".into(),
                "registry/acme/db/README.md".into(),
                release,
            ],
            ..Default::default()
        }
    }

    #[test]
    fn new_connector_with_first_release_is_one_mutation() {
        let h = Harness::new();
        let files = end_to_end_files(&h);

        let outcome = h.run(Environment::Production, &files).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.connector_inserts, 1);
        assert_eq!(outcome.overview_inserts, 1);
        assert_eq!(outcome.overview_updates, 0);
        assert_eq!(outcome.versions, 1);

        let published = h.registry.published();
        assert_eq!(published.len(), 1);
        let vars = &published[0].variables;
        assert_eq!(
            vars["connectorInserts"],
            serde_json::json!([{"name": "db", "title": "DB", "namespace": "acme"}])
        );
        assert_eq!(vars["overviewInserts"].as_array().unwrap().len(), 1);
        assert_eq!(vars["overviewUpdates"], serde_json::json!([]));

        let record: ConnectorVersionRecord =
            serde_json::from_value(vars["versionInserts"][0].clone()).unwrap();
        assert_eq!(
            record,
            ConnectorVersionRecord {
                namespace: "acme".into(),
                name: "db".into(),
                version: "v1.0.0".into(),
                image: None,
                package_definition_url: h.blobs.url_for("packages/acme/db/v1.0.0/package.tgz"),
                is_multitenant: false,
                packaging_type: PackagingType::ManagedDockerBuild,
            }
        );
        assert!(vars["versionInserts"][0].get("image").is_none());
    }

    #[test]
    fn failed_upload_submits_nothing_and_cleans_nothing() {
        let mut h = Harness::new();
        h.blobs = MemoryBlobStore::new().fail_put("packages/acme/db/v1.0.0/package.tgz");
        let files = end_to_end_files(&h);

        let err = h.run(Environment::Production, &files).unwrap_err();
        assert!(matches!(err, PublishError::Storage { .. }));
        assert!(h.registry.published().is_empty());
        assert!(h.blobs.delete_calls().is_empty());
    }

    #[test]
    fn failed_submission_removes_both_uploaded_packages() {
        let mut h = Harness::new();
        h.registry = MemoryRegistry::new()
            .with_connector(acme(), false)
            .failing_publish("permission denied");
        h.blobs = MemoryBlobStore::new().fail_delete("packages/acme/db/v1.0.0/package.tgz");
        let files = ChangedFileSet {
            added: vec![
                h.release("acme", "db", "v1.0.0", URI),
                h.release("acme", "db", "v1.1.0", URI),
            ],
            ..Default::default()
        };

        let err = h.run(Environment::Staging, &files).unwrap_err();
        assert!(matches!(err, PublishError::Submission { versions: 2, .. }));
        assert_eq!(h.blobs.delete_calls().len(), 2);
        assert!(h.progress.events.borrow().contains(&PublishProgressEvent::RolledBack {
            attempted: 2,
            deleted: 1,
            failed: 1,
        }));
    }

    #[test]
    fn unsupported_generation_is_skipped_and_run_succeeds() {
        let mut h = Harness::new();
        h.registry = MemoryRegistry::new().with_connector(acme(), true);
        h.archive = MemoryReleaseArchive::new()
            .with_release(URI, MANAGED)
            .with_release("https://x/v2.tgz", "version: v2\n");
        let files = ChangedFileSet {
            added: vec![
                h.release("acme", "db", "v1.0.0", URI),
                h.release("acme", "db", "v2.0.0", "https://x/v2.tgz"),
            ],
            ..Default::default()
        };

        let outcome = h.run(Environment::Production, &files).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.versions, 1);
        assert_eq!(
            outcome.skipped_releases,
            vec![SkippedRelease {
                identity: acme(),
                version: "v2.0.0".into(),
                generation: "v2".into(),
            }]
        );
        let published = h.registry.published();
        assert_eq!(published[0].variables["versionInserts"][0]["is_multitenant"], true);
    }

    #[test]
    fn resolution_failure_spares_sibling_releases_but_is_not_success() {
        let mut h = Harness::new();
        h.registry = MemoryRegistry::new().with_connector(acme(), false);
        let files = ChangedFileSet {
            added: vec![
                h.release("acme", "db", "v1.0.0", "https://x/gone.tgz"),
                h.release("acme", "db", "v1.1.0", URI),
            ],
            ..Default::default()
        };

        let outcome = h.run(Environment::Staging, &files).unwrap();
        assert_eq!(outcome.state, TransactionState::Committed);
        assert!(!outcome.is_success());
        assert_eq!(outcome.versions, 1);
        assert_eq!(outcome.failed_releases.len(), 1);
        assert_eq!(outcome.failed_releases[0].version, "v1.0.0");
        assert_eq!(h.registry.published().len(), 1);
    }

    #[test]
    fn consistency_error_aborts_and_cleans_up_earlier_uploads() {
        let mut h = Harness::new();
        // acme/db exists; zeta/db does not and is not created in this run.
        h.registry = MemoryRegistry::new().with_connector(acme(), false);
        let files = ChangedFileSet {
            added: vec![
                h.release("acme", "db", "v1.0.0", URI),
                h.release("zeta", "db", "v1.0.0", URI),
            ],
            ..Default::default()
        };

        let err = h.run(Environment::Staging, &files).unwrap_err();
        assert!(err.to_string().starts_with("zeta/db @ v1.0.0: connector:"));
        assert!(h.registry.published().is_empty());
        assert_eq!(
            h.blobs.delete_calls(),
            vec!["packages/acme/db/v1.0.0/package.tgz".to_string()]
        );
    }

    #[test]
    fn modified_readme_becomes_docs_only_update() {
        let mut h = Harness::new();
        h.registry = MemoryRegistry::new().with_connector(acme(), false);
        h.acme_db();
        let files = ChangedFileSet {
            modified: vec!["registry/acme/db/README.md".into()],
            ..Default::default()
        };

        let outcome = h.run(Environment::Production, &files).unwrap();
        assert!(outcome.is_success());
        let published = h.registry.published();
        assert_eq!(
            published[0].variables["overviewUpdates"][0]["_set"],
            serde_json::json!({"docs": "# DB"})
        );
    }

    #[test]
    fn modified_packaging_file_fails_before_any_side_effect() {
        let h = Harness::new();
        let files = ChangedFileSet {
            modified: vec!["registry/acme/db/releases/v1.0.0/connector-packaging.json".into()],
            ..Default::default()
        };
        let err = h.run(Environment::Staging, &files).unwrap_err();
        assert!(matches!(err, PublishError::Classification { .. }));
        assert!(h.archive.fetches().is_empty());
        assert!(h.registry.published().is_empty());
    }

    #[test]
    fn unrelated_diff_commits_nothing() {
        let h = Harness::new();
        let files = ChangedFileSet {
            added: vec![".github/workflows/ci.yaml".into()],
            deleted: vec!["registry/acme/db/logo.png".into()],
            ..Default::default()
        };
        let outcome = h.run(Environment::Production, &files).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.versions, 0);
        assert!(h.registry.published().is_empty());
        assert!(h.registry.lookups().is_empty());

        // Nothing past classification is reported.
        let events = h.progress.events.borrow();
        assert_eq!(
            *events,
            vec![PublishProgressEvent::Classified {
                changes: 0,
                releases: 0,
            }]
        );
    }

    #[test]
    fn releases_are_built_in_semantic_version_order() {
        let mut h = Harness::new();
        h.registry = MemoryRegistry::new().with_connector(acme(), false);
        let files = ChangedFileSet {
            added: vec![
                h.release("acme", "db", "v1.10.0", URI),
                h.release("acme", "db", "v1.9.0", URI),
            ],
            ..Default::default()
        };

        h.run(Environment::Staging, &files).unwrap();
        let built: Vec<Option<String>> = h
            .progress
            .events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                PublishProgressEvent::Building {
                    bucket: Bucket::NewVersion,
                    version,
                    ..
                } => Some(version.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(built, vec![Some("v1.9.0".into()), Some("v1.10.0".into())]);

        let published = h.registry.published();
        let versions: Vec<&str> = published[0].variables["versionInserts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["version"].as_str().unwrap())
            .collect();
        assert_eq!(versions, vec!["v1.9.0", "v1.10.0"]);
    }
}
