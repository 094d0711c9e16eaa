//! `hub-publish publish`: wire the real collaborators into the pipeline.
//!
//! Loads secrets from the environment, builds the HTTP clients from the
//! config, runs [`hub_publish_core::pipeline::run`] and prints the
//! [`PublishOutcome`] as JSON on stdout. Anything short of a committed
//! batch with no failed release is returned as an error so the process
//! exits non-zero.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;

use hub_publish_core::models::{ChangedFileSet, Environment};
use hub_publish_core::pipeline::{self, PipelineContext, PublishOutcome};

use crate::archive::HttpReleaseArchive;
use crate::config::{Config, Secrets};
use crate::image_host::HttpImageHost;
use crate::progress::ProgressMode;
use crate::registry_gql::GraphqlRegistry;
use crate::storage::HttpBlobStore;

pub fn run_publish(
    cfg: &Config,
    environment: Environment,
    changed_files: &Path,
    repo_root: Option<PathBuf>,
    progress: ProgressMode,
) -> Result<PublishOutcome> {
    let secrets = Secrets::from_env()?;
    let changed = ChangedFileSet::from_json_file(changed_files)?;
    let timeout = Duration::from_secs(cfg.pipeline.timeout_secs);

    let images = HttpImageHost::new(&cfg.images, &secrets, timeout)?;
    let blobs = HttpBlobStore::new(&cfg.storage, &secrets, timeout)?;
    let registry = GraphqlRegistry::new(&cfg.registry, &secrets, timeout)?;
    let archive = HttpReleaseArchive::new(&cfg.pipeline.scratch_dir, timeout)?;
    let reporter = progress.reporter();

    let ctx = PipelineContext {
        environment,
        repo_root: repo_root.unwrap_or_else(|| cfg.pipeline.repo_root.clone()),
        images: &images,
        blobs: &blobs,
        registry: &registry,
        archive: &archive,
        progress: reporter.as_ref(),
    };

    info!(
        "publishing {} added / {} modified files to {}",
        changed.added.len(),
        changed.modified.len(),
        environment
    );
    let outcome = pipeline::run(&changed, &ctx)
        .with_context(|| format!("Publishing to {} failed", environment))?;
    Ok(outcome)
}

/// Print the outcome and turn a partial success into an error.
pub fn report_outcome(outcome: &PublishOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome).context("Failed to serialize outcome")?;
    println!("{}", json);

    if !outcome.is_success() {
        bail!(
            "{} release(s) could not be published (state: {})",
            outcome.failed_releases.len(),
            outcome.state
        );
    }
    Ok(())
}
