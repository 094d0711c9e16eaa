//! `hub-publish classify`: offline dry run of classification.
//!
//! Reads a changed-file list, classifies and aggregates it, and prints
//! the sorted bucket report. Needs neither config nor credentials.

use std::path::Path;

use anyhow::{Context, Result};

use hub_publish_core::changeset::{ChangeSet, ChangeSetSummary};
use hub_publish_core::classify::classify_all;
use hub_publish_core::models::ChangedFileSet;

pub fn classify_file(changed_files: &Path) -> Result<ChangeSetSummary> {
    let changed = ChangedFileSet::from_json_file(changed_files)?;
    let changes = classify_all(&changed)?;
    let set = ChangeSet::aggregate(changes)?;
    Ok(set.summary())
}

pub fn run_classify(changed_files: &Path) -> Result<()> {
    let summary = classify_file(changed_files)?;
    let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
    println!("{}", json);
    Ok(())
}
