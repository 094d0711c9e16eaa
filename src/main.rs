//! # hub-publish CLI
//!
//! Entry point for publishing connector registry changes.
//!
//! ## Usage
//!
//! ```bash
//! hub-publish --config ./hub-publish.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hub-publish publish` | Publish a pull request's changes to staging or production |
//! | `hub-publish classify` | Print how a changed-file list would be bucketed (offline) |
//! | `hub-publish validate` | Check the whole registry tree for consistency |
//! | `hub-publish e2e` | List the releases the end-to-end suite should test |
//! | `hub-publish download-artifacts` | Unpack added releases and list their Docker images |
//!
//! Exit code 0 on full success, 1 otherwise.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use hub_publish::config::{Config, PipelineConfig};
use hub_publish::e2e::E2eSelection;
use hub_publish::progress::ProgressMode;
use hub_publish::validate::ValidateOptions;
use hub_publish::{artifacts_cmd, classify_cmd, config, e2e, publish, validate};
use hub_publish_core::models::Environment;

/// Publish connector registry changes to the connector hub.
#[derive(Parser)]
#[command(name = "hub-publish", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./hub-publish.toml")]
    config: PathBuf,

    /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the connectors, logos, docs and releases touched by a diff.
    ///
    /// Everything is submitted as one registry mutation. On failure the
    /// package tarballs uploaded during the run are deleted.
    Publish {
        /// Target environment: `staging` or `production`.
        #[arg(long = "env")]
        environment: String,

        /// JSON file with `added_files`, `modified_files`, `deleted_files`.
        #[arg(long, env = "CHANGED_FILES_PATH")]
        changed_files: PathBuf,

        /// Registry checkout root. Overrides `[pipeline].repo_root`.
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },

    /// Classify a changed-file list and print the buckets. No network.
    Classify {
        #[arg(long, env = "CHANGED_FILES_PATH")]
        changed_files: PathBuf,
    },

    /// Validate every packaging and metadata file under `registry/`.
    Validate {
        /// Registry checkout root. Defaults to `[pipeline].repo_root`, then `.`.
        #[arg(long)]
        repo_root: Option<PathBuf>,

        /// Download every release tarball and compare its SHA-256.
        #[arg(long)]
        verify_checksums: bool,
    },

    /// Print the end-to-end test matrix as a JSON array.
    E2e {
        /// Registry checkout root. Defaults to `[pipeline].repo_root`, then `.`.
        #[arg(long, global = true)]
        repo_root: Option<PathBuf>,

        #[command(subcommand)]
        selection: E2eCommand,
    },

    /// Download and unpack every release a diff adds; print their Docker images.
    DownloadArtifacts {
        #[arg(long, env = "CHANGED_FILES_PATH")]
        changed_files: PathBuf,

        /// Registry checkout root. Defaults to `[pipeline].repo_root`, then `.`.
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum E2eCommand {
    /// Releases added by a diff. Each must name a test config.
    Changed {
        #[arg(long, env = "CHANGED_FILES_PATH")]
        changed_files: PathBuf,
    },
    /// Every release in the registry that has a test config.
    All,
    /// The `latest_version` release of every connector.
    Latest,
}

/// The config file is optional for the offline commands.
fn optional_config(path: &std::path::Path) -> anyhow::Result<Option<Config>> {
    if path.exists() {
        Ok(Some(config::load_config(path)?))
    } else {
        Ok(None)
    }
}

fn pipeline_settings(cfg: Option<&Config>) -> PipelineConfig {
    cfg.map(|c| c.pipeline.clone()).unwrap_or_default()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Classify { changed_files } => {
            classify_cmd::run_classify(&changed_files)?;
        }
        Commands::Validate {
            repo_root,
            verify_checksums,
        } => {
            let pipeline = pipeline_settings(optional_config(&cli.config)?.as_ref());
            let opts = ValidateOptions {
                repo_root: repo_root.unwrap_or(pipeline.repo_root),
                verify_checksums,
                timeout: Duration::from_secs(pipeline.timeout_secs),
            };
            validate::run_validate(&opts)?;
        }
        Commands::E2e {
            repo_root,
            selection,
        } => {
            let pipeline = pipeline_settings(optional_config(&cli.config)?.as_ref());
            let repo_root = repo_root.unwrap_or(pipeline.repo_root);
            let selection = match selection {
                E2eCommand::Changed { changed_files } => E2eSelection::Changed { changed_files },
                E2eCommand::All => E2eSelection::All,
                E2eCommand::Latest => E2eSelection::Latest,
            };
            e2e::run_e2e(&repo_root, &selection)?;
        }
        Commands::DownloadArtifacts {
            changed_files,
            repo_root,
        } => {
            let pipeline = pipeline_settings(optional_config(&cli.config)?.as_ref());
            artifacts_cmd::run_download_artifacts(
                &changed_files,
                &repo_root.unwrap_or(pipeline.repo_root),
                &pipeline.scratch_dir,
                Duration::from_secs(pipeline.timeout_secs),
            )?;
        }
        Commands::Publish {
            environment,
            changed_files,
            repo_root,
        } => {
            let environment: Environment = environment.parse()?;
            let cfg = config::load_config(&cli.config)
                .context("publish requires a config file (see --config)")?;
            let outcome =
                publish::run_publish(&cfg, environment, &changed_files, repo_root, progress)?;
            publish::report_outcome(&outcome)?;
        }
    }

    Ok(())
}
