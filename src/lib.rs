//! # hub-publish
//!
//! Publishes connector registry changes from a pull request to the hub.
//!
//! A merged pull request touches files under `registry/<namespace>/<name>/`.
//! `hub-publish` turns that diff into registry rows, re-hosts release
//! tarballs and logos, and submits everything as one GraphQL mutation. If
//! anything fails, the tarballs uploaded during the run are deleted again.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ changed-file │──▶│ hub-publish-core │──▶│   registry   │
//! │  list (JSON) │   │ classify + build │   │   (GraphQL)  │
//! └──────────────┘   └────────┬─────────┘   └──────────────┘
//!                             │
//!             ┌───────────────┼────────────────┐
//!             ▼               ▼                ▼
//!       ┌──────────┐    ┌───────────┐    ┌───────────┐
//!       │ tarball  │    │  object   │    │   image   │
//!       │  fetch   │    │  storage  │    │   host    │
//!       └──────────┘    └───────────┘    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hub-publish classify --changed-files changed.json
//! hub-publish validate --repo-root .
//! hub-publish e2e --repo-root . latest
//! hub-publish publish --env staging --changed-files changed.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`progress`] | Human / JSON / silent run progress |
//! | [`storage`] | SigV4-signed object storage for package tarballs |
//! | [`image_host`] | Logo uploads |
//! | [`registry_gql`] | Registry lookups and the publish mutation |
//! | [`archive`] | Release tarball download and extraction |
//! | [`publish`] | `publish` command |
//! | [`classify_cmd`] | `classify` command |
//! | [`validate`] | `validate` command |
//! | [`e2e`] | `e2e` command |
//! | [`artifacts_cmd`] | `download-artifacts` command |

pub mod archive;
pub mod artifacts_cmd;
pub mod classify_cmd;
pub mod config;
pub mod e2e;
pub mod image_host;
pub mod progress;
pub mod publish;
pub mod registry_gql;
pub mod storage;
pub mod validate;
