//! # hub-publish-core
//!
//! Policy core of the connector registry publisher: everything that decides
//! *what* to publish, independent of how the network is reached.
//!
//! | Module | Role |
//! |--------|------|
//! | [`models`] | Identities, diff input, registry documents |
//! | [`classify`] | Changed path → typed operation |
//! | [`changeset`] | Per-connector grouping of operations |
//! | [`collab`] | Blob store, image host, registry, archive seams |
//! | [`resolve`] | Release tarball fetch + metadata parse |
//! | [`payload`] | Registry row shapes |
//! | [`builder`] | Operation → rows |
//! | [`mutation`] | The single `PublishBatch` GraphQL mutation |
//! | [`transaction`] | Submit once, clean up uploads on failure |
//! | [`pipeline`] | The whole run |
//! | [`validate`] | Pre-flight registry-tree checks |
//! | [`artifacts`] | Docker images of newly added releases |
//!
//! The binary crate (`hub-publish`) supplies HTTP-backed collaborators,
//! configuration, and the CLI.

pub mod artifacts;
pub mod builder;
pub mod changeset;
pub mod classify;
pub mod collab;
pub mod error;
pub mod models;
pub mod mutation;
pub mod payload;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod transaction;
pub mod validate;

pub use error::PublishError;
