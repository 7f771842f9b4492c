//! # usagectl: `usage` field migrations for conversation history
//!
//! `usagectl` adds or removes the `usage` token counters on message documents stored in an Azure
//! Cosmos DB container. Assistant messages written before token accounting existed lack the field;
//! downstream readers expect it to be present, even if every counter is `null`.
//!
//! ## Operations
//!
//! - **Add** (default): assistant messages without `usage` get
//!   `{"completion_tokens": null, "prompt_tokens": null, "total_tokens": null}` and have
//!   `updatedAt`/`updatedBy` stamped.
//! - **Remove** (`--remove`): `usage` is deleted from every document that has it.
//! - **Revert** (`--revert`): `usage` is deleted from assistant messages whose `updatedBy` is the
//!   configured actor, i.e. documents a previous Add touched. Audit attributes are stamped with the
//!   revert actor; their values from before the Add are not restored.
//!
//! Every operation runs as a preview unless `--execute` is passed. Each run processes at most
//! `max_records` candidates, and because candidates are selected by the state of the `usage` field,
//! re-running the same operation picks up where the previous run stopped.
//!
//! ## Architecture
//!
//! The [`migration::MigrationJob`] is generic over a [`store::DocumentStore`]: a filtered paged
//! query plus point read and replace. [`store::cosmos::CosmosStore`] implements it on the Cosmos DB
//! REST API with master key authentication, and [`store::in_memory::InMemoryStore`] implements it in
//! process for tests. Per-document failures are recorded in the [`migration::BatchReport`] and never
//! abort the batch; connection and query failures do.
//!
//! Configuration is loaded once by [`config::Config::load`] and passed by reference into the job.

pub mod config;
pub mod document;
pub mod errors;
pub mod migration;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use errors::{Error, Result};
pub use migration::{BatchReport, MigrationJob, Mode};

use store::cosmos::CosmosStore;

/// Connect to the configured container and run one pass of `mode`.
///
/// # Errors
/// - `Unauthorized` if the key is rejected
/// - `NotFound` if the database or container does not exist
/// - any error from the candidate query
pub async fn run(config: &Config, mode: Mode) -> Result<BatchReport> {
    let store = CosmosStore::connect(&config.store).await?;
    MigrationJob::new(&store, config, mode).run().await
}

#[cfg(test)]
mod test;
