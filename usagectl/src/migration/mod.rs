//! The field migration job.
//!
//! A run is parameterized by a [`Mode`]: which [`Operation`] to apply to the `usage` field, and
//! whether to [`Execution::Preview`] or [`Execution::Apply`] the result. [`plan`] computes the new
//! body of a single document; [`MigrationJob`] drives it over the candidates a store returns and
//! aggregates a [`BatchReport`].

mod job;
mod mode;
mod plan;
pub mod report;
pub mod verify;

pub use job::MigrationJob;
pub use mode::{Execution, Mode, Operation};
pub use plan::plan;
pub use report::{BatchReport, DocumentOutcome, Failure};
pub use verify::SpotCheckReport;
