//! Post-apply spot check.
//!
//! After an Apply run a handful of changed documents are read back and compared with what was
//! there before the write: everything except `usage` and the audit attributes must be unchanged,
//! and the target field must be in the state the operation promises.

use std::fmt;

use serde_json::Value;

use crate::config::Config;
use crate::document::Document;
use crate::store::DocumentStore;

use super::Operation;

/// Attributes the job must never alter.
pub const PRESERVED_FIELDS: &[&str] = &["id", "type", "userId", "conversationId", "role", "content", "feedback", "createdAt"];

#[derive(Debug, Clone, PartialEq)]
pub struct SpotCheckMismatch {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpotCheckReport {
    pub checked: usize,
    pub mismatches: Vec<SpotCheckMismatch>,
}

impl SpotCheckReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for SpotCheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return writeln!(f, "Spot check: {} documents verified, all preserved fields intact", self.checked);
        }
        writeln!(
            f,
            "Spot check: {} of {} documents FAILED verification",
            self.mismatches.len(),
            self.checked
        )?;
        for mismatch in &self.mismatches {
            writeln!(f, "  - {}: {}", mismatch.id, mismatch.reason)?;
        }
        Ok(())
    }
}

/// Re-read each `before` document and compare it with its prior body.
///
/// Read failures are reported as mismatches rather than errors; verification never aborts the run.
pub async fn spot_check<S>(store: &S, config: &Config, operation: Operation, before: &[Document]) -> SpotCheckReport
where
    S: DocumentStore + ?Sized,
{
    let mut report = SpotCheckReport::default();

    for original in before {
        let Some(id) = original.id() else { continue };
        report.checked += 1;

        let current = match original.partition_key(&config.store.partition_key_path) {
            Ok(partition_key) => store.read(id, &partition_key).await,
            Err(e) => Err(e),
        };
        let problem = match current {
            Ok(current) => compare(original, &current, operation, config),
            Err(e) => Some(format!("could not read back: {e}")),
        };

        if let Some(reason) = problem {
            tracing::warn!(id, reason = %reason, "Spot check mismatch");
            report.mismatches.push(SpotCheckMismatch {
                id: id.to_string(),
                reason,
            });
        }
    }

    tracing::info!(checked = report.checked, mismatches = report.mismatches.len(), "Spot check complete");
    report
}

fn compare(before: &Document, after: &Document, operation: Operation, config: &Config) -> Option<String> {
    for field in PRESERVED_FIELDS {
        if before.get(field) != after.get(field) {
            return Some(format!("`{field}` changed"));
        }
    }

    let job = &config.job;
    match operation {
        Operation::Add => {
            if !after.has_usage() {
                return Some("`usage` missing after add".to_string());
            }
            if !after.usage().is_some_and(|usage| usage.is_empty()) {
                return Some("`usage` counters are not null after add".to_string());
            }
            if after.updated_by() != Some(&Value::String(job.actor_id.clone())) {
                return Some("`updatedBy` not stamped".to_string());
            }
        }
        Operation::Remove => {
            if after.has_usage() {
                return Some("`usage` still present after remove".to_string());
            }
        }
        Operation::Revert => {
            if after.has_usage() {
                return Some("`usage` still present after revert".to_string());
            }
            if after.updated_by() != Some(&job.revert_actor_id) {
                return Some("`updatedBy` not stamped with the revert actor".to_string());
            }
        }
    }
    None
}
