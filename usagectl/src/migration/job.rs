//! The batch loop.

use std::pin::pin;

use chrono::Utc;
use futures::TryStreamExt;
use serde_json::Value;

use crate::config::Config;
use crate::document::Document;
use crate::errors::Result;
use crate::store::{DocumentStore, query_documents};

use super::report::{BatchReport, DocumentOutcome};
use super::verify::spot_check;
use super::{Execution, Mode, plan};

/// One bounded pass of an operation over the store.
///
/// Candidates are processed one at a time in query order. A failed query aborts the run; a failed
/// write is recorded in the report and the run moves on to the next candidate.
pub struct MigrationJob<'a, S: ?Sized> {
    store: &'a S,
    config: &'a Config,
    mode: Mode,
}

impl<'a, S> MigrationJob<'a, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: &'a S, config: &'a Config, mode: Mode) -> Self {
        Self { store, config, mode }
    }

    pub async fn run(&self) -> Result<BatchReport> {
        let job = &self.config.job;
        let operation = self.mode.operation;
        let max_records = job.max_records_for(operation);
        let filter = operation.candidate_filter(job);
        let page_size = self.config.store.page_size.min(max_records).max(1);

        tracing::info!(
            mode = %self.mode,
            max_records,
            query = %filter.to_sql().query,
            "Starting migration run"
        );

        let mut report = BatchReport::new(self.mode, max_records);
        let mut changed_originals = Vec::new();
        let mut candidates = pin!(query_documents(self.store, &filter, page_size));

        while report.examined < max_records {
            let Some(entry) = candidates.try_next().await.inspect_err(|e| {
                tracing::error!(error = %e, "Candidate query failed");
            })?
            else {
                break;
            };

            let describe = report.previewed < job.preview_sample;
            let outcome = self.process(entry, describe, &mut changed_originals).await;
            report.record(outcome);

            if job.progress_interval > 0 && report.examined % job.progress_interval == 0 {
                tracing::info!(
                    examined = report.examined,
                    changed = report.changed,
                    failed = report.failed,
                    "Progress"
                );
            }
        }

        if self.mode.execution == Execution::Apply && !changed_originals.is_empty() {
            report.spot_check = Some(spot_check(self.store, self.config, operation, &changed_originals).await);
        }

        tracing::info!(
            mode = %self.mode,
            examined = report.examined,
            changed = report.changed,
            previewed = report.previewed,
            skipped = report.skipped,
            failed = report.failed,
            bound_reached = report.bound_reached(),
            "Migration run finished"
        );
        Ok(report)
    }

    async fn process(&self, entry: Value, describe: bool, changed_originals: &mut Vec<Document>) -> DocumentOutcome {
        let parsed = Document::from_value(entry).and_then(|document| {
            let id = document.require_id()?.to_string();
            Ok((id, document))
        });
        let (id, document) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed document");
                return DocumentOutcome::Failed {
                    id: None,
                    reason: e.to_string(),
                };
            }
        };

        let Some(updated) = plan(self.mode.operation, &document, Utc::now(), &self.config.job) else {
            tracing::debug!(id = %id, "Document already in target shape");
            return DocumentOutcome::Skipped { id };
        };

        match self.mode.execution {
            Execution::Preview => {
                if describe {
                    tracing::info!(
                        id = %id,
                        user_id = ?document.get("userId"),
                        conversation_id = ?document.get("conversationId"),
                        role = ?document.role(),
                        created_at = ?document.get("createdAt"),
                        has_usage = document.has_usage(),
                        "Would update document"
                    );
                } else {
                    tracing::debug!(id = %id, "Would update document");
                }
                DocumentOutcome::Previewed { id }
            }
            Execution::Apply => {
                let written = match document.partition_key(&self.config.store.partition_key_path) {
                    Ok(partition_key) => self.store.replace(&id, &partition_key, &updated).await,
                    Err(e) => Err(e),
                };
                match written {
                    Ok(_) => {
                        tracing::debug!(id = %id, "Updated document");
                        if changed_originals.len() < self.config.job.spot_check_sample {
                            changed_originals.push(document);
                        }
                        DocumentOutcome::Changed { id }
                    }
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "Failed to update document");
                        DocumentOutcome::Failed {
                            id: Some(id),
                            reason: e.to_string(),
                        }
                    }
                }
            }
        }
    }
}
