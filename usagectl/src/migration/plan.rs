//! The per-document transformation.
//!
//! [`plan`] is pure: given the operation, the current document and the time, it returns the body to
//! write, or `None` when the document is already in the target shape. Re-applying a plan to its own
//! output therefore always yields `None`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::JobConfig;
use crate::document::{Document, Usage};

use super::Operation;

pub fn plan(operation: Operation, document: &Document, now: DateTime<Utc>, job: &JobConfig) -> Option<Document> {
    match operation {
        Operation::Add => {
            if document.has_usage() {
                return None;
            }
            let mut updated = document.clone();
            updated.set_usage(&Usage::empty());
            updated.stamp(now, Value::String(job.actor_id.clone()));
            Some(updated)
        }
        Operation::Remove => {
            if !document.has_usage() {
                return None;
            }
            let mut updated = document.clone();
            updated.remove_usage();
            Some(updated)
        }
        Operation::Revert => {
            let added_by_actor = document.updated_by().and_then(Value::as_str) == Some(job.actor_id.as_str());
            if !document.has_usage() || !added_by_actor {
                return None;
            }
            let mut updated = document.clone();
            updated.remove_usage();
            updated.stamp(now, job.revert_actor_id.clone());
            Some(updated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{UPDATED_AT_FIELD, USAGE_FIELD};
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_add_sets_null_counters_and_audit() {
        let job = JobConfig::default();
        let original = doc(json!({"id": "m1", "role": "assistant", "content": "hi", "updatedBy": "7"}));

        let updated = plan(Operation::Add, &original, now(), &job).unwrap();

        assert_eq!(
            updated.get(USAGE_FIELD),
            Some(&json!({"completion_tokens": null, "prompt_tokens": null, "total_tokens": null}))
        );
        assert_eq!(updated.get_str(UPDATED_AT_FIELD), Some("2024-03-01T12:30:00.000000Z"));
        assert_eq!(updated.updated_by(), Some(&json!("121")));
        assert_eq!(updated.get_str("content"), Some("hi"));
        // Input is left alone
        assert!(!original.has_usage());
    }

    #[test]
    fn test_add_is_idempotent() {
        let job = JobConfig::default();
        let original = doc(json!({"id": "m1", "role": "assistant"}));

        let once = plan(Operation::Add, &original, now(), &job).unwrap();
        assert!(plan(Operation::Add, &once, now(), &job).is_none());

        // Existing counters are never overwritten
        let populated = doc(json!({"id": "m2", "usage": {"completion_tokens": 5, "prompt_tokens": 3, "total_tokens": 8}}));
        assert!(plan(Operation::Add, &populated, now(), &job).is_none());
    }

    #[test]
    fn test_remove_deletes_usage_only() {
        let job = JobConfig::default();
        let original = doc(json!({"id": "m1", "usage": {"total_tokens": 8}, "updatedBy": "7", "updatedAt": "2023-01-01T00:00:00Z"}));

        let updated = plan(Operation::Remove, &original, now(), &job).unwrap();

        assert_eq!(
            updated,
            doc(json!({"id": "m1", "updatedBy": "7", "updatedAt": "2023-01-01T00:00:00Z"}))
        );
        assert!(plan(Operation::Remove, &updated, now(), &job).is_none());
    }

    #[test]
    fn test_add_then_remove_restores_target_field() {
        let job = JobConfig::default();
        let original = doc(json!({"id": "m1", "role": "assistant"}));

        let added = plan(Operation::Add, &original, now(), &job).unwrap();
        let removed = plan(Operation::Remove, &added, now(), &job).unwrap();

        assert!(!removed.has_usage());
    }

    #[test]
    fn test_revert_only_touches_actor_documents() {
        let job = JobConfig::default();

        let ours = doc(json!({"id": "m1", "usage": {}, "updatedBy": "121"}));
        let reverted = plan(Operation::Revert, &ours, now(), &job).unwrap();
        assert!(!reverted.has_usage());
        assert_eq!(reverted.updated_by(), Some(&json!(-1)));
        assert_eq!(reverted.get_str(UPDATED_AT_FIELD), Some("2024-03-01T12:30:00.000000Z"));

        let theirs = doc(json!({"id": "m2", "usage": {}, "updatedBy": "99"}));
        assert!(plan(Operation::Revert, &theirs, now(), &job).is_none());

        let numeric = doc(json!({"id": "m3", "usage": {}, "updatedBy": 121}));
        assert!(plan(Operation::Revert, &numeric, now(), &job).is_none());

        assert!(plan(Operation::Revert, &reverted, now(), &job).is_none());
    }
}
