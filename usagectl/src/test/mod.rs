//! End-to-end runs of the migration job against the in-memory store.

use serde_json::{Value, json};

use crate::config::Config;
use crate::document::{Document, UPDATED_AT_FIELD, USAGE_FIELD};
use crate::errors::Result;
use crate::migration::{BatchReport, MigrationJob, Mode, Operation};
use crate::store::in_memory::{InMemoryStore, InjectedFailure};
use crate::store::{DocumentStore, Filter, Page};

fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

/// An assistant message as written before token accounting existed.
fn legacy_message(id: &str) -> Document {
    doc(json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "userId": "user-1",
        "conversationId": "conv-1",
        "content": format!("reply {id}"),
        "feedback": null,
        "createdAt": "2024-01-31T09:15:00.123456Z",
        "updatedAt": "2024-01-31T09:15:00.123456Z",
        "updatedBy": "user-1"
    }))
}

fn legacy_messages(count: usize) -> Vec<Document> {
    (0..count).map(|i| legacy_message(&format!("m{i}"))).collect()
}

fn config_with_bound(max_records: usize) -> Config {
    let mut config = Config::default();
    config.job.max_records = Some(max_records);
    config
}

async fn run(store: &InMemoryStore, config: &Config, mode: Mode) -> BatchReport {
    MigrationJob::new(store, config, mode).run().await.unwrap()
}

fn empty_usage() -> Value {
    json!({"completion_tokens": null, "prompt_tokens": null, "total_tokens": null})
}

#[test_log::test(tokio::test)]
async fn test_bounded_add_runs_converge() {
    let store = InMemoryStore::with_documents(legacy_messages(3));
    let config = config_with_bound(2);
    let mode = Mode::apply(Operation::Add);

    let first = run(&store, &config, mode).await;
    assert_eq!((first.examined, first.changed, first.failed), (2, 2, 0));

    let updated: Vec<_> = store.snapshot().into_iter().filter(Document::has_usage).collect();
    assert_eq!(updated.len(), 2);
    for document in &updated {
        assert_eq!(document.get(USAGE_FIELD), Some(&empty_usage()));
        assert_eq!(document.updated_by(), Some(&json!("121")));
        assert_ne!(document.get_str(UPDATED_AT_FIELD), Some("2024-01-31T09:15:00.123456Z"));
    }

    let second = run(&store, &config, mode).await;
    assert_eq!((second.examined, second.changed, second.failed), (1, 1, 0));

    let third = run(&store, &config, mode).await;
    assert_eq!(third.examined, 0);
    assert!(store.snapshot().iter().all(Document::has_usage));
}

#[test_log::test(tokio::test)]
async fn test_add_is_idempotent() {
    let store = InMemoryStore::with_documents(legacy_messages(4));
    let config = config_with_bound(100);
    let mode = Mode::apply(Operation::Add);

    run(&store, &config, mode).await;
    let after_first = store.snapshot();

    let second = run(&store, &config, mode).await;
    assert_eq!(second.examined, 0);
    assert_eq!(store.snapshot(), after_first);
}

#[test_log::test(tokio::test)]
async fn test_convergence_within_expected_runs() {
    let store = InMemoryStore::with_documents(legacy_messages(7));
    let config = config_with_bound(3);
    let mode = Mode::apply(Operation::Add);

    // ceil(7 / 3) runs drain every candidate
    let mut runs = 0;
    loop {
        let report = run(&store, &config, mode).await;
        if report.examined == 0 {
            break;
        }
        runs += 1;
        assert!(runs <= 3, "more runs than the bound allows");
    }
    assert_eq!(runs, 3);
}

#[test_log::test(tokio::test)]
async fn test_bound_respected_for_every_operation() {
    let documents = (0..10).map(|i| {
        doc(json!({"id": format!("m{i}"), "type": "message", "role": "assistant", "usage": {}, "updatedBy": "121"}))
    });
    let config = config_with_bound(4);

    for operation in [Operation::Remove, Operation::Revert] {
        let store = InMemoryStore::with_documents(documents.clone());
        let report = run(&store, &config, Mode::apply(operation)).await;

        assert_eq!(report.changed, 4);
        assert_eq!(store.replace_count(), 4);
        assert!(report.bound_reached());
        assert_eq!(store.snapshot().iter().filter(|d| d.has_usage()).count(), 6);
    }
}

#[test_log::test(tokio::test)]
async fn test_write_failure_does_not_stop_batch() {
    let store = InMemoryStore::with_documents(legacy_messages(3));
    store.fail_replace("m1", InjectedFailure::Conflict("Entity with the specified id already exists".to_string()));
    let config = config_with_bound(100);

    let report = run(&store, &config, Mode::apply(Operation::Add)).await;

    assert_eq!((report.examined, report.changed, report.failed), (3, 2, 1));
    assert_eq!(report.failures[0].id.as_deref(), Some("m1"));
    assert!(report.failures[0].reason.contains("Conflict"));
    assert!(store.get("m2").unwrap().has_usage());
    assert!(!store.get("m1").unwrap().has_usage());

    // The failed document is picked up by the next run
    store.clear_failures();
    let retry = run(&store, &config, Mode::apply(Operation::Add)).await;
    assert_eq!((retry.examined, retry.changed), (1, 1));
}

#[test_log::test(tokio::test)]
async fn test_preview_never_writes() {
    let mut documents = legacy_messages(3);
    documents.push(doc(json!({"id": "u1", "type": "message", "role": "user", "usage": {}})));
    documents.push(doc(json!({"id": "r1", "type": "message", "role": "assistant", "usage": {}, "updatedBy": "121"})));
    let config = config_with_bound(100);

    for operation in [Operation::Add, Operation::Remove, Operation::Revert] {
        let store = InMemoryStore::with_documents(documents.clone());
        let before = store.snapshot();

        let report = run(&store, &config, Mode::preview(operation)).await;

        assert!(report.previewed > 0, "{operation} found no candidates");
        assert_eq!(report.changed, 0);
        assert!(report.spot_check.is_none());
        assert_eq!(store.replace_count(), 0);
        assert_eq!(store.snapshot(), before);
    }
}

#[test_log::test(tokio::test)]
async fn test_add_then_remove_clears_usage() {
    let store = InMemoryStore::with_documents(legacy_messages(3));
    let config = config_with_bound(100);

    run(&store, &config, Mode::apply(Operation::Add)).await;
    let removed = run(&store, &config, Mode::apply(Operation::Remove)).await;

    assert_eq!(removed.changed, 3);
    assert!(store.snapshot().iter().all(|d| !d.has_usage()));
    // Remove leaves the audit attributes from the add in place
    assert!(store.snapshot().iter().all(|d| d.updated_by() == Some(&json!("121"))));
}

#[test_log::test(tokio::test)]
async fn test_revert_only_touches_documents_from_add() {
    let store = InMemoryStore::with_documents(legacy_messages(2));
    store.insert(doc(json!({
        "id": "tracked",
        "type": "message",
        "role": "assistant",
        "usage": {"completion_tokens": 12, "prompt_tokens": 30, "total_tokens": 42},
        "updatedBy": "user-9"
    })));
    let config = config_with_bound(100);

    run(&store, &config, Mode::apply(Operation::Add)).await;
    let report = run(&store, &config, Mode::apply(Operation::Revert)).await;

    assert_eq!((report.examined, report.changed), (2, 2));
    for id in ["m0", "m1"] {
        let document = store.get(id).unwrap();
        assert!(!document.has_usage());
        assert_eq!(document.updated_by(), Some(&json!(-1)));
    }
    assert!(store.get("tracked").unwrap().has_usage());

    let spot_check = report.spot_check.unwrap();
    assert!(spot_check.passed());
}

#[test_log::test(tokio::test)]
async fn test_custom_partition_key_path() {
    let store = InMemoryStore::with_documents([
        doc(json!({"id": "a", "type": "message", "role": "assistant", "conversationId": "conv-1"})),
        doc(json!({"id": "b", "type": "message", "role": "assistant", "conversationId": "conv-2"})),
    ])
    .with_partition_key_path("/conversationId");
    let mut config = config_with_bound(100);
    config.store.partition_key_path = "/conversationId".to_string();

    let report = run(&store, &config, Mode::apply(Operation::Add)).await;

    assert_eq!((report.changed, report.failed), (2, 0));
    assert!(report.spot_check.unwrap().passed());
}

/// Serves a fixed page of raw entries, including ones the in-memory store cannot hold.
struct FixedPageStore {
    entries: Vec<Value>,
}

#[async_trait::async_trait]
impl DocumentStore for FixedPageStore {
    async fn query_page(&self, _filter: &Filter, _page_size: usize, _continuation: Option<String>) -> Result<Page> {
        Ok(Page {
            documents: self.entries.clone(),
            continuation: None,
        })
    }

    async fn read(&self, id: &str, _partition_key: &Value) -> Result<Document> {
        self.entries
            .iter()
            .find(|entry| entry["id"] == id)
            .cloned()
            .map(doc)
            .ok_or_else(|| crate::Error::NotFound {
                resource: "document".to_string(),
                message: id.to_string(),
            })
    }

    async fn replace(&self, _id: &str, _partition_key: &Value, document: &Document) -> Result<Document> {
        Ok(document.clone())
    }
}

#[test_log::test(tokio::test)]
async fn test_malformed_entries_are_recorded_and_skipped() {
    let store = FixedPageStore {
        entries: vec![
            json!({"id": 17, "usage": {}}),
            json!("not a document"),
            json!({"id": "ok", "usage": {}}),
        ],
    };
    let config = config_with_bound(100);
    let store: &dyn DocumentStore = &store;

    let report = MigrationJob::new(store, &config, Mode::apply(Operation::Remove)).run().await.unwrap();

    assert_eq!((report.examined, report.changed, report.failed), (3, 1, 2));
    assert!(report.failures.iter().all(|failure| failure.id.is_none()));
    assert!(report.failures[1].reason.starts_with("Malformed document"));
}
