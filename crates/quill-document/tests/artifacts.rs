use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use quill_core::{RecordingErrorSink, Snapshot};
use quill_document::{ArtifactWorker, DocumentKey, TouchedDocument};
use quill_scheduler::{ManualClock, Scheduler};
use quill_syntax::{OutlineItem, OutlineKind, TokenTreeParser};
use serde_json::json;

const DELAY: Duration = Duration::from_millis(1_000);

fn worker() -> (ArtifactWorker, ManualClock, Arc<RecordingErrorSink>) {
    let clock = ManualClock::new();
    let errors = Arc::new(RecordingErrorSink::new());
    let worker = ArtifactWorker::new(
        DELAY,
        Arc::new(TokenTreeParser::new()),
        Arc::new(clock.clone()),
        Scheduler::new_inline(),
        errors.clone(),
    );
    (worker, clock, errors)
}

#[test]
fn in_memory_documents_use_the_latest_snapshot() {
    let (worker, clock, errors) = worker();
    worker.notify_document_touched("a.q", TouchedDocument::InMemory(Snapshot::new(1, "old {")));
    clock.advance(Duration::from_millis(400));
    worker.notify_document_touched(
        "a.q",
        TouchedDocument::InMemory(Snapshot::new(2, "outer { inner { } }")),
    );

    clock.advance(Duration::from_millis(599));
    assert!(worker.store().is_empty(), "the delay counts from the first signal");
    clock.advance(Duration::from_millis(1));

    let artifact = worker.artifact(&DocumentKey::from("a.q")).unwrap();
    assert_eq!(artifact.version, Some(2));
    assert_eq!(artifact.error_count, 0);
    let labels: Vec<_> = artifact
        .outline
        .iter()
        .map(|item| (item.kind, item.label.as_str(), item.depth))
        .collect();
    assert_eq!(
        labels,
        vec![(OutlineKind::Block, "outer", 0), (OutlineKind::Block, "inner", 1)]
    );
    assert!(errors.is_empty());
    assert!(worker.state().is_idle());
}

#[test]
fn on_disk_documents_are_read_when_the_batch_drains() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.q");
    std::fs::write(&path, "#use std\nfn {").unwrap();

    let (worker, clock, errors) = worker();
    worker.notify_document_touched("main.q", TouchedDocument::OnDisk(path.clone()));
    std::fs::write(&path, "#use std\nfn { }").unwrap();
    clock.advance(DELAY);

    let artifact = worker.artifact(&DocumentKey::from("main.q")).unwrap();
    assert_eq!(artifact.version, None);
    assert_eq!(artifact.error_count, 0);
    assert_eq!(artifact.outline[0].kind, OutlineKind::Directive);
    assert_eq!(artifact.outline[1].label, "fn");
    assert!(errors.is_empty());
}

#[test]
fn deleted_files_drop_their_artifact_without_reporting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.q");
    std::fs::write(&path, "x { }").unwrap();

    let (worker, clock, errors) = worker();
    worker.notify_document_touched("gone.q", TouchedDocument::OnDisk(path.clone()));
    clock.advance(DELAY);
    assert_eq!(worker.store().len(), 1);

    std::fs::remove_file(&path).unwrap();
    worker.notify_document_touched("gone.q", TouchedDocument::OnDisk(path));
    clock.advance(DELAY);

    assert!(worker.artifact(&DocumentKey::from("gone.q")).is_none());
    assert!(errors.is_empty());
}

#[test]
fn one_bad_document_does_not_block_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let (worker, clock, errors) = worker();

    // Reading a directory is an error that is not treated as transient.
    worker.notify_document_touched("dir", TouchedDocument::OnDisk(dir.path().to_path_buf()));
    worker.notify_document_touched("ok", TouchedDocument::InMemory(Snapshot::new(3, "b { }")));
    clock.advance(DELAY);

    assert!(worker.artifact(&DocumentKey::from("ok")).is_some());
    assert!(worker.artifact(&DocumentKey::from("dir")).is_none());
    let reports = errors.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].context.component, "artifacts");
    assert_eq!(reports[0].context.key.as_deref(), Some("\"dir\""));
}

#[test]
fn artifacts_serialize_for_consumers() {
    let (worker, clock, _errors) = worker();
    worker.notify_document_touched("a.q", TouchedDocument::InMemory(Snapshot::new(4, "outer { }")));
    clock.advance(DELAY);

    let artifact = worker.artifact(&DocumentKey::from("a.q")).unwrap();
    let value = serde_json::to_value(&artifact).unwrap();
    assert_eq!(value["version"], json!(4));
    assert_eq!(value["error_count"], json!(0));
    assert_eq!(value["outline"][0]["kind"], json!("Block"));
    assert_eq!(value["outline"][0]["label"], json!("outer"));
    assert_eq!(value["outline"][0]["depth"], json!(0));

    let outline: Vec<OutlineItem> = serde_json::from_value(value["outline"].clone()).unwrap();
    assert_eq!(outline, artifact.outline);
}
