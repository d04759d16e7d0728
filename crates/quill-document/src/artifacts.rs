//! Derived outlines for many documents, produced in debounced batches.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use quill_core::{ErrorSink, Snapshot};
use quill_scheduler::{
    BatchHooks, BatchProcessor, BatchWorker, DebounceState, HostClock, ItemError, Scheduler,
};
use quill_syntax::{OutlineItem, Parse};
use serde::Serialize;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(Arc<str>);

impl DocumentKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for DocumentKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Payload of a "document touched" signal.
#[derive(Debug, Clone)]
pub enum TouchedDocument {
    /// The document is open; use its buffer contents.
    InMemory(Snapshot),
    /// The document changed on disk.
    OnDisk(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentArtifact {
    /// Buffer version for in-memory documents.
    pub version: Option<u64>,
    pub outline: Vec<OutlineItem>,
    pub error_count: usize,
}

#[derive(Clone, Default)]
pub struct ArtifactStore {
    artifacts: Arc<RwLock<HashMap<DocumentKey, DocumentArtifact>>>,
}

impl ArtifactStore {
    pub fn get(&self, key: &DocumentKey) -> Option<DocumentArtifact> {
        self.artifacts.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }

    fn insert(&self, key: DocumentKey, artifact: DocumentArtifact) {
        self.artifacts.write().insert(key, artifact);
    }

    fn remove(&self, key: &DocumentKey) {
        self.artifacts.write().remove(key);
    }
}

struct OutlineProcessor {
    parser: Arc<dyn Parse>,
    store: ArtifactStore,
}

impl BatchProcessor<DocumentKey, TouchedDocument> for OutlineProcessor {
    fn process(&self, key: &DocumentKey, document: TouchedDocument) -> Result<(), ItemError> {
        let (snapshot, version) = match document {
            TouchedDocument::InMemory(snapshot) => {
                let version = snapshot.version();
                (snapshot, Some(version))
            }
            TouchedDocument::OnDisk(path) => match std::fs::read_to_string(&path) {
                Ok(text) => (Snapshot::new(0, text), None),
                Err(err) => {
                    if err.kind() == io::ErrorKind::NotFound {
                        self.store.remove(key);
                    }
                    return Err(err.into());
                }
            },
        };

        let tree = self
            .parser
            .parse(&snapshot, None)
            .map_err(anyhow::Error::from)?;
        self.store.insert(
            key.clone(),
            DocumentArtifact {
                version,
                outline: tree.outline(),
                error_count: tree.errors().len(),
            },
        );
        Ok(())
    }
}

/// Batches "document touched" signals and keeps an [`ArtifactStore`] of
/// outlines up to date.
#[derive(Clone)]
pub struct ArtifactWorker {
    worker: BatchWorker<DocumentKey, TouchedDocument>,
    store: ArtifactStore,
}

impl ArtifactWorker {
    pub fn new(
        delay: Duration,
        parser: Arc<dyn Parse>,
        clock: Arc<dyn HostClock>,
        scheduler: Scheduler,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self::with_hooks(delay, parser, clock, scheduler, errors, BatchHooks::default())
    }

    pub fn with_hooks(
        delay: Duration,
        parser: Arc<dyn Parse>,
        clock: Arc<dyn HostClock>,
        scheduler: Scheduler,
        errors: Arc<dyn ErrorSink>,
        hooks: BatchHooks<DocumentKey>,
    ) -> Self {
        let store = ArtifactStore::default();
        let processor = Arc::new(OutlineProcessor {
            parser,
            store: store.clone(),
        });
        let worker =
            BatchWorker::with_hooks("artifacts", delay, processor, clock, scheduler, errors, hooks);
        Self { worker, store }
    }

    pub fn notify_document_touched(&self, key: impl Into<DocumentKey>, document: TouchedDocument) {
        self.worker.enqueue(key.into(), document);
    }

    pub fn artifact(&self, key: &DocumentKey) -> Option<DocumentArtifact> {
        self.store.get(key)
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn state(&self) -> DebounceState {
        self.worker.state()
    }

    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}
