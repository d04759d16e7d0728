//! Version-ordered fulfilment of "tree for snapshot ≥ V" requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quill_scheduler::{CancellationToken, Cancelled};
use quill_syntax::Tree;
use tokio::sync::oneshot;

type Completion = Box<dyn FnOnce(Result<Tree, Cancelled>) + Send + 'static>;

/// Identifies a registered request. Ordered by threshold, then registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId {
    threshold: u64,
    seq: u64,
}

impl RequestId {
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

struct PendingRequest {
    completion: Completion,
    token: CancellationToken,
}

#[derive(Default)]
struct BrokerState {
    latest: Option<Tree>,
    pending: BTreeMap<RequestId, PendingRequest>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct SnapshotRequestBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl SnapshotRequestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for the first tree whose version is at least `threshold`.
    ///
    /// `completion` runs exactly once: synchronously when the latest published
    /// tree already qualifies or `token` is already cancelled (returning
    /// `None`), otherwise on a later [`publish`](Self::publish) or
    /// [`cancel`](Self::cancel).
    pub fn request(
        &self,
        threshold: u64,
        token: CancellationToken,
        completion: impl FnOnce(Result<Tree, Cancelled>) + Send + 'static,
    ) -> Option<RequestId> {
        if token.is_cancelled() {
            completion(Err(Cancelled));
            return None;
        }

        let mut state = self.state.lock();
        let satisfied = state
            .latest
            .as_ref()
            .filter(|tree| tree.version() >= threshold)
            .cloned();
        if let Some(tree) = satisfied {
            drop(state);
            completion(Ok(tree));
            return None;
        }

        let id = RequestId {
            threshold,
            seq: state.next_seq,
        };
        state.next_seq += 1;
        state.pending.insert(
            id,
            PendingRequest {
                completion: Box::new(completion),
                token,
            },
        );
        tracing::trace!(target: "quill.broker", threshold, pending = state.pending.len(), "request registered");
        Some(id)
    }

    /// Await the first tree whose version is at least `threshold`.
    pub async fn get_latest_tree(
        &self,
        threshold: u64,
        token: CancellationToken,
    ) -> Result<Tree, Cancelled> {
        let (tx, rx) = oneshot::channel();
        let id = self.request(threshold, token.clone(), move |result| {
            let _ = tx.send(result);
        });
        // Deregisters the request if this future is dropped before resolving.
        let mut guard = PendingGuard { broker: self, id };

        let result = tokio::select! {
            biased;
            result = rx => {
                guard.id = None;
                result.unwrap_or(Err(Cancelled))
            }
            _ = token.cancelled() => Err(Cancelled),
        };
        drop(guard);
        result
    }

    /// Publish `tree` and fulfil every request it satisfies, lowest threshold
    /// first. Trees older than the latest published one are dropped and
    /// `false` is returned.
    pub fn publish(&self, tree: Tree) -> bool {
        let version = tree.version();
        let ready = {
            let mut state = self.state.lock();
            if let Some(latest) = &state.latest {
                if latest.version() > version {
                    tracing::debug!(
                        target: "quill.broker",
                        version,
                        latest = latest.version(),
                        "dropping out-of-order tree"
                    );
                    return false;
                }
            }
            state.latest = Some(tree.clone());

            match version.checked_add(1) {
                Some(next) => {
                    let unsatisfied = state.pending.split_off(&RequestId {
                        threshold: next,
                        seq: 0,
                    });
                    std::mem::replace(&mut state.pending, unsatisfied)
                }
                None => std::mem::take(&mut state.pending),
            }
        };

        tracing::trace!(target: "quill.broker", version, fulfilled = ready.len(), "published tree");
        for (_, request) in ready {
            if request.token.is_cancelled() {
                (request.completion)(Err(Cancelled));
            } else {
                (request.completion)(Ok(tree.clone()));
            }
        }
        true
    }

    /// Cancel a pending request. Returns `false` if it was already fulfilled
    /// or cancelled.
    pub fn cancel(&self, id: RequestId) -> bool {
        let request = self.state.lock().pending.remove(&id);
        match request {
            Some(request) => {
                (request.completion)(Err(Cancelled));
                true
            }
            None => false,
        }
    }

    pub fn latest(&self) -> Option<Tree> {
        self.state.lock().latest.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Resolve every pending request as cancelled.
    pub fn cancel_all(&self) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        for (_, request) in pending {
            (request.completion)(Err(Cancelled));
        }
    }
}

struct PendingGuard<'a> {
    broker: &'a SnapshotRequestBroker,
    id: Option<RequestId>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.broker.cancel(id);
        }
    }
}
