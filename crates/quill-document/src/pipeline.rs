use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use quill_config::QuillConfig;
use quill_core::{ErrorContext, ErrorSink, PanicError, Snapshot, TextEdit, TracingErrorSink};
use quill_scheduler::{
    CancellationToken, Cancelled, HostClock, Interactive, InteractiveHandle, Scheduler, TokioClock,
};
use quill_syntax::{Parse, PartialReparseEngine, RejectReason, TokenTreeParser, Tree, Verdict};

use crate::{
    BusyProbe, ChangeReference, IdleConfirmationTimer, IdleState, NeverBusy, ReparseListener,
    ReparseScheduler, SnapshotRequestBroker,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub reparse_debounce: Duration,
    pub idle_confirmation: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &QuillConfig) -> Self {
        Self {
            reparse_debounce: config.reparse.debounce(),
            idle_confirmation: config.reparse.idle_confirmation(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&QuillConfig::default())
    }
}

/// Collaborators of a [`DocumentPipeline`].
pub struct PipelineDeps {
    pub parser: Arc<dyn Parse>,
    pub errors: Arc<dyn ErrorSink>,
    pub clock: Arc<dyn HostClock>,
    pub busy: Arc<dyn BusyProbe>,
    pub scheduler: Scheduler,
    pub interactive: InteractiveHandle,
    pub config: PipelineConfig,
}

impl PipelineDeps {
    /// Reference parser, tracing error sink, Tokio timers on the scheduler's
    /// IO runtime, and an inline interactive context.
    ///
    /// With the inline context, `FullParse` events reach listeners on the
    /// parse pool thread that produced them. Callers enter the pipeline with
    /// [`Interactive::assume_inline`](quill_scheduler::Interactive::assume_inline).
    pub fn headless(scheduler: Scheduler, config: PipelineConfig) -> Self {
        Self {
            parser: Arc::new(TokenTreeParser::new()),
            errors: Arc::new(TracingErrorSink),
            clock: Arc::new(TokioClock::new(scheduler.io_handle())),
            busy: Arc::new(NeverBusy),
            scheduler,
            interactive: InteractiveHandle::inline(),
            config,
        }
    }
}

/// How a published tree was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOrigin {
    /// Supplied by the host when the document was opened.
    Seeded,
    /// Patched in place and equivalent to a full parse.
    Patched,
    /// Patched in place, awaiting a confirming full parse.
    Provisional,
    FullParse,
}

#[derive(Debug, Clone)]
pub struct StructureChanged {
    pub tree: Tree,
    pub edit: Option<TextEdit>,
    pub snapshot: Snapshot,
    pub origin: TreeOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleReason {
    /// No edit was supplied.
    NoEdit,
    /// No tree matches the previous snapshot.
    NoBaseTree,
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
pub enum EditOutcome {
    Patched,
    Provisional,
    Scheduled {
        reference: ChangeReference,
        reason: ScheduleReason,
    },
    /// The snapshot was not newer than one already seen.
    Ignored,
}

type StructureListener = Arc<dyn Fn(&Interactive, &StructureChanged) + Send + Sync>;

#[derive(Default)]
struct DocumentState {
    latest: Option<Snapshot>,
    /// Tree the fast path patches; usable only while it matches the snapshot
    /// preceding the incoming edit.
    base: Option<Tree>,
    /// `base` carries an unconfirmed provisional patch.
    provisional: bool,
}

struct Shared {
    this: Weak<Shared>,
    state: Mutex<DocumentState>,
    engine: PartialReparseEngine,
    broker: SnapshotRequestBroker,
    interactive: InteractiveHandle,
    listeners: Mutex<Vec<StructureListener>>,
    // Version of the last tree handed to listeners; older trees are never
    // delivered after it.
    last_emitted: Mutex<Option<u64>>,
    errors: Arc<dyn ErrorSink>,
    reparse: ReparseScheduler,
    idle: IdleConfirmationTimer,
}

/// Keeps a parsed [`Tree`] in sync with one text buffer.
///
/// Edits are reported with [`notify_edit`](Self::notify_edit) on the
/// interactive context. Localized edits are patched in place; everything else
/// is debounced into a background full parse. Consumers either listen for
/// [`StructureChanged`] events or await a tree of a given version through
/// [`get_latest_tree`](Self::get_latest_tree).
pub struct DocumentPipeline {
    shared: Arc<Shared>,
}

impl DocumentPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let PipelineDeps {
            parser,
            errors,
            clock,
            busy,
            scheduler,
            interactive,
            config,
        } = deps;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let listener: Weak<dyn ReparseListener> = weak.clone();
            let reparse = ReparseScheduler::new(
                config.reparse_debounce,
                parser,
                Arc::clone(&errors),
                Arc::clone(&clock),
                scheduler,
                listener,
            );
            let idle = IdleConfirmationTimer::new(
                config.idle_confirmation,
                clock,
                interactive.clone(),
                busy,
                reparse.clone(),
            );
            Shared {
                this: weak.clone(),
                state: Mutex::new(DocumentState::default()),
                engine: PartialReparseEngine::new(),
                broker: SnapshotRequestBroker::new(),
                interactive,
                listeners: Mutex::new(Vec::new()),
                last_emitted: Mutex::new(None),
                errors,
                reparse,
                idle,
            }
        });
        Self { shared }
    }

    /// Start tracking `snapshot` and schedule its first full parse.
    pub fn open(&self, _cx: &Interactive, snapshot: Snapshot) -> ChangeReference {
        self.shared.state.lock().latest = Some(snapshot.clone());
        self.shared.reparse.enqueue(None, snapshot)
    }

    /// Start tracking a document whose tree the host already has.
    pub fn open_with_tree(&self, cx: &Interactive, tree: Tree) {
        {
            let mut state = self.shared.state.lock();
            state.latest = Some(tree.snapshot().clone());
            state.base = Some(tree.clone());
            state.provisional = false;
        }
        if self.shared.broker.publish(tree.clone()) {
            let event = StructureChanged {
                snapshot: tree.snapshot().clone(),
                tree,
                edit: None,
                origin: TreeOrigin::Seeded,
            };
            self.shared.emit(cx, &event);
        }
    }

    /// Entry point for every buffer mutation. `snapshot` is the buffer state
    /// after `edit` was applied.
    pub fn notify_edit(
        &self,
        cx: &Interactive,
        edit: Option<TextEdit>,
        snapshot: Snapshot,
    ) -> EditOutcome {
        let shared = &self.shared;
        shared.idle.disarm();

        let (base, tainted) = {
            let mut state = shared.state.lock();
            if let Some(latest) = &state.latest {
                if !snapshot.is_newer_than(latest) {
                    tracing::debug!(
                        target: "quill.reparse",
                        version = snapshot.version(),
                        latest = latest.version(),
                        "ignoring stale edit notification"
                    );
                    return EditOutcome::Ignored;
                }
            }
            let previous = state.latest.replace(snapshot.clone());
            let base = state.base.clone().filter(|base| {
                previous
                    .as_ref()
                    .is_some_and(|previous| previous.version() == base.version())
            });
            (base, state.provisional)
        };

        let Some(edit) = edit else {
            return shared.schedule(None, snapshot, ScheduleReason::NoEdit);
        };
        let Some(base) = base else {
            return shared.schedule(Some(edit), snapshot, ScheduleReason::NoBaseTree);
        };

        match shared.engine.try_patch(&base, &edit, &snapshot) {
            Verdict::Accept(tree) => shared.publish_patch(cx, tree, edit, snapshot, tainted),
            Verdict::ProvisionalAccept(tree) => {
                shared.publish_patch(cx, tree, edit, snapshot, true)
            }
            Verdict::Reject(reason) => {
                shared.schedule(Some(edit), snapshot, ScheduleReason::Rejected(reason))
            }
        }
    }

    /// Resolve with the first tree whose version is at least `threshold`.
    pub async fn get_latest_tree(
        &self,
        threshold: u64,
        token: CancellationToken,
    ) -> Result<Tree, Cancelled> {
        self.shared.broker.get_latest_tree(threshold, token).await
    }

    /// Register a listener for published trees. Listeners run on the
    /// interactive context.
    pub fn on_structure_changed(
        &self,
        listener: impl Fn(&Interactive, &StructureChanged) + Send + Sync + 'static,
    ) {
        self.shared.listeners.lock().push(Arc::new(listener));
    }

    pub fn latest_tree(&self) -> Option<Tree> {
        self.shared.broker.latest()
    }

    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.shared.state.lock().latest.clone()
    }

    /// Whether the current tree is an unconfirmed provisional patch.
    pub fn is_provisional(&self) -> bool {
        self.shared.state.lock().provisional
    }

    pub fn broker(&self) -> &SnapshotRequestBroker {
        &self.shared.broker
    }

    pub fn reparse_scheduler(&self) -> &ReparseScheduler {
        &self.shared.reparse
    }

    pub fn idle_state(&self) -> IdleState {
        self.shared.idle.state()
    }
}

impl Drop for DocumentPipeline {
    fn drop(&mut self) {
        self.shared.idle.disarm();
        self.shared.reparse.shutdown();
        self.shared.broker.cancel_all();
    }
}

impl Shared {
    fn schedule(
        &self,
        edit: Option<TextEdit>,
        snapshot: Snapshot,
        reason: ScheduleReason,
    ) -> EditOutcome {
        tracing::debug!(
            target: "quill.reparse",
            version = snapshot.version(),
            ?reason,
            "falling back to full parse"
        );
        let reference = self.reparse.enqueue(edit, snapshot);
        EditOutcome::Scheduled { reference, reason }
    }

    fn publish_patch(
        &self,
        cx: &Interactive,
        tree: Tree,
        edit: TextEdit,
        snapshot: Snapshot,
        provisional: bool,
    ) -> EditOutcome {
        {
            let mut state = self.state.lock();
            state.base = Some(tree.clone());
            state.provisional = provisional;
        }
        // A pending confirmation targets an older snapshot.
        self.reparse.cancel_pending();
        self.broker.publish(tree.clone());
        if provisional {
            self.idle.arm(snapshot.clone());
        }

        let origin = if provisional {
            TreeOrigin::Provisional
        } else {
            TreeOrigin::Patched
        };
        let event = StructureChanged {
            tree,
            edit: Some(edit),
            snapshot,
            origin,
        };
        self.emit(cx, &event);

        if provisional {
            EditOutcome::Provisional
        } else {
            EditOutcome::Patched
        }
    }

    fn emit(&self, cx: &Interactive, event: &StructureChanged) {
        let version = event.tree.version();
        {
            let mut last = self.last_emitted.lock();
            if last.is_some_and(|last| version < last) {
                tracing::trace!(
                    target: "quill.reparse",
                    version,
                    last = ?*last,
                    "dropping out-of-order structure change"
                );
                return;
            }
            *last = Some(version);
        }
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(cx, event)));
            if let Err(panic) = result {
                self.errors.report(
                    &PanicError::from_payload(&*panic),
                    ErrorContext::new("structure-changed").with_version(event.tree.version()),
                );
            }
        }
    }
}

impl ReparseListener for Shared {
    fn prior_tree(&self) -> Option<Tree> {
        self.state.lock().base.clone()
    }

    fn reparsed(&self, reference: &ChangeReference, tree: Tree) {
        {
            let mut state = self.state.lock();
            let current = state
                .latest
                .as_ref()
                .map_or(true, |latest| latest.version() == tree.version());
            if current {
                state.base = Some(tree.clone());
                state.provisional = false;
            }
        }

        if !self.broker.publish(tree.clone()) {
            return;
        }

        let event = StructureChanged {
            snapshot: reference.snapshot().clone(),
            edit: reference.edit().cloned(),
            tree,
            origin: TreeOrigin::FullParse,
        };
        let this = self.this.clone();
        self.interactive.dispatch(move |cx| {
            let Some(this) = this.upgrade() else {
                return;
            };
            let superseded = this
                .broker
                .latest()
                .is_some_and(|latest| latest.version() > event.tree.version());
            if !superseded {
                this.emit(cx, &event);
            }
        });
    }
}
