use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use quill_core::Snapshot;
use quill_scheduler::{HostClock, Interactive, InteractiveHandle, TimerHandle};

use crate::{BusyProbe, ReparseScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Unarmed,
    Armed,
    Fired,
}

struct IdleSlot {
    state: IdleState,
    // Bumped on every arm/disarm so stale timer callbacks can be recognized.
    generation: u64,
    timer: Option<TimerHandle>,
    snapshot: Option<Snapshot>,
}

struct IdleInner {
    delay: Duration,
    clock: Arc<dyn HostClock>,
    interactive: InteractiveHandle,
    busy: Arc<dyn BusyProbe>,
    reparse: ReparseScheduler,
    slot: Mutex<IdleSlot>,
    confirmations: AtomicUsize,
}

/// Forces a confirming full parse once editing pauses after a provisional
/// patch.
#[derive(Clone)]
pub struct IdleConfirmationTimer {
    inner: Arc<IdleInner>,
}

impl IdleConfirmationTimer {
    pub fn new(
        delay: Duration,
        clock: Arc<dyn HostClock>,
        interactive: InteractiveHandle,
        busy: Arc<dyn BusyProbe>,
        reparse: ReparseScheduler,
    ) -> Self {
        Self {
            inner: Arc::new(IdleInner {
                delay,
                clock,
                interactive,
                busy,
                reparse,
                slot: Mutex::new(IdleSlot {
                    state: IdleState::Unarmed,
                    generation: 0,
                    timer: None,
                    snapshot: None,
                }),
                confirmations: AtomicUsize::new(0),
            }),
        }
    }

    /// (Re)arm for `snapshot`, replacing any armed timer.
    pub fn arm(&self, snapshot: Snapshot) {
        let mut slot = self.inner.slot.lock();
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }
        slot.generation += 1;
        slot.state = IdleState::Armed;
        slot.snapshot = Some(snapshot);
        slot.timer = Some(IdleInner::schedule(&self.inner, slot.generation));
    }

    pub fn disarm(&self) {
        let mut slot = self.inner.slot.lock();
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }
        slot.generation += 1;
        slot.snapshot = None;
        if slot.state == IdleState::Armed {
            slot.state = IdleState::Unarmed;
        }
    }

    pub fn state(&self) -> IdleState {
        self.inner.slot.lock().state
    }

    /// Confirming parses requested so far.
    pub fn confirmations(&self) -> usize {
        self.inner.confirmations.load(Ordering::SeqCst)
    }
}

impl IdleInner {
    fn schedule(this: &Arc<Self>, generation: u64) -> TimerHandle {
        let weak = Arc::downgrade(this);
        this.clock.schedule_once(
            this.delay,
            Box::new(move || Self::on_fire(weak, generation)),
        )
    }

    fn is_current(&self, generation: u64) -> bool {
        let slot = self.slot.lock();
        slot.generation == generation && slot.state == IdleState::Armed
    }

    // Runs on whatever thread the clock fires on; only the busy check
    // crosses over to the interactive context.
    fn on_fire(weak: Weak<Self>, generation: u64) {
        let Some(this) = weak.upgrade() else {
            return;
        };
        if !this.is_current(generation) {
            return;
        }
        let interactive = this.interactive.clone();
        interactive.dispatch(move |cx| this.confirm(cx, generation));
    }

    fn confirm(self: &Arc<Self>, _cx: &Interactive, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        if self.busy.is_interactive_busy() {
            let mut slot = self.slot.lock();
            if slot.generation == generation && slot.state == IdleState::Armed {
                tracing::trace!(target: "quill.reparse", "interactive context busy; deferring confirmation");
                slot.timer = Some(Self::schedule(self, generation));
            }
            return;
        }

        let snapshot = {
            let mut slot = self.slot.lock();
            if slot.generation != generation || slot.state != IdleState::Armed {
                return;
            }
            slot.state = IdleState::Fired;
            slot.timer = None;
            slot.snapshot.take()
        };

        if let Some(snapshot) = snapshot {
            tracing::debug!(
                target: "quill.reparse",
                version = snapshot.version(),
                "idle; confirming provisional tree"
            );
            self.confirmations.fetch_add(1, Ordering::SeqCst);
            self.reparse.enqueue(None, snapshot);
        }
    }
}
