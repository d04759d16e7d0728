//! The debounce state machine shared by the re-parse scheduler and the batch
//! worker.
//!
//! ```text
//!            Enqueued                TimerFired
//!   Idle ──────────────▶ Scheduled ─────────────▶ Running
//!    ▲                                              │
//!    │      RunFinished { more_work: false }         │
//!    └──────────────────────────────────────────────┤
//!                                                   │ RunFinished { more_work: true }
//!                     Rearm::Immediately: Running ◀─┤
//!                     Rearm::AfterDelay:  Scheduled ◀┘
//! ```
//!
//! Owners keep the state next to their pending work under one lock and act on
//! the returned [`DebounceAction`] after the transition.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DebounceState {
    /// Nothing pending, no timer armed.
    #[default]
    Idle,
    /// Work pending and exactly one timer armed.
    Scheduled,
    /// A run is in flight. New work is picked up when it finishes.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceEvent {
    Enqueued,
    TimerFired,
    RunFinished { more_work: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceAction {
    Nothing,
    ArmTimer,
    /// Cancel the armed timer and arm a fresh one.
    RestartTimer,
    StartRun,
    RunAgain,
}

/// How an enqueue into an already scheduled queue affects the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The delay counts from the first enqueue of a cycle.
    Fixed,
    /// The delay counts from the most recent enqueue.
    Sliding,
}

/// What to do when a run finishes with more work pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Loop straight into another run.
    Immediately,
    /// Wait another full delay before the next run.
    AfterDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    pub window: Window,
    pub rearm: Rearm,
}

impl DebouncePolicy {
    /// Wait for a quiet period, then keep running until the queue is empty.
    pub const TRAILING: DebouncePolicy = DebouncePolicy {
        window: Window::Sliding,
        rearm: Rearm::Immediately,
    };

    /// Flush on a fixed cadence.
    pub const FIXED: DebouncePolicy = DebouncePolicy {
        window: Window::Fixed,
        rearm: Rearm::AfterDelay,
    };
}

impl DebounceState {
    #[must_use]
    pub fn on(
        self,
        event: DebounceEvent,
        policy: DebouncePolicy,
    ) -> (DebounceState, DebounceAction) {
        use DebounceAction as A;
        use DebounceEvent as E;
        use DebounceState as S;

        match (self, event) {
            (S::Idle, E::Enqueued) => (S::Scheduled, A::ArmTimer),
            (S::Scheduled, E::Enqueued) => match policy.window {
                Window::Fixed => (S::Scheduled, A::Nothing),
                Window::Sliding => (S::Scheduled, A::RestartTimer),
            },
            // The pending slot absorbs the work until the run finishes.
            (S::Running, E::Enqueued) => (S::Running, A::Nothing),
            (S::Scheduled, E::TimerFired) => (S::Running, A::StartRun),
            (S::Running, E::RunFinished { more_work: true }) => match policy.rearm {
                Rearm::Immediately => (S::Running, A::RunAgain),
                Rearm::AfterDelay => (S::Scheduled, A::ArmTimer),
            },
            (S::Running, E::RunFinished { more_work: false }) => (S::Idle, A::Nothing),
            (state, event) => {
                tracing::trace!(
                    target: "quill.scheduler",
                    ?state,
                    ?event,
                    "ignoring debounce event"
                );
                (state, A::Nothing)
            }
        }
    }

    pub fn is_idle(self) -> bool {
        self == DebounceState::Idle
    }
}
