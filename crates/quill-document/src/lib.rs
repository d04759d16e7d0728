//! Keeps parsed trees in sync with rapidly changing text buffers.
//!
//! [`DocumentPipeline`] is the per-document entry point: it tries the
//! [`PartialReparseEngine`](quill_syntax::PartialReparseEngine) fast path on
//! every edit, falls back to a debounced background parse through the
//! [`ReparseScheduler`], confirms provisional patches with the
//! [`IdleConfirmationTimer`], and hands out trees by version through the
//! [`SnapshotRequestBroker`].
//!
//! [`ArtifactWorker`] is independent of any single document; it batches
//! "document touched" signals into debounced outline generation.

mod artifacts;
mod broker;
mod host;
mod idle;
mod pipeline;
mod reparse;

pub use artifacts::{ArtifactStore, ArtifactWorker, DocumentArtifact, DocumentKey, TouchedDocument};
pub use broker::{RequestId, SnapshotRequestBroker};
pub use host::{BusyProbe, NeverBusy};
pub use idle::{IdleConfirmationTimer, IdleState};
pub use pipeline::{
    DocumentPipeline, EditOutcome, PipelineConfig, PipelineDeps, ScheduleReason,
    StructureChanged, TreeOrigin,
};
pub use reparse::{ChangeReference, ReparseListener, ReparseScheduler};

use quill_config::QuillConfig;
use quill_scheduler::SchedulerConfig;

/// Scheduler thread budget for `config`.
pub fn scheduler_config(config: &QuillConfig) -> SchedulerConfig {
    SchedulerConfig::default().with_overrides(
        config.scheduler.parse_threads,
        config.scheduler.batch_threads,
    )
}
