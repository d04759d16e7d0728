//! Core shared types for Quill.
//!
//! This crate is intentionally small: text primitives, versioned snapshots of a
//! text buffer, and the error-reporting seam used by background work.

mod buffer;
mod edit;
mod error_sink;
mod panic;
mod snapshot;

pub use buffer::Buffer;
pub use edit::{apply_edit, apply_text_edits, normalize_text_edits, validate_edit, EditError, TextEdit};
pub use error_sink::{ErrorContext, ErrorReport, ErrorSink, RecordingErrorSink, TracingErrorSink};
pub use panic::{panic_payload_to_str, PanicError};
pub use snapshot::Snapshot;
pub use text_size::{TextRange, TextSize};
