use crate::{apply_edit, apply_text_edits, normalize_text_edits, EditError, Snapshot, TextEdit};
use crate::{TextRange, TextSize};

/// A mutable text buffer that hands out immutable, versioned [`Snapshot`]s.
///
/// Every successful mutation bumps the version by one, so snapshots of one
/// buffer are totally ordered.
#[derive(Debug, Clone)]
pub struct Buffer {
    snapshot: Snapshot,
}

impl Buffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_version(text, 0)
    }

    pub fn with_version(text: impl Into<String>, version: u64) -> Self {
        let text: String = text.into();
        Self {
            snapshot: Snapshot::new(version, text),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn text(&self) -> &str {
        self.snapshot.text()
    }

    /// Apply a single edit and return the resulting snapshot.
    pub fn apply(&mut self, edit: &TextEdit) -> Result<Snapshot, EditError> {
        let text = apply_edit(self.snapshot.text(), edit)?;
        Ok(self.advance(text))
    }

    /// Apply a batch of edits against the current text.
    ///
    /// Returns the single localized edit when the batch coalesces into one
    /// range, or `None` for genuinely multi-range changes.
    pub fn apply_all(
        &mut self,
        edits: &[TextEdit],
    ) -> Result<(Option<TextEdit>, Snapshot), EditError> {
        let mut normalized = edits.to_vec();
        normalize_text_edits(self.snapshot.text(), &mut normalized)?;
        let text = apply_text_edits(self.snapshot.text(), &normalized)?;
        let single = match normalized.len() {
            1 => normalized.pop(),
            _ => None,
        };
        Ok((single, self.advance(text)))
    }

    /// Replace the whole document, returning the equivalent edit.
    pub fn replace_all(&mut self, text: impl Into<String>) -> (TextEdit, Snapshot) {
        let text: String = text.into();
        let edit = TextEdit::new(TextRange::new(TextSize::from(0), self.snapshot.len()), text);
        let snapshot = self.advance(edit.replacement.clone());
        (edit, snapshot)
    }

    fn advance(&mut self, text: String) -> Snapshot {
        self.snapshot = Snapshot::new(self.snapshot.version() + 1, text);
        self.snapshot.clone()
    }
}
