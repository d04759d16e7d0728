//! Text edit primitives and utilities.

use thiserror::Error;

use crate::{TextRange, TextSize};

/// A single range replacement against one text snapshot.
///
/// `range` is expressed in byte offsets of the text *before* the edit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextEdit {
    pub range: TextRange,
    pub replacement: String,
}

impl TextEdit {
    pub fn new(range: TextRange, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }

    pub fn insert(offset: TextSize, text: impl Into<String>) -> Self {
        Self::new(TextRange::new(offset, offset), text)
    }

    pub fn delete(range: TextRange) -> Self {
        Self::new(range, String::new())
    }

    /// Signed change in document length caused by this edit.
    pub fn delta(&self) -> isize {
        self.replacement.len() as isize - u32::from(self.range.len()) as isize
    }

    /// Range covered by the replacement text in the edited document.
    pub fn new_range(&self) -> TextRange {
        TextRange::at(self.range.start(), TextSize::of(self.replacement.as_str()))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EditError {
    #[error("edit range {range:?} is out of bounds for text length {text_len:?}")]
    RangeOutOfBounds { range: TextRange, text_len: TextSize },
    #[error("offset {offset:?} is not a UTF-8 character boundary")]
    InvalidUtf8Boundary { offset: TextSize },
    #[error("overlapping edits: {first:?} overlaps {second:?}")]
    OverlappingEdits { first: TextRange, second: TextRange },
}

/// Check that `edit` can be applied to `text`.
pub fn validate_edit(text: &str, edit: &TextEdit) -> Result<(), EditError> {
    let text_len = TextSize::of(text);
    if edit.range.end() > text_len {
        return Err(EditError::RangeOutOfBounds {
            range: edit.range,
            text_len,
        });
    }

    for offset in [edit.range.start(), edit.range.end()] {
        if !text.is_char_boundary(usize::from(offset)) {
            return Err(EditError::InvalidUtf8Boundary { offset });
        }
    }
    Ok(())
}

/// Apply one edit to `text`, returning the edited copy.
pub fn apply_edit(text: &str, edit: &TextEdit) -> Result<String, EditError> {
    validate_edit(text, edit)?;
    let mut out = String::with_capacity((text.len() as isize + edit.delta()).max(0) as usize);
    out.push_str(&text[..usize::from(edit.range.start())]);
    out.push_str(&edit.replacement);
    out.push_str(&text[usize::from(edit.range.end())..]);
    Ok(out)
}

/// Apply a list of edits to a text snapshot.
///
/// The function is deterministic: edits are first sorted by `(start, end)` and
/// applied from the end of the text backwards.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> Result<String, EditError> {
    let mut edits = edits.to_vec();
    normalize_text_edits(text, &mut edits)?;

    let mut out = text.to_string();
    for edit in edits.into_iter().rev() {
        let start = usize::from(edit.range.start());
        let end = usize::from(edit.range.end());
        debug_assert!(out.is_char_boundary(start) && out.is_char_boundary(end));
        out.replace_range(start..end, &edit.replacement);
    }
    Ok(out)
}

/// Sort edits, check for overlaps / out-of-bounds, and coalesce adjacent edits.
pub fn normalize_text_edits(text: &str, edits: &mut Vec<TextEdit>) -> Result<(), EditError> {
    edits.sort_by_key(|e| (e.range.start(), e.range.end()));

    for edit in edits.iter() {
        validate_edit(text, edit)?;
    }

    for pair in edits.windows(2) {
        let first = &pair[0];
        let second = &pair[1];
        if first.range.end() > second.range.start()
            || (first.range.is_empty()
                && second.range.is_empty()
                && first.range.start() == second.range.start())
        {
            return Err(EditError::OverlappingEdits {
                first: first.range,
                second: second.range,
            });
        }
    }

    let mut merged: Vec<TextEdit> = Vec::with_capacity(edits.len());
    for edit in edits.drain(..) {
        if let Some(last) = merged.last_mut() {
            if last.range.end() == edit.range.start() {
                last.range = TextRange::new(last.range.start(), edit.range.end());
                last.replacement.push_str(&edit.replacement);
                continue;
            }
        }
        merged.push(edit);
    }
    *edits = merged;

    Ok(())
}
