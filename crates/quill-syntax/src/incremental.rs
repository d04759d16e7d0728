//! In-place patching of a prior tree for one localized edit.
//!
//! The engine never guesses: any edit it cannot confine to a single token,
//! whose relexed neighbourhood differs from the prior one, or that touches
//! brace structure is rejected and the caller falls back to a full parse.

use quill_core::{Snapshot, TextEdit};
use text_size::{TextRange, TextSize};

use crate::{lex_with_errors, SyntaxKind, Token, TokenAtOffset, Tree};

#[derive(Debug, Clone)]
pub enum Verdict {
    /// The patched tree is equivalent to a full parse of the new text.
    Accept(Tree),
    /// The patched tree is plausible but must be confirmed by a full parse.
    ProvisionalAccept(Tree),
    Reject(RejectReason),
}

impl Verdict {
    pub fn tree(&self) -> Option<&Tree> {
        match self {
            Verdict::Accept(tree) | Verdict::ProvisionalAccept(tree) => Some(tree),
            Verdict::Reject(_) => None,
        }
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Verdict::Reject(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PriorHasErrors,
    /// The snapshot is not newer than the prior tree.
    StaleSnapshot,
    OutOfBounds,
    /// The snapshot text does not result from applying the edit to the prior text.
    LengthMismatch,
    SpansTokens,
    /// Relexing changed a neighbouring token or split/merged the target.
    BoundaryShift,
    /// The edit touches braces or leaves an unterminated token.
    Structural,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PartialReparseEngine;

impl PartialReparseEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn try_patch(&self, prior: &Tree, edit: &TextEdit, snapshot: &Snapshot) -> Verdict {
        match self.patch(prior, edit, snapshot) {
            Ok(verdict) => verdict,
            Err(reason) => {
                tracing::trace!(
                    target: "quill.reparse",
                    version = snapshot.version(),
                    ?reason,
                    "partial reparse rejected"
                );
                Verdict::Reject(reason)
            }
        }
    }

    fn patch(
        &self,
        prior: &Tree,
        edit: &TextEdit,
        snapshot: &Snapshot,
    ) -> Result<Verdict, RejectReason> {
        if prior.has_errors() {
            return Err(RejectReason::PriorHasErrors);
        }
        if !snapshot.is_newer_than(prior.snapshot()) {
            return Err(RejectReason::StaleSnapshot);
        }
        check_edit_applies(prior.text(), edit, snapshot.text())?;

        if prior.tokens().is_empty() {
            return patch_empty(edit, snapshot);
        }

        let mut last_reject = RejectReason::SpansTokens;
        for target in candidate_tokens(prior, edit) {
            match patch_token(prior, target, edit, snapshot) {
                Ok(verdict) => return Ok(verdict),
                Err(reason) => last_reject = reason,
            }
        }
        Err(last_reject)
    }
}

fn check_edit_applies(old_text: &str, edit: &TextEdit, new_text: &str) -> Result<(), RejectReason> {
    let start = usize::from(edit.range.start());
    let end = usize::from(edit.range.end());
    if end > old_text.len() || !old_text.is_char_boundary(start) || !old_text.is_char_boundary(end)
    {
        return Err(RejectReason::OutOfBounds);
    }
    if old_text.len() as isize + edit.delta() != new_text.len() as isize {
        return Err(RejectReason::LengthMismatch);
    }
    let inserted = start..start + edit.replacement.len();
    if new_text.get(inserted) != Some(edit.replacement.as_str()) {
        return Err(RejectReason::LengthMismatch);
    }
    Ok(())
}

/// Tokens that could absorb the edit, best candidate first.
fn candidate_tokens(prior: &Tree, edit: &TextEdit) -> Vec<usize> {
    let tokens = prior.tokens();
    if edit.range.is_empty() {
        return match prior.token_at_offset(edit.range.start()) {
            TokenAtOffset::None => Vec::new(),
            TokenAtOffset::Single(idx) => vec![idx],
            TokenAtOffset::Between(left, right) => {
                if tokens[left].kind.is_trivia() && !tokens[right].kind.is_trivia() {
                    vec![right, left]
                } else {
                    vec![left, right]
                }
            }
        };
    }

    let idx = tokens.partition_point(|t| t.range.end() <= edit.range.start());
    match tokens.get(idx) {
        Some(token) if token.range.contains_range(edit.range) => vec![idx],
        _ => Vec::new(),
    }
}

fn patch_token(
    prior: &Tree,
    target_idx: usize,
    edit: &TextEdit,
    snapshot: &Snapshot,
) -> Result<Verdict, RejectReason> {
    let tokens = prior.tokens();
    let target = tokens[target_idx];
    if target.kind.is_brace() {
        return Err(RejectReason::Structural);
    }

    let delta = edit.delta();
    let window_first = target_idx.saturating_sub(1);
    let window_last = (target_idx + 1).min(tokens.len() - 1);
    let old_start = tokens[window_first].range.start();
    let old_end = tokens[window_last].range.end();
    let new_end = shift(old_end, delta).ok_or(RejectReason::BoundaryShift)?;
    let new_text = snapshot.text();
    let window = new_text
        .get(usize::from(old_start)..usize::from(new_end))
        .ok_or(RejectReason::BoundaryShift)?;

    let (relexed, errors) = lex_with_errors(window);
    if !errors.is_empty() {
        return Err(RejectReason::Structural);
    }

    let expected = window_last - window_first + 1;
    if relexed.len() != expected {
        return Err(RejectReason::BoundaryShift);
    }
    let middle_pos = target_idx - window_first;
    for (pos, (old, new)) in tokens[window_first..=window_last]
        .iter()
        .zip(&relexed)
        .enumerate()
    {
        if old.kind != new.kind {
            return Err(RejectReason::BoundaryShift);
        }
        if pos != middle_pos && old.range.len() != new.range.len() {
            return Err(RejectReason::BoundaryShift);
        }
    }

    let relexed_middle = relexed[middle_pos].range;
    let middle = Token {
        kind: target.kind,
        range: TextRange::at(relexed_middle.start() + old_start, relexed_middle.len()),
    };

    let mut patched = Vec::with_capacity(tokens.len());
    patched.extend_from_slice(&tokens[..target_idx]);
    patched.push(middle);
    for token in &tokens[target_idx + 1..] {
        let start = shift(token.range.start(), delta).ok_or(RejectReason::BoundaryShift)?;
        patched.push(Token {
            kind: token.kind,
            range: TextRange::at(start, token.range.len()),
        });
    }

    let tree = Tree::new(snapshot.clone(), patched, Vec::new());
    if is_provisional(middle, edit) {
        Ok(Verdict::ProvisionalAccept(tree))
    } else {
        Ok(Verdict::Accept(tree))
    }
}

fn patch_empty(edit: &TextEdit, snapshot: &Snapshot) -> Result<Verdict, RejectReason> {
    let (tokens, errors) = lex_with_errors(snapshot.text());
    if !errors.is_empty() {
        return Err(RejectReason::Structural);
    }
    let [token] = tokens.as_slice() else {
        return Err(RejectReason::SpansTokens);
    };
    if token.kind.is_brace() {
        return Err(RejectReason::Structural);
    }

    let token = *token;
    let tree = Tree::new(snapshot.clone(), tokens, Vec::new());
    if is_provisional(token, edit) {
        Ok(Verdict::ProvisionalAccept(tree))
    } else {
        Ok(Verdict::Accept(tree))
    }
}

/// Directive lines and edits next to a closing delimiter may be reinterpreted
/// by the characters typed next.
fn is_provisional(middle: Token, edit: &TextEdit) -> bool {
    if middle.kind == SyntaxKind::Directive {
        return true;
    }
    let Some(delimiter) = middle.kind.closing_delimiter_len() else {
        return false;
    };
    let delimiter = TextSize::from(delimiter).min(middle.range.len());
    let closing_start = middle.range.end() - delimiter;
    edit.new_range().end() >= closing_start
}

fn shift(offset: TextSize, delta: isize) -> Option<TextSize> {
    let shifted = u32::from(offset) as i64 + delta as i64;
    u32::try_from(shifted).ok().map(TextSize::from)
}
