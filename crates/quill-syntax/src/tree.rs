use std::fmt;
use std::sync::Arc;

use quill_core::Snapshot;
use serde::{Deserialize, Serialize};
use text_size::{TextRange, TextSize};

use crate::{SyntaxKind, Token};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyntaxError {
    pub range: TextRange,
    pub message: String,
}

/// Result of a token lookup at an offset, mirroring rowan's `TokenAtOffset`.
/// Values are indices into [`Tree::tokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAtOffset {
    None,
    Single(usize),
    Between(usize, usize),
}

/// A matched `{ ... }` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub range: TextRange,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutlineKind {
    Block,
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineItem {
    pub kind: OutlineKind,
    pub label: String,
    pub range: TextRange,
    pub depth: usize,
}

/// An immutable parse result for one [`Snapshot`].
///
/// Cheap to clone; token and error lists are shared.
#[derive(Clone)]
pub struct Tree {
    snapshot: Snapshot,
    tokens: Arc<[Token]>,
    errors: Arc<[SyntaxError]>,
}

impl Tree {
    pub fn new(snapshot: Snapshot, tokens: Vec<Token>, errors: Vec<SyntaxError>) -> Self {
        debug_assert_eq!(
            tokens.last().map_or(TextSize::from(0), |t| t.range.end()),
            snapshot.len(),
            "tokens must cover the snapshot text"
        );
        Self {
            snapshot,
            tokens: tokens.into(),
            errors: errors.into(),
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

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn token_at_offset(&self, offset: TextSize) -> TokenAtOffset {
        let idx = self.tokens.partition_point(|t| t.range.end() < offset);
        let Some(token) = self.tokens.get(idx) else {
            return TokenAtOffset::None;
        };
        if token.range.start() > offset {
            return TokenAtOffset::None;
        }
        if token.range.end() == offset && idx + 1 < self.tokens.len() {
            return TokenAtOffset::Between(idx, idx + 1);
        }
        TokenAtOffset::Single(idx)
    }

    /// Same text, tokens, and errors. Versions are not compared.
    pub fn is_equivalent(&self, other: &Tree) -> bool {
        self.text() == other.text() && self.tokens == other.tokens && self.errors == other.errors
    }

    /// Matched brace pairs in order of their opening brace. Unmatched braces
    /// are skipped.
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut open: Vec<(usize, TextSize)> = Vec::new();
        for token in self.tokens.iter() {
            match token.kind {
                SyntaxKind::LBrace => {
                    open.push((blocks.len(), token.range.start()));
                    // Placeholder, filled when the brace closes.
                    blocks.push(None);
                }
                SyntaxKind::RBrace => {
                    if let Some((slot, start)) = open.pop() {
                        blocks[slot] = Some(Block {
                            range: TextRange::new(start, token.range.end()),
                            depth: open.len(),
                        });
                    }
                }
                _ => {}
            }
        }
        blocks.into_iter().flatten().collect()
    }

    /// Flat outline of blocks and directive lines, in document order.
    ///
    /// A block is labelled with the nearest identifier before its opening
    /// brace on the same statement.
    pub fn outline(&self) -> Vec<OutlineItem> {
        let text = self.text();
        let mut items: Vec<OutlineItem> = self
            .blocks()
            .into_iter()
            .map(|block| OutlineItem {
                kind: OutlineKind::Block,
                label: self.block_label(block.range.start()),
                range: block.range,
                depth: block.depth,
            })
            .collect();

        let blocks = self.blocks();
        items.extend(
            self.tokens
                .iter()
                .filter(|t| t.kind == SyntaxKind::Directive)
                .map(|t| OutlineItem {
                    kind: OutlineKind::Directive,
                    label: t.text(text).trim_start_matches('#').trim().to_owned(),
                    range: t.range,
                    depth: blocks
                        .iter()
                        .filter(|b| b.range.contains_range(t.range))
                        .count(),
                }),
        );
        items.sort_by_key(|item| (item.range.start(), item.depth));
        items
    }

    fn block_label(&self, open_brace: TextSize) -> String {
        let text = self.text();
        let idx = self.tokens.partition_point(|t| t.range.start() < open_brace);
        self.tokens[..idx]
            .iter()
            .rev()
            .filter(|t| !t.kind.is_trivia())
            .take_while(|t| !matches!(t.kind, SyntaxKind::LBrace | SyntaxKind::RBrace))
            .take_while(|t| t.text(text) != ";")
            .find(|t| t.kind == SyntaxKind::Ident)
            .map_or_else(|| "{}".to_owned(), |t| t.text(text).to_owned())
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("version", &self.version())
            .field("tokens", &self.tokens.len())
            .field("errors", &self.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parse_snapshot;

    fn tree(text: &str) -> Tree {
        parse_snapshot(&Snapshot::new(1, text))
    }

    #[test]
    fn token_at_offset_reports_boundaries() {
        let tree = tree("ab cd");
        assert_eq!(tree.token_at_offset(TextSize::from(0)), TokenAtOffset::Single(0));
        assert_eq!(tree.token_at_offset(TextSize::from(1)), TokenAtOffset::Single(0));
        assert_eq!(tree.token_at_offset(TextSize::from(2)), TokenAtOffset::Between(0, 1));
        assert_eq!(tree.token_at_offset(TextSize::from(5)), TokenAtOffset::Single(2));
        assert_eq!(tree.token_at_offset(TextSize::from(6)), TokenAtOffset::None);
    }

    #[test]
    fn empty_tree_has_no_tokens_at_offsets() {
        assert_eq!(tree("").token_at_offset(TextSize::from(0)), TokenAtOffset::None);
    }

    #[test]
    fn outline_lists_blocks_and_directives() {
        let text = "#mode strict\nfn main {\n  inner {\n    #x\n  }\n}";
        let outline = tree(text).outline();
        let summary: Vec<_> = outline
            .iter()
            .map(|item| (item.kind, item.label.as_str(), item.depth))
            .collect();
        assert_eq!(
            summary,
            vec![
                (OutlineKind::Directive, "mode strict", 0),
                (OutlineKind::Block, "main", 0),
                (OutlineKind::Block, "inner", 1),
                (OutlineKind::Directive, "x", 2),
            ]
        );
    }

    #[test]
    fn equivalence_ignores_versions() {
        let a = parse_snapshot(&Snapshot::new(1, "x { y }"));
        let b = parse_snapshot(&Snapshot::new(9, "x { y }"));
        let c = parse_snapshot(&Snapshot::new(9, "x { z }"));
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }
}
