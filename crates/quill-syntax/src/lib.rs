//! Syntax trees for Quill documents.
//!
//! - [`parse_snapshot`] / [`TokenTreeParser`]: the reference full parser, a
//!   lossless lexer plus brace matching.
//! - [`Parse`]: the seam through which hosts plug in their own parser.
//! - [`PartialReparseEngine`]: patches a prior [`Tree`] in place for one
//!   localized edit, or rejects so the caller can fall back to a full parse.

mod incremental;
mod lexer;
mod parser;
mod tree;

pub use incremental::{PartialReparseEngine, RejectReason, Verdict};
pub use lexer::{lex, lex_with_errors, LexError, LexErrorKind, Lexer, SyntaxKind, Token};
pub use parser::{parse_snapshot, Parse, ParseError, TokenTreeParser};
pub use tree::{Block, OutlineItem, OutlineKind, SyntaxError, TokenAtOffset, Tree};
