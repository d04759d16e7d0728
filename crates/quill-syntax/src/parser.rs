use quill_core::Snapshot;
use thiserror::Error;

use crate::{lex_with_errors, SyntaxError, SyntaxKind, Tree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("document of {len} bytes exceeds the parser limit of {limit} bytes")]
    TooLarge { len: usize, limit: usize },
    #[error("parser failed: {0}")]
    Failed(String),
}

/// A full parser. Implementations must be pure functions of their inputs;
/// `prior` is only a reuse hint.
pub trait Parse: Send + Sync {
    fn parse(&self, snapshot: &Snapshot, prior: Option<&Tree>) -> Result<Tree, ParseError>;
}

impl<F> Parse for F
where
    F: Fn(&Snapshot, Option<&Tree>) -> Result<Tree, ParseError> + Send + Sync,
{
    fn parse(&self, snapshot: &Snapshot, prior: Option<&Tree>) -> Result<Tree, ParseError> {
        self(snapshot, prior)
    }
}

/// The reference parser: lexes the snapshot and checks brace balance.
#[derive(Debug, Clone, Default)]
pub struct TokenTreeParser {
    max_len: Option<usize>,
}

impl TokenTreeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse documents longer than `max_len` bytes.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
        }
    }
}

impl Parse for TokenTreeParser {
    fn parse(&self, snapshot: &Snapshot, _prior: Option<&Tree>) -> Result<Tree, ParseError> {
        if let Some(limit) = self.max_len {
            let len = snapshot.text().len();
            if len > limit {
                return Err(ParseError::TooLarge { len, limit });
            }
        }
        Ok(parse_snapshot(snapshot))
    }
}

/// Parse `snapshot` from scratch.
pub fn parse_snapshot(snapshot: &Snapshot) -> Tree {
    let text = snapshot.text();
    let (tokens, lex_errors) = lex_with_errors(text);

    let mut errors: Vec<SyntaxError> = lex_errors
        .into_iter()
        .map(|err| SyntaxError {
            range: err.range,
            message: err.message().to_owned(),
        })
        .collect();

    let mut open = Vec::new();
    for token in &tokens {
        match token.kind {
            SyntaxKind::LBrace => open.push(token.range),
            SyntaxKind::RBrace => {
                if open.pop().is_none() {
                    errors.push(SyntaxError {
                        range: token.range,
                        message: "unmatched `}`".to_owned(),
                    });
                }
            }
            _ => {}
        }
    }
    errors.extend(open.into_iter().map(|range| SyntaxError {
        range,
        message: "unclosed `{`".to_owned(),
    }));
    errors.sort_by_key(|err| (err.range.start(), err.range.end()));

    Tree::new(snapshot.clone(), tokens, errors)
}
