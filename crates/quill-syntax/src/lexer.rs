use serde::{Deserialize, Serialize};
use text_size::{TextRange, TextSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyntaxKind {
    Whitespace,
    LineComment,
    BlockComment,
    Ident,
    Number,
    StringLiteral,
    /// `#` up to the end of the line.
    Directive,
    LBrace,
    RBrace,
    /// Any other single character.
    Punct,
}

impl SyntaxKind {
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            SyntaxKind::Whitespace | SyntaxKind::LineComment | SyntaxKind::BlockComment
        )
    }

    pub fn is_brace(self) -> bool {
        matches!(self, SyntaxKind::LBrace | SyntaxKind::RBrace)
    }

    /// Length of the closing delimiter for tokens whose end is decided by a
    /// terminator.
    pub(crate) fn closing_delimiter_len(self) -> Option<u32> {
        match self {
            SyntaxKind::StringLiteral => Some(1),
            SyntaxKind::BlockComment => Some(2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: SyntaxKind,
    pub range: TextRange,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexErrorKind {
    UnterminatedString,
    UnterminatedBlockComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub range: TextRange,
}

impl LexError {
    pub fn message(&self) -> &'static str {
        match self.kind {
            LexErrorKind::UnterminatedString => "unterminated string literal",
            LexErrorKind::UnterminatedBlockComment => "unterminated block comment",
        }
    }
}

/// Lossless lexer: the concatenated token texts always equal the input.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            errors: Vec::new(),
        }
    }

    pub fn into_errors(self) -> Vec<LexError> {
        self.errors
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump_while(&mut self, mut pred: impl FnMut(char) -> bool) {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map_or(rest.len(), |(idx, _)| idx);
        self.pos += len;
    }

    fn bump_to_line_end(&mut self) {
        self.bump_while(|c| c != '\n' && c != '\r');
    }

    fn string(&mut self, start: usize) {
        // Opening quote.
        self.pos += 1;
        let mut escaped = false;
        while let Some(c) = self.peek() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.pos += c.len_utf8();
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return;
            }
        }
        self.error(LexErrorKind::UnterminatedString, start);
    }

    fn block_comment(&mut self, start: usize) {
        self.pos += 2;
        match self.rest().find("*/") {
            Some(end) => self.pos += end + 2,
            None => {
                self.pos = self.input.len();
                self.error(LexErrorKind::UnterminatedBlockComment, start);
            }
        }
    }

    fn error(&mut self, kind: LexErrorKind, start: usize) {
        self.errors.push(LexError {
            kind,
            range: range(start, self.pos),
        });
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let start = self.pos;
        let c = self.peek()?;
        let rest = self.rest();

        let kind = if c.is_whitespace() {
            self.bump_while(char::is_whitespace);
            SyntaxKind::Whitespace
        } else if rest.starts_with("//") {
            self.bump_to_line_end();
            SyntaxKind::LineComment
        } else if rest.starts_with("/*") {
            self.block_comment(start);
            SyntaxKind::BlockComment
        } else if c == '#' {
            self.bump_to_line_end();
            SyntaxKind::Directive
        } else if c == '"' {
            self.string(start);
            SyntaxKind::StringLiteral
        } else if c.is_ascii_digit() {
            self.bump_while(|c| c.is_ascii_alphanumeric() || c == '_');
            SyntaxKind::Number
        } else if c == '_' || unicode_ident::is_xid_start(c) {
            self.bump_while(|c| c == '_' || unicode_ident::is_xid_continue(c));
            SyntaxKind::Ident
        } else {
            self.pos += c.len_utf8();
            match c {
                '{' => SyntaxKind::LBrace,
                '}' => SyntaxKind::RBrace,
                _ => SyntaxKind::Punct,
            }
        };

        Some(Token {
            kind,
            range: range(start, self.pos),
        })
    }
}

fn range(start: usize, end: usize) -> TextRange {
    TextRange::new(TextSize::from(start as u32), TextSize::from(end as u32))
}

pub fn lex(input: &str) -> Vec<Token> {
    Lexer::new(input).collect()
}

pub fn lex_with_errors(input: &str) -> (Vec<Token>, Vec<LexError>) {
    let mut lexer = Lexer::new(input);
    let tokens = lexer.by_ref().collect();
    (tokens, lexer.into_errors())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(input: &str) -> Vec<(SyntaxKind, &str)> {
        lex(input)
            .into_iter()
            .map(|token| (token.kind, token.text(input)))
            .collect()
    }

    #[test]
    fn lexes_every_kind() {
        assert_eq!(
            kinds("#use a\nfoo { 12 \"s\\\"t\" } // c\n/* b */;"),
            vec![
                (SyntaxKind::Directive, "#use a"),
                (SyntaxKind::Whitespace, "\n"),
                (SyntaxKind::Ident, "foo"),
                (SyntaxKind::Whitespace, " "),
                (SyntaxKind::LBrace, "{"),
                (SyntaxKind::Whitespace, " "),
                (SyntaxKind::Number, "12"),
                (SyntaxKind::Whitespace, " "),
                (SyntaxKind::StringLiteral, "\"s\\\"t\""),
                (SyntaxKind::Whitespace, " "),
                (SyntaxKind::RBrace, "}"),
                (SyntaxKind::Whitespace, " "),
                (SyntaxKind::LineComment, "// c"),
                (SyntaxKind::Whitespace, "\n"),
                (SyntaxKind::BlockComment, "/* b */"),
                (SyntaxKind::Punct, ";"),
            ]
        );
    }

    #[test]
    fn unterminated_string_stops_at_newline() {
        let (tokens, errors) = lex_with_errors("\"abc\nx");
        assert_eq!(tokens[0].range, range(0, 4));
        assert_eq!(tokens[1].kind, SyntaxKind::Whitespace);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn unterminated_block_comment_runs_to_eof() {
        let (tokens, errors) = lex_with_errors("a /* b");
        assert_eq!(tokens.last().map(|t| t.kind), Some(SyntaxKind::BlockComment));
        assert_eq!(errors[0].message(), "unterminated block comment");
    }

    #[test]
    fn lexing_is_lossless_for_non_ascii() {
        let input = "héllo → \"ü\" 名前";
        let rebuilt: String = lex(input).iter().map(|t| t.text(input)).collect();
        assert_eq!(rebuilt, input);
    }
}
