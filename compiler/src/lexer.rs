// Lexer for code-block template text.
//
// Splits template text into the few tokens the macro processor cares about:
// escaped dollars, macro dollars, parentheses and literal runs. Uses the
// `logos` crate for DFA-based lexing; every byte belongs to some token, so
// lexing cannot fail.
//
// Preconditions: input is valid UTF-8.
// Postconditions: token spans cover the input contiguously, in order.
// Failure modes: none.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Template tokens.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// `\$`: a literal dollar that must survive macro processing.
    #[token("\\$")]
    EscapedDollar,
    /// `$`: the start of a macro invocation.
    #[token("$")]
    Dollar,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    /// A lone backslash not followed by `$`.
    #[token("\\")]
    Backslash,
    /// Any run of characters with no special meaning.
    #[regex(r"[^$()\\]+")]
    Text,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::EscapedDollar => "\\$",
            Token::Dollar => "$",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Backslash => "\\",
            Token::Text => "text",
        };
        f.write_str(s)
    }
}

// ── Public API ──

/// Lex template text into tokens with byte spans.
pub fn lex(source: &str) -> Vec<(Token, Span)> {
    let mut tokens = Vec::new();
    for (result, range) in Token::lexer(source).spanned() {
        // The token set is total over UTF-8 input.
        if let Ok(token) = result {
            tokens.push((token, Span::new(range.start, range.end)));
        }
    }
    tokens
}

/// Byte index of the first unescaped `$` at or after `from`.
pub fn macro_start_index(code: &str, from: usize) -> Option<usize> {
    lex(code)
        .into_iter()
        .find(|(tok, span)| *tok == Token::Dollar && span.start >= from)
        .map(|(_, span)| span.start)
}

/// True if `code` holds at least one unescaped `$`.
pub fn has_macro(code: &str) -> bool {
    macro_start_index(code, 0).is_some()
}

/// Collapse every `\$` into `$`. Applied once to a finished program.
pub fn unescape_dollars(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for (tok, span) in lex(code) {
        match tok {
            Token::EscapedDollar => out.push('$'),
            _ => out.push_str(&code[span.start..span.end]),
        }
    }
    out
}

// ── Tests ──
