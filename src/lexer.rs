//! Lexer for pipegen attribute values using logos
//!
//! Attribute values are either a bare token or a bracketed list:
//! - Scalars: `dram_io`, `42`, `0x1f`, `-1`
//! - Flat lists: `[1, 2, 3]`
//! - Nested lists: `[[0, 1, 2], [0, 1, 3]]`

use logos::Logos;

/// Token types of a list-valued attribute
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    // Anything else up to the next separator, validated by the consumer
    #[regex(r"[^\[\], \t\r\n\f]+", |lex| lex.slice().to_string())]
    Word(String),
}

/// Lexer wrapper that provides a peekable stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<Result<Token, ()>>>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
        }
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> Option<&Result<Token, ()>> {
        let inner = &mut self.inner;
        self.peeked.get_or_insert_with(|| inner.next()).as_ref()
    }

    /// Check if the next token matches expected
    pub fn check(&mut self, expected: &Token) -> bool {
        matches!(self.peek(), Some(Ok(tok)) if tok == expected)
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(peeked) => peeked,
            None => self.inner.next(),
        }
    }
}
