//! Indentation-aware tokenizer.
//!
//! Produces byte-span tokens including `Indent`/`Dedent`/`Newline` markers.
//! Comments are collected out of band so the parser never sees them; stray
//! characters (`$`, `@`, ...) become `Unknown` tokens instead of failing,
//! which lets the pattern compiler intercept metavariable markers.

use super::ast::Span;
use super::errors::{error_at, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Int,
    Float,
    Str,
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Unknown,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

/// Token stream plus the comment spans that were filtered out of it.
#[derive(Debug, Clone)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub comments: Vec<Span>,
}

const TAB_WIDTH: usize = 8;

// Longest first so that `**=` wins over `**` wins over `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-", "*",
    "/", "%", "<", ">", "=", "(", ")", "[", "]", ",", ":", ";", ".",
];

pub fn tokenize(text: &str, filename: &str) -> Result<LexOutput, ParseError> {
    Lexer {
        text,
        filename,
        pos: 0,
        tokens: Vec::new(),
        comments: Vec::new(),
        indents: vec![0],
        bracket_depth: 0,
    }
    .run()
}

struct Lexer<'a> {
    text: &'a str,
    filename: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    comments: Vec<Span>,
    indents: Vec<usize>,
    bracket_depth: usize,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<LexOutput, ParseError> {
        let mut at_line_start = true;
        while self.pos < self.text.len() {
            if at_line_start && self.bracket_depth == 0 {
                if !self.handle_line_start()? {
                    continue;
                }
                at_line_start = false;
            }
            match self.next_significant()? {
                LineEvent::Newline => at_line_start = true,
                LineEvent::Token => at_line_start = false,
                LineEvent::Eof => break,
            }
        }
        self.finish();
        Ok(LexOutput {
            tokens: self.tokens,
            comments: self.comments,
        })
    }

    /// Measures indentation at a physical line start. Returns false if the
    /// line held no code (blank or comment-only) and we are already back at
    /// the start of the next line.
    fn handle_line_start(&mut self) -> Result<bool, ParseError> {
        let line_start = self.pos;
        let mut column = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => column += 1,
                '\t' => column = column / TAB_WIDTH * TAB_WIDTH + TAB_WIDTH,
                '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                return Ok(false);
            }
            Some('#') => {
                self.consume_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                return Ok(false);
            }
            Some(_) => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if column > current {
            self.indents.push(column);
            self.push(TokenKind::Indent, line_start, self.pos);
        } else if column < current {
            while *self.indents.last().unwrap_or(&0) > column {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.pos, self.pos);
            }
            if *self.indents.last().unwrap_or(&0) != column {
                return Err(error_at(
                    self.filename,
                    self.text,
                    self.pos,
                    "unindent does not match any outer indentation level".into(),
                ));
            }
        }
        Ok(true)
    }

    fn next_significant(&mut self) -> Result<LineEvent, ParseError> {
        loop {
            let Some(c) = self.peek() else {
                return Ok(LineEvent::Eof);
            };
            match c {
                ' ' | '\t' | '\r' => {
                    self.pos += 1;
                }
                '#' => {
                    self.consume_comment();
                }
                '\n' => {
                    if self.bracket_depth > 0 {
                        self.pos += 1;
                    } else {
                        self.push(TokenKind::Newline, self.pos, self.pos + 1);
                        self.pos += 1;
                        return Ok(LineEvent::Newline);
                    }
                }
                _ => {
                    self.lex_token(c)?;
                    return Ok(LineEvent::Token);
                }
            }
        }
    }

    fn lex_token(&mut self, c: char) -> Result<(), ParseError> {
        let start = self.pos;
        if c.is_ascii_alphabetic() || c == '_' {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
                self.pos += 1;
            }
            self.push(TokenKind::Ident, start, self.pos);
            return Ok(());
        }
        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
        {
            return self.lex_number(start);
        }
        if c == '\'' || c == '"' {
            return self.lex_string(start, c);
        }
        for op in OPERATORS {
            if self.text[self.pos..].starts_with(op) {
                self.pos += op.len();
                match *op {
                    "(" | "[" => self.bracket_depth += 1,
                    ")" | "]" => self.bracket_depth = self.bracket_depth.saturating_sub(1),
                    _ => {}
                }
                self.tokens.push(Token {
                    kind: TokenKind::Op(op),
                    span: Span::new(start, self.pos),
                });
                return Ok(());
            }
        }
        self.pos += c.len_utf8();
        self.push(TokenKind::Unknown, start, self.pos);
        Ok(())
    }

    fn lex_number(&mut self, start: usize) -> Result<(), ParseError> {
        let mut is_float = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if !matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                return Err(error_at(
                    self.filename,
                    self.text,
                    self.pos,
                    "invalid number literal: missing exponent digits".into(),
                ));
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let kind = if is_float { TokenKind::Float } else { TokenKind::Int };
        self.push(kind, start, self.pos);
        Ok(())
    }

    fn lex_string(&mut self, start: usize, quote: char) -> Result<(), ParseError> {
        self.pos += 1;
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(error_at(
                        self.filename,
                        self.text,
                        start,
                        "unterminated string literal".into(),
                    ));
                }
                Some('\\') => {
                    self.pos += 1;
                    if let Some(c) = self.peek() {
                        self.pos += c.len_utf8();
                    }
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    self.push(TokenKind::Str, start, self.pos);
                    return Ok(());
                }
                Some(c) => {
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn consume_comment(&mut self) {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c != '\n') {
            self.pos += 1;
        }
        self.comments.push(Span::new(start, self.pos));
    }

    fn finish(&mut self) {
        let end = self.text.len();
        let newline_pending = matches!(
            self.tokens.last(),
            Some(t) if !matches!(t.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        );
        if newline_pending {
            self.push(TokenKind::Newline, end, end);
        }
        while *self.indents.last().unwrap_or(&0) > 0 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end, end);
        }
        self.push(TokenKind::Eof, end, end);
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, end),
        });
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(offset)
    }
}

enum LineEvent {
    Newline,
    Token,
    Eof,
}

/// Decodes a string literal's source text (quotes included) to its value.
#[must_use]
pub fn decode_string(literal: &str) -> String {
    let inner = &literal[1..literal.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
