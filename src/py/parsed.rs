//! A source unit bundled with everything derived from it: the syntax tree,
//! the token stream, comment spans, and pragmas.

use std::cell::OnceCell;

use crate::matcher::nav::Nav;

use super::ast::{Arena, NodeId, Span};
use super::errors::ParseError;
use super::lexer::Token;
use super::parser::parse_module;
use super::pragma::{extract_pragmas, Pragma};

/// Tree-level data for a successfully parsed unit.
#[derive(Debug)]
pub struct PyTree {
    pub arena: Arena,
    pub root: NodeId,
    pub tokens: Vec<Token>,
    pub comments: Vec<Span>,
    nav: OnceCell<Nav>,
}

impl PyTree {
    /// Parent/sibling breadcrumbs, built on first use.
    pub fn nav(&self) -> &Nav {
        self.nav.get_or_init(|| Nav::build(&self.arena, self.root))
    }
}

/// An immutable parsed file. Units that failed to parse (or were never meant
/// to be parsed, as in regex-only searches) carry no tree.
#[derive(Debug)]
pub struct ParsedFile {
    text: String,
    path: String,
    pragmas: Vec<Pragma>,
    tree: Option<PyTree>,
}

impl ParsedFile {
    /// Parses `text` as a module.
    pub fn parse(text: impl Into<String>, path: impl Into<String>) -> Result<ParsedFile, ParseError> {
        let text = text.into();
        let path = path.into();
        let out = parse_module(&text, &path)?;
        let pragmas = extract_pragmas(&text, &out.comments);
        Ok(ParsedFile {
            text,
            path,
            pragmas,
            tree: Some(PyTree {
                arena: out.arena,
                root: out.root,
                tokens: out.tokens,
                comments: out.comments,
                nav: OnceCell::new(),
            }),
        })
    }

    /// Wraps `text` without parsing it. No tree, no pragmas.
    #[must_use]
    pub fn plain(text: impl Into<String>, path: impl Into<String>) -> ParsedFile {
        ParsedFile {
            text: text.into(),
            path: path.into(),
            pragmas: Vec::new(),
            tree: None,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn pragmas(&self) -> &[Pragma] {
        &self.pragmas
    }

    #[must_use]
    pub fn tree(&self) -> Option<&PyTree> {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn slice(&self, span: Span) -> &str {
        &self.text[span.start..span.end]
    }

    /// The span of a tree node.
    #[must_use]
    pub fn node_span(&self, id: NodeId) -> Option<Span> {
        self.tree.as_ref().map(|t| t.arena.node(id).span)
    }
}
