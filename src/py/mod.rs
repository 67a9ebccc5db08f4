//! Python-subset grammar: tokenizer, flat-arena syntax tree, parser, and the
//! comment pragmas that ride along with a parsed unit.

pub mod ast;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod parsed;
pub mod pragma;

pub use ast::{Arena, Candidate, KindTag, NameCtx, Node, NodeId, NodeKind, Number, Span};
pub use errors::ParseError;
pub use lexer::{tokenize, LexOutput, Token, TokenKind};
pub use parsed::{ParsedFile, PyTree};
pub use parser::{parse_module, ParseOutput};
pub use pragma::Pragma;
