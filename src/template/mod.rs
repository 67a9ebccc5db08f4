//! Replacement templates: naive token-level substitution and the safe
//! reparse-and-verify substitution used for structured rewrites.

pub mod base;
pub mod lexical;
pub mod safe;

pub use base::{rewrite_templates, stringify_matches, LiteralTemplate, RewriteError, Template};
pub use lexical::LexicalTemplate;
pub use safe::{PyExprTemplate, PyStmtTemplate, PyTemplate};
