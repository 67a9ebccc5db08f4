//! Treewrite: structural search and replace for Python-style source.
//!
//! Patterns are ordinary source fragments with `$metavariables`
//! (`f($x, $x)` matches a call whose two arguments are structurally
//! equivalent). Replacement templates are re-verified by reparsing, so a
//! rewrite never silently changes the meaning of surrounding code: `x`
//! rewritten to `x + 1` inside `x * 2` comes out as `(x + 1) * 2`.
//!
//! # Architecture
//!
//! The pipeline is a stack of small layers:
//!
//! - [`py`] — lexer, parser, and arena AST for the supported Python
//!   subset, plus comment pragmas.
//! - [`matcher`] — composable matchers over AST nodes, and the compiler
//!   from `$metavariable` patterns to matchers.
//! - [`template`] — replacement rendering, from naive token splicing to
//!   the reparse-and-verify safe mode.
//! - [`substitution`] / [`edit`] — the span-level diff model and the
//!   splicer that applies it.
//! - [`search`] — searchers tying the layers together, with pragma
//!   suppression and fixed-point iteration.
//! - [`rules`] — JSON catalogs of named rules.
//!
//! # Example
//!
//! ```
//! use treewrite::matcher::Replacements;
//! use treewrite::search::{rewrite_string, MatcherSearcher, ROOT_LABEL};
//! use treewrite::template::{PyExprTemplate, Template};
//! use std::rc::Rc;
//!
//! let templates = Replacements::from([(
//!     ROOT_LABEL.to_string(),
//!     Rc::new(PyExprTemplate::new("$a").unwrap()) as Rc<dyn Template>,
//! )]);
//! let searcher = MatcherSearcher::expr("wrapped($a)", templates).unwrap();
//! let out = rewrite_string(&searcher, "y = wrapped(1 + 2)\n", "demo.py", 1).unwrap();
//! assert_eq!(out, "y = 1 + 2\n");
//! ```

pub mod cache;
pub mod edit;
pub mod matcher;
pub mod py;
pub mod rules;
pub mod search;
pub mod substitution;
pub mod template;

// Re-exports
pub use edit::{apply_substitutions, atomic_write, line_expanded_span, EditError};
pub use matcher::{compile_pattern, ExprPattern, ModulePattern, PatternError, StmtPattern};
pub use py::{ParseError, ParsedFile, Span};
pub use rules::{
    compile_rule, RuleCatalog, RuleDefinition, RuleError, RuleMode, CATALOG_ITERATIONS,
};
pub use search::{
    find_iter, rewrite_string, CombinedSearcher, MatcherSearcher, PragmaSuppressedSearcher,
    RegexSearcher, SearchError, Searcher, ROOT_LABEL,
};
pub use substitution::{disjoint_substitutions, Substitution, SubstitutionError};
pub use template::{LexicalTemplate, PyExprTemplate, PyStmtTemplate, PyTemplate, Template};
