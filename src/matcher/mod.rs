//! Structural matching: combinators over tree candidates, metavariable
//! bindings, and the `$metavariable` pattern compiler.

pub mod base;
pub mod engine;
pub mod model;
pub mod nav;
pub mod syntax;

pub use engine::{bind_variables, find_iter, match_root, KindSet, MatchContext, MatchSession, Matcher, MatcherRef};
pub use model::{
    create_match, merge_bindings, BindConflict, BindMerge, Bindings, BoundValue, Match, MatchError,
    MatchResult, Replacements,
};
pub use nav::Nav;
pub use syntax::{
    ast_matcher, compile_pattern, ExprPattern, ModulePattern, PatternError, PatternKind,
    StmtPattern,
};
