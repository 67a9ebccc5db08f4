//! Searchers tie the pipeline together: parse a file, run a matcher or
//! regex over it, render replacement templates, and emit substitutions.
//! [`find_iter`] adds fixed-point iteration on top.

pub mod fixed;
pub mod python;
pub mod regex;
pub mod searcher;

pub use fixed::{find_iter, rewrite_string};
pub use python::{MatchMetadata, MatcherSearcher};
pub use regex::RegexSearcher;
pub use searcher::{
    CombinedSearcher, PragmaSuppressedSearcher, SearchError, Searcher, ROOT_LABEL,
};
