//! The searcher abstraction: anything that turns a parsed unit into
//! substitutions, plus the wrappers that combine and filter searchers.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::edit::EditError;
use crate::matcher::{MatchError, PatternError};
use crate::py::{ParsedFile, Pragma, Span};
use crate::substitution::{disjoint_substitutions, suppress_exclude_bytes, Substitution};

/// The label bound to the overall match in every substitution, the
/// equivalent of regex group 0.
pub const ROOT_LABEL: &str = "__root";

#[derive(Debug, Error)]
pub enum SearchError {
    /// The file can't be searched at all (most often a parse failure).
    #[error("skipped {path}: {message}")]
    SkipFile { path: String, message: String },

    #[error("replacement template references unbound labels: {names}")]
    UnboundTemplateLabels { names: String },

    #[error("invalid regex `{pattern}`: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Produces substitutions from one unit of text.
pub trait Searcher: fmt::Debug {
    /// Parses the unit. The default keeps the text unparsed.
    fn parse(&self, text: &str, path: &str) -> Result<Rc<ParsedFile>, SearchError> {
        Ok(Rc::new(ParsedFile::plain(text, path)))
    }

    /// Every substitution over one parsed unit, in document order.
    fn find_parsed(&self, parsed: &ParsedFile) -> Vec<Substitution>;

    /// A regex every file containing a match must satisfy, usable as a
    /// cheap prefilter. `None` when no useful approximation exists.
    fn approximate_regex(&self) -> Option<String> {
        None
    }
}

/// Drops substitutions suppressed by `treewrite: disable=...` pragmas.
#[derive(Debug)]
pub struct PragmaSuppressedSearcher {
    inner: Box<dyn Searcher>,
}

impl PragmaSuppressedSearcher {
    #[must_use]
    pub fn new(inner: Box<dyn Searcher>) -> PragmaSuppressedSearcher {
        PragmaSuppressedSearcher { inner }
    }
}

impl Searcher for PragmaSuppressedSearcher {
    fn parse(&self, text: &str, path: &str) -> Result<Rc<ParsedFile>, SearchError> {
        self.inner.parse(text, path)
    }

    fn find_parsed(&self, parsed: &ParsedFile) -> Vec<Substitution> {
        let excluded = pragma_excluded_ranges(parsed.pragmas());
        self.inner
            .find_parsed(parsed)
            .into_iter()
            .filter_map(|sub| {
                let mut categories = sub.all_categories();
                categories.push("all".to_string());
                let relevant: Vec<Span> = categories
                    .iter()
                    .filter_map(|c| excluded.get(c.as_str()))
                    .flatten()
                    .copied()
                    .collect();
                suppress_exclude_bytes(vec![sub], &relevant).pop()
            })
            .collect()
    }

    fn approximate_regex(&self) -> Option<String> {
        self.inner.approximate_regex()
    }
}

/// Byte ranges disabled per category. An `enable=` pragma re-enables its
/// category from its own position to the end of any `disable=` range it
/// falls inside.
fn pragma_excluded_ranges(pragmas: &[Pragma]) -> BTreeMap<String, Vec<Span>> {
    let mut disabled = pragma_ranges(pragmas, "disable");
    let enabled = pragma_ranges(pragmas, "enable");
    for (category, ranges) in &mut disabled {
        let Some(enables) = enabled.get(category) else {
            continue;
        };
        for range in ranges.iter_mut() {
            for e in enables {
                if range.start <= e.start && e.start < range.end {
                    range.end = e.start;
                }
            }
        }
    }
    disabled
}

fn pragma_ranges(pragmas: &[Pragma], key: &str) -> BTreeMap<String, Vec<Span>> {
    let mut out: BTreeMap<String, Vec<Span>> = BTreeMap::new();
    for pragma in pragmas {
        if pragma.tag != "treewrite" {
            continue;
        }
        let Some(value) = pragma.data.get(key) else {
            continue;
        };
        for category in value.split(',') {
            out.entry(category.trim().to_string())
                .or_default()
                .push(pragma.span);
        }
    }
    out
}

/// Concatenates the results of several searchers, resolving overlaps in
/// favor of the smaller substitution.
#[derive(Debug)]
pub struct CombinedSearcher {
    searchers: Vec<Box<dyn Searcher>>,
}

impl CombinedSearcher {
    #[must_use]
    pub fn new(searchers: Vec<Box<dyn Searcher>>) -> CombinedSearcher {
        CombinedSearcher { searchers }
    }
}

impl Searcher for CombinedSearcher {
    /// Prefers a tree-bearing parse, so tree and regex members can share
    /// one parsed unit.
    fn parse(&self, text: &str, path: &str) -> Result<Rc<ParsedFile>, SearchError> {
        let mut best: Option<Rc<ParsedFile>> = None;
        for searcher in &self.searchers {
            let parsed = searcher.parse(text, path)?;
            let upgrade = match &best {
                None => true,
                Some(b) => b.tree().is_none() && parsed.tree().is_some(),
            };
            if upgrade {
                best = Some(parsed);
            }
        }
        match best {
            Some(parsed) => Ok(parsed),
            None => Ok(Rc::new(ParsedFile::plain(text, path))),
        }
    }

    fn find_parsed(&self, parsed: &ParsedFile) -> Vec<Substitution> {
        disjoint_substitutions(
            self.searchers
                .iter()
                .flat_map(|s| s.find_parsed(parsed))
                .collect(),
        )
    }

    fn approximate_regex(&self) -> Option<String> {
        let regexes: Option<Vec<String>> = self
            .searchers
            .iter()
            .map(|s| s.approximate_regex())
            .collect();
        regexes.map(|rs| {
            rs.iter()
                .map(|r| format!("(?:{r})"))
                .collect::<Vec<_>>()
                .join("|")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Replacements;
    use crate::search::python::MatcherSearcher;
    use crate::template::{LiteralTemplate, Template};

    fn remover(pattern: &str) -> MatcherSearcher {
        let templates = Replacements::from([(
            ROOT_LABEL.to_string(),
            Rc::new(LiteralTemplate::new("gone()")) as Rc<dyn Template>,
        )]);
        MatcherSearcher::expr(pattern, templates).unwrap()
    }

    #[test]
    fn test_trailing_disable_pragma_suppresses_its_line() {
        let text = "old()  # treewrite: disable=all\nold()\n";
        let searcher = PragmaSuppressedSearcher::new(Box::new(remover("old()")));
        let parsed = searcher.parse(text, "t.py").unwrap();
        let subs = searcher.find_parsed(&parsed);
        assert_eq!(subs.len(), 1);
        assert!(subs[0].primary_span().start > text.find('\n').unwrap());
    }

    #[test]
    fn test_standalone_pragma_covers_block_and_enable_reopens() {
        let text = "\
# treewrite: disable=all
old()
# treewrite: enable=all
old()
";
        let searcher = PragmaSuppressedSearcher::new(Box::new(remover("old()")));
        let parsed = searcher.parse(text, "t.py").unwrap();
        let subs = searcher.find_parsed(&parsed);
        assert_eq!(subs.len(), 1);
        let enable_at = text.rfind("old()").unwrap();
        assert_eq!(subs[0].primary_span().start, enable_at);
    }

    #[test]
    fn test_disable_by_category_leaves_other_categories() {
        let text = "old()  # treewrite: disable=lint.style\n";
        let styled = remover("old()").with_category("lint.style");
        let other = remover("old()").with_category("lint.perf");
        let suppressed = PragmaSuppressedSearcher::new(Box::new(styled));
        let parsed = suppressed.parse(text, "t.py").unwrap();
        assert!(suppressed.find_parsed(&parsed).is_empty());
        let kept = PragmaSuppressedSearcher::new(Box::new(other));
        assert_eq!(kept.find_parsed(&parsed).len(), 1);
    }

    #[test]
    fn test_disable_prefix_suppresses_subcategories() {
        let text = "old()  # treewrite: disable=lint\n";
        let styled = remover("old()").with_category("lint.style");
        let suppressed = PragmaSuppressedSearcher::new(Box::new(styled));
        let parsed = suppressed.parse(text, "t.py").unwrap();
        assert!(suppressed.find_parsed(&parsed).is_empty());
    }

    #[test]
    fn test_combined_searcher_resolves_overlaps() {
        let outer = remover("f(old())");
        let inner = remover("old()");
        let combined =
            CombinedSearcher::new(vec![Box::new(outer), Box::new(inner)]);
        let parsed = combined.parse("f(old())\n", "t.py").unwrap();
        let subs = combined.find_parsed(&parsed);
        // The smaller (inner) substitution wins the overlap.
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].primary_span(), Span::new(2, 7));
    }

    #[test]
    fn test_combined_approximate_regex_requires_all_members() {
        #[derive(Debug)]
        struct Fixed(Option<&'static str>);
        impl Searcher for Fixed {
            fn find_parsed(&self, _parsed: &ParsedFile) -> Vec<Substitution> {
                Vec::new()
            }
            fn approximate_regex(&self) -> Option<String> {
                self.0.map(str::to_string)
            }
        }
        let both = CombinedSearcher::new(vec![
            Box::new(Fixed(Some("aa"))),
            Box::new(Fixed(Some("bb"))),
        ]);
        assert_eq!(both.approximate_regex().unwrap(), "(?:aa)|(?:bb)");
        let partial =
            CombinedSearcher::new(vec![Box::new(Fixed(Some("aa"))), Box::new(Fixed(None))]);
        assert!(partial.approximate_regex().is_none());
    }
}
