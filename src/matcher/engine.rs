//! The matcher trait, per-attempt context, and the preorder search driver.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use regex::Regex;

use crate::py::{Candidate, KindTag, ParsedFile, PyTree, Span};

use super::model::{MatchError, MatchResult};

/// Bitset of node kinds a matcher can possibly accept. Used to dispatch
/// alternation matchers by candidate kind without trying every branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSet(u32);

pub(crate) const ALL_TAGS: &[KindTag] = &[
    KindTag::Module,
    KindTag::ExprStmt,
    KindTag::Assign,
    KindTag::AugAssign,
    KindTag::Return,
    KindTag::Pass,
    KindTag::Break,
    KindTag::Continue,
    KindTag::If,
    KindTag::While,
    KindTag::For,
    KindTag::FunctionDef,
    KindTag::Param,
    KindTag::Name,
    KindTag::Num,
    KindTag::Str,
    KindTag::Bool,
    KindTag::NoneLit,
    KindTag::BoolOp,
    KindTag::BinOp,
    KindTag::UnaryOp,
    KindTag::Compare,
    KindTag::IfExp,
    KindTag::Call,
    KindTag::Keyword,
    KindTag::Attribute,
    KindTag::Subscript,
    KindTag::List,
    KindTag::Tuple,
];

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);

    #[must_use]
    pub fn only(tag: KindTag) -> KindSet {
        KindSet(1 << tag as u32)
    }

    #[must_use]
    pub fn contains(self, tag: KindTag) -> bool {
        self.0 & (1 << tag as u32) != 0
    }

    #[must_use]
    pub fn union(self, other: KindSet) -> KindSet {
        KindSet(self.0 | other.0)
    }

    #[must_use]
    pub fn intersection(self, other: KindSet) -> KindSet {
        KindSet(self.0 & other.0)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn tags(self) -> impl Iterator<Item = KindTag> {
        ALL_TAGS.iter().copied().filter(move |t| self.contains(*t))
    }
}

/// State shared by every match attempt over one parsed unit.
#[derive(Debug, Default)]
pub struct MatchSession {
    committed_once: RefCell<HashSet<String>>,
    regex_memo: RefCell<HashMap<String, Option<Vec<(String, Span)>>>>,
}

impl MatchSession {
    #[must_use]
    pub fn new() -> MatchSession {
        MatchSession::default()
    }
}

/// Context for a single match attempt. `Once` keys recorded during the
/// attempt stay pending until the attempt succeeds as a whole.
#[derive(Debug)]
pub struct MatchContext<'a> {
    pub parsed: &'a ParsedFile,
    pub tree: &'a PyTree,
    session: &'a MatchSession,
    pending_once: RefCell<HashSet<String>>,
}

impl<'a> MatchContext<'a> {
    #[must_use]
    pub fn new(
        parsed: &'a ParsedFile,
        tree: &'a PyTree,
        session: &'a MatchSession,
    ) -> MatchContext<'a> {
        MatchContext {
            parsed,
            tree,
            session,
            pending_once: RefCell::new(HashSet::new()),
        }
    }

    pub fn once_seen(&self, key: &str) -> bool {
        self.session.committed_once.borrow().contains(key)
            || self.pending_once.borrow().contains(key)
    }

    pub fn record_once(&self, key: &str) {
        self.pending_once.borrow_mut().insert(key.to_string());
    }

    /// Promotes this attempt's pending `Once` keys into the session.
    pub fn commit(&self) {
        self.session
            .committed_once
            .borrow_mut()
            .extend(self.pending_once.borrow_mut().drain());
    }

    /// Searches the whole unit for `re`, memoized per session on the regex
    /// source. Returns the named-group spans of the first match.
    pub fn memoized_file_search(&self, re: &Regex) -> Option<Vec<(String, Span)>> {
        let key = re.as_str().to_string();
        if let Some(hit) = self.session.regex_memo.borrow().get(&key) {
            return hit.clone();
        }
        let result = re.captures(self.parsed.text()).map(|caps| {
            re.capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), Span::new(m.start(), m.end())))
                })
                .collect()
        });
        self.session
            .regex_memo
            .borrow_mut()
            .insert(key, result.clone());
        result
    }
}

/// A match expression. `Ok(None)` is an ordinary non-match; `Err` means the
/// expression itself is broken for this input.
pub trait Matcher: std::fmt::Debug {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError>;

    /// Node kinds this matcher can possibly accept, `None` when unknown.
    fn type_filter(&self) -> Option<KindSet> {
        None
    }

    /// Accumulates the metavariable names this matcher can bind.
    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        let _ = names;
    }
}

pub type MatcherRef = Rc<dyn Matcher>;

/// The full set of metavariables a matcher can bind.
#[must_use]
pub fn bind_variables(matcher: &dyn Matcher) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    matcher.collect_bind_variables(&mut names);
    names
}

/// Runs `matcher` against the unit's root node only.
pub fn match_root(
    matcher: &dyn Matcher,
    parsed: &ParsedFile,
) -> Result<Option<MatchResult>, MatchError> {
    let Some(tree) = parsed.tree() else {
        return Ok(None);
    };
    let session = MatchSession::new();
    let ctx = MatchContext::new(parsed, tree, &session);
    let result = matcher.try_match(&ctx, &Candidate::Node(tree.root));
    if matches!(result, Ok(Some(_))) {
        ctx.commit();
    }
    result
}

/// Preorder search over every candidate in the tree: nodes, their fields,
/// and sequence elements. A successful match claims its subtree, so the
/// search does not descend into matched nodes. Match errors are reported to
/// stderr and the walk continues.
#[must_use]
pub fn find_iter(matcher: &dyn Matcher, parsed: &ParsedFile) -> Vec<MatchResult> {
    let Some(tree) = parsed.tree() else {
        return Vec::new();
    };
    let session = MatchSession::new();
    let mut results = Vec::new();
    let mut stack = vec![Candidate::Node(tree.root)];
    while let Some(candidate) = stack.pop() {
        let ctx = MatchContext::new(parsed, tree, &session);
        match matcher.try_match(&ctx, &candidate) {
            Ok(Some(result)) => {
                ctx.commit();
                results.push(result);
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                eprintln!("warning: {}: match failed: {err}", parsed.path());
            }
        }
        match candidate {
            Candidate::Node(id) => {
                for (_, value) in tree.arena.node(id).fields().into_iter().rev() {
                    stack.push(value);
                }
            }
            Candidate::List(items) => {
                for item in items.into_iter().rev() {
                    stack.push(item);
                }
            }
            _ => {}
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_set_operations() {
        let names = KindSet::only(KindTag::Name);
        let nums = KindSet::only(KindTag::Num);
        let both = names.union(nums);
        assert!(both.contains(KindTag::Name));
        assert!(both.contains(KindTag::Num));
        assert!(!both.contains(KindTag::Call));
        assert!(names.intersection(nums).is_empty());
        assert_eq!(both.tags().count(), 2);
    }

    #[test]
    fn test_all_tags_are_distinct_bits() {
        let mut seen = KindSet::EMPTY;
        for tag in ALL_TAGS {
            assert!(!seen.contains(*tag));
            seen = seen.union(KindSet::only(*tag));
        }
    }

    #[test]
    fn test_once_keys_commit_only_on_success() {
        let parsed = ParsedFile::parse("x\n", "t.py").unwrap();
        let tree = parsed.tree().unwrap();
        let session = MatchSession::new();
        {
            let ctx = MatchContext::new(&parsed, tree, &session);
            ctx.record_once("k");
            assert!(ctx.once_seen("k"));
            // Dropped without commit: the attempt failed.
        }
        let ctx = MatchContext::new(&parsed, tree, &session);
        assert!(!ctx.once_seen("k"));
        ctx.record_once("k");
        ctx.commit();
        let ctx = MatchContext::new(&parsed, tree, &session);
        assert!(ctx.once_seen("k"));
    }

    #[test]
    fn test_memoized_file_search_returns_named_groups() {
        let parsed = ParsedFile::parse("alpha = 1\n", "t.py").unwrap();
        let tree = parsed.tree().unwrap();
        let session = MatchSession::new();
        let ctx = MatchContext::new(&parsed, tree, &session);
        let re = Regex::new(r"(?P<word>al\w+)").unwrap();
        let groups = ctx.memoized_file_search(&re).unwrap();
        assert_eq!(groups, vec![("word".to_string(), Span::new(0, 5))]);
        assert!(ctx.memoized_file_search(&Regex::new("zzz").unwrap()).is_none());
    }
}
