//! Match values, metavariable bindings, and the policies that govern how
//! bindings combine when one metavariable is matched more than once.

use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::py::{Arena, Candidate, NodeId, ParsedFile, Span};
use crate::template::Template;

/// A matcher failed in a way that is a bug in the match expression, not a
/// normal non-match. `find_iter` reports these and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("conflicting binds for `{name}`: {old} vs {new}")]
    ConflictingBindings { name: String, old: String, new: String },
    #[error("variable `{name}` bound with incompatible policies")]
    IncompatiblePolicies { name: String },
    #[error("invalid metavariable name `{name}`")]
    InvalidVariableName { name: String },
    #[error("invalid regex `{pattern}`: {message}")]
    InvalidRegex { pattern: String, message: String },
    #[error("replacement label `{name}` is not bound by the matcher")]
    UnknownReplacementLabel { name: String },
}

/// What a matcher matched: nothing in particular, a string, a raw byte span,
/// a tree node, or a non-textual value like a field list.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    Empty,
    Str(String),
    Span { string: String, span: Span },
    Node { id: NodeId, string: String, span: Span },
    Object(Candidate),
}

impl Match {
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            Match::Span { span, .. } | Match::Node { span, .. } => Some(*span),
            _ => None,
        }
    }

    #[must_use]
    pub fn string(&self) -> Option<&str> {
        match self {
            Match::Str(s) => Some(s),
            Match::Span { string, .. } | Match::Node { string, .. } => Some(string),
            _ => None,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Match::Node { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// The candidate this match denotes, for equivalence comparison.
    /// Span and empty matches denote no comparable value.
    fn as_candidate(&self) -> Option<Candidate> {
        match self {
            Match::Node { id, .. } => Some(Candidate::Node(*id)),
            Match::Str(s) => Some(Candidate::Str(s.clone())),
            Match::Object(c) => Some(c.clone()),
            Match::Span { .. } | Match::Empty => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Match::Empty => "<empty>".to_string(),
            Match::Str(s) => format!("{s:?}"),
            Match::Span { string, span } | Match::Node { string, span, .. } => {
                format!("{string:?} at {span}")
            }
            Match::Object(c) => format!("{c:?}"),
        }
    }
}

/// Builds the natural [`Match`] for a candidate: node candidates carry their
/// span and source text, strings match as strings, everything else is opaque.
#[must_use]
pub fn create_match(parsed: &ParsedFile, candidate: &Candidate) -> Match {
    match candidate {
        Candidate::Node(id) => match parsed.node_span(*id) {
            Some(span) => Match::Node {
                id: *id,
                string: parsed.slice(span).to_string(),
                span,
            },
            None => Match::Object(candidate.clone()),
        },
        Candidate::Str(s) => Match::Str(s.clone()),
        other => Match::Object(other.clone()),
    }
}

/// What to do when a variable is bound twice in one match attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindConflict {
    /// Keep one of the two per the merge policy.
    Merge,
    /// Fail the match, quietly.
    Skip,
    /// Fail the whole attempt with an error.
    Error,
    /// Merge only if both values are identical, else fail quietly.
    MergeIdentical,
    /// Merge only if both values are identical, else error.
    MergeIdenticalOrError,
    /// Merge only if both values are structurally equivalent trees, else
    /// fail quietly.
    MergeEquivalentAst,
    /// Merge only if both values are structurally equivalent trees, else
    /// error.
    MergeEquivalentAstOrError,
}

/// Which of two mergeable values survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMerge {
    KeepFirst,
    KeepLast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub value: Match,
    pub on_conflict: BindConflict,
    pub on_merge: BindMerge,
}

impl BoundValue {
    #[must_use]
    pub fn new(value: Match) -> BoundValue {
        BoundValue {
            value,
            on_conflict: BindConflict::Merge,
            on_merge: BindMerge::KeepLast,
        }
    }

    #[must_use]
    pub fn with_policies(value: Match, on_conflict: BindConflict, on_merge: BindMerge) -> BoundValue {
        BoundValue {
            value,
            on_conflict,
            on_merge,
        }
    }

    /// Same value under different policies, for `Rebind`.
    #[must_use]
    pub fn rebound(
        &self,
        on_conflict: Option<BindConflict>,
        on_merge: Option<BindMerge>,
    ) -> BoundValue {
        BoundValue {
            value: self.value.clone(),
            on_conflict: on_conflict.unwrap_or(self.on_conflict),
            on_merge: on_merge.unwrap_or(self.on_merge),
        }
    }
}

pub type Bindings = BTreeMap<String, BoundValue>;
pub type Replacements = BTreeMap<String, Rc<dyn Template>>;

/// A successful match: the matched value, the metavariable bindings it
/// produced, and any replacement templates matchers attached along the way.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: Match,
    pub bindings: Bindings,
    pub replacements: Replacements,
}

impl MatchResult {
    #[must_use]
    pub fn new(matched: Match) -> MatchResult {
        MatchResult {
            matched,
            bindings: Bindings::new(),
            replacements: Replacements::new(),
        }
    }

    #[must_use]
    pub fn with_bindings(matched: Match, bindings: Bindings) -> MatchResult {
        MatchResult {
            matched,
            bindings,
            replacements: Replacements::new(),
        }
    }
}

/// Merges `rhs` into `lhs`. Returns `Ok(None)` for a quiet merge failure
/// (the enclosing match fails), `Err` for a policy violation.
///
/// Policy mismatches on shared keys are always reported, even when an
/// earlier key already failed quietly.
pub fn merge_bindings(
    arena: &Arena,
    lhs: &Bindings,
    rhs: &Bindings,
) -> Result<Option<Bindings>, MatchError> {
    let mut result = lhs.clone();
    let mut failed = false;
    for (name, new) in rhs {
        let Some(old) = lhs.get(name) else {
            result.insert(name.clone(), new.clone());
            continue;
        };
        if old.on_conflict != new.on_conflict || old.on_merge != new.on_merge {
            return Err(MatchError::IncompatiblePolicies { name: name.clone() });
        }
        match merge_value(arena, name, old, new)? {
            Some(merged) => {
                result.insert(name.clone(), merged);
            }
            None => failed = true,
        }
    }
    if failed {
        Ok(None)
    } else {
        Ok(Some(result))
    }
}

fn merge_value(
    arena: &Arena,
    name: &str,
    old: &BoundValue,
    new: &BoundValue,
) -> Result<Option<BoundValue>, MatchError> {
    let keep = || match old.on_merge {
        BindMerge::KeepFirst => Some(old.clone()),
        BindMerge::KeepLast => Some(new.clone()),
    };
    let conflict_error = || MatchError::ConflictingBindings {
        name: name.to_string(),
        old: old.value.describe(),
        new: new.value.describe(),
    };
    match old.on_conflict {
        BindConflict::Merge => Ok(keep()),
        BindConflict::Skip => Ok(None),
        BindConflict::Error => Err(conflict_error()),
        BindConflict::MergeIdentical => Ok(if old.value == new.value { keep() } else { None }),
        BindConflict::MergeIdenticalOrError => {
            if old.value == new.value {
                Ok(keep())
            } else {
                Err(conflict_error())
            }
        }
        BindConflict::MergeEquivalentAst => {
            Ok(if values_equivalent(arena, old, new) { keep() } else { None })
        }
        BindConflict::MergeEquivalentAstOrError => {
            if values_equivalent(arena, old, new) {
                Ok(keep())
            } else {
                Err(conflict_error())
            }
        }
    }
}

fn values_equivalent(arena: &Arena, old: &BoundValue, new: &BoundValue) -> bool {
    match (old.value.as_candidate(), new.value.as_candidate()) {
        (Some(a), Some(b)) => candidates_equivalent(arena, &a, &b),
        _ => false,
    }
}

/// Structural tree equivalence. Load/store context is ignored, so `x` on the
/// left of an assignment is equivalent to `x` on the right.
#[must_use]
pub fn candidates_equivalent(arena: &Arena, a: &Candidate, b: &Candidate) -> bool {
    let mut worklist = vec![(a.clone(), b.clone())];
    while let Some((a, b)) = worklist.pop() {
        match (a, b) {
            (Candidate::Node(x), Candidate::Node(y)) => {
                let nx = arena.node(x);
                let ny = arena.node(y);
                if nx.tag() != ny.tag() {
                    return false;
                }
                for ((fa, va), (fb, vb)) in nx.fields().into_iter().zip(ny.fields()) {
                    debug_assert_eq!(fa, fb);
                    if fa == "ctx" {
                        continue;
                    }
                    worklist.push((va, vb));
                }
            }
            (Candidate::List(xs), Candidate::List(ys)) => {
                if xs.len() != ys.len() {
                    return false;
                }
                worklist.extend(xs.into_iter().zip(ys));
            }
            (a, b) => {
                if a != b {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py::parse_module;

    fn bound(value: &str, on_conflict: BindConflict, on_merge: BindMerge) -> BoundValue {
        BoundValue::with_policies(Match::Str(value.to_string()), on_conflict, on_merge)
    }

    fn merge_one(
        old: BoundValue,
        new: BoundValue,
    ) -> Result<Option<Bindings>, MatchError> {
        let arena = Arena::new();
        let lhs = Bindings::from([("v".to_string(), old)]);
        let rhs = Bindings::from([("v".to_string(), new)]);
        merge_bindings(&arena, &lhs, &rhs)
    }

    #[test]
    fn test_disjoint_keys_union() {
        let arena = Arena::new();
        let lhs = Bindings::from([("a".to_string(), BoundValue::new(Match::Str("1".into())))]);
        let rhs = Bindings::from([("b".to_string(), BoundValue::new(Match::Str("2".into())))]);
        let merged = merge_bindings(&arena, &lhs, &rhs).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_keeps_last_by_default() {
        let old = bound("old", BindConflict::Merge, BindMerge::KeepLast);
        let new = bound("new", BindConflict::Merge, BindMerge::KeepLast);
        let merged = merge_one(old, new).unwrap().unwrap();
        assert_eq!(merged["v"].value, Match::Str("new".into()));
    }

    #[test]
    fn test_keep_first() {
        let old = bound("old", BindConflict::Merge, BindMerge::KeepFirst);
        let new = bound("new", BindConflict::Merge, BindMerge::KeepFirst);
        let merged = merge_one(old, new).unwrap().unwrap();
        assert_eq!(merged["v"].value, Match::Str("old".into()));
    }

    #[test]
    fn test_skip_fails_quietly() {
        let old = bound("old", BindConflict::Skip, BindMerge::KeepLast);
        let new = bound("new", BindConflict::Skip, BindMerge::KeepLast);
        assert_eq!(merge_one(old, new).unwrap(), None);
    }

    #[test]
    fn test_error_policy_is_hard() {
        let old = bound("old", BindConflict::Error, BindMerge::KeepLast);
        let new = bound("new", BindConflict::Error, BindMerge::KeepLast);
        assert!(merge_one(old, new).is_err());
    }

    #[test]
    fn test_merge_identical() {
        let same = bound("x", BindConflict::MergeIdentical, BindMerge::KeepLast);
        assert!(merge_one(same.clone(), same).unwrap().is_some());
        let old = bound("x", BindConflict::MergeIdentical, BindMerge::KeepLast);
        let new = bound("y", BindConflict::MergeIdentical, BindMerge::KeepLast);
        assert_eq!(merge_one(old, new).unwrap(), None);
        let old = bound("x", BindConflict::MergeIdenticalOrError, BindMerge::KeepLast);
        let new = bound("y", BindConflict::MergeIdenticalOrError, BindMerge::KeepLast);
        assert!(merge_one(old, new).is_err());
    }

    #[test]
    fn test_policy_mismatch_errors_even_after_soft_failure() {
        let arena = Arena::new();
        // Key "a" fails quietly under Skip; key "b" has a policy mismatch,
        // which must still surface as a hard error.
        let lhs = Bindings::from([
            ("a".to_string(), bound("1", BindConflict::Skip, BindMerge::KeepLast)),
            ("b".to_string(), bound("1", BindConflict::Merge, BindMerge::KeepLast)),
        ]);
        let rhs = Bindings::from([
            ("a".to_string(), bound("2", BindConflict::Skip, BindMerge::KeepLast)),
            ("b".to_string(), bound("1", BindConflict::Merge, BindMerge::KeepFirst)),
        ]);
        assert_eq!(
            merge_bindings(&arena, &lhs, &rhs),
            Err(MatchError::IncompatiblePolicies { name: "b".into() })
        );
    }

    fn parsed_exprs(text: &str) -> (Arena, Vec<NodeId>) {
        let out = parse_module(text, "t.py").unwrap();
        let root = out.arena.node(out.root).clone();
        let ids = root
            .child_ids()
            .iter()
            .map(|stmt| out.arena.node(*stmt).child_ids()[0])
            .collect();
        (out.arena, ids)
    }

    #[test]
    fn test_equivalence_ignores_position() {
        let (arena, ids) = parsed_exprs("f(x) + 1\nf(x) + 1\nf(y) + 1\n");
        assert!(candidates_equivalent(
            &arena,
            &Candidate::Node(ids[0]),
            &Candidate::Node(ids[1])
        ));
        assert!(!candidates_equivalent(
            &arena,
            &Candidate::Node(ids[0]),
            &Candidate::Node(ids[2])
        ));
    }

    #[test]
    fn test_equivalence_ignores_name_context() {
        let out = parse_module("x = x\n", "t.py").unwrap();
        let assign = out.arena.node(out.root).child_ids()[0];
        let children = out.arena.node(assign).child_ids();
        assert!(candidates_equivalent(
            &out.arena,
            &Candidate::Node(children[0]),
            &Candidate::Node(children[1])
        ));
    }

    #[test]
    fn test_equivalent_ast_merge_uses_equivalence() {
        let (arena, ids) = parsed_exprs("a + b\na + b\n");
        let old = BoundValue::with_policies(
            Match::Node {
                id: ids[0],
                string: "a + b".into(),
                span: arena.node(ids[0]).span,
            },
            BindConflict::MergeEquivalentAst,
            BindMerge::KeepLast,
        );
        let new = BoundValue::with_policies(
            Match::Node {
                id: ids[1],
                string: "a + b".into(),
                span: arena.node(ids[1]).span,
            },
            BindConflict::MergeEquivalentAst,
            BindMerge::KeepLast,
        );
        let lhs = Bindings::from([("v".to_string(), old)]);
        let rhs = Bindings::from([("v".to_string(), new)]);
        let merged = merge_bindings(&arena, &lhs, &rhs).unwrap().unwrap();
        assert_eq!(merged["v"].value.node_id(), Some(ids[1]));
    }
}
