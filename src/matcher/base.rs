//! Grammar-independent matcher combinators.

use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};
use std::sync::OnceLock;

use regex::Regex;
use similar::{DiffOp, TextDiff};

use crate::py::{Candidate, KindTag, Span};
use crate::template::LiteralTemplate;

use super::engine::{bind_variables, KindSet, MatchContext, Matcher, MatcherRef};
use super::model::{
    create_match, merge_bindings, BindConflict, BindMerge, Bindings, BoundValue, Match, MatchError,
    MatchResult, Replacements,
};

/// Merges `extra` into `acc`; false means the enclosing match fails quietly.
fn merge_step(
    ctx: &MatchContext<'_>,
    acc: &mut Bindings,
    extra: &Bindings,
) -> Result<bool, MatchError> {
    match merge_bindings(&ctx.tree.arena, acc, extra)? {
        Some(merged) => {
            *acc = merged;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Matches any candidate, binding nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anything;

impl Matcher for Anything {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        Ok(Some(MatchResult::new(create_match(ctx.parsed, candidate))))
    }
}

/// Matches a candidate equal to a literal value. This is also what plain
/// field values compile to in exact-shape matchers.
#[derive(Debug, Clone)]
pub struct Equals {
    pub value: Candidate,
}

impl Equals {
    #[must_use]
    pub fn new(value: Candidate) -> Equals {
        Equals { value }
    }
}

impl Matcher for Equals {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        if *candidate == self.value {
            Ok(Some(MatchResult::new(create_match(ctx.parsed, candidate))))
        } else {
            Ok(None)
        }
    }
}

/// Inverts a matcher. Bindings from the inner matcher are discarded.
#[derive(Debug)]
pub struct Unless {
    submatcher: MatcherRef,
}

impl Unless {
    #[must_use]
    pub fn new(submatcher: MatcherRef) -> Unless {
        Unless { submatcher }
    }
}

impl Matcher for Unless {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        match self.submatcher.try_match(ctx, candidate)? {
            Some(_) => Ok(None),
            None => Ok(Some(MatchResult::new(create_match(ctx.parsed, candidate)))),
        }
    }
}

/// Conjunction: every submatcher must accept, bindings merge pairwise.
#[derive(Debug)]
pub struct AllOf {
    submatchers: Vec<MatcherRef>,
    filter: Option<KindSet>,
}

impl AllOf {
    #[must_use]
    pub fn new(submatchers: Vec<MatcherRef>) -> AllOf {
        let mut filter: Option<KindSet> = None;
        for sub in &submatchers {
            if let Some(f) = sub.type_filter() {
                filter = Some(match filter {
                    None => f,
                    Some(acc) => acc.intersection(f),
                });
            }
        }
        AllOf { submatchers, filter }
    }
}

impl Matcher for AllOf {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let mut bindings = Bindings::new();
        let mut replacements = Replacements::new();
        for sub in &self.submatchers {
            let Some(result) = sub.try_match(ctx, candidate)? else {
                return Ok(None);
            };
            if !merge_step(ctx, &mut bindings, &result.bindings)? {
                return Ok(None);
            }
            replacements.extend(result.replacements);
        }
        Ok(Some(MatchResult {
            matched: create_match(ctx.parsed, candidate),
            bindings,
            replacements,
        }))
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.filter
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        for sub in &self.submatchers {
            sub.collect_bind_variables(names);
        }
    }
}

/// Alternation: first accepting submatcher wins. When every branch declares
/// a kind filter, branches are dispatched by candidate kind instead of being
/// tried in turn (order within a kind is preserved).
#[derive(Debug)]
pub struct AnyOf {
    submatchers: Vec<MatcherRef>,
    filter: Option<KindSet>,
    dispatch: Option<HashMap<KindTag, Vec<usize>>>,
}

impl AnyOf {
    #[must_use]
    pub fn new(submatchers: Vec<MatcherRef>) -> AnyOf {
        let filters: Option<Vec<KindSet>> =
            submatchers.iter().map(|s| s.type_filter()).collect();
        match filters {
            Some(filters) => {
                let mut dispatch: HashMap<KindTag, Vec<usize>> = HashMap::new();
                let mut union = KindSet::EMPTY;
                for (i, f) in filters.iter().enumerate() {
                    union = union.union(*f);
                    for tag in f.tags() {
                        dispatch.entry(tag).or_default().push(i);
                    }
                }
                AnyOf {
                    submatchers,
                    filter: Some(union),
                    dispatch: Some(dispatch),
                }
            }
            None => AnyOf {
                submatchers,
                filter: None,
                dispatch: None,
            },
        }
    }
}

impl Matcher for AnyOf {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        if let Some(dispatch) = &self.dispatch {
            // Fully filtered alternatives only ever accept nodes.
            let Candidate::Node(id) = candidate else {
                return Ok(None);
            };
            let tag = ctx.tree.arena.node(*id).tag();
            let Some(indices) = dispatch.get(&tag) else {
                return Ok(None);
            };
            for &i in indices {
                if let Some(result) = self.submatchers[i].try_match(ctx, candidate)? {
                    return Ok(Some(result));
                }
            }
            return Ok(None);
        }
        for sub in &self.submatchers {
            if let Some(result) = sub.try_match(ctx, candidate)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.filter
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        for sub in &self.submatchers {
            sub.collect_bind_variables(names);
        }
    }
}

fn user_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A[a-zA-Z_]\w*\z").unwrap())
}

fn system_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A__\w+\z").unwrap())
}

/// Binds the submatcher's result to a metavariable name.
///
/// Names starting with `__` are reserved for internal use and only
/// constructible through [`Bind::system`].
#[derive(Debug)]
pub struct Bind {
    name: String,
    submatcher: MatcherRef,
    on_conflict: BindConflict,
    on_merge: BindMerge,
}

impl Bind {
    pub fn new(
        name: impl Into<String>,
        submatcher: MatcherRef,
        on_conflict: BindConflict,
        on_merge: BindMerge,
    ) -> Result<Bind, MatchError> {
        let name = name.into();
        if !user_name_re().is_match(&name) || name.starts_with("__") {
            return Err(MatchError::InvalidVariableName { name });
        }
        Ok(Bind {
            name,
            submatcher,
            on_conflict,
            on_merge,
        })
    }

    /// `Bind` with the default merge-always + keep-last policies.
    pub fn simple(name: impl Into<String>, submatcher: MatcherRef) -> Result<Bind, MatchError> {
        Bind::new(name, submatcher, BindConflict::Merge, BindMerge::KeepLast)
    }

    /// Binds a reserved `__`-prefixed system label.
    pub fn system(name: impl Into<String>, submatcher: MatcherRef) -> Result<Bind, MatchError> {
        let name = name.into();
        if !system_name_re().is_match(&name) {
            return Err(MatchError::InvalidVariableName { name });
        }
        Ok(Bind {
            name,
            submatcher,
            on_conflict: BindConflict::Merge,
            on_merge: BindMerge::KeepLast,
        })
    }
}

impl Matcher for Bind {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Some(result) = self.submatcher.try_match(ctx, candidate)? else {
            return Ok(None);
        };
        let bound = Bindings::from([(
            self.name.clone(),
            BoundValue::with_policies(result.matched.clone(), self.on_conflict, self.on_merge),
        )]);
        let mut bindings = result.bindings;
        if !merge_step(ctx, &mut bindings, &bound)? {
            return Ok(None);
        }
        Ok(Some(MatchResult {
            matched: result.matched,
            bindings,
            replacements: result.replacements,
        }))
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.submatcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        names.insert(self.name.clone());
        self.submatcher.collect_bind_variables(names);
    }
}

/// Rewrites the conflict/merge policies of every binding produced by the
/// submatcher. A `None` policy leaves that setting unchanged.
#[derive(Debug)]
pub struct Rebind {
    submatcher: MatcherRef,
    on_conflict: Option<BindConflict>,
    on_merge: Option<BindMerge>,
}

impl Rebind {
    #[must_use]
    pub fn new(
        submatcher: MatcherRef,
        on_conflict: Option<BindConflict>,
        on_merge: Option<BindMerge>,
    ) -> Rebind {
        Rebind {
            submatcher,
            on_conflict,
            on_merge,
        }
    }
}

impl Matcher for Rebind {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Some(mut result) = self.submatcher.try_match(ctx, candidate)? else {
            return Ok(None);
        };
        result.bindings = result
            .bindings
            .into_iter()
            .map(|(name, value)| (name, value.rebound(self.on_conflict, self.on_merge)))
            .collect();
        Ok(Some(result))
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.submatcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
    }
}

/// Matches iff the submatcher has ever succeeded under `key` during this
/// file-session, including right now. The key is committed only when the
/// whole top-level attempt succeeds.
#[derive(Debug)]
pub struct Once {
    key: String,
    submatcher: MatcherRef,
}

impl Once {
    #[must_use]
    pub fn new(key: impl Into<String>, submatcher: MatcherRef) -> Once {
        Once {
            key: key.into(),
            submatcher,
        }
    }
}

impl Matcher for Once {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        if ctx.once_seen(&self.key) {
            return Ok(Some(MatchResult::new(Match::Empty)));
        }
        match self.submatcher.try_match(ctx, candidate)? {
            Some(result) => {
                ctx.record_once(&self.key);
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
    }
}

/// Matches if the submatcher accepts the candidate or anything inside it.
#[derive(Debug)]
pub struct Contains {
    submatcher: MatcherRef,
}

impl Contains {
    #[must_use]
    pub fn new(submatcher: MatcherRef) -> Contains {
        Contains { submatcher }
    }
}

impl Matcher for Contains {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let mut stack = vec![candidate.clone()];
        while let Some(current) = stack.pop() {
            if let Some(inner) = self.submatcher.try_match(ctx, &current)? {
                return Ok(Some(MatchResult {
                    matched: create_match(ctx.parsed, candidate),
                    bindings: inner.bindings,
                    replacements: inner.replacements,
                }));
            }
            match current {
                Candidate::Node(id) => {
                    for (_, value) in ctx.tree.arena.node(id).fields().into_iter().rev() {
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
        Ok(None)
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
    }
}

/// Matches a sequence whose `index`-th element matches. Negative indexes
/// count from the end. Bad index or non-sequence candidates fail quietly.
#[derive(Debug)]
pub struct HasItem {
    index: i64,
    submatcher: MatcherRef,
}

impl HasItem {
    #[must_use]
    pub fn new(index: i64, submatcher: MatcherRef) -> HasItem {
        HasItem { index, submatcher }
    }
}

impl Matcher for HasItem {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Candidate::List(items) = candidate else {
            return Ok(None);
        };
        let len = items.len() as i64;
        let index = if self.index < 0 { len + self.index } else { self.index };
        if index < 0 || index >= len {
            return Ok(None);
        }
        let Some(inner) = self.submatcher.try_match(ctx, &items[index as usize])? else {
            return Ok(None);
        };
        Ok(Some(MatchResult {
            matched: create_match(ctx.parsed, candidate),
            bindings: inner.bindings,
            replacements: inner.replacements,
        }))
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
    }
}

/// Matches a sequence of exactly this shape, positionally.
#[derive(Debug)]
pub struct ItemsAre {
    items: Vec<MatcherRef>,
}

impl ItemsAre {
    #[must_use]
    pub fn new(items: Vec<MatcherRef>) -> ItemsAre {
        ItemsAre { items }
    }
}

impl Matcher for ItemsAre {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Candidate::List(items) = candidate else {
            return Ok(None);
        };
        if items.len() != self.items.len() {
            return Ok(None);
        }
        let mut bindings = Bindings::new();
        let mut replacements = Replacements::new();
        for (sub, item) in self.items.iter().zip(items) {
            let Some(result) = sub.try_match(ctx, item)? else {
                return Ok(None);
            };
            if !merge_step(ctx, &mut bindings, &result.bindings)? {
                return Ok(None);
            }
            replacements.extend(result.replacements);
        }
        Ok(Some(MatchResult {
            matched: create_match(ctx.parsed, candidate),
            bindings,
            replacements,
        }))
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        for sub in &self.items {
            sub.collect_bind_variables(names);
        }
    }
}

/// One element of a [`Glob`] pattern.
#[derive(Debug, Clone)]
pub enum GlobItem {
    Matcher(MatcherRef),
    /// Matches any run of elements, including none.
    Star,
}

/// Sequence matcher with wildcard gaps.
///
/// Placement is leftmost-greedy and linear: each block of consecutive
/// matchers is placed at the earliest offset where it fits, except that a
/// final block not followed by a wildcard is anchored to the end. No
/// exponential backtracking.
#[derive(Debug)]
pub struct Glob {
    blocks: Vec<Vec<MatcherRef>>,
    leading_star: bool,
    trailing_star: bool,
}

impl Glob {
    #[must_use]
    pub fn new(items: Vec<GlobItem>) -> Glob {
        let mut blocks = Vec::new();
        let mut current: Vec<MatcherRef> = Vec::new();
        let mut leading_star = false;
        let mut trailing_star = false;
        for item in items {
            match item {
                GlobItem::Matcher(m) => {
                    current.push(m);
                    trailing_star = false;
                }
                GlobItem::Star => {
                    if current.is_empty() && blocks.is_empty() {
                        leading_star = true;
                    }
                    if !current.is_empty() {
                        blocks.push(std::mem::take(&mut current));
                    }
                    trailing_star = true;
                }
            }
        }
        if !current.is_empty() {
            blocks.push(current);
        }
        Glob {
            blocks,
            leading_star,
            trailing_star,
        }
    }

    /// Tries the block at `start`; on success returns the merged bindings.
    fn match_block_at(
        &self,
        ctx: &MatchContext<'_>,
        block: &[MatcherRef],
        items: &[Candidate],
        start: usize,
        bindings: &Bindings,
        replacements: &mut Replacements,
    ) -> Result<Option<Bindings>, MatchError> {
        let mut trial = bindings.clone();
        let mut trial_replacements = Replacements::new();
        for (offset, sub) in block.iter().enumerate() {
            let Some(result) = sub.try_match(ctx, &items[start + offset])? else {
                return Ok(None);
            };
            if !merge_step(ctx, &mut trial, &result.bindings)? {
                return Ok(None);
            }
            trial_replacements.extend(result.replacements);
        }
        replacements.extend(trial_replacements);
        Ok(Some(trial))
    }
}

impl Matcher for Glob {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Candidate::List(items) = candidate else {
            return Ok(None);
        };
        if self.blocks.is_empty() {
            // Pure-wildcard patterns match anything; the empty pattern
            // matches only the empty sequence.
            if self.leading_star || self.trailing_star || items.is_empty() {
                return Ok(Some(MatchResult::new(create_match(ctx.parsed, candidate))));
            }
            return Ok(None);
        }
        let mut bindings = Bindings::new();
        let mut replacements = Replacements::new();
        let mut pos = 0usize;
        let last = self.blocks.len() - 1;
        for (bi, block) in self.blocks.iter().enumerate() {
            let anchored_start = bi == 0 && !self.leading_star;
            let anchored_end = bi == last && !self.trailing_star;
            if items.len() < pos + block.len() {
                return Ok(None);
            }
            let (lo, hi) = if anchored_start {
                (0, 0)
            } else if anchored_end {
                let start = items.len() - block.len();
                if start < pos {
                    return Ok(None);
                }
                (start, start)
            } else {
                (pos, items.len() - block.len())
            };
            let mut placed = None;
            for start in lo..=hi {
                if let Some(merged) =
                    self.match_block_at(ctx, block, items, start, &bindings, &mut replacements)?
                {
                    placed = Some((start, merged));
                    break;
                }
            }
            let Some((start, merged)) = placed else {
                return Ok(None);
            };
            bindings = merged;
            pos = start + block.len();
        }
        if !self.trailing_star && pos != items.len() {
            return Ok(None);
        }
        Ok(Some(MatchResult {
            matched: create_match(ctx.parsed, candidate),
            bindings,
            replacements,
        }))
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        for block in &self.blocks {
            for sub in block {
                sub.collect_bind_variables(names);
            }
        }
    }
}

/// Applies full-match regex semantics to the span matched by the submatcher.
/// Named groups become extra span bindings.
#[derive(Debug)]
pub struct MatchesRegex {
    re: Regex,
    submatcher: MatcherRef,
}

impl MatchesRegex {
    pub fn new(pattern: &str, submatcher: MatcherRef) -> Result<MatchesRegex, MatchError> {
        let re = Regex::new(&format!(r"\A(?:{pattern})\z")).map_err(|e| {
            MatchError::InvalidRegex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(MatchesRegex { re, submatcher })
    }
}

impl Matcher for MatchesRegex {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Some(result) = self.submatcher.try_match(ctx, candidate)? else {
            return Ok(None);
        };
        let Some(span) = result.matched.span() else {
            return Ok(None);
        };
        let text = ctx.parsed.slice(span);
        let Some(caps) = self.re.captures(text) else {
            return Ok(None);
        };
        let mut group_bindings = Bindings::new();
        for name in self.re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                let group_span = Span::new(span.start + m.start(), span.start + m.end());
                group_bindings.insert(
                    name.to_string(),
                    BoundValue::new(Match::Span {
                        string: m.as_str().to_string(),
                        span: group_span,
                    }),
                );
            }
        }
        let mut bindings = result.bindings;
        if !merge_step(ctx, &mut bindings, &group_bindings)? {
            return Ok(None);
        }
        Ok(Some(MatchResult {
            matched: result.matched,
            bindings,
            replacements: result.replacements,
        }))
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.submatcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
        names.extend(self.re.capture_names().flatten().map(str::to_string));
    }
}

/// Matches (emptily) iff the regex matches anywhere in the unit's text.
/// The search runs once per (unit, regex) and is memoized for the session.
#[derive(Debug)]
pub struct FileMatchesRegex {
    re: Regex,
}

impl FileMatchesRegex {
    pub fn new(pattern: &str) -> Result<FileMatchesRegex, MatchError> {
        let re = Regex::new(pattern).map_err(|e| MatchError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(FileMatchesRegex { re })
    }
}

impl Matcher for FileMatchesRegex {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        _candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Some(groups) = ctx.memoized_file_search(&self.re) else {
            return Ok(None);
        };
        let mut result = MatchResult::new(Match::Empty);
        for (name, span) in groups {
            let string = ctx.parsed.slice(span).to_string();
            result
                .bindings
                .insert(name, BoundValue::new(Match::Span { string, span }));
        }
        Ok(Some(result))
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        names.extend(self.re.capture_names().flatten().map(str::to_string));
    }
}

/// Attaches replacement templates to the submatcher's result. Keys must be
/// metavariables the submatcher can bind, or reserved system labels.
/// On nesting, the outer map wins for shared labels.
#[derive(Debug)]
pub struct WithReplacements {
    submatcher: MatcherRef,
    replacements: Replacements,
}

impl WithReplacements {
    pub fn new(
        submatcher: MatcherRef,
        replacements: Replacements,
    ) -> Result<WithReplacements, MatchError> {
        let known = bind_variables(submatcher.as_ref());
        for label in replacements.keys() {
            if !known.contains(label) && !label.starts_with("__") {
                return Err(MatchError::UnknownReplacementLabel {
                    name: label.clone(),
                });
            }
        }
        Ok(WithReplacements {
            submatcher,
            replacements,
        })
    }
}

impl Matcher for WithReplacements {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Some(mut result) = self.submatcher.try_match(ctx, candidate)? else {
            return Ok(None);
        };
        result.replacements.extend(
            self.replacements
                .iter()
                .map(|(k, v)| (k.clone(), Rc::clone(v))),
        );
        Ok(Some(result))
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.submatcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
    }
}

/// `AnyOf(inner, wrap(inner))` convenience: a thing, or that thing wrapped
/// once.
pub fn maybe_wrapped(
    inner: MatcherRef,
    wrap: impl FnOnce(MatcherRef) -> MatcherRef,
) -> AnyOf {
    let wrapped = wrap(Rc::clone(&inner));
    AnyOf::new(vec![inner, wrapped])
}

/// A matcher wrapped in `wrap` zero or more times (`x`, `x.a`, `x.a.b`, …).
///
/// Construction does not recurse: the self-reference inside `wrap` is a weak
/// handle, dereferenced only while matching, and static metavariable
/// computation does not follow it.
#[derive(Debug)]
pub struct RecursivelyWrapped {
    options: Vec<MatcherRef>,
}

pub fn recursively_wrapped(
    inner: MatcherRef,
    wrap: impl FnOnce(MatcherRef) -> MatcherRef,
) -> Rc<RecursivelyWrapped> {
    Rc::new_cyclic(|weak: &Weak<RecursivelyWrapped>| {
        let recurse: MatcherRef = Rc::new(Recurse {
            target: weak.clone(),
        });
        RecursivelyWrapped {
            options: vec![inner, wrap(recurse)],
        }
    })
}

impl Matcher for RecursivelyWrapped {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        for sub in &self.options {
            if let Some(result) = sub.try_match(ctx, candidate)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        for sub in &self.options {
            sub.collect_bind_variables(names);
        }
    }
}

/// The lazy self-reference inside a [`RecursivelyWrapped`] matcher.
struct Recurse {
    target: Weak<RecursivelyWrapped>,
}

impl std::fmt::Debug for Recurse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Recurse")
    }
}

impl Matcher for Recurse {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        match self.target.upgrade() {
            Some(target) => target.try_match(ctx, candidate),
            None => Ok(None),
        }
    }

    // Deliberately does not forward: following the self-reference would
    // never terminate, and the wrapped options are walked by the parent.
    fn collect_bind_variables(&self, _names: &mut BTreeSet<String>) {}
}

/// Adapts a whole-unit text transform into a matcher.
///
/// Matches only the root node. The transform's output is line-diffed against
/// the original; each contiguous changed region becomes a `__rewriteN` span
/// binding with a literal replacement template attached.
pub struct ExternalRewrite {
    name: String,
    transform: Box<dyn Fn(&str) -> Option<String>>,
}

impl ExternalRewrite {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        transform: impl Fn(&str) -> Option<String> + 'static,
    ) -> ExternalRewrite {
        ExternalRewrite {
            name: name.into(),
            transform: Box::new(transform),
        }
    }
}

impl std::fmt::Debug for ExternalRewrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalRewrite")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

impl Matcher for ExternalRewrite {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        if *candidate != Candidate::Node(ctx.tree.root) {
            return Ok(None);
        }
        let old = ctx.parsed.text();
        let Some(new) = (self.transform)(old) else {
            return Ok(None);
        };
        if new == old {
            return Ok(None);
        }
        let old_starts = line_starts(old);
        let new_starts = line_starts(new.as_str());
        let byte_at = |starts: &[usize], text: &str, line: usize| {
            starts.get(line).copied().unwrap_or(text.len())
        };

        // Merge adjacent non-equal diff ops into contiguous regions.
        let diff = TextDiff::from_lines(old, new.as_str());
        let mut regions: Vec<(Span, Span)> = Vec::new();
        for op in diff.ops() {
            if matches!(op, DiffOp::Equal { .. }) {
                continue;
            }
            let old_span = Span::new(
                byte_at(&old_starts, old, op.old_range().start),
                byte_at(&old_starts, old, op.old_range().end),
            );
            let new_span = Span::new(
                byte_at(&new_starts, &new, op.new_range().start),
                byte_at(&new_starts, &new, op.new_range().end),
            );
            match regions.last_mut() {
                Some((prev_old, prev_new)) if prev_old.end == old_span.start => {
                    prev_old.end = old_span.end;
                    prev_new.end = new_span.end;
                }
                _ => regions.push((old_span, new_span)),
            }
        }

        let mut result = MatchResult::new(create_match(ctx.parsed, candidate));
        for (i, (old_span, new_span)) in regions.into_iter().enumerate() {
            let label = format!("__rewrite{i}");
            result.bindings.insert(
                label.clone(),
                BoundValue::new(Match::Span {
                    string: old[old_span.start..old_span.end].to_string(),
                    span: old_span,
                }),
            );
            result.replacements.insert(
                label,
                Rc::new(LiteralTemplate::new(&new[new_span.start..new_span.end])),
            );
        }
        Ok(Some(result))
    }

    fn type_filter(&self) -> Option<KindSet> {
        Some(KindSet::only(KindTag::Module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::engine::MatchSession;
    use crate::py::ParsedFile;

    macro_rules! test_ctx {
        ($ctx:ident, $text:expr) => {
            let parsed = ParsedFile::parse($text, "t.py").unwrap();
            let tree = parsed.tree().unwrap();
            let session = MatchSession::new();
            let $ctx = MatchContext::new(&parsed, tree, &session);
        };
    }

    fn s(text: &str) -> Candidate {
        Candidate::Str(text.to_string())
    }

    fn eq(text: &str) -> MatcherRef {
        Rc::new(Equals::new(s(text)))
    }

    #[test]
    fn test_anything_and_equals() {
        test_ctx!(ctx, "x\n");
        assert!(Anything.try_match(&ctx, &s("foo")).unwrap().is_some());
        assert!(eq("foo").try_match(&ctx, &s("foo")).unwrap().is_some());
        assert!(eq("foo").try_match(&ctx, &s("bar")).unwrap().is_none());
    }

    #[test]
    fn test_unless_inverts_and_discards_bindings() {
        test_ctx!(ctx, "x\n");
        let bound = Rc::new(Bind::simple("v", eq("foo")).unwrap());
        let unless = Unless::new(bound);
        assert!(unless.try_match(&ctx, &s("foo")).unwrap().is_none());
        let result = unless.try_match(&ctx, &s("bar")).unwrap().unwrap();
        assert!(result.bindings.is_empty());
    }

    #[test]
    fn test_bind_rejects_reserved_and_malformed_names() {
        assert!(Bind::simple("ok_name", eq("x")).is_ok());
        assert!(Bind::simple("__reserved", eq("x")).is_err());
        assert!(Bind::simple("1bad", eq("x")).is_err());
        assert!(Bind::system("__root", eq("x")).is_ok());
        assert!(Bind::system("plain", eq("x")).is_err());
    }

    #[test]
    fn test_all_of_merges_bindings() {
        test_ctx!(ctx, "x\n");
        let m = AllOf::new(vec![
            Rc::new(Bind::simple("a", Rc::new(Anything)).unwrap()),
            Rc::new(Bind::simple("b", Rc::new(Anything)).unwrap()),
        ]);
        let result = m.try_match(&ctx, &s("v")).unwrap().unwrap();
        assert_eq!(result.bindings.len(), 2);
        assert!(m.try_match(&ctx, &s("v")).unwrap().is_some());
    }

    #[test]
    fn test_any_of_first_success_wins() {
        test_ctx!(ctx, "x\n");
        let m = AnyOf::new(vec![
            Rc::new(Bind::simple("first", eq("v")).unwrap()),
            Rc::new(Bind::simple("second", Rc::new(Anything)).unwrap()),
        ]);
        let result = m.try_match(&ctx, &s("v")).unwrap().unwrap();
        assert!(result.bindings.contains_key("first"));
        let result = m.try_match(&ctx, &s("other")).unwrap().unwrap();
        assert!(result.bindings.contains_key("second"));
    }

    #[test]
    fn test_once_matches_after_first_success() {
        test_ctx!(ctx, "x\n");
        let m = Once::new("key", eq("trigger"));
        assert!(m.try_match(&ctx, &s("other")).unwrap().is_none());
        assert!(m.try_match(&ctx, &s("trigger")).unwrap().is_some());
        // Now matches anything, emptily, within the same attempt.
        let result = m.try_match(&ctx, &s("other")).unwrap().unwrap();
        assert_eq!(result.matched, Match::Empty);
    }

    #[test]
    fn test_contains_searches_subtree() {
        test_ctx!(ctx, "f(g(x))\n");
        let m = Contains::new(eq("x"));
        let root = Candidate::Node(ctx.tree.root);
        assert!(m.try_match(&ctx, &root).unwrap().is_some());
        assert!(Contains::new(eq("zzz")).try_match(&ctx, &root).unwrap().is_none());
    }

    #[test]
    fn test_has_item_with_negative_index() {
        test_ctx!(ctx, "x\n");
        let items = Candidate::List(vec![s("a"), s("b"), s("c")]);
        assert!(HasItem::new(-1, eq("c")).try_match(&ctx, &items).unwrap().is_some());
        assert!(HasItem::new(0, eq("a")).try_match(&ctx, &items).unwrap().is_some());
        assert!(HasItem::new(3, eq("a")).try_match(&ctx, &items).unwrap().is_none());
        assert!(HasItem::new(-4, eq("a")).try_match(&ctx, &items).unwrap().is_none());
        assert!(HasItem::new(0, eq("a")).try_match(&ctx, &s("a")).unwrap().is_none());
    }

    #[test]
    fn test_items_are_is_exact_length() {
        test_ctx!(ctx, "x\n");
        let m = ItemsAre::new(vec![eq("a"), eq("b")]);
        assert!(m.try_match(&ctx, &Candidate::List(vec![s("a"), s("b")])).unwrap().is_some());
        assert!(m.try_match(&ctx, &Candidate::List(vec![s("a")])).unwrap().is_none());
        assert!(m
            .try_match(&ctx, &Candidate::List(vec![s("a"), s("b"), s("c")]))
            .unwrap()
            .is_none());
    }

    fn glob(items: Vec<GlobItem>) -> Glob {
        Glob::new(items)
    }

    fn gm(text: &str) -> GlobItem {
        GlobItem::Matcher(eq(text))
    }

    #[test]
    fn test_glob_interior_wildcard() {
        test_ctx!(ctx, "x\n");
        let m = glob(vec![gm("A"), GlobItem::Star, gm("B")]);
        let hit = Candidate::List(vec![s("A"), s("X"), s("Y"), s("B")]);
        assert!(m.try_match(&ctx, &hit).unwrap().is_some());
        let no_tail = Candidate::List(vec![s("A"), s("X"), s("Y")]);
        assert!(m.try_match(&ctx, &no_tail).unwrap().is_none());
        let bad_head = Candidate::List(vec![s("X"), s("A"), s("B")]);
        assert!(m.try_match(&ctx, &bad_head).unwrap().is_none());
    }

    #[test]
    fn test_glob_anchoring() {
        test_ctx!(ctx, "x\n");
        // No wildcards: exact sequence.
        let exact = glob(vec![gm("A"), gm("B")]);
        assert!(exact
            .try_match(&ctx, &Candidate::List(vec![s("A"), s("B")]))
            .unwrap()
            .is_some());
        assert!(exact
            .try_match(&ctx, &Candidate::List(vec![s("A"), s("B"), s("C")]))
            .unwrap()
            .is_none());
        // Trailing wildcard frees the tail.
        let prefix = glob(vec![gm("A"), GlobItem::Star]);
        assert!(prefix
            .try_match(&ctx, &Candidate::List(vec![s("A"), s("B"), s("C")]))
            .unwrap()
            .is_some());
        // Leading wildcard frees the head.
        let suffix = glob(vec![GlobItem::Star, gm("C")]);
        assert!(suffix
            .try_match(&ctx, &Candidate::List(vec![s("A"), s("B"), s("C")]))
            .unwrap()
            .is_some());
        assert!(suffix
            .try_match(&ctx, &Candidate::List(vec![s("C"), s("B")]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_glob_wildcard_only_and_empty() {
        test_ctx!(ctx, "x\n");
        let star = glob(vec![GlobItem::Star]);
        assert!(star.try_match(&ctx, &Candidate::List(vec![])).unwrap().is_some());
        assert!(star.try_match(&ctx, &Candidate::List(vec![s("a")])).unwrap().is_some());
        let empty = glob(vec![]);
        assert!(empty.try_match(&ctx, &Candidate::List(vec![])).unwrap().is_some());
        assert!(empty.try_match(&ctx, &Candidate::List(vec![s("a")])).unwrap().is_none());
    }

    #[test]
    fn test_matches_regex_is_full_match_with_groups() {
        test_ctx!(ctx, "abc = 1\n");
        let root = Candidate::Node(ctx.tree.root);
        let m = MatchesRegex::new(r"(?s)(?P<lhs>\w+) = .*", Rc::new(Anything)).unwrap();
        let result = m.try_match(&ctx, &root).unwrap().unwrap();
        let lhs = &result.bindings["lhs"];
        assert_eq!(lhs.value.string(), Some("abc"));
        assert_eq!(lhs.value.span(), Some(Span::new(0, 3)));
        // Search semantics would accept this; full-match must not.
        let partial = MatchesRegex::new(r"abc", Rc::new(Anything)).unwrap();
        assert!(partial.try_match(&ctx, &root).unwrap().is_none());
    }

    #[test]
    fn test_file_matches_regex_is_empty_and_memoized() {
        test_ctx!(ctx, "alpha = 1\n");
        let m = FileMatchesRegex::new(r"(?P<w>alp\w+)").unwrap();
        let result = m.try_match(&ctx, &s("anything")).unwrap().unwrap();
        assert_eq!(result.matched, Match::Empty);
        assert_eq!(result.bindings["w"].value.span(), Some(Span::new(0, 5)));
        assert!(FileMatchesRegex::new("zzz")
            .unwrap()
            .try_match(&ctx, &s("anything"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_with_replacements_validates_labels() {
        let bound: MatcherRef = Rc::new(Bind::simple("v", eq("x")).unwrap());
        let template: Rc<dyn crate::template::Template> = Rc::new(LiteralTemplate::new("y"));
        assert!(WithReplacements::new(
            Rc::clone(&bound),
            Replacements::from([("v".to_string(), Rc::clone(&template))]),
        )
        .is_ok());
        assert!(WithReplacements::new(
            Rc::clone(&bound),
            Replacements::from([("__system".to_string(), Rc::clone(&template))]),
        )
        .is_ok());
        assert!(WithReplacements::new(
            bound,
            Replacements::from([("unbound".to_string(), template)]),
        )
        .is_err());
    }

    #[test]
    fn test_recursively_wrapped_matches_at_any_depth() {
        test_ctx!(ctx, "x\n");
        let m = recursively_wrapped(eq("x"), |inner| Rc::new(HasItem::new(0, inner)));
        assert!(m.try_match(&ctx, &s("x")).unwrap().is_some());
        let once = Candidate::List(vec![s("x")]);
        assert!(m.try_match(&ctx, &once).unwrap().is_some());
        let twice = Candidate::List(vec![once]);
        assert!(m.try_match(&ctx, &twice).unwrap().is_some());
        assert!(m.try_match(&ctx, &s("y")).unwrap().is_none());
        // Static variable computation terminates despite the self-reference.
        assert!(bind_variables(m.as_ref()).is_empty());
    }

    #[test]
    fn test_maybe_wrapped() {
        test_ctx!(ctx, "x\n");
        let m = maybe_wrapped(eq("x"), |inner| Rc::new(HasItem::new(0, inner)));
        assert!(m.try_match(&ctx, &s("x")).unwrap().is_some());
        assert!(m.try_match(&ctx, &Candidate::List(vec![s("x")])).unwrap().is_some());
        let twice = Candidate::List(vec![Candidate::List(vec![s("x")])]);
        assert!(m.try_match(&ctx, &twice).unwrap().is_none());
    }

    #[test]
    fn test_external_rewrite_produces_labeled_regions() {
        test_ctx!(ctx, "a = 1\nb = 2\nc = 3\n");
        let m = ExternalRewrite::new("bump", |text: &str| {
            Some(text.replace("b = 2", "b = 20"))
        });
        let result = m
            .try_match(&ctx, &Candidate::Node(ctx.tree.root))
            .unwrap()
            .unwrap();
        assert_eq!(result.bindings.len(), 1);
        let span = result.bindings["__rewrite0"].value.span().unwrap();
        assert_eq!(span, Span::new(6, 12));
        assert!(result.replacements.contains_key("__rewrite0"));
        // An unchanged unit is not a match.
        let noop = ExternalRewrite::new("noop", |text: &str| Some(text.to_string()));
        assert!(noop
            .try_match(&ctx, &Candidate::Node(ctx.tree.root))
            .unwrap()
            .is_none());
    }
}
