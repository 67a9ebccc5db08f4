//! Grammar-aware matchers: per-kind node patterns, the exact-shape compiler,
//! the `$metavariable` pattern compiler, and ancestry matchers.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;

use crate::py::errors::error_at;
use crate::py::{
    parse_module, tokenize, Arena, Candidate, KindTag, NodeId, NodeKind, ParseError, Span,
    TokenKind,
};

use super::base::{recursively_wrapped, Anything, Bind, Equals, ItemsAre, Rebind, RecursivelyWrapped};
use super::engine::{KindSet, MatchContext, Matcher, MatcherRef};
use super::model::{
    create_match, merge_bindings, BindConflict, BindMerge, MatchError, MatchResult,
};

/// Matches a node of one kind, running submatchers against named fields.
/// Unlisted fields are unconstrained.
#[derive(Debug)]
pub struct NodePattern {
    tag: KindTag,
    fields: Vec<(&'static str, MatcherRef)>,
}

impl NodePattern {
    #[must_use]
    pub fn new(tag: KindTag, fields: Vec<(&'static str, MatcherRef)>) -> NodePattern {
        NodePattern { tag, fields }
    }
}

impl Matcher for NodePattern {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Candidate::Node(id) = candidate else {
            return Ok(None);
        };
        let node = ctx.tree.arena.node(*id);
        if node.tag() != self.tag {
            return Ok(None);
        }
        let mut result = MatchResult::new(create_match(ctx.parsed, candidate));
        for (name, sub) in &self.fields {
            let Some(value) = node.field(name) else {
                return Ok(None);
            };
            let Some(inner) = sub.try_match(ctx, &value)? else {
                return Ok(None);
            };
            match merge_bindings(&ctx.tree.arena, &result.bindings, &inner.bindings)? {
                Some(merged) => result.bindings = merged,
                None => return Ok(None),
            }
            result.replacements.extend(inner.replacements);
        }
        Ok(Some(result))
    }

    fn type_filter(&self) -> Option<KindSet> {
        Some(KindSet::only(self.tag))
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        for (_, sub) in &self.fields {
            sub.collect_bind_variables(names);
        }
    }
}

/// Shorthand for building a [`NodePattern`]:
/// `node_pattern!(BinOp { op: eq("+"), left: m })`.
macro_rules! node_pattern {
    ($tag:ident { $($field:ident : $m:expr),* $(,)? }) => {
        $crate::matcher::syntax::NodePattern::new(
            $crate::py::KindTag::$tag,
            vec![$((stringify!($field), $m)),*],
        )
    };
}
pub(crate) use node_pattern;

/// Compiles an exact-shape matcher for an existing subtree: every node
/// recurses into its own fields, plain values become equality checks, and
/// `Name` leaves found in `variables` are replaced by that matcher. Name
/// load/store context is left unconstrained.
#[must_use]
pub fn node_matcher(
    arena: &Arena,
    candidate: &Candidate,
    variables: &HashMap<String, MatcherRef>,
) -> MatcherRef {
    match candidate {
        Candidate::Node(id) => {
            let node = arena.node(*id);
            if let NodeKind::Name { id: name, .. } = &node.kind {
                if let Some(m) = variables.get(name) {
                    return Rc::clone(m);
                }
            }
            let skip_ctx = node.tag() == KindTag::Name;
            let mut fields = Vec::new();
            for (fname, value) in node.fields() {
                if skip_ctx && fname == "ctx" {
                    continue;
                }
                fields.push((fname, node_matcher(arena, &value, variables)));
            }
            Rc::new(NodePattern::new(node.tag(), fields))
        }
        Candidate::List(items) => Rc::new(ItemsAre::new(
            items
                .iter()
                .map(|item| node_matcher(arena, item, variables))
                .collect(),
        )),
        other => Rc::new(Equals::new(other.clone())),
    }
}

/// Exact-shape matcher for a whole existing node, with no metavariables.
#[must_use]
pub fn ast_matcher(arena: &Arena, id: NodeId) -> MatcherRef {
    node_matcher(arena, &Candidate::Node(id), &HashMap::new())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("pattern must contain exactly one statement, found {count}")]
    NotSingleStatement { count: usize },
    #[error("pattern is not a single expression")]
    NotExpression,
    #[error("metavariable `${name}` does not appear in a matchable position")]
    UnmatchablePlaceholder { name: String },
    #[error("restriction names unknown metavariable `${name}`")]
    UnknownRestriction { name: String },
}

/// Which construct a pattern must reduce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Expr,
    Stmt,
    Module,
}

const PATTERN_FILENAME: &str = "<pattern>";

/// A `$metavariable` occurrence in the pattern source.
#[derive(Debug)]
pub(crate) struct Placeholder {
    pub(crate) span: Span,
    pub(crate) name: String,
}

/// Finds every `$name` occurrence in pattern (or template) source. `$` is
/// only recognized outside string literals and comments, and must touch the
/// identifier that follows it.
pub(crate) fn scan_placeholders(
    pattern: &str,
    filename: &str,
) -> Result<Vec<Placeholder>, PatternError> {
    let lexed = tokenize(pattern, filename)?;
    let mut out = Vec::new();
    let mut i = 0;
    while i < lexed.tokens.len() {
        let tok = lexed.tokens[i];
        if tok.kind == TokenKind::Unknown && tok.text(pattern) == "$" {
            let next = lexed.tokens.get(i + 1).copied();
            let valid = next.is_some_and(|n| n.kind == TokenKind::Ident);
            if !valid || next.is_some_and(|n| n.span.start != tok.span.end) {
                return Err(error_at(
                    filename,
                    pattern,
                    tok.span.start,
                    "`$` must be immediately followed by a metavariable name".into(),
                )
                .into());
            }
            let next = next.unwrap_or(tok);
            out.push(Placeholder {
                span: Span::new(tok.span.start, next.span.end),
                name: next.text(pattern).to_string(),
            });
            i += 2;
            continue;
        }
        i += 1;
    }
    Ok(out)
}

/// Picks fresh identifiers for the placeholders, avoiding every identifier
/// already present in the pattern.
fn rename_placeholders(
    pattern: &str,
    placeholders: &[Placeholder],
) -> (String, HashMap<String, String>) {
    let taken: HashSet<&str> = pattern
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .collect();
    let mut renames: HashMap<String, String> = HashMap::new();
    for p in placeholders {
        if renames.contains_key(&p.name) {
            continue;
        }
        let mut candidate = format!("gensym_{}", p.name);
        let mut counter = 0usize;
        while taken.contains(candidate.as_str()) || renames.values().any(|v| *v == candidate) {
            candidate = format!("gensym{counter}_{}", p.name);
            counter += 1;
        }
        renames.insert(p.name.clone(), candidate);
    }
    let mut renamed = String::with_capacity(pattern.len());
    let mut pos = 0;
    for p in placeholders {
        renamed.push_str(&pattern[pos..p.span.start]);
        renamed.push_str(&renames[&p.name]);
        pos = p.span.end;
    }
    renamed.push_str(&pattern[pos..]);
    (renamed, renames)
}

/// Compiles a `$metavariable` pattern into a matcher.
///
/// Placeholders become `Bind(name, restriction)` under an equivalent-tree
/// conflict policy, so `$x + $x` demands two structurally equivalent
/// operands; the whole pattern is rebound to merge-always + keep-last.
pub fn compile_pattern(
    pattern: &str,
    kind: PatternKind,
    restrictions: &HashMap<String, MatcherRef>,
) -> Result<MatcherRef, PatternError> {
    let placeholders = scan_placeholders(pattern, PATTERN_FILENAME)?;
    let (renamed, renames) = rename_placeholders(pattern, &placeholders);
    for key in restrictions.keys() {
        if !renames.contains_key(key) {
            return Err(PatternError::UnknownRestriction { name: key.clone() });
        }
    }

    let out = parse_module(&renamed, PATTERN_FILENAME)?;
    let root = pull_root(&out.arena, out.root, kind)?;

    let reverse: HashMap<&str, &str> = renames
        .iter()
        .map(|(orig, fresh)| (fresh.as_str(), orig.as_str()))
        .collect();
    let mut variables: HashMap<String, MatcherRef> = HashMap::new();
    for (orig, fresh) in &renames {
        let restriction = restrictions
            .get(orig)
            .cloned()
            .unwrap_or_else(|| Rc::new(Anything) as MatcherRef);
        let bind = Bind::new(
            orig.clone(),
            restriction,
            BindConflict::MergeEquivalentAst,
            BindMerge::KeepLast,
        )?;
        variables.insert(fresh.clone(), Rc::new(bind) as MatcherRef);
    }

    // Placeholders the grammar swallowed (e.g. `foo.$bar`, where the name
    // becomes a plain string field) never surface as Name leaves; that is a
    // configuration error, not a silently weaker pattern.
    let mut surfaced: HashSet<&str> = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if let NodeKind::Name { id: name, .. } = &out.arena.node(id).kind {
            if let Some(orig) = reverse.get(name.as_str()) {
                surfaced.insert(orig);
            }
        }
        stack.extend(out.arena.node(id).child_ids());
    }
    for name in renames.keys() {
        if !surfaced.contains(name.as_str()) {
            return Err(PatternError::UnmatchablePlaceholder { name: name.clone() });
        }
    }

    let inner = node_matcher(&out.arena, &Candidate::Node(root), &variables);
    Ok(Rc::new(Rebind::new(
        inner,
        Some(BindConflict::Merge),
        Some(BindMerge::KeepLast),
    )))
}

fn pull_root(arena: &Arena, module: NodeId, kind: PatternKind) -> Result<NodeId, PatternError> {
    if kind == PatternKind::Module {
        return Ok(module);
    }
    let NodeKind::Module { body } = &arena.node(module).kind else {
        return Err(PatternError::NotSingleStatement { count: 0 });
    };
    if body.len() != 1 {
        return Err(PatternError::NotSingleStatement { count: body.len() });
    }
    let stmt = body[0];
    match kind {
        PatternKind::Stmt => Ok(stmt),
        PatternKind::Expr => match &arena.node(stmt).kind {
            NodeKind::ExprStmt { value } => Ok(*value),
            _ => Err(PatternError::NotExpression),
        },
        PatternKind::Module => unreachable!(),
    }
}

/// An expression pattern with `$metavariables`, e.g. `$x + $x`.
#[derive(Debug)]
pub struct ExprPattern {
    matcher: MatcherRef,
}

impl ExprPattern {
    pub fn new(pattern: &str) -> Result<ExprPattern, PatternError> {
        ExprPattern::with_restrictions(pattern, &HashMap::new())
    }

    pub fn with_restrictions(
        pattern: &str,
        restrictions: &HashMap<String, MatcherRef>,
    ) -> Result<ExprPattern, PatternError> {
        Ok(ExprPattern {
            matcher: compile_pattern(pattern, PatternKind::Expr, restrictions)?,
        })
    }
}

impl Matcher for ExprPattern {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        self.matcher.try_match(ctx, candidate)
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.matcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.matcher.collect_bind_variables(names);
    }
}

/// A single-statement pattern with `$metavariables`, e.g. `return $x`.
#[derive(Debug)]
pub struct StmtPattern {
    matcher: MatcherRef,
}

impl StmtPattern {
    pub fn new(pattern: &str) -> Result<StmtPattern, PatternError> {
        StmtPattern::with_restrictions(pattern, &HashMap::new())
    }

    pub fn with_restrictions(
        pattern: &str,
        restrictions: &HashMap<String, MatcherRef>,
    ) -> Result<StmtPattern, PatternError> {
        Ok(StmtPattern {
            matcher: compile_pattern(pattern, PatternKind::Stmt, restrictions)?,
        })
    }
}

impl Matcher for StmtPattern {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        self.matcher.try_match(ctx, candidate)
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.matcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.matcher.collect_bind_variables(names);
    }
}

/// A whole-module pattern. Used by the template verifier to re-match
/// substituted candidates.
#[derive(Debug)]
pub struct ModulePattern {
    matcher: MatcherRef,
}

impl ModulePattern {
    pub fn new(pattern: &str) -> Result<ModulePattern, PatternError> {
        ModulePattern::with_restrictions(pattern, &HashMap::new())
    }

    pub fn with_restrictions(
        pattern: &str,
        restrictions: &HashMap<String, MatcherRef>,
    ) -> Result<ModulePattern, PatternError> {
        Ok(ModulePattern {
            matcher: compile_pattern(pattern, PatternKind::Module, restrictions)?,
        })
    }
}

impl Matcher for ModulePattern {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        self.matcher.try_match(ctx, candidate)
    }

    fn type_filter(&self) -> Option<KindSet> {
        self.matcher.type_filter()
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.matcher.collect_bind_variables(names);
    }
}

/// Matches a node whose parent matches the submatcher. Bindings from the
/// parent match carry over.
#[derive(Debug)]
pub struct HasParent {
    submatcher: MatcherRef,
}

impl HasParent {
    #[must_use]
    pub fn new(submatcher: MatcherRef) -> HasParent {
        HasParent { submatcher }
    }
}

impl Matcher for HasParent {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Candidate::Node(id) = candidate else {
            return Ok(None);
        };
        let Some(parent) = ctx.tree.nav().parent(*id) else {
            return Ok(None);
        };
        let Some(inner) = self.submatcher.try_match(ctx, &Candidate::Node(parent))? else {
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

/// Matches a node with at least one direct child node that matches.
#[derive(Debug)]
pub struct HasChild {
    submatcher: MatcherRef,
}

impl HasChild {
    #[must_use]
    pub fn new(submatcher: MatcherRef) -> HasChild {
        HasChild { submatcher }
    }
}

impl Matcher for HasChild {
    fn try_match(
        &self,
        ctx: &MatchContext<'_>,
        candidate: &Candidate,
    ) -> Result<Option<MatchResult>, MatchError> {
        let Candidate::Node(id) = candidate else {
            return Ok(None);
        };
        for child in ctx.tree.arena.node(*id).child_ids() {
            if let Some(inner) = self.submatcher.try_match(ctx, &Candidate::Node(child))? {
                return Ok(Some(MatchResult {
                    matched: create_match(ctx.parsed, candidate),
                    bindings: inner.bindings,
                    replacements: inner.replacements,
                }));
            }
        }
        Ok(None)
    }

    fn collect_bind_variables(&self, names: &mut BTreeSet<String>) {
        self.submatcher.collect_bind_variables(names);
    }
}

/// The node itself, or any ancestor, matches.
#[must_use]
pub fn is_or_has_ancestor(submatcher: MatcherRef) -> Rc<RecursivelyWrapped> {
    recursively_wrapped(submatcher, |recurse| Rc::new(HasParent::new(recurse)))
}

/// Some strict ancestor matches.
#[must_use]
pub fn has_ancestor(submatcher: MatcherRef) -> HasParent {
    HasParent::new(is_or_has_ancestor(submatcher))
}

/// The node itself, or any descendant, matches.
#[must_use]
pub fn is_or_has_descendant(submatcher: MatcherRef) -> Rc<RecursivelyWrapped> {
    recursively_wrapped(submatcher, |recurse| Rc::new(HasChild::new(recurse)))
}

/// Some strict descendant matches.
#[must_use]
pub fn has_descendant(submatcher: MatcherRef) -> HasChild {
    HasChild::new(is_or_has_descendant(submatcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::engine::find_iter;
    use crate::py::ParsedFile;

    fn matches(matcher: &dyn Matcher, text: &str) -> Vec<MatchResult> {
        let parsed = ParsedFile::parse(text, "t.py").unwrap();
        find_iter(matcher, &parsed)
    }

    #[test]
    fn test_node_pattern_macro() {
        let add = node_pattern!(BinOp {
            op: Rc::new(Equals::new(Candidate::Str("+".into()))) as MatcherRef,
        });
        assert_eq!(matches(&add, "a + b\n").len(), 1);
        assert_eq!(matches(&add, "a - b\n").len(), 0);
        assert_eq!(matches(&add, "(a + b) + c\n").len(), 1);
    }

    #[test]
    fn test_expr_pattern_binds_metavariables() {
        let pat = ExprPattern::new("f($a)").unwrap();
        let found = matches(&pat, "f(1)\ng(2)\nf(x)\n");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bindings["a"].value.string(), Some("1"));
        assert_eq!(found[1].bindings["a"].value.string(), Some("x"));
    }

    #[test]
    fn test_repeated_metavariable_requires_equivalence() {
        let pat = ExprPattern::new("$x + $x").unwrap();
        assert_eq!(matches(&pat, "a + a\n").len(), 1);
        assert_eq!(matches(&pat, "a + b\n").len(), 0);
        // Equivalence is structural, not textual identity of position.
        assert_eq!(matches(&pat, "f(1) + f(1)\n").len(), 1);
    }

    #[test]
    fn test_pattern_literals_must_match_exactly() {
        let pat = ExprPattern::new("foo.bar($x)").unwrap();
        assert_eq!(matches(&pat, "foo.bar(1)\n").len(), 1);
        assert_eq!(matches(&pat, "foo.baz(1)\n").len(), 0);
        assert_eq!(matches(&pat, "bar(1)\n").len(), 0);
    }

    #[test]
    fn test_restrictions_constrain_placeholders() {
        let num_only: MatcherRef = Rc::new(node_pattern!(Num {}));
        let restrictions = HashMap::from([("a".to_string(), num_only)]);
        let pat = ExprPattern::with_restrictions("f($a)", &restrictions).unwrap();
        assert_eq!(matches(&pat, "f(1)\nf(x)\n").len(), 1);
    }

    #[test]
    fn test_restriction_for_unknown_variable_errors() {
        let restrictions =
            HashMap::from([("nope".to_string(), Rc::new(Anything) as MatcherRef)]);
        assert_eq!(
            ExprPattern::with_restrictions("f($a)", &restrictions).unwrap_err(),
            PatternError::UnknownRestriction { name: "nope".into() }
        );
    }

    #[test]
    fn test_swallowed_placeholder_is_an_error() {
        // The attribute name is a plain string field, so the placeholder
        // cannot surface as a matchable expression.
        assert_eq!(
            ExprPattern::new("foo.$bar").unwrap_err(),
            PatternError::UnmatchablePlaceholder { name: "bar".into() }
        );
    }

    #[test]
    fn test_space_after_dollar_is_rejected() {
        assert!(matches!(
            ExprPattern::new("$ x + 1").unwrap_err(),
            PatternError::Parse(_)
        ));
    }

    #[test]
    fn test_pattern_shape_errors() {
        assert_eq!(
            StmtPattern::new("a = 1\nb = 2").unwrap_err(),
            PatternError::NotSingleStatement { count: 2 }
        );
        assert_eq!(
            ExprPattern::new("a = 1").unwrap_err(),
            PatternError::NotExpression
        );
    }

    #[test]
    fn test_stmt_pattern() {
        let pat = StmtPattern::new("return $x").unwrap();
        let found = matches(&pat, "def f():\n    return 1\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bindings["x"].value.string(), Some("1"));
    }

    #[test]
    fn test_gensym_avoids_existing_identifiers() {
        // The pattern already uses the name a naive renamer would pick.
        let pat = ExprPattern::new("gensym_a + $a").unwrap();
        let found = matches(&pat, "gensym_a + 1\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bindings["a"].value.string(), Some("1"));
    }

    #[test]
    fn test_ast_matcher_round_trip() {
        let out = parse_module("f(x) + 1\n", "t.py").unwrap();
        let expr = {
            let stmt = out.arena.node(out.root).child_ids()[0];
            out.arena.node(stmt).child_ids()[0]
        };
        let m = ast_matcher(&out.arena, expr);
        assert_eq!(matches(m.as_ref(), "f(x) + 1\n").len(), 1);
        assert_eq!(matches(m.as_ref(), "f(y) + 1\n").len(), 0);
        // Context differences are ignored, position is irrelevant.
        assert_eq!(matches(m.as_ref(), "g(f(x) + 1)\n").len(), 1);
    }

    #[test]
    fn test_has_parent() {
        let in_call = crate::matcher::base::AllOf::new(vec![
            Rc::new(ExprPattern::new("x").unwrap()) as MatcherRef,
            Rc::new(HasParent::new(Rc::new(node_pattern!(Call {})))) as MatcherRef,
        ]);
        assert_eq!(matches(&in_call, "f(x)\n").len(), 1);
        assert_eq!(matches(&in_call, "x + 1\n").len(), 0);
    }

    #[test]
    fn test_has_ancestor_and_descendant() {
        let inside_def = crate::matcher::base::AllOf::new(vec![
            Rc::new(ExprPattern::new("x").unwrap()) as MatcherRef,
            Rc::new(has_ancestor(Rc::new(node_pattern!(FunctionDef {})))) as MatcherRef,
        ]);
        assert_eq!(matches(&inside_def, "def f():\n    g(x)\n").len(), 1);
        assert_eq!(matches(&inside_def, "g(x)\n").len(), 0);

        let def_with_x = crate::matcher::base::AllOf::new(vec![
            Rc::new(node_pattern!(FunctionDef {})) as MatcherRef,
            Rc::new(has_descendant(Rc::new(ExprPattern::new("x").unwrap()))) as MatcherRef,
        ]);
        assert_eq!(matches(&def_with_x, "def f():\n    g(x)\n").len(), 1);
        assert_eq!(matches(&def_with_x, "def f():\n    g(y)\n").len(), 0);
    }
}
