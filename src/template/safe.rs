//! Syntax-aware substitution templates.
//!
//! Naive textual substitution of code is quietly wrong in two directions:
//! substituting `1 + 2` for `$a` in `$a * 2` changes the arithmetic, and
//! splicing `x + 1` over a match inside `x * 2` changes it again. The
//! templates here parenthesize bound values, re-parse the rendered result,
//! and re-match it against the template's own structure, keeping parentheses
//! only where dropping them would change the tree. When the splice point
//! itself sits inside a larger expression, the same verification runs once
//! more on a synthesized wrapper around the splice hole.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use crate::cache::parse_cached;
use crate::matcher::base::ItemsAre;
use crate::matcher::syntax::node_pattern;
use crate::matcher::{
    ast_matcher, match_root, ExprPattern, Match, MatchContext, MatchError, MatchSession, Matcher,
    MatcherRef, ModulePattern, PatternError, StmtPattern,
};
use crate::py::{Candidate, NodeKind, ParsedFile};

use super::base::{stringify_matches, RewriteError, Template};
use super::lexical::LexicalTemplate;

const TEMPLATE_FILENAME: &str = "<template>";

/// Wraps a single-statement matcher into a whole-module matcher, so a
/// rendered template can be verified by parsing it as a unit.
fn module_wrap(stmt: MatcherRef) -> MatcherRef {
    Rc::new(node_pattern!(Module {
        body: Rc::new(ItemsAre::new(vec![stmt])) as MatcherRef,
    }))
}

/// Runs a matcher against one candidate in a fresh session.
fn try_match_at(
    matcher: &dyn Matcher,
    parsed: &ParsedFile,
    candidate: &Candidate,
) -> Result<bool, MatchError> {
    let Some(tree) = parsed.tree() else {
        return Ok(false);
    };
    let session = MatchSession::new();
    let ctx = MatchContext::new(parsed, tree, &session);
    Ok(matcher.try_match(&ctx, candidate)?.is_some())
}

/// Exact-shape matchers for every expression-valued match. Only these can be
/// parenthesized; everything else is spliced verbatim.
fn matchers_for_matches(
    parsed: &ParsedFile,
    matches: &BTreeMap<String, Match>,
) -> HashMap<String, MatcherRef> {
    let Some(tree) = parsed.tree() else {
        return HashMap::new();
    };
    matches
        .iter()
        .filter_map(|(label, m)| {
            let id = m.node_id()?;
            if tree.arena.node(id).is_expr() {
                Some((label.clone(), ast_matcher(&tree.arena, id)))
            } else {
                None
            }
        })
        .collect()
}

/// The shared engine behind the public template kinds: a lexical template
/// plus a compiled module-level matcher of the template's own structure.
#[derive(Debug)]
struct SafeTemplate {
    source: String,
    lexical: LexicalTemplate,
    matcher: MatcherRef,
}

impl SafeTemplate {
    fn new(source: &str, matcher: MatcherRef) -> Result<SafeTemplate, PatternError> {
        Ok(SafeTemplate {
            source: source.to_string(),
            lexical: LexicalTemplate::new(source)?,
            matcher,
        })
    }

    /// Renders the template with parenthesization kept only where needed.
    ///
    /// Returns the full rendered text and the per-variable strings actually
    /// used (parenthesized or not).
    fn parenthesized(
        &self,
        matchers: &HashMap<String, MatcherRef>,
        stringified: &BTreeMap<String, String>,
    ) -> Result<(String, BTreeMap<String, String>), RewriteError> {
        let mut safe: BTreeMap<String, String> = BTreeMap::new();
        let mut unparenthesized: BTreeMap<String, String> = BTreeMap::new();
        for (label, raw) in stringified {
            if matchers.contains_key(label) {
                safe.insert(label.clone(), format!("({raw})"));
                unparenthesized.insert(label.clone(), raw.clone());
            } else {
                safe.insert(label.clone(), raw.clone());
            }
        }

        let mut replacement = self.lexical.substitute(&safe)?;
        let rendered = parse_cached(&replacement, TEMPLATE_FILENAME).map_err(|e| {
            RewriteError::Reparse {
                template: self.source.clone(),
                rendered: replacement.clone(),
                message: e.to_string(),
            }
        })?;

        // The rendered text must still have the template's own structure,
        // with each substituted value intact where its variable was.
        let Some(m) = match_root(self.matcher.as_ref(), &rendered)? else {
            return Err(RewriteError::UnsafeSubstitution {
                template: self.source.clone(),
                rendered: replacement,
            });
        };
        for (label, bound) in &m.bindings {
            let Some(expected) = matchers.get(label) else {
                continue;
            };
            let intact = bound
                .value
                .node_id()
                .map(|id| try_match_at(expected.as_ref(), &rendered, &Candidate::Node(id)))
                .transpose()?
                .unwrap_or(false);
            if !intact {
                return Err(RewriteError::CorruptedVariable {
                    name: label.clone(),
                    template: self.source.clone(),
                });
            }
        }

        // Try dropping each variable's parentheses; keep the shorter form
        // only when the whole rendering still parses to the same tree.
        let Some(rendered_tree) = rendered.tree() else {
            return Ok((replacement, safe));
        };
        let shape = ast_matcher(&rendered_tree.arena, rendered_tree.root);
        for (label, plain) in &unparenthesized {
            let Some(wrapped) = safe.insert(label.clone(), plain.clone()) else {
                continue;
            };
            let accepted = (|| {
                let alt = self.lexical.substitute(&safe).ok()?;
                let alt_parsed = parse_cached(&alt, TEMPLATE_FILENAME).ok()?;
                let root = alt_parsed.tree()?.root;
                match try_match_at(shape.as_ref(), &alt_parsed, &Candidate::Node(root)) {
                    Ok(true) => Some(alt),
                    _ => None,
                }
            })();
            match accepted {
                Some(alt) => replacement = alt,
                None => {
                    safe.insert(label.clone(), wrapped);
                }
            }
        }

        Ok((replacement, safe))
    }

    fn substitute_match(
        &self,
        parsed: &ParsedFile,
        matched: &Match,
        matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError> {
        let matchers = matchers_for_matches(parsed, matches);
        let (replacement, _) = self.parenthesized(&matchers, &stringify_matches(matches))?;

        // The rendering is internally safe. What remains is the splice
        // point: an expression replacement dropped into a larger expression
        // may still need parentheses of its own.
        let Some(tree) = parsed.tree() else {
            return Ok(replacement);
        };
        let Some(id) = matched.node_id() else {
            // Not a tree match; parenthesization doesn't apply.
            return Ok(replacement);
        };
        if !tree.arena.node(id).is_expr() {
            return Ok(replacement);
        }
        let nav = tree.nav();
        let Some(mut context) = nav.parent(id) else {
            return Ok(replacement);
        };
        if matches!(tree.arena.node(context).kind, NodeKind::ExprStmt { .. }) {
            // Already a standalone expression statement; never needs parens.
            return Ok(replacement);
        }
        if tree.arena.node(context).has_suite() {
            // Suite headers can't be pulled out and reparsed in isolation
            // without reconstructing indentation; pass through verbatim.
            return Ok(replacement);
        }
        let context = loop {
            let node = tree.arena.node(context);
            if node.is_expr() || node.is_stmt() {
                break context;
            }
            let Some(next) = nav.parent(context) else {
                return Ok(replacement);
            };
            if tree.arena.node(next).has_suite() {
                return Ok(replacement);
            }
            context = next;
        };

        // Re-run the safe algorithm with the context as the pattern and the
        // replacement as the sole variable.
        let context_span = tree.arena.node(context).span;
        let match_span = tree.arena.node(id).span;
        let mut prefix = parsed.text()[context_span.start..match_span.start].to_string();
        let mut suffix = parsed.text()[match_span.end..context_span.end].to_string();
        if tree.arena.node(context).is_expr() {
            // The context expression leaves its multi-line surroundings
            // behind when reparsed alone, so parenthesize it whole.
            prefix = format!("({prefix}");
            suffix.push(')');
        }
        let wrapper = PyTemplate::new(&format!("{prefix}$current_expr{suffix}"))?;

        let rendered = parse_cached(&replacement, TEMPLATE_FILENAME).map_err(|e| {
            RewriteError::Reparse {
                template: self.source.clone(),
                rendered: replacement.clone(),
                message: e.to_string(),
            }
        })?;
        let Some(rendered_tree) = rendered.tree() else {
            return Ok(replacement);
        };
        let expr = match &rendered_tree.arena.node(rendered_tree.root).kind {
            NodeKind::Module { body } if body.len() == 1 => {
                match &rendered_tree.arena.node(body[0]).kind {
                    NodeKind::ExprStmt { value } => *value,
                    _ => {
                        return Err(RewriteError::NonExpressionContext {
                            template: self.source.clone(),
                        })
                    }
                }
            }
            _ => {
                return Err(RewriteError::NonExpressionContext {
                    template: self.source.clone(),
                })
            }
        };
        let current = ast_matcher(&rendered_tree.arena, expr);
        let (_, safe_mapping) = wrapper.inner.parenthesized(
            &HashMap::from([("current_expr".to_string(), current)]),
            &BTreeMap::from([("current_expr".to_string(), replacement.clone())]),
        )?;
        safe_mapping
            .get("current_expr")
            .cloned()
            .ok_or(RewriteError::UnsafeSubstitution {
                template: self.source.clone(),
                rendered: replacement,
            })
    }
}

/// A template whose output is a single expression, e.g. `$x * 2`.
#[derive(Debug)]
pub struct PyExprTemplate {
    inner: SafeTemplate,
}

impl PyExprTemplate {
    pub fn new(template: &str) -> Result<PyExprTemplate, PatternError> {
        let expr: MatcherRef = Rc::new(ExprPattern::new(template)?);
        let stmt: MatcherRef = Rc::new(node_pattern!(ExprStmt { value: expr }));
        Ok(PyExprTemplate {
            inner: SafeTemplate::new(template, module_wrap(stmt))?,
        })
    }
}

impl Template for PyExprTemplate {
    fn substitute_match(
        &self,
        parsed: &ParsedFile,
        matched: &Match,
        matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError> {
        self.inner.substitute_match(parsed, matched, matches)
    }

    fn variables(&self) -> BTreeSet<String> {
        self.inner.lexical.variables().clone()
    }

    fn source(&self) -> &str {
        &self.inner.source
    }
}

/// A template whose output is a single statement, e.g. `$x = $y`.
#[derive(Debug)]
pub struct PyStmtTemplate {
    inner: SafeTemplate,
}

impl PyStmtTemplate {
    pub fn new(template: &str) -> Result<PyStmtTemplate, PatternError> {
        let stmt: MatcherRef = Rc::new(StmtPattern::new(template)?);
        Ok(PyStmtTemplate {
            inner: SafeTemplate::new(template, module_wrap(stmt))?,
        })
    }
}

impl Template for PyStmtTemplate {
    fn substitute_match(
        &self,
        parsed: &ParsedFile,
        matched: &Match,
        matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError> {
        self.inner.substitute_match(parsed, matched, matches)
    }

    fn variables(&self) -> BTreeSet<String> {
        self.inner.lexical.variables().clone()
    }

    fn source(&self) -> &str {
        &self.inner.source
    }
}

/// A whole-unit template. Mostly an internal vehicle for context wrappers,
/// but usable directly.
#[derive(Debug)]
pub struct PyTemplate {
    inner: SafeTemplate,
}

impl PyTemplate {
    pub fn new(template: &str) -> Result<PyTemplate, PatternError> {
        let matcher: MatcherRef = Rc::new(ModulePattern::new(template)?);
        Ok(PyTemplate {
            inner: SafeTemplate::new(template, matcher)?,
        })
    }
}

impl Template for PyTemplate {
    fn substitute_match(
        &self,
        parsed: &ParsedFile,
        matched: &Match,
        matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError> {
        self.inner.substitute_match(parsed, matched, matches)
    }

    fn variables(&self) -> BTreeSet<String> {
        self.inner.lexical.variables().clone()
    }

    fn source(&self) -> &str {
        &self.inner.source
    }
}
