//! Tree-backed searchers built on the matcher engine.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use crate::cache::parse_cached;
use crate::matcher::base::Bind;
use crate::matcher::{
    bind_variables, find_iter, ExprPattern, Match, MatcherRef, Replacements, StmtPattern,
};
use crate::py::{NodeId, NodeKind, ParsedFile, Span, TokenKind};
use crate::substitution::Substitution;
use crate::template::{rewrite_templates, Template};

use super::searcher::{SearchError, Searcher, ROOT_LABEL};

/// Advisory metadata stamped onto every substitution a searcher yields.
#[derive(Debug, Clone)]
pub struct MatchMetadata {
    pub message: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub significant: bool,
}

impl Default for MatchMetadata {
    fn default() -> MatchMetadata {
        MatchMetadata {
            message: None,
            url: None,
            category: None,
            significant: true,
        }
    }
}

/// Runs a matcher over every node of a parsed tree and renders the bound
/// replacement templates for each match.
#[derive(Debug)]
pub struct MatcherSearcher {
    matcher: MatcherRef,
    templates: Replacements,
    metadata: MatchMetadata,
    stmt_hygiene: bool,
}

impl MatcherSearcher {
    /// Wraps `matcher` so the overall match is bound to [`ROOT_LABEL`],
    /// then checks that every template label and variable is bound
    /// somewhere in the matcher.
    pub fn from_matcher(
        matcher: MatcherRef,
        templates: Replacements,
    ) -> Result<MatcherSearcher, SearchError> {
        let root: MatcherRef = Rc::new(Bind::system(ROOT_LABEL, matcher)?);
        let bound = bind_variables(root.as_ref());
        let mut missing: Vec<String> = Vec::new();
        for (label, template) in &templates {
            let names = std::iter::once(label.clone()).chain(template.variables());
            for name in names {
                if !bound.contains(&name) && !name.starts_with("__") {
                    missing.push(name);
                }
            }
        }
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(SearchError::UnboundTemplateLabels {
                names: missing.join(", "),
            });
        }
        Ok(MatcherSearcher {
            matcher: root,
            templates,
            metadata: MatchMetadata::default(),
            stmt_hygiene: false,
        })
    }

    /// A searcher over an expression pattern like `f($x)`.
    pub fn expr(pattern: &str, templates: Replacements) -> Result<MatcherSearcher, SearchError> {
        let matcher: MatcherRef = Rc::new(ExprPattern::new(pattern)?);
        MatcherSearcher::from_matcher(matcher, templates)
    }

    /// A searcher over a statement pattern like `$x = $y`. Replacing a
    /// whole statement with the empty string also cleans up the suite it
    /// leaves behind.
    pub fn stmt(pattern: &str, templates: Replacements) -> Result<MatcherSearcher, SearchError> {
        let matcher: MatcherRef = Rc::new(StmtPattern::new(pattern)?);
        let mut searcher = MatcherSearcher::from_matcher(matcher, templates)?;
        searcher.stmt_hygiene = true;
        Ok(searcher)
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MatchMetadata) -> MatcherSearcher {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: &str) -> MatcherSearcher {
        self.metadata.category = Some(category.to_string());
        self
    }

    /// The span of the innermost simple statement enclosing the match,
    /// used to group substitutions that rewrite the same line.
    fn key_span(&self, parsed: &ParsedFile, matches: &BTreeMap<String, Match>) -> Option<Span> {
        let id = matches.get(ROOT_LABEL)?.node_id()?;
        let tree = parsed.tree()?;
        let unit = tree.nav().enclosing_simple_unit(&tree.arena, id)?;
        Some(tree.arena.node(unit).span)
    }

    /// Widens whole-statement deletions so they don't leave blank slots or
    /// syntactically empty suites behind. Tracks statements already removed
    /// by earlier substitutions in the same pass.
    fn sanitize_removal(
        &self,
        parsed: &ParsedFile,
        matches: &BTreeMap<String, Match>,
        matched_spans: &mut BTreeMap<String, Span>,
        replacements: &mut BTreeMap<String, String>,
        removed: &mut HashSet<NodeId>,
        removed_prefix: &mut HashSet<NodeId>,
    ) {
        let Some(tree) = parsed.tree() else {
            return;
        };
        let nav = tree.nav();
        let labels: Vec<String> = replacements.keys().cloned().collect();
        for label in labels {
            if !replacements[&label].is_empty() {
                continue;
            }
            let Some(id) = matches.get(&label).and_then(Match::node_id) else {
                continue;
            };
            if !tree.arena.node(id).is_stmt() {
                continue;
            }
            let Some((parent, _, index)) = nav.position(id) else {
                continue;
            };
            if index.is_none() {
                eprintln!(
                    "warning: {}: removed statement is not part of a suite",
                    parsed.path()
                );
                continue;
            }
            let Some(span) = matched_spans.get(&label).copied() else {
                continue;
            };
            removed.insert(id);
            let at_module_level = matches!(tree.arena.node(parent).kind, NodeKind::Module { .. });
            let prev = nav.prev_sibling(&tree.arena, id);
            let next = nav.next_sibling(&tree.arena, id);
            match (prev, next) {
                (None, None) => {
                    // An indented suite must keep at least one statement.
                    if !at_module_level {
                        replacements.insert(label.clone(), "pass".to_string());
                    }
                }
                (_, Some(next)) => {
                    // Swallow the gap up to the next statement.
                    if prev.is_none() || prev.is_some_and(|p| removed_prefix.contains(&p)) {
                        removed_prefix.insert(id);
                    }
                    let next_start = tree.arena.node(next).span.start;
                    matched_spans.insert(label.clone(), Span::new(span.start, next_start));
                }
                (Some(prev), None) => {
                    if removed_prefix.contains(&prev) {
                        // Everything before us is gone too.
                        if !at_module_level {
                            replacements.insert(label.clone(), "pass".to_string());
                        }
                    } else if !removed.contains(&prev) {
                        let prev_end = tree.arena.node(prev).span.end;
                        matched_spans.insert(label.clone(), Span::new(prev_end, span.end));
                    }
                    // Consume a dangling trailing semicolon.
                    let semicolon = tree
                        .tokens
                        .iter()
                        .find(|t| t.span.start >= span.end)
                        .filter(|t| t.kind == TokenKind::Op(";"));
                    if let Some(tok) = semicolon {
                        let cur = matched_spans[&label];
                        matched_spans.insert(label.clone(), Span::new(cur.start, tok.span.end));
                    }
                }
            }
        }
    }
}

impl Searcher for MatcherSearcher {
    fn parse(&self, text: &str, path: &str) -> Result<Rc<ParsedFile>, SearchError> {
        parse_cached(text, path).map_err(|e| SearchError::SkipFile {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    fn find_parsed(&self, parsed: &ParsedFile) -> Vec<Substitution> {
        let mut out = Vec::new();
        let mut removed: HashSet<NodeId> = HashSet::new();
        let mut removed_prefix: HashSet<NodeId> = HashSet::new();
        for result in find_iter(self.matcher.as_ref(), parsed) {
            let matches: BTreeMap<String, Match> = result
                .bindings
                .iter()
                .map(|(label, bound)| (label.clone(), bound.value.clone()))
                .collect();
            // Match-level replacements override the searcher's templates.
            let mut templates = self.templates.clone();
            for (label, template) in &result.replacements {
                templates.insert(label.clone(), Rc::clone(template));
            }
            let rendered = if templates.is_empty() {
                None
            } else {
                match rewrite_templates(parsed, &matches, &templates) {
                    Ok(r) => Some(r),
                    Err(err) => {
                        eprintln!("warning: {}: skipped rewrite: {err}", parsed.path());
                        continue;
                    }
                }
            };
            let mut matched_spans: BTreeMap<String, Span> = matches
                .iter()
                .filter_map(|(label, m)| m.span().map(|s| (label.clone(), s)))
                .collect();
            let mut replacements = rendered.map(|mut r| {
                r.retain(|label, _| matched_spans.contains_key(label));
                r
            });
            if self.stmt_hygiene {
                if let Some(reps) = replacements.as_mut() {
                    self.sanitize_removal(
                        parsed,
                        &matches,
                        &mut matched_spans,
                        reps,
                        &mut removed,
                        &mut removed_prefix,
                    );
                }
            }
            let sub = Substitution {
                key_span: self.key_span(parsed, &matches),
                matched_spans,
                primary_label: ROOT_LABEL.to_string(),
                replacements,
                message: self.metadata.message.clone(),
                url: self.metadata.url.clone(),
                category: self.metadata.category.clone(),
                significant: self.metadata.significant,
            };
            match sub.validated() {
                Ok(sub) => out.push(sub),
                Err(err) => eprintln!("warning: {}: dropped match: {err}", parsed.path()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::apply_substitutions;
    use crate::template::{LiteralTemplate, PyExprTemplate};

    fn templates(pairs: &[(&str, Rc<dyn Template>)]) -> Replacements {
        pairs
            .iter()
            .map(|(label, t)| (label.to_string(), Rc::clone(t)))
            .collect()
    }

    fn root_template(template: Rc<dyn Template>) -> Replacements {
        templates(&[(ROOT_LABEL, template)])
    }

    fn rewrite(searcher: &MatcherSearcher, text: &str) -> String {
        let parsed = searcher.parse(text, "t.py").unwrap();
        apply_substitutions(text, &searcher.find_parsed(&parsed)).unwrap()
    }

    #[test]
    fn test_expr_searcher_renders_bound_variables() {
        let searcher = MatcherSearcher::expr(
            "f($a)",
            root_template(Rc::new(PyExprTemplate::new("$a").unwrap())),
        )
        .unwrap();
        assert_eq!(rewrite(&searcher, "x = f(1 + 2)\n"), "x = 1 + 2\n");
    }

    #[test]
    fn test_search_only_has_no_replacements() {
        let searcher = MatcherSearcher::expr("f($a)", Replacements::new()).unwrap();
        let parsed = searcher.parse("f(1)\n", "t.py").unwrap();
        let subs = searcher.find_parsed(&parsed);
        assert_eq!(subs.len(), 1);
        assert!(subs[0].replacements.is_none());
        assert_eq!(subs[0].primary_span(), Span::new(0, 4));
    }

    #[test]
    fn test_unbound_template_label_is_rejected() {
        let err = MatcherSearcher::expr(
            "f($a)",
            templates(&[("b", Rc::new(LiteralTemplate::new("x")) as Rc<dyn Template>)]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SearchError::UnboundTemplateLabels { names } if names == "b"
        ));
    }

    #[test]
    fn test_key_span_is_enclosing_statement() {
        let searcher = MatcherSearcher::expr("q", Replacements::new()).unwrap();
        let text = "y = q + 1\n";
        let parsed = searcher.parse(text, "t.py").unwrap();
        let subs = searcher.find_parsed(&parsed);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].key_span, Some(Span::new(0, 9)));
    }

    #[test]
    fn test_parse_failure_skips_file() {
        let searcher = MatcherSearcher::expr("q", Replacements::new()).unwrap();
        assert!(matches!(
            searcher.parse("def def\n", "bad.py").unwrap_err(),
            SearchError::SkipFile { path, .. } if path == "bad.py"
        ));
    }

    #[test]
    fn test_removing_last_suite_statement_leaves_pass() {
        let searcher = MatcherSearcher::stmt(
            "x = 1",
            root_template(Rc::new(LiteralTemplate::new(""))),
        )
        .unwrap();
        assert_eq!(rewrite(&searcher, "if c:\n    x = 1\n"), "if c:\n    pass\n");
    }

    #[test]
    fn test_removing_first_statement_swallows_gap() {
        let searcher = MatcherSearcher::stmt(
            "a = 1",
            root_template(Rc::new(LiteralTemplate::new(""))),
        )
        .unwrap();
        assert_eq!(rewrite(&searcher, "a = 1\nb = 2\n"), "b = 2\n");
    }

    #[test]
    fn test_removing_trailing_statement_takes_semicolon() {
        let searcher = MatcherSearcher::stmt(
            "a = 1",
            root_template(Rc::new(LiteralTemplate::new(""))),
        )
        .unwrap();
        assert_eq!(rewrite(&searcher, "b = 2; a = 1;\n"), "b = 2\n");
    }

    #[test]
    fn test_removing_every_statement_of_a_suite_leaves_one_pass() {
        let searcher = MatcherSearcher::stmt(
            "$x = $y",
            root_template(Rc::new(LiteralTemplate::new(""))),
        )
        .unwrap();
        assert_eq!(
            rewrite(&searcher, "if c:\n    a = 1\n    b = 2\n"),
            "if c:\n    pass\n"
        );
    }

    #[test]
    fn test_nonempty_statement_replacement_is_untouched() {
        let searcher = MatcherSearcher::stmt(
            "a = 1",
            root_template(Rc::new(LiteralTemplate::new("a = 2"))),
        )
        .unwrap();
        assert_eq!(rewrite(&searcher, "a = 1\nb = 2\n"), "a = 2\nb = 2\n");
    }
}
