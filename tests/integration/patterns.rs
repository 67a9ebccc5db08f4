//! Pattern-to-rewrite behavior across the matcher, template, and search
//! layers together.

use std::rc::Rc;

use treewrite::matcher::Replacements;
use treewrite::search::{
    find_iter, rewrite_string, MatcherSearcher, Searcher, ROOT_LABEL,
};
use treewrite::template::{PyExprTemplate, Template};
use treewrite::RuleCatalog;

fn count_matches(pattern: &str, text: &str) -> usize {
    let searcher = MatcherSearcher::expr(pattern, Replacements::new()).unwrap();
    let parsed = searcher.parse(text, "t.py").unwrap();
    searcher.find_parsed(&parsed).len()
}

fn rewrite(pattern: &str, template: &str, text: &str) -> String {
    let templates = Replacements::from([(
        ROOT_LABEL.to_string(),
        Rc::new(PyExprTemplate::new(template).unwrap()) as Rc<dyn Template>,
    )]);
    let searcher = MatcherSearcher::expr(pattern, templates).unwrap();
    rewrite_string(&searcher, text, "t.py", 1).unwrap()
}

#[test]
fn test_repeated_metavariable_requires_equivalence() {
    assert_eq!(count_matches("$x + $x", "a + a\n"), 1);
    assert_eq!(count_matches("$x + $x", "a + b\n"), 0);
    assert_eq!(count_matches("$x + $x", "f(1) + f(1)\n"), 1);
}

#[test]
fn test_call_pattern_rewrites_in_place() {
    assert_eq!(rewrite("$f()", "$f(2)", "x = foo()\n"), "x = foo(2)\n");
}

#[test]
fn test_rewrite_parenthesizes_for_precedence() {
    assert_eq!(rewrite("x", "x+1", "x * 2\n"), "(x+1) * 2\n");
}

#[test]
fn test_rewrite_skips_redundant_parens() {
    assert_eq!(rewrite("x", "x+1", "y = x\n"), "y = x+1\n");
}

#[test]
fn test_matched_node_claims_its_subtree() {
    // The outer call matches; the identical inner call is inside the
    // claimed subtree and is not reported separately.
    assert_eq!(count_matches("f($a)", "f(f(1))\n"), 1);
}

#[test]
fn test_fixed_point_chains_catalog_rules() {
    let catalog = RuleCatalog::load_from_str(
        r#"{"rules": [
            {"name": "a-to-b", "mode": "expr", "pattern": "a", "template": "b"},
            {"name": "b-to-c", "mode": "expr", "pattern": "b", "template": "c"}
        ]}"#,
    )
    .unwrap();
    let searcher = catalog.searcher().unwrap();
    let subs = find_iter(&searcher, "a\n", "t.py", 10).unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].primary_label, "fixedpoint");
    assert_eq!(rewrite_string(&searcher, "a\n", "t.py", 10).unwrap(), "c\n");
}

#[test]
fn test_catalog_rewrite_is_idempotent() {
    let catalog = RuleCatalog::load_from_str(
        r#"{"rules": [
            {"name": "inc", "mode": "expr", "pattern": "f($x)", "template": "g($x)"}
        ]}"#,
    )
    .unwrap();
    let searcher = catalog.searcher().unwrap();
    let once = rewrite_string(&searcher, "y = f(f(2))\n", "t.py", 10).unwrap();
    let twice = rewrite_string(&searcher, &once, "t.py", 10).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_statement_pattern_matches_whole_statements() {
    let searcher = MatcherSearcher::stmt("return $x", Replacements::new()).unwrap();
    let parsed = searcher
        .parse("def f():\n    return 1\n", "t.py")
        .unwrap();
    let subs = searcher.find_parsed(&parsed);
    assert_eq!(subs.len(), 1);
    let span = subs[0].primary_span();
    assert_eq!(span.start, 13);
    assert_eq!(span.end, 21);
}
