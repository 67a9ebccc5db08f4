//! Iterated search: reapplies a searcher to its own rewrites until a
//! fixed point, merging each chain into one substitution.

use std::collections::{BTreeMap, BTreeSet};

use crate::edit::apply_substitutions;
use crate::py::Span;
use crate::substitution::Substitution;

use super::searcher::{SearchError, Searcher};

/// Primary label of a merged substitution.
const MERGED_LABEL: &str = "fixedpoint";

/// Stand-in URL when merged findings point at different pages.
const MERGED_URL: &str = "https://docs.rs/treewrite";

/// Finds every substitution in `text`, then iterates: substitutions that
/// share a key span are reapplied to their own output up to
/// `max_iterations` times and merged into one composite substitution.
/// Substitutions without a key span pass through untouched.
pub fn find_iter(
    searcher: &dyn Searcher,
    text: &str,
    path: &str,
    max_iterations: usize,
) -> Result<Vec<Substitution>, SearchError> {
    let parsed = searcher.parse(text, path)?;
    let mut out = Vec::new();
    let mut group: Vec<Substitution> = Vec::new();
    let mut group_key: Option<Span> = None;
    for sub in searcher.find_parsed(&parsed) {
        match sub.key_span {
            None => {
                flush(searcher, text, path, max_iterations, &mut group, group_key.take(), &mut out);
                out.push(sub);
            }
            Some(key) => {
                if group_key != Some(key) {
                    flush(searcher, text, path, max_iterations, &mut group, group_key, &mut out);
                    group_key = Some(key);
                }
                group.push(sub);
            }
        }
    }
    flush(searcher, text, path, max_iterations, &mut group, group_key, &mut out);
    Ok(out)
}

/// Finds, iterates, and applies in one step.
pub fn rewrite_string(
    searcher: &dyn Searcher,
    source: &str,
    path: &str,
    max_iterations: usize,
) -> Result<String, SearchError> {
    let subs = find_iter(searcher, source, path, max_iterations)?;
    Ok(apply_substitutions(source, &subs)?)
}

fn flush(
    searcher: &dyn Searcher,
    text: &str,
    path: &str,
    max_iterations: usize,
    group: &mut Vec<Substitution>,
    key: Option<Span>,
    out: &mut Vec<Substitution>,
) {
    if group.is_empty() {
        return;
    }
    let subs = std::mem::take(group);
    match key {
        Some(span) => out.extend(fixed_point(searcher, text, path, subs, span, max_iterations)),
        None => out.extend(subs),
    }
}

/// Repeatedly applies the group's substitutions to the key-span region and
/// re-searches the result. Stops at `max_iterations`, at the first round
/// with no matches, or when a rewrite fails to apply or reparse. Returns
/// the initial substitutions unchanged if iterating gained nothing.
fn fixed_point(
    searcher: &dyn Searcher,
    text: &str,
    path: &str,
    initial: Vec<Substitution>,
    span: Span,
    max_iterations: usize,
) -> Vec<Substitution> {
    if max_iterations <= 1 {
        return initial;
    }
    // Rebase onto the key span so iterations operate on just that region.
    let mut current: Vec<Substitution> = Vec::with_capacity(initial.len());
    for sub in &initial {
        match sub.relative_to_span(span.start, span.end) {
            Some(rel) => current.push(rel),
            // Widened removals escape their key span; apply them one-shot.
            None => return initial,
        }
    }
    let mut region = text[span.start..span.end].to_string();
    let mut applied: Vec<Substitution> = Vec::new();
    for _ in 0..max_iterations {
        if current.is_empty() {
            break;
        }
        let rewritten = match apply_substitutions(&region, &current) {
            Ok(r) => r,
            Err(err) => {
                eprintln!("warning: {path}: conflicting iterated rewrites: {err}");
                break;
            }
        };
        let reparsed = match searcher.parse(&rewritten, path) {
            Ok(p) => p,
            Err(err) => {
                eprintln!("warning: {path}: iterated rewrite no longer parses: {err}");
                break;
            }
        };
        applied.append(&mut current);
        region = rewritten;
        current = searcher.find_parsed(&reparsed);
    }
    if applied.is_empty() || applied.len() == initial.len() {
        return initial;
    }
    vec![compose(&applied, span, &region)]
}

/// Merges an iterated chain into one substitution replacing the whole key
/// span with the fully rewritten region.
fn compose(subs: &[Substitution], span: Span, final_text: &str) -> Substitution {
    let significant: Vec<&Substitution> = subs.iter().filter(|s| s.significant).collect();
    let (pool, is_significant) = if significant.is_empty() {
        (subs.iter().collect::<Vec<_>>(), false)
    } else {
        (significant, true)
    };
    // Deduplicate findings, keeping first-seen order.
    let mut pairs: Vec<(Option<&str>, Option<&str>)> = Vec::new();
    for sub in &pool {
        let pair = (sub.message.as_deref(), sub.url.as_deref());
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }
    let urls: BTreeSet<&str> = pairs.iter().filter_map(|(_, u)| *u).collect();
    let (message, url) = if pairs.len() == 1 {
        (
            pairs[0].0.map(str::to_string),
            pairs[0].1.map(str::to_string),
        )
    } else if urls.len() <= 1 {
        let messages: Vec<&str> = pairs.iter().filter_map(|(m, _)| *m).collect();
        let message = if messages.is_empty() {
            None
        } else {
            Some(format!(
                "There are a few findings here:\n\n{}",
                messages.join("\n\n")
            ))
        };
        (message, urls.first().map(|u| (*u).to_string()))
    } else {
        // Distinct URLs: attach each finding's URL to its message and
        // point the merged substitution at a neutral page.
        let mut messages = Vec::new();
        for (m, u) in &pairs {
            match (m, u) {
                (Some(m), Some(u)) => messages.push(format!("{m}\n({u})")),
                (Some(m), None) => messages.push((*m).to_string()),
                (None, Some(u)) => messages.push(format!("({u})")),
                (None, None) => {}
            }
        }
        (
            Some(format!(
                "There are a few findings here:\n\n{}",
                messages.join("\n\n")
            )),
            Some(MERGED_URL.to_string()),
        )
    };
    let tier = if is_significant {
        "significant"
    } else {
        "not-significant"
    };
    Substitution {
        matched_spans: BTreeMap::from([(MERGED_LABEL.to_string(), span)]),
        primary_label: MERGED_LABEL.to_string(),
        replacements: Some(BTreeMap::from([(
            MERGED_LABEL.to_string(),
            final_text.to_string(),
        )])),
        message,
        url,
        category: Some(format!("treewrite.merged.{tier}")),
        key_span: Some(span),
        significant: is_significant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Replacements;
    use crate::search::python::{MatchMetadata, MatcherSearcher};
    use crate::search::regex::RegexSearcher;
    use crate::search::searcher::ROOT_LABEL;
    use crate::template::{PyExprTemplate, Template};
    use std::rc::Rc;

    fn unwrapper() -> MatcherSearcher {
        let templates = Replacements::from([(
            ROOT_LABEL.to_string(),
            Rc::new(PyExprTemplate::new("$a").unwrap()) as Rc<dyn Template>,
        )]);
        MatcherSearcher::expr("f($a)", templates).unwrap()
    }

    #[test]
    fn test_fixed_point_composes_nested_rewrites() {
        let searcher = unwrapper();
        let text = "g(f(f(1)))\n";
        let subs = find_iter(&searcher, text, "t.py", 10).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].primary_label, "fixedpoint");
        assert_eq!(subs[0].primary_span(), Span::new(0, 10));
        assert_eq!(
            subs[0].category.as_deref(),
            Some("treewrite.merged.significant")
        );
        assert_eq!(apply_substitutions(text, &subs).unwrap(), "g(1)\n");
    }

    #[test]
    fn test_single_iteration_leaves_substitutions_unmerged() {
        let searcher = unwrapper();
        let text = "f(1)\nf(2)\n";
        let subs = find_iter(&searcher, text, "t.py", 1).unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.primary_label == ROOT_LABEL));
        assert_eq!(apply_substitutions(text, &subs).unwrap(), "1\n2\n");
    }

    #[test]
    fn test_stable_rewrite_is_not_merged() {
        let searcher = unwrapper();
        let subs = find_iter(&searcher, "f(1)\n", "t.py", 5).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].primary_label, ROOT_LABEL);
    }

    #[test]
    fn test_keyless_substitutions_pass_through() {
        let searcher = RegexSearcher::from_pattern("b.d", Replacements::new()).unwrap();
        let subs = find_iter(&searcher, "a bad c bed\n", "t.txt", 10).unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.key_span.is_none()));
    }

    #[test]
    fn test_merged_substitution_keeps_shared_metadata() {
        let metadata = MatchMetadata {
            message: Some("simplify".to_string()),
            url: Some("https://example.com/simplify".to_string()),
            ..MatchMetadata::default()
        };
        let searcher = unwrapper().with_metadata(metadata);
        let subs = find_iter(&searcher, "f(f(1))\n", "t.py", 10).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].message.as_deref(), Some("simplify"));
        assert_eq!(
            subs[0].url.as_deref(),
            Some("https://example.com/simplify")
        );
    }

    #[test]
    fn test_rewrite_string_applies_everything() {
        let searcher = unwrapper();
        assert_eq!(
            rewrite_string(&searcher, "g(f(f(1)))\nf(2)\n", "t.py", 10).unwrap(),
            "g(1)\n2\n"
        );
    }
}
