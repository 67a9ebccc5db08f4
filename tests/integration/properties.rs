//! Property tests for the span and splice primitives.

use std::collections::BTreeMap;

use proptest::prelude::*;
use treewrite::edit::{apply_substitutions, concatenate_replacements, line_expanded_span};
use treewrite::py::Span;
use treewrite::substitution::{disjoint_substitutions, Substitution};
use treewrite::LexicalTemplate;

fn span_sub(start: usize, end: usize) -> Substitution {
    Substitution::new(
        BTreeMap::from([("__root".to_string(), Span::new(start, end))]),
        "__root",
    )
    .unwrap()
}

proptest! {
    #[test]
    fn test_empty_replacement_set_is_identity(text in "[a-z \n]{0,60}") {
        prop_assert_eq!(concatenate_replacements(&text, &[]).unwrap(), text.clone());
        prop_assert_eq!(apply_substitutions(&text, &[]).unwrap(), text);
    }

    #[test]
    fn test_single_splice_partitions_text(
        text in "[a-z ]{0,40}",
        a in 0usize..41,
        b in 0usize..41,
        replacement in "[A-Z]{0,10}",
    ) {
        let len = text.len();
        let (start, end) = (a.min(b).min(len), a.max(b).min(len));
        let out = concatenate_replacements(
            &text,
            &[(Span::new(start, end), replacement.clone())],
        )
        .unwrap();
        prop_assert_eq!(out, format!("{}{}{}", &text[..start], replacement, &text[end..]));
    }

    #[test]
    fn test_line_expanded_span_covers_whole_lines(
        text in "[a-z\n]{0,60}",
        a in 0usize..61,
        b in 0usize..61,
    ) {
        let len = text.len();
        let (start, end) = (a.min(b).min(len), a.max(b).min(len));
        let expanded = line_expanded_span(&text, Span::new(start, end));
        prop_assert!(expanded.start <= start);
        prop_assert!(end <= expanded.end);
        prop_assert!(expanded.start == 0 || text.as_bytes()[expanded.start - 1] == b'\n');
        prop_assert!(expanded.end == len || text.as_bytes()[expanded.end - 1] == b'\n');
    }

    #[test]
    fn test_disjoint_substitutions_never_overlap(
        spans in prop::collection::vec((0usize..50, 1usize..10), 0..12),
    ) {
        let subs: Vec<Substitution> =
            spans.iter().map(|(start, len)| span_sub(*start, start + len)).collect();
        let kept = disjoint_substitutions(subs);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                prop_assert!(!a.primary_span().overlaps(&b.primary_span()));
            }
        }
    }

    #[test]
    fn test_labeled_spans_tile_the_full_span(
        spans in prop::collection::vec((0usize..30, 1usize..8), 1..5),
    ) {
        let mut matched = BTreeMap::new();
        for (i, (start, len)) in spans.iter().enumerate() {
            matched.insert(format!("l{i}"), Span::new(*start, start + len));
        }
        let sub = Substitution::new(matched, "l0").unwrap();
        let full = sub.full_span();
        let mut pos = full.start;
        for (_, segment) in sub.labeled_spans() {
            prop_assert_eq!(segment.start, pos);
            pos = segment.end;
        }
        prop_assert_eq!(pos, full.end);
    }

    #[test]
    fn test_substitutions_without_replacements_do_not_edit(
        text in "[a-z]{1,30}",
        a in 0usize..30,
    ) {
        let start = a.min(text.len().saturating_sub(1));
        let sub = span_sub(start, text.len());
        prop_assert_eq!(apply_substitutions(&text, &[sub]).unwrap(), text);
    }

    #[test]
    fn test_lexical_template_splices_values_verbatim(value in "[a-z0-9]{1,8}") {
        let template = LexicalTemplate::new("f($x, $x)").unwrap();
        let out = template
            .substitute(&BTreeMap::from([("x".to_string(), value.clone())]))
            .unwrap();
        prop_assert_eq!(out, format!("f({value}, {value})"));
    }
}
