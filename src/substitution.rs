//! The currency of a search: labeled spans, optional replacements, and
//! advisory metadata, produced once per accepted match.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::py::Span;

fn category_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A[^-.\s][^.\s]*([.][^.\s]+)*\z").unwrap())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("malformed category `{category}`")]
    MalformedCategory { category: String },
    #[error("primary label `{label}` has no matched span")]
    MissingPrimaryLabel { label: String },
    #[error("replacement label `{label}` has no matched span")]
    UnknownReplacementLabel { label: String },
}

/// One accepted match: labeled spans into the source, the primary label the
/// match "is", optional per-label replacement strings, and metadata for
/// reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub matched_spans: BTreeMap<String, Span>,
    pub primary_label: String,
    pub replacements: Option<BTreeMap<String, String>>,
    pub message: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    /// Span used to group this substitution for fixed-point iteration.
    pub key_span: Option<Span>,
    pub significant: bool,
}

impl Substitution {
    pub fn new(
        matched_spans: BTreeMap<String, Span>,
        primary_label: impl Into<String>,
    ) -> Result<Substitution, SubstitutionError> {
        Substitution {
            matched_spans,
            primary_label: primary_label.into(),
            replacements: None,
            message: None,
            url: None,
            category: None,
            key_span: None,
            significant: true,
        }
        .validated()
    }

    /// Checks the structural invariants; every constructor path ends here.
    pub fn validated(self) -> Result<Substitution, SubstitutionError> {
        if let Some(category) = &self.category {
            if !category_re().is_match(category) {
                return Err(SubstitutionError::MalformedCategory {
                    category: category.clone(),
                });
            }
        }
        if !self.matched_spans.contains_key(&self.primary_label) {
            return Err(SubstitutionError::MissingPrimaryLabel {
                label: self.primary_label.clone(),
            });
        }
        if let Some(replacements) = &self.replacements {
            for label in replacements.keys() {
                if !self.matched_spans.contains_key(label) {
                    return Err(SubstitutionError::UnknownReplacementLabel {
                        label: label.clone(),
                    });
                }
            }
        }
        Ok(self)
    }

    /// The span of the primary label. Guaranteed present after validation.
    #[must_use]
    pub fn primary_span(&self) -> Span {
        self.matched_spans[&self.primary_label]
    }

    /// The smallest span covering every matched span.
    #[must_use]
    pub fn full_span(&self) -> Span {
        let start = self.matched_spans.values().map(|s| s.start).min();
        let end = self.matched_spans.values().map(|s| s.end).max();
        match (start, end) {
            (Some(start), Some(end)) => Span::new(start, end),
            _ => Span::new(0, 0),
        }
    }

    /// The category and all its dotted prefixes, most general first.
    #[must_use]
    pub fn all_categories(&self) -> Vec<String> {
        let Some(category) = &self.category else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (i, c) in category.char_indices() {
            if c == '.' {
                out.push(category[..i].to_string());
            }
        }
        out.push(category.clone());
        out
    }

    /// Rebases every span against `[start, end)`. `None` if any span (or
    /// the key span) falls outside that window.
    #[must_use]
    pub fn relative_to_span(&self, start: usize, end: usize) -> Option<Substitution> {
        let window = Span::new(start, end);
        let shift = |span: Span| -> Option<Span> {
            if window.contains(&span) {
                Some(Span::new(span.start - start, span.end - start))
            } else {
                None
            }
        };
        let mut matched_spans = BTreeMap::new();
        for (label, span) in &self.matched_spans {
            matched_spans.insert(label.clone(), shift(*span)?);
        }
        let key_span = match self.key_span {
            Some(span) => Some(shift(span)?),
            None => None,
        };
        Some(Substitution {
            matched_spans,
            key_span,
            ..self.clone()
        })
    }

    /// Partitions the covered range into contiguous segments tagged with the
    /// set of labels active over each segment. Gap-free within the covered
    /// range; starts are processed before ends on position ties, so
    /// zero-width spans register as zero-width segments.
    #[must_use]
    pub fn labeled_spans(&self) -> Vec<(BTreeSet<String>, Span)> {
        #[derive(Default)]
        struct PosEvents<'a> {
            starts: Vec<&'a str>,
            ends: Vec<&'a str>,
            zero_width: bool,
        }
        let mut by_pos: BTreeMap<usize, PosEvents<'_>> = BTreeMap::new();
        for (label, span) in &self.matched_spans {
            by_pos.entry(span.start).or_default().starts.push(label);
            by_pos.entry(span.end).or_default().ends.push(label);
            if span.is_empty() {
                by_pos.entry(span.start).or_default().zero_width = true;
            }
        }

        let mut out = Vec::new();
        let mut active: BTreeSet<String> = BTreeSet::new();
        let mut prev: Option<usize> = None;
        for (pos, events) in &by_pos {
            if let Some(prev) = prev {
                if *pos > prev {
                    out.push((active.clone(), Span::new(prev, *pos)));
                }
            }
            for label in &events.starts {
                active.insert((*label).to_string());
            }
            if events.zero_width {
                out.push((active.clone(), Span::new(*pos, *pos)));
            }
            for label in &events.ends {
                active.remove(*label);
            }
            prev = Some(*pos);
        }
        out
    }

    /// Projects the substitution to an ordered list of `(span, replacement)`
    /// diff regions. Each replacement-bearing label contributes at most one
    /// region covering its full match; where several candidates overlap, the
    /// one with the larger span end (then the larger label) wins.
    #[must_use]
    pub fn as_diff(&self) -> Vec<(Span, String)> {
        let Some(replacements) = &self.replacements else {
            return Vec::new();
        };
        let mut out: Vec<(Span, String)> = Vec::new();
        let mut last_end = 0usize;
        let mut first = true;
        for (labels, segment) in self.labeled_spans() {
            if !first && segment.start < last_end {
                continue;
            }
            let chosen = labels
                .iter()
                .filter(|label| replacements.contains_key(*label))
                .max_by_key(|label| (self.matched_spans[*label].end, (*label).clone()));
            let Some(label) = chosen else {
                continue;
            };
            let span = self.matched_spans[label];
            if !first && span.start < last_end {
                continue;
            }
            out.push((span, replacements[label].clone()));
            last_end = span.end;
            first = false;
        }
        out
    }
}

/// Greedy interval selection over possibly overlapping substitutions,
/// sorted by start. On overlap the smaller full span wins; ties keep the
/// earlier substitution. A local heuristic, not globally optimal.
#[must_use]
pub fn disjoint_substitutions(subs: Vec<Substitution>) -> Vec<Substitution> {
    let mut sorted = subs;
    sorted.sort_by_key(|sub| {
        let span = sub.full_span();
        (span.start, span.end)
    });
    let mut out: Vec<Substitution> = Vec::new();
    for sub in sorted {
        let span = sub.full_span();
        match out.last() {
            Some(prev) if prev.full_span().overlaps(&span) => {
                if span.len() < prev.full_span().len() {
                    *out.last_mut().unwrap() = sub;
                }
            }
            _ => out.push(sub),
        }
    }
    out
}

/// Drops substitutions whose full span overlaps (or sits inside) any of the
/// excluded byte ranges.
#[must_use]
pub fn suppress_exclude_bytes(subs: Vec<Substitution>, excluded: &[Span]) -> Vec<Substitution> {
    subs.into_iter()
        .filter(|sub| {
            let span = sub.full_span();
            !excluded
                .iter()
                .any(|ex| ex.overlaps(&span) || ex.contains(&span))
        })
        .collect()
}
