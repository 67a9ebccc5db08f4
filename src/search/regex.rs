//! Plain-regex searching over raw file text, for files the parser can't
//! handle or rewrites that don't need a tree.

use std::collections::{BTreeMap, BTreeSet};

use regex::{Regex, RegexBuilder};

use crate::matcher::{Match, Replacements};
use crate::py::{ParsedFile, Span};
use crate::substitution::Substitution;
use crate::template::rewrite_templates;

use super::python::MatchMetadata;
use super::searcher::{SearchError, Searcher, ROOT_LABEL};

/// Yields one substitution per non-overlapping regex match. Group 0 is
/// bound to [`ROOT_LABEL`]; numbered groups are bound as `"1"`, `"2"`, ...
/// and named groups under their names.
#[derive(Debug)]
pub struct RegexSearcher {
    pattern: String,
    compiled: Regex,
    templates: Replacements,
    metadata: MatchMetadata,
}

impl RegexSearcher {
    pub fn from_pattern(
        pattern: &str,
        templates: Replacements,
    ) -> Result<RegexSearcher, SearchError> {
        let compiled = RegexBuilder::new(pattern)
            .multi_line(true)
            .build()
            .map_err(|e| SearchError::InvalidRegex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        let mut known: BTreeSet<String> = (0..compiled.captures_len()).map(|i| i.to_string()).collect();
        known.insert(ROOT_LABEL.to_string());
        known.extend(compiled.capture_names().flatten().map(str::to_string));
        let mut missing: Vec<String> = Vec::new();
        for (label, template) in &templates {
            let names = std::iter::once(label.clone()).chain(template.variables());
            for name in names {
                if !known.contains(&name) && !name.starts_with("__") {
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
        Ok(RegexSearcher {
            pattern: pattern.to_string(),
            compiled,
            templates,
            metadata: MatchMetadata::default(),
        })
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MatchMetadata) -> RegexSearcher {
        self.metadata = metadata;
        self
    }
}

impl Searcher for RegexSearcher {
    fn find_parsed(&self, parsed: &ParsedFile) -> Vec<Substitution> {
        let mut out = Vec::new();
        for caps in self.compiled.captures_iter(parsed.text()) {
            let mut matches: BTreeMap<String, Match> = BTreeMap::new();
            for (i, group) in caps.iter().enumerate() {
                let Some(group) = group else {
                    continue;
                };
                let label = if i == 0 {
                    ROOT_LABEL.to_string()
                } else {
                    i.to_string()
                };
                matches.insert(
                    label,
                    Match::Span {
                        string: group.as_str().to_string(),
                        span: Span::new(group.start(), group.end()),
                    },
                );
            }
            for name in self.compiled.capture_names().flatten() {
                if let Some(group) = caps.name(name) {
                    matches.insert(
                        name.to_string(),
                        Match::Span {
                            string: group.as_str().to_string(),
                            span: Span::new(group.start(), group.end()),
                        },
                    );
                }
            }
            let rendered = if self.templates.is_empty() {
                None
            } else {
                match rewrite_templates(parsed, &matches, &self.templates) {
                    Ok(r) => Some(r),
                    Err(err) => {
                        eprintln!("warning: {}: skipped rewrite: {err}", parsed.path());
                        continue;
                    }
                }
            };
            let matched_spans: BTreeMap<String, Span> = matches
                .iter()
                .filter_map(|(label, m)| m.span().map(|s| (label.clone(), s)))
                .collect();
            let replacements = rendered.map(|mut r| {
                r.retain(|label, _| matched_spans.contains_key(label));
                r
            });
            let sub = Substitution {
                matched_spans,
                primary_label: ROOT_LABEL.to_string(),
                replacements,
                message: self.metadata.message.clone(),
                url: self.metadata.url.clone(),
                category: self.metadata.category.clone(),
                key_span: None,
                significant: self.metadata.significant,
            };
            match sub.validated() {
                Ok(sub) => out.push(sub),
                Err(err) => eprintln!("warning: {}: dropped match: {err}", parsed.path()),
            }
        }
        out
    }

    fn approximate_regex(&self) -> Option<String> {
        Some(self.pattern.clone())
    }
}
