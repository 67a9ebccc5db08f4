//! The template trait and the trivial templates.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::matcher::{Match, MatchError, PatternError, Replacements};
use crate::py::ParsedFile;

/// Rendering a replacement failed. The offending match is skipped; the rest
/// of the run continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("template variable `${name}` has no value")]
    MissingVariable { name: String },

    #[error("substituted template is not valid syntax: template={template:?}, rendered={rendered:?}: {message}")]
    Reparse {
        template: String,
        rendered: String,
        message: String,
    },

    #[error("substitution changed the template's structure: template={template:?}, rendered={rendered:?}")]
    UnsafeSubstitution { template: String, rendered: String },

    #[error("substitution corrupted variable `${name}` of template {template:?}")]
    CorruptedVariable { name: String, template: String },

    #[error("non-expression template can't be used in an expression context: {template}")]
    NonExpressionContext { template: String },

    #[error("failed to build context template: {0}")]
    Context(#[from] PatternError),

    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Renders a replacement string for one match.
pub trait Template: fmt::Debug {
    /// Substitutes the labeled matches into the template. `matched` is the
    /// match being replaced; `matches` holds every labeled value.
    fn substitute_match(
        &self,
        parsed: &ParsedFile,
        matched: &Match,
        matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError>;

    /// The metavariables the template consumes.
    fn variables(&self) -> std::collections::BTreeSet<String>;

    /// The template source text.
    fn source(&self) -> &str;
}

/// The string values of the matches that have one.
#[must_use]
pub fn stringify_matches(matches: &BTreeMap<String, Match>) -> BTreeMap<String, String> {
    matches
        .iter()
        .filter_map(|(label, m)| m.string().map(|s| (label.clone(), s.to_string())))
        .collect()
}

/// A fixed replacement string. No substitution at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralTemplate {
    template: String,
}

impl LiteralTemplate {
    #[must_use]
    pub fn new(template: &str) -> LiteralTemplate {
        LiteralTemplate {
            template: template.to_string(),
        }
    }
}

impl Template for LiteralTemplate {
    fn substitute_match(
        &self,
        _parsed: &ParsedFile,
        _matched: &Match,
        _matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError> {
        Ok(self.template.clone())
    }

    fn variables(&self) -> std::collections::BTreeSet<String> {
        std::collections::BTreeSet::new()
    }

    fn source(&self) -> &str {
        &self.template
    }
}

/// Renders every labeled template against the matches, producing the
/// label-to-replacement map the diff model consumes.
///
/// A labeled template applies when its label is matched with a span.
/// Labels prefixed `__` are synthetic and render against an empty match
/// even when unbound.
pub fn rewrite_templates(
    parsed: &ParsedFile,
    matches: &BTreeMap<String, Match>,
    templates: &Replacements,
) -> Result<BTreeMap<String, String>, RewriteError> {
    let mut out = BTreeMap::new();
    for (label, template) in templates {
        let m = match matches.get(label) {
            Some(m) => {
                if m.span().is_none() {
                    continue;
                }
                m.clone()
            }
            None if label.starts_with("__") => Match::Empty,
            None => continue,
        };
        out.insert(
            label.clone(),
            template.substitute_match(parsed, &m, matches)?,
        );
    }
    Ok(out)
}
