//! Token-level `$variable` substitution with no syntax awareness.
//!
//! Metavariables are recognized with the pattern lexer, so a `$x` inside a
//! string literal or comment is plain text, not a variable.

use std::collections::{BTreeMap, BTreeSet};

use crate::matcher::syntax::{scan_placeholders, Placeholder};
use crate::matcher::{Match, PatternError};
use crate::py::ParsedFile;

use super::base::{stringify_matches, RewriteError, Template};

const TEMPLATE_FILENAME: &str = "<template>";

#[derive(Debug)]
pub struct LexicalTemplate {
    source: String,
    placeholders: Vec<Placeholder>,
    variables: BTreeSet<String>,
}

impl LexicalTemplate {
    pub fn new(source: &str) -> Result<LexicalTemplate, PatternError> {
        let placeholders = scan_placeholders(source, TEMPLATE_FILENAME)?;
        let variables = placeholders.iter().map(|p| p.name.clone()).collect();
        Ok(LexicalTemplate {
            source: source.to_string(),
            placeholders,
            variables,
        })
    }

    /// Splices `values` into the placeholder positions. Every template
    /// variable must have a value; extra values are ignored.
    pub fn substitute(&self, values: &BTreeMap<String, String>) -> Result<String, RewriteError> {
        for name in &self.variables {
            if !values.contains_key(name) {
                return Err(RewriteError::MissingVariable { name: name.clone() });
            }
        }
        let mut out = String::with_capacity(self.source.len());
        let mut pos = 0;
        for p in &self.placeholders {
            out.push_str(&self.source[pos..p.span.start]);
            out.push_str(&values[&p.name]);
            pos = p.span.end;
        }
        out.push_str(&self.source[pos..]);
        Ok(out)
    }
}

impl Template for LexicalTemplate {
    fn substitute_match(
        &self,
        _parsed: &ParsedFile,
        _matched: &Match,
        matches: &BTreeMap<String, Match>,
    ) -> Result<String, RewriteError> {
        self.substitute(&stringify_matches(matches))
    }

    fn variables(&self) -> BTreeSet<String> {
        self.variables.clone()
    }

    fn source(&self) -> &str {
        &self.source
    }
}
