//! JSON rule catalogs: named, reusable search-and-replace rules that load
//! into a combined searcher.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Deserialize;
use thiserror::Error;

use crate::matcher::Replacements;
use crate::search::{
    CombinedSearcher, MatchMetadata, MatcherSearcher, PragmaSuppressedSearcher, RegexSearcher,
    SearchError, Searcher, ROOT_LABEL,
};
use crate::template::{LexicalTemplate, LiteralTemplate, PyExprTemplate, PyStmtTemplate, Template};

/// Iteration budget for catalog runs. Catalog rules are written to feed
/// each other, so they get more room than an ad-hoc pattern.
pub const CATALOG_ITERATIONS: usize = 10;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rule file JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate rule name `{name}`")]
    DuplicateName { name: String },

    #[error("rule `{name}`: {source}")]
    Compile {
        name: String,
        #[source]
        source: SearchError,
    },

    #[error("no rule named `{name}`{}", .suggestion.as_ref().map(|s| format!(" (did you mean `{s}`?)")).unwrap_or_default())]
    UnknownRule {
        name: String,
        suggestion: Option<String>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Expr,
    Stmt,
    Regex,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleDefinition {
    pub name: String,
    pub mode: RuleMode,
    pub pattern: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_significant")]
    pub significant: bool,
}

fn default_significant() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

/// A validated set of rules. Every pattern and template compiled once at
/// load time, so a bad rule fails the load instead of a later run.
#[derive(Debug)]
pub struct RuleCatalog {
    rules: Vec<RuleDefinition>,
}

impl RuleCatalog {
    pub fn load_from_str(input: &str) -> Result<RuleCatalog, RuleError> {
        let file: RuleFile = serde_json::from_str(input)?;
        let mut seen = BTreeSet::new();
        for rule in &file.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateName {
                    name: rule.name.clone(),
                });
            }
            compile_rule(rule)?;
        }
        Ok(RuleCatalog { rules: file.rules })
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<RuleCatalog, RuleError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        RuleCatalog::load_from_str(&contents)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter()
    }

    pub fn get(&self, name: &str) -> Result<&RuleDefinition, RuleError> {
        self.rules
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| self.unknown_rule(name))
    }

    /// One rule as a runnable searcher, pragma suppression included.
    pub fn rule_searcher(&self, name: &str) -> Result<PragmaSuppressedSearcher, RuleError> {
        let rule = self.get(name)?;
        Ok(PragmaSuppressedSearcher::new(compile_rule(rule)?))
    }

    /// The whole catalog as one combined searcher.
    pub fn searcher(&self) -> Result<PragmaSuppressedSearcher, RuleError> {
        let mut searchers: Vec<Box<dyn Searcher>> = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            searchers.push(compile_rule(rule)?);
        }
        Ok(PragmaSuppressedSearcher::new(Box::new(
            CombinedSearcher::new(searchers),
        )))
    }

    fn unknown_rule(&self, name: &str) -> RuleError {
        let suggestion = self
            .rules
            .iter()
            .map(|r| (strsim::jaro_winkler(name, &r.name), r.name.clone()))
            .filter(|(score, _)| *score > 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, name)| name);
        RuleError::UnknownRule {
            name: name.to_string(),
            suggestion,
        }
    }
}

/// Compiles one definition into a runnable searcher. Ad-hoc command-line
/// patterns go through here too, as anonymous single-rule definitions.
pub fn compile_rule(rule: &RuleDefinition) -> Result<Box<dyn Searcher>, RuleError> {
    build_searcher(rule).map_err(|source| RuleError::Compile {
        name: rule.name.clone(),
        source,
    })
}

fn build_searcher(rule: &RuleDefinition) -> Result<Box<dyn Searcher>, SearchError> {
    let mut templates = Replacements::new();
    if let Some(template) = &rule.template {
        let compiled: Rc<dyn Template> = if template.is_empty() {
            // Whole-match removal.
            Rc::new(LiteralTemplate::new(""))
        } else {
            match rule.mode {
                RuleMode::Expr => Rc::new(PyExprTemplate::new(template)?),
                RuleMode::Stmt => Rc::new(PyStmtTemplate::new(template)?),
                RuleMode::Regex => Rc::new(LexicalTemplate::new(template)?),
            }
        };
        templates.insert(ROOT_LABEL.to_string(), compiled);
    }
    let metadata = MatchMetadata {
        message: rule.message.clone(),
        url: rule.url.clone(),
        category: rule.category.clone(),
        significant: rule.significant,
    };
    Ok(match rule.mode {
        RuleMode::Expr => {
            Box::new(MatcherSearcher::expr(&rule.pattern, templates)?.with_metadata(metadata))
        }
        RuleMode::Stmt => {
            Box::new(MatcherSearcher::stmt(&rule.pattern, templates)?.with_metadata(metadata))
        }
        RuleMode::Regex => {
            Box::new(RegexSearcher::from_pattern(&rule.pattern, templates)?.with_metadata(metadata))
        }
    })
}
