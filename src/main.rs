use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use treewrite::edit::{apply_substitutions, atomic_write, line_expanded_span};
use treewrite::py::Span;
use treewrite::rules::{compile_rule, RuleCatalog, RuleDefinition, RuleMode, CATALOG_ITERATIONS};
use treewrite::search::{find_iter, PragmaSuppressedSearcher, Searcher};
use treewrite::substitution::Substitution;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "treewrite")]
#[command(about = "Structural search and replace for Python-style source", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Expression pattern with $metavariables
    Expr,
    /// Statement pattern with $metavariables
    Stmt,
    /// Plain regex over raw file text
    Regex,
}

impl From<Mode> for RuleMode {
    fn from(mode: Mode) -> RuleMode {
        match mode {
            Mode::Expr => RuleMode::Expr,
            Mode::Stmt => RuleMode::Stmt,
            Mode::Regex => RuleMode::Regex,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search for a pattern and print matching lines
    Search {
        /// Pattern with $metavariables (or a regex with --mode regex)
        pattern: String,

        /// Files or directories to search
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = Mode::Expr)]
        mode: Mode,
    },

    /// Rewrite matches of a pattern with a template
    Rewrite {
        /// Pattern with $metavariables (or a regex with --mode regex)
        pattern: String,

        /// Replacement template; an empty string deletes the match
        #[arg(short, long)]
        template: String,

        /// Files or directories to rewrite
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = Mode::Expr)]
        mode: Mode,

        /// Apply changes in place instead of printing a diff
        #[arg(short, long)]
        write: bool,

        /// Fixed-point iteration budget
        #[arg(short, long, default_value_t = 1)]
        iterations: usize,
    },

    /// Run a JSON rule catalog
    Rules {
        /// Path to the rule file
        rules: PathBuf,

        /// Files or directories to process
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Run a single named rule from the catalog
        #[arg(short, long)]
        rule: Option<String>,

        /// Apply changes in place instead of printing a diff
        #[arg(short, long)]
        write: bool,

        /// Fixed-point iteration budget (default: catalog budget)
        #[arg(short, long)]
        iterations: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            pattern,
            paths,
            mode,
        } => cmd_search(&pattern, &paths, mode),

        Commands::Rewrite {
            pattern,
            template,
            paths,
            mode,
            write,
            iterations,
        } => cmd_rewrite(&pattern, &template, &paths, mode, write, iterations),

        Commands::Rules {
            rules,
            paths,
            rule,
            write,
            iterations,
        } => cmd_rules(&rules, &paths, rule.as_deref(), write, iterations),
    }
}

/// Builds a pragma-suppressed searcher for an ad-hoc command-line pattern.
fn adhoc_searcher(
    mode: Mode,
    pattern: &str,
    template: Option<&str>,
) -> Result<PragmaSuppressedSearcher> {
    let definition = RuleDefinition {
        name: pattern.to_string(),
        mode: mode.into(),
        pattern: pattern.to_string(),
        template: template.map(str::to_string),
        message: None,
        url: None,
        category: None,
        significant: true,
    };
    Ok(PragmaSuppressedSearcher::new(compile_rule(&definition)?))
}

/// Expands directories. Tree modes only look at .py files; regex mode
/// takes every file.
fn collect_files(paths: &[PathBuf], py_only: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if py_only && entry.path().extension().and_then(|s| s.to_str()) != Some("py") {
                continue;
            }
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// A cheap prefilter from the searcher's approximate regex, when it has
/// one that compiles.
fn prefilter(searcher: &dyn Searcher) -> Option<regex::Regex> {
    let pattern = searcher.approximate_regex()?;
    regex::RegexBuilder::new(&pattern)
        .multi_line(true)
        .build()
        .ok()
}

fn cmd_search(pattern: &str, paths: &[PathBuf], mode: Mode) -> Result<()> {
    let searcher = adhoc_searcher(mode, pattern, None)?;
    let files = collect_files(paths, !matches!(mode, Mode::Regex))?;
    let filter = prefilter(&searcher);
    let mut total = 0;
    for file in files {
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("warning: {}: {err}", file.display());
                continue;
            }
        };
        if let Some(re) = &filter {
            if !re.is_match(&text) {
                continue;
            }
        }
        let parsed = match searcher.parse(&text, &file.display().to_string()) {
            Ok(parsed) => parsed,
            Err(err) => {
                eprintln!("warning: {err}");
                continue;
            }
        };
        for sub in searcher.find_parsed(&parsed) {
            print_match(&file, &text, &sub);
            total += 1;
        }
    }
    println!("{}", format!("{total} matches").bold());
    Ok(())
}

fn cmd_rewrite(
    pattern: &str,
    template: &str,
    paths: &[PathBuf],
    mode: Mode,
    write: bool,
    iterations: usize,
) -> Result<()> {
    let searcher = adhoc_searcher(mode, pattern, Some(template))?;
    let changed = run_rewrites(
        &searcher,
        paths,
        !matches!(mode, Mode::Regex),
        write,
        iterations,
        &mut BTreeMap::new(),
    )?;
    println!("{}", format!("{changed} files changed").bold());
    Ok(())
}

fn cmd_rules(
    rules: &Path,
    paths: &[PathBuf],
    rule: Option<&str>,
    write: bool,
    iterations: Option<usize>,
) -> Result<()> {
    let catalog = RuleCatalog::load_from_path(rules)
        .with_context(|| format!("loading rules from {}", rules.display()))?;
    let searcher = match rule {
        Some(name) => catalog.rule_searcher(name)?,
        None => catalog.searcher()?,
    };
    let iterations = iterations.unwrap_or(CATALOG_ITERATIONS);
    let mut category_counts = BTreeMap::new();
    let changed = run_rewrites(&searcher, paths, true, write, iterations, &mut category_counts)?;

    println!("{}", "Summary:".bold());
    for (category, count) in &category_counts {
        println!("  {count:>5}  {category}");
    }
    println!("  {changed} files changed");
    Ok(())
}

/// Runs the searcher over every file, printing diffs or writing in place.
/// Returns the number of files changed.
fn run_rewrites(
    searcher: &PragmaSuppressedSearcher,
    paths: &[PathBuf],
    py_only: bool,
    write: bool,
    iterations: usize,
    category_counts: &mut BTreeMap<String, usize>,
) -> Result<usize> {
    let files = collect_files(paths, py_only)?;
    let filter = prefilter(searcher);
    let mut changed = 0;
    for file in files {
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("warning: {}: {err}", file.display());
                continue;
            }
        };
        if let Some(re) = &filter {
            if !re.is_match(&text) {
                continue;
            }
        }
        let path_str = file.display().to_string();
        let subs = match find_iter(searcher, &text, &path_str, iterations) {
            Ok(subs) => subs,
            Err(err) => {
                eprintln!("warning: {err}");
                continue;
            }
        };
        if subs.is_empty() {
            continue;
        }
        for sub in &subs {
            let category = sub.category.clone().unwrap_or_else(|| "uncategorized".to_string());
            *category_counts.entry(category).or_insert(0) += 1;
        }
        let rewritten = match apply_substitutions(&text, &subs) {
            Ok(rewritten) => rewritten,
            Err(err) => {
                eprintln!("warning: {path_str}: {err}");
                continue;
            }
        };
        if rewritten == text {
            continue;
        }
        changed += 1;
        if write {
            atomic_write(&file, rewritten.as_bytes())
                .with_context(|| format!("writing {}", file.display()))?;
            println!(
                "{} {} ({} rewrites)",
                "✓".green(),
                file.display(),
                subs.len()
            );
        } else {
            display_diff(&file, &text, &rewritten);
        }
    }
    Ok(changed)
}

/// Prints one match as `path:line:` with the matched range highlighted.
/// Matches spanning several lines show only their first line.
fn print_match(file: &Path, text: &str, sub: &Substitution) {
    let span = sub.primary_span();
    let line_span = line_expanded_span(text, Span::new(span.start, span.start));
    let line = &text[line_span.start..line_span.end];
    let line = line.strip_suffix('\n').unwrap_or(line);
    let lineno = text[..span.start].bytes().filter(|b| *b == b'\n').count() + 1;
    let hl_start = span.start - line_span.start;
    let hl_end = span.end.min(line_span.start + line.len()) - line_span.start;
    println!(
        "{}:{lineno}: {}{}{}",
        file.display().to_string().cyan(),
        &line[..hl_start],
        line[hl_start..hl_end].red().bold(),
        &line[hl_end..],
    );
    if let Some(message) = &sub.message {
        match &sub.url {
            Some(url) => println!("  {}", format!("{message} ({url})").dimmed()),
            None => println!("  {}", message.dimmed()),
        }
    }
}

/// Unified diff between the original and rewritten file contents.
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!("{}", format!("--- {}", file.display()).dimmed());
    println!("{}", format!("+++ {} (rewritten)", file.display()).dimmed());
    let diff = TextDiff::from_lines(original, modified);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => print!("{}", format!("-{change}").red()),
            ChangeTag::Insert => print!("{}", format!("+{change}").green()),
            ChangeTag::Equal => print!(" {change}"),
        }
    }
}
