//! Comment directives of the form `# tag: key=value, key=value`.
//!
//! A pragma written on its own line governs the rest of its indentation
//! block; a pragma trailing a code line governs just that line.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::ast::Span;

fn pragma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#+\s*([a-zA-Z0-9_-]+):\s*(\S.*?)\s*$").unwrap())
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z0-9_.-]+)\s*=\s*([^\s,]+)$").unwrap())
}

/// A parsed directive plus the byte range of source it governs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pragma {
    pub tag: String,
    pub data: BTreeMap<String, String>,
    /// Effect range: the governed bytes, not the comment itself.
    pub span: Span,
}

impl Pragma {
    /// Parses a single comment's text. Returns `None` unless every
    /// comma-separated element is a well-formed `key=value` pair.
    fn from_comment(comment: &str, span: Span) -> Option<Pragma> {
        let caps = pragma_re().captures(comment)?;
        let mut data = BTreeMap::new();
        for element in caps[2].split(',') {
            let pair = pair_re().captures(element.trim())?;
            data.insert(pair[1].to_string(), pair[2].to_string());
        }
        Some(Pragma {
            tag: caps[1].to_string(),
            data,
            span,
        })
    }
}

/// Extracts pragmas from `text` given the comment spans the lexer collected.
/// The result is sorted by effect-range start.
pub fn extract_pragmas(text: &str, comments: &[Span]) -> Vec<Pragma> {
    let mut pragmas = Vec::new();
    for comment in comments {
        let line_start = match text[..comment.start].rfind('\n') {
            Some(i) => i + 1,
            None => 0,
        };
        let standalone = text[line_start..comment.start]
            .chars()
            .all(char::is_whitespace);
        let effect = if standalone {
            let indent = comment.start - line_start;
            Span::new(line_start, block_end(text, comment.end, indent))
        } else {
            let line_end = text[comment.end..]
                .find('\n')
                .map_or(text.len(), |i| comment.end + i);
            Span::new(line_start, line_end)
        };
        if let Some(pragma) = Pragma::from_comment(&text[comment.start..comment.end], effect) {
            pragmas.push(pragma);
        }
    }
    pragmas.sort_by_key(|p| (p.span.start, p.span.end));
    pragmas
}

/// Finds the end of the indentation block containing a standalone comment at
/// column `indent`: the start of the first later non-blank, non-comment line
/// indented less than the comment.
fn block_end(text: &str, from: usize, indent: usize) -> usize {
    let mut pos = match text[from..].find('\n') {
        Some(i) => from + i + 1,
        None => return text.len(),
    };
    while pos < text.len() {
        let line_end = text[pos..].find('\n').map_or(text.len(), |i| pos + i);
        let line = &text[pos..line_end];
        let stripped = line.trim_start_matches([' ', '\t']);
        if !stripped.is_empty() && !stripped.starts_with('#') {
            let line_indent = line.len() - stripped.len();
            if line_indent < indent {
                return pos;
            }
        }
        pos = line_end + 1;
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py::lexer::tokenize;

    fn pragmas_of(text: &str) -> Vec<Pragma> {
        let lexed = tokenize(text, "test.py").unwrap();
        extract_pragmas(text, &lexed.comments)
    }

    #[test]
    fn test_trailing_pragma_covers_its_line() {
        let text = "a = 1\nb = 2  # treewrite: disable=all\nc = 3\n";
        let pragmas = pragmas_of(text);
        assert_eq!(pragmas.len(), 1);
        let p = &pragmas[0];
        assert_eq!(p.tag, "treewrite");
        assert_eq!(p.data.get("disable").map(String::as_str), Some("all"));
        assert_eq!(&text[p.span.start..p.span.end], "b = 2  # treewrite: disable=all");
    }

    #[test]
    fn test_standalone_pragma_covers_block() {
        let text = "if x:\n    # treewrite: disable=all\n    a = 1\n    b = 2\nc = 3\n";
        let pragmas = pragmas_of(text);
        assert_eq!(pragmas.len(), 1);
        let covered = &text[pragmas[0].span.start..pragmas[0].span.end];
        assert!(covered.contains("a = 1"));
        assert!(covered.contains("b = 2"));
        assert!(!covered.contains("c = 3"));
    }

    #[test]
    fn test_standalone_pragma_at_top_level_runs_to_eof() {
        let text = "# treewrite: disable=all\na = 1\nb = 2\n";
        let pragmas = pragmas_of(text);
        assert_eq!(pragmas[0].span, Span::new(0, text.len()));
    }

    #[test]
    fn test_non_pragma_comments_are_ignored() {
        assert!(pragmas_of("x = 1  # plain note\n").is_empty());
        // Every element must be key=value for the comment to count.
        assert!(pragmas_of("x = 1  # treewrite: disable=a, oops\n").is_empty());
    }

    #[test]
    fn test_multiple_pairs() {
        let pragmas = pragmas_of("x = 1  # treewrite: disable=a, enable=b\n");
        assert_eq!(pragmas[0].data.len(), 2);
        assert_eq!(pragmas[0].data.get("enable").map(String::as_str), Some("b"));
    }
}
