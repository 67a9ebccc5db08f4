//! Text splicing: the only code that actually rewrites bytes.
//!
//! Everything above (matchers, templates, searchers) compiles down to
//! ordered span replacements applied here.

use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::py::Span;
use crate::substitution::Substitution;

#[derive(Error, Debug)]
pub enum EditError {
    #[error("invalid span [{start}, {end}) in text of length {len}")]
    InvalidSpan { start: usize, end: usize, len: usize },

    #[error("overlapping replacement spans {first} and {second}")]
    OverlappingSpans { first: Span, second: Span },

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splices ordered `(span, replacement)` pairs into `text`.
///
/// Spans must be non-inverted, in range, sorted by start, and disjoint;
/// anything else is a caller bug and errors out rather than corrupting the
/// output.
pub fn concatenate_replacements(
    text: &str,
    replacements: &[(Span, String)],
) -> Result<String, EditError> {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0usize;
    for (span, replacement) in replacements {
        if span.end < span.start || span.end > text.len() {
            return Err(EditError::InvalidSpan {
                start: span.start,
                end: span.end,
                len: text.len(),
            });
        }
        if span.start < pos {
            return Err(EditError::OverlappingSpans {
                first: Span::new(0, pos),
                second: *span,
            });
        }
        out.push_str(&text[pos..span.start]);
        out.push_str(replacement);
        pos = span.end;
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

/// Applies every substitution's diff regions to `text` in one pass.
pub fn apply_substitutions(text: &str, subs: &[Substitution]) -> Result<String, EditError> {
    let mut regions: Vec<(Span, String)> = subs.iter().flat_map(Substitution::as_diff).collect();
    regions.sort_by_key(|(span, _)| (span.start, span.end));
    concatenate_replacements(text, &regions)
}

/// Expands a span to cover whole lines: back to the start of the line
/// containing `span.start`, forward through the newline ending the line
/// containing `span.end`.
#[must_use]
pub fn line_expanded_span(text: &str, span: Span) -> Span {
    let start = span.start.min(text.len());
    let end = span.end.min(text.len());
    let line_start = match text[..start].rfind('\n') {
        Some(i) => i + 1,
        None => 0,
    };
    let line_end = match text[end..].find('\n') {
        Some(i) => end + i + 1,
        None => text.len(),
    };
    Span::new(line_start, line_end)
}

/// Atomic file write: tempfile in the same directory + fsync + rename.
/// Either the full write lands or the file is untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    let parent = path.parent().ok_or_else(|| {
        EditError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
