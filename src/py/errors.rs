use thiserror::Error;

/// Parse failure with enough position data to render a caret diagnostic.
///
/// `line` and `column` are 1-based. `line_text` is the offending source line
/// without its trailing newline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{filename}:{line}:{column}: {message}")]
pub struct ParseError {
    pub filename: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub line_text: String,
}

impl ParseError {
    /// Renders the error with the source line and a caret under the column.
    #[must_use]
    pub fn render(&self) -> String {
        let caret_pad = " ".repeat(self.column.saturating_sub(1));
        format!(
            "{}:{}:{}: {}\n    {}\n    {}^",
            self.filename, self.line, self.column, self.message, self.line_text, caret_pad
        )
    }
}

/// Builds a `ParseError` at a byte offset into `text`.
pub(crate) fn error_at(filename: &str, text: &str, offset: usize, message: String) -> ParseError {
    let offset = offset.min(text.len());
    let line_start = match text[..offset].rfind('\n') {
        Some(i) => i + 1,
        None => 0,
    };
    let line_end = text[offset..]
        .find('\n')
        .map_or(text.len(), |i| offset + i);
    let line = text[..offset].matches('\n').count() + 1;
    ParseError {
        filename: filename.to_string(),
        line,
        column: offset - line_start + 1,
        message,
        line_text: text[line_start..line_end].to_string(),
    }
}
