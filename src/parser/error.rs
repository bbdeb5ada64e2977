use thiserror::Error;

pub const ERR_INVALID_ESCAPE: &str = "invalid escape sequence";
pub const ERR_UNEXPECTED_END_OF_STRING: &str = "unexpected end of string";
pub const ERR_INVALID_NUMBER: &str = "invalid number literal";
pub const ERR_UNEXPECTED_END_OF_COMMENT: &str = "unexpected end of comment";
pub const ERR_UNEXPECTED_CHARACTER: &str = "unexpected character";
pub const ERR_STACK_OVERFLOW: &str = "stack overflow";

/// Syntax error at a byte offset of the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
    position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// 1-based line and column of byte offsets in a source text.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &[u8]) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .iter()
                .enumerate()
                .filter(|(_, &b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// Column counts characters, not bytes.
    pub fn line_col(&self, source: &[u8], pos: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let end = pos.min(source.len());
        let col = source[start..end].iter().filter(|&&b| (b & 0xc0) != 0x80).count();
        (line as u32 + 1, col as u32 + 1)
    }
}
