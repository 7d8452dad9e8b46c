//! Source locations for EEPROM programs
//!
//! 位置信息用于编译错误和运行时回溯中的 `EEPROM:<line>:` 前缀。

use std::fmt;

/// A point in the program text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    /// 1-based line
    pub line: usize,
    /// 1-based column, counted in bytes
    pub column: usize,
    /// Byte offset from the start of the program
    pub offset: usize,
}

impl Position {
    #[inline]
    pub fn with_offset(
        line: usize,
        column: usize,
        offset: usize,
    ) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Half-open range of program text covered by a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    #[inline]
    pub fn new(
        start: Position,
        end: Position,
    ) -> Self {
        Self { start, end }
    }

    /// Zero-width span, used for end of input
    #[inline]
    pub fn point(at: Position) -> Self {
        Self { start: at, end: at }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.offset.saturating_sub(self.start.offset)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Span {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(f, "{}:{}-{}", self.start.line, self.start.column, self.end.column)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A program with its line table, for quoting lines back in diagnostics
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
    /// 每一行起始的字节偏移
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(
        name: String,
        content: String,
    ) -> Self {
        let line_starts = ::std::iter::once(0)
            .chain(content.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            name,
            content,
            line_starts,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Text of a 1-based line, without its line ending
    pub fn line_text(
        &self,
        line: usize,
    ) -> Option<&str> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = match self.line_starts.get(line) {
            Some(next) => next - 1,
            None => self.content.len(),
        };
        self.content.get(start..end).map(|s| s.trim_end_matches('\r'))
    }

    pub fn source_text(
        &self,
        span: Span,
    ) -> Option<&str> {
        self.content.get(span.start.offset..span.end.offset)
    }

    /// Line named by a guest error message of the form `<chunk>:<line>: ...`
    pub fn line_of_message(
        &self,
        chunk: &str,
        message: &str,
    ) -> Option<(usize, &str)> {
        let rest = message.strip_prefix(chunk)?.strip_prefix(':')?;
        let line = rest.split(':').next()?.parse::<usize>().ok()?;
        self.line_text(line).map(|text| (line, text))
    }
}

impl fmt::Display for SourceFile {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests;
