//! The immutable source document both edit buffers are anchored to.

use crate::span::Span;

/// Original program text plus a byte-offset → line/column index.
#[derive(Debug)]
pub struct SourceDocument {
    name: String,
    text: String,
    line_starts: Vec<u32>,
}

/// 1-based line and column of a byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineCol {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for LineCol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    /// File name as given by the caller (not canonicalized).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> u32 {
        self.text.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Offset one past the last byte; insertions here land at end of file.
    pub fn end_of_file(&self) -> u32 {
        self.len()
    }

    pub fn slice(&self, span: Span) -> &str {
        &self.text[span.range()]
    }

    pub fn line_col(&self, offset: u32) -> LineCol {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = offset - self.line_starts[line] + 1;
        LineCol {
            line: line as u32 + 1,
            column,
        }
    }

    /// `name:line:col` for diagnostics.
    pub fn describe(&self, offset: u32) -> String {
        format!("{}:{}", self.name, self.line_col(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let doc = SourceDocument::new("a.cpp", "int a;\nint b;\n\nint c;");
        assert_eq!(doc.line_col(0), LineCol { line: 1, column: 1 });
        assert_eq!(doc.line_col(4), LineCol { line: 1, column: 5 });
        assert_eq!(doc.line_col(7), LineCol { line: 2, column: 1 });
        assert_eq!(doc.line_col(15), LineCol { line: 4, column: 1 });
        assert_eq!(doc.describe(11), "a.cpp:2:5");
    }

    #[test]
    fn test_slice_and_eof() {
        let doc = SourceDocument::new("k.cpp", "void f() {}\n");
        assert_eq!(doc.slice(Span::new(5, 6)), "f");
        assert_eq!(doc.end_of_file(), 12);
    }
}
