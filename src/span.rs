/// A half-open byte range `[start, end)` in the main source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "span start {} past end {}", start, end);
        Self { start, end }
    }

    pub fn point(offset: u32) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if `other` lies entirely inside this span.
    pub fn covers(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if the two spans share at least one byte.
    pub fn overlaps(&self, other: Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Where the last token of a range came from, relative to macro expansion.
///
/// Tokens produced by expanding an object-like macro carry the macro use site
/// as their file location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MacroPosition {
    /// Spelled directly in the file.
    #[default]
    File,
    /// The final token of a macro expansion.
    EndOfExpansion,
    /// Any other token inside a macro expansion.
    InsideExpansion,
}

/// A syntactic range: file span plus the macro position of its last token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRange {
    pub span: Span,
    pub end_macro: MacroPosition,
}

impl SourceRange {
    pub fn new(span: Span, end_macro: MacroPosition) -> Self {
        Self { span, end_macro }
    }

    pub fn file(span: Span) -> Self {
        Self {
            span,
            end_macro: MacroPosition::File,
        }
    }
}

/// A value annotated with its source span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}
