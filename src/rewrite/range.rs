//! Extends a removal range over the `;` that terminates it.

use crate::source::SourceDocument;
use crate::span::{MacroPosition, SourceRange, Span};
use crate::syntax::lexeme::Lexeme;
use crate::syntax::lexer::Lexer;

/// The span to edit for `range`: the range itself, plus the `;` directly after
/// it (whitespace and comments in between are covered too).
pub fn expand_to_terminator(doc: &SourceDocument, range: SourceRange) -> Span {
    match semicolon_after(doc, range) {
        Some(semi) => Span::new(range.span.start, semi.end),
        None => range.span,
    }
}

/// The `;` token that directly follows `range`, if any.
///
/// A range ending inside a macro expansion (but not on its last token) is
/// never extended: the macro use site already covers more than the range.
pub fn semicolon_after(doc: &SourceDocument, range: SourceRange) -> Option<Span> {
    if range.end_macro == MacroPosition::InsideExpansion {
        return None;
    }
    if range.span.end > doc.len() {
        return None;
    }
    let tok = Lexer::at(doc.text(), range.span.end).next_token();
    (tok.lexeme == Lexeme::Semicolon).then_some(tok.span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> SourceDocument {
        SourceDocument::new("t.cpp", text)
    }

    #[test]
    fn test_extends_over_semicolon() {
        let d = doc("int f(int x) ;\nint g();");
        let range = SourceRange::file(Span::new(0, 12));
        let span = expand_to_terminator(&d, range);
        assert_eq!(&d.text()[span.range()], "int f(int x) ;");
    }

    #[test]
    fn test_skips_comments_before_semicolon() {
        let d = doc("int f() /* note */ ;");
        let span = expand_to_terminator(&d, SourceRange::file(Span::new(0, 7)));
        assert_eq!(span.end as usize, d.text().len());
    }

    #[test]
    fn test_no_semicolon_leaves_range() {
        let d = doc("int f() { return 1; }\nint g();");
        let range = SourceRange::file(Span::new(0, 21));
        assert_eq!(expand_to_terminator(&d, range), range.span);
    }

    #[test]
    fn test_macro_positions() {
        let d = doc("int f() GPU_ONLY;");
        let end = "int f() GPU_ONLY".len() as u32;
        let at_end = SourceRange::new(Span::new(0, end), MacroPosition::EndOfExpansion);
        assert_eq!(expand_to_terminator(&d, at_end).end, end + 1);
        let inside = SourceRange::new(Span::new(0, end), MacroPosition::InsideExpansion);
        assert_eq!(expand_to_terminator(&d, inside).end, end);
    }

    #[test]
    fn test_range_at_end_of_file() {
        let d = doc("int f()");
        let range = SourceRange::file(Span::new(0, 7));
        assert_eq!(semicolon_after(&d, range), None);
    }
}
