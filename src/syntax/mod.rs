//! Front end: lexing, directive handling and declaration parsing.

pub mod lexeme;
pub mod lexer;
pub mod parser;
pub mod preprocess;

use crate::ast::TranslationUnit;
use crate::diagnostic::Diagnostic;
use crate::source::SourceDocument;

use lexer::Lexer;
use parser::Parser;
use preprocess::Preprocessor;

/// Lex, preprocess and parse a main file. Never fails: problems come back as
/// diagnostics next to whatever tree could be built.
pub fn parse_document(doc: &SourceDocument) -> (TranslationUnit, Vec<Diagnostic>) {
    let (raw, mut diagnostics) = Lexer::new(doc.text()).tokenize();
    let pp = Preprocessor::new(doc.text()).run(raw);
    diagnostics.extend(pp.diagnostics);

    let (unit, parse_diags) = Parser::new(pp.tokens).parse_translation_unit(pp.directives);
    diagnostics.extend(parse_diags);

    log::debug!(
        "parsed {}: {} top-level declarations, {} diagnostics",
        doc.name(),
        unit.decls.len(),
        diagnostics.len()
    );
    (unit, diagnostics)
}
