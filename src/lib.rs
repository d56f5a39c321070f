pub mod ast;
pub mod backend;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod rewrite;
pub mod source;
pub mod span;
pub mod syntax;

pub use config::{CodegenConfig, Config, RewriteConfig};
pub use error::{BackendError, Error, RewriteError};
pub use rewrite::SplitOutput;

use backend::ir::Module;
use rewrite::TranslationDriver;
use source::SourceDocument;

/// Split one annotated source file into its cpu and gpu halves.
///
/// Front-end diagnostics come first in the returned list, followed by those
/// raised while rewriting.
pub fn split_source(name: &str, text: &str, config: &RewriteConfig) -> Result<SplitOutput, RewriteError> {
    let doc = SourceDocument::new(name, text);
    let (unit, parse_diagnostics) = syntax::parse_document(&doc);
    let mut output = TranslationDriver::new(&doc, config).run(&unit)?;
    if !parse_diagnostics.is_empty() {
        let mut diagnostics = parse_diagnostics;
        diagnostics.append(&mut output.diagnostics);
        output.diagnostics = diagnostics;
    }
    Ok(output)
}

/// Regenerate source text for `module` with the configured backend.
pub fn regenerate_source(module: &Module, config: &CodegenConfig) -> Result<String, BackendError> {
    backend::regenerate(module, config)
}

/// Read a textual module and regenerate it.
pub fn regenerate_text(name: &str, text: &str, config: &CodegenConfig) -> error::Result<String> {
    let module = backend::read_module(name, text)?;
    Ok(regenerate_source(&module, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_source_reports_parse_diagnostics_first() {
        let src = "#include\nint f() __attribute__((amp_restrict(\"tpu\")));\n";
        let out = split_source("a.cpp", src, &RewriteConfig::default()).unwrap();
        assert_eq!(out.diagnostics.len(), 2);
        assert!(out.diagnostics[0].message.contains("#include"));
        assert!(out.diagnostics[1].message.contains("amp_restrict"));
    }

    #[test]
    fn test_regenerate_text() {
        let out = regenerate_text("m", "define i32 @f() {\n  ret i32 7\n}", &CodegenConfig::default()).unwrap();
        assert!(out.contains("return 7;"));
        let err = regenerate_text("m", "define i32 @f() {", &CodegenConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Read(_)));
    }
}
