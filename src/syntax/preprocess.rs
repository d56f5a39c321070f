//! Directive extraction and object-like macro expansion.
//!
//! Included files are never read: an `#include` is only recorded so the
//! rewriter can strip it. Conditional directives are not evaluated; every
//! branch stays in the token stream.

use std::collections::{HashMap, HashSet};

use crate::diagnostic::Diagnostic;
use crate::span::{MacroPosition, Span};
use crate::syntax::lexeme::Lexeme;
use crate::syntax::lexer::Token;

/// A preprocessor directive line in the main file.
#[derive(Clone, Debug)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// From the `#` to the end of the directive's last token.
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DirectiveKind {
    Include {
        file: String,
        angled: bool,
        /// From the `#` to the end of the file name token.
        range: Span,
    },
    Define {
        name: String,
        function_like: bool,
    },
    Undef {
        name: String,
    },
    Other(String),
}

/// Token stream after directives are removed and macros are expanded.
pub struct Preprocessed {
    pub tokens: Vec<Token>,
    pub directives: Vec<Directive>,
    pub diagnostics: Vec<Diagnostic>,
}

struct Macro {
    body: Vec<Token>,
}

pub struct Preprocessor<'src> {
    source: &'src str,
    macros: HashMap<String, Macro>,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Preprocessor<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            macros: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn run(mut self, raw: Vec<Token>) -> Preprocessed {
        let mut tokens = Vec::with_capacity(raw.len());
        let mut directives = Vec::new();
        let mut i = 0;

        while i < raw.len() {
            let tok = &raw[i];
            if tok.lexeme == Lexeme::Hash && tok.at_line_start {
                let mut end = i + 1;
                while end < raw.len()
                    && !raw[end].at_line_start
                    && raw[end].lexeme != Lexeme::Eof
                {
                    end += 1;
                }
                if let Some(d) = self.directive(&raw[i..end]) {
                    directives.push(d);
                }
                i = end;
                continue;
            }

            let mut active = HashSet::new();
            self.expand_into(tok, tok.span, &mut active, &mut tokens);
            i += 1;
        }

        Preprocessed {
            tokens,
            directives,
            diagnostics: self.diagnostics,
        }
    }

    fn directive(&mut self, line: &[Token]) -> Option<Directive> {
        let hash = &line[0];
        let last = line.last().map(|t| t.span.end).unwrap_or(hash.span.end);
        let span = Span::new(hash.span.start, last);
        let Some(name_tok) = line.get(1) else {
            // null directive
            return None;
        };
        let name = name_tok.lexeme.spelling();

        let kind = match name.as_str() {
            "include" | "include_next" | "import" => self.include(line, span)?,
            "define" => {
                let Some(macro_name) = line.get(2).and_then(|t| t.lexeme.ident()) else {
                    self.diagnostics.push(Diagnostic::error(
                        "macro name missing after #define".to_string(),
                        span,
                    ));
                    return None;
                };
                let function_like = line.get(3).is_some_and(|t| {
                    t.lexeme == Lexeme::LParen && t.span.start == line[2].span.end
                });
                if function_like {
                    log::warn!(
                        "function-like macro '{}' is not expanded by the front end",
                        macro_name
                    );
                } else {
                    self.macros.insert(
                        macro_name.to_string(),
                        Macro {
                            body: line[3..].to_vec(),
                        },
                    );
                }
                DirectiveKind::Define {
                    name: macro_name.to_string(),
                    function_like,
                }
            }
            "undef" => {
                let macro_name = line
                    .get(2)
                    .and_then(|t| t.lexeme.ident())
                    .unwrap_or_default()
                    .to_string();
                self.macros.remove(&macro_name);
                DirectiveKind::Undef { name: macro_name }
            }
            other => {
                log::debug!("directive #{} kept verbatim", other);
                DirectiveKind::Other(other.to_string())
            }
        };

        Some(Directive { kind, span })
    }

    fn include(&mut self, line: &[Token], span: Span) -> Option<DirectiveKind> {
        let hash_start = line[0].span.start;
        match line.get(2).map(|t| &t.lexeme) {
            Some(Lexeme::Str(file)) => Some(DirectiveKind::Include {
                file: file.clone(),
                angled: false,
                range: Span::new(hash_start, line[2].span.end),
            }),
            Some(Lexeme::Lt) => {
                let close = line.iter().skip(3).find(|t| t.lexeme == Lexeme::Gt)?;
                let file = self.source[line[2].span.end as usize..close.span.start as usize]
                    .trim()
                    .to_string();
                Some(DirectiveKind::Include {
                    file,
                    angled: true,
                    range: Span::new(hash_start, close.span.end),
                })
            }
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    "expected a file name after #include".to_string(),
                    span,
                ));
                None
            }
        }
    }

    /// Push `tok` (or its expansion) to `out`. Expanded tokens take `site`
    /// as their file location.
    fn expand_into(
        &self,
        tok: &Token,
        site: Span,
        active: &mut HashSet<String>,
        out: &mut Vec<Token>,
    ) {
        let name = match &tok.lexeme {
            Lexeme::Ident(name) if self.macros.contains_key(name) && !active.contains(name) => {
                name.clone()
            }
            _ => {
                out.push(tok.clone());
                return;
            }
        };

        let first = out.len();
        active.insert(name.clone());
        for body_tok in &self.macros[&name].body {
            let mut t = body_tok.clone();
            t.spelling = Some(body_tok.spelling.unwrap_or(body_tok.span));
            t.span = site;
            t.at_line_start = false;
            t.macro_pos = MacroPosition::InsideExpansion;
            self.expand_into(&t, site, active, out);
        }
        active.remove(&name);

        // only the outermost expansion decides which token closes it
        let outermost = tok.macro_pos == MacroPosition::File;
        if outermost {
            for t in &mut out[first..] {
                t.macro_pos = MacroPosition::InsideExpansion;
                t.at_line_start = false;
            }
            if let Some(t) = out[first..].first_mut() {
                t.at_line_start = tok.at_line_start;
            }
            if let Some(last) = out[first..].last_mut() {
                last.macro_pos = MacroPosition::EndOfExpansion;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::lexer::Lexer;

    fn preprocess(source: &str) -> Preprocessed {
        let (raw, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty());
        Preprocessor::new(source).run(raw)
    }

    #[test]
    fn test_include_recorded_and_removed() {
        let src = "#include <vector>\n#include \"ParallelForEach.h\"\nint x;";
        let pp = preprocess(src);
        assert_eq!(pp.directives.len(), 2);
        match &pp.directives[0].kind {
            DirectiveKind::Include { file, angled, range } => {
                assert_eq!(file, "vector");
                assert!(*angled);
                assert_eq!(&src[range.range()], "#include <vector>");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &pp.directives[1].kind {
            DirectiveKind::Include { file, angled, range } => {
                assert_eq!(file, "ParallelForEach.h");
                assert!(!*angled);
                assert_eq!(&src[range.range()], "#include \"ParallelForEach.h\"");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(pp.tokens[0].is_ident("int"));
    }

    #[test]
    fn test_object_macro_expansion_positions() {
        let src = "#define GPU_ONLY __attribute__((amp_restrict(\"gpu\")))\nint f() GPU_ONLY;";
        let pp = preprocess(src);
        let use_site = src.rfind("GPU_ONLY").unwrap() as u32;
        let expanded: Vec<_> = pp.tokens.iter().filter(|t| t.from_macro()).collect();
        assert_eq!(expanded.len(), 9);
        assert!(expanded.iter().all(|t| t.span.start == use_site));
        assert_eq!(expanded[0].macro_pos, MacroPosition::InsideExpansion);
        assert_eq!(expanded[8].macro_pos, MacroPosition::EndOfExpansion);
        assert!(expanded[0].spelling.is_some());
        assert_eq!(pp.tokens.last().unwrap().lexeme, Lexeme::Eof);
    }

    #[test]
    fn test_nested_and_recursive_macros() {
        let src = "#define A B + 1\n#define B A\nint x = A;";
        let pp = preprocess(src);
        // A -> B + 1 -> A + 1 (A is not re-expanded)
        let spelled: Vec<String> = pp
            .tokens
            .iter()
            .filter(|t| t.from_macro())
            .map(|t| t.lexeme.spelling())
            .collect();
        assert_eq!(spelled, vec!["A", "+", "1"]);
    }

    #[test]
    fn test_function_like_macro_not_expanded() {
        let src = "#define SQ(x) ((x)*(x))\nint y = SQ(2);";
        let pp = preprocess(src);
        assert!(pp.tokens.iter().any(|t| t.is_ident("SQ")));
        assert!(matches!(
            pp.directives[0].kind,
            DirectiveKind::Define { function_like: true, .. }
        ));
    }

    #[test]
    fn test_empty_macro_disappears() {
        let src = "#define RESTRICT\nint f() RESTRICT;";
        let pp = preprocess(src);
        let idents: Vec<_> = pp.tokens.iter().filter_map(|t| t.lexeme.ident()).collect();
        assert_eq!(idents, vec!["int", "f"]);
    }
}
