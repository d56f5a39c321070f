//! Declaration-level parser for the annotated C++ subset.
//!
//! The parser never rejects input it does not understand: unknown
//! declarations become `Decl::Other`, unknown statements keep only the calls
//! and lambdas found inside them.

mod expr;
mod items;

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::{SourceRange, Span};
use crate::syntax::lexeme::Lexeme;
use crate::syntax::lexer::Token;
use crate::syntax::preprocess::Directive;

const MAX_NESTING_DEPTH: u32 = 256;

/// Builtin type keywords; never a declarator name.
const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "unsigned", "signed",
    "auto", "wchar_t", "char8_t", "char16_t", "char32_t",
];

/// Identifiers followed by `(` that are never function names.
const NON_CALLABLE: &[&str] = &[
    "if", "while", "for", "switch", "return", "sizeof", "alignof", "alignas", "decltype",
    "noexcept", "throw", "catch", "__attribute__", "__declspec", "typeid", "static_assert",
    "co_await", "co_return",
];

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Scope {
    File,
    Namespace,
    /// `extern "C"` directly at file scope.
    Linkage,
    Record(Option<String>),
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
    /// Variables visible at the current point of a function body, innermost last.
    locals: Vec<Vec<(String, String)>>,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
            locals: Vec::new(),
        }
    }

    /// Parse the whole token stream. Directives are merged into the top-level
    /// declaration list by position.
    pub(crate) fn parse_translation_unit(
        mut self,
        directives: Vec<Directive>,
    ) -> (TranslationUnit, Vec<Diagnostic>) {
        let mut decls = self.parse_decls(&Scope::File);
        if !self.at(&Lexeme::Eof) {
            self.error_at_current("unmatched '}' at file scope");
        }
        decls.extend(directives.into_iter().map(Decl::Directive));
        decls.sort_by_key(|d| d.span().start);
        (TranslationUnit { decls }, self.diagnostics)
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_at_current("nesting depth exceeded (maximum 256 levels)");
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }

    // --- cursor ---

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].lexeme
    }

    fn peek_at(&self, offset: usize) -> &Lexeme {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].lexeme
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, lexeme: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(lexeme)
    }

    fn at_ident(&self, text: &str) -> bool {
        self.peek().is_ident(text)
    }

    fn eat(&mut self, lexeme: &Lexeme) -> bool {
        if self.at(lexeme) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }

    // --- index-based helpers ---

    fn lexeme(&self, idx: usize) -> &Lexeme {
        &self.tokens[idx.min(self.tokens.len() - 1)].lexeme
    }

    fn is_eof(&self, idx: usize) -> bool {
        idx >= self.tokens.len() - 1
    }

    /// Given an opening `(`, `[` or `{` at `open`, return the index of its
    /// matching closer, or the index of `Eof` if it is unbalanced.
    fn matching(&self, open: usize) -> usize {
        let mut depth = 0usize;
        let mut i = open;
        while !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::LParen | Lexeme::LBracket | Lexeme::LBrace => depth += 1,
                Lexeme::RParen | Lexeme::RBracket | Lexeme::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return i;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        i
    }

    /// Given a `<` at `open`, return the index of the matching `>` if the
    /// contents look like template arguments.
    fn matching_angle(&self, open: usize, limit: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = open;
        while i < limit && !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::Lt => depth += 1,
                Lexeme::Gt => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                Lexeme::Punct(p) if p == ">>" => {
                    if depth <= 2 {
                        return (depth == 2).then_some(i);
                    }
                    depth -= 2;
                }
                Lexeme::LParen | Lexeme::LBracket => i = self.matching(i),
                Lexeme::Semicolon | Lexeme::LBrace | Lexeme::RBrace => return None,
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Split `[start, end)` at commas that are not nested in brackets.
    fn split_top_level(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut groups = Vec::new();
        if start >= end {
            return groups;
        }
        let mut group_start = start;
        let mut i = start;
        while i < end {
            match self.lexeme(i) {
                Lexeme::LParen | Lexeme::LBracket | Lexeme::LBrace => {
                    i = self.matching(i).min(end);
                }
                Lexeme::Lt if i > start && self.lexeme(i - 1).ident().is_some() => {
                    if let Some(close) = self.matching_angle(i, end) {
                        i = close;
                    }
                }
                Lexeme::Comma => {
                    groups.push((group_start, i));
                    group_start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        groups.push((group_start, end));
        groups
    }

    fn span_between(&self, first: usize, last: usize) -> Span {
        Span::new(self.tokens[first].span.start, self.tokens[last].span.end)
    }

    /// Range from `first` to `last` inclusive, remembering whether `last`
    /// closes a macro expansion.
    fn range_between(&self, first: usize, last: usize) -> SourceRange {
        SourceRange::new(self.span_between(first, last), self.tokens[last].macro_pos)
    }

    /// Type or expression text with normalized spacing: words are separated
    /// by one space, punctuation is glued, commas are followed by a space.
    fn render(&self, start: usize, end: usize) -> String {
        render_tokens(&self.tokens[start..end])
    }

    fn parse_params(&self, start: usize, end: usize) -> Vec<Param> {
        if start >= end || (end - start == 1 && self.lexeme(start).is_ident("void")) {
            return Vec::new();
        }
        let mut params = Vec::new();
        for (a, b) in self.split_top_level(start, end) {
            if a >= b {
                continue;
            }
            // default argument
            let b = (a..b)
                .find(|&i| *self.lexeme(i) == Lexeme::Eq)
                .unwrap_or(b);
            let span = self.span_between(a, b - 1);

            let mut name_end = b;
            let mut suffix = String::new();
            if *self.lexeme(b - 1) == Lexeme::RBracket {
                let open = (a..b).find(|&i| *self.lexeme(i) == Lexeme::LBracket).unwrap_or(b - 1);
                suffix = self.render(open, b);
                name_end = open;
            }

            let named = name_end >= a + 2
                && self
                    .lexeme(name_end - 1)
                    .ident()
                    .is_some_and(|n| !TYPE_KEYWORDS.contains(&n) && n != "const" && n != "volatile")
                && *self.lexeme(name_end - 2) != Lexeme::ColonColon;

            if named {
                params.push(Param {
                    name: self.lexeme(name_end - 1).ident().map(str::to_string),
                    ty: format!("{}{}", self.render(a, name_end - 1), suffix),
                    span,
                });
            } else {
                params.push(Param {
                    name: None,
                    ty: self.render(a, b),
                    span,
                });
            }
        }
        params
    }

    fn lookup_local(&self, name: &str) -> Option<&str> {
        self.locals
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty.as_str())
    }

    fn declare_local(&mut self, name: String, ty: String) {
        if let Some(scope) = self.locals.last_mut() {
            scope.push((name, ty));
        }
    }
}

fn is_word(lexeme: &Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Ident(_) | Lexeme::Number(_) | Lexeme::Str(_) | Lexeme::Char(_)
    )
}

pub(crate) fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Lexeme> = None;
    for tok in tokens {
        let space = match prev {
            Some(p) => (is_word(p) && is_word(&tok.lexeme)) || *p == Lexeme::Comma,
            None => false,
        };
        if space {
            out.push(' ');
        }
        out.push_str(&tok.lexeme.spelling());
        prev = Some(&tok.lexeme);
    }
    out
}
