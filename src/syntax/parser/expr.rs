use std::collections::HashSet;

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::{Lexeme, DECL_SPECIFIERS, STATEMENT_KEYWORDS};

use super::{Parser, NON_CALLABLE, TYPE_KEYWORDS};

/// Keywords whose statement is followed by a sub-statement or block.
const COMPOUND_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "try", "catch",
];

/// Storage class specifiers dropped from a local's recorded type.
const STORAGE_CLASS: &[&str] = &["static", "register", "thread_local", "extern", "inline"];

impl Parser {
    /// Parse `{ ... }` at the cursor and leave the cursor after the closing
    /// brace.
    pub(super) fn parse_block(&mut self) -> Block {
        let open = self.pos;
        self.advance(); // {
        self.locals.push(Vec::new());

        let mut stmts = Vec::new();
        if self.enter_nesting() {
            while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
                let before = self.pos;
                if let Some(stmt) = self.parse_stmt() {
                    stmts.push(stmt);
                }
                if self.pos == before {
                    self.advance();
                }
            }
        } else {
            self.pos = self.matching(open);
        }
        self.exit_nesting();
        self.locals.pop();

        let close = self.pos;
        if !self.eat(&Lexeme::RBrace) {
            self.diagnostics.push(Diagnostic::error(
                "unterminated block".to_string(),
                self.tokens[open].span,
            ));
        }
        Block {
            range: self.range_between(open, close),
            stmts,
        }
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        if self.at(&Lexeme::LBrace) {
            return Some(Stmt::Block(self.parse_block()));
        }
        if self.eat(&Lexeme::Semicolon) {
            return None;
        }

        let start = self.pos;
        let first = self.peek().ident().map(str::to_string);
        if let Some(kw) = first.as_deref() {
            if COMPOUND_KEYWORDS.contains(&kw) {
                return Some(self.parse_compound_header(start));
            }
            let is_label = *self.peek_at(1) == Lexeme::Colon;
            if kw == "case" || kw == "default" || is_label {
                let mut i = start;
                while !self.is_eof(i) && *self.lexeme(i) != Lexeme::Colon {
                    if matches!(self.lexeme(i), Lexeme::LParen | Lexeme::LBracket) {
                        i = self.matching(i);
                    }
                    i += 1;
                }
                self.pos = i;
                self.advance();
                return Some(Stmt::Other {
                    span: self.span_between(start, i),
                    exprs: Vec::new(),
                });
            }
        }

        let end = self.statement_end(start);
        let last = end.saturating_sub(1).max(start);
        let span = self.span_between(start, last);

        let is_keyword = first
            .as_deref()
            .is_some_and(|kw| STATEMENT_KEYWORDS.contains(&kw));
        let local = if is_keyword { None } else { self.local_decl(start, end) };

        let stmt = match local {
            Some(local) => {
                for name in &local.names {
                    self.declare_local(name.node.clone(), local.ty.clone());
                }
                Stmt::Local(local)
            }
            None => Stmt::Other {
                span,
                exprs: self.scan_exprs(start, end),
            },
        };

        self.pos = end;
        self.eat(&Lexeme::Semicolon);
        Some(stmt)
    }

    /// `if (...)`, `for (...)`, `else`, `do`... up to the block they govern,
    /// or a whole single-statement form ending in `;`.
    fn parse_compound_header(&mut self, start: usize) -> Stmt {
        let mut i = start;
        let mut ends_with_semicolon = false;
        while !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::LBrace | Lexeme::RBrace => break,
                Lexeme::Semicolon => {
                    ends_with_semicolon = true;
                    break;
                }
                Lexeme::LParen | Lexeme::LBracket => i = self.matching(i),
                _ => {}
            }
            i += 1;
        }

        let last = if ends_with_semicolon { i } else { i.saturating_sub(1).max(start) };
        let exprs = self.scan_exprs(start, i);
        self.pos = if ends_with_semicolon { i + 1 } else { i };
        Stmt::Other {
            span: self.span_between(start, last),
            exprs,
        }
    }

    /// Index of the `;` ending the statement at `start`, or of the `}` / `Eof`
    /// that cuts it short.
    fn statement_end(&self, start: usize) -> usize {
        let mut i = start;
        while !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::Semicolon | Lexeme::RBrace => return i,
                Lexeme::LParen | Lexeme::LBracket | Lexeme::LBrace => i = self.matching(i),
                _ => {}
            }
            i += 1;
        }
        i
    }

    /// Recognise `T name ...` in `[start, end)`.
    fn local_decl(&mut self, start: usize, end: usize) -> Option<LocalVar> {
        let first = self.lexeme(start).ident()?;
        if matches!(first, "using" | "typedef" | "this" | "new" | "co_await") {
            return None;
        }

        let mut k = end;
        let mut i = start;
        while i < end {
            match self.lexeme(i) {
                Lexeme::Eq | Lexeme::LParen | Lexeme::LBrace | Lexeme::LBracket | Lexeme::Comma => {
                    k = i;
                    break;
                }
                Lexeme::Lt if i > start && self.lexeme(i - 1).ident().is_some() => {
                    i = self.matching_angle(i, end)? + 1;
                    continue;
                }
                Lexeme::Ident(_)
                | Lexeme::ColonColon
                | Lexeme::Star
                | Lexeme::Amp
                | Lexeme::AmpAmp => {}
                _ => return None,
            }
            i += 1;
        }

        if k < start + 2 {
            return None;
        }
        let name = self.lexeme(k - 1).ident()?;
        if TYPE_KEYWORDS.contains(&name) || DECL_SPECIFIERS.contains(&name) {
            return None;
        }
        if *self.lexeme(k - 2) == Lexeme::ColonColon {
            return None;
        }

        let type_tokens: Vec<_> = self.tokens[start..k - 1]
            .iter()
            .filter(|t| !t.lexeme.ident().is_some_and(|s| STORAGE_CLASS.contains(&s)))
            .cloned()
            .collect();
        if type_tokens.is_empty() {
            return None;
        }
        let ty = super::render_tokens(&type_tokens);

        let mut names = vec![Spanned::new(name.to_string(), self.tokens[k - 1].span)];
        let groups = self.split_top_level(start, end);
        let first_end = groups.first().map(|g| g.1).unwrap_or(end);
        let mut exprs = if k < first_end {
            self.scan_exprs(k, first_end)
        } else {
            Vec::new()
        };
        for (a, b) in groups.into_iter().skip(1) {
            let Some(x) = (a..b).find(|&x| self.lexeme(x).ident().is_some()) else {
                continue;
            };
            if let Some(extra) = self.lexeme(x).ident() {
                names.push(Spanned::new(extra.to_string(), self.tokens[x].span));
            }
            exprs.extend(self.scan_exprs(x + 1, b));
        }

        Some(LocalVar {
            names,
            ty,
            span: self.span_between(start, end.saturating_sub(1).max(start)),
            exprs,
        })
    }

    /// Collect the calls and lambdas in `[start, end)`. Moves the cursor.
    pub(super) fn scan_exprs(&mut self, start: usize, end: usize) -> Vec<Expr> {
        let mut exprs = Vec::new();
        let mut i = start;
        while i < end && !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::LBracket if self.lambda_can_start(i, start) => {
                    if let Some((lambda, next)) = self.parse_lambda(i, end) {
                        exprs.push(Expr::Lambda(lambda));
                        i = next;
                        continue;
                    }
                }
                Lexeme::Ident(_) | Lexeme::ColonColon => {
                    if let Some((call, next)) = self.parse_call(i, end) {
                        exprs.push(Expr::Call(call));
                        i = next;
                        continue;
                    }
                    if let Some((_, next)) = self.parse_path(i, end) {
                        i = next.max(i + 1);
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        exprs
    }

    fn lambda_can_start(&self, i: usize, start: usize) -> bool {
        if *self.lexeme(i + 1) == Lexeme::LBracket {
            // [[attribute]]
            return false;
        }
        if i == start {
            return true;
        }
        match self.lexeme(i - 1) {
            Lexeme::Ident(kw) => matches!(kw.as_str(), "return" | "co_return" | "co_yield"),
            Lexeme::RParen
            | Lexeme::RBracket
            | Lexeme::Number(_)
            | Lexeme::Str(_)
            | Lexeme::Char(_) => false,
            _ => true,
        }
    }

    /// `a::b<T>::c` starting at `i`; returns the segments and the index after
    /// the path.
    fn parse_path(&self, i: usize, end: usize) -> Option<(Vec<String>, usize)> {
        let mut j = i;
        if *self.lexeme(j) == Lexeme::ColonColon {
            j += 1;
        }
        let mut segments = Vec::new();
        while j < end {
            let Some(id) = self.lexeme(j).ident() else {
                break;
            };
            segments.push(id.to_string());
            j += 1;
            if *self.lexeme(j) == Lexeme::Lt && !NON_CALLABLE.contains(&id) {
                if let Some(close) = self.matching_angle(j, end) {
                    j = close + 1;
                }
            }
            if *self.lexeme(j) == Lexeme::ColonColon && self.lexeme(j + 1).ident().is_some() {
                j += 1;
                continue;
            }
            break;
        }
        (!segments.is_empty()).then_some((segments, j))
    }

    fn parse_call(&mut self, i: usize, end: usize) -> Option<(CallExpr, usize)> {
        let (callee, j) = self.parse_path(i, end)?;
        let last = callee.last()?.as_str();
        if NON_CALLABLE.contains(&last) || STATEMENT_KEYWORDS.contains(&last) {
            return None;
        }
        if j >= end || *self.lexeme(j) != Lexeme::LParen {
            return None;
        }
        let close = self.matching(j);
        if close >= end {
            return None;
        }

        let is_member = i > 0
            && (*self.lexeme(i - 1) == Lexeme::Arrow || self.lexeme(i - 1).is_punct("."));

        let mut args = Vec::new();
        for (a, b) in self.split_top_level(j + 1, close) {
            if a >= b {
                continue;
            }
            let span = self.span_between(a, b - 1);
            let exprs = self.scan_exprs(a, b);
            let lambda = match exprs.as_slice() {
                [Expr::Lambda(l)] if l.span == span => Some(Box::new(l.clone())),
                _ => None,
            };
            args.push(CallArg { span, exprs, lambda });
        }

        let call = CallExpr {
            callee,
            is_member,
            span: self.span_between(i, close),
            args,
        };
        Some((call, close + 1))
    }

    fn parse_lambda(&mut self, i: usize, end: usize) -> Option<(LambdaExpr, usize)> {
        let rbracket = self.matching(i);
        if rbracket >= end {
            return None;
        }

        let mut default_capture = None;
        let mut explicit: Vec<(String, CaptureKind, Span)> = Vec::new();
        for (a, b) in self.split_top_level(i + 1, rbracket) {
            if a >= b {
                continue;
            }
            let span = self.span_between(a, b - 1);
            let group: Vec<&Lexeme> = (a..b).map(|k| self.lexeme(k)).collect();
            let capture = match group.as_slice() {
                [Lexeme::Amp] => {
                    default_capture = Some(CaptureDefault::ByRef);
                    None
                }
                [Lexeme::Eq] => {
                    default_capture = Some(CaptureDefault::ByCopy);
                    None
                }
                [Lexeme::Ident(t)] if t == "this" => Some((t.clone(), CaptureKind::This)),
                [Lexeme::Star, Lexeme::Ident(t)] if t == "this" => {
                    Some((t.clone(), CaptureKind::StarThis))
                }
                [Lexeme::Amp, Lexeme::Ident(n)] | [Lexeme::Amp, Lexeme::Ident(n), Lexeme::Punct(_)] => {
                    Some((n.clone(), CaptureKind::ByRef))
                }
                [Lexeme::Ident(n)] | [Lexeme::Ident(n), Lexeme::Punct(_)] => {
                    Some((n.clone(), CaptureKind::ByCopy))
                }
                [Lexeme::Ident(n), Lexeme::Eq | Lexeme::LBrace | Lexeme::LParen, ..]
                | [Lexeme::Amp, Lexeme::Ident(n), Lexeme::Eq | Lexeme::LBrace | Lexeme::LParen, ..] => {
                    Some((n.clone(), CaptureKind::Init))
                }
                _ => None,
            };
            if let Some((name, kind)) = capture {
                explicit.push((name, kind, span));
            }
        }

        let mut j = rbracket + 1;
        if *self.lexeme(j) == Lexeme::Lt {
            j = self.matching_angle(j, end)? + 1;
        }

        let mut params = Vec::new();
        let mut params_span = None;
        if *self.lexeme(j) == Lexeme::LParen {
            let close = self.matching(j);
            if close >= end {
                return None;
            }
            params = self.parse_params(j + 1, close);
            params_span = Some(self.span_between(j, close));
            j = close + 1;
        }

        while j < end {
            match self.lexeme(j) {
                Lexeme::Ident(s) if matches!(s.as_str(), "mutable" | "constexpr" | "consteval" | "static") => {
                    j += 1;
                }
                Lexeme::Ident(s) if matches!(s.as_str(), "noexcept" | "__attribute__" | "requires") => {
                    j += 1;
                    if *self.lexeme(j) == Lexeme::LParen {
                        j = self.matching(j) + 1;
                    }
                }
                Lexeme::Arrow => {
                    j += 1;
                    while j < end && *self.lexeme(j) != Lexeme::LBrace {
                        if matches!(self.lexeme(j), Lexeme::LParen | Lexeme::LBracket) {
                            j = self.matching(j);
                        }
                        j += 1;
                    }
                }
                _ => break,
            }
        }
        if j >= end || *self.lexeme(j) != Lexeme::LBrace {
            return None;
        }

        let param_scope = params
            .iter()
            .filter_map(|p| p.name.clone().map(|n| (n, p.ty.clone())))
            .collect();
        self.locals.push(param_scope);
        self.pos = j;
        let body = self.parse_block();
        let next = self.pos;
        self.locals.pop();

        let mut declared_inside: HashSet<String> =
            params.iter().filter_map(|p| p.name.clone()).collect();
        collect_local_names(&body, &mut declared_inside);

        let mut captures = Vec::new();
        let mut seen = HashSet::new();
        for (name, kind, span) in explicit {
            let ty = match kind {
                CaptureKind::ByRef | CaptureKind::ByCopy => {
                    self.lookup_local(&name).map(str::to_string)
                }
                _ => None,
            };
            seen.insert(name.clone());
            captures.push(Capture {
                name,
                kind,
                ty,
                implicit: false,
                span,
            });
        }

        if let Some(default) = default_capture {
            let implicit_kind = match default {
                CaptureDefault::ByRef => CaptureKind::ByRef,
                CaptureDefault::ByCopy => CaptureKind::ByCopy,
            };
            for k in j + 1..next.saturating_sub(1) {
                let Lexeme::Ident(id) = self.lexeme(k) else {
                    continue;
                };
                let qualified_or_member = matches!(self.lexeme(k - 1), Lexeme::ColonColon | Lexeme::Arrow)
                    || self.lexeme(k - 1).is_punct(".")
                    || *self.lexeme(k + 1) == Lexeme::ColonColon;
                if qualified_or_member || seen.contains(id) {
                    continue;
                }
                if id == "this" {
                    seen.insert(id.clone());
                    captures.push(Capture {
                        name: id.clone(),
                        kind: CaptureKind::This,
                        ty: None,
                        implicit: true,
                        span: self.tokens[k].span,
                    });
                    continue;
                }
                if declared_inside.contains(id) {
                    continue;
                }
                if let Some(ty) = self.lookup_local(id) {
                    captures.push(Capture {
                        name: id.clone(),
                        kind: implicit_kind.clone(),
                        ty: Some(ty.to_string()),
                        implicit: true,
                        span: self.tokens[k].span,
                    });
                    seen.insert(id.clone());
                }
            }
        }

        let lambda = LambdaExpr {
            span: self.span_between(i, next.saturating_sub(1).max(i)),
            introducer: self.span_between(i, rbracket),
            default_capture,
            captures,
            params,
            params_span,
            body,
        };
        Some((lambda, next))
    }
}

fn collect_local_names(block: &Block, out: &mut HashSet<String>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Local(local) => {
                out.extend(local.names.iter().map(|n| n.node.clone()));
            }
            Stmt::Block(inner) => collect_local_names(inner, out),
            Stmt::Other { .. } => {}
        }
    }
}
