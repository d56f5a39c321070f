use crate::ast::*;
use crate::span::Spanned;
use crate::syntax::lexeme::{Lexeme, DECL_SPECIFIERS};

use super::{Parser, Scope, NON_CALLABLE, TYPE_KEYWORDS};

/// Where a generic declaration ends and what shape it has.
struct DeclExtent {
    /// Index of the declarator name and of its parameter list parens.
    declarator: Option<Declarator>,
    /// Index of the body's `{`, for function definitions.
    body: Option<usize>,
    /// Index of the terminating `;` (or `Eof`) when there is no body.
    end: usize,
}

struct Declarator {
    name: usize,
    /// Written name, e.g. `operator()` for call operators.
    text: String,
    lparen: usize,
    rparen: usize,
}

impl Parser {
    /// Parse declarations until `}` or end of input. The closing brace is not
    /// consumed.
    pub(super) fn parse_decls(&mut self, scope: &Scope) -> Vec<Decl> {
        let mut decls = Vec::new();
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            let before = self.pos;
            if let Some(decl) = self.parse_decl(scope) {
                decls.push(decl);
            }
            if self.pos == before {
                // never stall on a token nothing understands
                self.advance();
            }
        }
        decls
    }

    fn parse_decl(&mut self, scope: &Scope) -> Option<Decl> {
        if self.eat(&Lexeme::Semicolon) {
            return None;
        }

        if matches!(scope, Scope::Record(_))
            && (self.at_ident("public") || self.at_ident("private") || self.at_ident("protected"))
            && *self.peek_at(1) == Lexeme::Colon
        {
            self.advance();
            self.advance();
            return None;
        }

        let mut template_start = None;
        while self.at_ident("template") {
            template_start.get_or_insert(self.pos);
            self.advance();
            if self.at(&Lexeme::Lt) {
                match self.matching_angle(self.pos, self.tokens.len()) {
                    Some(close) => self.pos = close + 1,
                    None => {
                        self.error_at_current("unterminated template parameter list");
                        return None;
                    }
                }
            }
        }

        if self.at_ident("namespace")
            || (self.at_ident("inline") && self.peek_at(1).is_ident("namespace"))
        {
            return Some(self.parse_namespace());
        }

        if self.at_ident("extern") && matches!(self.peek_at(1), Lexeme::Str(_)) {
            return Some(self.parse_linkage(scope));
        }

        if self.at_ident("using") && self.peek_at(1).is_ident("namespace") {
            return Some(self.parse_using_directive());
        }

        if (self.at_ident("struct") || self.at_ident("class") || self.at_ident("union"))
            && self.record_body_ahead()
        {
            return Some(self.parse_record());
        }

        Some(self.parse_generic(scope, template_start))
    }

    fn parse_namespace(&mut self) -> Decl {
        let start = self.pos;
        if self.at_ident("inline") {
            self.advance();
        }
        self.advance(); // namespace

        let mut name: Option<String> = None;
        while let Some(part) = self.peek().ident().map(str::to_string) {
            self.advance();
            name = Some(match name {
                Some(prefix) => format!("{}::{}", prefix, part),
                None => part,
            });
            if !self.eat(&Lexeme::ColonColon) {
                break;
            }
        }

        if !self.at(&Lexeme::LBrace) {
            // namespace alias
            let end = self.skip_to_semicolon();
            return Decl::Other(self.span_between(start, end));
        }

        self.advance();
        let decls = if self.enter_nesting() {
            self.parse_decls(&Scope::Namespace)
        } else {
            Vec::new()
        };
        self.exit_nesting();
        let close = self.pos;
        self.eat(&Lexeme::RBrace);
        Decl::Namespace(NamespaceDecl {
            name,
            span: self.span_between(start, close),
            decls,
        })
    }

    fn parse_linkage(&mut self, scope: &Scope) -> Decl {
        let start = self.pos;
        self.advance(); // extern
        let language = match self.advance().lexeme.clone() {
            Lexeme::Str(lang) => lang,
            _ => String::new(),
        };

        let inner = if *scope == Scope::File {
            Scope::Linkage
        } else {
            scope.clone()
        };

        if self.eat(&Lexeme::LBrace) {
            let decls = self.parse_decls(&inner);
            let close = self.pos;
            self.eat(&Lexeme::RBrace);
            return Decl::Linkage(LinkageDecl {
                language,
                span: self.span_between(start, close),
                decls,
            });
        }

        let before = self.pos;
        let decls: Vec<Decl> = self.parse_decl(&inner).into_iter().collect();
        let last = self.pos.max(before + 1) - 1;
        Decl::Linkage(LinkageDecl {
            language,
            span: self.span_between(start, last),
            decls,
        })
    }

    fn parse_using_directive(&mut self) -> Decl {
        let start = self.pos;
        self.advance(); // using
        self.advance(); // namespace
        self.eat(&Lexeme::ColonColon);
        let mut path = Vec::new();
        while let Some(part) = self.peek().ident().map(str::to_string) {
            path.push(part);
            self.advance();
            if !self.eat(&Lexeme::ColonColon) {
                break;
            }
        }
        let end = self.skip_to_semicolon();
        Decl::UsingDirective(Spanned::new(path, self.span_between(start, end)))
    }

    /// `struct X ... {` with no `(`, `=` or `;` before the brace.
    fn record_body_ahead(&self) -> bool {
        let mut i = self.pos + 1;
        while !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::LBrace => return true,
                Lexeme::Semicolon | Lexeme::LParen | Lexeme::Eq | Lexeme::RBrace => return false,
                _ => i += 1,
            }
        }
        false
    }

    fn parse_record(&mut self) -> Decl {
        let start = self.pos;
        let keyword = self.advance().lexeme.spelling();

        let mut name = None;
        while !self.at(&Lexeme::LBrace) && !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Colon) {
                // base clause
                while !self.at(&Lexeme::LBrace) && !self.at(&Lexeme::Eof) {
                    self.advance();
                }
                break;
            }
            if self.at_ident("__attribute__") {
                self.advance();
                if self.at(&Lexeme::LParen) {
                    self.pos = self.matching(self.pos);
                    self.advance();
                }
                continue;
            }
            if let Some(id) = self.peek().ident() {
                if id != "final" && id != "alignas" {
                    name = Some(id.to_string());
                }
            }
            self.advance();
        }

        self.advance(); // {
        let members = if self.enter_nesting() {
            self.parse_decls(&Scope::Record(name.clone()))
        } else {
            Vec::new()
        };
        self.exit_nesting();
        let close = self.pos;
        self.eat(&Lexeme::RBrace);
        // trailing declarators: `} instance;`
        if !self.at(&Lexeme::Semicolon) && !self.at(&Lexeme::Eof) {
            self.skip_to_semicolon();
        } else {
            self.eat(&Lexeme::Semicolon);
        }

        Decl::Record(RecordDecl {
            keyword,
            name,
            span: self.span_between(start, close),
            members,
        })
    }

    /// Variables, functions, typedefs, enums and everything else.
    fn parse_generic(&mut self, scope: &Scope, template_start: Option<usize>) -> Decl {
        let start = self.pos;
        let extent = self.scan_extent(start, scope);

        let Some(declarator) = extent.declarator else {
            let end = extent.end;
            self.pos = end;
            self.eat(&Lexeme::Semicolon);
            let first = template_start.unwrap_or(start);
            let last = end.saturating_sub(1).max(first);
            return Decl::Other(self.span_between(first, last));
        };

        let head_end = extent.body.unwrap_or(extent.end);
        let (qualifier, destructor) = self.qualifier_before(declarator.name, start);
        let mut name = declarator.text.clone();
        if destructor {
            name.insert(0, '~');
        }
        let params = self.parse_params(declarator.lparen + 1, declarator.rparen);
        let attributes = self.parse_attributes(start, head_end, declarator.name);

        let body = match extent.body {
            Some(open) => {
                self.pos = open;
                let mut scope_vars = Vec::new();
                for p in &params {
                    if let Some(n) = &p.name {
                        scope_vars.push((n.clone(), p.ty.clone()));
                    }
                }
                self.locals.push(scope_vars);
                let block = self.parse_block();
                self.locals.pop();
                Some(block)
            }
            None => {
                self.pos = extent.end;
                None
            }
        };

        let last = match &body {
            // parse_block leaves the cursor after the closing brace
            Some(_) => self.pos - 1,
            None => extent.end.saturating_sub(1).max(declarator.rparen),
        };
        if body.is_none() {
            self.eat(&Lexeme::Semicolon);
        }

        let range = self.range_between(start, last);
        let template_range = template_start.map(|t| self.range_between(t, last));
        let is_entry_point = name == "main"
            && qualifier.is_empty()
            && matches!(scope, Scope::File | Scope::Linkage);

        Decl::Function(FunctionDecl {
            name,
            qualifier,
            name_span: self.tokens[declarator.name].span,
            range,
            template_range,
            params,
            attributes,
            is_entry_point,
            body,
        })
    }

    /// Find the declarator and the end of the declaration starting at `start`
    /// without consuming anything.
    fn scan_extent(&self, start: usize, scope: &Scope) -> DeclExtent {
        let mut declarator: Option<Declarator> = None;
        let mut saw_initializer = false;
        let mut mem_init = false;
        let mut i = start;

        while !self.is_eof(i) {
            match self.lexeme(i) {
                Lexeme::Semicolon => {
                    return DeclExtent { declarator, body: None, end: i };
                }
                Lexeme::RBrace => {
                    // missing `;` before the enclosing scope closes
                    return DeclExtent { declarator, body: None, end: i };
                }
                Lexeme::LBrace => {
                    let prev = &self.tokens[i.saturating_sub(1)].lexeme;
                    let is_member_init =
                        mem_init && (prev.ident().is_some() || *prev == Lexeme::Gt);
                    if declarator.is_some() && !saw_initializer && !is_member_init {
                        return DeclExtent {
                            declarator,
                            body: Some(i),
                            end: i,
                        };
                    }
                    // brace initializer, enum body or member initializer
                    i = self.matching(i) + 1;
                    continue;
                }
                Lexeme::Ident(id) if id == "operator" && declarator.is_none() && !saw_initializer => {
                    if let Some(d) = self.operator_declarator(i) {
                        i = d.rparen + 1;
                        declarator = Some(d);
                        continue;
                    }
                }
                Lexeme::LParen => {
                    if declarator.is_none() && !saw_initializer {
                        if let Some(name) = self.declarator_name(i, start, scope) {
                            let rparen = self.matching(i);
                            declarator = Some(Declarator {
                                name,
                                text: self.lexeme(name).spelling(),
                                lparen: i,
                                rparen,
                            });
                            i = rparen + 1;
                            continue;
                        }
                    }
                    i = self.matching(i) + 1;
                    continue;
                }
                Lexeme::LBracket => {
                    i = self.matching(i) + 1;
                    continue;
                }
                Lexeme::Lt if i > start && self.lexeme(i - 1).ident().is_some() => {
                    if let Some(close) = self.matching_angle(i, self.tokens.len()) {
                        i = close + 1;
                        continue;
                    }
                }
                Lexeme::Eq => {
                    if declarator.is_none() {
                        saw_initializer = true;
                    }
                }
                Lexeme::Colon => {
                    if declarator.is_some() {
                        mem_init = true;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        DeclExtent {
            declarator,
            body: None,
            end: i,
        }
    }

    /// If the `(` at `lparen` opens a function declarator, return the index of
    /// the declarator name.
    fn declarator_name(&self, lparen: usize, start: usize, scope: &Scope) -> Option<usize> {
        if lparen == start {
            return None;
        }
        let name_idx = lparen - 1;
        let name = self.lexeme(name_idx).ident()?;
        if NON_CALLABLE.contains(&name) || TYPE_KEYWORDS.contains(&name) || DECL_SPECIFIERS.contains(&name) {
            return None;
        }

        // walk back over `A::B::` and `~`
        let mut chain_start = name_idx;
        let mut qualifier_last: Option<&str> = None;
        if chain_start > start && self.lexeme(chain_start - 1).is_punct("~") {
            chain_start -= 1;
        }
        while chain_start >= start + 2 && *self.lexeme(chain_start - 1) == Lexeme::ColonColon {
            let q = self.lexeme(chain_start - 2).ident()?;
            qualifier_last.get_or_insert(q);
            chain_start -= 2;
        }
        if chain_start > start && *self.lexeme(chain_start - 1) == Lexeme::ColonColon {
            chain_start -= 1;
        }

        let has_specifiers = (start..chain_start).any(|i| {
            let l = self.lexeme(i);
            l.ident().is_some() || matches!(l, Lexeme::Star | Lexeme::Amp | Lexeme::AmpAmp | Lexeme::Gt)
        });
        if has_specifiers {
            return Some(name_idx);
        }

        // constructors and destructors have no return type
        let destructor = self.lexeme(name_idx.saturating_sub(1)).is_punct("~");
        let in_class_ctor = matches!(scope, Scope::Record(Some(record)) if record == name);
        let out_of_line_ctor = qualifier_last == Some(name);
        (destructor || in_class_ctor || out_of_line_ctor).then_some(name_idx)
    }

    fn operator_declarator(&self, op: usize) -> Option<Declarator> {
        let mut text = String::from("operator");
        let mut i = op + 1;
        if *self.lexeme(i) == Lexeme::LParen && *self.lexeme(i + 1) == Lexeme::RParen {
            text.push_str("()");
            i += 2;
        } else {
            while !self.is_eof(i) && *self.lexeme(i) != Lexeme::LParen {
                if matches!(self.lexeme(i), Lexeme::Semicolon | Lexeme::LBrace) {
                    return None;
                }
                if self.lexeme(i).ident().is_some() {
                    text.push(' ');
                }
                text.push_str(&self.lexeme(i).spelling());
                i += 1;
            }
        }
        if *self.lexeme(i) != Lexeme::LParen {
            return None;
        }
        Some(Declarator {
            name: op,
            text,
            lparen: i,
            rparen: self.matching(i),
        })
    }

    /// Explicit qualifier segments written before the name at `name_idx`,
    /// and whether the name is a destructor.
    fn qualifier_before(&self, name_idx: usize, start: usize) -> (Vec<String>, bool) {
        let mut qualifier = Vec::new();
        let mut i = name_idx;
        let destructor = i > start && self.lexeme(i - 1).is_punct("~");
        if destructor {
            i -= 1;
        }
        while i >= start + 2 && *self.lexeme(i - 1) == Lexeme::ColonColon {
            match self.lexeme(i - 2).ident() {
                Some(q) => qualifier.insert(0, q.to_string()),
                None => break,
            }
            i -= 2;
        }
        (qualifier, destructor)
    }

    /// GNU attributes in `[start, end)`.
    fn parse_attributes(&self, start: usize, end: usize, name_idx: usize) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        let mut i = start;
        while i < end {
            let is_gnu = self.lexeme(i).is_ident("__attribute__")
                && *self.lexeme(i + 1) == Lexeme::LParen
                && *self.lexeme(i + 2) == Lexeme::LParen;
            if !is_gnu {
                i += 1;
                continue;
            }
            let outer_close = self.matching(i + 1);
            let inner_close = self.matching(i + 2);
            for (a, b) in self.split_top_level(i + 3, inner_close) {
                if a >= b {
                    continue;
                }
                let Some(raw_name) = self.lexeme(a).ident() else {
                    continue;
                };
                let name = raw_name
                    .strip_prefix("__")
                    .and_then(|n| n.strip_suffix("__"))
                    .unwrap_or(raw_name)
                    .to_string();
                let mut args = Vec::new();
                if a + 1 < b && *self.lexeme(a + 1) == Lexeme::LParen {
                    let close = self.matching(a + 1);
                    for (x, y) in self.split_top_level(a + 2, close) {
                        if x >= y {
                            continue;
                        }
                        let span = self.span_between(x, y - 1);
                        match self.lexeme(x) {
                            Lexeme::Str(s) if y == x + 1 => {
                                args.push(AttrArg::Str(Spanned::new(s.clone(), span)))
                            }
                            _ => args.push(AttrArg::Other(Spanned::new(self.render(x, y), span))),
                        }
                    }
                }
                let tok = &self.tokens[a];
                attrs.push(Attribute {
                    name,
                    location: tok.span,
                    from_macro: tok.from_macro(),
                    before_name: a < name_idx,
                    args,
                });
            }
            i = outer_close + 1;
        }
        attrs
    }

    /// Advance past the next `;` at bracket depth zero. Returns the index of
    /// the last token before it.
    fn skip_to_semicolon(&mut self) -> usize {
        let start = self.pos;
        while !self.at(&Lexeme::Semicolon) && !self.at(&Lexeme::Eof) && !self.at(&Lexeme::RBrace) {
            if matches!(self.peek(), Lexeme::LParen | Lexeme::LBracket | Lexeme::LBrace) {
                self.pos = self.matching(self.pos);
            }
            self.advance();
        }
        let last = self.pos.saturating_sub(1).max(start);
        self.eat(&Lexeme::Semicolon);
        last
    }
}
