use crate::diagnostic::Diagnostic;
use crate::span::{MacroPosition, Span};
use crate::syntax::lexeme::Lexeme;

/// A lexed token.
///
/// `span` is always a location in the main file. For tokens produced by a
/// macro expansion it is the span of the macro use, and `spelling` points at
/// the token inside the `#define`.
#[derive(Clone, Debug)]
pub struct Token {
    pub lexeme: Lexeme,
    pub span: Span,
    /// First token on its physical line (ignoring line continuations).
    pub at_line_start: bool,
    pub macro_pos: MacroPosition,
    pub spelling: Option<Span>,
}

impl Token {
    pub fn is(&self, lexeme: &Lexeme) -> bool {
        &self.lexeme == lexeme
    }

    pub fn is_ident(&self, text: &str) -> bool {
        self.lexeme.is_ident(text)
    }

    pub fn from_macro(&self) -> bool {
        self.macro_pos != MacroPosition::File
    }
}

/// Raw lexer over the main file. Comments and whitespace are skipped;
/// preprocessor directives come out as ordinary tokens starting with `#`.
pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    line_start: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            line_start: true,
            diagnostics: Vec::new(),
        }
    }

    /// Start lexing at `offset`, as if a token had just ended there.
    pub fn at(source: &'src str, offset: u32) -> Self {
        Self {
            source: source.as_bytes(),
            pos: (offset as usize).min(source.len()),
            line_start: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.lexeme == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if let Some(tok) = self.scan_string_with_prefix(start) {
                return tok;
            }

            if is_ident_start(ch) {
                return self.scan_ident(start);
            }

            if ch.is_ascii_digit()
                || (ch == b'.' && self.peek(1).is_some_and(|c| c.is_ascii_digit()))
            {
                return self.scan_number(start);
            }

            if ch == b'"' {
                return self.scan_string(start, start);
            }

            if ch == b'\'' {
                return self.scan_char(start);
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // stray byte recorded as a diagnostic; keep going
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn text(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.source[start..end]).into_owned()
    }

    fn make_token(&mut self, lexeme: Lexeme, start: usize, end: usize) -> Token {
        let at_line_start = self.line_start;
        self.line_start = false;
        Token {
            lexeme,
            span: Span::new(start as u32, end as u32),
            at_line_start,
            macro_pos: MacroPosition::File,
            spelling: None,
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek(0) {
                Some(b'\n') => {
                    self.line_start = true;
                    self.pos += 1;
                }
                Some(b'\\') if self.peek(1) == Some(b'\n') => {
                    self.pos += 2;
                }
                Some(b'\\') if self.peek(1) == Some(b'\r') && self.peek(2) == Some(b'\n') => {
                    self.pos += 3;
                }
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek(1) == Some(b'/') => {
                    while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.pos + 1 >= self.source.len() {
                            self.pos = self.source.len();
                            self.diagnostics.push(Diagnostic::error(
                                "unterminated block comment".to_string(),
                                Span::new(start as u32, self.pos as u32),
                            ));
                            break;
                        }
                        if self.source[self.pos] == b'*' && self.source[self.pos + 1] == b'/' {
                            self.pos += 2;
                            break;
                        }
                        if self.source[self.pos] == b'\n' {
                            self.line_start = true;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_ident(&mut self, start: usize) -> Token {
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = self.text(start, self.pos);
        self.make_token(Lexeme::Ident(text), start, self.pos)
    }

    /// Encoding-prefixed and raw string literals: `u8"..."`, `L"..."`, `R"d(...)d"`.
    fn scan_string_with_prefix(&mut self, start: usize) -> Option<Token> {
        let rest = &self.source[start..];
        let prefixes: [&[u8]; 5] = [b"u8", b"u", b"U", b"L", b""];
        for prefix in prefixes {
            if !rest.starts_with(prefix) {
                continue;
            }
            let after = &rest[prefix.len()..];
            if after.starts_with(b"R\"") {
                self.pos = start + prefix.len() + 2;
                return Some(self.scan_raw_string(start));
            }
            if !prefix.is_empty() && after.first() == Some(&b'"') {
                self.pos = start + prefix.len();
                return Some(self.scan_string(start, self.pos));
            }
        }
        None
    }

    fn scan_string(&mut self, start: usize, quote: usize) -> Token {
        self.pos = quote + 1;
        let body_start = self.pos;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => {
                    self.diagnostics.push(Diagnostic::error(
                        "unterminated string literal".to_string(),
                        Span::new(start as u32, self.pos as u32),
                    ));
                    let body = self.text(body_start, self.pos);
                    return self.make_token(Lexeme::Str(body), start, self.pos);
                }
                Some(b'\\') => self.pos += 2,
                Some(b'"') => break,
                Some(_) => self.pos += 1,
            }
        }
        let body = self.text(body_start, self.pos.min(self.source.len()));
        self.pos += 1;
        self.make_token(Lexeme::Str(body), start, self.pos)
    }

    fn scan_raw_string(&mut self, start: usize) -> Token {
        let delim_start = self.pos;
        while self.pos < self.source.len() && self.source[self.pos] != b'(' {
            self.pos += 1;
        }
        let delim = self.source[delim_start..self.pos].to_vec();
        self.pos += 1;
        let body_start = self.pos;
        let mut closing = vec![b')'];
        closing.extend_from_slice(&delim);
        closing.push(b'"');
        while self.pos < self.source.len() {
            if self.source[self.pos..].starts_with(&closing) {
                let body = self.text(body_start, self.pos);
                self.pos += closing.len();
                return self.make_token(Lexeme::Str(body), start, self.pos);
            }
            self.pos += 1;
        }
        self.diagnostics.push(Diagnostic::error(
            "unterminated raw string literal".to_string(),
            Span::new(start as u32, self.pos as u32),
        ));
        let body = self.text(body_start.min(self.source.len()), self.source.len());
        self.make_token(Lexeme::Str(body), start, self.pos)
    }

    fn scan_char(&mut self, start: usize) -> Token {
        self.pos += 1;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => {
                    self.diagnostics.push(Diagnostic::error(
                        "unterminated character literal".to_string(),
                        Span::new(start as u32, self.pos as u32),
                    ));
                    break;
                }
                Some(b'\\') => self.pos += 2,
                Some(b'\'') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        let end = self.pos.min(self.source.len());
        let text = self.text(start, end);
        self.make_token(Lexeme::Char(text), start, end)
    }

    fn scan_number(&mut self, start: usize) -> Token {
        while let Some(c) = self.peek(0) {
            // pp-number rule: a sign directly after an exponent letter belongs to the number
            let exponent_sign = (c == b'+' || c == b'-')
                && matches!(self.source[self.pos - 1], b'e' | b'E' | b'p' | b'P');
            if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' || c == b'\'' || exponent_sign
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = self.text(start, self.pos);
        self.make_token(Lexeme::Number(text), start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Token> {
        let ch = self.source[self.pos];
        let next = self.peek(1);
        let next2 = self.peek(2);

        let (lexeme, len) = match ch {
            b'(' => (Lexeme::LParen, 1),
            b')' => (Lexeme::RParen, 1),
            b'{' => (Lexeme::LBrace, 1),
            b'}' => (Lexeme::RBrace, 1),
            b'[' => (Lexeme::LBracket, 1),
            b']' => (Lexeme::RBracket, 1),
            b',' => (Lexeme::Comma, 1),
            b';' => (Lexeme::Semicolon, 1),
            b'#' if next == Some(b'#') => (Lexeme::Punct("##".into()), 2),
            b'#' => (Lexeme::Hash, 1),
            b':' if next == Some(b':') => (Lexeme::ColonColon, 2),
            b':' => (Lexeme::Colon, 1),
            b'&' if next == Some(b'&') => (Lexeme::AmpAmp, 2),
            b'&' if next == Some(b'=') => (Lexeme::Punct("&=".into()), 2),
            b'&' => (Lexeme::Amp, 1),
            b'*' if next == Some(b'=') => (Lexeme::Punct("*=".into()), 2),
            b'*' => (Lexeme::Star, 1),
            b'=' if next == Some(b'=') => (Lexeme::Punct("==".into()), 2),
            b'=' => (Lexeme::Eq, 1),
            b'-' if next == Some(b'>') && next2 == Some(b'*') => (Lexeme::Punct("->*".into()), 3),
            b'-' if next == Some(b'>') => (Lexeme::Arrow, 2),
            b'<' if next == Some(b'<') && next2 == Some(b'=') => (Lexeme::Punct("<<=".into()), 3),
            b'<' if next == Some(b'<') => (Lexeme::Punct("<<".into()), 2),
            b'<' if next == Some(b'=') => (Lexeme::Punct("<=".into()), 2),
            b'<' => (Lexeme::Lt, 1),
            // `>>` stays two tokens so nested template argument lists close.
            b'>' if next == Some(b'=') => (Lexeme::Punct(">=".into()), 2),
            b'>' => (Lexeme::Gt, 1),
            b'.' if next == Some(b'.') && next2 == Some(b'.') => (Lexeme::Punct("...".into()), 3),
            b'.' if next == Some(b'*') => (Lexeme::Punct(".*".into()), 2),
            b'+' | b'-' | b'|' if next == Some(ch) => {
                (Lexeme::Punct(self.text(start, start + 2)), 2)
            }
            b'+' | b'-' | b'/' | b'%' | b'^' | b'|' | b'!' if next == Some(b'=') => {
                (Lexeme::Punct(self.text(start, start + 2)), 2)
            }
            b'+' | b'-' | b'/' | b'%' | b'^' | b'|' | b'!' | b'~' | b'?' | b'.' => {
                (Lexeme::Punct(self.text(start, start + 1)), 1)
            }
            _ => {
                self.pos += 1;
                self.diagnostics.push(Diagnostic::error(
                    format!("unexpected character '{}'", ch as char),
                    Span::new(start as u32, self.pos as u32),
                ));
                return None;
            }
        };

        self.pos += len;
        Some(self.make_token(lexeme, start, self.pos))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_' || ch == b'$'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'$'
}
