/// Lexemes of the annotated C++ subset the front end understands.
///
/// Keywords are kept as identifiers; the parser decides what they mean in
/// context. Only punctuation that the declaration splitter cares about gets
/// its own variant, the rest is `Punct`.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    Ident(String),
    /// Numeric literal, spelled as written (suffixes included).
    Number(String),
    /// String literal contents with escapes left as written.
    Str(String),
    /// Character literal, spelled as written including quotes.
    Char(String),

    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Lt,        // <
    Gt,        // >
    Comma,     // ,
    Semicolon, // ;
    ColonColon, // ::
    Colon,     // :
    Amp,       // &
    AmpAmp,    // &&
    Star,      // *
    Eq,        // =
    Arrow,     // ->
    Hash,      // #
    /// Any other operator or punctuator, e.g. `+`, `<<=`, `...`.
    Punct(String),

    Eof,
}

impl Lexeme {
    pub fn is_ident(&self, text: &str) -> bool {
        matches!(self, Lexeme::Ident(s) if s == text)
    }

    pub fn is_punct(&self, text: &str) -> bool {
        matches!(self, Lexeme::Punct(s) if s == text)
    }

    pub fn ident(&self) -> Option<&str> {
        match self {
            Lexeme::Ident(s) => Some(s),
            _ => None,
        }
    }

    /// Source spelling, used when rebuilding type text from tokens.
    pub fn spelling(&self) -> String {
        match self {
            Lexeme::Ident(s) | Lexeme::Number(s) | Lexeme::Char(s) | Lexeme::Punct(s) => s.clone(),
            Lexeme::Str(s) => format!("\"{}\"", s),
            Lexeme::LParen => "(".into(),
            Lexeme::RParen => ")".into(),
            Lexeme::LBrace => "{".into(),
            Lexeme::RBrace => "}".into(),
            Lexeme::LBracket => "[".into(),
            Lexeme::RBracket => "]".into(),
            Lexeme::Lt => "<".into(),
            Lexeme::Gt => ">".into(),
            Lexeme::Comma => ",".into(),
            Lexeme::Semicolon => ";".into(),
            Lexeme::ColonColon => "::".into(),
            Lexeme::Colon => ":".into(),
            Lexeme::Amp => "&".into(),
            Lexeme::AmpAmp => "&&".into(),
            Lexeme::Star => "*".into(),
            Lexeme::Eq => "=".into(),
            Lexeme::Arrow => "->".into(),
            Lexeme::Hash => "#".into(),
            Lexeme::Eof => String::new(),
        }
    }
}

/// Keywords that start a statement rather than a declaration.
pub const STATEMENT_KEYWORDS: &[&str] = &[
    "return", "if", "else", "for", "while", "do", "switch", "case", "default", "break",
    "continue", "goto", "delete", "throw", "try", "catch", "co_return", "co_yield",
    "static_assert",
];

/// Specifiers and qualifiers that may appear in a declaration before the name.
pub const DECL_SPECIFIERS: &[&str] = &[
    "static", "inline", "extern", "virtual", "explicit", "constexpr", "consteval",
    "friend", "typename", "const", "volatile", "unsigned", "signed", "mutable",
    "thread_local", "register",
];
