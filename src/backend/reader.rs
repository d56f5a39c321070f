//! Reader for the textual module form: the LLVM assembly subset clang
//! emits for C-like code, with typed (`i32*`) or opaque (`ptr`) pointers.
//!
//! ```text
//! target triple = "x86_64-unknown-linux-gnu"
//!
//! %struct.P = type { i32, i32 }
//!
//! define dso_local i32 @second(ptr noundef %p) #0 {
//!   %1 = getelementptr inbounds %struct.P, ptr %p, i32 0, i32 1
//!   %2 = load i32, ptr %1, align 4
//!   ret i32 %2
//! }
//!
//! !llvm.ident = !{!0}
//! !0 = !{!"clang version 18.1.3"}
//! ```
//!
//! Metadata, attribute groups, comdats and debug records are skipped.

use crate::error::ReadError;

use super::ir::{
    indexed_type, BasicBlock, BinOp, CastOp, FloatPredicate, Function, Global, Instruction,
    IntPredicate, Linkage, Module, Param, StructType, Terminator, Type, Value,
};

/// Parse a whole module. `name` becomes the module name.
pub fn read_module(name: &str, text: &str) -> Result<Module, ReadError> {
    let tokens = tokenize(text)?;
    let mut reader = Reader {
        tokens,
        pos: 0,
        module: Module::new(name),
        literal_structs: 0,
    };
    reader.parse_module()?;
    log::debug!(
        "read module {}: {} struct types, {} globals, {} functions",
        name,
        reader.module.structs.len(),
        reader.module.globals.len(),
        reader.module.functions.len()
    );
    Ok(reader.module)
}

// ─── Tokens ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Local(String),
    Global(String),
    Word(String),
    /// `name:` at the start of a block.
    Label(String),
    Int(i64),
    Float(f64),
    /// `0x...` float constant, as IEEE double bits.
    HexFloat(u64),
    Str(String),
    /// `c"..."` with escapes decoded.
    Bytes(Vec<u8>),
    Punct(char),
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Local(n) => format!("'%{}'", n),
            Tok::Global(n) => format!("'@{}'", n),
            Tok::Word(w) => format!("'{}'", w),
            Tok::Label(l) => format!("label '{}:'", l),
            Tok::Int(v) => format!("'{}'", v),
            Tok::Float(v) => format!("'{}'", v),
            Tok::HexFloat(bits) => format!("'0x{:X}'", bits),
            Tok::Str(s) => format!("\"{}\"", s),
            Tok::Bytes(b) => format!("c\"{}\"", String::from_utf8_lossy(b)),
            Tok::Punct(c) => format!("'{}'", c),
            Tok::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b'$')
}

/// `\\` and `\XX` escapes of a `c"..."` constant.
fn decode_bytes(raw: &str) -> Option<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
        } else if bytes.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let hex = raw.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        }
    }
    Some(out)
}

fn tokenize(text: &str) -> Result<Vec<Token>, ReadError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let column = i - line_start + 1;
        let err = |message: String| ReadError {
            line,
            column,
            message,
        };

        if c == b'\n' {
            i += 1;
            line += 1;
            line_start = i;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b';' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        let tok = match c {
            b'%' | b'@' => {
                let start = i + 1;
                let name = if bytes.get(start) == Some(&b'"') {
                    let end = text[start + 1..]
                        .find('"')
                        .map(|n| start + 1 + n)
                        .ok_or_else(|| err("unterminated quoted name".to_string()))?;
                    i = end + 1;
                    text[start + 1..end].to_string()
                } else {
                    let mut j = start;
                    while j < bytes.len() && (is_name_char(bytes[j]) || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j == start {
                        return Err(err(format!("expected a name after '{}'", c as char)));
                    }
                    i = j;
                    text[start..j].to_string()
                };
                if c == b'%' {
                    Tok::Local(name)
                } else {
                    Tok::Global(name)
                }
            }
            b'"' => {
                let end = text[i + 1..]
                    .find('"')
                    .map(|n| i + 1 + n)
                    .ok_or_else(|| err("unterminated string".to_string()))?;
                let s = text[i + 1..end].to_string();
                i = end + 1;
                Tok::Str(s)
            }
            b'c' if bytes.get(i + 1) == Some(&b'"') => {
                let end = text[i + 2..]
                    .find('"')
                    .map(|n| i + 2 + n)
                    .ok_or_else(|| err("unterminated string".to_string()))?;
                let decoded = decode_bytes(&text[i + 2..end])
                    .ok_or_else(|| err("bad escape in byte string".to_string()))?;
                i = end + 1;
                Tok::Bytes(decoded)
            }
            b'0'..=b'9' | b'-' | b'+' => {
                let start = i;
                if bytes[i..].starts_with(b"0x") {
                    let mut j = i + 2;
                    while j < bytes.len() && bytes[j].is_ascii_hexdigit() {
                        j += 1;
                    }
                    let bits = u64::from_str_radix(&text[i + 2..j], 16)
                        .map_err(|e| err(format!("bad hex constant: {}", e)))?;
                    i = j;
                    Tok::HexFloat(bits)
                } else {
                    let mut j = i + 1;
                    let mut is_float = false;
                    while j < bytes.len() {
                        let d = bytes[j];
                        if d.is_ascii_digit() {
                            j += 1;
                        } else if d == b'.' || d == b'e' || d == b'E' {
                            is_float = true;
                            j += 1;
                            if j < bytes.len() && (bytes[j] == b'-' || bytes[j] == b'+') {
                                j += 1;
                            }
                        } else {
                            break;
                        }
                    }
                    let literal = &text[start..j];
                    if bytes.get(j) == Some(&b':') {
                        i = j + 1;
                        Tok::Label(literal.to_string())
                    } else if is_float {
                        i = j;
                        Tok::Float(
                            literal
                                .parse()
                                .map_err(|_| err(format!("bad float constant '{}'", literal)))?,
                        )
                    } else {
                        i = j;
                        Tok::Int(
                            literal
                                .parse()
                                .map_err(|_| err(format!("bad integer constant '{}'", literal)))?,
                        )
                    }
                }
            }
            c if c.is_ascii_alphabetic() || matches!(c, b'_' | b'.' | b'$') => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && is_name_char(bytes[j]) {
                    j += 1;
                }
                let word = &text[start..j];
                if bytes.get(j) == Some(&b':') {
                    i = j + 1;
                    Tok::Label(word.to_string())
                } else {
                    i = j;
                    Tok::Word(word.to_string())
                }
            }
            // `|` only appears between debug-info flags
            b'=' | b',' | b'(' | b')' | b'{' | b'}' | b'[' | b']' | b'*' | b'#' | b'!' | b'<'
            | b'>' | b'|' => {
                i += 1;
                Tok::Punct(c as char)
            }
            other => return Err(err(format!("unexpected character '{}'", other as char))),
        };
        tokens.push(Token { tok, line, column });
    }

    let column = bytes.len() - line_start + 1;
    tokens.push(Token {
        tok: Tok::Eof,
        line,
        column,
    });
    Ok(tokens)
}

// ─── Parser ────────────────────────────────────────────────────────

/// Parameter and return attributes that carry no meaning for the emitter.
const SKIPPED_ATTRIBUTES: &[&str] = &[
    "signext", "zeroext", "noalias", "nocapture", "readonly", "readnone", "writeonly", "nonnull",
    "inreg", "noundef", "returned", "immarg", "nofree", "nest", "writable", "dead_on_unwind",
    "allocalign", "allocptr", "swiftself", "swifterror", "swiftasync", "byval", "sret",
];

/// Attributes written with a parenthesised argument, e.g. `dereferenceable(8)`.
const GROUP_ATTRIBUTES: &[&str] = &[
    "dereferenceable", "dereferenceable_or_null", "byval", "byref", "sret", "inalloca",
    "preallocated", "elementtype", "captures", "range", "nofpclass", "initializes", "alignstack",
    "memory",
];

/// Linkage, visibility, storage and calling-convention keywords.
const DECLARATION_WORDS: &[&str] = &[
    "dso_local", "dso_preemptable", "hidden", "protected", "default", "unnamed_addr",
    "local_unnamed_addr", "linkonce", "linkonce_odr", "weak", "weak_odr", "common",
    "available_externally", "appending", "dllimport", "dllexport", "externally_initialized",
    "ccc", "fastcc", "coldcc", "spir_kernel", "spir_func", "thread_local",
];

/// Wrap flags and fast-math flags on arithmetic, casts, compares and calls.
const INSTRUCTION_FLAGS: &[&str] = &[
    "nsw", "nuw", "exact", "disjoint", "nneg", "samesign", "fast", "nnan", "ninf", "nsz", "arcp",
    "contract", "afn", "reassoc",
];

struct Reader {
    tokens: Vec<Token>,
    pos: usize,
    module: Module,
    /// Counter naming anonymous `{ ... }` types.
    literal_structs: usize,
}

impl Reader {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: String) -> ReadError {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        ReadError {
            line: token.line,
            column: token.column,
            message,
        }
    }

    fn unexpected(&self, expected: &str) -> ReadError {
        self.error(format!("expected {}, found {}", expected, self.peek().describe()))
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Word(w) if w == word)
    }

    fn at_word_in(&self, words: &[&str]) -> bool {
        matches!(self.peek(), Tok::Word(w) if words.contains(&w.as_str()))
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if *self.peek() == Tok::Punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ReadError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ReadError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    fn word(&mut self) -> Result<String, ReadError> {
        match self.peek().clone() {
            Tok::Word(w) => {
                self.advance();
                Ok(w)
            }
            _ => Err(self.unexpected("a keyword")),
        }
    }

    fn local(&mut self) -> Result<String, ReadError> {
        match self.peek().clone() {
            Tok::Local(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a local value")),
        }
    }

    fn global(&mut self) -> Result<String, ReadError> {
        match self.peek().clone() {
            Tok::Global(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a global name")),
        }
    }

    fn string(&mut self) -> Result<String, ReadError> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.unexpected("a string")),
        }
    }

    fn at_line_start(&self) -> bool {
        self.pos > 0
            && self.pos < self.tokens.len()
            && self.tokens[self.pos].line != self.tokens[self.pos - 1].line
    }

    /// Consume the rest of the current line.
    fn skip_line(&mut self) {
        self.advance();
        while !self.at_line_start() && *self.peek() != Tok::Eof {
            self.advance();
        }
    }

    /// Consume a balanced `( ... )` group starting at the current token.
    fn skip_group(&mut self) -> Result<(), ReadError> {
        self.expect_punct('(')?;
        let mut depth = 1;
        while depth > 0 {
            match self.advance() {
                Tok::Punct('(') => depth += 1,
                Tok::Punct(')') => depth -= 1,
                Tok::Eof => return Err(self.unexpected("')'")),
                _ => {}
            }
        }
        Ok(())
    }

    /// Parameter, return and argument attributes.
    fn skip_value_attributes(&mut self) -> Result<(), ReadError> {
        loop {
            if self.at_word_in(GROUP_ATTRIBUTES) && *self.peek_at(1) == Tok::Punct('(') {
                self.advance();
                self.skip_group()?;
            } else if self.at_word_in(SKIPPED_ATTRIBUTES) {
                self.advance();
            } else if self.at_word("align") && matches!(self.peek_at(1), Tok::Int(_)) {
                self.advance();
                self.advance();
            } else {
                return Ok(());
            }
        }
    }

    fn skip_flags(&mut self) {
        while self.at_word_in(INSTRUCTION_FLAGS) {
            self.advance();
        }
    }

    /// `, align N`, `, section "s"`, `, comdat` and `, !md !N` suffixes.
    fn skip_trailing_annotations(&mut self) {
        const ANNOTATIONS: &[&str] = &["align", "section", "comdat", "partition", "code_model"];
        while *self.peek() == Tok::Punct(',')
            && (matches!(self.peek_at(1), Tok::Word(w) if ANNOTATIONS.contains(&w.as_str()))
                || *self.peek_at(1) == Tok::Punct('!'))
        {
            self.advance();
            while !matches!(self.peek(), Tok::Punct(',') | Tok::Label(_) | Tok::Eof | Tok::Punct('}'))
                && !self.at_line_start()
            {
                self.advance();
            }
        }
    }

    // --- Top level ---

    fn parse_module(&mut self) -> Result<(), ReadError> {
        loop {
            match self.peek().clone() {
                Tok::Eof => return Ok(()),
                Tok::Word(w) if w == "target" => self.parse_target()?,
                Tok::Word(w) if w == "source_filename" => {
                    self.advance();
                    self.expect_punct('=')?;
                    self.string()?;
                }
                Tok::Word(w) if w == "attributes" => self.skip_attribute_group()?,
                // comdat selections, module asm and named or numbered metadata
                Tok::Word(w) if w.starts_with('$') || w == "module" => self.skip_line(),
                Tok::Punct('!') => self.skip_line(),
                Tok::Word(w) if w == "declare" => {
                    self.advance();
                    let (linkage, _) = self.parse_linkage()?;
                    let func = self.parse_signature(linkage, false)?;
                    if func.name.starts_with("llvm.dbg.") {
                        log::trace!("dropping debug intrinsic @{}", func.name);
                    } else {
                        self.module.functions.push(func);
                    }
                }
                Tok::Word(w) if w == "define" => {
                    self.advance();
                    let (linkage, _) = self.parse_linkage()?;
                    let mut func = self.parse_signature(linkage, true)?;
                    let implicit_entry = func
                        .params
                        .iter()
                        .filter(|p| p.name.parse::<u64>().is_ok())
                        .count()
                        .to_string();
                    func.blocks = self.parse_body(&implicit_entry)?;
                    self.module.functions.push(func);
                }
                Tok::Local(_) => self.parse_struct_definition()?,
                Tok::Global(_) => self.parse_global()?,
                _ => return Err(self.unexpected("a top-level entity")),
            }
        }
    }

    fn parse_target(&mut self) -> Result<(), ReadError> {
        self.expect_word("target")?;
        let which = self.word()?;
        self.expect_punct('=')?;
        let value = self.string()?;
        match which.as_str() {
            "triple" => self.module.triple = Some(value),
            "datalayout" => self.module.data_layout = Some(value),
            other => return Err(self.error(format!("unknown target property '{}'", other))),
        }
        Ok(())
    }

    fn skip_attribute_group(&mut self) -> Result<(), ReadError> {
        while *self.peek() != Tok::Punct('{') {
            if *self.peek() == Tok::Eof {
                return Err(self.unexpected("'{'"));
            }
            self.advance();
        }
        while !self.eat_punct('}') {
            if *self.peek() == Tok::Eof {
                return Err(self.unexpected("'}'"));
            }
            self.advance();
        }
        Ok(())
    }

    /// `%name = type { ... }`, `type <{ ... }>` or `type opaque`.
    fn parse_struct_definition(&mut self) -> Result<(), ReadError> {
        let name = self.local()?;
        self.expect_punct('=')?;
        self.expect_word("type")?;
        let def = if self.eat_word("opaque") {
            StructType {
                name,
                fields: Vec::new(),
                packed: false,
                opaque: true,
            }
        } else {
            let packed = self.eat_punct('<');
            let fields = self.parse_struct_body()?;
            if packed {
                self.expect_punct('>')?;
            }
            StructType {
                name,
                fields,
                packed,
                opaque: false,
            }
        };
        if let Some(existing) = self.module.structs.iter_mut().find(|s| s.name == def.name) {
            if !existing.opaque {
                return Err(self.error(format!("struct type '%{}' is defined twice", def.name)));
            }
            *existing = def;
        } else {
            self.module.structs.push(def);
        }
        Ok(())
    }

    /// `{ T, T, ... }`
    fn parse_struct_body(&mut self) -> Result<Vec<Type>, ReadError> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        if !self.eat_punct('}') {
            loop {
                fields.push(self.parse_type()?);
                if self.eat_punct('}') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        Ok(fields)
    }

    /// Linkage plus whether `external` was written (a declaration).
    fn parse_linkage(&mut self) -> Result<(Linkage, bool), ReadError> {
        let mut external = false;
        let mut linkage = Linkage::External;
        loop {
            if self.eat_word("external") || self.eat_word("extern_weak") {
                external = true;
            } else if self.eat_word("internal") || self.eat_word("private") {
                linkage = Linkage::Internal;
            } else if (self.at_word("addrspace") || self.at_word("thread_local"))
                && *self.peek_at(1) == Tok::Punct('(')
            {
                self.advance();
                self.skip_group()?;
            } else if self.at_word_in(DECLARATION_WORDS) {
                self.advance();
            } else {
                return Ok((linkage, external));
            }
        }
    }

    fn parse_global(&mut self) -> Result<(), ReadError> {
        let name = self.global()?;
        self.expect_punct('=')?;
        let (linkage, external) = self.parse_linkage()?;
        let is_constant = if self.eat_word("constant") {
            true
        } else {
            self.expect_word("global")?;
            false
        };
        let ty = self.parse_type()?;
        let init = if external {
            None
        } else {
            Some(self.parse_value(&ty)?)
        };
        self.skip_trailing_annotations();
        self.module.globals.push(Global {
            name,
            linkage,
            ty,
            is_constant,
            init,
        });
        Ok(())
    }

    /// `RET @name(T %a, ...)` followed by attributes, up to `{` for
    /// definitions or end of line for declarations.
    fn parse_signature(&mut self, linkage: Linkage, is_definition: bool) -> Result<Function, ReadError> {
        self.skip_value_attributes()?;
        let ret = self.parse_type()?;
        let name = self.global()?;
        self.expect_punct('(')?;
        let mut params = Vec::new();
        let mut variadic = false;
        if !self.eat_punct(')') {
            loop {
                if self.eat_word("...") {
                    variadic = true;
                    self.expect_punct(')')?;
                    break;
                }
                // only debug intrinsics take metadata; they are dropped
                let ty = if !is_definition && self.eat_word("metadata") {
                    Type::Void
                } else {
                    self.parse_type()?
                };
                self.skip_value_attributes()?;
                let pname = match self.peek().clone() {
                    Tok::Local(n) => {
                        self.advance();
                        n
                    }
                    _ => {
                        if is_definition {
                            return Err(self.unexpected("a parameter name"));
                        }
                        format!("{}", params.len())
                    }
                };
                params.push(Param { name: pname, ty });
                if self.eat_punct(')') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        self.skip_function_attributes()?;
        Ok(Function {
            name,
            linkage,
            ret,
            params,
            variadic,
            blocks: Vec::new(),
        })
    }

    /// Everything between `)` and the body: keywords, `#N` groups,
    /// `section "s"`, `align N`, `comdat($c)`, `personality ptr @p` and
    /// `!dbg !N` attachments.
    fn skip_function_attributes(&mut self) -> Result<(), ReadError> {
        loop {
            if self.at_line_start() {
                return Ok(());
            }
            match self.peek().clone() {
                Tok::Punct('{') | Tok::Eof => return Ok(()),
                Tok::Word(w) if w == "personality" => {
                    self.advance();
                    self.parse_type()?;
                    self.advance();
                }
                Tok::Word(_) => {
                    self.advance();
                    if *self.peek() == Tok::Punct('(') {
                        self.skip_group()?;
                    }
                }
                Tok::Punct('#') | Tok::Punct('!') => {
                    self.advance();
                    self.advance();
                }
                Tok::Str(_) | Tok::Int(_) => {
                    self.advance();
                }
                _ => return Err(self.unexpected("a function attribute")),
            }
        }
    }

    /// Blocks of a definition. An unlabeled first block is `entry`; when
    /// values are numbered it is implicitly `%<implicit_entry>`, and
    /// references to that number are renamed.
    fn parse_body(&mut self, implicit_entry: &str) -> Result<Vec<BasicBlock>, ReadError> {
        self.expect_punct('{')?;
        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut current: Option<BasicBlock> = None;
        let mut entry_is_implicit = false;

        loop {
            match self.peek().clone() {
                Tok::Punct('}') => {
                    self.advance();
                    break;
                }
                Tok::Eof => return Err(self.unexpected("'}'")),
                Tok::Label(label) => {
                    self.advance();
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                    current = Some(BasicBlock::new(label));
                }
                // `#dbg_value(...)` records
                Tok::Punct('#') => self.skip_line(),
                _ => {
                    if current.is_none() && blocks.is_empty() {
                        entry_is_implicit = true;
                    }
                    let block = current.get_or_insert_with(|| {
                        BasicBlock::new(if blocks.is_empty() { "entry" } else { "bb" })
                    });
                    if block.terminator.is_some() {
                        return Err(self.error(format!(
                            "instruction after the terminator of block '{}'",
                            block.label
                        )));
                    }
                    match self.parse_terminator()? {
                        Some(term) => block.terminator = Some(term),
                        None => {
                            if let Some(inst) = self.parse_instruction()? {
                                block.instructions.push(inst);
                            }
                        }
                    }
                    self.skip_trailing_annotations();
                }
            }
        }
        if let Some(block) = current {
            blocks.push(block);
        }
        if blocks.is_empty() {
            return Err(self.error("function body has no blocks".to_string()));
        }
        if entry_is_implicit && !blocks.iter().any(|b| b.label == implicit_entry) {
            for block in &mut blocks {
                if let Some(term) = &mut block.terminator {
                    term.rename_target(implicit_entry, "entry");
                }
                for inst in &mut block.instructions {
                    if let Instruction::Phi { incoming, .. } = inst {
                        for (_, label) in incoming.iter_mut().filter(|(_, l)| l == implicit_entry) {
                            *label = "entry".to_string();
                        }
                    }
                }
            }
        }
        Ok(blocks)
    }

    // --- Types and values ---

    fn parse_type(&mut self) -> Result<Type, ReadError> {
        let start = self.pos;
        let mut ty = match self.advance() {
            Tok::Word(w) if w == "void" => Type::Void,
            Tok::Word(w) if w == "float" => Type::Float,
            Tok::Word(w) if w == "double" => Type::Double,
            Tok::Word(w) if w == "ptr" => Type::opaque_ptr(),
            Tok::Word(w) if w.starts_with('i') && w[1..].parse::<u32>().is_ok() => {
                let bits: u32 = w[1..].parse().unwrap_or(0);
                if !matches!(bits, 1 | 8 | 16 | 32 | 64) {
                    self.pos = start;
                    return Err(self.error(format!("unsupported integer width i{}", bits)));
                }
                Type::Int(bits)
            }
            Tok::Local(name) => Type::Struct(name),
            Tok::Punct('[') => {
                let n = match self.advance() {
                    Tok::Int(n) if n >= 0 => n as u64,
                    _ => return Err(self.unexpected("an array length")),
                };
                self.expect_word("x")?;
                let elem = self.parse_type()?;
                self.expect_punct(']')?;
                Type::Array(n, Box::new(elem))
            }
            Tok::Punct('{') => {
                self.pos = start;
                let fields = self.parse_struct_body()?;
                self.literal_struct(fields, false)
            }
            Tok::Punct('<') if *self.peek() == Tok::Punct('{') => {
                let fields = self.parse_struct_body()?;
                self.expect_punct('>')?;
                self.literal_struct(fields, true)
            }
            _ => {
                self.pos = start;
                return Err(self.unexpected("a type"));
            }
        };
        loop {
            if self.at_word("addrspace") && *self.peek_at(1) == Tok::Punct('(') {
                self.advance();
                self.skip_group()?;
            } else if self.eat_punct('*') {
                ty = Type::ptr(ty);
            } else {
                return Ok(ty);
            }
        }
    }

    /// Name an anonymous struct type, reusing an identical earlier one.
    fn literal_struct(&mut self, fields: Vec<Type>, packed: bool) -> Type {
        if let Some(existing) = self
            .module
            .structs
            .iter()
            .find(|s| s.name.starts_with("literal.") && s.fields == fields && s.packed == packed)
        {
            return Type::Struct(existing.name.clone());
        }
        let name = format!("literal.{}", self.literal_structs);
        self.literal_structs += 1;
        self.module.structs.push(StructType {
            name: name.clone(),
            fields,
            packed,
            opaque: false,
        });
        Type::Struct(name)
    }

    fn parse_value(&mut self, ty: &Type) -> Result<Value, ReadError> {
        let value = match self.peek().clone() {
            Tok::Local(name) => Value::Local(name),
            Tok::Global(name) => Value::Global(name),
            Tok::Int(v) if ty.is_float() => Value::Float(v as f64),
            Tok::Int(v) if *ty == Type::Int(1) => Value::Bool(v != 0),
            Tok::Int(v) => Value::Int(v),
            Tok::Float(v) => Value::Float(v),
            Tok::HexFloat(bits) => Value::Float(f64::from_bits(bits)),
            Tok::Bytes(bytes) => Value::Array(
                bytes
                    .iter()
                    .map(|b| (Type::Int(8), Value::Int(i64::from(*b as i8))))
                    .collect(),
            ),
            Tok::Word(w) => match w.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                "undef" | "poison" => Value::Undef,
                "zeroinitializer" => Value::Zero,
                "getelementptr" | "bitcast" | "ptrtoint" | "inttoptr" | "addrspacecast" => {
                    return Err(self.error(format!("constant expression '{}' is not supported", w)))
                }
                _ => return Err(self.unexpected("a value")),
            },
            Tok::Punct('[') => {
                self.advance();
                return Ok(Value::Array(self.parse_items(']')?));
            }
            Tok::Punct('{') => {
                self.advance();
                return Ok(Value::Struct(self.parse_items('}')?));
            }
            Tok::Punct('<') if *self.peek_at(1) == Tok::Punct('{') => {
                self.advance();
                self.advance();
                let items = self.parse_items('}')?;
                self.expect_punct('>')?;
                return Ok(Value::Struct(items));
            }
            _ => return Err(self.unexpected("a value")),
        };
        self.advance();
        Ok(value)
    }

    /// Typed aggregate members up to `close`.
    fn parse_items(&mut self, close: char) -> Result<Vec<(Type, Value)>, ReadError> {
        let mut items = Vec::new();
        if !self.eat_punct(close) {
            loop {
                items.push(self.typed_value()?);
                if self.eat_punct(close) {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        Ok(items)
    }

    fn typed_value(&mut self) -> Result<(Type, Value), ReadError> {
        let ty = self.parse_type()?;
        self.skip_value_attributes()?;
        let value = self.parse_value(&ty)?;
        Ok((ty, value))
    }

    fn named(&self, dest: &Option<String>, opcode: &str) -> Result<String, ReadError> {
        dest.clone()
            .ok_or_else(|| self.error(format!("'{}' must name its result", opcode)))
    }

    fn label_ref(&mut self) -> Result<String, ReadError> {
        self.expect_word("label")?;
        self.local()
    }

    // --- Instructions ---

    fn parse_terminator(&mut self) -> Result<Option<Terminator>, ReadError> {
        let term = if self.eat_word("ret") {
            if self.eat_word("void") {
                Terminator::Ret(None)
            } else {
                let (ty, v) = self.typed_value()?;
                Terminator::Ret(Some((ty, v)))
            }
        } else if self.eat_word("br") {
            if self.at_word("label") {
                Terminator::Br(self.label_ref()?)
            } else {
                let (_, cond) = self.typed_value()?;
                self.expect_punct(',')?;
                let on_true = self.label_ref()?;
                self.expect_punct(',')?;
                let on_false = self.label_ref()?;
                Terminator::CondBr {
                    cond,
                    on_true,
                    on_false,
                }
            }
        } else if self.eat_word("switch") {
            let (ty, value) = self.typed_value()?;
            self.expect_punct(',')?;
            let default = self.label_ref()?;
            self.expect_punct('[')?;
            let mut cases = Vec::new();
            while !self.eat_punct(']') {
                let (_, case) = self.typed_value()?;
                let case = match case {
                    Value::Int(v) => v,
                    Value::Bool(b) => i64::from(b),
                    other => return Err(self.error(format!("switch case {} is not an integer", other))),
                };
                self.expect_punct(',')?;
                cases.push((case, self.label_ref()?));
            }
            Terminator::Switch {
                ty,
                value,
                default,
                cases,
            }
        } else if self.eat_word("unreachable") {
            Terminator::Unreachable
        } else {
            return Ok(None);
        };
        Ok(Some(term))
    }

    /// One instruction, or `None` for a dropped debug intrinsic call.
    fn parse_instruction(&mut self) -> Result<Option<Instruction>, ReadError> {
        let dest = match self.peek().clone() {
            Tok::Local(name) => {
                self.advance();
                self.expect_punct('=')?;
                Some(name)
            }
            _ => None,
        };
        let _ = self.eat_word("tail") || self.eat_word("musttail") || self.eat_word("notail");
        let opcode = self.word()?;

        if let Some(op) = BinOp::from_keyword(&opcode) {
            self.skip_flags();
            let (ty, lhs) = self.typed_value()?;
            self.expect_punct(',')?;
            let rhs = self.parse_value(&ty)?;
            return Ok(Some(Instruction::Binary {
                dest: self.named(&dest, &opcode)?,
                op,
                ty,
                lhs,
                rhs,
            }));
        }
        if let Some(op) = CastOp::from_keyword(&opcode) {
            self.skip_flags();
            let (from, value) = self.typed_value()?;
            self.expect_word("to")?;
            let to = self.parse_type()?;
            return Ok(Some(Instruction::Cast {
                dest: self.named(&dest, &opcode)?,
                op,
                from,
                value,
                to,
            }));
        }

        let inst = match opcode.as_str() {
            "fneg" => {
                self.skip_flags();
                let (ty, value) = self.typed_value()?;
                Instruction::Binary {
                    dest: self.named(&dest, &opcode)?,
                    op: BinOp::FSub,
                    ty,
                    lhs: Value::Float(-0.0),
                    rhs: value,
                }
            }
            "icmp" => {
                self.skip_flags();
                let word = self.word()?;
                let pred = IntPredicate::from_keyword(&word)
                    .ok_or_else(|| self.error(format!("unknown icmp predicate '{}'", word)))?;
                let (ty, lhs) = self.typed_value()?;
                self.expect_punct(',')?;
                let rhs = self.parse_value(&ty)?;
                Instruction::ICmp {
                    dest: self.named(&dest, &opcode)?,
                    pred,
                    ty,
                    lhs,
                    rhs,
                }
            }
            "fcmp" => {
                self.skip_flags();
                let word = self.word()?;
                let pred = FloatPredicate::from_keyword(&word)
                    .ok_or_else(|| self.error(format!("unknown fcmp predicate '{}'", word)))?;
                let (ty, lhs) = self.typed_value()?;
                self.expect_punct(',')?;
                let rhs = self.parse_value(&ty)?;
                Instruction::FCmp {
                    dest: self.named(&dest, &opcode)?,
                    pred,
                    ty,
                    lhs,
                    rhs,
                }
            }
            "alloca" => {
                let ty = self.parse_type()?;
                Instruction::Alloca {
                    dest: self.named(&dest, &opcode)?,
                    ty,
                }
            }
            "load" => {
                self.eat_word("volatile");
                // `load T* %p` or `load T, ptr %p`
                let first = self.parse_type()?;
                let (ty, ptr) = if self.eat_punct(',') {
                    let (_, ptr) = self.typed_value()?;
                    (first, ptr)
                } else {
                    let ptr = self.parse_value(&first)?;
                    let ty = first
                        .pointee()
                        .filter(|t| !t.is_void())
                        .cloned()
                        .ok_or_else(|| self.error(format!("load from non-pointer type {}", first)))?;
                    (ty, ptr)
                };
                Instruction::Load {
                    dest: self.named(&dest, &opcode)?,
                    ty,
                    ptr,
                }
            }
            "store" => {
                self.eat_word("volatile");
                let (ty, value) = self.typed_value()?;
                self.expect_punct(',')?;
                let (_, ptr) = self.typed_value()?;
                Instruction::Store { ty, value, ptr }
            }
            "getelementptr" => self.parse_gep(&dest)?,
            "call" => {
                self.skip_flags();
                while self.at_word_in(DECLARATION_WORDS) {
                    self.advance();
                }
                self.skip_value_attributes()?;
                let ret = self.parse_type()?;
                // `(ptr, ...)`: explicit type of a variadic callee
                if *self.peek() == Tok::Punct('(') {
                    self.skip_group()?;
                }
                if matches!(self.peek(), Tok::Local(_)) {
                    return Err(self.error("indirect calls are not supported".to_string()));
                }
                let callee = self.global()?;
                if callee.starts_with("llvm.dbg.") {
                    self.skip_group()?;
                    self.skip_call_attributes();
                    return Ok(None);
                }
                self.expect_punct('(')?;
                let mut args = Vec::new();
                if !self.eat_punct(')') {
                    loop {
                        args.push(self.typed_value()?);
                        if self.eat_punct(')') {
                            break;
                        }
                        self.expect_punct(',')?;
                    }
                }
                self.skip_call_attributes();
                if dest.is_some() && ret.is_void() {
                    return Err(self.error(format!("void call to @{} cannot name a result", callee)));
                }
                Instruction::Call {
                    dest,
                    ret,
                    callee,
                    args,
                }
            }
            "select" => {
                self.skip_flags();
                let (_, cond) = self.typed_value()?;
                self.expect_punct(',')?;
                let (ty, on_true) = self.typed_value()?;
                self.expect_punct(',')?;
                let (_, on_false) = self.typed_value()?;
                Instruction::Select {
                    dest: self.named(&dest, &opcode)?,
                    cond,
                    ty,
                    on_true,
                    on_false,
                }
            }
            "phi" => {
                self.skip_flags();
                let ty = self.parse_type()?;
                let mut incoming = Vec::new();
                loop {
                    self.expect_punct('[')?;
                    let v = self.parse_value(&ty)?;
                    self.expect_punct(',')?;
                    let label = self.local()?;
                    self.expect_punct(']')?;
                    incoming.push((v, label));
                    if !(*self.peek() == Tok::Punct(',') && *self.peek_at(1) == Tok::Punct('[')) {
                        break;
                    }
                    self.advance();
                }
                Instruction::Phi {
                    dest: self.named(&dest, &opcode)?,
                    ty,
                    incoming,
                }
            }
            other => {
                self.pos -= 1;
                return Err(self.error(format!("unsupported instruction '{}'", other)));
            }
        };
        Ok(Some(inst))
    }

    /// `getelementptr [inbounds] T, ptr %base, idx...`, or the older
    /// `getelementptr T* %base, idx...`.
    fn parse_gep(&mut self, dest: &Option<String>) -> Result<Instruction, ReadError> {
        while self.eat_word("inbounds") || self.eat_word("nuw") || self.eat_word("nusw") {}
        let first = self.parse_type()?;
        let (source, base) = if self.eat_punct(',') {
            let (_, base) = self.typed_value()?;
            (first, base)
        } else {
            let base = self.parse_value(&first)?;
            let source = first
                .pointee()
                .filter(|t| !t.is_void())
                .cloned()
                .ok_or_else(|| self.error(format!("getelementptr on non-pointer type {}", first)))?;
            (source, base)
        };
        let mut indices = Vec::new();
        while *self.peek() == Tok::Punct(',') && *self.peek_at(1) != Tok::Punct('!') {
            self.advance();
            indices.push(self.typed_value()?);
        }
        let element = indexed_type(&source, &indices, &self.module.structs).ok_or_else(|| {
            self.error(format!(
                "cannot index {} with {} indices (struct members need constant indices)",
                source,
                indices.len()
            ))
        })?;
        Ok(Instruction::GetElementPtr {
            dest: self.named(dest, "getelementptr")?,
            source,
            base,
            indices,
            result: Type::ptr(element),
        })
    }

    /// `#N` groups after a call's argument list.
    fn skip_call_attributes(&mut self) {
        while *self.peek() == Tok::Punct('#') {
            self.advance();
            self.advance();
        }
    }
}
