//! Annotated parse tree consumed by the rewriter.
//!
//! The tree is a closed sum type: declarations are `Decl`, the only
//! expressions the rewriter looks inside are calls and lambdas (`Expr`).
//! Everything else is kept as spans into the original document.

use crate::span::{SourceRange, Span, Spanned};
use crate::syntax::preprocess::Directive;

/// A parsed main file.
#[derive(Clone, Debug, Default)]
pub struct TranslationUnit {
    pub decls: Vec<Decl>,
}

/// Declarations, in source order.
#[derive(Clone, Debug)]
pub enum Decl {
    Directive(Directive),
    Function(FunctionDecl),
    Record(RecordDecl),
    Namespace(NamespaceDecl),
    /// `extern "C" { ... }` or `extern "C" decl`.
    Linkage(LinkageDecl),
    /// `using namespace a::b;`
    UsingDirective(Spanned<Vec<String>>),
    /// Variables, typedefs, enums, aliases and anything else the rewriter
    /// never edits.
    Other(Span),
}

impl Decl {
    pub fn span(&self) -> Span {
        match self {
            Decl::Directive(d) => d.span,
            Decl::Function(f) => f.template_range.unwrap_or(f.range).span,
            Decl::Record(r) => r.span,
            Decl::Namespace(n) => n.span,
            Decl::Linkage(l) => l.span,
            Decl::UsingDirective(u) => u.span,
            Decl::Other(span) => *span,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordDecl {
    /// `struct`, `class` or `union`.
    pub keyword: String,
    pub name: Option<String>,
    pub span: Span,
    pub members: Vec<Decl>,
}

#[derive(Clone, Debug)]
pub struct NamespaceDecl {
    pub name: Option<String>,
    pub span: Span,
    pub decls: Vec<Decl>,
}

#[derive(Clone, Debug)]
pub struct LinkageDecl {
    pub language: String,
    pub span: Span,
    pub decls: Vec<Decl>,
}

/// A function declaration or definition (free, member, or template).
#[derive(Clone, Debug)]
pub struct FunctionDecl {
    /// Unqualified name, e.g. `func` for `FooClass::func`.
    pub name: String,
    /// Explicit qualifier written before the name, e.g. `["FooClass"]`.
    pub qualifier: Vec<String>,
    pub name_span: Span,
    /// From the first declaration specifier to the body's closing brace or
    /// the declaration's last token. Never includes the terminating `;`.
    pub range: SourceRange,
    /// Same end as `range`, but starting at the `template` keyword.
    pub template_range: Option<SourceRange>,
    pub params: Vec<Param>,
    pub attributes: Vec<Attribute>,
    /// `main` at namespace scope.
    pub is_entry_point: bool,
    pub body: Option<Block>,
}

impl FunctionDecl {
    pub fn qualified_name(&self) -> String {
        let mut parts = self.qualifier.clone();
        parts.push(self.name.clone());
        parts.join("::")
    }

    pub fn is_definition(&self) -> bool {
        self.body.is_some()
    }

    /// Attributes with the given name, in written order.
    pub fn attributes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Attribute> {
        self.attributes.iter().filter(move |a| a.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: Option<String>,
    /// Declared type as written, normalized spacing.
    pub ty: String,
    pub span: Span,
}

/// A GNU `__attribute__((name(args...)))` entry.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    /// Expansion location of the attribute name: the macro use site when the
    /// attribute came from a macro.
    pub location: Span,
    pub from_macro: bool,
    /// Written before the declarator name, e.g. `__attribute__((x)) int f();`.
    pub before_name: bool,
    pub args: Vec<AttrArg>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttrArg {
    Str(Spanned<String>),
    /// Anything that is not a single string literal, spelled as written.
    Other(Spanned<String>),
}

impl AttrArg {
    pub fn span(&self) -> Span {
        match self {
            AttrArg::Str(s) | AttrArg::Other(s) => s.span,
        }
    }
}

/// A brace-enclosed statement list.
#[derive(Clone, Debug)]
pub struct Block {
    pub range: SourceRange,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    /// `T name ...;`; only the first declarator's details are needed.
    Local(LocalVar),
    Block(Block),
    /// Any other statement, with the calls and lambdas it contains.
    Other { span: Span, exprs: Vec<Expr> },
}

#[derive(Clone, Debug)]
pub struct LocalVar {
    pub names: Vec<Spanned<String>>,
    pub ty: String,
    pub span: Span,
    /// Calls and lambdas in the initializers.
    pub exprs: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Call(CallExpr),
    Lambda(LambdaExpr),
}

#[derive(Clone, Debug)]
pub struct CallExpr {
    /// Callee path as written, e.g. `["compute", "parallel_for_each"]`.
    pub callee: Vec<String>,
    /// `obj.f(...)` / `ptr->f(...)`.
    pub is_member: bool,
    pub span: Span,
    pub args: Vec<CallArg>,
}

impl CallExpr {
    pub fn callee_name(&self) -> String {
        self.callee.join("::")
    }
}

#[derive(Clone, Debug)]
pub struct CallArg {
    pub span: Span,
    pub exprs: Vec<Expr>,
    /// Set when the whole argument is a lambda expression.
    pub lambda: Option<Box<LambdaExpr>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureDefault {
    ByRef,
    ByCopy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureKind {
    ByRef,
    ByCopy,
    This,
    StarThis,
    /// `x = expr` / `&x = expr`.
    Init,
}

/// A resolved lambda capture.
#[derive(Clone, Debug)]
pub struct Capture {
    pub name: String,
    pub kind: CaptureKind,
    /// Type of the captured variable in the enclosing scope; `None` when the
    /// name does not resolve to a parameter or local.
    pub ty: Option<String>,
    pub implicit: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct LambdaExpr {
    pub span: Span,
    /// The `[...]` capture introducer.
    pub introducer: Span,
    pub default_capture: Option<CaptureDefault>,
    pub captures: Vec<Capture>,
    pub params: Vec<Param>,
    /// The `(...)` parameter list including parentheses, if written.
    pub params_span: Option<Span>,
    pub body: Block,
}

/// Depth-first walk over declarations, used by the rewriter driver and tests.
pub fn for_each_function<'a>(decls: &'a [Decl], f: &mut dyn FnMut(&'a FunctionDecl)) {
    for decl in decls {
        match decl {
            Decl::Function(func) => f(func),
            Decl::Record(r) => for_each_function(&r.members, f),
            Decl::Namespace(n) => for_each_function(&n.decls, f),
            Decl::Linkage(l) => for_each_function(&l.decls, f),
            Decl::Directive(_) | Decl::UsingDirective(_) | Decl::Other(_) => {}
        }
    }
}

/// Visit every call in a block, including calls nested in arguments and in
/// lambda bodies, in source order.
pub fn for_each_call<'a>(block: &'a Block, f: &mut dyn FnMut(&'a CallExpr)) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Local(local) => walk_exprs(&local.exprs, f),
            Stmt::Block(inner) => for_each_call(inner, f),
            Stmt::Other { exprs, .. } => walk_exprs(exprs, f),
        }
    }
}

fn walk_exprs<'a>(exprs: &'a [Expr], f: &mut dyn FnMut(&'a CallExpr)) {
    for expr in exprs {
        match expr {
            Expr::Call(call) => {
                f(call);
                for arg in &call.args {
                    walk_exprs(&arg.exprs, f);
                }
            }
            Expr::Lambda(lambda) => for_each_call(&lambda.body, f),
        }
    }
}
