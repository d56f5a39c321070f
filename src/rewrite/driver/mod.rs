//! The translation driver: one walk over the tree, edits into both buffers.

use crate::ast::{for_each_call, CallExpr, Decl, FunctionDecl, TranslationUnit};
use crate::config::RewriteConfig;
use crate::diagnostic::Diagnostic;
use crate::error::RewriteError;
use crate::source::SourceDocument;
use crate::span::SourceRange;
use crate::syntax::preprocess::{Directive, DirectiveKind};

use super::attribute;
use super::buffer::{DualRewriter, Target};
use super::kernel::{DispatchRewriter, KernelHandle, FORWARD_DECLARATIONS};

/// Result of splitting one document.
#[derive(Clone, Debug)]
pub struct SplitOutput {
    pub cpu_source: String,
    pub gpu_source: String,
    pub diagnostics: Vec<Diagnostic>,
    /// One entry per synthesized kernel, in source order.
    pub kernels: Vec<KernelHandle>,
}

impl SplitOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

pub struct TranslationDriver<'a> {
    doc: &'a SourceDocument,
    config: &'a RewriteConfig,
    rewriter: DualRewriter<'a>,
    dispatch: DispatchRewriter<'a>,
    /// `using namespace` paths seen at file scope so far.
    using_namespaces: Vec<Vec<String>>,
    diagnostics: Vec<Diagnostic>,
    kernels: Vec<KernelHandle>,
}

impl<'a> TranslationDriver<'a> {
    pub fn new(doc: &'a SourceDocument, config: &'a RewriteConfig) -> Self {
        Self {
            doc,
            config,
            rewriter: DualRewriter::new(doc),
            dispatch: DispatchRewriter::new(config),
            using_namespaces: Vec::new(),
            diagnostics: Vec::new(),
            kernels: Vec::new(),
        }
    }

    pub fn run(mut self, unit: &TranslationUnit) -> Result<SplitOutput, RewriteError> {
        self.visit_decls(&unit.decls, true)?;
        let (cpu_source, gpu_source) = self.rewriter.materialize();
        log::info!(
            "split {}: {} kernel(s), {} diagnostic(s)",
            self.doc.name(),
            self.kernels.len(),
            self.diagnostics.len()
        );
        Ok(SplitOutput {
            cpu_source,
            gpu_source,
            diagnostics: self.diagnostics,
            kernels: self.kernels,
        })
    }

    fn visit_decls(&mut self, decls: &[Decl], file_scope: bool) -> Result<(), RewriteError> {
        for decl in decls {
            match decl {
                Decl::Directive(directive) => self.visit_directive(directive)?,
                Decl::Function(func) => self.visit_function(func)?,
                Decl::Record(record) => self.visit_decls(&record.members, false)?,
                Decl::Namespace(ns) => self.visit_decls(&ns.decls, false)?,
                Decl::Linkage(linkage) => self.visit_decls(&linkage.decls, file_scope)?,
                Decl::UsingDirective(path) => {
                    if file_scope {
                        self.using_namespaces.push(path.node.clone());
                    }
                }
                Decl::Other(_) => {}
            }
        }
        Ok(())
    }

    fn visit_directive(&mut self, directive: &Directive) -> Result<(), RewriteError> {
        if let DirectiveKind::Include { file, range, .. } = &directive.kind {
            let base = file.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(file);
            if base == self.config.dispatch_header {
                log::debug!("stripping #include \"{}\" from gpu output", file);
                self.rewriter.remove(Target::Gpu, SourceRange::file(*range))?;
            }
        }
        Ok(())
    }

    fn visit_function(&mut self, func: &FunctionDecl) -> Result<(), RewriteError> {
        if func.is_entry_point {
            self.rewriter.remove(Target::Gpu, func.range)?;
        } else {
            let (restriction, diagnostics) = attribute::validate(func, &self.config.attribute);
            self.diagnostics.extend(diagnostics);
            if restriction.cpu_only() {
                log::debug!("{} is cpu-only", func.qualified_name());
                self.remove_function(Target::Gpu, func)?;
            } else if restriction.gpu_only() {
                log::debug!("{} is gpu-only", func.qualified_name());
                self.remove_function(Target::Cpu, func)?;
            }
        }

        let Some(body) = &func.body else {
            return Ok(());
        };
        let mut calls = Vec::new();
        for_each_call(body, &mut |call| calls.push(call));
        for call in calls {
            if self.is_dispatch(call) {
                self.visit_dispatch(func, call)?;
            }
        }
        Ok(())
    }

    fn visit_dispatch(&mut self, func: &FunctionDecl, call: &CallExpr) -> Result<(), RewriteError> {
        self.remove_function(Target::Gpu, func)?;
        let Some(kernel) = self
            .dispatch
            .synthesize(&self.rewriter, call, &mut self.diagnostics)?
        else {
            return Ok(());
        };
        if self.kernels.is_empty() {
            self.rewriter
                .insert_at_end(Target::Gpu, FORWARD_DECLARATIONS.to_string())?;
        }
        let handle = self.dispatch.apply(&mut self.rewriter, call, &kernel)?;
        self.kernels.push(handle);
        Ok(())
    }

    /// Remove a function and, for a template, its `template<...>` header.
    fn remove_function(&mut self, target: Target, func: &FunctionDecl) -> Result<(), RewriteError> {
        self.rewriter.remove(target, func.range)?;
        if let Some(template) = func.template_range {
            self.rewriter.remove(target, template)?;
        }
        Ok(())
    }

    fn is_dispatch(&self, call: &CallExpr) -> bool {
        if call.is_member {
            return false;
        }
        let target: Vec<&str> = self.config.dispatch_function.split("::").collect();
        let callee: Vec<&str> = call.callee.iter().map(String::as_str).collect();
        if callee == target {
            return true;
        }
        self.using_namespaces.iter().any(|ns| {
            let mut full: Vec<&str> = ns.iter().map(String::as_str).collect();
            full.extend(&callee);
            full == target
        })
    }
}
