//! Kernel synthesis at parallel-dispatch call sites.
//!
//! The closure passed as the last dispatch argument becomes two device
//! functions appended to the gpu output: `_Lambda_<suffix>` holding the
//! closure body and `extern "C" _Kernel_<suffix>` mapping it over a buffer.
//! In the cpu output the closure body is replaced by a stub returning the
//! `(device file, kernel name)` pair the runtime loads.

use crate::ast::{CallExpr, CaptureKind, LambdaExpr};
use crate::config::RewriteConfig;
use crate::diagnostic::Diagnostic;
use crate::error::RewriteError;
use crate::span::{SourceRange, Span};

use super::buffer::{DualRewriter, Target};

/// Device accessor declarations, inserted once ahead of the first kernel.
pub const FORWARD_DECLARATIONS: &str =
    "extern \"C\" long long get_global_id(int);\nextern \"C\" int get_global_size(int);\n\n\n";

/// A captured variable with its type in the enclosing scope, if known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedVar {
    pub name: String,
    pub ty: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosureParam {
    pub name: String,
    pub ty: String,
}

/// What kernel synthesis needs to know about a closure.
#[derive(Clone, Debug)]
pub struct ClosureDescriptor {
    pub by_ref: Vec<CapturedVar>,
    pub by_value: Vec<CapturedVar>,
    pub params: Vec<ClosureParam>,
    pub params_range: Option<Span>,
    /// Including the braces.
    pub body_range: SourceRange,
}

impl ClosureDescriptor {
    /// Only by-reference and by-value captures of named variables can be
    /// described; anything else is reported at the capture.
    pub fn from_lambda(lambda: &LambdaExpr) -> Result<Self, Diagnostic> {
        let mut by_ref = Vec::new();
        let mut by_value = Vec::new();
        for cap in &lambda.captures {
            let var = CapturedVar {
                name: cap.name.clone(),
                ty: cap.ty.clone(),
                span: cap.span,
            };
            match cap.kind {
                CaptureKind::ByRef => by_ref.push(var),
                CaptureKind::ByCopy => by_value.push(var),
                CaptureKind::This | CaptureKind::StarThis | CaptureKind::Init => {
                    let what = match cap.kind {
                        CaptureKind::This => "`this`".to_string(),
                        CaptureKind::StarThis => "`*this`".to_string(),
                        _ => format!("init-capture `{}`", cap.name),
                    };
                    return Err(Diagnostic::error(
                        format!("cannot offload a closure that captures {}", what),
                        cap.span,
                    )
                    .with_note("only variables captured by reference or by value are supported".to_string()));
                }
            }
        }

        let params = lambda
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| ClosureParam {
                name: p.name.clone().unwrap_or_else(|| format!("_arg{}", i)),
                ty: p.ty.clone(),
            })
            .collect();

        Ok(Self {
            by_ref,
            by_value,
            params,
            params_range: lambda.params_span,
            body_range: lambda.body.range,
        })
    }

    pub fn captures(&self) -> impl Iterator<Item = &CapturedVar> {
        self.by_ref.iter().chain(self.by_value.iter())
    }
}

/// A synthesized kernel, ready to be written into both outputs.
#[derive(Clone, Debug)]
pub struct KernelDescriptor {
    pub suffix: String,
    pub closure: ClosureDescriptor,
    pub device_text: String,
    pub host_stub: String,
}

impl KernelDescriptor {
    pub fn kernel_name(&self) -> String {
        format!("_Kernel_{}", self.suffix)
    }

    pub fn lambda_name(&self) -> String {
        format!("_Lambda_{}", self.suffix)
    }
}

/// The `(file, kernel)` pair a host stub returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelHandle {
    pub file: String,
    pub kernel: String,
    /// The dispatch call the kernel was synthesized for.
    pub call: Span,
}

/// Per-run kernel suffixes: `<counter>_<first 8 hex digits of BLAKE3>`.
#[derive(Debug, Default)]
pub struct KernelNamer {
    counter: u32,
}

impl KernelNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_suffix(&mut self, closure: &ClosureDescriptor, body: &str) -> String {
        self.counter += 1;
        let mut hasher = blake3::Hasher::new();
        for cap in &closure.by_ref {
            hasher.update(b"&");
            hasher.update(cap.name.as_bytes());
            hasher.update(b"\0");
        }
        for cap in &closure.by_value {
            hasher.update(b"=");
            hasher.update(cap.name.as_bytes());
            hasher.update(b"\0");
        }
        for param in &closure.params {
            hasher.update(param.ty.as_bytes());
            hasher.update(b" ");
            hasher.update(param.name.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(body.as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("{}_{}", self.counter, &hex.as_str()[..8])
    }
}

/// `T` with a top-level reference and top-level `const`/`volatile` removed:
/// `const int&` gives `int`, `const float*` stays as is.
pub fn element_type(ty: &str) -> String {
    let mut t = ty.trim().trim_end_matches('&').trim_end();
    loop {
        let stripped = ["const", "volatile"].iter().find_map(|q| {
            t.strip_suffix(q)
                .filter(|rest| rest.is_empty() || rest.ends_with(|c: char| c == ' ' || c == '*'))
        });
        match stripped {
            Some(rest) => t = rest.trim_end(),
            None => break,
        }
    }
    if t.contains('*') {
        return t.to_string();
    }
    t.split_whitespace()
        .filter(|w| !matches!(*w, "const" | "volatile"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Device functions for one closure, appended to the gpu output.
pub fn device_text(suffix: &str, param: &ClosureParam, body: &str) -> String {
    let elem = element_type(&param.ty);
    format!(
        "{elem} _Lambda_{suffix}({ty} {name}) {body}\n\n\
         extern \"C\" void _Kernel_{suffix}({elem}* in, {elem}* out) \
         {{ unsigned idx = get_global_id(0); out[idx] = _Lambda_{suffix}(in[idx]); }}\n",
        elem = elem,
        suffix = suffix,
        ty = param.ty,
        name = param.name,
        body = body,
    )
}

/// Replacement for the closure body in the cpu output.
pub fn host_stub(file: &str, suffix: &str) -> String {
    format!(
        "{{ return std::pair<std::string,std::string> ( \"{}\" , \"_Kernel_{}\" ); }}",
        file, suffix
    )
}

/// Rewrites dispatch calls one at a time, numbering kernels across the run.
pub struct DispatchRewriter<'a> {
    config: &'a RewriteConfig,
    namer: KernelNamer,
}

impl<'a> DispatchRewriter<'a> {
    pub fn new(config: &'a RewriteConfig) -> Self {
        Self {
            config,
            namer: KernelNamer::new(),
        }
    }

    /// Describe the call's closure and synthesize its kernel without
    /// touching any buffer. `Ok(None)` means the call site was rejected with
    /// a diagnostic.
    pub fn synthesize(
        &mut self,
        rw: &DualRewriter<'_>,
        call: &CallExpr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<KernelDescriptor>, RewriteError> {
        let doc = rw.document();
        let unsupported = |reason: String| RewriteError::UnsupportedDispatchShape {
            location: doc.describe(call.span.start),
            reason,
        };

        if call.args.len() != self.config.dispatch_arity {
            return Err(unsupported(format!(
                "expected {} arguments, found {}",
                self.config.dispatch_arity,
                call.args.len()
            )));
        }
        let last = match call.args.last() {
            Some(arg) => arg,
            None => return Err(unsupported("no closure argument".to_string())),
        };
        let Some(lambda) = &last.lambda else {
            diagnostics.push(
                Diagnostic::error(
                    format!(
                        "last argument of '{}' must be a lambda expression",
                        call.callee_name()
                    ),
                    last.span,
                )
                .with_help("write the kernel inline as `[&](T x) { ... }`".to_string()),
            );
            return Ok(None);
        };

        let closure = match ClosureDescriptor::from_lambda(lambda) {
            Ok(closure) => closure,
            Err(diag) => {
                diagnostics.push(diag);
                return Ok(None);
            }
        };
        if closure.params.len() != 1 {
            return Err(unsupported(format!(
                "the closure must take exactly one parameter, found {}",
                closure.params.len()
            )));
        }
        for cap in closure.captures() {
            diagnostics.push(Diagnostic::warning(
                format!(
                    "captured variable '{}' is not passed to the generated kernel",
                    cap.name
                ),
                cap.span,
            ));
        }

        let body = doc.slice(closure.body_range.span);
        let suffix = self.namer.next_suffix(&closure, body);
        let file = format!("{}{}", doc.name(), self.config.device_suffix);
        let device_text = device_text(&suffix, &closure.params[0], body);
        let host_stub = host_stub(&file, &suffix);
        log::debug!(
            "dispatch at {}: kernel _Kernel_{}",
            doc.describe(call.span.start),
            suffix
        );

        Ok(Some(KernelDescriptor {
            suffix,
            closure,
            device_text,
            host_stub,
        }))
    }

    /// Synthesize the kernel for `call` and write it into both outputs.
    pub fn rewrite(
        &mut self,
        rw: &mut DualRewriter<'_>,
        call: &CallExpr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<KernelHandle>, RewriteError> {
        let Some(kernel) = self.synthesize(rw, call, diagnostics)? else {
            return Ok(None);
        };
        self.apply(rw, call, &kernel).map(Some)
    }

    /// Write an already synthesized kernel: device text at the end of the
    /// gpu output, host stub over the closure body in the cpu output.
    pub fn apply(
        &self,
        rw: &mut DualRewriter<'_>,
        call: &CallExpr,
        kernel: &KernelDescriptor,
    ) -> Result<KernelHandle, RewriteError> {
        rw.insert_at_end(Target::Gpu, kernel.device_text.clone())?;
        rw.replace(Target::Cpu, kernel.closure.body_range, kernel.host_stub.clone())?;
        Ok(KernelHandle {
            file: format!("{}{}", rw.document().name(), self.config.device_suffix),
            kernel: kernel.kernel_name(),
            call: call.span,
        })
    }
}

#[cfg(test)]
mod tests;
