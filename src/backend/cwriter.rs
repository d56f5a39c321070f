//! Source emission: turns a verified module into C99 or OpenCL C.
//!
//! SSA values become function-scope locals named `v_<name>`, blocks become
//! `bb_<label>` goto targets, and every phi node gets a `__phi` temporary
//! that predecessors assign right before branching. Opaque pointers are
//! `void *` and get cast to a typed pointer where memory is accessed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

use crate::error::BackendError;

use super::ir::{
    BinOp, CastOp, FloatPredicate, Function, Global, Instruction, IntPredicate, Linkage, Module,
    StructType, Terminator, Type, Value,
};
use super::passes::{ModulePass, PassContext};
use super::target::{
    FloatAbi, FpOpFusion, TargetLibraryInfo, TargetOptions, TargetTriple, DEVICE_BUILTINS,
};

/// Source language written by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Portable C99 with `<stdint.h>` integer types.
    C99,
    /// OpenCL C with `__kernel` entry points.
    OpenCl,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::C99 => "C99",
            Dialect::OpenCl => "OpenCL C",
        }
    }
}

// ─── Emission pass ─────────────────────────────────────────────────

/// Final pipeline pass: appends the module's source text to the sink.
pub struct CWriterPass {
    pub dialect: Dialect,
    pub triple: TargetTriple,
    pub options: TargetOptions,
    pub verbose: bool,
}

impl ModulePass for CWriterPass {
    fn name(&self) -> &'static str {
        "c-writer"
    }

    fn run(&mut self, module: &mut Module, ctx: &mut PassContext) -> Result<(), BackendError> {
        let library_info = ctx
            .library_info
            .clone()
            .unwrap_or_else(|| TargetLibraryInfo::new(&self.triple));
        let writer = ModuleWriter {
            dialect: self.dialect,
            triple: &self.triple,
            options: &self.options,
            verbose: self.verbose,
            library_info: &library_info,
            kernels: &ctx.kernels,
            headers: BTreeSet::new(),
            extra_prototypes: BTreeMap::new(),
            uses_double: false,
        };
        let text = writer.write(module)?;
        log::info!(
            "emitted {} bytes of {} for module {}",
            text.len(),
            self.dialect.name(),
            module.name
        );
        ctx.output.push_str(&text);
        Ok(())
    }
}

// ─── Naming ────────────────────────────────────────────────────────

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn local_name(name: &str) -> String {
    format!("v_{}", sanitize(name))
}

fn symbol_name(name: &str) -> String {
    let s = sanitize(name);
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        format!("g_{}", s)
    } else {
        s
    }
}

fn block_name(label: &str) -> String {
    format!("bb_{}", sanitize(label))
}

fn struct_name(name: &str) -> String {
    format!("struct {}", sanitize(name))
}

/// Struct stored by value in `ty`, which must be defined first.
fn contained_struct(ty: &Type) -> Option<&str> {
    match ty {
        Type::Struct(name) => Some(name),
        Type::Array(_, elem) => contained_struct(elem),
        _ => None,
    }
}

fn int_literal(v: i64, bits: u32) -> String {
    match (v, bits) {
        (_, 1) => (if v != 0 { "1" } else { "0" }).to_string(),
        (i64::MIN, _) => "(-9223372036854775807LL - 1)".to_string(),
        (_, 64) => format!("{}LL", v),
        (-2147483648, 32) => "(-2147483647 - 1)".to_string(),
        _ => v.to_string(),
    }
}

// ─── Module writer ─────────────────────────────────────────────────

struct ModuleWriter<'a> {
    dialect: Dialect,
    triple: &'a TargetTriple,
    options: &'a TargetOptions,
    verbose: bool,
    library_info: &'a TargetLibraryInfo,
    kernels: &'a [String],
    headers: BTreeSet<&'static str>,
    /// Helpers the emitted code calls, by symbol name.
    extra_prototypes: BTreeMap<String, String>,
    uses_double: bool,
}

type EmitResult<T> = Result<T, String>;

/// Static facts about the values of the function being written.
struct FunctionScope<'m> {
    module: &'m Module,
    types: HashMap<String, Type>,
    /// OpenCL address space of pointer values, where known.
    spaces: HashMap<String, &'static str>,
}

impl FunctionScope<'_> {
    /// Type of the C expression `value` renders to.
    fn type_of(&self, value: &Value) -> Option<Type> {
        match value {
            Value::Local(name) => self.types.get(name).cloned(),
            Value::Global(name) => self.module.global(name).map(|g| Type::ptr(g.ty.clone())),
            _ => None,
        }
    }
}

impl<'a> ModuleWriter<'a> {
    fn write(mut self, module: &Module) -> Result<String, BackendError> {
        let mut structs = String::new();
        for def in &module.structs {
            let _ = writeln!(structs, "{};", struct_name(&def.name));
        }
        let mut defined = HashSet::new();
        for def in &module.structs {
            self.struct_definition(module, def, &mut defined, &mut Vec::new(), &mut structs)
                .map_err(|reason| emit_error(&def.name, reason))?;
        }

        let mut prototypes = String::new();
        for func in &module.functions {
            if let Some(proto) = self
                .prototype(func)
                .map_err(|reason| emit_error(&func.name, reason))?
            {
                let _ = writeln!(prototypes, "{};", proto);
            }
        }

        let mut globals = String::new();
        for global in &module.globals {
            let line = self
                .global(global)
                .map_err(|reason| emit_error(&global.name, reason))?;
            let _ = writeln!(globals, "{}", line);
        }

        let mut bodies = String::new();
        for func in module.functions.iter().filter(|f| !f.is_declaration()) {
            self.function(module, func, &mut bodies)
                .map_err(|reason| emit_error(&func.name, reason))?;
        }

        for (name, proto) in &self.extra_prototypes {
            if module.function(name).is_none() {
                let _ = writeln!(prototypes, "{};", proto);
            }
        }

        let mut out = self.header(module);
        for section in [structs, prototypes, globals] {
            if !section.is_empty() {
                out.push_str(&section);
                out.push('\n');
            }
        }
        out.push_str(&bodies);
        Ok(out)
    }

    fn header(&self, module: &Module) -> String {
        let mut out = String::new();
        if self.verbose {
            let _ = writeln!(
                out,
                "/* Generated by duet from module '{}' as {} */",
                module.name,
                self.dialect.name()
            );
            let _ = writeln!(out, "/* target triple: {} */", self.triple);
            if let Some(layout) = &module.data_layout {
                let _ = writeln!(out, "/* data layout: {} */", layout);
            }
            if self.options.use_soft_float || self.options.float_abi == FloatAbi::Soft {
                let _ = writeln!(out, "/* float ABI: soft */");
            }
        }
        match self.dialect {
            Dialect::C99 => {
                out.push_str("#include <stdint.h>\n#include <stdbool.h>\n");
                for header in &self.headers {
                    let _ = writeln!(out, "#include <{}>", header);
                }
                match self.options.allow_fp_op_fusion {
                    FpOpFusion::Fast => out.push_str("#pragma STDC FP_CONTRACT ON\n"),
                    FpOpFusion::Strict => out.push_str("#pragma STDC FP_CONTRACT OFF\n"),
                    FpOpFusion::Standard => {}
                }
            }
            Dialect::OpenCl => {
                if self.uses_double {
                    out.push_str("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n");
                }
                match self.options.allow_fp_op_fusion {
                    FpOpFusion::Fast => out.push_str("#pragma OPENCL FP_CONTRACT ON\n"),
                    FpOpFusion::Strict => out.push_str("#pragma OPENCL FP_CONTRACT OFF\n"),
                    FpOpFusion::Standard => {}
                }
            }
        }
        out.push('\n');
        out
    }

    // --- Types ---

    fn scalar(&mut self, ty: &Type, signed: bool) -> EmitResult<&'static str> {
        Ok(match (self.dialect, ty) {
            (_, Type::Void) => "void",
            (_, Type::Float) => "float",
            (_, Type::Double) => {
                self.uses_double = true;
                "double"
            }
            (_, Type::Int(1)) => "bool",
            (Dialect::C99, Type::Int(8)) => if signed { "int8_t" } else { "uint8_t" },
            (Dialect::C99, Type::Int(16)) => if signed { "int16_t" } else { "uint16_t" },
            (Dialect::C99, Type::Int(32)) => if signed { "int32_t" } else { "uint32_t" },
            (Dialect::C99, Type::Int(64)) => if signed { "int64_t" } else { "uint64_t" },
            (Dialect::OpenCl, Type::Int(8)) => if signed { "char" } else { "uchar" },
            (Dialect::OpenCl, Type::Int(16)) => if signed { "short" } else { "ushort" },
            (Dialect::OpenCl, Type::Int(32)) => if signed { "int" } else { "uint" },
            (Dialect::OpenCl, Type::Int(64)) => if signed { "long" } else { "ulong" },
            (_, other) => return Err(format!("no {} type for {}", self.dialect.name(), other)),
        })
    }

    /// `struct s { ... };` after the definitions of the structs it holds by
    /// value.
    fn struct_definition(
        &mut self,
        module: &Module,
        def: &StructType,
        defined: &mut HashSet<String>,
        visiting: &mut Vec<String>,
        out: &mut String,
    ) -> EmitResult<()> {
        if def.opaque || defined.contains(&def.name) {
            return Ok(());
        }
        if visiting.contains(&def.name) {
            return Err(format!("struct type '%{}' contains itself", def.name));
        }
        if def.fields.is_empty() {
            return Err(format!("struct type '%{}' has no fields", def.name));
        }
        visiting.push(def.name.clone());
        for field in &def.fields {
            if let Some(inner) = contained_struct(field) {
                let inner = module
                    .struct_type(inner)
                    .ok_or_else(|| format!("unknown struct type '%{}'", inner))?;
                self.struct_definition(module, inner, defined, visiting, out)?;
            }
        }
        visiting.pop();

        let _ = writeln!(out, "{} {{", struct_name(&def.name));
        for (i, field) in def.fields.iter().enumerate() {
            let _ = writeln!(out, "  {};", self.declare(field, &format!("f{}", i))?);
        }
        let packed = if def.packed { " __attribute__((packed))" } else { "" };
        let _ = writeln!(out, "}}{};", packed);
        defined.insert(def.name.clone());
        Ok(())
    }

    /// C declarator for `name` of type `ty`, e.g. `int32_t (*v_p)[4]`.
    fn declare(&mut self, ty: &Type, name: &str) -> EmitResult<String> {
        match ty {
            Type::Ptr(inner) => {
                let inner_name = if matches!(**inner, Type::Array(..)) {
                    format!("(*{})", name)
                } else {
                    format!("*{}", name)
                };
                self.declare(inner, &inner_name)
            }
            Type::Array(n, elem) => self.declare(elem, &format!("{}[{}]", name, n)),
            scalar => {
                let base = match scalar {
                    Type::Struct(s) => struct_name(s),
                    other => self.scalar(other, true)?.to_string(),
                };
                if name.is_empty() {
                    Ok(base)
                } else {
                    Ok(format!("{} {}", base, name))
                }
            }
        }
    }

    fn type_name(&mut self, ty: &Type) -> EmitResult<String> {
        self.declare(ty, "")
    }

    fn unsigned_name(&mut self, ty: &Type) -> EmitResult<String> {
        match ty {
            Type::Int(_) => self.scalar(ty, false).map(str::to_string),
            other => self.type_name(other),
        }
    }

    // --- Values ---

    fn float_literal(&mut self, v: f64, ty: &Type) -> String {
        if v.is_nan() || v.is_infinite() {
            if self.dialect == Dialect::C99 {
                self.headers.insert("math.h");
            }
            return match (v.is_nan(), v.is_sign_negative()) {
                (true, _) => "NAN".to_string(),
                (false, false) => "INFINITY".to_string(),
                (false, true) => "(-INFINITY)".to_string(),
            };
        }
        let suffix = if *ty == Type::Float { "f" } else { "" };
        format!("{:e}{}", v, suffix)
    }

    fn value(&mut self, value: &Value, ty: &Type) -> EmitResult<String> {
        Ok(match value {
            Value::Local(name) => local_name(name),
            Value::Global(name) => format!("(&{})", symbol_name(name)),
            Value::Int(v) => match ty {
                Type::Float | Type::Double => self.float_literal(*v as f64, ty),
                Type::Int(bits) => int_literal(*v, *bits),
                Type::Ptr(_) => format!("(({})(uintptr_t){})", self.type_name(ty)?, v),
                other => return Err(format!("integer constant of type {}", other)),
            },
            Value::Float(v) => self.float_literal(*v, ty),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Null | Value::Undef | Value::Zero => match ty {
                Type::Ptr(_) => format!("(({})0)", self.type_name(ty)?),
                Type::Float => "0.0f".to_string(),
                Type::Double => "0.0".to_string(),
                Type::Int(_) => "0".to_string(),
                Type::Struct(_) => format!("(({}){{0}})", self.type_name(ty)?),
                other => return Err(format!("{} used as a value of type {}", value, other)),
            },
            Value::Array(_) | Value::Struct(_) => {
                return Err("aggregate constant used as an operand".to_string())
            }
        })
    }

    fn space_of(&self, scope: &FunctionScope<'_>, value: &Value) -> Option<&'static str> {
        if self.dialect != Dialect::OpenCl {
            return None;
        }
        match value {
            Value::Local(name) => scope.spaces.get(name).copied(),
            Value::Global(name) => scope
                .module
                .global(name)
                .map(|g| if g.is_constant { "__constant" } else { "__global" }),
            _ => None,
        }
    }

    /// `ptr` as an expression of type `pointee *`, cast when its own type
    /// differs (opaque pointers, byte offsets, reinterpreted globals).
    fn pointer_to(&mut self, scope: &FunctionScope<'_>, ptr: &Value, pointee: &Type) -> EmitResult<String> {
        let wanted = Type::ptr(pointee.clone());
        let rendered = self.value(ptr, &wanted)?;
        let is_literal = !matches!(ptr, Value::Local(_) | Value::Global(_));
        if is_literal || scope.type_of(ptr).as_ref() == Some(&wanted) {
            return Ok(rendered);
        }
        let space = self.space_of(scope, ptr).map(|s| format!("{} ", s)).unwrap_or_default();
        Ok(format!("(({}{}){})", space, self.type_name(&wanted)?, rendered))
    }

    /// Lvalue for `*ptr` read or written as `ty`.
    fn deref(&mut self, scope: &FunctionScope<'_>, ptr: &Value, ty: &Type) -> EmitResult<String> {
        if let Value::Global(name) = ptr {
            if scope.module.global(name).is_some_and(|g| g.ty == *ty) {
                return Ok(symbol_name(name));
            }
        }
        Ok(format!("*{}", self.pointer_to(scope, ptr, ty)?))
    }

    fn initializer(&mut self, value: &Value, ty: &Type) -> EmitResult<String> {
        match (value, ty) {
            (Value::Zero | Value::Undef, Type::Array(..) | Type::Struct(_)) => Ok("{0}".to_string()),
            (Value::Array(items) | Value::Struct(items), _) => {
                let mut parts = Vec::with_capacity(items.len());
                for (ity, v) in items {
                    parts.push(self.initializer(v, ity)?);
                }
                Ok(format!("{{ {} }}", parts.join(", ")))
            }
            (Value::Global(name), _) => Ok(format!("&{}", symbol_name(name))),
            _ => self.value(value, ty),
        }
    }

    // --- Top-level entities ---

    fn is_kernel(&self, func: &Function) -> bool {
        self.dialect == Dialect::OpenCl && self.kernels.iter().any(|k| *k == func.name)
    }

    /// Signature without the trailing `;`, or `None` when a header or the
    /// device runtime already declares the function.
    fn prototype(&mut self, func: &Function) -> EmitResult<Option<String>> {
        if func.name.starts_with("llvm.") {
            return Ok(None);
        }
        if func.is_declaration() {
            if self.dialect == Dialect::OpenCl && DEVICE_BUILTINS.contains(&func.name.as_str()) {
                return Ok(None);
            }
            if let Some(header) = self.library_info.header_for(&func.name) {
                if self.dialect == Dialect::C99 {
                    self.headers.insert(header);
                }
                return Ok(None);
            }
        }
        self.signature(func).map(Some)
    }

    fn signature(&mut self, func: &Function) -> EmitResult<String> {
        let is_kernel = self.is_kernel(func);
        let mut sig = String::new();
        if func.linkage == Linkage::Internal {
            sig.push_str("static ");
        }
        if is_kernel {
            if !func.ret.is_void() {
                return Err("kernel entry points must return void".to_string());
            }
            sig.push_str("__kernel ");
        }
        let name = symbol_name(&func.name);
        let mut params = Vec::with_capacity(func.params.len());
        for param in &func.params {
            let decl = self.declare(&param.ty, &local_name(&param.name))?;
            if is_kernel && param.ty.is_ptr() {
                params.push(format!("__global {}", decl));
            } else {
                params.push(decl);
            }
        }
        let params = match (params.is_empty(), func.variadic) {
            // C99 needs a named parameter before `...`
            (true, true) => String::new(),
            (true, false) => "void".to_string(),
            (false, true) => format!("{}, ...", params.join(", ")),
            (false, false) => params.join(", "),
        };
        let decl = self.declare(&func.ret, &format!("{}({})", name, params))?;
        sig.push_str(&decl);
        Ok(sig)
    }

    fn global(&mut self, global: &Global) -> EmitResult<String> {
        let mut line = String::new();
        let name = symbol_name(&global.name);
        match self.dialect {
            Dialect::C99 => {
                if global.init.is_none() {
                    line.push_str("extern ");
                } else if global.linkage == Linkage::Internal {
                    line.push_str("static ");
                }
                if global.is_constant {
                    line.push_str("const ");
                }
            }
            Dialect::OpenCl => {
                line.push_str(if global.is_constant { "__constant " } else { "__global " });
            }
        }
        line.push_str(&self.declare(&global.ty, &name)?);
        if let Some(init) = &global.init {
            let _ = write!(line, " = {}", self.initializer(init, &global.ty)?);
        }
        line.push(';');
        Ok(line)
    }

    // --- Functions ---

    /// Address space of each pointer value in an OpenCL function.
    fn address_spaces(&self, module: &Module, func: &Function) -> HashMap<String, &'static str> {
        let mut spaces = HashMap::new();
        if self.dialect != Dialect::OpenCl {
            return spaces;
        }
        if self.is_kernel(func) {
            for param in func.params.iter().filter(|p| p.ty.is_ptr()) {
                spaces.insert(param.name.clone(), "__global");
            }
        }
        let space_of = |spaces: &HashMap<String, &'static str>, v: &Value| -> Option<&'static str> {
            match v {
                Value::Local(n) => spaces.get(n).copied(),
                Value::Global(g) => module
                    .global(g)
                    .map(|g| if g.is_constant { "__constant" } else { "__global" }),
                _ => None,
            }
        };
        loop {
            let mut changed = false;
            for inst in func.blocks.iter().flat_map(|b| &b.instructions) {
                let derived = match inst {
                    Instruction::GetElementPtr { base, .. } => space_of(&spaces, base),
                    Instruction::Cast {
                        op: CastOp::Bitcast,
                        value,
                        ..
                    } => space_of(&spaces, value),
                    Instruction::Select {
                        on_true, on_false, ..
                    } => space_of(&spaces, on_true).or_else(|| space_of(&spaces, on_false)),
                    Instruction::Phi { incoming, .. } => {
                        incoming.iter().find_map(|(v, _)| space_of(&spaces, v))
                    }
                    _ => None,
                };
                if let (Some(space), Some(dest)) = (derived, inst.dest()) {
                    if !spaces.contains_key(dest) {
                        spaces.insert(dest.to_string(), space);
                        changed = true;
                    }
                }
            }
            if !changed {
                return spaces;
            }
        }
    }

    fn function(&mut self, module: &Module, func: &Function, out: &mut String) -> EmitResult<()> {
        let mut types: HashMap<String, Type> =
            func.params.iter().map(|p| (p.name.clone(), p.ty.clone())).collect();
        for inst in func.blocks.iter().flat_map(|b| &b.instructions) {
            if let (Some(dest), Some(ty)) = (inst.dest(), inst.result_type()) {
                types.insert(dest.to_string(), ty);
            }
        }
        let scope = FunctionScope {
            module,
            types,
            spaces: self.address_spaces(module, func),
        };
        if self.verbose {
            let _ = writeln!(out, "/* @{} */", func.name);
        }
        let sig = self.signature(func)?;
        let _ = writeln!(out, "{} {{", sig);

        // locals
        let mut any_locals = false;
        for inst in func.blocks.iter().flat_map(|b| &b.instructions) {
            let Some(dest) = inst.dest() else { continue };
            let name = local_name(dest);
            if let Instruction::Alloca { ty, .. } = inst {
                let _ = writeln!(out, "  {};", self.declare(ty, &format!("{}__slot", name))?);
            }
            let ty = inst
                .result_type()
                .ok_or_else(|| format!("cannot type value '%{}'", dest))?;
            let space = scope.spaces.get(dest).map(|s| format!("{} ", s)).unwrap_or_default();
            let _ = writeln!(out, "  {}{};", space, self.declare(&ty, &name)?);
            if matches!(inst, Instruction::Phi { .. }) {
                let _ = writeln!(out, "  {}{};", space, self.declare(&ty, &format!("{}__phi", name))?);
            }
            any_locals = true;
        }
        if any_locals {
            out.push('\n');
        }

        for block in &func.blocks {
            let _ = writeln!(out, "{}:", block_name(&block.label));
            for inst in &block.instructions {
                if let Instruction::Phi { dest, .. } = inst {
                    let name = local_name(dest);
                    let _ = writeln!(out, "  {} = {}__phi;", name, name);
                }
            }
            for inst in &block.instructions {
                if let Some(stmt) = self.instruction(&scope, inst)? {
                    let _ = writeln!(out, "  {}", stmt);
                }
            }
            let term = block
                .terminator
                .as_ref()
                .ok_or_else(|| format!("block '{}' has no terminator", block.label))?;
            self.terminator(func, &block.label, term, out)?;
        }
        out.push_str("}\n\n");
        Ok(())
    }

    fn instruction(&mut self, scope: &FunctionScope<'_>, inst: &Instruction) -> EmitResult<Option<String>> {
        let stmt = match inst {
            Instruction::Binary {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => {
                let d = local_name(dest);
                let a = self.value(lhs, ty)?;
                let b = self.value(rhs, ty)?;
                if op.is_float() {
                    if *op == BinOp::FRem {
                        let fmod = if *ty == Type::Float { "fmodf" } else { "fmod" };
                        if self.dialect == Dialect::C99 {
                            self.headers.insert("math.h");
                        }
                        format!("{} = {}({}, {});", d, fmod, a, b)
                    } else {
                        let sym = match op {
                            BinOp::FAdd => "+",
                            BinOp::FSub => "-",
                            BinOp::FMul => "*",
                            _ => "/",
                        };
                        format!("{} = {} {} {};", d, a, sym, b)
                    }
                } else {
                    let (sym, signed) = match op {
                        BinOp::Add => ("+", false),
                        BinOp::Sub => ("-", false),
                        BinOp::Mul => ("*", false),
                        BinOp::Shl => ("<<", false),
                        BinOp::And => ("&", false),
                        BinOp::Or => ("|", false),
                        BinOp::Xor => ("^", false),
                        BinOp::UDiv => ("/", false),
                        BinOp::URem => ("%", false),
                        BinOp::LShr => (">>", false),
                        BinOp::SDiv => ("/", true),
                        BinOp::SRem => ("%", true),
                        _ => (">>", true),
                    };
                    let st = self.type_name(ty)?;
                    let op_ty = if signed { st.clone() } else { self.unsigned_name(ty)? };
                    format!("{} = ({})(({}){} {} ({}){});", d, st, op_ty, a, sym, op_ty, b)
                }
            }
            Instruction::ICmp {
                dest,
                pred,
                ty,
                lhs,
                rhs,
            } => {
                let d = local_name(dest);
                let mut a = self.value(lhs, ty)?;
                let mut b = self.value(rhs, ty)?;
                let sym = match pred {
                    IntPredicate::Eq => "==",
                    IntPredicate::Ne => "!=",
                    IntPredicate::Ugt | IntPredicate::Sgt => ">",
                    IntPredicate::Uge | IntPredicate::Sge => ">=",
                    IntPredicate::Ult | IntPredicate::Slt => "<",
                    IntPredicate::Ule | IntPredicate::Sle => "<=",
                };
                if pred.is_unsigned() && ty.is_int() {
                    let ut = self.unsigned_name(ty)?;
                    a = format!("({}){}", ut, a);
                    b = format!("({}){}", ut, b);
                }
                format!("{} = {} {} {};", d, a, sym, b)
            }
            Instruction::FCmp {
                dest,
                pred,
                ty,
                lhs,
                rhs,
            } => {
                let d = local_name(dest);
                let a = self.value(lhs, ty)?;
                let b = self.value(rhs, ty)?;
                let expr = match pred {
                    FloatPredicate::False => "0".to_string(),
                    FloatPredicate::True => "1".to_string(),
                    FloatPredicate::Oeq => format!("{} == {}", a, b),
                    FloatPredicate::Ogt => format!("{} > {}", a, b),
                    FloatPredicate::Oge => format!("{} >= {}", a, b),
                    FloatPredicate::Olt => format!("{} < {}", a, b),
                    FloatPredicate::Ole => format!("{} <= {}", a, b),
                    FloatPredicate::One => format!("({} < {} || {} > {})", a, b, a, b),
                    FloatPredicate::Ord => format!("({} == {} && {} == {})", a, a, b, b),
                    FloatPredicate::Uno => format!("({} != {} || {} != {})", a, a, b, b),
                    FloatPredicate::Ueq => format!("!({} < {} || {} > {})", a, b, a, b),
                    FloatPredicate::Ugt => format!("!({} <= {})", a, b),
                    FloatPredicate::Uge => format!("!({} < {})", a, b),
                    FloatPredicate::Ult => format!("!({} >= {})", a, b),
                    FloatPredicate::Ule => format!("!({} > {})", a, b),
                    FloatPredicate::Une => format!("{} != {}", a, b),
                };
                format!("{} = {};", d, expr)
            }
            Instruction::Cast {
                dest,
                op,
                from,
                value,
                to,
            } => {
                let d = local_name(dest);
                let v = self.value(value, from)?;
                format!("{} = {};", d, self.cast(*op, from, &v, to)?)
            }
            Instruction::Alloca { dest, .. } => {
                let d = local_name(dest);
                format!("{} = &{}__slot;", d, d)
            }
            Instruction::Load { dest, ty, ptr } => {
                format!("{} = {};", local_name(dest), self.deref(scope, ptr, ty)?)
            }
            Instruction::Store { ty, value, ptr } => {
                let v = self.value(value, ty)?;
                format!("{} = {};", self.deref(scope, ptr, ty)?, v)
            }
            Instruction::GetElementPtr {
                dest,
                source,
                base,
                indices,
                ..
            } => {
                let d = local_name(dest);
                let b = self.pointer_to(scope, base, source)?;
                if indices.is_empty() {
                    format!("{} = {};", d, b)
                } else {
                    let mut current = source.clone();
                    let mut access = format!("&({})", b);
                    for (i, (ity, idx)) in indices.iter().enumerate() {
                        if i == 0 {
                            let _ = write!(access, "[{}]", self.value(idx, ity)?);
                            continue;
                        }
                        current = match &current {
                            Type::Array(_, elem) => {
                                let _ = write!(access, "[{}]", self.value(idx, ity)?);
                                (**elem).clone()
                            }
                            Type::Struct(name) => {
                                let field = match idx {
                                    Value::Int(n) => usize::try_from(*n).ok(),
                                    _ => None,
                                }
                                .ok_or_else(|| format!("struct '%{}' indexed by {}", name, idx))?;
                                let ty = scope
                                    .module
                                    .struct_type(name)
                                    .and_then(|def| def.fields.get(field))
                                    .cloned()
                                    .ok_or_else(|| format!("struct '%{}' has no field {}", name, field))?;
                                let _ = write!(access, ".f{}", field);
                                ty
                            }
                            other => {
                                return Err(format!("getelementptr steps into scalar type {}", other))
                            }
                        };
                    }
                    format!("{} = {};", d, access)
                }
            }
            Instruction::Call {
                dest, callee, args, ..
            } if callee.starts_with("llvm.") => {
                let Some(expr) = self.intrinsic(callee, args)? else {
                    return Ok(None);
                };
                match dest {
                    Some(d) => format!("{} = {};", local_name(d), expr),
                    None => format!("{};", expr),
                }
            }
            Instruction::Call {
                dest, callee, args, ..
            } => {
                let mut rendered = Vec::with_capacity(args.len());
                for (ty, v) in args {
                    let arg = self.value(v, ty)?;
                    let typed = matches!(v, Value::Local(_) | Value::Global(_))
                        && !scope.type_of(v).is_some_and(|t| t.is_opaque_ptr());
                    if ty.is_opaque_ptr() && typed {
                        let space = self.space_of(scope, v).map(|s| format!("{} ", s)).unwrap_or_default();
                        rendered.push(format!("({}void *){}", space, arg));
                    } else {
                        rendered.push(arg);
                    }
                }
                let call = format!("{}({})", symbol_name(callee), rendered.join(", "));
                match dest {
                    Some(d) => format!("{} = {};", local_name(d), call),
                    None => format!("{};", call),
                }
            }
            Instruction::Select {
                dest,
                cond,
                ty,
                on_true,
                on_false,
            } => {
                let c = self.value(cond, &Type::Int(1))?;
                let a = self.value(on_true, ty)?;
                let b = self.value(on_false, ty)?;
                format!("{} = {} ? {} : {};", local_name(dest), c, a, b)
            }
            Instruction::Phi { .. } => return Ok(None),
        };
        Ok(Some(stmt))
    }

    /// C for a call to an `llvm.*` intrinsic, or `None` for hints that
    /// generate no code.
    fn intrinsic(&mut self, callee: &str, args: &[(Type, Value)]) -> EmitResult<Option<String>> {
        let name = callee.trim_start_matches("llvm.");
        let family = name.split('.').next().unwrap_or(name);
        if matches!(family, "lifetime" | "dbg" | "assume" | "donothing")
            || name.starts_with("experimental.noalias.scope.decl")
        {
            return Ok(None);
        }

        let mut ops = Vec::with_capacity(args.len());
        for (ty, v) in args {
            ops.push(self.value(v, ty)?);
        }
        let arity = match family {
            "fabs" | "sqrt" | "floor" | "ceil" | "trunc" | "round" | "sin" | "cos" | "exp" | "log"
            | "abs" => 1,
            "pow" | "minnum" | "maxnum" | "copysign" | "smax" | "smin" | "umax" | "umin" => 2,
            "fma" | "fmuladd" | "memcpy" | "memmove" | "memset" => 3,
            _ => return Err(format!("unsupported intrinsic '@{}'", callee)),
        };
        if ops.len() < arity {
            return Err(format!("'@{}' takes {} operands, found {}", callee, arity, ops.len()));
        }
        let ty = args[0].0.clone();

        let expr = match family {
            "fmuladd" => format!("{} * {} + {}", ops[0], ops[1], ops[2]),
            "memcpy" | "memmove" | "memset" => {
                let header = match self.dialect {
                    Dialect::C99 => self.library_info.header_for(family),
                    Dialect::OpenCl => None,
                };
                let header = header.ok_or_else(|| format!("{} is not available for this target", family))?;
                self.headers.insert(header);
                format!("{}({}, {}, {})", family, ops[0], ops[1], ops[2])
            }
            "smax" | "smin" | "umax" | "umin" => {
                let cmp = if family.ends_with("max") { ">" } else { "<" };
                let (a, b) = if family.starts_with('u') {
                    let ut = self.unsigned_name(&ty)?;
                    (format!("({}){}", ut, ops[0]), format!("({}){}", ut, ops[1]))
                } else {
                    (ops[0].clone(), ops[1].clone())
                };
                format!("({} {} {} ? {} : {})", a, cmp, b, ops[0], ops[1])
            }
            "abs" => {
                let st = self.type_name(&ty)?;
                let ut = self.unsigned_name(&ty)?;
                format!("({})({} < 0 ? -({}){} : ({}){})", st, ops[0], ut, ops[0], ut, ops[0])
            }
            math => {
                if !ty.is_float() {
                    return Err(format!("'@{}' on non-float type {}", callee, ty));
                }
                let base = match math {
                    "minnum" => "fmin",
                    "maxnum" => "fmax",
                    other => other,
                };
                let function = match (self.dialect, &ty) {
                    (Dialect::C99, Type::Float) => format!("{}f", base),
                    _ => base.to_string(),
                };
                if self.dialect == Dialect::C99 {
                    self.headers.insert("math.h");
                }
                format!("{}({})", function, ops[..arity].join(", "))
            }
        };
        Ok(Some(expr))
    }

    fn cast(&mut self, op: CastOp, from: &Type, v: &str, to: &Type) -> EmitResult<String> {
        let to_name = self.type_name(to)?;
        Ok(match op {
            CastOp::Trunc if *to == Type::Int(1) => format!("(bool)({} & 1)", v),
            CastOp::Trunc | CastOp::FpToUi => format!("({})({}){}", to_name, self.unsigned_name(to)?, v),
            CastOp::ZExt if *from == Type::Int(1) => format!("({}){}", to_name, v),
            CastOp::ZExt | CastOp::UiToFp => format!("({})({}){}", to_name, self.unsigned_name(from)?, v),
            CastOp::SExt if *from == Type::Int(1) => format!("({})({} ? -1 : 0)", to_name, v),
            CastOp::SExt | CastOp::SiToFp => format!("({})({}){}", to_name, self.type_name(from)?, v),
            CastOp::FpTrunc | CastOp::FpExt | CastOp::FpToSi => format!("({}){}", to_name, v),
            CastOp::PtrToInt | CastOp::IntToPtr => format!("({})(uintptr_t){}", to_name, v),
            CastOp::Bitcast if from.is_ptr() && to.is_ptr() => format!("({}){}", to_name, v),
            CastOp::Bitcast => {
                let same_width = match (from, to) {
                    (Type::Int(32), Type::Float) | (Type::Float, Type::Int(32)) => true,
                    (Type::Int(64), Type::Double) | (Type::Double, Type::Int(64)) => true,
                    (a, b) => a == b,
                };
                if !same_width {
                    return Err(format!("bitcast from {} to {}", from, to));
                }
                match self.dialect {
                    Dialect::OpenCl => format!("as_{}({})", to_name, v),
                    Dialect::C99 => {
                        let from_name = self.type_name(from)?;
                        format!("((union {{ {} f; {} t; }}){{ .f = {} }}).t", from_name, to_name, v)
                    }
                }
            }
        })
    }

    fn phi_copies(&mut self, func: &Function, from: &str, to: &str, indent: &str, out: &mut String) -> EmitResult<()> {
        let Some(target) = func.block(to) else {
            return Err(format!("branch to unknown block '{}'", to));
        };
        for inst in &target.instructions {
            if let Instruction::Phi { dest, ty, incoming } = inst {
                for (value, _) in incoming.iter().filter(|(_, label)| label == from) {
                    let v = self.value(value, ty)?;
                    let _ = writeln!(out, "{}{}__phi = {};", indent, local_name(dest), v);
                }
            }
        }
        Ok(())
    }

    fn terminator(&mut self, func: &Function, label: &str, term: &Terminator, out: &mut String) -> EmitResult<()> {
        match term {
            Terminator::Ret(None) => out.push_str("  return;\n"),
            Terminator::Ret(Some((ty, value))) => {
                let v = self.value(value, ty)?;
                let _ = writeln!(out, "  return {};", v);
            }
            Terminator::Br(target) => {
                self.phi_copies(func, label, target, "  ", out)?;
                let _ = writeln!(out, "  goto {};", block_name(target));
            }
            Terminator::CondBr {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.value(cond, &Type::Int(1))?;
                let _ = writeln!(out, "  if ({}) {{", c);
                self.phi_copies(func, label, on_true, "    ", out)?;
                let _ = writeln!(out, "    goto {};", block_name(on_true));
                out.push_str("  } else {\n");
                self.phi_copies(func, label, on_false, "    ", out)?;
                let _ = writeln!(out, "    goto {};", block_name(on_false));
                out.push_str("  }\n");
            }
            Terminator::Switch {
                ty,
                value,
                default,
                cases,
            } => {
                let v = self.value(value, ty)?;
                let _ = writeln!(out, "  switch ({}) {{", v);
                for (case, target) in cases {
                    let _ = writeln!(out, "  case {}: {{", self.value(&Value::Int(*case), ty)?);
                    self.phi_copies(func, label, target, "    ", out)?;
                    let _ = writeln!(out, "    goto {};", block_name(target));
                    out.push_str("  }\n");
                }
                out.push_str("  default: {\n");
                self.phi_copies(func, label, default, "    ", out)?;
                let _ = writeln!(out, "    goto {};", block_name(default));
                out.push_str("  }\n  }\n");
            }
            Terminator::Unreachable => match &self.options.trap_function {
                Some(trap) => {
                    let name = symbol_name(trap);
                    self.extra_prototypes
                        .insert(trap.clone(), format!("void {}(void)", name));
                    let _ = writeln!(out, "  {}();", name);
                    out.push_str("  __builtin_unreachable();\n");
                }
                None => out.push_str("  __builtin_unreachable();\n"),
            },
        }
        Ok(())
    }
}

fn emit_error(function: &str, reason: String) -> BackendError {
    BackendError::Emit {
        function: function.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests;
