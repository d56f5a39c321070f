//! Compiled module: typed SSA functions over a small LLVM-like type system.
//!
//! Pointers are either typed (`i32*`) or opaque (`ptr`). An opaque pointer is
//! `Ptr(Void)`, since typed IR has no `void*` and spells it `i8*`.

use std::fmt;

// ─── Types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// `i1`, `i8`, `i16`, `i32`, `i64`.
    Int(u32),
    Float,
    Double,
    Ptr(Box<Type>),
    Array(u64, Box<Type>),
    /// `%name`, defined in [`Module::structs`].
    Struct(String),
}

impl Type {
    pub fn ptr(inner: Type) -> Type {
        Type::Ptr(Box::new(inner))
    }

    pub fn opaque_ptr() -> Type {
        Type::ptr(Type::Void)
    }

    pub fn is_opaque_ptr(&self) -> bool {
        matches!(self, Type::Ptr(inner) if inner.is_void())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    /// Pointee of a pointer type.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr(inner) if inner.is_void() => write!(f, "ptr"),
            Type::Ptr(inner) => write!(f, "{}*", inner),
            Type::Array(n, elem) => write!(f, "[{} x {}]", n, elem),
            Type::Struct(name) => write!(f, "%{}", name),
        }
    }
}

/// `%name = type { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<Type>,
    /// `<{ ... }>`: no padding between fields.
    pub packed: bool,
    /// `%name = type opaque`: usable only behind a pointer.
    pub opaque: bool,
}

/// Type reached by stepping `indices` into `source`, as `getelementptr`
/// does. The first index steps over the pointer and keeps the type. Struct
/// members must be selected by constant indices.
pub fn indexed_type(source: &Type, indices: &[(Type, Value)], structs: &[StructType]) -> Option<Type> {
    let mut ty = source.clone();
    for (_, index) in indices.iter().skip(1) {
        ty = match &ty {
            Type::Array(_, elem) => (**elem).clone(),
            Type::Struct(name) => {
                let Value::Int(i) = index else { return None };
                let def = structs.iter().find(|s| s.name == *name)?;
                def.fields.get(usize::try_from(*i).ok()?)?.clone()
            }
            _ => return None,
        };
    }
    Some(ty)
}

// ─── Values ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `%name`: parameter or instruction result.
    Local(String),
    /// `@name`: address of a global variable.
    Global(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Undef,
    /// `zeroinitializer`
    Zero,
    /// `[i32 1, i32 2]`, and `c"..."` as `i8` items.
    Array(Vec<(Type, Value)>),
    /// `{ i32 1, ptr null }`
    Struct(Vec<(Type, Value)>),
}

impl Value {
    pub fn local_name(&self) -> Option<&str> {
        match self {
            Value::Local(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        !matches!(self, Value::Local(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(name) => write!(f, "%{}", name),
            Value::Global(name) => write!(f, "@{}", name),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:e}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Undef => write!(f, "undef"),
            Value::Zero => write!(f, "zeroinitializer"),
            Value::Array(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            Value::Struct(items) => {
                write!(f, "{{ ")?;
                write_items(f, items)?;
                write!(f, " }}")
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[(Type, Value)]) -> fmt::Result {
    for (i, (ty, v)) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{} {}", ty, v)?;
    }
    Ok(())
}

// ─── Instructions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "add" => BinOp::Add,
            "sub" => BinOp::Sub,
            "mul" => BinOp::Mul,
            "sdiv" => BinOp::SDiv,
            "udiv" => BinOp::UDiv,
            "srem" => BinOp::SRem,
            "urem" => BinOp::URem,
            "shl" => BinOp::Shl,
            "lshr" => BinOp::LShr,
            "ashr" => BinOp::AShr,
            "and" => BinOp::And,
            "or" => BinOp::Or,
            "xor" => BinOp::Xor,
            "fadd" => BinOp::FAdd,
            "fsub" => BinOp::FSub,
            "fmul" => BinOp::FMul,
            "fdiv" => BinOp::FDiv,
            "frem" => BinOp::FRem,
            _ => return None,
        })
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IntPredicate {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "eq" => IntPredicate::Eq,
            "ne" => IntPredicate::Ne,
            "ugt" => IntPredicate::Ugt,
            "uge" => IntPredicate::Uge,
            "ult" => IntPredicate::Ult,
            "ule" => IntPredicate::Ule,
            "sgt" => IntPredicate::Sgt,
            "sge" => IntPredicate::Sge,
            "slt" => IntPredicate::Slt,
            "sle" => IntPredicate::Sle,
            _ => return None,
        })
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            IntPredicate::Ugt | IntPredicate::Uge | IntPredicate::Ult | IntPredicate::Ule
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Uno,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    True,
}

impl FloatPredicate {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "false" => FloatPredicate::False,
            "oeq" => FloatPredicate::Oeq,
            "ogt" => FloatPredicate::Ogt,
            "oge" => FloatPredicate::Oge,
            "olt" => FloatPredicate::Olt,
            "ole" => FloatPredicate::Ole,
            "one" => FloatPredicate::One,
            "ord" => FloatPredicate::Ord,
            "uno" => FloatPredicate::Uno,
            "ueq" => FloatPredicate::Ueq,
            "ugt" => FloatPredicate::Ugt,
            "uge" => FloatPredicate::Uge,
            "ult" => FloatPredicate::Ult,
            "ule" => FloatPredicate::Ule,
            "une" => FloatPredicate::Une,
            "true" => FloatPredicate::True,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

impl CastOp {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "trunc" => CastOp::Trunc,
            "zext" => CastOp::ZExt,
            "sext" => CastOp::SExt,
            "fptrunc" => CastOp::FpTrunc,
            "fpext" => CastOp::FpExt,
            "fptoui" => CastOp::FpToUi,
            "fptosi" => CastOp::FpToSi,
            "uitofp" => CastOp::UiToFp,
            "sitofp" => CastOp::SiToFp,
            "ptrtoint" => CastOp::PtrToInt,
            "inttoptr" => CastOp::IntToPtr,
            "bitcast" => CastOp::Bitcast,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binary {
        dest: String,
        op: BinOp,
        ty: Type,
        lhs: Value,
        rhs: Value,
    },
    ICmp {
        dest: String,
        pred: IntPredicate,
        ty: Type,
        lhs: Value,
        rhs: Value,
    },
    FCmp {
        dest: String,
        pred: FloatPredicate,
        ty: Type,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        dest: String,
        op: CastOp,
        from: Type,
        value: Value,
        to: Type,
    },
    Alloca {
        dest: String,
        ty: Type,
    },
    /// `load T* %p` or `load T, ptr %p`: `ty` is the loaded type.
    Load {
        dest: String,
        ty: Type,
        ptr: Value,
    },
    Store {
        ty: Type,
        value: Value,
        ptr: Value,
    },
    /// `getelementptr T, ptr %base, i32 %i, ...`. `source` is the type
    /// `base` is indexed as; `result` is a pointer to the selected element.
    GetElementPtr {
        dest: String,
        source: Type,
        base: Value,
        indices: Vec<(Type, Value)>,
        result: Type,
    },
    Call {
        dest: Option<String>,
        ret: Type,
        callee: String,
        args: Vec<(Type, Value)>,
    },
    Select {
        dest: String,
        cond: Value,
        ty: Type,
        on_true: Value,
        on_false: Value,
    },
    Phi {
        dest: String,
        ty: Type,
        incoming: Vec<(Value, String)>,
    },
}

impl Instruction {
    /// Name of the value this instruction defines, if any.
    pub fn dest(&self) -> Option<&str> {
        match self {
            Instruction::Binary { dest, .. }
            | Instruction::ICmp { dest, .. }
            | Instruction::FCmp { dest, .. }
            | Instruction::Cast { dest, .. }
            | Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::GetElementPtr { dest, .. }
            | Instruction::Select { dest, .. }
            | Instruction::Phi { dest, .. } => Some(dest),
            Instruction::Call { dest, .. } => dest.as_deref(),
            Instruction::Store { .. } => None,
        }
    }

    /// Type of the defined value.
    pub fn result_type(&self) -> Option<Type> {
        Some(match self {
            Instruction::Binary { ty, .. } => ty.clone(),
            Instruction::ICmp { .. } | Instruction::FCmp { .. } => Type::Int(1),
            Instruction::Cast { to, .. } => to.clone(),
            Instruction::Alloca { ty, .. } => Type::ptr(ty.clone()),
            Instruction::Load { ty, .. } => ty.clone(),
            Instruction::GetElementPtr { result, .. } => result.clone(),
            Instruction::Call { dest: Some(_), ret, .. } => ret.clone(),
            Instruction::Select { ty, .. } | Instruction::Phi { ty, .. } => ty.clone(),
            Instruction::Call { dest: None, .. } | Instruction::Store { .. } => return None,
        })
    }

    /// Values read by this instruction.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Instruction::Binary { lhs, rhs, .. }
            | Instruction::ICmp { lhs, rhs, .. }
            | Instruction::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::Cast { value, .. } => vec![value],
            Instruction::Alloca { .. } => Vec::new(),
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { value, ptr, .. } => vec![value, ptr],
            Instruction::GetElementPtr { base, indices, .. } => {
                let mut ops = vec![base];
                ops.extend(indices.iter().map(|(_, v)| v));
                ops
            }
            Instruction::Call { args, .. } => args.iter().map(|(_, v)| v).collect(),
            Instruction::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(v, _)| v).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Ret(Option<(Type, Value)>),
    Br(String),
    CondBr {
        cond: Value,
        on_true: String,
        on_false: String,
    },
    Switch {
        ty: Type,
        value: Value,
        default: String,
        cases: Vec<(i64, String)>,
    },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Br(target) => vec![target],
            Terminator::CondBr {
                on_true, on_false, ..
            } => vec![on_true, on_false],
            Terminator::Switch { default, cases, .. } => {
                let mut out = vec![default.as_str()];
                for (_, label) in cases {
                    if !out.contains(&label.as_str()) {
                        out.push(label);
                    }
                }
                out
            }
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    /// Rename every branch target `from` to `to`.
    pub fn rename_target(&mut self, from: &str, to: &str) {
        let rename = |label: &mut String| {
            if label == from {
                *label = to.to_string();
            }
        };
        match self {
            Terminator::Br(target) => rename(target),
            Terminator::CondBr {
                on_true, on_false, ..
            } => {
                rename(on_true);
                rename(on_false);
            }
            Terminator::Switch { default, cases, .. } => {
                rename(default);
                cases.iter_mut().for_each(|(_, label)| rename(label));
            }
            Terminator::Ret(_) | Terminator::Unreachable => {}
        }
    }
}

// ─── Module structure ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    /// `None` only in malformed input; the verifier rejects it.
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
    #[default]
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub ret: Type,
    pub params: Vec<Param>,
    /// Takes arguments past `params` (`...`).
    pub variadic: bool,
    /// Empty for declarations.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub linkage: Linkage,
    pub ty: Type,
    pub is_constant: bool,
    /// `None` for `external global` declarations.
    pub init: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    pub triple: Option<String>,
    pub data_layout: Option<String>,
    pub structs: Vec<StructType>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn struct_type(&self, name: &str) -> Option<&StructType> {
        self.structs.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        let ty = Type::ptr(Type::Array(4, Box::new(Type::Int(32))));
        assert_eq!(ty.to_string(), "[4 x i32]*");
        assert_eq!(Type::ptr(Type::Float).pointee(), Some(&Type::Float));
    }

    #[test]
    fn test_opaque_pointer() {
        assert_eq!(Type::opaque_ptr().to_string(), "ptr");
        assert!(Type::opaque_ptr().is_opaque_ptr());
        assert!(!Type::ptr(Type::Int(8)).is_opaque_ptr());
        assert_eq!(Type::Struct("struct.P".to_string()).to_string(), "%struct.P");
    }

    #[test]
    fn test_indexed_type_steps_into_arrays_and_structs() {
        let structs = vec![StructType {
            name: "pair".to_string(),
            fields: vec![Type::Int(32), Type::Array(8, Box::new(Type::Double))],
            packed: false,
            opaque: false,
        }];
        let i32c = |v| (Type::Int(32), Value::Int(v));
        let pair = Type::Struct("pair".to_string());
        assert_eq!(indexed_type(&pair, &[i32c(0)], &structs), Some(pair.clone()));
        assert_eq!(
            indexed_type(&pair, &[i32c(0), i32c(1), i32c(3)], &structs),
            Some(Type::Double)
        );
        assert_eq!(indexed_type(&pair, &[i32c(0), i32c(2)], &structs), None);
        let dynamic = (Type::Int(32), Value::Local("i".to_string()));
        assert_eq!(indexed_type(&pair, &[i32c(0), dynamic], &structs), None);

        let gep = Instruction::GetElementPtr {
            dest: "p".to_string(),
            source: pair,
            base: Value::Global("table".to_string()),
            indices: vec![i32c(0), i32c(1)],
            result: Type::ptr(Type::Array(8, Box::new(Type::Double))),
        };
        assert_eq!(gep.operands().len(), 3);
    }

    #[test]
    fn test_switch_successors_are_unique() {
        let mut sw = Terminator::Switch {
            ty: Type::Int(32),
            value: Value::Local("x".to_string()),
            default: "other".to_string(),
            cases: vec![(1, "one".to_string()), (2, "one".to_string()), (3, "other".to_string())],
        };
        assert_eq!(sw.successors(), vec!["other", "one"]);
        sw.rename_target("one", "entry");
        assert_eq!(sw.successors(), vec!["other", "entry"]);
    }

    #[test]
    fn test_void_call_defines_nothing() {
        let call = Instruction::Call {
            dest: None,
            ret: Type::Void,
            callee: "sink".to_string(),
            args: vec![(Type::Int(32), Value::Int(1))],
        };
        assert_eq!(call.dest(), None);
        assert_eq!(call.result_type(), None);
    }
}
