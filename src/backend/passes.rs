//! Module passes and the pass manager that runs them in order.

use std::collections::{BTreeSet, HashSet};

use crate::error::BackendError;

use super::ir::{Function, Instruction, Module, Terminator, Value};
use super::target::{DataLayout, TargetLibraryInfo};

/// State shared by the passes of one pipeline run.
#[derive(Debug, Default)]
pub struct PassContext {
    pub library_info: Option<TargetLibraryInfo>,
    pub data_layout: Option<DataLayout>,
    /// Device entry points found by the kernel analysis.
    pub kernels: Vec<String>,
    /// Text sink filled by the emission pass.
    pub output: String,
    pub warnings: Vec<String>,
}

/// One unit of work over a whole module.
pub trait ModulePass {
    fn name(&self) -> &'static str;

    fn run(&mut self, module: &mut Module, ctx: &mut PassContext) -> Result<(), BackendError>;
}

/// Ordered queue of passes. Each queued pass runs exactly once.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn ModulePass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: Box<dyn ModulePass>) {
        log::trace!("queue pass {}", pass.name());
        self.passes.push(pass);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run and dequeue every pass. Stops at the first failure.
    pub fn run(&mut self, module: &mut Module, ctx: &mut PassContext) -> Result<(), BackendError> {
        for mut pass in self.passes.drain(..) {
            log::debug!("running pass {} on module {}", pass.name(), module.name);
            pass.run(module, ctx)?;
        }
        Ok(())
    }
}

// ─── Immutable analyses ────────────────────────────────────────────

/// Publishes the library-function table for the emitter.
pub struct TargetLibraryInfoPass {
    pub info: TargetLibraryInfo,
}

impl ModulePass for TargetLibraryInfoPass {
    fn name(&self) -> &'static str {
        "target-library-info"
    }

    fn run(&mut self, _module: &mut Module, ctx: &mut PassContext) -> Result<(), BackendError> {
        ctx.library_info = Some(self.info.clone());
        Ok(())
    }
}

/// Publishes the data layout and records it on the module.
pub struct DataLayoutPass {
    pub layout: DataLayout,
}

impl ModulePass for DataLayoutPass {
    fn name(&self) -> &'static str {
        "data-layout"
    }

    fn run(&mut self, module: &mut Module, ctx: &mut PassContext) -> Result<(), BackendError> {
        if module.data_layout.as_deref() != Some(self.layout.as_str()) {
            log::debug!("module {} data layout: {}", module.name, self.layout.as_str());
            module.data_layout = Some(self.layout.as_str().to_string());
        }
        ctx.data_layout = Some(self.layout.clone());
        Ok(())
    }
}

/// Finds device entry points: defined `void _Kernel*` functions.
pub struct KernelInfoPass;

impl ModulePass for KernelInfoPass {
    fn name(&self) -> &'static str {
        "kernel-info"
    }

    fn run(&mut self, module: &mut Module, ctx: &mut PassContext) -> Result<(), BackendError> {
        ctx.kernels = module
            .functions
            .iter()
            .filter(|f| !f.is_declaration() && f.ret.is_void() && f.name.starts_with("_Kernel"))
            .map(|f| f.name.clone())
            .collect();
        log::debug!("found {} kernel(s)", ctx.kernels.len());
        Ok(())
    }
}

// ─── Verifier ──────────────────────────────────────────────────────

/// Rejects modules the emitter cannot translate faithfully.
pub struct VerifierPass;

impl ModulePass for VerifierPass {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run(&mut self, module: &mut Module, _ctx: &mut PassContext) -> Result<(), BackendError> {
        verify_module(module)
    }
}

pub fn verify_module(module: &Module) -> Result<(), BackendError> {
    let mut symbols = HashSet::new();
    for name in module
        .globals
        .iter()
        .map(|g| &g.name)
        .chain(module.functions.iter().map(|f| &f.name))
    {
        if !symbols.insert(name.as_str()) {
            return Err(BackendError::Verify(format!("symbol '@{}' is defined twice", name)));
        }
    }
    for global in &module.globals {
        if let Some(init) = &global.init {
            check_global_refs(module, init).map_err(|missing| {
                BackendError::Verify(format!(
                    "global '@{}' refers to unknown symbol '@{}'",
                    global.name, missing
                ))
            })?;
        }
    }
    for func in module.functions.iter().filter(|f| !f.is_declaration()) {
        verify_function(module, func)
            .map_err(|reason| BackendError::Verify(format!("function '@{}': {}", func.name, reason)))?;
    }
    Ok(())
}

fn check_global_refs<'a>(module: &Module, value: &'a Value) -> Result<(), &'a str> {
    match value {
        Value::Global(name) if module.global(name).is_none() && module.function(name).is_none() => {
            Err(name)
        }
        Value::Array(items) | Value::Struct(items) => {
            items.iter().try_for_each(|(_, v)| check_global_refs(module, v))
        }
        _ => Ok(()),
    }
}

fn verify_function(module: &Module, func: &Function) -> Result<(), String> {
    let mut labels = HashSet::new();
    for block in &func.blocks {
        if !labels.insert(block.label.as_str()) {
            return Err(format!("block label '{}' is used twice", block.label));
        }
    }

    let mut defined: HashSet<&str> = HashSet::new();
    for param in &func.params {
        if !defined.insert(&param.name) {
            return Err(format!("parameter '%{}' is declared twice", param.name));
        }
    }
    for inst in func.blocks.iter().flat_map(|b| &b.instructions) {
        if let Some(dest) = inst.dest() {
            if !defined.insert(dest) {
                return Err(format!("value '%{}' is defined twice", dest));
            }
        }
    }

    let check_value = |value: &Value| -> Result<(), String> {
        match value {
            Value::Local(name) if !defined.contains(name.as_str()) => {
                Err(format!("use of undefined value '%{}'", name))
            }
            Value::Global(_) => check_global_refs(module, value)
                .map_err(|missing| format!("use of unknown symbol '@{}'", missing)),
            Value::Array(items) | Value::Struct(items) => items
                .iter()
                .try_for_each(|(_, v)| check_global_refs(module, v))
                .map_err(|missing| format!("use of unknown symbol '@{}'", missing)),
            _ => Ok(()),
        }
    };

    for block in &func.blocks {
        for inst in &block.instructions {
            for operand in inst.operands() {
                check_value(operand)?;
            }
            match inst {
                Instruction::Call { callee, args, .. } => {
                    let target = module
                        .function(callee)
                        .ok_or_else(|| format!("call to unknown function '@{}'", callee))?;
                    let arity_ok = if target.variadic {
                        args.len() >= target.params.len()
                    } else {
                        args.len() == target.params.len()
                    };
                    if !arity_ok {
                        let at_least = if target.variadic { "at least " } else { "" };
                        return Err(format!(
                            "call to '@{}' passes {} argument(s), expected {}{}",
                            callee,
                            args.len(),
                            at_least,
                            target.params.len()
                        ));
                    }
                }
                Instruction::Phi { incoming, .. } => {
                    if let Some((_, label)) = incoming.iter().find(|(_, l)| !labels.contains(l.as_str())) {
                        return Err(format!("phi '%{}' names unknown block '{}'", inst.dest().unwrap_or("?"), label));
                    }
                }
                Instruction::Load { ptr, .. } | Instruction::Store { ptr, .. } => {
                    if matches!(ptr, Value::Int(_) | Value::Float(_) | Value::Bool(_)) {
                        return Err(format!("memory access through non-pointer constant {}", ptr));
                    }
                }
                _ => {}
            }
        }

        let term = block
            .terminator
            .as_ref()
            .ok_or_else(|| format!("block '{}' has no terminator", block.label))?;
        for succ in term.successors() {
            if !labels.contains(succ) {
                return Err(format!("branch from '{}' to unknown block '{}'", block.label, succ));
            }
        }
        match term {
            Terminator::Ret(None) if !func.ret.is_void() => {
                return Err(format!("'ret void' in function returning {}", func.ret));
            }
            Terminator::Ret(Some((ty, value))) => {
                if *ty != func.ret {
                    return Err(format!("returns {} from function returning {}", ty, func.ret));
                }
                check_value(value)?;
            }
            Terminator::CondBr { cond, .. } => check_value(cond)?,
            Terminator::Switch { value, .. } => check_value(value)?,
            _ => {}
        }
    }

    if func.blocks.first().is_some_and(|entry| {
        entry
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Phi { .. }))
    }) {
        return Err("entry block cannot contain phi nodes".to_string());
    }
    Ok(())
}

// ─── Unreachable block elimination ─────────────────────────────────

/// Deletes blocks not reachable from the entry block and drops phi inputs
/// that came from them.
pub struct UnreachableBlockElim;

impl ModulePass for UnreachableBlockElim {
    fn name(&self) -> &'static str {
        "unreachable-block-elim"
    }

    fn run(&mut self, module: &mut Module, _ctx: &mut PassContext) -> Result<(), BackendError> {
        for func in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
            let removed = eliminate_unreachable(func);
            if removed > 0 {
                log::debug!("removed {} unreachable block(s) from @{}", removed, func.name);
            }
        }
        Ok(())
    }
}

fn eliminate_unreachable(func: &mut Function) -> usize {
    let mut reachable: BTreeSet<String> = BTreeSet::new();
    let mut worklist: Vec<String> = func.blocks.first().map(|b| b.label.clone()).into_iter().collect();
    while let Some(label) = worklist.pop() {
        if !reachable.insert(label.clone()) {
            continue;
        }
        if let Some(term) = func.block(&label).and_then(|b| b.terminator.as_ref()) {
            worklist.extend(term.successors().into_iter().map(str::to_string));
        }
    }

    let before = func.blocks.len();
    func.blocks.retain(|b| reachable.contains(&b.label));
    for inst in func.blocks.iter_mut().flat_map(|b| b.instructions.iter_mut()) {
        if let Instruction::Phi { incoming, .. } = inst {
            incoming.retain(|(_, label)| reachable.contains(label));
        }
    }
    before - func.blocks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::reader::read_module;
    use crate::backend::target::TargetTriple;

    struct Recorder(&'static str, std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>);

    impl ModulePass for Recorder {
        fn name(&self) -> &'static str {
            self.0
        }

        fn run(&mut self, _m: &mut Module, _c: &mut PassContext) -> Result<(), BackendError> {
            self.1.borrow_mut().push(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_passes_run_once_in_order() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut pm = PassManager::new();
        pm.add(Box::new(Recorder("a", log.clone())));
        pm.add(Box::new(Recorder("b", log.clone())));
        assert_eq!(pm.names(), vec!["a", "b"]);

        let mut module = Module::new("m");
        let mut ctx = PassContext::default();
        pm.run(&mut module, &mut ctx).unwrap();
        pm.run(&mut module, &mut ctx).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(pm.is_empty());
    }

    #[test]
    fn test_analysis_passes_fill_context() {
        let mut module =
            read_module("k", "define void @_Kernel_1(i32* %a) {\n  ret void\n}\ndefine i32 @f() {\n  ret i32 0\n}").unwrap();
        let triple = TargetTriple::parse("spir64-unknown-unknown").unwrap();
        let mut pm = PassManager::new();
        pm.add(Box::new(TargetLibraryInfoPass {
            info: TargetLibraryInfo::new(&triple),
        }));
        pm.add(Box::new(DataLayoutPass {
            layout: DataLayout::for_triple(&triple),
        }));
        pm.add(Box::new(KernelInfoPass));
        let mut ctx = PassContext::default();
        pm.run(&mut module, &mut ctx).unwrap();
        assert!(ctx.library_info.unwrap().has("sqrt"));
        assert_eq!(ctx.data_layout.unwrap().pointer_bits, 64);
        assert_eq!(ctx.kernels, vec!["_Kernel_1".to_string()]);
        assert!(module.data_layout.unwrap().starts_with("e-p:64"));
    }

    fn verify_text(text: &str) -> Result<(), BackendError> {
        verify_module(&read_module("v", text).unwrap())
    }

    #[test]
    fn test_verifier_accepts_well_formed() {
        let text = "@g = global i32 0\n\
                    declare i32 @h(i32)\n\
                    define i32 @f(i32 %a) {\n\
                    entry:\n  %x = call i32 @h(i32 %a)\n  %p = load i32* @g\n  br label %out\n\
                    out:\n  %r = phi i32 [ %x, %entry ]\n  ret i32 %r\n}";
        verify_text(text).unwrap();
    }

    #[test]
    fn test_verifier_rejections() {
        let cases = [
            ("define i32 @f() {\n  ret i32 %nope\n}", "undefined value '%nope'"),
            ("define void @f() {\n  br label %missing\n}", "unknown block 'missing'"),
            ("define void @f() {\n  call void @g()\n  ret void\n}", "unknown function '@g'"),
            ("define i32 @f() {\n  ret void\n}", "ret void"),
            ("define i32 @f() {\n  ret i64 0\n}", "returns i64"),
            (
                "define i32 @f() {\n  %a = add i32 1, 2\n  %a = add i32 1, 2\n  ret i32 %a\n}",
                "defined twice",
            ),
            ("declare void @g(i32)\ndefine void @f() {\n  call void @g()\n  ret void\n}", "expected 1"),
            ("@f = global i32 0\ndefine void @f() {\n  ret void\n}", "'@f' is defined twice"),
            ("@p = global i32* @q", "unknown symbol '@q'"),
            ("@s = global { i32, ptr } { i32 0, ptr @q }", "unknown symbol '@q'"),
            (
                "declare i32 @printf(ptr, ...)\ndefine void @f() {\n  call i32 (ptr, ...) @printf()\n  ret void\n}",
                "expected at least 1",
            ),
            (
                "define void @f() {\n  switch i32 %k, label %entry [\n    i32 0, label %entry\n  ]\n}",
                "undefined value '%k'",
            ),
        ];
        for (text, expected) in cases {
            let err = verify_text(text).unwrap_err().to_string();
            assert!(err.contains(expected), "{:?} does not mention {:?}", err, expected);
        }
    }

    #[test]
    fn test_variadic_calls_take_extra_arguments() {
        let text = "@.fmt = private constant [3 x i8] c\"%d\\00\"\n\
                    declare i32 @printf(ptr, ...)\n\
                    define void @f(i32 %x) {\n\
                    entry:\n  %n = call i32 (ptr, ...) @printf(ptr @.fmt, i32 %x, i32 %x)\n  ret void\n}";
        verify_text(text).unwrap();
    }

    #[test]
    fn test_missing_terminator() {
        let mut module = read_module("v", "define void @f() {\n  ret void\n}").unwrap();
        module.functions[0].blocks[0].terminator = None;
        let err = verify_module(&module).unwrap_err();
        assert!(err.to_string().contains("has no terminator"));
    }

    #[test]
    fn test_unreachable_blocks_removed() {
        let text = "define i32 @f(i1 %c) {\n\
                    entry:\n  br label %join\n\
                    dead:\n  br label %join\n\
                    join:\n  %v = phi i32 [ 1, %entry ], [ 2, %dead ]\n  ret i32 %v\n}";
        let mut module = read_module("u", text).unwrap();
        let mut pm = PassManager::new();
        pm.add(Box::new(UnreachableBlockElim));
        pm.add(Box::new(VerifierPass));
        pm.run(&mut module, &mut PassContext::default()).unwrap();
        let f = &module.functions[0];
        assert_eq!(f.blocks.len(), 2);
        assert!(f.block("dead").is_none());
        match &f.blocks[1].instructions[0] {
            Instruction::Phi { incoming, .. } => assert_eq!(incoming.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
