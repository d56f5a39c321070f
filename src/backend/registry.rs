//! Process-wide target and pass registries.
//!
//! Registration runs at most once per process; every session shares the
//! same tables afterwards.

use std::sync::OnceLock;

use crate::error::BackendError;

use super::cwriter::{CWriterPass, Dialect};
use super::passes::{KernelInfoPass, ModulePass, PassManager, UnreachableBlockElim, VerifierPass};
use super::target::{CodeModel, DataLayout, FileType, OptLevel, RelocModel, TargetOptions, TargetTriple};

// ─── Target machines ───────────────────────────────────────────────

/// Everything needed to instantiate a target machine.
#[derive(Clone, Debug)]
pub struct MachineSpec {
    pub triple: TargetTriple,
    pub cpu: String,
    pub features: String,
    pub options: TargetOptions,
    pub reloc_model: RelocModel,
    pub code_model: CodeModel,
    pub opt_level: OptLevel,
}

/// A configured code generator for one triple.
pub trait TargetMachine {
    fn target_name(&self) -> &'static str;
    fn triple(&self) -> &TargetTriple;
    fn options(&self) -> &TargetOptions;
    /// The machine's own layout, if it mandates one.
    fn data_layout(&self) -> Option<DataLayout>;
    fn set_asm_verbosity(&mut self, verbose: bool);
    fn add_analysis_passes(
        &self,
        passes: &PassRegistry,
        pm: &mut PassManager,
    ) -> Result<(), BackendError>;
    /// Queue the passes producing `file_type`. Fails when the machine cannot
    /// produce that kind of output.
    fn add_passes_to_emit_file(
        &self,
        passes: &PassRegistry,
        pm: &mut PassManager,
        file_type: FileType,
        disable_verify: bool,
    ) -> Result<(), BackendError>;
}

/// Machine for the source-emitting backends.
pub struct SourceTargetMachine {
    name: &'static str,
    dialect: Dialect,
    spec: MachineSpec,
    asm_verbose: bool,
}

impl SourceTargetMachine {
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn spec(&self) -> &MachineSpec {
        &self.spec
    }
}

impl TargetMachine for SourceTargetMachine {
    fn target_name(&self) -> &'static str {
        self.name
    }

    fn triple(&self) -> &TargetTriple {
        &self.spec.triple
    }

    fn options(&self) -> &TargetOptions {
        &self.spec.options
    }

    fn data_layout(&self) -> Option<DataLayout> {
        match self.dialect {
            // portable C leaves layout to the host compiler
            Dialect::C99 => None,
            Dialect::OpenCl => Some(DataLayout::for_triple(&self.spec.triple)),
        }
    }

    fn set_asm_verbosity(&mut self, verbose: bool) {
        self.asm_verbose = verbose;
    }

    fn add_analysis_passes(
        &self,
        passes: &PassRegistry,
        pm: &mut PassManager,
    ) -> Result<(), BackendError> {
        if self.dialect == Dialect::OpenCl {
            pm.add(passes.create("kernel-info")?);
        }
        Ok(())
    }

    fn add_passes_to_emit_file(
        &self,
        passes: &PassRegistry,
        pm: &mut PassManager,
        file_type: FileType,
        disable_verify: bool,
    ) -> Result<(), BackendError> {
        if file_type != FileType::Asm {
            return Err(BackendError::UnsupportedFileType {
                target: self.name.to_string(),
                file_type: file_type.to_string(),
            });
        }
        if !disable_verify {
            pm.add(passes.create("verify")?);
        }
        pm.add(passes.create("unreachable-block-elim")?);
        pm.add(Box::new(CWriterPass {
            dialect: self.dialect,
            triple: self.spec.triple.clone(),
            options: self.spec.options.clone(),
            verbose: self.asm_verbose,
        }));
        Ok(())
    }
}

// ─── Target registry ───────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct TargetEntry {
    pub name: &'static str,
    pub description: &'static str,
    dialect: Dialect,
}

impl TargetEntry {
    pub fn create_machine(&self, spec: MachineSpec) -> Box<dyn TargetMachine> {
        log::debug!("creating {} machine for {}", self.name, spec.triple);
        Box::new(SourceTargetMachine {
            name: self.name,
            dialect: self.dialect,
            spec,
            asm_verbose: false,
        })
    }
}

#[derive(Debug)]
pub struct TargetRegistry {
    entries: Vec<TargetEntry>,
}

impl TargetRegistry {
    fn with_builtin_targets() -> Self {
        Self {
            entries: vec![
                TargetEntry {
                    name: "c",
                    description: "portable C99 source",
                    dialect: Dialect::C99,
                },
                TargetEntry {
                    name: "opencl",
                    description: "OpenCL C device source",
                    dialect: Dialect::OpenCl,
                },
            ],
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&TargetEntry, BackendError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| BackendError::UnknownTarget {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn entries(&self) -> &[TargetEntry] {
        &self.entries
    }
}

// ─── Pass registry ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    /// Computes facts for later passes without changing the module.
    Analysis,
    Transform,
    Emission,
}

#[derive(Clone, Debug)]
pub struct PassInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: PassKind,
    /// Constructor for passes that need no configuration.
    create: Option<fn() -> Box<dyn ModulePass>>,
}

#[derive(Debug)]
pub struct PassRegistry {
    passes: Vec<PassInfo>,
}

impl PassRegistry {
    fn with_builtin_passes() -> Self {
        Self {
            passes: vec![
                PassInfo {
                    name: "verify",
                    description: "module well-formedness checks",
                    kind: PassKind::Analysis,
                    create: Some(|| Box::new(VerifierPass)),
                },
                PassInfo {
                    name: "target-library-info",
                    description: "library functions provided by the target",
                    kind: PassKind::Analysis,
                    create: None,
                },
                PassInfo {
                    name: "data-layout",
                    description: "target data layout",
                    kind: PassKind::Analysis,
                    create: None,
                },
                PassInfo {
                    name: "kernel-info",
                    description: "device entry point discovery",
                    kind: PassKind::Analysis,
                    create: Some(|| Box::new(KernelInfoPass)),
                },
                PassInfo {
                    name: "unreachable-block-elim",
                    description: "remove blocks unreachable from the entry",
                    kind: PassKind::Transform,
                    create: Some(|| Box::new(UnreachableBlockElim)),
                },
                PassInfo {
                    name: "c-writer",
                    description: "C99 / OpenCL C source emission",
                    kind: PassKind::Emission,
                    create: None,
                },
            ],
        }
    }

    pub fn info(&self, name: &str) -> Option<&PassInfo> {
        self.passes.iter().find(|p| p.name == name)
    }

    /// Instantiate a registered pass that takes no configuration.
    pub fn create(&self, name: &str) -> Result<Box<dyn ModulePass>, BackendError> {
        self.info(name)
            .and_then(|info| info.create)
            .map(|create| create())
            .ok_or_else(|| BackendError::UnknownPass(name.to_string()))
    }

    pub fn passes(&self) -> &[PassInfo] {
        &self.passes
    }
}

// ─── Environment ───────────────────────────────────────────────────

static TARGETS: OnceLock<TargetRegistry> = OnceLock::new();
static PASSES: OnceLock<PassRegistry> = OnceLock::new();

/// Handle to the process-wide registries.
#[derive(Clone, Copy, Debug)]
pub struct Environment {
    pub targets: &'static TargetRegistry,
    pub passes: &'static PassRegistry,
}

impl Environment {
    pub fn targets() -> &'static TargetRegistry {
        TARGETS.get_or_init(|| {
            log::debug!("registering code generation targets");
            TargetRegistry::with_builtin_targets()
        })
    }

    pub fn passes() -> &'static PassRegistry {
        PASSES.get_or_init(|| {
            log::debug!("registering passes");
            PassRegistry::with_builtin_passes()
        })
    }

    /// Register everything once; later calls return the same tables.
    pub fn ensure_initialized() -> Environment {
        Environment {
            targets: Self::targets(),
            passes: Self::passes(),
        }
    }
}
