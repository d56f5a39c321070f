//! Regeneration session: drives one compiled module through target setup,
//! pipeline construction and emission, in a fixed order.

use std::fmt;

use crate::config::CodegenConfig;
use crate::error::BackendError;

use super::ir::Module;
use super::passes::{DataLayoutPass, PassContext, PassManager, TargetLibraryInfoPass};
use super::registry::{Environment, MachineSpec, TargetMachine};
use super::target::{DataLayout, FileType, FloatAbi, TargetLibraryInfo, TargetOptions, TargetTriple};

/// Progress of a session. Each step requires the state before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized,
    TargetsRegistered,
    PassesRegistered,
    TripleResolved,
    OptionsConfigured,
    MachineCreated,
    PipelineBuilt,
    Ran,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::TargetsRegistered => "targets-registered",
            SessionState::PassesRegistered => "passes-registered",
            SessionState::TripleResolved => "triple-resolved",
            SessionState::OptionsConfigured => "options-configured",
            SessionState::MachineCreated => "machine-created",
            SessionState::PipelineBuilt => "pipeline-built",
            SessionState::Ran => "ran",
            SessionState::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct RegenerationSession {
    module: Module,
    config: CodegenConfig,
    state: SessionState,
    env: Option<Environment>,
    triple: Option<TargetTriple>,
    options: Option<TargetOptions>,
    machine: Option<Box<dyn TargetMachine>>,
    pipeline: PassManager,
    context: PassContext,
    warnings: Vec<String>,
}

impl RegenerationSession {
    /// The session works on its own copy of `module`.
    pub fn new(module: &Module, config: &CodegenConfig) -> Self {
        Self {
            module: module.clone(),
            config: config.clone(),
            state: SessionState::Uninitialized,
            env: None,
            triple: None,
            options: None,
            machine: None,
            pipeline: PassManager::new(),
            context: PassContext::default(),
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn triple(&self) -> Option<&TargetTriple> {
        self.triple.as_ref()
    }

    pub fn target_options(&self) -> Option<&TargetOptions> {
        self.options.as_ref()
    }

    pub fn pipeline(&self) -> Vec<&'static str> {
        self.pipeline.names()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn advance(&mut self, step: &'static str, from: SessionState, to: SessionState) -> Result<(), BackendError> {
        if self.state != from {
            return Err(BackendError::OutOfOrder {
                step,
                state: self.state.to_string(),
            });
        }
        log::trace!("session step {}: {} -> {}", step, from, to);
        self.state = to;
        Ok(())
    }

    fn check(&self, step: &'static str, expected: SessionState) -> Result<(), BackendError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BackendError::OutOfOrder {
                step,
                state: self.state.to_string(),
            })
        }
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    // ─── Steps ─────────────────────────────────────────────────────

    pub fn initialize_targets(&mut self) -> Result<(), BackendError> {
        self.check("initialize-targets", SessionState::Uninitialized)?;
        let targets = Environment::targets();
        log::debug!("{} target(s) available", targets.names().len());
        self.advance("initialize-targets", SessionState::Uninitialized, SessionState::TargetsRegistered)
    }

    pub fn initialize_passes(&mut self) -> Result<(), BackendError> {
        self.check("initialize-passes", SessionState::TargetsRegistered)?;
        self.env = Some(Environment::ensure_initialized());
        self.advance("initialize-passes", SessionState::TargetsRegistered, SessionState::PassesRegistered)
    }

    /// Configured triple, else the module's, else the host's.
    pub fn resolve_triple(&mut self) -> Result<(), BackendError> {
        self.check("resolve-triple", SessionState::PassesRegistered)?;
        let requested = self
            .config
            .triple
            .as_deref()
            .or(self.module.triple.as_deref())
            .filter(|t| !t.trim().is_empty());
        let triple = match requested {
            Some(text) => TargetTriple::parse(text)?,
            None => {
                let host = TargetTriple::host();
                log::debug!("module {} has no triple, using host {}", self.module.name, host);
                host
            }
        };
        self.module.triple = Some(triple.to_string());
        self.triple = Some(triple);
        self.advance("resolve-triple", SessionState::PassesRegistered, SessionState::TripleResolved)
    }

    pub fn configure_options(&mut self) -> Result<(), BackendError> {
        self.check("configure-options", SessionState::TripleResolved)?;
        let codegen = &self.config.options;
        let mut options = TargetOptions::from_codegen(codegen);
        if codegen.soft_float {
            options.float_abi = FloatAbi::Soft;
        }
        if codegen.relax_all && self.config.file_type != FileType::Obj {
            self.warn("ignoring relax-all because the file type is not obj".to_string());
        }
        self.options = Some(options);
        self.advance("configure-options", SessionState::TripleResolved, SessionState::OptionsConfigured)
    }

    pub fn create_machine(&mut self) -> Result<(), BackendError> {
        self.check("create-machine", SessionState::OptionsConfigured)?;
        let env = self.env.unwrap_or_else(Environment::ensure_initialized);
        let entry = env.targets.lookup(&self.config.backend)?;
        let (Some(triple), Some(options)) = (self.triple.clone(), self.options.clone()) else {
            return Err(BackendError::OutOfOrder {
                step: "create-machine",
                state: self.state.to_string(),
            });
        };
        let codegen = &self.config.options;
        let mut machine = entry.create_machine(MachineSpec {
            triple,
            cpu: codegen.cpu.clone(),
            features: codegen.features.join(","),
            options,
            reloc_model: codegen.reloc_model,
            code_model: codegen.code_model,
            opt_level: codegen.opt_level,
        });
        machine.set_asm_verbosity(codegen.verbose);
        self.machine = Some(machine);
        self.advance("create-machine", SessionState::OptionsConfigured, SessionState::MachineCreated)
    }

    /// Library info, the machine's analyses, the data layout and finally the
    /// emission passes for the configured file type.
    pub fn build_pipeline(&mut self) -> Result<(), BackendError> {
        self.check("build-pipeline", SessionState::MachineCreated)?;
        let (Some(machine), Some(triple)) = (self.machine.as_ref(), self.triple.as_ref()) else {
            return Err(BackendError::OutOfOrder {
                step: "build-pipeline",
                state: self.state.to_string(),
            });
        };

        let passes = self.env.unwrap_or_else(Environment::ensure_initialized).passes;
        let mut pm = PassManager::new();
        pm.add(Box::new(TargetLibraryInfoPass {
            info: TargetLibraryInfo::new(triple),
        }));
        machine.add_analysis_passes(passes, &mut pm)?;
        let layout = machine
            .data_layout()
            .or_else(|| self.module.data_layout.as_deref().map(DataLayout::parse))
            .unwrap_or_else(|| DataLayout::for_triple(triple));
        pm.add(Box::new(DataLayoutPass { layout }));
        machine
            .add_passes_to_emit_file(passes, &mut pm, self.config.file_type, self.config.options.disable_verify)
            .map_err(|e| {
                log::error!(
                    "target '{}' does not support generation of {} files",
                    self.config.backend,
                    self.config.file_type
                );
                e
            })?;

        log::debug!("pipeline: {}", pm.names().join(", "));
        self.pipeline = pm;
        self.advance("build-pipeline", SessionState::MachineCreated, SessionState::PipelineBuilt)
    }

    pub fn run(&mut self) -> Result<(), BackendError> {
        self.check("run", SessionState::PipelineBuilt)?;
        self.pipeline.run(&mut self.module, &mut self.context)?;
        let warnings = std::mem::take(&mut self.context.warnings);
        for warning in warnings {
            self.warn(warning);
        }
        self.advance("run", SessionState::PipelineBuilt, SessionState::Ran)
    }

    /// Hand over the emitted text.
    pub fn finish(&mut self) -> Result<String, BackendError> {
        self.check("finish", SessionState::Ran)?;
        let output = std::mem::take(&mut self.context.output);
        self.advance("finish", SessionState::Ran, SessionState::Done)?;
        Ok(output)
    }
}

/// Run every session step in order and return the generated source.
pub fn regenerate(module: &Module, config: &CodegenConfig) -> Result<String, BackendError> {
    let mut session = RegenerationSession::new(module, config);
    session.initialize_targets()?;
    session.initialize_passes()?;
    session.resolve_triple()?;
    session.configure_options()?;
    session.create_machine()?;
    session.build_pipeline()?;
    session.run()?;
    session.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::reader::read_module;
    use crate::backend::target::CodegenOptions;

    const ANSWER: &str = "define i32 @main() {\nentry:\n  ret i32 42\n}\n";

    fn config(backend: &str) -> CodegenConfig {
        CodegenConfig {
            backend: backend.to_string(),
            ..CodegenConfig::default()
        }
    }

    fn ready(module: &Module, config: &CodegenConfig) -> RegenerationSession {
        let mut session = RegenerationSession::new(module, config);
        session.initialize_targets().unwrap();
        session.initialize_passes().unwrap();
        session.resolve_triple().unwrap();
        session.configure_options().unwrap();
        session
    }

    #[test]
    fn test_regenerate_constant() {
        let module = read_module("answer", ANSWER).unwrap();
        let out = regenerate(&module, &config("c")).unwrap();
        assert!(out.starts_with("/* Generated by duet from module 'answer' as C99 */"));
        assert!(out.contains("int32_t main(void) {\nbb_entry:\n  return 42;\n}\n"));
        // the caller's module is untouched
        assert!(module.triple.is_none());
    }

    #[test]
    fn test_steps_must_run_in_order() {
        let module = read_module("answer", ANSWER).unwrap();
        let mut session = RegenerationSession::new(&module, &config("c"));
        let err = session.resolve_triple().unwrap_err();
        assert_eq!(
            err.to_string(),
            "regeneration step 'resolve-triple' attempted in state uninitialized"
        );
        session.initialize_targets().unwrap();
        assert!(session.initialize_targets().is_err());
        assert!(session.finish().is_err());
        assert_eq!(session.state(), SessionState::TargetsRegistered);
    }

    #[test]
    fn test_full_state_sequence() {
        let module = read_module("answer", ANSWER).unwrap();
        let mut session = ready(&module, &config("c"));
        assert_eq!(session.state(), SessionState::OptionsConfigured);
        session.create_machine().unwrap();
        session.build_pipeline().unwrap();
        assert_eq!(
            session.pipeline(),
            vec!["target-library-info", "data-layout", "verify", "unreachable-block-elim", "c-writer"]
        );
        session.run().unwrap();
        assert_eq!(session.state(), SessionState::Ran);
        assert!(session.finish().unwrap().contains("return 42;"));
        assert_eq!(session.state(), SessionState::Done);
        assert!(session.run().is_err());
    }

    #[test]
    fn test_triple_resolution_order() {
        let with_triple = read_module("m", &format!("target triple = \"spir-unknown-unknown\"\n{}", ANSWER)).unwrap();
        let session = ready(&with_triple, &config("c"));
        assert_eq!(session.triple().unwrap().arch, "spir");

        let overridden = CodegenConfig {
            triple: Some("aarch64-apple-darwin".to_string()),
            ..config("c")
        };
        let session = ready(&with_triple, &overridden);
        assert_eq!(session.triple().unwrap().arch, "aarch64");

        let bare = read_module("m", ANSWER).unwrap();
        let session = ready(&bare, &config("c"));
        assert_eq!(session.triple(), Some(&TargetTriple::host()));

        let bad = CodegenConfig {
            triple: Some("nonsense".to_string()),
            ..config("c")
        };
        let mut session = RegenerationSession::new(&bare, &bad);
        session.initialize_targets().unwrap();
        session.initialize_passes().unwrap();
        assert!(matches!(session.resolve_triple(), Err(BackendError::InvalidTriple(_))));
    }

    #[test]
    fn test_options_forwarding() {
        let module = read_module("m", ANSWER).unwrap();
        let cfg = CodegenConfig {
            options: CodegenOptions {
                soft_float: true,
                relax_all: true,
                ..CodegenOptions::default()
            },
            ..config("c")
        };
        let session = ready(&module, &cfg);
        let options = session.target_options().unwrap();
        assert_eq!(options.float_abi, FloatAbi::Soft);
        assert!(options.use_soft_float);
        assert_eq!(session.warnings().len(), 1);
        assert!(session.warnings()[0].contains("relax-all"));
    }

    #[test]
    fn test_unknown_backend() {
        let module = read_module("m", ANSWER).unwrap();
        let err = regenerate(&module, &config("cuda")).unwrap_err();
        assert!(matches!(err, BackendError::UnknownTarget { ref name, .. } if name == "cuda"));
    }

    #[test]
    fn test_unsupported_file_type() {
        let module = read_module("m", ANSWER).unwrap();
        let cfg = CodegenConfig {
            file_type: FileType::Obj,
            ..config("c")
        };
        let mut session = ready(&module, &cfg);
        session.create_machine().unwrap();
        let err = session.build_pipeline().unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedFileType { .. }));
        assert_eq!(session.state(), SessionState::MachineCreated);
    }

    #[test]
    fn test_verification_can_be_disabled() {
        let module = read_module("m", "define i32 @f() {\n  br label %nowhere\n}").unwrap();
        let err = regenerate(&module, &config("c")).unwrap_err();
        assert!(matches!(err, BackendError::Verify(_)));

        let cfg = CodegenConfig {
            options: CodegenOptions {
                disable_verify: true,
                ..CodegenOptions::default()
            },
            ..config("c")
        };
        let err = regenerate(&module, &cfg).unwrap_err();
        assert!(matches!(err, BackendError::Emit { ref reason, .. } if reason.contains("nowhere")));
    }

    #[test]
    fn test_opencl_uses_device_layout() {
        let text = "target triple = \"spir64-unknown-unknown\"\ntarget datalayout = \"E-p:32:32:32\"\n\
                    define void @_Kernel_1(i32* %o) {\n  store i32 1, i32* %o\n  ret void\n}\n";
        let module = read_module("k", text).unwrap();
        let out = regenerate(&module, &config("opencl")).unwrap();
        assert!(out.contains("/* data layout: e-p:64:64:64"));
        assert!(out.contains("__kernel void _Kernel_1(__global int *v_o) {"));
        assert!(out.contains("*v_o = 1;"));
    }
}
