//! Target description: triple, code generation options, data layout and the
//! library-function table consulted by the emitter.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::BackendError;

// ─── Triple ────────────────────────────────────────────────────────

/// `arch-vendor-os[-environment]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetTriple {
    pub arch: String,
    pub vendor: String,
    pub os: String,
    pub environment: Option<String>,
}

impl TargetTriple {
    pub fn parse(text: &str) -> Result<Self, BackendError> {
        let parts: Vec<&str> = text.trim().split('-').collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(BackendError::InvalidTriple(text.to_string()));
        }
        // `arch-os` shorthand, e.g. `spir64-unknown` or `wasm32-wasi`
        let (vendor, os, environment) = match parts.len() {
            2 => ("unknown", parts[1], None),
            3 => (parts[1], parts[2], None),
            _ => (parts[1], parts[2], Some(parts[3..].join("-"))),
        };
        Ok(Self {
            arch: parts[0].to_string(),
            vendor: vendor.to_string(),
            os: os.to_string(),
            environment,
        })
    }

    /// The triple of the machine running this process.
    pub fn host() -> Self {
        let arch = std::env::consts::ARCH;
        let (vendor, os, environment) = match std::env::consts::OS {
            "linux" => ("unknown", "linux", Some("gnu".to_string())),
            "macos" => ("apple", "darwin", None),
            "windows" => ("pc", "windows", Some("msvc".to_string())),
            other => ("unknown", other, None),
        };
        Self {
            arch: arch.to_string(),
            vendor: vendor.to_string(),
            os: os.to_string(),
            environment,
        }
    }

    pub fn pointer_width(&self) -> u32 {
        match self.arch.as_str() {
            "x86_64" | "aarch64" | "arm64" | "powerpc64" | "powerpc64le" | "riscv64"
            | "mips64" | "s390x" | "sparcv9" | "spir64" | "nvptx64" | "amdgcn" | "wasm64" => 64,
            _ => 32,
        }
    }

    /// Devices whose entry points are OpenCL kernels.
    pub fn is_device(&self) -> bool {
        matches!(self.arch.as_str(), "spir" | "spir64" | "nvptx" | "nvptx64" | "amdgcn" | "r600")
    }

    /// No hosted C library is available.
    pub fn is_freestanding(&self) -> bool {
        // `thumbv7m-none-eabi` omits the vendor, so "none" lands there
        self.os == "none"
            || self.vendor == "none"
            || (self.arch.starts_with("wasm") && self.os == "unknown")
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.arch, self.vendor, self.os)?;
        if let Some(env) = &self.environment {
            write!(f, "-{}", env)?;
        }
        Ok(())
    }
}

// ─── Code generation options ───────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FloatAbi {
    #[default]
    Default,
    Soft,
    Hard,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FpOpFusion {
    Fast,
    #[default]
    Standard,
    Strict,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelocModel {
    #[default]
    Default,
    Static,
    Pic,
    DynamicNoPic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeModel {
    #[default]
    Default,
    Small,
    Kernel,
    Medium,
    Large,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptLevel {
    None,
    Less,
    #[default]
    Default,
    Aggressive,
}

/// What the emission pass produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    /// Textual output; source text for the source-emitting backends.
    #[default]
    Asm,
    Obj,
    Null,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::Asm => "asm",
            FileType::Obj => "obj",
            FileType::Null => "null",
        })
    }
}

/// User-facing code generation switches, as read from configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenOptions {
    pub float_abi: FloatAbi,
    pub soft_float: bool,
    pub less_precise_fp_mad: bool,
    pub disable_fp_elim: bool,
    pub disable_fp_elim_non_leaf: bool,
    pub fp_op_fusion: FpOpFusion,
    pub unsafe_fp_math: bool,
    pub no_infs_fp_math: bool,
    pub no_nans_fp_math: bool,
    pub honor_sign_dependent_rounding: bool,
    pub no_zeros_in_bss: bool,
    pub guaranteed_tail_call_opt: bool,
    pub disable_tail_calls: bool,
    pub stack_alignment_override: u32,
    pub realign_stack: bool,
    pub trap_function: Option<String>,
    pub pie: bool,
    pub segmented_stacks: bool,
    pub use_init_array: bool,
    pub ssp_buffer_size: u32,
    pub reloc_model: RelocModel,
    pub code_model: CodeModel,
    pub cpu: String,
    pub features: Vec<String>,
    pub opt_level: OptLevel,
    pub relax_all: bool,
    pub disable_verify: bool,
    pub verbose: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            float_abi: FloatAbi::Default,
            soft_float: false,
            less_precise_fp_mad: false,
            disable_fp_elim: false,
            disable_fp_elim_non_leaf: false,
            fp_op_fusion: FpOpFusion::Standard,
            unsafe_fp_math: false,
            no_infs_fp_math: false,
            no_nans_fp_math: false,
            honor_sign_dependent_rounding: false,
            no_zeros_in_bss: false,
            guaranteed_tail_call_opt: false,
            disable_tail_calls: false,
            stack_alignment_override: 0,
            realign_stack: true,
            trap_function: None,
            pie: false,
            segmented_stacks: false,
            use_init_array: false,
            ssp_buffer_size: 8,
            reloc_model: RelocModel::Default,
            code_model: CodeModel::Default,
            cpu: String::new(),
            features: Vec::new(),
            opt_level: OptLevel::Default,
            relax_all: false,
            disable_verify: false,
            verbose: true,
        }
    }
}

/// Options handed to a target machine, derived from `CodegenOptions`.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetOptions {
    pub float_abi: FloatAbi,
    pub use_soft_float: bool,
    pub less_precise_fp_mad: bool,
    pub no_frame_pointer_elim: bool,
    pub no_frame_pointer_elim_non_leaf: bool,
    pub allow_fp_op_fusion: FpOpFusion,
    pub unsafe_fp_math: bool,
    pub no_infs_fp_math: bool,
    pub no_nans_fp_math: bool,
    pub honor_sign_dependent_rounding: bool,
    pub no_zeros_in_bss: bool,
    pub guaranteed_tail_call_opt: bool,
    pub disable_tail_calls: bool,
    pub stack_alignment_override: u32,
    pub realign_stack: bool,
    pub trap_function: Option<String>,
    pub position_independent_executable: bool,
    pub segmented_stacks: bool,
    pub use_init_array: bool,
    pub ssp_buffer_size: u32,
}

impl TargetOptions {
    pub fn from_codegen(opts: &CodegenOptions) -> Self {
        Self {
            float_abi: opts.float_abi,
            use_soft_float: opts.soft_float,
            less_precise_fp_mad: opts.less_precise_fp_mad,
            no_frame_pointer_elim: opts.disable_fp_elim,
            no_frame_pointer_elim_non_leaf: opts.disable_fp_elim_non_leaf,
            allow_fp_op_fusion: opts.fp_op_fusion,
            unsafe_fp_math: opts.unsafe_fp_math,
            no_infs_fp_math: opts.no_infs_fp_math,
            no_nans_fp_math: opts.no_nans_fp_math,
            honor_sign_dependent_rounding: opts.honor_sign_dependent_rounding,
            no_zeros_in_bss: opts.no_zeros_in_bss,
            guaranteed_tail_call_opt: opts.guaranteed_tail_call_opt,
            disable_tail_calls: opts.disable_tail_calls,
            stack_alignment_override: opts.stack_alignment_override,
            realign_stack: opts.realign_stack,
            trap_function: opts.trap_function.clone(),
            position_independent_executable: opts.pie,
            segmented_stacks: opts.segmented_stacks,
            use_init_array: opts.use_init_array,
            ssp_buffer_size: opts.ssp_buffer_size,
        }
    }
}

// ─── Data layout ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    pub little_endian: bool,
    pub pointer_bits: u32,
    repr: String,
}

impl DataLayout {
    /// Parse an LLVM-style layout string; unknown components are kept in the
    /// textual form but otherwise ignored.
    pub fn parse(text: &str) -> Self {
        let mut little_endian = true;
        let mut pointer_bits = 64;
        for part in text.split('-') {
            match part {
                "e" => little_endian = true,
                "E" => little_endian = false,
                p if p.starts_with("p:") => {
                    if let Some(bits) = p[2..].split(':').next().and_then(|b| b.parse().ok()) {
                        pointer_bits = bits;
                    }
                }
                _ => {}
            }
        }
        Self {
            little_endian,
            pointer_bits,
            repr: text.to_string(),
        }
    }

    pub fn for_triple(triple: &TargetTriple) -> Self {
        let bits = triple.pointer_width();
        Self::parse(&format!(
            "e-p:{bits}:{bits}:{bits}-i1:8:8-i8:8:8-i16:16:16-i32:32:32-i64:64:64-f32:32:32-f64:64:64"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }
}

// ─── Library functions ─────────────────────────────────────────────

/// Which well-known library functions the target provides, and the header
/// that declares each of them.
#[derive(Clone, Debug)]
pub struct TargetLibraryInfo {
    available: BTreeMap<&'static str, &'static str>,
}

const MATH: &[&str] = &[
    "sqrt", "sqrtf", "sin", "sinf", "cos", "cosf", "tan", "tanf", "exp", "expf", "log", "logf",
    "pow", "powf", "fabs", "fabsf", "floor", "floorf", "ceil", "ceilf", "fmin", "fminf", "fmax",
    "fmaxf", "fma", "fmaf",
];
const STRING: &[&str] = &["memcpy", "memmove", "memset", "memcmp", "strlen"];
const STDLIB: &[&str] = &["malloc", "calloc", "free", "abort", "exit"];
const STDIO: &[&str] = &["printf", "puts", "putchar"];
/// Work-item accessors provided by every device runtime.
pub const DEVICE_BUILTINS: &[&str] = &["get_global_id", "get_global_size", "get_local_id", "get_group_id"];

impl TargetLibraryInfo {
    pub fn new(triple: &TargetTriple) -> Self {
        let mut available = BTreeMap::new();
        for f in MATH {
            available.insert(*f, "math.h");
        }
        if !triple.is_freestanding() {
            for f in STRING {
                available.insert(*f, "string.h");
            }
            for f in STDLIB {
                available.insert(*f, "stdlib.h");
            }
            if !triple.is_device() {
                for f in STDIO {
                    available.insert(*f, "stdio.h");
                }
            }
        }
        Self { available }
    }

    pub fn has(&self, name: &str) -> bool {
        self.available.contains_key(name)
    }

    /// Header declaring `name`, if the target provides it.
    pub fn header_for(&self, name: &str) -> Option<&'static str> {
        self.available.get(name).copied()
    }

    pub fn disable(&mut self, name: &str) {
        self.available.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triple() {
        let t = TargetTriple::parse("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(t.arch, "x86_64");
        assert_eq!(t.os, "linux");
        assert_eq!(t.environment.as_deref(), Some("gnu"));
        assert_eq!(t.to_string(), "x86_64-unknown-linux-gnu");
        assert_eq!(t.pointer_width(), 64);

        let spir = TargetTriple::parse("spir-unknown-unknown").unwrap();
        assert!(spir.is_device());
        assert_eq!(spir.pointer_width(), 32);

        assert!(TargetTriple::parse("x86_64").is_err());
        assert!(TargetTriple::parse("x86_64--linux").is_err());
    }

    #[test]
    fn test_host_triple_round_trips() {
        let host = TargetTriple::host();
        assert_eq!(TargetTriple::parse(&host.to_string()).unwrap(), host);
    }

    #[test]
    fn test_data_layout() {
        let dl = DataLayout::parse("E-p:32:32:32-i64:64:64");
        assert!(!dl.little_endian);
        assert_eq!(dl.pointer_bits, 32);
        let host = DataLayout::for_triple(&TargetTriple::parse("aarch64-apple-darwin").unwrap());
        assert_eq!(host.pointer_bits, 64);
        assert!(host.as_str().starts_with("e-p:64"));
    }

    #[test]
    fn test_library_info() {
        let host = TargetLibraryInfo::new(&TargetTriple::parse("x86_64-unknown-linux-gnu").unwrap());
        assert_eq!(host.header_for("sqrtf"), Some("math.h"));
        assert_eq!(host.header_for("printf"), Some("stdio.h"));
        let device = TargetLibraryInfo::new(&TargetTriple::parse("spir64-unknown-unknown").unwrap());
        assert!(device.has("sqrt"));
        assert!(!device.has("printf"));
        let bare = TargetLibraryInfo::new(&TargetTriple::parse("thumbv7m-none-eabi").unwrap());
        assert!(!bare.has("malloc"));
    }

    #[test]
    fn test_target_options_follow_codegen_options() {
        let opts = CodegenOptions {
            soft_float: true,
            pie: true,
            ..CodegenOptions::default()
        };
        let to = TargetOptions::from_codegen(&opts);
        assert!(to.use_soft_float);
        assert!(to.position_independent_executable);
        assert_eq!(to.ssp_buffer_size, 8);
    }
}
