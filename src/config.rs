//! `duet.toml`: rewrite and code generation settings.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! ```toml
//! [rewrite]
//! dispatch_function = "compute::parallel_for_each"
//! device_suffix = ".cl"
//!
//! [codegen]
//! backend = "opencl"
//! triple = "spir64-unknown-unknown"
//!
//! [codegen.options]
//! fp_op_fusion = "fast"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::backend::target::{CodegenOptions, FileType};
use crate::diagnostic::Diagnostic;
use crate::span::Span;

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub rewrite: RewriteConfig,
    pub codegen: CodegenConfig,
}

/// How the splitter recognises annotations and dispatch calls.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewriteConfig {
    /// GNU attribute carrying the target list.
    pub attribute: String,
    /// Fully qualified name of the parallel dispatch function.
    pub dispatch_function: String,
    /// Header declaring the dispatch function; its `#include` is removed from
    /// the device output.
    pub dispatch_header: String,
    /// Number of arguments a dispatch call must have; the last is the closure.
    pub dispatch_arity: usize,
    /// Appended to the source name to form the device file name.
    pub device_suffix: String,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            attribute: "amp_restrict".to_string(),
            dispatch_function: "compute::parallel_for_each".to_string(),
            dispatch_header: "ParallelForEach.h".to_string(),
            dispatch_arity: 4,
            device_suffix: ".cl".to_string(),
        }
    }
}

impl RewriteConfig {
    /// Namespace part of `dispatch_function`, e.g. `["compute"]`.
    pub fn dispatch_namespace(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = self.dispatch_function.split("::").collect();
        parts.pop();
        parts
    }

    /// Unqualified name of the dispatch function.
    pub fn dispatch_name(&self) -> &str {
        self.dispatch_function
            .rsplit("::")
            .next()
            .unwrap_or(&self.dispatch_function)
    }
}

/// Settings for regenerating source from a compiled module.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenConfig {
    /// Registered backend name (`duet targets` lists them).
    pub backend: String,
    /// Overrides the module's own triple.
    pub triple: Option<String>,
    pub file_type: FileType,
    pub options: CodegenOptions,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            backend: "c".to_string(),
            triple: None,
            file_type: FileType::Asm,
            options: CodegenOptions::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    pub fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let config: Config = toml::from_str(content).map_err(|e| {
            let span = e
                .span()
                .map(|r| Span::new(r.start as u32, r.end as u32))
                .unwrap_or_else(Span::dummy);
            Diagnostic::error(
                format!("invalid config '{}': {}", path.display(), e.message()),
                span,
            )
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), Diagnostic> {
        let rewrite = &self.rewrite;
        if rewrite.dispatch_arity == 0 {
            return Err(Diagnostic::error(
                format!("invalid config '{}': dispatch_arity must be at least 1", path.display()),
                Span::dummy(),
            )
            .with_help("the last dispatch argument is the closure".to_string()));
        }
        if rewrite.attribute.is_empty() || rewrite.dispatch_name().is_empty() {
            return Err(Diagnostic::error(
                format!(
                    "invalid config '{}': attribute and dispatch_function must not be empty",
                    path.display()
                ),
                Span::dummy(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::target::FpOpFusion;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rewrite.dispatch_function, "compute::parallel_for_each");
        assert_eq!(config.rewrite.dispatch_namespace(), vec!["compute"]);
        assert_eq!(config.rewrite.dispatch_name(), "parallel_for_each");
        assert_eq!(config.rewrite.dispatch_arity, 4);
        assert_eq!(config.codegen.backend, "c");
        assert_eq!(config.codegen.file_type, FileType::Asm);
    }

    #[test]
    fn test_parse_partial_file() {
        let text = "[rewrite]\ndevice_suffix = \".ocl\"\n\n[codegen]\nbackend = \"opencl\"\n\n[codegen.options]\nfp_op_fusion = \"fast\"\nfeatures = [\"+fp64\"]\n";
        let config = Config::parse_toml(text, Path::new("duet.toml")).unwrap();
        assert_eq!(config.rewrite.device_suffix, ".ocl");
        assert_eq!(config.rewrite.attribute, "amp_restrict");
        assert_eq!(config.codegen.backend, "opencl");
        assert_eq!(config.codegen.options.fp_op_fusion, FpOpFusion::Fast);
        assert_eq!(config.codegen.options.features, vec!["+fp64".to_string()]);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let text = "[rewrite]\nbogus = 1\n";
        let err = Config::parse_toml(text, Path::new("duet.toml")).unwrap_err();
        assert!(err.message.contains("duet.toml"));
        assert!(err.message.contains("bogus"));
    }

    #[test]
    fn test_zero_arity_rejected() {
        let err = Config::parse_toml("[rewrite]\ndispatch_arity = 0\n", Path::new("c.toml")).unwrap_err();
        assert!(err.message.contains("dispatch_arity"));
        assert!(err.help.is_some());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duet.toml");
        std::fs::write(&path, "[codegen]\ntriple = \"spir64-unknown-unknown\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.codegen.triple.as_deref(), Some("spir64-unknown-unknown"));

        let missing = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.message.contains("cannot read config"));
    }
}
