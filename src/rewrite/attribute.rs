//! Validation of the target-restriction attribute.

use crate::ast::{AttrArg, FunctionDecl};
use crate::diagnostic::Diagnostic;

/// What a function's restriction attribute asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Restriction {
    pub is_restricted: bool,
    pub is_valid: bool,
    pub has_cpu: bool,
    pub has_gpu: bool,
}

impl Restriction {
    /// Valid and restricted to the host only.
    pub fn cpu_only(&self) -> bool {
        self.is_restricted && self.is_valid && self.has_cpu && !self.has_gpu
    }

    /// Valid and restricted to the device only.
    pub fn gpu_only(&self) -> bool {
        self.is_restricted && self.is_valid && !self.has_cpu && self.has_gpu
    }
}

/// Inspect the first `attribute_name` attribute of `func`. Never fails: an
/// invalid attribute yields `is_valid = false` and one error diagnostic at
/// the attribute's expansion location.
pub fn validate(func: &FunctionDecl, attribute_name: &str) -> (Restriction, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut attrs = func.attributes_named(attribute_name);
    let Some(attr) = attrs.next() else {
        return (Restriction::default(), diagnostics);
    };
    for extra in attrs {
        diagnostics.push(Diagnostic::warning(
            format!(
                "additional '{}' attribute on '{}' is ignored",
                attribute_name, func.name
            ),
            extra.location,
        ));
    }

    let mut restriction = Restriction {
        is_restricted: true,
        is_valid: true,
        has_cpu: false,
        has_gpu: false,
    };
    let mut notes = Vec::new();

    for arg in &attr.args {
        match arg {
            AttrArg::Str(s) if s.node == "cpu" => restriction.has_cpu = true,
            AttrArg::Str(s) if s.node == "gpu" => restriction.has_gpu = true,
            AttrArg::Str(s) => {
                restriction.is_valid = false;
                notes.push(format!("unknown target \"{}\"", s.node));
            }
            AttrArg::Other(o) => {
                restriction.is_valid = false;
                notes.push(format!("argument `{}` is not a string literal", o.node));
            }
        }
    }
    if !restriction.has_cpu && !restriction.has_gpu {
        restriction.is_valid = false;
        notes.push("no target selected".to_string());
    }
    if restriction.is_valid && attr.before_name {
        restriction.is_valid = false;
        notes.push(format!(
            "the attribute must follow the declarator of '{}'",
            func.name
        ));
    }

    if !restriction.is_valid {
        log::debug!("invalid {} on {}: {:?}", attribute_name, func.name, notes);
        let mut diag = Diagnostic::error(
            format!("invalid '{}' attribute on '{}'", attribute_name, func.name),
            attr.location,
        )
        .with_help(format!(
            "write `__attribute__(({}(\"cpu\", \"gpu\")))` after the parameter list",
            attribute_name
        ));
        for note in notes {
            diag = diag.with_note(note);
        }
        diagnostics.push(diag);
    }

    (restriction, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::for_each_function;
    use crate::source::SourceDocument;
    use crate::syntax::parse_document;

    fn check(src: &str) -> (Restriction, Vec<Diagnostic>) {
        let doc = SourceDocument::new("a.cpp", src);
        let (unit, _) = parse_document(&doc);
        let mut found = None;
        for_each_function(&unit.decls, &mut |f| {
            found.get_or_insert_with(|| f.clone());
        });
        validate(&found.expect("function"), "amp_restrict")
    }

    #[test]
    fn test_unrestricted() {
        let (r, diags) = check("int f();");
        assert_eq!(r, Restriction::default());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_cpu_gpu_and_both() {
        let (cpu, _) = check("int f() __attribute__((amp_restrict(\"cpu\")));");
        assert!(cpu.cpu_only());
        let (gpu, _) = check("int f() __attribute__((amp_restrict(\"gpu\")));");
        assert!(gpu.gpu_only());
        let (both, diags) = check("int f() __attribute__((amp_restrict(\"cpu\", \"gpu\")));");
        assert!(both.is_valid && both.has_cpu && both.has_gpu);
        assert!(!both.cpu_only() && !both.gpu_only());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_unknown_target_is_invalid() {
        let src = "int f() __attribute__((amp_restrict(\"tpu\")));";
        let (r, diags) = check(src);
        assert!(r.is_restricted);
        assert!(!r.is_valid);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].is_error());
        assert_eq!(&src[diags[0].span.range()], "amp_restrict");
    }

    #[test]
    fn test_mixed_valid_and_unknown_is_invalid() {
        let (r, _) = check("int f() __attribute__((amp_restrict(\"cpu\", \"CPU\")));");
        assert!(r.has_cpu);
        assert!(!r.is_valid);
    }

    #[test]
    fn test_empty_and_non_literal_arguments() {
        let (empty, _) = check("int f() __attribute__((amp_restrict()));");
        assert!(!empty.is_valid);
        let (ident, diags) = check("int f() __attribute__((amp_restrict(cpu)));");
        assert!(!ident.is_valid);
        assert!(diags[0].notes.iter().any(|n| n.contains("string literal")));
    }

    #[test]
    fn test_attribute_before_name_is_invalid() {
        let (r, diags) = check("__attribute__((amp_restrict(\"cpu\"))) int f();");
        assert!(!r.is_valid);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_macro_attribute_reported_at_use_site() {
        let src = "#define BAD __attribute__((amp_restrict(\"tpu\")))\nint f() BAD;";
        let (r, diags) = check(src);
        assert!(!r.is_valid);
        assert_eq!(&src[diags[0].span.range()], "BAD");
    }

    #[test]
    fn test_second_attribute_ignored_with_warning() {
        let (r, diags) = check(
            "int f() __attribute__((amp_restrict(\"cpu\"))) __attribute__((amp_restrict(\"gpu\")));",
        );
        assert!(r.cpu_only());
        assert_eq!(diags.len(), 1);
        assert!(!diags[0].is_error());
    }
}
