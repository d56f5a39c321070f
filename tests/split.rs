use duet::rewrite::kernel::FORWARD_DECLARATIONS;
use duet::{split_source, RewriteConfig};

const PROGRAM: &str = r#"#include "ParallelForEach.h"
#include <vector>

#define CPU_ONLY __attribute__((amp_restrict("cpu")))

struct Sampler {
  int pick(int x) const CPU_ONLY;
  int pick(float x) __attribute__((amp_restrict("gpu")));
  int shared(int x) __attribute__((amp_restrict("cpu", "gpu")));
};

int host_log(const char* msg) CPU_ONLY { return 0; }

int device_only(int v) __attribute__((amp_restrict("gpu"))) { return v + 1; }

int plain(int v) { return v; }

int main() {
  std::vector<int> in(16), out(16);
  compute::parallel_for_each(in.begin(), in.end(), out.begin(), [](const int& x) { return x * x; });
  compute::parallel_for_each(in.begin(), in.end(), out.begin(), [](int x) { return x - 1; });
  return 0;
}
"#;

fn split(src: &str) -> duet::SplitOutput {
    split_source("demo.cpp", src, &RewriteConfig::default()).unwrap()
}

#[test]
fn test_untouched_source_is_identical() {
    let src = "// plain\n#include <cstdio>\nint add(int a, int b) { return a + b; }\nnamespace ns { struct S { int v; }; }\n";
    let out = split(src);
    assert_eq!(out.cpu_source, src);
    assert_eq!(out.gpu_source, src);
    assert!(out.diagnostics.is_empty());
}

#[test]
fn test_exclusive_functions() {
    let out = split(PROGRAM);
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);

    assert!(out.cpu_source.contains("int host_log(const char* msg) CPU_ONLY"));
    assert!(!out.gpu_source.contains("host_log"));
    assert!(out.gpu_source.contains("int device_only(int v)"));
    assert!(!out.cpu_source.contains("device_only"));
    for text in [&out.cpu_source, &out.gpu_source] {
        assert!(text.contains("int plain(int v) { return v; }"));
        assert!(text.contains("int shared(int x)"));
    }
}

#[test]
fn test_overloads_split_independently() {
    let out = split(PROGRAM);
    assert!(out.cpu_source.contains("int pick(int x) const CPU_ONLY;"));
    assert!(!out.cpu_source.contains("int pick(float x)"));
    assert!(out.gpu_source.contains("int pick(float x)"));
    assert!(!out.gpu_source.contains("int pick(int x)"));
}

#[test]
fn test_entry_point_and_helper_header_only_leave_gpu() {
    let out = split(PROGRAM);
    assert!(out.cpu_source.contains("int main() {"));
    assert!(out.cpu_source.contains("#include \"ParallelForEach.h\""));
    assert!(!out.gpu_source.contains("int main()"));
    assert!(!out.gpu_source.contains("ParallelForEach.h"));
    assert!(out.gpu_source.contains("#include <vector>"));
}

#[test]
fn test_kernels_and_forward_declarations() {
    let out = split(PROGRAM);
    assert_eq!(out.kernels.len(), 2);
    assert_eq!(out.gpu_source.matches(FORWARD_DECLARATIONS).count(), 1);

    let decl_at = out.gpu_source.find(FORWARD_DECLARATIONS).unwrap();
    for handle in &out.kernels {
        assert_eq!(handle.file, "demo.cpp.cl");
        let suffix = handle.kernel.trim_start_matches("_Kernel_");
        let lambda = format!("_Lambda_{}(", suffix);
        let kernel = format!("extern \"C\" void {}(", handle.kernel);
        let at = out.gpu_source.find(&kernel).unwrap();
        assert!(at > decl_at);
        assert!(out.gpu_source.contains(&lambda));
        assert!(out.cpu_source.contains(&format!("\"{}\"", handle.kernel)));
    }

    // reference and cv qualifiers are dropped from the element type
    let first = &out.kernels[0].kernel;
    assert!(out.gpu_source.contains(&format!("void {}(int* in, int* out)", first)));
    assert!(out.gpu_source.contains("(const int& x) { return x * x; }"));
    assert!(out
        .gpu_source
        .contains("{ unsigned idx = get_global_id(0); out[idx] = _Lambda_"));
}

#[test]
fn test_kernel_names_are_deterministic() {
    let a = split(PROGRAM);
    let b = split(PROGRAM);
    assert_eq!(a.kernels, b.kernels);
    assert_eq!(a.gpu_source, b.gpu_source);
    assert_ne!(a.kernels[0].kernel, a.kernels[1].kernel);
}

#[test]
fn test_invalid_attribute_is_inert() {
    let src = "int f(int x) __attribute__((amp_restrict())) { return x; }\n";
    let out = split(src);
    assert_eq!(out.cpu_source, src);
    assert_eq!(out.gpu_source, src);
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.has_errors());
}
