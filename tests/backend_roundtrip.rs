use std::process::Command;

use duet::backend::read_module;
use duet::{regenerate_source, split_source, CodegenConfig, RewriteConfig};

fn host_compiler() -> Option<&'static str> {
    ["cc", "gcc", "clang"].into_iter().find(|cc| {
        Command::new(cc)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

/// Compile `c_source` with the host compiler and return the program's exit
/// status, or `None` when no compiler is installed.
fn compile_and_run(c_source: &str) -> Option<i32> {
    let cc = host_compiler()?;
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("regen.c");
    let exe = dir.path().join("regen");
    std::fs::write(&src, c_source).unwrap();
    let build = Command::new(cc)
        .arg("-std=c99")
        .arg("-o")
        .arg(&exe)
        .arg(&src)
        .output()
        .unwrap();
    assert!(
        build.status.success(),
        "host compiler rejected:\n{}\n{}",
        c_source,
        String::from_utf8_lossy(&build.stderr)
    );
    Some(Command::new(&exe).status().unwrap().code().unwrap_or(-1))
}

fn regenerate_c(text: &str) -> String {
    let module = read_module("roundtrip", text).unwrap();
    regenerate_source(&module, &CodegenConfig::default()).unwrap()
}

#[test]
fn test_constant_return_round_trip() {
    let c = regenerate_c("define i32 @main() {\nentry:\n  ret i32 42\n}\n");
    assert!(c.contains("return 42;"));
    match compile_and_run(&c) {
        Some(status) => assert_eq!(status, 42),
        None => eprintln!("no host C compiler found, skipping execution"),
    }
}

#[test]
fn test_loop_with_phis_round_trip() {
    let text = "define i32 @main() {\n\
                entry:\n  br label %loop\n\
                loop:\n\
                \x20 %i = phi i32 [ 1, %entry ], [ %next, %loop ]\n\
                \x20 %acc = phi i32 [ 0, %entry ], [ %sum, %loop ]\n\
                \x20 %sum = add i32 %acc, %i\n\
                \x20 %next = add i32 %i, 1\n\
                \x20 %done = icmp sgt i32 %next, 10\n\
                \x20 br i1 %done, label %exit, label %loop\n\
                exit:\n  ret i32 %sum\n}\n";
    let c = regenerate_c(text);
    if let Some(status) = compile_and_run(&c) {
        assert_eq!(status, 55);
    }
}

#[test]
fn test_globals_and_calls_round_trip() {
    let text = "@table = internal constant [4 x i32] [i32 3, i32 5, i32 7, i32 9]\n\
                define internal i32 @at(i32 %i) {\n\
                \x20 %p = getelementptr [4 x i32]* @table, i32 0, i32 %i\n\
                \x20 %v = load i32* %p\n\
                \x20 ret i32 %v\n}\n\
                define i32 @main() {\n\
                \x20 %a = call i32 @at(i32 1)\n\
                \x20 %b = call i32 @at(i32 3)\n\
                \x20 %s = mul i32 %a, %b\n\
                \x20 ret i32 %s\n}\n";
    let c = regenerate_c(text);
    if let Some(status) = compile_and_run(&c) {
        assert_eq!(status, 45);
    }
}

#[test]
fn test_clang_opaque_pointer_module_round_trip() {
    let text = r#"
target triple = "x86_64-pc-linux-gnu"

%struct.Point = type { i32, i32 }

@origin = dso_local global %struct.Point { i32 3, i32 4 }, align 4
@.nums = private unnamed_addr constant [3 x i8] c"\05\06\07", align 1

declare void @llvm.memcpy.p0.p0.i64(ptr noalias nocapture writeonly, ptr noalias nocapture readonly, i64, i1 immarg) #1
declare i32 @llvm.smax.i32(i32, i32) #1

define internal i32 @norm(ptr noundef %0) #0 {
  %2 = getelementptr inbounds %struct.Point, ptr %0, i64 0, i32 1
  %3 = load i32, ptr %0, align 4
  %4 = load i32, ptr %2, align 4
  %5 = mul nsw i32 %3, %3
  %6 = mul nsw i32 %4, %4
  %7 = add nsw i32 %5, %6
  ret i32 %7
}

define dso_local i32 @main() #0 {
  %1 = alloca %struct.Point, align 4
  call void @llvm.memcpy.p0.p0.i64(ptr align 4 %1, ptr align 4 @origin, i64 8, i1 false)
  %2 = call i32 @norm(ptr noundef %1)
  %3 = getelementptr inbounds [3 x i8], ptr @.nums, i64 0, i64 1
  %4 = load i8, ptr %3, align 1
  %5 = sext i8 %4 to i32
  switch i32 %5, label %8 [
    i32 6, label %6
  ]

6:
  %7 = call i32 @llvm.smax.i32(i32 %2, i32 %5)
  br label %8

8:
  %9 = phi i32 [ %7, %6 ], [ 0, %0 ]
  ret i32 %9
}

attributes #0 = { noinline nounwind uwtable }
"#;
    let c = regenerate_c(text);
    assert!(c.contains("#include <string.h>"));
    assert!(c.contains("struct struct_Point origin = { 3, 4 };"));
    assert!(!c.contains("llvm"));
    if let Some(status) = compile_and_run(&c) {
        assert_eq!(status, 25);
    }
}

#[test]
fn test_split_kernel_regenerates_as_opencl() {
    let src = "void run(int* a, int* b) {\n  compute::parallel_for_each(a, a, b, [](int x) { return x + 1; });\n}\n";
    let split = split_source("k.cpp", src, &RewriteConfig::default()).unwrap();
    let kernel = &split.kernels[0].kernel;
    let lambda = kernel.replace("_Kernel_", "_Lambda_");

    // what a device compiler produces for the synthesized kernel
    let module_text = format!(
        "target triple = \"spir64-unknown-unknown\"\n\
         declare i64 @get_global_id(i32)\n\
         define internal i32 @{lambda}(i32 %x) {{\n  %r = add nsw i32 %x, 1\n  ret i32 %r\n}}\n\
         define void @{kernel}(i32* %in, i32* %out) {{\n\
         \x20 %id = call i64 @get_global_id(i32 0)\n  %idx = trunc i64 %id to i32\n\
         \x20 %p = getelementptr i32* %in, i32 %idx\n  %v = load i32* %p\n\
         \x20 %r = call i32 @{lambda}(i32 %v)\n\
         \x20 %q = getelementptr i32* %out, i32 %idx\n  store i32 %r, i32* %q\n  ret void\n}}\n"
    );
    let module = read_module("k.cpp.cl", &module_text).unwrap();
    let config = CodegenConfig {
        backend: "opencl".to_string(),
        ..CodegenConfig::default()
    };
    let cl = regenerate_source(&module, &config).unwrap();
    assert!(cl.contains(&format!("__kernel void {}(__global int *v_in, __global int *v_out)", kernel)));
    assert!(cl.contains(&format!("static int {}(int v_x)", lambda)));
    assert!(!cl.contains("get_global_id(int"));
}
