use super::*;
use crate::backend::ir::Param;
use crate::backend::passes::{KernelInfoPass, PassManager};
use crate::backend::reader::read_module;
use crate::backend::target::CodegenOptions;

fn emit_with(text: &str, dialect: Dialect, opts: CodegenOptions) -> Result<String, BackendError> {
    let mut module = read_module("m", text).unwrap();
    let triple = match dialect {
        Dialect::C99 => "x86_64-unknown-linux-gnu",
        Dialect::OpenCl => "spir64-unknown-unknown",
    };
    let mut pm = PassManager::new();
    pm.add(Box::new(KernelInfoPass));
    pm.add(Box::new(CWriterPass {
        dialect,
        triple: TargetTriple::parse(triple).unwrap(),
        options: TargetOptions::from_codegen(&opts),
        verbose: opts.verbose,
    }));
    let mut ctx = PassContext::default();
    pm.run(&mut module, &mut ctx)?;
    Ok(ctx.output)
}

fn emit(text: &str, dialect: Dialect) -> String {
    let opts = CodegenOptions {
        verbose: false,
        ..CodegenOptions::default()
    };
    emit_with(text, dialect, opts).unwrap()
}

#[test]
fn test_constant_return() {
    let out = emit("define i32 @answer() {\nentry:\n  ret i32 42\n}\n", Dialect::C99);
    assert_eq!(
        out,
        "#include <stdint.h>\n#include <stdbool.h>\n\n\
         int32_t answer(void);\n\n\
         int32_t answer(void) {\nbb_entry:\n  return 42;\n}\n\n"
    );
}

#[test]
fn test_verbose_header() {
    let text = "target datalayout = \"e-p:64:64:64\"\ndefine void @f() {\n  ret void\n}\n";
    let out = emit_with(text, Dialect::C99, CodegenOptions::default()).unwrap();
    assert!(out.starts_with("/* Generated by duet from module 'm' as C99 */\n"));
    assert!(out.contains("/* target triple: x86_64-unknown-linux-gnu */"));
    assert!(out.contains("/* data layout: e-p:64:64:64 */"));
    assert!(out.contains("/* @f */\nvoid f(void) {"));

    let soft = CodegenOptions {
        soft_float: true,
        ..CodegenOptions::default()
    };
    assert!(emit_with(text, Dialect::C99, soft).unwrap().contains("/* float ABI: soft */"));
}

#[test]
fn test_integer_arithmetic_avoids_signed_overflow() {
    let text = "define i32 @f(i32 %a, i32 %b) {\n  %s = add nsw i32 %a, %b\n  %q = sdiv i32 %s, 2\n  %u = icmp ult i32 %q, %a\n  %w = zext i1 %u to i32\n  ret i32 %w\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("v_s = (int32_t)((uint32_t)v_a + (uint32_t)v_b);"));
    assert!(out.contains("v_q = (int32_t)((int32_t)v_s / (int32_t)2);"));
    assert!(out.contains("v_u = (uint32_t)v_q < (uint32_t)v_a;"));
    assert!(out.contains("v_w = (int32_t)v_u;"));
    assert!(out.contains("  bool v_u;\n"));
}

#[test]
fn test_phi_nodes_use_temporaries() {
    let text = "define i32 @max(i32 %a, i32 %b) {\n\
                entry:\n  %c = icmp sgt i32 %a, %b\n  br i1 %c, label %then, label %done\n\
                then:\n  br label %done\n\
                done:\n  %m = phi i32 [ %a, %then ], [ %b, %entry ]\n  ret i32 %m\n}\n";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("  int32_t v_m;\n  int32_t v_m__phi;\n"));
    assert!(out.contains(
        "  if (v_c) {\n    goto bb_then;\n  } else {\n    v_m__phi = v_b;\n    goto bb_done;\n  }\n"
    ));
    assert!(out.contains("bb_then:\n  v_m__phi = v_a;\n  goto bb_done;\n"));
    assert!(out.contains("bb_done:\n  v_m = v_m__phi;\n  return v_m;\n"));
}

#[test]
fn test_globals_and_memory() {
    let text = "@scale = internal constant i32 3\n\
                @table = global [4 x i32] [i32 1, i32 2, i32 3, i32 4]\n\
                @zero = global [2 x double] zeroinitializer\n\
                @ext = external global i64\n\
                define i32 @get(i32 %i) {\n\
                \x20 %p = getelementptr [4 x i32]* @table, i32 0, i32 %i\n\
                \x20 %v = load i32* %p\n\
                \x20 %k = load i32* @scale\n\
                \x20 %slot = alloca i32\n\
                \x20 store i32 %v, i32* %slot\n\
                \x20 ret i32 %k\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("static const int32_t scale = 3;\n"));
    assert!(out.contains("int32_t table[4] = { 1, 2, 3, 4 };\n"));
    assert!(out.contains("double zero[2] = {0};\n"));
    assert!(out.contains("extern int64_t ext;\n"));
    assert!(out.contains("v_p = &((&table))[0][v_i];"));
    assert!(out.contains("v_v = *v_p;"));
    assert!(out.contains("v_k = scale;"));
    assert!(out.contains("  int32_t v_slot__slot;\n  int32_t *v_slot;\n"));
    assert!(out.contains("v_slot = &v_slot__slot;"));
    assert!(out.contains("*v_slot = v_v;"));
}

#[test]
fn test_library_functions_use_headers() {
    let text = "declare double @sqrt(double)\ndeclare i32 @helper(i32)\n\
                define double @f(double %x) {\n  %r = call double @sqrt(double %x)\n  %y = frem double %r, 2.0\n  ret double %y\n}";
    let out = emit(text, Dialect::C99);
    assert_eq!(out.matches("#include <math.h>").count(), 1);
    assert!(!out.contains("double sqrt(double"));
    assert!(out.contains("int32_t helper(int32_t v_0);"));
    assert!(out.contains("v_y = fmod(v_r, 2e0);"));
}

#[test]
fn test_opencl_kernel() {
    let text = "@scale = internal constant i32 3\n\
                declare i64 @get_global_id(i32)\n\
                define internal i32 @_Lambda_1_ab(i32 %x) {\n\
                entry:\n  %0 = load i32* @scale\n  %r = mul i32 %x, %0\n  ret i32 %r\n}\n\
                define void @_Kernel_1_ab(i32* %in, i32* %out) {\n\
                entry:\n  %id = call i64 @get_global_id(i32 0)\n  %idx = trunc i64 %id to i32\n\
                \x20 %p = getelementptr inbounds i32* %in, i32 %idx\n  %v = load i32* %p\n\
                \x20 %r = call i32 @_Lambda_1_ab(i32 %v)\n\
                \x20 %q = getelementptr i32* %out, i32 %idx\n  store i32 %r, i32* %q\n  ret void\n}\n";
    let out = emit(text, Dialect::OpenCl);
    assert!(!out.contains("#include"));
    assert!(!out.contains("get_global_id(int"));
    assert!(out.contains("__constant int scale = 3;"));
    assert!(out.contains("static int _Lambda_1_ab(int v_x) {"));
    assert!(out.contains("__kernel void _Kernel_1_ab(__global int *v_in, __global int *v_out) {"));
    assert!(out.contains("  __global int *v_p;\n"));
    assert!(out.contains("  __global int *v_q;\n"));
    assert!(out.contains("  long v_id;\n"));
    assert!(out.contains("v_idx = (int)(uint)v_id;"));
    assert!(out.contains("v_r = _Lambda_1_ab(v_v);"));
    assert!(!out.contains("cl_khr_fp64"));
}

#[test]
fn test_opencl_double_and_fp_contract() {
    let text = "define double @twice(double %x) {\n  %r = fmul double %x, 2.0\n  ret double %r\n}";
    let opts = CodegenOptions {
        verbose: false,
        fp_op_fusion: crate::backend::target::FpOpFusion::Fast,
        ..CodegenOptions::default()
    };
    let out = emit_with(text, Dialect::OpenCl, opts.clone()).unwrap();
    assert!(out.starts_with("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n#pragma OPENCL FP_CONTRACT ON\n"));
    assert!(out.contains("v_r = v_x * 2e0;"));
    let c = emit_with(text, Dialect::C99, opts).unwrap();
    assert!(c.contains("#pragma STDC FP_CONTRACT ON\n"));
}

#[test]
fn test_casts() {
    let text = "define float @f(i32 %i, i1 %b, i64 %w) {\n\
                \x20 %a = bitcast i32 %i to float\n\
                \x20 %s = sext i1 %b to i32\n\
                \x20 %t = trunc i64 %w to i1\n\
                \x20 %u = uitofp i32 %s to float\n\
                \x20 %c = select i1 %t, float %a, float %u\n\
                \x20 ret float %c\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("v_a = ((union { int32_t f; float t; }){ .f = v_i }).t;"));
    assert!(out.contains("v_s = (int32_t)(v_b ? -1 : 0);"));
    assert!(out.contains("v_t = (bool)(v_w & 1);"));
    assert!(out.contains("v_u = (float)(uint32_t)v_s;"));
    assert!(out.contains("v_c = v_t ? v_a : v_u;"));

    let ocl = emit(text, Dialect::OpenCl);
    assert!(ocl.contains("v_a = as_float(v_i);"));
}

#[test]
fn test_unreachable_and_trap_function() {
    let text = "define void @f(i1 %c) {\n\
                entry:\n  br i1 %c, label %ok, label %bad\n\
                ok:\n  ret void\n\
                bad:\n  unreachable\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("bb_bad:\n  __builtin_unreachable();\n"));

    let opts = CodegenOptions {
        verbose: false,
        trap_function: Some("on_trap".to_string()),
        ..CodegenOptions::default()
    };
    let trapped = emit_with(text, Dialect::C99, opts).unwrap();
    assert!(trapped.contains("void on_trap(void);\n"));
    assert!(trapped.contains("bb_bad:\n  on_trap();\n  __builtin_unreachable();\n"));
}

#[test]
fn test_unsupported_type_is_an_emit_error() {
    let mut module = Module::new("m");
    module.functions.push(Function {
        name: "wide".to_string(),
        linkage: Linkage::External,
        ret: Type::Void,
        params: vec![Param {
            name: "x".to_string(),
            ty: Type::Int(128),
        }],
        variadic: false,
        blocks: Vec::new(),
    });
    let mut pass = CWriterPass {
        dialect: Dialect::C99,
        triple: TargetTriple::parse("x86_64-unknown-linux-gnu").unwrap(),
        options: TargetOptions::from_codegen(&CodegenOptions::default()),
        verbose: false,
    };
    let err = pass.run(&mut module, &mut PassContext::default()).unwrap_err();
    match err {
        BackendError::Emit { function, reason } => {
            assert_eq!(function, "wide");
            assert!(reason.contains("i128"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_opaque_pointers_are_cast_at_access() {
    let text = "%struct.P = type { i32, [2 x float] }\n\
                define float @f(ptr %p, i64 %i) {\n\
                entry:\n\
                \x20 %a = getelementptr inbounds %struct.P, ptr %p, i64 %i, i32 1, i64 1\n\
                \x20 %v = load float, ptr %a, align 4\n\
                \x20 %n = load i32, ptr %p, align 4\n\
                \x20 store i32 %n, ptr %p, align 4\n\
                \x20 ret float %v\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("struct struct_P;\nstruct struct_P {\n  int32_t f0;\n  float f1[2];\n};\n"));
    assert!(out.contains("float f(void *v_p, int64_t v_i)"));
    assert!(out.contains("v_a = &(((struct struct_P *)v_p))[v_i].f1[1LL];"));
    assert!(out.contains("v_v = *v_a;"));
    assert!(out.contains("v_n = *((int32_t *)v_p);"));
    assert!(out.contains("*((int32_t *)v_p) = v_n;"));
}

#[test]
fn test_struct_definitions_follow_contained_structs() {
    let text = "%struct.Outer = type { %struct.Inner, ptr }\n\
                %struct.Inner = type <{ i8, i32 }>\n\
                %struct.Hidden = type opaque\n\
                @o = global %struct.Outer zeroinitializer\n\
                @pair = global { i32, i32 } { i32 1, i32 2 }\n";
    let out = emit(text, Dialect::C99);
    let inner = out.find("struct struct_Inner {").unwrap();
    let outer = out.find("struct struct_Outer {").unwrap();
    assert!(inner < outer);
    assert!(out.contains("struct struct_Inner {\n  int8_t f0;\n  int32_t f1;\n} __attribute__((packed));\n"));
    assert!(out.contains("  struct struct_Inner f0;\n  void *f1;\n"));
    assert!(out.contains("struct struct_Hidden;\n"));
    assert!(!out.contains("struct struct_Hidden {"));
    assert!(out.contains("struct struct_Outer o = {0};\n"));
    assert!(out.contains("struct literal_0 pair = { 1, 2 };\n"));
}

#[test]
fn test_strings_and_variadic_calls() {
    let text = "@.str = private unnamed_addr constant [3 x i8] c\"hi\\00\", align 1\n\
                declare i32 @puts(ptr)\n\
                declare i32 @log_all(ptr, ...)\n\
                define i32 @f(i32 %x) {\n\
                \x20 %r = call i32 @puts(ptr @.str)\n\
                \x20 %s = call i32 (ptr, ...) @log_all(ptr @.str, i32 %x)\n\
                \x20 ret i32 %r\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains("#include <stdio.h>"));
    assert!(out.contains("static const int8_t _str[3] = { 104, 105, 0 };\n"));
    assert!(out.contains("int32_t log_all(void *v_0, ...);\n"));
    assert!(out.contains("v_r = puts((void *)(&_str));"));
    assert!(out.contains("v_s = log_all((void *)(&_str), v_x);"));
}

#[test]
fn test_intrinsics_lower_to_c() {
    let text = "declare void @llvm.memcpy.p0.p0.i64(ptr, ptr, i64, i1 immarg)\n\
                declare float @llvm.fmuladd.f32(float, float, float)\n\
                declare double @llvm.fabs.f64(double)\n\
                declare float @llvm.sqrt.f32(float)\n\
                declare i32 @llvm.smax.i32(i32, i32)\n\
                declare i32 @llvm.umin.i32(i32, i32)\n\
                declare void @llvm.lifetime.start.p0(i64 immarg, ptr)\n\
                define float @f(ptr %d, ptr %s, float %x, double %y, i32 %a, i32 %b) {\n\
                \x20 call void @llvm.lifetime.start.p0(i64 4, ptr %d)\n\
                \x20 call void @llvm.memcpy.p0.p0.i64(ptr %d, ptr %s, i64 8, i1 false)\n\
                \x20 %m = call float @llvm.fmuladd.f32(float %x, float %x, float %x)\n\
                \x20 %q = call float @llvm.sqrt.f32(float %m)\n\
                \x20 %z = call double @llvm.fabs.f64(double %y)\n\
                \x20 %u = call i32 @llvm.smax.i32(i32 %a, i32 %b)\n\
                \x20 %w = call i32 @llvm.umin.i32(i32 %a, i32 %b)\n\
                \x20 ret float %q\n}";
    let out = emit(text, Dialect::C99);
    assert!(!out.contains("llvm"));
    assert!(!out.contains("lifetime"));
    assert!(out.contains("#include <string.h>"));
    assert!(out.contains("#include <math.h>"));
    assert!(out.contains("  memcpy(v_d, v_s, 8LL);\n"));
    assert!(out.contains("v_m = v_x * v_x + v_x;"));
    assert!(out.contains("v_q = sqrtf(v_m);"));
    assert!(out.contains("v_z = fabs(v_y);"));
    assert!(out.contains("v_u = (v_a > v_b ? v_a : v_b);"));
    assert!(out.contains("v_w = ((uint32_t)v_a < (uint32_t)v_b ? v_a : v_b);"));

    let device = "declare float @llvm.sqrt.f32(float)\n\
                  define float @g(float %x) {\n  %q = call float @llvm.sqrt.f32(float %x)\n  ret float %q\n}";
    assert!(emit(device, Dialect::OpenCl).contains("v_q = sqrt(v_x);"));
}

#[test]
fn test_unsupported_intrinsics_are_emit_errors() {
    let text = "declare i32 @llvm.ctpop.i32(i32)\n\
                define i32 @f(i32 %a) {\n  %c = call i32 @llvm.ctpop.i32(i32 %a)\n  ret i32 %c\n}";
    let err = emit_with(text, Dialect::C99, CodegenOptions::default()).unwrap_err();
    assert!(err.to_string().contains("unsupported intrinsic '@llvm.ctpop.i32'"));

    let copy = "declare void @llvm.memset.p0.i64(ptr, i8, i64, i1)\n\
                define void @g(ptr %p) {\n  call void @llvm.memset.p0.i64(ptr %p, i8 0, i64 4, i1 false)\n  ret void\n}";
    let err = emit_with(copy, Dialect::OpenCl, CodegenOptions::default()).unwrap_err();
    assert!(err.to_string().contains("memset is not available"));
}

#[test]
fn test_switch_copies_phis_per_case() {
    let text = "define i32 @f(i32 %k) {\n\
                entry:\n\
                \x20 switch i32 %k, label %other [\n\
                \x20   i32 1, label %done\n\
                \x20   i32 -2, label %done\n\
                \x20 ]\n\
                other:\n\
                \x20 br label %done\n\
                done:\n\
                \x20 %r = phi i32 [ 10, %entry ], [ 0, %other ]\n\
                \x20 ret i32 %r\n}";
    let out = emit(text, Dialect::C99);
    assert!(out.contains(
        "  switch (v_k) {\n  case 1: {\n    v_r__phi = 10;\n    goto bb_done;\n  }\n  \
         case -2: {\n    v_r__phi = 10;\n    goto bb_done;\n  }\n  \
         default: {\n    goto bb_other;\n  }\n  }\n"
    ));
}
