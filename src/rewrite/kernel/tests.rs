use crate::ast::{for_each_call, for_each_function, CallExpr};
use crate::source::SourceDocument;
use crate::syntax::parse_document;

use super::*;

fn dispatch_call(doc: &SourceDocument) -> CallExpr {
    let (unit, diagnostics) = parse_document(doc);
    assert!(diagnostics.is_empty(), "diagnostics: {:?}", diagnostics);
    let mut found = None;
    for_each_function(&unit.decls, &mut |f| {
        if let Some(body) = &f.body {
            for_each_call(body, &mut |c| {
                if c.callee_name().ends_with("parallel_for_each") && found.is_none() {
                    found = Some(c.clone());
                }
            });
        }
    });
    found.expect("dispatch call")
}

fn wrap(call: &str) -> String {
    format!(
        "void run(int* a, int* b, int* c) {{\n  int k = 2;\n  {}\n}}\n",
        call
    )
}

#[test]
fn test_element_type() {
    assert_eq!(element_type("int"), "int");
    assert_eq!(element_type("const int&"), "int");
    assert_eq!(element_type("volatile unsigned int&&"), "unsigned int");
    assert_eq!(element_type("int const"), "int");
    assert_eq!(element_type("const float*"), "const float*");
    assert_eq!(element_type("const float*const&"), "const float*");
    assert_eq!(element_type("myconst"), "myconst");
}

#[test]
fn test_suffix_is_counter_and_content_hash() {
    let doc = SourceDocument::new(
        "k.cpp",
        wrap("compute::parallel_for_each(a, b, c, [](int x) { return x + 1; });"),
    );
    let call = dispatch_call(&doc);
    let lambda = call.args[3].lambda.as_ref().expect("lambda");
    let closure = ClosureDescriptor::from_lambda(lambda).unwrap();

    let mut namer = KernelNamer::new();
    let first = namer.next_suffix(&closure, "{ return x + 1; }");
    let second = namer.next_suffix(&closure, "{ return x + 1; }");
    let other = KernelNamer::new().next_suffix(&closure, "{ return x + 2; }");

    assert!(first.starts_with("1_"));
    assert_eq!(first.len(), "1_".len() + 8);
    assert!(first[2..].chars().all(|c| c.is_ascii_hexdigit()));
    assert!(second.starts_with("2_"));
    assert_eq!(first[2..], second[2..]);
    assert_ne!(first[2..], other[2..]);

    let again = KernelNamer::new().next_suffix(&closure, "{ return x + 1; }");
    assert_eq!(first, again);
}

#[test]
fn test_kernel_shape() {
    let kernel = device_text(
        "1_abcdef01",
        &ClosureParam {
            name: "x".to_string(),
            ty: "const int&".to_string(),
        },
        "{ return x * 2; }",
    );
    assert_eq!(
        kernel,
        "int _Lambda_1_abcdef01(const int& x) { return x * 2; }\n\n\
         extern \"C\" void _Kernel_1_abcdef01(int* in, int* out) \
         { unsigned idx = get_global_id(0); out[idx] = _Lambda_1_abcdef01(in[idx]); }\n"
    );
    assert_eq!(
        host_stub("k.cpp.cl", "1_abcdef01"),
        "{ return std::pair<std::string,std::string> ( \"k.cpp.cl\" , \"_Kernel_1_abcdef01\" ); }"
    );
}

#[test]
fn test_rewrite_edits_both_outputs() {
    let src = wrap("compute::parallel_for_each(a, b, c, [](int x) { return x + 1; });");
    let doc = SourceDocument::new("k.cpp", src.as_str());
    let call = dispatch_call(&doc);
    let config = RewriteConfig::default();
    let mut rw = DualRewriter::new(&doc);
    let mut dispatch = DispatchRewriter::new(&config);
    let mut diagnostics = Vec::new();

    let handle = dispatch
        .rewrite(&mut rw, &call, &mut diagnostics)
        .unwrap()
        .expect("kernel");
    assert!(diagnostics.is_empty());
    assert_eq!(handle.file, "k.cpp.cl");
    assert!(handle.kernel.starts_with("_Kernel_1_"));

    let (cpu, gpu) = rw.materialize();
    let stub = format!(
        "[](int x) {{ return std::pair<std::string,std::string> ( \"k.cpp.cl\" , \"{}\" ); }});",
        handle.kernel
    );
    assert!(cpu.contains(&stub), "cpu: {}", cpu);
    assert!(!cpu.contains("return x + 1;"));

    assert!(gpu.starts_with(&src));
    let appended = &gpu[src.len()..];
    assert!(appended.starts_with("int _Lambda_1_"));
    assert!(appended.contains("(int x) { return x + 1; }"));
    assert!(appended.contains(&format!("extern \"C\" void {}(int* in, int* out)", handle.kernel)));
}

#[test]
fn test_wrong_arity_is_fatal() {
    let doc = SourceDocument::new(
        "k.cpp",
        wrap("compute::parallel_for_each(a, b, [](int x) { return x; });"),
    );
    let call = dispatch_call(&doc);
    let config = RewriteConfig::default();
    let mut rw = DualRewriter::new(&doc);
    let err = DispatchRewriter::new(&config)
        .rewrite(&mut rw, &call, &mut Vec::new())
        .unwrap_err();
    match err {
        RewriteError::UnsupportedDispatchShape { location, reason } => {
            assert_eq!(location, "k.cpp:3:3");
            assert!(reason.contains("expected 4 arguments, found 3"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_two_parameters_is_fatal() {
    let doc = SourceDocument::new(
        "k.cpp",
        wrap("compute::parallel_for_each(a, b, c, [](int x, int y) { return x + y; });"),
    );
    let call = dispatch_call(&doc);
    let config = RewriteConfig::default();
    let mut rw = DualRewriter::new(&doc);
    let err = DispatchRewriter::new(&config)
        .rewrite(&mut rw, &call, &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, RewriteError::UnsupportedDispatchShape { .. }));
}

#[test]
fn test_non_lambda_closure_is_rejected() {
    let doc = SourceDocument::new("k.cpp", wrap("compute::parallel_for_each(a, b, c, functor);"));
    let call = dispatch_call(&doc);
    let config = RewriteConfig::default();
    let mut rw = DualRewriter::new(&doc);
    let mut diagnostics = Vec::new();
    let result = DispatchRewriter::new(&config)
        .rewrite(&mut rw, &call, &mut diagnostics)
        .unwrap();
    assert!(result.is_none());
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("lambda"));
    let (cpu, gpu) = rw.materialize();
    assert_eq!(cpu, doc.text());
    assert_eq!(gpu, doc.text());
}

#[test]
fn test_this_capture_is_rejected() {
    let doc = SourceDocument::new(
        "k.cpp",
        wrap("compute::parallel_for_each(a, b, c, [this](int x) { return x; });"),
    );
    let call = dispatch_call(&doc);
    let config = RewriteConfig::default();
    let mut rw = DualRewriter::new(&doc);
    let mut diagnostics = Vec::new();
    let result = DispatchRewriter::new(&config)
        .rewrite(&mut rw, &call, &mut diagnostics)
        .unwrap();
    assert!(result.is_none());
    assert!(diagnostics[0].message.contains("`this`"));
    assert_eq!(rw.buffer(Target::Cpu).edit_count(), 0);
}

#[test]
fn test_captures_are_split_and_warned() {
    let doc = SourceDocument::new(
        "k.cpp",
        wrap("compute::parallel_for_each(a, b, c, [&k, a](int x) { return x * k; });"),
    );
    let call = dispatch_call(&doc);
    let lambda = call.args[3].lambda.as_ref().expect("lambda");
    let closure = ClosureDescriptor::from_lambda(lambda).unwrap();
    assert_eq!(closure.by_ref.len(), 1);
    assert_eq!(closure.by_ref[0].name, "k");
    assert_eq!(closure.by_ref[0].ty.as_deref(), Some("int"));
    assert_eq!(closure.by_value[0].name, "a");
    assert_eq!(closure.by_value[0].ty.as_deref(), Some("int*"));
    assert_eq!(closure.params[0].name, "x");

    let config = RewriteConfig::default();
    let mut rw = DualRewriter::new(&doc);
    let mut diagnostics = Vec::new();
    DispatchRewriter::new(&config)
        .rewrite(&mut rw, &call, &mut diagnostics)
        .unwrap()
        .expect("kernel");
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().all(|d| !d.is_error()));
}
