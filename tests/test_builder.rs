// tests/test_builder.rs — Integration tests for reading, preprocessing,
// compiling and linking kernel sources.

mod common;

use std::fs;
use std::path::Path;

use common::MockBackend;
use plugboard::builder::{build_program, preprocess, BuildOptions};
use plugboard::error::{ErrorKind, PipelineError};
use plugboard::lifecycle::{ResourceClass, ResourceLedger};

fn write(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), text).unwrap();
}

#[test]
fn each_kernel_is_compiled_as_its_own_unit() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blur.wgsl", "fn blur() {}\n");
    write(dir.path(), "sobel.wgsl", "fn sobel() {}\n");

    let backend = MockBackend::new();
    let ledger = ResourceLedger::new();
    let program = build_program(&backend, dir.path(), ["blur", "sobel"], &BuildOptions::default(), &ledger).unwrap();

    assert_eq!(program.units, vec!["blur.wgsl", "sobel.wgsl"]);
    let record = backend.record.borrow();
    assert_eq!(record.compiled.len(), 2);
    assert_eq!(record.compiled[0], ("blur.wgsl".to_owned(), "fn blur() {}\n".to_owned()));
    assert_eq!(record.linked, 1);
    assert_eq!(ledger.created(ResourceClass::Program), 1);
    drop(program);
    assert_eq!(ledger.live(ResourceClass::Program), 0);
}

#[test]
fn missing_source_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blur.wgsl", "fn blur() {}\n");

    let backend = MockBackend::new();
    let ledger = ResourceLedger::new();
    let err = build_program(&backend, dir.path(), ["blur", "nope"], &BuildOptions::default(), &ledger)
        .err()
        .unwrap();
    match err {
        PipelineError::FileNotFound { path, .. } => assert!(path.ends_with("nope.wgsl")),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(backend.record.borrow().linked, 0);
}

#[test]
fn compile_failure_carries_unit_and_log() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blur.wgsl", "fn blur() {}\n");
    write(dir.path(), "sobel.wgsl", "fn sobel( {\n");

    let mut backend = MockBackend::new();
    backend.fail_compile = Some("sobel.wgsl".to_owned());
    let ledger = ResourceLedger::new();
    let err = build_program(&backend, dir.path(), ["blur", "sobel"], &BuildOptions::default(), &ledger)
        .err()
        .unwrap();
    match err {
        PipelineError::KernelBuildFailed { unit, log } => {
            assert_eq!(unit, "sobel.wgsl");
            assert!(log.contains("unexpected token"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(ledger.created(ResourceClass::Program), 0);
}

#[test]
fn link_failure_is_a_build_failure() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blur.wgsl", "fn blur() {}\n");

    let mut backend = MockBackend::new();
    backend.fail_link = Some("duplicate entry point `blur`".to_owned());
    let ledger = ResourceLedger::new();
    let err = build_program(&backend, dir.path(), ["blur"], &BuildOptions::default(), &ledger)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::KernelBuildFailed);
    assert!(err.to_string().contains("duplicate entry point"));
}

#[test]
fn custom_extension_is_used() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blur.comp", "fn blur() {}\n");

    let backend = MockBackend::new();
    let ledger = ResourceLedger::new();
    let options = BuildOptions { extension: "comp".to_owned(), ..BuildOptions::default() };
    let program = build_program(&backend, dir.path(), ["blur"], &options, &ledger).unwrap();
    assert_eq!(program.units, vec!["blur.comp"]);
}

// ===== Preprocessing =====

#[test]
fn defines_become_constants_ahead_of_the_source() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blur.wgsl", "fn blur() {}\n");
    let options = BuildOptions {
        defines: vec![("RADIUS".to_owned(), "2".to_owned()), ("GAIN".to_owned(), "1.5".to_owned())],
        ..BuildOptions::default()
    };
    let text = preprocess(&dir.path().join("blur.wgsl"), &options).unwrap();
    assert_eq!(text, "const RADIUS = 2;\nconst GAIN = 1.5;\nfn blur() {}\n");
}

#[test]
fn includes_resolve_from_unit_dir_then_include_dirs() {
    let src = tempfile::tempdir().unwrap();
    let inc = tempfile::tempdir().unwrap();
    write(src.path(), "local.wgsl", "// local\n");
    write(inc.path(), "shared.wgsl", "#include \"nested.wgsl\"\n// shared\n");
    write(inc.path(), "nested.wgsl", "// nested\n");
    write(
        src.path(),
        "main.wgsl",
        "#include \"local.wgsl\"\n#include \"shared.wgsl\"\nfn main() {}\n",
    );

    let options = BuildOptions { include_dirs: vec![inc.path().to_path_buf()], ..BuildOptions::default() };
    let text = preprocess(&src.path().join("main.wgsl"), &options).unwrap();
    assert_eq!(text, "// local\n// nested\n// shared\nfn main() {}\n");
}

#[test]
fn missing_include_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "main.wgsl", "#include \"absent.wgsl\"\n");
    let err = preprocess(&dir.path().join("main.wgsl"), &BuildOptions::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert!(err.to_string().contains("absent.wgsl"));
}

#[test]
fn include_cycle_fails_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.wgsl", "#include \"b.wgsl\"\n");
    write(dir.path(), "b.wgsl", "#include \"a.wgsl\"\n");
    let err = preprocess(&dir.path().join("a.wgsl"), &BuildOptions::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::KernelBuildFailed);
}
