use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const CONV: &str = "graph conv_relu, id=21\n\
                    entry {\n\
                      %x = f32[1,8,8,3] parameter(0)\n\
                      %w = f32[3,3,3,4] parameter(1)\n\
                      %conv = f32[1,8,8,4] convolution(%x, %w), padding=1_1x1_1\n\
                      %zero = f32[1,8,8,4] constant(0)\n\
                      ROOT %relu = f32[1,8,8,4] maximum(%conv, %zero)\n\
                    }\n";

fn write_graph(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("graph file should be writable");
    path
}

fn run_spirc(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_spirc"))
        .args(args)
        .env_remove("SPIRC_MHA")
        .output()
        .expect("spirc binary should execute")
}

#[test]
fn compile_writes_binary_next_to_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_graph(dir.path(), "conv.graph", CONV);

    let output = run_spirc(&[input.to_str().expect("utf8 path")]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "compile should pass: {stderr}");

    let binary = fs::read_to_string(dir.path().join("conv.spv")).expect("binary should exist");
    assert!(binary.contains("__spirc$convBiasActivationForward"), "{binary}");
}

#[test]
fn output_flag_and_old_capability() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_graph(dir.path(), "conv.graph", CONV);
    let out = dir.path().join("custom.bin");

    let output = run_spirc(&[
        input.to_str().expect("utf8 path"),
        "-o",
        out.to_str().expect("utf8 path"),
        "--capability",
        "6.1",
        "--stats",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "compile should pass: {stdout}");
    assert!(stdout.contains("Passes run"), "{stdout}");

    let binary = fs::read_to_string(out).expect("binary should exist");
    assert!(binary.contains("; capability 6.1"), "{binary}");
    assert!(binary.contains("__spirc$convForward"), "{binary}");
    assert!(!binary.contains("convBiasActivationForward"), "{binary}");
}

#[test]
fn dump_directory_receives_pass_dumps() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_graph(dir.path(), "conv.graph", CONV);
    let dumps = dir.path().join("dumps");

    let output = run_spirc(&[
        input.to_str().expect("utf8 path"),
        "--dump-to",
        dumps.to_str().expect("utf8 path"),
    ]);
    assert!(output.status.success());
    let count = fs::read_dir(&dumps).expect("dump dir should exist").count();
    assert!(count > 0);
}

#[test]
fn lowered_ir_override_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_graph(dir.path(), "conv.graph", CONV);
    let replacement = format!(
        "target triple = \"spir64-unknown-unknown\"\n\
         target datalayout = \"e\"\n\
         graph conv_relu, id=21\n\
         entry {{ ROOT %replaced = f32[2]{{0}} parameter(0) }}\n"
    );
    let lowered = write_graph(dir.path(), "module_0021.conv_relu.hand-written.ll", &replacement);

    let output = run_spirc(&[
        input.to_str().expect("utf8 path"),
        "--lowered-ir-file",
        lowered.to_str().expect("utf8 path"),
    ]);
    assert!(output.status.success());
    let binary = fs::read_to_string(dir.path().join("conv.spv")).expect("binary should exist");
    assert!(binary.contains("ret %replaced"), "{binary}");
}

#[test]
fn broken_override_fails_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_graph(dir.path(), "conv.graph", CONV);
    let lowered = write_graph(dir.path(), "module_0021.conv_relu.ll", "garbage\n");

    let output = run_spirc(&[
        input.to_str().expect("utf8 path"),
        "--lowered-ir-file",
        lowered.to_str().expect("utf8 path"),
    ]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("Fatal override error"), "{stderr}");
}

#[test]
fn parse_error_returns_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_graph(dir.path(), "bad.graph", "graph bad entry { %x = f32[2] parameter( }\n");

    let output = run_spirc(&[input.to_str().expect("utf8 path")]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("bad.graph: line 1"), "{stderr}");
}

#[test]
fn invalid_capability_is_rejected() {
    let output = run_spirc(&["whatever.graph", "--capability", "eight"]);
    assert!(!output.status.success());
}
