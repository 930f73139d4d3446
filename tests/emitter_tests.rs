//! Binary emission and the lowered-module file override.

use std::fs;
use std::path::PathBuf;

use spirc::compiler::{find_override, maybe_load_lowered_from_file};
use spirc::{
    CompilationSession, CompileConfig, CompileError, EmitError, Graph, LoweredModule, OverrideError, SpirCompiler,
};

const NET: &str = "graph net, id=5\n\
                   entry {\n\
                     %x = f32[4]{0} parameter(0)\n\
                     ROOT %n = f32[4]{0} negate(%x)\n\
                   }";

/// The same module with a different body, so tests can tell which one was lowered.
const PATCHED: &str = "graph net, id=5\n\
                       entry {\n\
                         %x = f32[4]{0} parameter(0)\n\
                         %c = f32[4]{0} constant(2)\n\
                         ROOT %patched = f32[4]{0} multiply(%x, %c)\n\
                       }";

fn net() -> Graph {
    Graph::parse(NET).unwrap()
}

fn write_module(dir: &std::path::Path, file_name: &str, graph_text: &str) -> PathBuf {
    let module = LoweredModule::new(Graph::parse(graph_text).unwrap());
    let path = dir.join(file_name);
    fs::write(&path, module.to_string()).unwrap();
    path
}

fn config_with_overrides(files: Vec<PathBuf>) -> CompileConfig {
    let mut config = CompileConfig::default();
    config.debug.lowered_ir_files = files;
    config
}

#[test]
fn test_no_override_files_lowers_in_memory_module() {
    let _ = env_logger::builder().is_test(true).try_init();
    let compiler = SpirCompiler::default();
    let graph = net();
    let module = LoweredModule::new(graph.clone());

    let (metadata, binary) = compiler
        .compile_target_binary(&CompileConfig::default(), &module, Some(&graph), &CompilationSession::new())
        .unwrap();
    assert!(metadata.is_empty());
    assert!(!binary.is_empty());
    let text = String::from_utf8(binary).unwrap();
    assert!(text.contains("negate(%x)"), "{text}");
    assert!(text.contains("ret %n"), "{text}");
}

#[test]
fn test_matching_override_replaces_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "module_0005.net.patched.ll", PATCHED);
    let config = config_with_overrides(vec![path]);
    let graph = net();
    let module = LoweredModule::new(graph.clone());

    let (metadata, binary) = SpirCompiler::default()
        .compile_target_binary(&config, &module, Some(&graph), &CompilationSession::new())
        .unwrap();
    assert!(metadata.is_empty());
    let text = String::from_utf8(binary).unwrap();
    assert!(text.contains("ret %patched"), "{text}");
    assert!(!text.contains("negate"), "{text}");
}

#[test]
fn test_first_matching_candidate_wins() {
    let dir = tempfile::tempdir().unwrap();
    let unrelated = write_module(dir.path(), "module_0006.net.ll", NET);
    let first = write_module(dir.path(), "module_0005.net.a.ll", PATCHED);
    let second = write_module(dir.path(), "module_0005.net.b.ll", NET);
    let candidates = vec![unrelated, first.clone(), second];

    assert_eq!(find_override("module_0005.net.", &candidates), Some(first.as_path()));
    let loaded = maybe_load_lowered_from_file(Some(&net()), &candidates, &CompilationSession::new())
        .unwrap()
        .unwrap();
    assert!(loaded.graph.entry().find("patched").is_some());
}

#[test]
fn test_mismatched_candidates_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let other = write_module(dir.path(), "module_0006.net.ll", PATCHED);
    let config = config_with_overrides(vec![other]);
    let graph = net();
    let module = LoweredModule::new(graph.clone());
    let session = CompilationSession::new();

    let (_, binary) = SpirCompiler::default()
        .compile_target_binary(&config, &module, Some(&graph), &session)
        .unwrap();
    let text = String::from_utf8(binary).unwrap();
    assert!(text.contains("ret %n"), "{text}");
    assert_eq!(session.stats().override_misses, 1);
    assert!(session.stats().to_string().contains("Override lookups without a match: 1"));
}

#[test]
fn test_no_candidates_is_not_a_miss() {
    let graph = net();
    let module = LoweredModule::new(graph.clone());
    let session = CompilationSession::new();

    SpirCompiler::default()
        .compile_target_binary(&CompileConfig::default(), &module, Some(&graph), &session)
        .unwrap();
    assert_eq!(session.stats().override_misses, 0);
}

#[test]
fn test_longer_module_name_does_not_match() {
    let dir = tempfile::tempdir().unwrap();
    let network = write_module(dir.path(), "module_0005.network.ll", PATCHED);
    let session = CompilationSession::new();

    assert_eq!(find_override("module_0005.net.", std::slice::from_ref(&network)), None);
    let loaded = maybe_load_lowered_from_file(Some(&net()), &[network], &session).unwrap();
    assert!(loaded.is_none());
    assert_eq!(session.stats().override_misses, 1);
}

#[test]
fn test_unparsable_override_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module_0005.net.ll");
    fs::write(&path, "this is not a lowered module").unwrap();
    let config = config_with_overrides(vec![path.clone()]);
    let graph = net();
    let module = LoweredModule::new(graph.clone());

    let err = SpirCompiler::default()
        .compile_target_binary(&config, &module, Some(&graph), &CompilationSession::new())
        .unwrap_err();
    assert!(err.is_fatal());
    match err {
        EmitError::Override(OverrideError::Parse { path: failed, .. }) => assert_eq!(failed, path),
        other => panic!("expected a parse failure, got {other}"),
    }
}

#[test]
fn test_override_body_must_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module_0005.net.ll");
    let text = format!(
        "target triple = \"{}\"\ntarget datalayout = \"{}\"\ngraph net entry {{ ROOT %x = f32[4] bogus(0) }}\n",
        spirc::compiler::SPIR_TARGET_TRIPLE,
        spirc::compiler::SPIR_DATA_LAYOUT
    );
    fs::write(&path, text).unwrap();

    let err = maybe_load_lowered_from_file(Some(&net()), &[path], &CompilationSession::new()).unwrap_err();
    assert!(matches!(err, OverrideError::Parse { .. }));
}

#[test]
fn test_without_debug_module_binary_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "module_0005.net.ll", PATCHED);
    let config = config_with_overrides(vec![path]);
    let module = LoweredModule::new(net());

    let (metadata, binary) = SpirCompiler::default()
        .compile_target_binary(&config, &module, None, &CompilationSession::new())
        .unwrap();
    assert!(metadata.is_empty());
    assert!(binary.is_empty());
}

#[test]
fn test_loaded_override_is_dumped() {
    let overrides = tempfile::tempdir().unwrap();
    let dumps = tempfile::tempdir().unwrap();
    let path = write_module(overrides.path(), "module_0005.net.ll", PATCHED);
    let session = CompilationSession::new().with_dump_dir(dumps.path());

    maybe_load_lowered_from_file(Some(&net()), &[path], &session).unwrap();
    let names: Vec<String> = fs::read_dir(dumps.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1, "{names:?}");
    assert!(names[0].ends_with(".override.txt"), "{names:?}");
}

#[test]
fn test_toolchain_failure_is_not_fatal() {
    let mut config = CompileConfig::default();
    config.toolchain_dir = Some(PathBuf::from("/nonexistent/spirc-toolchain"));
    let graph = net();
    let module = LoweredModule::new(graph.clone());

    let err = SpirCompiler::default()
        .compile_target_binary(&config, &module, Some(&graph), &CompilationSession::new())
        .unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(err, EmitError::Compile(CompileError::Toolchain { .. })));
}
