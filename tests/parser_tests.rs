//! Graph text format: parsing, printing and error positions.

use std::fs;
use std::path::Path;

use spirc::graph::{OpKind, PrimitiveType};
use spirc::Graph;

#[test]
fn test_printed_graph_files_parse_back_identically() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/graphs");
    let mut seen = 0;
    for entry in fs::read_dir(&dir).unwrap().flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("graph") {
            continue;
        }
        let text = fs::read_to_string(&path).unwrap();
        let graph = Graph::parse(&text).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        let printed = graph.to_string();
        let reparsed = Graph::parse(&printed).unwrap_or_else(|e| panic!("{}: {e}\n{printed}", path.display()));
        assert_eq!(reparsed.to_string(), printed, "{}", path.display());
        seen += 1;
    }
    assert!(seen > 0);
}

#[test]
fn test_subcomputations_and_forward_references() {
    let graph = Graph::parse(
        "; leading comment\n\
         graph calls, id=42\n\
         sub body.1 {\n\
           %p0 = f32[4] parameter(0)\n\
           ROOT %n = f32[4] negate(%p0)\n\
         }\n\
         entry {\n\
           ROOT %c = f32[4] call(%x), to_apply=body.1\n\
           %x = f32[4] parameter(0)\n\
         }",
    )
    .unwrap();
    assert_eq!(graph.id(), 42);
    assert_eq!(graph.file_prefix(), "module_0042.calls");
    assert!(graph.subcomputation("body.1").is_some());

    let entry = graph.entry();
    let root = entry.root_node().unwrap();
    assert_eq!(root.name, "c");
    assert_eq!(root.kind, OpKind::Call { target: "body.1".to_string() });
    assert_eq!(entry[root.operands[0]].name, "x");
}

#[test]
fn test_last_node_is_root_by_default() {
    let graph = Graph::parse("graph g entry { %a = s32[] parameter(0)\n %b = s32[] negate(%a) }").unwrap();
    let root = graph.entry().root_node().unwrap();
    assert_eq!(root.name, "b");
    assert_eq!(root.shape.element_type(), Some(PrimitiveType::S32));
}

#[test]
fn test_constants_and_layouts() {
    let graph = Graph::parse(
        "graph g entry {\n\
           %c = f32[2,2]{0,1} constant({1, 2, 3, 4})\n\
           ROOT %z = bf16[3] constant(0)\n\
         }",
    )
    .unwrap();
    let entry = graph.entry();
    let c = &entry[entry.find("c").unwrap()];
    assert_eq!(c.shape.layout(), Some(&[0, 1][..]));
    assert_eq!(c.kind.literal().unwrap().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    let z = entry.root_node().unwrap();
    assert!(z.kind.literal().unwrap().is_splat_of(0.0));
}

#[test]
fn test_errors_carry_positions() {
    let err = Graph::parse("graph g\nentry {\n  %x = f32[2] parameter(0)\n  ROOT %y = f32[2] frobnicate(%x)\n}")
        .unwrap_err();
    assert_eq!(err.line, 4);

    let err = Graph::parse("graph g entry { ROOT %y = f32[2] negate(%missing) }").unwrap_err();
    assert!(err.message.contains("unknown operand '%missing'"), "{err}");

    let err = Graph::parse("graph g entry { %x = f32[2] parameter(0)\n %x = f32[2] parameter(1) }").unwrap_err();
    assert!(err.message.contains("duplicate node name"), "{err}");

    let err = Graph::parse("graph g entry { %c = f32[3] constant({1, 2}) }").unwrap_err();
    assert!(err.message.contains("holds 3"), "{err}");

    assert!(Graph::parse("graph g").is_err());
    assert!(Graph::parse("entry { }").is_err());
}

#[test]
fn test_oversized_shapes_are_rejected() {
    let err = Graph::parse("graph g entry { ROOT %c = f32[4000000000000,4000000000000] constant(0) }").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(err.message.contains("too many elements"), "{err}");

    let err = Graph::parse("graph g entry { ROOT %p = f32[2,-3] parameter(0) }").unwrap_err();
    assert!(err.message.contains("negative dimension"), "{err}");
}

#[test]
fn test_large_splat_constant_parses() {
    let graph = Graph::parse("graph g entry { ROOT %c = f32[65536,65536] constant(0) }").unwrap();
    let literal = graph.entry().root_node().unwrap().kind.literal().unwrap();
    assert_eq!(literal.len(), 65536 * 65536);
    assert!(literal.is_splat_of(0.0));
    assert!(graph.to_string().contains("constant(0)"));
}
