//! Frame layout: slot offsets across nested scopes, cleanup on every
//! exit path, and off-stack storage for unsafe scopes.

mod common;

use choop_rs_core::sb2::{project_json, BlockValue};
use choop_rs_core::Compiler;
use common::*;

fn read_index(value: &BlockValue) -> f64 {
    let BlockValue::Reporter(read) = value else {
        panic!("expected a slot read, got {:?}", value);
    };
    assert_eq!(read.opcode, "getLine:ofList:");
    let BlockValue::Number(index) = read.args[0] else {
        panic!("expected a literal index, got {:?}", read.args[0]);
    };
    index
}

#[test]
fn slots_number_in_declaration_order_across_scopes() {
    // a -> 1, b -> 2..3, c -> 4, then the child scope opens at 5.
    let project = lower(
        "num g; sprite S { event GreenFlag() { \
         num a; num[2] b; num c; \
         g = a; g = c; { num d; g = d; } } }",
    );
    let blocks = first_script(&project);
    let indices: Vec<f64> = blocks
        .iter()
        .filter(|b| b.opcode == "setVar:to:")
        .map(|b| read_index(&b.args[1]))
        .collect();
    assert_eq!(indices, vec![1.0, 4.0, 5.0]);
}

#[test]
fn closing_a_scope_pops_only_its_own_slots() {
    let project = lower("sprite S { void M() { num a; { num b; num c; } } }");
    let blocks = first_script(&project);
    assert_eq!(count_opcode(blocks, "deleteLine:ofList:"), 3);
    // The inner pair pops before the method's own slot does.
    let tail: Vec<&str> = blocks
        .iter()
        .rev()
        .take(3)
        .map(|b| b.opcode.as_str())
        .collect();
    assert_eq!(
        tail,
        vec!["deleteLine:ofList:", "deleteLine:ofList:", "deleteLine:ofList:"]
    );
}

#[test]
fn early_returns_pop_the_whole_open_chain() {
    let project = lower(
        "sprite S { void M() { num a; num b; if (a > 0) { num c; return; } } }",
    );
    let doif = find_opcode(first_script(&project), "doIf").expect("an if block");
    let BlockValue::Stack(branch) = &doif.args[1] else {
        panic!("expected a substack");
    };
    // c plus the two method slots, then the stop.
    assert_eq!(count_opcode(branch, "deleteLine:ofList:"), 3);
    assert_eq!(branch.last().map(|b| b.opcode.as_str()), Some("stopScripts"));
}

#[test]
fn unsafe_methods_store_off_the_stack_without_cleanup() {
    let project = lower("sprite S { unsafe void M() { num v = 3; } }");
    let blocks = first_script(&project);
    assert_eq!(count_opcode(blocks, "append:toList:"), 0);
    assert_eq!(count_opcode(blocks, "deleteLine:ofList:"), 0);
    let set = find_opcode(blocks, "setVar:to:").expect("a variable write");
    let BlockValue::Text(key) = &set.args[0] else {
        panic!("expected a storage key");
    };
    assert!(key.ends_with(": v"), "unexpected storage key '{}'", key);
    assert!(project.sprites[0].variables.iter().any(|v| &v.name == key));
}

#[test]
fn sibling_unsafe_scopes_get_distinct_storage_keys() {
    let project =
        lower("sprite S { unsafe void M() { { num v = 1; } { num v = 2; } } }");
    let keys: Vec<&BlockValue> = first_script(&project)
        .iter()
        .filter(|b| b.opcode == "setVar:to:")
        .map(|b| &b.args[0])
        .collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

#[test]
fn recompiling_one_session_reuses_the_same_labels() {
    let source = "sprite S { unsafe void M() { { num v = 1; } } \
                  void N() { num x = 2; } }";
    let mut compiler = Compiler::new();
    compiler.inject_code("test.ch", source);
    let first = project_json(&compiler.compile().expect("first compile"));
    let second = project_json(&compiler.compile().expect("second compile"));
    assert_eq!(first, second);
}
