//! Lowering of conditionals, switches, and the loop family.

mod common;

use choop_rs_core::codegen::CompileOptions;
use choop_rs_core::sb2::BlockValue;
use choop_rs_core::Compiler;
use common::*;

#[test]
fn bare_if_lowers_to_do_if() {
    let project = lower("num g; sprite S { void M(num x) { if (x > 1) { g = 1; } } }");
    let blocks = first_script(&project);
    assert!(find_opcode(blocks, "doIf").is_some());
    assert!(find_opcode(blocks, "doIfElse").is_none());
}

#[test]
fn else_if_chains_nest_to_the_right() {
    let project = lower(
        "num g; sprite S { void M(num x) { \
         if (x > 1) { g = 1; } else if (x > 2) { g = 2; } else { g = 3; } } }",
    );
    let outer = find_opcode(first_script(&project), "doIfElse").expect("an if/else");
    let BlockValue::Stack(else_branch) = &outer.args[2] else {
        panic!("expected an else substack");
    };
    // The middle branch still has an else after it, the final else
    // lowers directly as its body.
    assert_eq!(else_branch.len(), 1);
    assert_eq!(else_branch[0].opcode, "doIfElse");
    let BlockValue::Stack(last) = &else_branch[0].args[2] else {
        panic!("expected the final else body");
    };
    assert_eq!(last[0].opcode, "setVar:to:");
}

#[test]
fn switch_evaluates_its_subject_once() {
    let project = lower(
        "num g; sprite S { void M(num x) { \
         switch (x + 1) { case 1: g = 1; case 2: g = 2; } } }",
    );
    let blocks = first_script(&project);
    // One hidden slot holds the subject; every case reads it back.
    assert_eq!(count_opcode(blocks, "append:toList:"), 1);
    let chain = find_opcode(blocks, "doIfElse").expect("a case chain");
    let BlockValue::Reporter(test) = &chain.args[0] else {
        panic!("expected a case test");
    };
    assert_eq!(test.opcode, "=");
}

#[test]
fn switch_default_lowers_as_the_final_else() {
    let project = lower(
        "num g; sprite S { void M(num x) { \
         switch (x) { case 1: g = 1; default: g = 0; } } }",
    );
    let chain = find_opcode(first_script(&project), "doIfElse").expect("a case chain");
    let BlockValue::Stack(default_body) = &chain.args[2] else {
        panic!("expected the default body");
    };
    assert_eq!(default_body[0].opcode, "setVar:to:");
}

#[test]
fn repeat_with_a_runtime_count_stays_a_loop() {
    let project = lower("num g; sprite S { void M(num n) { repeat (n) { g++; } } }");
    assert!(find_opcode(first_script(&project), "doRepeat").is_some());
}

#[test]
fn inline_repeat_unrolls_literal_counts() {
    let project = lower("num g; sprite S { void M() { inline repeat (3) { g++; } } }");
    let blocks = first_script(&project);
    assert!(find_opcode(blocks, "doRepeat").is_none());
    assert_eq!(count_opcode(blocks, "changeVar:by:"), 3);
}

#[test]
fn inline_repeat_above_the_cap_falls_back_to_a_loop() {
    let mut compiler = Compiler::with_options(CompileOptions {
        inline_repeat_cap: 2,
        ..CompileOptions::default()
    });
    compiler.inject_code(
        "test.ch",
        "num g; sprite S { void M() { inline repeat (3) { g++; } } }",
    );
    let project = compiler.compile().expect("compiles");
    let blocks = first_script(&project);
    assert!(find_opcode(blocks, "doRepeat").is_some());
    assert_eq!(count_opcode(blocks, "changeVar:by:"), 1);
}

#[test]
fn while_loops_carry_their_raw_condition() {
    let project = lower("num g; sprite S { void M(num x) { while (x < 9) { g++; } } }");
    let dowhile = find_opcode(first_script(&project), "doWhile").expect("a while loop");
    let BlockValue::Reporter(test) = &dowhile.args[0] else {
        panic!("expected a condition");
    };
    assert_eq!(test.opcode, "<");
}

#[test]
fn until_loops_lower_directly() {
    let project = lower("num g; sprite S { void M(num x) { until (x > 9) { g++; } } }");
    assert!(find_opcode(first_script(&project), "doUntil").is_some());
}

#[test]
fn forever_loops_have_no_condition() {
    let project = lower("num g; sprite S { void M() { forever { g++; } } }");
    let forever = find_opcode(first_script(&project), "doForever").expect("a forever loop");
    assert!(matches!(forever.args[0], BlockValue::Stack(_)));
}

#[test]
fn for_loops_drive_a_dedicated_counter() {
    let project = lower("num g; sprite S { void M() { for (num i in 10) { g = i; } } }");
    let form = find_opcode(first_script(&project), "doForLoop").expect("a for loop");
    assert_eq!(form.args[1], BlockValue::Number(10.0));
}
