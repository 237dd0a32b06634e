//! Rebalancing of same-operator chains into depth-minimal trees, and
//! the cases rebalancing must leave alone.

mod common;

use choop_rs_core::sb2::{project_json, BlockValue};
use choop_rs_core::Compiler;
use common::*;

#[test]
fn long_addition_chains_balance_to_log_depth() {
    let value = assigned_value(
        "num g; sprite S { void M() { \
         g = 1+2+3+4+5+6+7+8+9+10+11+12+13+14+15+16; } }",
    );
    assert_eq!(reporter_depth(&value), 4);
    assert_eq!(number_leaves(&value), (1..=16).map(f64::from).collect::<Vec<_>>());
}

#[test]
fn balancing_preserves_operand_order_for_odd_counts() {
    let value = assigned_value("num g; sprite S { void M() { g = 1+2+3+4+5; } }");
    assert_eq!(reporter_depth(&value), 3);
    assert_eq!(number_leaves(&value), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn subtraction_chains_keep_their_left_nesting() {
    let value = assigned_value("num g; sprite S { void M() { g = 1-2-3-4; } }");
    // Non-associative chains parse left-leaning and stay that way.
    assert_eq!(reporter_depth(&value), 3);
    assert_eq!(number_leaves(&value), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn mixed_operators_never_reorder() {
    let value = assigned_value("num g; sprite S { void M() { g = 1 + 2 * 3 + 4; } }");
    assert_eq!(number_leaves(&value), vec![1.0, 2.0, 3.0, 4.0]);
    assert!(reporter_depth(&value) <= 3);
}

#[test]
fn concat_chains_balance_like_arithmetic() {
    let value = assigned_value(
        "string s; sprite S { void M() { s = \"a\" . \"b\" . \"c\" . \"d\"; } }",
    );
    let BlockValue::Reporter(join) = &value else {
        panic!("expected a join block");
    };
    assert_eq!(join.opcode, "concatenate:with:");
    assert_eq!(reporter_depth(&value), 2);
    let mut leaves = Vec::new();
    literal_leaves(&value, &mut leaves);
    let texts: Vec<&str> = leaves
        .iter()
        .map(|l| match l {
            BlockValue::Text(t) => t.as_str(),
            other => panic!("expected text leaves, got {:?}", other),
        })
        .collect();
    assert_eq!(texts, vec!["a", "b", "c", "d"]);
}

#[test]
fn boolean_chains_balance() {
    let project = lower(
        "bool a; bool b; bool c; bool d; \
         sprite S { void M() { if (a && b && c && d) { } } }",
    );
    let doif = find_opcode(first_script(&project), "doIf").expect("an if block");
    let BlockValue::Reporter(test) = &doif.args[0] else {
        panic!("expected a condition");
    };
    assert_eq!(test.opcode, "&");
    // Four variable reads under a balanced pair of "&" nodes.
    assert_eq!(reporter_depth(&doif.args[0]), 3);
}

#[test]
fn compiling_twice_yields_identical_output() {
    let source = "num g; sprite S { void M() { g = 1+2+3+4+5+6+7; } }";
    let mut first = Compiler::new();
    first.inject_code("test.ch", source);
    let mut second = Compiler::new();
    second.inject_code("test.ch", source);
    let left = project_json(&first.compile().expect("first compile"));
    let right = project_json(&second.compile().expect("second compile"));
    assert_eq!(left, right);
}
