//! Folding of unary math builtins over literal arguments, and the
//! runtime fallback when the argument is only known at run time.

mod common;

use choop_rs_core::errors::ErrorKind;
use choop_rs_core::sb2::BlockValue;
use common::*;

fn folded_number(source: &str) -> f64 {
    match assigned_value(source) {
        BlockValue::Number(n) => n,
        other => panic!("expected a folded literal, got {:?}", other),
    }
}

#[test]
fn sqrt_of_a_literal_folds_to_a_literal() {
    let n = folded_number("num g; sprite S { void M() { g = Sqrt(16); } }");
    assert_eq!(n, 4.0);
}

#[test]
fn sqrt_of_a_variable_stays_a_compute_block() {
    let value = assigned_value("num g; num x; sprite S { void M() { g = Sqrt(x); } }");
    let BlockValue::Reporter(compute) = value else {
        panic!("expected a compute block");
    };
    assert_eq!(compute.opcode, "computeFunction:of:");
    assert_eq!(compute.args[0], BlockValue::Text("sqrt".to_string()));
    let BlockValue::Reporter(read) = &compute.args[1] else {
        panic!("expected a variable read");
    };
    assert_eq!(read.opcode, "readVariable");
}

#[test]
fn trig_folds_in_degrees_with_its_own_functions() {
    let sin = folded_number("num g; sprite S { void M() { g = Sin(30); } }");
    assert!((sin - 0.5).abs() < 1e-9, "Sin(30) folded to {}", sin);
    let cos = folded_number("num g; sprite S { void M() { g = Cos(60); } }");
    assert!((cos - 0.5).abs() < 1e-9, "Cos(60) folded to {}", cos);
    let tan = folded_number("num g; sprite S { void M() { g = Tan(45); } }");
    assert!((tan - 1.0).abs() < 1e-9, "Tan(45) folded to {}", tan);
}

#[test]
fn inverse_trig_folds_back_to_degrees() {
    let asin = folded_number("num g; sprite S { void M() { g = Asin(1); } }");
    assert!((asin - 90.0).abs() < 1e-9);
    let atan = folded_number("num g; sprite S { void M() { g = Atan(1); } }");
    assert!((atan - 45.0).abs() < 1e-9);
}

#[test]
fn logs_and_powers_fold() {
    let log = folded_number("num g; sprite S { void M() { g = Log(1000); } }");
    assert!((log - 3.0).abs() < 1e-9);
    let ln = folded_number("num g; sprite S { void M() { g = Ln(1); } }");
    assert_eq!(ln, 0.0);
    let pow10 = folded_number("num g; sprite S { void M() { g = Pow10(2); } }");
    assert!((pow10 - 100.0).abs() < 1e-9);
    let powe = folded_number("num g; sprite S { void M() { g = PowE(0); } }");
    assert_eq!(powe, 1.0);
}

#[test]
fn rounding_family_folds() {
    assert_eq!(
        folded_number("num g; sprite S { void M() { g = Floor(2.7); } }"),
        2.0
    );
    assert_eq!(
        folded_number("num g; sprite S { void M() { g = Ceiling(2.1); } }"),
        3.0
    );
    assert_eq!(
        folded_number("num g; sprite S { void M() { g = Abs(5); } }"),
        5.0
    );
}

#[test]
fn folded_results_embed_inside_runtime_expressions() {
    let value = assigned_value("num g; num x; sprite S { void M() { g = x + Sqrt(16); } }");
    let BlockValue::Reporter(sum) = value else {
        panic!("expected an addition");
    };
    assert_eq!(sum.opcode, "+");
    assert_eq!(sum.args[1], BlockValue::Number(4.0));
}

#[test]
fn math_names_are_case_insensitive() {
    let n = folded_number("num g; sprite S { void M() { g = sqrt(25); } }");
    assert_eq!(n, 5.0);
}

#[test]
fn math_calls_cannot_stand_alone_as_statements() {
    let errors = diagnose("sprite S { void M() { Sqrt(4); } }");
    assert!(errors.iter().any(|e| e.kind == ErrorKind::ImproperUsage));
}
