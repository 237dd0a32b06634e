//! Declaration collection: duplicate handling, modifier validation,
//! optional parameters, and module imports as one-time snapshots.

mod common;

use choop_rs_core::ast::{DataType, Method, Position, Project};
use choop_rs_core::builder;
use choop_rs_core::errors::{Diagnostics, ErrorKind};
use choop_rs_core::lexer;
use choop_rs_core::parser;
use choop_rs_core::Compiler;
use common::*;

fn build(source: &str) -> (Project, Diagnostics) {
    let mut diags = Diagnostics::new();
    let file = diags.add_file("test.ch", source);
    let tree = parser::parse(lexer::tokenize(source, file).unwrap()).unwrap();
    let mut project = Project::default();
    builder::build_file(&tree, &mut project, &mut diags);
    builder::link_imports(&mut project, &mut diags);
    (project, diags)
}

#[test]
fn duplicate_sprite_variable_reports_once_and_keeps_the_first() {
    let mut compiler = Compiler::new();
    compiler.inject_code("test.ch", "sprite S { num x; string x; void M() { } }");
    compiler.compile();
    let duplicates = compiler
        .errors()
        .iter()
        .filter(|e| e.kind == ErrorKind::DuplicateDeclaration)
        .count();
    assert_eq!(duplicates, 1);
    let members = &compiler.project().sprites[0].members;
    assert_eq!(members.variables.len(), 1);
    assert_eq!(members.variables[0].data_type, DataType::Number);
}

#[test]
fn superglobal_names_are_unique_across_kinds() {
    let errors = diagnose("num x; list num x[1]; sprite S { void M() { } }");
    assert_eq!(errors[0].kind, ErrorKind::DuplicateDeclaration);
}

#[test]
fn duplicate_names_compare_case_insensitively() {
    let errors = diagnose("sprite S { num total; num Total; void M() { } }");
    assert_eq!(errors[0].kind, ErrorKind::DuplicateDeclaration);
}

#[test]
fn repeated_modifiers_are_extraneous_but_survive() {
    let (project, diags) = build("sprite S { atomic atomic void M() { } }");
    assert_eq!(diags.errors()[0].kind, ErrorKind::ExtraneousToken);
    assert!(project.sprites[0].members.methods[0].is_atomic);
}

#[test]
fn optional_parameters_fill_from_the_right() {
    let project = lower(
        "sprite S { void M(num a, num b = 5) { } void N() { M(1); } }",
    );
    // N is the second script; its call carries the default for b.
    let call = find_opcode(&project.sprites[0].scripts[1].blocks, "call")
        .expect("a call block");
    assert!(call.args.len() >= 3, "call should carry both arguments");
}

#[test]
fn too_few_arguments_for_a_user_method_is_invalid() {
    let errors = diagnose("sprite S { void M(num a, num b = 5) { } void N() { M(); } }");
    assert!(errors.iter().any(|e| e.kind == ErrorKind::InvalidArgument));
}

#[test]
fn module_import_copies_members() {
    let (project, diags) = build(
        "module Util { const num Max = 9; num shared; void Help() { } } \
         sprite S { import Util; void M() { } }",
    );
    assert!(!diags.has_errors(), "{:?}", diags.errors());
    let members = &project.sprites[0].members;
    assert!(members.constants.iter().any(|c| c.name == "Max"));
    assert!(members.variables.iter().any(|v| v.name == "shared"));
    assert!(members.methods.iter().any(|m| m.name == "Help"));
}

#[test]
fn module_import_is_a_snapshot_not_a_reference() {
    let (mut project, diags) = build(
        "module Util { void Help() { } } sprite S { import Util; void M() { } }",
    );
    assert!(!diags.has_errors());
    let before = project.sprites[0].members.methods.len();
    // Changing the module after linking must not reach the sprite.
    project.modules[0].members.methods.push(Method {
        pos: Position::new(0, 1, 1, 0, 0),
        name: "Later".to_string(),
        return_type: DataType::Object,
        has_return: false,
        params: Vec::new(),
        is_unsafe: false,
        is_inline: false,
        is_atomic: false,
        body: Vec::new(),
    });
    assert_eq!(project.sprites[0].members.methods.len(), before);
    assert!(!project.sprites[0]
        .members
        .methods
        .iter()
        .any(|m| m.name == "Later"));
}

#[test]
fn importing_the_same_module_twice_is_guarded() {
    let errors = diagnose("module Util { } sprite S { import Util; import UTIL; }");
    assert!(errors
        .iter()
        .any(|e| e.kind == ErrorKind::ModuleAlreadyImported));
}

#[test]
fn imported_members_collide_with_own_declarations() {
    let (_, diags) = build(
        "module Util { num shared; } sprite S { import Util; num shared; }",
    );
    assert!(diags
        .errors()
        .iter()
        .any(|e| e.kind == ErrorKind::DuplicateDeclaration));
}

#[test]
fn duplicate_errors_carry_the_offending_snippet() {
    let errors = diagnose("sprite S { num x; num x; void M() { } }");
    let error = &errors[0];
    assert_eq!(error.file, "test.ch");
    assert_eq!(error.line, 1);
    assert!(error.snippet.contains('x'), "snippet was '{}'", error.snippet);
}
