//! End-to-end runs over real files: include chains, project manifests,
//! and the packaged archive.

mod common;

use choop_rs_core::codegen::CompileOptions;
use choop_rs_core::errors::ErrorKind;
use choop_rs_core::{compile_entry_to_sb2_bytes, Compiler};
use serde_json::Value;
use std::fs;
use std::io::{Cursor, Read};
use tempfile::tempdir;
use zip::ZipArchive;

fn read_project_json(bytes: &[u8]) -> Value {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("a zip archive");
    let mut text = String::new();
    archive
        .by_name("project.json")
        .expect("project.json present")
        .read_to_string(&mut text)
        .expect("readable json");
    serde_json::from_str(&text).expect("valid json")
}

#[test]
fn include_chains_compile_into_one_project() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("shared.ch"),
        "num score;\nmodule Util { void Reset() { score = 0; } }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("main.ch"),
        "#include \"shared.ch\"\nsprite Cat { import Util; void M() { Reset(); } }\n",
    )
    .unwrap();
    let bytes =
        compile_entry_to_sb2_bytes(&dir.path().join("main.ch"), CompileOptions::default())
            .expect("compiles");
    let json = read_project_json(&bytes);
    assert_eq!(json["children"][0]["objName"], Value::from("Cat"));
    let stage_vars = json["variables"].as_array().expect("stage variables");
    assert!(stage_vars
        .iter()
        .any(|v| v["name"] == Value::from("score")));
}

#[test]
fn a_header_included_twice_compiles_once() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("defs.ch"), "num shared;\n").unwrap();
    fs::write(
        dir.path().join("a.ch"),
        "#include \"defs.ch\"\nsprite A { void M() { shared = 1; } }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.ch"),
        "#include \"defs.ch\"\nsprite B { void M() { shared = 2; } }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("game.chp"),
        r#"{ "name": "game", "sources": ["a.ch", "b.ch"] }"#,
    )
    .unwrap();
    let bytes =
        compile_entry_to_sb2_bytes(&dir.path().join("game.chp"), CompileOptions::default())
            .expect("no duplicate declarations");
    let json = read_project_json(&bytes);
    assert_eq!(json["info"]["spriteCount"], Value::from(2));
}

#[test]
fn circular_includes_are_refused() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.ch"), "#include \"b.ch\"\n").unwrap();
    fs::write(dir.path().join("b.ch"), "#include \"a.ch\"\n").unwrap();
    let result =
        compile_entry_to_sb2_bytes(&dir.path().join("a.ch"), CompileOptions::default());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("Circular include"), "got: {}", message);
}

#[test]
fn missing_manifest_sources_report_file_not_found() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("game.chp"),
        r#"{ "name": "game", "sources": ["gone.ch"] }"#,
    )
    .unwrap();
    let mut compiler = Compiler::new();
    compiler
        .load_entry(&dir.path().join("game.chp"))
        .expect("a missing source is a diagnostic, not an abort");
    assert!(compiler.finish(None).is_none());
    assert!(compiler
        .errors()
        .iter()
        .any(|e| e.kind == ErrorKind::FileNotFound));
}

#[test]
fn bare_targets_ship_a_placeholder_costume() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("main.ch"), "sprite S { void M() { } }\n").unwrap();
    let bytes =
        compile_entry_to_sb2_bytes(&dir.path().join("main.ch"), CompileOptions::default())
            .expect("compiles");
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("a zip archive");
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.iter().any(|n| n == "project.json"));
    let asset = names
        .iter()
        .find(|n| n.ends_with(".svg"))
        .expect("a placeholder asset");
    let stem = asset.trim_end_matches(".svg");
    assert_eq!(stem.len(), 32);
    assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn missing_costume_files_are_diagnostics() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("main.ch"),
        "sprite S { costume \"gone.svg\"; void M() { } }\n",
    )
    .unwrap();
    let mut compiler = Compiler::new();
    let base = compiler.load_entry(&dir.path().join("main.ch")).unwrap();
    assert!(compiler.finish(Some(&base)).is_none());
    assert!(compiler
        .errors()
        .iter()
        .any(|e| e.kind == ErrorKind::FileNotFound));
}
