//! Helpers shared by the integration suites.

#![allow(dead_code)]

use choop_rs_core::errors::CompileError;
use choop_rs_core::sb2::{Block, BlockValue, Sb2Project};
use choop_rs_core::Compiler;

/// Compiles one source string and returns the lowered project, failing
/// the test on any diagnostic.
pub fn lower(source: &str) -> Sb2Project {
    let mut compiler = Compiler::new();
    compiler.inject_code("test.ch", source);
    let lowered = compiler.compile();
    assert_eq!(
        compiler.error_count(),
        0,
        "unexpected errors:\n{}",
        compiler.render_errors()
    );
    lowered.expect("compilation produced no output")
}

/// Compiles a source string expected to produce diagnostics and returns
/// everything that was reported.
pub fn diagnose(source: &str) -> Vec<CompileError> {
    let mut compiler = Compiler::new();
    compiler.inject_code("test.ch", source);
    compiler.compile();
    compiler.errors().to_vec()
}

/// Blocks of the first script of the first sprite.
pub fn first_script(project: &Sb2Project) -> &[Block] {
    &project.sprites[0].scripts[0].blocks
}

pub fn find_opcode<'a>(blocks: &'a [Block], opcode: &str) -> Option<&'a Block> {
    blocks.iter().find(|b| b.opcode == opcode)
}

pub fn count_opcode(blocks: &[Block], opcode: &str) -> usize {
    blocks
        .iter()
        .map(|b| {
            let nested: usize = b
                .args
                .iter()
                .map(|arg| match arg {
                    BlockValue::Stack(sub) => count_opcode(sub, opcode),
                    _ => 0,
                })
                .sum();
            nested + usize::from(b.opcode == opcode)
        })
        .sum()
}

/// Nesting depth of reporters under a value; plain literals count 0.
pub fn reporter_depth(value: &BlockValue) -> usize {
    match value {
        BlockValue::Reporter(block) => {
            1 + block.args.iter().map(reporter_depth).max().unwrap_or(0)
        }
        _ => 0,
    }
}

/// Literal leaves of a reporter tree, left to right.
pub fn literal_leaves(value: &BlockValue, out: &mut Vec<BlockValue>) {
    match value {
        BlockValue::Reporter(block) => {
            for arg in &block.args {
                literal_leaves(arg, out);
            }
        }
        other => out.push(other.clone()),
    }
}

pub fn number_leaves(value: &BlockValue) -> Vec<f64> {
    let mut raw = Vec::new();
    literal_leaves(value, &mut raw);
    raw.iter()
        .filter_map(|v| match v {
            BlockValue::Number(n) => Some(*n),
            _ => None,
        })
        .collect()
}

/// The value written by the first global-variable assignment of the
/// first script.
pub fn assigned_value(source: &str) -> BlockValue {
    let project = lower(source);
    let set = find_opcode(first_script(&project), "setVar:to:")
        .expect("a variable write")
        .clone();
    set.args[1].clone()
}
