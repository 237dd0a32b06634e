use crate::codegen::CompileOptions;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn compile_source_to_sb2(source: &str) -> Result<Vec<u8>, JsValue> {
    compile_source_to_sb2_with_options(source, true)
}

#[wasm_bindgen]
pub fn compile_source_to_sb2_with_options(
    source: &str,
    scale_svgs: bool,
) -> Result<Vec<u8>, JsValue> {
    let options = CompileOptions {
        scale_svgs,
        ..CompileOptions::default()
    };
    crate::compile_source_to_sb2_bytes(source, None, options)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Compiles for diagnostics only; returns the rendered error text, or
/// an empty string when the source is clean.
#[wasm_bindgen]
pub fn check_source(source: &str) -> String {
    let mut compiler = crate::Compiler::new();
    compiler.inject_code("input.ch", source);
    let _ = compiler.finish(None);
    compiler.render_errors()
}
