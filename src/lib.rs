pub mod assets;
pub mod ast;
pub mod builder;
pub mod builtins;
pub mod chp;
pub mod codegen;
pub mod errors;
pub mod includes;
pub mod lexer;
pub mod parser;
pub mod sb2;
pub mod scope;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

use anyhow::{bail, Result};
use ast::Position;
use codegen::CompileOptions;
use errors::{CompileError, Diagnostics, ErrorKind};
use std::path::{Path, PathBuf};

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

/// Drives the whole pipeline over any number of injected source files.
/// Diagnostics accumulate across every phase; a phase with errors on
/// record stops the later phases from running.
#[derive(Default)]
pub struct Compiler {
    project: ast::Project,
    diags: Diagnostics,
    options: CompileOptions,
    linked: bool,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler::default()
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Compiler {
            options,
            ..Compiler::default()
        }
    }

    /// Lexes, parses, and registers one source file. A front-end failure
    /// becomes a diagnostic and the file is skipped; later files still
    /// load so their errors surface in the same run.
    pub fn inject_code(&mut self, name: &str, source: &str) {
        let file = self.diags.add_file(name, source);
        let tokens = match lexer::tokenize(source, file) {
            Ok(tokens) => tokens,
            Err(err) => {
                let kind = if err.message.starts_with("Unexpected character") {
                    ErrorKind::TokenRecognitionError
                } else {
                    ErrorKind::GenericLexerError
                };
                self.diags.report(kind, err.message, err.pos);
                return;
            }
        };
        match parser::parse(tokens) {
            Ok(tree) => builder::build_file(&tree, &mut self.project, &mut self.diags),
            Err(err) => self.diags.report(err.kind, err.message, err.pos),
        }
    }

    /// Resolves imports and lowers the project to its serializable form.
    /// Returns `None` when any phase so far has reported errors.
    pub fn compile(&mut self) -> Option<sb2::Sb2Project> {
        if self.diags.has_errors() {
            return None;
        }
        if !self.linked {
            builder::link_imports(&mut self.project, &mut self.diags);
            self.linked = true;
        }
        if self.diags.has_errors() {
            return None;
        }
        Some(codegen::lower_project(
            &self.project,
            &mut self.diags,
            &self.options,
        ))
    }

    /// Compiles and attaches costume assets in one call. `base_dir` is
    /// the directory costume paths resolve against; `None` loads no
    /// files and every target falls back to the placeholder image.
    pub fn finish(&mut self, base_dir: Option<&Path>) -> Option<sb2::Sb2Project> {
        let mut lowered = self.compile()?;
        assets::attach_costumes(
            &self.project,
            &mut lowered,
            base_dir,
            &mut self.diags,
            &self.options,
        );
        if self.diags.has_errors() {
            return None;
        }
        Some(lowered)
    }

    /// Gathers every source file named by `input`, either a single `.ch`
    /// file (plus its `#include` chain) or a `.chp` manifest, and injects
    /// them in order. Returns the directory costumes resolve against.
    pub fn load_entry(&mut self, input: &Path) -> Result<PathBuf> {
        let is_manifest = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("chp"))
            .unwrap_or(false);
        if !is_manifest {
            for file in includes::gather(input)? {
                self.inject_code(&file.display, &file.source);
            }
            let base = input.parent().map(Path::to_path_buf).unwrap_or_default();
            return Ok(base);
        }

        let manifest = chp::load_manifest(input)?;
        let file = self.diags.add_file(&input.display().to_string(), &manifest.text);
        let pos = Position {
            file,
            line: 1,
            column: 1,
            start: 0,
            stop: 0,
        };
        let dir = manifest.dir().to_path_buf();
        // One gatherer for the whole manifest, so a header included from
        // several listed files still compiles exactly once.
        let mut gatherer = includes::Gatherer::new(&dir)?;
        for source in &manifest.sources {
            let path = dir.join(source);
            if !path.is_file() {
                self.diags.report(
                    ErrorKind::FileNotFound,
                    format!(
                        "Source file '{}' listed in the project was not found.",
                        source
                    ),
                    pos,
                );
                continue;
            }
            gatherer.add(&path)?;
        }
        for file in gatherer.finish() {
            self.inject_code(&file.display, &file.source);
        }
        Ok(dir)
    }

    pub fn project(&self) -> &ast::Project {
        &self.project
    }

    pub fn errors(&self) -> &[CompileError] {
        self.diags.errors()
    }

    pub fn error_count(&self) -> usize {
        self.diags.error_count()
    }

    /// Every recorded error rendered with source lines and carets.
    pub fn render_errors(&self) -> String {
        self.diags.render_all()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let total_stages = 3
        + usize::from(args.emit_json.is_some())
        + usize::from(args.output.is_some());
    let progress = CliProgress::new("Compile", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Resolving input path");
    let input = canonicalize_file(&args.input)?;

    stage += 1;
    progress.emit(stage, "Gathering sources");
    let mut compiler = Compiler::with_options(CompileOptions {
        scale_svgs: !args.no_svg_scale,
        ..CompileOptions::default()
    });
    let base_dir = compiler.load_entry(&input)?;

    stage += 1;
    progress.emit(stage, "Compiling");
    let lowered = match compiler.finish(Some(&base_dir)) {
        Some(lowered) => lowered,
        None => {
            eprintln!("{}", compiler.render_errors());
            bail!("{} error(s) found.", compiler.error_count());
        }
    };

    if let Some(emit_path) = &args.emit_json {
        stage += 1;
        progress.emit(stage, "Writing project.json");
        let json = serde_json::to_vec_pretty(&sb2::project_json(&lowered))?;
        std::fs::write(emit_path, json)?;
    }

    if let Some(output) = &args.output {
        stage += 1;
        progress.emit(stage, "Building .sb2");
        let bytes = sb2::package_sb2(&lowered)?;
        std::fs::write(output, bytes)?;
    }

    Ok(())
}

/// Compiles a `.ch` source file or `.chp` manifest into `.sb2` bytes.
pub fn compile_entry_to_sb2_bytes(input: &Path, options: CompileOptions) -> Result<Vec<u8>> {
    let input = canonicalize_file(input)?;
    let mut compiler = Compiler::with_options(options);
    let base_dir = compiler.load_entry(&input)?;
    match compiler.finish(Some(&base_dir)) {
        Some(lowered) => sb2::package_sb2(&lowered),
        None => bail!("{}", compiler.render_errors()),
    }
}

/// Compiles one in-memory source string into `.sb2` bytes. Costume
/// paths resolve against `base_dir` when given; without it every target
/// gets the placeholder costume.
pub fn compile_source_to_sb2_bytes(
    source: &str,
    base_dir: Option<&Path>,
    options: CompileOptions,
) -> Result<Vec<u8>> {
    let mut compiler = Compiler::with_options(options);
    compiler.inject_code("input.ch", source);
    match compiler.finish(base_dir) {
        Some(lowered) => sb2::package_sb2(&lowered),
        None => bail!("{}", compiler.render_errors()),
    }
}

pub fn canonicalize_file(path: &Path) -> Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!(
            "Input file not found: '{}'.",
            path.display()
        ));
    }
    Ok(path.canonicalize()?)
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize) -> Self {
        Self {
            prefix,
            total: total.max(1),
        }
    }

    fn emit(&self, step: usize, label: &str) {
        let step = step.clamp(1, self.total);
        let bar = render_progress_bar(step, self.total, 14);
        eprintln!(
            "[{}] {}... ({}/{}) {}",
            self.prefix, label, step, self.total, bar
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexer_failures_become_diagnostics() {
        let mut compiler = Compiler::new();
        compiler.inject_code("bad.ch", "sprite S { void M() { num x = 1 ` 2; } }");
        assert!(compiler.compile().is_none());
        assert_eq!(compiler.errors()[0].kind, ErrorKind::TokenRecognitionError);
    }

    #[test]
    fn parser_failures_keep_their_kind() {
        let mut compiler = Compiler::new();
        compiler.inject_code("bad.ch", "sprite S { void M( { } }");
        assert!(compiler.compile().is_none());
        assert!(!compiler.errors().is_empty());
    }

    #[test]
    fn a_clean_project_compiles_and_counts_nothing() {
        let mut compiler = Compiler::new();
        compiler.inject_code("main.ch", "sprite S { void M() { Say(\"hi\"); } }");
        let lowered = compiler.compile();
        assert!(lowered.is_some());
        assert_eq!(compiler.error_count(), 0);
    }

    #[test]
    fn errors_in_one_file_do_not_hide_the_next() {
        let mut compiler = Compiler::new();
        compiler.inject_code("bad.ch", "sprite S { void M( { } }");
        compiler.inject_code("worse.ch", "sprite T { void M() { num x = 1 ` 2; } }");
        assert!(compiler.error_count() >= 2);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn render_progress_bar_fills_left_to_right() {
        assert_eq!(render_progress_bar(1, 2, 4), "[==--]");
        assert_eq!(render_progress_bar(2, 2, 4), "[====]");
    }
}
