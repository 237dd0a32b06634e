//! Gathering of `#include`-connected source files.
//!
//! An include directive names another source file relative to the
//! including file. Gathering walks the directives depth-first so
//! included declarations come first, keeps only the first visit of
//! each file, and blanks the directive lines so every surviving line
//! keeps the number it has on disk. Each file stays a separate
//! compilation unit for error attribution.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One source file of the compilation, in gather order.
#[derive(Debug, Clone)]
pub struct GatheredFile {
    /// Canonical on-disk location.
    pub path: PathBuf,
    /// Name used in diagnostics, relative to the entry directory when
    /// the file sits under it.
    pub display: String,
    /// Source text with include directives blanked out.
    pub source: String,
}

/// Collects one entry file and everything it includes, transitively.
pub fn gather(entry: &Path) -> Result<Vec<GatheredFile>> {
    let canonical = entry
        .canonicalize()
        .map_err(|_| anyhow!("Input file not found: '{}'.", entry.display()))?;
    let base = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut gatherer = Gatherer::new(&base)?;
    gatherer.add(&canonical)?;
    Ok(gatherer.finish())
}

/// Walks include chains for any number of entry files while sharing
/// one visited set, so a header pulled in by several entries still
/// lands in the compilation exactly once.
pub struct Gatherer {
    base: PathBuf,
    include_re: Regex,
    visited: HashSet<PathBuf>,
    stack: Vec<PathBuf>,
    files: Vec<GatheredFile>,
}

impl Gatherer {
    /// `base` is the directory display names render relative to.
    pub fn new(base: &Path) -> Result<Self> {
        Ok(Gatherer {
            base: base.to_path_buf(),
            include_re: Regex::new(r#"^\s*#include\s+"([^"\r\n]+)"\s*(?://.*)?$"#)?,
            visited: HashSet::new(),
            stack: Vec::new(),
            files: Vec::new(),
        })
    }

    pub fn add(&mut self, entry: &Path) -> Result<()> {
        let canonical = entry
            .canonicalize()
            .map_err(|_| anyhow!("Input file not found: '{}'.", entry.display()))?;
        self.run(&canonical)
    }

    pub fn finish(self) -> Vec<GatheredFile> {
        self.files
    }

    fn run(&mut self, path: &Path) -> Result<()> {
        if self.stack.iter().any(|p| p == path) {
            let mut chain: Vec<String> = self
                .stack
                .iter()
                .map(|p| display_name(p, &self.base))
                .collect();
            chain.push(display_name(path, &self.base));
            bail!("Circular include chain: {}.", chain.join(" -> "));
        }
        if !self.visited.insert(path.to_path_buf()) {
            return Ok(());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Could not read source file '{}'.", path.display()))?;
        let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

        self.stack.push(path.to_path_buf());
        let mut kept: Vec<&str> = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let target = self
                .include_re
                .captures(line)
                .map(|caps| caps[1].trim().to_string());
            match target {
                Some(target) => {
                    let child = path
                        .parent()
                        .unwrap_or_else(|| Path::new("."))
                        .join(&target)
                        .canonicalize()
                        .map_err(|_| {
                            anyhow!(
                                "Included file '{}' was not found (from '{}', line {}).",
                                target,
                                display_name(path, &self.base),
                                idx + 1
                            )
                        })?;
                    self.run(&child)?;
                    // The blank line keeps later line numbers true.
                    kept.push("");
                }
                None => kept.push(line),
            }
        }
        self.stack.pop();

        self.files.push(GatheredFile {
            path: path.to_path_buf(),
            display: display_name(path, &self.base),
            source: kept.join("\n"),
        });
        Ok(())
    }
}

fn display_name(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(relative) => relative.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
