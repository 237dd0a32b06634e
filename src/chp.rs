//! Project manifests.
//!
//! A `.chp` file is a small JSON document naming the project and
//! listing the source files to compile, in order, relative to the
//! manifest's own directory.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Manifest {
    /// Project name; falls back to the manifest's file stem.
    pub name: String,
    /// Source files, relative to [`Manifest::dir`].
    pub sources: Vec<String>,
    pub path: PathBuf,
    /// Raw manifest text, kept for diagnostics against the manifest.
    pub text: String,
}

impl Manifest {
    /// Directory the source entries resolve against.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not read project file '{}'.", path.display()))?;
    let root: Value = serde_json::from_str(&text)
        .with_context(|| format!("Project file '{}' is not valid JSON.", path.display()))?;
    let name = match root.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("project")
            .to_string(),
    };
    let entries = root
        .get("sources")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            anyhow!(
                "Project file '{}' needs a 'sources' list.",
                path.display()
            )
        })?;
    let sources = entries
        .iter()
        .map(|entry| {
            entry.as_str().map(str::to_string).ok_or_else(|| {
                anyhow!(
                    "Project file '{}': every source entry must be a string.",
                    path.display()
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Manifest {
        name,
        sources,
        path: path.to_path_buf(),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_at(dir: &Path, name: &str, text: &str) -> Manifest {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        load_manifest(&path).unwrap()
    }

    #[test]
    fn well_formed_manifest_loads() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_at(
            dir.path(),
            "game.chp",
            r#"{"name": "Space Game", "sources": ["main.ch", "enemies.ch"]}"#,
        );
        assert_eq!(manifest.name, "Space Game");
        assert_eq!(manifest.sources, ["main.ch", "enemies.ch"]);
        assert_eq!(manifest.dir(), dir.path());
    }

    #[test]
    fn missing_name_falls_back_to_the_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_at(dir.path(), "rocket.chp", r#"{"sources": []}"#);
        assert_eq!(manifest.name, "rocket");
    }

    #[test]
    fn invalid_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.chp");
        fs::write(&path, "{not json").unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"), "{}", err);
    }

    #[test]
    fn sources_must_be_a_list_of_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.chp");
        fs::write(&path, r#"{"sources": "main.ch"}"#).unwrap();
        assert!(load_manifest(&path).is_err());
        fs::write(&path, r#"{"sources": [1]}"#).unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert!(err.to_string().contains("must be a string"), "{}", err);
    }
}
