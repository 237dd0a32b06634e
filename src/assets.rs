//! Costume loading and asset collection.
//!
//! Runs after lowering: declared costume files are read from the
//! compilation's source directory, hashed, and stored in the shared
//! asset map under `{md5}.{ext}`, which deduplicates identical bytes.
//! Targets that end up with no costume get a built-in placeholder SVG
//! so the packaged project still opens in the editor.

use crate::ast::{CostumeDecl, Project};
use crate::codegen::CompileOptions;
use crate::errors::{Diagnostics, ErrorKind};
use crate::sb2::{Costume, Sb2Project, Target};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use xmltree::{Element, XMLNode};

const PLACEHOLDER_SVG: &str =
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1" viewBox="0 0 1 1"></svg>"##;

/// Side length SVGs are normalized to when scaling is on.
const SVG_TARGET_SIZE: f64 = 64.0;

struct LoadedCostume {
    data: Vec<u8>,
    ext: &'static str,
    stem: String,
    center: (f64, f64),
}

/// Resolves every declared costume and injects placeholders so each
/// target owns at least one. Sprites lower in declaration order, so
/// the two lists line up by index.
pub fn attach_costumes(
    project: &Project,
    lowered: &mut Sb2Project,
    base_dir: Option<&Path>,
    diags: &mut Diagnostics,
    options: &CompileOptions,
) {
    let Sb2Project {
        stage,
        sprites,
        assets,
    } = lowered;
    for (sprite, target) in project.sprites.iter().zip(sprites.iter_mut()) {
        let mut used = HashSet::new();
        for decl in &sprite.costumes {
            if let Some(loaded) = load_costume(decl, base_dir, diags, options) {
                let name = unique_name(&loaded.stem, &mut used);
                push_costume(target, assets, name, loaded.data, loaded.ext, loaded.center);
            }
        }
        ensure_costume(target, assets, options);
    }
    ensure_costume(stage, assets, options);
}

/// Reads and prepares one declared costume. Failures become
/// diagnostics at the declaration site and the costume is skipped.
fn load_costume(
    decl: &CostumeDecl,
    base_dir: Option<&Path>,
    diags: &mut Diagnostics,
    options: &CompileOptions,
) -> Option<LoadedCostume> {
    let path = match base_dir {
        Some(base) => base.join(&decl.file),
        None => Path::new(&decl.file).to_path_buf(),
    };
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) if e.eq_ignore_ascii_case("svg") => "svg",
        Some(e) if e.eq_ignore_ascii_case("png") => "png",
        _ => {
            diags.report(
                ErrorKind::InvalidArgument,
                format!("Costume '{}' must be a .svg or .png file.", decl.file),
                decl.pos,
            );
            return None;
        }
    };
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(_) => {
            diags.report(
                ErrorKind::FileNotFound,
                format!("Costume file '{}' was not found.", decl.file),
                decl.pos,
            );
            return None;
        }
    };
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("costume")
        .to_string();
    if ext == "png" {
        return Some(LoadedCostume {
            data,
            ext,
            stem,
            center: (0.0, 0.0),
        });
    }
    match prepare_svg(&data, &decl.file, options) {
        Ok((data, cx, cy)) => Some(LoadedCostume {
            data,
            ext,
            stem,
            center: (cx, cy),
        }),
        Err(message) => {
            diags.report(ErrorKind::InvalidArgument, message, decl.pos);
            None
        }
    }
}

/// Parses an SVG and reports its rotation center; with scaling on the
/// drawing is rewritten onto a fixed square canvas first.
fn prepare_svg(
    data: &[u8],
    file: &str,
    options: &CompileOptions,
) -> Result<(Vec<u8>, f64, f64), String> {
    let mut root = Element::parse(Cursor::new(data))
        .map_err(|e| format!("Invalid SVG file '{}': {}.", file, e))?;
    let (min_x, min_y, width, height) = svg_bounds(&root, file)?;
    let center = if options.scale_svgs {
        normalize_svg(&mut root, min_x, min_y, width, height);
        (SVG_TARGET_SIZE / 2.0, SVG_TARGET_SIZE / 2.0)
    } else {
        (width / 2.0, height / 2.0)
    };
    let mut out = Vec::new();
    root.write(&mut out)
        .map_err(|e| format!("SVG file '{}' could not be rewritten: {}.", file, e))?;
    Ok((out, center.0, center.1))
}

/// Bounds come from the viewBox when present, else the width/height
/// attributes, else the normalization default.
fn svg_bounds(root: &Element, file: &str) -> Result<(f64, f64, f64, f64), String> {
    if let Some(raw) = root.attributes.get("viewBox") {
        if let Some(bounds) = parse_view_box(raw, file)? {
            return Ok(bounds);
        }
    }
    let width = svg_length(root.attributes.get("width"));
    let height = svg_length(root.attributes.get("height"));
    if let (Some(w), Some(h)) = (width, height) {
        if w > 0.0 && h > 0.0 {
            return Ok((0.0, 0.0, w, h));
        }
    }
    Ok((0.0, 0.0, SVG_TARGET_SIZE, SVG_TARGET_SIZE))
}

/// A viewBox is four numbers split on whitespace or commas; any other
/// shape falls through to the attribute path.
fn parse_view_box(raw: &str, file: &str) -> Result<Option<(f64, f64, f64, f64)>, String> {
    let parts: Vec<&str> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() != 4 {
        return Ok(None);
    }
    let mut nums = [0.0; 4];
    for (slot, part) in nums.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .map_err(|_| format!("Invalid SVG viewBox in '{}': '{}'.", file, raw))?;
    }
    let [min_x, min_y, width, height] = nums;
    if width <= 0.0 || height <= 0.0 {
        return Err(format!(
            "SVG file '{}' needs a positive width and height.",
            file
        ));
    }
    Ok(Some((min_x, min_y, width, height)))
}

/// Leading numeric prefix of a length attribute; units are ignored.
fn svg_length(value: Option<&String>) -> Option<f64> {
    let s = value?.trim();
    let end = s
        .char_indices()
        .take_while(|(i, c)| {
            c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '+' || *c == '-'))
        })
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    s[..end].parse().ok()
}

/// Rewrites the root onto a square canvas, wrapping the original
/// content in a translated and scaled group. Bounds are positive by
/// the time this runs.
fn normalize_svg(root: &mut Element, min_x: f64, min_y: f64, width: f64, height: f64) {
    let transform = format!(
        "translate({} {}) scale({} {})",
        svg_num(-min_x),
        svg_num(-min_y),
        svg_num(SVG_TARGET_SIZE / width),
        svg_num(SVG_TARGET_SIZE / height)
    );
    let mut wrapper = Element::new("g");
    wrapper.prefix = root.prefix.clone();
    wrapper.namespace = root.namespace.clone();
    wrapper
        .attributes
        .insert("transform".to_string(), transform);
    wrapper.children = std::mem::take(&mut root.children);
    let size = svg_num(SVG_TARGET_SIZE);
    root.attributes
        .insert("viewBox".to_string(), format!("0 0 {} {}", size, size));
    root.attributes.insert("width".to_string(), size.clone());
    root.attributes.insert("height".to_string(), size);
    root.children.push(XMLNode::Element(wrapper));
}

fn svg_num(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        (v.round() as i64).to_string()
    } else {
        format!("{:.6}", v)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Costume names stay unique per target, case-insensitively.
fn unique_name(stem: &str, used: &mut HashSet<String>) -> String {
    let base = stem.trim();
    let base = if base.is_empty() { "costume" } else { base };
    let mut candidate = base.to_string();
    let mut suffix = 2usize;
    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{} {}", base, suffix);
        suffix += 1;
    }
    candidate
}

/// Hashes the bytes, stores them in the shared asset map, and records
/// the costume on the target.
fn push_costume(
    target: &mut Target,
    assets: &mut HashMap<String, Vec<u8>>,
    name: String,
    data: Vec<u8>,
    ext: &str,
    center: (f64, f64),
) {
    let digest = format!("{:x}", md5::compute(&data));
    let md5ext = format!("{}.{}", digest, ext);
    assets.entry(md5ext.clone()).or_insert(data);
    target.costumes.push(Costume {
        name,
        md5ext,
        center_x: center.0,
        center_y: center.1,
    });
}

/// Targets left without a usable costume get the placeholder.
fn ensure_costume(
    target: &mut Target,
    assets: &mut HashMap<String, Vec<u8>>,
    options: &CompileOptions,
) {
    if !target.costumes.is_empty() {
        return;
    }
    let name = if target.is_stage {
        "backdrop1"
    } else {
        "costume1"
    };
    let (data, cx, cy) = match prepare_svg(PLACEHOLDER_SVG.as_bytes(), "placeholder", options) {
        Ok(prepared) => prepared,
        Err(_) => (PLACEHOLDER_SVG.as_bytes().to_vec(), 0.0, 0.0),
    };
    push_costume(target, assets, name.to_string(), data, "svg", (cx, cy));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::builder;
    use crate::codegen;
    use crate::lexer;
    use crate::parser;
    use std::io::Write;

    fn lower(source: &str) -> (ast::Project, Sb2Project, Diagnostics) {
        let mut diags = Diagnostics::new();
        let file = diags.add_file("test.ch", source);
        let tokens = lexer::tokenize(source, file).unwrap();
        let tree = parser::parse(tokens).unwrap();
        let mut project = ast::Project::default();
        builder::build_file(&tree, &mut project, &mut diags);
        builder::link_imports(&mut project, &mut diags);
        let lowered = codegen::lower_project(&project, &mut diags, &CompileOptions::default());
        (project, lowered, diags)
    }

    #[test]
    fn bare_targets_share_one_placeholder_asset() {
        let (project, mut lowered, mut diags) = lower("sprite S { void M() { } }");
        attach_costumes(
            &project,
            &mut lowered,
            None,
            &mut diags,
            &CompileOptions::default(),
        );
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        assert_eq!(lowered.stage.costumes[0].name, "backdrop1");
        assert_eq!(lowered.sprites[0].costumes[0].name, "costume1");
        // Identical placeholder bytes hash to one shared asset.
        assert_eq!(lowered.assets.len(), 1);
        assert_eq!(
            lowered.stage.costumes[0].md5ext,
            lowered.sprites[0].costumes[0].md5ext
        );
    }

    #[test]
    fn missing_costume_file_reports_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (project, mut lowered, mut diags) =
            lower("sprite S { costume \"nope.svg\"; void M() { } }");
        attach_costumes(
            &project,
            &mut lowered,
            Some(dir.path()),
            &mut diags,
            &CompileOptions::default(),
        );
        assert_eq!(diags.errors()[0].kind, ErrorKind::FileNotFound);
        assert_eq!(lowered.sprites[0].costumes[0].name, "costume1");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let (project, mut lowered, mut diags) =
            lower("sprite S { costume \"anim.gif\"; void M() { } }");
        attach_costumes(
            &project,
            &mut lowered,
            None,
            &mut diags,
            &CompileOptions::default(),
        );
        assert_eq!(diags.errors()[0].kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn svg_costume_takes_its_stem_and_scaled_center() {
        let dir = tempfile::tempdir().unwrap();
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 20"></svg>"##;
        let mut file = std::fs::File::create(dir.path().join("ship.svg")).unwrap();
        file.write_all(svg.as_bytes()).unwrap();
        let (project, mut lowered, mut diags) =
            lower("sprite S { costume \"ship.svg\"; void M() { } }");
        attach_costumes(
            &project,
            &mut lowered,
            Some(dir.path()),
            &mut diags,
            &CompileOptions::default(),
        );
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let costume = &lowered.sprites[0].costumes[0];
        assert_eq!(costume.name, "ship");
        assert!(costume.md5ext.ends_with(".svg"));
        assert_eq!(costume.center_x, 32.0);
        assert_eq!(costume.center_y, 32.0);
        assert!(lowered.assets.contains_key(&costume.md5ext));
    }

    #[test]
    fn unscaled_svg_centers_on_half_its_view_box() {
        let dir = tempfile::tempdir().unwrap();
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 20"></svg>"##;
        std::fs::write(dir.path().join("ship.svg"), svg).unwrap();
        let (project, mut lowered, mut diags) =
            lower("sprite S { costume \"ship.svg\"; void M() { } }");
        let options = CompileOptions {
            scale_svgs: false,
            ..CompileOptions::default()
        };
        attach_costumes(&project, &mut lowered, Some(dir.path()), &mut diags, &options);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let costume = &lowered.sprites[0].costumes[0];
        assert_eq!(costume.center_x, 5.0);
        assert_eq!(costume.center_y, 10.0);
    }

    #[test]
    fn png_costume_keeps_its_bytes_and_zero_center() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dot.png"), [137u8, 80, 78, 71]).unwrap();
        let (project, mut lowered, mut diags) =
            lower("sprite S { costume \"dot.png\"; void M() { } }");
        attach_costumes(
            &project,
            &mut lowered,
            Some(dir.path()),
            &mut diags,
            &CompileOptions::default(),
        );
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let costume = &lowered.sprites[0].costumes[0];
        assert!(costume.md5ext.ends_with(".png"));
        assert_eq!(costume.center_x, 0.0);
        assert_eq!(
            lowered.assets[&costume.md5ext],
            vec![137u8, 80, 78, 71]
        );
    }

    #[test]
    fn clashing_costume_stems_get_numbered_names() {
        let dir = tempfile::tempdir().unwrap();
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 4 4"></svg>"##;
        std::fs::write(dir.path().join("hero.svg"), svg).unwrap();
        std::fs::create_dir(dir.path().join("alt")).unwrap();
        std::fs::write(dir.path().join("alt").join("hero.svg"), svg).unwrap();
        let (project, mut lowered, mut diags) = lower(
            "sprite S { costume \"hero.svg\"; costume \"alt/hero.svg\"; void M() { } }",
        );
        attach_costumes(
            &project,
            &mut lowered,
            Some(dir.path()),
            &mut diags,
            &CompileOptions::default(),
        );
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let names: Vec<&str> = lowered.sprites[0]
            .costumes
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["hero", "hero 2"]);
        // Same bytes, one stored asset shared by both entries.
        let costumes = &lowered.sprites[0].costumes;
        assert_eq!(costumes[0].md5ext, costumes[1].md5ext);
        // Stage placeholder plus the one deduplicated hero asset.
        assert_eq!(lowered.assets.len(), 2);
    }
}
