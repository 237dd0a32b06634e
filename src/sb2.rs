//! In-memory model of the produced project and its serialization:
//! blocks are `[opcode, arg, ...]` arrays, scripts are `[x, y, blocks]`
//! triples, and the stage object owns every sprite under `children`.
//! Packaging writes `project.json` plus the md5-named assets into a
//! deflated `.sb2` zip.

use crate::ast::Literal;
use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

#[derive(Debug, Clone, PartialEq)]
pub enum BlockValue {
    Number(f64),
    Text(String),
    Bool(bool),
    /// A nested value-producing block.
    Reporter(Box<Block>),
    /// A substack: the body of a control block.
    Stack(Vec<Block>),
    /// A literal array argument (procedure parameter names, defaults).
    List(Vec<BlockValue>),
}

impl BlockValue {
    pub fn reporter(block: Block) -> Self {
        BlockValue::Reporter(Box::new(block))
    }
}

impl From<&Literal> for BlockValue {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Number(n) => BlockValue::Number(*n),
            Literal::Text(s) => BlockValue::Text(s.clone()),
            Literal::Bool(b) => BlockValue::Bool(*b),
        }
    }
}

impl From<Literal> for BlockValue {
    fn from(literal: Literal) -> Self {
        BlockValue::from(&literal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub opcode: String,
    pub args: Vec<BlockValue>,
}

impl Block {
    pub fn new(opcode: &str, args: Vec<BlockValue>) -> Self {
        Self {
            opcode: opcode.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub x: f64,
    pub y: f64,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: Literal,
}

#[derive(Debug, Clone)]
pub struct List {
    pub name: String,
    pub contents: Vec<Literal>,
}

#[derive(Debug, Clone)]
pub struct Costume {
    pub name: String,
    pub md5ext: String,
    pub center_x: f64,
    pub center_y: f64,
}

/// The stage or one sprite.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub is_stage: bool,
    pub variables: Vec<Variable>,
    pub lists: Vec<List>,
    pub scripts: Vec<Script>,
    pub costumes: Vec<Costume>,
}

impl Target {
    pub fn new(name: &str, is_stage: bool) -> Self {
        Self {
            name: name.to_string(),
            is_stage,
            variables: Vec::new(),
            lists: Vec::new(),
            scripts: Vec::new(),
            costumes: Vec::new(),
        }
    }
}

/// The finished output: stage, sprites, and asset bytes keyed by their
/// md5 name (the map deduplicates shared assets).
#[derive(Debug, Clone)]
pub struct Sb2Project {
    pub stage: Target,
    pub sprites: Vec<Target>,
    pub assets: HashMap<String, Vec<u8>>,
}

/// Renders a number without a trailing `.0` when it is integral, the
/// way the target's own editor saves them.
pub fn number_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn literal_json(literal: &Literal) -> Value {
    match literal {
        Literal::Number(n) => number_json(*n),
        Literal::Text(s) => json!(s),
        Literal::Bool(b) => json!(b),
    }
}

pub fn block_json(block: &Block) -> Value {
    let mut parts = vec![json!(block.opcode)];
    parts.extend(block.args.iter().map(value_json));
    Value::Array(parts)
}

fn value_json(value: &BlockValue) -> Value {
    match value {
        BlockValue::Number(n) => number_json(*n),
        BlockValue::Text(s) => json!(s),
        BlockValue::Bool(b) => json!(b),
        BlockValue::Reporter(block) => block_json(block),
        BlockValue::Stack(blocks) => Value::Array(blocks.iter().map(block_json).collect()),
        BlockValue::List(values) => Value::Array(values.iter().map(value_json).collect()),
    }
}

fn script_json(script: &Script) -> Value {
    json!([
        number_json(script.x),
        number_json(script.y),
        script.blocks.iter().map(block_json).collect::<Vec<_>>(),
    ])
}

fn target_json(target: &Target, index: usize) -> Value {
    let variables = target
        .variables
        .iter()
        .map(|v| {
            json!({
                "name": v.name,
                "value": literal_json(&v.value),
                "isPersistent": false,
            })
        })
        .collect::<Vec<_>>();
    let lists = target
        .lists
        .iter()
        .map(|l| {
            json!({
                "listName": l.name,
                "contents": l.contents.iter().map(literal_json).collect::<Vec<_>>(),
                "isPersistent": false,
                "x": 5,
                "y": 5,
                "width": 480,
                "height": 118,
                "visible": false,
            })
        })
        .collect::<Vec<_>>();
    let costumes = target
        .costumes
        .iter()
        .map(|c| {
            json!({
                "costumeName": c.name,
                "baseLayerID": -1,
                "baseLayerMD5": c.md5ext,
                "bitmapResolution": 1,
                "rotationCenterX": number_json(c.center_x),
                "rotationCenterY": number_json(c.center_y),
            })
        })
        .collect::<Vec<_>>();
    let mut obj = json!({
        "objName": target.name,
        "variables": variables,
        "lists": lists,
        "scripts": target.scripts.iter().map(script_json).collect::<Vec<_>>(),
        "costumes": costumes,
        "currentCostumeIndex": 0,
    });
    let extra = if target.is_stage {
        json!({
            "penLayerID": -1,
            "tempoBPM": 60,
            "videoAlpha": 0.5,
        })
    } else {
        json!({
            "scratchX": 0,
            "scratchY": 0,
            "scale": 1,
            "direction": 90,
            "rotationStyle": "normal",
            "isDraggable": false,
            "indexInLibrary": index,
            "visible": true,
            "spriteInfo": {},
        })
    };
    if let (Value::Object(dst), Value::Object(add)) = (&mut obj, extra) {
        for (key, value) in add {
            dst.insert(key, value);
        }
    }
    obj
}

pub fn project_json(project: &Sb2Project) -> Value {
    let mut stage = target_json(&project.stage, 0);
    let children = project
        .sprites
        .iter()
        .enumerate()
        .map(|(i, sprite)| target_json(sprite, i + 1))
        .collect::<Vec<_>>();
    let script_count: usize = std::iter::once(&project.stage)
        .chain(project.sprites.iter())
        .map(|t| t.scripts.len())
        .sum();
    if let Value::Object(map) = &mut stage {
        map.insert("children".to_string(), Value::Array(children));
        map.insert(
            "info".to_string(),
            json!({
                "spriteCount": project.sprites.len(),
                "scriptCount": script_count,
            }),
        );
    }
    stage
}

pub fn package_sb2(project: &Sb2Project) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut buffer);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("project.json", opts)?;
    let project_bytes = serde_json::to_vec_pretty(&project_json(project))?;
    zip.write_all(&project_bytes)?;

    let mut assets = project.assets.iter().collect::<Vec<_>>();
    assets.sort_by(|(left_name, _), (right_name, _)| left_name.cmp(right_name));
    for (name, bytes) in assets {
        zip.start_file(name, opts)?;
        zip.write_all(bytes)?;
    }
    zip.finish()?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn integral_numbers_serialize_without_fraction() {
        assert_eq!(number_json(4.0), json!(4));
        assert_eq!(number_json(-2.0), json!(-2));
        assert_eq!(number_json(1.5), json!(1.5));
    }

    #[test]
    fn blocks_fold_to_opcode_arrays() {
        let block = Block::new(
            "setVar:to:",
            vec![
                BlockValue::Text("x".to_string()),
                BlockValue::reporter(Block::new(
                    "+",
                    vec![BlockValue::Number(1.0), BlockValue::Number(2.0)],
                )),
            ],
        );
        assert_eq!(block_json(&block), json!(["setVar:to:", "x", ["+", 1, 2]]));
    }

    #[test]
    fn substacks_nest_as_block_arrays() {
        let block = Block::new(
            "doRepeat",
            vec![
                BlockValue::Number(3.0),
                BlockValue::Stack(vec![Block::new("show", vec![])]),
            ],
        );
        assert_eq!(block_json(&block), json!(["doRepeat", 3, [["show"]]]));
    }

    #[test]
    fn stage_holds_sprites_under_children() {
        let mut stage = Target::new("Stage", true);
        stage.variables.push(Variable {
            name: "score".to_string(),
            value: Literal::Number(0.0),
        });
        let mut sprite = Target::new("Cat", false);
        sprite.scripts.push(Script {
            x: 10.0,
            y: 10.0,
            blocks: vec![Block::new("whenGreenFlag", vec![])],
        });
        let project = Sb2Project {
            stage,
            sprites: vec![sprite],
            assets: HashMap::new(),
        };
        let tree = project_json(&project);
        assert_eq!(tree["objName"], json!("Stage"));
        assert_eq!(tree["tempoBPM"], json!(60));
        assert_eq!(tree["children"][0]["objName"], json!("Cat"));
        assert_eq!(tree["children"][0]["indexInLibrary"], json!(1));
        assert_eq!(tree["info"]["scriptCount"], json!(1));
        assert_eq!(
            tree["children"][0]["scripts"][0],
            json!([10, 10, [["whenGreenFlag"]]])
        );
    }

    #[test]
    fn packaged_archive_contains_json_and_assets() {
        let mut assets = HashMap::new();
        assets.insert("abc123.svg".to_string(), b"<svg/>".to_vec());
        let project = Sb2Project {
            stage: Target::new("Stage", true),
            sprites: Vec::new(),
            assets,
        };
        let bytes = package_sb2(&project).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["abc123.svg", "project.json"]);
        let mut text = String::new();
        archive
            .by_name("project.json")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("\"objName\""));
    }
}
