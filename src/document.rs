use crate::ast::{BlockId, BlockKind, OperatorKind, Point, Rect, SlotContent, SlotShape, Statement};
use crate::canvas::Canvas;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Map, Value};
use std::io::Cursor;
use std::path::Path;
use xmltree::{Element, XMLNode};

pub const DOCUMENT_VERSION: u64 = 1;

/// Format-neutral description of one block, built from JSON or XML before touching a canvas.
#[derive(Debug, Clone)]
struct BlockSpec {
    kind: BlockKind,
    name: Option<String>,
    operator: Option<OperatorKind>,
    literal: Option<String>,
    position: Point,
    slots: Vec<(String, SlotSpec)>,
    chain: Vec<BlockSpec>,
}

#[derive(Debug, Clone)]
enum SlotSpec {
    Value {
        literal: String,
        block: Option<Box<BlockSpec>>,
    },
    Statements(Vec<LineSpec>),
}

#[derive(Debug, Clone)]
enum LineSpec {
    Block(BlockSpec),
    Raw(String),
}

struct DocumentSpec {
    bounds: Option<Rect>,
    discard_zone: Option<Rect>,
    blocks: Vec<BlockSpec>,
}

/// Loads a canvas from disk; `.xml` files are read as XML workspaces, anything else as JSON.
pub fn load_path(path: &Path) -> Result<Canvas> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read '{}'.", path.display()))?;
    let is_xml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xml"))
        .unwrap_or(false);
    if is_xml {
        load_xml(&data).with_context(|| format!("Invalid XML canvas '{}'.", path.display()))
    } else {
        let text = String::from_utf8(data)
            .with_context(|| format!("Canvas file '{}' is not UTF-8.", path.display()))?;
        load_json(&text).with_context(|| format!("Invalid JSON canvas '{}'.", path.display()))
    }
}

pub fn load_json(text: &str) -> Result<Canvas> {
    let value: Value = serde_json::from_str(text).context("Canvas document is not valid JSON.")?;
    canvas_from_json(&value)
}

pub fn canvas_from_json(value: &Value) -> Result<Canvas> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("Canvas document must be a JSON object."))?;
    if let Some(version) = obj.get("version").and_then(Value::as_u64) {
        if version > DOCUMENT_VERSION {
            bail!("Unsupported canvas document version {}.", version);
        }
    }
    let blocks = obj
        .get("blocks")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Canvas document requires a 'blocks' array."))?;
    let doc = DocumentSpec {
        bounds: obj.get("bounds").map(rect_from_json).transpose()?,
        discard_zone: match obj.get("discardZone") {
            None | Some(Value::Null) => None,
            Some(v) => Some(rect_from_json(v)?),
        },
        blocks: blocks
            .iter()
            .enumerate()
            .map(|(i, b)| block_from_json(b).with_context(|| format!("In top-level block {}.", i)))
            .collect::<Result<_>>()?,
    };
    build(doc)
}

fn rect_from_json(value: &Value) -> Result<Rect> {
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("Rectangle is missing numeric '{}'.", name))
    };
    Ok(Rect::new(field("x")?, field("y")?, field("width")?, field("height")?))
}

fn block_from_json(value: &Value) -> Result<BlockSpec> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("Block entries must be objects, found {}.", value))?;
    let kind_name = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Block is missing its 'kind'."))?;
    let kind: BlockKind = kind_name.parse().map_err(|e: String| anyhow!(e))?;
    let operator = match obj.get("operator").and_then(Value::as_str) {
        Some(op) => Some(op.parse::<OperatorKind>().map_err(|e| anyhow!(e))?),
        None => None,
    };
    let position = Point::new(
        obj.get("x").and_then(Value::as_f64).unwrap_or(0.0),
        obj.get("y").and_then(Value::as_f64).unwrap_or(0.0),
    );

    let mut slots = Vec::new();
    if let Some(entries) = obj.get("slots") {
        let entries = entries
            .as_object()
            .ok_or_else(|| anyhow!("'slots' of a '{}' block must be an object.", kind))?;
        for (name, content) in entries {
            let spec = slot_from_json(content)
                .with_context(|| format!("In slot '{}' of a '{}' block.", name, kind))?;
            slots.push((name.clone(), spec));
        }
    }

    let chain = match obj.get("chain") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(block_from_json).collect::<Result<_>>()?,
        Some(_) => bail!("'chain' of a '{}' block must be an array.", kind),
    };

    Ok(BlockSpec {
        kind,
        name: obj.get("name").and_then(Value::as_str).map(str::to_string),
        operator,
        literal: obj.get("literal").and_then(Value::as_str).map(str::to_string),
        position,
        slots,
        chain,
    })
}

fn slot_from_json(value: &Value) -> Result<SlotSpec> {
    Ok(match value {
        Value::Array(items) => SlotSpec::Statements(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(_) => block_from_json(item).map(LineSpec::Block),
                    other => Ok(LineSpec::Raw(scalar_text(other))),
                })
                .collect::<Result<_>>()?,
        ),
        Value::Object(obj) if obj.contains_key("kind") => SlotSpec::Value {
            literal: String::new(),
            block: Some(Box::new(block_from_json(value)?)),
        },
        Value::Object(obj) => SlotSpec::Value {
            literal: obj.get("literal").map(scalar_text).unwrap_or_default(),
            block: match obj.get("block") {
                None | Some(Value::Null) => None,
                Some(b) => Some(Box::new(block_from_json(b)?)),
            },
        },
        other => SlotSpec::Value {
            literal: scalar_text(other),
            block: None,
        },
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn load_xml(data: &[u8]) -> Result<Canvas> {
    let root = Element::parse(Cursor::new(data)).map_err(|e| anyhow!("Invalid XML workspace: {}.", e))?;
    if root.name != "canvas" {
        bail!("XML workspace root must be <canvas>, found <{}>.", root.name);
    }
    let bounds = match (
        attr_f64(&root, "width")?,
        attr_f64(&root, "height")?,
    ) {
        (Some(w), Some(h)) => Some(Rect::new(0.0, 0.0, w, h)),
        _ => None,
    };
    let blocks = child_elements(&root)
        .filter(|e| e.name == "block")
        .map(block_from_xml)
        .collect::<Result<_>>()?;
    build(DocumentSpec {
        bounds,
        discard_zone: None,
        blocks,
    })
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

fn attr_f64(element: &Element, name: &str) -> Result<Option<f64>> {
    match element.attributes.get(name) {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| anyhow!("Attribute {}='{}' is not a number.", name, raw)),
        None => Ok(None),
    }
}

fn block_from_xml(element: &Element) -> Result<BlockSpec> {
    let kind_name = element
        .attributes
        .get("kind")
        .ok_or_else(|| anyhow!("<block> is missing its 'kind' attribute."))?;
    let kind: BlockKind = kind_name.parse().map_err(|e: String| anyhow!(e))?;
    let operator = match element.attributes.get("operator") {
        Some(op) => Some(op.parse::<OperatorKind>().map_err(|e| anyhow!(e))?),
        None => None,
    };
    let position = Point::new(
        attr_f64(element, "x")?.unwrap_or(0.0),
        attr_f64(element, "y")?.unwrap_or(0.0),
    );

    let mut slots = Vec::new();
    let mut chain = Vec::new();
    for child in child_elements(element) {
        match child.name.as_str() {
            "slot" => {
                let name = child
                    .attributes
                    .get("name")
                    .ok_or_else(|| anyhow!("<slot> of a '{}' block has no name.", kind))?;
                let nested: Vec<&Element> = child_elements(child).filter(|e| e.name == "block").collect();
                let literal = child.get_text().map(|t| t.trim().to_string()).unwrap_or_default();
                let spec = if child.attributes.get("shape").map(String::as_str) == Some("statement")
                    || nested.len() > 1
                {
                    SlotSpec::Statements(
                        child_elements(child)
                            .map(|line| match line.name.as_str() {
                                "block" => block_from_xml(line).map(LineSpec::Block),
                                "line" => Ok(LineSpec::Raw(
                                    line.get_text().map(|t| t.into_owned()).unwrap_or_default(),
                                )),
                                other => bail!("Unexpected <{}> inside statement slot '{}'.", other, name),
                            })
                            .collect::<Result<_>>()?,
                    )
                } else {
                    SlotSpec::Value {
                        literal,
                        block: match nested.first() {
                            Some(b) => Some(Box::new(block_from_xml(b)?)),
                            None => None,
                        },
                    }
                };
                slots.push((name.clone(), spec));
            }
            "chain" => {
                for connector in child_elements(child).filter(|e| e.name == "block") {
                    chain.push(block_from_xml(connector)?);
                }
            }
            other => bail!("Unexpected <{}> inside a '{}' block.", other, kind),
        }
    }

    Ok(BlockSpec {
        kind,
        name: element.attributes.get("name").cloned(),
        operator,
        literal: element.attributes.get("literal").cloned(),
        position,
        slots,
        chain,
    })
}

fn build(doc: DocumentSpec) -> Result<Canvas> {
    let mut canvas = match doc.bounds {
        Some(bounds) => Canvas::with_bounds(bounds),
        None => Canvas::new(),
    };
    canvas.discard_zone = doc.discard_zone;
    for spec in &doc.blocks {
        if !spec.kind.is_statement_shaped() {
            bail!("A '{}' block cannot sit directly on the canvas.", spec.kind);
        }
        let id = canvas.instantiate(spec.kind, spec.position);
        fill(&mut canvas, id, spec)?;
    }
    canvas.drain_events();
    Ok(canvas)
}

fn fill(canvas: &mut Canvas, id: BlockId, spec: &BlockSpec) -> Result<()> {
    if let Some(name) = &spec.name {
        canvas.set_name(id, name)?;
    }
    if let Some(operator) = spec.operator {
        canvas.set_operator(id, operator)?;
    }
    if spec.literal.is_some() {
        canvas.set_literal_override(id, spec.literal.as_deref())?;
    }

    for (name, slot_spec) in &spec.slots {
        let slot = canvas
            .slot_named(id, name)
            .ok_or_else(|| anyhow!("A '{}' block has no slot named '{}'.", spec.kind, name))?;
        let shape = canvas
            .slot(slot)
            .map(|s| s.shape())
            .ok_or_else(|| anyhow!("Slot '{}' vanished while loading.", name))?;
        match (slot_spec, shape) {
            (SlotSpec::Value { literal, block }, SlotShape::Value) => {
                canvas.set_literal(slot, literal)?;
                if let Some(child) = block {
                    let (child_id, _) = canvas.instantiate_into(child.kind, slot)?;
                    fill(canvas, child_id, child)?;
                }
            }
            (SlotSpec::Statements(lines), SlotShape::Statement) => {
                for line in lines {
                    match line {
                        LineSpec::Block(child) => {
                            let (child_id, _) = canvas.instantiate_into(child.kind, slot)?;
                            fill(canvas, child_id, child)?;
                        }
                        LineSpec::Raw(text) => {
                            canvas.push_raw_statement(slot, text)?;
                        }
                    }
                }
            }
            (SlotSpec::Value { block: None, literal }, SlotShape::Statement) if literal.is_empty() => {}
            _ => bail!(
                "Slot '{}' of a '{}' block has the wrong shape in the document.",
                name,
                spec.kind
            ),
        }
    }

    for connector in &spec.chain {
        if !connector.kind.is_connector() {
            bail!("Only elif/else blocks can be chained, found '{}'.", connector.kind);
        }
        let connector_id = canvas.instantiate(connector.kind, spec.position);
        canvas.attach_connector(connector_id, id)?;
        fill(canvas, connector_id, connector)?;
    }
    Ok(())
}

pub fn to_json(canvas: &Canvas) -> Value {
    let blocks: Vec<Value> = canvas
        .free_blocks()
        .iter()
        .filter_map(|id| block_to_json(canvas, *id, true))
        .collect();
    json!({
        "version": DOCUMENT_VERSION,
        "bounds": rect_to_json(canvas.bounds),
        "discardZone": canvas.discard_zone.map(rect_to_json),
        "blocks": blocks,
    })
}

pub fn save_json(canvas: &Canvas) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_json(canvas))?)
}

fn rect_to_json(rect: Rect) -> Value {
    json!({"x": rect.x, "y": rect.y, "width": rect.width, "height": rect.height})
}

fn block_to_json(canvas: &Canvas, id: BlockId, root: bool) -> Option<Value> {
    let block = canvas.block(id)?;
    let mut obj = Map::new();
    obj.insert("kind".to_string(), json!(block.kind.as_str()));
    if !block.name.is_empty() {
        obj.insert("name".to_string(), json!(block.name));
    }
    if let Some(op) = block.operator {
        obj.insert("operator".to_string(), json!(op.as_str()));
    }
    if let Some(literal) = &block.literal {
        obj.insert("literal".to_string(), json!(literal));
    }
    if root {
        obj.insert("x".to_string(), json!(block.position.x));
        obj.insert("y".to_string(), json!(block.position.y));
    }
    let mut slots = Map::new();
    for slot in &block.slots {
        let content = match &slot.content {
            SlotContent::Value { child: None, literal } => json!(literal),
            SlotContent::Value {
                child: Some(child),
                literal,
            } => json!({
                "literal": literal,
                "block": block_to_json(canvas, *child, false),
            }),
            SlotContent::Statements(entries) => Value::Array(
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Statement::Block(c) => block_to_json(canvas, *c, false),
                        Statement::Raw(text) => Some(json!(text)),
                    })
                    .collect(),
            ),
        };
        slots.insert(slot.name.to_string(), content);
    }
    obj.insert("slots".to_string(), Value::Object(slots));
    if !block.chain.is_empty() {
        let chain: Vec<Value> = block
            .chain
            .iter()
            .filter_map(|c| block_to_json(canvas, *c, false))
            .collect();
        obj.insert("chain".to_string(), Value::Array(chain));
    }
    Some(Value::Object(obj))
}

/// Writes the canvas as an XML workspace readable by [`load_xml`].
pub fn to_xml(canvas: &Canvas) -> Result<String> {
    let mut root = Element::new("canvas");
    root.attributes
        .insert("width".to_string(), canvas.bounds.width.to_string());
    root.attributes
        .insert("height".to_string(), canvas.bounds.height.to_string());
    for id in canvas.free_blocks() {
        if let Some(element) = block_to_xml(canvas, *id, true) {
            root.children.push(XMLNode::Element(element));
        }
    }
    let mut out = Vec::new();
    root.write(&mut out)?;
    Ok(String::from_utf8(out)?)
}

fn block_to_xml(canvas: &Canvas, id: BlockId, root: bool) -> Option<Element> {
    let block = canvas.block(id)?;
    let mut element = Element::new("block");
    element
        .attributes
        .insert("kind".to_string(), block.kind.as_str().to_string());
    if !block.name.is_empty() {
        element.attributes.insert("name".to_string(), block.name.clone());
    }
    if let Some(op) = block.operator {
        element
            .attributes
            .insert("operator".to_string(), op.as_str().to_string());
    }
    if let Some(literal) = &block.literal {
        element.attributes.insert("literal".to_string(), literal.clone());
    }
    if root {
        element
            .attributes
            .insert("x".to_string(), block.position.x.to_string());
        element
            .attributes
            .insert("y".to_string(), block.position.y.to_string());
    }
    for slot in &block.slots {
        let mut slot_element = Element::new("slot");
        slot_element
            .attributes
            .insert("name".to_string(), slot.name.to_string());
        match &slot.content {
            SlotContent::Value { child, literal } => {
                if !literal.is_empty() {
                    slot_element.children.push(XMLNode::Text(literal.clone()));
                }
                if let Some(nested) = child.and_then(|c| block_to_xml(canvas, c, false)) {
                    slot_element.children.push(XMLNode::Element(nested));
                }
            }
            SlotContent::Statements(entries) => {
                slot_element
                    .attributes
                    .insert("shape".to_string(), "statement".to_string());
                for entry in entries {
                    let nested = match entry {
                        Statement::Block(c) => block_to_xml(canvas, *c, false),
                        Statement::Raw(text) => {
                            let mut line = Element::new("line");
                            if !text.is_empty() {
                                line.children.push(XMLNode::Text(text.clone()));
                            }
                            Some(line)
                        }
                    };
                    if let Some(nested) = nested {
                        slot_element.children.push(XMLNode::Element(nested));
                    }
                }
            }
        }
        element.children.push(XMLNode::Element(slot_element));
    }
    if !block.chain.is_empty() {
        let mut chain = Element::new("chain");
        for connector in block.chain.iter().filter_map(|c| block_to_xml(canvas, *c, false)) {
            chain.children.push(XMLNode::Element(connector));
        }
        element.children.push(XMLNode::Element(chain));
    }
    Some(element)
}
