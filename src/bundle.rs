use crate::canvas::Canvas;
use crate::checker::GradeReport;
use crate::codegen::{generate_with_options, source_digest, CodegenOptions};
use crate::document;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipArchive;

const BUNDLE_FORMAT: &str = "blockcode-submission";
const BUNDLE_VERSION: u64 = 1;

/// Contents of a submission bundle after it has been read back and verified.
#[derive(Debug)]
pub struct Submission {
    pub canvas: Canvas,
    pub source: String,
    pub digest: String,
    pub report: Option<Value>,
}

pub fn write_bundle_file(canvas: &Canvas, report: Option<&GradeReport>, output_path: &Path) -> Result<()> {
    let bytes = build_bundle_bytes(canvas, report)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, bytes)
        .with_context(|| format!("Failed to write bundle '{}'.", output_path.display()))?;
    Ok(())
}

pub fn build_bundle_bytes(canvas: &Canvas, report: Option<&GradeReport>) -> Result<Vec<u8>> {
    let program = generate_with_options(canvas, &CodegenOptions::default());
    let mut out = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut out);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "version": BUNDLE_VERSION,
        "digest": program.digest(),
        "blocks": canvas.len(),
        "variables": program.variables,
        "has_report": report.is_some(),
    });

    zip.start_file("manifest.json", opts)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    zip.start_file("canvas.json", opts)?;
    zip.write_all(document::save_json(canvas)?.as_bytes())?;

    zip.start_file("main.py", opts)?;
    zip.write_all(program.source.as_bytes())?;

    if let Some(report) = report {
        zip.start_file("report.json", opts)?;
        zip.write_all(serde_json::to_string_pretty(&report.to_json())?.as_bytes())?;
    }

    zip.finish()?;
    Ok(out.into_inner())
}

pub fn read_bundle_file(path: &Path) -> Result<Submission> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read '{}'.", path.display()))?;
    read_bundle_bytes(&bytes)
}

/// Reads a bundle and checks that `main.py` still matches both the manifest digest and the
/// source regenerated from `canvas.json`.
pub fn read_bundle_bytes(bytes: &[u8]) -> Result<Submission> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))
        .map_err(|_| anyhow!("Input is not a valid submission bundle."))?;

    let manifest_text = read_zip_entry_text(&mut zip, "manifest.json")?;
    let canvas_text = read_zip_entry_text(&mut zip, "canvas.json")?;
    let source = read_zip_entry_text(&mut zip, "main.py")?;

    let manifest: Value =
        serde_json::from_str(&manifest_text).context("Invalid manifest.json in bundle.")?;
    let format = manifest
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if format != BUNDLE_FORMAT {
        bail!("Invalid bundle format '{}'.", format);
    }
    let version = manifest
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    if version != BUNDLE_VERSION {
        bail!(
            "Unsupported bundle version {} (expected {}).",
            version,
            BUNDLE_VERSION
        );
    }

    let digest = manifest
        .get("digest")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("manifest.json is missing 'digest'."))?
        .to_string();
    let actual = source_digest(&source);
    if actual != digest {
        bail!("Bundle digest mismatch: manifest says {}, main.py hashes to {}.", digest, actual);
    }

    let canvas = document::load_json(&canvas_text).context("Invalid canvas.json in bundle.")?;
    let regenerated = generate_with_options(&canvas, &CodegenOptions::default());
    if regenerated.source != source {
        bail!("main.py in bundle does not match the source generated from canvas.json.");
    }

    let report = if manifest.get("has_report").and_then(Value::as_bool).unwrap_or(false) {
        let text = read_zip_entry_text(&mut zip, "report.json")?;
        Some(serde_json::from_str(&text).context("Invalid report.json in bundle.")?)
    } else {
        None
    };

    Ok(Submission {
        canvas,
        source,
        digest,
        report,
    })
}

fn read_zip_entry_text<R: Read + std::io::Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = zip
        .by_name(name)
        .with_context(|| format!("Missing '{}' in bundle.", name))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .with_context(|| format!("Failed reading '{}' from bundle.", name))?;
    Ok(text)
}
