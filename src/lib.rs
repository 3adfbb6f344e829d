pub mod ast;
pub mod bundle;
pub mod canvas;
pub mod checker;
pub mod codegen;
pub mod document;
pub mod layout;
pub mod literal;
pub mod nesting;
pub mod placement;
pub mod session;
pub mod templates;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(not(target_arch = "wasm32"))]
pub mod python_backend;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

use anyhow::Result;
use checker::Requirements;
use std::path::{Path, PathBuf};

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let grading_flags = args.expected.is_some()
        || !args.require.is_empty()
        || args.requirements.is_some()
        || args.report_json.is_some();
    if grading_flags && !args.run {
        anyhow::bail!("--expected, --require, --requirements and --report-json require --run.");
    }
    if args.requirements.is_some() && (args.expected.is_some() || !args.require.is_empty()) {
        anyhow::bail!("--requirements cannot be combined with --expected or --require.");
    }

    let total_stages = 3
        + usize::from(args.emit.is_some())
        + usize::from(args.run)
        + usize::from(args.report_json.is_some())
        + usize::from(args.bundle.is_some());
    let progress = CliProgress::new("Blocks", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Resolving input path");
    let input = canonicalize_file(&args.input)?;

    stage += 1;
    progress.emit(stage, "Loading canvas");
    let canvas = document::load_path(&input)?;

    stage += 1;
    progress.emit(stage, "Generating source");
    let program = codegen::generate_with_options(&canvas, &codegen::CodegenOptions::default());

    if let Some(emit_path) = &args.emit {
        stage += 1;
        progress.emit(stage, "Writing generated source");
        std::fs::write(emit_path, program.source.as_bytes())?;
    } else if !args.run {
        print!("{}", program.source);
    }

    let mut report = None;
    if args.run {
        stage += 1;
        progress.emit(stage, "Running and grading");
        let requirements = match &args.requirements {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}.", path.display(), e))?;
                Requirements::from_json(&text)?
            }
            None => Requirements {
                expected_output: args.expected.clone(),
                required_kinds: args.require.clone(),
            },
        };
        let interpreter = python_backend::PythonInterpreter::new(
            args.python.clone(),
            std::time::Duration::from_millis(args.timeout_ms),
        );
        let graded = checker::check(&canvas, &requirements, &interpreter)?;
        print!("{}", graded.stdout);
        if !graded.stderr.is_empty() {
            eprint!("{}", graded.stderr);
        }
        eprintln!("{}", graded.summary());
        report = Some(graded);
    }

    if let (Some(path), Some(graded)) = (&args.report_json, &report) {
        stage += 1;
        progress.emit(stage, "Writing grading report");
        std::fs::write(path, serde_json::to_string_pretty(&graded.to_json())?)?;
    }

    if let Some(path) = &args.bundle {
        stage += 1;
        progress.emit(stage, "Writing submission bundle");
        bundle::write_bundle_file(&canvas, report.as_ref(), path)?;
    }

    match report {
        Some(graded) if !graded.passed() => anyhow::bail!("Submission did not pass grading."),
        _ => Ok(()),
    }
}

/// Loads a JSON canvas document and returns its generated source.
pub fn generate_source_from_json(canvas_json: &str) -> Result<String> {
    let canvas = document::load_json(canvas_json)?;
    Ok(codegen::generate(&canvas))
}

pub fn canonicalize_file(path: &Path) -> Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!("Input file not found: '{}'.", path.display()));
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
        let total = self.total;
        let step = step.clamp(1, total);
        let bar = render_progress_bar(step, total, 14);
        eprintln!("[{}] {}... ({}/{}) {}", self.prefix, label, step, total, bar);
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
    use pretty_assertions::assert_eq;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(render_progress_bar(1, 4, 8), "[==------]");
        assert_eq!(render_progress_bar(4, 4, 8), "[========]");
    }

    #[test]
    fn generate_from_json_document() {
        let doc = r#"{"blocks":[{"kind":"print","slots":{"value":"Hello!"}}]}"#;
        assert_eq!(generate_source_from_json(doc).unwrap(), "print(\"Hello!\")\n");
    }

    #[test]
    fn missing_input_is_reported() {
        let err = canonicalize_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("Input file not found"));
    }
}
