use crate::ast::BlockKind;
use crate::canvas::Canvas;
use crate::codegen::{generate_with_options, CodegenOptions};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::{debug, info};

/// Grading requirements for one activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub expected_output: Option<String>,
    pub required_kinds: Vec<String>,
}

impl Requirements {
    pub fn new(expected_output: Option<&str>, required_kinds: &[&str]) -> Self {
        Self {
            expected_output: expected_output.map(str::to_string),
            required_kinds: required_kinds.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Reads `{"expectedOutput"?: string, "requiredKinds": [string]}`.
    pub fn from_json(text: &str) -> Result<Self, CheckError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CheckError::InvalidRequirements(e.to_string()))?;
        let obj = value.as_object().ok_or_else(|| {
            CheckError::InvalidRequirements("requirements must be a JSON object".to_string())
        })?;
        let expected_output = match obj.get("expectedOutput") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(CheckError::InvalidRequirements(format!(
                    "expectedOutput must be a string, found {}",
                    other
                )))
            }
        };
        let kinds = obj
            .get("requiredKinds")
            .ok_or(CheckError::MissingRequiredKinds)?
            .as_array()
            .ok_or_else(|| {
                CheckError::InvalidRequirements("requiredKinds must be an array".to_string())
            })?;
        let mut required_kinds = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let name = kind.as_str().ok_or_else(|| {
                CheckError::InvalidRequirements(format!("requiredKinds entry {} is not a string", kind))
            })?;
            required_kinds.push(name.to_string());
        }
        let requirements = Self {
            expected_output,
            required_kinds,
        };
        requirements.resolved_kinds()?;
        Ok(requirements)
    }

    /// Each requested name with the kind it parses to. Names are matched loosely
    /// (`"dowhile"`, `"While"`), and reports echo them back exactly as requested.
    fn resolved_kinds(&self) -> Result<Vec<(BlockKind, &str)>, CheckError> {
        self.required_kinds
            .iter()
            .map(|name| match BlockKind::from_str(name) {
                Ok(kind) => Ok((kind, name.as_str())),
                Err(_) => Err(CheckError::UnknownKind(name.clone())),
            })
            .collect()
    }
}

/// Text captured from one interpreter run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when a stream hit the capture limit and the rest was dropped.
    pub truncated: bool,
}

/// The sandboxed interpreter collaborator.
///
/// Exceptions raised by the program belong in `stderr`. An `Err` means the interpreter itself
/// could not be reached.
pub trait Interpreter {
    fn execute(&self, source: &str) -> Result<ExecutionOutput, InterpreterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    Unavailable(String),
    Io(String),
}

impl Display for InterpreterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpreterError::Unavailable(msg) => write!(f, "Interpreter unavailable: {}", msg),
            InterpreterError::Io(msg) => write!(f, "Interpreter I/O failure: {}", msg),
        }
    }
}

impl Error for InterpreterError {}

/// Tooling failures, as opposed to a wrong answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    MissingRequiredKinds,
    UnknownKind(String),
    InvalidRequirements(String),
    Interpreter(InterpreterError),
}

impl Display for CheckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::MissingRequiredKinds => write!(f, "Requirements are missing 'requiredKinds'."),
            CheckError::UnknownKind(name) => write!(f, "Unknown block kind '{}' in requirements.", name),
            CheckError::InvalidRequirements(msg) => write!(f, "Invalid requirements: {}", msg),
            CheckError::Interpreter(err) => write!(f, "{}", err),
        }
    }
}

impl Error for CheckError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckError::Interpreter(err) => Some(err),
            _ => None,
        }
    }
}

impl From<InterpreterError> for CheckError {
    fn from(err: InterpreterError) -> Self {
        CheckError::Interpreter(err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeReport {
    pub passed_output: bool,
    pub passed_nodes: bool,
    pub missing_nodes: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub source: String,
    pub timed_out: bool,
    pub truncated: bool,
    pub diagnostics: Vec<String>,
}

impl GradeReport {
    pub fn passed(&self) -> bool {
        self.passed_output && self.passed_nodes
    }

    pub fn to_json(&self) -> Value {
        json!({
            "passed": self.passed(),
            "passedOutput": self.passed_output,
            "passedNodes": self.passed_nodes,
            "missingNodes": self.missing_nodes,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "source": self.source,
            "timedOut": self.timed_out,
            "truncated": self.truncated,
            "diagnostics": self.diagnostics,
        })
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(if self.passed() { "PASSED" } else { "FAILED" });
        for line in &self.diagnostics {
            out.push_str("\n  - ");
            out.push_str(line);
        }
        out
    }
}

pub fn check(
    canvas: &Canvas,
    requirements: &Requirements,
    interpreter: &dyn Interpreter,
) -> Result<GradeReport, CheckError> {
    check_with_options(canvas, requirements, interpreter, &CodegenOptions::default())
}

pub fn check_with_options(
    canvas: &Canvas,
    requirements: &Requirements,
    interpreter: &dyn Interpreter,
    options: &CodegenOptions,
) -> Result<GradeReport, CheckError> {
    let required = requirements.resolved_kinds()?;
    let program = generate_with_options(canvas, options);
    debug!(digest = %program.digest(), "submitting generated program");
    let output = interpreter.execute(&program.source)?;

    let passed_output = match &requirements.expected_output {
        Some(expected) => normalize_output(&output.stdout) == normalize_output(expected),
        None => true,
    };

    let present = canvas.kinds_present();
    let mut reported = BTreeSet::new();
    let missing_nodes: Vec<String> = required
        .into_iter()
        .filter(|(kind, _)| !present.contains(kind) && reported.insert(*kind))
        .map(|(_, name)| name.to_string())
        .collect();
    let passed_nodes = missing_nodes.is_empty();

    let mut diagnostics = Vec::new();
    if output.timed_out {
        diagnostics.push("The program did not finish before the time limit.".to_string());
    }
    if !output.stderr.trim().is_empty() && !output.timed_out {
        diagnostics.push("The program raised an error while running.".to_string());
    }
    if output.truncated {
        diagnostics.push("The program printed too much; the captured output was cut off.".to_string());
    }
    if let Some(expected) = &requirements.expected_output {
        if !passed_output {
            diagnostics.push(format!(
                "Expected output {:?} but the program printed {:?}.",
                normalize_output(expected),
                normalize_output(&output.stdout)
            ));
        }
    }
    if !passed_nodes {
        diagnostics.push(format!(
            "Missing required block(s): {}.",
            missing_nodes.join(", ")
        ));
    }

    info!(
        passed_output,
        passed_nodes,
        timed_out = output.timed_out,
        truncated = output.truncated,
        "graded submission"
    );
    Ok(GradeReport {
        passed_output,
        passed_nodes,
        missing_nodes,
        stdout: output.stdout,
        stderr: output.stderr,
        source: program.source,
        timed_out: output.timed_out,
        truncated: output.truncated,
        diagnostics,
    })
}

/// CRLF to LF, trailing whitespace dropped per line, blank lines trimmed at both ends.
pub fn normalize_output(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
    lines[start..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Point;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    struct Canned {
        output: ExecutionOutput,
        seen: RefCell<Vec<String>>,
    }

    impl Canned {
        fn stdout(text: &str) -> Self {
            Self {
                output: ExecutionOutput {
                    stdout: text.to_string(),
                    ..ExecutionOutput::default()
                },
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Interpreter for Canned {
        fn execute(&self, source: &str) -> Result<ExecutionOutput, InterpreterError> {
            self.seen.borrow_mut().push(source.to_string());
            Ok(self.output.clone())
        }
    }

    struct Offline;

    impl Interpreter for Offline {
        fn execute(&self, _source: &str) -> Result<ExecutionOutput, InterpreterError> {
            Err(InterpreterError::Unavailable("no python".to_string()))
        }
    }

    fn hello_canvas() -> Canvas {
        let mut canvas = Canvas::new();
        let print = canvas.instantiate(BlockKind::Print, Point::new(0.0, 0.0));
        let slot = canvas.slot_named(print, "value").unwrap();
        canvas.set_literal(slot, "Hello!").unwrap();
        canvas
    }

    #[test]
    fn output_match_passes() {
        let canvas = hello_canvas();
        let interpreter = Canned::stdout("Hello!\n");
        let report = check(&canvas, &Requirements::new(Some("Hello!"), &[]), &interpreter).unwrap();
        assert!(report.passed_output);
        assert!(report.passed_nodes);
        assert!(report.passed());
        assert_eq!(*interpreter.seen.borrow(), vec!["print(\"Hello!\")\n".to_string()]);
        assert_eq!(report.source, "print(\"Hello!\")\n");
    }

    #[test]
    fn missing_kind_reported_regardless_of_output() {
        let canvas = hello_canvas();
        let report = check(
            &canvas,
            &Requirements::new(Some("Hello!"), &["while", "print"]),
            &Canned::stdout("Hello!"),
        )
        .unwrap();
        assert!(report.passed_output);
        assert!(!report.passed_nodes);
        assert_eq!(report.missing_nodes, vec!["while".to_string()]);
        assert!(!report.passed());
    }

    #[test]
    fn no_expected_output_is_vacuous() {
        let report = check(&Canvas::new(), &Requirements::default(), &Canned::stdout("noise")).unwrap();
        assert!(report.passed_output);
        assert_eq!(report.stdout, "noise");
    }

    #[test]
    fn program_errors_are_feedback_not_failures() {
        let interpreter = Canned {
            output: ExecutionOutput {
                stdout: String::new(),
                stderr: "NameError: name 'y' is not defined".to_string(),
                ..ExecutionOutput::default()
            },
            seen: RefCell::new(Vec::new()),
        };
        let report = check(&hello_canvas(), &Requirements::new(Some("Hello!"), &[]), &interpreter).unwrap();
        assert!(!report.passed_output);
        assert!(report.stderr.contains("NameError"));
        assert_eq!(report.diagnostics.len(), 2);
    }

    #[test]
    fn timeout_is_graded_as_a_failed_run() {
        let interpreter = Canned {
            output: ExecutionOutput {
                stdout: "Hello!\nHello!\n".to_string(),
                stderr: "TimeoutError: program exceeded 5000 ms and was stopped\n".to_string(),
                timed_out: true,
                truncated: true,
            },
            seen: RefCell::new(Vec::new()),
        };
        let report = check(&hello_canvas(), &Requirements::new(Some("Hello!"), &[]), &interpreter).unwrap();
        assert!(report.timed_out);
        assert!(report.truncated);
        assert!(!report.passed());
        assert_eq!(
            report.diagnostics,
            vec![
                "The program did not finish before the time limit.".to_string(),
                "The program printed too much; the captured output was cut off.".to_string(),
                "Expected output \"Hello!\" but the program printed \"Hello!\\nHello!\".".to_string(),
            ]
        );
        let value = report.to_json();
        assert_eq!(value["timedOut"], json!(true));
        assert_eq!(value["truncated"], json!(true));
        assert!(report.summary().starts_with("FAILED"));
    }

    #[test]
    fn missing_kinds_echo_requested_names() {
        let report = check(
            &hello_canvas(),
            &Requirements::new(None, &["dowhile", "While", "while", "PRINT"]),
            &Canned::stdout(""),
        )
        .unwrap();
        assert_eq!(report.missing_nodes, vec!["dowhile".to_string(), "While".to_string()]);
    }

    #[test]
    fn unreachable_interpreter_is_a_tooling_failure() {
        let err = check(&hello_canvas(), &Requirements::default(), &Offline).unwrap_err();
        assert!(matches!(err, CheckError::Interpreter(InterpreterError::Unavailable(_))));
    }

    #[test]
    fn requirements_from_json() {
        let req = Requirements::from_json(r#"{"expectedOutput":"5","requiredKinds":["variable","do-while"]}"#)
            .unwrap();
        assert_eq!(req.expected_output.as_deref(), Some("5"));
        assert_eq!(req.required_kinds, vec!["variable".to_string(), "do-while".to_string()]);

        assert_eq!(
            Requirements::from_json(r#"{"expectedOutput":"5"}"#),
            Err(CheckError::MissingRequiredKinds)
        );
        assert_eq!(
            Requirements::from_json(r#"{"requiredKinds":["loop"]}"#),
            Err(CheckError::UnknownKind("loop".to_string()))
        );
        assert!(matches!(
            Requirements::from_json("[1]"),
            Err(CheckError::InvalidRequirements(_))
        ));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_output("\r\n\nHello!  \r\nworld\t\n\n"), "Hello!\nworld");
        assert_eq!(normalize_output("  \n \n"), "");
        assert_eq!(normalize_output("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn report_json_uses_camel_case() {
        let report = GradeReport {
            passed_output: true,
            missing_nodes: vec!["for".to_string()],
            ..GradeReport::default()
        };
        let value = report.to_json();
        assert_eq!(value["passedOutput"], json!(true));
        assert_eq!(value["passedNodes"], json!(false));
        assert_eq!(value["missingNodes"], json!(["for"]));
        assert_eq!(value["passed"], json!(false));
    }
}
