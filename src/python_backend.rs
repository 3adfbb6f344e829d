use crate::checker::{ExecutionOutput, Interpreter, InterpreterError};
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_OUTPUT_LIMIT: usize = 1 << 20;

/// Runs generated programs in a `python3` subprocess inside a throwaway working directory.
#[derive(Debug, Clone)]
pub struct PythonInterpreter {
    pub program: String,
    /// Extra interpreter arguments, placed before the script path.
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Pass `-I` so user site-packages and `PYTHON*` variables are ignored.
    pub isolated: bool,
    /// Bytes kept per stream; anything past this is read and dropped.
    pub output_limit: usize,
}

impl Default for PythonInterpreter {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(5),
            isolated: true,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl PythonInterpreter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            ..Self::default()
        }
    }
}

impl Interpreter for PythonInterpreter {
    fn execute(&self, source: &str) -> Result<ExecutionOutput, InterpreterError> {
        let scratch = TempDir::new()
            .map_err(|e| InterpreterError::Io(format!("Failed to create scratch directory: {}", e)))?;
        let script = scratch.path().join("main.py");
        std::fs::write(&script, source.as_bytes())
            .map_err(|e| InterpreterError::Io(format!("Failed to write '{}': {}", script.display(), e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.current_dir(scratch.path());
        if self.isolated {
            cmd.arg("-I");
        }
        cmd.args(&self.args)
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            InterpreterError::Unavailable(format!(
                "Failed to start '{}'. Ensure it is installed or pass --python: {}",
                self.program, e
            ))
        })?;
        debug!(program = %self.program, pid = child.id(), "interpreter started");

        let stdout = drain(child.stdout.take(), self.output_limit);
        let stderr = drain(child.stderr.take(), self.output_limit);
        let timed_out = wait_with_deadline(&mut child, self.timeout)?;

        let stdout = join(stdout)?;
        let stderr = join(stderr)?;
        let truncated = stdout.truncated || stderr.truncated;
        if truncated {
            warn!(limit = self.output_limit, "interpreter output truncated");
        }
        let mut stderr = stderr.text;
        if timed_out {
            warn!(timeout_ms = self.timeout.as_millis() as u64, "interpreter timed out");
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "TimeoutError: program exceeded {} ms and was stopped\n",
                self.timeout.as_millis()
            ));
        }
        Ok(ExecutionOutput {
            stdout: stdout.text,
            stderr,
            timed_out,
            truncated,
        })
    }
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    limit: usize,
) -> Option<JoinHandle<std::io::Result<Captured>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || -> std::io::Result<Captured> {
            let mut buf = Vec::new();
            pipe.by_ref().take(limit as u64).read_to_end(&mut buf)?;
            // The child must never block on a full pipe, so the rest is still consumed.
            let dropped = io::copy(&mut pipe, &mut io::sink())?;
            Ok(Captured {
                text: String::from_utf8_lossy(&buf).into_owned(),
                truncated: dropped > 0,
            })
        })
    })
}

fn join(handle: Option<JoinHandle<std::io::Result<Captured>>>) -> Result<Captured, InterpreterError> {
    let Some(handle) = handle else {
        return Ok(Captured::default());
    };
    handle
        .join()
        .map_err(|_| InterpreterError::Io("output reader panicked".to_string()))?
        .map_err(|e| InterpreterError::Io(format!("Failed to read interpreter output: {}", e)))
}

/// Returns whether the child had to be killed.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<bool, InterpreterError> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = child
            .try_wait()
            .map_err(|e| InterpreterError::Io(format!("Failed to poll interpreter: {}", e)))?;
        if status.is_some() {
            return Ok(false);
        }
        if Instant::now() >= deadline {
            // The process may exit between the poll and the kill.
            let _ = child.kill();
            child
                .wait()
                .map_err(|e| InterpreterError::Io(format!("Failed to reap interpreter: {}", e)))?;
            return Ok(true);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
