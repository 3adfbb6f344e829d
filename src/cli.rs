use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "blockcode-rs",
    about = "Compile a block canvas (JSON or XML) to Python source, optionally run and grade it."
)]
pub struct Args {
    #[arg(value_name = "CANVAS")]
    pub input: PathBuf,

    #[arg(long, value_name = "PATH", help = "Write generated source to this path instead of stdout.")]
    pub emit: Option<PathBuf>,

    #[arg(long, help = "Run the generated program and grade it.")]
    pub run: bool,

    #[arg(long, value_name = "TEXT", help = "Expected program output (requires --run).")]
    pub expected: Option<String>,

    #[arg(
        long = "require",
        value_name = "KIND",
        value_delimiter = ',',
        help = "Block kind that must appear on the canvas; repeatable (requires --run)."
    )]
    pub require: Vec<String>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Read {expectedOutput, requiredKinds} from a JSON file (requires --run)."
    )]
    pub requirements: Option<PathBuf>,

    #[arg(long, value_name = "PROGRAM", default_value = "python3", help = "Interpreter used by --run.")]
    pub python: String,

    #[arg(long, value_name = "MS", default_value_t = 5000, help = "Interpreter time limit in milliseconds.")]
    pub timeout_ms: u64,

    #[arg(long, value_name = "PATH", help = "Write a submission bundle (.zip) with canvas, source and report.")]
    pub bundle: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Write the grading report as JSON (requires --run).")]
    pub report_json: Option<PathBuf>,
}
