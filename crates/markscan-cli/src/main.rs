//! markscan CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{RosterArgs, ScoringArgs};

const DEFAULT_LOG_DIRECTIVE: &str = "markscan=info";

#[derive(Parser)]
#[command(name = "markscan", version, about = "Exam sheet scan correction")]
struct Cli {
    /// Log filter (e.g. "debug" or "markscan_vision=trace"); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read, score and match a batch of scanned sheets
    Correct {
        /// Scan image, multi-page TIFF/PDF, or a directory of them
        #[arg(long)]
        input: PathBuf,

        /// Directory with the exam layouts and solution keys
        #[arg(long)]
        exam_dir: PathBuf,

        /// Output directory (default: output_dir from the config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Max scans read concurrently (default: available CPUs)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Extra output formats: json, html, all (results CSV and final marks are always written)
        #[arg(long, default_value = "")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        scoring: ScoringArgs,

        #[command(flatten)]
        roster: RosterArgs,
    },

    /// Rescore and rematch an (edited) results table without reading images
    Rescore {
        /// correction_results.csv from an earlier run
        #[arg(long)]
        results: PathBuf,

        /// Directory with the exam layouts and solution keys
        #[arg(long)]
        exam_dir: PathBuf,

        /// Output directory (default: the directory of the results table)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Extra output formats: json, html, all
        #[arg(long, default_value = "")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        scoring: ScoringArgs,

        #[command(flatten)]
        roster: RosterArgs,
    },

    /// Check an exam directory for layout and key problems
    Validate {
        /// Directory with the exam layouts and solution keys
        #[arg(long)]
        exam_dir: PathBuf,
    },

    /// Draw a filled-in sheet for a model, optionally photographed at an angle
    Render {
        /// Directory with the exam layouts and solution keys
        #[arg(long)]
        exam_dir: PathBuf,

        /// Exam model to render
        #[arg(long)]
        model: String,

        /// Answers per question, e.g. "A,B,-,C,AC"
        #[arg(long, default_value = "")]
        answers: String,

        /// Student ID written in the ID box
        #[arg(long, default_value = "")]
        student_id: String,

        /// Leave the model row blank
        #[arg(long)]
        blank_model: bool,

        /// Output image (format from the extension)
        #[arg(long)]
        output: PathBuf,

        /// Rotation in degrees
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        rotate: f64,

        /// Scale factor
        #[arg(long, default_value = "1.0")]
        scale: f64,

        /// Keystone strength (a few hundredths for a tilted photo)
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        perspective: f64,

        /// Pixels per millimetre
        #[arg(long, default_value = "4.0")]
        ppm: f64,
    },

    /// Compare the marks of two correction reports
    Compare {
        /// Baseline report JSON
        #[arg(long)]
        baseline: PathBuf,

        /// Current report JSON
        #[arg(long)]
        current: PathBuf,

        /// Smallest mark change reported
        #[arg(long, default_value = "0.01")]
        threshold: f64,

        /// Exit code 1 if any mark changed
        #[arg(long)]
        fail_on_change: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Create a starter config and a sample exam
    Init,
}

fn init_tracing(log_level: Option<&str>) {
    let directives = log_level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_DIRECTIVE.to_string());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Warning: invalid log filter '{directives}': {e}");
        EnvFilter::new(DEFAULT_LOG_DIRECTIVE)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Correct {
            input,
            exam_dir,
            output,
            parallelism,
            format,
            config,
            scoring,
            roster,
        } => {
            commands::correct::execute(
                input,
                exam_dir,
                output,
                parallelism,
                format,
                config,
                scoring,
                roster,
            )
            .await
        }
        Commands::Rescore {
            results,
            exam_dir,
            output,
            format,
            config,
            scoring,
            roster,
        } => commands::rescore::execute(results, exam_dir, output, format, config, scoring, roster),
        Commands::Validate { exam_dir } => commands::validate::execute(exam_dir),
        Commands::Render {
            exam_dir,
            model,
            answers,
            student_id,
            blank_model,
            output,
            rotate,
            scale,
            perspective,
            ppm,
        } => commands::render::execute(commands::render::RenderRequest {
            exam_dir,
            model,
            answers,
            student_id,
            blank_model,
            output,
            rotate,
            scale,
            perspective,
            ppm,
        }),
        Commands::Compare {
            baseline,
            current,
            threshold,
            fail_on_change,
            format,
        } => commands::compare::execute(baseline, current, threshold, fail_on_change, format),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
