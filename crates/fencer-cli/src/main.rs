//! Command-line interface for the fencer relaxed-memory verifier.

use clap::{Parser, Subcommand, ValueEnum};
use fencer_mc::{
    Common, DiagnosticLevel, Engine, EngineConfig, SearchOrder, TracingSink, Verdict,
};
use fencer_model::{MemoryModel, ModelError, Program};
use fencer_sync::{get_all_possible, search, RepairConfig, RepairOutcome, SyncKind};
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI error with source context for pretty printing.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to read file: {message}")]
    IoError { message: String },

    #[error("invalid program: {message}")]
    #[diagnostic(code(fencer::json_error))]
    JsonError {
        message: String,
        #[source_code]
        src: NamedSource<Arc<String>>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("invalid program: {message}")]
    #[diagnostic(code(fencer::model_error))]
    ModelError { message: String },

    #[error("check error: {message}")]
    CheckError { message: String },

    #[error("repair error: {message}")]
    RepairError { message: String },
}

impl CliError {
    fn from_model_error(e: ModelError, source: Arc<String>, filename: &str) -> Self {
        match e {
            ModelError::Json(inner) => {
                let offset = line_col_offset(&source, inner.line(), inner.column());
                CliError::JsonError {
                    message: inner.to_string(),
                    src: NamedSource::new(filename, source),
                    span: (offset, 0).into(),
                }
            }
            other => CliError::ModelError {
                message: other.to_string(),
            },
        }
    }
}

/// Byte offset of a 1-based line and column.
fn line_col_offset(source: &str, line: usize, column: usize) -> usize {
    let start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (start + column.saturating_sub(1)).min(source.len())
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fencer", version)]
#[command(about = "Safety checking and fence insertion under relaxed memory models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Fence,
    Locked,
}

impl From<KindArg> for SyncKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Fence => SyncKind::Fence,
            KindArg::Locked => SyncKind::LockedWrite,
        }
    }
}

/// Engine flags shared by `check` and `repair`.
#[derive(clap::Args, Clone)]
struct EngineArgs {
    /// Memory model: tso, pso or nmca
    #[arg(short, long, default_value = "tso")]
    model: MemoryModel,

    /// Depth-first instead of breadth-first search
    #[arg(long)]
    dfs: bool,

    /// Maximum number of constraints to process (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_steps: usize,

    /// Maximum number of stored constraints (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_stored: usize,

    /// Time limit in seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_time: u64,

    /// Disable parallel exploration
    #[arg(long)]
    no_parallel: bool,

    /// Number of threads for parallel exploration (0 = use all available)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Keep predecessors no concrete run could produce
    #[arg(long)]
    no_prune: bool,

    /// Show verbose output (-v: one line per constraint, -vv: full constraints)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl EngineArgs {
    fn diagnostic_level(&self) -> DiagnosticLevel {
        match self.verbose {
            0 => DiagnosticLevel::Off,
            1 => DiagnosticLevel::Steps,
            _ => DiagnosticLevel::Constraints,
        }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            order: if self.dfs {
                SearchOrder::Dfs
            } else {
                SearchOrder::Bfs
            },
            max_steps: self.max_steps,
            max_stored: self.max_stored,
            max_time_secs: self.max_time,
            parallel: !self.no_parallel,
            num_threads: self.threads,
            prune_unexplainable: !self.no_prune,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a forbidden state is reachable
    Check {
        /// Program file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,

        /// Print the constraint after every witness step
        #[arg(long)]
        detailed: bool,
    },

    /// Search for fences or locked writes that make the program safe
    Repair {
        /// Program file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,

        /// Largest number of changes to combine (0 = unlimited)
        #[arg(long, default_value = "3")]
        max_size: usize,

        /// Kinds of changes to try
        #[arg(long, value_enum, value_delimiter = ',', default_values_t = [KindArg::Fence, KindArg::Locked])]
        kinds: Vec<KindArg>,

        /// Report every minimal repair instead of the first
        #[arg(long)]
        all: bool,

        /// Write the first repaired program to this file
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// List the synchronization candidates of a program
    Candidates {
        /// Program file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Kinds of changes to list
        #[arg(long, value_enum, value_delimiter = ',', default_values_t = [KindArg::Fence, KindArg::Locked])]
        kinds: Vec<KindArg>,
    },

    /// Print a program
    Show {
        /// Program file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() {
    // Install miette's fancy error handler
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    // Initialize logging
    let verbose = match &cli.command {
        Commands::Check { engine, .. } | Commands::Repair { engine, .. } => engine.verbose,
        _ => 0,
    };
    let filter = match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Check {
            file,
            engine,
            detailed,
        } => cmd_check(&file, &engine, detailed),
        Commands::Repair {
            file,
            engine,
            max_size,
            kinds,
            all,
            output,
        } => cmd_repair(&file, &engine, max_size, &kinds, all, output.as_deref()),
        Commands::Candidates { file, kinds } => cmd_candidates(&file, &kinds),
        Commands::Show { file } => cmd_show(&file),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(1);
        }
    }
}

fn load_program(file: &Path) -> CliResult<Program> {
    let filename = file.display().to_string();
    let source = Arc::new(fs::read_to_string(file).map_err(|e| CliError::IoError {
        message: e.to_string(),
    })?);
    Program::from_json(&source).map_err(|e| CliError::from_model_error(e, source.clone(), &filename))
}

fn kinds_of(kinds: &[KindArg]) -> Vec<SyncKind> {
    let mut out: Vec<SyncKind> = kinds.iter().map(|k| SyncKind::from(*k)).collect();
    out.sort();
    out.dedup();
    out
}

fn cmd_check(file: &Path, args: &EngineArgs, detailed: bool) -> CliResult<i32> {
    let program = load_program(file)?;
    let model = args.model;
    let common = Arc::new(Common::new(Arc::new(program), model));
    let level = args.diagnostic_level();

    info!(%model, "checking...");
    let verdict = Engine::new(Arc::clone(&common), args.config())
        .with_diagnostics(Arc::new(TracingSink { level }))
        .run()
        .map_err(|e| CliError::CheckError {
            message: e.to_string(),
        })?;

    let stats = *verdict.stats();
    println!();
    println!("Result: {}", verdict.name());
    println!("  Model: {}", model);
    println!("  Constraints processed: {}", stats.steps);
    println!("  Constraints stored: {}", stats.stored);
    println!("  Time: {:.2}s", stats.elapsed.as_secs_f64());

    match verdict {
        Verdict::Safe { .. } => Ok(0),
        Verdict::Reachable { witness, .. } => {
            println!("  Witness ({} steps):", witness.len());
            let text = if detailed {
                witness.render_verbose(&common)
            } else {
                witness.render(&common)
            };
            for line in text.lines() {
                println!("  {}", line);
            }
            Ok(1)
        }
        Verdict::Inconclusive { reason, .. } => {
            println!("  Reason: {}", reason);
            Ok(2)
        }
    }
}

fn cmd_repair(
    file: &Path,
    args: &EngineArgs,
    max_size: usize,
    kinds: &[KindArg],
    all_minimal: bool,
    output: Option<&Path>,
) -> CliResult<i32> {
    let program = load_program(file)?;
    let config = RepairConfig {
        max_size,
        kinds: kinds_of(kinds),
        engine: args.config(),
        all_minimal,
    };

    info!(model = %args.model, "repairing...");
    let outcome =
        search(&program, args.model, &config).map_err(|e| CliError::RepairError {
            message: e.to_string(),
        })?;

    println!();
    match outcome {
        RepairOutcome::AlreadySafe => {
            println!("Result: SAFE (no repair needed)");
            Ok(0)
        }
        RepairOutcome::Repaired { solutions } => {
            println!("Result: REPAIRED");
            for (i, repair) in solutions.iter().enumerate() {
                println!("  Repair {} ({} changes):", i + 1, repair.candidates.len());
                for candidate in &repair.candidates {
                    println!("    {}", candidate.describe(&program));
                }
            }
            if let (Some(path), Some(first)) = (output, solutions.first()) {
                let json = first.program.to_json().map_err(|e| CliError::ModelError {
                    message: e.to_string(),
                })?;
                fs::write(path, json).map_err(|e| CliError::IoError {
                    message: e.to_string(),
                })?;
                println!("  Wrote {}", path.display());
            }
            Ok(0)
        }
        RepairOutcome::NoRepair { inconclusive } => {
            println!("Result: NO REPAIR");
            if inconclusive > 0 {
                println!("  Inconclusive runs: {}", inconclusive);
                Ok(2)
            } else {
                Ok(1)
            }
        }
    }
}

fn cmd_candidates(file: &Path, kinds: &[KindArg]) -> CliResult<i32> {
    let program = load_program(file)?;
    let candidates = get_all_possible(&program, &kinds_of(kinds));
    println!("{} candidates", candidates.len());
    for candidate in &candidates {
        println!("  {}", candidate.describe(&program));
    }
    Ok(0)
}

fn cmd_show(file: &Path) -> CliResult<i32> {
    let program = load_program(file)?;
    print!("{}", program);
    Ok(0)
}
