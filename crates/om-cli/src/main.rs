//! OM command-line tool
//!
//! Runs, optimizes, verifies and inspects compiled OM units.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

use commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "om")]
#[command(about = "OM virtual machine", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level unless OM_LOG or RUST_LOG say otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// When to color error output: auto, always or never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, link and run a module
    Run {
        /// Module name, or path to a `.om` file
        module: String,
        /// Arguments handed to `main`
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        /// Extra module directories, searched in order
        #[arg(short, long = "path")]
        path: Vec<PathBuf>,
        /// Skip branch-size optimization of the linked code
        #[arg(long)]
        no_optimize: bool,
        /// Skip unit verification
        #[arg(long)]
        no_verify: bool,
        /// Wall-clock scheduling interval in milliseconds
        #[arg(long, conflicts_with = "tick_steps")]
        tick_ms: Option<u64>,
        /// Schedule every N instructions instead of on a timer
        #[arg(long)]
        tick_steps: Option<u64>,
        /// Value-stack slots per thread
        #[arg(long)]
        max_stack: Option<usize>,
    },

    /// Shrink branch operands of a unit
    Optimize {
        /// Input unit
        input: PathBuf,
        /// Output unit
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check units for structural errors
    Verify {
        /// Units to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a unit's metadata as JSON
    Inspect {
        /// Unit to inspect
        file: PathBuf,
        /// Include the disassembled code
        #[arg(long)]
        code: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("OM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut out = output::StyledOutput::new(output::resolve_color_choice(cli.color.as_deref()));

    let result = match cli.command {
        Commands::Run {
            module,
            args,
            path,
            no_optimize,
            no_verify,
            tick_ms,
            tick_steps,
            max_stack,
        } => commands::run::execute(
            RunArgs {
                module,
                args,
                paths: path,
                optimize: !no_optimize,
                verify: !no_verify,
                tick_ms,
                tick_steps,
                max_stack,
            },
            &mut out,
        ),
        Commands::Optimize { input, output } => {
            commands::optimize::execute(&input, &output, &mut out)
        }
        Commands::Verify { files } => commands::verify::execute(&files, &mut out),
        Commands::Inspect { file, code } => commands::inspect::execute(&file, code),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            out.report(&e);
            ExitCode::FAILURE
        }
    }
}
