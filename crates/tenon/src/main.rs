//! Tenon CLI - build and query a domain model workspace.
//!
//! Loads every `.dmodel` file under the workspace root, runs the full build
//! and reports diagnostics, symbols or references.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod cli;

/// Tenon: incremental build engine for domain models.
#[derive(Parser)]
#[command(name = "tenon")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Number of parser worker threads (overrides tenon.yaml)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace and report diagnostics
    Check {
        /// Also report warnings and hints
        #[arg(long)]
        all: bool,
    },

    /// List exported symbols
    Symbols {
        /// Only symbols of this type or its subtypes (e.g. "Entity")
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,
    },

    /// Find all references to exported symbols with this name
    References {
        /// Exported symbol name (e.g. "blog.Post")
        name: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Determine workspace root
    let workspace = match cli.workspace {
        Some(w) => w,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("{}: failed to get current directory: {e}", "error".red().bold());
                return ExitCode::FAILURE;
            }
        },
    };

    let result = match cli.command {
        Commands::Check { all } => cli::check::run(&workspace, cli.workers, all).await,
        Commands::Symbols { type_name } => cli::symbols::run(&workspace, cli.workers, type_name.as_deref()).await,
        Commands::References { name } => cli::references::run(&workspace, cli.workers, &name).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            // Show cause chain for nested errors
            for cause in e.chain().skip(1) {
                eprintln!("  {}: {cause}", "caused by".dimmed());
            }
            ExitCode::FAILURE
        }
    }
}
