// Pipeline CLI
// Expands, validates and re-serializes YAML pipeline definitions

mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Expand and validate YAML pipeline templates locally
#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log template loads, parameter binding and name generation
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve every template and print the expanded pipeline
    Expand(commands::expand::ExpandArgs),

    /// Resolve templates and run the checks a run performs before scheduling
    Validate(commands::validate::ValidateArgs),

    /// Load a legacy process file and print it with templates spliced in
    Legacy(commands::legacy::LegacyArgs),
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Expand(args) => commands::expand::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Legacy(args) => commands::legacy::execute(args),
    }
}

/// `RUST_LOG` wins unless `-v` was given; the fallback level is `warn`.
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to initialize tracing: {}", e))
}
