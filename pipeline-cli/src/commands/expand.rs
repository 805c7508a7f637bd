use crate::commands::{load, render, Format, SourceArgs};

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

/// Resolve every template and print the expanded pipeline
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    pub format: Format,
}

pub fn execute(args: ExpandArgs) -> Result<()> {
    let pipeline = load(&args.pipeline, &args.source)?;
    print!("{}", render(&pipeline, args.format)?);
    Ok(())
}
