use crate::commands::{find_repo_root, relative_path, split_pair};
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::bail;
use color_eyre::Result;

use pipeline_template::process::mustache::MustacheContext;
use pipeline_template::process::PhaseEntry;
use pipeline_template::yaml::Value;
use pipeline_template::{LocalFileProvider, ParseOptions, ProcessParser, TracingWriter};

/// Load a legacy process file and print it with templates spliced in
#[derive(Args, Debug)]
pub struct LegacyArgs {
    /// Path to the process YAML file
    pub process: PathBuf,

    /// Root that template paths resolve against (default: enclosing git repository)
    #[arg(long, value_name = "DIR")]
    pub repo_root: Option<PathBuf>,

    /// Set a mustache value (can be repeated, format: name=value)
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
    pub parameters: Vec<String>,

    /// Maximum number of files one process may pull in (0 = unlimited)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub max_files: usize,
}

pub fn execute(args: LegacyArgs) -> Result<()> {
    if !args.process.exists() {
        bail!("Process file not found: {}", args.process.display());
    }

    let root = args.repo_root.clone().unwrap_or_else(|| {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        find_repo_root(&cwd).unwrap_or(cwd)
    });
    let relative = relative_path(&root, &args.process)?;

    let mut context = MustacheContext::new();
    for entry in &args.parameters {
        let (name, value) = split_pair(entry, "parameter", "name=value")?;
        context.insert(name, Value::String(value));
    }

    let provider = LocalFileProvider::new(&root);
    let options = ParseOptions {
        max_files: args.max_files,
        ..Default::default()
    };
    let parser = ProcessParser::new(&provider, &TracingWriter, options);

    output::status("Loading", &relative);
    let process = match parser.load("", &relative, Some(&context)) {
        Ok(process) => process,
        Err(err) => output::fail(&err),
    };
    for entry in process.phases.iter().flatten() {
        if let PhaseEntry::Phase(phase) = entry {
            let name = phase.name.as_deref().unwrap_or_default();
            output::dim(&format!("      {} ({} steps)", name, phase.steps.len()));
        }
    }

    match parser.load_and_serialize("", &relative, Some(&context)) {
        Ok(yaml) => print!("{}", yaml),
        Err(err) => output::fail(&err),
    }
    Ok(())
}
