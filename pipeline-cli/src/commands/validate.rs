use crate::commands::{load, SourceArgs};
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pipeline_template::{Pipeline, DEFAULT_NAME};

/// Resolve templates and run the pre-run checks
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// List stages and jobs after the checks pass
    #[arg(long)]
    pub list: bool,

    /// Report whether a push to this branch fires the CI and PR triggers
    #[arg(long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Changed path checked against trigger path filters (can be repeated)
    #[arg(long = "changed", value_name = "PATH", requires = "branch")]
    pub changed: Vec<String>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let mut pipeline = load(&args.pipeline, &args.source)?;
    output::check("Templates resolved");

    let (stages, jobs, steps) = counts(&pipeline);
    output::check(&format!("Structure: {} stages, {} jobs, {} steps", stages, jobs, steps));

    if let Err(err) = pipeline.check_for_runtime_failure() {
        output::fail(&err);
    }
    output::check("Names, dependencies and runtime expressions valid");

    let ci = pipeline.ci_trigger().unwrap_or_else(|err| output::fail(&err));
    let pr = pipeline.pr_trigger().unwrap_or_else(|err| output::fail(&err));
    output::check("Trigger filters valid");

    if let Some(branch) = &args.branch {
        let changed: Vec<&str> = args.changed.iter().map(String::as_str).collect();
        for (label, filter) in [("CI trigger", &ci), ("PR trigger", &pr)] {
            if filter.fires(branch, &changed) {
                output::check(&format!("{} fires for '{}'", label, branch));
            } else {
                output::dim(&format!("      {} does not fire for '{}'", label, branch));
            }
        }
    }

    if args.list {
        for stage in pipeline.stages.iter().flatten() {
            let jobs = stage.jobs.as_deref().unwrap_or_default();
            stage_header(stage.name.as_deref(), jobs.len());
            for job in jobs {
                let name = job.name.as_deref().unwrap_or(DEFAULT_NAME);
                let steps = job.steps.as_ref().map_or(0, Vec::len);
                output::dim(&format!("      {} ({} steps)", name, steps));
            }
        }
    }

    println!();
    output::success("Pipeline is valid");

    Ok(())
}

fn stage_header(name: Option<&str>, total_jobs: usize) {
    output::stage_header(name.unwrap_or(DEFAULT_NAME), total_jobs);
}

fn counts(pipeline: &Pipeline) -> (usize, usize, usize) {
    let stages = pipeline.stages.as_deref().unwrap_or_default();
    let jobs = stages.iter().flat_map(|s| s.jobs.iter().flatten());
    let steps: usize = jobs.clone().map(|j| j.steps.as_ref().map_or(0, Vec::len)).sum();
    (stages.len(), jobs.count(), steps)
}
