// Legacy process loader
// Front matter, mustache, template splicing and implied phases for process files

use crate::error::{ParseError, ParseResult};
use crate::pipeline::names::NameBuilder;
use crate::process::mustache::{render, split_front_matter, MustacheContext};
use crate::process::templates::{
    read_phases_template, read_process, read_process_template, read_steps_template,
    read_variables_template, write_process,
};
use crate::process::{
    CheckoutStep, Phase, PhaseEntry, PhasesTemplateReference, Process, ProcessResource, Step,
    StepOverrides, ValueVariable, Variable,
};
use crate::template::context::{FileProvider, ParseOptions, TraceWriter};
use crate::template::reader::relative_to;
use crate::yaml::{YamlReader, YamlWriter};

use tracing::debug;

/// A parsed file and the directory its own references resolve against
struct LoadedFile<T> {
    name: String,
    directory: String,
    object: T,
}

/// Loads release-pipeline process files and resolves their templates
pub struct ProcessParser<'a> {
    file_provider: &'a dyn FileProvider,
    trace: &'a dyn TraceWriter,
    options: ParseOptions,
}

impl<'a> ProcessParser<'a> {
    pub fn new(file_provider: &'a dyn FileProvider, trace: &'a dyn TraceWriter, options: ParseOptions) -> Self {
        Self {
            file_provider,
            trace,
            options,
        }
    }

    /// Load the process at `path` (relative to `default_root`) with every
    /// template spliced in.
    ///
    /// Top-level steps become a single phase, a leading `checkout` step is
    /// turned into phase variables, and unnamed phases are named `Phase`,
    /// `Phase2`, ... .
    pub fn load(
        &self,
        default_root: &str,
        path: &str,
        mustache_context: Option<&MustacheContext>,
    ) -> ParseResult<Process> {
        let mut file_count = 0;
        let file = self.load_file(default_root, path, mustache_context, &mut file_count, read_process)?;
        let mut process = file.object;
        self.resolve_process(&mut process, &file.directory, &mut file_count)?;

        if let Some(steps) = process.steps.take() {
            let phase = Phase {
                name: process.name.clone(),
                properties: std::mem::take(&mut process.properties),
                variables: process.variables.take().unwrap_or_default(),
                steps,
            };
            process.phases = Some(vec![PhaseEntry::Phase(phase)]);
        }

        let phases = process.phases.get_or_insert_with(Vec::new);
        for entry in phases.iter_mut() {
            if let PhaseEntry::Phase(phase) = entry {
                expand_checkout(phase)?;
            }
        }
        name_phases(phases);

        debug!(file = %file.name, files = file_count, "resolved process");
        self.trace.verbose(&format!("Resolved process '{}'", file.name));
        Ok(process)
    }

    /// Load and resolve templates, then render the process back to YAML
    /// without implying phases.
    pub fn load_and_serialize(
        &self,
        default_root: &str,
        path: &str,
        mustache_context: Option<&MustacheContext>,
    ) -> ParseResult<String> {
        let mut file_count = 0;
        let file = self.load_file(default_root, path, mustache_context, &mut file_count, read_process)?;
        let mut process = file.object;
        self.resolve_process(&mut process, &file.directory, &mut file_count)?;

        let mut writer = YamlWriter::new();
        write_process(&mut writer, &process);
        writer.into_string()
    }

    fn load_file<T>(
        &self,
        default_root: &str,
        path: &str,
        mustache_context: Option<&MustacheContext>,
        file_count: &mut usize,
        read: impl FnOnce(&mut YamlReader) -> ParseResult<T>,
    ) -> ParseResult<LoadedFile<T>> {
        *file_count += 1;
        if self.options.max_files > 0 && *file_count > self.options.max_files {
            return Err(ParseError::resource_limit(format!(
                "A YAML definition may not exceed {} file references.",
                self.options.max_files
            )));
        }

        let name = relative_to(default_root, path);
        let directory = name.rsplit_once('/').map(|(dir, _)| dir.to_string()).unwrap_or_default();
        debug!(file = %name, "loading process file");

        let parse = || {
            let content = self.file_provider.read_file(None, &name)?;
            let (front_matter, body) = split_front_matter(&name, &content)?;
            let mut replacements = front_matter.unwrap_or_default();
            if let Some(context) = mustache_context {
                replacements.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            let rendered = render(body, &replacements, self.options.max_result_length)?;
            self.trace.verbose(&format!("{} after mustache replacement:\n{}", name, rendered));

            let mut reader = YamlReader::new(&rendered)?;
            read(&mut reader)
        };
        let object = parse().map_err(|err| err.with_file(name.as_str()))?;

        Ok(LoadedFile { name, directory, object })
    }

    fn resolve_process(&self, process: &mut Process, root: &str, file_count: &mut usize) -> ParseResult<()> {
        if let Some(reference) = process.template.take() {
            let file = self.load_file(root, &reference.name, Some(&reference.parameters), file_count, |r| {
                read_process_template(r)
            })?;
            let mut template = file.object;
            if let Some(phases) = template.phases.as_mut() {
                self.resolve_phases(phases, &file.directory, file_count)?;
            } else if let Some(steps) = template.steps.as_mut() {
                self.resolve_steps(steps, &file.directory, file_count)?;
            }

            apply_template_overrides(&reference, &mut template.phases, &mut template.steps);
            process.phases = template.phases;
            process.steps = template.steps;
            process.resources = Some(merge_resources(process.resources.take(), template.resources));
        } else if let Some(phases) = process.phases.as_mut() {
            self.resolve_phases(phases, root, file_count)?;
        } else {
            if let Some(variables) = process.variables.as_mut() {
                self.resolve_variables(variables, root, file_count)?;
            }
            if let Some(steps) = process.steps.as_mut() {
                self.resolve_steps(steps, root, file_count)?;
            }
        }
        Ok(())
    }

    fn resolve_phases(&self, phases: &mut Vec<PhaseEntry>, root: &str, file_count: &mut usize) -> ParseResult<()> {
        let mut resolved = Vec::with_capacity(phases.len());
        for entry in phases.drain(..) {
            match entry {
                PhaseEntry::Template(reference) => {
                    let file = self.load_file(root, &reference.name, Some(&reference.parameters), file_count, |r| {
                        read_phases_template(r)
                    })?;
                    let mut template = file.object;
                    if let Some(steps) = template.steps.as_mut() {
                        self.resolve_steps(steps, &file.directory, file_count)?;
                    }
                    for phase in template.phases.iter_mut().flatten() {
                        if let PhaseEntry::Phase(phase) = phase {
                            self.resolve_phase(phase, &file.directory, file_count)?;
                        }
                    }

                    apply_template_overrides(&reference, &mut template.phases, &mut template.steps);
                    debug!(template = %file.name, "spliced phases template");
                    match (template.phases, template.steps) {
                        (Some(phases), _) => resolved.extend(phases),
                        (None, Some(steps)) => resolved.push(PhaseEntry::Phase(Phase {
                            steps,
                            ..Default::default()
                        })),
                        (None, None) => {}
                    }
                }
                PhaseEntry::Phase(mut phase) => {
                    self.resolve_phase(&mut phase, root, file_count)?;
                    resolved.push(PhaseEntry::Phase(phase));
                }
            }
        }
        *phases = resolved;
        Ok(())
    }

    fn resolve_phase(&self, phase: &mut Phase, root: &str, file_count: &mut usize) -> ParseResult<()> {
        self.resolve_variables(&mut phase.variables, root, file_count)?;
        self.resolve_steps(&mut phase.steps, root, file_count)
    }

    fn resolve_variables(&self, variables: &mut Vec<Variable>, root: &str, file_count: &mut usize) -> ParseResult<()> {
        let mut resolved = Vec::with_capacity(variables.len());
        for variable in variables.drain(..) {
            match variable {
                Variable::Template(reference) => {
                    let file = self.load_file(root, &reference.name, Some(&reference.parameters), file_count, |r| {
                        read_variables_template(r)
                    })?;
                    debug!(template = %file.name, count = file.object.variables.len(), "spliced variables template");
                    resolved.extend(file.object.variables);
                }
                value => resolved.push(value),
            }
        }
        *variables = resolved;
        Ok(())
    }

    fn resolve_steps(&self, steps: &mut Vec<Step>, root: &str, file_count: &mut usize) -> ParseResult<()> {
        let mut resolved = Vec::with_capacity(steps.len());
        for step in steps.drain(..) {
            match step {
                Step::Template(reference) => {
                    let file = self.load_file(root, &reference.name, Some(&reference.parameters), file_count, |r| {
                        read_steps_template(r)
                    })?;
                    let mut template = file.object;
                    apply_step_overrides(&reference.step_overrides, &mut template.steps);
                    debug!(template = %file.name, count = template.steps.len(), "spliced steps template");
                    resolved.extend(template.steps);
                }
                other => resolved.push(other),
            }
        }
        *steps = resolved;
        Ok(())
    }
}

/// Phase selectors first, then the reference's own overrides on every step list
fn apply_template_overrides(
    reference: &PhasesTemplateReference,
    phases: &mut Option<Vec<PhaseEntry>>,
    steps: &mut Option<Vec<Step>>,
) {
    for selector in &reference.phase_selectors {
        for entry in phases.iter_mut().flatten() {
            if let PhaseEntry::Phase(phase) = entry {
                if phase.name.as_deref() == Some(selector.name.as_str()) {
                    apply_step_overrides(&selector.step_overrides, &mut phase.steps);
                }
            }
        }
    }

    for entry in phases.iter_mut().flatten() {
        if let PhaseEntry::Phase(phase) = entry {
            apply_step_overrides(&reference.step_overrides, &mut phase.steps);
        }
    }
    if let Some(steps) = steps.as_mut() {
        apply_step_overrides(&reference.step_overrides, steps);
    }
}

/// Replace each step group named in `overrides` with the override steps
fn apply_step_overrides(overrides: &StepOverrides, steps: &mut Vec<Step>) {
    if overrides.is_empty() {
        return;
    }
    let mut replaced = Vec::with_capacity(steps.len());
    for step in steps.drain(..) {
        match step {
            Step::Group(group) if overrides.contains_key(&group.name) => {
                replaced.extend(overrides[&group.name].iter().cloned());
            }
            other => replaced.push(other),
        }
    }
    *steps = replaced;
}

/// Caller resources first; imported ones only when their name is new
fn merge_resources(overrides: Option<Vec<ProcessResource>>, imports: Option<Vec<ProcessResource>>) -> Vec<ProcessResource> {
    let mut merged = overrides.unwrap_or_default();
    for resource in imports.unwrap_or_default() {
        if !merged.iter().any(|r| r.name == resource.name) {
            merged.push(resource);
        }
    }
    merged
}

/// A leading `checkout` step becomes phase variables; a later one is an error
fn expand_checkout(phase: &mut Phase) -> ParseResult<()> {
    if let Some(Step::Checkout(checkout)) = phase.steps.first() {
        let variables = checkout_variables(checkout);
        phase.variables.extend(variables);
        phase.steps.remove(0);
    }
    if phase.steps.iter().any(|s| matches!(s, Step::Checkout(_))) {
        return Err(ParseError::validation(
            "Step 'checkout' is currently only supported as the first step within a phase.",
        ));
    }
    Ok(())
}

fn checkout_variables(checkout: &CheckoutStep) -> Vec<Variable> {
    let variable = |name: &str, value: &str| {
        Variable::Value(ValueVariable {
            name: name.to_string(),
            value: Some(value.to_string()),
            verbatim: false,
        })
    };
    if checkout.name == "none" {
        return vec![variable("build.syncSources", "false")];
    }
    let mut variables = Vec::new();
    if let Some(clean) = &checkout.clean {
        variables.push(variable("build.repository.clean", clean));
    }
    if let Some(depth) = &checkout.fetch_depth {
        variables.push(variable("agent.source.git.shallowFetchDepth", depth));
    }
    if let Some(lfs) = &checkout.lfs {
        variables.push(variable("agent.source.git.lfs", lfs));
    }
    variables
}

fn name_phases(phases: &mut [PhaseEntry]) {
    let mut names = NameBuilder::default();
    for entry in phases.iter() {
        if let PhaseEntry::Phase(Phase { name: Some(name), .. }) = entry {
            names.reserve(name);
        }
    }
    for entry in phases.iter_mut() {
        if let PhaseEntry::Phase(phase) = entry {
            if phase.name.as_deref().map_or(true, str::is_empty) {
                phase.name = Some(names.build("Phase"));
            }
        }
    }
}
