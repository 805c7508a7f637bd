// Pipeline composer
// Root documents, implicit stage/job normalization and `extends` merging

use crate::error::{ParseError, ParseResult};
use crate::pipeline::job::optional_name;
use crate::pipeline::stage::parse_stages;
use crate::pipeline::variables::parse_variables;
use crate::pipeline::{Container, Job, Pipeline, Pool, Resources, Stage};
use crate::template::context::Context;
use crate::template::reader::read_template;
use crate::template::schema::{EXTEND_TEMPLATE_ROOT, PIPELINE_ROOT};
use crate::template::token::{TemplateToken, TokenValue};

use tracing::debug;

/// Root-level keys that are job or stage properties end up here and are
/// parsed as the implicit job or stage.
enum Implicit {
    None,
    Job,
    Stage,
}

impl Pipeline {
    /// Parse an evaluated root document.
    ///
    /// Root `steps:` become one job inside one stage, root `jobs:` become
    /// one stage; both keep `name: None` until names are generated. An
    /// `extends` parent supplies the stages and is merged in afterwards.
    pub fn parse(context: &Context, token: &TemplateToken) -> ParseResult<Pipeline> {
        let mut pipeline = Pipeline::default();
        let mut parent = None;
        let mut implicit = Implicit::None;
        let mut unparsed = Vec::new();

        for (key, value) in token.expect_mapping("pipeline-root")? {
            match key.expect_string("pipeline-root")?.as_str() {
                "name" => pipeline.name = optional_name(value, "name")?,
                "parameters" => {}
                "variables" => {
                    let mut variables = Vec::new();
                    parse_variables(context, &mut variables, value)?;
                    pipeline.variables = Some(variables);
                }
                "extends" => parent = Some(parse_extends(context, value)?),
                "stages" => {
                    let mut stages = Vec::new();
                    parse_stages(context, &mut stages, value)?;
                    pipeline.stages = Some(stages);
                }
                "steps" => {
                    unparsed.push((key.clone(), value.clone()));
                    implicit = Implicit::Job;
                }
                "jobs" => {
                    unparsed.push((key.clone(), value.clone()));
                    if !matches!(implicit, Implicit::Job) {
                        implicit = Implicit::Stage;
                    }
                }
                "resources" => pipeline.resources = Some(parse_resources(value)?),
                "pool" => pipeline.pool = Some(Pool::parse(value)?),
                "appendCommitMessageToRunName" => {
                    pipeline.append_commit_message_to_run_name =
                        Some(value.expect_bool("appendCommitMessageToRunName")?)
                }
                "lockBehavior" => pipeline.lock_behavior = Some(value.expect_string("lockBehavior")?),
                "trigger" => pipeline.trigger = Some(value.clone()),
                "pr" => pipeline.pr = Some(value.clone()),
                "schedules" => pipeline.schedules = Some(value.clone()),
                _ => unparsed.push((key.clone(), value.clone())),
            }
        }

        let rest = TemplateToken {
            value: TokenValue::Mapping(unparsed),
            ..token.clone()
        };
        match implicit {
            Implicit::Job => {
                let mut job = Job::parse(context, &rest, true)?;
                job.name = None;
                pipeline.stages = Some(vec![Stage {
                    jobs: Some(vec![job]),
                    ..Default::default()
                }]);
            }
            Implicit::Stage => {
                let mut stage = Stage::parse(context, &rest, true)?;
                stage.name = None;
                pipeline.stages = Some(vec![stage]);
            }
            Implicit::None => {}
        }

        if let Some(parent) = parent {
            pipeline.merge_parent(parent)?;
        }
        pipeline.resolve_container_references();
        Ok(pipeline)
    }

    /// Fold the pipeline this one extends into it
    fn merge_parent(&mut self, parent: Pipeline) -> ParseResult<()> {
        self.stages = parent.stages;

        if let Some(parent_resources) = parent.resources {
            let resources = self.resources.get_or_insert_with(Resources::default);
            for container in parent_resources.containers {
                let alias = container.alias.clone().unwrap_or_default();
                resources
                    .containers
                    .retain(|c| !c.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&alias)));
                resources.containers.push(container);
            }
            for (kind, entries) in parent_resources.other {
                match resources.other.get_mut(&kind) {
                    Some(existing) => {
                        let what = format!("resources.{}", kind);
                        let mut items = existing.expect_sequence(&what)?.to_vec();
                        items.extend(entries.expect_sequence(&what)?.iter().cloned());
                        existing.value = TokenValue::Sequence(items);
                    }
                    None => {
                        resources.other.insert(kind, entries);
                    }
                }
            }
        }

        if let Some(variables) = parent.variables {
            if self.variables.is_some() {
                return Err(ParseError::validation("'variables' is already defined"));
            }
            self.variables = Some(variables);
        }
        Ok(())
    }

    /// Replace `container: name` on jobs and services with the container
    /// resource of that alias
    fn resolve_container_references(&mut self) {
        let Some(resources) = &self.resources else {
            return;
        };
        let resolve = |container: &mut Container| {
            if !container.is_reference() {
                return;
            }
            let alias = container.image.clone().unwrap_or_default();
            if let Some(resource) = resources.container(&alias) {
                debug!(alias = %alias, "resolved container resource");
                *container = resource.clone();
            }
        };

        for stage in self.stages.iter_mut().flatten() {
            for job in stage.jobs.iter_mut().flatten() {
                if let Some(container) = job.container.as_mut() {
                    resolve(container);
                }
                for service in job.services.iter_mut().flat_map(|s| s.values_mut()) {
                    resolve(service);
                }
            }
        }
    }
}

/// `extends: {template, parameters}`; returns the parsed parent pipeline
fn parse_extends(context: &Context, token: &TemplateToken) -> ParseResult<Pipeline> {
    let entries = token.expect_mapping("extends")?;
    let key_name = |index: usize| {
        entries
            .get(index)
            .and_then(|(k, _)| k.to_display_string())
            .unwrap_or_default()
    };
    if entries.len() == 2 && key_name(0) != "template" {
        return Err(entries[0].0.error(format!("Unexpected yaml key {} expected template", key_name(0))));
    }
    if entries.len() == 2 && key_name(1) != "parameters" {
        return Err(entries[1].0.error(format!("Unexpected yaml key {} expected parameters", key_name(1))));
    }
    if entries.len() > 2 {
        return Err(entries[2]
            .0
            .error(format!("Unexpected yaml keys {} after template reference", key_name(2))));
    }

    let mut template = None;
    let mut parameters = None;
    for (key, value) in entries {
        match key.as_str().unwrap_or_default() {
            "template" => template = Some(value.expect_non_empty_string("template")?),
            "parameters" => {
                value.expect_mapping("parameters")?;
                parameters = Some(value);
            }
            other => return Err(key.error(format!("Unexpected yaml key {} expected template", other))),
        }
    }
    let template = template.ok_or_else(|| token.error("'extends' requires a 'template'"))?;

    let mut loaded = read_template(context, &template, parameters, EXTEND_TEMPLATE_ROOT)?;
    register_repository_aliases(&mut loaded.context, &loaded.token)?;
    debug!(template = %loaded.name, "extending pipeline");
    Pipeline::parse(&loaded.context, &loaded.token).map_err(|e| e.with_file(loaded.name.as_str()))
}

fn parse_resources(token: &TemplateToken) -> ParseResult<Resources> {
    let mut resources = Resources::default();
    for (key, value) in token.expect_mapping("resources")? {
        let kind = key.expect_string("resources")?;
        if kind != "containers" {
            resources.other.insert(kind, value.clone());
            continue;
        }
        resources.containers.clear();
        for entry in value.expect_sequence("resources.containers")? {
            let alias = entry
                .expect_mapping("resources.containers")?
                .first()
                .map(|(_, v)| v.expect_non_empty_string("container"))
                .transpose()?
                .ok_or_else(|| entry.error("A container resource requires an alias"))?;
            let mut container = Container::parse(entry)?;
            container.alias = Some(alias);
            resources.containers.push(container);
        }
    }
    Ok(resources)
}

/// `resources.repositories` entries as alias to `name@ref` descriptors
fn repository_aliases(token: &TemplateToken) -> ParseResult<Vec<(String, String)>> {
    let Some(repositories) = token.get("resources").and_then(|r| r.get("repositories")) else {
        return Ok(Vec::new());
    };
    let mut aliases = Vec::new();
    for entry in repositories.expect_sequence("resources.repositories")? {
        let alias = match entry.get("repository") {
            Some(alias) => alias.expect_non_empty_string("repository")?,
            None => continue,
        };
        let name = match entry.get("name") {
            Some(name) => name.expect_non_empty_string("name")?,
            None => alias.clone(),
        };
        let descriptor = match entry.get("ref") {
            Some(git_ref) if !git_ref.is_null() => format!("{}@{}", name, git_ref.expect_string("ref")?),
            _ => name,
        };
        aliases.push((alias, descriptor));
    }
    Ok(aliases)
}

/// Make the `resources.repositories` of a loaded root or extended template
/// usable as `path@alias` inside it. Aliases the context already knows win.
fn register_repository_aliases(context: &mut Context, token: &TemplateToken) -> ParseResult<()> {
    for (alias, descriptor) in repository_aliases(token)? {
        if !context.repositories.contains_key(&alias) {
            debug!(alias = %alias, repository = %descriptor, "registered repository resource");
            context.repositories.insert(alias, descriptor);
        }
    }
    Ok(())
}

/// Read, evaluate and compose the pipeline at `path`.
///
/// Repository resources declared by the document become template aliases
/// unless the caller already registered the alias.
pub fn load_pipeline(context: &Context, path: &str) -> ParseResult<Pipeline> {
    load_pipeline_with_parameters(context, path, None)
}

/// [`load_pipeline`] with values for the root document's own `parameters`
pub fn load_pipeline_with_parameters(
    context: &Context,
    path: &str,
    parameters: Option<&TemplateToken>,
) -> ParseResult<Pipeline> {
    let mut loaded = read_template(context, path, parameters, PIPELINE_ROOT)?;
    register_repository_aliases(&mut loaded.context, &loaded.token)?;
    Pipeline::parse(&loaded.context, &loaded.token).map_err(|e| e.with_file(loaded.name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use crate::pipeline::Variable;
    use crate::template::context::{LocalFileProvider, MemoryFileProvider, NoopTraceWriter};
    use crate::template::schema::Schema;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup_templates(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            let mut file = fs::File::create(&path).unwrap();
            file.write_all(content.as_bytes()).unwrap();
        }
        dir
    }

    fn load(provider: &MemoryFileProvider, path: &str) -> ParseResult<Pipeline> {
        let schema = Schema::embedded().unwrap();
        let context = Context::new(provider, &NoopTraceWriter, &schema);
        load_pipeline(&context, path)
    }

    #[test]
    fn test_root_steps_become_implicit_stage_and_job() {
        let provider = MemoryFileProvider::new().with_file("azure-pipelines.yml", "steps:\n- script: echo hi\n");
        let pipeline = load(&provider, "azure-pipelines.yml").unwrap();

        let stages = pipeline.stages.unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name, None);
        let jobs = stages[0].jobs.as_ref().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, None);
        let steps = jobs[0].steps.as_ref().unwrap();
        assert_eq!(steps[0].reference.raw_name_and_version, "CmdLine@2");
        assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("echo hi"));
    }

    #[test]
    fn test_root_jobs_become_implicit_stage() {
        let provider = MemoryFileProvider::new().with_file(
            "ci.yml",
            "name: nightly\npool: Default\njobs:\n- job: a\n- job: b\n  dependsOn: a\n",
        );
        let pipeline = load(&provider, "ci.yml").unwrap();
        assert_eq!(pipeline.name.as_deref(), Some("nightly"));
        assert_eq!(pipeline.pool.as_ref().and_then(|p| p.name.as_deref()), Some("Default"));
        let stages = pipeline.stages.unwrap();
        assert_eq!(stages[0].name, None);
        assert_eq!(stages[0].jobs.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_parameters_drive_conditional_steps() {
        let provider = MemoryFileProvider::new().with_file(
            "ci.yml",
            "parameters:\n- name: test\n  type: boolean\n  default: false\nsteps:\n- script: build\n- ${{ if parameters.test }}:\n  - script: test\n",
        );
        let pipeline = load(&provider, "ci.yml").unwrap();
        let steps = pipeline.stages.unwrap()[0].jobs.as_ref().unwrap()[0].steps.clone().unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_extends_takes_parent_stages() {
        let provider = MemoryFileProvider::new()
            .with_file(
                "ci.yml",
                "trigger: [main]\nextends:\n  template: templates/base.yml\n  parameters:\n    buildSteps:\n    - script: make\n",
            )
            .with_file(
                "templates/base.yml",
                "parameters:\n- name: buildSteps\n  type: stepList\n  default: []\nvariables:\n  shared: yes\nstages:\n- stage: build\n  jobs:\n  - job: compile\n    steps:\n    - checkout: self\n    - ${{ each step in parameters.buildSteps }}:\n      - ${{ step }}\n",
            );
        let pipeline = load(&provider, "ci.yml").unwrap();

        assert!(pipeline.trigger.is_some());
        assert_eq!(pipeline.variables, Some(vec![Variable::value("shared", "yes")]));
        let stages = pipeline.stages.unwrap();
        assert_eq!(stages[0].name.as_deref(), Some("build"));
        let steps = stages[0].jobs.as_ref().unwrap()[0].steps.clone().unwrap();
        let tasks: Vec<_> = steps.iter().map(|s| s.reference.raw_name_and_version.as_str()).collect();
        assert_eq!(tasks, vec!["Checkout@1", "CmdLine@2"]);
        assert_eq!(steps[1].inputs.get("script").map(String::as_str), Some("make"));
    }

    #[test]
    fn test_extends_variables_conflict() {
        let provider = MemoryFileProvider::new()
            .with_file("ci.yml", "variables:\n  a: 1\nextends:\n  template: base.yml\n")
            .with_file("base.yml", "variables:\n  b: 2\nstages: []\n");
        let err = load(&provider, "ci.yml").unwrap_err();
        assert_eq!(err.message, "'variables' is already defined");
        assert_eq!(err.kind, ParseErrorKind::Validation);
    }

    #[test]
    fn test_extends_key_order() {
        let provider = MemoryFileProvider::new()
            .with_file("ci.yml", "extends:\n  parameters: {}\n  template: base.yml\n")
            .with_file("base.yml", "stages: []\n");
        let err = load(&provider, "ci.yml").unwrap_err();
        assert_eq!(err.message, "Unexpected yaml key parameters expected template");
    }

    #[test]
    fn test_extends_merges_resources() {
        let provider = MemoryFileProvider::new()
            .with_file(
                "ci.yml",
                "resources:\n  containers:\n  - container: build\n    image: rust:1\n  pipelines:\n  - pipeline: upstream\nextends:\n  template: base.yml\n",
            )
            .with_file(
                "base.yml",
                "resources:\n  containers:\n  - container: build\n    image: rust:2\n  pipelines:\n  - pipeline: tools\njobs:\n- job: a\n  container: build\n",
            );
        let pipeline = load(&provider, "ci.yml").unwrap();

        let resources = pipeline.resources.as_ref().unwrap();
        assert_eq!(resources.containers.len(), 1);
        assert_eq!(resources.container("BUILD").and_then(|c| c.image.as_deref()), Some("rust:2"));
        assert_eq!(
            resources.other["pipelines"].to_json(),
            serde_json::json!([{"pipeline": "upstream"}, {"pipeline": "tools"}])
        );
        let job = &pipeline.stages.as_ref().unwrap()[0].jobs.as_ref().unwrap()[0];
        assert_eq!(job.container.as_ref().and_then(|c| c.alias.as_deref()), Some("build"));
        assert_eq!(job.container.as_ref().and_then(|c| c.image.as_deref()), Some("rust:2"));
    }

    #[test]
    fn test_unknown_container_reference_is_an_image() {
        let provider = MemoryFileProvider::new().with_file("ci.yml", "jobs:\n- job: a\n  container: ubuntu:22.04\n");
        let pipeline = load(&provider, "ci.yml").unwrap();
        let job = &pipeline.stages.as_ref().unwrap()[0].jobs.as_ref().unwrap()[0];
        assert_eq!(job.container.as_ref().and_then(|c| c.image.as_deref()), Some("ubuntu:22.04"));
        assert_eq!(job.container.as_ref().and_then(|c| c.alias.as_deref()), None);
    }

    #[test]
    fn test_unknown_root_key_rejected_by_schema() {
        let provider = MemoryFileProvider::new().with_file("ci.yml", "stepz: []\n");
        let err = load(&provider, "ci.yml").unwrap_err();
        assert_eq!(err.message, "Unexpected value 'stepz'");
        assert_eq!(err.file.as_deref(), Some("ci.yml"));
    }

    #[test]
    fn test_repository_resources_become_aliases() {
        let provider = MemoryFileProvider::new()
            .with_file(
                "ci.yml",
                "resources:\n  repositories:\n  - repository: tools\n    type: git\n    name: org/tools\n    ref: refs/heads/main\nsteps:\n- template: steps/lint.yml@tools\n",
            )
            .with_repository_file("org/tools", "steps/lint.yml", "steps:\n- template: common.yml\n")
            .with_repository_file("org/tools", "steps/common.yml", "steps:\n- bash: lint\n");
        let pipeline = load(&provider, "ci.yml").unwrap();
        let steps = pipeline.stages.unwrap()[0].jobs.as_ref().unwrap()[0].steps.clone().unwrap();
        assert_eq!(steps[0].reference.raw_name_and_version, "Bash@3");
    }

    #[test]
    fn test_extended_template_registers_its_repositories() {
        let provider = MemoryFileProvider::new()
            .with_file("ci.yml", "extends:\n  template: base.yml\n")
            .with_file(
                "base.yml",
                "resources:\n  repositories:\n  - repository: tools\n    type: git\n    name: org/tools\nsteps:\n- template: lint.yml@tools\n",
            )
            .with_repository_file("org/tools", "lint.yml", "steps:\n- script: cargo clippy\n");
        let pipeline = load(&provider, "ci.yml").unwrap();
        let steps = pipeline.stages.unwrap()[0].jobs.as_ref().unwrap()[0].steps.clone().unwrap();
        assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("cargo clippy"));
    }

    #[test]
    fn test_root_repository_alias_wins_over_extended_one() {
        let provider = MemoryFileProvider::new()
            .with_file(
                "ci.yml",
                "resources:\n  repositories:\n  - repository: tools\n    type: git\n    name: org/pinned\nextends:\n  template: base.yml\n",
            )
            .with_file(
                "base.yml",
                "resources:\n  repositories:\n  - repository: tools\n    type: git\n    name: org/tools\nsteps:\n- template: lint.yml@tools\n",
            )
            .with_repository_file("org/pinned", "lint.yml", "steps:\n- script: pinned\n")
            .with_repository_file("org/tools", "lint.yml", "steps:\n- script: latest\n");
        let pipeline = load(&provider, "ci.yml").unwrap();
        let steps = pipeline.stages.unwrap()[0].jobs.as_ref().unwrap()[0].steps.clone().unwrap();
        assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("pinned"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = setup_templates(&[
            (
                "azure-pipelines.yml",
                "stages:\n- template: templates/stages.yml\n  parameters:\n    environments: [dev, prod]\n",
            ),
            (
                "templates/stages.yml",
                "parameters:\n  environments: []\nstages:\n- ${{ each env in parameters.environments }}:\n  - stage: deploy_${{ env }}\n    jobs:\n    - template: jobs.yml\n      parameters:\n        target: ${{ env }}\n",
            ),
            (
                "templates/jobs.yml",
                "parameters:\n  target: ''\njobs:\n- job: ship\n  steps:\n  - script: ./deploy.sh ${{ parameters.target }}\n",
            ),
        ]);
        let provider = LocalFileProvider::new(dir.path());
        let schema = Schema::embedded().unwrap();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        let pipeline = load_pipeline(&context, "azure-pipelines.yml").unwrap();

        let stages = pipeline.stages.unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name.clone().unwrap_or_default()).collect();
        assert_eq!(names, vec!["deploy_dev", "deploy_prod"]);
        let step = &stages[1].jobs.as_ref().unwrap()[0].steps.as_ref().unwrap()[0];
        assert_eq!(step.inputs.get("script").map(String::as_str), Some("./deploy.sh prod"));
    }

    #[test]
    fn test_root_parameters_from_caller() {
        let provider = MemoryFileProvider::new().with_file(
            "ci.yml",
            "parameters:\n- name: tool\n  type: string\n  default: make\nsteps:\n- script: ${{ parameters.tool }}\n",
        );
        let schema = Schema::embedded().unwrap();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        let script = |pipeline: Pipeline| {
            let stages = pipeline.stages.unwrap();
            let steps = stages[0].jobs.as_ref().unwrap()[0].steps.clone().unwrap();
            steps[0].inputs.get("script").cloned()
        };

        let defaulted = load_pipeline(&context, "ci.yml").unwrap();
        assert_eq!(script(defaulted).as_deref(), Some("make"));

        let provided = TemplateToken::load("tool: cargo\n", None).unwrap();
        let overridden = load_pipeline_with_parameters(&context, "ci.yml", Some(&provided)).unwrap();
        assert_eq!(script(overridden).as_deref(), Some("cargo"));
    }
}
