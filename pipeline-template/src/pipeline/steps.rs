// Step composer
// Desugars step shorthands into task steps and splices step templates

use crate::error::{ParseError, ParseResult};
use crate::pipeline::{StepTarget, TaskReference, TaskStep};
use crate::template::context::Context;
use crate::template::reader::read_template;
use crate::template::schema::STEP_TEMPLATE_ROOT;
use crate::template::token::TemplateToken;

use tracing::debug;

/// Well-known id of the built-in checkout task
pub const CHECKOUT_TASK_ID: &str = "6d15af64-176c-496d-b583-fd2ae21d4df4";

/// Parse every entry of a `steps:` sequence. Null yields no steps.
pub fn parse_step_list(context: &Context, token: &TemplateToken) -> ParseResult<Vec<TaskStep>> {
    let mut steps = Vec::new();
    if token.is_null() {
        return Ok(steps);
    }
    for step in token.expect_sequence("steps")? {
        parse_steps(context, &mut steps, step)?;
    }
    Ok(steps)
}

/// Parse one `steps:` entry into `steps`. A template reference appends
/// every step of the referenced template, in order.
pub fn parse_steps(context: &Context, steps: &mut Vec<TaskStep>, token: &TemplateToken) -> ParseResult<()> {
    let entries = token.expect_mapping("steps")?;
    let Some(((primary_key, primary_value), rest)) = entries.split_first() else {
        return Err(token.error("Expected a step, found an empty mapping"));
    };
    let kind = primary_key.expect_string("step")?;

    if kind == "template" {
        return parse_template_step(context, steps, primary_value, rest);
    }

    let mut step = TaskStep::default();
    let mut unparsed = Vec::new();
    for (key, value) in rest {
        if !read_control_property(&mut step, key, value)? {
            unparsed.push((key, value));
        }
    }

    let primary = primary_value.expect_string(&kind)?;
    let shorthand = |step: &mut TaskStep, task: &str, input: &str| -> ParseResult<()> {
        step.reference = task_reference(context, task).map_err(|e| e.with_span(primary_key.span))?;
        add_inputs(step, &unparsed)?;
        step.inputs.insert(input, primary.clone());
        Ok(())
    };

    match kind.as_str() {
        "task" => {
            step.reference = task_reference(context, &primary).map_err(|e| e.with_span(primary_value.span))?;
            for (key, value) in &unparsed {
                if key.as_str() == Some("inputs") && !value.is_null() {
                    for (name, input) in value.expect_string_map("inputs")? {
                        step.inputs.insert(name, input);
                    }
                }
            }
        }
        "powershell" | "pwsh" => {
            shorthand(&mut step, "PowerShell@2", "script")?;
            step.inputs.insert("targetType", "inline");
            if kind == "pwsh" {
                step.inputs.insert("pwsh", "true");
            }
        }
        "bash" => {
            shorthand(&mut step, "Bash@3", "script")?;
            step.inputs.insert("targetType", "inline");
        }
        "script" => shorthand(&mut step, "CmdLine@2", "script")?,
        "checkout" => shorthand(&mut step, "Checkout@1", "repository")?,
        "download" => shorthand(&mut step, "DownloadPipelineArtifact@2", "buildType")?,
        "downloadBuild" => shorthand(&mut step, "DownloadBuildArtifacts@0", "buildType")?,
        "getPackage" => shorthand(&mut step, "DownloadPackage@1", "definition")?,
        "publish" => shorthand(&mut step, "PublishPipelineArtifact@1", "path")?,
        "reviewApp" => shorthand(&mut step, "ReviewApp@0", "resourceName")?,
        other => return Err(primary_key.error(format!("Unknown step type: '{}'", other))),
    }

    steps.push(step);
    Ok(())
}

fn parse_template_step(
    context: &Context,
    steps: &mut Vec<TaskStep>,
    path: &TemplateToken,
    rest: &[(TemplateToken, TemplateToken)],
) -> ParseResult<()> {
    let path = path.expect_non_empty_string("template")?;
    let parameters = template_parameters(rest)?;

    let loaded = read_template(context, &path, parameters, STEP_TEMPLATE_ROOT)?;
    let before = steps.len();
    if let Some(template_steps) = loaded.token.get("steps") {
        for step in template_steps.expect_sequence("steps")? {
            parse_steps(&loaded.context, steps, step).map_err(|e| e.with_file(loaded.name.as_str()))?;
        }
    }
    debug!(template = %loaded.name, count = steps.len() - before, "spliced step template");
    Ok(())
}

/// The optional `parameters:` that may follow a `template:` key
pub(crate) fn template_parameters(rest: &[(TemplateToken, TemplateToken)]) -> ParseResult<Option<&TemplateToken>> {
    match rest {
        [] => Ok(None),
        [(key, value)] if key.as_str() == Some("parameters") => {
            value.expect_mapping("parameters")?;
            Ok(Some(value))
        }
        [(key, _)] => Err(key.error(format!(
            "Unexpected yaml key '{}', expected parameters",
            key.as_str().unwrap_or_default()
        ))),
        [_, (key, _), ..] => Err(key.error(format!(
            "Unexpected yaml key '{}' after template reference",
            key.as_str().unwrap_or_default()
        ))),
    }
}

/// Apply a control property. Returns false when `key` is not one.
fn read_control_property(step: &mut TaskStep, key: &TemplateToken, value: &TemplateToken) -> ParseResult<bool> {
    match key.expect_string("step key")?.as_str() {
        "condition" => step.condition = Some(value.expect_string("condition")?),
        "continueOnError" => step.continue_on_error = Some(value.expect_bool("continueOnError")?),
        "enabled" => step.enabled = Some(value.expect_bool("enabled")?),
        "retryCountOnTaskFailure" => {
            step.retry_count_on_task_failure = Some(expect_i32(value, "retryCountOnTaskFailure")?)
        }
        "timeoutInMinutes" => step.timeout_in_minutes = Some(expect_i32(value, "timeoutInMinutes")?),
        "target" => step.target = Some(read_target(value)?),
        "env" => step.env = value.expect_string_map("env")?.into_iter().collect(),
        "name" => step.name = Some(value.expect_string("name")?),
        "displayName" => step.display_name = Some(value.expect_string("displayName")?),
        _ => return Ok(false),
    }
    Ok(true)
}

fn expect_i32(token: &TemplateToken, what: &str) -> ParseResult<i32> {
    let value = token.expect_int(what)?;
    i32::try_from(value).map_err(|_| token.error(format!("Value for '{}' is out of range", what)))
}

fn read_target(token: &TemplateToken) -> ParseResult<StepTarget> {
    if let Some(container) = token.as_str() {
        return Ok(StepTarget {
            target: Some(container.to_string()),
            ..Default::default()
        });
    }

    let mut target = StepTarget::default();
    for (key, value) in token.expect_mapping("target")? {
        match key.as_str().unwrap_or_default() {
            "container" => target.target = value.as_str().map(str::to_string),
            "commands" => target.commands = value.as_str().map(str::to_string),
            "settableVariables" => {
                target.settable_variables = Some(if value.as_str() == Some("none") {
                    Vec::new()
                } else {
                    value.expect_string_list("settableVariables")?
                });
            }
            _ => {}
        }
    }
    Ok(target)
}

fn add_inputs(step: &mut TaskStep, unparsed: &[(&TemplateToken, &TemplateToken)]) -> ParseResult<()> {
    for (key, value) in unparsed {
        let name = key.expect_string("step key")?;
        let input = value.expect_string(&name)?;
        step.inputs.insert(name, input);
    }
    Ok(())
}

/// Resolve `name@version` to a task reference. The checkout task is built
/// in; everything else goes through the task catalog when one is set.
pub fn task_reference(context: &Context, task: &str) -> ParseResult<TaskReference> {
    let checkout = ["Checkout@1", "Checkout@1.0.0"]
        .iter()
        .any(|known| known.eq_ignore_ascii_case(task));
    if checkout || is_checkout_id(task) {
        return Ok(TaskReference {
            id: Some(CHECKOUT_TASK_ID.to_string()),
            name: Some("Checkout".to_string()),
            version: Some("1.0.0".to_string()),
            raw_name_and_version: task.to_string(),
        });
    }

    match context.task_metadata {
        Some(catalog) => {
            let metadata = catalog
                .resolve(task)
                .ok_or_else(|| ParseError::validation(format!("Failed to resolve task {}", task)))?;
            Ok(TaskReference {
                id: Some(metadata.id),
                name: Some(metadata.name),
                version: Some(metadata.version),
                raw_name_and_version: task.to_string(),
            })
        }
        None => Ok(TaskReference {
            raw_name_and_version: task.to_string(),
            ..Default::default()
        }),
    }
}

fn is_checkout_id(task: &str) -> bool {
    task.split_once('@').is_some_and(|(id, version)| {
        id.eq_ignore_ascii_case(CHECKOUT_TASK_ID) && (version == "1" || version == "1.0.0")
    })
}

impl TaskStep {
    /// Token form used when a step is passed as a template parameter.
    /// Parsing it again yields an equal step.
    pub fn to_token(&self) -> TemplateToken {
        let mut entries = vec![(
            "task".to_string(),
            TemplateToken::string(self.reference.raw_name_and_version.as_str()),
        )];
        let mut push = |key: &str, value: TemplateToken| entries.push((key.to_string(), value));

        if let Some(name) = &self.name {
            push("name", TemplateToken::string(name.as_str()));
        }
        if let Some(display_name) = &self.display_name {
            push("displayName", TemplateToken::string(display_name.as_str()));
        }
        if let Some(condition) = &self.condition {
            push("condition", TemplateToken::string(condition.as_str()));
        }
        if let Some(continue_on_error) = self.continue_on_error {
            push("continueOnError", TemplateToken::boolean(continue_on_error));
        }
        if let Some(enabled) = self.enabled {
            push("enabled", TemplateToken::boolean(enabled));
        }
        if let Some(retries) = self.retry_count_on_task_failure {
            push("retryCountOnTaskFailure", TemplateToken::number(retries as f64));
        }
        if let Some(timeout) = self.timeout_in_minutes {
            push("timeoutInMinutes", TemplateToken::number(timeout as f64));
        }
        if let Some(target) = &self.target {
            let mut fields = Vec::new();
            if let Some(container) = &target.target {
                fields.push(("container", TemplateToken::string(container.as_str())));
            }
            if let Some(commands) = &target.commands {
                fields.push(("commands", TemplateToken::string(commands.as_str())));
            }
            if let Some(settable) = &target.settable_variables {
                fields.push(("settableVariables", string_sequence_or_none(settable)));
            }
            push("target", TemplateToken::from_pairs(fields));
        }
        if !self.env.is_empty() {
            push("env", string_map(self.env.iter()));
        }
        if !self.inputs.is_empty() {
            push("inputs", string_map(self.inputs.iter()));
        }
        TemplateToken::from_pairs(entries)
    }
}

fn string_sequence_or_none(items: &[String]) -> TemplateToken {
    if items.is_empty() {
        return TemplateToken::string("none");
    }
    TemplateToken::sequence(items.iter().map(|i| TemplateToken::string(i.as_str())).collect())
}

pub(crate) fn string_map<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> TemplateToken {
    TemplateToken::from_pairs(entries.map(|(k, v)| (k.as_str(), TemplateToken::string(v.as_str()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::context::{MemoryFileProvider, NoopTraceWriter, StaticTaskCatalog, TaskMetadata};
    use crate::template::schema::Schema;
    use pretty_assertions::assert_eq;

    fn parse_with(provider: &MemoryFileProvider, yaml: &str) -> ParseResult<Vec<TaskStep>> {
        let schema = Schema::embedded().unwrap();
        let context = Context::new(provider, &NoopTraceWriter, &schema);
        parse_step_list(&context, &TemplateToken::load(yaml, None).unwrap())
    }

    fn parse(yaml: &str) -> Vec<TaskStep> {
        parse_with(&MemoryFileProvider::new(), yaml).unwrap()
    }

    #[test]
    fn test_script_shorthand() {
        let steps = parse("- script: echo hi\n  displayName: Say hi\n  workingDirectory: src\n");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].reference.raw_name_and_version, "CmdLine@2");
        assert_eq!(steps[0].reference.id, None);
        assert_eq!(steps[0].display_name.as_deref(), Some("Say hi"));
        assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("echo hi"));
        assert_eq!(steps[0].inputs.get("workingDirectory").map(String::as_str), Some("src"));
    }

    #[test]
    fn test_unresolved_task_keeps_raw_reference() {
        let steps = parse("- task: MyTask@2\n  inputs:\n    x: \"1\"\n");
        assert_eq!(
            steps[0].reference,
            TaskReference {
                raw_name_and_version: "MyTask@2".to_string(),
                ..Default::default()
            }
        );
        assert_eq!(steps[0].inputs.get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_task_catalog_resolution() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let catalog = StaticTaskCatalog::new().with_task(
            "MyTask@2",
            TaskMetadata {
                id: "0a1b".to_string(),
                name: "MyTask".to_string(),
                version: "2.1.0".to_string(),
            },
        );
        let context = Context::new(&provider, &NoopTraceWriter, &schema).with_task_metadata(&catalog);

        let token = TemplateToken::load("- task: mytask@2\n- task: Other@1\n", None).unwrap();
        let items = token.as_sequence().unwrap();
        let mut steps = Vec::new();
        parse_steps(&context, &mut steps, &items[0]).unwrap();
        assert_eq!(steps[0].reference.id.as_deref(), Some("0a1b"));
        assert_eq!(steps[0].reference.version.as_deref(), Some("2.1.0"));

        let err = parse_steps(&context, &mut steps, &items[1]).unwrap_err();
        assert_eq!(err.message, "Failed to resolve task Other@1");
    }

    #[test]
    fn test_shell_shorthands() {
        let steps = parse("- bash: make\n- powershell: dir\n- pwsh: ls\n");
        assert_eq!(steps[0].reference.raw_name_and_version, "Bash@3");
        assert_eq!(steps[0].inputs.get("targetType").map(String::as_str), Some("inline"));
        assert_eq!(steps[1].reference.raw_name_and_version, "PowerShell@2");
        assert!(!steps[1].inputs.contains_key("pwsh"));
        assert_eq!(steps[2].inputs.get("pwsh").map(String::as_str), Some("true"));
        assert_eq!(steps[2].inputs.get("script").map(String::as_str), Some("ls"));
    }

    #[test]
    fn test_task_inputs_ignore_key_case() {
        let steps = parse("- task: Bash@3\n  inputs:\n    TargetType: inline\n    Script: make\n- bash: make\n");
        assert_eq!(steps[0], steps[1]);
        assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("make"));

        let steps = parse("- script: echo hi\n  WorkingDirectory: src\n");
        assert_eq!(steps[0].inputs.get("workingDirectory").map(String::as_str), Some("src"));
        assert_eq!(steps[0].inputs.keys().collect::<Vec<_>>(), vec!["script", "WorkingDirectory"]);
    }

    #[test]
    fn test_checkout_uses_builtin_task() {
        let steps = parse("- checkout: self\n  clean: true\n  fetchDepth: 1\n");
        assert_eq!(steps[0].reference.id.as_deref(), Some(CHECKOUT_TASK_ID));
        assert_eq!(steps[0].reference.name.as_deref(), Some("Checkout"));
        assert_eq!(steps[0].inputs.get("repository").map(String::as_str), Some("self"));
        assert_eq!(steps[0].inputs.get("clean").map(String::as_str), Some("true"));
        assert_eq!(steps[0].inputs.get("fetchDepth").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_artifact_shorthands() {
        let steps = parse(
            "- download: current\n- downloadBuild: specific\n- getPackage: feed\n- publish: out\n- reviewApp: app\n",
        );
        let tasks: Vec<_> = steps
            .iter()
            .map(|s| s.reference.raw_name_and_version.as_str())
            .collect();
        assert_eq!(
            tasks,
            vec![
                "DownloadPipelineArtifact@2",
                "DownloadBuildArtifacts@0",
                "DownloadPackage@1",
                "PublishPipelineArtifact@1",
                "ReviewApp@0"
            ]
        );
        assert_eq!(steps[0].inputs.get("buildType").map(String::as_str), Some("current"));
        assert_eq!(steps[2].inputs.get("definition").map(String::as_str), Some("feed"));
        assert_eq!(steps[3].inputs.get("path").map(String::as_str), Some("out"));
        assert_eq!(steps[4].inputs.get("resourceName").map(String::as_str), Some("app"));
    }

    #[test]
    fn test_control_properties() {
        let steps = parse(
            "- script: x\n  condition: succeeded()\n  continueOnError: true\n  enabled: false\n  retryCountOnTaskFailure: 2\n  timeoutInMinutes: 10\n  env:\n    A: b\n  target:\n    container: builder\n    settableVariables: none\n",
        );
        let step = &steps[0];
        assert_eq!(step.condition.as_deref(), Some("succeeded()"));
        assert_eq!(step.continue_on_error, Some(true));
        assert_eq!(step.enabled, Some(false));
        assert_eq!(step.retry_count_on_task_failure, Some(2));
        assert_eq!(step.timeout_in_minutes, Some(10));
        assert_eq!(step.env.get("A").map(String::as_str), Some("b"));
        let target = step.target.as_ref().unwrap();
        assert_eq!(target.target.as_deref(), Some("builder"));
        assert_eq!(target.settable_variables, Some(vec![]));
        assert!(!step.inputs.contains_key("env"));
    }

    #[test]
    fn test_unknown_step_type() {
        let err = parse_with(&MemoryFileProvider::new(), "- run: x\n").unwrap_err();
        assert_eq!(err.message, "Unknown step type: 'run'");
        assert!(err.span.is_some());
    }

    #[test]
    fn test_step_template_splices_in_order() {
        let provider = MemoryFileProvider::new().with_file(
            "templates/build.yml",
            "parameters:\n- name: config\n  default: Debug\nsteps:\n- script: build ${{ parameters.config }}\n- template: test.yml\n",
        )
        .with_file("templates/test.yml", "steps:\n- script: test\n");

        let steps = parse_with(
            &provider,
            "- script: first\n- template: templates/build.yml\n  parameters:\n    config: Release\n- script: last\n",
        )
        .unwrap();
        let scripts: Vec<_> = steps
            .iter()
            .map(|s| s.inputs.get("script").cloned().unwrap_or_default())
            .collect();
        assert_eq!(scripts, vec!["first", "build Release", "test", "last"]);
    }

    #[test]
    fn test_template_step_rejects_extra_keys() {
        let provider = MemoryFileProvider::new().with_file("t.yml", "steps: []\n");
        let err = parse_with(&provider, "- template: t.yml\n  displayName: x\n").unwrap_err();
        assert_eq!(err.message, "Unexpected yaml key 'displayName', expected parameters");
    }

    #[test]
    fn test_token_form_parses_back() {
        let original = parse(
            "- checkout: self\n  clean: true\n- pwsh: Get-Date\n  name: when\n  continueOnError: true\n  target: builder\n",
        );
        let tokens = TemplateToken::sequence(original.iter().map(TaskStep::to_token).collect());
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        assert_eq!(parse_step_list(&context, &tokens).unwrap(), original);
    }
}
