// Step converters
// Reads and writes task, shorthand, checkout, group and template steps

use crate::error::{ParseError, ParseResult};
use crate::process::{
    CheckoutStep, Step, StepGroup, StepOverrides, StepsTemplateReference, TaskReference, TaskStep,
};
use crate::yaml::{KeyComparer, Scalar, YamlReader, YamlWriter};

use std::collections::BTreeMap;

/// Shorthand forms that desugar to a fixed task reference
struct Shorthand {
    keyword: &'static str,
    task: &'static str,
    version: &'static str,
    inline: bool,
    extra_keys: &'static [&'static str],
}

const SCRIPT: Shorthand = Shorthand {
    keyword: "script",
    task: "CmdLine",
    version: "2",
    inline: false,
    extra_keys: &["failOnStderr", "workingDirectory"],
};

const BASH: Shorthand = Shorthand {
    keyword: "bash",
    task: "Bash",
    version: "3",
    inline: true,
    extra_keys: &["failOnStderr", "workingDirectory"],
};

const POWERSHELL: Shorthand = Shorthand {
    keyword: "powershell",
    task: "PowerShell",
    version: "2",
    inline: true,
    extra_keys: &[
        "errorActionPreference",
        "failOnStderr",
        "ignoreLASTEXITCODE",
        "workingDirectory",
    ],
};

const SHORTHANDS: [&Shorthand; 3] = [&SCRIPT, &BASH, &POWERSHELL];

impl Shorthand {
    fn read(&self, r: &mut YamlReader) -> ParseResult<Step> {
        let mut task = TaskStep::new(self.task, self.version);
        if self.inline {
            task.inputs.insert("targetType", "inline");
        }
        let script = r.expect_scalar()?;
        task.inputs.insert("script", script.value);

        while !r.allow_mapping_end() {
            let key = r.expect_scalar()?;
            match self.extra_keys.iter().find(|k| k.eq_ignore_ascii_case(&key.value)) {
                Some(extra) => {
                    let value = r.expect_scalar()?;
                    task.inputs.insert(*extra, value.value);
                }
                None => set_task_control_property(r, &mut task, &key)?,
            }
        }
        Ok(Step::Task(task))
    }

    /// True when `task` is exactly the desugared form of this shorthand
    fn matches(&self, task: &TaskStep) -> bool {
        if task.reference.name != self.task || task.reference.version != self.version {
            return false;
        }
        if !task.inputs.contains_key("script") {
            return false;
        }
        if self.inline
            && !task
                .inputs
                .get("targetType")
                .is_some_and(|t| t.eq_ignore_ascii_case("inline"))
        {
            return false;
        }
        task.inputs.keys().all(|key| {
            key.eq_ignore_ascii_case("script")
                || (self.inline && key.eq_ignore_ascii_case("targetType"))
                || self.extra_keys.iter().any(|extra| extra.eq_ignore_ascii_case(key))
        })
    }

    fn write(&self, w: &mut YamlWriter, task: &TaskStep) {
        let script = task.inputs.get("script").map(String::as_str).unwrap_or("");
        w.entry(self.keyword, script);
        for key in self.extra_keys {
            if let Some(value) = task.inputs.get(*key).filter(|v| !v.is_empty()) {
                w.entry(key, value.as_str());
            }
        }
        write_task_control_properties(w, task);
        write_task_environment(w, task);
    }
}

// =============================================================================
// Readers
// =============================================================================

pub fn read_steps(r: &mut YamlReader, simple_only: bool) -> ParseResult<Vec<Step>> {
    r.expect_sequence_start()?;
    let mut steps = Vec::new();
    while !r.allow_sequence_end() {
        steps.push(read_step(r, simple_only)?);
    }
    Ok(steps)
}

/// Read one step. With `simple_only`, groups and template references are
/// rejected (the body of a group or a steps template).
pub fn read_step(r: &mut YamlReader, simple_only: bool) -> ParseResult<Step> {
    r.expect_mapping_start()?;
    let first = r.expect_scalar()?;

    if let Some(shorthand) = SHORTHANDS.iter().find(|s| s.keyword == first.value) {
        return shorthand.read(r);
    }

    match first.value.as_str() {
        "task" => read_task_step(r),
        "checkout" => read_checkout_step(r),
        "group" => {
            if simple_only {
                return Err(ParseError::syntax(
                    Some(first.span),
                    "A step 'group' cannot be nested within a step group or steps template.",
                ));
            }
            let mut group = StepGroup {
                name: r.read_non_empty_string()?,
                steps: Vec::new(),
            };
            while !r.allow_mapping_end() {
                let key = r.expect_scalar()?;
                match key.value.as_str() {
                    "steps" => group.steps = read_steps(r, true)?,
                    _ => return Err(unexpected_property(&key)),
                }
            }
            Ok(Step::Group(group))
        }
        "template" => {
            if simple_only {
                return Err(ParseError::syntax(
                    Some(first.span),
                    "Steps 'template' cannot be nested within a step group or steps template.",
                ));
            }
            let mut reference = StepsTemplateReference {
                name: r.read_non_empty_string()?,
                ..Default::default()
            };
            while !r.allow_mapping_end() {
                let key = r.expect_scalar()?;
                match key.value.as_str() {
                    "parameters" => reference.parameters = r.read_mapping(1)?,
                    "steps" => reference.step_overrides = read_step_overrides(r)?,
                    _ => return Err(unexpected_property(&key)),
                }
            }
            Ok(Step::Template(reference))
        }
        _ => Err(ParseError::syntax(
            Some(first.span),
            format!("Unknown step type: '{}'", first.value),
        )),
    }
}

fn read_task_step(r: &mut YamlReader) -> ParseResult<Step> {
    let scalar = r.expect_scalar()?;
    let reference = parse_task_reference(&scalar)?;
    let mut task = TaskStep::new(&reference.name, &reference.version);

    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "inputs" => {
                task.inputs = r.read_mapping_of_string_string(KeyComparer::IgnoreCase)?.into_iter().collect()
            }
            _ => set_task_control_property(r, &mut task, &key)?,
        }
    }
    Ok(Step::Task(task))
}

/// `<name>@<int>`, both parts non-empty
fn parse_task_reference(scalar: &Scalar) -> ParseResult<TaskReference> {
    let parts: Vec<&str> = scalar.value.split('@').collect();
    let valid = parts.len() == 2
        && !parts[0].is_empty()
        && !parts[1].is_empty()
        && parts[1].bytes().all(|b| b.is_ascii_digit())
        && parts[1].parse::<i32>().is_ok();

    if !valid {
        return Err(ParseError::syntax(
            Some(scalar.span),
            format!(
                "Task reference must be in the format <NAME>@<VERSION>. For example MyTask@2. The following task reference format is invalid: '{}'",
                scalar.value
            ),
        ));
    }

    Ok(TaskReference {
        name: parts[0].to_string(),
        version: parts[1].to_string(),
    })
}

fn read_checkout_step(r: &mut YamlReader) -> ParseResult<Step> {
    let scalar = r.expect_scalar()?;
    let mut checkout = CheckoutStep {
        name: scalar.value.clone(),
        ..Default::default()
    };

    match scalar.value.as_str() {
        "self" => {
            while !r.allow_mapping_end() {
                let key = r.expect_scalar()?;
                match key.value.as_str() {
                    "clean" => checkout.clean = Some(r.read_non_empty_string()?),
                    "fetchDepth" => checkout.fetch_depth = Some(r.read_non_empty_string()?),
                    "lfs" => checkout.lfs = Some(r.read_non_empty_string()?),
                    _ => return Err(unexpected_property(&key)),
                }
            }
        }
        "none" => {
            r.expect_mapping_end()?;
        }
        _ => {
            return Err(ParseError::syntax(
                Some(scalar.span),
                format!(
                    "Unexpected resource name '{}'. The 'checkout' step currently can only be used with the resource name 'self' or 'none'.",
                    scalar.value
                ),
            ));
        }
    }

    Ok(Step::Checkout(checkout))
}

pub fn read_step_overrides(r: &mut YamlReader) -> ParseResult<StepOverrides> {
    r.expect_mapping_start()?;
    let mut overrides = BTreeMap::new();
    while !r.allow_mapping_end() {
        let group = r.read_non_empty_string()?;
        overrides.insert(group, read_steps(r, true)?);
    }
    Ok(overrides)
}

fn set_task_control_property(r: &mut YamlReader, task: &mut TaskStep, key: &Scalar) -> ParseResult<()> {
    match key.value.as_str() {
        "condition" => task.condition = Some(r.expect_scalar()?.value),
        "continueOnError" => task.continue_on_error = r.read_boolean()?,
        "enabled" => task.enabled = r.read_boolean()?,
        "env" => task.environment = r.read_mapping_of_string_string(KeyComparer::Ordinal)?,
        "name" => task.name = Some(r.expect_scalar()?.value),
        "timeoutInMinutes" => task.timeout_in_minutes = r.read_int32()?,
        _ => {
            return Err(ParseError::syntax(
                Some(key.span),
                format!("Unexpected property {}", key.value),
            ));
        }
    }
    Ok(())
}

pub(crate) fn unexpected_property(key: &Scalar) -> ParseError {
    ParseError::syntax(
        Some(key.span),
        format!("Unexpected property: '{}'", key.value),
    )
}

// =============================================================================
// Writers
// =============================================================================

pub fn write_steps(w: &mut YamlWriter, steps: &[Step]) {
    w.sequence_start();
    for step in steps {
        write_step(w, step);
    }
    w.sequence_end();
}

pub fn write_step(w: &mut YamlWriter, step: &Step) {
    w.mapping_start();
    match step {
        Step::Task(task) => match SHORTHANDS.iter().find(|s| s.matches(task)) {
            Some(shorthand) => shorthand.write(w, task),
            None => {
                let reference = if task.reference.version.is_empty() {
                    task.reference.name.clone()
                } else {
                    format!("{}@{}", task.reference.name, task.reference.version)
                };
                w.entry("task", reference);
                write_task_control_properties(w, task);
                if !task.inputs.is_empty() {
                    w.scalar("inputs");
                    w.write_string_pairs(task.inputs.iter());
                }
                write_task_environment(w, task);
            }
        },
        Step::Checkout(checkout) => {
            w.entry("checkout", checkout.name.as_str());
            for (key, value) in [
                ("clean", &checkout.clean),
                ("fetchDepth", &checkout.fetch_depth),
                ("lfs", &checkout.lfs),
            ] {
                if let Some(value) = value {
                    w.entry(key, value.as_str());
                }
            }
        }
        Step::Group(group) => {
            w.entry("group", group.name.as_str());
            if !group.steps.is_empty() {
                w.scalar("steps");
                write_steps(w, &group.steps);
            }
        }
        Step::Template(reference) => {
            w.entry("template", reference.name.as_str());
            if !reference.parameters.is_empty() {
                w.scalar("parameters");
                w.write_mapping(&reference.parameters);
            }
            write_step_overrides(w, &reference.step_overrides);
        }
    }
    w.mapping_end();
}

/// Emits a `steps` key holding the overrides, when there are any
pub fn write_step_overrides(w: &mut YamlWriter, overrides: &StepOverrides) {
    if overrides.is_empty() {
        return;
    }
    w.scalar("steps");
    w.mapping_start();
    for (group, steps) in overrides {
        w.scalar(group.as_str());
        write_steps(w, steps);
    }
    w.mapping_end();
}

fn write_task_control_properties(w: &mut YamlWriter, task: &TaskStep) {
    if let Some(name) = task.name.as_deref().filter(|n| !n.is_empty()) {
        w.entry("name", name);
    }
    if !task.enabled {
        w.entry("enabled", "false");
    }
    if let Some(condition) = task.condition.as_deref().filter(|c| !c.is_empty()) {
        w.entry("condition", condition);
    }
    if task.continue_on_error {
        w.entry("continueOnError", "true");
    }
    if task.timeout_in_minutes > 0 {
        w.entry("timeoutInMinutes", task.timeout_in_minutes.to_string());
    }
}

fn write_task_environment(w: &mut YamlWriter, task: &TaskStep) {
    if !task.environment.is_empty() {
        w.scalar("env");
        w.write_string_map(&task.environment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use pretty_assertions::assert_eq;

    fn parse(yaml: &str) -> ParseResult<Step> {
        let mut r = YamlReader::new(yaml)?;
        read_step(&mut r, false)
    }

    fn parse_task(yaml: &str) -> TaskStep {
        match parse(yaml).unwrap() {
            Step::Task(task) => task,
            other => panic!("expected task step, got {:?}", other),
        }
    }

    fn write(step: &Step) -> String {
        let mut w = YamlWriter::new();
        write_step(&mut w, step);
        w.into_string().unwrap()
    }

    fn round_trip(yaml: &str) {
        let first = parse(yaml).unwrap();
        let text = write(&first);
        let second = parse(&text).unwrap();
        assert_eq!(first, second, "round trip through:\n{}", text);
    }

    #[test]
    fn test_script_shorthand_desugars() {
        let task = parse_task("script: echo hi\nworkingDirectory: src\nname: greet\n");
        assert_eq!(task.reference.name, "CmdLine");
        assert_eq!(task.reference.version, "2");
        assert_eq!(task.inputs.get("script").map(String::as_str), Some("echo hi"));
        assert_eq!(task.inputs.get("workingDirectory").map(String::as_str), Some("src"));
        assert_eq!(task.name.as_deref(), Some("greet"));
        assert!(task.enabled);
    }

    #[test]
    fn test_shorthand_matches_task_form() {
        let pairs = [
            (
                "script: make\nfailOnStderr: true\n",
                "task: CmdLine@2\ninputs:\n  script: make\n  failOnStderr: true\n",
            ),
            (
                "bash: make\n",
                "task: Bash@3\ninputs:\n  targetType: inline\n  script: make\n",
            ),
            (
                "powershell: Write-Host hi\nerrorActionPreference: stop\n",
                "task: PowerShell@2\ninputs:\n  targetType: inline\n  script: Write-Host hi\n  errorActionPreference: stop\n",
            ),
        ];
        for (shorthand, task) in pairs {
            assert_eq!(parse(shorthand).unwrap(), parse(task).unwrap());
        }
    }

    #[test]
    fn test_writer_resugars_shorthand() {
        let step = parse("task: Bash@3\ninputs:\n  targetType: inline\n  script: make\n").unwrap();
        assert_eq!(write(&step), "bash: make\n");

        let step = parse("script: echo hi\nname: greet\n").unwrap();
        assert_eq!(write(&step), "script: echo hi\nname: greet\n");
    }

    #[test]
    fn test_task_inputs_ignore_key_case() {
        let mixed = parse("task: Bash@3\ninputs:\n  TargetType: inline\n  Script: make\n").unwrap();
        assert_eq!(mixed, parse("bash: make\n").unwrap());
        let Step::Task(task) = &mixed else {
            panic!("expected task step, got {:?}", mixed);
        };
        assert_eq!(task.inputs.get("script").map(String::as_str), Some("make"));
        assert_eq!(write(&mixed), "bash: make\n");

        let step = parse("task: CmdLine@2\ninputs:\n  SCRIPT: make\n  WorkingDirectory: src\n").unwrap();
        assert_eq!(write(&step), "script: make\nworkingDirectory: src\n");
    }

    #[test]
    fn test_duplicate_input_differing_in_case() {
        let err = parse("task: Bash@3\ninputs:\n  script: a\n  Script: b\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains("Duplicate key 'Script'"), "{}", err.message);
    }

    #[test]
    fn test_writer_keeps_task_form_for_file_scripts() {
        let step =
            parse("task: Bash@3\ninputs:\n  targetType: filePath\n  filePath: build.sh\n").unwrap();
        let text = write(&step);
        assert!(text.starts_with("task: Bash@3\n"), "{}", text);
        assert!(text.contains("filePath: build.sh"));
    }

    #[test]
    fn test_writer_keeps_task_form_for_extra_inputs() {
        let step = parse("task: CmdLine@2\ninputs:\n  script: make\n  custom: x\n").unwrap();
        assert!(write(&step).starts_with("task: CmdLine@2\n"));
    }

    #[test]
    fn test_invalid_task_reference() {
        for reference in ["MyTask", "MyTask@", "@2", "MyTask@two", "a@1@2"] {
            let err = parse(&format!("task: '{}'\n", reference)).unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::Syntax);
            assert!(
                err.message.starts_with("Task reference must be in the format <NAME>@<VERSION>."),
                "{}",
                err.message
            );
            assert!(err.message.ends_with(&format!("'{}'", reference)));
        }
    }

    #[test]
    fn test_control_properties() {
        let task = parse_task(
            "task: MyTask@1\ncondition: succeeded()\ncontinueOnError: yes\nenabled: off\ntimeoutInMinutes: 15\nenv:\n  A: 1\n",
        );
        assert_eq!(task.condition.as_deref(), Some("succeeded()"));
        assert!(task.continue_on_error);
        assert!(!task.enabled);
        assert_eq!(task.timeout_in_minutes, 15);
        assert_eq!(task.environment["A"], "1");
    }

    #[test]
    fn test_unexpected_property() {
        let err = parse("task: MyTask@1\nretries: 3\n").unwrap_err();
        assert_eq!(err.message, "Unexpected property retries");
    }

    #[test]
    fn test_checkout_self_none_other() {
        assert_eq!(
            parse("checkout: self\nclean: true\n").unwrap(),
            Step::Checkout(CheckoutStep {
                name: "self".to_string(),
                clean: Some("true".to_string()),
                ..Default::default()
            })
        );
        assert_eq!(
            parse("checkout: none\n").unwrap(),
            Step::Checkout(CheckoutStep {
                name: "none".to_string(),
                ..Default::default()
            })
        );
        let err = parse("checkout: other\n").unwrap_err();
        assert_eq!(
            err.message,
            "Unexpected resource name 'other'. The 'checkout' step currently can only be used with the resource name 'self' or 'none'."
        );
        assert!(parse("checkout: none\nclean: true\n").is_err());
    }

    #[test]
    fn test_group_cannot_nest() {
        let err = parse("group: outer\nsteps:\n- group: inner\n").unwrap_err();
        assert_eq!(
            err.message,
            "A step 'group' cannot be nested within a step group or steps template."
        );

        let err = parse("group: outer\nsteps:\n- template: t.yml\n").unwrap_err();
        assert_eq!(
            err.message,
            "Steps 'template' cannot be nested within a step group or steps template."
        );
    }

    #[test]
    fn test_unknown_step_type() {
        let err = parse("tsak: MyTask@1\n").unwrap_err();
        assert_eq!(err.message, "Unknown step type: 'tsak'");
        assert_eq!(err.span.map(|s| s.start.line), Some(1));
    }

    #[test]
    fn test_template_reference_with_overrides() {
        let step = parse(
            "template: steps.yml\nparameters:\n  a: 1\nsteps:\n  build:\n  - script: make\n",
        )
        .unwrap();
        let Step::Template(reference) = &step else {
            panic!("expected template reference");
        };
        assert_eq!(reference.name, "steps.yml");
        assert_eq!(reference.parameters.len(), 1);
        assert_eq!(reference.step_overrides["build"].len(), 1);
    }

    #[test]
    fn test_step_round_trips() {
        round_trip("script: echo hi\nfailOnStderr: true\nname: greet\nenabled: false\n");
        round_trip("bash: make\nworkingDirectory: src\ncontinueOnError: true\n");
        round_trip("powershell: Get-Date\nignoreLASTEXITCODE: true\ntimeoutInMinutes: 5\n");
        round_trip("task: MyTask@2\ninputs:\n  x: '1'\nenv:\n  HOME: /tmp\ncondition: always()\n");
        round_trip("checkout: self\nclean: true\nfetchDepth: 1\nlfs: false\n");
        round_trip("checkout: none\n");
        round_trip("group: build\nsteps:\n- script: make\n- bash: make test\n");
        round_trip(
            "template: steps.yml\nparameters:\n  list:\n  - a\n  - b\nsteps:\n  build:\n  - script: make\n",
        );
    }
}
