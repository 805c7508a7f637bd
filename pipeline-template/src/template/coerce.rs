// Parameter type coercion
// Typed template parameters are checked and normalized to their token form

use crate::error::{ParseError, ParseResult};
use crate::pipeline::job::assert_deployment;
use crate::pipeline::steps::{parse_step_list, parse_steps};
use crate::pipeline::{parse_jobs, parse_stages, Job, Stage, TaskStep};
use crate::template::context::Context;
use crate::template::token::{TemplateToken, TokenValue};

/// Coerce `token` to the declared parameter `kind`.
///
/// Scalars must already have the declared kind (null becomes the zero
/// value). Steps, jobs and stages are parsed, so templates inside them are
/// resolved, and come back in the token form that parses to the same
/// entity.
pub fn convert_value(context: &Context, token: &TemplateToken, kind: &str) -> ParseResult<TemplateToken> {
    let converted = match kind {
        "object" => return Ok(token.clone()),
        "boolean" => scalar(token, TemplateToken::boolean(false), "boolean", |v| {
            matches!(v, TokenValue::Boolean(_))
        })?,
        "number" => scalar(token, TemplateToken::number(0.0), "number", |v| {
            matches!(v, TokenValue::Number(_))
        })?,
        "string" => scalar(token, TemplateToken::string(""), "string", |v| {
            matches!(v, TokenValue::String(_))
        })?,
        "step" if token.is_null() => TemplateToken::null(),
        "step" => {
            let mut steps = Vec::new();
            parse_steps(context, &mut steps, token)?;
            match steps.first() {
                Some(step) => step.to_token(),
                None => TemplateToken::null(),
            }
        }
        "stepList" => steps_token(&parse_step_list(context, token)?),
        "job" if token.is_null() => TemplateToken::null(),
        "job" => Job::parse(context, token, false)?.to_token(),
        "jobList" => jobs_token(&parse_job_list(context, token)?),
        "deployment" if token.is_null() => TemplateToken::null(),
        "deployment" => {
            let job = Job::parse(context, token, false)?;
            assert_deployment(&job, token)?;
            job.to_token()
        }
        "deploymentList" => {
            let jobs = parse_job_list(context, token)?;
            for job in &jobs {
                assert_deployment(job, token)?;
            }
            jobs_token(&jobs)
        }
        "stage" if token.is_null() => TemplateToken::null(),
        "stage" => Stage::parse(context, token, false)?.to_token(),
        "stageList" => {
            let mut stages = Vec::new();
            parse_stages(context, &mut stages, token)?;
            TemplateToken::sequence(stages.iter().map(Stage::to_token).collect())
        }
        other => {
            return Err(ParseError::validation(format!(
                "This parameter type is not supported: {}",
                other
            ))
            .with_span(token.span))
        }
    };
    Ok(converted.located_at(token))
}

fn scalar(
    token: &TemplateToken,
    zero: TemplateToken,
    kind: &str,
    matches: impl Fn(&TokenValue) -> bool,
) -> ParseResult<TemplateToken> {
    if token.is_null() {
        return Ok(zero);
    }
    if matches(&token.value) {
        return Ok(token.clone());
    }
    Err(ParseError::validation(format!(
        "Expected a {} type, found {}",
        kind,
        token.kind_name()
    ))
    .with_span(token.span))
}

fn parse_job_list(context: &Context, token: &TemplateToken) -> ParseResult<Vec<Job>> {
    let mut jobs = Vec::new();
    parse_jobs(context, &mut jobs, token)?;
    Ok(jobs)
}

fn steps_token(steps: &[TaskStep]) -> TemplateToken {
    TemplateToken::sequence(steps.iter().map(TaskStep::to_token).collect())
}

fn jobs_token(jobs: &[Job]) -> TemplateToken {
    TemplateToken::sequence(jobs.iter().map(Job::to_token).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use crate::template::context::{MemoryFileProvider, NoopTraceWriter};
    use crate::template::schema::Schema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn convert(yaml: &str, kind: &str) -> ParseResult<TemplateToken> {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        convert_value(&context, &TemplateToken::load(yaml, None).unwrap(), kind)
    }

    #[test]
    fn test_scalar_zero_values() {
        assert_eq!(convert("", "boolean").unwrap().to_json(), json!(false));
        assert_eq!(convert("", "number").unwrap().to_json(), json!(0));
        assert_eq!(convert("", "string").unwrap().to_json(), json!(""));
        assert_eq!(convert("", "stepList").unwrap().to_json(), json!([]));
        assert!(convert("", "job").unwrap().is_null());
    }

    #[test]
    fn test_scalar_kinds_are_strict() {
        assert_eq!(convert("true", "boolean").unwrap().to_json(), json!(true));
        assert_eq!(convert("'3'", "string").unwrap().to_json(), json!("3"));
        let err = convert("'true'", "boolean").unwrap_err();
        assert_eq!(err.message, "Expected a boolean type, found string");
        assert_eq!(err.kind, ParseErrorKind::Validation);
        assert!(convert("[1]", "number").is_err());
    }

    #[test]
    fn test_object_passes_through() {
        assert_eq!(
            convert("a: [1, x]", "object").unwrap().to_json(),
            json!({"a": [1, "x"]})
        );
    }

    #[test]
    fn test_step_list_is_desugared() {
        let token = convert("- script: echo hi\n- bash: make\n", "stepList").unwrap();
        assert_eq!(
            token.to_json(),
            json!([
                {"task": "CmdLine@2", "inputs": {"script": "echo hi"}},
                {"task": "Bash@3", "inputs": {"script": "make", "targetType": "inline"}}
            ])
        );
    }

    #[test]
    fn test_single_step() {
        let token = convert("checkout: none\n", "step").unwrap();
        assert_eq!(
            token.to_json(),
            json!({"task": "Checkout@1", "inputs": {"repository": "none"}})
        );
    }

    #[test]
    fn test_deployment_assertion() {
        let err = convert("job: build\n", "deployment").unwrap_err();
        assert_eq!(err.message, "Only Deployment Jobs are valid");
        let err = convert("- deployment: a\n- job: b\n", "deploymentList").unwrap_err();
        assert_eq!(err.message, "Only Deployment Jobs are valid");
        assert!(convert("deployment: ship\nenvironment: prod\n", "deployment").is_ok());
    }

    #[test]
    fn test_job_and_stage_forms() {
        assert_eq!(
            convert("- job: a\n  steps:\n  - script: x\n", "jobList").unwrap().to_json(),
            json!([{"job": "a", "steps": [{"task": "CmdLine@2", "inputs": {"script": "x"}}]}])
        );
        assert_eq!(
            convert("stage: s\njobs: []\n", "stage").unwrap().to_json(),
            json!({"stage": "s", "jobs": []})
        );
    }

    #[test]
    fn test_unsupported_type() {
        let err = convert("x", "secureFile").unwrap_err();
        assert_eq!(err.message, "This parameter type is not supported: secureFile");
    }
}
