// Stage composer
// Stages and stage templates

use crate::error::ParseResult;
use crate::pipeline::container::strings;
use crate::pipeline::job::{optional_name, parse_jobs, stringify_scalars, text};
use crate::pipeline::steps::template_parameters;
use crate::pipeline::variables::{parse_variables, variables_to_token};
use crate::pipeline::{Job, Pool, Stage};
use crate::template::context::Context;
use crate::template::reader::read_template;
use crate::template::schema::STAGE_TEMPLATE_ROOT;
use crate::template::token::TemplateToken;

use tracing::debug;

impl Stage {
    /// Parse a stage mapping. `implicit` skips the `stage:` first-key
    /// check for root-level `jobs:`.
    pub fn parse(context: &Context, token: &TemplateToken, implicit: bool) -> ParseResult<Stage> {
        let entries = token.expect_mapping("stage")?;
        if !implicit && entries.first().and_then(|(k, _)| k.as_str()) != Some("stage") {
            return Err(token.error("Expected stage"));
        }

        let mut stage = Stage::default();
        for (key, value) in entries {
            match key.expect_string("stage")?.as_str() {
                "stage" => stage.name = optional_name(value, "stage")?,
                "displayName" => stage.display_name = Some(value.expect_string("displayName")?),
                "dependsOn" => stage.depends_on = Some(value.expect_string_list("dependsOn")?),
                "condition" => stage.condition = Some(value.expect_string("condition")?),
                "variables" => {
                    let mut variables = Vec::new();
                    parse_variables(context, &mut variables, value)?;
                    stage.variables = Some(variables);
                }
                "jobs" => {
                    let mut jobs = Vec::new();
                    parse_jobs(context, &mut jobs, value)?;
                    stage.jobs = Some(jobs);
                }
                "pool" => stage.pool = Some(Pool::parse(value)?),
                "lockBehavior" => stage.lock_behavior = Some(value.expect_string("lockBehavior")?),
                "templateContext" => stage.template_context = Some(stringify_scalars(value)),
                other => return Err(key.error(format!("Unexpected Key '{}'", other))),
            }
        }
        Ok(stage)
    }

    /// Token form used when a stage is passed as a template parameter
    pub fn to_token(&self) -> TemplateToken {
        let mut fields = vec![("stage", text(&self.name))];
        if let Some(display_name) = &self.display_name {
            fields.push(("displayName", TemplateToken::string(display_name.as_str())));
        }
        if let Some(depends_on) = &self.depends_on {
            fields.push(("dependsOn", strings(depends_on)));
        }
        if let Some(condition) = &self.condition {
            fields.push(("condition", TemplateToken::string(condition.as_str())));
        }
        if let Some(variables) = &self.variables {
            fields.push(("variables", variables_to_token(variables)));
        }
        if let Some(jobs) = &self.jobs {
            fields.push((
                "jobs",
                TemplateToken::sequence(jobs.iter().map(Job::to_token).collect()),
            ));
        }
        if let Some(pool) = &self.pool {
            fields.push(("pool", pool.to_token()));
        }
        if let Some(lock_behavior) = &self.lock_behavior {
            fields.push(("lockBehavior", TemplateToken::string(lock_behavior.as_str())));
        }
        if let Some(template_context) = &self.template_context {
            fields.push(("templateContext", template_context.clone()));
        }
        TemplateToken::from_pairs(fields)
    }
}

/// Parse a `stages:` sequence, splicing stage templates in place
pub fn parse_stages(context: &Context, stages: &mut Vec<Stage>, token: &TemplateToken) -> ParseResult<()> {
    if token.is_null() {
        return Ok(());
    }
    for entry in token.expect_sequence("stages")? {
        let entries = entry.expect_mapping("stages")?;
        match entries.split_first() {
            Some(((key, path), rest)) if key.as_str() == Some("template") => {
                let path = path.expect_non_empty_string("template")?;
                let loaded = read_template(context, &path, template_parameters(rest)?, STAGE_TEMPLATE_ROOT)?;
                let before = stages.len();
                if let Some(nested) = loaded.token.get("stages") {
                    parse_stages(&loaded.context, stages, nested).map_err(|e| e.with_file(loaded.name.as_str()))?;
                }
                debug!(template = %loaded.name, count = stages.len() - before, "spliced stage template");
            }
            _ => stages.push(Stage::parse(context, entry, false)?),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::context::{MemoryFileProvider, NoopTraceWriter};
    use crate::template::schema::Schema;
    use pretty_assertions::assert_eq;

    fn parse_with(provider: &MemoryFileProvider, yaml: &str) -> ParseResult<Vec<Stage>> {
        let schema = Schema::embedded().unwrap();
        let context = Context::new(provider, &NoopTraceWriter, &schema);
        let mut stages = Vec::new();
        parse_stages(&context, &mut stages, &TemplateToken::load(yaml, None).unwrap())?;
        Ok(stages)
    }

    #[test]
    fn test_stage_keys() {
        let stages = parse_with(
            &MemoryFileProvider::new(),
            "- stage: build\n  displayName: Build\n  dependsOn: []\n  condition: succeeded()\n  lockBehavior: sequential\n  pool: Default\n  jobs:\n  - job: compile\n",
        )
        .unwrap();
        let stage = &stages[0];
        assert_eq!(stage.name.as_deref(), Some("build"));
        assert_eq!(stage.depends_on, Some(vec![]));
        assert_eq!(stage.lock_behavior.as_deref(), Some("sequential"));
        assert_eq!(stage.jobs.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_stage_requires_stage_key() {
        let err = parse_with(&MemoryFileProvider::new(), "- jobs: []\n").unwrap_err();
        assert_eq!(err.message, "Expected stage");
        let err = parse_with(&MemoryFileProvider::new(), "- stage: a\n  steps: []\n").unwrap_err();
        assert_eq!(err.message, "Unexpected Key 'steps'");
    }

    #[test]
    fn test_stage_template_with_each() {
        let provider = MemoryFileProvider::new().with_file(
            "stages.yml",
            "parameters:\n- name: regions\n  type: object\n  default: [eu]\nstages:\n- ${{ each region in parameters.regions }}:\n  - stage: deploy_${{ region }}\n    jobs:\n    - job: run\n",
        );
        let stages = parse_with(
            &provider,
            "- stage: build\n- template: stages.yml\n  parameters:\n    regions: [us, asia]\n",
        )
        .unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name.clone().unwrap_or_default()).collect();
        assert_eq!(names, vec!["build", "deploy_us", "deploy_asia"]);
    }

    #[test]
    fn test_token_form_parses_back() {
        let stages = parse_with(
            &MemoryFileProvider::new(),
            "- stage: test\n  dependsOn: build\n  variables:\n    a: b\n  templateContext:\n    n: 1\n  jobs:\n  - job: unit\n    steps:\n    - script: cargo test\n",
        )
        .unwrap();
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        assert_eq!(Stage::parse(&context, &stages[0].to_token(), false).unwrap(), stages[0]);
    }
}
