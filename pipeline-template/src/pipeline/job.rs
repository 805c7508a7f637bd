// Job composer
// Regular and deployment jobs, job templates

use crate::error::{ParseError, ParseResult};
use crate::pipeline::container::strings;
use crate::pipeline::steps::{parse_step_list, template_parameters};
use crate::pipeline::variables::{parse_variables, variables_to_token};
use crate::pipeline::{Container, Environment, Job, Pool, Strategy, TaskStep, Uses, Workspace};
use crate::template::context::Context;
use crate::template::reader::read_template;
use crate::template::schema::JOB_TEMPLATE_ROOT;
use crate::template::token::{TemplateToken, TokenValue};

use tracing::debug;

impl Job {
    /// Parse a job mapping. The first key must be `job` or `deployment`
    /// unless `implicit` is set, which is how root-level `steps:` become a
    /// job.
    pub fn parse(context: &Context, token: &TemplateToken, implicit: bool) -> ParseResult<Job> {
        let entries = token.expect_mapping("job")?;
        if !implicit {
            let first = entries.first().and_then(|(k, _)| k.as_str());
            if !matches!(first, Some("job") | Some("deployment")) {
                return Err(token.error("Expected either job or deployment"));
            }
        }

        let mut job = Job::default();
        // strategy depends on the job kind, which the first key decides
        let mut strategy = None;

        for (key, value) in entries {
            match key.expect_string("job")?.as_str() {
                "job" => job.name = optional_name(value, "job")?,
                "deployment" => {
                    job.name = optional_name(value, "deployment")?;
                    job.deployment = true;
                }
                "displayName" => job.display_name = Some(value.expect_string("displayName")?),
                "dependsOn" => job.depends_on = Some(value.expect_string_list("dependsOn")?),
                "condition" => job.condition = Some(value.expect_string("condition")?),
                "strategy" => strategy = Some(value),
                "continueOnError" => job.continue_on_error = Some(value.expect_string("continueOnError")?),
                "container" => job.container = Some(Container::parse(value)?),
                "timeoutInMinutes" => job.timeout_in_minutes = Some(value.expect_string("timeoutInMinutes")?),
                "cancelTimeoutInMinutes" => {
                    job.cancel_timeout_in_minutes = Some(value.expect_string("cancelTimeoutInMinutes")?)
                }
                "variables" => {
                    let mut variables = Vec::new();
                    parse_variables(context, &mut variables, value)?;
                    job.variables = Some(variables);
                }
                "services" => {
                    let mut services = std::collections::BTreeMap::new();
                    for (name, service) in value.expect_mapping("services")? {
                        services.insert(name.expect_string("services")?, Container::parse(service)?);
                    }
                    job.services = Some(services);
                }
                "steps" => job.steps = Some(parse_step_list(context, value)?),
                "templateContext" => job.template_context = Some(stringify_scalars(value)),
                "pool" => job.pool = Some(Pool::parse(value)?),
                "environment" => job.environment = Some(parse_environment(value)?),
                "uses" => job.uses = Some(parse_uses(value)?),
                "workspace" => {
                    job.workspace = value
                        .get("clean")
                        .map(|clean| clean.expect_string("workspace.clean"))
                        .transpose()?
                        .map(|clean| Workspace { clean });
                }
                other => return Err(key.error(format!("Unexpected Key '{}'", other))),
            }
        }

        if let Some(strategy) = strategy {
            job.strategy = Some(Strategy::parse(context, strategy, job.deployment)?);
        }
        Ok(job)
    }

    /// Token form used when a job is passed as a template parameter
    pub fn to_token(&self) -> TemplateToken {
        let mut fields: Vec<(&str, TemplateToken)> = Vec::new();
        let kind = if self.deployment { "deployment" } else { "job" };
        fields.push((kind, text(&self.name)));

        let mut optional = |key: &'static str, value: &Option<String>| {
            if let Some(value) = value {
                fields.push((key, TemplateToken::string(value.as_str())));
            }
        };
        optional("displayName", &self.display_name);
        optional("condition", &self.condition);
        optional("continueOnError", &self.continue_on_error);
        optional("timeoutInMinutes", &self.timeout_in_minutes);
        optional("cancelTimeoutInMinutes", &self.cancel_timeout_in_minutes);

        if let Some(container) = &self.container {
            fields.push(("container", container.to_token()));
        }
        if let Some(services) = &self.services {
            fields.push((
                "services",
                TemplateToken::from_pairs(services.iter().map(|(k, v)| (k.as_str(), v.to_token()))),
            ));
        }
        if let Some(template_context) = &self.template_context {
            fields.push(("templateContext", template_context.clone()));
        }
        if let Some(depends_on) = &self.depends_on {
            fields.push(("dependsOn", strings(depends_on)));
        }
        if let Some(strategy) = &self.strategy {
            fields.push(("strategy", strategy.to_token()));
        }
        if let Some(variables) = &self.variables {
            fields.push(("variables", variables_to_token(variables)));
        }
        if self.deployment {
            if let Some(environment) = &self.environment {
                fields.push(("environment", environment.to_token()));
            }
        } else if let Some(steps) = &self.steps {
            fields.push((
                "steps",
                TemplateToken::sequence(steps.iter().map(TaskStep::to_token).collect()),
            ));
        }
        if let Some(pool) = &self.pool {
            fields.push(("pool", pool.to_token()));
        }
        if let Some(uses) = &self.uses {
            let mut refs = Vec::new();
            if let Some(repositories) = &uses.repositories {
                refs.push(("repositories", strings(repositories)));
            }
            if let Some(pools) = &uses.pools {
                refs.push(("pools", strings(pools)));
            }
            fields.push(("uses", TemplateToken::from_pairs(refs)));
        }
        if let Some(workspace) = &self.workspace {
            fields.push((
                "workspace",
                TemplateToken::from_pairs([("clean", TemplateToken::string(workspace.clean.as_str()))]),
            ));
        }
        TemplateToken::from_pairs(fields)
    }
}

impl Environment {
    fn to_token(&self) -> TemplateToken {
        match &self.resource_type {
            None => TemplateToken::string(self.name.as_str()),
            Some(resource_type) => TemplateToken::from_pairs([
                ("name", TemplateToken::string(self.name.as_str())),
                ("resourceType", TemplateToken::string(resource_type.as_str())),
            ]),
        }
    }
}

/// Parse a `jobs:` sequence, splicing job templates in place
pub fn parse_jobs(context: &Context, jobs: &mut Vec<Job>, token: &TemplateToken) -> ParseResult<()> {
    if token.is_null() {
        return Ok(());
    }
    for entry in token.expect_sequence("jobs")? {
        let entries = entry.expect_mapping("jobs")?;
        match entries.split_first() {
            Some(((key, path), rest)) if key.as_str() == Some("template") => {
                let path = path.expect_non_empty_string("template")?;
                let loaded = read_template(context, &path, template_parameters(rest)?, JOB_TEMPLATE_ROOT)?;
                let before = jobs.len();
                if let Some(nested) = loaded.token.get("jobs") {
                    parse_jobs(&loaded.context, jobs, nested).map_err(|e| e.with_file(loaded.name.as_str()))?;
                }
                debug!(template = %loaded.name, count = jobs.len() - before, "spliced job template");
            }
            _ => jobs.push(Job::parse(context, entry, false)?),
        }
    }
    Ok(())
}

/// Job and stage names; null leaves the name to be generated
pub(crate) fn optional_name(token: &TemplateToken, what: &str) -> ParseResult<Option<String>> {
    if token.is_null() {
        return Ok(None);
    }
    token.expect_string(what).map(Some)
}

pub(crate) fn text(value: &Option<String>) -> TemplateToken {
    match value {
        Some(value) => TemplateToken::string(value.as_str()),
        None => TemplateToken::null(),
    }
}

fn parse_environment(token: &TemplateToken) -> ParseResult<Environment> {
    if token.is_scalar() {
        return Ok(Environment {
            name: token.expect_string("environment")?,
            resource_type: None,
        });
    }
    let mut name = None;
    let mut resource_type = None;
    for (key, value) in token.expect_mapping("environment")? {
        match key.as_str().unwrap_or_default() {
            "name" => name = Some(value.expect_string("environment.name")?),
            "resourceType" => resource_type = Some(value.expect_string("environment.resourceType")?),
            _ => {}
        }
    }
    Ok(Environment {
        name: name.ok_or_else(|| token.error("An environment requires a 'name'"))?,
        resource_type,
    })
}

fn parse_uses(token: &TemplateToken) -> ParseResult<Uses> {
    let mut uses = Uses::default();
    for (key, value) in token.expect_mapping("uses")? {
        match key.as_str().unwrap_or_default() {
            "repositories" => uses.repositories = Some(value.expect_string_list("uses.repositories")?),
            "pools" => uses.pools = Some(value.expect_string_list("uses.pools")?),
            _ => {}
        }
    }
    Ok(uses)
}

/// Copy of `token` with every non-null scalar turned into a string
pub(crate) fn stringify_scalars(token: &TemplateToken) -> TemplateToken {
    let value = match &token.value {
        TokenValue::Sequence(items) => TokenValue::Sequence(items.iter().map(stringify_scalars).collect()),
        TokenValue::Mapping(entries) => TokenValue::Mapping(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), stringify_scalars(v)))
                .collect(),
        ),
        TokenValue::Null => TokenValue::Null,
        _ => TokenValue::String(token.to_display_string().unwrap_or_default()),
    };
    TemplateToken { value, ..token.clone() }
}

/// Deployment-only check applied by `deployment`/`deploymentList` parameters
pub(crate) fn assert_deployment(job: &Job, token: &TemplateToken) -> ParseResult<()> {
    if job.deployment {
        return Ok(());
    }
    Err(ParseError::validation("Only Deployment Jobs are valid").with_span(token.span))
}
