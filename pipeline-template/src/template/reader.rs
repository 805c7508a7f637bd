// Template loading
// Locate, parse, validate, bind parameters and evaluate one template file

use crate::error::{ParseError, ParseResult};
use crate::pipeline::variables::parse_static_variables;
use crate::template::coerce::convert_value;
use crate::template::context::Context;
use crate::template::evaluate::TemplateEvaluator;
use crate::template::token::{TemplateToken, TokenValue};

use tracing::debug;

/// An evaluated template and the context its own references resolve in
pub struct LoadedTemplate<'a> {
    /// The evaluated root mapping, without its `parameters` declaration
    pub token: TemplateToken,
    /// Child context rooted at the template's directory and repository
    pub context: Context<'a>,
    /// Display name, `path` or `path@repository`
    pub name: String,
}

/// Join `path` onto `cwd`, dropping `.` and empty segments and resolving
/// `..` against the preceding segment.
pub fn relative_to(cwd: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in cwd.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Read `filename_and_ref` (`path` or `path@alias`), validate it against
/// `schema_name`, bind `parameters` and evaluate it.
pub fn read_template<'a>(
    context: &Context<'a>,
    filename_and_ref: &str,
    parameters: Option<&TemplateToken>,
    schema_name: &str,
) -> ParseResult<LoadedTemplate<'a>> {
    let (path, repository) = locate(context, filename_and_ref)?;
    let name = match &repository {
        Some(repository) => format!("{}@{}", path, repository),
        None => path.clone(),
    };
    debug!(file = %path, repository = ?repository, schema = schema_name, "loading template");
    context.trace.verbose(&format!("Loading template '{}'", name));

    let child = context.child(&path, repository.clone());
    match load(&child, &path, repository.as_deref(), parameters, schema_name) {
        Ok(token) => Ok(LoadedTemplate {
            token,
            context: child,
            name,
        }),
        Err(err) => Err(err.with_file(name.as_str())),
    }
}

fn locate(context: &Context, filename_and_ref: &str) -> ParseResult<(String, Option<String>)> {
    match filename_and_ref.split_once('@') {
        None => Ok((
            relative_to(context.cwd.as_deref().unwrap_or("."), filename_and_ref),
            context.repository_and_ref.clone(),
        )),
        Some((path, alias)) if alias.eq_ignore_ascii_case("self") => Ok((path.to_string(), None)),
        Some((path, alias)) => {
            let repository = context
                .repositories
                .get(alias)
                .ok_or_else(|| ParseError::io(format!("Repository '{}' not found", alias)))?;
            Ok((path.to_string(), Some(repository.clone())))
        }
    }
}

fn load(
    context: &Context,
    path: &str,
    repository: Option<&str>,
    parameters: Option<&TemplateToken>,
    schema_name: &str,
) -> ParseResult<TemplateToken> {
    let content = context.file_provider.read_file(repository, path)?;
    let budget = context.budget();
    budget.add_bytes(content.len(), &context.options)?;
    let file_id = budget.add_file(
        &match repository {
            Some(repository) => format!("{}@{}", path, repository),
            None => path.to_string(),
        },
        &context.options,
    )?;

    let root = TemplateToken::load(&content, Some(file_id))?;
    context.schema.validate(schema_name, &root)?;

    let bound = bind_parameters(context, root.get("parameters"), parameters)?;
    let variables = expression_variables(context, root.get("variables"))?;
    let values = TemplateToken::from_pairs([("parameters", bound), ("variables", variables)]);

    let body = match root.as_mapping() {
        Some(entries) => TemplateToken {
            value: TokenValue::Mapping(
                entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != Some("parameters"))
                    .cloned()
                    .collect(),
            ),
            ..root.clone()
        },
        None => root.clone(),
    };

    TemplateEvaluator::new(context).evaluate(&body, &values)
}

/// Bind declared parameters to provided values.
///
/// Mapping declarations (`name: default`) take values as given. Sequence
/// declarations (`{name, type, default, values}`) coerce both the default
/// and the provided value to `type`.
pub fn bind_parameters(
    context: &Context,
    declared: Option<&TemplateToken>,
    provided: Option<&TemplateToken>,
) -> ParseResult<TemplateToken> {
    let provided = match provided {
        Some(p) if !p.is_null() => p.expect_mapping("parameters")?,
        _ => &[],
    };
    let lookup = |name: &str| {
        provided
            .iter()
            .find(|(k, _)| k.as_str() == Some(name))
            .map(|(_, v)| v)
    };

    let mut bound = Vec::new();
    let mut used = 0;

    match declared {
        None => {}
        Some(declared) if declared.is_null() => {}
        Some(declared) if declared.as_mapping().is_some() => {
            for (key, default) in declared.as_mapping().unwrap_or_default() {
                let name = key.expect_string("parameters")?;
                let value = match lookup(&name) {
                    Some(value) => {
                        used += 1;
                        value.clone()
                    }
                    None => default.clone(),
                };
                bound.push((name, value));
            }
        }
        Some(declared) => {
            for descriptor in declared.expect_sequence("parameters")? {
                let parameter = read_descriptor(descriptor)?;
                let default = convert_value(context, &parameter.default, &parameter.kind)?;
                let value = match lookup(&parameter.name) {
                    Some(value) => {
                        used += 1;
                        convert_value(context, value, &parameter.kind)?
                    }
                    None => default,
                };
                check_allowed(&parameter, &value)?;
                debug!(parameter = %parameter.name, kind = %parameter.kind, "bound parameter");
                bound.push((parameter.name, value));
            }
        }
    }

    if used != provided.len() {
        let undeclared: Vec<String> = provided
            .iter()
            .filter_map(|(k, _)| k.as_str())
            .filter(|k| !bound.iter().any(|(name, _)| name == k))
            .map(str::to_string)
            .collect();
        return Err(ParseError::validation(format!(
            "Provided undeclared parameters: {}",
            undeclared.join(", ")
        )));
    }

    Ok(TemplateToken::from_pairs(bound))
}

struct ParameterDescriptor {
    name: String,
    kind: String,
    default: TemplateToken,
    values: Option<Vec<TemplateToken>>,
}

fn read_descriptor(token: &TemplateToken) -> ParseResult<ParameterDescriptor> {
    let mut name = None;
    let mut descriptor = ParameterDescriptor {
        name: String::new(),
        kind: "object".to_string(),
        default: TemplateToken::null(),
        values: None,
    };

    for (key, value) in token.expect_mapping("parameters")? {
        match key.as_str().unwrap_or_default() {
            "name" => name = Some(value.expect_non_empty_string("name")?),
            "type" => descriptor.kind = value.expect_string("type")?,
            "default" => descriptor.default = value.clone(),
            "values" => descriptor.values = Some(value.expect_sequence("values")?.to_vec()),
            "displayName" => {}
            other => return Err(key.error(format!("Unexpected parameter property '{}'", other))),
        }
    }

    descriptor.name = name.ok_or_else(|| token.error("A parameter requires a 'name'"))?;
    Ok(descriptor)
}

fn check_allowed(parameter: &ParameterDescriptor, value: &TemplateToken) -> ParseResult<()> {
    let Some(allowed) = &parameter.values else {
        return Ok(());
    };
    if allowed
        .iter()
        .any(|a| crate::expression::evaluator::values_equal(a, value))
    {
        return Ok(());
    }
    Err(ParseError::validation(format!(
        "The value '{}' for parameter '{}' is not in the list of allowed values",
        value.to_display_string().unwrap_or_default(),
        parameter.name
    ))
    .with_span(value.span))
}

/// The caller's variables overlaid with the literal values the template
/// declares itself
fn expression_variables(context: &Context, declared: Option<&TemplateToken>) -> ParseResult<TemplateToken> {
    let mut variables: Vec<(String, String)> = context
        .variables
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(declared) = declared {
        for (name, value) in parse_static_variables(declared)? {
            match variables.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
                Some(existing) => existing.1 = value,
                None => variables.push((name, value)),
            }
        }
    }

    Ok(TemplateToken::from_pairs(
        variables
            .into_iter()
            .map(|(k, v)| (k, TemplateToken::string(v))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::context::{MemoryFileProvider, NoopTraceWriter, ParseOptions};
    use crate::template::schema::{Schema, PIPELINE_ROOT, STEP_TEMPLATE_ROOT};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(yaml: &str) -> TemplateToken {
        TemplateToken::load(yaml, None).unwrap()
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to(".", "a/b.yml"), "a/b.yml");
        assert_eq!(relative_to("templates/jobs", "../steps/x.yml"), "templates/steps/x.yml");
        assert_eq!(relative_to("a", "./b//c.yml"), "a/b/c.yml");
        assert_eq!(relative_to("a", "/root.yml"), "a/root.yml");
    }

    #[test]
    fn test_typed_parameter_default_and_override() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new().with_file(
            "t.yml",
            "parameters:\n- name: env\n  type: string\n  default: prod\nsteps:\n- script: deploy ${{ parameters.env }}\n",
        );
        let context = Context::new(&provider, &NoopTraceWriter, &schema);

        let loaded = read_template(&context, "t.yml", None, STEP_TEMPLATE_ROOT).unwrap();
        assert_eq!(
            loaded.token.to_json(),
            json!({"steps": [{"script": "deploy prod"}]})
        );

        let loaded = read_template(&context, "t.yml", Some(&params("env: dev")), STEP_TEMPLATE_ROOT).unwrap();
        assert_eq!(
            loaded.token.to_json(),
            json!({"steps": [{"script": "deploy dev"}]})
        );
    }

    #[test]
    fn test_mapping_parameters_are_not_coerced() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new()
            .with_file("t.yml", "parameters:\n  count: 1\nsteps:\n- script: ${{ parameters.count }}\n");
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        let loaded = read_template(&context, "t.yml", Some(&params("count: [a]")), STEP_TEMPLATE_ROOT).unwrap();
        assert_eq!(loaded.token.to_json(), json!({"steps": [{"script": ["a"]}]}));
    }

    #[test]
    fn test_undeclared_parameter_rejected() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new()
            .with_file("t.yml", "parameters:\n- name: env\nsteps: []\n");
        let context = Context::new(&provider, &NoopTraceWriter, &schema);

        let err = read_template(&context, "t.yml", Some(&params("env: a\nregion: b")), STEP_TEMPLATE_ROOT)
            .err()
            .unwrap();
        assert_eq!(err.message, "Provided undeclared parameters: region");
        assert_eq!(err.kind, crate::error::ParseErrorKind::Validation);
        assert_eq!(err.file.as_deref(), Some("t.yml"));
    }

    #[test]
    fn test_parameters_without_declaration_rejected() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new().with_file("t.yml", "steps: []\n");
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        let err = read_template(&context, "t.yml", Some(&params("a: b")), STEP_TEMPLATE_ROOT)
            .err()
            .unwrap();
        assert!(err.message.starts_with("Provided undeclared parameters"));
    }

    #[test]
    fn test_allowed_values() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new().with_file(
            "t.yml",
            "parameters:\n- name: env\n  default: dev\n  values: [dev, prod]\nsteps: []\n",
        );
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        assert!(read_template(&context, "t.yml", Some(&params("env: prod")), STEP_TEMPLATE_ROOT).is_ok());
        let err = read_template(&context, "t.yml", Some(&params("env: qa")), STEP_TEMPLATE_ROOT)
            .err()
            .unwrap();
        assert_eq!(
            err.message,
            "The value 'qa' for parameter 'env' is not in the list of allowed values"
        );
    }

    #[test]
    fn test_static_and_caller_variables() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new().with_file(
            "p.yml",
            "variables:\n  config: debug\nsteps:\n- script: ${{ variables.config }} ${{ variables.team }}\n",
        );
        let context = Context::new(&provider, &NoopTraceWriter, &schema)
            .with_variable("config", "release")
            .with_variable("team", "ci");
        let loaded = read_template(&context, "p.yml", None, PIPELINE_ROOT).unwrap();
        assert_eq!(
            loaded.token.get("steps").unwrap().to_json(),
            json!([{"script": "debug ci"}])
        );
    }

    #[test]
    fn test_repository_aliases_and_child_context() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new()
            .with_file("ci/local.yml", "steps: []\n")
            .with_repository_file("org/tools@main", "shared/steps.yml", "steps: []\n");
        let context = Context::new(&provider, &NoopTraceWriter, &schema).with_repository("tools", "org/tools@main");

        let remote = read_template(&context, "shared/steps.yml@tools", None, STEP_TEMPLATE_ROOT).unwrap();
        assert_eq!(remote.name, "shared/steps.yml@org/tools@main");
        assert_eq!(remote.context.repository_and_ref.as_deref(), Some("org/tools@main"));
        assert_eq!(remote.context.cwd.as_deref(), Some("shared"));

        let local = read_template(&context, "ci/local.yml@self", None, STEP_TEMPLATE_ROOT).unwrap();
        assert_eq!(local.context.repository_and_ref, None);

        let err = read_template(&context, "x.yml@other", None, STEP_TEMPLATE_ROOT)
            .err()
            .unwrap();
        assert_eq!(err.message, "Repository 'other' not found");
        assert_eq!(err.kind, crate::error::ParseErrorKind::Io);
    }

    #[test]
    fn test_relative_resolution_inside_repository() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new()
            .with_repository_file("org/tools@main", "shared/more.yml", "steps:\n- script: more\n");
        let context = Context::new(&provider, &NoopTraceWriter, &schema)
            .child("shared/steps.yml", Some("org/tools@main".to_string()));
        let loaded = read_template(&context, "more.yml", None, STEP_TEMPLATE_ROOT).unwrap();
        assert_eq!(loaded.name, "shared/more.yml@org/tools@main");
    }

    #[test]
    fn test_size_limit_applies_per_template() {
        let schema = Schema::embedded().unwrap();
        let steps = "steps:\n- script: make all\n";
        let provider = MemoryFileProvider::new()
            .with_file("a.yml", steps)
            .with_file("b.yml", steps)
            .with_file("big.yml", "steps:\n- script: make all && make install && make check\n");
        let options = ParseOptions {
            max_bytes: steps.len() + 8,
            ..Default::default()
        };
        let context = Context::new(&provider, &NoopTraceWriter, &schema).with_options(options);

        let first = read_template(&context, "a.yml", None, STEP_TEMPLATE_ROOT).unwrap();
        assert!(read_template(&context, "b.yml", None, STEP_TEMPLATE_ROOT).is_ok());
        assert!(read_template(&first.context, "b.yml", None, STEP_TEMPLATE_ROOT).is_ok());

        let err = read_template(&context, "big.yml", None, STEP_TEMPLATE_ROOT)
            .err()
            .unwrap();
        assert!(err.is_resource_limit());
        assert_eq!(err.file.as_deref(), Some("big.yml"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        let err = read_template(&context, "missing.yml", None, PIPELINE_ROOT)
            .err()
            .unwrap();
        assert_eq!(err.kind, crate::error::ParseErrorKind::Io);
    }
}
