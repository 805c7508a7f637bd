// Variable composer
// Mapping and sequence forms, groups and variable templates

use crate::error::ParseResult;
use crate::pipeline::Variable;
use crate::template::context::Context;
use crate::template::reader::read_template;
use crate::template::schema::VARIABLE_TEMPLATE_ROOT;
use crate::template::token::{TemplateToken, TokenValue};

use tracing::debug;

/// Parse a `variables:` section into `variables`. A later definition of a
/// name replaces the earlier one (names compare case-insensitively).
pub fn parse_variables(context: &Context, variables: &mut Vec<Variable>, token: &TemplateToken) -> ParseResult<()> {
    match &token.value {
        TokenValue::Null => Ok(()),
        TokenValue::Mapping(entries) => {
            for (key, value) in entries {
                let name = key.expect_string("variables")?;
                set_variable(variables, Variable::value(name.clone(), value.expect_string(&name)?));
            }
            Ok(())
        }
        _ => {
            for entry in token.expect_sequence("variables")? {
                parse_variable_entry(context, variables, entry)?;
            }
            Ok(())
        }
    }
}

fn parse_variable_entry(context: &Context, variables: &mut Vec<Variable>, entry: &TemplateToken) -> ParseResult<()> {
    let mut name = None;
    let mut value = None;
    let mut readonly = false;
    let mut group = None;
    let mut template = None;
    let mut parameters = None;

    for (key, item) in entry.expect_mapping("variables")? {
        match key.expect_string("variables")?.as_str() {
            "name" => name = Some(item.expect_string("name")?),
            "value" => value = Some(item.expect_string("value")?),
            "readonly" => readonly = item.expect_bool("readonly")?,
            "group" => group = Some(item.expect_non_empty_string("group")?),
            "template" => template = Some(item.expect_non_empty_string("template")?),
            "parameters" => parameters = Some(item),
            other => return Err(key.error(format!("Unexpected variable property '{}'", other))),
        }
    }

    if let Some(group) = group {
        if !variables
            .iter()
            .any(|v| matches!(v, Variable::Group { group: g } if g.eq_ignore_ascii_case(&group)))
        {
            variables.push(Variable::Group { group });
        }
        return Ok(());
    }

    if let Some(template) = template {
        let loaded = read_template(context, &template, parameters, VARIABLE_TEMPLATE_ROOT)?;
        let before = variables.len();
        if let Some(nested) = loaded.token.get("variables") {
            parse_variables(&loaded.context, variables, nested).map_err(|e| e.with_file(loaded.name.as_str()))?;
        }
        debug!(template = %loaded.name, count = variables.len().saturating_sub(before), "spliced variable template");
        return Ok(());
    }

    let name = name.ok_or_else(|| entry.error("A variable requires a 'name'"))?;
    set_variable(
        variables,
        Variable::Value {
            name,
            value: value.unwrap_or_default(),
            readonly,
        },
    );
    Ok(())
}

fn set_variable(variables: &mut Vec<Variable>, variable: Variable) {
    let existing = variable.name().and_then(|name| {
        variables
            .iter()
            .position(|v| v.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    });
    match existing {
        Some(index) => variables[index] = variable,
        None => variables.push(variable),
    }
}

/// Literal name/value pairs of an unevaluated `variables:` section.
///
/// Entries whose key or value is an expression, template references and
/// groups are skipped; nothing is loaded or evaluated.
pub fn parse_static_variables(token: &TemplateToken) -> ParseResult<Vec<(String, String)>> {
    let mut variables: Vec<(String, String)> = Vec::new();
    let mut set = |name: String, value: String| {
        match variables.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(existing) => existing.1 = value,
            None => variables.push((name, value)),
        }
    };

    match &token.value {
        TokenValue::Mapping(entries) => {
            for (key, value) in entries {
                if is_expression(key) || is_expression(value) {
                    continue;
                }
                let name = key.expect_string("variables")?;
                set(name.clone(), value.expect_string(&name)?);
            }
        }
        TokenValue::Sequence(entries) => {
            for entry in entries {
                let Some(fields) = entry.as_mapping() else {
                    continue;
                };
                if fields.iter().any(|(k, v)| is_expression(k) || is_expression(v)) {
                    continue;
                }
                let name = fields.iter().find(|(k, _)| k.as_str() == Some("name"));
                let value = fields.iter().find(|(k, _)| k.as_str() == Some("value"));
                if let (Some((_, name)), Some((_, value))) = (name, value) {
                    set(name.expect_string("name")?, value.expect_string("value")?);
                }
            }
        }
        _ => {}
    }

    Ok(variables)
}

fn is_expression(token: &TemplateToken) -> bool {
    token.as_str().is_some_and(|s| s.contains("${{"))
}

/// Token form of a variable list: `[{name, value, readonly}, {group}]`
pub fn variables_to_token(variables: &[Variable]) -> TemplateToken {
    TemplateToken::sequence(
        variables
            .iter()
            .map(|variable| match variable {
                Variable::Value { name, value, readonly } => {
                    let mut fields = vec![
                        ("name", TemplateToken::string(name.as_str())),
                        ("value", TemplateToken::string(value.as_str())),
                    ];
                    if *readonly {
                        fields.push(("readonly", TemplateToken::boolean(true)));
                    }
                    TemplateToken::from_pairs(fields)
                }
                Variable::Group { group } => {
                    TemplateToken::from_pairs([("group", TemplateToken::string(group.as_str()))])
                }
            })
            .collect(),
    )
}
