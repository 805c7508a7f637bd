// Variable converters
// Simple mapping form and the extended sequence form with template references

use crate::error::{ParseError, ParseResult};
use crate::process::steps::unexpected_property;
use crate::process::{ValueVariable, Variable, VariablesTemplateReference};
use crate::yaml::{YamlReader, YamlWriter};

/// Read a variables list: a mapping of `name: value` pairs, or a sequence of
/// `{name, value, verbatim}` and `{template, parameters}` entries.
pub fn read_variables(r: &mut YamlReader, simple_only: bool) -> ParseResult<Vec<Variable>> {
    let mut variables = Vec::new();

    if r.accept_mapping_start() {
        r.expect_mapping_start()?;
        while !r.allow_mapping_end() {
            let name = r.read_non_empty_string()?;
            let value = r.expect_scalar()?;
            variables.push(Variable::Value(ValueVariable {
                name,
                value: Some(value.value),
                verbatim: false,
            }));
        }
        return Ok(variables);
    }

    r.expect_sequence_start()?;
    while !r.allow_sequence_end() {
        r.expect_mapping_start()?;
        let first = r.expect_scalar()?;
        match first.value.as_str() {
            "name" => {
                let mut variable = ValueVariable {
                    name: r.read_non_empty_string()?,
                    ..Default::default()
                };
                while !r.allow_mapping_end() {
                    let key = r.expect_scalar()?;
                    match key.value.as_str() {
                        "value" => variable.value = Some(r.expect_scalar()?.value),
                        "verbatim" => variable.verbatim = r.read_boolean()?,
                        _ => return Err(unexpected_property(&key)),
                    }
                }
                variables.push(Variable::Value(variable));
            }
            "template" => {
                if simple_only {
                    return Err(ParseError::syntax(
                        Some(first.span),
                        "A variables template cannot reference another variables 'template'.",
                    ));
                }
                let mut reference = VariablesTemplateReference {
                    name: r.read_non_empty_string()?,
                    ..Default::default()
                };
                while !r.allow_mapping_end() {
                    let key = r.expect_scalar()?;
                    match key.value.as_str() {
                        "parameters" => reference.parameters = r.read_mapping(1)?,
                        _ => return Err(unexpected_property(&key)),
                    }
                }
                variables.push(Variable::Template(reference));
            }
            _ => {
                return Err(ParseError::syntax(
                    Some(first.span),
                    format!("Unknown variable type: '{}'", first.value),
                ));
            }
        }
    }
    Ok(variables)
}

/// Plain variables with a value and without `verbatim` are written in mapping
/// form. Anything else (including a single template reference) forces the
/// sequence form.
pub fn write_variables(w: &mut YamlWriter, variables: &[Variable]) {
    let simple = variables
        .iter()
        .all(|v| matches!(v, Variable::Value(value) if !value.verbatim && value.value.is_some()));

    if simple {
        w.mapping_start();
        for variable in variables {
            if let Variable::Value(value) = variable {
                w.entry(&value.name, value.value.clone().unwrap_or_default());
            }
        }
        w.mapping_end();
        return;
    }

    w.sequence_start();
    for variable in variables {
        w.mapping_start();
        match variable {
            Variable::Value(value) => {
                w.entry("name", value.name.as_str());
                if let Some(v) = &value.value {
                    w.entry("value", v.as_str());
                }
                if value.verbatim {
                    w.entry("verbatim", "true");
                }
            }
            Variable::Template(reference) => {
                w.entry("template", reference.name.as_str());
                if !reference.parameters.is_empty() {
                    w.scalar("parameters");
                    w.write_mapping(&reference.parameters);
                }
            }
        }
        w.mapping_end();
    }
    w.sequence_end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(yaml: &str, simple_only: bool) -> ParseResult<Vec<Variable>> {
        let mut r = YamlReader::new(yaml)?;
        read_variables(&mut r, simple_only)
    }

    fn write(variables: &[Variable]) -> String {
        let mut w = YamlWriter::new();
        write_variables(&mut w, variables);
        w.into_string().unwrap()
    }

    fn value(name: &str, v: &str) -> Variable {
        Variable::Value(ValueVariable {
            name: name.to_string(),
            value: Some(v.to_string()),
            verbatim: false,
        })
    }

    #[test]
    fn test_mapping_form() {
        let variables = parse("configuration: release\nplatform: x64\n", false).unwrap();
        assert_eq!(
            variables,
            vec![value("configuration", "release"), value("platform", "x64")]
        );
    }

    #[test]
    fn test_sequence_form() {
        let variables = parse(
            "- name: a\n  value: b\n  verbatim: true\n- template: vars.yml\n  parameters:\n    x: y\n",
            false,
        )
        .unwrap();
        assert_eq!(variables.len(), 2);
        let Variable::Value(first) = &variables[0] else {
            panic!("expected value variable");
        };
        assert!(first.verbatim);
        let Variable::Template(reference) = &variables[1] else {
            panic!("expected template reference");
        };
        assert_eq!(reference.name, "vars.yml");
    }

    #[test]
    fn test_template_rejected_when_simple_only() {
        let err = parse("- template: vars.yml\n", true).unwrap_err();
        assert_eq!(
            err.message,
            "A variables template cannot reference another variables 'template'."
        );
    }

    #[test]
    fn test_unknown_variable_type() {
        let err = parse("- group: shared\n", false).unwrap_err();
        assert_eq!(err.message, "Unknown variable type: 'group'");
    }

    #[test]
    fn test_simple_list_written_as_mapping() {
        let text = write(&[value("a", "1"), value("b", "two")]);
        assert_eq!(text, "a: '1'\nb: two\n");
    }

    #[test]
    fn test_mixed_list_forces_sequence_form() {
        let variables = vec![
            value("a", "b"),
            Variable::Template(VariablesTemplateReference {
                name: "vars.yml".to_string(),
                ..Default::default()
            }),
        ];
        let text = write(&variables);
        assert!(text.starts_with("- name: a\n"), "{}", text);
        assert_eq!(parse(&text, false).unwrap(), variables);
    }

    #[test]
    fn test_sequence_form_of_plain_values_reads_back_equal() {
        let variables = parse("- name: a\n  value: b\n", false).unwrap();
        let text = write(&variables);
        assert_eq!(text, "a: b\n");
        assert_eq!(parse(&text, false).unwrap(), variables);
    }
}
