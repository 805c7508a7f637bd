// Template schema
// Allowed top-level keys and their value kinds per template kind, embedded at build time

use crate::error::{ParseError, ParseResult};
use crate::template::token::TemplateToken;

use serde::Deserialize;

use std::collections::HashMap;

pub const PIPELINE_ROOT: &str = "pipeline-root";
pub const STEP_TEMPLATE_ROOT: &str = "step-template-root";
pub const JOB_TEMPLATE_ROOT: &str = "job-template-root";
pub const STAGE_TEMPLATE_ROOT: &str = "stage-template-root";
pub const VARIABLE_TEMPLATE_ROOT: &str = "variable-template-root";
pub const EXTEND_TEMPLATE_ROOT: &str = "extend-template-root";

const EMBEDDED: &str = include_str!("../../schema/pipeline-schema.json");

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    definitions: HashMap<String, Definition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub description: Option<String>,
    pub keys: Vec<String>,
    /// Value kinds each key accepts. Keys without an entry accept anything.
    #[serde(default)]
    pub sections: HashMap<String, Vec<String>>,
}

const KINDS: [&str; 6] = ["string", "number", "boolean", "scalar", "sequence", "mapping"];

fn kind_matches(kind: &str, token: &TemplateToken) -> bool {
    match kind {
        "scalar" => token.is_scalar(),
        kind => token.kind_name() == kind,
    }
}

/// Read-only after construction; load once and pass by reference.
#[derive(Debug, Clone)]
pub struct Schema {
    definitions: HashMap<String, Definition>,
}

impl Schema {
    pub fn embedded() -> ParseResult<Self> {
        Self::from_json(EMBEDDED)
    }

    pub fn from_json(text: &str) -> ParseResult<Self> {
        let document: SchemaDocument = serde_json::from_str(text)
            .map_err(|e| ParseError::validation(format!("Invalid template schema: {}", e)))?;
        for (name, definition) in &document.definitions {
            for (key, kinds) in &definition.sections {
                if let Some(kind) = kinds.iter().find(|k| !KINDS.contains(&k.as_str())) {
                    return Err(ParseError::validation(format!(
                        "Invalid template schema: unknown kind '{}' for '{}' in '{}'",
                        kind, key, name
                    )));
                }
            }
        }
        Ok(Self {
            definitions: document.definitions,
        })
    }

    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Check that `token` is a mapping whose keys all belong to `definition`
    /// and whose values have the kind the section expects. Expression keys,
    /// expression values and nulls are left to evaluation.
    pub fn validate(&self, definition: &str, token: &TemplateToken) -> ParseResult<()> {
        let allowed = self.definition(definition).ok_or_else(|| {
            ParseError::validation(format!("Unknown schema definition '{}'", definition))
        })?;

        let entries = token.as_mapping().ok_or_else(|| {
            token.error(format!(
                "Expected a mapping at the root of a {}, found {}",
                definition,
                token.kind_name()
            ))
        })?;

        for (key, value) in entries {
            let Some(name) = key.as_str() else {
                return Err(key.error("Expected a string key"));
            };
            if is_expression(name) {
                continue;
            }
            if allowed.keys.iter().any(|k| k == name) {
                check_section(allowed, name, value)?;
                continue;
            }

            let mut err = key.error(format!("Unexpected value '{}'", name));
            if let Some(close) = allowed.keys.iter().find(|k| k.eq_ignore_ascii_case(name)) {
                err = err.with_suggestion(format!("did you mean '{}'?", close));
            }
            return Err(err);
        }
        Ok(())
    }
}

fn check_section(definition: &Definition, name: &str, value: &TemplateToken) -> ParseResult<()> {
    let Some(kinds) = definition.sections.get(name) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some_and(is_expression) {
        return Ok(());
    }
    if kinds.iter().any(|kind| kind_matches(kind, value)) {
        return Ok(());
    }
    Err(value.error(format!(
        "Expected {} for '{}', found {}",
        kinds.join(" or "),
        name,
        value.kind_name()
    )))
}

fn is_expression(key: &str) -> bool {
    let key = key.trim();
    key.starts_with("${{") && key.ends_with("}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(yaml: &str) -> TemplateToken {
        TemplateToken::load(yaml, None).unwrap()
    }

    #[test]
    fn test_embedded_schema_has_all_roots() {
        let schema = Schema::embedded().unwrap();
        for name in [
            PIPELINE_ROOT,
            STEP_TEMPLATE_ROOT,
            JOB_TEMPLATE_ROOT,
            STAGE_TEMPLATE_ROOT,
            VARIABLE_TEMPLATE_ROOT,
            EXTEND_TEMPLATE_ROOT,
        ] {
            assert!(schema.definition(name).is_some(), "{}", name);
        }
    }

    #[test]
    fn test_unknown_key_rejected_with_span() {
        let schema = Schema::embedded().unwrap();
        let err = schema
            .validate(STEP_TEMPLATE_ROOT, &token("parameters: {}\njobs: []\n"))
            .unwrap_err();
        assert_eq!(err.message, "Unexpected value 'jobs'");
        assert_eq!(err.span.map(|s| s.start.line), Some(2));
    }

    #[test]
    fn test_case_mismatch_gets_suggestion() {
        let schema = Schema::embedded().unwrap();
        let err = schema.validate(PIPELINE_ROOT, &token("Steps: []\n")).unwrap_err();
        assert_eq!(err.suggestion.as_deref(), Some("did you mean 'steps'?"));
    }

    #[test]
    fn test_expression_keys_skipped() {
        let schema = Schema::embedded().unwrap();
        assert!(schema
            .validate(
                STEP_TEMPLATE_ROOT,
                &token("steps:\n- ${{ if true }}:\n  - script: a\n${{ if false }}:\n  x: y\n")
            )
            .is_ok());
    }

    #[test]
    fn test_section_kind_checked() {
        let schema = Schema::embedded().unwrap();
        let err = schema
            .validate(STEP_TEMPLATE_ROOT, &token("steps:
  script: make
"))
            .unwrap_err();
        assert_eq!(err.message, "Expected sequence for 'steps', found mapping");
        assert!(err.span.is_some());

        let err = schema.validate(PIPELINE_ROOT, &token("pool: [a]
")).unwrap_err();
        assert_eq!(err.message, "Expected mapping or string for 'pool', found sequence");

        let err = schema.validate(PIPELINE_ROOT, &token("trigger: 3
")).unwrap_err();
        assert_eq!(err.message, "Expected mapping or sequence or string for 'trigger', found number");
    }

    #[test]
    fn test_section_kind_allows_null_and_expressions() {
        let schema = Schema::embedded().unwrap();
        for yaml in [
            "steps:
",
            "steps: ${{ parameters.steps }}
",
            "name: 20240101.1
variables:
  a: b
trigger: none
pool: Default
",
            "variables:
- name: a
  value: b
",
        ] {
            assert!(schema.validate(PIPELINE_ROOT, &token(yaml)).is_ok(), "{}", yaml);
        }
    }

    #[test]
    fn test_schema_with_unknown_kind_rejected() {
        let err = Schema::from_json(
            r#"{"definitions": {"root": {"keys": ["steps"], "sections": {"steps": ["list"]}}}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err.message,
            "Invalid template schema: unknown kind 'list' for 'steps' in 'root'"
        );
    }

    #[test]
    fn test_non_mapping_root_rejected() {
        let schema = Schema::embedded().unwrap();
        assert!(schema.validate(PIPELINE_ROOT, &token("- a\n")).is_err());
        assert!(schema.validate("nope", &token("a: b\n")).is_err());
    }
}
