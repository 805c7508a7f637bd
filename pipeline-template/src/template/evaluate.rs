// Template evaluation
// Expands ${{ }} expressions and if/elseif/else/each/insert directives

use crate::error::{ParseError, ParseResult};
use crate::expression::{self, split_segments, whole_expression, ExprError, Segment};
use crate::template::context::Context;
use crate::template::token::{TemplateToken, TokenValue};

use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
enum Directive {
    If(String),
    ElseIf(String),
    Else,
    Each(String, String),
    Insert,
}

/// Evaluates one template body against its named values
pub struct TemplateEvaluator<'c, 'a> {
    context: &'c Context<'a>,
}

impl<'c, 'a> TemplateEvaluator<'c, 'a> {
    pub fn new(context: &'c Context<'a>) -> Self {
        Self { context }
    }

    /// `values` is the mapping expressions resolve names against, normally
    /// `parameters` and `variables`
    pub fn evaluate(&self, token: &TemplateToken, values: &TemplateToken) -> ParseResult<TemplateToken> {
        let result = self.eval_token(token, values, 1)?;
        trace!(
            events = self.context.budget().events(),
            bytes = self.context.budget().bytes(),
            "template evaluated"
        );
        Ok(result)
    }

    fn enter(&self, depth: usize) -> ParseResult<()> {
        let options = &self.context.options;
        if depth > options.max_depth {
            return Err(ParseError::resource_limit(format!(
                "Maximum object depth of {} exceeded",
                options.max_depth
            )));
        }
        self.context.budget().add_events(1, options)
    }

    fn eval_token(&self, token: &TemplateToken, values: &TemplateToken, depth: usize) -> ParseResult<TemplateToken> {
        self.enter(depth)?;
        match &token.value {
            TokenValue::String(s) => self.eval_string(token, s, values),
            TokenValue::Sequence(items) => {
                let items = self.eval_sequence(items, values, depth)?;
                Ok(TemplateToken {
                    value: TokenValue::Sequence(items),
                    ..token.clone()
                })
            }
            TokenValue::Mapping(entries) => {
                let entries = self.eval_mapping(entries, values, depth)?;
                Ok(TemplateToken {
                    value: TokenValue::Mapping(entries),
                    ..token.clone()
                })
            }
            _ => Ok(token.clone()),
        }
    }

    fn eval_string(&self, token: &TemplateToken, text: &str, values: &TemplateToken) -> ParseResult<TemplateToken> {
        if !text.contains("${{") {
            return Ok(token.clone());
        }

        if let Some(expr) = whole_expression(text) {
            let result = self.eval_expression(token, &expr, values)?.located_at(token);
            if let Some(s) = result.as_str() {
                self.context.budget().add_bytes(s.len(), &self.context.options)?;
            }
            return Ok(result);
        }

        let segments = split_segments(text).map_err(|e| expression_error(token, text, e))?;
        let mut output = String::new();
        for segment in segments {
            match segment {
                Segment::Text(s) => output.push_str(&s),
                Segment::Expression(expr) => {
                    let value = self.eval_expression(token, &expr, values)?;
                    let piece = value.to_display_string().ok_or_else(|| {
                        token.error(format!(
                            "A {} cannot be inserted into a string: '${{{{ {} }}}}'",
                            value.kind_name(),
                            expr
                        ))
                    })?;
                    output.push_str(&piece);
                }
            }
        }
        self.context.budget().add_bytes(output.len(), &self.context.options)?;
        Ok(TemplateToken {
            value: TokenValue::String(output),
            ..token.clone()
        })
    }

    fn eval_expression(&self, token: &TemplateToken, expr: &str, values: &TemplateToken) -> ParseResult<TemplateToken> {
        expression::evaluate(expr, values).map_err(|e| expression_error(token, expr, e))
    }

    fn eval_condition(&self, key: &TemplateToken, condition: &str, values: &TemplateToken) -> ParseResult<bool> {
        Ok(self.eval_expression(key, condition, values)?.is_truthy())
    }

    fn eval_sequence(
        &self,
        items: &[TemplateToken],
        values: &TemplateToken,
        depth: usize,
    ) -> ParseResult<Vec<TemplateToken>> {
        let mut result = Vec::new();
        // Some(taken) while inside an if/elseif/else chain
        let mut chain: Option<bool> = None;

        for item in items {
            let Some((key, directive, body)) = sequence_directive(item) else {
                chain = None;
                let evaluated = self.eval_token(item, values, depth + 1)?;
                // A whole-expression item that yields a sequence is spliced
                match (&item.value, evaluated.value) {
                    (TokenValue::String(_), TokenValue::Sequence(inner)) => result.extend(inner),
                    (_, value) => result.push(TemplateToken { value, ..evaluated }),
                }
                continue;
            };

            chain = match self.select_branch(key, &directive, chain, values)? {
                Branch::Take(next) => {
                    result.extend(self.eval_body_items(body, values, depth)?);
                    next
                }
                Branch::Skip(next) => next,
                Branch::Each(name, collection) => {
                    for item_values in iteration_values(key, values, &name, &collection)? {
                        result.extend(self.eval_body_items(body, &item_values, depth)?);
                    }
                    None
                }
            };
        }
        Ok(result)
    }

    /// Items a directive body contributes to an enclosing sequence
    fn eval_body_items(&self, body: &TemplateToken, values: &TemplateToken, depth: usize) -> ParseResult<Vec<TemplateToken>> {
        match &body.value {
            TokenValue::Null => Ok(Vec::new()),
            TokenValue::Sequence(items) => self.eval_sequence(items, values, depth + 1),
            _ => {
                let evaluated = self.eval_token(body, values, depth + 1)?;
                match evaluated.value {
                    TokenValue::Sequence(items) => Ok(items),
                    TokenValue::Null => Ok(Vec::new()),
                    _ => Ok(vec![evaluated]),
                }
            }
        }
    }

    fn eval_mapping(
        &self,
        entries: &[(TemplateToken, TemplateToken)],
        values: &TemplateToken,
        depth: usize,
    ) -> ParseResult<Vec<(TemplateToken, TemplateToken)>> {
        let mut result: Vec<(TemplateToken, TemplateToken)> = Vec::new();
        let mut chain: Option<bool> = None;

        for (key, value) in entries {
            let Some(directive) = key.as_str().and_then(parse_directive) else {
                chain = None;
                let key = self.eval_token(key, values, depth + 1)?;
                let key_text = key
                    .to_display_string()
                    .ok_or_else(|| key.error("A mapping key must evaluate to a string"))?;
                let key = TemplateToken {
                    value: TokenValue::String(key_text),
                    ..key
                };
                let value = self.eval_token(value, values, depth + 1)?;
                insert_entry(&mut result, key, value)?;
                continue;
            };

            chain = match self.select_branch(key, &directive, chain, values)? {
                Branch::Take(next) => {
                    self.merge_body(&mut result, key, value, values, depth)?;
                    next
                }
                Branch::Skip(next) => next,
                Branch::Each(name, collection) => {
                    for item_values in iteration_values(key, values, &name, &collection)? {
                        self.merge_body(&mut result, key, value, &item_values, depth)?;
                    }
                    None
                }
            };
        }
        Ok(result)
    }

    /// Merge a directive body into an enclosing mapping
    fn merge_body(
        &self,
        result: &mut Vec<(TemplateToken, TemplateToken)>,
        key: &TemplateToken,
        body: &TemplateToken,
        values: &TemplateToken,
        depth: usize,
    ) -> ParseResult<()> {
        let evaluated = self.eval_token(body, values, depth + 1)?;
        match evaluated.value {
            TokenValue::Null => Ok(()),
            TokenValue::Mapping(entries) => {
                for (k, v) in entries {
                    insert_entry(result, k, v)?;
                }
                Ok(())
            }
            _ => Err(key.error(format!(
                "Expected a mapping inside '{}', found {}",
                key.as_str().unwrap_or_default(),
                evaluated.kind_name()
            ))),
        }
    }

    fn select_branch(
        &self,
        key: &TemplateToken,
        directive: &Directive,
        chain: Option<bool>,
        values: &TemplateToken,
    ) -> ParseResult<Branch> {
        match directive {
            Directive::If(condition) => Ok(if self.eval_condition(key, condition, values)? {
                Branch::Take(Some(true))
            } else {
                Branch::Skip(Some(false))
            }),
            Directive::ElseIf(condition) => match chain {
                None => Err(key.error("Unexpected 'elseif' without a preceding 'if'")),
                Some(true) => Ok(Branch::Skip(Some(true))),
                Some(false) => Ok(if self.eval_condition(key, condition, values)? {
                    Branch::Take(Some(true))
                } else {
                    Branch::Skip(Some(false))
                }),
            },
            Directive::Else => match chain {
                None => Err(key.error("Unexpected 'else' without a preceding 'if'")),
                Some(true) => Ok(Branch::Skip(None)),
                Some(false) => Ok(Branch::Take(None)),
            },
            Directive::Each(name, expr) => {
                let collection = self.eval_expression(key, expr, values)?;
                Ok(Branch::Each(name.clone(), collection))
            }
            Directive::Insert => Ok(Branch::Take(None)),
        }
    }
}

enum Branch {
    /// Evaluate the body, then continue the chain with the given state
    Take(Option<bool>),
    Skip(Option<bool>),
    Each(String, TemplateToken),
}

fn sequence_directive(item: &TemplateToken) -> Option<(&TemplateToken, Directive, &TemplateToken)> {
    match item.as_mapping()? {
        [(key, body)] => Some((key, parse_directive(key.as_str()?)?, body)),
        _ => None,
    }
}

fn parse_directive(key: &str) -> Option<Directive> {
    let trimmed = key.trim();
    let inner = trimmed.strip_prefix("${{")?.strip_suffix("}}")?.trim();

    if let Some(rest) = inner.strip_prefix("if ") {
        Some(Directive::If(rest.trim().to_string()))
    } else if let Some(rest) = inner
        .strip_prefix("elseif ")
        .or_else(|| inner.strip_prefix("else if "))
    {
        Some(Directive::ElseIf(rest.trim().to_string()))
    } else if inner == "else" {
        Some(Directive::Else)
    } else if inner == "insert" {
        Some(Directive::Insert)
    } else if let Some(rest) = inner.strip_prefix("each ") {
        let (name, collection) = rest.split_once(" in ")?;
        let (name, collection) = (name.trim(), collection.trim());
        if name.is_empty() || collection.is_empty() {
            return None;
        }
        Some(Directive::Each(name.to_string(), collection.to_string()))
    } else {
        None
    }
}

/// One value set per element of `collection`, each binding `name` to the
/// element. Mapping elements are exposed as `{key, value}` pairs.
fn iteration_values(
    key: &TemplateToken,
    values: &TemplateToken,
    name: &str,
    collection: &TemplateToken,
) -> ParseResult<Vec<TemplateToken>> {
    let elements: Vec<TemplateToken> = match &collection.value {
        TokenValue::Null => Vec::new(),
        TokenValue::Sequence(items) => items.clone(),
        TokenValue::Mapping(entries) => entries
            .iter()
            .map(|(k, v)| TemplateToken::from_pairs([("key", k.clone()), ("value", v.clone())]))
            .collect(),
        _ => {
            return Err(key.error(format!(
                "Expected a sequence or mapping to iterate, found {}",
                collection.kind_name()
            )))
        }
    };

    let base = values.as_mapping().unwrap_or_default();
    Ok(elements
        .into_iter()
        .map(|element| {
            let mut entries: Vec<_> = base
                .iter()
                .filter(|(k, _)| k.as_str().is_some_and(|k| !k.eq_ignore_ascii_case(name)))
                .cloned()
                .collect();
            entries.push((TemplateToken::string(name), element));
            TemplateToken::mapping(entries)
        })
        .collect())
}

fn insert_entry(
    result: &mut Vec<(TemplateToken, TemplateToken)>,
    key: TemplateToken,
    value: TemplateToken,
) -> ParseResult<()> {
    if result.iter().any(|(k, _)| k.as_str() == key.as_str()) {
        return Err(key.error(format!(
            "'{}' is already defined",
            key.as_str().unwrap_or_default()
        )));
    }
    result.push((key, value));
    Ok(())
}

fn expression_error(token: &TemplateToken, expr: &str, err: ExprError) -> ParseError {
    let kind_error = ParseError::from(err);
    ParseError {
        message: format!("{}: {}", expr, kind_error.message),
        ..kind_error
    }
    .with_span(token.span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::context::{MemoryFileProvider, NoopTraceWriter, ParseOptions};
    use crate::template::schema::Schema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run_with(template: &str, values: &str, options: ParseOptions) -> ParseResult<serde_json::Value> {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema).with_options(options);
        let token = TemplateToken::load(template, None).unwrap();
        let values = TemplateToken::load(values, None).unwrap();
        TemplateEvaluator::new(&context)
            .evaluate(&token, &values)
            .map(|t| t.to_json())
    }

    fn run(template: &str, values: &str) -> serde_json::Value {
        run_with(template, values, ParseOptions::default()).unwrap()
    }

    const VALUES: &str = "parameters:\n  env: prod\n  debug: false\n  steps:\n  - script: one\n  - script: two\n  regions: [eu, us]\n  tags:\n    team: ci\nvariables:\n  config: release\n";

    #[test]
    fn test_whole_value_and_interpolation() {
        assert_eq!(
            run(
                "a: ${{ parameters.debug }}\nb: build-${{ parameters.env }}-${{ variables.config }}\nc: $(runtime)\n",
                VALUES
            ),
            json!({"a": false, "b": "build-prod-release", "c": "$(runtime)"})
        );
    }

    #[test]
    fn test_if_else_chain_in_sequence() {
        let template = "steps:\n- ${{ if eq(parameters.env, 'dev') }}:\n  - script: dev\n- ${{ elseif eq(parameters.env, 'prod') }}:\n  - script: prod\n- ${{ else }}:\n  - script: other\n- script: always\n";
        assert_eq!(
            run(template, VALUES),
            json!({"steps": [{"script": "prod"}, {"script": "always"}]})
        );
    }

    #[test]
    fn test_if_in_mapping() {
        let template = "job: build\n${{ if parameters.debug }}:\n  timeoutInMinutes: 5\n${{ else }}:\n  timeoutInMinutes: 60\n";
        assert_eq!(
            run(template, VALUES),
            json!({"job": "build", "timeoutInMinutes": 60})
        );
    }

    #[test]
    fn test_each_over_sequence_and_mapping() {
        let template = "jobs:\n- ${{ each region in parameters.regions }}:\n  - job: deploy_${{ region }}\nvariables:\n  ${{ each pair in parameters.tags }}:\n    ${{ pair.key }}: ${{ pair.value }}\n";
        assert_eq!(
            run(template, VALUES),
            json!({"jobs": [{"job": "deploy_eu"}, {"job": "deploy_us"}], "variables": {"team": "ci"}})
        );
    }

    #[test]
    fn test_sequence_expression_is_spliced() {
        let template = "steps:\n- script: first\n- ${{ parameters.steps }}\n- script: last\n";
        assert_eq!(
            run(template, VALUES),
            json!({"steps": [{"script": "first"}, {"script": "one"}, {"script": "two"}, {"script": "last"}]})
        );
    }

    #[test]
    fn test_insert_directive() {
        let template = "variables:\n  a: b\n  ${{ insert }}: ${{ parameters.tags }}\n";
        assert_eq!(
            run(template, VALUES),
            json!({"variables": {"a": "b", "team": "ci"}})
        );
    }

    #[test]
    fn test_else_without_if() {
        let err = run_with("a:\n- ${{ else }}:\n  - b\n", VALUES, ParseOptions::default()).unwrap_err();
        assert_eq!(err.message, "Unexpected 'else' without a preceding 'if'");
    }

    #[test]
    fn test_collection_in_string_fails() {
        let err = run_with("a: x ${{ parameters.steps }}\n", VALUES, ParseOptions::default()).unwrap_err();
        assert!(err.message.contains("cannot be inserted into a string"));
        assert_eq!(err.span.map(|s| s.start.line), Some(1));
    }

    #[test]
    fn test_expression_error_is_positioned() {
        let err = run_with("a: b\nc: ${{ nope.x }}\n", VALUES, ParseOptions::default()).unwrap_err();
        assert_eq!(err.message, "nope.x: Unrecognized value: 'nope'");
        assert_eq!(err.span.map(|s| s.start.line), Some(2));
    }

    #[test]
    fn test_depth_limit() {
        let options = ParseOptions {
            max_depth: 3,
            ..Default::default()
        };
        assert!(run_with("a:\n  b: c\n", "{}", options).is_ok());
        let err = run_with("a:\n  b:\n    c: d\n", "{}", options).unwrap_err();
        assert!(err.is_resource_limit());
        assert_eq!(err.message, "Maximum object depth of 3 exceeded");
    }

    #[test]
    fn test_event_and_byte_limits() {
        let events = ParseOptions {
            max_events: 4,
            ..Default::default()
        };
        let err = run_with("[a, b, c, d, e]\n", "{}", events).unwrap_err();
        assert_eq!(err.message, "Maximum number of template evaluation events exceeded");

        let bytes = ParseOptions {
            max_bytes: 5,
            ..Default::default()
        };
        let err = run_with("a: ${{ variables.config }}-x\n", VALUES, bytes).unwrap_err();
        assert_eq!(err.message, "Maximum template size of 5 bytes exceeded");
    }
}
