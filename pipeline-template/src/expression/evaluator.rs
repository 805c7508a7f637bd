// Expression evaluator
// Walks the AST against a mapping of named values (parameters, variables, ...)

use crate::expression::functions;
use crate::expression::parser::{BinaryOp, Expr, Reference, ReferencePart};
use crate::expression::ExprError;
use crate::template::token::{TemplateToken, TokenValue};

use std::cmp::Ordering;

pub struct Evaluator<'a> {
    context: &'a TemplateToken,
}

impl<'a> Evaluator<'a> {
    /// `context` is a mapping whose keys are the names an expression may
    /// start with
    pub fn new(context: &'a TemplateToken) -> Self {
        Self { context }
    }

    pub fn eval(&self, expr: &Expr) -> Result<TemplateToken, ExprError> {
        match expr {
            Expr::Null => Ok(TemplateToken::null()),
            Expr::Bool(b) => Ok(TemplateToken::boolean(*b)),
            Expr::Number(n) => Ok(TemplateToken::number(*n)),
            Expr::String(s) => Ok(TemplateToken::string(s.as_str())),
            Expr::Reference(reference) => self.eval_reference(reference),
            Expr::FunctionCall { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                functions::call(name, args)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                Ok(index_into(&object, &index))
            }
            Expr::Member { object, property } => Ok(member(&self.eval(object)?, property)),
            Expr::Not(inner) => Ok(TemplateToken::boolean(!self.eval(inner)?.is_truthy())),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Array(items) => Ok(TemplateToken::sequence(
                items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
        }
    }

    fn eval_reference(&self, reference: &Reference) -> Result<TemplateToken, ExprError> {
        let mut current = self
            .context
            .get_ignore_case(&reference.root)
            .cloned()
            .ok_or_else(|| ExprError::eval(format!("Unrecognized value: '{}'", reference.root)))?;

        for part in &reference.parts {
            current = match part {
                ReferencePart::Property(name) => member(&current, name),
                ReferencePart::Index(index) => index_into(&current, &self.eval(index)?),
            };
        }
        Ok(current)
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<TemplateToken, ExprError> {
        let left = self.eval(left)?;
        // && and || short-circuit
        match op {
            BinaryOp::And if !left.is_truthy() => return Ok(TemplateToken::boolean(false)),
            BinaryOp::Or if left.is_truthy() => return Ok(TemplateToken::boolean(true)),
            _ => {}
        }
        let right = self.eval(right)?;

        let result = match op {
            BinaryOp::And | BinaryOp::Or => right.is_truthy(),
            BinaryOp::Eq => values_equal(&left, &right),
            BinaryOp::Ne => !values_equal(&left, &right),
            BinaryOp::Lt => compare(&left, &right)? == Ordering::Less,
            BinaryOp::Le => compare(&left, &right)? != Ordering::Greater,
            BinaryOp::Gt => compare(&left, &right)? == Ordering::Greater,
            BinaryOp::Ge => compare(&left, &right)? != Ordering::Less,
        };
        Ok(TemplateToken::boolean(result))
    }
}

fn member(object: &TemplateToken, property: &str) -> TemplateToken {
    object
        .get_ignore_case(property)
        .cloned()
        .unwrap_or_else(TemplateToken::null)
}

fn index_into(object: &TemplateToken, index: &TemplateToken) -> TemplateToken {
    match (&object.value, &index.value) {
        (TokenValue::Sequence(items), TokenValue::Number(n)) if *n >= 0.0 => items
            .get(*n as usize)
            .cloned()
            .unwrap_or_else(TemplateToken::null),
        (TokenValue::Mapping(_), _) => match index.to_display_string() {
            Some(key) => member(object, &key),
            None => TemplateToken::null(),
        },
        _ => TemplateToken::null(),
    }
}

/// Loose equality: strings compare case-insensitively and the right operand
/// is converted to the left operand's kind.
pub fn values_equal(left: &TemplateToken, right: &TemplateToken) -> bool {
    match (&left.value, &right.value) {
        (TokenValue::Null, TokenValue::Null) => true,
        (TokenValue::Null, TokenValue::String(s)) | (TokenValue::String(s), TokenValue::Null) => {
            s.is_empty()
        }
        (TokenValue::Boolean(a), _) => *a == right.is_truthy(),
        (TokenValue::Number(a), _) => right.as_number().is_some_and(|b| *a == b),
        (TokenValue::String(a), TokenValue::String(b)) => a.to_lowercase() == b.to_lowercase(),
        (TokenValue::String(_), TokenValue::Boolean(b)) => left.is_truthy() == *b,
        (TokenValue::String(_), TokenValue::Number(b)) => left.as_number().is_some_and(|a| a == *b),
        (TokenValue::Sequence(a), TokenValue::Sequence(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (TokenValue::Mapping(a), TokenValue::Mapping(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| {
                    k.as_str()
                        .and_then(|k| right.get_ignore_case(k))
                        .is_some_and(|other| values_equal(v, other))
                })
        }
        _ => false,
    }
}

/// Ordering for the relational operators: numbers numerically, everything
/// else as case-insensitive text
pub fn compare(left: &TemplateToken, right: &TemplateToken) -> Result<Ordering, ExprError> {
    if let TokenValue::Number(a) = left.value {
        let b = right
            .as_number()
            .ok_or_else(|| ExprError::eval(format!("Cannot compare a number with a {}", right.kind_name())))?;
        return a
            .partial_cmp(&b)
            .ok_or_else(|| ExprError::eval("Cannot compare NaN"));
    }

    match (left.to_display_string(), right.to_display_string()) {
        (Some(a), Some(b)) => Ok(a.to_lowercase().cmp(&b.to_lowercase())),
        _ => Err(ExprError::eval(format!(
            "Cannot compare a {} with a {}",
            left.kind_name(),
            right.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::evaluate;
    use pretty_assertions::assert_eq;

    fn context() -> TemplateToken {
        TemplateToken::load(
            "parameters:\n  env: prod\n  count: 3\n  steps:\n  - script: a\n  - script: b\n  flags:\n    fast: true\nvariables:\n  Build.Reason: Manual\n",
            None,
        )
        .unwrap()
    }

    fn eval(expr: &str) -> TemplateToken {
        evaluate(expr, &context()).unwrap()
    }

    #[test]
    fn test_eval_references() {
        assert_eq!(eval("parameters.env").as_str(), Some("prod"));
        assert_eq!(eval("Parameters.ENV").as_str(), Some("prod"));
        assert_eq!(eval("parameters.steps[1].script").as_str(), Some("b"));
        assert_eq!(eval("variables['Build.Reason']").as_str(), Some("Manual"));
        assert!(eval("parameters.missing").is_null());
    }

    #[test]
    fn test_unknown_root_fails() {
        let err = evaluate("nope.x", &context()).unwrap_err();
        assert_eq!(err, ExprError::eval("Unrecognized value: 'nope'"));
    }

    #[test]
    fn test_eval_collections_returned_whole() {
        let steps = eval("parameters.steps");
        assert_eq!(steps.as_sequence().map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_eval_operators() {
        assert_eq!(eval("parameters.env == 'PROD'"), TemplateToken::boolean(true));
        assert_eq!(eval("parameters.count > 2"), TemplateToken::boolean(true));
        assert_eq!(eval("parameters.count <= '2'"), TemplateToken::boolean(false));
        assert_eq!(eval("!parameters.flags.fast"), TemplateToken::boolean(false));
        assert_eq!(
            eval("parameters.missing || parameters.env"),
            TemplateToken::boolean(true)
        );
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        assert_eq!(eval("false && nope.x"), TemplateToken::boolean(false));
        assert_eq!(eval("true || nope.x"), TemplateToken::boolean(true));
    }

    #[test]
    fn test_loose_equality() {
        assert!(values_equal(&TemplateToken::number(1.0), &TemplateToken::string("1")));
        assert!(values_equal(&TemplateToken::boolean(true), &TemplateToken::string("yes")));
        assert!(values_equal(&TemplateToken::null(), &TemplateToken::string("")));
        assert!(!values_equal(&TemplateToken::string("a"), &TemplateToken::number(1.0)));
    }
}
