// Built-in functions
// The compile-time subset: comparison, logic, strings, collections

use crate::expression::evaluator::{compare, values_equal};
use crate::expression::ExprError;
use crate::template::token::{TemplateToken, TokenValue};

use std::cmp::Ordering;

/// Call the function `name` (case-insensitive) with evaluated arguments
pub fn call(name: &str, args: Vec<TemplateToken>) -> Result<TemplateToken, ExprError> {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "eq" => binary(&args, name, |a, b| Ok(values_equal(a, b))),
        "ne" => binary(&args, name, |a, b| Ok(!values_equal(a, b))),
        "lt" => binary(&args, name, |a, b| Ok(compare(a, b)? == Ordering::Less)),
        "le" => binary(&args, name, |a, b| Ok(compare(a, b)? != Ordering::Greater)),
        "gt" => binary(&args, name, |a, b| Ok(compare(a, b)? == Ordering::Greater)),
        "ge" => binary(&args, name, |a, b| Ok(compare(a, b)? != Ordering::Less)),
        "in" => {
            require_min(&args, 1, name)?;
            Ok(boolean(args[1..].iter().any(|c| values_equal(&args[0], c))))
        }
        "notin" => {
            require_min(&args, 1, name)?;
            Ok(boolean(!args[1..].iter().any(|c| values_equal(&args[0], c))))
        }

        "and" => {
            require_min(&args, 2, name)?;
            Ok(boolean(args.iter().all(TemplateToken::is_truthy)))
        }
        "or" => {
            require_min(&args, 2, name)?;
            Ok(boolean(args.iter().any(TemplateToken::is_truthy)))
        }
        "not" => {
            require(&args, 1, name)?;
            Ok(boolean(!args[0].is_truthy()))
        }
        "xor" => binary(&args, name, |a, b| Ok(a.is_truthy() ^ b.is_truthy())),

        "contains" => binary(&args, name, |a, b| {
            Ok(lower_text(a, "contains")?.contains(&lower_text(b, "contains")?))
        }),
        "containsvalue" => {
            require(&args, 2, name)?;
            let found = match &args[0].value {
                TokenValue::Sequence(items) => items.iter().any(|i| values_equal(i, &args[1])),
                TokenValue::Mapping(entries) => entries.iter().any(|(_, v)| values_equal(v, &args[1])),
                _ => false,
            };
            Ok(boolean(found))
        }
        "startswith" => binary(&args, name, |a, b| {
            Ok(lower_text(a, "startsWith")?.starts_with(&lower_text(b, "startsWith")?))
        }),
        "endswith" => binary(&args, name, |a, b| {
            Ok(lower_text(a, "endsWith")?.ends_with(&lower_text(b, "endsWith")?))
        }),
        "format" => format(&args),
        "join" => join(&args),
        "replace" => {
            require(&args, 3, name)?;
            let s = text(&args[0], name)?;
            Ok(TemplateToken::string(s.replace(&text(&args[1], name)?, &text(&args[2], name)?)))
        }
        "split" => {
            require(&args, 2, name)?;
            let s = text(&args[0], name)?;
            let delimiter = text(&args[1], name)?;
            Ok(TemplateToken::sequence(
                s.split(delimiter.as_str()).map(TemplateToken::string).collect(),
            ))
        }
        "lower" => unary_text(&args, name, |s| s.to_lowercase()),
        "upper" => unary_text(&args, name, |s| s.to_uppercase()),
        "trim" => unary_text(&args, name, |s| s.trim().to_string()),

        "converttojson" => {
            require(&args, 1, name)?;
            serde_json::to_string_pretty(&args[0].to_json())
                .map(TemplateToken::string)
                .map_err(|e| ExprError::eval(e.to_string()))
        }
        "coalesce" => Ok(args
            .into_iter()
            .find(|a| !a.is_null() && a.as_str() != Some(""))
            .unwrap_or_else(TemplateToken::null)),
        "iif" => {
            require(&args, 3, name)?;
            let mut args = args;
            let chosen = if args[0].is_truthy() { 1 } else { 2 };
            Ok(args.swap_remove(chosen))
        }
        "length" => {
            require(&args, 1, name)?;
            let length = match &args[0].value {
                TokenValue::String(s) => s.chars().count(),
                TokenValue::Sequence(items) => items.len(),
                TokenValue::Mapping(entries) => entries.len(),
                _ => {
                    return Err(ExprError::eval(
                        "length() requires a string, sequence or mapping",
                    ))
                }
            };
            Ok(TemplateToken::number(length as f64))
        }

        _ => Err(ExprError::eval(format!("Unrecognized function: '{}'", name))),
    }
}

fn boolean(value: bool) -> TemplateToken {
    TemplateToken::boolean(value)
}

fn require(args: &[TemplateToken], count: usize, name: &str) -> Result<(), ExprError> {
    if args.len() != count {
        return Err(ExprError::eval(format!(
            "{}() requires {} argument(s), got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

fn require_min(args: &[TemplateToken], count: usize, name: &str) -> Result<(), ExprError> {
    if args.len() < count {
        return Err(ExprError::eval(format!(
            "{}() requires at least {} argument(s), got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

fn binary<F>(args: &[TemplateToken], name: &str, f: F) -> Result<TemplateToken, ExprError>
where
    F: FnOnce(&TemplateToken, &TemplateToken) -> Result<bool, ExprError>,
{
    require(args, 2, name)?;
    f(&args[0], &args[1]).map(boolean)
}

fn text(token: &TemplateToken, name: &str) -> Result<String, ExprError> {
    token.to_display_string().ok_or_else(|| {
        ExprError::eval(format!("{}() cannot use a {} as text", name, token.kind_name()))
    })
}

fn lower_text(token: &TemplateToken, name: &str) -> Result<String, ExprError> {
    text(token, name).map(|s| s.to_lowercase())
}

fn unary_text<F>(args: &[TemplateToken], name: &str, f: F) -> Result<TemplateToken, ExprError>
where
    F: FnOnce(&str) -> String,
{
    require(args, 1, name)?;
    Ok(TemplateToken::string(f(&text(&args[0], name)?)))
}

/// `format('{0}-{1}', a, b)`; `{{` and `}}` escape braces
fn format(args: &[TemplateToken]) -> Result<TemplateToken, ExprError> {
    require_min(args, 1, "format")?;
    let template = text(&args[0], "format")?;
    let mut output = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '{' => {
                let index: String = chars.by_ref().take_while(|c| *c != '}').collect();
                let arg = index
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| args.get(i + 1))
                    .ok_or_else(|| ExprError::eval(format!("Invalid format placeholder '{{{}}}'", index)))?;
                output.push_str(&text(arg, "format")?);
            }
            other => output.push(other),
        }
    }
    Ok(TemplateToken::string(output))
}

/// `join(separator, collection)`
fn join(args: &[TemplateToken]) -> Result<TemplateToken, ExprError> {
    require(args, 2, "join")?;
    let separator = text(&args[0], "join")?;
    let items = match &args[1].value {
        TokenValue::Sequence(items) => items
            .iter()
            .map(|i| text(i, "join"))
            .collect::<Result<Vec<_>, _>>()?,
        _ => vec![text(&args[1], "join")?],
    };
    Ok(TemplateToken::string(items.join(&separator)))
}

#[cfg(test)]
mod tests {
    use crate::expression::evaluate;
    use crate::template::token::TemplateToken;
    use pretty_assertions::assert_eq;

    fn eval(expr: &str) -> TemplateToken {
        let context = TemplateToken::load(
            "parameters:\n  list: [a, b, c]\n  name: Build\n",
            None,
        )
        .unwrap();
        evaluate(expr, &context).unwrap()
    }

    fn eval_str(expr: &str) -> String {
        eval(expr).to_display_string().unwrap()
    }

    #[test]
    fn test_comparison_functions() {
        assert_eq!(eval_str("eq(parameters.name, 'build')"), "true");
        assert_eq!(eval_str("ne(1, 2)"), "true");
        assert_eq!(eval_str("lt(1, 2)"), "true");
        assert_eq!(eval_str("ge('b', 'A')"), "true");
        assert_eq!(eval_str("in('b', 'a', 'b')"), "true");
        assert_eq!(eval_str("notIn('z', 'a', 'b')"), "true");
    }

    #[test]
    fn test_logical_functions() {
        assert_eq!(eval_str("and(true, 1, 'x')"), "true");
        assert_eq!(eval_str("or(false, '')"), "false");
        assert_eq!(eval_str("not(0)"), "true");
        assert_eq!(eval_str("xor(true, true)"), "false");
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval_str("contains('Hello', 'ELL')"), "true");
        assert_eq!(eval_str("startsWith('refs/heads/main', 'refs/heads')"), "true");
        assert_eq!(eval_str("endsWith('a.yml', '.YML')"), "true");
        assert_eq!(eval_str("format('{0}-{1} {{x}}', 'a', 2)"), "a-2 {x}");
        assert_eq!(eval_str("join(',', parameters.list)"), "a,b,c");
        assert_eq!(eval_str("replace('a-b', '-', '+')"), "a+b");
        assert_eq!(eval_str("upper(lower(' Ab '))"), " AB ");
        assert_eq!(eval_str("trim(' x ')"), "x");
        assert_eq!(eval_str("split('a,b', ',')[1]"), "b");
    }

    #[test]
    fn test_collection_functions() {
        assert_eq!(eval_str("containsValue(parameters.list, 'C')"), "true");
        assert_eq!(eval_str("length(parameters.list)"), "3");
        assert_eq!(eval_str("coalesce(parameters.none, '', 'x')"), "x");
        assert_eq!(eval_str("iif(false, 'a', 'b')"), "b");
    }

    #[test]
    fn test_convert_to_json() {
        assert_eq!(
            eval_str("convertToJson(parameters.list)"),
            "[\n  \"a\",\n  \"b\",\n  \"c\"\n]"
        );
    }

    #[test]
    fn test_unknown_function() {
        let context = TemplateToken::from_pairs(Vec::<(String, TemplateToken)>::new());
        assert!(evaluate("nope(1)", &context).is_err());
        assert!(evaluate("eq(1)", &context).is_err());
    }
}
