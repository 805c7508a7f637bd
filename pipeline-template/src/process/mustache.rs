// Front matter and mustache replacement
// Pre-processing applied to every legacy process file before it is parsed

use crate::error::{ParseError, ParseResult};
use crate::yaml::{Value, YamlReader};

use std::collections::BTreeMap;

/// Replacement values, keyed by top-level name
pub type MustacheContext = BTreeMap<String, Value>;

const DELIMITER: &str = "---";

/// Split an optional `---` delimited preamble off the top of `content`.
///
/// Returns the parsed preamble mapping (when present) and the remaining body.
pub fn split_front_matter<'a>(
    path: &str,
    content: &'a str,
) -> ParseResult<(Option<MustacheContext>, &'a str)> {
    let mut lines = content.split_inclusive('\n');
    let start = match lines.next() {
        Some(first) if trim_line_end(first) == DELIMITER => first.len(),
        _ => return Ok((None, content)),
    };

    let mut offset = start;
    for line in lines {
        let end = offset;
        offset += line.len();
        if trim_line_end(line) == DELIMITER {
            let values = parse_front_matter(path, &content[start..end])?;
            return Ok((Some(values), &content[offset..]));
        }
    }

    Err(ParseError::syntax(
        None,
        format!(
            "Unexpected end of file '{}'. The file started with '---' to indicate a preamble data section. The end of the file was reached without finding a corresponding closing '---'.",
            path
        ),
    )
    .with_file(path))
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn parse_front_matter(path: &str, text: &str) -> ParseResult<MustacheContext> {
    let parsed = YamlReader::new(text).and_then(|mut r| {
        if r.is_at_end() {
            Ok(BTreeMap::new())
        } else {
            r.read_mapping(1)
        }
    });
    parsed.map_err(|err| {
        ParseError::syntax(
            err.span,
            format!("Error parsing preamble data in file '{}': {}", path, err.message),
        )
        .with_file(path)
    })
}

/// Replace `{{ name }}` and `{{ a.b }}` references with values from `context`.
///
/// Strings are inserted as-is, sequences and mappings as JSON. Unknown names
/// render empty and `{{! ... }}` comments are dropped. `max_result_length`
/// of zero means unlimited.
pub fn render(template: &str, context: &MustacheContext, max_result_length: usize) -> ParseResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let triple = after_open.starts_with('{');
        let (inner_start, close_token) = if triple { (1, "}}}") } else { (0, "}}") };

        let close = after_open[inner_start..].find(close_token).ok_or_else(|| {
            ParseError::syntax(None, "Unclosed mustache expression, expected '}}'")
        })?;
        let expression = after_open[inner_start..inner_start + close].trim();
        rest = &after_open[inner_start + close + close_token.len()..];

        if expression.starts_with('!') {
            continue;
        }
        if expression.starts_with(['#', '/', '^', '>', '&']) {
            return Err(ParseError::syntax(
                None,
                format!("Unsupported mustache expression '{{{{{}}}}}'", expression),
            ));
        }

        if let Some(value) = lookup(context, expression) {
            output.push_str(&encode(value)?);
        }
        check_length(&output, max_result_length)?;
    }

    output.push_str(rest);
    check_length(&output, max_result_length)?;
    Ok(output)
}

fn lookup<'a>(context: &'a MustacheContext, path: &str) -> Option<&'a Value> {
    let (head, tail) = match path.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    };
    let root = context.get(head)?;
    match tail {
        Some(tail) => root.lookup(tail),
        None => Some(root),
    }
}

fn encode(value: &Value) -> ParseResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other)
            .map_err(|e| ParseError::validation(format!("Failed to encode mustache value: {}", e))),
    }
}

fn check_length(output: &str, max_result_length: usize) -> ParseResult<()> {
    if max_result_length > 0 && output.len() > max_result_length {
        return Err(ParseError::resource_limit(format!(
            "Maximum mustache result length of {} exceeded.",
            max_result_length
        )));
    }
    Ok(())
}
