// Template tokens
// Spanned value tree the template engine evaluates and the composers consume

use crate::error::{ParseError, ParseResult};
use crate::yaml::{load_events, Span, SpannedEvent, YamlEvent};

use serde_json::Value as JsonValue;

/// A node of a template document, tagged with where it came from.
///
/// `file` indexes the file table of the evaluation budget; tokens produced by
/// expressions inherit the span of the expression that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateToken {
    pub span: Option<Span>,
    pub file: Option<usize>,
    pub value: TokenValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Sequence(Vec<TemplateToken>),
    /// Keys are always string tokens; order is preserved
    Mapping(Vec<(TemplateToken, TemplateToken)>),
}

impl TemplateToken {
    pub fn new(value: TokenValue) -> Self {
        Self {
            span: None,
            file: None,
            value,
        }
    }

    pub fn null() -> Self {
        Self::new(TokenValue::Null)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(TokenValue::Boolean(value))
    }

    pub fn number(value: f64) -> Self {
        Self::new(TokenValue::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(TokenValue::String(value.into()))
    }

    pub fn sequence(items: Vec<TemplateToken>) -> Self {
        Self::new(TokenValue::Sequence(items))
    }

    pub fn mapping(entries: Vec<(TemplateToken, TemplateToken)>) -> Self {
        Self::new(TokenValue::Mapping(entries))
    }

    /// Mapping built from plain string keys
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, TemplateToken)>) -> Self {
        Self::mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (TemplateToken::string(k), v))
                .collect(),
        )
    }

    /// Copy the location of `origin` onto this token when it has none
    pub fn located_at(mut self, origin: &TemplateToken) -> Self {
        if self.span.is_none() {
            self.span = origin.span;
            self.file = origin.file;
        }
        self
    }

    /// Parse the first document of `source` into a token tree. An empty
    /// document yields a null token.
    pub fn load(source: &str, file: Option<usize>) -> ParseResult<Self> {
        let events = load_events(source)?;
        let mut builder = TokenBuilder {
            events: events.into_iter(),
            file,
        };
        match builder.events.next() {
            Some(first) => builder.build(first),
            None => Ok(TemplateToken::null()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, TokenValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            TokenValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[TemplateToken]> {
        match &self.value {
            TokenValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[(TemplateToken, TemplateToken)]> {
        match &self.value {
            TokenValue::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Exact key lookup on a mapping
    pub fn get(&self, key: &str) -> Option<&TemplateToken> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Case-insensitive key lookup, the way expressions address context data
    pub fn get_ignore_case(&self, key: &str) -> Option<&TemplateToken> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k.as_str().is_some_and(|k| k.eq_ignore_ascii_case(key)))
            .map(|(_, v)| v)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.value {
            TokenValue::Null => "null",
            TokenValue::Boolean(_) => "boolean",
            TokenValue::Number(_) => "number",
            TokenValue::String(_) => "string",
            TokenValue::Sequence(_) => "sequence",
            TokenValue::Mapping(_) => "mapping",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self.value, TokenValue::Sequence(_) | TokenValue::Mapping(_))
    }

    pub fn is_truthy(&self) -> bool {
        match &self.value {
            TokenValue::Null => false,
            TokenValue::Boolean(b) => *b,
            TokenValue::Number(n) => *n != 0.0 && !n.is_nan(),
            TokenValue::String(s) => !s.is_empty(),
            TokenValue::Sequence(_) | TokenValue::Mapping(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match &self.value {
            TokenValue::Null => Some(0.0),
            TokenValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            TokenValue::Number(n) => Some(*n),
            TokenValue::String(s) if s.trim().is_empty() => Some(0.0),
            TokenValue::String(s) => s.trim().parse().ok(),
            TokenValue::Sequence(_) | TokenValue::Mapping(_) => None,
        }
    }

    /// Scalar text. Collections have no string form.
    pub fn to_display_string(&self) -> Option<String> {
        match &self.value {
            TokenValue::Null => Some(String::new()),
            TokenValue::Boolean(b) => Some(b.to_string()),
            TokenValue::Number(n) => Some(format_number(*n)),
            TokenValue::String(s) => Some(s.clone()),
            TokenValue::Sequence(_) | TokenValue::Mapping(_) => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match &self.value {
            TokenValue::Null => JsonValue::Null,
            TokenValue::Boolean(b) => JsonValue::Bool(*b),
            TokenValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    JsonValue::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                }
            }
            TokenValue::String(s) => JsonValue::String(s.clone()),
            TokenValue::Sequence(items) => {
                JsonValue::Array(items.iter().map(TemplateToken::to_json).collect())
            }
            TokenValue::Mapping(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_display_string().unwrap_or_default(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::null(),
            JsonValue::Bool(b) => Self::boolean(*b),
            JsonValue::Number(n) => Self::number(n.as_f64().unwrap_or_default()),
            JsonValue::String(s) => Self::string(s.as_str()),
            JsonValue::Array(items) => Self::sequence(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(map) => {
                Self::from_pairs(map.iter().map(|(k, v)| (k.as_str(), Self::from_json(v))))
            }
        }
    }

    /// Syntax error located at this token
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(self.span, message)
    }

    pub fn expect_mapping(&self, what: &str) -> ParseResult<&[(TemplateToken, TemplateToken)]> {
        self.as_mapping().ok_or_else(|| {
            self.error(format!("Expected a mapping for '{}', found {}", what, self.kind_name()))
        })
    }

    pub fn expect_sequence(&self, what: &str) -> ParseResult<&[TemplateToken]> {
        self.as_sequence().ok_or_else(|| {
            self.error(format!("Expected a sequence for '{}', found {}", what, self.kind_name()))
        })
    }

    /// Any scalar, stringified
    pub fn expect_string(&self, what: &str) -> ParseResult<String> {
        self.to_display_string().ok_or_else(|| {
            self.error(format!("Expected a string for '{}', found {}", what, self.kind_name()))
        })
    }

    pub fn expect_non_empty_string(&self, what: &str) -> ParseResult<String> {
        let value = self.expect_string(what)?;
        if value.is_empty() {
            return Err(self.error(format!("Expected a non-empty string for '{}'", what)));
        }
        Ok(value)
    }

    pub fn expect_bool(&self, what: &str) -> ParseResult<bool> {
        match &self.value {
            TokenValue::Boolean(b) => Ok(*b),
            TokenValue::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            TokenValue::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(self.error(format!("Expected a boolean for '{}'", what))),
        }
    }

    pub fn expect_int(&self, what: &str) -> ParseResult<i64> {
        match self.as_number() {
            Some(n) if n.fract() == 0.0 && !self.is_null() => Ok(n as i64),
            _ => Err(self.error(format!("Expected an integer for '{}'", what))),
        }
    }

    /// A string or a sequence of strings
    pub fn expect_string_list(&self, what: &str) -> ParseResult<Vec<String>> {
        match &self.value {
            TokenValue::Null => Ok(Vec::new()),
            TokenValue::Sequence(items) => items.iter().map(|t| t.expect_string(what)).collect(),
            _ => Ok(vec![self.expect_string(what)?]),
        }
    }

    /// Mapping of scalars, stringified
    pub fn expect_string_map(&self, what: &str) -> ParseResult<Vec<(String, String)>> {
        if self.is_null() {
            return Ok(Vec::new());
        }
        self.expect_mapping(what)?
            .iter()
            .map(|(k, v)| Ok((k.expect_string(what)?, v.expect_string(what)?)))
            .collect()
    }
}

impl serde::Serialize for TemplateToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.to_json(), serializer)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

struct TokenBuilder {
    events: std::vec::IntoIter<SpannedEvent>,
    file: Option<usize>,
}

impl TokenBuilder {
    fn located(&self, value: TokenValue, span: Span) -> TemplateToken {
        TemplateToken {
            span: Some(span),
            file: self.file,
            value,
        }
    }

    fn next(&mut self, span: Span) -> ParseResult<SpannedEvent> {
        self.events
            .next()
            .ok_or_else(|| ParseError::syntax(Some(span), "Unexpected end of document"))
    }

    fn build(&mut self, first: SpannedEvent) -> ParseResult<TemplateToken> {
        let SpannedEvent { event, span } = first;
        match event {
            YamlEvent::Scalar { value, plain } => Ok(self.located(resolve_scalar(value, plain), span)),
            YamlEvent::SequenceStart => {
                let mut items = Vec::new();
                loop {
                    let next = self.next(span)?;
                    if next.event == YamlEvent::SequenceEnd {
                        break;
                    }
                    items.push(self.build(next)?);
                }
                Ok(self.located(TokenValue::Sequence(items), span))
            }
            YamlEvent::MappingStart => {
                let mut entries = Vec::new();
                loop {
                    let next = self.next(span)?;
                    match next.event {
                        YamlEvent::MappingEnd => break,
                        YamlEvent::Scalar { value, .. } => {
                            let key = self.located(TokenValue::String(value), next.span);
                            if entries
                                .iter()
                                .any(|(k, _): &(TemplateToken, TemplateToken)| k.as_str() == key.as_str())
                            {
                                return Err(key.error(format!(
                                    "'{}' is already defined",
                                    key.as_str().unwrap_or_default()
                                )));
                            }
                            let value_event = self.next(next.span)?;
                            let value = self.build(value_event)?;
                            entries.push((key, value));
                        }
                        other => {
                            return Err(ParseError::syntax(
                                Some(next.span),
                                format!("Expected a scalar mapping key, found {}", other.describe()),
                            ));
                        }
                    }
                }
                Ok(self.located(TokenValue::Mapping(entries), span))
            }
            other => Err(ParseError::syntax(
                Some(span),
                format!("Unexpected {}", other.describe()),
            )),
        }
    }
}

/// YAML 1.2 core schema resolution for plain scalars
fn resolve_scalar(value: String, plain: bool) -> TokenValue {
    if !plain {
        return TokenValue::String(value);
    }
    match value.as_str() {
        "" | "~" | "null" | "Null" | "NULL" => return TokenValue::Null,
        "true" | "True" | "TRUE" => return TokenValue::Boolean(true),
        "false" | "False" | "FALSE" => return TokenValue::Boolean(false),
        _ => {}
    }
    match parse_core_number(&value) {
        Some(n) => TokenValue::Number(n),
        None => TokenValue::String(value),
    }
}

fn parse_core_number(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    if let Some(octal) = text.strip_prefix("0o") {
        return i64::from_str_radix(octal, 8).ok().map(|n| n as f64);
    }
    match text {
        ".inf" | ".Inf" | ".INF" | "+.inf" => return Some(f64::INFINITY),
        "-.inf" | "-.Inf" | "-.INF" => return Some(f64::NEG_INFINITY),
        ".nan" | ".NaN" | ".NAN" => return Some(f64::NAN),
        _ => {}
    }

    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    let starts_numeric = digits.starts_with(|c: char| c.is_ascii_digit() || c == '.');
    let only_numeric = digits
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'));
    if !starts_numeric || !only_numeric || digits == "." {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_core_schema_typing() {
        let token = TemplateToken::load(
            "a: true\nb: 3\nc: 1.5\nd: ~\ne: 'true'\nf: yes\ng: 0x1F\nh: 1.2.3\n",
            None,
        )
        .unwrap();
        assert_eq!(
            token.to_json(),
            json!({"a": true, "b": 3, "c": 1.5, "d": null, "e": "true", "f": "yes", "g": 31, "h": "1.2.3"})
        );
    }

    #[test]
    fn test_mapping_order_and_spans() {
        let token = TemplateToken::load("z: 1\na: 2\n", Some(4)).unwrap();
        let keys: Vec<_> = token
            .as_mapping()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["z", "a"]);
        let a = token.get("a").unwrap();
        assert_eq!(a.file, Some(4));
        assert_eq!(a.span.map(|s| s.start.line), Some(2));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = TemplateToken::load("a: 1\na: 2\n", None).unwrap_err();
        assert_eq!(err.message, "'a' is already defined");
    }

    #[test]
    fn test_empty_document_is_null() {
        assert!(TemplateToken::load("", None).unwrap().is_null());
    }

    #[test]
    fn test_truthiness() {
        assert!(!TemplateToken::string("").is_truthy());
        assert!(TemplateToken::string("false").is_truthy());
        assert!(!TemplateToken::number(0.0).is_truthy());
        assert!(TemplateToken::sequence(vec![]).is_truthy());
        assert!(!TemplateToken::null().is_truthy());
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(TemplateToken::number(2.0).to_display_string().unwrap(), "2");
        assert_eq!(TemplateToken::number(2.5).to_display_string().unwrap(), "2.5");
        assert_eq!(TemplateToken::boolean(true).to_display_string().unwrap(), "true");
        assert!(TemplateToken::sequence(vec![]).to_display_string().is_none());
    }

    #[test]
    fn test_json_conversion_keeps_structure() {
        let value = json!({"steps": [{"script": "echo hi"}], "n": 2});
        assert_eq!(TemplateToken::from_json(&value).to_json(), value);
    }

    #[test]
    fn test_expect_helpers() {
        let token = TemplateToken::load("a: [x, y]\nb: 5\nc: true\n", None).unwrap();
        assert_eq!(
            token.get("a").unwrap().expect_string_list("a").unwrap(),
            vec!["x", "y"]
        );
        assert_eq!(token.get("b").unwrap().expect_int("b").unwrap(), 5);
        assert!(token.get("c").unwrap().expect_bool("c").unwrap());
        let err = token.get("a").unwrap().expect_string("a").unwrap_err();
        assert_eq!(err.message, "Expected a string for 'a', found sequence");
    }
}
