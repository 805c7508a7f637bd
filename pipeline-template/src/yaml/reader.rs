// Scalar and collection readers
// Pull typed values off the spanned YAML event stream

use crate::error::{ParseError, ParseResult};
use crate::yaml::{load_events, Span, SpannedEvent, YamlEvent};

use serde::Serialize;
use std::collections::BTreeMap;

/// Maximum nesting for generic mapping/sequence reads
pub const MAX_OBJECT_DEPTH: usize = 10;

/// Generic object graph produced by `read_mapping`/`read_sequence`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Follow a dotted path (`a.b.c`) through nested mappings
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |current, segment| match current {
            Value::Mapping(map) => map.get(segment),
            _ => None,
        })
    }
}

/// Key comparison used by flat string maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyComparer {
    Ordinal,
    IgnoreCase,
}

impl KeyComparer {
    pub fn keys_equal(self, a: &str, b: &str) -> bool {
        match self {
            KeyComparer::Ordinal => a == b,
            KeyComparer::IgnoreCase => a.eq_ignore_ascii_case(b),
        }
    }
}

/// A scalar event lifted off the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub value: String,
    pub plain: bool,
    pub span: Span,
}

impl Scalar {
    /// Plain `~`, `null` and empty scalars are YAML nulls
    pub fn is_null(&self) -> bool {
        self.plain && matches!(self.value.as_str(), "" | "~" | "null" | "Null" | "NULL")
    }
}

/// Cursor over a buffered event stream
pub struct YamlReader {
    events: Vec<SpannedEvent>,
    position: usize,
}

impl YamlReader {
    pub fn new(source: &str) -> ParseResult<Self> {
        Ok(Self::from_events(load_events(source)?))
    }

    pub fn from_events(events: Vec<SpannedEvent>) -> Self {
        Self {
            events,
            position: 0,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.events.len()
    }

    pub fn peek(&self) -> Option<&SpannedEvent> {
        self.events.get(self.position)
    }

    /// Span of the next event, or of the last one when the stream is drained
    pub fn current_span(&self) -> Option<Span> {
        self.peek()
            .or_else(|| self.events.last())
            .map(|event| event.span)
    }

    fn next(&mut self, expected: &str) -> ParseResult<SpannedEvent> {
        match self.events.get(self.position) {
            Some(event) => {
                self.position += 1;
                Ok(event.clone())
            }
            None => Err(ParseError::syntax(
                self.current_span(),
                format!("Expected {}, but reached the end of the document", expected),
            )),
        }
    }

    fn expect_event(&mut self, expected: YamlEvent) -> ParseResult<Span> {
        let event = self.next(expected.describe())?;
        if event.event == expected {
            Ok(event.span)
        } else {
            Err(ParseError::syntax(
                Some(event.span),
                format!(
                    "Expected {}, found {}",
                    expected.describe(),
                    event.event.describe()
                ),
            ))
        }
    }

    fn accept(&self, expected: &YamlEvent) -> bool {
        self.peek().map(|e| &e.event) == Some(expected)
    }

    pub fn accept_scalar(&self) -> bool {
        matches!(
            self.peek(),
            Some(SpannedEvent {
                event: YamlEvent::Scalar { .. },
                ..
            })
        )
    }

    pub fn accept_mapping_start(&self) -> bool {
        self.accept(&YamlEvent::MappingStart)
    }

    pub fn accept_sequence_start(&self) -> bool {
        self.accept(&YamlEvent::SequenceStart)
    }

    pub fn expect_mapping_start(&mut self) -> ParseResult<Span> {
        self.expect_event(YamlEvent::MappingStart)
    }

    pub fn expect_mapping_end(&mut self) -> ParseResult<Span> {
        self.expect_event(YamlEvent::MappingEnd)
    }

    pub fn expect_sequence_start(&mut self) -> ParseResult<Span> {
        self.expect_event(YamlEvent::SequenceStart)
    }

    pub fn expect_sequence_end(&mut self) -> ParseResult<Span> {
        self.expect_event(YamlEvent::SequenceEnd)
    }

    /// Consume a mapping end when it is next
    pub fn allow_mapping_end(&mut self) -> bool {
        if self.accept(&YamlEvent::MappingEnd) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Consume a sequence end when it is next
    pub fn allow_sequence_end(&mut self) -> bool {
        if self.accept(&YamlEvent::SequenceEnd) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_scalar(&mut self) -> ParseResult<Scalar> {
        let event = self.next("scalar")?;
        match event.event {
            YamlEvent::Scalar { value, plain } => Ok(Scalar {
                value,
                plain,
                span: event.span,
            }),
            other => Err(ParseError::syntax(
                Some(event.span),
                format!("Expected scalar, found {}", other.describe()),
            )),
        }
    }

    // =========================================================================
    // Scalar readers
    // =========================================================================

    /// YAML 1.1 style booleans: true/y/yes/on and false/n/no/off
    // TODO: decide whether to restrict this to YAML 1.2 true/false
    pub fn read_boolean(&mut self) -> ParseResult<bool> {
        let scalar = self.expect_scalar()?;
        match scalar.value.to_ascii_uppercase().as_str() {
            "TRUE" | "Y" | "YES" | "ON" => Ok(true),
            "FALSE" | "N" | "NO" | "OFF" => Ok(false),
            _ => Err(ParseError::syntax(
                Some(scalar.span),
                format!("Expected a boolean value. Actual: '{}'", scalar.value),
            )),
        }
    }

    pub fn read_exact_string(&mut self, expected: &str) -> ParseResult<()> {
        let scalar = self.expect_scalar()?;
        if scalar.value != expected {
            return Err(ParseError::syntax(
                Some(scalar.span),
                format!("Expected value '{}'. Actual '{}'.", expected, scalar.value),
            ));
        }
        Ok(())
    }

    pub fn read_int32(&mut self) -> ParseResult<i32> {
        let scalar = self.expect_scalar()?;
        parse_int32(&scalar.value).ok_or_else(|| {
            ParseError::syntax(
                Some(scalar.span),
                format!("Expected an integer value. Actual: '{}'", scalar.value),
            )
        })
    }

    pub fn read_non_empty_string(&mut self) -> ParseResult<String> {
        let scalar = self.expect_scalar()?;
        if scalar.value.is_empty() || scalar.is_null() {
            return Err(ParseError::syntax(
                Some(scalar.span),
                "Expected non-empty string value.",
            ));
        }
        Ok(scalar.value)
    }

    /// A scalar value or a sequence of scalars, flattened into a list
    pub fn read_string_or_sequence(&mut self) -> ParseResult<Vec<String>> {
        if self.accept_scalar() {
            return Ok(vec![self.read_non_empty_string()?]);
        }
        self.expect_sequence_start()?;
        let mut items = Vec::new();
        while !self.allow_sequence_end() {
            items.push(self.read_non_empty_string()?);
        }
        Ok(items)
    }

    // =========================================================================
    // Collection readers
    // =========================================================================

    pub fn read_mapping_of_string_string(
        &mut self,
        comparer: KeyComparer,
    ) -> ParseResult<BTreeMap<String, String>> {
        self.expect_mapping_start()?;
        let mut map = BTreeMap::new();
        while !self.allow_mapping_end() {
            let key = self.expect_scalar()?;
            let value = self.expect_scalar()?;
            if map.keys().any(|existing: &String| comparer.keys_equal(existing, &key.value)) {
                return Err(ParseError::syntax(
                    Some(key.span),
                    format!("Duplicate key '{}'", key.value),
                ));
            }
            map.insert(key.value, value.value);
        }
        Ok(map)
    }

    pub fn read_mapping(&mut self, depth: usize) -> ParseResult<BTreeMap<String, Value>> {
        let span = self.expect_mapping_start()?;
        check_depth(depth, span)?;

        let mut map = BTreeMap::new();
        while !self.allow_mapping_end() {
            let key = self.expect_scalar()?;
            if map.contains_key(&key.value) {
                return Err(ParseError::syntax(
                    Some(key.span),
                    format!("Duplicate key '{}'", key.value),
                ));
            }
            let value = self.read_value(depth)?;
            map.insert(key.value, value);
        }
        Ok(map)
    }

    pub fn read_sequence(&mut self, depth: usize) -> ParseResult<Vec<Value>> {
        let span = self.expect_sequence_start()?;
        check_depth(depth, span)?;

        let mut items = Vec::new();
        while !self.allow_sequence_end() {
            items.push(self.read_value(depth)?);
        }
        Ok(items)
    }

    /// Read the next value; nested collections are one level deeper than `depth`
    fn read_value(&mut self, depth: usize) -> ParseResult<Value> {
        if self.accept_scalar() {
            Ok(Value::String(self.expect_scalar()?.value))
        } else if self.accept_sequence_start() {
            Ok(Value::Sequence(self.read_sequence(depth + 1)?))
        } else {
            Ok(Value::Mapping(self.read_mapping(depth + 1)?))
        }
    }
}

fn check_depth(depth: usize, span: Span) -> ParseResult<()> {
    if depth > MAX_OBJECT_DEPTH {
        return Err(ParseError::resource_limit(format!(
            "Max object depth of {} exceeded.",
            MAX_OBJECT_DEPTH
        ))
        .with_span(Some(span)));
    }
    Ok(())
}

/// Integer parsing with an optional leading sign and `,` thousands separators
fn parse_int32(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    let (negative, digits) = match trimmed.as_bytes().first()? {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    if digits.is_empty()
        || digits.starts_with(',')
        || !digits.chars().all(|c| c.is_ascii_digit() || c == ',')
    {
        return None;
    }

    let cleaned: String = digits.chars().filter(|c| *c != ',').collect();
    let magnitude: i64 = cleaned.parse().ok()?;
    let signed = if negative { -magnitude } else { magnitude };
    i32::try_from(signed).ok()
}

/// Ensure a mutually exclusive property was not already set
pub fn validate_null<T>(
    previous: &Option<T>,
    previous_name: &str,
    current_name: &str,
    span: Span,
) -> ParseResult<()> {
    if previous.is_some() {
        return Err(ParseError::syntax(
            Some(span),
            format!(
                "'{}' is not allowed. '{}' was already specified at the same level and is mutually exclusive.",
                current_name, previous_name
            ),
        ));
    }
    Ok(())
}
