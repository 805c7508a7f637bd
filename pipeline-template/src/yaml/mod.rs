// YAML event stream
// Buffers the yaml-rust2 parser output into spanned events for the readers

pub mod reader;
pub mod writer;

pub use reader::{KeyComparer, Scalar, Value, YamlReader, MAX_OBJECT_DEPTH};
pub use writer::YamlWriter;

use crate::error::{ParseError, ParseResult};

use std::fmt;

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

/// A position in the source text. Both fields are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mark {
    pub line: usize,
    pub column: usize,
}

impl Mark {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    fn from_marker(marker: &Marker) -> Self {
        Self {
            line: marker.line(),
            column: marker.col() + 1,
        }
    }
}

/// Start and end position of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Mark,
    pub end: Mark,
}

impl Span {
    pub fn new(start: Mark, end: Mark) -> Self {
        Self { start, end }
    }

    pub fn point(mark: Mark) -> Self {
        Self {
            start: mark,
            end: mark,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start.line, self.start.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum YamlEvent {
    MappingStart,
    MappingEnd,
    SequenceStart,
    SequenceEnd,
    /// `plain` is false for quoted and block scalars, which never take part
    /// in null/boolean/number resolution.
    Scalar { value: String, plain: bool },
}

impl YamlEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            YamlEvent::MappingStart => "mapping start",
            YamlEvent::MappingEnd => "mapping end",
            YamlEvent::SequenceStart => "sequence start",
            YamlEvent::SequenceEnd => "sequence end",
            YamlEvent::Scalar { .. } => "scalar",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedEvent {
    pub event: YamlEvent,
    pub span: Span,
}

#[derive(Default)]
struct EventCollector {
    events: Vec<SpannedEvent>,
    open: Vec<usize>,
    alias: Option<Span>,
}

impl EventCollector {
    fn push(&mut self, event: YamlEvent, span: Span) {
        self.events.push(SpannedEvent { event, span });
    }

    fn open(&mut self, event: YamlEvent, at: Mark) {
        self.open.push(self.events.len());
        self.push(event, Span::point(at));
    }

    fn close(&mut self, event: YamlEvent, at: Mark) {
        if let Some(index) = self.open.pop() {
            self.events[index].span.end = at;
        }
        self.push(event, Span::point(at));
    }
}

impl MarkedEventReceiver for EventCollector {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        let at = Mark::from_marker(&mark);
        match ev {
            Event::MappingStart(..) => self.open(YamlEvent::MappingStart, at),
            Event::MappingEnd => self.close(YamlEvent::MappingEnd, at),
            Event::SequenceStart(..) => self.open(YamlEvent::SequenceStart, at),
            Event::SequenceEnd => self.close(YamlEvent::SequenceEnd, at),
            Event::Scalar(value, style, ..) => {
                let plain = matches!(style, TScalarStyle::Plain);
                let span = scalar_span(at, &value, plain);
                self.push(YamlEvent::Scalar { value, plain }, span);
            }
            Event::Alias(..) => {
                if self.alias.is_none() {
                    self.alias = Some(Span::point(at));
                }
            }
            _ => {}
        }
    }
}

fn scalar_span(start: Mark, value: &str, plain: bool) -> Span {
    if value.contains('\n') {
        return Span::point(start);
    }
    let quotes = if plain { 0 } else { 2 };
    let width = value.chars().count() + quotes;
    Span::new(start, Mark::new(start.line, start.column + width))
}

/// Tokenize the first document of `source` into spanned events.
///
/// Anchors are accepted by the scanner, but aliases are rejected: the
/// pipeline dialects do not allow them.
pub fn load_events(source: &str) -> ParseResult<Vec<SpannedEvent>> {
    let mut collector = EventCollector::default();
    let mut parser = Parser::new(source.chars());
    parser.load(&mut collector, false).map_err(|err| {
        let at = Mark::from_marker(err.marker());
        ParseError::syntax(Some(Span::point(at)), err.info().to_string())
    })?;

    if let Some(span) = collector.alias {
        return Err(ParseError::syntax(
            Some(span),
            "YAML aliases are not supported",
        ));
    }

    Ok(collector.events)
}
