// Parse error types shared by every reader in the crate
// Carries the source span, the originating file, and an optional hint

use crate::yaml::Span;

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Source span of the offending token, when one is known
    pub span: Option<Span>,
    /// File the token was read from
    pub file: Option<String>,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// The kind of error
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Malformed token shape, unknown keyword, mutual exclusion violation
    Syntax,
    /// Parameter binding and other semantic failures
    Validation,
    /// Depth, event, byte or file-count ceilings
    ResourceLimit,
    /// File provider failures
    Io,
}

pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            file: None,
            suggestion: None,
            kind,
        }
    }

    pub fn syntax(span: Option<Span>, message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Syntax, message).with_span(span)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Validation, message)
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::ResourceLimit, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Io, message)
    }

    /// Attach a span unless a more precise one is already recorded
    pub fn with_span(mut self, span: Option<Span>) -> Self {
        if self.span.is_none() {
            self.span = span;
        }
        self
    }

    /// Attach the file name. The innermost file wins, so outer callers
    /// never overwrite it.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        if self.file.is_none() {
            self.file = Some(file.into());
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_resource_limit(&self) -> bool {
        self.kind == ParseErrorKind::ResourceLimit
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;

        match (&self.file, &self.span) {
            (Some(file), Some(span)) => writeln!(f, "  --> {}:{}", file, span)?,
            (Some(file), None) => writeln!(f, "  --> {}", file)?,
            (None, Some(span)) => writeln!(f, "  --> line {}", span)?,
            (None, None) => {}
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Failures surfaced by a file provider
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("File not found: '{0}'")]
    NotFound(String),

    #[error("Repository '{0}' not found")]
    UnknownRepository(String),

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<FileError> for ParseError {
    fn from(err: FileError) -> Self {
        let file = match &err {
            FileError::NotFound(path) | FileError::Io { path, .. } => Some(path.clone()),
            FileError::UnknownRepository(_) => None,
        };
        let error = ParseError::io(err.to_string());
        match file {
            Some(file) => error.with_file(file),
            None => error,
        }
    }
}
