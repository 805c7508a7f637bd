// Expression engine
// Compile-time ${{ }} expressions evaluated over template tokens

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use evaluator::Evaluator;
pub use lexer::{split_segments, whole_expression, Segment};
pub use parser::{BinaryOp, Expr, ExprParser, Reference, ReferencePart};

use crate::error::ParseError;
use crate::template::token::TemplateToken;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("{message} (at position {position})")]
    Lex { message: String, position: usize },

    #[error("{message} (at position {position})")]
    Parse { message: String, position: usize },

    #[error("{0}")]
    Eval(String),
}

impl ExprError {
    pub fn eval(message: impl Into<String>) -> Self {
        ExprError::Eval(message.into())
    }
}

impl From<ExprError> for ParseError {
    fn from(err: ExprError) -> Self {
        match err {
            ExprError::Lex { .. } | ExprError::Parse { .. } => ParseError::syntax(None, err.to_string()),
            ExprError::Eval(message) => ParseError::validation(message),
        }
    }
}

/// Parse and evaluate `expression` against the named values in `context`
pub fn evaluate(expression: &str, context: &TemplateToken) -> Result<TemplateToken, ExprError> {
    let ast = ExprParser::parse_str(expression)?;
    Evaluator::new(context).eval(&ast)
}
