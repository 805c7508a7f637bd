// Expression lexer
// Tokenizes the body of a ${{ }} expression and splits strings into segments

use crate::expression::ExprError;

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Null,
    True,
    False,
    Number(f64),
    String(String),
    Identifier(String),

    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
    And, // &&
    Or,  // ||
    Not, // !
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            position: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ExprError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        self.position = pos;

        let single = match ch {
            '.' if !self.digit_follows() => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match ch {
            '=' => self.pair('=', Token::Eq, None),
            '!' => self.pair('=', Token::Ne, Some(Token::Not)),
            '<' => self.pair('=', Token::Le, Some(Token::Lt)),
            '>' => self.pair('=', Token::Ge, Some(Token::Gt)),
            '&' => self.pair('&', Token::And, None),
            '|' => self.pair('|', Token::Or, None),
            '\'' => self.read_string(),
            '-' | '+' | '.' | '0'..='9' => self.read_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            _ => Err(self.error(format!("Unexpected symbol: '{}'", ch))),
        }
    }

    /// `first` followed by `second` yields `both`, otherwise `alone`
    fn pair(&mut self, second: char, both: Token, alone: Option<Token>) -> Result<Token, ExprError> {
        let first = self.advance().map(|(_, c)| c).unwrap_or_default();
        if self.peek_char() == Some(second) {
            self.advance();
            return Ok(both);
        }
        alone.ok_or_else(|| self.error(format!("Expected '{}{}'", first, second)))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn digit_follows(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.peek().is_some_and(|&(_, c)| c.is_ascii_digit())
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn read_string(&mut self) -> Result<Token, ExprError> {
        let start = self.position;
        self.advance();

        let mut value = String::new();
        loop {
            match self.advance() {
                // '' escapes a quote
                Some((_, '\'')) if self.peek_char() == Some('\'') => {
                    self.advance();
                    value.push('\'');
                }
                Some((_, '\'')) => return Ok(Token::String(value)),
                Some((_, ch)) => value.push(ch),
                None => {
                    return Err(ExprError::Lex {
                        message: "Unterminated string".to_string(),
                        position: start,
                    })
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, ExprError> {
        let mut text = String::new();
        while let Some(ch) = self.peek_char() {
            let sign_allowed = text.is_empty() || text.ends_with(['e', 'E']);
            if ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E') || (sign_allowed && matches!(ch, '-' | '+')) {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("Unexpected symbol: '{}'", text)))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.peek_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.to_lowercase().as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }

    fn error(&self, message: String) -> ExprError {
        ExprError::Lex {
            message,
            position: self.position,
        }
    }
}

/// Piece of a string that may hold `${{ }}` expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expression(String),
}

/// Split `input` into literal text and compile-time expressions.
///
/// Runtime `$[ ]` and macro `$( )` syntax is literal text here; it is
/// resolved by whatever executes the pipeline.
pub fn split_segments(input: &str) -> Result<Vec<Segment>, ExprError> {
    let mut segments = Vec::new();
    let mut rest = input;
    let mut offset = 0;

    while let Some(open) = rest.find("${{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }
        let body_start = open + 3;
        let close = find_close(&rest[body_start..]).ok_or_else(|| ExprError::Lex {
            message: "Expected '}}' to close the expression".to_string(),
            position: offset + open,
        })?;
        segments.push(Segment::Expression(
            rest[body_start..body_start + close].trim().to_string(),
        ));
        let consumed = body_start + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Offset of the `}}` closing an expression body, skipping string literals
fn find_close(body: &str) -> Option<usize> {
    let mut in_string = false;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// The expression when `input` is exactly one `${{ }}` and nothing else
pub fn whole_expression(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !trimmed.starts_with("${{") {
        return None;
    }
    match split_segments(trimmed).ok()?.as_slice() {
        [Segment::Expression(expr)] => Some(expr.clone()),
        _ => None,
    }
}
