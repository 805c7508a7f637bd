// Expression parser
// Recursive descent from lexer tokens to an AST

use crate::expression::lexer::{Lexer, Token};
use crate::expression::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),

    /// `parameters.env`, `variables['a.b']`, `item.key`
    Reference(Reference),

    /// `eq(a, b)`, `contains(s, 'x')`
    FunctionCall { name: String, args: Vec<Expr> },

    /// `split(a, ',')[0]`
    Index { object: Box<Expr>, index: Box<Expr> },

    /// `coalesce(a, b).name`
    Member { object: Box<Expr>, property: String },

    Not(Box<Expr>),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Array(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub root: String,
    pub parts: Vec<ReferencePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReferencePart {
    Property(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

pub struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse_str(input: &str) -> Result<Expr, ExprError> {
        let tokens = Lexer::new(input).tokenize()?;
        Self::new(tokens).parse()
    }

    pub fn parse(&mut self) -> Result<Expr, ExprError> {
        if self.check(&Token::Eof) {
            return Err(self.error("Expected an expression"));
        }
        let expr = self.parse_or()?;
        if !self.check(&Token::Eof) {
            return Err(self.error(&format!("Unexpected symbol: '{}'", self.peek())));
        }
        Ok(expr)
    }

    // Precedence, lowest first: || then && then == != then < <= > >=,
    // then unary !, then postfix . [] ()

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_equality()?;
        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.check(&Token::Not) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(expr)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&Token::Dot) {
                self.advance();
                let property = self.expect_identifier()?;
                expr = match expr {
                    Expr::Reference(mut reference) => {
                        reference.parts.push(ReferencePart::Property(property));
                        Expr::Reference(reference)
                    }
                    other => Expr::Member {
                        object: Box::new(other),
                        property,
                    },
                };
            } else if self.check(&Token::LBracket) {
                self.advance();
                let index = self.parse_or()?;
                self.expect(&Token::RBracket, "Expected ']'")?;
                expr = match expr {
                    Expr::Reference(mut reference) => {
                        reference.parts.push(ReferencePart::Index(Box::new(index)));
                        Expr::Reference(reference)
                    }
                    other => Expr::Index {
                        object: Box::new(other),
                        index: Box::new(index),
                    },
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance().clone() {
            Token::Null => Ok(Expr::Null),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::String(s) => Ok(Expr::String(s)),
            Token::Identifier(name) => {
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::FunctionCall { name, args })
                } else {
                    Ok(Expr::Reference(Reference {
                        root: name,
                        parts: Vec::new(),
                    }))
                }
            }
            Token::LParen => {
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "Expected ')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.check(&Token::RBracket) {
                    items.push(self.parse_or()?);
                    while self.check(&Token::Comma) {
                        self.advance();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&Token::RBracket, "Expected ']'")?;
                Ok(Expr::Array(items))
            }
            token => {
                self.position -= 1;
                Err(self.error(&format!("Unexpected symbol: '{}'", token)))
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        self.expect(&Token::LParen, "Expected '('")?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_or()?);
            while self.check(&Token::Comma) {
                self.advance();
                args.push(self.parse_or()?);
            }
        }
        self.expect(&Token::RParen, "Expected ')'")?;
        Ok(args)
    }

    fn expect_identifier(&mut self) -> Result<String, ExprError> {
        match self.advance().clone() {
            Token::Identifier(name) => Ok(name),
            // Keywords are valid property names: `parameters.null`
            Token::Null | Token::True | Token::False => {
                Ok(self.tokens[self.position - 1].to_string())
            }
            _ => {
                self.position -= 1;
                Err(self.error("Expected a property name after '.'"))
            }
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> &Token {
        let index = self.position.min(self.tokens.len().saturating_sub(1));
        self.position += 1;
        self.tokens.get(index).unwrap_or(&Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), ExprError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> ExprError {
        ExprError::Parse {
            message: message.to_string(),
            position: self.position,
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
