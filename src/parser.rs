use std::collections::HashMap;

use log::trace;

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::lexer::{lex, LexError, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("expected expression, found {0}")]
    ExpectedExpression(String),
    #[error("expected {expected} {context}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        context: &'static str,
        found: String,
    },
    #[error("duplicate parameter {param} in prototype {name}")]
    DuplicateParameter { name: String, param: String },
    #[error(transparent)]
    Lex(#[from] LexError),
}

impl ParserError {
    /// Whether the parse failed only because the tokens ran out.
    pub fn is_end_of_input(&self) -> bool {
        match self {
            ParserError::ExpectedExpression(found) | ParserError::UnexpectedToken { found, .. } => {
                found == END_OF_INPUT
            }
            _ => false,
        }
    }
}

pub type PartialParseResult = Result<Expression, ParserError>;

const END_OF_INPUT: &str = "end of input";

fn describe(token: Option<&Token>) -> String {
    token.map_or_else(|| END_OF_INPUT.to_string(), |tok| tok.to_string())
}

/// Recursive descent parser with precedence climbing for binary operators.
///
/// Every method takes the token stack produced by [`lex`]: the last element is
/// the current token and popping it advances the stream.
#[derive(Debug, Clone)]
pub struct Parser {
    pub operator_precedence: HashMap<char, i32>,
}

impl std::default::Default for Parser {
    fn default() -> Self {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert('<', 10);
        operator_precedence.insert('+', 20);
        operator_precedence.insert('-', 20);
        operator_precedence.insert('*', 40);
        Self {
            operator_precedence,
        }
    }
}

impl Parser {
    /// Installs `op` as a binary operator. A non-positive precedence removes it.
    pub fn set_precedence(&mut self, op: char, precedence: i32) {
        if precedence > 0 {
            self.operator_precedence.insert(op, precedence);
        } else {
            self.operator_precedence.remove(&op);
        }
    }

    /// Precedence of the given token, or -1 if it is not a known binary operator.
    pub fn token_precedence(&self, token: Option<&Token>) -> i32 {
        match token {
            Some(Token::Operator(op)) => self.operator_precedence.get(op).copied().unwrap_or(-1),
            _ => -1,
        }
    }

    fn expect(
        &self,
        input: &mut Vec<Token>,
        token: Token,
        expected: &'static str,
        context: &'static str,
    ) -> Result<(), ParserError> {
        if input.last() != Some(&token) {
            return Err(ParserError::UnexpectedToken {
                expected,
                context,
                found: describe(input.last()),
            });
        }
        input.pop();
        Ok(())
    }

    fn parse_number(&self, input: &mut Vec<Token>) -> PartialParseResult {
        match input.pop() {
            Some(Token::Number(num)) => Ok(Expression::Number(num)),
            other => Err(ParserError::ExpectedExpression(describe(other.as_ref()))),
        }
    }

    fn parse_identifier(&self, input: &mut Vec<Token>) -> PartialParseResult {
        let ident = match input.pop() {
            Some(Token::Ident(ident)) => ident,
            other => return Err(ParserError::ExpectedExpression(describe(other.as_ref()))),
        };

        if input.last() != Some(&Token::OpenParen) {
            return Ok(Expression::Variable(ident));
        }
        input.pop();

        let mut args = Vec::new();
        if input.last() != Some(&Token::CloseParen) {
            loop {
                args.push(self.parse_expr(input)?);

                match input.last() {
                    Some(Token::CloseParen) => break,
                    Some(Token::Comma) => {
                        input.pop();
                    }
                    other => {
                        return Err(ParserError::UnexpectedToken {
                            expected: "')' or ','",
                            context: "in argument list",
                            found: describe(other),
                        })
                    }
                }
            }
        }
        input.pop();

        Ok(Expression::Call(ident, args))
    }

    fn parse_nested(&self, input: &mut Vec<Token>) -> PartialParseResult {
        self.expect(input, Token::OpenParen, "'('", "to open group")?;
        let res = self.parse_expr(input)?;
        self.expect(input, Token::CloseParen, "')'", "to close group")?;
        Ok(res)
    }

    fn parse_primary(&self, input: &mut Vec<Token>) -> PartialParseResult {
        match input.last() {
            Some(Token::Number(_)) => self.parse_number(input),
            Some(Token::Ident(_)) => self.parse_identifier(input),
            Some(Token::OpenParen) => self.parse_nested(input),
            other => Err(ParserError::ExpectedExpression(describe(other))),
        }
    }

    /// Folds `lhs` into a left-associative chain of every operator binding at
    /// least as tight as `expr_precedence`.
    fn parse_rhs(
        &self,
        input: &mut Vec<Token>,
        expr_precedence: i32,
        lhs: Expression,
    ) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let (operator, precedence) = match input.last() {
                Some(&Token::Operator(op)) => match self.operator_precedence.get(&op) {
                    Some(&pr) if pr >= expr_precedence => (op, pr),
                    _ => break,
                },
                _ => break,
            };
            input.pop();

            let mut rhs = self.parse_primary(input)?;

            // a tighter operator after rhs takes rhs as its own lhs first
            if precedence < self.token_precedence(input.last()) {
                rhs = self.parse_rhs(input, precedence + 1, rhs)?;
            }

            result = Expression::binary(operator, result, rhs);
        }

        Ok(result)
    }

    pub fn parse_expr(&self, input: &mut Vec<Token>) -> PartialParseResult {
        let lhs = self.parse_primary(input)?;

        let expr = self.parse_rhs(input, 0, lhs)?;
        Ok(expr)
    }

    pub fn parse_prototype(&self, input: &mut Vec<Token>) -> Result<Prototype, ParserError> {
        let name = match input.pop() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(ParserError::UnexpectedToken {
                    expected: "function name",
                    context: "in prototype",
                    found: describe(other.as_ref()),
                })
            }
        };

        self.expect(input, Token::OpenParen, "'('", "in prototype")?;

        let mut params: Vec<String> = Vec::new();
        while let Some(Token::Ident(param)) = input.last() {
            if params.contains(param) {
                return Err(ParserError::DuplicateParameter {
                    name,
                    param: param.clone(),
                });
            }
            params.push(param.clone());
            input.pop();
        }

        self.expect(input, Token::CloseParen, "')'", "in prototype")?;

        trace!("parsed prototype {}({})", name, params.join(" "));
        Ok(Prototype::new(name, params))
    }

    pub fn parse_definition(&self, input: &mut Vec<Token>) -> Result<Function, ParserError> {
        self.expect(input, Token::Def, "'def'", "to start definition")?;
        let prototype = self.parse_prototype(input)?;
        let body = self.parse_expr(input)?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&self, input: &mut Vec<Token>) -> Result<Prototype, ParserError> {
        self.expect(input, Token::Extern, "'extern'", "to start declaration")?;
        self.parse_prototype(input)
    }

    pub fn parse_top_level_expr(&self, input: &mut Vec<Token>) -> Result<Function, ParserError> {
        let body = self.parse_expr(input)?;
        Ok(Function {
            prototype: Prototype::anonymous(),
            body,
        })
    }

    /// Parses a single top-level entity, skipping stray delimiters before it and
    /// consuming one after it. Returns `None` once the input is exhausted.
    pub fn parse_toplevel(&self, input: &mut Vec<Token>) -> Result<Option<ASTNode>, ParserError> {
        while input.last() == Some(&Token::Delimiter) {
            input.pop();
        }

        let node = match input.last() {
            None => return Ok(None),
            Some(Token::Def) => ASTNode::Function(self.parse_definition(input)?),
            Some(Token::Extern) => ASTNode::Extern(self.parse_extern(input)?),
            Some(_) => ASTNode::Function(self.parse_top_level_expr(input)?),
        };

        if input.last() == Some(&Token::Delimiter) {
            input.pop();
        }

        Ok(Some(node))
    }

    pub fn parse(&self, input: &mut Vec<Token>) -> Result<Vec<ASTNode>, ParserError> {
        let mut ast = Vec::new();

        while let Some(node) = self.parse_toplevel(input)? {
            ast.push(node);
        }

        Ok(ast)
    }

    pub fn parse_str(&self, source: &str) -> Result<Vec<ASTNode>, ParserError> {
        let mut tokens = lex(source)?;
        self.parse(&mut tokens)
    }
}
