use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Def,
    Extern,
    Delimiter,
    OpenParen,
    CloseParen,
    Comma,
    Ident(String),
    Operator(char),
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Delimiter => write!(f, "';'"),
            Token::OpenParen => write!(f, "'('"),
            Token::CloseParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Ident(ident) => write!(f, "identifier '{}'", ident),
            Token::Operator(op) => write!(f, "'{}'", op),
            Token::Number(num) => write!(f, "number {}", num),
        }
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum LexError {
    #[error("invalid number literal {0}")]
    InvalidNumber(String),
}

lazy_static! {
    static ref IGNORE_RE: Regex = Regex::new(r"(?m)#.*$").unwrap();
    static ref TOKEN_RE: Regex = Regex::new(&[
        r"(?P<ident>[[:alpha:]][[:alnum:]]*)",
        r"(?P<number>[0-9.]+)",
        r"(?P<delimiter>;)",
        r"(?P<oppar>\()",
        r"(?P<clpar>\))",
        r"(?P<comma>,)",
        r"(?P<operator>\S)"
    ].join("|"))
    .unwrap();
}

fn preprocess(input: &str) -> String {
    IGNORE_RE.replace_all(input, "").to_string()
}

/// Reads the longest numeric prefix of a run of digits and dots, the way
/// `strtod` would: everything from a second `.` on is ignored, and a run with
/// no digits before that point reads as zero.
fn parse_number(run: &str) -> Result<f64, LexError> {
    let end = run.match_indices('.').nth(1).map_or(run.len(), |(idx, _)| idx);
    let prefix = &run[..end];
    if !prefix.chars().any(|c| c.is_ascii_digit()) {
        return Ok(0.0);
    }
    prefix
        .parse()
        .map_err(|_| LexError::InvalidNumber(run.to_string()))
}

/// lex the given input string - returns a stack, so first-on last-off
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let preprocessed = preprocess(input);

    let mut res = Vec::new();
    for cap in TOKEN_RE.captures_iter(&preprocessed) {
        let token = if let Some(ident) = cap.name("ident") {
            match ident.as_str() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                other => Token::Ident(other.to_string()),
            }
        } else if let Some(inner) = cap.name("number") {
            Token::Number(parse_number(inner.as_str())?)
        } else if cap.name("delimiter").is_some() {
            Token::Delimiter
        } else if cap.name("oppar").is_some() {
            Token::OpenParen
        } else if cap.name("clpar").is_some() {
            Token::CloseParen
        } else if cap.name("comma").is_some() {
            Token::Comma
        } else {
            // the operator group matches any other single non-space character
            let op = cap
                .name("operator")
                .and_then(|op| op.as_str().chars().next())
                .unwrap_or('?');
            Token::Operator(op)
        };

        res.push(token);
    }
    res.reverse();
    Ok(res)
}
