use std::fmt;

use log::debug;

use crate::ast::ASTNode;
use crate::codegen::Codegen;
use crate::ir::{exec::ExecutionEngine, Module};
use crate::lexer::{lex, Token};
use crate::parser::Parser;
use crate::Error;

/// What a successfully handled top-level entity produced.
#[derive(Debug, PartialEq, Clone)]
pub enum Outcome {
    Definition { name: String, ir: String },
    Extern { name: String, ir: String },
    TopLevel {
        name: String,
        ir: String,
        value: Option<f64>,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Definition { ir, .. } => write!(f, "Read function definition:\n{}", ir),
            Outcome::Extern { ir, .. } => write!(f, "Read extern:\n{}", ir),
            Outcome::TopLevel { ir, value, .. } => {
                write!(f, "Read top-level expression:\n{}", ir)?;
                match value {
                    Some(value) => writeln!(f, "Evaluated to {}", value),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Feeds source text through the parser and code generator, one top-level
/// entity at a time, keeping a single module across calls to [`Driver::run`]
/// and [`Driver::feed`].
pub struct Driver {
    parser: Parser,
    codegen: Codegen,
    evaluate: bool,
    /// Tokens of an entity that ran into the end of a fed line, still a stack.
    pending: Vec<Token>,
}

impl Driver {
    pub fn new(parser: Parser, evaluate: bool) -> Self {
        Driver {
            parser,
            codegen: Codegen::new("kaleido"),
            evaluate,
            pending: Vec::new(),
        }
    }

    pub fn module(&self) -> &Module {
        &self.codegen.module
    }

    /// Handles every entity in `source`. A failed entity is reported in place
    /// and does not stop the entities after it.
    pub fn run(&mut self, source: &str) -> Vec<Result<Outcome, Error>> {
        match lex(source) {
            Ok(tokens) => self.process(tokens, false),
            Err(err) => vec![Err(err.into())],
        }
    }

    /// Like [`Driver::run`], but for input that arrives a line at a time. An
    /// entity cut off by the end of `line` is held back and continued by the
    /// next call instead of being reported as a syntax error.
    pub fn feed(&mut self, line: &str) -> Vec<Result<Outcome, Error>> {
        let mut tokens = match lex(line) {
            Ok(tokens) => tokens,
            Err(err) => return vec![Err(err.into())],
        };
        // the held tokens come first, so they sit on top of the stack
        tokens.extend(std::mem::take(&mut self.pending));
        self.process(tokens, true)
    }

    /// Whether an entity is waiting for more input.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Handles whatever [`Driver::feed`] is still holding as if the input
    /// ended here.
    pub fn finish(&mut self) -> Vec<Result<Outcome, Error>> {
        let tokens = std::mem::take(&mut self.pending);
        self.process(tokens, false)
    }

    fn process(&mut self, mut tokens: Vec<Token>, hold_incomplete: bool) -> Vec<Result<Outcome, Error>> {
        let mut outcomes = Vec::new();
        loop {
            while tokens.last() == Some(&Token::Delimiter) {
                tokens.pop();
            }
            let start = tokens.len();
            let snapshot = if hold_incomplete { tokens.clone() } else { Vec::new() };

            let node = match self.parser.parse_toplevel(&mut tokens) {
                Ok(Some(node)) => node,
                Ok(None) => break,
                Err(err) if hold_incomplete && err.is_end_of_input() => {
                    debug!("holding {} tokens for the next line", snapshot.len());
                    self.pending = snapshot;
                    break;
                }
                Err(err) => {
                    let advanced = tokens.len() < start;
                    recover(&mut tokens, advanced);
                    outcomes.push(Err(err.into()));
                    continue;
                }
            };
            outcomes.push(self.handle_node(&node));
        }
        outcomes
    }

    fn handle_node(&mut self, node: &ASTNode) -> Result<Outcome, Error> {
        match node {
            ASTNode::Extern(proto) => {
                let func = self.codegen.compile_proto(proto)?;
                Ok(Outcome::Extern {
                    name: func.name().to_string(),
                    ir: func.to_string(),
                })
            }
            ASTNode::Function(func) if func.prototype.is_anonymous() => {
                let (name, ir) = {
                    let func = self.codegen.compile_fn(func)?;
                    (func.name().to_string(), func.to_string())
                };
                let value = if self.evaluate {
                    let engine = ExecutionEngine::new(&self.codegen.module);
                    Some(engine.run_function(&name, &[])?)
                } else {
                    None
                };
                Ok(Outcome::TopLevel { name, ir, value })
            }
            ASTNode::Function(func) => {
                let func = self.codegen.compile_fn(func)?;
                Ok(Outcome::Definition {
                    name: func.name().to_string(),
                    ir: func.to_string(),
                })
            }
        }
    }
}

/// Skips the rest of a malformed entity, stopping after the next `;` or in
/// front of the next `def`/`extern`. When the parser gave up without taking
/// any tokens the current one is dropped regardless, so the caller always
/// makes progress.
fn recover(tokens: &mut Vec<Token>, parser_advanced: bool) {
    let start = tokens.len();
    while let Some(token) = tokens.last() {
        match token {
            Token::Delimiter => {
                tokens.pop();
                break;
            }
            Token::Def | Token::Extern if parser_advanced || tokens.len() < start => break,
            _ => {
                tokens.pop();
            }
        }
    }
    debug!("skipped {} tokens after syntax error", start - tokens.len());
}
