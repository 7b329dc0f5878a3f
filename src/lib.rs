//! Front end for a small expression language.
//!
//! Source text is lexed into a token stack, parsed into an [`ast`] and lowered
//! by [`codegen::Codegen`] into a register based [`ir::Module`]. The
//! [`driver::Driver`] ties the stages together one top-level entity at a time.

pub mod ast;
pub mod codegen;
pub mod driver;
pub mod ir;
pub mod lexer;
pub mod parser;

use codegen::CodegenError;
use ir::exec::ExecError;
use lexer::LexError;
use parser::ParserError;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("syntax error: {0}")]
    Syntax(#[from] ParserError),
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
    #[error("evaluation error: {0}")]
    Exec(#[from] ExecError),
}
