//! Parser module
//!
//! This module implements a Pratt Parser for the EEPROM dialect.
//! The parser transforms tokens into an Abstract Syntax Tree (AST) with
//! every name already resolved to a local slot, an upvalue or a global.

pub mod ast;
mod led;
mod nud;
mod scope;
mod state;
mod stmt;

pub use state::{ParserState, BP_LOWEST};

use crate::frontend::lexer::tokens::*;
use ast::*;
use scope::FunctionScope;

/// Parse tokens into the main chunk
///
/// # Arguments
/// * `tokens` - Token stream from the lexer
///
/// # Returns
/// The main chunk as a parameterless function, or the first parse error
///
/// # Example
/// ```lua
/// local n = 0
/// while true do
///     n = n + 1
///     computer.skip()
/// end
/// ```
pub fn parse(tokens: &[Token]) -> Result<FunctionBody, ParseError> {
    let mut state = ParserState::new(tokens);
    state.scopes.push(FunctionScope::new(None, 0));

    let body = state.parse_block()?;
    if !state.at(&TokenKind::Eof) {
        return Err(ParseError::ExpectedToken {
            expected: "<eof>".into(),
            found: state.kind().to_string(),
            line: state.line(),
        });
    }

    let scope = state
        .scopes
        .pop()
        .ok_or_else(|| state.invalid("function scope underflow"))?;
    Ok(scope.finish(body))
}

/// Parse error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected symbol near '{found}'")]
    UnexpectedToken { found: String, line: u32 },

    #[error("'{expected}' expected near '{found}'")]
    ExpectedToken {
        expected: String,
        found: String,
        line: u32,
    },

    #[error("{message}")]
    Invalid { message: String, line: u32 },
}

impl ParseError {
    /// Line the error was raised on
    pub fn line(&self) -> u32 {
        match self {
            ParseError::UnexpectedToken { line, .. }
            | ParseError::ExpectedToken { line, .. }
            | ParseError::Invalid { line, .. } => *line,
        }
    }
}
