//! Frontend compilation pipeline
//!
//! This module contains the lexer, parser, and bytecode compiler.
//! The frontend transforms EEPROM source code into a [`Program`].

use thiserror::Error;
use tracing::debug;

use crate::vm::Program;

pub mod compiler;
pub mod lexer;
pub mod parser;

pub use lexer::LexError;
pub use parser::ParseError;

/// Compile source code to bytecode
pub fn compile(source: &str) -> Result<Program, CompileError> {
    debug!("Compiling source code ({} bytes)", source.len());
    // Lexical analysis
    let tokens = lexer::tokenize(source)?;
    debug!("Tokenized into {} tokens", tokens.len());

    // Parsing
    let main = parser::parse(&tokens)?;
    debug!("Parsing successful, got {} statements", main.body.len());

    // Code generation
    let program = compiler::compile_program(&main)?;
    debug!("Generated {} prototypes", program.protos.len());

    Ok(program)
}

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("EEPROM:{line}: {0}", line = .0.line())]
    Lex(#[from] LexError),

    #[error("EEPROM:{line}: {0}", line = .0.line())]
    Parse(#[from] ParseError),

    #[error("EEPROM:{line}: {message}")]
    Codegen { line: u32, message: String },
}

impl CompileError {
    /// Source line the error points at
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Lex(e) => e.line(),
            CompileError::Parse(e) => e.line(),
            CompileError::Codegen { line, .. } => *line,
        }
    }
}
