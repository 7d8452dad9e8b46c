//! Parser state and token stream management

use super::ast::{ExprKind, LocalId};
use super::scope::FunctionScope;
use super::ParseError;
use crate::frontend::lexer::tokens::*;
use crate::vm::UpvalDesc;

/// Binding power levels for Pratt parser
pub const BP_LOWEST: u8 = 0;
pub const BP_OR: u8 = 10;
pub const BP_AND: u8 = 20;
pub const BP_CMP: u8 = 30;
pub const BP_CONCAT: u8 = 40;
pub const BP_ADD: u8 = 50;
pub const BP_MUL: u8 = 60;
pub const BP_UNARY: u8 = 70;
pub const BP_POW: u8 = 80;

/// Nested blocks and subexpressions allowed in one chunk
pub const MAX_SYNTAX_LEVELS: usize = 200;

/// Parser state: token cursor plus the stack of functions being parsed
#[derive(Debug)]
pub struct ParserState<'a> {
    /// Token stream, always terminated by `Eof`
    tokens: &'a [Token],
    /// Current position in token stream
    pos: usize,
    /// Innermost function last
    pub(super) scopes: Vec<FunctionScope>,
    /// Current nesting of blocks and subexpressions
    depth: usize,
}

impl<'a> ParserState<'a> {
    /// Create a new parser state
    #[inline]
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            scopes: Vec::new(),
            depth: 0,
        }
    }

    /// Get current token kind
    #[inline]
    pub fn kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Peek at the kind of the next token
    #[inline]
    pub fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Line of the current token
    #[inline]
    pub fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(Token::line)
            .unwrap_or(1)
    }

    #[inline]
    pub fn at(
        &self,
        kind: &TokenKind,
    ) -> bool {
        self.kind() == kind
    }

    /// Advance to next token
    #[inline]
    pub fn bump(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    /// Skip a specific token
    #[inline]
    pub fn skip(
        &mut self,
        kind: &TokenKind,
    ) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Expect a specific token
    pub fn expect(
        &mut self,
        kind: &TokenKind,
    ) -> Result<(), ParseError> {
        if self.skip(kind) {
            Ok(())
        } else {
            Err(ParseError::ExpectedToken {
                expected: kind.to_string(),
                found: self.kind().to_string(),
                line: self.line(),
            })
        }
    }

    /// Expect the token closing a construct opened on `open_line`
    pub fn expect_match(
        &mut self,
        kind: &TokenKind,
        opener: &TokenKind,
        open_line: u32,
    ) -> Result<(), ParseError> {
        if open_line == self.line() {
            return self.expect(kind);
        }
        if self.skip(kind) {
            Ok(())
        } else {
            Err(ParseError::Invalid {
                message: format!(
                    "'{}' expected (to close '{}' at line {}) near '{}'",
                    kind,
                    opener,
                    open_line,
                    self.kind()
                ),
                line: self.line(),
            })
        }
    }

    /// Expect an identifier and return its name
    pub fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(ParseError::ExpectedToken {
                expected: "<name>".into(),
                found: self.kind().to_string(),
                line: self.line(),
            }),
        }
    }

    /// Error for a token that cannot appear here
    pub fn unexpected(&self) -> ParseError {
        ParseError::UnexpectedToken {
            found: self.kind().to_string(),
            line: self.line(),
        }
    }

    pub fn invalid(
        &self,
        message: impl Into<String>,
    ) -> ParseError {
        ParseError::Invalid {
            message: message.into(),
            line: self.line(),
        }
    }

    pub fn too_many_levels(&self) -> ParseError {
        self.invalid("chunk has too many syntax levels")
    }

    /// Run `f` one syntax level deeper
    pub fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_SYNTAX_LEVELS {
            return Err(self.too_many_levels());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    pub(super) fn scope(&mut self) -> &mut FunctionScope {
        // The main chunk scope is pushed before any statement is parsed
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Declare a local in the innermost block
    pub fn declare(
        &mut self,
        name: impl Into<String>,
    ) -> Result<LocalId, ParseError> {
        let line = self.line();
        self.scope()
            .declare(name.into())
            .ok_or_else(|| ParseError::Invalid {
                message: "too many local variables".into(),
                line,
            })
    }

    /// Resolve a name to a local, an upvalue or a global
    pub fn resolve(
        &mut self,
        name: &str,
    ) -> Result<ExprKind, ParseError> {
        let depth = self.scopes.len() - 1;
        if let Some(id) = self.scopes[depth].find(name) {
            return Ok(ExprKind::Local(id));
        }
        match self.resolve_upval(depth, name)? {
            Some(idx) => Ok(ExprKind::Upval(idx)),
            None => Ok(ExprKind::Global(name.to_string())),
        }
    }

    fn resolve_upval(
        &mut self,
        depth: usize,
        name: &str,
    ) -> Result<Option<u16>, ParseError> {
        if depth == 0 {
            return Ok(None);
        }
        let parent = depth - 1;
        let desc = match self.scopes[parent].find(name) {
            Some(id) => UpvalDesc::Local(self.scopes[parent].capture(id)),
            None => match self.resolve_upval(parent, name)? {
                Some(idx) => UpvalDesc::Upval(idx),
                None => return Ok(None),
            },
        };
        let idx = self.scopes[depth].upvalue(desc);
        u16::try_from(idx)
            .map(Some)
            .map_err(|_| self.invalid("too many upvalues"))
    }
}
