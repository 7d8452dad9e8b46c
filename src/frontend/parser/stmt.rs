//! Statement parsing

use super::ast::*;
use super::scope::FunctionScope;
use super::state::*;
use super::ParseError;
use crate::frontend::lexer::tokens::*;

/// Names of the hidden loop-state locals; not valid identifiers
const FOR_STATE: [&str; 3] = ["(for index)", "(for limit)", "(for step)"];
const ITER_STATE: [&str; 3] = ["(for generator)", "(for state)", "(for control)"];

impl<'a> ParserState<'a> {
    /// Whether the current token closes a block
    fn block_follows(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::KwEnd
                | TokenKind::KwElse
                | TokenKind::KwElseif
                | TokenKind::KwUntil
                | TokenKind::Eof
        )
    }

    /// Parse statements in a new block scope
    pub fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.in_block(Self::parse_statements)
    }

    /// Parse statements in the current scope up to a block terminator
    fn parse_statements(&mut self) -> Result<Block, ParseError> {
        self.nested(Self::parse_statement_list)
    }

    fn parse_statement_list(&mut self) -> Result<Block, ParseError> {
        let mut block = Vec::new();
        while !self.block_follows() {
            if self.at(&TokenKind::KwReturn) {
                block.push(self.parse_return()?);
                break;
            }
            if let Some(stmt) = self.parse_statement()? {
                block.push(stmt);
            }
        }
        Ok(block)
    }

    /// Parse one statement; `None` for an empty statement
    fn parse_statement(&mut self) -> Result<Option<Stmt>, ParseError> {
        let line = self.line();
        let kind = match self.kind() {
            TokenKind::Semicolon => {
                self.bump();
                return Ok(None);
            }
            TokenKind::KwIf => self.parse_if()?,
            TokenKind::KwWhile => self.parse_while()?,
            TokenKind::KwDo => {
                self.bump();
                let body = self.parse_block()?;
                self.expect_match(&TokenKind::KwEnd, &TokenKind::KwDo, line)?;
                StmtKind::Do(body)
            }
            TokenKind::KwFor => self.parse_for()?,
            TokenKind::KwRepeat => self.parse_repeat()?,
            TokenKind::KwFunction => self.parse_function_stmt()?,
            TokenKind::KwLocal => {
                self.bump();
                if self.skip(&TokenKind::KwFunction) {
                    self.parse_local_function()?
                } else {
                    self.parse_local()?
                }
            }
            TokenKind::KwBreak => {
                self.bump();
                if self.scope().loops == 0 {
                    return Err(ParseError::Invalid {
                        message: "break outside a loop".into(),
                        line,
                    });
                }
                StmtKind::Break
            }
            _ => self.parse_expr_stmt()?,
        };
        Ok(Some(Stmt::new(kind, line)))
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.bump();
        let values = if self.block_follows() || self.at(&TokenKind::Semicolon) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.skip(&TokenKind::Semicolon);
        if !self.block_follows() {
            return Err(ParseError::ExpectedToken {
                expected: "end".into(),
                found: self.kind().to_string(),
                line: self.line(),
            });
        }
        Ok(Stmt::new(StmtKind::Return(values), line))
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.bump();
        let mut branches = Vec::new();
        let cond = self.parse_expression(BP_LOWEST)?;
        self.expect(&TokenKind::KwThen)?;
        branches.push((cond, self.parse_block()?));

        let mut else_block = None;
        loop {
            if self.skip(&TokenKind::KwElseif) {
                let cond = self.parse_expression(BP_LOWEST)?;
                self.expect(&TokenKind::KwThen)?;
                branches.push((cond, self.parse_block()?));
            } else if self.skip(&TokenKind::KwElse) {
                else_block = Some(self.parse_block()?);
                self.expect_match(&TokenKind::KwEnd, &TokenKind::KwIf, line)?;
                break;
            } else {
                self.expect_match(&TokenKind::KwEnd, &TokenKind::KwIf, line)?;
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            else_block,
        })
    }

    /// Loop body with `break` allowed
    fn parse_loop_body(&mut self) -> Result<Block, ParseError> {
        self.scope().loops += 1;
        let body = self.parse_block();
        self.scope().loops -= 1;
        body
    }

    fn parse_while(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.bump();
        let cond = self.parse_expression(BP_LOWEST)?;
        self.expect(&TokenKind::KwDo)?;
        let body = self.parse_loop_body()?;
        self.expect_match(&TokenKind::KwEnd, &TokenKind::KwWhile, line)?;
        Ok(StmtKind::While { cond, body })
    }

    /// `repeat ... until cond`; the condition sees the body's locals
    fn parse_repeat(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.bump();
        self.in_block(|p| {
            p.scope().loops += 1;
            let body = p.parse_statements();
            p.scope().loops -= 1;
            let body = body?;
            p.expect_match(&TokenKind::KwUntil, &TokenKind::KwRepeat, line)?;
            let cond = p.parse_expression(BP_LOWEST)?;
            Ok(StmtKind::Repeat { body, cond })
        })
    }

    /// Run `f` inside a block scope that is closed even on error
    fn in_block<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.scope().enter_block();
        let result = f(self);
        self.scope().leave_block();
        result
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.bump();
        let first = self.expect_name()?;
        match self.kind() {
            TokenKind::Eq => self.parse_numeric_for(first, line),
            TokenKind::Comma | TokenKind::KwIn => self.parse_generic_for(first, line),
            _ => Err(ParseError::ExpectedToken {
                expected: "=' or 'in".into(),
                found: self.kind().to_string(),
                line: self.line(),
            }),
        }
    }

    fn parse_numeric_for(
        &mut self,
        name: String,
        line: u32,
    ) -> Result<StmtKind, ParseError> {
        self.bump();
        let start = self.parse_expression(BP_LOWEST)?;
        self.expect(&TokenKind::Comma)?;
        let limit = self.parse_expression(BP_LOWEST)?;
        let step = if self.skip(&TokenKind::Comma) {
            Some(self.parse_expression(BP_LOWEST)?)
        } else {
            None
        };
        self.expect(&TokenKind::KwDo)?;

        self.in_block(|p| {
            let state = p.declare(FOR_STATE[0])?;
            p.declare(FOR_STATE[1])?;
            p.declare(FOR_STATE[2])?;
            let var = p.declare(name)?;
            let body = p.parse_loop_body()?;
            p.expect_match(&TokenKind::KwEnd, &TokenKind::KwFor, line)?;
            Ok(StmtKind::NumericFor {
                state,
                var,
                start,
                limit,
                step,
                body,
            })
        })
    }

    fn parse_generic_for(
        &mut self,
        first: String,
        line: u32,
    ) -> Result<StmtKind, ParseError> {
        let mut names = vec![first];
        while self.skip(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect(&TokenKind::KwIn)?;
        let exprs = self.parse_expr_list()?;
        self.expect(&TokenKind::KwDo)?;

        self.in_block(|p| {
            let state = p.declare(ITER_STATE[0])?;
            p.declare(ITER_STATE[1])?;
            p.declare(ITER_STATE[2])?;
            let mut vars = Vec::with_capacity(names.len());
            for name in names {
                vars.push(p.declare(name)?);
            }
            let body = p.parse_loop_body()?;
            p.expect_match(&TokenKind::KwEnd, &TokenKind::KwFor, line)?;
            Ok(StmtKind::GenericFor {
                state,
                vars,
                exprs,
                body,
            })
        })
    }

    /// `function a.b.c:m() ... end`
    fn parse_function_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.bump();
        let first = self.expect_name()?;
        let mut full_name = first.clone();
        let mut target = Expr::new(self.resolve(&first)?, line);
        let mut is_method = false;

        loop {
            let key_line = self.line();
            let sep = match self.kind() {
                TokenKind::Dot => '.',
                TokenKind::Colon => ':',
                _ => break,
            };
            self.bump();
            let key = self.expect_name()?;
            full_name.push(sep);
            full_name.push_str(&key);
            let key = Expr::new(ExprKind::Str(key), key_line);
            target = Expr::new(ExprKind::Index(Box::new(target), Box::new(key)), key_line);
            if sep == ':' {
                is_method = true;
                break;
            }
        }

        let body = self.parse_function_body(full_name, is_method, line)?;
        Ok(StmtKind::Assign {
            targets: vec![target],
            values: vec![Expr::new(ExprKind::Function(Box::new(body)), line)],
        })
    }

    /// `local function f() ... end`; `f` is visible inside its own body
    fn parse_local_function(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        let name = self.expect_name()?;
        let local = self.declare(name.clone())?;
        let func = self.parse_function_body(name, false, line)?;
        Ok(StmtKind::LocalFunction {
            local,
            func: Box::new(func),
        })
    }

    /// `local a, b = ...`; the names come into scope after the values
    fn parse_local(&mut self) -> Result<StmtKind, ParseError> {
        let mut names = vec![self.expect_name()?];
        while self.skip(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        let values = if self.skip(&TokenKind::Eq) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            targets.push(self.declare(name)?);
        }
        Ok(StmtKind::Local { targets, values })
    }

    /// Assignment or call statement
    fn parse_expr_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.parse_suffixed()?;
        if !self.at(&TokenKind::Eq) && !self.at(&TokenKind::Comma) {
            return match first.kind {
                ExprKind::Call(..) | ExprKind::Method(..) => Ok(StmtKind::Call(first)),
                _ => Err(ParseError::Invalid {
                    message: format!("syntax error near '{}'", self.kind()),
                    line: self.line(),
                }),
            };
        }

        let mut targets = vec![first];
        while self.skip(&TokenKind::Comma) {
            targets.push(self.parse_suffixed()?);
        }
        for target in &targets {
            if !matches!(
                target.kind,
                ExprKind::Local(_) | ExprKind::Upval(_) | ExprKind::Global(_) | ExprKind::Index(..)
            ) {
                return Err(ParseError::Invalid {
                    message: "syntax error near '='".into(),
                    line: target.line,
                });
            }
        }
        self.expect(&TokenKind::Eq)?;
        let values = self.parse_expr_list()?;
        Ok(StmtKind::Assign { targets, values })
    }

    /// Parameter list and body of a function, after the `function` keyword
    /// and name
    pub(crate) fn parse_function_body(
        &mut self,
        name: String,
        is_method: bool,
        line: u32,
    ) -> Result<FunctionBody, ParseError> {
        self.scopes.push(FunctionScope::new(Some(name), line));
        let result = self.parse_function_inner(is_method, line);
        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| self.invalid("function scope underflow"))?;
        result.map(|body| scope.finish(body))
    }

    fn parse_function_inner(
        &mut self,
        is_method: bool,
        line: u32,
    ) -> Result<Block, ParseError> {
        if is_method {
            let id = self.declare("self")?;
            self.scope().add_param(id);
        }
        self.expect(&TokenKind::LParen)?;
        if !self.at(&TokenKind::RParen) {
            loop {
                if self.at(&TokenKind::DotDotDot) {
                    return Err(self.invalid("varargs are not supported"));
                }
                let param = self.expect_name()?;
                let id = self.declare(param)?;
                self.scope().add_param(id);
                if !self.skip(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_statements()?;
        self.expect_match(&TokenKind::KwEnd, &TokenKind::KwFunction, line)?;
        Ok(body)
    }
}
