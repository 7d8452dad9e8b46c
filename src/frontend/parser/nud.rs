//! Prefix expression parsing (nud - null denotation)

use super::ast::*;
use super::state::*;
use super::ParseError;
use crate::frontend::lexer::tokens::*;
use crate::vm::UnOp;

type PrefixFn<'a> = fn(&mut ParserState<'a>) -> Result<Expr, ParseError>;

impl<'a> ParserState<'a> {
    /// Get prefix parser for current token
    #[inline]
    pub(crate) fn prefix_info(&self) -> Option<PrefixFn<'a>> {
        match self.kind() {
            TokenKind::Minus | TokenKind::KwNot | TokenKind::Hash => Some(Self::parse_unary),
            TokenKind::KwNil
            | TokenKind::KwTrue
            | TokenKind::KwFalse
            | TokenKind::IntLiteral(_)
            | TokenKind::FloatLiteral(_)
            | TokenKind::StringLiteral(_) => Some(Self::parse_literal),
            TokenKind::LBrace => Some(Self::parse_table),
            TokenKind::KwFunction => Some(Self::parse_function_literal),
            TokenKind::DotDotDot => Some(Self::parse_varargs),
            TokenKind::Identifier(_) | TokenKind::LParen => Some(Self::parse_suffixed),
            _ => None,
        }
    }

    /// Parse unary operator expression
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let op = match self.kind() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::KwNot => UnOp::Not,
            _ => UnOp::Len,
        };
        self.bump();

        let operand = self.parse_expression(BP_UNARY)?;
        let operand_line = operand.line;
        // 常量折叠负号
        let kind = match (op, operand.into_kind()) {
            (UnOp::Neg, ExprKind::Int(i)) => ExprKind::Int(i.wrapping_neg()),
            (UnOp::Neg, ExprKind::Float(f)) => ExprKind::Float(-f),
            (op, kind) => ExprKind::Unary(op, Box::new(Expr::new(kind, operand_line))),
        };
        Ok(Expr::new(kind, line))
    }

    fn parse_literal(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let kind = match self.kind() {
            TokenKind::KwNil => ExprKind::Nil,
            TokenKind::KwTrue => ExprKind::True,
            TokenKind::KwFalse => ExprKind::False,
            TokenKind::IntLiteral(i) => ExprKind::Int(*i),
            TokenKind::FloatLiteral(f) => ExprKind::Float(*f),
            TokenKind::StringLiteral(s) => ExprKind::Str(s.clone()),
            _ => return Err(self.unexpected()),
        };
        self.bump();
        Ok(Expr::new(kind, line))
    }

    fn parse_varargs(&mut self) -> Result<Expr, ParseError> {
        Err(self.invalid("varargs are not supported"))
    }

    /// `function (params) body end` used as a value
    fn parse_function_literal(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        self.bump();
        let body = self.parse_function_body(format!("<EEPROM:{}>", line), false, line)?;
        Ok(Expr::new(ExprKind::Function(Box::new(body)), line))
    }

    /// Table constructor
    pub(crate) fn parse_table(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        self.expect(&TokenKind::LBrace)?;
        let mut items = Vec::new();

        while !self.at(&TokenKind::RBrace) {
            let item = match self.kind() {
                TokenKind::LBracket => {
                    self.bump();
                    let key = self.parse_expression(BP_LOWEST)?;
                    self.expect(&TokenKind::RBracket)?;
                    self.expect(&TokenKind::Eq)?;
                    TableItem::Keyed(key, self.parse_expression(BP_LOWEST)?)
                }
                TokenKind::Identifier(name) if self.peek_kind() == &TokenKind::Eq => {
                    let key = Expr::new(ExprKind::Str(name.clone()), self.line());
                    self.bump();
                    self.bump();
                    TableItem::Keyed(key, self.parse_expression(BP_LOWEST)?)
                }
                _ => TableItem::Positional(self.parse_expression(BP_LOWEST)?),
            };
            items.push(item);

            if !self.skip(&TokenKind::Comma) && !self.skip(&TokenKind::Semicolon) {
                break;
            }
        }
        self.expect_match(&TokenKind::RBrace, &TokenKind::LBrace, line)?;
        Ok(Expr::new(ExprKind::Table(items), line))
    }

    /// Name or parenthesized expression
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.kind() {
            TokenKind::Identifier(_) => {
                let name = self.expect_name()?;
                Ok(Expr::new(self.resolve(&name)?, line))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression(BP_LOWEST)?;
                self.expect_match(&TokenKind::RParen, &TokenKind::LParen, line)?;
                Ok(Expr::new(ExprKind::Paren(Box::new(inner)), line))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Primary expression followed by field, index and call suffixes
    pub(crate) fn parse_suffixed(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        let mut steps = 0;
        loop {
            let line = self.line();
            steps += 1;
            if steps > MAX_SYNTAX_LEVELS {
                return Err(self.too_many_levels());
            }
            expr = match self.kind() {
                TokenKind::Dot => {
                    self.bump();
                    let key = Expr::new(ExprKind::Str(self.expect_name()?), line);
                    Expr::new(ExprKind::Index(Box::new(expr), Box::new(key)), line)
                }
                TokenKind::LBracket => {
                    self.bump();
                    let key = self.parse_expression(BP_LOWEST)?;
                    self.expect(&TokenKind::RBracket)?;
                    Expr::new(ExprKind::Index(Box::new(expr), Box::new(key)), line)
                }
                TokenKind::Colon => {
                    self.bump();
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    Expr::new(ExprKind::Method(Box::new(expr), method, args), line)
                }
                TokenKind::LParen | TokenKind::StringLiteral(_) | TokenKind::LBrace => {
                    let args = self.parse_call_args()?;
                    Expr::new(ExprKind::Call(Box::new(expr), args), line)
                }
                _ => return Ok(expr),
            };
        }
    }

    /// `(args)`, a single string literal or a single table constructor
    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let line = self.line();
        match self.kind() {
            TokenKind::StringLiteral(s) => {
                let arg = Expr::new(ExprKind::Str(s.clone()), line);
                self.bump();
                Ok(vec![arg])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table()?]),
            TokenKind::LParen => {
                self.bump();
                let args = if self.at(&TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect_match(&TokenKind::RParen, &TokenKind::LParen, line)?;
                Ok(args)
            }
            _ => Err(ParseError::ExpectedToken {
                expected: "function arguments".into(),
                found: self.kind().to_string(),
                line,
            }),
        }
    }
}
