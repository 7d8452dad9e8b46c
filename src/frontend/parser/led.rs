//! Infix expression parsing (led - left denotation)

use super::ast::*;
use super::state::*;
use super::ParseError;
use crate::frontend::lexer::tokens::*;
use crate::vm::BinOp;

/// How an infix token combines its operands
#[derive(Debug, Clone, Copy)]
enum Infix {
    Binary(BinOp),
    And,
    Or,
}

impl<'a> ParserState<'a> {
    /// Get infix binding powers (left, right) and operator for current token
    #[inline]
    fn infix_info(&self) -> Option<(u8, u8, Infix)> {
        let info = match self.kind() {
            TokenKind::KwOr => (BP_OR, BP_OR, Infix::Or),
            TokenKind::KwAnd => (BP_AND, BP_AND, Infix::And),
            TokenKind::EqEq => (BP_CMP, BP_CMP, Infix::Binary(BinOp::Eq)),
            TokenKind::Neq => (BP_CMP, BP_CMP, Infix::Binary(BinOp::Ne)),
            TokenKind::Lt => (BP_CMP, BP_CMP, Infix::Binary(BinOp::Lt)),
            TokenKind::Le => (BP_CMP, BP_CMP, Infix::Binary(BinOp::Le)),
            TokenKind::Gt => (BP_CMP, BP_CMP, Infix::Binary(BinOp::Gt)),
            TokenKind::Ge => (BP_CMP, BP_CMP, Infix::Binary(BinOp::Ge)),
            // right associative
            TokenKind::DotDot => (BP_CONCAT, BP_CONCAT - 1, Infix::Binary(BinOp::Concat)),
            TokenKind::Plus => (BP_ADD, BP_ADD, Infix::Binary(BinOp::Add)),
            TokenKind::Minus => (BP_ADD, BP_ADD, Infix::Binary(BinOp::Sub)),
            TokenKind::Star => (BP_MUL, BP_MUL, Infix::Binary(BinOp::Mul)),
            TokenKind::Slash => (BP_MUL, BP_MUL, Infix::Binary(BinOp::Div)),
            TokenKind::SlashSlash => (BP_MUL, BP_MUL, Infix::Binary(BinOp::IDiv)),
            TokenKind::Percent => (BP_MUL, BP_MUL, Infix::Binary(BinOp::Mod)),
            // right associative, binds tighter than unary on its left
            TokenKind::Caret => (BP_POW, BP_POW - 1, Infix::Binary(BinOp::Pow)),
            _ => return None,
        };
        Some(info)
    }

    /// Parse an expression whose operators bind tighter than `min_bp`
    pub fn parse_expression(
        &mut self,
        min_bp: u8,
    ) -> Result<Expr, ParseError> {
        self.nested(|p| p.parse_expression_at(min_bp))
    }

    fn parse_expression_at(
        &mut self,
        min_bp: u8,
    ) -> Result<Expr, ParseError> {
        let prefix = self.prefix_info().ok_or_else(|| self.unexpected())?;
        let mut lhs = prefix(self)?;

        while let Some((left_bp, right_bp, infix)) = self.infix_info() {
            if left_bp <= min_bp {
                break;
            }
            let line = self.line();
            self.bump();
            let rhs = self.parse_expression(right_bp)?;
            let kind = match infix {
                Infix::Binary(op) => ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                Infix::And => ExprKind::And(Box::new(lhs), Box::new(rhs)),
                Infix::Or => ExprKind::Or(Box::new(lhs), Box::new(rhs)),
            };
            lhs = Expr::new(kind, line);
        }
        Ok(lhs)
    }

    /// Comma separated expressions, at least one
    pub fn parse_expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.parse_expression(BP_LOWEST)?];
        while self.skip(&TokenKind::Comma) {
            exprs.push(self.parse_expression(BP_LOWEST)?);
        }
        Ok(exprs)
    }
}
