//! Token types

use std::fmt;

use crate::util::span::Span;

/// Token kind
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwAnd,
    KwBreak,
    KwDo,
    KwElse,
    KwElseif,
    KwEnd,
    KwFalse,
    KwFor,
    KwFunction,
    KwIf,
    KwIn,
    KwLocal,
    KwNil,
    KwNot,
    KwOr,
    KwRepeat,
    KwReturn,
    KwThen,
    KwTrue,
    KwUntil,
    KwWhile,

    // Identifiers
    Identifier(String),

    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Caret,
    Hash,
    EqEq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    DotDot,
    DotDotDot,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,

    // Special
    Eof,
}

impl TokenKind {
    /// Keyword for an identifier, if it is one
    pub fn keyword(s: &str) -> Option<TokenKind> {
        let kind = match s {
            "and" => TokenKind::KwAnd,
            "break" => TokenKind::KwBreak,
            "do" => TokenKind::KwDo,
            "else" => TokenKind::KwElse,
            "elseif" => TokenKind::KwElseif,
            "end" => TokenKind::KwEnd,
            "false" => TokenKind::KwFalse,
            "for" => TokenKind::KwFor,
            "function" => TokenKind::KwFunction,
            "if" => TokenKind::KwIf,
            "in" => TokenKind::KwIn,
            "local" => TokenKind::KwLocal,
            "nil" => TokenKind::KwNil,
            "not" => TokenKind::KwNot,
            "or" => TokenKind::KwOr,
            "repeat" => TokenKind::KwRepeat,
            "return" => TokenKind::KwReturn,
            "then" => TokenKind::KwThen,
            "true" => TokenKind::KwTrue,
            "until" => TokenKind::KwUntil,
            "while" => TokenKind::KwWhile,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    /// Source spelling, used in `near '...'` messages
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            TokenKind::KwAnd => "and",
            TokenKind::KwBreak => "break",
            TokenKind::KwDo => "do",
            TokenKind::KwElse => "else",
            TokenKind::KwElseif => "elseif",
            TokenKind::KwEnd => "end",
            TokenKind::KwFalse => "false",
            TokenKind::KwFor => "for",
            TokenKind::KwFunction => "function",
            TokenKind::KwIf => "if",
            TokenKind::KwIn => "in",
            TokenKind::KwLocal => "local",
            TokenKind::KwNil => "nil",
            TokenKind::KwNot => "not",
            TokenKind::KwOr => "or",
            TokenKind::KwRepeat => "repeat",
            TokenKind::KwReturn => "return",
            TokenKind::KwThen => "then",
            TokenKind::KwTrue => "true",
            TokenKind::KwUntil => "until",
            TokenKind::KwWhile => "while",
            TokenKind::Identifier(name) => return write!(f, "{}", name),
            TokenKind::IntLiteral(i) => return write!(f, "{}", i),
            TokenKind::FloatLiteral(n) => return write!(f, "{}", n),
            TokenKind::StringLiteral(s) => return write!(f, "{}", s),
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::SlashSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Hash => "#",
            TokenKind::EqEq => "==",
            TokenKind::Neq => "~=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Eq => "=",
            TokenKind::DotDot => "..",
            TokenKind::DotDotDot => "...",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Dot => ".",
            TokenKind::Eof => "<eof>",
        };
        write!(f, "{}", s)
    }
}

/// Token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    /// Line the token starts on
    pub fn line(&self) -> u32 {
        self.span.start.line as u32
    }
}
