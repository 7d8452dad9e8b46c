//! Lexer module

pub mod tokens;

use tokens::*;

pub use tokenizer::tokenize;

/// Lexer error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("unexpected symbol '{ch}' at {position}")]
    UnexpectedChar { ch: char, position: String },
    #[error("unfinished string at {position}")]
    UnterminatedString { position: String },
    #[error("unfinished long string at {position}")]
    UnterminatedLongString { position: String },
    #[error("unfinished long comment at {position}")]
    UnterminatedComment { position: String },
    #[error("invalid escape sequence '\\{sequence}' at {position}")]
    InvalidEscape { sequence: String, position: String },
    #[error("malformed number '{text}' at {position}")]
    InvalidNumber { text: String, position: String },
}

impl LexError {
    /// Line the error was raised on
    pub fn line(&self) -> u32 {
        let position = match self {
            LexError::UnexpectedChar { position, .. }
            | LexError::UnterminatedString { position }
            | LexError::UnterminatedLongString { position }
            | LexError::UnterminatedComment { position }
            | LexError::InvalidEscape { position, .. }
            | LexError::InvalidNumber { position, .. } => position,
        };
        position
            .split(':')
            .next()
            .and_then(|l| l.parse().ok())
            .unwrap_or(0)
    }
}

/// Tokenize source code
mod tokenizer {
    use super::*;
    use crate::util::span::{Position, Span};
    use std::iter::Peekable;
    use std::str::Chars;

    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();

        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }

        let end = lexer.position();
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
        });
        Ok(tokens)
    }

    struct Lexer<'a> {
        chars: Peekable<Chars<'a>>,
        offset: usize,
        line: usize,
        column: usize,
        start: Position,
    }

    impl<'a> Lexer<'a> {
        fn new(source: &'a str) -> Self {
            Self {
                chars: source.chars().peekable(),
                offset: 0,
                line: 1,
                column: 1,
                start: Position::with_offset(1, 1, 0),
            }
        }

        fn position(&self) -> Position {
            Position::with_offset(self.line, self.column, self.offset)
        }

        fn span(&self) -> Span {
            Span::new(self.start, self.position())
        }

        fn at(&self) -> String {
            self.start.to_string()
        }

        fn advance(&mut self) -> Option<char> {
            match self.chars.next() {
                Some('\n') => {
                    self.offset += 1;
                    self.line += 1;
                    self.column = 1;
                    Some('\n')
                }
                Some(c) => {
                    self.offset += c.len_utf8();
                    self.column += 1;
                    Some(c)
                }
                None => None,
            }
        }

        fn peek(&mut self) -> Option<char> {
            self.chars.peek().copied()
        }

        fn peek_next(&self) -> Option<char> {
            self.chars.clone().nth(1)
        }

        fn eat(
            &mut self,
            c: char,
        ) -> bool {
            if self.peek() == Some(c) {
                self.advance();
                true
            } else {
                false
            }
        }

        fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
            loop {
                match self.peek() {
                    Some(' ' | '\t' | '\r' | '\n') => {
                        self.advance();
                    }
                    Some('-') if self.peek_next() == Some('-') => {
                        self.start = self.position();
                        self.advance();
                        self.advance();
                        if self.peek() == Some('[') {
                            if let Some(level) = self.long_bracket_level() {
                                self.read_long_bracket(level)
                                    .map_err(|_| LexError::UnterminatedComment { position: self.at() })?;
                                continue;
                            }
                        }
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                    _ => return Ok(()),
                }
            }
        }

        fn next_token(&mut self) -> Result<Option<Token>, LexError> {
            self.skip_whitespace_and_comments()?;

            // 检查是否到达文件末尾
            self.start = self.position();
            let Some(c) = self.advance() else {
                return Ok(None);
            };

            let kind = match c {
                c if is_identifier_start(c) => self.scan_identifier(c),
                c if c.is_ascii_digit() => self.scan_number(c)?,
                '.' if self.peek().is_some_and(|n| n.is_ascii_digit()) => self.scan_number(c)?,
                '"' | '\'' => self.scan_string(c)?,
                '[' => match self.long_bracket_level_after_open() {
                    Some(level) => {
                        let text = self
                            .read_long_bracket(level)
                            .map_err(|_| LexError::UnterminatedLongString { position: self.at() })?;
                        TokenKind::StringLiteral(text)
                    }
                    None => TokenKind::LBracket,
                },
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => {
                    if self.eat('/') {
                        TokenKind::SlashSlash
                    } else {
                        TokenKind::Slash
                    }
                }
                '%' => TokenKind::Percent,
                '^' => TokenKind::Caret,
                '#' => TokenKind::Hash,
                '=' => {
                    if self.eat('=') {
                        TokenKind::EqEq
                    } else {
                        TokenKind::Eq
                    }
                }
                '~' if self.eat('=') => TokenKind::Neq,
                '<' => {
                    if self.eat('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    if self.eat('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                '.' => {
                    if self.eat('.') {
                        if self.eat('.') {
                            TokenKind::DotDotDot
                        } else {
                            TokenKind::DotDot
                        }
                    } else {
                        TokenKind::Dot
                    }
                }
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                c => {
                    return Err(LexError::UnexpectedChar {
                        ch: c,
                        position: self.at(),
                    })
                }
            };
            Ok(Some(Token {
                kind,
                span: self.span(),
            }))
        }

        fn scan_identifier(
            &mut self,
            first_char: char,
        ) -> TokenKind {
            let mut value = String::new();
            value.push(first_char);
            while let Some(c) = self.peek() {
                if !is_identifier_char(c) {
                    break;
                }
                value.push(c);
                self.advance();
            }
            TokenKind::keyword(&value).unwrap_or(TokenKind::Identifier(value))
        }

        fn scan_number(
            &mut self,
            first_char: char,
        ) -> Result<TokenKind, LexError> {
            let mut text = String::new();
            text.push(first_char);

            let hex = first_char == '0' && matches!(self.peek(), Some('x' | 'X'));
            if hex {
                self.advance();
                text.clear();
                while let Some(c) = self.peek() {
                    if !c.is_ascii_hexdigit() {
                        break;
                    }
                    text.push(c);
                    self.advance();
                }
                if text.is_empty() || self.peek().is_some_and(is_identifier_char) {
                    return Err(self.invalid_number(format!("0x{}", text)));
                }
                // 十六进制整数按 64 位回绕
                let value = text
                    .chars()
                    .fold(0i64, |acc, c| acc.wrapping_mul(16).wrapping_add(c.to_digit(16).unwrap_or(0) as i64));
                return Ok(TokenKind::IntLiteral(value));
            }

            let mut is_float = first_char == '.';
            while let Some(c) = self.peek() {
                match c {
                    '0'..='9' => {}
                    '.' if !is_float && self.peek_next() != Some('.') => is_float = true,
                    'e' | 'E' => {
                        is_float = true;
                        text.push(c);
                        self.advance();
                        if let Some(sign @ ('+' | '-')) = self.peek() {
                            text.push(sign);
                            self.advance();
                        }
                        continue;
                    }
                    _ => break,
                }
                text.push(c);
                self.advance();
            }
            if self.peek().is_some_and(is_identifier_char) {
                return Err(self.invalid_number(text));
            }

            if !is_float {
                if let Ok(i) = text.parse::<i64>() {
                    return Ok(TokenKind::IntLiteral(i));
                }
            }
            // 溢出的整数字面量退化为浮点数
            text.parse::<f64>()
                .map(TokenKind::FloatLiteral)
                .map_err(|_| self.invalid_number(text))
        }

        fn invalid_number(
            &self,
            text: String,
        ) -> LexError {
            LexError::InvalidNumber {
                text,
                position: self.at(),
            }
        }

        fn scan_string(
            &mut self,
            quote: char,
        ) -> Result<TokenKind, LexError> {
            let mut value = String::new();
            loop {
                let Some(c) = self.advance() else {
                    return Err(LexError::UnterminatedString { position: self.at() });
                };
                match c {
                    c if c == quote => return Ok(TokenKind::StringLiteral(value)),
                    '\n' => return Err(LexError::UnterminatedString { position: self.at() }),
                    '\\' => self.scan_escape(&mut value)?,
                    c => value.push(c),
                }
            }
        }

        fn scan_escape(
            &mut self,
            value: &mut String,
        ) -> Result<(), LexError> {
            let position = self.position().to_string();
            let Some(escaped) = self.advance() else {
                return Err(LexError::UnterminatedString { position: self.at() });
            };
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                'a' => value.push('\u{7}'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'v' => value.push('\u{b}'),
                '\\' => value.push('\\'),
                '"' => value.push('"'),
                '\'' => value.push('\''),
                '\n' => value.push('\n'),
                'x' => {
                    let mut digits = String::new();
                    for _ in 0..2 {
                        match self.peek() {
                            Some(c) if c.is_ascii_hexdigit() => {
                                digits.push(c);
                                self.advance();
                            }
                            _ => break,
                        }
                    }
                    match u8::from_str_radix(&digits, 16) {
                        Ok(byte) if digits.len() == 2 => value.push(byte as char),
                        _ => {
                            return Err(LexError::InvalidEscape {
                                sequence: format!("x{}", digits),
                                position,
                            })
                        }
                    }
                }
                d if d.is_ascii_digit() => {
                    let mut digits = String::from(d);
                    while digits.len() < 3 {
                        match self.peek() {
                            Some(c) if c.is_ascii_digit() => {
                                digits.push(c);
                                self.advance();
                            }
                            _ => break,
                        }
                    }
                    match digits.parse::<u8>() {
                        Ok(byte) => value.push(byte as char),
                        Err(_) => {
                            return Err(LexError::InvalidEscape {
                                sequence: digits,
                                position,
                            })
                        }
                    }
                }
                c => {
                    return Err(LexError::InvalidEscape {
                        sequence: c.to_string(),
                        position,
                    })
                }
            }
            Ok(())
        }

        /// After a consumed `[`: level of a long bracket `[==[`, consuming it
        fn long_bracket_level_after_open(&mut self) -> Option<usize> {
            let mut ahead = self.chars.clone();
            let mut level = 0;
            loop {
                match ahead.next() {
                    Some('=') => level += 1,
                    Some('[') => break,
                    _ => return None,
                }
            }
            for _ in 0..=level {
                self.advance();
            }
            Some(level)
        }

        /// At a `[`: level of a long bracket, consuming it
        fn long_bracket_level(&mut self) -> Option<usize> {
            let mut ahead = self.chars.clone();
            if ahead.next() != Some('[') {
                return None;
            }
            let mut level = 0;
            loop {
                match ahead.next() {
                    Some('=') => level += 1,
                    Some('[') => break,
                    _ => return None,
                }
            }
            for _ in 0..level + 2 {
                self.advance();
            }
            Some(level)
        }

        /// Body of a long bracket up to its closing `]==]`
        fn read_long_bracket(
            &mut self,
            level: usize,
        ) -> Result<String, ()> {
            // a newline right after the opening bracket is skipped
            if self.peek() == Some('\r') {
                self.advance();
            }
            if self.peek() == Some('\n') {
                self.advance();
            }
            let mut text = String::new();
            loop {
                match self.advance() {
                    None => return Err(()),
                    Some(']') => {
                        let mut ahead = self.chars.clone();
                        let mut eq = 0;
                        while ahead.next() == Some('=') {
                            eq += 1;
                        }
                        let closes = eq == level && self.chars.clone().nth(level) == Some(']');
                        if closes {
                            for _ in 0..=level {
                                self.advance();
                            }
                            return Ok(text);
                        }
                        text.push(']');
                    }
                    Some(c) => text.push(c),
                }
            }
        }
    }

    fn is_identifier_start(c: char) -> bool {
        c == '_' || unicode_ident::is_xid_start(c)
    }

    fn is_identifier_char(c: char) -> bool {
        unicode_ident::is_xid_continue(c)
    }
}

#[cfg(test)]
mod tests;
