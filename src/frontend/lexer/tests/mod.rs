//! Lexer 单元测试
//!
//! 测试词法分析器的分词功能

use crate::frontend::lexer::{tokenize, LexError, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[cfg(test)]
mod lexer_basic_tests {
    use super::*;

    #[test]
    fn test_empty_source() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \t\n\r  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("local function foo_1 end"),
            vec![
                TokenKind::KwLocal,
                TokenKind::KwFunction,
                TokenKind::Identifier("foo_1".into()),
                TokenKind::KwEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unicode_identifier() {
        assert_eq!(
            kinds("变量"),
            vec![TokenKind::Identifier("变量".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("== ~= <= >= // .. ... # ^ %"),
            vec![
                TokenKind::EqEq,
                TokenKind::Neq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::SlashSlash,
                TokenKind::DotDot,
                TokenKind::DotDotDot,
                TokenKind::Hash,
                TokenKind::Caret,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let tokens = tokenize("a\n\nb").unwrap();
        assert_eq!(tokens[0].line(), 1);
        assert_eq!(tokens[1].line(), 3);
        assert_eq!(tokens[1].span.start.column, 1);
    }
}

#[cfg(test)]
mod lexer_number_tests {
    use super::*;

    #[test]
    fn test_integers_and_floats() {
        assert_eq!(
            kinds("42 0x1F 3.5 .5 1e3 2E-1"),
            vec![
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(31),
                TokenKind::FloatLiteral(3.5),
                TokenKind::FloatLiteral(0.5),
                TokenKind::FloatLiteral(1000.0),
                TokenKind::FloatLiteral(0.2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_overflow_becomes_float() {
        assert_eq!(
            kinds("9223372036854775808"),
            vec![TokenKind::FloatLiteral(9223372036854775808.0), TokenKind::Eof]
        );
    }

    #[test]
    fn test_concat_after_number() {
        assert_eq!(
            kinds("1..2"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::DotDot,
                TokenKind::IntLiteral(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_malformed_number() {
        assert!(matches!(tokenize("12abc"), Err(LexError::InvalidNumber { .. })));
        assert!(matches!(tokenize("0x"), Err(LexError::InvalidNumber { .. })));
    }
}

#[cfg(test)]
mod lexer_string_tests {
    use super::*;

    #[test]
    fn test_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n\"c\" \65\x41""#),
            vec![TokenKind::StringLiteral("a\tb\n\"c\" AA".into()), TokenKind::Eof]
        );
        assert_eq!(
            kinds("'it''s'"),
            vec![
                TokenKind::StringLiteral("it".into()),
                TokenKind::StringLiteral("s".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_long_strings() {
        assert_eq!(
            kinds("[[\nline1\nline2]]"),
            vec![TokenKind::StringLiteral("line1\nline2".into()), TokenKind::Eof]
        );
        assert_eq!(
            kinds("[==[a]]b]==]"),
            vec![TokenKind::StringLiteral("a]]b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_index_bracket_is_not_long_string() {
        assert_eq!(
            kinds("t[1]"),
            vec![
                TokenKind::Identifier("t".into()),
                TokenKind::LBracket,
                TokenKind::IntLiteral(1),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated() {
        assert!(matches!(tokenize("\"abc"), Err(LexError::UnterminatedString { .. })));
        assert!(matches!(tokenize("\"ab\ncd\""), Err(LexError::UnterminatedString { .. })));
        assert!(matches!(tokenize("[[abc"), Err(LexError::UnterminatedLongString { .. })));
        assert!(matches!(tokenize("\"\\q\""), Err(LexError::InvalidEscape { .. })));
    }
}

#[cfg(test)]
mod lexer_comment_tests {
    use super::*;

    #[test]
    fn test_line_and_block_comments() {
        assert_eq!(
            kinds("a -- comment\n--[[ block\n comment ]] b --[==[ x ]==]"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Identifier("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(matches!(tokenize("--[[ never closed"), Err(LexError::UnterminatedComment { .. })));
    }

    #[test]
    fn test_error_line() {
        let err = tokenize("a\nb\n  @").unwrap_err();
        assert_eq!(err.line(), 3);
        assert_eq!(err.to_string(), "unexpected symbol '@' at 3:3");
    }
}

#[cfg(test)]
mod lexer_property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decimal_integers_lex_exactly(n in 0..=i64::MAX) {
            prop_assert_eq!(kinds(&n.to_string()), vec![TokenKind::IntLiteral(n), TokenKind::Eof]);
        }

        #[test]
        fn hex_integers_lex_exactly(n in 0..=i64::MAX) {
            prop_assert_eq!(kinds(&format!("0x{:x}", n)), vec![TokenKind::IntLiteral(n), TokenKind::Eof]);
        }

        #[test]
        fn plain_strings_keep_their_text(text in "[a-zA-Z0-9 _.,:;!?-]{0,40}") {
            prop_assert_eq!(
                kinds(&format!("'{}'", text)),
                vec![TokenKind::StringLiteral(text.clone()), TokenKind::Eof]
            );
        }

        #[test]
        fn lexing_never_panics(source in "\\PC{0,64}") {
            let _ = tokenize(&source);
        }
    }
}
