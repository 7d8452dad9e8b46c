//! Span 单元测试
//!
//! 程序位置、区间与错误信息中的行号定位

use crate::util::span::{Position, SourceFile, Span};

#[cfg(test)]
mod span_tests {
    use super::*;

    #[test]
    fn test_single_line_span() {
        let span = Span::new(Position::with_offset(1, 1, 4), Position::with_offset(1, 5, 8));
        assert_eq!(span.len(), 4);
        assert!(!span.is_empty());
        assert_eq!(span.to_string(), "1:1-5");
    }

    #[test]
    fn test_multi_line_span_and_point() {
        let span = Span::new(Position::with_offset(2, 3, 10), Position::with_offset(4, 1, 30));
        assert_eq!(span.to_string(), "2:3-4:1");
        assert!(Span::point(Position::with_offset(9, 9, 99)).is_empty());
    }
}

#[cfg(test)]
mod source_file_tests {
    use super::*;

    #[test]
    fn test_line_text() {
        let file = SourceFile::new("eeprom".into(), "local a = 1\r\nprint(a)\n".into());
        assert_eq!(file.line_count(), 3);
        assert_eq!(file.line_text(1), Some("local a = 1"));
        assert_eq!(file.line_text(2), Some("print(a)"));
        assert_eq!(file.line_text(3), Some(""));
        assert_eq!(file.line_text(0), None);
        assert_eq!(file.line_text(4), None);
    }

    #[test]
    fn test_source_text() {
        let file = SourceFile::new("eeprom".into(), "return 42".into());
        let span = Span::new(Position::with_offset(1, 8, 7), Position::with_offset(1, 10, 9));
        assert_eq!(file.source_text(span), Some("42"));
    }

    #[test]
    fn test_line_of_message() {
        let file = SourceFile::new("boot.lua".into(), "x = 1\nerror('boom')\n".into());
        assert_eq!(
            file.line_of_message("EEPROM", "EEPROM:2: boom\nstack traceback:"),
            Some((2, "error('boom')"))
        );
        assert_eq!(file.line_of_message("EEPROM", "not enough memory"), None);
        assert_eq!(file.line_of_message("EEPROM", "EEPROM:40: far away"), None);
    }
}
