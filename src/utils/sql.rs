//! SQL utility functions

/// Escape SQL LIKE metacharacters (%, _, \) in user input
///
/// Use this when building LIKE patterns from user input to prevent
/// unintended pattern matching.
pub fn escape_like_pattern(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Quote an identifier for SQL emission, doubling embedded quotes.
///
/// Column and table names are opaque labels and are quoted on every
/// emission; this is the only way identifiers reach a SQL string.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_no_special_chars() {
        assert_eq!(escape_like_pattern("hello"), "hello");
    }

    #[test]
    fn escape_like_percent_and_underscore() {
        assert_eq!(escape_like_pattern("100%_x"), "100\\%\\_x");
    }

    #[test]
    fn escape_like_backslash() {
        assert_eq!(escape_like_pattern("path\\file"), "path\\\\file");
    }

    #[test]
    fn quote_plain_ident() {
        assert_eq!(quote_ident("month"), "\"month\"");
    }

    #[test]
    fn quote_ident_with_embedded_quote() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn quote_ident_non_ascii() {
        assert_eq!(quote_ident("退货数量"), "\"退货数量\"");
    }
}
