//! This module handles conversion between iCal files and [`Todo`](crate::todo::Todo) property bags
//!
//! It is a wrapper around different Rust third-party libraries, since I haven't find any complete library that is able to parse _and_ generate iCal files

mod parser;
pub use parser::parse;
mod builder;
pub use builder::{build_from, format_date_time};

/// Escape a TEXT value (RFC 5545 section 3.3.11)
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.replace("\r\n", "\n").chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Undo [`escape_text`]
pub fn unescape_text(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => unescaped.push('\n'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_escaping() {
        let text = "Buy milk, eggs; and\nsome \\ bread";
        let escaped = escape_text(text);
        assert_eq!(escaped, "Buy milk\\, eggs\\; and\\nsome \\\\ bread");
        assert_eq!(unescape_text(&escaped), text);
        assert_eq!(unescape_text("trailing\\"), "trailing\\");
    }
}
