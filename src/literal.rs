use regex::Regex;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

/// Source-literal form inferred from a raw input token.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(String),
    Float(String),
    Bool(bool),
    Char(char),
    Str(String),
    None,
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(v) | Literal::Float(v) => write!(f, "{}", v),
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Char(c) => write!(f, "{}", quote_char(*c)),
            Literal::Str(s) => write!(f, "{}", quote_str(s)),
            Literal::None => write!(f, "None"),
        }
    }
}

fn int_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[+-]?\d+$").expect("valid int regex"))
}

fn float_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid float regex")
    })
}

pub fn infer_literal(raw: &str) -> Literal {
    let token = raw.trim();
    if token.is_empty() {
        return Literal::None;
    }
    if int_pattern().is_match(token) {
        return Literal::Int(normalize_int(token));
    }
    if float_pattern().is_match(token) {
        return Literal::Float(normalize_float(token));
    }
    if token.eq_ignore_ascii_case("true") {
        return Literal::Bool(true);
    }
    if token.eq_ignore_ascii_case("false") {
        return Literal::Bool(false);
    }
    if let Some(inner) = strip_quotes(token) {
        return Literal::Str(inner.to_string());
    }
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Literal::Char(c);
    }
    Literal::Str(token.to_string())
}

fn normalize_int(token: &str) -> String {
    let (sign, digits) = match token.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", token.trim_start_matches('+')),
    };
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        format!("{}{}", sign, trimmed)
    }
}

fn normalize_float(token: &str) -> String {
    let token = token.trim_start_matches('+');
    let (sign, body) = match token.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", token),
    };
    let body = if body.starts_with('.') {
        format!("0{}", body)
    } else {
        body.to_string()
    };
    let body = match body.split_once(['e', 'E']) {
        Some((mantissa, exponent)) if mantissa.ends_with('.') => format!("{}0e{}", mantissa, exponent),
        Some((mantissa, exponent)) => format!("{}e{}", mantissa, exponent),
        None if body.ends_with('.') => format!("{}0", body),
        None => body,
    };
    format!("{}{}", sign, body)
}

/// A token the learner already wrapped in matching quotes.
fn strip_quotes(token: &str) -> Option<&str> {
    if token.len() < 2 {
        return None;
    }
    for quote in ['"', '\''] {
        if token.starts_with(quote) && token.ends_with(quote) {
            return Some(&token[1..token.len() - 1]);
        }
    }
    None
}

pub fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            _ => push_escaped(&mut out, c),
        }
    }
    out.push('"');
    out
}

fn quote_char(c: char) -> String {
    let mut out = String::from("'");
    match c {
        '\'' => out.push_str("\\'"),
        _ => push_escaped(&mut out, c),
    }
    out.push('\'');
    out
}

/// Escapes backslashes and control characters; everything else is written as-is.
fn push_escaped(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
        c => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(raw: &str) -> String {
        infer_literal(raw).to_string()
    }

    #[test]
    fn documented_forms() {
        assert_eq!(render("5"), "5");
        assert_eq!(render("3.14"), "3.14");
        assert_eq!(render("true"), "True");
        assert_eq!(render("a"), "'a'");
        assert_eq!(render("hello"), "\"hello\"");
    }

    #[test]
    fn booleans_ignore_case() {
        assert_eq!(infer_literal("FALSE"), Literal::Bool(false));
        assert_eq!(infer_literal("True"), Literal::Bool(true));
    }

    #[test]
    fn empty_is_none() {
        assert_eq!(infer_literal(""), Literal::None);
        assert_eq!(infer_literal("   "), Literal::None);
        assert_eq!(render(""), "None");
    }

    #[test]
    fn numbers_are_normalized() {
        assert_eq!(render("007"), "7");
        assert_eq!(render("-0"), "0");
        assert_eq!(render("+12"), "12");
        assert_eq!(render(".5"), "0.5");
        assert_eq!(render("2."), "2.0");
        assert_eq!(render("-1.5e3"), "-1.5e3");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(render("Hello!"), "\"Hello!\"");
        assert_eq!(render("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(render("'"), "'\\''");
        assert_eq!(render("\"already quoted\""), "\"already quoted\"");
    }

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(quote_str("a\r\nb"), "\"a\\r\\nb\"");
        assert_eq!(quote_str("col\tcol"), "\"col\\tcol\"");
        assert_eq!(quote_str("bell\u{7}"), "\"bell\\x07\"");
        assert_eq!(quote_str("nel\u{85}"), "\"nel\\x85\"");
        assert_eq!(render("\u{1b}"), "'\\x1b'");
        assert_eq!(render("a\rb"), "\"a\\rb\"");
    }

    #[test]
    fn single_multibyte_char_is_a_char() {
        assert_eq!(infer_literal("é"), Literal::Char('é'));
    }
}
