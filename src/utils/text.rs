use tracing::debug;

/// Parse a float, falling back to `default` on missing or malformed input.
pub fn parse_f64_or(value: Option<&str>, default: f64) -> f64 {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            debug!(value = v, default, "Failed to parse float, using default");
            default
        }),
        None => default,
    }
}

pub fn parse_u32_or(value: Option<&str>, default: u32) -> u32 {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            debug!(value = v, default, "Failed to parse integer, using default");
            default
        }),
        None => default,
    }
}

/// Trim, collapse internal whitespace runs to one space and lower-case.
pub fn normalize_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Strip one pair of matching surrounding quotes.
pub fn strip_quotes(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

pub fn parse_bool(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_f64_or() {
        assert_eq!(parse_f64_or(Some(" 3.5 "), 0.0), 3.5);
        assert_eq!(parse_f64_or(Some("abc"), 0.0), 0.0);
        assert_eq!(parse_f64_or(Some(""), 1.0), 1.0);
        assert_eq!(parse_f64_or(None, 2.0), 2.0);
    }

    #[test]
    fn test_parse_u32_or() {
        assert_eq!(parse_u32_or(Some("12"), 0), 12);
        assert_eq!(parse_u32_or(Some("-1"), 7), 7);
    }

    #[test]
    fn test_normalize_line() {
        assert_eq!(normalize_line("  Foo(a,   B);\t"), "foo(a, b);");
        assert_eq!(normalize_line("   "), "");
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes(" \"/src/app\" "), "/src/app");
        assert_eq!(strip_quotes("'x'"), "x");
        assert_eq!(strip_quotes("\"unbalanced"), "\"unbalanced");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool(Some("TRUE")));
        assert!(!parse_bool(Some("no")));
        assert!(!parse_bool(None));
    }
}
