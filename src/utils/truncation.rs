const MAX_ERROR_LENGTH: usize = 2_000;

/// Cut an error body to a loggable size on a char boundary.
pub fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LENGTH {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LENGTH;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &error[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_error_untouched() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn test_long_error_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_LENGTH);
        let out = truncate_error(&long);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_ERROR_LENGTH + 3);
    }
}
