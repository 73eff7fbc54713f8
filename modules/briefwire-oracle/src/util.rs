/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code blocks from a model response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundary() {
        let text = "сводка новостей";
        let truncated = truncate_to_char_boundary(text, 9);
        assert!(truncated.len() <= 9);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn truncate_noop_within_bounds() {
        assert_eq!(truncate_to_char_boundary("short", 100), "short");
    }

    #[test]
    fn strips_fenced_json() {
        assert_eq!(strip_code_blocks("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("[]"), "[]");
    }
}
