//! Score math shared across the pipeline: clamping, cosine similarity,
//! language-aware length floors, domain list parsing.

/// Clamp a score to the canonical [0, 1] range.
pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Cosine similarity between two embeddings.
/// Zero-length or mismatched vectors yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Character floor below which a message is too short to summarize,
/// unless it carries a link or a media preview.
///
/// Cyrillic-script languages pack more information per character, so they
/// get a lower floor than Latin-script ones.
pub fn min_chars_for_language(language: Option<&str>) -> usize {
    match language {
        Some("ru") | Some("uk") | Some("be") | Some("bg") | Some("sr") => 60,
        _ => 100,
    }
}

/// Parse a comma- or whitespace-separated domain list into normalized
/// domains: lowercased, scheme and leading `www.` stripped.
pub fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(normalize_domain)
        .filter(|d| !d.is_empty())
        .collect()
}

/// Normalize a single domain or URL down to its bare host.
pub fn normalize_domain(raw: &str) -> String {
    let d = raw.trim().to_lowercase();
    let d = d
        .strip_prefix("https://")
        .or_else(|| d.strip_prefix("http://"))
        .unwrap_or(&d);
    let d = d.strip_prefix("www.").unwrap_or(d);
    d.split('/').next().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp01_passes_in_range() {
        assert_eq!(clamp01(0.5), 0.5);
    }

    #[test]
    fn clamp01_clamps_both_ends() {
        assert_eq!(clamp01(-0.2), 0.0);
        assert_eq!(clamp01(1.7), 1.0);
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![0.5f32, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_empty_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn min_chars_cyrillic_lower_than_latin() {
        assert!(min_chars_for_language(Some("ru")) < min_chars_for_language(Some("en")));
        assert_eq!(min_chars_for_language(None), min_chars_for_language(Some("en")));
    }

    #[test]
    fn domain_list_parses_commas_and_whitespace() {
        let parsed = parse_domain_list("Example.com, https://www.news.org/path\n spam.net");
        assert_eq!(parsed, vec!["example.com", "news.org", "spam.net"]);
    }

    #[test]
    fn domain_list_empty_input() {
        assert!(parse_domain_list("  , ").is_empty());
    }
}
