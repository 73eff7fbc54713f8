//! Prompt construction and response parsing for oracle tasks.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use briefwire_common::{BatchResult, BulletInput, ExtractedBullet, OracleMessage};

use crate::util::{strip_code_blocks, truncate_to_char_boundary};

/// Per-message text budget inside a batch prompt.
const MESSAGE_BUDGET_BYTES: usize = 4000;
const CONTEXT_BUDGET_BYTES: usize = 600;
const LINK_BUDGET_BYTES: usize = 800;

pub(crate) const BATCH_SYSTEM: &str = "\
You are a news analyst preparing a channel digest. For every numbered \
message, produce a JSON object with: index (number, matching the input), \
relevance (0..1), importance (0..1), topic (short category), summary \
(1-2 factual sentences in the digest language), language (two-letter code \
of the original message), source_channel (string or null). Respond with a \
JSON array only, one object per message, in input order.";

pub(crate) fn batch_prompt(
    messages: &[OracleMessage],
    digest_language: &str,
    tone: &str,
) -> String {
    let mut prompt = format!("Digest language: {digest_language}\nTone: {tone}\n\n");
    for (i, msg) in messages.iter().enumerate() {
        prompt.push_str(&format!("### Message {i} (channel: {})\n", msg.channel_name));
        prompt.push_str(truncate_to_char_boundary(&msg.text, MESSAGE_BUDGET_BYTES));
        prompt.push('\n');
        if !msg.context.is_empty() {
            prompt.push_str("Recent channel context:\n");
            for ctx in &msg.context {
                prompt.push_str("- ");
                prompt.push_str(truncate_to_char_boundary(ctx, CONTEXT_BUDGET_BYTES));
                prompt.push('\n');
            }
        }
        for excerpt in &msg.link_excerpts {
            prompt.push_str("Linked page excerpt: ");
            prompt.push_str(truncate_to_char_boundary(excerpt, LINK_BUDGET_BYTES));
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt
}

pub(crate) fn parse_batch_response(raw: &str, submitted: usize) -> Result<Vec<BatchResult>> {
    let cleaned = strip_code_blocks(raw);
    let mut results: Vec<BatchResult> =
        serde_json::from_str(cleaned).map_err(|e| anyhow!("Invalid batch response: {e}"))?;
    for (position, result) in results.iter_mut().enumerate() {
        // Some models echo 1-based or garbage indexes; trust position.
        result.index = position;
        result.relevance = result.relevance.clamp(0.0, 1.0);
        result.importance = result.importance.clamp(0.0, 1.0);
    }
    results.truncate(submitted);
    Ok(results)
}

pub(crate) fn translate_system(target_lang: &str) -> String {
    format!(
        "Translate the user's text into the language with code '{target_lang}'. \
         Preserve names, numbers, and dates exactly. Respond with the \
         translation only."
    )
}

pub(crate) const BULLETS_SYSTEM: &str = "\
Extract the distinct facts from the message as short bullets. Each bullet \
is one self-contained statement. Respond with a JSON array of objects: \
text (string), topic (string or null), relevance (0..1), importance (0..1).";

pub(crate) fn bullets_prompt(input: &BulletInput, digest_language: &str) -> String {
    let mut prompt = format!("Bullet language: {digest_language}\n\nMessage:\n{}\n", input.text);
    if let Some(preview) = &input.preview {
        prompt.push_str(&format!("\nLink preview:\n{preview}\n"));
    }
    prompt.push_str(&format!("\nExisting summary:\n{}\n", input.summary));
    prompt
}

pub(crate) fn parse_bullets_response(raw: &str) -> Result<Vec<ExtractedBullet>> {
    #[derive(Deserialize)]
    struct Wire {
        text: String,
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        relevance: f64,
        #[serde(default)]
        importance: f64,
    }

    let cleaned = strip_code_blocks(raw);
    let wire: Vec<Wire> =
        serde_json::from_str(cleaned).map_err(|e| anyhow!("Invalid bullets response: {e}"))?;
    Ok(wire
        .into_iter()
        .filter(|w| !w.text.trim().is_empty())
        .map(|w| ExtractedBullet {
            text: w.text.trim().to_string(),
            topic: w.topic,
            relevance: w.relevance.clamp(0.0, 1.0),
            importance: w.importance.clamp(0.0, 1.0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_prompt_numbers_messages() {
        let messages = vec![
            OracleMessage {
                text: "first".into(),
                channel_name: "chan_a".into(),
                context: vec!["earlier post".into()],
                link_excerpts: vec![],
            },
            OracleMessage {
                text: "second".into(),
                channel_name: "chan_b".into(),
                context: vec![],
                link_excerpts: vec!["page text".into()],
            },
        ];
        let prompt = batch_prompt(&messages, "en", "neutral");
        assert!(prompt.contains("### Message 0 (channel: chan_a)"));
        assert!(prompt.contains("### Message 1 (channel: chan_b)"));
        assert!(prompt.contains("earlier post"));
        assert!(prompt.contains("Linked page excerpt: page text"));
    }

    #[test]
    fn parse_batch_reindexes_and_clamps() {
        let raw = r#"```json
        [{"index": 7, "relevance": 1.4, "importance": -0.1, "topic": "t",
          "summary": "s", "language": "en", "source_channel": null}]
        ```"#;
        let results = parse_batch_response(raw, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 0);
        assert_eq!(results[0].relevance, 1.0);
        assert_eq!(results[0].importance, 0.0);
    }

    #[test]
    fn parse_batch_truncates_extra_results() {
        let raw = r#"[
            {"index": 0, "relevance": 0.5, "importance": 0.5, "topic": "a", "summary": "x", "language": "en", "source_channel": null},
            {"index": 1, "relevance": 0.5, "importance": 0.5, "topic": "b", "summary": "y", "language": "en", "source_channel": null}
        ]"#;
        let results = parse_batch_response(raw, 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn parse_batch_rejects_garbage() {
        assert!(parse_batch_response("not json", 1).is_err());
    }

    #[test]
    fn parse_bullets_drops_empty_text() {
        let raw = r#"[{"text": "  ", "relevance": 0.5, "importance": 0.5},
                      {"text": "Council passed the budget", "topic": "politics",
                       "relevance": 0.9, "importance": 0.8}]"#;
        let bullets = parse_bullets_response(raw).unwrap();
        assert_eq!(bullets.len(), 1);
        assert_eq!(bullets[0].text, "Council passed the budget");
        assert_eq!(bullets[0].topic.as_deref(), Some("politics"));
    }
}
