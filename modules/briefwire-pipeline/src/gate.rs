//! Relevance gate: a cheap heuristic, optionally backed by an oracle
//! classifier. The heuristic is pure; the oracle path wraps it with a
//! timeout and falls back to it on any invalid result.

use tracing::warn;

use briefwire_common::score::clamp01;
use briefwire_common::textprep::{has_letters_or_digits, strip_urls};
use briefwire_common::{GateDecision, GateVerdict, Oracle};

use crate::settings::{GateMode, PipelineSettings, GATE_TIMEOUT};
use crate::traits::Storage;

pub const GATE_PROMPT_VERSION_DEFAULT: &str = "v1";

/// Built-in classifier prompt for the default version.
pub const GATE_PROMPT_V1: &str = "You are a relevance classifier for a news digest. \
Given a chat message, decide whether it carries newsworthy information worth summarizing. \
Promotional posts, channel housekeeping, reaction-only posts and bare links are irrelevant. \
Respond with JSON only: {\"decision\": \"relevant\"|\"irrelevant\", \"confidence\": 0.0-1.0, \"reason\": \"short reason\"}";

/// Deterministic first stage. Fixed confidences per rule.
pub fn heuristic_gate(text: &str) -> GateDecision {
    let trimmed = text.trim();
    let (verdict, confidence, reason) = if trimmed.is_empty() {
        (GateVerdict::Irrelevant, 1.0, "empty")
    } else if strip_urls(trimmed).trim().is_empty() {
        (GateVerdict::Irrelevant, 0.9, "link_only")
    } else if !has_letters_or_digits(trimmed) {
        (GateVerdict::Irrelevant, 0.8, "no_text")
    } else {
        (GateVerdict::Relevant, 0.6, "passed")
    };
    GateDecision {
        verdict,
        confidence,
        reason: reason.to_string(),
        model: "heuristic".to_string(),
        prompt_version: GATE_PROMPT_VERSION_DEFAULT.to_string(),
    }
}

/// Resolve the active gate prompt through the settings indirection:
/// `prompt:relevance_gate:active` names a version, and
/// `prompt:relevance_gate:<version>` holds its text.
pub async fn load_prompt<S: Storage>(store: &S) -> (String, String) {
    let version = match store.get_setting("prompt:relevance_gate:active").await {
        Some(serde_json::Value::String(v)) if !v.is_empty() => v,
        _ => GATE_PROMPT_VERSION_DEFAULT.to_string(),
    };
    let prompt = match store.get_setting(&format!("prompt:relevance_gate:{}", version)).await {
        Some(serde_json::Value::String(p)) if !p.is_empty() => p,
        _ => GATE_PROMPT_V1.to_string(),
    };
    (version, prompt)
}

/// Evaluate one message. Always returns a decision; oracle failures and
/// malformed responses degrade to the heuristic.
pub async fn evaluate<S: Storage, O: Oracle + ?Sized>(
    store: &S,
    oracle: &O,
    settings: &PipelineSettings,
    text: &str,
) -> GateDecision {
    let heuristic = heuristic_gate(text);
    match settings.relevance_gate_mode {
        GateMode::Heuristic => heuristic,
        GateMode::Hybrid if heuristic.verdict == GateVerdict::Irrelevant => heuristic,
        GateMode::Hybrid | GateMode::Llm => {
            let (version, prompt) = load_prompt(store).await;
            match oracle_gate(oracle, settings, text, &version, &prompt).await {
                Some(decision) => decision,
                None => heuristic,
            }
        }
    }
}

async fn oracle_gate<O: Oracle + ?Sized>(
    oracle: &O,
    settings: &PipelineSettings,
    text: &str,
    version: &str,
    prompt: &str,
) -> Option<GateDecision> {
    let call = oracle.relevance_gate(text, &settings.gate_model, prompt);
    let response = match tokio::time::timeout(GATE_TIMEOUT, call).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(error = %e, "relevance gate call failed, using heuristic");
            return None;
        }
        Err(_) => {
            warn!("relevance gate call timed out, using heuristic");
            return None;
        }
    };
    let verdict = match response.decision.as_str() {
        "relevant" => GateVerdict::Relevant,
        "irrelevant" => GateVerdict::Irrelevant,
        other => {
            warn!(decision = %other, "relevance gate returned unknown decision, using heuristic");
            return None;
        }
    };
    let model = if settings.gate_model.is_empty() {
        "oracle".to_string()
    } else {
        settings.gate_model.clone()
    };
    Some(GateDecision {
        verdict,
        confidence: clamp01(response.confidence),
        reason: response.reason,
        model,
        prompt_version: version.to_string(),
    })
}
