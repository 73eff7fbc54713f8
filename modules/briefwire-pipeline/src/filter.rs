//! Basic per-message filters, applied in a fixed order before any
//! oracle work. Each drop carries a stable reason tag for the drop log.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use briefwire_common::score::min_chars_for_language;
use briefwire_common::textprep::{
    detect_language, extract_preview, has_link, is_boilerplate_only, is_emoji_only,
    is_forward_shell, strip_footer,
};
use briefwire_common::{DropReason, RawMessage};

use crate::settings::PipelineSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDrop {
    pub reason: DropReason,
    pub detail: String,
}

impl FilterDrop {
    fn tagged(reason: DropReason) -> Self {
        Self { reason, detail: String::new() }
    }
}

/// A message that cleared the basic filters.
#[derive(Debug, Clone)]
pub struct Screened {
    /// Footer-stripped text used by all later stages.
    pub text: String,
    pub preview: Option<String>,
}

/// Allow/deny patterns and keyword lists compiled once per batch.
pub struct FilterEngine {
    skip_forwards: bool,
    allow: Vec<Regex>,
    deny: Vec<Regex>,
    ads: Vec<String>,
    footer_phrases: Vec<String>,
    cta_phrases: Vec<String>,
}

impl FilterEngine {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            skip_forwards: settings.skip_forwards,
            allow: compile_patterns(&settings.allow_patterns),
            deny: compile_patterns(&settings.deny_patterns),
            ads: settings.ads_keywords.iter().map(|k| k.to_lowercase()).collect(),
            footer_phrases: settings.footer_phrases.clone(),
            cta_phrases: settings.cta_phrases.clone(),
        }
    }

    /// Run the filter chain for one claimed message. `seen_hashes` is the
    /// per-batch strict-dedup map; the first holder of a hash wins.
    pub fn screen(
        &self,
        message: &RawMessage,
        seen_hashes: &mut HashMap<String, Uuid>,
    ) -> Result<Screened, FilterDrop> {
        if let Some(first) = seen_hashes.get(&message.canonical_hash) {
            return Err(FilterDrop {
                reason: DropReason::DuplicateBatch,
                detail: first.to_string(),
            });
        }
        seen_hashes.insert(message.canonical_hash.clone(), message.id);

        let text = strip_footer(&message.text, &self.footer_phrases);

        if self.skip_forwards && message.is_forward {
            return Err(FilterDrop::tagged(DropReason::Forwarded));
        }
        if message.is_forward && is_forward_shell(&text) {
            return Err(FilterDrop::tagged(DropReason::ForwardShell));
        }
        if is_emoji_only(&text) {
            return Err(FilterDrop::tagged(DropReason::EmojiOnly));
        }
        if is_boilerplate_only(&text, &self.cta_phrases) {
            return Err(FilterDrop::tagged(DropReason::Boilerplate));
        }

        let preview = extract_preview(message.media_json.as_ref());

        // Short posts ride on a link or media preview; bare short text drops.
        if !has_link(&text) && preview.is_none() {
            let language = detect_language(&text);
            if text.chars().count() < min_chars_for_language(language) {
                return Err(FilterDrop {
                    reason: DropReason::MinLength,
                    detail: language.unwrap_or("unknown").to_string(),
                });
            }
        }

        if !self.allow.is_empty() && self.allow.iter().any(|re| re.is_match(&text)) {
            return Ok(Screened { text, preview });
        }
        if let Some(re) = self.deny.iter().find(|re| re.is_match(&text)) {
            return Err(FilterDrop {
                reason: DropReason::PatternDeny,
                detail: re.as_str().to_string(),
            });
        }
        let lowered = text.to_lowercase();
        if let Some(keyword) = self.ads.iter().find(|k| lowered.contains(k.as_str())) {
            return Err(FilterDrop {
                reason: DropReason::Ads,
                detail: keyword.clone(),
            });
        }

        Ok(Screened { text, preview })
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "invalid filter pattern, skipping");
                None
            }
        })
        .collect()
}
