//! Main worker loop: claim a batch, run it through filters, gate,
//! dedup, oracle, scoring, bullets, and persistence, then tick the
//! periodic recovery and bullet-dedup tasks.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use briefwire_common::score::clamp01;
use briefwire_common::textprep::{
    contains_ukrainian_letters, detect_language, has_link, is_weak_summary, lead_sentence,
    normalize_language, postprocess_summary,
};
use briefwire_common::{
    Config, GateVerdict, Item, ItemStatus, LanguageSource, LinkResolver, Oracle,
    SummaryCacheEntry, TextEmbedder,
};

use crate::bullet_dedup;
use crate::bullets::{self, BulletCounts};
use crate::dedup::{self, DedupVerdict};
use crate::filter::FilterEngine;
use crate::gate;
use crate::orchestrator::{self, OracleOutcome};
use crate::scoring;
use crate::settings::{PipelineSettings, RECOVERY_INTERVAL, STUCK_MESSAGE_THRESHOLD_SECS};
use crate::traits::Storage;
use crate::Candidate;

pub struct PipelineWorker<S> {
    store: Arc<S>,
    oracle: Arc<dyn Oracle>,
    embedder: Arc<dyn TextEmbedder>,
    links: Arc<dyn LinkResolver>,
    config: Config,
}

impl<S: Storage + 'static> PipelineWorker<S> {
    pub fn new(
        store: Arc<S>,
        oracle: Arc<dyn Oracle>,
        embedder: Arc<dyn TextEmbedder>,
        links: Arc<dyn LinkResolver>,
        config: Config,
    ) -> Self {
        Self { store, oracle, embedder, links, config }
    }

    /// Run until ctrl-c. Periodic tasks share this loop; nothing runs on
    /// a separate thread.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("pipeline worker started");
        let poll = std::time::Duration::from_secs(self.config.worker_poll_interval_secs);
        let mut last_recovery = Instant::now();
        let mut last_bullet_dedup = Instant::now();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, stopping worker");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll) => {}
            }

            let settings = PipelineSettings::load(self.store.as_ref()).await;

            if last_recovery.elapsed() >= RECOVERY_INTERVAL {
                last_recovery = Instant::now();
                match self.store.recover_stuck(Duration::seconds(STUCK_MESSAGE_THRESHOLD_SECS)).await {
                    Ok(0) => {}
                    Ok(recovered) => {
                        warn!(recovered, "recovered stuck message claims");
                        counter!("pipeline_recovered_claims_total").increment(recovered);
                    }
                    Err(e) => warn!(error = %e, "stuck claim recovery failed"),
                }
            }

            if last_bullet_dedup.elapsed() >= settings.bullet_dedup_interval {
                last_bullet_dedup = Instant::now();
                if let Err(e) = bullet_dedup::run(self.store.as_ref(), &settings).await {
                    warn!(error = %e, "bullet dedup pass failed");
                }
            }

            if let Err(e) = self.run_batch(&settings).await {
                warn!(error = %e, "batch failed");
            }
        }
    }

    /// Process one claimed batch. Public so tests can drive the worker
    /// without the loop.
    pub async fn run_batch(&self, settings: &PipelineSettings) -> anyhow::Result<usize> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id);
        self.run_batch_inner(settings).instrument(span).await
    }

    async fn run_batch_inner(&self, settings: &PipelineSettings) -> anyhow::Result<usize> {
        let store = self.store.as_ref();
        let started = Instant::now();

        if let Ok(backlog) = store.count_backlog().await {
            gauge!("pipeline_backlog").set(backlog as f64);
        }

        let batch_size = settings.batch_size.min(self.config.batch_size).max(1);
        let messages = store.claim_unprocessed(batch_size).await?;
        if messages.is_empty() {
            return Ok(0);
        }
        debug!(claimed = messages.len(), "claimed batch");

        // Basic filters.
        let engine = FilterEngine::new(settings);
        let mut seen_hashes = std::collections::HashMap::new();
        let mut screened = Vec::new();
        for message in messages {
            match engine.screen(&message, &mut seen_hashes) {
                Ok(result) => screened.push((message, result)),
                Err(drop) => {
                    counter!("pipeline_drops_total", "reason" => drop.reason.as_str())
                        .increment(1);
                    store.save_drop_log(message.id, drop.reason.as_str(), &drop.detail).await;
                    if let Err(e) = store.mark_processed(message.id).await {
                        warn!(raw_message_id = %message.id, error = %e, "failed to mark dropped message processed");
                    }
                }
            }
        }

        // Channel context and resolved links.
        let mut enriched = Vec::new();
        for (message, screened) in screened {
            if has_link(&screened.text) {
                self.seed_links(&screened.text);
            }
            let context = match store
                .recent_channel_context(message.channel_id, message.tg_date, settings.context_messages)
                .await
            {
                Ok(context) => context,
                Err(e) => {
                    warn!(error = %e, "channel context unavailable");
                    vec![]
                }
            };
            let links = match self.links.resolve_links(&screened.text, settings.max_links).await {
                Ok(links) => links,
                Err(e) => {
                    warn!(error = %e, "link resolution failed");
                    vec![]
                }
            };
            enriched.push(Candidate {
                message,
                text: screened.text,
                preview: screened.preview,
                context,
                links,
                embedding: vec![],
            });
        }

        // Relevance gate.
        let mut gated = Vec::new();
        for candidate in enriched {
            if !settings.relevance_gate_enabled {
                gated.push(candidate);
                continue;
            }
            let decision =
                gate::evaluate(store, self.oracle.as_ref(), settings, &candidate.text).await;
            store.save_gate_log(candidate.message.id, &decision).await;
            if decision.verdict == GateVerdict::Irrelevant {
                counter!("pipeline_drops_total", "reason" => "relevance_gate").increment(1);
                store
                    .save_drop_log(candidate.message.id, "relevance_gate", &decision.reason)
                    .await;
                if let Err(e) = store.mark_processed(candidate.message.id).await {
                    warn!(error = %e, "failed to mark gated message processed");
                }
                continue;
            }
            gated.push(candidate);
        }

        // Embeddings for the survivors, then dedup.
        if !gated.is_empty() {
            let texts: Vec<String> = gated.iter().map(|c| c.text.clone()).collect();
            match self.embedder.embed_batch(texts).await {
                Ok(embeddings) => {
                    for (candidate, embedding) in gated.iter_mut().zip(embeddings) {
                        candidate.embedding = embedding;
                    }
                }
                Err(e) => warn!(error = %e, "batch embedding failed, semantic dedup disabled"),
            }
        }

        let now = Utc::now();
        let mut candidates: Vec<Candidate> = Vec::new();
        for candidate in gated {
            match dedup::check(store, settings, &candidate, &candidates, now).await {
                Ok(DedupVerdict::Unique) => candidates.push(candidate),
                Ok(DedupVerdict::Duplicate { reason, detail }) => {
                    counter!("pipeline_drops_total", "reason" => reason.as_str()).increment(1);
                    store.save_drop_log(candidate.message.id, reason.as_str(), &detail).await;
                    if let Err(e) = store.mark_processed(candidate.message.id).await {
                        warn!(error = %e, "failed to mark duplicate processed");
                    }
                }
                Err(e) => {
                    // Undecidable; leave the claim for stuck recovery.
                    warn!(raw_message_id = %candidate.message.id, error = %e, "dedup probe failed");
                }
            }
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        let digest_language = normalize_language(&self.config.digest_language);
        let prompt_version = orchestrator::load_prompt_version(store).await;
        let outcomes = orchestrator::run_batch(
            store,
            self.oracle.as_ref(),
            settings,
            &digest_language,
            &prompt_version,
            &candidates,
        )
        .await;

        let mut persisted = 0usize;
        for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
            // A missing outcome means the oracle group failed or returned
            // too few results; the claim was released for retry.
            let Some(outcome) = outcome else { continue };
            let raw_message_id = candidate.message.id;
            let channel_id = candidate.message.channel_id;
            match self
                .process_result(settings, &digest_language, &prompt_version, candidate, outcome)
                .await
            {
                Ok(status) => {
                    persisted += 1;
                    counter!("pipeline_items_total", "status" => status.as_str()).increment(1);
                }
                Err(e) => {
                    warn!(%raw_message_id, error = %e, "persistence failed, marking item error");
                    counter!("pipeline_items_total", "status" => "error").increment(1);
                    let detail = serde_json::json!({ "error": e.to_string() });
                    if let Err(e) = store.save_item_error(raw_message_id, channel_id, detail).await
                    {
                        warn!(error = %e, "failed to record item error");
                    }
                    if let Err(e) = store.mark_processed(raw_message_id).await {
                        warn!(error = %e, "failed to mark errored message processed");
                    }
                }
            }
        }

        histogram!("pipeline_batch_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(persisted)
    }

    /// Post-process one oracle result into a persisted item.
    async fn process_result(
        &self,
        settings: &PipelineSettings,
        digest_language: &str,
        prompt_version: &str,
        candidate: Candidate,
        outcome: OracleOutcome,
    ) -> anyhow::Result<ItemStatus> {
        let store = self.store.as_ref();
        let result = outcome.result;

        let (language, language_source) = resolve_language(
            &candidate.message.text,
            candidate.preview.as_deref(),
            &result.language,
        );

        let mut summary = if outcome.cached {
            result.summary.clone()
        } else {
            postprocess_summary(&result.summary, &settings.summary_prefixes, settings.summary_max_chars)
        };
        if is_weak_summary(&summary) {
            if let Some(lead) = lead_sentence(&candidate.text) {
                debug!(raw_message_id = %candidate.message.id, "weak summary, using lead sentence");
                summary = lead;
            }
        }

        let scored = scoring::score(
            store,
            settings,
            &candidate,
            result.relevance,
            result.importance,
            &summary,
            Utc::now(),
        )
        .await;

        let threshold = settings.effective_threshold(&candidate.message.overrides);
        let mut status = if scored.force_rejected || scored.relevance < threshold {
            ItemStatus::Rejected
        } else {
            ItemStatus::Ready
        };

        if status == ItemStatus::Ready
            && settings.translation_enabled
            && needs_translation(&summary, &language, digest_language)
        {
            match self
                .oracle
                .translate_text(&summary, digest_language, &settings.translation_model)
                .await
            {
                Ok(translated) if !translated.trim().is_empty() => summary = translated,
                Ok(_) => {}
                Err(e) => warn!(error = %e, "translation failed, keeping original summary"),
            }
        }

        let mut relevance = scored.relevance;
        let mut importance = scored.importance;
        let mut selected = Vec::new();
        let mut counts = BulletCounts::default();
        if settings.bullet_mode_enabled && status == ItemStatus::Ready {
            selected = bullets::extract(
                self.oracle.as_ref(),
                settings,
                digest_language,
                &result.topic,
                &candidate.text,
                candidate.preview.as_deref(),
                &summary,
            )
            .await;
            counts = bullets::counts_for(&selected, settings.bullet_min_importance);
            if let Some(max) = counts.max_relevance {
                relevance = clamp01(max);
            }
            if let Some(max) = counts.max_importance {
                importance = clamp01(max);
            }
            if counts.total > 0 && counts.included == 0 {
                status = ItemStatus::Rejected;
            }
        }

        let item = Item {
            id: Uuid::new_v4(),
            raw_message_id: candidate.message.id,
            channel_id: candidate.message.channel_id,
            relevance_score: relevance,
            importance_score: importance,
            topic: result.topic.clone(),
            summary: summary.clone(),
            language: language.clone(),
            language_source,
            status,
            bullet_total_count: counts.total,
            bullet_included_count: counts.included,
            first_seen_at: candidate.message.tg_date,
            digested_at: None,
            retry_count: 0,
            next_retry_at: None,
            error_json: None,
        };
        let item_id = store.save_item(&item).await?;

        if !selected.is_empty() {
            bullets::persist(
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
                item_id,
                &result.topic,
                selected,
            )
            .await;
        }

        if !candidate.embedding.is_empty() {
            if let Err(e) = store.save_embedding(item_id, &candidate.embedding).await {
                warn!(%item_id, error = %e, "embedding save failed");
            }
        }

        if !outcome.cached {
            let key = orchestrator::summary_cache_key(
                &candidate.message.canonical_hash,
                prompt_version,
                candidate.preview.as_deref(),
            );
            // Cache the oracle's own scores; a future hit re-enters the
            // bias chain with fresh channel state.
            let entry = SummaryCacheEntry {
                summary: summary.clone(),
                topic: result.topic.clone(),
                language: language.clone(),
                relevance: result.relevance,
                importance: result.importance,
                updated_at: Utc::now(),
            };
            if let Err(e) = store.upsert_summary_cache(&key, digest_language, &entry).await {
                warn!(error = %e, "summary cache upsert failed");
            }
        }

        if status == ItemStatus::Ready {
            self.enqueue_followups(settings, item_id, &summary).await;
        }

        store.mark_processed(candidate.message.id).await?;
        Ok(status)
    }

    /// Fire-and-forget warm-up of the resolver's cache; the batch never
    /// waits on it.
    fn seed_links(&self, text: &str) {
        let links = Arc::clone(&self.links);
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = links.seed_links(&text).await {
                warn!(error = %e, "link seeding failed");
            }
        });
    }

    /// Both enqueues are best-effort and idempotent per item.
    async fn enqueue_followups(&self, settings: &PipelineSettings, item_id: Uuid, summary: &str) {
        let store = self.store.as_ref();

        if settings.fact_check_enabled && !self.config.fact_check_api_key.is_empty() {
            let claim = summary.trim();
            if claim.chars().count() >= settings.min_claim_length {
                match store.count_pending_fact_checks().await {
                    Ok(depth) if depth < settings.fact_check_queue_max => {
                        match store.enqueue_fact_check(item_id, claim).await {
                            Ok(true) => counter!("fact_check_enqueued_total").increment(1),
                            Ok(false) => {}
                            Err(e) => warn!(error = %e, "fact-check enqueue failed"),
                        }
                    }
                    Ok(_) => debug!("fact-check queue at capacity, skipping"),
                    Err(e) => warn!(error = %e, "fact-check queue depth unavailable"),
                }
            }
        }

        if settings.enrichment_enabled && !summary.trim().is_empty() {
            match store.count_pending_enrichment().await {
                Ok(depth) if depth < settings.enrichment_queue_max => {
                    match store.enqueue_enrichment(item_id).await {
                        Ok(true) => counter!("enrichment_enqueued_total").increment(1),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "enrichment enqueue failed"),
                    }
                }
                Ok(_) => debug!("enrichment queue at capacity, skipping"),
                Err(e) => warn!(error = %e, "enrichment queue depth unavailable"),
            }
        }
    }
}

/// Raw text first, then preview, then the oracle's own report.
fn resolve_language(
    raw_text: &str,
    preview: Option<&str>,
    oracle_language: &str,
) -> (String, LanguageSource) {
    if let Some(lang) = detect_language(raw_text) {
        return (lang.to_string(), LanguageSource::Original);
    }
    if let Some(lang) = preview.and_then(detect_language) {
        return (lang.to_string(), LanguageSource::Preview);
    }
    (normalize_language(oracle_language), LanguageSource::Summary)
}

fn needs_translation(summary: &str, language: &str, target: &str) -> bool {
    if language != target {
        return true;
    }
    target == "ru" && contains_ukrainian_letters(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_resolution_prefers_raw_text() {
        let (lang, source) = resolve_language("Новини з фронту: ситуація стабільна", None, "en");
        assert_eq!(lang, "uk");
        assert_eq!(source, LanguageSource::Original);
    }

    #[test]
    fn language_resolution_falls_back_to_preview() {
        let (lang, source) = resolve_language("12345 67890", Some("An english preview text"), "ru");
        assert_eq!(lang, "en");
        assert_eq!(source, LanguageSource::Preview);
    }

    #[test]
    fn language_resolution_trusts_oracle_last() {
        let (lang, source) = resolve_language("12345", None, "Russian");
        assert_eq!(lang, "ru");
        assert_eq!(source, LanguageSource::Summary);
    }

    #[test]
    fn translation_triggers_on_language_mismatch() {
        assert!(needs_translation("some text", "en", "ru"));
        assert!(!needs_translation("обычный текст", "ru", "ru"));
    }

    #[test]
    fn ukrainian_letters_force_translation_for_ru_target() {
        // Detected language matched the target, but the text is Ukrainian.
        assert!(needs_translation("Привіт, це новини", "ru", "ru"));
        assert!(!needs_translation("Привет, это новости", "ru", "ru"));
    }
}
