//! End-to-end batch tests driving the worker against in-memory doubles.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use briefwire_common::{
    BulletStatus, Config, GateVerdict, ItemStatus, NoopLinkResolver, WeightedRatingSummary,
};
use briefwire_pipeline::testing::{
    batch_result, bullet, raw_message, MemoryStore, RecordingResolver, ScriptedOracle,
    StaticEmbedder,
};
use briefwire_pipeline::{bullet_dedup, PipelineSettings, PipelineWorker, Storage};

const LONG_NEWS_EN: &str = "The city council approved the new transit budget on Monday, \
allocating funds for twelve additional bus routes across the river district and a depot upgrade.";

const LONG_NEWS_EN_2: &str = "Regional authorities announced a tender for the bridge repair \
program on Tuesday, with contractors expected to submit proposals before the end of October.";

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        oracle_api_key: String::new(),
        oracle_base_url: None,
        embedding_api_key: String::new(),
        fact_check_api_key: String::new(),
        digest_language: "en".to_string(),
        worker_poll_interval_secs: 1,
        batch_size: 10,
    }
}

fn worker(
    store: Arc<MemoryStore>,
    oracle: Arc<ScriptedOracle>,
    embedder: Arc<StaticEmbedder>,
    config: Config,
) -> PipelineWorker<MemoryStore> {
    PipelineWorker::new(store, oracle, embedder, Arc::new(NoopLinkResolver), config)
}

async fn load_settings(store: &MemoryStore) -> PipelineSettings {
    PipelineSettings::load(store).await
}

#[tokio::test]
async fn link_bearing_messages_seed_the_resolver_without_blocking() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![
        batch_result(0, 0.9, 0.5, "The council approved the Monday transit budget covering twelve new routes."),
        batch_result(1, 0.9, 0.5, "Authorities announced the Tuesday bridge repair tender for contractors."),
    ]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    let resolver = Arc::new(RecordingResolver::new());

    let with_link = format!("{LONG_NEWS_EN} https://example.com/story");
    store.push_message(raw_message(1, &with_link));
    store.push_message(raw_message(2, LONG_NEWS_EN_2));

    let settings = load_settings(&store).await;
    let w = PipelineWorker::new(
        Arc::clone(&store),
        oracle,
        embedder,
        Arc::clone(&resolver) as Arc<dyn briefwire_common::LinkResolver>,
        test_config(),
    );
    w.run_batch(&settings).await.unwrap();
    // Seeding runs off the batch path; give the spawned task a beat.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(resolver.seeded_texts(), vec![with_link]);
    assert_eq!(store.items().len(), 2);
}

#[tokio::test]
async fn identical_hashes_in_one_batch_keep_only_the_first() {
    let store = Arc::new(MemoryStore::new());
    store.set_setting("pipeline:dedup_mode", serde_json::json!("strict"));
    let oracle = Arc::new(ScriptedOracle::new());
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    let first = raw_message(1, LONG_NEWS_EN);
    let mut second = raw_message(2, LONG_NEWS_EN);
    second.canonical_hash = first.canonical_hash.clone();
    store.push_message(first.clone());
    store.push_message(second.clone());

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    let persisted = w.run_batch(&settings).await.unwrap();
    assert_eq!(persisted, 1);

    let items = store.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].raw_message_id, first.id);
    assert_eq!(items[0].status, ItemStatus::Ready);

    let drops = store.drop_logs();
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0].0, second.id);
    assert_eq!(drops[0].1, "duplicate_batch");
    assert_eq!(drops[0].2, first.id.to_string());

    assert!(store.message(first.id).unwrap().processed_at.is_some());
    assert!(store.message(second.id).unwrap().processed_at.is_some());
}

#[tokio::test]
async fn link_only_message_is_gated_without_an_oracle_call() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    let msg = raw_message(1, "https://example.com");
    store.push_message(msg.clone());

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), Arc::clone(&oracle), embedder, test_config());
    let persisted = w.run_batch(&settings).await.unwrap();
    assert_eq!(persisted, 0);
    assert_eq!(oracle.batch_calls(), 0);
    assert_eq!(oracle.gate_calls(), 0);

    let gate_logs = store.gate_logs();
    assert_eq!(gate_logs.len(), 1);
    let decision = &gate_logs[0].1;
    assert_eq!(decision.verdict, GateVerdict::Irrelevant);
    assert_eq!(decision.reason, "link_only");
    assert_eq!(decision.confidence, 0.9);
    assert_eq!(decision.model, "heuristic");
    assert_eq!(decision.prompt_version, "v1");

    let drops = store.drop_logs();
    assert_eq!(drops[0].1, "relevance_gate");
    assert!(store.message(msg.id).unwrap().processed_at.is_some());
}

#[tokio::test]
async fn channel_weight_scales_importance() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.9,
        0.6,
        "John Smith raised 25M dollars on Monday to expand the logistics hub operations.",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    let mut msg = raw_message(1, LONG_NEWS_EN);
    msg.overrides.importance_weight = 1.5;
    store.push_message(msg);

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    assert_eq!(items.len(), 1);
    assert!((items[0].importance_score - 0.9).abs() < 1e-9);
    assert_eq!(items[0].status, ItemStatus::Ready);
}

#[tokio::test]
async fn vague_summary_loses_importance() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.9,
        0.5,
        "something notable reportedly happened somewhere according to several unnamed local sources",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    store.push_message(raw_message(1, LONG_NEWS_EN));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    assert!((items[0].importance_score - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn oracle_failure_releases_the_claims_for_retry() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new().failing_batch());
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    let msg = raw_message(1, LONG_NEWS_EN);
    store.push_message(msg.clone());

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    let persisted = w.run_batch(&settings).await.unwrap();
    assert_eq!(persisted, 0);

    assert!(store.items().is_empty());
    assert_eq!(store.released_claims(), vec![msg.id]);
    let released = store.message(msg.id).unwrap();
    assert!(released.processing_started_at.is_none());
    assert!(released.processed_at.is_none());

    // The next claim picks it up again.
    let reclaimed = store.claim_unprocessed(10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, msg.id);
}

#[tokio::test]
async fn stuck_claims_recover_after_the_threshold() {
    let store = Arc::new(MemoryStore::new());
    let mut msg = raw_message(1, LONG_NEWS_EN);
    msg.processing_started_at = Some(Utc::now() - Duration::minutes(15));
    store.push_message(msg.clone());

    let recovered = store.recover_stuck(Duration::minutes(10)).await.unwrap();
    assert_eq!(recovered, 1);
    assert!(store.message(msg.id).unwrap().processing_started_at.is_none());

    // Idempotent: nothing left to recover.
    assert_eq!(store.recover_stuck(Duration::minutes(10)).await.unwrap(), 0);

    let oracle = Arc::new(ScriptedOracle::new());
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    assert_eq!(w.run_batch(&settings).await.unwrap(), 1);
}

#[tokio::test]
async fn summary_cache_serves_repeat_content_without_the_oracle() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.8,
        0.6,
        "The council approved the Monday transit budget covering twelve new routes for the district.",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    store.push_message(raw_message(1, LONG_NEWS_EN));
    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), Arc::clone(&oracle), embedder, test_config());
    w.run_batch(&settings).await.unwrap();
    assert_eq!(oracle.batch_calls(), 1);

    // Same content, different raw message: served from cache.
    store.push_message(raw_message(2, LONG_NEWS_EN));
    w.run_batch(&settings).await.unwrap();
    assert_eq!(oracle.batch_calls(), 1);
    assert_eq!(store.items().len(), 2);
}

#[tokio::test]
async fn ready_items_feed_the_followup_queues() {
    let store = Arc::new(MemoryStore::new());
    store.set_setting("pipeline:fact_check_enabled", serde_json::json!(true));
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.9,
        0.7,
        "Contractors must submit bridge repair proposals before October 30 under the announced tender.",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    let mut config = test_config();
    config.fact_check_api_key = "fc-key".to_string();
    store.push_message(raw_message(1, LONG_NEWS_EN_2));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, config);
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    assert_eq!(items[0].status, ItemStatus::Ready);
    let fact_checks = store.fact_check_queue();
    assert_eq!(fact_checks.len(), 1);
    assert_eq!(fact_checks[0].0, items[0].id);
    assert_eq!(store.enrichment_queue(), vec![items[0].id]);
}

#[tokio::test]
async fn rejected_items_skip_the_followup_queues() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.2,
        0.7,
        "Contractors must submit bridge repair proposals before October 30 under the announced tender.",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    store.push_message(raw_message(1, LONG_NEWS_EN_2));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    assert_eq!(items[0].status, ItemStatus::Rejected);
    assert!(store.fact_check_queue().is_empty());
    assert!(store.enrichment_queue().is_empty());
}

#[tokio::test]
async fn translation_rewrites_ready_summaries_into_the_digest_language() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.9,
        0.7,
        "The council approved the Monday transit budget covering twelve new routes for the district.",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));

    let mut config = test_config();
    config.digest_language = "ru".to_string();
    store.push_message(raw_message(1, LONG_NEWS_EN));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), Arc::clone(&oracle), embedder, config);
    w.run_batch(&settings).await.unwrap();

    assert_eq!(oracle.translate_calls(), 1);
    let items = store.items();
    assert!(items[0].summary.starts_with("[ru] "));
    assert_eq!(items[0].language, "en");
}

#[tokio::test]
async fn semantic_global_duplicate_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    let embedder = Arc::new(StaticEmbedder::new(vec![0.3, 0.7, 0.1]));

    let msg = raw_message(1, LONG_NEWS_EN);
    store.push_message(msg.clone());
    store.add_similar_item(None, Uuid::new_v4(), 0.8);

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), Arc::clone(&oracle), embedder, test_config());
    let persisted = w.run_batch(&settings).await.unwrap();
    assert_eq!(persisted, 0);
    assert_eq!(oracle.batch_calls(), 0);

    let drops = store.drop_logs();
    assert_eq!(drops[0].1, "dedup_semantic_global");
    assert!(store.message(msg.id).unwrap().processed_at.is_some());
}

#[tokio::test]
async fn bullets_gate_the_item_and_reach_the_store() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.9,
        0.7,
        "The council approved the Monday transit budget covering twelve new routes for the district.",
    )]);
    oracle.push_bullets(vec![
        briefwire_common::ExtractedBullet {
            text: "Council approves transit budget".to_string(),
            topic: None,
            relevance: 0.8,
            importance: 0.9,
        },
        briefwire_common::ExtractedBullet {
            text: "Twelve new bus routes planned".to_string(),
            topic: Some("transport".to_string()),
            relevance: 0.7,
            importance: 0.6,
        },
    ]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    store.push_message(raw_message(1, LONG_NEWS_EN));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    assert_eq!(items[0].bullet_total_count, 2);
    assert_eq!(items[0].bullet_included_count, 2);
    // Item scores inherit the bullet maxima.
    assert!((items[0].importance_score - 0.9).abs() < 1e-9);
    assert!((items[0].relevance_score - 0.8).abs() < 1e-9);

    let stored = store.stored_bullets();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|b| b.item_id == items[0].id));
    assert!(stored.iter().all(|b| b.status == BulletStatus::Pending));
    // Bullets carry the item's topic even when the extraction suggested
    // its own.
    assert_eq!(stored[0].topic, "news");
    assert_eq!(stored[1].topic, "news");
}

#[tokio::test]
async fn all_marginal_bullets_reject_the_item() {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.9,
        0.7,
        "The council approved the Monday transit budget covering twelve new routes for the district.",
    )]);
    oracle.push_bullets(vec![briefwire_common::ExtractedBullet {
        text: "Minor administrative note".to_string(),
        topic: None,
        relevance: 0.2,
        importance: 0.1,
    }]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    store.push_message(raw_message(1, LONG_NEWS_EN));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    assert_eq!(items[0].bullet_included_count, 0);
    assert_eq!(items[0].status, ItemStatus::Rejected);
}

#[tokio::test]
async fn good_ratings_lift_scores_through_the_bias() {
    let store = Arc::new(MemoryStore::new());
    store.set_rating_summary(1, WeightedRatingSummary { good: 5.0, bad: 0.0, irrelevant: 0.0 });
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_batch_results(vec![batch_result(
        0,
        0.6,
        0.5,
        "John Smith raised 25M dollars on Monday to expand the logistics hub operations.",
    )]);
    let embedder = Arc::new(StaticEmbedder::new(vec![]));
    store.push_message(raw_message(1, LONG_NEWS_EN));

    let settings = load_settings(&store).await;
    let w = worker(Arc::clone(&store), oracle, embedder, test_config());
    w.run_batch(&settings).await.unwrap();

    let items = store.items();
    // Full +0.1 bias on importance, half on relevance.
    assert!((items[0].importance_score - 0.6).abs() < 1e-9);
    assert!((items[0].relevance_score - 0.65).abs() < 1e-9);
}

#[tokio::test]
async fn bullet_dedup_pass_marks_duplicates_and_promotes_the_rest() {
    let store = Arc::new(MemoryStore::new());
    let item_x = Uuid::new_v4();
    let item_y = Uuid::new_v4();
    let a = bullet(item_x, 0.9, BulletStatus::Pending, vec![1.0, 0.0]);
    let b = bullet(item_y, 0.8, BulletStatus::Pending, vec![0.999, 0.02]);
    let c = bullet(item_x, 0.7, BulletStatus::Pending, vec![1.0, 0.01]);
    for seed in [&a, &b, &c] {
        store.insert_bullet(seed).await.unwrap();
    }

    let settings = load_settings(&store).await;
    bullet_dedup::run(store.as_ref(), &settings).await.unwrap();

    let by_id = |id: Uuid| store.stored_bullets().into_iter().find(|x| x.id == id).unwrap();
    let a_after = by_id(a.id);
    assert_eq!(a_after.status, BulletStatus::Ready);
    assert_eq!(a_after.bullet_cluster_id, Some(a.id));

    let b_after = by_id(b.id);
    assert_eq!(b_after.status, BulletStatus::Duplicate);
    assert_eq!(b_after.bullet_cluster_id, Some(a.id));

    let c_after = by_id(c.id);
    assert_eq!(c_after.status, BulletStatus::Ready);
    assert_eq!(c_after.bullet_cluster_id, Some(c.id));

    // Re-running with nothing pending is a no-op.
    bullet_dedup::run(store.as_ref(), &settings).await.unwrap();
    assert_eq!(by_id(b.id).bullet_cluster_id, Some(a.id));
}
