// tests/matching.rs
mod common;

use std::sync::Arc;

use common::*;
use dostobot::matching::{Matcher, MatcherConfig};
use dostobot::models::Trend;
use dostobot::retrieval::LocalHybridBackend;
use dostobot::selector::Selector;
use dostobot::store::{MemoryStore, Store};

const HIGH: &str = "Man is a mystery. It needs to be unravelled.";
const MID: &str = "Pain and suffering are always inevitable for a large intelligence.";
const LOW: &str = "The darker the night, the brighter the stars.";

async fn stored_trend(store: &Arc<dyn Store>, title: &str) -> Trend {
    store
        .insert_trend(&trend("hackernews", "1", title))
        .await
        .unwrap()
        .unwrap()
}

async fn three_quote_store() -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    seed_quotes(
        &store,
        vec![
            quote(HIGH, "Crime and Punishment", at_similarity(0.9)),
            quote(MID, "Crime and Punishment", at_similarity(0.6)),
            quote(LOW, "Crime and Punishment", at_similarity(0.2)),
        ],
    )
    .await;
    store
}

fn in_memory(
    store: &Arc<dyn Store>,
    completion: Arc<ScriptedCompletion>,
    min_similarity: f32,
) -> Matcher {
    Matcher::in_memory(
        store.clone(),
        Arc::new(TableEmbedder::constant(vec![1.0, 0.0])),
        Selector::new(completion),
        MatcherConfig {
            min_similarity,
            ..MatcherConfig::default()
        },
    )
}

#[tokio::test]
async fn threshold_keeps_two_candidates_in_similarity_order() {
    let store = three_quote_store().await;
    let completion = Arc::new(ScriptedCompletion::replying(&judgment(1, 0.75)));
    let matcher = in_memory(&store, completion.clone(), 0.5);
    let t = stored_trend(&store, "Why are we all so tired?").await;

    let result = matcher.match_trend(&t).await.unwrap().expect("matched");

    // one batch call, with the two surviving candidates in order
    assert_eq!(completion.calls(), 1);
    let prompt = completion.last_prompt();
    let hi = prompt.find(HIGH).expect("high candidate in prompt");
    let mid = prompt.find(MID).expect("mid candidate in prompt");
    assert!(hi < mid);
    assert!(!prompt.contains(LOW));

    // best index 1 is the 0.6 quote
    assert_eq!(result.quote.text, MID);
    assert!((result.vector_similarity - 0.6).abs() < 1e-4);
    assert!((result.relevance_score - 0.75).abs() < 1e-9);
    assert_eq!(result.reasoning, "apt");
    assert_eq!(result.trend.id, t.id);
}

#[tokio::test]
async fn relevance_below_threshold_is_unmatched() {
    let store = three_quote_store().await;
    let completion = Arc::new(ScriptedCompletion::replying(&judgment(0, 0.4)));
    let matcher = in_memory(&store, completion, 0.5);
    let t = stored_trend(&store, "Quarterly earnings").await;

    assert!(matcher.match_trend(&t).await.unwrap().is_none());
}

#[tokio::test]
async fn prose_wrapped_json_is_still_understood() {
    let store = three_quote_store().await;
    let reply = format!("Here is my evaluation:\n{}\nHope that helps.", judgment(0, 0.9));
    let matcher = in_memory(&store, Arc::new(ScriptedCompletion::replying(&reply)), 0.5);
    let t = stored_trend(&store, "A mystery").await;

    let m = matcher.match_trend(&t).await.unwrap().unwrap();
    assert_eq!(m.quote.text, HIGH);
}

#[tokio::test]
async fn garbage_reply_means_no_match_not_error() {
    let store = three_quote_store().await;
    let completion = Arc::new(ScriptedCompletion::replying("I'd rather not say."));
    let matcher = in_memory(&store, completion, 0.5);
    let t = stored_trend(&store, "Anything").await;

    assert!(matcher.match_trend(&t).await.unwrap().is_none());
}

#[tokio::test]
async fn nothing_above_similarity_skips_the_selector() {
    let store = three_quote_store().await;
    let completion = Arc::new(ScriptedCompletion::replying(&judgment(0, 1.0)));
    let matcher = in_memory(&store, completion.clone(), 0.95);
    let t = stored_trend(&store, "Unrelated").await;

    assert!(matcher.match_trend(&t).await.unwrap().is_none());
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn completion_failure_propagates() {
    let store = three_quote_store().await;
    let matcher = in_memory(&store, Arc::new(ScriptedCompletion::failing("timeout")), 0.5);
    let t = stored_trend(&store, "Anything").await;

    let err = matcher.match_trend(&t).await.unwrap_err();
    assert!(format!("{err:#}").contains("timeout"));
}

#[tokio::test]
async fn empty_index_is_an_error_in_both_modes() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let completion = Arc::new(ScriptedCompletion::replying("{}"));
    let t = stored_trend(&store, "Anything").await;

    let memory = in_memory(&store, completion.clone(), 0.01);
    let hybrid = Matcher::hybrid(
        store.clone(),
        Arc::new(TableEmbedder::constant(vec![1.0, 0.0])),
        Arc::new(LocalHybridBackend::new(store.clone())),
        Selector::new(completion.clone()),
        MatcherConfig::default(),
    );
    for matcher in [&memory, &hybrid] {
        assert_eq!(matcher.ensure_ready().await.unwrap(), 0);
        let err = matcher.match_trend(&t).await.unwrap_err();
        assert!(err.to_string().contains("no quotes in index"));
    }
    assert_eq!(completion.calls(), 0);

    // the empty load is not cached
    seed_quotes(&store, vec![quote(HIGH, "Notes from Underground", at_similarity(0.9))]).await;
    assert_eq!(memory.ensure_ready().await.unwrap(), 1);
    assert_eq!(hybrid.ensure_ready().await.unwrap(), 1);
}

#[tokio::test]
async fn hybrid_retrieval_matches_through_the_store() {
    let store = three_quote_store().await;
    let completion = Arc::new(ScriptedCompletion::replying(&judgment(0, 0.8)));
    let matcher = Matcher::hybrid(
        store.clone(),
        Arc::new(TableEmbedder::constant(vec![1.0, 0.0])),
        Arc::new(LocalHybridBackend::new(store.clone())),
        Selector::new(completion.clone()),
        MatcherConfig::default(),
    );
    assert_eq!(matcher.ensure_ready().await.unwrap(), 3);

    let t = stored_trend(&store, "Suffering and intelligence").await;
    let m = matcher.match_trend(&t).await.unwrap().unwrap();
    assert_eq!(completion.calls(), 1);
    // whatever the fused order, the chosen quote carries its cosine similarity
    let expected = match m.quote.text.as_str() {
        HIGH => 0.9,
        MID => 0.6,
        _ => 0.2,
    };
    assert!((m.vector_similarity - expected).abs() < 1e-4);
}

#[tokio::test]
async fn match_text_returns_best_by_similarity() {
    let store = three_quote_store().await;
    let completion = Arc::new(ScriptedCompletion::replying("{}"));
    let matcher = in_memory(&store, completion.clone(), 0.01);

    let best = matcher.match_text("who am I").await.unwrap().unwrap();
    assert_eq!(best.quote.text, HIGH);
    assert_eq!(completion.calls(), 0);
}
