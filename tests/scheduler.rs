// tests/scheduler.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use dostobot::aggregator::Aggregator;
use dostobot::health::Health;
use dostobot::matching::{Matcher, MatcherConfig};
use dostobot::models::NewPost;
use dostobot::retrieval::LocalHybridBackend;
use dostobot::safety::SafetyFilter;
use dostobot::scheduler::{PostCycleOutcome, Scheduler, SchedulerConfig, NO_MATCH_REASON};
use dostobot::selector::Selector;
use dostobot::store::{MemoryStore, Store};

const QUOTE: &str = "Pain and suffering are always inevitable for a large intelligence and a deep heart.";

struct Rig {
    store: Arc<dyn Store>,
    publisher: Arc<RecordingPublisher>,
    completion: Arc<ScriptedCompletion>,
    health: Arc<Health>,
    scheduler: Scheduler,
}

async fn rig(completion: ScriptedCompletion, publisher: RecordingPublisher, cfg: SchedulerConfig) -> Rig {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    seed_quotes(&store, vec![quote(QUOTE, "Crime and Punishment", at_similarity(0.8))]).await;

    let completion = Arc::new(completion);
    let publisher = Arc::new(publisher);
    let health = Arc::new(Health::new());

    let aggregator = Aggregator::new(
        vec![Arc::new(StaticMonitor {
            name: "hackernews",
            trends: vec![
                trend("hackernews", "1", "Burnout in tech"),
                trend("hackernews", "2", "Why we suffer"),
            ],
        })],
        SafetyFilter::default(),
        store.clone(),
    );
    let matcher = Matcher::in_memory(
        store.clone(),
        Arc::new(TableEmbedder::constant(vec![1.0, 0.0])),
        Selector::new(completion.clone()),
        MatcherConfig::default(),
    );
    let scheduler = Scheduler::new(
        store.clone(),
        aggregator,
        matcher,
        publisher.clone(),
        health.clone(),
        cfg,
    );
    Rig {
        store,
        publisher,
        completion,
        health,
        scheduler,
    }
}

fn post_for(quote_id: i64, n: usize) -> NewPost {
    NewPost {
        quote_id,
        trend_id: None,
        platform: "bluesky".into(),
        platform_post_id: None,
        post_url: None,
        trend_title: format!("earlier {n}"),
        trend_source: "hackernews".into(),
        trend_hash: format!("hash-{n}"),
        relevance_score: 0.9,
        relevance_reasoning: None,
        vector_similarity: 0.5,
    }
}

#[tokio::test]
async fn quota_reached_means_zero_publish_attempts() {
    let r = rig(ScriptedCompletion::replying(&judgment(0, 0.9)), RecordingPublisher::default(), SchedulerConfig {
        max_posts_per_day: 2,
        ..SchedulerConfig::default()
    })
    .await;
    r.scheduler.run_monitor_cycle().await.unwrap();
    for n in 0..2 {
        r.store.create_post(&post_for(1, n)).await.unwrap();
    }

    let outcome = r.scheduler.run_post_cycle().await.unwrap();
    assert_eq!(outcome, PostCycleOutcome::QuotaReached { posts_today: 2 });
    assert_eq!(r.publisher.count(), 0);
    assert_eq!(r.completion.calls(), 0);
}

#[tokio::test]
async fn successful_cycle_publishes_and_records() {
    let r = rig(ScriptedCompletion::replying(&judgment(0, 0.9)), RecordingPublisher::default(), SchedulerConfig::default()).await;
    assert_eq!(r.scheduler.run_monitor_cycle().await.unwrap(), 2);

    let outcome = r.scheduler.run_post_cycle().await.unwrap();
    let PostCycleOutcome::Posted { trend_id, quote_id, post_url } = outcome else {
        panic!("expected a post, got {outcome:?}");
    };
    assert_eq!(post_url, "https://bsky.app/profile/test/post/1");

    let posted = r.publisher.posted.lock().unwrap().clone();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].text.starts_with(&format!("\"{QUOTE}\"")));
    assert!(posted[0].text.ends_with("— Crime and Punishment"));

    let stats = r.store.stats().await.unwrap();
    assert_eq!(stats.posts, 1);
    assert_eq!(stats.unmatched_trends, 1);
    let open = r.store.list_unmatched_trends(10).await.unwrap();
    assert!(open.iter().all(|t| t.id != trend_id));
    let q = r.store.get_quote(quote_id).await.unwrap().unwrap();
    assert_eq!(q.times_posted, 1);
    assert!(q.last_posted_at.is_some());
    assert!(r.health.get_status("post").unwrap().healthy);
}

#[tokio::test]
async fn unmatched_trends_are_marked_skipped() {
    let r = rig(ScriptedCompletion::replying(r#"{"best_match_index": -1, "evaluations": [], "recommendation": "none"}"#),
        RecordingPublisher::default(), SchedulerConfig::default()).await;
    r.scheduler.run_monitor_cycle().await.unwrap();

    let outcome = r.scheduler.run_post_cycle().await.unwrap();
    assert_eq!(outcome, PostCycleOutcome::NoMatch { skipped: 2 });
    assert_eq!(r.completion.calls(), 2);
    assert_eq!(r.publisher.count(), 0);
    assert!(r.store.list_unmatched_trends(10).await.unwrap().is_empty());

    let t = r.store.find_trend("hackernews", "1").await.unwrap().unwrap();
    assert!(t.skipped);
    assert_eq!(t.skip_reason.as_deref(), Some(NO_MATCH_REASON));

    assert_eq!(r.scheduler.run_post_cycle().await.unwrap(), PostCycleOutcome::NoTrends);
}

#[tokio::test]
async fn dry_run_neither_publishes_nor_records() {
    let r = rig(ScriptedCompletion::replying(&judgment(0, 0.9)), RecordingPublisher::default(), SchedulerConfig {
        dry_run: true,
        ..SchedulerConfig::default()
    })
    .await;
    r.scheduler.run_monitor_cycle().await.unwrap();

    let outcome = r.scheduler.run_post_cycle().await.unwrap();
    let PostCycleOutcome::DryRun { text, .. } = outcome else {
        panic!("expected dry run, got {outcome:?}");
    };
    assert!(text.contains(QUOTE));
    assert_eq!(r.publisher.count(), 0);
    let stats = r.store.stats().await.unwrap();
    assert_eq!(stats.posts, 0);
    assert_eq!(stats.unmatched_trends, 2);
}

#[tokio::test]
async fn publish_failure_is_an_error_and_leaves_trend_open() {
    let r = rig(ScriptedCompletion::replying(&judgment(0, 0.9)), RecordingPublisher::failing(), SchedulerConfig::default()).await;
    r.scheduler.run_monitor_cycle().await.unwrap();

    let err = r.scheduler.run_post_cycle().await.unwrap_err();
    assert!(format!("{err:#}").contains("bluesky returned 500"));

    let post = r.health.get_status("post").unwrap();
    assert!(!post.healthy);
    assert!(!r.health.is_overall_healthy());
    let stats = r.store.stats().await.unwrap();
    assert_eq!(stats.posts, 0);
    assert_eq!(stats.unmatched_trends, 2);
}

#[tokio::test]
async fn match_errors_leave_trends_untouched() {
    let r = rig(ScriptedCompletion::failing("judge offline"), RecordingPublisher::default(), SchedulerConfig::default()).await;
    r.scheduler.run_monitor_cycle().await.unwrap();

    let outcome = r.scheduler.run_post_cycle().await.unwrap();
    assert_eq!(outcome, PostCycleOutcome::NoMatch { skipped: 0 });
    assert_eq!(r.completion.calls(), 2);
    assert_eq!(r.store.list_unmatched_trends(10).await.unwrap().len(), 2);
    assert_eq!(r.publisher.count(), 0);
}

#[tokio::test]
async fn startup_records_component_health() {
    let r = rig(ScriptedCompletion::replying("{}"), RecordingPublisher::failing(), SchedulerConfig::default()).await;
    r.scheduler.startup().await;

    assert!(!r.health.get_status("publisher").unwrap().healthy);
    let index = r.health.get_status("index").unwrap();
    assert!(index.healthy);
    assert_eq!(index.message, "loaded 1 quotes");
    assert_eq!(r.publisher.validations.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_hybrid_catalogue_leaves_trends_open() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let completion = Arc::new(ScriptedCompletion::replying(&judgment(0, 0.9)));
    let publisher = Arc::new(RecordingPublisher::default());
    let health = Arc::new(Health::new());
    let aggregator = Aggregator::new(
        vec![Arc::new(StaticMonitor {
            name: "hackernews",
            trends: vec![trend("hackernews", "1", "Burnout in tech")],
        })],
        SafetyFilter::default(),
        store.clone(),
    );
    let matcher = Matcher::hybrid(
        store.clone(),
        Arc::new(TableEmbedder::constant(vec![1.0, 0.0])),
        Arc::new(LocalHybridBackend::new(store.clone())),
        Selector::new(completion.clone()),
        MatcherConfig::default(),
    );
    let scheduler = Scheduler::new(
        store.clone(),
        aggregator,
        matcher,
        publisher.clone(),
        health.clone(),
        SchedulerConfig::default(),
    );

    scheduler.startup().await;
    let index = health.get_status("index").unwrap();
    assert!(!index.healthy);
    assert_eq!(index.message, "no quotes in index");
    scheduler.run_monitor_cycle().await.unwrap();

    for _ in 0..2 {
        assert_eq!(
            scheduler.run_post_cycle().await.unwrap(),
            PostCycleOutcome::NoMatch { skipped: 0 }
        );
    }
    assert_eq!(store.list_unmatched_trends(10).await.unwrap().len(), 1);
    assert_eq!(completion.calls(), 0);

    // quotes embedded later are picked up without a restart
    seed_quotes(&store, vec![quote(QUOTE, "Crime and Punishment", at_similarity(0.8))]).await;
    let outcome = scheduler.run_post_cycle().await.unwrap();
    assert!(matches!(outcome, PostCycleOutcome::Posted { .. }), "{outcome:?}");
    assert_eq!(publisher.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_does_one_immediate_monitor_pass_then_stops_on_shutdown() {
    let r = rig(ScriptedCompletion::replying(&judgment(0, 0.9)), RecordingPublisher::default(), SchedulerConfig {
        monitor_interval: Duration::from_secs(600),
        post_interval: Duration::from_secs(3600),
        ..SchedulerConfig::default()
    })
    .await;

    r.scheduler
        .run(tokio::time::sleep(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(r.store.stats().await.unwrap().trends, 2);
    assert!(r.health.get_status("monitor").unwrap().healthy);
    // post timer never fired
    assert_eq!(r.publisher.count(), 0);
}
