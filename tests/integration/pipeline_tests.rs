use super::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use status_watcher::config::{DiagnosticPolicy, PushConfig, SchedulerConfig};
use status_watcher::fanout::NotificationFanout;
use status_watcher::fetcher::PrimaryFetcher;
use status_watcher::models::TrackedRecord;
use status_watcher::plugins::{NtfyNotifier, PushSender};
use status_watcher::store::RecordStore;
use status_watcher::{FetchOrchestrator, StatusPipeline};

struct Harness {
    status: MockServer,
    store: Arc<SqliteStore>,
    chat: Arc<RecordingChat>,
    pipeline: Arc<StatusPipeline>,
}

async fn harness(fresh: Vec<StatusEntry>, push: Option<&MockServer>) -> anyhow::Result<Harness> {
    let status = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(status_body(&fresh)))
        .mount(&status)
        .await;

    let config = get_test_config(&status.uri());
    let store = create_test_store().await?;
    let chat = Arc::new(RecordingChat::default());

    let orchestrator = FetchOrchestrator::new(
        Arc::new(PrimaryFetcher::new(config.target.clone())?),
        Arc::new(UnreachableBrowser),
        Arc::new(FixedProxies(Vec::new())),
        Arc::new(RecordingSink::default()),
        DiagnosticPolicy::EveryAttempt,
    );

    let push_config = PushConfig {
        base_url: push.map(|s| s.uri()).unwrap_or_default(),
        ..PushConfig::default()
    };
    let push_sender: Option<Arc<dyn PushSender>> = match push {
        Some(_) => Some(Arc::new(NtfyNotifier::new(&push_config)?)),
        None => None,
    };
    let fanout = NotificationFanout::new(store.clone(), chat.clone(), push_sender, &push_config);

    let pipeline = StatusPipeline::new(
        Arc::new(orchestrator),
        store.clone(),
        Arc::new(fanout),
        SchedulerConfig::default(),
    );

    Ok(Harness {
        status,
        store,
        chat,
        pipeline: Arc::new(pipeline),
    })
}

async fn seed(store: &SqliteStore, n: i64) -> anyhow::Result<TrackedRecord> {
    let mut record = TrackedRecord::with_entries("123456", entries(n));
    record.last_update = Utc::now() - chrono::Duration::hours(3);
    store.save_record(&record).await?;
    Ok(record)
}

#[tokio::test]
async fn test_unchanged_statuses_refresh_last_update_only() -> anyhow::Result<()> {
    let h = harness(entries(3), None).await?;
    let stored = seed(&h.store, 3).await?;
    h.store.add_subscriber("42", "123456").await?;

    let outcome = h.pipeline.run("123456").await?;

    assert!(!outcome.changed);
    assert!(outcome.new_entries.is_empty());
    assert!(h.chat.sent.lock().unwrap().is_empty());

    let saved = h.store.load_record("123456").await?.expect("record saved");
    assert_eq!(saved.entries, entries(3));
    assert!(saved.last_update > stored.last_update);
    Ok(())
}

#[tokio::test]
async fn test_new_statuses_reach_chat_and_push_subscribers() -> anyhow::Result<()> {
    let ntfy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/MFA_43_s3cr3t"))
        .and(header("Title", "Application update #123456"))
        .and(header("Priority", "urgent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "abc123" })))
        .expect(1)
        .mount(&ntfy)
        .await;

    let h = harness(entries(5), Some(&ntfy)).await?;
    seed(&h.store, 3).await?;
    h.store.add_subscriber("42", "123456").await?;
    h.store.add_subscriber("43", "123456").await?;
    h.store.set_push_channel("43", "s3cr3t").await?;

    let outcome = h.pipeline.run("123456").await?;

    assert!(outcome.changed);
    assert_eq!(outcome.new_entries, vec![entry(4), entry(5)]);
    assert_eq!(outcome.report.subscribers, 2);
    assert_eq!(outcome.report.chat.sent, 2);
    assert_eq!(outcome.report.push.sent, 1);

    let sent = h.chat.sent.lock().unwrap();
    let recipients: Vec<&str> = sent.iter().map(|(to, _)| to.as_str()).collect();
    assert!(recipients.contains(&"42") && recipients.contains(&"43"));
    for (_, text) in sent.iter() {
        assert!(text.starts_with("*Application update*\n#123456 has new statuses:"));
        assert!(text.contains("*1.* Status 4\n"));
        assert!(text.contains("*2.* Status 5\n"));
        assert!(!text.contains("Status 3"));
    }

    let saved = h.store.load_record("123456").await?.expect("record saved");
    assert_eq!(saved.entries, entries(5));
    Ok(())
}

#[tokio::test]
async fn test_push_outage_does_not_block_chat() -> anyhow::Result<()> {
    let ntfy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&ntfy)
        .await;

    let h = harness(entries(2), Some(&ntfy)).await?;
    seed(&h.store, 1).await?;
    h.store.add_subscriber("42", "123456").await?;
    h.store.set_push_channel("42", "k").await?;

    let outcome = h.pipeline.run("123456").await?;

    assert_eq!(outcome.report.chat.sent, 1);
    assert_eq!(outcome.report.push.failed, 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_runs_notify_once() -> anyhow::Result<()> {
    let h = harness(entries(4), None).await?;
    seed(&h.store, 2).await?;
    h.store.add_subscriber("42", "123456").await?;

    let (a, b) = tokio::join!(h.pipeline.run("123456"), h.pipeline.run("123456"));
    let changed = [a?, b?].iter().filter(|o| o.changed).count();

    assert_eq!(changed, 1);
    assert_eq!(h.chat.sent.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fetch_failure_keeps_stored_record() -> anyhow::Result<()> {
    let h = harness(entries(5), None).await?;
    let stored = seed(&h.store, 3).await?;
    h.store.add_subscriber("42", "123456").await?;

    h.status.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&h.status)
        .await;

    // Primary answers with no StatusInfo; the browser tier fails on its only attempt.
    let pipeline = {
        let config = get_test_config(&h.status.uri());
        let orchestrator = FetchOrchestrator::new(
            Arc::new(PrimaryFetcher::new(config.target)?),
            Arc::new(FailingBrowser::default()),
            Arc::new(FixedProxies(Vec::new())),
            Arc::new(RecordingSink::default()),
            DiagnosticPolicy::FinalAttemptOnly,
        );
        let fanout = NotificationFanout::new(h.store.clone(), h.chat.clone(), None, &PushConfig::default());
        StatusPipeline::new(
            Arc::new(orchestrator),
            h.store.clone(),
            Arc::new(fanout),
            SchedulerConfig::default(),
        )
    };

    let err = pipeline.run("123456").await.unwrap_err();
    assert!(matches!(err, AppError::Fetch { .. }));

    let saved = h.store.load_record("123456").await?.expect("record kept");
    assert_eq!(saved.entries, stored.entries);
    assert_eq!(saved.last_update.timestamp(), stored.last_update.timestamp());
    assert!(h.chat.sent.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_manual_poll_honours_cooldown() -> anyhow::Result<()> {
    let h = harness(entries(2), None).await?;
    seed(&h.store, 2).await?;

    h.pipeline.run_manual("123456", false).await?;

    let err = h.pipeline.run_manual("123456", false).await.unwrap_err();
    assert!(matches!(err, AppError::Cooldown { minutes } if minutes > 0));
    Ok(())
}

#[tokio::test]
async fn test_track_then_poll_only_reports_later_entries() -> anyhow::Result<()> {
    let h = harness(entries(2), None).await?;
    h.store.add_subscriber("42", "123456").await?;

    let record = h.pipeline.track("123456").await?;
    assert_eq!(record.entries, entries(2));
    assert!(h.chat.sent.lock().unwrap().is_empty());

    h.status.reset().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(status_body(&entries(3))))
        .mount(&h.status)
        .await;

    let outcome = h.pipeline.run("123456").await?;
    assert_eq!(outcome.new_entries, vec![entry(3)]);
    assert_eq!(h.chat.sent.lock().unwrap().len(), 1);
    Ok(())
}
