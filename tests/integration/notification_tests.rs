use super::*;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use status_watcher::config::{DiagnosticPolicy, PushConfig, TelegramConfig};
use status_watcher::diagnostics::TelegramDiagnosticReporter;
use status_watcher::fanout::{ChannelTally, NotificationFanout};
use status_watcher::plugins::{TelegramClient, TelegramNotifier};
use status_watcher::FetchOrchestrator;

const SEND_MESSAGE: &str = "/botTOKEN/sendMessage";

fn telegram(server: &MockServer) -> TelegramClient {
    TelegramClient::new(&TelegramConfig {
        token: Some("TOKEN".to_string()),
        api_base: server.uri(),
        retry_attempts: 3,
    })
    .unwrap()
}

fn ok_message(id: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true, "result": { "message_id": id } }))
}

#[tokio::test]
async fn test_unknown_chat_does_not_stop_delivery_to_others() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_MESSAGE))
        .and(body_partial_json(serde_json::json!({ "chat_id": "42" })))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "ok": false, "description": "Bad Request: chat not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_MESSAGE))
        .and(body_partial_json(serde_json::json!({ "chat_id": "43", "parse_mode": "Markdown" })))
        .respond_with(ok_message(7))
        .expect(1)
        .mount(&server)
        .await;

    let store = create_test_store().await?;
    store.add_subscriber("42", "123456").await?;
    store.add_subscriber("43", "123456").await?;

    let fanout = NotificationFanout::new(
        store.clone(),
        Arc::new(TelegramNotifier::new(telegram(&server))),
        None,
        &PushConfig::default(),
    );
    let report = fanout.dispatch("123456", &entries(2)).await;

    assert_eq!(report.subscribers, 2);
    assert_eq!(report.chat, ChannelTally { sent: 1, failed: 1 });
    Ok(())
}

#[tokio::test]
async fn test_chat_delivery_retries_server_errors() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_MESSAGE))
        .respond_with(ResponseTemplate::new(502).set_body_json(serde_json::json!({ "ok": false })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_MESSAGE))
        .respond_with(ok_message(8))
        .mount(&server)
        .await;

    let store = create_test_store().await?;
    store.add_subscriber("42", "123456").await?;
    let fanout = NotificationFanout::new(
        store,
        Arc::new(TelegramNotifier::new(telegram(&server))),
        None,
        &PushConfig::default(),
    );

    let report = fanout.dispatch("123456", &entries(1)).await;
    assert_eq!(report.chat, ChannelTally { sent: 1, failed: 0 });
    Ok(())
}

#[tokio::test]
async fn test_exhausted_fetch_reports_to_operator_chat() -> anyhow::Result<()> {
    let status = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&status)
        .await;

    let telegram_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_MESSAGE))
        .and(body_partial_json(serde_json::json!({ "chat_id": "admin" })))
        .respond_with(ok_message(9))
        .expect(1)
        .mount(&telegram_server)
        .await;

    let config = get_test_config(&status.uri());
    let orchestrator = FetchOrchestrator::new(
        Arc::new(status_watcher::fetcher::PrimaryFetcher::new(config.target)?),
        Arc::new(FailingBrowser::default()),
        Arc::new(FixedProxies(vec![proxy("http://proxy1:8080")])),
        Arc::new(TelegramDiagnosticReporter::new(telegram(&telegram_server), "admin")),
        DiagnosticPolicy::FinalAttemptOnly,
    );

    let result = orchestrator.check("123456", true).await;
    assert_eq!(result, Err(FetchFailure::Exhausted { attempts: 3 }));
    Ok(())
}

#[tokio::test]
async fn test_operator_chat_outage_does_not_change_fetch_result() -> anyhow::Result<()> {
    let status = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&status)
        .await;

    let telegram_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({ "ok": false, "description": "Forbidden" })))
        .mount(&telegram_server)
        .await;

    let browser = Arc::new(FailingBrowser::default());
    let config = get_test_config(&status.uri());
    let orchestrator = FetchOrchestrator::new(
        Arc::new(status_watcher::fetcher::PrimaryFetcher::new(config.target)?),
        browser.clone(),
        Arc::new(FixedProxies(vec![proxy("http://proxy1:8080"), proxy("http://proxy2:8080")])),
        Arc::new(TelegramDiagnosticReporter::new(telegram(&telegram_server), "admin")),
        DiagnosticPolicy::EveryAttempt,
    );

    let result = orchestrator.check("123456", true).await;

    assert_eq!(result, Err(FetchFailure::Exhausted { attempts: 4 }));
    assert_eq!(browser.attempts.lock().unwrap().len(), 3);
    Ok(())
}
