use super::*;
use rstest::rstest;
use std::collections::VecDeque;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use status_watcher::config::DiagnosticPolicy;
use status_watcher::fetcher::challenge::{classify, ChallengeSignal, PageObservation, RecoveryStrategy};
use status_watcher::fetcher::{PrimaryFetcher, StatusSource};
use status_watcher::models::FetchResult;
use status_watcher::FetchOrchestrator;

async fn status_server(status: u16, body: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .and(query_param("sessionId", "123456"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    server
}

fn orchestrator(
    server: &MockServer,
    browser: Arc<dyn BrowserSource>,
    proxies: Vec<ProxyCandidate>,
    sink: Arc<RecordingSink>,
    policy: DiagnosticPolicy,
) -> FetchOrchestrator {
    let config = get_test_config(&server.uri());
    let target = format!("{}{}", server.uri(), STATUS_PATH);
    let primary = PrimaryFetcher::new(config.target).unwrap();
    FetchOrchestrator::new(
        Arc::new(primary),
        browser,
        Arc::new(FixedProxies(proxies)),
        sink,
        policy,
    )
    .with_diagnostics(true, target)
}

/// Browser tier that plays back one result per attempt and leaves no page
/// evidence, the way timeouts and launch failures do.
struct ScriptedBrowser {
    results: Mutex<VecDeque<FetchResult>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptedBrowser {
    fn new(results: Vec<FetchResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BrowserSource for ScriptedBrowser {
    async fn fetch(&self, _identifier: &str, attempt: &Attempt) -> AttemptOutcome {
        self.attempts.lock().unwrap().push(attempt.clone());
        let result = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchFailure::Transient("no scripted result".to_string())));
        AttemptOutcome { result, evidence: None }
    }
}

#[tokio::test]
async fn test_primary_success_skips_browser() -> anyhow::Result<()> {
    let server = status_server(200, status_body(&entries(2))).await;
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = orchestrator(
        &server,
        Arc::new(UnreachableBrowser),
        vec![proxy("http://10.0.0.1:8080")],
        sink.clone(),
        DiagnosticPolicy::EveryAttempt,
    );

    let result = orchestrator.check("123456", true).await;
    assert_eq!(result, Ok(entries(2)));

    let latest = orchestrator.check("123456", false).await;
    assert_eq!(latest, Ok(vec![entry(2)]));
    assert!(sink.reports.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_first_proxy_success_ends_chain() -> anyhow::Result<()> {
    let server = status_server(503, String::new()).await;
    let browser = Arc::new(ScriptedBrowser::new(vec![Ok(entries(3))]));
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = orchestrator(
        &server,
        browser.clone(),
        vec![proxy("http://proxy1:8080"), proxy("http://proxy2:8080")],
        sink.clone(),
        DiagnosticPolicy::EveryAttempt,
    );

    let result = orchestrator.check("123456", true).await;

    assert_eq!(result, Ok(entries(3)));
    let attempts = browser.attempts.lock().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].proxy_url(), Some("http://proxy1:8080"));
    assert!(sink.reports.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unresolved_challenge_moves_to_next_attempt() -> anyhow::Result<()> {
    let server = status_server(503, String::new()).await;
    let browser = Arc::new(ScriptedBrowser::new(vec![
        Err(FetchFailure::Challenge("AwaitClearanceCookie not resolved within bound".to_string())),
        Ok(entries(1)),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = orchestrator(
        &server,
        browser.clone(),
        vec![proxy("http://proxy1:8080")],
        sink.clone(),
        DiagnosticPolicy::EveryAttempt,
    );

    let result = orchestrator.check("123456", true).await;

    assert_eq!(result, Ok(entries(1)));
    let attempts = browser.attempts.lock().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1], Attempt::Direct);

    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].failure.contains("challenge"));
    Ok(())
}

#[rstest]
#[case(DiagnosticPolicy::EveryAttempt, 3)]
#[case(DiagnosticPolicy::FinalAttemptOnly, 1)]
#[tokio::test]
async fn test_timed_out_attempts_still_reach_the_operator(
    #[case] policy: DiagnosticPolicy,
    #[case] expected_reports: usize,
) -> anyhow::Result<()> {
    let server = status_server(503, String::new()).await;
    let timed_out = || Err(FetchFailure::Transient("attempt exceeded 85s".to_string()));
    let browser = Arc::new(ScriptedBrowser::new(vec![timed_out(), timed_out(), timed_out()]));
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = orchestrator(
        &server,
        browser,
        vec![proxy("http://proxy1:8080"), proxy("http://proxy2:8080")],
        sink.clone(),
        policy,
    );

    let result = orchestrator.check("123456", true).await;

    assert_eq!(result, Err(FetchFailure::Exhausted { attempts: 4 }));
    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), expected_reports);
    for report in reports.iter() {
        assert!(report.screenshot.is_none());
        assert!(report.failure.contains("attempt exceeded"));
        assert!(report.target_url.ends_with(STATUS_PATH));
    }
    assert_eq!(reports.last().map(|r| r.attempt.as_str()), Some("direct connection"));
    Ok(())
}

#[rstest]
#[case(DiagnosticPolicy::EveryAttempt, 3)]
#[case(DiagnosticPolicy::FinalAttemptOnly, 1)]
#[tokio::test]
async fn test_exhausted_chain_reports_diagnostics(
    #[case] policy: DiagnosticPolicy,
    #[case] expected_reports: usize,
) -> anyhow::Result<()> {
    let server = status_server(503, "<html>Service Unavailable</html>".to_string()).await;
    let browser = Arc::new(FailingBrowser::default());
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = orchestrator(
        &server,
        browser.clone(),
        vec![proxy("http://proxy1:8080"), proxy("http://proxy2:8080")],
        sink.clone(),
        policy,
    );

    let result = orchestrator.check("123456", true).await;

    assert_eq!(result, Err(FetchFailure::Exhausted { attempts: 4 }));
    let attempts = browser.attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].proxy_url(), Some("http://proxy1:8080"));
    assert_eq!(attempts[1].proxy_url(), Some("http://proxy2:8080"));
    assert_eq!(attempts[2], Attempt::Direct);

    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), expected_reports);
    assert_eq!(reports.last().map(|r| r.attempt.as_str()), Some("direct connection"));
    Ok(())
}

#[tokio::test]
async fn test_primary_html_body_is_not_success() -> anyhow::Result<()> {
    let server = status_server(200, "<html><title>Just a moment...</title></html>".to_string()).await;
    let primary = PrimaryFetcher::new(get_test_config(&server.uri()).target)?;

    let result = primary.fetch("123456").await;
    assert!(matches!(result, Err(FetchFailure::Malformed(_))));
    Ok(())
}

#[test]
fn test_challenge_classification_triggers() {
    let blocked = PageObservation {
        status: Some(429),
        ..PageObservation::default()
    };
    assert_eq!(classify(&blocked), Some(ChallengeSignal::BlockedStatus(429)));

    let host = PageObservation {
        url: "https://challenges.cloudflare.com/turnstile".to_string(),
        ..PageObservation::default()
    };
    assert_eq!(
        classify(&host).map(|s| s.recovery()),
        Some(RecoveryStrategy::AwaitNavigationAway)
    );

    let clean = PageObservation {
        url: format!("https://target{}", STATUS_PATH),
        title: "Status".to_string(),
        content: "{\"StatusInfo\":[]}".to_string(),
        status: Some(200),
    };
    assert_eq!(classify(&clean), None);
}
