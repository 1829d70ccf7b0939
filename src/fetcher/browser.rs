use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use url::Url;

use super::challenge::{self, ChallengePage, ChallengeSignal, PageObservation, RecoveryStrategy};
use super::headers::in_app_fetch_headers;
use super::recording::SessionRecording;
use super::stealth::{in_page_fetch_script, stealth_script, visible_text, LAUNCH_ARGS};
use super::{cache_buster, parse_status_payload, target_url, AttemptOutcome, BrowserSource};
use crate::config::{BrowserConfig, TargetConfig};
use crate::diagnostics::{self, DiagnosticEvidence};
use crate::models::{Attempt, FetchFailure, FetchResult};

const FRAME_QUALITY: u32 = 60;

/// A recording frame every this many challenge polls.
const WAIT_FRAME_EVERY: u32 = 3;

/// Headless Chrome tier. Each call runs one attempt on a blocking worker,
/// bounded by `BrowserConfig::attempt_budget`.
pub struct BrowserFetcher {
    browser: BrowserConfig,
    target: TargetConfig,
    workers: Arc<Semaphore>,
    capture_evidence: bool,
}

impl BrowserFetcher {
    pub fn new(browser: BrowserConfig, target: TargetConfig, capture_evidence: bool) -> Self {
        let workers = Arc::new(Semaphore::new(browser.max_workers.max(1)));
        Self {
            browser,
            target,
            workers,
            capture_evidence,
        }
    }
}

/// Raises the cancel flag when the awaiting side goes away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
enum WorkerExit {
    Finished(AttemptOutcome),
    Crashed(JoinError),
    /// Budget spent. `stopped` tells whether the worker unwound within the grace.
    TimedOut { stopped: bool },
}

/// Run `work` on a blocking thread for at most `budget`. On expiry `cancel`
/// is raised and the worker gets `grace` to finish its current step and
/// drop its browser before this returns.
async fn run_bounded<F>(work: F, cancel: &AtomicBool, budget: Duration, grace: Duration) -> WorkerExit
where
    F: FnOnce() -> AttemptOutcome + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(outcome)) => WorkerExit::Finished(outcome),
        Ok(Err(e)) => WorkerExit::Crashed(e),
        Err(_) => {
            cancel.store(true, Ordering::SeqCst);
            let stopped = tokio::time::timeout(grace, handle).await.is_ok();
            WorkerExit::TimedOut { stopped }
        }
    }
}

#[async_trait]
impl BrowserSource for BrowserFetcher {
    async fn fetch(&self, identifier: &str, attempt: &Attempt) -> AttemptOutcome {
        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return AttemptOutcome::failed(FetchFailure::Transient("browser pool closed".to_string())),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancel.clone());
        let job = AttemptJob {
            identifier: identifier.to_string(),
            attempt: attempt.clone(),
            browser: self.browser.clone(),
            target: self.target.clone(),
            capture_evidence: self.capture_evidence,
            cancel: cancel.clone(),
        };

        // The permit travels with the worker so an abandoned attempt keeps its
        // slot until the browser is actually torn down.
        let work = move || {
            let _permit = permit;
            job.run()
        };

        let budget = self.browser.attempt_budget();
        let grace = self.browser.teardown_grace();
        match run_bounded(work, &cancel, budget, grace).await {
            WorkerExit::Finished(outcome) => outcome,
            WorkerExit::Crashed(e) => {
                tracing::error!(identifier = %identifier, attempt = %attempt, "Browser worker crashed: {}", e);
                AttemptOutcome::failed(FetchFailure::Transient(format!("browser worker crashed: {}", e)))
            }
            WorkerExit::TimedOut { stopped } => {
                if stopped {
                    tracing::warn!(identifier = %identifier, attempt = %attempt, "Browser attempt exceeded {:?}", budget);
                } else {
                    tracing::error!(
                        identifier = %identifier,
                        attempt = %attempt,
                        "Browser attempt exceeded {:?} and did not stop within {:?}",
                        budget,
                        grace
                    );
                }
                AttemptOutcome::failed(FetchFailure::Transient(format!("attempt exceeded {:?}", budget)))
            }
        }
    }

    /// Waits for every worker slot, i.e. until no browser is left running.
    async fn settle(&self) {
        let slots = self.browser.max_workers.max(1) as u32;
        let grace = self.browser.teardown_grace();
        match tokio::time::timeout(grace, self.workers.acquire_many(slots)).await {
            Ok(_) => tracing::debug!("Browser workers idle"),
            Err(_) => tracing::error!("Browser workers still busy after {:?}", grace),
        }
    }
}

/// Browser process and its tab. Closing happens on drop, on every exit path.
struct BrowserSession {
    tab: Arc<Tab>,
    _browser: Browser,
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            tracing::debug!("Tab close failed: {}", e);
        }
    }
}

/// Tab operations an attempt performs once the tab is set up.
trait BrowserPage: ChallengePage {
    /// Navigate and wait for the load to settle.
    fn open(&self, url: &str) -> Result<()>;
    fn title(&self) -> String;
    fn content(&self) -> String;
    /// Evaluate `script`, awaiting its promise. `None` unless it yields a string.
    fn evaluate_text(&self, script: &str) -> Result<Option<String>>;
    fn snapshot(&self) -> Result<Vec<u8>>;
}

impl ChallengePage for Tab {
    fn current_url(&self) -> String {
        self.get_url()
    }

    fn has_cookie(&self, name: &str) -> bool {
        self.get_cookies()
            .map(|cookies| cookies.iter().any(|c| c.name == name))
            .unwrap_or(false)
    }
}

impl BrowserPage for Tab {
    fn open(&self, url: &str) -> Result<()> {
        self.navigate_to(url)?.wait_until_navigated()?;
        Ok(())
    }

    fn title(&self) -> String {
        self.get_title().unwrap_or_default()
    }

    fn content(&self) -> String {
        self.get_content().unwrap_or_default()
    }

    fn evaluate_text(&self, script: &str) -> Result<Option<String>> {
        let remote = self.evaluate(script, true)?;
        Ok(match remote.value {
            Some(serde_json::Value::String(text)) => Some(text),
            _ => None,
        })
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        self.capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(FRAME_QUALITY), None, true)
    }
}

/// Status and body of the latest navigation response for the status path.
#[derive(Default)]
struct CapturedResponse {
    status: Option<u16>,
    body: Option<String>,
}

type ResponseSlot = Arc<Mutex<CapturedResponse>>;

struct AttemptJob {
    identifier: String,
    attempt: Attempt,
    browser: BrowserConfig,
    target: TargetConfig,
    capture_evidence: bool,
    cancel: Arc<AtomicBool>,
}

impl AttemptJob {
    fn run(self) -> AttemptOutcome {
        let url = match target_url(&self.target.origin, &self.target.status_path, &self.identifier, cache_buster()) {
            Ok(url) => url,
            Err(e) => return AttemptOutcome::failed(FetchFailure::Malformed(format!("target url: {}", e))),
        };

        let mut recording = if self.browser.record_session {
            SessionRecording::new()
                .map_err(|e| tracing::debug!("Session recording unavailable: {}", e))
                .ok()
        } else {
            None
        };

        let session = match self.launch() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(identifier = %self.identifier, attempt = %self.attempt, "Browser launch failed: {}", e);
                return AttemptOutcome::failed(FetchFailure::Transient(format!("browser launch failed: {}", e)));
            }
        };

        let result = self.drive(&session.tab, &url, &mut recording);
        match result {
            Ok(entries) => {
                tracing::info!(
                    identifier = %self.identifier,
                    attempt = %self.attempt,
                    entries = entries.len(),
                    "Browser fetch succeeded"
                );
                AttemptOutcome {
                    result: Ok(entries),
                    evidence: None,
                }
            }
            Err(failure) => {
                tracing::warn!(identifier = %self.identifier, attempt = %self.attempt, "Browser fetch failed: {}", failure);
                let evidence = self
                    .capture_evidence
                    .then(|| self.evidence(&session.tab, &url, &failure, recording.take()));
                AttemptOutcome {
                    result: Err(failure),
                    evidence,
                }
            }
        }
    }

    fn evidence(
        &self,
        tab: &Tab,
        url: &Url,
        failure: &FetchFailure,
        mut recording: Option<SessionRecording>,
    ) -> DiagnosticEvidence {
        let mut evidence = DiagnosticEvidence::new(&self.identifier, &self.attempt, url.as_str(), failure);
        frame(&mut recording, tab, "failure");
        diagnostics::capture(tab, &mut evidence);
        evidence.recording = recording;
        evidence
    }

    fn launch(&self) -> Result<BrowserSession> {
        let args: Vec<&OsStr> = LAUNCH_ARGS.iter().map(OsStr::new).collect();
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .ignore_certificate_errors(true)
            .window_size(Some((self.browser.viewport_width, self.browser.viewport_height)))
            .idle_browser_timeout(self.browser.attempt_budget())
            .proxy_server(self.attempt.proxy_url())
            .path(self.browser.chrome_path.as_ref().map(PathBuf::from))
            .args(args)
            .build()
            .map_err(|e| anyhow!("Failed to create launch options: {}", e))?;

        let browser = Browser::new(options)?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(self.browser.navigation_timeout());
        Ok(BrowserSession { tab, _browser: browser })
    }

    /// Stealth, identity and headers; all before the first navigation.
    fn prepare(&self, tab: &Tab) -> Result<()> {
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: stealth_script(&self.browser.locale),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })?;

        let accept_language = format!("{},en;q=0.9", self.browser.locale);
        tab.set_user_agent(&self.browser.user_agent, Some(&accept_language), Some("MacIntel"))?;
        tab.call_method(Emulation::SetLocaleOverride {
            locale: Some(self.browser.locale.clone()),
        })?;
        tab.call_method(Emulation::SetTimezoneOverride {
            timezone_id: self.browser.timezone.clone(),
        })?;

        let headers = in_app_fetch_headers(&self.target.origin);
        let headers: HashMap<&str, &str> = headers.iter().map(|(name, value)| (*name, value.as_str())).collect();
        tab.set_extra_http_headers(headers)?;
        Ok(())
    }

    fn capture_responses(&self, tab: &Tab) -> Result<ResponseSlot> {
        let slot: ResponseSlot = Arc::default();
        let sink = slot.clone();
        let status_path = self.target.status_path.clone();

        tab.register_response_handling(
            "status-response",
            Box::new(move |params, fetch_body| {
                if !params.response.url.contains(&status_path) {
                    return;
                }
                let body = fetch_body()
                    .ok()
                    .filter(|b| !b.base_64_encoded)
                    .map(|b| b.body);
                if let Ok(mut captured) = sink.lock() {
                    captured.status = Some(params.response.status as u16);
                    captured.body = body;
                }
            }),
        )?;
        Ok(slot)
    }

    fn check_cancel(&self) -> Result<(), FetchFailure> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(FetchFailure::Transient("attempt cancelled".to_string()));
        }
        Ok(())
    }

    fn drive(&self, tab: &Tab, url: &Url, recording: &mut Option<SessionRecording>) -> FetchResult {
        self.prepare(tab)
            .map_err(|e| FetchFailure::Transient(format!("browser setup: {}", e)))?;
        let responses = self
            .capture_responses(tab)
            .map_err(|e| FetchFailure::Transient(format!("response capture: {}", e)))?;
        self.visit(tab, url, &responses, recording)
    }

    /// Navigate, get past a challenge if one shows up, then read the payload.
    fn visit<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        url: &Url,
        responses: &ResponseSlot,
        recording: &mut Option<SessionRecording>,
    ) -> FetchResult {
        frame(recording, page, "ready");

        self.check_cancel()?;
        let mut observed = self.navigate(page, url, responses)?;
        frame(recording, page, "navigated");

        if let Some(signal) = challenge::classify(&observed) {
            tracing::info!(identifier = %self.identifier, attempt = %self.attempt, "Challenge detected: {:?}", signal);
            self.recover(page, signal, recording)?;
            frame(recording, page, "challenge_cleared");

            self.check_cancel()?;
            observed = self.navigate(page, url, responses)?;
            frame(recording, page, "renavigated");

            if let Some(signal) = challenge::classify(&observed) {
                return Err(FetchFailure::Challenge(format!("still challenged after recovery: {:?}", signal)));
            }
        }

        self.check_cancel()?;
        self.retrieve(page, url, &observed, responses)
    }

    fn navigate<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        url: &Url,
        responses: &ResponseSlot,
    ) -> Result<PageObservation, FetchFailure> {
        if let Ok(mut captured) = responses.lock() {
            *captured = CapturedResponse::default();
        }

        page.open(url.as_str())
            .map_err(|e| FetchFailure::Transient(format!("navigation: {}", e)))?;

        let status = responses.lock().ok().and_then(|c| c.status);
        Ok(PageObservation {
            url: page.current_url(),
            title: page.title(),
            content: page.content(),
            status,
        })
    }

    fn recover<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        signal: ChallengeSignal,
        recording: &mut Option<SessionRecording>,
    ) -> Result<(), FetchFailure> {
        let strategy = signal.recovery();
        let bound = match strategy {
            RecoveryStrategy::AwaitNavigationAway => Duration::from_secs(self.browser.challenge_host_wait),
            RecoveryStrategy::AwaitClearanceCookie => Duration::from_secs(self.browser.clearance_wait),
        };
        let poll = Duration::from_millis(self.browser.poll_interval_ms);

        let resolved = challenge::await_recovery(page, strategy, bound, poll, &self.cancel, |n| {
            if n % WAIT_FRAME_EVERY == 0 {
                frame(recording, page, "challenge_wait");
            }
        });

        if resolved {
            tracing::info!(identifier = %self.identifier, "Challenge resolved via {:?}", strategy);
            return Ok(());
        }
        self.check_cancel()?;
        Err(FetchFailure::Challenge(format!("{:?} not resolved within bound", signal)))
    }

    /// In-page fetch, then the captured navigation body, then visible text.
    fn retrieve<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        url: &Url,
        observed: &PageObservation,
        responses: &ResponseSlot,
    ) -> FetchResult {
        match page.evaluate_text(&in_page_fetch_script(url.as_str())) {
            Ok(Some(body)) => match parse_status_payload(&body) {
                Ok(entries) => return Ok(entries),
                Err(e) => tracing::debug!(identifier = %self.identifier, "In-page fetch unusable: {}", e),
            },
            Ok(None) => tracing::debug!(identifier = %self.identifier, "In-page fetch returned no body"),
            Err(e) => tracing::debug!(identifier = %self.identifier, "In-page fetch failed: {}", e),
        }

        let captured_body = responses.lock().ok().and_then(|c| c.body.clone());
        if let Some(body) = captured_body {
            match parse_status_payload(&body) {
                Ok(entries) => return Ok(entries),
                Err(e) => tracing::debug!(identifier = %self.identifier, "Navigation body unusable: {}", e),
            }
        }

        let text = visible_text(&observed.content)
            .ok_or_else(|| FetchFailure::Malformed("rendered page has no visible text".to_string()))?;
        parse_status_payload(&text)
    }
}

/// Add a frame to the recording, if there is one. Capture failures are skipped.
fn frame<P: BrowserPage + ?Sized>(recording: &mut Option<SessionRecording>, page: &P, label: &str) {
    let Some(recording) = recording.as_mut() else {
        return;
    };
    if let Err(e) = page.snapshot().and_then(|jpeg| recording.push(label, &jpeg)) {
        tracing::debug!(label = %label, "Skipping recording frame: {}", e);
    }
}
