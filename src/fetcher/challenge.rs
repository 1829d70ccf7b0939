//! Anti-bot challenge detection and bounded recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const CHALLENGE_HOST: &str = "challenges.cloudflare.com";
pub const INTERSTITIAL_TITLE: &str = "Just a moment";
pub const CHALLENGE_MARKERS: [&str; 3] = ["cf-browser-verification", "cf-chl-", "cf-captcha-container"];
pub const BLOCKED_STATUSES: [u16; 3] = [403, 503, 429];
pub const CLEARANCE_COOKIE: &str = "cf_clearance";

/// What the browser sees right after a navigation.
#[derive(Debug, Clone, Default)]
pub struct PageObservation {
    pub url: String,
    pub title: String,
    pub content: String,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeSignal {
    ChallengeHost,
    InterstitialTitle,
    ContentMarker(&'static str),
    BlockedStatus(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Wait until the tab leaves the challenge host, then navigate again.
    AwaitNavigationAway,
    /// Poll for the clearance cookie, then navigate again.
    AwaitClearanceCookie,
}

impl ChallengeSignal {
    pub fn recovery(&self) -> RecoveryStrategy {
        match self {
            ChallengeSignal::ChallengeHost => RecoveryStrategy::AwaitNavigationAway,
            _ => RecoveryStrategy::AwaitClearanceCookie,
        }
    }
}

pub fn classify(page: &PageObservation) -> Option<ChallengeSignal> {
    if page.url.contains(CHALLENGE_HOST) {
        return Some(ChallengeSignal::ChallengeHost);
    }
    if page.title.contains(INTERSTITIAL_TITLE) {
        return Some(ChallengeSignal::InterstitialTitle);
    }
    if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| page.content.contains(*m)) {
        return Some(ChallengeSignal::ContentMarker(marker));
    }
    match page.status {
        Some(status) if BLOCKED_STATUSES.contains(&status) => Some(ChallengeSignal::BlockedStatus(status)),
        _ => None,
    }
}

/// The two browser facts recovery needs to poll.
pub trait ChallengePage {
    fn current_url(&self) -> String;
    fn has_cookie(&self, name: &str) -> bool;
}

/// Poll `done` every `poll` until it holds, `bound` elapses, or `cancel` is raised.
pub fn wait_until<F>(bound: Duration, poll: Duration, cancel: &AtomicBool, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + bound;
    loop {
        if done() {
            return true;
        }
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

/// Whether the page has moved past the challenge for `strategy`.
pub fn is_resolved<P: ChallengePage + ?Sized>(page: &P, strategy: RecoveryStrategy) -> bool {
    match strategy {
        RecoveryStrategy::AwaitNavigationAway => !page.current_url().contains(CHALLENGE_HOST),
        RecoveryStrategy::AwaitClearanceCookie => page.has_cookie(CLEARANCE_COOKIE),
    }
}

/// Poll until `strategy` resolves within `bound`. `on_poll` runs before each
/// check with the zero-based poll number.
pub fn await_recovery<P, F>(
    page: &P,
    strategy: RecoveryStrategy,
    bound: Duration,
    poll: Duration,
    cancel: &AtomicBool,
    mut on_poll: F,
) -> bool
where
    P: ChallengePage + ?Sized,
    F: FnMut(u32),
{
    let mut polls = 0u32;
    wait_until(bound, poll, cancel, || {
        on_poll(polls);
        polls += 1;
        is_resolved(page, strategy)
    })
}
