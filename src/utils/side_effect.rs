//! Wrapper for side effects whose failure must never reach the caller.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// Await `fut`, logging and swallowing both errors and panics.
///
/// `label` names the effect ("diagnostic report", "telegram delivery") and
/// `subject` is the identifier or recipient it concerns.
pub async fn non_critical<F, T, E>(label: &str, subject: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(subject = %subject, "{} failed: {}", label, e);
            None
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(subject = %subject, "{} panicked: {}", label, message);
            None
        }
    }
}
