//! Deadline-bounded execution of provider calls.
//!
//! The work runs on its own tokio task while the caller waits on the
//! join handle for at most the deadline. On timeout the task is aborted:
//! cancellation is cooperative, so the in-flight future is dropped at its
//! next `.await` (closing the HTTP connection). Anything the work touches
//! must be owned by the task or shared behind `Arc`, since the caller has
//! already moved on by then.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CallError, ProviderError, ProviderErrorKind};

/// Run `work` with a wall-clock deadline.
///
/// Returns the work's own result when it finishes in time, `CallError::Timeout`
/// otherwise. A panicking worker is reported as an internal provider error;
/// nothing here panics or blocks past the deadline.
pub async fn run_with_deadline<F, T>(operation: &str, deadline: Duration, work: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>> + Send + 'static,
    T: Send + 'static,
{
    let started = Instant::now();
    let mut handle = tokio::spawn(work);

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(result)) => {
            debug!(
                operation = operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "Call finished within deadline"
            );
            result
        }
        Ok(Err(join_error)) => {
            warn!(operation = operation, error = %join_error, "Call worker failed");
            Err(CallError::Provider(ProviderError::new(
                ProviderErrorKind::Internal,
                format!("{} worker failed: {}", operation, join_error),
            )))
        }
        Err(_) => {
            handle.abort();
            warn!(
                operation = operation,
                deadline_ms = deadline.as_millis() as u64,
                "Call exceeded deadline, abandoning worker"
            );
            Err(CallError::Timeout { deadline })
        }
    }
}
