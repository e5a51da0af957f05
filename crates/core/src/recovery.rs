//! Failure isolation and retry primitives.
//!
//! [`safe_exec`] runs an operation on its own task so that both an error and
//! a panic come back as a value. [`with_error_recovery`] retries a fallible
//! operation with linear backoff.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::metrics as m;

/// How an isolated operation failed.
#[derive(Debug, thiserror::Error)]
pub enum SafeExecError<E> {
    /// The operation returned an error.
    #[error("{operation} failed: {error}")]
    Failed { operation: String, error: E },

    /// The operation panicked.
    #[error("{operation} panicked: {message}")]
    Panicked { operation: String, message: String },

    /// The operation's task was cancelled before completing.
    #[error("{operation} was cancelled")]
    Cancelled { operation: String },
}

impl<E> SafeExecError<E> {
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }
}

/// Run `operation` on its own task and capture errors and panics.
///
/// The task is aborted if the returned future is dropped before completion,
/// so callers may race it against a cancellation signal.
pub async fn safe_exec<T, E, F>(operation: &str, fut: F) -> Result<T, SafeExecError<E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let task = AbortOnDrop(tokio::spawn(fut));
    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(operation, error = %e, "operation failed");
            Err(SafeExecError::Failed {
                operation: operation.to_owned(),
                error: e,
            })
        }
        Err(join) => Err(classify_join_error(operation, join)),
    }
}

fn classify_join_error<E>(operation: &str, join: JoinError) -> SafeExecError<E> {
    if join.is_panic() {
        let message = panic_message(join.into_panic());
        error!(operation, panic = %message, "operation panicked");
        SafeExecError::Panicked {
            operation: operation.to_owned(),
            message,
        }
    } else {
        warn!(operation, "operation cancelled");
        SafeExecError::Cancelled {
            operation: operation.to_owned(),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Retry budget for [`with_error_recovery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; never less than 1.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `backoff * n` before the next try.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no delay.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }
}

/// Retry `operation` until it succeeds or the policy is exhausted.
///
/// Returns the last error when every attempt fails.
pub async fn with_error_recovery<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    attempt_fn: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    with_error_recovery_if(operation, policy, |_| true, attempt_fn).await
}

/// [`with_error_recovery`] that gives up at once on errors `retryable`
/// rejects.
pub async fn with_error_recovery_if<T, E, F, Fut, R>(
    operation: &str,
    policy: &RetryPolicy,
    retryable: R,
    mut attempt_fn: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 1;

    loop {
        match attempt_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "operation recovered");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && retryable(&e) => {
                let backoff = policy.backoff * attempt;
                debug!(
                    operation,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );
                metrics::counter!(m::RETRIES_TOTAL, m::LABEL_OPERATION => operation.to_owned())
                    .increment(1);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(operation, attempts = attempt, error = %e, "operation failed after retries");
                return Err(e);
            }
        }
    }
}
