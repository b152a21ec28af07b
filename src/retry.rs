//! Retry logic with exponential backoff
//!
//! Used around collaborator network calls (search, NZB fetch, daemon RPC).
//! Control-plane sends are never retried; the pulse cycle covers those.

use crate::config::RetryConfig;
use crate::error::{CollaboratorError, Error, TransportError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused or reset connections) return `true`.
/// Permanent failures (bad credentials, malformed replies, missing files) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Transport(TransportError::ConnectionLost) => true,
            Error::Collaborator(CollaboratorError::Search(msg))
            | Error::Collaborator(CollaboratorError::Daemon(msg)) => {
                msg.contains("timeout") || msg.contains("busy") || msg.contains("503")
            }
            Error::Transport(_)
            | Error::Collaborator(_)
            | Error::Config { .. }
            | Error::Codec(_)
            | Error::Parse(_)
            | Error::Serialization(_)
            | Error::Other(_) => false,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// Makes at most `1 + config.max_attempts` calls. A permanent error, or the
/// last transient one, is returned as is.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut retry = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::debug!(retries = retry, "call recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if retry >= config.max_attempts {
            tracing::warn!(error = %err, calls = retry + 1, "giving up after retries");
            return Err(err);
        }

        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %err,
            retry = retry + 1,
            of = config.max_attempts,
            wait_ms = wait.as_millis(),
            "transient failure, retrying"
        );
        tokio::time::sleep(wait).await;
        delay = next_delay(delay, config);
        retry += 1;
    }
}

fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    delay
        .mul_f64(config.backoff_multiplier.max(1.0))
        .min(config.max_delay)
}

/// Scale `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    delay.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..=1.0))
}
