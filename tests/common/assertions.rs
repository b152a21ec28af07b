//! Waiting helpers for end-to-end tests

use std::time::Duration;

/// Result of waiting for a condition
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The condition became true
    Reached,
    /// Timeout waiting for the condition
    Timeout,
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> WaitResult
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    match result {
        Ok(()) => WaitResult::Reached,
        Err(_) => WaitResult::Timeout,
    }
}

/// Panic with `what` unless `condition` holds within `timeout`
pub async fn assert_eventually<F>(timeout: Duration, what: &str, condition: F)
where
    F: FnMut() -> bool,
{
    assert_eq!(
        wait_until(timeout, condition).await,
        WaitResult::Reached,
        "timed out waiting for {what}"
    );
}
