//! Reload-and-reapply retries around conflicting writes.
//!
//! The retried operation runs again from its start, so anything it did before
//! the failing write happens again: it must be safe to run more than once.

use crate::config::RetryPolicy;
use crate::core::{LockError, Result};
use crate::locking::Entity;
use log::warn;
use std::future::Future;
use std::pin::Pin;

/// Runs `operation` until it stops raising a stale conflict or the policy runs out.
///
/// Use this form when the operation loads everything it touches itself.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Err(err @ LockError::Stale { .. }) => {
                backoff_or_give_up(policy, attempt, err).await?;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

/// Like [`with_retry`], but calls `reload` on `state` before every retry.
pub async fn with_retry_reloading<S, T, R, F>(
    policy: &RetryPolicy,
    state: &mut S,
    mut reload: R,
    mut operation: F,
) -> Result<T>
where
    R: for<'a> FnMut(&'a mut S) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>,
    F: for<'a> FnMut(&'a mut S) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
{
    let mut attempt = 1u32;
    loop {
        match operation(state).await {
            Err(err @ LockError::Stale { .. }) => {
                backoff_or_give_up(policy, attempt, err).await?;
                reload(state).await?;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

/// Sleeps before the next attempt, or turns `err` into `RetryExhausted`.
async fn backoff_or_give_up(policy: &RetryPolicy, attempt: u32, err: LockError) -> Result<()> {
    if attempt > policy.max_retries {
        return Err(err.exhausted(attempt));
    }
    let backoff = policy.backoff(attempt);
    warn!(
        "retry on conflict (attempt {} of {}): {} (backoff={}ms)",
        attempt,
        policy.max_retries.saturating_add(1),
        err,
        backoff.as_millis()
    );
    if !backoff.is_zero() {
        tokio::time::sleep(backoff).await;
    }
    Ok(())
}

impl Entity {
    /// Retries `operation` on this handle, reloading it before each retry.
    pub async fn with_locking<T, F>(&mut self, max_retries: u32, operation: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut Entity) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        self.with_locking_policy(&RetryPolicy::new(max_retries), operation)
            .await
    }

    pub async fn with_locking_policy<T, F>(&mut self, policy: &RetryPolicy, operation: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut Entity) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        with_retry_reloading(policy, self, |entity| Box::pin(entity.reload()), operation).await
    }
}
