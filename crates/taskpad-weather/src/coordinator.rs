use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::WeatherError;
use crate::model::{Weather, WeatherQuery};
use crate::provider::WeatherProvider;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag for one in-flight lookup.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Retries are caller-driven; this only bounds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Whether a failure on `attempt` (0-based) may be followed by another.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Keeps at most one lookup in flight: starting a new one cancels the old.
#[derive(Debug)]
pub struct LookupCoordinator<P> {
    provider: P,
    timeout: Duration,
    retry: RetryPolicy,
    current: Mutex<Option<CancelToken>>,
}

impl<P: WeatherProvider> LookupCoordinator<P> {
    pub fn new(provider: P, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            provider,
            timeout,
            retry,
            current: Mutex::new(None),
        }
    }

    /// Whether the UI should offer a retry for `error` raised on `attempt`.
    pub fn can_retry(&self, error: &WeatherError, attempt: u32) -> bool {
        error.is_retryable() && self.retry.can_retry(attempt)
    }

    #[tracing::instrument(skip(self, query), fields(query = %query))]
    pub async fn lookup(&self, query: WeatherQuery, attempt: u32) -> Result<Weather, WeatherError> {
        if !self.retry.allows(attempt) {
            return Err(WeatherError::RetriesExhausted(self.retry.max_retries));
        }

        let token = self.begin();
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Err(WeatherError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.provider.fetch(&query)) => {
                res.unwrap_or(Err(WeatherError::Timeout))
            }
        };
        self.finish(&token);

        if token.is_cancelled() {
            debug!("lookup superseded");
            return Err(WeatherError::Cancelled);
        }
        match &outcome {
            Ok(weather) => info!(location = %weather.location, "weather loaded"),
            Err(err) => debug!(error = %err, "weather lookup failed"),
        }
        outcome
    }

    /// Free-text city input. Blank input cancels whatever is in flight.
    pub async fn lookup_city(&self, raw: &str, attempt: u32) -> Result<Weather, WeatherError> {
        match WeatherQuery::city(raw) {
            Ok(query) => self.lookup(query, attempt).await,
            Err(err) => {
                self.cancel_current();
                Err(err)
            }
        }
    }

    pub fn cancel_current(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }

    pub fn in_flight(&self) -> bool {
        self.current.lock().is_some()
    }

    fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        let previous = self.current.lock().replace(token.clone());
        if let Some(previous) = previous {
            debug!("cancelling previous lookup");
            previous.cancel();
        }
        token
    }

    fn finish(&self, token: &CancelToken) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.same_as(token)) {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_bounds() {
        let policy = RetryPolicy { max_retries: 3 };
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }

    #[tokio::test]
    async fn cancelled_token_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
