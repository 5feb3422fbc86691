use crate::domain::gateway::GatewayError;
use crate::domain::ports::SharedClock;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

/// A bearer token and the instant it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayCredential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for GatewayCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Process-wide cache for the gateway bearer token.
///
/// The lock is held across the refresh, so concurrent callers that find the
/// token stale wait for a single credential exchange instead of each running
/// their own.
pub struct TokenCache {
    credential: Mutex<Option<GatewayCredential>>,
    clock: SharedClock,
    skew: Duration,
}

impl TokenCache {
    pub fn new(clock: SharedClock, skew: Duration) -> Self {
        Self {
            credential: Mutex::new(None),
            clock,
            skew,
        }
    }

    /// Returns a token valid for at least `skew`, running `refresh` if needed.
    ///
    /// A failed refresh leaves the cache empty.
    pub async fn get_valid_token<F, Fut>(&self, refresh: F) -> Result<String, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GatewayCredential, GatewayError>>,
    {
        let mut cached = self.credential.lock().await;
        if let Some(credential) = cached.as_ref()
            && self.clock.now() < credential.expires_at - self.skew
        {
            return Ok(credential.access_token.clone());
        }

        *cached = None;
        debug!("Refreshing gateway access token");
        let fresh = refresh().await?;
        let token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Drops the cached token if it is still `stale`.
    ///
    /// A token refreshed by another caller in the meantime is kept.
    pub async fn invalidate(&self, stale: &str) {
        let mut cached = self.credential.lock().await;
        if cached
            .as_ref()
            .is_some_and(|credential| credential.access_token == stale)
        {
            *cached = None;
        }
    }

    pub async fn current(&self) -> Option<GatewayCredential> {
        self.credential.lock().await.clone()
    }
}
