//! Shared bearer-token cache.
//!
//! One instance per process. Readers get a still-valid token without
//! blocking each other; when the token is missing or expired exactly one
//! caller performs the login while the others wait on `refresh` and then
//! pick up the stored result.

use std::future::Future;
use std::sync::Arc;

use carbon_core::{Clock, RequestContext};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::{Result, MIN_TOKEN_CACHE_MINUTES};

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenCache {
    ttl: Duration,
    state: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl TokenCache {
    pub fn new(ttl_minutes: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes.max(MIN_TOKEN_CACHE_MINUTES)),
            state: RwLock::new(None),
            refresh: Mutex::new(()),
            clock,
        }
    }

    /// Token if one is cached and not yet expired
    pub async fn current(&self) -> Option<String> {
        let now = self.clock.now();
        self.state
            .read()
            .await
            .as_ref()
            .filter(|c| now < c.expires_at)
            .map(|c| c.token.clone())
    }

    /// Cached token, or the result of `login` if none is valid
    ///
    /// Waiting behind another caller's login is abandoned when `ctx` is cancelled.
    pub async fn ensure<F, Fut>(&self, ctx: &RequestContext, login: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let _guard = ctx.guard(self.refresh.lock()).await?;
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let token = login().await?;
        self.store(token.clone()).await;
        Ok(token)
    }

    /// Force a new login after `stale` was rejected upstream, unless another
    /// caller already replaced it.
    pub async fn refresh_after_rejection<F, Fut>(
        &self,
        stale: &str,
        ctx: &RequestContext,
        login: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let _guard = ctx.guard(self.refresh.lock()).await?;
        if let Some(token) = self.current().await {
            if token != stale {
                return Ok(token);
            }
        }

        let token = login().await?;
        self.store(token.clone()).await;
        Ok(token)
    }

    async fn store(&self, token: String) {
        let expires_at = self.clock.now() + self.ttl;
        *self.state.write().await = Some(CachedToken { token, expires_at });
        info!(refresh_at = %expires_at, "WattTime token acquired");
    }
}
