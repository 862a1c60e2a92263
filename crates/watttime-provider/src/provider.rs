//! [`SignalSource`] backed by WattTime forecasts.

use std::sync::Arc;

use async_trait::async_trait;
use carbon_core::{
    AuditSink, CarbonSignal, Clock, RequestContext, SignalError, SignalSource, SystemClock,
    WindowPick,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::backend::{ForecastBackend, ForecastFetch, WattTimeBackend};
use crate::token::TokenCache;
use crate::window;
use crate::{ForecastPoint, Result, WattTimeConfig};

pub const SOURCE_NOW: &str = "watttime.v3.forecast@now";
pub const SOURCE_AT: &str = "watttime.v3.forecast@at";

pub struct WattTimeSignals {
    backend: Arc<dyn ForecastBackend>,
    tokens: TokenCache,
    clock: Arc<dyn Clock>,
}

impl WattTimeSignals {
    pub fn new(backend: Arc<dyn ForecastBackend>, token_ttl_minutes: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            tokens: TokenCache::new(token_ttl_minutes, clock.clone()),
            clock,
        }
    }

    /// HTTP-backed provider on the system clock
    pub fn from_config(config: WattTimeConfig, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let ttl = config.token_ttl_minutes();
        let backend = WattTimeBackend::new(config, audit)?;
        Ok(Self::new(Arc::new(backend), ttl, Arc::new(SystemClock)))
    }

    /// Valid bearer token, logging in if needed. Hosts call this once at
    /// start-up to warm the cache.
    pub async fn ensure_token(&self, ctx: &RequestContext) -> Result<String> {
        self.tokens.ensure(ctx, || self.backend.login(ctx)).await
    }

    /// Forecast points for `zone`; empty when upstream has none for us.
    /// A 401 forces one fresh login and one retry.
    async fn forecast_window(
        &self,
        zone: &str,
        horizon_hours: u32,
        ctx: &RequestContext,
    ) -> Result<Vec<ForecastPoint>> {
        let token = self.ensure_token(ctx).await?;
        let first = self
            .backend
            .fetch_forecast(&token, zone, horizon_hours, ctx)
            .await?;

        let fetch = match first {
            ForecastFetch::Unauthorized => {
                warn!(zone = %zone, "forecast returned 401, refreshing token");
                let fresh = self
                    .tokens
                    .refresh_after_rejection(&token, ctx, || self.backend.login(ctx))
                    .await?;
                self.backend
                    .fetch_forecast(&fresh, zone, horizon_hours, ctx)
                    .await?
            }
            other => other,
        };

        match fetch {
            ForecastFetch::Points(points) => Ok(points),
            ForecastFetch::Unavailable { status } => {
                debug!(zone = %zone, status, horizon_hours, "no forecast available");
                Ok(Vec::new())
            }
            ForecastFetch::Unauthorized => Err(SignalError::Unauthorized),
        }
    }
}

#[async_trait]
impl SignalSource for WattTimeSignals {
    async fn signal_at(
        &self,
        zone: &str,
        at: DateTime<Utc>,
        ctx: &RequestContext,
    ) -> Result<Option<CarbonSignal>> {
        let now = self.clock.now();
        let future = window::is_future(at, now);
        let horizon = window::point_horizon_hours(at, now);

        let points = self.forecast_window(zone, horizon, ctx).await?;
        let Some(point) = window::point_at(&points, at, now) else {
            debug!(zone = %zone, at = %at, "no usable signal");
            return Ok(None);
        };

        Ok(Some(CarbonSignal {
            zone: zone.to_string(),
            timestamp: at,
            intensity: point.value,
            is_marginal: true,
            forecast_horizon_min: Some(((at - now).num_seconds() as f64 / 60.0).round() as i64),
            source: if future { SOURCE_AT } else { SOURCE_NOW }.to_string(),
        }))
    }

    async fn best_until(
        &self,
        zone: &str,
        target: DateTime<Utc>,
        ctx: &RequestContext,
    ) -> Result<WindowPick> {
        let now = self.clock.now();
        let horizon = window::best_until_horizon_hours(target, now);

        let points = self.forecast_window(zone, horizon, ctx).await?;
        Ok(match window::best_until(&points, target.max(now)) {
            Some(p) => WindowPick {
                value: Some(p.value),
                at: Some(p.start),
                horizon_hours: horizon,
            },
            None => WindowPick::empty(horizon),
        })
    }

    async fn batch_average_now(
        &self,
        zone: &str,
        minutes: u32,
        ctx: &RequestContext,
    ) -> Result<Option<f64>> {
        if minutes == 0 {
            return Ok(None);
        }
        let horizon = window::batch_now_horizon_hours(minutes);
        let points = self.forecast_window(zone, horizon, ctx).await?;
        Ok(window::batch_average(&points, self.clock.now(), minutes))
    }

    async fn best_batch_window(
        &self,
        zone: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        minutes: u32,
        ctx: &RequestContext,
    ) -> Result<WindowPick> {
        if minutes == 0 {
            return Ok(WindowPick::empty(0));
        }
        let now = self.clock.now();
        let (from, until) = window::clamp_window(now, from, until);
        let horizon = window::batch_window_horizon_hours(until, now);

        let points = self.forecast_window(zone, horizon, ctx).await?;
        Ok(match window::best_batch_window(&points, from, until, minutes) {
            Some((avg, start)) => WindowPick {
                value: Some(avg),
                at: Some(start),
                horizon_hours: horizon,
            },
            None => WindowPick::empty(horizon),
        })
    }
}
