//! Network boundary to the WattTime API.
//!
//! [`ForecastBackend`] is the only place that knows the upstream wire shape.
//! [`WattTimeBackend`] is the reqwest implementation; every call it makes
//! (login and forecast, retries included) is written to the audit sink
//! unless the request was cancelled first.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use carbon_core::audit::truncate_body;
use carbon_core::{AuditSink, ForecastCallRecord, RequestContext, SignalError};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::parse::parse_forecast;
use crate::{ForecastPoint, Result, WattTimeConfig};

/// Outcome of one forecast fetch
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastFetch {
    Points(Vec<ForecastPoint>),
    /// 401: the token was rejected
    Unauthorized,
    /// Any other non-success status (e.g. 403 when the plan lacks forecasts)
    Unavailable { status: u16 },
}

#[async_trait]
pub trait ForecastBackend: Send + Sync {
    /// Obtain a fresh bearer token
    async fn login(&self, ctx: &RequestContext) -> Result<String>;

    /// Fetch the forecast series for `zone` covering `horizon_hours`
    async fn fetch_forecast(
        &self,
        token: &str,
        zone: &str,
        horizon_hours: u32,
        ctx: &RequestContext,
    ) -> Result<ForecastFetch>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// What came back from one HTTP exchange
struct Exchange {
    status: u16,
    body: Option<String>,
    error: Option<String>,
}

impl Exchange {
    fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Zone-level details of a call, for the audit record
struct CallTarget<'a> {
    zone: Option<&'a str>,
    horizon_hours: Option<u32>,
}

/// reqwest client for `GET /login` and `GET /v3/forecast`
pub struct WattTimeBackend {
    config: WattTimeConfig,
    client: reqwest::Client,
    audit: Arc<dyn AuditSink>,
}

impl WattTimeBackend {
    pub fn new(config: WattTimeConfig, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_sec))
            .build()
            .map_err(|e| SignalError::Http(e.to_string()))?;

        Ok(Self {
            config,
            client,
            audit,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: reqwest::Request) -> Exchange {
        let response = match self.client.execute(request).await {
            Ok(r) => r,
            Err(e) => {
                return Exchange {
                    status: 0,
                    body: None,
                    error: Some(e.to_string()),
                }
            }
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => Exchange {
                status,
                body: Some(body),
                error: None,
            },
            Err(e) => Exchange {
                status,
                body: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn record(
        &self,
        ctx: &RequestContext,
        url: &str,
        target: CallTarget<'_>,
        exchange: &Exchange,
        started: Instant,
    ) {
        let record = ForecastCallRecord {
            method: "GET".to_string(),
            request_url: url.to_string(),
            zone: target.zone.map(str::to_string),
            signal_type: target.zone.map(|_| self.config.signal_type.clone()),
            horizon_hours: target.horizon_hours,
            status_code: exchange.status,
            success: exchange.is_success(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            response_body: exchange.body.as_deref().map(truncate_body),
            error: exchange.error.clone(),
            created_utc: Utc::now(),
            request_id: ctx.correlation_id,
        };
        self.audit.log_call(record).await;
    }
}

#[async_trait]
impl ForecastBackend for WattTimeBackend {
    async fn login(&self, ctx: &RequestContext) -> Result<String> {
        let request = self
            .client
            .get(self.url("login"))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .build()
            .map_err(|e| SignalError::Http(e.to_string()))?;
        let url = request.url().to_string();

        let started = Instant::now();
        let exchange = ctx.guard(self.send(request)).await?;
        self.record(
            ctx,
            &url,
            CallTarget {
                zone: None,
                horizon_hours: None,
            },
            &exchange,
            started,
        )
        .await;

        if let Some(error) = exchange.error {
            return Err(SignalError::LoginFailed(error));
        }
        if !(200..300).contains(&exchange.status) {
            return Err(SignalError::LoginFailed(format!(
                "login returned status {}",
                exchange.status
            )));
        }

        exchange
            .body
            .as_deref()
            .and_then(|body| serde_json::from_str::<LoginResponse>(body).ok())
            .and_then(|r| r.token)
            .ok_or_else(|| SignalError::LoginFailed("login response had no token".to_string()))
    }

    async fn fetch_forecast(
        &self,
        token: &str,
        zone: &str,
        horizon_hours: u32,
        ctx: &RequestContext,
    ) -> Result<ForecastFetch> {
        let horizon = horizon_hours.to_string();
        let request = self
            .client
            .get(self.url("v3/forecast"))
            .query(&[
                ("region", zone),
                ("signal_type", self.config.signal_type.as_str()),
                ("horizon_hours", horizon.as_str()),
            ])
            .bearer_auth(token)
            .build()
            .map_err(|e| SignalError::Http(e.to_string()))?;
        let url = request.url().to_string();

        let started = Instant::now();
        let exchange = ctx.guard(self.send(request)).await?;
        self.record(
            ctx,
            &url,
            CallTarget {
                zone: Some(zone),
                horizon_hours: Some(horizon_hours),
            },
            &exchange,
            started,
        )
        .await;

        if let Some(error) = exchange.error {
            return Err(SignalError::Http(error));
        }

        match exchange.status {
            401 => Ok(ForecastFetch::Unauthorized),
            s if (200..300).contains(&s) => Ok(ForecastFetch::Points(parse_forecast(
                exchange.body.as_deref().unwrap_or_default(),
            ))),
            status => {
                debug!(
                    zone = %zone,
                    status,
                    body = exchange.body.as_deref().unwrap_or_default(),
                    "forecast unavailable"
                );
                Ok(ForecastFetch::Unavailable { status })
            }
        }
    }
}
