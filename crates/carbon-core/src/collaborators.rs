//! Seams between the decision engine and the pieces it consumes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::RequestContext;
use crate::{AdviceResult, CarbonSignal, DispatchError, JobSpec, SignalError, WindowPick};

/// Maps (cloud, region) to the grid zone used by the signal provider
pub trait RegionResolver: Send + Sync {
    /// Case-insensitive on both keys; `None` for unknown pairs
    fn resolve(&self, cloud: &str, region: &str) -> Option<String>;

    /// All regions grouped by cloud, each group sorted case-insensitively
    fn list_all(&self) -> BTreeMap<String, Vec<String>>;
}

/// Carbon-intensity queries for a zone. Values are native lbs/MWh.
///
/// "No data" is `Ok(None)` or an empty [`WindowPick`], never an error.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Point intensity at `at` (earliest point when `at` is not in the future)
    async fn signal_at(
        &self,
        zone: &str,
        at: DateTime<Utc>,
        ctx: &RequestContext,
    ) -> Result<Option<CarbonSignal>, SignalError>;

    /// Minimum point whose start is at or before `target`
    async fn best_until(
        &self,
        zone: &str,
        target: DateTime<Utc>,
        ctx: &RequestContext,
    ) -> Result<WindowPick, SignalError>;

    /// Mean of the intervals overlapping `[now, now + minutes]`
    async fn batch_average_now(
        &self,
        zone: &str,
        minutes: u32,
        ctx: &RequestContext,
    ) -> Result<Option<f64>, SignalError>;

    /// Lowest-mean window of `minutes` that fits inside `[from, until]`
    async fn best_batch_window(
        &self,
        zone: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        minutes: u32,
        ctx: &RequestContext,
    ) -> Result<WindowPick, SignalError>;
}

/// Triggers execution of a job at the advised location
#[async_trait]
pub trait DispatchTarget: Send + Sync {
    /// Returns an opaque dispatch id. Targets for another cloud skip and
    /// return a `skipped-...` id instead of failing.
    async fn schedule(
        &self,
        advice: &AdviceResult,
        job: &JobSpec,
        ctx: &RequestContext,
    ) -> Result<String, DispatchError>;
}
