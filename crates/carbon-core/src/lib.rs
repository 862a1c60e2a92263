//! Carbon-Aware Core Contracts
//!
//! Records flowing between the decision engine, the signal provider and
//! the host application, plus the collaborator traits they meet at.
//!
//! # Units
//!
//! | Where | Unit |
//! |-------|------|
//! | `CarbonSignal::intensity`, `WindowPick::value` | lbs/MWh (provider native) |
//! | `AdviceResult`, audit records | g/kWh |
//!
//! Conversion happens once, in the engine, via [`units::lbs_per_mwh_to_g_per_kwh`].

use chrono::{DateTime, Duration, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub mod audit;
pub mod clock;
pub mod collaborators;
pub mod context;
pub mod units;

pub use audit::{
    audit_sink_from_config, AdviceCandidateRecord, AdviceRecord, AuditConfig, AuditSink,
    ForecastCallRecord, JsonlAuditSink, MemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{DispatchTarget, RegionResolver, SignalSource};
pub use context::{CancelHandle, CancelSignal, Cancelled, RequestContext};

/// Forecast interval width used by the upstream service
pub const SLOT_MINUTES: i64 = 5;

/// Errors raised by the signal provider at the network boundary.
///
/// "No data" is never an error; it is `Ok(None)` / an empty [`WindowPick`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("forecast service rejected credentials after a fresh login")]
    Unauthorized,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for SignalError {
    fn from(_: Cancelled) -> Self {
        SignalError::Cancelled
    }
}

/// Errors raised by workload dispatch targets
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("dispatch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for DispatchError {
    fn from(_: Cancelled) -> Self {
        DispatchError::Cancelled
    }
}

/// A concrete cloud + region candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSpec {
    pub cloud: String,
    pub region: String,
}

impl LocationSpec {
    pub fn new(cloud: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            region: region.into(),
        }
    }

    /// Case-insensitive identity used for deduplication
    pub fn key(&self) -> (String, String) {
        (self.cloud.to_lowercase(), self.region.to_lowercase())
    }

    pub fn is_blank(&self) -> bool {
        self.cloud.trim().is_empty() || self.region.trim().is_empty()
    }
}

impl std::fmt::Display for LocationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.cloud, self.region)
    }
}

/// Operating mode. Anything other than `schedule_at` (any case) is `run_now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    #[default]
    RunNow,
    ScheduleAt,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::RunNow => "run_now",
            Mode::ScheduleAt => "schedule_at",
        }
    }
}

impl From<String> for Mode {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("schedule_at") {
            Mode::ScheduleAt
        } else {
            Mode::RunNow
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

/// Legacy `cloud` field: a single name or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudField {
    One(String),
    Many(Vec<String>),
}

/// The workload: which clouds it may run in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clouds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudField>,
}

impl JobSpec {
    pub fn with_clouds<I, S>(clouds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clouds: clouds.into_iter().map(Into::into).collect(),
            cloud: None,
        }
    }

    /// `clouds` if non-empty, else the legacy `cloud` field, else empty
    pub fn effective_clouds(&self) -> Vec<String> {
        if !self.clouds.is_empty() {
            return self.clouds.clone();
        }
        match &self.cloud {
            Some(CloudField::One(c)) => vec![c.clone()],
            Some(CloudField::Many(list)) => list.clone(),
            None => Vec::new(),
        }
    }
}

/// How and when to place the job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub mode: Mode,
    /// 0 / absent = single point; otherwise a positive multiple of 5, at most 300
    #[serde(default)]
    pub batch_duration_minutes: Option<u32>,
    #[serde(default)]
    pub schedule_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub schedule_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_regions: Vec<String>,
    /// Explicit pairs; take priority over `preferred_regions` when non-empty
    #[serde(default)]
    pub preferred_locations: Vec<LocationSpec>,
    #[serde(default)]
    pub fallback_region: Option<String>,
    /// Ordered tie-break list of cloud names
    #[serde(default)]
    pub cloud_preference: Vec<String>,
}

impl PolicySpec {
    pub fn batch_minutes(&self) -> u32 {
        self.batch_duration_minutes.unwrap_or(0)
    }

    pub fn is_schedule(&self) -> bool {
        self.mode == Mode::ScheduleAt
    }

    /// Schedule window `[from, until]`; until is forced to from+5min when not after from
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self.schedule_from.unwrap_or(now);
        let until = self
            .schedule_until
            .unwrap_or(from + Duration::minutes(SLOT_MINUTES));
        if until <= from {
            (from, from + Duration::minutes(SLOT_MINUTES))
        } else {
            (from, until)
        }
    }
}

/// Host request envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    #[serde(default)]
    pub policy: PolicySpec,
    #[serde(default)]
    pub job: JobSpec,
}

/// A single point observation for a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSignal {
    pub zone: String,
    pub timestamp: DateTime<Utc>,
    /// Marginal intensity in lbs/MWh
    pub intensity: f64,
    pub is_marginal: bool,
    pub forecast_horizon_min: Option<i64>,
    pub source: String,
}

/// Best value (point or window average) found for a zone, with where it starts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowPick {
    pub value: Option<f64>,
    pub at: Option<DateTime<Utc>>,
    /// Forecast horizon that was requested, for diagnostics
    pub horizon_hours: u32,
}

impl WindowPick {
    pub fn empty(horizon_hours: u32) -> Self {
        Self {
            value: None,
            at: None,
            horizon_hours,
        }
    }
}

/// The decision handed back to the caller.
///
/// All intensities are g/kWh. The two saving figures against the highest
/// candidate are derived, never stored; they are still emitted on serialization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceResult {
    pub cloud: String,
    pub region: String,
    pub when: DateTime<Utc>,
    pub rationale: String,
    pub estimated_intensity_g_per_kwh: Option<f64>,
    #[serde(default)]
    pub highest_emission_cloud: Option<String>,
    #[serde(default)]
    pub highest_emission_region: Option<String>,
    #[serde(default)]
    pub highest_emission_g_per_kwh: Option<f64>,
    #[serde(default)]
    pub average_emission_g_per_kwh: Option<f64>,
    #[serde(default)]
    pub average_estimated_saving_percent: Option<f64>,
    #[serde(default)]
    pub best_window_cloud: Option<String>,
    #[serde(default)]
    pub best_window_region: Option<String>,
    #[serde(default)]
    pub best_window_moer_g_per_kwh: Option<f64>,
    #[serde(default)]
    pub best_window_when: Option<DateTime<Utc>>,
}

impl AdviceResult {
    /// A result with no comparison metrics
    pub fn fallback(location: &LocationSpec, when: DateTime<Utc>, rationale: String) -> Self {
        Self {
            cloud: location.cloud.clone(),
            region: location.region.clone(),
            when,
            rationale,
            estimated_intensity_g_per_kwh: None,
            highest_emission_cloud: None,
            highest_emission_region: None,
            highest_emission_g_per_kwh: None,
            average_emission_g_per_kwh: None,
            average_estimated_saving_percent: None,
            best_window_cloud: None,
            best_window_region: None,
            best_window_moer_g_per_kwh: None,
            best_window_when: None,
        }
    }

    pub fn location(&self) -> LocationSpec {
        LocationSpec::new(self.cloud.clone(), self.region.clone())
    }

    /// Absolute saving against the highest-emission candidate
    pub fn estimated_saving_g_per_kwh(&self) -> Option<f64> {
        match (self.highest_emission_g_per_kwh, self.estimated_intensity_g_per_kwh) {
            (Some(highest), Some(selected)) => Some(highest - selected),
            _ => None,
        }
    }

    /// Percent cleaner than the highest-emission candidate
    pub fn estimated_saving_percent(&self) -> Option<f64> {
        match (self.highest_emission_g_per_kwh, self.estimated_intensity_g_per_kwh) {
            (Some(highest), Some(selected)) if highest > 0.0 => {
                Some(100.0 * (highest - selected) / highest)
            }
            _ => None,
        }
    }
}

impl Serialize for AdviceResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AdviceResult", 16)?;
        s.serialize_field("cloud", &self.cloud)?;
        s.serialize_field("region", &self.region)?;
        s.serialize_field("when", &self.when)?;
        s.serialize_field("rationale", &self.rationale)?;
        s.serialize_field("estimatedIntensityGPerKwh", &self.estimated_intensity_g_per_kwh)?;
        s.serialize_field("highestEmissionCloud", &self.highest_emission_cloud)?;
        s.serialize_field("highestEmissionRegion", &self.highest_emission_region)?;
        s.serialize_field("highestEmissionGPerKwh", &self.highest_emission_g_per_kwh)?;
        s.serialize_field("averageEmissionGPerKwh", &self.average_emission_g_per_kwh)?;
        s.serialize_field(
            "averageEstimatedSavingPercent",
            &self.average_estimated_saving_percent,
        )?;
        s.serialize_field("bestWindowCloud", &self.best_window_cloud)?;
        s.serialize_field("bestWindowRegion", &self.best_window_region)?;
        s.serialize_field("bestWindowMoerGPerKwh", &self.best_window_moer_g_per_kwh)?;
        s.serialize_field("bestWindowWhen", &self.best_window_when)?;
        s.serialize_field("estimatedSavingGPerKwh", &self.estimated_saving_g_per_kwh())?;
        s.serialize_field("estimatedSavingPercent", &self.estimated_saving_percent())?;
        s.end()
    }
}
