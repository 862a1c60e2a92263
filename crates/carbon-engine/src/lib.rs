//! Carbon-Aware Advice Engine
//!
//! Picks the (cloud, region, time) with the lowest marginal carbon
//! intensity among a job's candidate locations.
//!
//! # Modes
//!
//! | Mode | Query per candidate | Winner |
//! |------|---------------------|--------|
//! | `run_now` | point intensity now | lowest point |
//! | `run_now_batch` | mean over `[now, now + batch]` | lowest mean |
//! | `schedule_at` | best point in `[now, until]` | lowest per-candidate best |
//! | `schedule_at_batch` | best `batch`-wide window in `[from, until]` | lowest window mean |
//!
//! Candidates without a usable value (missing, non-finite or ≤ 0) are
//! dropped. If none remain the configured fallback location is returned
//! without comparison metrics. Ties within 1e-6 go to the caller's cloud
//! preference order.

use carbon_core::SignalError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod candidates;
pub mod engine;
pub mod selector;

pub use engine::{AdviceEngine, DecisionMode};
pub use selector::pick_best;

/// Batch durations must be a multiple of this
pub const BATCH_STEP_MINUTES: u32 = 5;

/// Longest batch accepted (5 hours)
pub const MAX_BATCH_MINUTES: u32 = 300;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdviseError {
    #[error("batchDurationMinutes must be a multiple of 5 (got {0})")]
    BatchNotMultipleOfStep(u32),
    #[error("batchDurationMinutes cannot exceed 300 (got {0})")]
    BatchTooLong(u32),
    #[error(
        "No valid cloud/region mappings for: {0}. \
         Use exact region IDs (e.g., azure:eastus, gcp:us-east1, aws:us-east-1)."
    )]
    NoMappedCandidates(String),
    #[error("signal provider error: {0}")]
    Signal(#[from] SignalError),
}

impl AdviseError {
    /// Caller must fix the request
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AdviseError::BatchNotMultipleOfStep(_)
                | AdviseError::BatchTooLong(_)
                | AdviseError::NoMappedCandidates(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdviseError>;

/// 0 means single-point; otherwise a multiple of 5 up to 300
pub fn validate_batch(minutes: u32) -> Result<()> {
    if minutes % BATCH_STEP_MINUTES != 0 {
        return Err(AdviseError::BatchNotMultipleOfStep(minutes));
    }
    if minutes > MAX_BATCH_MINUTES {
        return Err(AdviseError::BatchTooLong(minutes));
    }
    Ok(())
}

/// Engine defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cloud used when the job names none
    pub default_cloud: String,
    /// Region used when the policy names none
    pub default_region: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_cloud: "gcp".to_string(),
            default_region: "us-east1".to_string(),
        }
    }
}
