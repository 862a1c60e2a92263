//! Audit Records and Sinks
//!
//! Write-only log of outbound forecast calls and placement decisions.
//!
//! | Sink | Behaviour |
//! |------|-----------|
//! | [`NoopAuditSink`] | discards everything (audit disabled) |
//! | [`TracingAuditSink`] | one structured log line per record |
//! | [`JsonlAuditSink`] | appends tagged JSON Lines to a file |
//! | [`MemoryAuditSink`] | keeps records in memory for inspection |
//!
//! Sinks are best effort. A failed write is logged and swallowed; it never
//! reaches the caller of the engine.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Response bodies longer than this are cut before being recorded
pub const MAX_RESPONSE_BODY_CHARS: usize = 100_000;

/// One outbound call to the forecast service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastCallRecord {
    pub method: String,
    pub request_url: String,
    pub zone: Option<String>,
    pub signal_type: Option<String>,
    pub horizon_hours: Option<u32>,
    /// 0 when no response was received
    pub status_code: u16,
    pub success: bool,
    pub duration_ms: u64,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub request_id: Option<Uuid>,
}

/// One placement decision, values in g/kWh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceRecord {
    pub mode: String,
    pub target_when: DateTime<Utc>,
    pub preferred_clouds_csv: Option<String>,
    pub preferred_regions_csv: Option<String>,

    pub selected_cloud: String,
    pub selected_region: String,
    pub selected_when: Option<DateTime<Utc>>,
    pub selected_g_per_kwh: Option<f64>,
    pub rationale: String,

    pub highest_emission_cloud: Option<String>,
    pub highest_emission_region: Option<String>,
    pub highest_emission_g_per_kwh: Option<f64>,
    pub estimated_saving_g_per_kwh: Option<f64>,
    pub estimated_saving_percent: Option<f64>,
    pub average_emission_g_per_kwh: Option<f64>,
    pub average_estimated_saving_percent: Option<f64>,

    pub best_window_cloud: Option<String>,
    pub best_window_region: Option<String>,
    pub best_window_g_per_kwh: Option<f64>,
    pub best_window_when: Option<DateTime<Utc>>,

    pub created_utc: DateTime<Utc>,
    pub request_id: Option<Uuid>,
}

/// Raw per-candidate data behind a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceCandidateRecord {
    pub cloud: String,
    pub region: String,
    pub zone: String,
    /// Point or batch-average value at the decision time (run_now modes)
    pub value_at_target: Option<f64>,
    /// Best value found up to the target (schedule modes)
    pub best_value_until_target: Option<f64>,
    pub best_value_at: Option<DateTime<Utc>>,
}

/// Append-only audit boundary. Implementations must not fail the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_call(&self, record: ForecastCallRecord);
    async fn log_decision(&self, record: AdviceRecord, candidates: Vec<AdviceCandidateRecord>);
}

/// Cut a response body to [`MAX_RESPONSE_BODY_CHARS`] characters
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_RESPONSE_BODY_CHARS) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

/// Audit configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
    /// When false every record is discarded
    pub enable_database_logging: bool,
    /// JSON Lines destination; `-` routes records to the log instead
    pub log_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enable_database_logging: true,
            log_path: PathBuf::from("carbon-audit.jsonl"),
        }
    }
}

impl AuditConfig {
    /// Defaults overridden by `AUDIT_ENABLE_DATABASE_LOGGING` and `AUDIT_LOG_PATH`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("AUDIT_ENABLE_DATABASE_LOGGING") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => config.enable_database_logging = false,
                "1" | "true" | "yes" | "on" => config.enable_database_logging = true,
                other => warn!(value = other, "ignoring unrecognised AUDIT_ENABLE_DATABASE_LOGGING"),
            }
        }
        if let Ok(path) = std::env::var("AUDIT_LOG_PATH") {
            if !path.trim().is_empty() {
                config.log_path = PathBuf::from(path);
            }
        }
        config
    }
}

/// Pick the sink for a configuration
pub fn audit_sink_from_config(config: &AuditConfig) -> Arc<dyn AuditSink> {
    if !config.enable_database_logging {
        info!("audit logging disabled");
        Arc::new(NoopAuditSink)
    } else if config.log_path.as_os_str() == "-" {
        info!("audit logging to tracing");
        Arc::new(TracingAuditSink)
    } else {
        info!(path = %config.log_path.display(), "audit logging to JSON Lines");
        Arc::new(JsonlAuditSink::new(&config.log_path))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn log_call(&self, _record: ForecastCallRecord) {}
    async fn log_decision(&self, _record: AdviceRecord, _candidates: Vec<AdviceCandidateRecord>) {}
}

/// Emits records as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_call(&self, record: ForecastCallRecord) {
        info!(
            target: "carbon_audit",
            method = %record.method,
            url = %record.request_url,
            zone = record.zone.as_deref().unwrap_or("-"),
            horizon_hours = record.horizon_hours,
            status = record.status_code,
            success = record.success,
            duration_ms = record.duration_ms,
            error = record.error.as_deref().unwrap_or(""),
            request_id = ?record.request_id,
            "forecast call"
        );
    }

    async fn log_decision(&self, record: AdviceRecord, candidates: Vec<AdviceCandidateRecord>) {
        info!(
            target: "carbon_audit",
            mode = %record.mode,
            cloud = %record.selected_cloud,
            region = %record.selected_region,
            g_per_kwh = record.selected_g_per_kwh,
            candidates = candidates.len(),
            request_id = ?record.request_id,
            "{}",
            record.rationale
        );
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum AuditEntry<'a> {
    ForecastCall(&'a ForecastCallRecord),
    Decision {
        record: &'a AdviceRecord,
        candidates: &'a [AdviceCandidateRecord],
    },
}

/// Appends one JSON object per record to a file
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &AuditEntry<'_>) {
        let mut line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn log_call(&self, record: ForecastCallRecord) {
        self.append(&AuditEntry::ForecastCall(&record)).await;
    }

    async fn log_decision(&self, record: AdviceRecord, candidates: Vec<AdviceCandidateRecord>) {
        self.append(&AuditEntry::Decision {
            record: &record,
            candidates: &candidates,
        })
        .await;
    }
}

/// In-process capture of everything logged
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    calls: Mutex<Vec<ForecastCallRecord>>,
    decisions: Mutex<Vec<(AdviceRecord, Vec<AdviceCandidateRecord>)>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ForecastCallRecord> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn decisions(&self) -> Vec<(AdviceRecord, Vec<AdviceCandidateRecord>)> {
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log_call(&self, record: ForecastCallRecord) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    async fn log_decision(&self, record: AdviceRecord, candidates: Vec<AdviceCandidateRecord>) {
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((record, candidates));
    }
}
