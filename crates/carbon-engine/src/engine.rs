//! Decision engine: candidates in, one placement out.

use std::sync::Arc;

use carbon_core::units::lbs_per_mwh_to_g_per_kwh;
use carbon_core::{
    AdviceCandidateRecord, AdviceRecord, AdviceResult, AuditSink, Clock, JobSpec, LocationSpec,
    PolicySpec, RegionResolver, RequestContext, SignalError, SignalSource,
};
use chrono::{DateTime, Local, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::candidates::{build_candidates, fallback_location};
use crate::selector::pick_best;
use crate::{validate_batch, AdviseError, EngineConfig, Result};

/// Query shape chosen from `(mode, batch)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    RunNow,
    RunNowBatch,
    ScheduleAt,
    ScheduleAtBatch,
}

impl DecisionMode {
    pub fn from_policy(policy: &PolicySpec) -> Self {
        match (policy.is_schedule(), policy.batch_minutes() > 0) {
            (false, false) => DecisionMode::RunNow,
            (false, true) => DecisionMode::RunNowBatch,
            (true, false) => DecisionMode::ScheduleAt,
            (true, true) => DecisionMode::ScheduleAtBatch,
        }
    }

    /// Name used in audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMode::RunNow => "run_now",
            DecisionMode::RunNowBatch => "run_now_batch",
            DecisionMode::ScheduleAt => "schedule_at",
            DecisionMode::ScheduleAtBatch => "schedule_at_batch",
        }
    }

    pub fn is_schedule(&self) -> bool {
        matches!(self, DecisionMode::ScheduleAt | DecisionMode::ScheduleAtBatch)
    }
}

/// Time frame of one decision
#[derive(Debug, Clone, Copy)]
struct Plan {
    mode: DecisionMode,
    minutes: u32,
    now: DateTime<Utc>,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl Plan {
    /// Decision time recorded for audit and used for fallbacks
    fn target(&self) -> DateTime<Utc> {
        if self.mode.is_schedule() {
            self.until
        } else {
            self.now
        }
    }
}

/// A candidate mapped to a zone and queried. `value` is lbs/MWh.
#[derive(Debug, Clone)]
struct Evaluated {
    location: LocationSpec,
    zone: String,
    value: Option<f64>,
    at: Option<DateTime<Utc>>,
}

impl Evaluated {
    fn usable(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite() && *v > 0.0)
    }
}

fn local_stamp(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d-%H:%M").to_string()
}

fn percent_below(reference: f64, selected: f64) -> Option<f64> {
    (reference > 0.0).then(|| 100.0 * (reference - selected) / reference)
}

fn csv(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(","))
}

pub struct AdviceEngine {
    resolver: Arc<dyn RegionResolver>,
    signals: Arc<dyn SignalSource>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AdviceEngine {
    pub fn new(
        resolver: Arc<dyn RegionResolver>,
        signals: Arc<dyn SignalSource>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver,
            signals,
            audit,
            clock,
            config,
        }
    }

    /// Choose where and when to run `job` under `policy`.
    ///
    /// Validation failures are returned before any network call. A signal
    /// error from any candidate aborts the whole decision.
    pub async fn advise(
        &self,
        job: &JobSpec,
        policy: &PolicySpec,
        ctx: &RequestContext,
    ) -> Result<AdviceResult> {
        let minutes = policy.batch_minutes();
        validate_batch(minutes)?;

        let now = self.clock.now();
        let (from, until) = policy.window(now);
        let plan = Plan {
            mode: DecisionMode::from_policy(policy),
            minutes,
            now,
            from,
            until,
        };

        let mut mapped = Vec::new();
        let mut unmapped = Vec::new();
        for location in build_candidates(job, policy, &self.config) {
            match self.resolver.resolve(&location.cloud, &location.region) {
                Some(zone) if !zone.trim().is_empty() => mapped.push((location, zone)),
                _ => unmapped.push(location.to_string()),
            }
        }
        if mapped.is_empty() {
            return Err(AdviseError::NoMappedCandidates(unmapped.join(", ")));
        }
        if !unmapped.is_empty() {
            warn!(unmapped = %unmapped.join(", "), "dropping candidates with no zone mapping");
        }

        debug!(mode = plan.mode.as_str(), candidates = mapped.len(), "evaluating candidates");
        let evaluated = try_join_all(
            mapped
                .into_iter()
                .map(|(location, zone)| self.evaluate(location, zone, &plan, ctx)),
        )
        .await?;

        if ctx.is_cancelled() {
            return Err(SignalError::Cancelled.into());
        }

        let (advice, record) = match self.select(&plan, job, policy, &evaluated) {
            Some(decided) => decided,
            None => self.fall_back(&plan, job, policy),
        };

        info!(
            mode = plan.mode.as_str(),
            cloud = %advice.cloud,
            region = %advice.region,
            when = %advice.when,
            g_per_kwh = advice.estimated_intensity_g_per_kwh,
            "advice ready"
        );

        let record = AdviceRecord {
            request_id: ctx.correlation_id,
            ..record
        };
        self.audit
            .log_decision(record, candidate_records(&plan, &evaluated))
            .await;

        Ok(advice)
    }

    async fn evaluate(
        &self,
        location: LocationSpec,
        zone: String,
        plan: &Plan,
        ctx: &RequestContext,
    ) -> std::result::Result<Evaluated, SignalError> {
        let (value, at) = match plan.mode {
            DecisionMode::RunNow => {
                let signal = self.signals.signal_at(&zone, plan.now, ctx).await?;
                (signal.map(|s| s.intensity), None)
            }
            DecisionMode::RunNowBatch => {
                let avg = self
                    .signals
                    .batch_average_now(&zone, plan.minutes, ctx)
                    .await?;
                (avg, None)
            }
            DecisionMode::ScheduleAt => {
                let pick = self.signals.best_until(&zone, plan.until, ctx).await?;
                (pick.value, pick.at)
            }
            DecisionMode::ScheduleAtBatch => {
                let pick = self
                    .signals
                    .best_batch_window(&zone, plan.from, plan.until, plan.minutes, ctx)
                    .await?;
                (pick.value, pick.at)
            }
        };

        if value.is_none() {
            debug!(cloud = %location.cloud, region = %location.region, zone = %zone, "no signal");
        }

        Ok(Evaluated {
            location,
            zone,
            value,
            at,
        })
    }

    /// Winner and comparison metrics, or `None` when nothing is usable
    fn select(
        &self,
        plan: &Plan,
        job: &JobSpec,
        policy: &PolicySpec,
        evaluated: &[Evaluated],
    ) -> Option<(AdviceResult, AdviceRecord)> {
        let usable: Vec<(&Evaluated, f64)> = evaluated
            .iter()
            .filter_map(|e| e.usable().map(|v| (e, v)))
            .collect();

        let winner = pick_best(
            &usable,
            |u| u.1,
            |u| u.0.location.cloud.as_str(),
            &policy.cloud_preference,
        )?;
        let highest = usable
            .iter()
            .fold(None, |acc: Option<&(&Evaluated, f64)>, u| match acc {
                Some(h) if h.1 >= u.1 => Some(h),
                _ => Some(u),
            })?;
        let average = usable.iter().map(|u| u.1).sum::<f64>() / usable.len() as f64;

        let selected_g = lbs_per_mwh_to_g_per_kwh(winner.1);
        let highest_g = lbs_per_mwh_to_g_per_kwh(highest.1);
        let average_g = lbs_per_mwh_to_g_per_kwh(average);

        let chosen = &winner.0.location;
        let when = if plan.mode.is_schedule() {
            winner.0.at.unwrap_or(plan.until)
        } else {
            plan.now
        };

        let rationale = match plan.mode {
            DecisionMode::RunNow => format!(
                "run_now: cleanest now is {chosen} ({selected_g:.1} g/kWh, via watttime.v3.forecast@now)"
            ),
            DecisionMode::RunNowBatch => format!(
                "run_now batch ({m} min): cleanest average over next {m} minutes is {chosen} ({selected_g:.1} g/kWh).",
                m = plan.minutes
            ),
            DecisionMode::ScheduleAt => format!(
                "schedule until: best window within [{}..{}] is {chosen} @ {} ({selected_g:.1} g/kWh, via watttime.v3.forecast@best-until). \
                 Savings vs candidates' best-until-target shown below.",
                local_stamp(plan.from),
                local_stamp(plan.until),
                local_stamp(when)
            ),
            DecisionMode::ScheduleAtBatch => format!(
                "schedule_until_batch: best {} min window within [{}..{}] is {chosen} starting at {} ({selected_g:.1} g/kWh avg, via watttime.v3.forecast@batch-best-until). \
                 Savings vs candidates' best batch windows shown below.",
                plan.minutes,
                local_stamp(plan.from),
                local_stamp(plan.until),
                local_stamp(when)
            ),
        };

        let best_window = plan.mode.is_schedule();
        let advice = AdviceResult {
            cloud: chosen.cloud.clone(),
            region: chosen.region.clone(),
            when,
            rationale: rationale.clone(),
            estimated_intensity_g_per_kwh: Some(selected_g),
            highest_emission_cloud: Some(highest.0.location.cloud.clone()),
            highest_emission_region: Some(highest.0.location.region.clone()),
            highest_emission_g_per_kwh: Some(highest_g),
            average_emission_g_per_kwh: Some(average_g),
            average_estimated_saving_percent: percent_below(average_g, selected_g),
            best_window_cloud: best_window.then(|| chosen.cloud.clone()),
            best_window_region: best_window.then(|| chosen.region.clone()),
            best_window_moer_g_per_kwh: best_window.then_some(selected_g),
            best_window_when: best_window.then_some(when),
        };

        let record = AdviceRecord {
            mode: plan.mode.as_str().to_string(),
            target_when: plan.target(),
            preferred_clouds_csv: csv(&job.effective_clouds()),
            preferred_regions_csv: csv(&policy.preferred_regions),
            selected_cloud: advice.cloud.clone(),
            selected_region: advice.region.clone(),
            selected_when: Some(when),
            selected_g_per_kwh: Some(selected_g),
            rationale,
            highest_emission_cloud: advice.highest_emission_cloud.clone(),
            highest_emission_region: advice.highest_emission_region.clone(),
            highest_emission_g_per_kwh: advice.highest_emission_g_per_kwh,
            estimated_saving_g_per_kwh: advice.estimated_saving_g_per_kwh(),
            estimated_saving_percent: advice.estimated_saving_percent(),
            average_emission_g_per_kwh: advice.average_emission_g_per_kwh,
            average_estimated_saving_percent: advice.average_estimated_saving_percent,
            best_window_cloud: advice.best_window_cloud.clone(),
            best_window_region: advice.best_window_region.clone(),
            best_window_g_per_kwh: advice.best_window_moer_g_per_kwh,
            best_window_when: advice.best_window_when,
            created_utc: self.clock.now(),
            request_id: None,
        };

        Some((advice, record))
    }

    fn fall_back(&self, plan: &Plan, job: &JobSpec, policy: &PolicySpec) -> (AdviceResult, AdviceRecord) {
        let location = fallback_location(job, policy, &self.config);
        let rationale = match plan.mode {
            DecisionMode::RunNow => {
                format!("run_now: no usable MOER for candidates; using fallback {location}")
            }
            DecisionMode::RunNowBatch => format!(
                "run_now batch ({} min): no usable MOER; using fallback {location}",
                plan.minutes
            ),
            DecisionMode::ScheduleAt => {
                format!("schedule_at: no best window found; using fallback {location}")
            }
            DecisionMode::ScheduleAtBatch => format!(
                "schedule_at(batch): no usable batch windows found; using fallback {location}"
            ),
        };
        warn!(mode = plan.mode.as_str(), fallback = %location, "no usable signal for any candidate");

        let when = plan.target();
        let advice = AdviceResult::fallback(&location, when, rationale.clone());
        let record = AdviceRecord {
            mode: plan.mode.as_str().to_string(),
            target_when: when,
            preferred_clouds_csv: csv(&job.effective_clouds()),
            preferred_regions_csv: csv(&policy.preferred_regions),
            selected_cloud: location.cloud,
            selected_region: location.region,
            selected_when: Some(when),
            selected_g_per_kwh: None,
            rationale,
            highest_emission_cloud: None,
            highest_emission_region: None,
            highest_emission_g_per_kwh: None,
            estimated_saving_g_per_kwh: None,
            estimated_saving_percent: None,
            average_emission_g_per_kwh: None,
            average_estimated_saving_percent: None,
            best_window_cloud: None,
            best_window_region: None,
            best_window_g_per_kwh: None,
            best_window_when: None,
            created_utc: self.clock.now(),
            request_id: None,
        };
        (advice, record)
    }
}

/// Per-candidate values in g/kWh; unusable values are recorded as `None`
fn candidate_records(plan: &Plan, evaluated: &[Evaluated]) -> Vec<AdviceCandidateRecord> {
    evaluated
        .iter()
        .map(|e| {
            let value = e.usable().map(lbs_per_mwh_to_g_per_kwh);
            let (at_target, until_target, at) = if plan.mode.is_schedule() {
                (None, value, e.at.filter(|_| value.is_some()))
            } else {
                (value, None, None)
            };
            AdviceCandidateRecord {
                cloud: e.location.cloud.clone(),
                region: e.location.region.clone(),
                zone: e.zone.clone(),
                value_at_target: at_target,
                best_value_until_target: until_target,
                best_value_at: at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carbon_core::{
        CancelHandle, CarbonSignal, ManualClock, MemoryAuditSink, WindowPick,
    };
    use chrono::{Duration, TimeZone};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 14, 10, 0, 0).unwrap()
    }

    struct FakeResolver(HashMap<(String, String), String>);

    impl FakeResolver {
        fn standard() -> Self {
            let rows = [
                ("gcp", "us-east1", "SC"),
                ("gcp", "us-west1", "BPA"),
                ("azure", "eastus", "PJM_ROANOKE"),
                ("azure", "westeurope", "NL"),
                ("aws", "us-east-1", "PJM_DC"),
            ];
            Self(
                rows.iter()
                    .map(|(c, r, z)| ((c.to_string(), r.to_string()), z.to_string()))
                    .collect(),
            )
        }
    }

    impl RegionResolver for FakeResolver {
        fn resolve(&self, cloud: &str, region: &str) -> Option<String> {
            self.0
                .get(&(cloud.to_lowercase(), region.to_lowercase()))
                .cloned()
        }

        fn list_all(&self) -> BTreeMap<String, Vec<String>> {
            BTreeMap::new()
        }
    }

    /// Per-zone canned answers in lbs/MWh
    #[derive(Default)]
    struct FakeSignals {
        values: HashMap<String, f64>,
        window_at: HashMap<String, DateTime<Utc>>,
        failing_zone: Option<(String, SignalError)>,
        calls: AtomicUsize,
    }

    impl FakeSignals {
        fn with(values: &[(&str, f64)]) -> Self {
            Self {
                values: values.iter().map(|(z, v)| (z.to_string(), *v)).collect(),
                ..Default::default()
            }
        }

        fn answer(&self, zone: &str, ctx: &RequestContext) -> std::result::Result<Option<f64>, SignalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ctx.is_cancelled() {
                return Err(SignalError::Cancelled);
            }
            if let Some((z, err)) = &self.failing_zone {
                if z == zone {
                    return Err(err.clone());
                }
            }
            Ok(self.values.get(zone).copied())
        }

        fn pick(&self, zone: &str, ctx: &RequestContext) -> std::result::Result<WindowPick, SignalError> {
            let value = self.answer(zone, ctx)?;
            Ok(WindowPick {
                value,
                at: value.and_then(|_| self.window_at.get(zone).copied()),
                horizon_hours: 1,
            })
        }
    }

    #[async_trait]
    impl SignalSource for FakeSignals {
        async fn signal_at(
            &self,
            zone: &str,
            at: DateTime<Utc>,
            ctx: &RequestContext,
        ) -> std::result::Result<Option<CarbonSignal>, SignalError> {
            Ok(self.answer(zone, ctx)?.map(|intensity| CarbonSignal {
                zone: zone.to_string(),
                timestamp: at,
                intensity,
                is_marginal: true,
                forecast_horizon_min: Some(0),
                source: "fake".to_string(),
            }))
        }

        async fn best_until(
            &self,
            zone: &str,
            _target: DateTime<Utc>,
            ctx: &RequestContext,
        ) -> std::result::Result<WindowPick, SignalError> {
            self.pick(zone, ctx)
        }

        async fn batch_average_now(
            &self,
            zone: &str,
            _minutes: u32,
            ctx: &RequestContext,
        ) -> std::result::Result<Option<f64>, SignalError> {
            self.answer(zone, ctx)
        }

        async fn best_batch_window(
            &self,
            zone: &str,
            _from: DateTime<Utc>,
            _until: DateTime<Utc>,
            _minutes: u32,
            ctx: &RequestContext,
        ) -> std::result::Result<WindowPick, SignalError> {
            self.pick(zone, ctx)
        }
    }

    fn make_engine(signals: FakeSignals) -> (Arc<FakeSignals>, Arc<MemoryAuditSink>, AdviceEngine) {
        let signals = Arc::new(signals);
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = AdviceEngine::new(
            Arc::new(FakeResolver::standard()),
            signals.clone(),
            audit.clone(),
            Arc::new(ManualClock::new(t0())),
            EngineConfig::default(),
        );
        (signals, audit, engine)
    }

    fn regions(list: &[&str]) -> Vec<String> {
        list.iter().map(|r| r.to_string()).collect()
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.unwrap_or(f64::NAN);
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    #[tokio::test]
    async fn test_run_now_picks_cleanest_and_converts_once() {
        let (_signals, audit, engine) = make_engine(FakeSignals::with(&[("SC", 1000.0), ("BPA", 500.0)]));
        let job = JobSpec::with_clouds(["gcp"]);
        let policy = PolicySpec {
            preferred_regions: regions(&["us-east1", "us-west1"]),
            ..Default::default()
        };
        let request_id = Uuid::new_v4();

        let advice = engine
            .advise(&job, &policy, &RequestContext::new(request_id))
            .await
            .unwrap();

        assert_eq!(advice.location(), LocationSpec::new("gcp", "us-west1"));
        assert_eq!(advice.when, t0());
        assert_close(advice.estimated_intensity_g_per_kwh, 226.796185);
        assert_close(advice.highest_emission_g_per_kwh, 453.59237);
        assert_eq!(advice.highest_emission_region.as_deref(), Some("us-east1"));
        assert_close(advice.estimated_saving_percent(), 50.0);
        assert_close(advice.average_emission_g_per_kwh, 340.1942775);
        assert_close(advice.average_estimated_saving_percent, 100.0 / 3.0);
        assert_eq!(advice.best_window_when, None);
        assert!(advice
            .rationale
            .starts_with("run_now: cleanest now is gcp:us-west1 (226.8 g/kWh"));

        let decisions = audit.decisions();
        assert_eq!(decisions.len(), 1);
        let (record, candidates) = &decisions[0];
        assert_eq!(record.mode, "run_now");
        assert_eq!(record.request_id, Some(request_id));
        assert_eq!(record.preferred_regions_csv.as_deref(), Some("us-east1,us-west1"));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].zone, "SC");
        assert_close(candidates[0].value_at_target, 453.59237);
    }

    #[tokio::test]
    async fn test_cloud_preference_breaks_ties() {
        for order in [["azure", "gcp"], ["gcp", "azure"]] {
            let (_s, _a, engine) =
                make_engine(FakeSignals::with(&[("PJM_ROANOKE", 700.0), ("SC", 700.0)]));
            let policy = PolicySpec {
                preferred_locations: vec![
                    LocationSpec::new(order[0], if order[0] == "gcp" { "us-east1" } else { "eastus" }),
                    LocationSpec::new(order[1], if order[1] == "gcp" { "us-east1" } else { "eastus" }),
                ],
                cloud_preference: regions(&["gcp"]),
                ..Default::default()
            };
            let advice = engine
                .advise(&JobSpec::default(), &policy, &RequestContext::detached())
                .await
                .unwrap();
            assert_eq!(advice.cloud, "gcp");
        }
    }

    #[tokio::test]
    async fn test_batch_validation_happens_before_queries() {
        for (minutes, expected) in [
            (7, AdviseError::BatchNotMultipleOfStep(7)),
            (305, AdviseError::BatchTooLong(305)),
        ] {
            let (signals, audit, engine) = make_engine(FakeSignals::with(&[("SC", 100.0)]));
            let policy = PolicySpec {
                batch_duration_minutes: Some(minutes),
                ..Default::default()
            };
            let err = engine
                .advise(&JobSpec::default(), &policy, &RequestContext::detached())
                .await
                .unwrap_err();
            assert_eq!(err, expected);
            assert!(err.is_validation());
            assert_eq!(signals.calls.load(Ordering::SeqCst), 0);
            assert!(audit.decisions().is_empty());
        }
    }

    #[tokio::test]
    async fn test_zero_batch_is_single_point() {
        let (_s, audit, engine) = make_engine(FakeSignals::with(&[("SC", 100.0)]));
        let policy = PolicySpec {
            batch_duration_minutes: Some(0),
            ..Default::default()
        };
        let advice = engine
            .advise(&JobSpec::default(), &policy, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(advice.location(), LocationSpec::new("gcp", "us-east1"));
        assert_eq!(audit.decisions()[0].0.mode, "run_now");
    }

    #[tokio::test]
    async fn test_unmapped_candidates_are_listed() {
        let (signals, _a, engine) = make_engine(FakeSignals::default());
        let policy = PolicySpec {
            preferred_regions: regions(&["mars-1", "moon-2"]),
            ..Default::default()
        };
        let err = engine
            .advise(&JobSpec::with_clouds(["gcp", "aws"]), &policy, &RequestContext::detached())
            .await
            .unwrap_err();
        match &err {
            AdviseError::NoMappedCandidates(detail) => {
                assert_eq!(detail, "gcp:mars-1, gcp:moon-2, aws:mars-1, aws:moon-2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_validation());
        assert_eq!(signals.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partially_mapped_candidates_still_decide() {
        let (_s, _a, engine) = make_engine(FakeSignals::with(&[("PJM_DC", 800.0)]));
        let policy = PolicySpec {
            preferred_regions: regions(&["us-east-1", "atlantis"]),
            ..Default::default()
        };
        let advice = engine
            .advise(&JobSpec::with_clouds(["aws"]), &policy, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(advice.location(), LocationSpec::new("aws", "us-east-1"));
    }

    #[tokio::test]
    async fn test_unusable_values_are_dropped() {
        let (_s, _a, engine) = make_engine(FakeSignals::with(&[
            ("SC", f64::NAN),
            ("BPA", 0.0),
            ("NL", 900.0),
        ]));
        let policy = PolicySpec {
            preferred_locations: vec![
                LocationSpec::new("gcp", "us-east1"),
                LocationSpec::new("gcp", "us-west1"),
                LocationSpec::new("azure", "westeurope"),
            ],
            ..Default::default()
        };
        let advice = engine
            .advise(&JobSpec::default(), &policy, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(advice.location(), LocationSpec::new("azure", "westeurope"));
        assert_eq!(advice.estimated_saving_percent(), Some(0.0));
    }

    #[tokio::test]
    async fn test_no_data_falls_back_without_metrics() {
        let (_s, audit, engine) = make_engine(FakeSignals::default());
        let job = JobSpec::with_clouds(["azure", "gcp"]);
        let policy = PolicySpec {
            preferred_regions: regions(&["eastus", "us-east1"]),
            fallback_region: Some("westeurope".into()),
            ..Default::default()
        };

        let advice = engine
            .advise(&job, &policy, &RequestContext::detached())
            .await
            .unwrap();

        assert_eq!(advice.location(), LocationSpec::new("azure", "westeurope"));
        assert_eq!(advice.when, t0());
        assert_eq!(advice.estimated_intensity_g_per_kwh, None);
        assert_eq!(advice.highest_emission_g_per_kwh, None);
        assert_eq!(advice.average_emission_g_per_kwh, None);
        assert_eq!(advice.estimated_saving_percent(), None);
        assert_eq!(
            advice.rationale,
            "run_now: no usable MOER for candidates; using fallback azure:westeurope"
        );

        let decisions = audit.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].0.selected_g_per_kwh, None);
        assert_eq!(decisions[0].1.len(), 2);
        assert!(decisions[0].1.iter().all(|c| c.value_at_target.is_none()));
    }

    #[tokio::test]
    async fn test_schedule_fallback_uses_until() {
        let (_s, _a, engine) = make_engine(FakeSignals::default());
        let until = t0() + Duration::hours(6);
        let policy = PolicySpec {
            mode: carbon_core::Mode::ScheduleAt,
            schedule_until: Some(until),
            batch_duration_minutes: Some(30),
            ..Default::default()
        };
        let advice = engine
            .advise(&JobSpec::default(), &policy, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(advice.when, until);
        assert!(advice.rationale.starts_with("schedule_at(batch): no usable batch windows found"));
    }

    #[tokio::test]
    async fn test_schedule_at_reports_best_window() {
        let best_at = t0() + Duration::hours(3);
        let mut signals = FakeSignals::with(&[("SC", 600.0), ("BPA", 300.0)]);
        signals.window_at.insert("SC".into(), t0() + Duration::hours(1));
        signals.window_at.insert("BPA".into(), best_at);
        let (_s, audit, engine) = make_engine(signals);

        let policy = PolicySpec {
            mode: carbon_core::Mode::ScheduleAt,
            schedule_from: Some(t0()),
            schedule_until: Some(t0() + Duration::hours(8)),
            preferred_regions: regions(&["us-east1", "us-west1"]),
            ..Default::default()
        };
        let advice = engine
            .advise(&JobSpec::with_clouds(["gcp"]), &policy, &RequestContext::detached())
            .await
            .unwrap();

        assert_eq!(advice.location(), LocationSpec::new("gcp", "us-west1"));
        assert_eq!(advice.when, best_at);
        assert_eq!(advice.best_window_when, Some(best_at));
        assert_eq!(advice.best_window_region.as_deref(), Some("us-west1"));
        assert_eq!(advice.best_window_moer_g_per_kwh, advice.estimated_intensity_g_per_kwh);
        assert!(advice.rationale.starts_with("schedule until: best window within ["));

        let (record, candidates) = &audit.decisions()[0];
        assert_eq!(record.mode, "schedule_at");
        assert_eq!(record.target_when, t0() + Duration::hours(8));
        assert_eq!(candidates[1].best_value_at, Some(best_at));
        assert_eq!(candidates[1].value_at_target, None);
    }

    #[tokio::test]
    async fn test_schedule_batch_mode() {
        let start = t0() + Duration::minutes(95);
        let mut signals = FakeSignals::with(&[("NL", 250.0)]);
        signals.window_at.insert("NL".into(), start);
        let (_s, audit, engine) = make_engine(signals);

        let policy = PolicySpec {
            mode: carbon_core::Mode::ScheduleAt,
            batch_duration_minutes: Some(30),
            schedule_until: Some(t0() + Duration::hours(4)),
            ..Default::default()
        };
        let advice = engine
            .advise(
                &JobSpec::with_clouds(["azure"]),
                &PolicySpec {
                    preferred_regions: regions(&["westeurope"]),
                    ..policy
                },
                &RequestContext::detached(),
            )
            .await
            .unwrap();

        assert_eq!(advice.when, start);
        assert!(advice
            .rationale
            .starts_with("schedule_until_batch: best 30 min window within ["));
        assert_eq!(audit.decisions()[0].0.mode, "schedule_at_batch");
    }

    #[tokio::test]
    async fn test_run_now_batch_mode() {
        let (_s, audit, engine) = make_engine(FakeSignals::with(&[("SC", 440.0)]));
        let policy = PolicySpec {
            batch_duration_minutes: Some(60),
            ..Default::default()
        };
        let advice = engine
            .advise(&JobSpec::default(), &policy, &RequestContext::detached())
            .await
            .unwrap();
        assert!(advice
            .rationale
            .starts_with("run_now batch (60 min): cleanest average over next 60 minutes is gcp:us-east1"));
        assert_eq!(audit.decisions()[0].0.mode, "run_now_batch");
    }

    #[tokio::test]
    async fn test_signal_error_aborts_decision() {
        let mut signals = FakeSignals::with(&[("SC", 100.0), ("BPA", 200.0)]);
        signals.failing_zone = Some(("BPA".into(), SignalError::Unauthorized));
        let (_s, audit, engine) = make_engine(signals);

        let policy = PolicySpec {
            preferred_regions: regions(&["us-east1", "us-west1"]),
            ..Default::default()
        };
        let err = engine
            .advise(&JobSpec::default(), &policy, &RequestContext::detached())
            .await
            .unwrap_err();
        assert_eq!(err, AdviseError::Signal(SignalError::Unauthorized));
        assert!(audit.decisions().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_not_audited() {
        let (_s, audit, engine) = make_engine(FakeSignals::with(&[("SC", 100.0)]));
        let (handle, signal) = CancelHandle::new();
        handle.cancel();

        let err = engine
            .advise(
                &JobSpec::default(),
                &PolicySpec::default(),
                &RequestContext::with_cancel(Some(Uuid::new_v4()), signal),
            )
            .await
            .unwrap_err();
        assert_eq!(err, AdviseError::Signal(SignalError::Cancelled));
        assert!(audit.decisions().is_empty());
    }
}
