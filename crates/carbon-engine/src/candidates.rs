//! Candidate location construction and fallback resolution

use std::collections::HashSet;

use carbon_core::{JobSpec, LocationSpec, PolicySpec};

use crate::EngineConfig;

/// Drop repeated (cloud, region) pairs, ignoring case; first occurrence wins
pub fn deduplicate(locations: impl IntoIterator<Item = LocationSpec>) -> Vec<LocationSpec> {
    let mut seen = HashSet::new();
    locations
        .into_iter()
        .filter(|l| seen.insert(l.key()))
        .collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Candidate set for a request.
///
/// Explicit `preferredLocations` win. Otherwise every job cloud is paired
/// with every preferred region (or the fallback / default region).
pub fn build_candidates(job: &JobSpec, policy: &PolicySpec, config: &EngineConfig) -> Vec<LocationSpec> {
    if !policy.preferred_locations.is_empty() {
        return deduplicate(policy.preferred_locations.iter().cloned());
    }

    let mut clouds = job.effective_clouds();
    if clouds.is_empty() {
        clouds.push(config.default_cloud.clone());
    }

    let regions: Vec<String> = if policy.preferred_regions.is_empty() {
        vec![non_blank(&policy.fallback_region)
            .unwrap_or(&config.default_region)
            .to_string()]
    } else {
        policy.preferred_regions.clone()
    };

    deduplicate(
        clouds
            .iter()
            .flat_map(|c| regions.iter().map(move |r| LocationSpec::new(c.clone(), r.clone()))),
    )
}

/// Where to go when no candidate has usable data
pub fn fallback_location(job: &JobSpec, policy: &PolicySpec, config: &EngineConfig) -> LocationSpec {
    let cloud = job
        .effective_clouds()
        .into_iter()
        .next()
        .unwrap_or_else(|| config.default_cloud.clone());
    let region = non_blank(&policy.fallback_region)
        .or_else(|| policy.preferred_regions.first().map(String::as_str))
        .unwrap_or(&config.default_region)
        .to_string();
    LocationSpec::new(cloud, region)
}
