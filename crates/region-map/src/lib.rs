//! Region Map
//!
//! Static (cloud, region) → grid zone table used to look up carbon signals.
//!
//! | Cloud | Regions |
//! |-------|---------|
//! | aws   | 39 |
//! | azure | 61 |
//! | gcp   | 42 |
//!
//! Lookups are case-insensitive on both keys. Zones are WattTime balancing
//! authority codes and are returned exactly as stored.

use std::collections::{BTreeMap, HashMap};

use carbon_core::RegionResolver;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionMapError {
    #[error("No zone mapping for {cloud}:{region}")]
    UnknownRegion { cloud: String, region: String },
}

pub type Result<T> = std::result::Result<T, RegionMapError>;

/// (cloud, region, zone)
const REGION_ZONES: &[(&str, &str, &str)] = &[
    ("gcp", "us-west1", "BPA"),
    ("gcp", "us-west2", "LDWP"),
    ("gcp", "us-west3", "PACE"),
    ("gcp", "us-west4", "NEVP"),
    ("gcp", "us-central1", "MISO_WORTHINGTON"),
    ("gcp", "us-east1", "SC"),
    ("gcp", "us-east4", "PJM_DC"),
    ("gcp", "us-east5", "PJM_SOUTHWEST_OH"),
    ("gcp", "us-south1", "ERCOT_NORTHCENTRAL"),
    ("gcp", "northamerica-northeast1", "HQ"),
    ("gcp", "northamerica-northeast2", "IESO_NORTH"),
    ("gcp", "northamerica-south1", "MX_SIN"),
    ("gcp", "southamerica-east1", "BRA"),
    ("gcp", "southamerica-west1", "CHL"),
    ("gcp", "europe-west1", "BE"),
    ("gcp", "europe-west2", "UK"),
    ("gcp", "europe-west3", "DE"),
    ("gcp", "europe-west4", "NL"),
    ("gcp", "europe-west6", "CH"),
    ("gcp", "europe-west8", "IT"),
    ("gcp", "europe-west9", "FR"),
    ("gcp", "europe-west10", "DE"),
    ("gcp", "europe-west12", "IT"),
    ("gcp", "europe-central2", "PL"),
    ("gcp", "europe-north1", "FI"),
    ("gcp", "europe-north2", "SE"),
    ("gcp", "europe-southwest1", "ES"),
    ("gcp", "me-west1", "ISR"),
    ("gcp", "me-central1", "QAT"),
    ("gcp", "me-central2", "SAU"),
    ("gcp", "africa-south1", "ZAF"),
    ("gcp", "asia-south1", "IND"),
    ("gcp", "asia-south2", "IND"),
    ("gcp", "asia-southeast1", "SGP"),
    ("gcp", "asia-southeast2", "IDN"),
    ("gcp", "asia-east1", "TWN"),
    ("gcp", "asia-east2", "HKG"),
    ("gcp", "asia-northeast1", "JP_TK"),
    ("gcp", "asia-northeast2", "JP_KN"),
    ("gcp", "asia-northeast3", "KOR"),
    ("gcp", "australia-southeast1", "NEM_NSW"),
    ("gcp", "australia-southeast2", "NEM_VIC"),
    ("azure", "austriaeast", "AT"),
    ("azure", "belgiumcentral", "BE"),
    ("azure", "eastus", "PJM_DC"),
    ("azure", "eastus2", "PJM_DC"),
    ("azure", "centralus", "MISO_MASON_CITY"),
    ("azure", "northcentralus", "PJM_CHICAGO"),
    ("azure", "southcentralus", "ERCOT_SANANTONIO"),
    ("azure", "westus", "CAISO_NORTH"),
    ("azure", "westus2", "GCPD"),
    ("azure", "westus3", "AZPS"),
    ("azure", "westcentralus", "WACM"),
    ("azure", "eastus3", "SOCO"),
    ("azure", "westcentralus2", "PSCO"),
    ("azure", "canadacentral", "IESO_NORTH"),
    ("azure", "canadaeast", "HQ"),
    ("azure", "mexicocentral", "MX_SIN"),
    ("azure", "brazilsouth", "BRA"),
    ("azure", "brazilsoutheast", "BRA"),
    ("azure", "chilecentral", "CHL"),
    ("azure", "northeurope", "IE"),
    ("azure", "westeurope", "NL"),
    ("azure", "ukSouth", "UK"),
    ("azure", "ukwest", "UK"),
    ("azure", "francecentral", "FR"),
    ("azure", "francesouth", "FR"),
    ("azure", "switzerlandnorth", "CH"),
    ("azure", "switzerlandwest", "CH"),
    ("azure", "germanywestcentral", "DE"),
    ("azure", "germanynorth", "DE"),
    ("azure", "norwayeast", "NO"),
    ("azure", "norwaywest", "NO"),
    ("azure", "swedencentral", "SE"),
    ("azure", "swedensouth", "SE"),
    ("azure", "polandcentral", "PL"),
    ("azure", "italynorth", "IT"),
    ("azure", "spaincentral", "ES"),
    ("azure", "austriacenter", "AT"),
    ("azure", "uaenorth", "ARE"),
    ("azure", "uaecentral", "ARE"),
    ("azure", "qatarcentral", "QAT"),
    ("azure", "israelcentral", "ISR"),
    ("azure", "saudiarabiaeast", "SAU"),
    ("azure", "saudiarabiacentral", "SAU"),
    ("azure", "southafricanorth", "ZAF"),
    ("azure", "southafricawest", "ZAF"),
    ("azure", "eastasia", "HKG"),
    ("azure", "southeastasia", "SGP"),
    ("azure", "japaneast", "JP_TK"),
    ("azure", "japanwest", "JP_KN"),
    ("azure", "koreacentral", "KOR"),
    ("azure", "koreasouth", "KOR"),
    ("azure", "centralindia", "IND"),
    ("azure", "southindia", "IND"),
    ("azure", "westindia", "IND"),
    ("azure", "indonesiacentral", "IDN"),
    ("azure", "malaysiawest", "MYS"),
    ("azure", "taiwannorth", "TWN"),
    ("azure", "australiaeast", "NEM_NSW"),
    ("azure", "australiasoutheast", "NEM_VIC"),
    ("azure", "australiacentral", "NEM_NSW"),
    ("azure", "newzealandnorth", "NZL"),
    ("aws", "us-east-1", "PJM_DC"),
    ("aws", "us-east-2", "PJM_SOUTHWEST_OH"),
    ("aws", "us-west-1", "CAISO_NORTH"),
    ("aws", "us-west-2", "BPA"),
    ("aws", "us-gov-east-1", "PJM_DC"),
    ("aws", "us-gov-west-1", "SCL"),
    ("aws", "ca-central-1", "HQ"),
    ("aws", "ca-west-1", "AESO"),
    ("aws", "mx-central-1", "MX_SIN"),
    ("aws", "sa-east-1", "BRA"),
    ("aws", "eu-west-1", "IE"),
    ("aws", "eu-west-2", "UK"),
    ("aws", "eu-west-3", "FR"),
    ("aws", "eu-central-1", "DE"),
    ("aws", "eu-central-2", "CH"),
    ("aws", "eu-north-1", "SE"),
    ("aws", "eu-south-1", "IT"),
    ("aws", "eu-south-2", "ES"),
    ("aws", "eu-west-4", "BE"),
    ("aws", "eu-east-1", "PL"),
    ("aws", "eu-east-2", "FI"),
    ("aws", "il-central-1", "ISR"),
    ("aws", "me-south-1", "BHR"),
    ("aws", "me-central-1", "ARE"),
    ("aws", "af-south-1", "ZAF"),
    ("aws", "ap-east-1", "HKG"),
    ("aws", "ap-east-2", "TWN"),
    ("aws", "ap-southeast-1", "SGP"),
    ("aws", "ap-southeast-2", "NEM_NSW"),
    ("aws", "ap-southeast-3", "IDN"),
    ("aws", "ap-southeast-4", "NEM_VIC"),
    ("aws", "ap-southeast-5", "MYS"),
    ("aws", "ap-southeast-6", "NZL"),
    ("aws", "ap-southeast-7", "THA"),
    ("aws", "ap-south-1", "IND"),
    ("aws", "ap-south-2", "IND"),
    ("aws", "ap-northeast-1", "JP_TK"),
    ("aws", "ap-northeast-2", "KOR"),
    ("aws", "ap-northeast-3", "JP_KN"),
];

/// One row of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneEntry {
    pub cloud: &'static str,
    pub region: &'static str,
    pub zone: &'static str,
}

/// Fixed lookup table implementing [`RegionResolver`]
#[derive(Debug, Clone)]
pub struct StaticRegionMap {
    by_key: HashMap<(String, String), ZoneEntry>,
}

impl StaticRegionMap {
    pub fn new() -> Self {
        Self::from_entries(REGION_ZONES.iter().map(|&(cloud, region, zone)| ZoneEntry {
            cloud,
            region,
            zone,
        }))
    }

    /// Build from an arbitrary table. Later rows win on duplicate keys.
    pub fn from_entries(entries: impl IntoIterator<Item = ZoneEntry>) -> Self {
        let by_key = entries
            .into_iter()
            .map(|e| ((e.cloud.to_lowercase(), e.region.to_lowercase()), e))
            .collect();
        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Zone for a pair, or an error naming it
    pub fn zone(&self, cloud: &str, region: &str) -> Result<&'static str> {
        self.by_key
            .get(&(cloud.trim().to_lowercase(), region.trim().to_lowercase()))
            .map(|e| e.zone)
            .ok_or_else(|| RegionMapError::UnknownRegion {
                cloud: cloud.to_string(),
                region: region.to_string(),
            })
    }
}

impl Default for StaticRegionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionResolver for StaticRegionMap {
    fn resolve(&self, cloud: &str, region: &str) -> Option<String> {
        self.zone(cloud, region).ok().map(str::to_string)
    }

    fn list_all(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.by_key.values() {
            grouped
                .entry(entry.cloud.to_lowercase())
                .or_default()
                .push(entry.region.to_string());
        }
        for regions in grouped.values_mut() {
            regions.sort_by_key(|r| r.to_lowercase());
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size() {
        let map = StaticRegionMap::new();
        assert_eq!(map.len(), 142);

        let all = map.list_all();
        assert_eq!(all["aws"].len(), 39);
        assert_eq!(all["azure"].len(), 61);
        assert_eq!(all["gcp"].len(), 42);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let map = StaticRegionMap::new();
        assert_eq!(map.resolve("gcp", "us-west1").as_deref(), Some("BPA"));
        assert_eq!(map.resolve("GCP", "US-WEST1").as_deref(), Some("BPA"));
        assert_eq!(map.resolve("Azure", "WestEurope").as_deref(), Some("NL"));
        assert_eq!(map.resolve("aws", "us-east-1").as_deref(), Some("PJM_DC"));
    }

    #[test]
    fn test_unknown_pair() {
        let map = StaticRegionMap::new();
        assert_eq!(map.resolve("gcp", "mars-north1"), None);
        assert_eq!(map.resolve("oracle", "us-east1"), None);
        assert_eq!(
            map.zone("gcp", "mars-north1"),
            Err(RegionMapError::UnknownRegion {
                cloud: "gcp".to_string(),
                region: "mars-north1".to_string(),
            })
        );
    }

    #[test]
    fn test_list_all_sorted_case_insensitively() {
        let map = StaticRegionMap::from_entries([
            ZoneEntry { cloud: "GCP", region: "us-west1", zone: "BPA" },
            ZoneEntry { cloud: "gcp", region: "Asia-east1", zone: "TW" },
            ZoneEntry { cloud: "gcp", region: "europe-west4", zone: "NL" },
        ]);
        let all = map.list_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all["gcp"], vec!["Asia-east1", "europe-west4", "us-west1"]);
    }

    #[test]
    fn test_every_group_is_sorted() {
        let map = StaticRegionMap::new();
        for regions in map.list_all().values() {
            let mut sorted = regions.clone();
            sorted.sort_by_key(|r| r.to_lowercase());
            assert_eq!(&sorted, regions);
        }
    }
}
