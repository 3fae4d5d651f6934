//! Provider capability catalog: instance types, regions and pricing

use crate::model::Scenario;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hours used to turn hourly prices into a monthly estimate
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Compute shape offered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    pub id: String,
    pub vcpus: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub hourly_cost: f64,
    /// Regions offering this type; empty means unknown
    #[serde(default)]
    pub regions: Vec<String>,
}

/// Provider region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub city: String,
    pub country: String,
}

impl Region {
    pub fn new(id: impl Into<String>, city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            city: city.into(),
            country: country.into(),
        }
    }
}

/// Hourly price per instance type
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceTable {
    pub currency: String,
    pub hourly: BTreeMap<String, f64>,
}

impl PriceTable {
    pub fn from_instance_types(currency: impl Into<String>, types: &[InstanceType]) -> Self {
        Self {
            currency: currency.into(),
            hourly: types
                .iter()
                .map(|t| (t.id.clone(), t.hourly_cost))
                .collect(),
        }
    }

    pub fn hourly_cost(&self, instance_type: &str) -> Option<f64> {
        self.hourly.get(instance_type).copied()
    }

    /// Monthly cost of `count` instances, rounded to cents.
    pub fn monthly_estimate(&self, instance_type: &str, count: u32) -> Option<f64> {
        let hourly = self.hourly_cost(instance_type)?;
        let raw = hourly * HOURS_PER_MONTH * f64::from(count);
        Some((raw * 100.0).round() / 100.0)
    }
}

/// Static description of a registered provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub display_name: String,
    pub scenarios: Vec<Scenario>,
    pub instance_types: Vec<InstanceType>,
    pub regions: Vec<Region>,
    pub base_pricing: PriceTable,
}

impl ProviderDescriptor {
    pub fn has_instance_type(&self, id: &str) -> bool {
        self.instance_types.iter().any(|t| t.id == id)
    }

    pub fn has_region(&self, id: &str) -> bool {
        self.regions.iter().any(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> InstanceType {
        InstanceType {
            id: "vc2-1c-1gb".into(),
            vcpus: 1,
            memory_mb: 1024,
            disk_gb: 25,
            hourly_cost: 0.007,
            regions: vec![],
        }
    }

    #[test]
    fn test_monthly_estimate() {
        let table = PriceTable::from_instance_types("USD", &[small()]);
        assert_eq!(table.monthly_estimate("vc2-1c-1gb", 2), Some(10.22));
        assert_eq!(table.monthly_estimate("vc2-1c-1gb", 0), Some(0.0));
        assert_eq!(table.monthly_estimate("unknown", 1), None);
    }
}
