//! Storage efficiency analysis over the registry snapshot.

use serde::{Deserialize, Serialize};

use crate::registry::ProviderDescriptor;

/// Utilization bounds used to classify providers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EfficiencyThresholds {
    /// Below this a provider counts as underutilized.
    pub under_utilized: f64,
    /// Above this a provider counts as overutilized.
    pub over_utilized: f64,
}

impl Default for EfficiencyThresholds {
    fn default() -> Self {
        Self {
            under_utilized: 0.2,
            over_utilized: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUtilization {
    pub name: String,
    pub live_usage_bytes: u64,
    pub max_file_size_bytes: u64,
    /// Usage over capacity. A provider with no capacity counts as full.
    pub utilization: f64,
}

/// Move data off `from` onto `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceSuggestion {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyReport {
    /// Every provider, in registry order.
    pub providers: Vec<ProviderUtilization>,
    pub underutilized: Vec<String>,
    pub overutilized: Vec<String>,
    pub total_usage_bytes: u64,
    pub total_capacity_bytes: u64,
    pub suggestions: Vec<RebalanceSuggestion>,
}

fn utilization(descriptor: &ProviderDescriptor) -> f64 {
    let capacity = descriptor.limits.max_file_size_bytes;
    if capacity == 0 {
        return 1.0;
    }
    descriptor.live_usage_bytes as f64 / capacity as f64
}

/// Classify providers by utilization and suggest where to move data.
///
/// Each overutilized provider is paired with the underutilized provider
/// that has the most headroom.
pub fn analyze(
    snapshot: &[ProviderDescriptor],
    thresholds: EfficiencyThresholds,
) -> EfficiencyReport {
    let providers: Vec<ProviderUtilization> = snapshot
        .iter()
        .map(|d| ProviderUtilization {
            name: d.name.clone(),
            live_usage_bytes: d.live_usage_bytes,
            max_file_size_bytes: d.limits.max_file_size_bytes,
            utilization: utilization(d),
        })
        .collect();

    let underutilized: Vec<String> = providers
        .iter()
        .filter(|p| p.utilization < thresholds.under_utilized)
        .map(|p| p.name.clone())
        .collect();
    let overutilized: Vec<String> = providers
        .iter()
        .filter(|p| p.utilization > thresholds.over_utilized)
        .map(|p| p.name.clone())
        .collect();

    let roomiest = snapshot
        .iter()
        .filter(|d| underutilized.contains(&d.name))
        .fold(None::<&ProviderDescriptor>, |best, d| match best {
            Some(b) if d.headroom() <= b.headroom() => Some(b),
            _ => Some(d),
        });
    let suggestions = match roomiest {
        Some(target) => overutilized
            .iter()
            .map(|from| RebalanceSuggestion {
                from: from.clone(),
                to: target.name.clone(),
            })
            .collect(),
        None => Vec::new(),
    };

    EfficiencyReport {
        total_usage_bytes: snapshot
            .iter()
            .map(|d| d.live_usage_bytes)
            .fold(0u64, u64::saturating_add),
        total_capacity_bytes: snapshot
            .iter()
            .map(|d| d.limits.max_file_size_bytes)
            .fold(0u64, u64::saturating_add),
        providers,
        underutilized,
        overutilized,
        suggestions,
    }
}
