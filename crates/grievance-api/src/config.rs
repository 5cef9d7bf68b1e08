use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use grievance_core::{DuplicatePolicy, ScoringTables};
use grievance_ledger::DEFAULT_MAX_EVENT_SPAN;
use serde::{Deserialize, Serialize};

/// Runtime knobs shared by the service and the CLI. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GrievanceConfig {
    pub sweep_interval_secs: u64,
    pub sweep_batch_limit: usize,
    pub background_workers: usize,
    pub background_capacity: usize,
    pub scoring: ScoringTables,
    pub duplicates: DuplicatePolicy,
    pub max_event_span: u64,
    pub subscription_buffer: usize,
}

impl Default for GrievanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            sweep_batch_limit: 500,
            background_workers: 4,
            background_capacity: 1024,
            scoring: ScoringTables::default(),
            duplicates: DuplicatePolicy::default(),
            max_event_span: DEFAULT_MAX_EVENT_SPAN,
            subscription_buffer: 256,
        }
    }
}

impl GrievanceConfig {
    /// # Errors
    /// Returns an error when the YAML is malformed or the values are out of range.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).context("failed to parse grievance config")?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// # Errors
    /// Returns an error describing the first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(anyhow!("sweep_interval_secs MUST be positive"));
        }
        if self.sweep_batch_limit == 0 {
            return Err(anyhow!("sweep_batch_limit MUST be positive"));
        }
        if self.background_workers == 0 || self.background_capacity == 0 {
            return Err(anyhow!("background_workers and background_capacity MUST be positive"));
        }
        if self.max_event_span == 0 {
            return Err(anyhow!("max_event_span MUST be positive"));
        }
        if self.subscription_buffer == 0 {
            return Err(anyhow!("subscription_buffer MUST be positive"));
        }

        let policy = &self.duplicates;
        for (field, value) in [
            ("similarity_threshold", policy.similarity_threshold),
            ("duplicate_threshold", policy.duplicate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("duplicates.{field} MUST be in [0, 1]"));
            }
        }
        if policy.duplicate_threshold < policy.similarity_threshold {
            return Err(anyhow!(
                "duplicates.duplicate_threshold MUST NOT be below similarity_threshold"
            ));
        }
        if policy.geo_box_degrees <= 0.0 || policy.candidate_window_days <= 0 {
            return Err(anyhow!(
                "duplicates.geo_box_degrees and candidate_window_days MUST be positive"
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use grievance_core::GrievanceStatus;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() -> Result<()> {
        let config = GrievanceConfig::from_yaml_str("{}")?;
        assert_eq!(config, GrievanceConfig::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.max_event_span, 10);
        Ok(())
    }

    #[test]
    fn partial_overrides_keep_other_defaults() -> Result<()> {
        let config = GrievanceConfig::from_yaml_str(
            "sweep_interval_secs: 60\n\
             scoring:\n  status_multipliers:\n    pending: 2.0\n\
             duplicates:\n  max_results: 3\n",
        )?;
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.background_workers, 4);
        assert!((config.scoring.status_multiplier(GrievanceStatus::Pending) - 2.0).abs() < 1e-9);
        assert_eq!(config.duplicates.max_results, 3);
        assert!((config.duplicates.duplicate_threshold - 0.90).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(GrievanceConfig::from_yaml_str("background_workers: 0").is_err());
        assert!(GrievanceConfig::from_yaml_str("duplicates:\n  duplicate_threshold: 1.5").is_err());
        assert!(GrievanceConfig::from_yaml_str(
            "duplicates:\n  similarity_threshold: 0.95\n  duplicate_threshold: 0.9"
        )
        .is_err());
        assert!(GrievanceConfig::from_yaml_str("sweep_interval_secs: [1]").is_err());
    }
}
