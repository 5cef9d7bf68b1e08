//! Deterministic priority scoring.
//!
//! The score blends four components (severity, community upvotes, age and
//! category urgency), applies a status multiplier and an escalation boost,
//! then clamps to `[0, 100]`. Only the final outputs are rounded; the rounded
//! components are informational and never feed back into the total.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CoreError, GrievanceStatus};

pub const DEFAULT_URGENCY_WEIGHTS: [(&str, u8); 14] = [
    ("Public Safety", 10),
    ("Healthcare", 9),
    ("Water Supply", 8),
    ("Electricity", 8),
    ("Drainage & Sewage", 7),
    ("Roads & Infrastructure", 7),
    ("Traffic Issues", 6),
    ("Garbage Collection", 6),
    ("Pension & Welfare", 5),
    ("Ration & Food", 5),
    ("Education", 4),
    ("Street Lights", 4),
    ("Land & Property", 3),
    ("Parks & Gardens", 2),
];

pub const DEFAULT_STATUS_MULTIPLIERS: [(GrievanceStatus, f64); 5] = [
    (GrievanceStatus::Pending, 1.2),
    (GrievanceStatus::Acknowledged, 1.0),
    (GrievanceStatus::InProgress, 0.8),
    (GrievanceStatus::Escalated, 1.5),
    (GrievanceStatus::Resolved, 0.1),
];

pub const UNKNOWN_CATEGORY_WEIGHT: u8 = 3;
pub const ESCALATION_BOOST: f64 = 1.3;

const SEVERITY_WEIGHT: f64 = 0.30;
const UPVOTE_WEIGHT: f64 = 0.25;
const TIME_WEIGHT: f64 = 0.25;
const CATEGORY_WEIGHT: f64 = 0.20;
const UPVOTE_LOG_SCALE: f64 = 60.0;
const TIME_SATURATION_DAYS: f64 = 30.0;

/// Lookup tables used by the scorer. Defaults reproduce the production tables;
/// configuration and tests may override individual entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringTables {
    pub urgency_weights: BTreeMap<String, u8>,
    pub unknown_category_weight: u8,
    pub status_multipliers: BTreeMap<GrievanceStatus, f64>,
    pub escalation_boost: f64,
}

impl Default for ScoringTables {
    fn default() -> Self {
        Self {
            urgency_weights: DEFAULT_URGENCY_WEIGHTS
                .iter()
                .map(|(category, weight)| ((*category).to_string(), *weight))
                .collect(),
            unknown_category_weight: UNKNOWN_CATEGORY_WEIGHT,
            status_multipliers: DEFAULT_STATUS_MULTIPLIERS.into_iter().collect(),
            escalation_boost: ESCALATION_BOOST,
        }
    }
}

impl ScoringTables {
    #[must_use]
    pub fn urgency_weight(&self, category: &str) -> u8 {
        self.urgency_weights.get(category).copied().unwrap_or(self.unknown_category_weight)
    }

    #[must_use]
    pub fn status_multiplier(&self, status: GrievanceStatus) -> f64 {
        self.status_multipliers.get(&status).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityInput {
    pub severity: u8,
    pub upvotes: u32,
    pub hours_old: f64,
    pub category: String,
    pub status: GrievanceStatus,
    pub is_escalated: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::Critical,
            60..=79 => Self::High,
            40..=59 => Self::Medium,
            _ => Self::Low,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PriorityBreakdown {
    pub total_score: u8,
    pub severity_score: u8,
    pub upvote_score: u8,
    pub time_score: u8,
    pub category_score: u8,
    pub urgency_level: UrgencyLevel,
}

/// Compute the priority breakdown for one grievance.
///
/// # Errors
/// Returns [`CoreError::Validation`] when severity is outside `[1, 10]` or
/// `hours_old` is negative or not finite.
pub fn calculate_priority(
    input: &PriorityInput,
    tables: &ScoringTables,
) -> Result<PriorityBreakdown, CoreError> {
    if !(1..=10).contains(&input.severity) {
        return Err(CoreError::Validation("severity MUST be in [1, 10]".to_string()));
    }
    if !input.hours_old.is_finite() || input.hours_old < 0.0 {
        return Err(CoreError::Validation("hours_old MUST be a finite value >= 0".to_string()));
    }

    let severity_score = f64::from(input.severity) / 10.0 * 100.0;
    let upvote_score = ((f64::from(input.upvotes) + 1.0).log10() * UPVOTE_LOG_SCALE).min(100.0);
    let days_old = input.hours_old / 24.0;
    let time_score =
        ((days_old + 1.0).log10() / (TIME_SATURATION_DAYS + 1.0).log10() * 100.0).min(100.0);
    let category_score = f64::from(tables.urgency_weight(&input.category)) / 10.0 * 100.0;

    let weighted = SEVERITY_WEIGHT * severity_score
        + UPVOTE_WEIGHT * upvote_score
        + TIME_WEIGHT * time_score
        + CATEGORY_WEIGHT * category_score;

    let mut total = weighted * tables.status_multiplier(input.status);
    if input.is_escalated {
        total = (total * tables.escalation_boost).min(100.0);
    }

    let total_score = round_score(total);
    Ok(PriorityBreakdown {
        total_score,
        severity_score: round_score(severity_score),
        upvote_score: round_score(upvote_score),
        time_score: round_score(time_score),
        category_score: round_score(category_score),
        urgency_level: UrgencyLevel::from_score(total_score),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_score(value: f64) -> u8 {
    // Clamped to [0, 100] first, so the cast is exact.
    value.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn input(severity: u8, upvotes: u32, hours_old: f64, category: &str) -> PriorityInput {
        PriorityInput {
            severity,
            upvotes,
            hours_old,
            category: category.to_string(),
            status: GrievanceStatus::Pending,
            is_escalated: false,
        }
    }

    fn score(input: &PriorityInput) -> PriorityBreakdown {
        match calculate_priority(input, &ScoringTables::default()) {
            Ok(breakdown) => breakdown,
            Err(err) => panic!("fixture input should score: {err}"),
        }
    }

    #[test]
    fn fresh_public_safety_report_scores_high() {
        let breakdown = score(&input(10, 0, 0.0, "Public Safety"));
        assert_eq!(breakdown.category_score, 100);
        assert_eq!(breakdown.severity_score, 100);
        assert_eq!(breakdown.time_score, 0);
        assert_eq!(breakdown.upvote_score, 0);
        assert_eq!(breakdown.total_score, 60);
        assert_eq!(breakdown.urgency_level, UrgencyLevel::High);
    }

    #[test]
    fn unknown_category_uses_default_weight() {
        let breakdown = score(&input(5, 0, 0.0, "Stray Animals"));
        assert_eq!(breakdown.category_score, 30);
    }

    #[test]
    fn time_score_saturates_after_thirty_days() {
        assert_eq!(score(&input(1, 0, 30.0 * 24.0, "Education")).time_score, 100);
        assert_eq!(score(&input(1, 0, 365.0 * 24.0, "Education")).time_score, 100);
        assert!(score(&input(1, 0, 24.0, "Education")).time_score < 100);
    }

    #[test]
    fn upvote_score_is_logarithmic_and_capped() {
        // log10(10) * 60 = 60
        assert_eq!(score(&input(1, 9, 0.0, "Education")).upvote_score, 60);
        assert_eq!(score(&input(1, 1_000_000, 0.0, "Education")).upvote_score, 100);
    }

    #[test]
    fn resolved_status_suppresses_priority() {
        let mut resolved = input(10, 50, 240.0, "Healthcare");
        resolved.status = GrievanceStatus::Resolved;
        let breakdown = score(&resolved);
        assert!(breakdown.total_score < 10);
        assert_eq!(breakdown.urgency_level, UrgencyLevel::Low);
    }

    #[test]
    fn escalated_grievance_is_boosted_and_capped() {
        let mut escalated = input(10, 1000, 30.0 * 24.0, "Public Safety");
        escalated.status = GrievanceStatus::Escalated;
        escalated.is_escalated = true;
        let breakdown = score(&escalated);
        assert_eq!(breakdown.total_score, 100);
        assert_eq!(breakdown.urgency_level, UrgencyLevel::Critical);
    }

    #[test]
    fn status_missing_from_table_uses_neutral_multiplier() {
        let mut tables = ScoringTables::default();
        tables.status_multipliers.remove(&GrievanceStatus::Pending);
        let mut acknowledged = input(8, 3, 12.0, "Electricity");
        let pending = calculate_priority(&acknowledged, &tables);
        acknowledged.status = GrievanceStatus::Acknowledged;
        let neutral = calculate_priority(&acknowledged, &tables);
        assert_eq!(pending.map(|b| b.total_score), neutral.map(|b| b.total_score));
    }

    #[test]
    fn overridden_tables_change_the_category_score() {
        let mut tables = ScoringTables::default();
        tables.urgency_weights.insert("Stray Animals".to_string(), 9);
        let breakdown = calculate_priority(&input(5, 0, 0.0, "Stray Animals"), &tables);
        assert_eq!(breakdown.map(|b| b.category_score), Ok(90));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let tables = ScoringTables::default();
        assert!(matches!(
            calculate_priority(&input(0, 0, 0.0, "Education"), &tables),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            calculate_priority(&input(11, 0, 0.0, "Education"), &tables),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            calculate_priority(&input(5, 0, -1.0, "Education"), &tables),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            calculate_priority(&input(5, 0, f64::NAN, "Education"), &tables),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn urgency_tiers_follow_thresholds() {
        assert_eq!(UrgencyLevel::from_score(100), UrgencyLevel::Critical);
        assert_eq!(UrgencyLevel::from_score(80), UrgencyLevel::Critical);
        assert_eq!(UrgencyLevel::from_score(79), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::from_score(60), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::from_score(59), UrgencyLevel::Medium);
        assert_eq!(UrgencyLevel::from_score(40), UrgencyLevel::Medium);
        assert_eq!(UrgencyLevel::from_score(39), UrgencyLevel::Low);
        assert_eq!(UrgencyLevel::from_score(0), UrgencyLevel::Low);
    }

    fn any_status() -> impl Strategy<Value = GrievanceStatus> {
        prop_oneof![
            Just(GrievanceStatus::Pending),
            Just(GrievanceStatus::Acknowledged),
            Just(GrievanceStatus::InProgress),
            Just(GrievanceStatus::Escalated),
            Just(GrievanceStatus::Resolved),
        ]
    }

    fn any_category() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Public Safety".to_string()),
            Just("Parks & Gardens".to_string()),
            Just("Street Lights".to_string()),
            Just("Unlisted".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn property_total_is_bounded_and_deterministic(
            severity in 1_u8..=10,
            upvotes in any::<u32>(),
            hours_old in 0.0_f64..100_000.0,
            category in any_category(),
            status in any_status(),
            is_escalated in any::<bool>(),
        ) {
            let input = PriorityInput { severity, upvotes, hours_old, category, status, is_escalated };
            let tables = ScoringTables::default();
            let first = calculate_priority(&input, &tables);
            let second = calculate_priority(&input, &tables);
            prop_assert!(first.is_ok());
            prop_assert_eq!(&first, &second);
            let breakdown = first.unwrap_or_else(|_| unreachable!());
            prop_assert!(breakdown.total_score <= 100);
            prop_assert_eq!(breakdown.urgency_level, UrgencyLevel::from_score(breakdown.total_score));
        }

        #[test]
        fn property_escalation_never_lowers_the_score(
            severity in 1_u8..=10,
            upvotes in 0_u32..10_000,
            hours_old in 0.0_f64..10_000.0,
            category in any_category(),
            status in any_status(),
        ) {
            let tables = ScoringTables::default();
            let plain = PriorityInput { severity, upvotes, hours_old, category, status, is_escalated: false };
            let boosted = PriorityInput { is_escalated: true, ..plain.clone() };
            let plain = calculate_priority(&plain, &tables).unwrap_or_else(|_| unreachable!());
            let boosted = calculate_priority(&boosted, &tables).unwrap_or_else(|_| unreachable!());
            prop_assert!(boosted.total_score >= plain.total_score);
            prop_assert!(boosted.total_score <= 100);
        }
    }
}
