//! Authority reputation: the off-chain fallback score and leaderboard ranking.
//!
//! The on-chain score is authoritative whenever it exists; the off-chain score
//! is only a fallback and the two are allowed to diverge.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::AuthorityId;

pub const NEUTRAL_SCORE: u16 = 500;
pub const MAX_SCORE: u16 = 1000;
const RESOLUTION_POINTS: f64 = 400.0;
const NON_ESCALATION_POINTS: f64 = 200.0;
const RESPONSE_POINTS: f64 = 200.0;
const RESPONSE_TARGET_HOURS: f64 = 24.0;
/// No live rating feed is wired into the off-chain score yet.
const FLAT_SATISFACTION_POINTS: f64 = 100.0;

/// One lifecycle event that moves an authority's reputation counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReputationEvent {
    Assignment,
    FirstResponse { hours: f64 },
    Resolution { hours: f64 },
    Escalation,
    Rating { positive: bool },
}

impl ReputationEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::FirstResponse { .. } => "first_response",
            Self::Resolution { .. } => "resolution",
            Self::Escalation => "escalation",
            Self::Rating { .. } => "rating",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ReputationSnapshot {
    pub assigned: u32,
    pub resolved: u32,
    pub escalated: u32,
    pub total_response_hours: f64,
    pub total_resolution_hours: f64,
    pub positive_ratings: u32,
    pub negative_ratings: u32,
}

impl ReputationSnapshot {
    /// Apply one event to the counters; negative durations count as zero.
    pub fn apply(&mut self, event: ReputationEvent) {
        match event {
            ReputationEvent::Assignment => self.assigned += 1,
            ReputationEvent::FirstResponse { hours } => self.total_response_hours += hours.max(0.0),
            ReputationEvent::Resolution { hours } => {
                self.resolved += 1;
                self.total_resolution_hours += hours.max(0.0);
            }
            ReputationEvent::Escalation => self.escalated += 1,
            ReputationEvent::Rating { positive: true } => self.positive_ratings += 1,
            ReputationEvent::Rating { positive: false } => self.negative_ratings += 1,
        }
    }

    #[must_use]
    pub fn average_response_hours(&self) -> f64 {
        if self.assigned == 0 {
            0.0
        } else {
            self.total_response_hours / f64::from(self.assigned)
        }
    }
}

/// Deterministic off-chain score in `[0, 1000]`.
#[must_use]
pub fn off_chain_score(snapshot: &ReputationSnapshot) -> u16 {
    if snapshot.assigned == 0 {
        return NEUTRAL_SCORE;
    }

    let assigned = f64::from(snapshot.assigned);
    let resolution = f64::from(snapshot.resolved) * RESOLUTION_POINTS / assigned;
    let non_escalation =
        (assigned - f64::from(snapshot.escalated)) * NON_ESCALATION_POINTS / assigned;
    let average_response = snapshot.average_response_hours();
    let response = if average_response <= RESPONSE_TARGET_HOURS {
        RESPONSE_POINTS
    } else {
        (RESPONSE_POINTS - (average_response - RESPONSE_TARGET_HOURS) * RESPONSE_POINTS / 24.0)
            .max(0.0)
    };

    let total = (resolution + non_escalation + response + FLAT_SATISFACTION_POINTS).round();
    clamp_score(total)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_score(value: f64) -> u16 {
    value.clamp(0.0, f64::from(MAX_SCORE)) as u16
}

#[must_use]
pub fn effective_score(on_chain: Option<u16>, off_chain: u16) -> u16 {
    on_chain.unwrap_or(off_chain)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub authority_id: AuthorityId,
    pub name: String,
    pub off_chain_score: u16,
    pub on_chain_score: Option<u16>,
    pub effective_score: u16,
}

/// Sort by effective score descending, then authority id, and assign ranks from 1.
pub fn rank_leaderboard(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|lhs, rhs| match rhs.effective_score.cmp(&lhs.effective_score) {
        Ordering::Equal => lhs.authority_id.cmp(&rhs.authority_id),
        other => other,
    });
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = index + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(assigned: u32, resolved: u32, escalated: u32, response_hours: f64) -> ReputationSnapshot {
        ReputationSnapshot {
            assigned,
            resolved,
            escalated,
            total_response_hours: response_hours,
            ..ReputationSnapshot::default()
        }
    }

    #[test]
    fn no_assignments_is_neutral_regardless_of_other_fields() {
        assert_eq!(off_chain_score(&ReputationSnapshot::default()), 500);
        let noisy = ReputationSnapshot {
            assigned: 0,
            resolved: 40,
            escalated: 12,
            total_response_hours: 9_999.0,
            total_resolution_hours: 123.0,
            positive_ratings: 3,
            negative_ratings: 30,
        };
        assert_eq!(off_chain_score(&noisy), 500);
    }

    #[test]
    fn perfect_record_scores_nine_hundred() {
        // 400 + 200 + 200 + flat 100
        assert_eq!(off_chain_score(&snapshot(10, 10, 0, 50.0)), 900);
    }

    #[test]
    fn slow_responses_lose_response_points() {
        // avg 36h -> 200 - 12 * 200 / 24 = 100
        assert_eq!(off_chain_score(&snapshot(2, 2, 0, 72.0)), 800);
        // avg 48h or worse -> 0
        assert_eq!(off_chain_score(&snapshot(2, 2, 0, 200.0)), 700);
    }

    #[test]
    fn escalations_and_unresolved_work_reduce_the_score() {
        // resolution 200, non-escalation 100, response 200, satisfaction 100
        assert_eq!(off_chain_score(&snapshot(4, 2, 2, 8.0)), 600);
    }

    #[test]
    fn applying_events_moves_the_matching_counters() {
        let mut snapshot = ReputationSnapshot::default();
        for event in [
            ReputationEvent::Assignment,
            ReputationEvent::Assignment,
            ReputationEvent::FirstResponse { hours: 10.0 },
            ReputationEvent::FirstResponse { hours: -3.0 },
            ReputationEvent::Resolution { hours: 30.0 },
            ReputationEvent::Escalation,
            ReputationEvent::Rating { positive: false },
        ] {
            snapshot.apply(event);
        }
        assert_eq!(snapshot.assigned, 2);
        assert_eq!(snapshot.resolved, 1);
        assert_eq!(snapshot.escalated, 1);
        assert_eq!(snapshot.negative_ratings, 1);
        assert!((snapshot.average_response_hours() - 5.0).abs() < 1e-9);
        assert!((snapshot.total_resolution_hours - 30.0).abs() < 1e-9);
    }

    #[test]
    fn on_chain_score_wins_when_present() {
        assert_eq!(effective_score(Some(710), 450), 710);
        assert_eq!(effective_score(None, 450), 450);
    }

    #[test]
    fn leaderboard_ranks_by_effective_score() {
        let low = AuthorityId::new();
        let high = AuthorityId::new();
        let mut entries = vec![
            LeaderboardEntry {
                rank: 0,
                authority_id: low,
                name: "Low".to_string(),
                off_chain_score: 900,
                on_chain_score: Some(300),
                effective_score: effective_score(Some(300), 900),
            },
            LeaderboardEntry {
                rank: 0,
                authority_id: high,
                name: "High".to_string(),
                off_chain_score: 600,
                on_chain_score: None,
                effective_score: effective_score(None, 600),
            },
        ];
        rank_leaderboard(&mut entries);
        assert_eq!(entries[0].authority_id, high);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].authority_id, low);
        assert_eq!(entries[1].rank, 2);
    }
}
