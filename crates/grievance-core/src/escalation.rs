use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Authority, AuthorityId, AuthorityLevel, CoreError, Grievance, GrievanceId};

pub const AUTHORITY_HIERARCHY: [AuthorityLevel; 4] = [
    AuthorityLevel::Gro,
    AuthorityLevel::Officer,
    AuthorityLevel::NodalOfficer,
    AuthorityLevel::Director,
];

/// Author recorded on audit entries written by the overdue sweep.
pub const ESCALATION_AUTHOR_ID: &str = "system:auto-escalation";

const ESCALATION_PREFIX: &str = "Auto-escalated due to missed ETA.";

/// The tier above `current`, saturating at the top of the hierarchy.
#[must_use]
pub fn next_tier(current: AuthorityLevel) -> AuthorityLevel {
    let index = AUTHORITY_HIERARCHY.iter().position(|level| *level == current).unwrap_or(0);
    AUTHORITY_HIERARCHY[(index + 1).min(AUTHORITY_HIERARCHY.len() - 1)]
}

#[must_use]
pub fn escalation_message(previous_name: Option<&str>, replacement: Option<&Authority>) -> String {
    match replacement {
        Some(authority) => format!(
            "{ESCALATION_PREFIX} Reassigned from {} to {} ({})",
            previous_name.unwrap_or("unassigned"),
            authority.name,
            authority.level
        ),
        None => format!("{ESCALATION_PREFIX} No higher authority available."),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationPlan {
    pub grievance_id: GrievanceId,
    pub previous_assignee: Option<AuthorityId>,
    pub new_assignee: Option<AuthorityId>,
    pub target_tier: AuthorityLevel,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub escalated_at: OffsetDateTime,
}

impl EscalationPlan {
    /// Whether ownership moves, as opposed to a flag-only escalation.
    #[must_use]
    pub fn reassigns(&self) -> bool {
        self.new_assignee.is_some() && self.new_assignee != self.previous_assignee
    }
}

/// Decide the outcome of escalating one overdue grievance.
///
/// `replacement` is the authority found at [`next_tier`] of the current tier,
/// if any. When it is `None` the current assignee is kept.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the grievance is already escalated,
/// is not in a sweepable status, or `replacement` is not at the target tier.
pub fn plan_escalation(
    grievance: &Grievance,
    current_assignee: Option<&Authority>,
    replacement: Option<&Authority>,
    now: OffsetDateTime,
) -> Result<EscalationPlan, CoreError> {
    if grievance.is_escalated {
        return Err(CoreError::Validation(format!(
            "grievance {} is already escalated",
            grievance.id
        )));
    }
    if !grievance.status.is_sweepable() {
        return Err(CoreError::Validation(format!(
            "grievance {} in status {} cannot be auto-escalated",
            grievance.id, grievance.status
        )));
    }

    let current_tier = current_assignee.map_or(AUTHORITY_HIERARCHY[0], |authority| authority.level);
    let target_tier = next_tier(current_tier);

    if let Some(authority) = replacement {
        if authority.level != target_tier {
            return Err(CoreError::Validation(format!(
                "replacement {} is {} but escalation targets {target_tier}",
                authority.id, authority.level
            )));
        }
    }

    Ok(EscalationPlan {
        grievance_id: grievance.id,
        previous_assignee: grievance.assigned_to_id,
        new_assignee: replacement.map(|authority| authority.id).or(grievance.assigned_to_id),
        target_tier,
        message: escalation_message(current_assignee.map(|a| a.name.as_str()), replacement),
        escalated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::GrievanceStatus;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn authority(name: &str, level: AuthorityLevel) -> Authority {
        Authority {
            id: AuthorityId::new(),
            name: name.to_string(),
            level,
            department_id: "roads".to_string(),
            external_account_id: None,
        }
    }

    fn overdue(assigned_to_id: Option<AuthorityId>) -> Grievance {
        Grievance {
            id: GrievanceId::new(),
            title: "Collapsed culvert".to_string(),
            description: "Road caved in near the school".to_string(),
            category: "Roads & Infrastructure".to_string(),
            severity: 8,
            upvotes: 4,
            priority_score: 55,
            status: GrievanceStatus::Acknowledged,
            is_escalated: false,
            escalated_at: None,
            assigned_to_id,
            department_id: "roads".to_string(),
            creator_id: "citizen-9".to_string(),
            location: None,
            embedding: Vec::new(),
            duplicate_of: None,
            canonical_hash: "b".repeat(64),
            ledger_tx_id: None,
            verified_on_ledger: false,
            estimated_resolution_date: Some(fixture_time() - Duration::days(1)),
            created_at: fixture_time() - Duration::days(10),
            updated_at: fixture_time() - Duration::days(2),
        }
    }

    #[test]
    fn next_tier_climbs_and_saturates() {
        assert_eq!(next_tier(AuthorityLevel::Gro), AuthorityLevel::Officer);
        assert_eq!(next_tier(AuthorityLevel::Officer), AuthorityLevel::NodalOfficer);
        assert_eq!(next_tier(AuthorityLevel::NodalOfficer), AuthorityLevel::Director);
        assert_eq!(next_tier(AuthorityLevel::Director), AuthorityLevel::Director);
    }

    #[test]
    fn messages_match_the_audit_templates() {
        let officer = authority("Asha Rao", AuthorityLevel::Officer);
        assert_eq!(
            escalation_message(Some("Ravi Kumar"), Some(&officer)),
            "Auto-escalated due to missed ETA. Reassigned from Ravi Kumar to Asha Rao (officer)"
        );
        assert_eq!(
            escalation_message(None, Some(&officer)),
            "Auto-escalated due to missed ETA. Reassigned from unassigned to Asha Rao (officer)"
        );
        assert_eq!(
            escalation_message(Some("Ravi Kumar"), None),
            "Auto-escalated due to missed ETA. No higher authority available."
        );
    }

    #[test]
    fn unassigned_grievance_escalates_from_the_lowest_tier() {
        let officer = authority("Asha Rao", AuthorityLevel::Officer);
        let plan = plan_escalation(&overdue(None), None, Some(&officer), fixture_time());
        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => panic!("plan should succeed: {err}"),
        };
        assert_eq!(plan.target_tier, AuthorityLevel::Officer);
        assert_eq!(plan.new_assignee, Some(officer.id));
        assert!(plan.reassigns());
    }

    #[test]
    fn flag_only_escalation_keeps_the_current_assignee() {
        let gro = authority("Ravi Kumar", AuthorityLevel::Gro);
        let grievance = overdue(Some(gro.id));
        let plan = match plan_escalation(&grievance, Some(&gro), None, fixture_time()) {
            Ok(plan) => plan,
            Err(err) => panic!("plan should succeed: {err}"),
        };
        assert_eq!(plan.new_assignee, Some(gro.id));
        assert!(!plan.reassigns());
        assert_eq!(plan.message, "Auto-escalated due to missed ETA. No higher authority available.");
    }

    #[test]
    fn already_escalated_or_resolved_grievances_are_rejected() {
        let mut grievance = overdue(None);
        grievance.is_escalated = true;
        assert!(matches!(
            plan_escalation(&grievance, None, None, fixture_time()),
            Err(CoreError::Validation(_))
        ));

        let mut grievance = overdue(None);
        grievance.status = GrievanceStatus::Resolved;
        assert!(matches!(
            plan_escalation(&grievance, None, None, fixture_time()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn replacement_at_the_wrong_tier_is_rejected() {
        let director = authority("Meera Iyer", AuthorityLevel::Director);
        assert!(matches!(
            plan_escalation(&overdue(None), None, Some(&director), fixture_time()),
            Err(CoreError::Validation(_))
        ));
    }
}
