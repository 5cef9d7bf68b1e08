use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

pub mod escalation;
pub mod hashing;
pub mod priority;
pub mod reputation;
pub mod similarity;

pub use escalation::{
    escalation_message, next_tier, plan_escalation, EscalationPlan, AUTHORITY_HIERARCHY,
    ESCALATION_AUTHOR_ID,
};
pub use hashing::{canonical_hash, canonical_timestamp, CanonicalFields};
pub use priority::{
    calculate_priority, PriorityBreakdown, PriorityInput, ScoringTables, UrgencyLevel,
};
pub use reputation::{
    effective_score, off_chain_score, rank_leaderboard, LeaderboardEntry, ReputationEvent,
    ReputationSnapshot,
};
pub use similarity::{
    assess_duplicates, cosine_similarity, passes_geo_gate, DuplicateAssessment,
    DuplicateCandidate, DuplicatePolicy, SimilarGrievance,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("external service unavailable: {0}")]
    ExternalServiceUnavailable(String),
    #[error("transient write failure: {0}")]
    TransientWrite(String),
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse an identifier from its canonical ULID string.
            ///
            /// # Errors
            /// Returns [`CoreError::Validation`] when `raw` is not a valid ULID.
            pub fn parse(raw: &str) -> Result<Self, CoreError> {
                Ulid::from_string(raw).map(Self).map_err(|err| {
                    CoreError::Validation(format!(
                        "invalid {} `{raw}`: {err}",
                        stringify!($name)
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(GrievanceId);
ulid_id!(AuthorityId);
ulid_id!(UpdateId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GrievanceStatus {
    Pending,
    Acknowledged,
    InProgress,
    Escalated,
    Resolved,
}

impl GrievanceStatus {
    /// Statuses the overdue sweep is allowed to escalate from.
    pub const SWEEPABLE: [Self; 3] = [Self::Pending, Self::Acknowledged, Self::InProgress];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::InProgress => "in_progress",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "acknowledged" => Some(Self::Acknowledged),
            "in_progress" => Some(Self::InProgress),
            "escalated" => Some(Self::Escalated),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_sweepable(self) -> bool {
        Self::SWEEPABLE.contains(&self)
    }
}

impl Display for GrievanceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityLevel {
    Gro,
    Officer,
    NodalOfficer,
    Director,
}

impl AuthorityLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gro => "gro",
            Self::Officer => "officer",
            Self::NodalOfficer => "nodal_officer",
            Self::Director => "director",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gro" => Some(Self::Gro),
            "officer" => Some(Self::Officer),
            "nodal_officer" => Some(Self::NodalOfficer),
            "director" => Some(Self::Director),
            _ => None,
        }
    }
}

impl Display for AuthorityLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grievance {
    pub id: GrievanceId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub severity: u8,
    pub upvotes: u32,
    pub priority_score: u8,
    pub status: GrievanceStatus,
    pub is_escalated: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub escalated_at: Option<OffsetDateTime>,
    pub assigned_to_id: Option<AuthorityId>,
    pub department_id: String,
    pub creator_id: String,
    pub location: Option<Coordinates>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub duplicate_of: Option<GrievanceId>,
    pub canonical_hash: String,
    pub ledger_tx_id: Option<String>,
    pub verified_on_ledger: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub estimated_resolution_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Grievance {
    /// Validate caller-supplied fields of a grievance.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when identity, severity, or location
    /// constraints are violated.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("title", &self.title),
            ("description", &self.description),
            ("category", &self.category),
            ("department_id", &self.department_id),
            ("creator_id", &self.creator_id),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{field} MUST be non-empty")));
            }
        }

        if !(1..=10).contains(&self.severity) {
            return Err(CoreError::Validation("severity MUST be in [1, 10]".to_string()));
        }

        if self.priority_score > 100 {
            return Err(CoreError::Validation("priority_score MUST be in [0, 100]".to_string()));
        }

        if let Some(location) = self.location {
            if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng)
            {
                return Err(CoreError::Validation(
                    "location MUST be valid WGS84 coordinates".to_string(),
                ));
            }
        }

        if self.canonical_hash.len() != 64 {
            return Err(CoreError::Validation(
                "canonical_hash MUST be a 64 character hex digest".to_string(),
            ));
        }

        Ok(())
    }

    /// Hours elapsed between creation and `now`, never negative.
    #[must_use]
    pub fn hours_old(&self, now: OffsetDateTime) -> f64 {
        let elapsed = now - self.created_at;
        (elapsed.as_seconds_f64() / 3600.0).max(0.0)
    }

    /// Priority inputs derived from the current row.
    #[must_use]
    pub fn priority_input(&self, now: OffsetDateTime) -> PriorityInput {
        PriorityInput {
            severity: self.severity,
            upvotes: self.upvotes,
            hours_old: self.hours_old(now),
            category: self.category.clone(),
            status: self.status,
            is_escalated: self.is_escalated,
        }
    }

    #[must_use]
    pub fn is_overdue(&self, now: OffsetDateTime) -> bool {
        self.estimated_resolution_date.is_some_and(|eta| eta < now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrievanceUpdate {
    pub id: UpdateId,
    pub grievance_id: GrievanceId,
    pub author_id: String,
    pub status: GrievanceStatus,
    pub message: String,
    pub ledger_tx_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl GrievanceUpdate {
    #[must_use]
    pub fn new(
        grievance_id: GrievanceId,
        author_id: impl Into<String>,
        status: GrievanceStatus,
        message: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: UpdateId::new(),
            grievance_id,
            author_id: author_id.into(),
            status,
            message: message.into(),
            ledger_tx_id: None,
            created_at: truncate_to_millis(created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authority {
    pub id: AuthorityId,
    pub name: String,
    pub level: AuthorityLevel,
    pub department_id: String,
    pub external_account_id: Option<String>,
}

impl Authority {
    /// Validate required authority fields.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when name or department is empty, or an
    /// external account is present but blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("authority name MUST be non-empty".to_string()));
        }
        if self.department_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "authority department_id MUST be non-empty".to_string(),
            ));
        }
        if self.external_account_id.as_deref().is_some_and(|account| account.trim().is_empty()) {
            return Err(CoreError::Validation(
                "external_account_id MUST be omitted or non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Drop sub-millisecond precision so stored and hashed timestamps agree.
#[must_use]
pub fn truncate_to_millis(value: OffsetDateTime) -> OffsetDateTime {
    let excess = i64::from(value.nanosecond() % 1_000_000);
    value - Duration::nanoseconds(excess)
}
