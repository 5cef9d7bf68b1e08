//! Ports to the external grievance and reputation ledgers, plus adapters.
//!
//! The ledger is append-only and asynchronous. Nothing in this crate retries;
//! callers treat every write as best-effort and local state stays authoritative.

use async_trait::async_trait;
use grievance_core::{CoreError, GrievanceStatus, ReputationEvent};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;

pub mod http;
pub mod memory;

pub use http::{HttpLedgerGateway, HttpReputationGateway};
pub use memory::{FailureMode, InMemoryLedger, OfflineLedger};

/// Widest block window a historical event query may cover.
pub const DEFAULT_MAX_EVENT_SPAN: u64 = 10;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger rejected the write: {0}")]
    Rejected(String),
    #[error("ledger rate limited the request")]
    RateLimited,
    #[error("ledger response could not be decoded: {0}")]
    Decode(String),
}

impl From<LedgerError> for CoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(_) | LedgerError::Decode(_) => {
                Self::ExternalServiceUnavailable(err.to_string())
            }
            LedgerError::Rejected(_) | LedgerError::RateLimited => {
                Self::TransientWrite(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_id: String,
    pub block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEventKind {
    Registered,
    StatusChanged { status: GrievanceStatus, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEvent {
    pub block: u64,
    pub tx_id: String,
    pub canonical_hash: String,
    #[serde(flatten)]
    pub kind: LedgerEventKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventKindFilter {
    #[default]
    All,
    Registered,
    Status,
}

impl EventKindFilter {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Registered => "registered",
            Self::Status => "status",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "registered" => Some(Self::Registered),
            "status" => Some(Self::Status),
            _ => None,
        }
    }

    #[must_use]
    pub fn matches(self, kind: &LedgerEventKind) -> bool {
        match self {
            Self::All => true,
            Self::Registered => matches!(kind, LedgerEventKind::Registered),
            Self::Status => matches!(kind, LedgerEventKind::StatusChanged { .. }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub status: GrievanceStatus,
    pub updater_account: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: String,
}

/// Inclusive block range. Empty when `from > to`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    #[must_use]
    pub fn contains(self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.from > self.to
    }
}

/// Clamp a historical query so it never spans more than `max_span` blocks back from `to`.
#[must_use]
pub fn clamp_block_range(requested_from: u64, to: u64, max_span: u64) -> BlockRange {
    BlockRange { from: requested_from.max(to.saturating_sub(max_span)), to }
}

/// Write and read port for grievance identity and status history.
#[async_trait]
pub trait GrievanceLedger: Send + Sync {
    async fn register(&self, canonical_hash: &str) -> Result<TxReceipt, LedgerError>;

    async fn record_status(
        &self,
        canonical_hash: &str,
        status: GrievanceStatus,
        message: &str,
    ) -> Result<TxReceipt, LedgerError>;

    async fn exists(&self, canonical_hash: &str) -> Result<bool, LedgerError>;

    async fn history(&self, canonical_hash: &str) -> Result<Vec<HistoryEntry>, LedgerError>;

    async fn head_block(&self) -> Result<u64, LedgerError>;

    async fn events_between(
        &self,
        range: BlockRange,
        filter: EventKindFilter,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// Live feed of confirmed events. The feed ends when the receiver is dropped.
    async fn subscribe(&self, buffer: usize) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError>;
}

/// Port for the authority reputation contract, keyed by external account.
#[async_trait]
pub trait ReputationLedger: Send + Sync {
    async fn record(&self, account: &str, event: ReputationEvent)
        -> Result<TxReceipt, LedgerError>;

    /// On-chain score, or `None` when the account has no on-chain record.
    async fn score(&self, account: &str) -> Result<Option<u16>, LedgerError>;
}
