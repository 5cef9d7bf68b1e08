use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use grievance_core::{off_chain_score, GrievanceStatus, ReputationEvent, ReputationSnapshot};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::{
    BlockRange, EventKindFilter, GrievanceLedger, HistoryEntry, LedgerError, LedgerEvent,
    LedgerEventKind, ReputationLedger, TxReceipt,
};

const IN_MEMORY_ACCOUNT: &str = "in-memory-gateway";

/// Number of most recent events kept for historical queries.
pub const DEFAULT_EVENT_RETENTION: usize = 4096;

/// Failure injected into every subsequent call until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Unavailable,
    RateLimited,
    Rejected,
}

impl FailureMode {
    fn to_error(self) -> LedgerError {
        match self {
            Self::Unavailable => LedgerError::Unavailable("injected outage".to_string()),
            Self::RateLimited => LedgerError::RateLimited,
            Self::Rejected => LedgerError::Rejected("injected rejection".to_string()),
        }
    }
}

struct LedgerState {
    head: u64,
    registered: BTreeMap<String, u64>,
    history: BTreeMap<String, Vec<HistoryEntry>>,
    events: VecDeque<LedgerEvent>,
    event_retention: usize,
    subscribers: Vec<mpsc::Sender<LedgerEvent>>,
    reputation: BTreeMap<String, ReputationSnapshot>,
    score_overrides: BTreeMap<String, u16>,
    failure: Option<FailureMode>,
    writes: usize,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            head: 0,
            registered: BTreeMap::new(),
            history: BTreeMap::new(),
            events: VecDeque::new(),
            event_retention: DEFAULT_EVENT_RETENTION,
            subscribers: Vec::new(),
            reputation: BTreeMap::new(),
            score_overrides: BTreeMap::new(),
            failure: None,
            writes: 0,
        }
    }
}

impl LedgerState {
    fn check(&self) -> Result<(), LedgerError> {
        self.failure.map_or(Ok(()), |mode| Err(mode.to_error()))
    }

    fn mine(&mut self) -> TxReceipt {
        self.head += 1;
        self.writes += 1;
        TxReceipt { tx_id: format!("0x{:016x}", self.writes), block: self.head }
    }

    fn publish(&mut self, event: LedgerEvent) {
        self.subscribers.retain(|sender| !sender.is_closed());
        for sender in &self.subscribers {
            if sender.try_send(event.clone()).is_err() {
                tracing::warn!(block = event.block, "ledger subscriber lagging; event dropped");
            }
        }
        self.events.push_back(event);
        while self.events.len() > self.event_retention {
            self.events.pop_front();
        }
    }
}

/// In-process ledger with a block counter, a live feed, and failure injection.
///
/// Only the newest [`DEFAULT_EVENT_RETENTION`] events stay queryable through
/// `events_between`; live subscribers still see every event. Receipts and
/// history are kept for the life of the process.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `head` blocks already mined and no events.
    #[must_use]
    pub fn with_head(head: u64) -> Self {
        let ledger = Self::default();
        ledger.lock().head = head;
        ledger
    }

    /// Keep at most `limit` events for historical queries.
    #[must_use]
    pub fn with_event_retention(self, limit: usize) -> Self {
        self.lock().event_retention = limit.max(1);
        self
    }

    pub fn set_failure(&self, failure: Option<FailureMode>) {
        self.lock().failure = failure;
    }

    /// Mine `count` blocks that carry no grievance events.
    pub fn advance(&self, count: u64) {
        self.lock().head += count;
    }

    /// Confirm a registration that was written by another node.
    pub fn confirm_external_registration(&self, canonical_hash: &str) -> TxReceipt {
        let mut state = self.lock();
        let receipt = state.mine();
        state.registered.insert(canonical_hash.to_string(), receipt.block);
        state.publish(LedgerEvent {
            block: receipt.block,
            tx_id: receipt.tx_id.clone(),
            canonical_hash: canonical_hash.to_string(),
            kind: LedgerEventKind::Registered,
        });
        receipt
    }

    /// Pin the on-chain score returned for `account`.
    pub fn set_score(&self, account: &str, score: u16) {
        self.lock().score_overrides.insert(account.to_string(), score);
    }

    #[must_use]
    pub fn reputation_snapshot(&self, account: &str) -> Option<ReputationSnapshot> {
        self.lock().reputation.get(account).copied()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl GrievanceLedger for InMemoryLedger {
    async fn register(&self, canonical_hash: &str) -> Result<TxReceipt, LedgerError> {
        let mut state = self.lock();
        state.check()?;
        if state.registered.contains_key(canonical_hash) {
            return Err(LedgerError::Rejected(format!("{canonical_hash} is already registered")));
        }

        let receipt = state.mine();
        state.registered.insert(canonical_hash.to_string(), receipt.block);
        state.history.entry(canonical_hash.to_string()).or_default().push(HistoryEntry {
            status: GrievanceStatus::Pending,
            updater_account: IN_MEMORY_ACCOUNT.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            message: "registered".to_string(),
        });
        state.publish(LedgerEvent {
            block: receipt.block,
            tx_id: receipt.tx_id.clone(),
            canonical_hash: canonical_hash.to_string(),
            kind: LedgerEventKind::Registered,
        });
        Ok(receipt)
    }

    async fn record_status(
        &self,
        canonical_hash: &str,
        status: GrievanceStatus,
        message: &str,
    ) -> Result<TxReceipt, LedgerError> {
        let mut state = self.lock();
        state.check()?;
        if !state.registered.contains_key(canonical_hash) {
            return Err(LedgerError::Rejected(format!("{canonical_hash} is not registered")));
        }

        let receipt = state.mine();
        state.history.entry(canonical_hash.to_string()).or_default().push(HistoryEntry {
            status,
            updater_account: IN_MEMORY_ACCOUNT.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            message: message.to_string(),
        });
        state.publish(LedgerEvent {
            block: receipt.block,
            tx_id: receipt.tx_id.clone(),
            canonical_hash: canonical_hash.to_string(),
            kind: LedgerEventKind::StatusChanged { status, message: message.to_string() },
        });
        Ok(receipt)
    }

    async fn exists(&self, canonical_hash: &str) -> Result<bool, LedgerError> {
        let state = self.lock();
        state.check()?;
        Ok(state.registered.contains_key(canonical_hash))
    }

    async fn history(&self, canonical_hash: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        let state = self.lock();
        state.check()?;
        Ok(state.history.get(canonical_hash).cloned().unwrap_or_default())
    }

    async fn head_block(&self) -> Result<u64, LedgerError> {
        let state = self.lock();
        state.check()?;
        Ok(state.head)
    }

    async fn events_between(
        &self,
        range: BlockRange,
        filter: EventKindFilter,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let state = self.lock();
        state.check()?;
        Ok(state
            .events
            .iter()
            .filter(|event| range.contains(event.block) && filter.matches(&event.kind))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, buffer: usize) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError> {
        let mut state = self.lock();
        state.check()?;
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        state.subscribers.push(sender);
        Ok(receiver)
    }
}

#[async_trait]
impl ReputationLedger for InMemoryLedger {
    async fn record(
        &self,
        account: &str,
        event: ReputationEvent,
    ) -> Result<TxReceipt, LedgerError> {
        let mut state = self.lock();
        state.check()?;
        state.reputation.entry(account.to_string()).or_default().apply(event);
        Ok(state.mine())
    }

    async fn score(&self, account: &str) -> Result<Option<u16>, LedgerError> {
        let state = self.lock();
        state.check()?;
        if let Some(score) = state.score_overrides.get(account) {
            return Ok(Some(*score));
        }
        Ok(state.reputation.get(account).map(off_chain_score))
    }
}

/// Ledger adapter for deployments without a gateway. Every call is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineLedger;

impl OfflineLedger {
    fn unavailable<T>() -> Result<T, LedgerError> {
        Err(LedgerError::Unavailable("no ledger gateway configured".to_string()))
    }
}

#[async_trait]
impl GrievanceLedger for OfflineLedger {
    async fn register(&self, _canonical_hash: &str) -> Result<TxReceipt, LedgerError> {
        Self::unavailable()
    }

    async fn record_status(
        &self,
        _canonical_hash: &str,
        _status: GrievanceStatus,
        _message: &str,
    ) -> Result<TxReceipt, LedgerError> {
        Self::unavailable()
    }

    async fn exists(&self, _canonical_hash: &str) -> Result<bool, LedgerError> {
        Self::unavailable()
    }

    async fn history(&self, _canonical_hash: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        Self::unavailable()
    }

    async fn head_block(&self) -> Result<u64, LedgerError> {
        Self::unavailable()
    }

    async fn events_between(
        &self,
        _range: BlockRange,
        _filter: EventKindFilter,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        Self::unavailable()
    }

    async fn subscribe(&self, _buffer: usize) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError> {
        Self::unavailable()
    }
}

#[async_trait]
impl ReputationLedger for OfflineLedger {
    async fn record(
        &self,
        _account: &str,
        _event: ReputationEvent,
    ) -> Result<TxReceipt, LedgerError> {
        Self::unavailable()
    }

    async fn score(&self, _account: &str) -> Result<Option<u16>, LedgerError> {
        Self::unavailable()
    }
}
