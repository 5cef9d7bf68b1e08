//! Folds confirmed ledger events back into local grievance state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use grievance_core::GrievanceId;
use grievance_ledger::{
    clamp_block_range, BlockRange, EventKindFilter, GrievanceLedger, LedgerEvent, LedgerEventKind,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::open_store;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Applied { grievance_id: GrievanceId },
    UnknownGrievance,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub from: u64,
    pub to: u64,
    pub windows: u64,
    pub events_seen: usize,
    pub applied: usize,
    pub unknown: usize,
}

pub struct LedgerEventSync {
    db_path: PathBuf,
    ledger: Arc<dyn GrievanceLedger>,
    max_span: u64,
    last_processed_block: AtomicU64,
}

impl LedgerEventSync {
    #[must_use]
    pub fn new(db_path: PathBuf, ledger: Arc<dyn GrievanceLedger>, max_span: u64) -> Self {
        Self { db_path, ledger, max_span: max_span.max(1), last_processed_block: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.last_processed_block.load(Ordering::Acquire)
    }

    /// Seed the watermark from the ledger head, or 0 when the head is unreadable.
    pub async fn initialize(&self) -> u64 {
        let head = match self.ledger.head_block().await {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!(error = %err, "ledger head unavailable; starting watermark at 0");
                0
            }
        };
        self.last_processed_block.fetch_max(head, Ordering::AcqRel);
        tracing::info!(block = self.watermark(), "ledger event watermark initialized");
        self.watermark()
    }

    /// Apply one confirmed event. Applying the same event again changes nothing.
    ///
    /// # Errors
    /// Returns an error when the local store cannot be read or written.
    pub fn apply_event(&self, event: &LedgerEvent) -> Result<EventOutcome> {
        let mut store = open_store(&self.db_path)?;
        // Status confirmations only verify the grievance; audit rows are stamped
        // by the anchor against the update id that produced the write.
        let tx_id = match &event.kind {
            LedgerEventKind::Registered => Some(event.tx_id.as_str()),
            LedgerEventKind::StatusChanged { .. } => None,
        };
        let outcome = match store.mark_verified_by_hash(&event.canonical_hash, tx_id)? {
            Some(grievance_id) => EventOutcome::Applied { grievance_id },
            None => EventOutcome::UnknownGrievance,
        };

        self.last_processed_block.fetch_max(event.block, Ordering::AcqRel);
        match outcome {
            EventOutcome::Applied { grievance_id } => tracing::debug!(
                grievance_id = %grievance_id,
                canonical_hash = %event.canonical_hash,
                block = event.block,
                "ledger event applied"
            ),
            EventOutcome::UnknownGrievance => tracing::debug!(
                canonical_hash = %event.canonical_hash,
                block = event.block,
                "ledger event for unknown grievance ignored"
            ),
        }
        Ok(outcome)
    }

    /// Historical events, clamped to at most `max_span` blocks back from `to`.
    /// `to = None` means the current watermark.
    ///
    /// # Errors
    /// Returns an error when the ledger cannot be queried.
    pub async fn query_past(
        &self,
        from: u64,
        to: Option<u64>,
        filter: EventKindFilter,
    ) -> Result<(BlockRange, Vec<LedgerEvent>)> {
        let range = clamp_block_range(from, to.unwrap_or_else(|| self.watermark()), self.max_span);
        if range.is_empty() {
            return Ok((range, Vec::new()));
        }
        let events = self
            .ledger
            .events_between(range, filter)
            .await
            .with_context(|| format!("ledger event query {}..={} failed", range.from, range.to))?;
        Ok((range, events))
    }

    /// Page from `from` to the watermark in windows of at most `max_span` blocks,
    /// applying every event found.
    ///
    /// # Errors
    /// Returns an error when a window cannot be fetched or an event cannot be applied.
    pub async fn backfill(&self, from: u64) -> Result<BackfillReport> {
        let to = self.watermark();
        let mut report = BackfillReport { from, to, ..BackfillReport::default() };
        let mut cursor = from;
        while cursor <= to {
            let window = BlockRange {
                from: cursor,
                to: cursor.saturating_add(self.max_span - 1).min(to),
            };
            let events = self
                .ledger
                .events_between(window, EventKindFilter::All)
                .await
                .with_context(|| format!("ledger backfill window {}..={} failed", window.from, window.to))?;
            report.windows += 1;
            for event in &events {
                report.events_seen += 1;
                match self.apply_event(event)? {
                    EventOutcome::Applied { .. } => report.applied += 1,
                    EventOutcome::UnknownGrievance => report.unknown += 1,
                }
            }
            if window.to == u64::MAX {
                break;
            }
            cursor = window.to + 1;
        }
        tracing::info!(
            from,
            to,
            windows = report.windows,
            applied = report.applied,
            "ledger backfill finished"
        );
        Ok(report)
    }

    /// Single consumer loop over the live feed. Ends on shutdown or when the feed closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LedgerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(block = self.watermark(), "ledger event sync stopping");
                        break;
                    }
                }
                next = events.recv() => {
                    let Some(event) = next else {
                        tracing::warn!(block = self.watermark(), "ledger subscription closed");
                        break;
                    };
                    if let Err(err) = self.apply_event(&event) {
                        tracing::warn!(
                            canonical_hash = %event.canonical_hash,
                            block = event.block,
                            error = %err,
                            "failed to apply ledger event"
                        );
                    }
                }
            }
        }
    }

    /// Initialize the watermark, subscribe, and spawn the consumer loop.
    /// Returns `None` when the ledger refuses the subscription.
    pub async fn start(
        self: Arc<Self>,
        buffer: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        self.initialize().await;
        match self.ledger.subscribe(buffer).await {
            Ok(events) => Some(tokio::spawn(self.run(events, shutdown))),
            Err(err) => {
                tracing::warn!(error = %err, "ledger subscription unavailable; live sync disabled");
                None
            }
        }
    }
}
