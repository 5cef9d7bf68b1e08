//! Best-effort anchoring of grievance identity and status history on the ledger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use grievance_core::{GrievanceId, GrievanceStatus, GrievanceUpdate, UpdateId};
use grievance_ledger::{GrievanceLedger, HistoryEntry, TxReceipt};

use crate::background::BackgroundQueue;
use crate::open_store;

#[derive(Clone)]
pub struct LedgerAnchor {
    db_path: PathBuf,
    ledger: Arc<dyn GrievanceLedger>,
    queue: BackgroundQueue,
}

impl LedgerAnchor {
    #[must_use]
    pub fn new(db_path: PathBuf, ledger: Arc<dyn GrievanceLedger>, queue: BackgroundQueue) -> Self {
        Self { db_path, ledger, queue }
    }

    /// Queue the single registration attempt for a freshly created grievance.
    pub fn schedule_registration(&self, grievance_id: GrievanceId, canonical_hash: String) -> bool {
        let anchor = self.clone();
        self.queue.submit("ledger_registration", async move {
            anchor.register(grievance_id, &canonical_hash).await.map(|_| ())
        })
    }

    /// Queue the mirror write for one local transition.
    pub fn schedule_status_mirror(&self, canonical_hash: String, update: &GrievanceUpdate) -> bool {
        let anchor = self.clone();
        let update_id = update.id;
        let status = update.status;
        let message = update.message.clone();
        self.queue.submit("ledger_status_mirror", async move {
            anchor.mirror_status(&canonical_hash, update_id, status, &message).await.map(|_| ())
        })
    }

    /// Register `canonical_hash` and record the receipt on the grievance row.
    ///
    /// # Errors
    /// Returns an error when the ledger write or the local update fails. The
    /// grievance row is left untouched on ledger failure.
    pub async fn register(&self, grievance_id: GrievanceId, canonical_hash: &str) -> Result<TxReceipt> {
        let receipt = self.ledger.register(canonical_hash).await.with_context(|| {
            format!("ledger registration failed for grievance {grievance_id}")
        })?;

        let mut store = open_store(&self.db_path)?;
        let stored = store.set_ledger_registration(grievance_id, &receipt.tx_id)?;
        tracing::info!(
            grievance_id = %grievance_id,
            canonical_hash,
            tx_id = %receipt.tx_id,
            block = receipt.block,
            stored,
            "grievance registered on ledger"
        );
        Ok(receipt)
    }

    /// Write one status transition and backfill its audit row by primary key.
    ///
    /// # Errors
    /// Returns an error when the ledger write or the local backfill fails.
    pub async fn mirror_status(
        &self,
        canonical_hash: &str,
        update_id: UpdateId,
        status: GrievanceStatus,
        message: &str,
    ) -> Result<TxReceipt> {
        let receipt = self
            .ledger
            .record_status(canonical_hash, status, message)
            .await
            .with_context(|| format!("ledger status mirror failed for update {update_id}"))?;

        let mut store = open_store(&self.db_path)?;
        let stored = store.set_update_ledger_tx(update_id, &receipt.tx_id)?;
        tracing::info!(
            canonical_hash,
            update_id = %update_id,
            status = %status,
            tx_id = %receipt.tx_id,
            block = receipt.block,
            stored,
            "status change mirrored on ledger"
        );
        Ok(receipt)
    }

    /// Whether the ledger knows `canonical_hash`; `false` when it cannot be asked.
    pub async fn verify_exists(&self, canonical_hash: &str) -> bool {
        match self.ledger.exists(canonical_hash).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(canonical_hash, error = %err, "ledger existence check failed");
                false
            }
        }
    }

    /// On-ledger status history; empty when the ledger cannot be asked.
    pub async fn history(&self, canonical_hash: &str) -> Vec<HistoryEntry> {
        match self.ledger.history(canonical_hash).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(canonical_hash, error = %err, "ledger history read failed");
                Vec::new()
            }
        }
    }
}
