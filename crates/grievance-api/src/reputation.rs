//! Local authority stats with a fire-and-forget mirror to the reputation ledger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use grievance_core::{
    effective_score, off_chain_score, rank_leaderboard, Authority, AuthorityId, LeaderboardEntry,
    ReputationEvent, ReputationSnapshot,
};
use grievance_ledger::ReputationLedger;
use serde::{Deserialize, Serialize};

use crate::background::BackgroundQueue;
use crate::open_store;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorityReputation {
    pub authority: Authority,
    pub stats: ReputationSnapshot,
    pub off_chain_score: u16,
    pub on_chain_score: Option<u16>,
    pub effective_score: u16,
}

#[derive(Clone)]
pub struct ReputationAccumulator {
    db_path: PathBuf,
    ledger: Arc<dyn ReputationLedger>,
    queue: BackgroundQueue,
}

impl ReputationAccumulator {
    #[must_use]
    pub fn new(db_path: PathBuf, ledger: Arc<dyn ReputationLedger>, queue: BackgroundQueue) -> Self {
        Self { db_path, ledger, queue }
    }

    /// Apply `event` to the local stats row, then queue the ledger mirror when
    /// the authority has an external account.
    ///
    /// # Errors
    /// Returns an error when the authority is unknown or the local write fails.
    pub fn record(&self, authority_id: AuthorityId, event: ReputationEvent) -> Result<()> {
        let mut store = open_store(&self.db_path)?;
        let authority = store
            .get_authority(authority_id)?
            .ok_or_else(|| anyhow!("authority {authority_id} not found"))?;
        store.record_stats_event(authority_id, event)?;

        if let Some(account) = authority.external_account_id {
            let ledger = Arc::clone(&self.ledger);
            self.queue.submit("reputation_mirror", async move {
                let receipt = ledger
                    .record(&account, event)
                    .await
                    .with_context(|| format!("reputation mirror failed for {account}"))?;
                tracing::debug!(
                    authority_id = %authority_id,
                    event = event.as_str(),
                    tx_id = %receipt.tx_id,
                    "reputation event mirrored"
                );
                Ok(())
            });
        }
        Ok(())
    }

    /// [`Self::record`] for lifecycle call sites, where a failure is logged and swallowed.
    pub fn track(&self, authority_id: AuthorityId, event: ReputationEvent) {
        if let Err(err) = self.record(authority_id, event) {
            tracing::warn!(
                authority_id = %authority_id,
                event = event.as_str(),
                error = %err,
                "failed to record reputation event"
            );
        }
    }

    pub fn record_assignment(&self, authority_id: AuthorityId) {
        self.track(authority_id, ReputationEvent::Assignment);
    }

    pub fn record_first_response(&self, authority_id: AuthorityId, hours: f64) {
        self.track(authority_id, ReputationEvent::FirstResponse { hours });
    }

    pub fn record_resolution(&self, authority_id: AuthorityId, hours: f64) {
        self.track(authority_id, ReputationEvent::Resolution { hours });
    }

    pub fn record_escalation(&self, authority_id: AuthorityId) {
        self.track(authority_id, ReputationEvent::Escalation);
    }

    /// Credit a citizen rating. Unlike the lifecycle hooks, failures are returned.
    ///
    /// # Errors
    /// Returns an error when the authority is unknown or the local write fails.
    pub fn submit_rating(&self, authority_id: AuthorityId, positive: bool) -> Result<()> {
        self.record(authority_id, ReputationEvent::Rating { positive })
    }

    /// Returns `None` when the authority does not exist.
    ///
    /// # Errors
    /// Returns an error when the local store cannot be read.
    pub async fn reputation(&self, authority_id: AuthorityId) -> Result<Option<AuthorityReputation>> {
        let (authority, stats) = {
            let store = open_store(&self.db_path)?;
            let Some(authority) = store.get_authority(authority_id)? else {
                return Ok(None);
            };
            let stats = store.authority_stats(authority_id)?;
            (authority, stats)
        };

        let on_chain_score = self.on_chain_score(&authority).await;
        let off_chain = off_chain_score(&stats);
        Ok(Some(AuthorityReputation {
            effective_score: effective_score(on_chain_score, off_chain),
            off_chain_score: off_chain,
            on_chain_score,
            stats,
            authority,
        }))
    }

    /// Every authority ranked by effective score.
    ///
    /// # Errors
    /// Returns an error when the local store cannot be read.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let rows = open_store(&self.db_path)?.list_authority_stats()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (authority, stats) in rows {
            let on_chain_score = self.on_chain_score(&authority).await;
            let off_chain = off_chain_score(&stats);
            entries.push(LeaderboardEntry {
                rank: 0,
                authority_id: authority.id,
                name: authority.name,
                off_chain_score: off_chain,
                on_chain_score,
                effective_score: effective_score(on_chain_score, off_chain),
            });
        }
        rank_leaderboard(&mut entries);
        Ok(entries)
    }

    async fn on_chain_score(&self, authority: &Authority) -> Option<u16> {
        let account = authority.external_account_id.as_deref()?;
        match self.ledger.score(account).await {
            Ok(score) => score,
            Err(err) => {
                tracing::warn!(
                    authority_id = %authority.id,
                    error = %err,
                    "on-chain reputation unavailable; using local score"
                );
                None
            }
        }
    }
}
