//! Periodic overdue sweep that escalates grievances up the authority hierarchy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use grievance_core::{
    calculate_priority, next_tier, plan_escalation, AuthorityId, AuthorityLevel, Grievance,
    GrievanceId, GrievanceStatus, GrievanceUpdate, ScoringTables, ESCALATION_AUTHOR_ID,
};
use grievance_store_sqlite::{AuthorityQuery, OverdueQuery, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::anchor::LedgerAnchor;
use crate::background::BackgroundQueue;
use crate::notify::{self, Notification, NotificationKind, Notifier};
use crate::open_store;
use crate::reputation::ReputationAccumulator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub grievance_id: GrievanceId,
    pub previous_assignee: Option<AuthorityId>,
    pub new_assignee: Option<AuthorityId>,
    pub target_tier: AuthorityLevel,
    pub reassigned: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub skipped_in_flight: bool,
    pub scanned: usize,
    pub escalated: Vec<EscalationOutcome>,
    pub already_escalated: usize,
    pub failed: usize,
}

impl SweepReport {
    fn empty(started_at: OffsetDateTime) -> Self {
        Self {
            started_at,
            skipped_in_flight: false,
            scanned: 0,
            escalated: Vec::new(),
            already_escalated: 0,
            failed: 0,
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EscalationPolicyEngine {
    db_path: PathBuf,
    scoring: ScoringTables,
    batch_limit: usize,
    anchor: LedgerAnchor,
    reputation: ReputationAccumulator,
    notifier: Arc<dyn Notifier>,
    queue: BackgroundQueue,
    in_flight: AtomicBool,
}

impl EscalationPolicyEngine {
    #[must_use]
    pub fn new(
        db_path: PathBuf,
        scoring: ScoringTables,
        batch_limit: usize,
        anchor: LedgerAnchor,
        reputation: ReputationAccumulator,
        notifier: Arc<dyn Notifier>,
        queue: BackgroundQueue,
    ) -> Self {
        Self {
            db_path,
            scoring,
            batch_limit,
            anchor,
            reputation,
            notifier,
            queue,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Escalate every overdue grievance once. Overlapping calls return a report
    /// with `skipped_in_flight` set and do nothing.
    ///
    /// # Errors
    /// Returns an error when the overdue query itself fails. Per-grievance
    /// failures are logged and counted in the report.
    pub fn run_sweep(&self, now: OffsetDateTime) -> Result<SweepReport> {
        let mut report = SweepReport::empty(now);
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("escalation sweep already running; skipping");
            report.skipped_in_flight = true;
            return Ok(report);
        }
        let _guard = InFlight(&self.in_flight);

        let mut store = open_store(&self.db_path)?;
        let candidates = store.list_overdue(&OverdueQuery { now, limit: self.batch_limit })?;
        report.scanned = candidates.len();

        for grievance in &candidates {
            match self.escalate_one(&mut store, grievance, now) {
                Ok(Some(outcome)) => report.escalated.push(outcome),
                Ok(None) => report.already_escalated += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        grievance_id = %grievance.id,
                        error = %err,
                        "failed to escalate overdue grievance"
                    );
                }
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                escalated = report.escalated.len(),
                already_escalated = report.already_escalated,
                failed = report.failed,
                "escalation sweep finished"
            );
        }
        Ok(report)
    }

    fn escalate_one(
        &self,
        store: &mut SqliteStore,
        grievance: &Grievance,
        now: OffsetDateTime,
    ) -> Result<Option<EscalationOutcome>> {
        let current = match grievance.assigned_to_id {
            Some(id) => store.get_authority(id)?,
            None => None,
        };
        let current_tier = current.as_ref().map_or(AuthorityLevel::Gro, |authority| authority.level);
        let target_tier = next_tier(current_tier);
        let exclude = current.as_ref().map(|authority| authority.id);

        let replacement = match store.find_authority(&AuthorityQuery {
            level: target_tier,
            department_id: Some(grievance.department_id.clone()),
            exclude,
        })? {
            Some(found) => Some(found),
            None => store.find_authority(&AuthorityQuery {
                level: target_tier,
                department_id: None,
                exclude,
            })?,
        };

        let plan = plan_escalation(grievance, current.as_ref(), replacement.as_ref(), now)?;

        let mut escalated = grievance.clone();
        escalated.status = GrievanceStatus::Escalated;
        escalated.is_escalated = true;
        let priority = calculate_priority(&escalated.priority_input(now), &self.scoring)?;

        let update = GrievanceUpdate::new(
            grievance.id,
            ESCALATION_AUTHOR_ID,
            GrievanceStatus::Escalated,
            plan.message.clone(),
            now,
        );
        if !store.apply_escalation(&plan, priority.total_score, &update)? {
            return Ok(None);
        }

        tracing::info!(
            grievance_id = %grievance.id,
            target_tier = %plan.target_tier,
            reassigned = plan.reassigns(),
            "grievance auto-escalated"
        );

        self.anchor.schedule_status_mirror(grievance.canonical_hash.clone(), &update);
        notify::schedule(&self.queue, &self.notifier, Notification {
            grievance_id: grievance.id,
            recipient_id: grievance.creator_id.clone(),
            kind: NotificationKind::Escalated,
            status: GrievanceStatus::Escalated,
            message: plan.message.clone(),
        });
        if let Some(previous) = plan.previous_assignee {
            self.reputation.record_escalation(previous);
        }
        if plan.reassigns() {
            if let Some(next) = plan.new_assignee {
                self.reputation.record_assignment(next);
            }
        }

        Ok(Some(EscalationOutcome {
            grievance_id: plan.grievance_id,
            previous_assignee: plan.previous_assignee,
            new_assignee: plan.new_assignee,
            target_tier: plan.target_tier,
            reassigned: plan.reassigns(),
            message: plan.message,
        }))
    }

    /// Run [`Self::run_sweep`] every `interval` until `shutdown` flips to `true`.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("escalation sweep loop stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_sweep(OffsetDateTime::now_utc()) {
                            tracing::warn!(error = %err, "escalation sweep failed");
                        }
                    }
                }
            }
        })
    }
}
