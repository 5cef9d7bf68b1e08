//! Grievance lifecycle API shared by the HTTP service and the CLI.
//!
//! Local SQLite state is authoritative. Every ledger, embedding and
//! notification call runs on the [`BackgroundQueue`] unless the caller
//! explicitly awaits a read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use grievance_core::{
    calculate_priority, canonical_hash, truncate_to_millis, Authority, AuthorityId, AuthorityLevel,
    CanonicalFields, Coordinates, CoreError, DuplicateAssessment, Grievance, GrievanceId,
    GrievanceStatus, GrievanceUpdate, LeaderboardEntry, PriorityBreakdown,
};
use grievance_ledger::{
    BlockRange, EventKindFilter, GrievanceLedger, HistoryEntry, InMemoryLedger, LedgerEvent,
    OfflineLedger, ReputationLedger,
};
use grievance_store_sqlite::{GrievanceListQuery, IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub mod anchor;
pub mod background;
pub mod config;
pub mod duplicates;
pub mod embedding;
pub mod escalation;
pub mod event_sync;
pub mod notify;
pub mod reputation;

pub use anchor::LedgerAnchor;
pub use background::{BackgroundQueue, QueueStats};
pub use config::GrievanceConfig;
pub use duplicates::DuplicateDetector;
pub use embedding::{DisabledEmbedder, Embedder, HttpEmbedder};
pub use escalation::{EscalationOutcome, EscalationPolicyEngine, SweepReport};
pub use event_sync::{BackfillReport, EventOutcome, LedgerEventSync};
pub use notify::{Notification, NotificationKind, Notifier, RecordingNotifier, TracingNotifier};
pub use reputation::{AuthorityReputation, ReputationAccumulator};

pub const API_CONTRACT_VERSION: &str = "api.v1";

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => Self::Validation(message),
            CoreError::NotFound(message) => Self::NotFound(message),
            CoreError::Permission(message) => Self::Permission(message),
            other @ (CoreError::ExternalServiceUnavailable(_) | CoreError::TransientWrite(_)) => {
                Self::Internal(anyhow::Error::new(other))
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// External ports handed to the API at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn GrievanceLedger>,
    pub reputation: Arc<dyn ReputationLedger>,
    pub embedder: Arc<dyn Embedder>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// No ledger, no embeddings; notifications go to the log.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            ledger: Arc::new(OfflineLedger),
            reputation: Arc::new(OfflineLedger),
            embedder: Arc::new(DisabledEmbedder),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Both ledger ports backed by one in-process ledger.
    #[must_use]
    pub fn in_memory(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            ledger: Arc::clone(&ledger) as Arc<dyn GrievanceLedger>,
            reputation: ledger,
            embedder: Arc::new(DisabledEmbedder),
            notifier: Arc::new(TracingNotifier),
        }
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitGrievanceRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub severity: u8,
    pub department_id: String,
    pub creator_id: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub estimated_resolution_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub assigned_to_id: Option<AuthorityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChangeRequest {
    pub actor_id: AuthorityId,
    pub status: GrievanceStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignRequest {
    pub authority_id: AuthorityId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterAuthorityRequest {
    pub name: String,
    pub level: AuthorityLevel,
    pub department_id: String,
    #[serde(default)]
    pub external_account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerVerification {
    pub grievance_id: GrievanceId,
    pub canonical_hash: String,
    pub exists_on_ledger: bool,
    pub verified_on_ledger: bool,
    pub ledger_tx_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEventPage {
    pub range: BlockRange,
    pub events: Vec<LedgerEvent>,
}

pub(crate) fn open_store(db_path: &Path) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(db_path)
        .with_context(|| format!("failed to open grievance store {}", db_path.display()))
}

#[derive(Clone)]
pub struct GrievanceApi {
    db_path: PathBuf,
    config: Arc<GrievanceConfig>,
    collaborators: Collaborators,
    queue: BackgroundQueue,
    anchor: LedgerAnchor,
    duplicates: DuplicateDetector,
    reputation: ReputationAccumulator,
    escalation: Arc<EscalationPolicyEngine>,
    event_sync: Arc<LedgerEventSync>,
}

impl GrievanceApi {
    /// Build the API context and start the background worker pool.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns an error when `config` is out of range.
    pub fn new(
        db_path: PathBuf,
        config: GrievanceConfig,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let queue = BackgroundQueue::start(config.background_workers, config.background_capacity);
        let anchor =
            LedgerAnchor::new(db_path.clone(), Arc::clone(&collaborators.ledger), queue.clone());
        let duplicates = DuplicateDetector::new(
            db_path.clone(),
            Arc::clone(&collaborators.embedder),
            config.duplicates.clone(),
            queue.clone(),
        );
        let reputation = ReputationAccumulator::new(
            db_path.clone(),
            Arc::clone(&collaborators.reputation),
            queue.clone(),
        );
        let escalation = Arc::new(EscalationPolicyEngine::new(
            db_path.clone(),
            config.scoring.clone(),
            config.sweep_batch_limit,
            anchor.clone(),
            reputation.clone(),
            Arc::clone(&collaborators.notifier),
            queue.clone(),
        ));
        let event_sync = Arc::new(LedgerEventSync::new(
            db_path.clone(),
            Arc::clone(&collaborators.ledger),
            config.max_event_span,
        ));

        Ok(Self {
            db_path,
            config: Arc::new(config),
            collaborators,
            queue,
            anchor,
            duplicates,
            reputation,
            escalation,
            event_sync,
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn config(&self) -> &GrievanceConfig {
        &self.config
    }

    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Wait until every queued side effect has finished.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    #[must_use]
    pub fn escalation(&self) -> Arc<EscalationPolicyEngine> {
        Arc::clone(&self.escalation)
    }

    #[must_use]
    pub fn event_sync(&self) -> Arc<LedgerEventSync> {
        Arc::clone(&self.event_sync)
    }

    fn open_store(&self) -> anyhow::Result<SqliteStore> {
        let mut store = open_store(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Spawn the periodic escalation sweep and the live ledger consumer.
    pub async fn start_background_tasks(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles =
            vec![self.escalation().spawn_periodic(self.config.sweep_interval(), shutdown.clone())];
        if let Some(handle) =
            self.event_sync().start(self.config.subscription_buffer, shutdown).await
        {
            handles.push(handle);
        }
        handles
    }

    /// Report schema status and optionally apply pending migrations.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> anyhow::Result<MigrateResult> {
        let mut store = open_store(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the schema cannot be inspected.
    pub fn schema_status(&self) -> anyhow::Result<SchemaStatus> {
        open_store(&self.db_path)?.schema_status()
    }

    /// # Errors
    /// Returns an error when integrity checks cannot be executed.
    pub fn integrity_check(&self) -> anyhow::Result<IntegrityReport> {
        open_store(&self.db_path)?.integrity_check()
    }

    /// Create a grievance, then queue ledger registration and duplicate annotation.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] for invalid fields, [`ApiError::NotFound`]
    /// or [`ApiError::Permission`] for a bad initial assignee.
    pub fn submit(&self, request: SubmitGrievanceRequest) -> ApiResult<Grievance> {
        let now = truncate_to_millis(OffsetDateTime::now_utc());
        let id = GrievanceId::new();
        let canonical_hash = canonical_hash(&CanonicalFields::new(
            id,
            &request.title,
            &request.description,
            &request.creator_id,
            now,
        ))?;

        let mut grievance = Grievance {
            id,
            title: request.title,
            description: request.description,
            category: request.category,
            severity: request.severity,
            upvotes: 0,
            priority_score: 0,
            status: GrievanceStatus::Pending,
            is_escalated: false,
            escalated_at: None,
            assigned_to_id: request.assigned_to_id,
            department_id: request.department_id,
            creator_id: request.creator_id,
            location: request.location,
            embedding: Vec::new(),
            duplicate_of: None,
            canonical_hash,
            ledger_tx_id: None,
            verified_on_ledger: false,
            estimated_resolution_date: request.estimated_resolution_date.map(truncate_to_millis),
            created_at: now,
            updated_at: now,
        };
        grievance.validate()?;
        grievance.priority_score =
            calculate_priority(&grievance.priority_input(now), &self.config.scoring)?.total_score;

        let mut store = self.open_store()?;
        if let Some(authority_id) = grievance.assigned_to_id {
            let authority = load_authority(&store, authority_id)?;
            ensure_same_department(&authority, &grievance)?;
        }
        store.insert_grievance(&grievance)?;
        tracing::info!(
            grievance_id = %grievance.id,
            canonical_hash = %grievance.canonical_hash,
            priority_score = grievance.priority_score,
            "grievance submitted"
        );

        if let Some(authority_id) = grievance.assigned_to_id {
            self.reputation.record_assignment(authority_id);
        }
        self.duplicates.schedule_annotation(grievance.id);
        self.anchor.schedule_registration(grievance.id, grievance.canonical_hash.clone());
        Ok(grievance)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] when the grievance does not exist.
    pub fn get(&self, id: GrievanceId) -> ApiResult<Grievance> {
        load_grievance(&self.open_store()?, id)
    }

    /// Grievances ordered by priority, highest first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list(&self, mut query: GrievanceListQuery) -> ApiResult<Vec<Grievance>> {
        if query.limit == 0 {
            query.limit = DEFAULT_LIST_LIMIT;
        }
        Ok(self.open_store()?.list_grievances(&query)?)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] when the grievance does not exist.
    pub fn updates(&self, id: GrievanceId) -> ApiResult<Vec<GrievanceUpdate>> {
        let store = self.open_store()?;
        load_grievance(&store, id)?;
        Ok(store.list_updates(id)?)
    }

    /// Live priority breakdown as of `now`.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] when the grievance does not exist.
    pub fn priority(&self, id: GrievanceId, now: OffsetDateTime) -> ApiResult<PriorityBreakdown> {
        let grievance = load_grievance(&self.open_store()?, id)?;
        Ok(calculate_priority(&grievance.priority_input(now), &self.config.scoring)?)
    }

    /// Apply a manual status transition and append its audit row.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] for changes out of `resolved`, no-op
    /// changes and manual escalation, and [`ApiError::Permission`] when the
    /// actor may not act on this grievance.
    pub fn change_status(
        &self,
        id: GrievanceId,
        request: StatusChangeRequest,
    ) -> ApiResult<GrievanceUpdate> {
        let now = OffsetDateTime::now_utc();
        let mut store = self.open_store()?;
        let grievance = load_grievance(&store, id)?;

        if grievance.status == GrievanceStatus::Resolved {
            return Err(ApiError::Validation(format!("grievance {id} is already resolved")));
        }
        if request.status == grievance.status {
            return Err(ApiError::Validation(format!(
                "grievance {id} is already {}",
                grievance.status
            )));
        }
        if request.status == GrievanceStatus::Escalated {
            return Err(ApiError::Validation(
                "escalation is applied by the overdue sweep only".to_string(),
            ));
        }
        if request.message.trim().is_empty() {
            return Err(ApiError::Validation("message MUST be non-empty".to_string()));
        }

        let actor = store
            .get_authority(request.actor_id)?
            .ok_or_else(|| ApiError::Permission(format!("unknown actor {}", request.actor_id)))?;
        let assignee = match grievance.assigned_to_id {
            Some(assignee_id) => store.get_authority(assignee_id)?,
            None => None,
        };
        authorize_actor(&actor, assignee.as_ref(), &grievance)?;

        let update =
            GrievanceUpdate::new(id, actor.id.to_string(), request.status, request.message, now);
        let mut next = grievance.clone();
        next.status = request.status;
        let priority = calculate_priority(&next.priority_input(now), &self.config.scoring)?;
        store.record_status_change(&update, priority.total_score)?;
        tracing::info!(
            grievance_id = %id,
            from = %grievance.status,
            to = %update.status,
            actor_id = %actor.id,
            "grievance status changed"
        );

        if let Some(assignee_id) = grievance.assigned_to_id {
            let hours = grievance.hours_old(now);
            if grievance.status == GrievanceStatus::Pending {
                self.reputation.record_first_response(assignee_id, hours);
            }
            if update.status == GrievanceStatus::Resolved {
                self.reputation.record_resolution(assignee_id, hours);
            }
        }
        self.anchor.schedule_status_mirror(grievance.canonical_hash.clone(), &update);
        notify::schedule(
            &self.queue,
            &self.collaborators.notifier,
            Notification {
                grievance_id: id,
                recipient_id: grievance.creator_id,
                kind: NotificationKind::StatusChanged,
                status: update.status,
                message: update.message.clone(),
            },
        );
        Ok(update)
    }

    /// # Errors
    /// Returns [`ApiError::Permission`] when the authority belongs to another
    /// department, [`ApiError::Validation`] for resolved grievances or a no-op.
    pub fn assign(&self, id: GrievanceId, request: AssignRequest) -> ApiResult<Grievance> {
        let now = OffsetDateTime::now_utc();
        let mut store = self.open_store()?;
        let grievance = load_grievance(&store, id)?;
        if grievance.status == GrievanceStatus::Resolved {
            return Err(ApiError::Validation(format!("grievance {id} is already resolved")));
        }

        let authority = load_authority(&store, request.authority_id)?;
        ensure_same_department(&authority, &grievance)?;
        if grievance.assigned_to_id == Some(authority.id) {
            return Err(ApiError::Validation(format!(
                "grievance {id} is already assigned to {}",
                authority.id
            )));
        }

        let priority = calculate_priority(&grievance.priority_input(now), &self.config.scoring)?;
        store.set_assignee(id, authority.id, priority.total_score, now)?;
        tracing::info!(grievance_id = %id, authority_id = %authority.id, "grievance assigned");
        self.reputation.record_assignment(authority.id);
        load_grievance(&store, id)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] when the grievance does not exist.
    pub fn upvote(&self, id: GrievanceId) -> ApiResult<Grievance> {
        let now = OffsetDateTime::now_utc();
        let mut store = self.open_store()?;
        if store.increment_upvotes(id, now)?.is_none() {
            return Err(ApiError::NotFound(format!("grievance {id}")));
        }
        let mut grievance = load_grievance(&store, id)?;
        let priority = calculate_priority(&grievance.priority_input(now), &self.config.scoring)?;
        store.set_priority_score(id, priority.total_score)?;
        grievance.priority_score = priority.total_score;
        Ok(grievance)
    }

    /// Citizen rating of a resolved grievance, credited to its assignee.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] when the grievance is unresolved or unassigned.
    pub fn rate(&self, id: GrievanceId, positive: bool) -> ApiResult<AuthorityId> {
        let grievance = load_grievance(&self.open_store()?, id)?;
        if grievance.status != GrievanceStatus::Resolved {
            return Err(ApiError::Validation(format!("grievance {id} is not resolved")));
        }
        let Some(assignee_id) = grievance.assigned_to_id else {
            return Err(ApiError::Validation(format!("grievance {id} has no assignee")));
        };
        self.reputation.submit_rating(assignee_id, positive)?;
        Ok(assignee_id)
    }

    /// # Errors
    /// Returns [`ApiError::Validation`] for empty fields.
    pub fn register_authority(&self, request: RegisterAuthorityRequest) -> ApiResult<Authority> {
        let authority = Authority {
            id: AuthorityId::new(),
            name: request.name,
            level: request.level,
            department_id: request.department_id,
            external_account_id: request.external_account_id,
        };
        authority.validate()?;
        self.open_store()?.insert_authority(&authority)?;
        tracing::info!(
            authority_id = %authority.id,
            level = %authority.level,
            department_id = %authority.department_id,
            "authority registered"
        );
        Ok(authority)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] when the authority does not exist.
    pub async fn authority_reputation(&self, id: AuthorityId) -> ApiResult<AuthorityReputation> {
        self.ensure_schema()?;
        self.reputation
            .reputation(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("authority {id}")))
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub async fn leaderboard(&self) -> ApiResult<Vec<LeaderboardEntry>> {
        self.ensure_schema()?;
        Ok(self.reputation.leaderboard().await?)
    }

    /// Pre-submission duplicate check.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] when title or description is empty.
    pub async fn find_similar(&self, request: SimilarityRequest) -> ApiResult<DuplicateAssessment> {
        if request.title.trim().is_empty() || request.description.trim().is_empty() {
            return Err(ApiError::Validation(
                "title and description MUST be non-empty".to_string(),
            ));
        }
        self.ensure_schema()?;
        let (_, assessment) = self
            .duplicates
            .find_similar(
                &request.title,
                &request.description,
                request.location,
                None,
                OffsetDateTime::now_utc(),
            )
            .await?;
        Ok(assessment)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] when the grievance does not exist.
    pub async fn verify_on_ledger(&self, id: GrievanceId) -> ApiResult<LedgerVerification> {
        let grievance = self.get(id)?;
        let exists_on_ledger = self.anchor.verify_exists(&grievance.canonical_hash).await;
        Ok(LedgerVerification {
            grievance_id: grievance.id,
            canonical_hash: grievance.canonical_hash,
            exists_on_ledger,
            verified_on_ledger: grievance.verified_on_ledger,
            ledger_tx_id: grievance.ledger_tx_id,
        })
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] when the grievance does not exist.
    pub async fn ledger_history(&self, id: GrievanceId) -> ApiResult<Vec<HistoryEntry>> {
        let grievance = self.get(id)?;
        Ok(self.anchor.history(&grievance.canonical_hash).await)
    }

    /// # Errors
    /// Returns an error when the overdue query fails.
    pub fn run_sweep(&self, now: OffsetDateTime) -> ApiResult<SweepReport> {
        self.ensure_schema()?;
        Ok(self.escalation.run_sweep(now)?)
    }

    /// # Errors
    /// Returns an error when the ledger cannot be queried.
    pub async fn ledger_events(
        &self,
        from: u64,
        to: Option<u64>,
        filter: EventKindFilter,
    ) -> ApiResult<LedgerEventPage> {
        let (range, events) = self.event_sync.query_past(from, to, filter).await?;
        Ok(LedgerEventPage { range, events })
    }

    /// # Errors
    /// Returns an error when a window cannot be fetched or applied.
    pub async fn backfill_ledger(&self, from: u64) -> ApiResult<BackfillReport> {
        self.ensure_schema()?;
        Ok(self.event_sync.backfill(from).await?)
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        self.open_store().map(|_| ())
    }
}

fn load_grievance(store: &SqliteStore, id: GrievanceId) -> ApiResult<Grievance> {
    store.get_grievance(id)?.ok_or_else(|| ApiError::NotFound(format!("grievance {id}")))
}

fn load_authority(store: &SqliteStore, id: AuthorityId) -> ApiResult<Authority> {
    store.get_authority(id)?.ok_or_else(|| ApiError::NotFound(format!("authority {id}")))
}

fn ensure_same_department(authority: &Authority, grievance: &Grievance) -> ApiResult<()> {
    if authority.department_id == grievance.department_id {
        Ok(())
    } else {
        Err(ApiError::Permission(format!(
            "authority {} belongs to department {}, grievance to {}",
            authority.id, authority.department_id, grievance.department_id
        )))
    }
}

/// The assignee may always act; otherwise the actor must share the department
/// and rank at least as high as the assignee.
fn authorize_actor(
    actor: &Authority,
    assignee: Option<&Authority>,
    grievance: &Grievance,
) -> ApiResult<()> {
    if grievance.assigned_to_id == Some(actor.id) {
        return Ok(());
    }
    ensure_same_department(actor, grievance)?;
    match assignee {
        Some(assignee) if actor.level < assignee.level => Err(ApiError::Permission(format!(
            "{} ({}) is outranked by assignee {} ({})",
            actor.name, actor.level, assignee.name, assignee.level
        ))),
        _ => Ok(()),
    }
}
