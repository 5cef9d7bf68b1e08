use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use grievance_api::{
    ApiError, AssignRequest, AuthorityReputation, BackfillReport, Collaborators, DisabledEmbedder,
    GrievanceApi, GrievanceConfig, HttpEmbedder, LedgerEventPage, LedgerVerification,
    MigrateResult, QueueStats, RegisterAuthorityRequest, SimilarityRequest, StatusChangeRequest,
    SubmitGrievanceRequest, SweepReport, TracingNotifier, API_CONTRACT_VERSION,
};
use grievance_core::{
    Authority, AuthorityId, DuplicateAssessment, Grievance, GrievanceId, GrievanceStatus,
    GrievanceUpdate, LeaderboardEntry, PriorityBreakdown,
};
use grievance_ledger::{
    EventKindFilter, HistoryEntry, HttpLedgerGateway, HttpReputationGateway, InMemoryLedger,
};
use grievance_store_sqlite::{GrievanceListQuery, SchemaStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    api: GrievanceApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListParams {
    status: Option<GrievanceStatus>,
    department_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct RatingRequest {
    positive: bool,
}

#[derive(Debug, Clone, Serialize)]
struct RatingResponse {
    grievance_id: GrievanceId,
    authority_id: AuthorityId,
    positive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SweepRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    now: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EventsParams {
    #[serde(default)]
    from: u64,
    to: Option<u64>,
    kind: Option<EventKindFilter>,
}

#[derive(Debug, Clone, Deserialize)]
struct BackfillRequest {
    from_block: u64,
}

#[derive(Debug, Parser)]
#[command(name = "grievance-service")]
#[command(about = "HTTP service for grievance intake, escalation and ledger anchoring")]
struct Args {
    #[arg(long, default_value = "./grievances.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML file with `GrievanceConfig` overrides.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ledger gateway base URL. Without it an in-process ledger is used.
    #[arg(long)]
    ledger_url: Option<String>,
    /// Reputation gateway base URL. Defaults to the ledger gateway.
    #[arg(long)]
    reputation_url: Option<String>,
    #[arg(long)]
    embedding_url: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn internal(err: &anyhow::Error) -> Self {
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Validation(_) => ServiceError::new(StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::NotFound(_) => ServiceError::new(StatusCode::NOT_FOUND, err.to_string()),
            ApiError::Permission(_) => ServiceError::new(StatusCode::FORBIDDEN, err.to_string()),
            ApiError::Internal(inner) => ServiceError::internal(&inner),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type Reply<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn grievance_id(raw: &str) -> Result<GrievanceId, ServiceError> {
    GrievanceId::parse(raw).map_err(|err| ServiceError::from(ApiError::from(err)))
}

fn authority_id(raw: &str) -> Result<AuthorityId, ServiceError> {
    AuthorityId::parse(raw).map_err(|err| ServiceError::from(ApiError::from(err)))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/grievances", post(grievance_submit).get(grievance_list))
        .route("/v1/grievances/:grievance_id", get(grievance_show))
        .route("/v1/grievances/:grievance_id/updates", get(grievance_updates))
        .route("/v1/grievances/:grievance_id/priority", get(grievance_priority))
        .route("/v1/grievances/:grievance_id/status", post(grievance_status))
        .route("/v1/grievances/:grievance_id/assign", post(grievance_assign))
        .route("/v1/grievances/:grievance_id/upvote", post(grievance_upvote))
        .route("/v1/grievances/:grievance_id/rating", post(grievance_rate))
        .route("/v1/grievances/:grievance_id/ledger", get(grievance_ledger_verify))
        .route("/v1/grievances/:grievance_id/ledger/history", get(grievance_ledger_history))
        .route("/v1/similarity", post(similarity))
        .route("/v1/authorities", post(authority_register))
        .route("/v1/authorities/:authority_id/reputation", get(authority_reputation))
        .route("/v1/leaderboard", get(leaderboard))
        .route("/v1/escalations/sweep", post(escalation_sweep))
        .route("/v1/ledger/events", get(ledger_events))
        .route("/v1/ledger/backfill", post(ledger_backfill))
        .route("/v1/background/stats", get(background_stats))
        .with_state(state)
}

fn build_collaborators(args: &Args) -> Result<Collaborators> {
    let mut collaborators = match &args.ledger_url {
        Some(url) => {
            let gateway = Arc::new(HttpLedgerGateway::new(url)?);
            let reputation_url = args.reputation_url.as_deref().unwrap_or(url);
            Collaborators {
                ledger: gateway,
                reputation: Arc::new(HttpReputationGateway::new(reputation_url)?),
                embedder: Arc::new(DisabledEmbedder),
                notifier: Arc::new(TracingNotifier),
            }
        }
        None => {
            tracing::warn!("no --ledger-url given; anchoring to an in-process ledger");
            let mut collaborators = Collaborators::in_memory(Arc::new(InMemoryLedger::new()));
            if let Some(url) = &args.reputation_url {
                collaborators.reputation = Arc::new(HttpReputationGateway::new(url)?);
            }
            collaborators
        }
    };
    if let Some(url) = &args.embedding_url {
        collaborators = collaborators.with_embedder(Arc::new(HttpEmbedder::new(url)?));
    }
    Ok(collaborators)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GrievanceConfig::load(path)?,
        None => GrievanceConfig::default(),
    };
    let collaborators = build_collaborators(&args)?;
    let api = GrievanceApi::new(args.db.clone(), config, collaborators)?;
    let migration = api.migrate(false)?;
    tracing::info!(
        db = %args.db.display(),
        schema_version = ?migration.after_version,
        "grievance store ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = api.start_background_tasks(shutdown_rx).await;

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "grievance service listening");
    axum::serve(listener, app(ServiceState { api: api.clone() }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    api.wait_idle().await;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> Reply<SchemaStatus> {
    let status = state.api.schema_status().map_err(|err| ServiceError::internal(&err))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Reply<MigrateResult> {
    let result = state.api.migrate(request.dry_run).map_err(|err| ServiceError::internal(&err))?;
    Ok(Json(envelope(result)))
}

async fn grievance_submit(
    State(state): State<ServiceState>,
    Json(request): Json<SubmitGrievanceRequest>,
) -> Reply<Grievance> {
    Ok(Json(envelope(state.api.submit(request)?)))
}

async fn grievance_list(
    State(state): State<ServiceState>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Grievance>> {
    let query = GrievanceListQuery {
        status: params.status,
        department_id: params.department_id,
        limit: params.limit.unwrap_or_default(),
    };
    Ok(Json(envelope(state.api.list(query)?)))
}

async fn grievance_show(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<Grievance> {
    Ok(Json(envelope(state.api.get(grievance_id(&raw_id)?)?)))
}

async fn grievance_updates(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<Vec<GrievanceUpdate>> {
    Ok(Json(envelope(state.api.updates(grievance_id(&raw_id)?)?)))
}

async fn grievance_priority(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<PriorityBreakdown> {
    let breakdown = state.api.priority(grievance_id(&raw_id)?, OffsetDateTime::now_utc())?;
    Ok(Json(envelope(breakdown)))
}

async fn grievance_status(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
    Json(request): Json<StatusChangeRequest>,
) -> Reply<GrievanceUpdate> {
    Ok(Json(envelope(state.api.change_status(grievance_id(&raw_id)?, request)?)))
}

async fn grievance_assign(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Reply<Grievance> {
    Ok(Json(envelope(state.api.assign(grievance_id(&raw_id)?, request)?)))
}

async fn grievance_upvote(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<Grievance> {
    Ok(Json(envelope(state.api.upvote(grievance_id(&raw_id)?)?)))
}

async fn grievance_rate(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
    Json(request): Json<RatingRequest>,
) -> Reply<RatingResponse> {
    let id = grievance_id(&raw_id)?;
    let authority_id = state.api.rate(id, request.positive)?;
    Ok(Json(envelope(RatingResponse { grievance_id: id, authority_id, positive: request.positive })))
}

async fn grievance_ledger_verify(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<LedgerVerification> {
    Ok(Json(envelope(state.api.verify_on_ledger(grievance_id(&raw_id)?).await?)))
}

async fn grievance_ledger_history(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<Vec<HistoryEntry>> {
    Ok(Json(envelope(state.api.ledger_history(grievance_id(&raw_id)?).await?)))
}

async fn similarity(
    State(state): State<ServiceState>,
    Json(request): Json<SimilarityRequest>,
) -> Reply<DuplicateAssessment> {
    Ok(Json(envelope(state.api.find_similar(request).await?)))
}

async fn authority_register(
    State(state): State<ServiceState>,
    Json(request): Json<RegisterAuthorityRequest>,
) -> Reply<Authority> {
    Ok(Json(envelope(state.api.register_authority(request)?)))
}

async fn authority_reputation(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Reply<AuthorityReputation> {
    Ok(Json(envelope(state.api.authority_reputation(authority_id(&raw_id)?).await?)))
}

async fn leaderboard(State(state): State<ServiceState>) -> Reply<Vec<LeaderboardEntry>> {
    Ok(Json(envelope(state.api.leaderboard().await?)))
}

async fn escalation_sweep(
    State(state): State<ServiceState>,
    request: Option<Json<SweepRequest>>,
) -> Reply<SweepReport> {
    let now = request
        .and_then(|Json(request)| request.now)
        .unwrap_or_else(OffsetDateTime::now_utc);
    Ok(Json(envelope(state.api.run_sweep(now)?)))
}

async fn ledger_events(
    State(state): State<ServiceState>,
    Query(params): Query<EventsParams>,
) -> Reply<LedgerEventPage> {
    let page = state
        .api
        .ledger_events(params.from, params.to, params.kind.unwrap_or_default())
        .await?;
    Ok(Json(envelope(page)))
}

async fn ledger_backfill(
    State(state): State<ServiceState>,
    Json(request): Json<BackfillRequest>,
) -> Reply<BackfillReport> {
    Ok(Json(envelope(state.api.backfill_ledger(request.from_block).await?)))
}

async fn background_stats(State(state): State<ServiceState>) -> Json<ServiceEnvelope<QueueStats>> {
    Json(envelope(state.api.queue_stats()))
}
