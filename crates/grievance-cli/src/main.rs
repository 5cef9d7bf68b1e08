use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use grievance_api::{
    AssignRequest, Collaborators, GrievanceApi, GrievanceConfig, HttpEmbedder,
    RegisterAuthorityRequest, SimilarityRequest, StatusChangeRequest, SubmitGrievanceRequest,
};
use grievance_core::{AuthorityId, AuthorityLevel, Coordinates, GrievanceId, GrievanceStatus};
use grievance_ledger::{EventKindFilter, HttpLedgerGateway, HttpReputationGateway};
use grievance_store_sqlite::GrievanceListQuery;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "gv")]
#[command(about = "Grievance operator CLI")]
struct Cli {
    #[arg(long, default_value = "./grievances.sqlite3")]
    db: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ledger gateway base URL. Ledger calls are skipped without it.
    #[arg(long)]
    ledger_url: Option<String>,
    #[arg(long)]
    reputation_url: Option<String>,
    #[arg(long)]
    embedding_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Authority {
        #[command(subcommand)]
        command: AuthorityCommand,
    },
    Grievance {
        #[command(subcommand)]
        command: Box<GrievanceCommand>,
    },
    Escalation {
        #[command(subcommand)]
        command: EscalationCommand,
    },
    Similar(SimilarArgs),
    Reputation {
        #[command(subcommand)]
        command: ReputationCommand,
    },
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum AuthorityCommand {
    Add(AuthorityAddArgs),
}

#[derive(Debug, Args)]
struct AuthorityAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long, value_enum)]
    level: LevelArg,
    #[arg(long)]
    department: String,
    #[arg(long)]
    external_account: Option<String>,
}

#[derive(Debug, Subcommand)]
enum GrievanceCommand {
    Submit(SubmitArgs),
    Show(IdArgs),
    List(ListArgs),
    Updates(IdArgs),
    Priority(IdArgs),
    Status(StatusArgs),
    Assign(AssignArgs),
    Upvote(IdArgs),
    Rate(RateArgs),
}

#[derive(Debug, Args)]
struct SubmitArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    severity: u8,
    #[arg(long)]
    department: String,
    #[arg(long)]
    creator: String,
    #[arg(long, requires = "lng")]
    lat: Option<f64>,
    #[arg(long, requires = "lat")]
    lng: Option<f64>,
    /// RFC 3339 timestamp.
    #[arg(long)]
    eta: Option<String>,
    #[arg(long)]
    assign_to: Option<String>,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long, default_value_t = 0)]
    limit: usize,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    actor: String,
    #[arg(long, value_enum)]
    status: StatusArg,
    #[arg(long)]
    message: String,
}

#[derive(Debug, Args)]
struct AssignArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    authority: String,
}

#[derive(Debug, Args)]
struct RateArgs {
    #[arg(long)]
    id: String,
    #[arg(long, value_enum)]
    rating: RatingArg,
}

#[derive(Debug, Subcommand)]
enum EscalationCommand {
    Sweep(SweepArgs),
}

#[derive(Debug, Args)]
struct SweepArgs {
    /// Evaluate deadlines as of this RFC 3339 timestamp instead of now.
    #[arg(long)]
    now: Option<String>,
}

#[derive(Debug, Args)]
struct SimilarArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    #[arg(long, requires = "lng")]
    lat: Option<f64>,
    #[arg(long, requires = "lat")]
    lng: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum ReputationCommand {
    Show(ReputationShowArgs),
    Leaderboard,
}

#[derive(Debug, Args)]
struct ReputationShowArgs {
    #[arg(long)]
    authority: String,
}

#[derive(Debug, Subcommand)]
enum LedgerCommand {
    Verify(IdArgs),
    History(IdArgs),
    Events(LedgerEventsArgs),
    Backfill(LedgerBackfillArgs),
}

#[derive(Debug, Args)]
struct LedgerEventsArgs {
    #[arg(long, default_value_t = 0)]
    from: u64,
    #[arg(long)]
    to: Option<u64>,
    #[arg(long, value_enum, default_value_t = KindArg::All)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct LedgerBackfillArgs {
    #[arg(long)]
    from: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    Gro,
    Officer,
    NodalOfficer,
    Director,
}

impl LevelArg {
    fn into_level(self) -> AuthorityLevel {
        match self {
            Self::Gro => AuthorityLevel::Gro,
            Self::Officer => AuthorityLevel::Officer,
            Self::NodalOfficer => AuthorityLevel::NodalOfficer,
            Self::Director => AuthorityLevel::Director,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Acknowledged,
    InProgress,
    Escalated,
    Resolved,
}

impl StatusArg {
    fn into_status(self) -> GrievanceStatus {
        match self {
            Self::Pending => GrievanceStatus::Pending,
            Self::Acknowledged => GrievanceStatus::Acknowledged,
            Self::InProgress => GrievanceStatus::InProgress,
            Self::Escalated => GrievanceStatus::Escalated,
            Self::Resolved => GrievanceStatus::Resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RatingArg {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    All,
    Registered,
    Status,
}

impl KindArg {
    fn into_filter(self) -> EventKindFilter {
        match self {
            Self::All => EventKindFilter::All,
            Self::Registered => EventKindFilter::Registered,
            Self::Status => EventKindFilter::Status,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit<T: serde::Serialize>(label: &str, value: &T) -> Result<()> {
    emit_json(serde_json::to_value(value).with_context(|| format!("failed to serialize {label}"))?)
}

fn parse_rfc3339(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .with_context(|| format!("invalid RFC 3339 timestamp `{raw}`"))
}

fn parse_optional_rfc3339(raw: Option<&str>) -> Result<Option<OffsetDateTime>> {
    raw.map(parse_rfc3339).transpose()
}

fn coordinates(lat: Option<f64>, lng: Option<f64>) -> Option<Coordinates> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    }
}

fn grievance_id(raw: &str) -> Result<GrievanceId> {
    Ok(GrievanceId::parse(raw)?)
}

fn authority_id(raw: &str) -> Result<AuthorityId> {
    Ok(AuthorityId::parse(raw)?)
}

fn collaborators(cli: &Cli) -> Result<Collaborators> {
    let mut collaborators = Collaborators::offline();
    if let Some(url) = &cli.ledger_url {
        collaborators.ledger = Arc::new(HttpLedgerGateway::new(url)?);
    }
    if let Some(url) = cli.reputation_url.as_ref().or(cli.ledger_url.as_ref()) {
        collaborators.reputation = Arc::new(HttpReputationGateway::new(url)?);
    }
    if let Some(url) = &cli.embedding_url {
        collaborators = collaborators.with_embedder(Arc::new(HttpEmbedder::new(url)?));
    }
    Ok(collaborators)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GrievanceConfig::load(path)?,
        None => GrievanceConfig::default(),
    };
    let api = GrievanceApi::new(cli.db.clone(), config, collaborators(&cli)?)?;

    let result = match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Authority { command } => run_authority(command, &api),
        Command::Grievance { command } => run_grievance(*command, &api),
        Command::Escalation { command } => run_escalation(command, &api),
        Command::Similar(args) => run_similar(args, &api).await,
        Command::Reputation { command } => run_reputation(command, &api).await,
        Command::Ledger { command } => run_ledger(command, &api).await,
    };

    // Ledger writes and annotations queued by this command finish before exit.
    api.wait_idle().await;
    result
}

fn run_db(command: DbCommand, api: &GrievanceApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit("migration result", &api.migrate(args.dry_run)?),
        DbCommand::IntegrityCheck => emit("integrity report", &api.integrity_check()?),
    }
}

fn run_authority(command: AuthorityCommand, api: &GrievanceApi) -> Result<()> {
    match command {
        AuthorityCommand::Add(args) => {
            let authority = api.register_authority(RegisterAuthorityRequest {
                name: args.name,
                level: args.level.into_level(),
                department_id: args.department,
                external_account_id: args.external_account,
            })?;
            emit("authority", &authority)
        }
    }
}

fn run_grievance(command: GrievanceCommand, api: &GrievanceApi) -> Result<()> {
    match command {
        GrievanceCommand::Submit(args) => {
            let grievance = api.submit(SubmitGrievanceRequest {
                title: args.title,
                description: args.description,
                category: args.category,
                severity: args.severity,
                department_id: args.department,
                creator_id: args.creator,
                location: coordinates(args.lat, args.lng),
                estimated_resolution_date: parse_optional_rfc3339(args.eta.as_deref())?,
                assigned_to_id: args.assign_to.as_deref().map(authority_id).transpose()?,
            })?;
            emit("grievance", &grievance)
        }
        GrievanceCommand::Show(args) => emit("grievance", &api.get(grievance_id(&args.id)?)?),
        GrievanceCommand::List(args) => {
            let grievances = api.list(GrievanceListQuery {
                status: args.status.map(StatusArg::into_status),
                department_id: args.department,
                limit: args.limit,
            })?;
            emit_json(serde_json::json!({ "grievances": grievances }))
        }
        GrievanceCommand::Updates(args) => {
            let updates = api.updates(grievance_id(&args.id)?)?;
            emit_json(serde_json::json!({ "updates": updates }))
        }
        GrievanceCommand::Priority(args) => emit(
            "priority breakdown",
            &api.priority(grievance_id(&args.id)?, OffsetDateTime::now_utc())?,
        ),
        GrievanceCommand::Status(args) => {
            let update = api.change_status(
                grievance_id(&args.id)?,
                StatusChangeRequest {
                    actor_id: authority_id(&args.actor)?,
                    status: args.status.into_status(),
                    message: args.message,
                },
            )?;
            emit("grievance update", &update)
        }
        GrievanceCommand::Assign(args) => {
            let grievance = api.assign(
                grievance_id(&args.id)?,
                AssignRequest { authority_id: authority_id(&args.authority)? },
            )?;
            emit("grievance", &grievance)
        }
        GrievanceCommand::Upvote(args) => emit("grievance", &api.upvote(grievance_id(&args.id)?)?),
        GrievanceCommand::Rate(args) => {
            let id = grievance_id(&args.id)?;
            let positive = matches!(args.rating, RatingArg::Positive);
            let authority_id = api.rate(id, positive)?;
            emit_json(serde_json::json!({
                "grievance_id": id,
                "authority_id": authority_id,
                "positive": positive
            }))
        }
    }
}

fn run_escalation(command: EscalationCommand, api: &GrievanceApi) -> Result<()> {
    match command {
        EscalationCommand::Sweep(args) => {
            let now = parse_optional_rfc3339(args.now.as_deref())?
                .unwrap_or_else(OffsetDateTime::now_utc);
            emit("sweep report", &api.run_sweep(now)?)
        }
    }
}

async fn run_similar(args: SimilarArgs, api: &GrievanceApi) -> Result<()> {
    let assessment = api
        .find_similar(SimilarityRequest {
            title: args.title,
            description: args.description,
            location: coordinates(args.lat, args.lng),
        })
        .await?;
    emit("duplicate assessment", &assessment)
}

async fn run_reputation(command: ReputationCommand, api: &GrievanceApi) -> Result<()> {
    match command {
        ReputationCommand::Show(args) => {
            let reputation = api.authority_reputation(authority_id(&args.authority)?).await?;
            emit("authority reputation", &reputation)
        }
        ReputationCommand::Leaderboard => {
            let entries = api.leaderboard().await?;
            emit_json(serde_json::json!({ "leaderboard": entries }))
        }
    }
}

async fn run_ledger(command: LedgerCommand, api: &GrievanceApi) -> Result<()> {
    match command {
        LedgerCommand::Verify(args) => {
            emit("ledger verification", &api.verify_on_ledger(grievance_id(&args.id)?).await?)
        }
        LedgerCommand::History(args) => {
            let history = api.ledger_history(grievance_id(&args.id)?).await?;
            emit_json(serde_json::json!({ "history": history }))
        }
        LedgerCommand::Events(args) => {
            api.event_sync().initialize().await;
            let page = api.ledger_events(args.from, args.to, args.kind.into_filter()).await?;
            emit("ledger events", &page)
        }
        LedgerCommand::Backfill(args) => {
            api.event_sync().initialize().await;
            emit("backfill report", &api.backfill_ledger(args.from).await?)
        }
    }
}
