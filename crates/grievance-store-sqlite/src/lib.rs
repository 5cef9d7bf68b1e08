use std::path::Path;

use anyhow::{anyhow, Context, Result};
use grievance_core::{
    canonical_timestamp, Authority, AuthorityId, AuthorityLevel, Coordinates, DuplicateCandidate,
    EscalationPlan, Grievance, GrievanceId, GrievanceStatus, GrievanceUpdate, ReputationEvent,
    ReputationSnapshot, UpdateId,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS authorities (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  level TEXT NOT NULL CHECK (level IN ('gro','officer','nodal_officer','director')),
  department_id TEXT NOT NULL,
  external_account_id TEXT
);

CREATE TABLE IF NOT EXISTS grievances (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  description TEXT NOT NULL,
  category TEXT NOT NULL,
  severity INTEGER NOT NULL CHECK (severity BETWEEN 1 AND 10),
  upvotes INTEGER NOT NULL DEFAULT 0 CHECK (upvotes >= 0),
  priority_score INTEGER NOT NULL CHECK (priority_score BETWEEN 0 AND 100),
  status TEXT NOT NULL CHECK (status IN ('pending','acknowledged','in_progress','escalated','resolved')),
  is_escalated INTEGER NOT NULL DEFAULT 0 CHECK (is_escalated IN (0, 1)),
  escalated_at TEXT,
  assigned_to_id TEXT,
  department_id TEXT NOT NULL,
  creator_id TEXT NOT NULL,
  lat REAL,
  lng REAL,
  embedding_json TEXT NOT NULL DEFAULT '[]',
  duplicate_of TEXT,
  canonical_hash TEXT NOT NULL UNIQUE,
  ledger_tx_id TEXT,
  verified_on_ledger INTEGER NOT NULL DEFAULT 0 CHECK (verified_on_ledger IN (0, 1)),
  estimated_resolution_date TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  CHECK ((lat IS NULL) = (lng IS NULL)),
  FOREIGN KEY (assigned_to_id) REFERENCES authorities(id),
  FOREIGN KEY (duplicate_of) REFERENCES grievances(id)
);

CREATE TABLE IF NOT EXISTS grievance_updates (
  id TEXT PRIMARY KEY,
  grievance_id TEXT NOT NULL,
  author_id TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending','acknowledged','in_progress','escalated','resolved')),
  message TEXT NOT NULL,
  ledger_tx_id TEXT,
  created_at TEXT NOT NULL,
  FOREIGN KEY (grievance_id) REFERENCES grievances(id)
);

CREATE INDEX IF NOT EXISTS idx_grievances_overdue
  ON grievances(is_escalated, status, estimated_resolution_date);
CREATE INDEX IF NOT EXISTS idx_grievances_updated_at ON grievances(updated_at);
CREATE INDEX IF NOT EXISTS idx_grievance_updates_grievance ON grievance_updates(grievance_id, created_at);
CREATE INDEX IF NOT EXISTS idx_authorities_level ON authorities(level, department_id);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS authority_stats (
  authority_id TEXT PRIMARY KEY,
  assigned INTEGER NOT NULL DEFAULT 0 CHECK (assigned >= 0),
  resolved INTEGER NOT NULL DEFAULT 0 CHECK (resolved >= 0),
  escalated INTEGER NOT NULL DEFAULT 0 CHECK (escalated >= 0),
  total_response_hours REAL NOT NULL DEFAULT 0,
  total_resolution_hours REAL NOT NULL DEFAULT 0,
  positive_ratings INTEGER NOT NULL DEFAULT 0 CHECK (positive_ratings >= 0),
  negative_ratings INTEGER NOT NULL DEFAULT 0 CHECK (negative_ratings >= 0),
  FOREIGN KEY (authority_id) REFERENCES authorities(id)
);

INSERT OR IGNORE INTO authority_stats(authority_id) SELECT id FROM authorities;
";

const GRIEVANCE_COLUMNS: &str = "id, title, description, category, severity, upvotes, \
    priority_score, status, is_escalated, escalated_at, assigned_to_id, department_id, \
    creator_id, lat, lng, embedding_json, duplicate_of, canonical_hash, ledger_tx_id, \
    verified_on_ledger, estimated_resolution_date, created_at, updated_at";

const SWEEPABLE_STATUSES_SQL: &str = "('pending','acknowledged','in_progress')";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Grievances the overdue sweep may escalate at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueQuery {
    pub now: OffsetDateTime,
    pub limit: usize,
}

/// Recent unresolved grievances that carry an embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCandidateQuery {
    pub updated_since: OffsetDateTime,
    pub exclude: Option<GrievanceId>,
    pub limit: usize,
}

/// Lookup of one authority at a given tier, optionally scoped to a department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityQuery {
    pub level: AuthorityLevel,
    pub department_id: Option<String>,
    pub exclude: Option<AuthorityId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrievanceListQuery {
    pub status: Option<GrievanceStatus>,
    pub department_id: Option<String>,
    pub limit: usize,
}

impl SqliteStore {
    /// Open a SQLite-backed grievance store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the recorded version is unknown.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(())
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;
        tx.execute_batch(MIGRATION_002_SQL).context("failed to create authority_stats")?;
        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration v2")?;
        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// Persist a newly created grievance.
    ///
    /// # Errors
    /// Returns an error when validation fails, the canonical hash collides, or the insert fails.
    pub fn insert_grievance(&mut self, grievance: &Grievance) -> Result<()> {
        grievance.validate().map_err(|err| anyhow!("grievance validation failed: {err}"))?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO grievances({GRIEVANCE_COLUMNS}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                        ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
                    )"
                ),
                params![
                    grievance.id.to_string(),
                    grievance.title,
                    grievance.description,
                    grievance.category,
                    grievance.severity,
                    grievance.upvotes,
                    grievance.priority_score,
                    grievance.status.as_str(),
                    grievance.is_escalated,
                    grievance.escalated_at.map(canonical_timestamp),
                    grievance.assigned_to_id.map(|id| id.to_string()),
                    grievance.department_id,
                    grievance.creator_id,
                    grievance.location.map(|loc| loc.lat),
                    grievance.location.map(|loc| loc.lng),
                    serde_json::to_string(&grievance.embedding)
                        .context("failed to serialize embedding")?,
                    grievance.duplicate_of.map(|id| id.to_string()),
                    grievance.canonical_hash,
                    grievance.ledger_tx_id,
                    grievance.verified_on_ledger,
                    grievance.estimated_resolution_date.map(canonical_timestamp),
                    canonical_timestamp(grievance.created_at),
                    canonical_timestamp(grievance.updated_at),
                ],
            )
            .with_context(|| format!("failed to insert grievance {}", grievance.id))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_grievance(&self, id: GrievanceId) -> Result<Option<Grievance>> {
        let sql = format!("SELECT {GRIEVANCE_COLUMNS} FROM grievances WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], read_grievance_row)
            .optional()
            .with_context(|| format!("failed to load grievance {id}"))?;
        row.map(GrievanceRow::into_grievance).transpose()
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_grievance_by_hash(&self, canonical_hash: &str) -> Result<Option<Grievance>> {
        let sql = format!("SELECT {GRIEVANCE_COLUMNS} FROM grievances WHERE canonical_hash = ?1");
        let row = self
            .conn
            .query_row(&sql, params![canonical_hash], read_grievance_row)
            .optional()
            .with_context(|| format!("failed to load grievance by hash {canonical_hash}"))?;
        row.map(GrievanceRow::into_grievance).transpose()
    }

    /// List grievances by descending priority, newest first among ties.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_grievances(&self, query: &GrievanceListQuery) -> Result<Vec<Grievance>> {
        let sql = format!(
            "SELECT {GRIEVANCE_COLUMNS} FROM grievances
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR department_id = ?2)
             ORDER BY priority_score DESC, created_at DESC, id ASC
             LIMIT ?3"
        );
        self.query_grievances(
            &sql,
            params![
                query.status.map(GrievanceStatus::as_str),
                query.department_id,
                sql_limit(query.limit)
            ],
        )
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_overdue(&self, query: &OverdueQuery) -> Result<Vec<Grievance>> {
        let sql = format!(
            "SELECT {GRIEVANCE_COLUMNS} FROM grievances
             WHERE status IN {SWEEPABLE_STATUSES_SQL}
               AND is_escalated = 0
               AND estimated_resolution_date IS NOT NULL
               AND estimated_resolution_date < ?1
             ORDER BY estimated_resolution_date ASC, id ASC
             LIMIT ?2"
        );
        self.query_grievances(&sql, params![canonical_timestamp(query.now), sql_limit(query.limit)])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or an embedding cannot be decoded.
    pub fn list_duplicate_candidates(
        &self,
        query: &DuplicateCandidateQuery,
    ) -> Result<Vec<DuplicateCandidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, embedding_json, lat, lng FROM grievances
             WHERE updated_at >= ?1
               AND status != 'resolved'
               AND embedding_json != '[]'
               AND (?2 IS NULL OR id != ?2)
             ORDER BY updated_at DESC, id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![
                canonical_timestamp(query.updated_since),
                query.exclude.map(|id| id.to_string()),
                sql_limit(query.limit)
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            },
        )?;

        let mut candidates = Vec::new();
        for row in rows {
            let (id_raw, embedding_json, lat, lng) = row?;
            candidates.push(DuplicateCandidate {
                id: parse_grievance_id(&id_raw)?,
                embedding: serde_json::from_str(&embedding_json)
                    .with_context(|| format!("invalid embedding_json for grievance {id_raw}"))?,
                location: coordinates(lat, lng),
            });
        }
        Ok(candidates)
    }

    /// Move a grievance to `status`, appending its audit entry in the same transaction.
    ///
    /// # Errors
    /// Returns an error when the grievance does not exist or any write fails.
    pub fn record_status_change(
        &mut self,
        update: &GrievanceUpdate,
        priority_score: u8,
    ) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let changed = tx
            .execute(
                "UPDATE grievances SET status = ?1, priority_score = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    update.status.as_str(),
                    priority_score,
                    canonical_timestamp(update.created_at),
                    update.grievance_id.to_string(),
                ],
            )
            .context("failed to update grievance status")?;
        if changed == 0 {
            return Err(anyhow!("grievance {} not found", update.grievance_id));
        }
        insert_update(&tx, update)?;
        tx.commit().context("failed to commit status change")?;
        Ok(())
    }

    /// Apply an escalation plan unless another writer escalated the grievance first.
    ///
    /// Returns `false` without writing anything when the grievance is already escalated.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn apply_escalation(
        &mut self,
        plan: &EscalationPlan,
        priority_score: u8,
        update: &GrievanceUpdate,
    ) -> Result<bool> {
        let tx = self.conn.transaction().context("failed to start escalation transaction")?;
        let escalated_at = canonical_timestamp(plan.escalated_at);
        let changed = tx
            .execute(
                "UPDATE grievances
                 SET is_escalated = 1, status = 'escalated', escalated_at = ?1,
                     assigned_to_id = ?2, priority_score = ?3, updated_at = ?1
                 WHERE id = ?4 AND is_escalated = 0",
                params![
                    escalated_at,
                    plan.new_assignee.map(|id| id.to_string()),
                    priority_score,
                    plan.grievance_id.to_string(),
                ],
            )
            .context("failed to apply escalation")?;
        if changed == 0 {
            return Ok(false);
        }
        insert_update(&tx, update)?;
        tx.commit().context("failed to commit escalation")?;
        Ok(true)
    }

    /// # Errors
    /// Returns an error when the grievance does not exist or the update fails.
    pub fn set_assignee(
        &mut self,
        id: GrievanceId,
        authority_id: AuthorityId,
        priority_score: u8,
        now: OffsetDateTime,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE grievances SET assigned_to_id = ?1, priority_score = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    authority_id.to_string(),
                    priority_score,
                    canonical_timestamp(now),
                    id.to_string()
                ],
            )
            .context("failed to assign grievance")?;
        if changed == 0 {
            return Err(anyhow!("grievance {id} not found"));
        }
        Ok(())
    }

    /// Increment the upvote counter and return the new count.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn increment_upvotes(&mut self, id: GrievanceId, now: OffsetDateTime) -> Result<Option<u32>> {
        let tx = self.conn.transaction().context("failed to start upvote transaction")?;
        let changed = tx
            .execute(
                "UPDATE grievances SET upvotes = upvotes + 1, updated_at = ?1 WHERE id = ?2",
                params![canonical_timestamp(now), id.to_string()],
            )
            .context("failed to increment upvotes")?;
        if changed == 0 {
            return Ok(None);
        }
        let upvotes = tx
            .query_row("SELECT upvotes FROM grievances WHERE id = ?1", params![id.to_string()], |row| {
                row.get::<_, u32>(0)
            })
            .context("failed to read upvotes")?;
        tx.commit().context("failed to commit upvote")?;
        Ok(Some(upvotes))
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_priority_score(&mut self, id: GrievanceId, priority_score: u8) -> Result<()> {
        self.conn
            .execute(
                "UPDATE grievances SET priority_score = ?1 WHERE id = ?2",
                params![priority_score, id.to_string()],
            )
            .context("failed to update priority score")?;
        Ok(())
    }

    /// Record a confirmed registration write against the grievance row.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_ledger_registration(&mut self, id: GrievanceId, tx_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE grievances SET ledger_tx_id = ?1, verified_on_ledger = 1 WHERE id = ?2",
                params![tx_id, id.to_string()],
            )
            .context("failed to record ledger registration")?;
        Ok(changed > 0)
    }

    /// Mark the grievance with `canonical_hash` as verified, keeping any existing tx id.
    ///
    /// Returns the grievance id, or `None` when no local grievance has that hash.
    ///
    /// # Errors
    /// Returns an error when the lookup or update fails.
    pub fn mark_verified_by_hash(
        &mut self,
        canonical_hash: &str,
        tx_id: Option<&str>,
    ) -> Result<Option<GrievanceId>> {
        let tx = self.conn.transaction().context("failed to start verification transaction")?;
        let id_raw = tx
            .query_row(
                "SELECT id FROM grievances WHERE canonical_hash = ?1",
                params![canonical_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to look up grievance by hash")?;
        let Some(id_raw) = id_raw else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE grievances
             SET verified_on_ledger = 1, ledger_tx_id = COALESCE(ledger_tx_id, ?1)
             WHERE id = ?2",
            params![tx_id, id_raw],
        )
        .context("failed to mark grievance verified")?;
        tx.commit().context("failed to commit verification")?;
        Ok(Some(parse_grievance_id(&id_raw)?))
    }

    /// Backfill the tx id on one specific audit row; never overwrites.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_update_ledger_tx(&mut self, update_id: UpdateId, tx_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE grievance_updates SET ledger_tx_id = ?1
                 WHERE id = ?2 AND ledger_tx_id IS NULL",
                params![tx_id, update_id.to_string()],
            )
            .context("failed to backfill update ledger tx")?;
        Ok(changed > 0)
    }

    /// Store the duplicate-detection result for a grievance.
    ///
    /// # Errors
    /// Returns an error when serialization or the update fails.
    pub fn set_duplicate_annotation(
        &mut self,
        id: GrievanceId,
        embedding: &[f32],
        duplicate_of: Option<GrievanceId>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE grievances SET embedding_json = ?1, duplicate_of = ?2 WHERE id = ?3",
                params![
                    serde_json::to_string(embedding).context("failed to serialize embedding")?,
                    duplicate_of.map(|dup| dup.to_string()),
                    id.to_string()
                ],
            )
            .context("failed to store duplicate annotation")?;
        Ok(())
    }

    /// Audit trail of a grievance in creation order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_updates(&self, grievance_id: GrievanceId) -> Result<Vec<GrievanceUpdate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, grievance_id, author_id, status, message, ledger_tx_id, created_at
             FROM grievance_updates
             WHERE grievance_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![grievance_id.to_string()], |row| {
            Ok(UpdateRow {
                id: row.get(0)?,
                grievance_id: row.get(1)?,
                author_id: row.get(2)?,
                status: row.get(3)?,
                message: row.get(4)?,
                ledger_tx_id: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut updates = Vec::new();
        for row in rows {
            updates.push(row?.into_update()?);
        }
        Ok(updates)
    }

    /// Persist an authority together with its zeroed reputation counters.
    ///
    /// # Errors
    /// Returns an error when validation fails or any write fails.
    pub fn insert_authority(&mut self, authority: &Authority) -> Result<()> {
        authority.validate().map_err(|err| anyhow!("authority validation failed: {err}"))?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO authorities(id, name, level, department_id, external_account_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                authority.id.to_string(),
                authority.name,
                authority.level.as_str(),
                authority.department_id,
                authority.external_account_id,
            ],
        )
        .with_context(|| format!("failed to insert authority {}", authority.id))?;
        tx.execute(
            "INSERT OR IGNORE INTO authority_stats(authority_id) VALUES (?1)",
            params![authority.id.to_string()],
        )
        .context("failed to initialize authority stats")?;
        tx.commit().context("failed to commit authority insert")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_authority(&self, id: AuthorityId) -> Result<Option<Authority>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, level, department_id, external_account_id
                 FROM authorities WHERE id = ?1",
                params![id.to_string()],
                read_authority_row,
            )
            .optional()
            .with_context(|| format!("failed to load authority {id}"))?;
        row.map(AuthorityRow::into_authority).transpose()
    }

    /// First authority (by id) matching the query.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn find_authority(&self, query: &AuthorityQuery) -> Result<Option<Authority>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, level, department_id, external_account_id
                 FROM authorities
                 WHERE level = ?1
                   AND (?2 IS NULL OR department_id = ?2)
                   AND (?3 IS NULL OR id != ?3)
                 ORDER BY id ASC
                 LIMIT 1",
                params![
                    query.level.as_str(),
                    query.department_id,
                    query.exclude.map(|id| id.to_string())
                ],
                read_authority_row,
            )
            .optional()
            .context("failed to search authorities")?;
        row.map(AuthorityRow::into_authority).transpose()
    }

    /// Every authority with its local reputation counters.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_authority_stats(&self) -> Result<Vec<(Authority, ReputationSnapshot)>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.name, a.level, a.department_id, a.external_account_id,
                    COALESCE(s.assigned, 0), COALESCE(s.resolved, 0), COALESCE(s.escalated, 0),
                    COALESCE(s.total_response_hours, 0), COALESCE(s.total_resolution_hours, 0),
                    COALESCE(s.positive_ratings, 0), COALESCE(s.negative_ratings, 0)
             FROM authorities a
             LEFT JOIN authority_stats s ON s.authority_id = a.id
             ORDER BY a.id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((read_authority_row(row)?, read_snapshot(row, 5)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (authority, snapshot) = row?;
            entries.push((authority.into_authority()?, snapshot));
        }
        Ok(entries)
    }

    /// Local reputation counters; zeroed when the authority has none yet.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read.
    pub fn authority_stats(&self, id: AuthorityId) -> Result<ReputationSnapshot> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT assigned, resolved, escalated, total_response_hours,
                        total_resolution_hours, positive_ratings, negative_ratings
                 FROM authority_stats WHERE authority_id = ?1",
                params![id.to_string()],
                |row| read_snapshot(row, 0),
            )
            .optional()
            .with_context(|| format!("failed to load stats for authority {id}"))?;
        Ok(snapshot.unwrap_or_default())
    }

    /// Apply one counter change to an authority's local reputation mirror.
    ///
    /// # Errors
    /// Returns an error when the authority does not exist or the update fails.
    pub fn record_stats_event(&mut self, id: AuthorityId, event: ReputationEvent) -> Result<()> {
        let (assignment, hours) = match event {
            ReputationEvent::Assignment => ("assigned = assigned + 1", None),
            ReputationEvent::FirstResponse { hours } => {
                ("total_response_hours = total_response_hours + ?2", Some(hours))
            }
            ReputationEvent::Resolution { hours } => (
                "resolved = resolved + 1, total_resolution_hours = total_resolution_hours + ?2",
                Some(hours),
            ),
            ReputationEvent::Escalation => ("escalated = escalated + 1", None),
            ReputationEvent::Rating { positive: true } => {
                ("positive_ratings = positive_ratings + 1", None)
            }
            ReputationEvent::Rating { positive: false } => {
                ("negative_ratings = negative_ratings + 1", None)
            }
        };

        let tx = self.conn.transaction().context("failed to start stats transaction")?;
        tx.execute(
            "INSERT OR IGNORE INTO authority_stats(authority_id) VALUES (?1)",
            params![id.to_string()],
        )
        .with_context(|| format!("failed to initialize stats for authority {id}"))?;
        let sql = format!("UPDATE authority_stats SET {assignment} WHERE authority_id = ?1");
        match hours {
            Some(hours) => tx.execute(&sql, params![id.to_string(), hours.max(0.0)]),
            None => tx.execute(&sql, params![id.to_string()]),
        }
        .with_context(|| format!("failed to record {} for authority {id}", event.as_str()))?;
        tx.commit().context("failed to commit stats event")?;
        Ok(())
    }

    fn query_grievances(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Grievance>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_grievance_row)?;
        let mut grievances = Vec::new();
        for row in rows {
            grievances.push(row?.into_grievance()?);
        }
        Ok(grievances)
    }
}

#[derive(Debug)]
struct GrievanceRow {
    id: String,
    title: String,
    description: String,
    category: String,
    severity: u8,
    upvotes: u32,
    priority_score: u8,
    status: String,
    is_escalated: bool,
    escalated_at: Option<String>,
    assigned_to_id: Option<String>,
    department_id: String,
    creator_id: String,
    lat: Option<f64>,
    lng: Option<f64>,
    embedding_json: String,
    duplicate_of: Option<String>,
    canonical_hash: String,
    ledger_tx_id: Option<String>,
    verified_on_ledger: bool,
    estimated_resolution_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl GrievanceRow {
    fn into_grievance(self) -> Result<Grievance> {
        Ok(Grievance {
            id: parse_grievance_id(&self.id)?,
            title: self.title,
            description: self.description,
            category: self.category,
            severity: self.severity,
            upvotes: self.upvotes,
            priority_score: self.priority_score,
            status: parse_status(&self.status)?,
            is_escalated: self.is_escalated,
            escalated_at: self.escalated_at.as_deref().map(parse_timestamp).transpose()?,
            assigned_to_id: self.assigned_to_id.as_deref().map(parse_authority_id).transpose()?,
            department_id: self.department_id,
            creator_id: self.creator_id,
            location: coordinates(self.lat, self.lng),
            embedding: serde_json::from_str(&self.embedding_json)
                .with_context(|| format!("invalid embedding_json for grievance {}", self.id))?,
            duplicate_of: self.duplicate_of.as_deref().map(parse_grievance_id).transpose()?,
            canonical_hash: self.canonical_hash,
            ledger_tx_id: self.ledger_tx_id,
            verified_on_ledger: self.verified_on_ledger,
            estimated_resolution_date: self
                .estimated_resolution_date
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn read_grievance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GrievanceRow> {
    Ok(GrievanceRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        severity: row.get(4)?,
        upvotes: row.get(5)?,
        priority_score: row.get(6)?,
        status: row.get(7)?,
        is_escalated: row.get(8)?,
        escalated_at: row.get(9)?,
        assigned_to_id: row.get(10)?,
        department_id: row.get(11)?,
        creator_id: row.get(12)?,
        lat: row.get(13)?,
        lng: row.get(14)?,
        embedding_json: row.get(15)?,
        duplicate_of: row.get(16)?,
        canonical_hash: row.get(17)?,
        ledger_tx_id: row.get(18)?,
        verified_on_ledger: row.get(19)?,
        estimated_resolution_date: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
    })
}

#[derive(Debug)]
struct UpdateRow {
    id: String,
    grievance_id: String,
    author_id: String,
    status: String,
    message: String,
    ledger_tx_id: Option<String>,
    created_at: String,
}

impl UpdateRow {
    fn into_update(self) -> Result<GrievanceUpdate> {
        Ok(GrievanceUpdate {
            id: parse_update_id(&self.id)?,
            grievance_id: parse_grievance_id(&self.grievance_id)?,
            author_id: self.author_id,
            status: parse_status(&self.status)?,
            message: self.message,
            ledger_tx_id: self.ledger_tx_id,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[derive(Debug)]
struct AuthorityRow {
    id: String,
    name: String,
    level: String,
    department_id: String,
    external_account_id: Option<String>,
}

impl AuthorityRow {
    fn into_authority(self) -> Result<Authority> {
        Ok(Authority {
            id: parse_authority_id(&self.id)?,
            name: self.name,
            level: AuthorityLevel::parse(&self.level)
                .ok_or_else(|| anyhow!("unknown authority level: {}", self.level))?,
            department_id: self.department_id,
            external_account_id: self.external_account_id,
        })
    }
}

fn read_authority_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuthorityRow> {
    Ok(AuthorityRow {
        id: row.get(0)?,
        name: row.get(1)?,
        level: row.get(2)?,
        department_id: row.get(3)?,
        external_account_id: row.get(4)?,
    })
}

fn read_snapshot(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<ReputationSnapshot> {
    Ok(ReputationSnapshot {
        assigned: row.get(offset)?,
        resolved: row.get(offset + 1)?,
        escalated: row.get(offset + 2)?,
        total_response_hours: row.get(offset + 3)?,
        total_resolution_hours: row.get(offset + 4)?,
        positive_ratings: row.get(offset + 5)?,
        negative_ratings: row.get(offset + 6)?,
    })
}

fn insert_update(tx: &Transaction<'_>, update: &GrievanceUpdate) -> Result<()> {
    tx.execute(
        "INSERT INTO grievance_updates(id, grievance_id, author_id, status, message, ledger_tx_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            update.id.to_string(),
            update.grievance_id.to_string(),
            update.author_id,
            update.status.as_str(),
            update.message,
            update.ledger_tx_id,
            canonical_timestamp(update.created_at),
        ],
    )
    .context("failed to insert grievance update")?;
    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now_timestamp()],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_timestamp() -> String {
    canonical_timestamp(OffsetDateTime::now_utc())
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_status(value: &str) -> Result<GrievanceStatus> {
    GrievanceStatus::parse(value).ok_or_else(|| anyhow!("unknown grievance status: {value}"))
}

fn parse_grievance_id(raw: &str) -> Result<GrievanceId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(GrievanceId(parsed))
}

fn parse_authority_id(raw: &str) -> Result<AuthorityId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(AuthorityId(parsed))
}

fn parse_update_id(raw: &str) -> Result<UpdateId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(UpdateId(parsed))
}

fn coordinates(lat: Option<f64>, lng: Option<f64>) -> Option<Coordinates> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use grievance_core::{canonical_hash, plan_escalation, CanonicalFields, ESCALATION_AUTHOR_ID};
    use time::Duration;

    use super::*;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn open_memory() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn mk_grievance(title: &str, created_at: OffsetDateTime) -> Result<Grievance> {
        let id = GrievanceId::new();
        let fields = CanonicalFields::new(id, title, "Details of the problem", "citizen-1", created_at);
        let hash = canonical_hash(&fields).map_err(|err| anyhow!("{err}"))?;
        Ok(Grievance {
            id,
            title: title.to_string(),
            description: "Details of the problem".to_string(),
            category: "Water Supply".to_string(),
            severity: 6,
            upvotes: 0,
            priority_score: 40,
            status: GrievanceStatus::Pending,
            is_escalated: false,
            escalated_at: None,
            assigned_to_id: None,
            department_id: "water".to_string(),
            creator_id: "citizen-1".to_string(),
            location: Some(Coordinates { lat: 12.97, lng: 77.59 }),
            embedding: Vec::new(),
            duplicate_of: None,
            canonical_hash: hash,
            ledger_tx_id: None,
            verified_on_ledger: false,
            estimated_resolution_date: None,
            created_at,
            updated_at: created_at,
        })
    }

    fn mk_authority(name: &str, level: AuthorityLevel, department_id: &str) -> Authority {
        Authority {
            id: AuthorityId::new(),
            name: name.to_string(),
            level,
            department_id: department_id.to_string(),
            external_account_id: None,
        }
    }

    #[test]
    fn sqlite_constraints_enforce_checks_and_foreign_keys() -> Result<()> {
        let store = open_memory()?;

        let check_result = store.conn.execute(
            "INSERT INTO authorities(id, name, level, department_id) VALUES (?1, ?2, ?3, ?4)",
            params![AuthorityId::new().to_string(), "Bad", "commissioner", "water"],
        );
        assert!(check_result.is_err());

        let fk_result = store.conn.execute(
            "INSERT INTO grievance_updates(id, grievance_id, author_id, status, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                UpdateId::new().to_string(),
                GrievanceId::new().to_string(),
                "tester",
                "pending",
                "orphan",
                "2026-01-01T00:00:00.000Z",
            ],
        );
        assert!(fk_result.is_err());

        Ok(())
    }

    #[test]
    fn grievance_round_trips_with_location_and_embedding() -> Result<()> {
        let mut store = open_memory()?;
        let mut grievance = mk_grievance("Low water pressure", fixture_time())?;
        grievance.estimated_resolution_date = Some(fixture_time() + Duration::days(3));
        store.insert_grievance(&grievance)?;
        store.set_duplicate_annotation(grievance.id, &[0.25, -0.5, 1.0], None)?;

        let Some(loaded) = store.get_grievance(grievance.id)? else {
            return Err(anyhow!("grievance should exist"));
        };
        assert_eq!(loaded.title, grievance.title);
        assert_eq!(loaded.location, grievance.location);
        assert_eq!(loaded.embedding, vec![0.25, -0.5, 1.0]);
        assert_eq!(loaded.created_at, grievance.created_at);
        assert_eq!(loaded.estimated_resolution_date, grievance.estimated_resolution_date);

        let by_hash = store.get_grievance_by_hash(&grievance.canonical_hash)?;
        assert_eq!(by_hash.map(|g| g.id), Some(grievance.id));
        Ok(())
    }

    #[test]
    fn duplicate_canonical_hash_is_rejected() -> Result<()> {
        let mut store = open_memory()?;
        let grievance = mk_grievance("Burst pipe", fixture_time())?;
        store.insert_grievance(&grievance)?;

        let mut clash = mk_grievance("Burst pipe again", fixture_time())?;
        clash.canonical_hash.clone_from(&grievance.canonical_hash);
        assert!(store.insert_grievance(&clash).is_err());
        Ok(())
    }

    #[test]
    fn overdue_query_skips_escalated_resolved_and_future_eta() -> Result<()> {
        let mut store = open_memory()?;
        let now = fixture_time();

        let mut overdue = mk_grievance("Overdue", now - Duration::days(5))?;
        overdue.estimated_resolution_date = Some(now - Duration::hours(1));
        let mut future = mk_grievance("Future", now - Duration::days(5))?;
        future.estimated_resolution_date = Some(now + Duration::hours(1));
        let mut resolved = mk_grievance("Resolved", now - Duration::days(5))?;
        resolved.estimated_resolution_date = Some(now - Duration::hours(1));
        resolved.status = GrievanceStatus::Resolved;
        let mut escalated = mk_grievance("Escalated", now - Duration::days(5))?;
        escalated.estimated_resolution_date = Some(now - Duration::hours(1));
        escalated.is_escalated = true;
        let no_eta = mk_grievance("No ETA", now - Duration::days(5))?;

        for grievance in [&overdue, &future, &resolved, &escalated, &no_eta] {
            store.insert_grievance(grievance)?;
        }

        let found = store.list_overdue(&OverdueQuery { now, limit: 100 })?;
        assert_eq!(found.iter().map(|g| g.id).collect::<Vec<_>>(), vec![overdue.id]);
        Ok(())
    }

    #[test]
    fn escalation_is_applied_at_most_once() -> Result<()> {
        let mut store = open_memory()?;
        let officer = mk_authority("Asha Rao", AuthorityLevel::Officer, "water");
        store.insert_authority(&officer)?;

        let now = fixture_time();
        let mut grievance = mk_grievance("Overdue", now - Duration::days(5))?;
        grievance.estimated_resolution_date = Some(now - Duration::hours(1));
        store.insert_grievance(&grievance)?;

        let plan = plan_escalation(&grievance, None, Some(&officer), now)
            .map_err(|err| anyhow!("{err}"))?;
        let update = GrievanceUpdate::new(
            grievance.id,
            ESCALATION_AUTHOR_ID,
            GrievanceStatus::Escalated,
            plan.message.clone(),
            now,
        );
        assert!(store.apply_escalation(&plan, 77, &update)?);

        let second = GrievanceUpdate::new(
            grievance.id,
            ESCALATION_AUTHOR_ID,
            GrievanceStatus::Escalated,
            plan.message.clone(),
            now,
        );
        assert!(!store.apply_escalation(&plan, 77, &second)?);

        let Some(loaded) = store.get_grievance(grievance.id)? else {
            return Err(anyhow!("grievance should exist"));
        };
        assert!(loaded.is_escalated);
        assert_eq!(loaded.status, GrievanceStatus::Escalated);
        assert_eq!(loaded.assigned_to_id, Some(officer.id));
        assert_eq!(loaded.priority_score, 77);
        assert_eq!(loaded.escalated_at, Some(now));
        assert_eq!(store.list_updates(grievance.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn update_tx_backfill_never_overwrites() -> Result<()> {
        let mut store = open_memory()?;
        let grievance = mk_grievance("Streetlight out", fixture_time())?;
        store.insert_grievance(&grievance)?;

        let update = GrievanceUpdate::new(
            grievance.id,
            "authority-1",
            GrievanceStatus::Acknowledged,
            "Looking into it",
            fixture_time() + Duration::hours(1),
        );
        store.record_status_change(&update, 35)?;

        assert!(store.set_update_ledger_tx(update.id, "0xaaa")?);
        assert!(!store.set_update_ledger_tx(update.id, "0xbbb")?);

        let updates = store.list_updates(grievance.id)?;
        assert_eq!(updates[0].ledger_tx_id.as_deref(), Some("0xaaa"));
        Ok(())
    }

    #[test]
    fn status_confirmation_stamps_only_its_own_row() -> Result<()> {
        let mut store = open_memory()?;
        let grievance = mk_grievance("Garbage pile", fixture_time())?;
        store.insert_grievance(&grievance)?;

        let statuses = [
            GrievanceStatus::Acknowledged,
            GrievanceStatus::InProgress,
            GrievanceStatus::Acknowledged,
        ];
        let mut rows = Vec::new();
        for (hour, status) in (1_i64..).zip(statuses) {
            let update = GrievanceUpdate::new(
                grievance.id,
                "authority-1",
                status,
                "Status note",
                fixture_time() + Duration::hours(hour),
            );
            store.record_status_change(&update, 30)?;
            rows.push(update.id);
        }

        // the first acknowledgement never got a receipt; the second one did
        let marked = store.mark_verified_by_hash(&grievance.canonical_hash, None)?;
        assert_eq!(marked, Some(grievance.id));
        assert!(store.list_updates(grievance.id)?.iter().all(|u| u.ledger_tx_id.is_none()));

        assert!(store.set_update_ledger_tx(rows[2], "0x03")?);
        assert!(!store.set_update_ledger_tx(rows[2], "0x03")?);

        let updates = store.list_updates(grievance.id)?;
        let stamped: Vec<_> =
            updates.iter().map(|u| (u.id, u.ledger_tx_id.as_deref())).collect();
        assert_eq!(stamped, vec![(rows[0], None), (rows[1], None), (rows[2], Some("0x03"))]);
        Ok(())
    }

    #[test]
    fn mark_verified_keeps_existing_tx_id() -> Result<()> {
        let mut store = open_memory()?;
        let grievance = mk_grievance("Open manhole", fixture_time())?;
        store.insert_grievance(&grievance)?;
        assert!(store.set_ledger_registration(grievance.id, "0xfirst")?);

        let marked = store.mark_verified_by_hash(&grievance.canonical_hash, Some("0xsecond"))?;
        assert_eq!(marked, Some(grievance.id));
        assert_eq!(store.mark_verified_by_hash(&"0".repeat(64), Some("0x"))?, None);

        let Some(loaded) = store.get_grievance(grievance.id)? else {
            return Err(anyhow!("grievance should exist"));
        };
        assert!(loaded.verified_on_ledger);
        assert_eq!(loaded.ledger_tx_id.as_deref(), Some("0xfirst"));
        Ok(())
    }

    #[test]
    fn duplicate_candidates_exclude_self_resolved_stale_and_unembedded() -> Result<()> {
        let mut store = open_memory()?;
        let now = fixture_time();

        let fresh = mk_grievance("Fresh", now - Duration::days(2))?;
        let stale = mk_grievance("Stale", now - Duration::days(45))?;
        let mut resolved = mk_grievance("Resolved", now - Duration::days(2))?;
        resolved.status = GrievanceStatus::Resolved;
        let unembedded = mk_grievance("Unembedded", now - Duration::days(2))?;
        let this_one = mk_grievance("Self", now - Duration::days(1))?;

        for grievance in [&fresh, &stale, &resolved, &unembedded, &this_one] {
            store.insert_grievance(grievance)?;
        }
        for grievance in [&fresh, &stale, &resolved, &this_one] {
            store.set_duplicate_annotation(grievance.id, &[1.0, 0.0], None)?;
        }

        let candidates = store.list_duplicate_candidates(&DuplicateCandidateQuery {
            updated_since: now - Duration::days(30),
            exclude: Some(this_one.id),
            limit: 100,
        })?;
        assert_eq!(candidates.iter().map(|c| c.id).collect::<Vec<_>>(), vec![fresh.id]);
        assert_eq!(candidates[0].location, fresh.location);
        Ok(())
    }

    #[test]
    fn authority_search_respects_department_and_exclusion() -> Result<()> {
        let mut store = open_memory()?;
        let water = mk_authority("Water Director", AuthorityLevel::Director, "water");
        let roads = mk_authority("Roads Director", AuthorityLevel::Director, "roads");
        store.insert_authority(&water)?;
        store.insert_authority(&roads)?;

        let scoped = store.find_authority(&AuthorityQuery {
            level: AuthorityLevel::Director,
            department_id: Some("roads".to_string()),
            exclude: None,
        })?;
        assert_eq!(scoped.map(|a| a.id), Some(roads.id));

        let excluded = store.find_authority(&AuthorityQuery {
            level: AuthorityLevel::Director,
            department_id: Some("water".to_string()),
            exclude: Some(water.id),
        })?;
        assert_eq!(excluded, None);

        let none = store.find_authority(&AuthorityQuery {
            level: AuthorityLevel::Officer,
            department_id: None,
            exclude: None,
        })?;
        assert_eq!(none, None);
        Ok(())
    }

    #[test]
    fn stats_events_accumulate() -> Result<()> {
        let mut store = open_memory()?;
        let gro = mk_authority("Ravi Kumar", AuthorityLevel::Gro, "water");
        store.insert_authority(&gro)?;

        store.record_stats_event(gro.id, ReputationEvent::Assignment)?;
        store.record_stats_event(gro.id, ReputationEvent::Assignment)?;
        store.record_stats_event(gro.id, ReputationEvent::FirstResponse { hours: 6.5 })?;
        store.record_stats_event(gro.id, ReputationEvent::Resolution { hours: 30.0 })?;
        store.record_stats_event(gro.id, ReputationEvent::Escalation)?;
        store.record_stats_event(gro.id, ReputationEvent::Rating { positive: true })?;
        store.record_stats_event(gro.id, ReputationEvent::Rating { positive: false })?;
        store.record_stats_event(gro.id, ReputationEvent::Rating { positive: false })?;

        let stats = store.authority_stats(gro.id)?;
        assert_eq!(stats.assigned, 2);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.escalated, 1);
        assert!((stats.total_response_hours - 6.5).abs() < 1e-9);
        assert!((stats.total_resolution_hours - 30.0).abs() < 1e-9);
        assert_eq!(stats.positive_ratings, 1);
        assert_eq!(stats.negative_ratings, 2);

        let listed = store.list_authority_stats()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, stats);

        assert!(store.record_stats_event(AuthorityId::new(), ReputationEvent::Assignment).is_err());
        Ok(())
    }

    #[test]
    fn migrate_records_each_version_once() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 0);
        assert_eq!(status.pending_versions, vec![1, 2]);

        store.migrate()?;
        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 2);
        assert!(status.pending_versions.is_empty());

        let recorded = store
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        assert_eq!(recorded, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn migrate_rejects_unknown_future_version() -> Result<()> {
        let mut store = open_memory()?;
        record_schema_version(&store.conn, 3)?;
        assert!(store.migrate().is_err());
        Ok(())
    }

    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = open_memory()?;

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, 2);

        Ok(())
    }

    #[test]
    fn concurrent_writes_and_reads_preserve_integrity() -> Result<()> {
        let db_path =
            std::env::temp_dir().join(format!("grievance-concurrency-{}.sqlite3", Ulid::new()));
        {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
        }

        let writer_threads = 4;
        let writes_per_thread = 20;
        let reader_threads = 2;
        let read_iterations = 30;

        let mut handles = Vec::new();

        for _ in 0..writer_threads {
            let writer_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let mut store = SqliteStore::open(&writer_path)?;
                store.migrate()?;
                for _ in 0..writes_per_thread {
                    store.insert_grievance(&mk_grievance("Concurrent", OffsetDateTime::now_utc())?)?;
                }
                Ok(())
            }));
        }

        for _ in 0..reader_threads {
            let reader_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let store = SqliteStore::open(&reader_path)?;
                for _ in 0..read_iterations {
                    let _ = store.list_grievances(&GrievanceListQuery {
                        limit: 1_000,
                        ..GrievanceListQuery::default()
                    })?;
                }
                Ok(())
            }));
        }

        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("concurrency thread panicked"));
            };
            thread_result?;
        }

        let store = SqliteStore::open(&db_path)?;
        let grievances =
            store.list_grievances(&GrievanceListQuery { limit: 1_000, ..Default::default() })?;
        assert_eq!(grievances.len(), writer_threads * writes_per_thread);

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());

        for suffix in ["", "-wal", "-shm"] {
            let path = if suffix.is_empty() {
                db_path.clone()
            } else {
                std::path::PathBuf::from(format!("{}{}", db_path.display(), suffix))
            };
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }

        Ok(())
    }
}
