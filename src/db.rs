//! SQLite database with Diesel ORM
//!
//! Stores rate-limit windows, the AI call audit log, task health snapshots,
//! nudges, and ceremonies. Schema is created idempotently on open; the
//! uniqueness constraints here are load-bearing: nudge dedup and ceremony
//! idempotency are enforced by the store, not by application checks.

use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use std::path::Path;

/// Walk up directory tree to find .cadence folder (like git finds .git)
/// Can be overridden with CADENCE_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("CADENCE_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    // Walk up directory tree to find .cadence folder
    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let cadence_dir = dir.join(".cadence");
            if cadence_dir.exists() && cadence_dir.is_dir() {
                return cadence_dir.join("cadence.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break, // Reached filesystem root
            }
        }
    }

    // No .cadence found - default to current directory
    std::path::PathBuf::from(".cadence/cadence.db")
}

/// Parse an RFC3339 timestamp column back into a UTC instant.
/// Returns None for malformed values rather than failing the whole query.
pub fn parse_ts(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&chrono::Utc))
}

// ============================================================================
// Store Error Policy
// ============================================================================

/// What a caller does when the store errors out mid-operation.
///
/// The choice is deliberate per operation: quota checks prefer availability
/// over perfect enforcement, audit logging must never fail its caller, and
/// durable writes must surface errors or the dedup/idempotency invariants
/// would silently break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePolicy {
    /// Proceed as if the operation succeeded, reporting the error separately.
    FailOpen,
    /// Drop the error entirely; the operation is best-effort.
    Swallow,
    /// Propagate the error to the caller.
    FailClosed,
}

/// The engine operations with a store-error policy attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    QuotaCheck,
    AuditLog,
    NudgeWrite,
    CeremonyWrite,
    HealthWrite,
    UsageRead,
}

impl StorePolicy {
    pub fn for_operation(op: StoreOp) -> StorePolicy {
        match op {
            StoreOp::QuotaCheck => StorePolicy::FailOpen,
            StoreOp::AuditLog => StorePolicy::Swallow,
            StoreOp::NudgeWrite
            | StoreOp::CeremonyWrite
            | StoreOp::HealthWrite
            | StoreOp::UsageRead => StorePolicy::FailClosed,
        }
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable rate-limit window row
#[derive(Insertable)]
#[diesel(table_name = rate_limit_windows)]
pub struct NewRateLimitWindow<'a> {
    pub tenant_id: &'a str,
    pub window_type: &'a str,
    pub window_start: &'a str,
    pub call_count: i32,
    pub token_count: i32,
}

/// Queryable rate-limit window row
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = rate_limit_windows)]
pub struct RateLimitWindow {
    pub tenant_id: String,
    pub window_type: String,
    pub window_start: String,
    pub call_count: i32,
    pub token_count: i32,
}

/// Insertable api call log entry
#[derive(Insertable)]
#[diesel(table_name = api_call_log)]
pub struct NewApiCall<'a> {
    pub request_id: &'a str,
    pub tenant_id: &'a str,
    pub user_id: Option<&'a str>,
    pub service: &'a str,
    pub operation: &'a str,
    pub model: &'a str,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub duration_ms: i32,
    pub success: bool,
    pub error_message: Option<&'a str>,
    pub created_at: &'a str,
}

/// Queryable api call log entry
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = api_call_log)]
pub struct ApiCallRow {
    pub id: i32,
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub service: String,
    pub operation: String,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub duration_ms: i32,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// Insertable task health snapshot
#[derive(Insertable)]
#[diesel(table_name = task_health_snapshots)]
pub struct NewHealthSnapshot<'a> {
    pub task_id: &'a str,
    pub tenant_id: &'a str,
    pub health_score: f64,
    pub risk_level: &'a str,
    pub risk_factors: &'a str,
    pub computed_at: &'a str,
}

/// Queryable task health snapshot
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = task_health_snapshots)]
pub struct HealthSnapshotRow {
    pub task_id: String,
    pub tenant_id: String,
    pub health_score: f64,
    pub risk_level: String,
    pub risk_factors: String,
    pub computed_at: String,
}

/// Insertable nudge
#[derive(Insertable)]
#[diesel(table_name = nudges)]
pub struct NewNudge<'a> {
    pub tenant_id: &'a str,
    pub user_id: &'a str,
    pub nudge_type: &'a str,
    pub title: &'a str,
    pub message: &'a str,
    pub priority: &'a str,
    pub related_task_id: Option<&'a str>,
    pub related_event_id: Option<&'a str>,
    pub status: &'a str,
    pub suggested_actions: &'a str,
    pub created_at: &'a str,
    pub expires_at: Option<&'a str>,
}

/// Queryable nudge
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = nudges)]
pub struct NudgeRow {
    pub id: i32,
    pub tenant_id: String,
    pub user_id: String,
    pub nudge_type: String,
    pub title: String,
    pub message: String,
    pub priority: String,
    pub related_task_id: Option<String>,
    pub related_event_id: Option<String>,
    pub status: String,
    pub suggested_actions: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub acted_at: Option<String>,
    pub dismissed_at: Option<String>,
}

/// Insertable ceremony
#[derive(Insertable)]
#[diesel(table_name = ceremonies)]
pub struct NewCeremony<'a> {
    pub tenant_id: &'a str,
    pub user_id: &'a str,
    pub ceremony_type: &'a str,
    pub period_key: &'a str,
    pub status: &'a str,
    pub ai_plan: Option<&'a str>,
    pub ai_summary: Option<&'a str>,
    pub responses: Option<&'a str>,
    pub created_at: &'a str,
    pub completed_at: Option<&'a str>,
}

/// Queryable ceremony
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = ceremonies)]
pub struct CeremonyRow {
    pub id: i32,
    pub tenant_id: String,
    pub user_id: String,
    pub ceremony_type: String,
    pub period_key: String,
    pub status: String,
    pub ai_plan: Option<String>,
    pub ai_summary: Option<String>,
    pub responses: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Result of an insert protected by a uniqueness constraint.
#[derive(Debug)]
pub enum InsertOutcome<T> {
    /// This caller won the race; the fresh row is returned.
    Inserted(T),
    /// Another row already holds the key; the caller should re-fetch.
    Conflict,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects CADENCE_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        // Run raw SQL to create tables if they don't exist
        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS rate_limit_windows (
                tenant_id TEXT NOT NULL,
                window_type TEXT NOT NULL,
                window_start TEXT NOT NULL,
                call_count INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tenant_id, window_type)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS api_call_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                request_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                user_id TEXT,
                service TEXT NOT NULL,
                operation TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS task_health_snapshots (
                task_id TEXT PRIMARY KEY NOT NULL,
                tenant_id TEXT NOT NULL,
                health_score REAL NOT NULL,
                risk_level TEXT NOT NULL,
                risk_factors TEXT NOT NULL,
                computed_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS nudges (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                nudge_type TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                priority TEXT NOT NULL,
                related_task_id TEXT,
                related_event_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                suggested_actions TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                expires_at TEXT,
                acted_at TEXT,
                dismissed_at TEXT
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS ceremonies (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                ceremony_type TEXT NOT NULL,
                period_key TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                ai_plan TEXT,
                ai_summary TEXT,
                responses TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                UNIQUE(tenant_id, user_id, ceremony_type, period_key)
            )
        "#).execute(&mut conn)?;

        // At most one pending nudge per (tenant, user, type, related row).
        // Losing concurrent generators hit this index and skip their candidate.
        diesel::sql_query(r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nudges_pending_dedup
            ON nudges(tenant_id, user_id, nudge_type,
                      COALESCE(related_task_id, related_event_id, ''))
            WHERE status = 'pending'
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nudges_user ON nudges(tenant_id, user_id, status)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_api_calls_tenant ON api_call_log(tenant_id, created_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_snapshots_tenant ON task_health_snapshots(tenant_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_ceremonies_lookup ON ceremonies(tenant_id, user_id, ceremony_type, period_key)").execute(&mut conn)?;

        Ok(())
    }

    fn last_insert_id(conn: &mut DbConn) -> Result<i32> {
        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(conn)?;
        Ok(id)
    }

    // ========================================================================
    // Rate Limit Window Operations
    // ========================================================================

    /// Fetch the current window row for a tenant/granularity, if any
    pub fn window_row(&self, tenant_id: &str, window_type: &str) -> Result<Option<RateLimitWindow>> {
        let mut conn = self.get_conn()?;
        let row = rate_limit_windows::table
            .filter(rate_limit_windows::tenant_id.eq(tenant_id))
            .filter(rate_limit_windows::window_type.eq(window_type))
            .first::<RateLimitWindow>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Roll an elapsed window forward in place: new start, zeroed counts
    pub fn reset_window(&self, tenant_id: &str, window_type: &str, window_start: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::update(
            rate_limit_windows::table
                .filter(rate_limit_windows::tenant_id.eq(tenant_id))
                .filter(rate_limit_windows::window_type.eq(window_type)),
        )
        .set((
            rate_limit_windows::window_start.eq(window_start),
            rate_limit_windows::call_count.eq(0),
            rate_limit_windows::token_count.eq(0),
        ))
        .execute(&mut conn)?;
        Ok(())
    }

    /// Atomically add one call and `tokens` tokens to a window, creating it
    /// if absent. A single upsert per window keeps concurrent callers from
    /// losing increments.
    pub fn bump_window(&self, tenant_id: &str, window_type: &str, tokens: i32, now: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        let new_row = NewRateLimitWindow {
            tenant_id,
            window_type,
            window_start: now,
            call_count: 1,
            token_count: tokens,
        };
        diesel::insert_into(rate_limit_windows::table)
            .values(&new_row)
            .on_conflict((rate_limit_windows::tenant_id, rate_limit_windows::window_type))
            .do_update()
            .set((
                rate_limit_windows::call_count.eq(rate_limit_windows::call_count + 1),
                rate_limit_windows::token_count.eq(rate_limit_windows::token_count + tokens),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// All window rows for a tenant (reporting)
    pub fn windows_for_tenant(&self, tenant_id: &str) -> Result<Vec<RateLimitWindow>> {
        let mut conn = self.get_conn()?;
        let rows = rate_limit_windows::table
            .filter(rate_limit_windows::tenant_id.eq(tenant_id))
            .load::<RateLimitWindow>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Api Call Log Operations
    // ========================================================================

    /// Append an audit record for one AI invocation attempt
    pub fn insert_api_call(&self, record: &NewApiCall<'_>) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(api_call_log::table)
            .values(record)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Audit records for a tenant since a given instant, oldest first
    pub fn api_calls_since(&self, tenant_id: &str, since: &str) -> Result<Vec<ApiCallRow>> {
        let mut conn = self.get_conn()?;
        let rows = api_call_log::table
            .filter(api_call_log::tenant_id.eq(tenant_id))
            .filter(api_call_log::created_at.ge(since))
            .order(api_call_log::created_at.asc())
            .load::<ApiCallRow>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Task Health Snapshot Operations
    // ========================================================================

    /// Upsert the health snapshot for a task (it is a cache, not a history)
    pub fn upsert_health_snapshot(&self, snapshot: &NewHealthSnapshot<'_>) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(task_health_snapshots::table)
            .values(snapshot)
            .on_conflict(task_health_snapshots::task_id)
            .do_update()
            .set((
                task_health_snapshots::tenant_id.eq(snapshot.tenant_id),
                task_health_snapshots::health_score.eq(snapshot.health_score),
                task_health_snapshots::risk_level.eq(snapshot.risk_level),
                task_health_snapshots::risk_factors.eq(snapshot.risk_factors),
                task_health_snapshots::computed_at.eq(snapshot.computed_at),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// All snapshots for a tenant, riskiest first
    pub fn health_snapshots_for_tenant(&self, tenant_id: &str) -> Result<Vec<HealthSnapshotRow>> {
        let mut conn = self.get_conn()?;
        let rows = task_health_snapshots::table
            .filter(task_health_snapshots::tenant_id.eq(tenant_id))
            .order(task_health_snapshots::health_score.asc())
            .load::<HealthSnapshotRow>(&mut conn)?;
        Ok(rows)
    }

    /// Snapshot for a single task, if present
    pub fn health_snapshot(&self, task_id: &str) -> Result<Option<HealthSnapshotRow>> {
        let mut conn = self.get_conn()?;
        let row = task_health_snapshots::table
            .filter(task_health_snapshots::task_id.eq(task_id))
            .first::<HealthSnapshotRow>(&mut conn)
            .optional()?;
        Ok(row)
    }

    // ========================================================================
    // Nudge Operations
    // ========================================================================

    /// Insert a nudge, deduplicating against the pending partial index.
    /// Returns Conflict when an equivalent pending nudge already exists.
    pub fn insert_nudge(&self, nudge: &NewNudge<'_>) -> Result<InsertOutcome<NudgeRow>> {
        let mut conn = self.get_conn()?;
        let inserted = diesel::insert_into(nudges::table)
            .values(nudge)
            .execute(&mut conn);
        match inserted {
            Ok(_) => {
                let id = Self::last_insert_id(&mut conn)?;
                let row = nudges::table
                    .filter(nudges::id.eq(id))
                    .first::<NudgeRow>(&mut conn)?;
                Ok(InsertOutcome::Inserted(row))
            }
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Nudges with status=pending for a user (expiry filtering happens above)
    pub fn pending_nudge_rows(&self, tenant_id: &str, user_id: &str) -> Result<Vec<NudgeRow>> {
        let mut conn = self.get_conn()?;
        let rows = nudges::table
            .filter(nudges::tenant_id.eq(tenant_id))
            .filter(nudges::user_id.eq(user_id))
            .filter(nudges::status.eq("pending"))
            .order(nudges::created_at.asc())
            .load::<NudgeRow>(&mut conn)?;
        Ok(rows)
    }

    /// Fetch one nudge by id
    pub fn nudge_by_id(&self, nudge_id: i32) -> Result<Option<NudgeRow>> {
        let mut conn = self.get_conn()?;
        let row = nudges::table
            .filter(nudges::id.eq(nudge_id))
            .first::<NudgeRow>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Transition a nudge to acted or dismissed, stamping the matching field
    pub fn set_nudge_status(
        &self,
        nudge_id: i32,
        status: &str,
        acted_at: Option<&str>,
        dismissed_at: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::update(nudges::table.filter(nudges::id.eq(nudge_id)))
            .set((
                nudges::status.eq(status),
                nudges::acted_at.eq(acted_at),
                nudges::dismissed_at.eq(dismissed_at),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    // ========================================================================
    // Ceremony Operations
    // ========================================================================

    /// Ceremony for a (tenant, user, type, period) key, if any
    pub fn ceremony_for_period(
        &self,
        tenant_id: &str,
        user_id: &str,
        ceremony_type: &str,
        period_key: &str,
    ) -> Result<Option<CeremonyRow>> {
        let mut conn = self.get_conn()?;
        let row = ceremonies::table
            .filter(ceremonies::tenant_id.eq(tenant_id))
            .filter(ceremonies::user_id.eq(user_id))
            .filter(ceremonies::ceremony_type.eq(ceremony_type))
            .filter(ceremonies::period_key.eq(period_key))
            .first::<CeremonyRow>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Fetch one ceremony by id
    pub fn ceremony_by_id(&self, ceremony_id: i32) -> Result<Option<CeremonyRow>> {
        let mut conn = self.get_conn()?;
        let row = ceremonies::table
            .filter(ceremonies::id.eq(ceremony_id))
            .first::<CeremonyRow>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Insert a ceremony under the (tenant, user, type, period) uniqueness
    /// constraint. Conflict means another caller already holds the period;
    /// the loser re-fetches the winner's row instead of erroring.
    pub fn insert_ceremony(&self, ceremony: &NewCeremony<'_>) -> Result<InsertOutcome<CeremonyRow>> {
        let mut conn = self.get_conn()?;
        let inserted = diesel::insert_into(ceremonies::table)
            .values(ceremony)
            .execute(&mut conn);
        match inserted {
            Ok(_) => {
                let id = Self::last_insert_id(&mut conn)?;
                let row = ceremonies::table
                    .filter(ceremonies::id.eq(id))
                    .first::<CeremonyRow>(&mut conn)?;
                Ok(InsertOutcome::Inserted(row))
            }
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Complete a pending ceremony (standup submission path)
    pub fn complete_ceremony(
        &self,
        ceremony_id: i32,
        ai_summary: Option<&str>,
        responses: Option<&str>,
        completed_at: &str,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::update(ceremonies::table.filter(ceremonies::id.eq(ceremony_id)))
            .set((
                ceremonies::status.eq("completed"),
                ceremonies::ai_summary.eq(ai_summary),
                ceremonies::responses.eq(responses),
                ceremonies::completed_at.eq(Some(completed_at)),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Completed ceremonies of a type for a tenant/user since an instant,
    /// newest first (weekly review context gathering)
    pub fn completed_ceremonies_since(
        &self,
        tenant_id: &str,
        user_id: &str,
        ceremony_type: &str,
        since: &str,
    ) -> Result<Vec<CeremonyRow>> {
        let mut conn = self.get_conn()?;
        let rows = ceremonies::table
            .filter(ceremonies::tenant_id.eq(tenant_id))
            .filter(ceremonies::user_id.eq(user_id))
            .filter(ceremonies::ceremony_type.eq(ceremony_type))
            .filter(ceremonies::status.eq("completed"))
            .filter(ceremonies::created_at.ge(since))
            .order(ceremonies::created_at.desc())
            .load::<CeremonyRow>(&mut conn)?;
        Ok(rows)
    }

    /// Drop a table out from under the engine. Test-only, for exercising
    /// the store-error policies.
    #[cfg(test)]
    pub fn break_table(&self, table: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::sql_query(format!("DROP TABLE {}", table)).execute(&mut conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(StorePolicy::for_operation(StoreOp::QuotaCheck), StorePolicy::FailOpen);
        assert_eq!(StorePolicy::for_operation(StoreOp::AuditLog), StorePolicy::Swallow);
        assert_eq!(StorePolicy::for_operation(StoreOp::NudgeWrite), StorePolicy::FailClosed);
        assert_eq!(StorePolicy::for_operation(StoreOp::CeremonyWrite), StorePolicy::FailClosed);
        assert_eq!(StorePolicy::for_operation(StoreOp::HealthWrite), StorePolicy::FailClosed);
        assert_eq!(StorePolicy::for_operation(StoreOp::UsageRead), StorePolicy::FailClosed);
    }

    #[test]
    fn test_parse_ts_roundtrip() {
        let now = chrono::Utc::now();
        let parsed = parse_ts(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
        assert!(parse_ts("not a timestamp").is_none());
    }
}
