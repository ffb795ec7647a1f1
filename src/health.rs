//! Deterministic task health scoring
//!
//! A task's health starts at 1.0 and loses fixed deductions for being
//! overdue, stale, or urgent-and-aging. The result is clamped to [0, 1]
//! and classified into a risk level. Scoring is pure; persistence is a
//! separate upsert so the snapshot table stays a cache, not a history.

use crate::config::HealthConfig;
use crate::context::{ContextError, TaskRecord, TaskSource};
use crate::db::{self, Database, NewHealthSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;

// Deductions. The overdue penalty has a base component: being past due at
// all already puts a task at risk, before the per-day ramp kicks in.
const OVERDUE_BASE: f64 = 0.25;
const OVERDUE_PER_DAY: f64 = 0.05;
const OVERDUE_CAP: f64 = 0.5;
const STALE_PENALTY: f64 = 0.3;
const URGENT_AGING_PENALTY: f64 = 0.2;

// Risk thresholds on the clamped score
const LOW_FLOOR: f64 = 0.7;
const MEDIUM_FLOOR: f64 = 0.4;
const CRITICAL_OVERDUE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Computed health for one open task
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub task_id: String,
    pub health_score: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

/// Compute health for a task. Returns None for done/cancelled work -
/// health is only meaningful for open tasks.
pub fn compute_health(
    task: &TaskRecord,
    config: &HealthConfig,
    now: DateTime<Utc>,
) -> Option<HealthReport> {
    if !task.status.is_open() {
        return None;
    }

    let mut score = 1.0_f64;
    let mut factors: Vec<String> = Vec::new();

    let mut overdue_days = -1_i64;
    if let Some(due) = task.due_at {
        if due < now {
            overdue_days = (now - due).num_days();
            let deduction = (OVERDUE_BASE + OVERDUE_PER_DAY * overdue_days as f64).min(OVERDUE_CAP);
            score -= deduction;
            if overdue_days == 0 {
                factors.push("Overdue since earlier today".to_string());
            } else if overdue_days == 1 {
                factors.push("Overdue by 1 day".to_string());
            } else {
                factors.push(format!("Overdue by {} days", overdue_days));
            }
        }
    }

    let age_days = (now - task.created_at).num_days();
    let inactive_days = match task.updated_at {
        Some(updated) => (now - updated).num_days(),
        None => age_days,
    };
    let stale = task.due_at.is_none()
        && age_days > config.stale_after_days
        && inactive_days > config.stale_after_days;
    if stale {
        score -= STALE_PENALTY;
        factors.push("No progress".to_string());
    }

    let urgent_aging = task.priority.is_urgent() && age_days > config.urgent_aging_days;
    if urgent_aging {
        score -= URGENT_AGING_PENALTY;
        factors.push("Urgent task aging".to_string());
    }

    let score = score.clamp(0.0, 1.0);
    let mut risk_level = if score >= LOW_FLOOR {
        RiskLevel::Low
    } else if score >= MEDIUM_FLOOR {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };
    // Critical tier: severe factors co-occurring, not score alone
    if overdue_days > CRITICAL_OVERDUE_DAYS && urgent_aging {
        risk_level = RiskLevel::Critical;
    }

    Some(HealthReport {
        task_id: task.id.clone(),
        health_score: score,
        risk_level,
        risk_factors: factors,
        computed_at: now,
    })
}

/// Error from the health refresh path
#[derive(Debug)]
pub enum HealthError {
    Db(db::DbError),
    Context(ContextError),
}

impl std::fmt::Display for HealthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthError::Db(e) => write!(f, "{}", e),
            HealthError::Context(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for HealthError {}

impl From<db::DbError> for HealthError {
    fn from(e: db::DbError) -> Self {
        HealthError::Db(e)
    }
}

impl From<ContextError> for HealthError {
    fn from(e: ContextError) -> Self {
        HealthError::Context(e)
    }
}

/// Compute and persist the snapshot for one task (upsert by task id).
/// Snapshot writes fail closed.
pub fn snapshot_task(
    db: &Database,
    tenant_id: &str,
    task: &TaskRecord,
    config: &HealthConfig,
    now: DateTime<Utc>,
) -> db::Result<Option<HealthReport>> {
    let report = match compute_health(task, config, now) {
        Some(report) => report,
        None => return Ok(None),
    };

    let factors_json =
        serde_json::to_string(&report.risk_factors).unwrap_or_else(|_| "[]".to_string());
    let computed_at = report.computed_at.to_rfc3339();
    db.upsert_health_snapshot(&NewHealthSnapshot {
        task_id: &report.task_id,
        tenant_id,
        health_score: report.health_score,
        risk_level: report.risk_level.as_str(),
        risk_factors: &factors_json,
        computed_at: &computed_at,
    })?;
    Ok(Some(report))
}

/// Outcome of a bulk refresh
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub scanned: usize,
    pub snapshotted: usize,
    pub skipped: usize,
}

/// Recompute snapshots for every open task of a tenant. Invoked by an
/// external scheduler; the engine does not schedule itself.
pub fn refresh_team_task_health(
    db: &Database,
    tasks: &dyn TaskSource,
    tenant_id: &str,
    config: &HealthConfig,
    now: DateTime<Utc>,
) -> Result<RefreshSummary, HealthError> {
    let all = tasks.team_tasks(tenant_id)?;
    let mut summary = RefreshSummary::default();
    for task in &all {
        summary.scanned += 1;
        match snapshot_task(db, tenant_id, task, config, now)? {
            Some(_) => summary.snapshotted += 1,
            None => summary.skipped += 1,
        }
    }
    Ok(summary)
}
