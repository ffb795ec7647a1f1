//! Cadence - Proactive orchestration engine for AI-assisted teamwork
//!
//! Rate-limited, deduplicated, idempotent: the boring invariants that make
//! proactive AI features safe to run on a schedule.
//!
//! # Overview
//!
//! Cadence sits between external task/calendar/settings sources and an AI
//! text provider, and owns four concerns:
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`quota::QuotaLedger`] | Per-tenant minute/hour/day AI call budgets with an audit log |
//! | [`health`] | Deterministic 0.0-1.0 task health scoring and snapshots |
//! | [`nudge::NudgeGenerator`] | Deduplicated, expiring reminders from task and calendar state |
//! | [`ceremony::CeremonyOrchestrator`] | Once-per-period AI artifacts: morning focus, standup, weekly review |
//!
//! All state lives in a local SQLite database; concurrency invariants
//! (window counters, nudge dedup, ceremony idempotency) are enforced by
//! the store itself, so any number of callers can race safely.
//!
//! # Quick Start
//!
//! ```no_run
//! use cadence::{Database, EngineConfig, QuotaLedger};
//!
//! let db = Database::new("cadence.db").unwrap();
//! let config = EngineConfig::default();
//! let ledger = QuotaLedger::new(&db, &config.quota);
//!
//! // Gate an AI call, then account for it
//! ledger.enforce("tenant-1").unwrap();
//! ledger.record_usage("tenant-1", 200).unwrap();
//! ```

pub mod ceremony;
pub mod config;
pub mod context;
pub mod db;
pub mod health;
pub mod nudge;
pub mod plan;
pub mod quota;
pub mod schema;
#[cfg(test)]
pub mod testutil;
pub mod workload;

pub use ceremony::{
    CeremonyError, CeremonyKind, CeremonyOrchestrator, CeremonyOutcome, StandupState,
};
pub use config::EngineConfig;
pub use context::{
    AiError, AiProvider, CalendarEvent, CalendarSource, Capabilities, Completion,
    CompletionRequest, ContextError, Feature, NudgePreferences, SettingsSource, TaskPriority,
    TaskRecord, TaskSource, TaskStatus,
};
pub use db::{CeremonyRow, Database, DbError, NudgeRow};
pub use health::{compute_health, refresh_team_task_health, HealthReport, RiskLevel};
pub use nudge::{
    act_on_nudge, pending_nudges, update_nudge_status, NudgeError, NudgeGenerator, NudgePriority,
    NudgeType,
};
pub use plan::{MorningFocusPlan, StandupResponses, WeeklyReviewPlan};
pub use quota::{QuotaLedger, RateLimitExceeded, UsagePeriod, UsageStats, WindowCheck, WindowKind};
pub use workload::{WorkloadAnalyzer, WorkloadLevel, WorkloadReport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify core types are re-exported from crate root
        let _ = WindowKind::Minute;
        let _ = RiskLevel::Low;
    }
}
