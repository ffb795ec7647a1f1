//! Per-tenant quota ledger for AI provider calls
//!
//! Every AI invocation is gated by three overlapping windows (minute, hour,
//! day) and recorded in an append-only audit log. Window increments are
//! single atomic upserts so concurrent callers for one tenant never lose
//! counts. Store errors during checks fail open: the feature stays
//! available and the error is reported in the check result instead.

use crate::config::QuotaConfig;
use crate::db::{self, Database, NewApiCall, StoreOp, StorePolicy};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Rate-limit window granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    /// Check order matters: enforce reports the first tripped window,
    /// finest granularity first.
    pub fn all() -> [WindowKind; 3] {
        [WindowKind::Minute, WindowKind::Hour, WindowKind::Day]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        }
    }

    pub fn duration_secs(self) -> i64 {
        match self {
            WindowKind::Minute => 60,
            WindowKind::Hour => 3600,
            WindowKind::Day => 86400,
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single window check
#[derive(Debug, Clone, Serialize)]
pub struct WindowCheck {
    pub allowed: bool,
    pub remaining: i32,
    /// Populated when the check failed open on a store error
    pub reason: Option<String>,
}

/// A window's call budget is exhausted. Carries which granularity tripped
/// so callers can surface a meaningful retry hint.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitExceeded {
    pub window: WindowKind,
}

impl std::fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rate limit exceeded for the {} window", self.window)
    }
}

impl std::error::Error for RateLimitExceeded {}

/// One AI invocation attempt, for the audit log
#[derive(Debug, Clone)]
pub struct ApiCallRecord {
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
}

/// Reporting period for usage stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsagePeriod {
    Day,
    Week,
    Month,
}

impl UsagePeriod {
    fn lookback(self) -> Duration {
        match self {
            UsagePeriod::Day => Duration::days(1),
            UsagePeriod::Week => Duration::days(7),
            UsagePeriod::Month => Duration::days(30),
        }
    }
}

/// Usage aggregated per (service, operation) pair
#[derive(Debug, Clone, Serialize)]
pub struct OperationUsage {
    pub service: String,
    pub operation: String,
    pub calls: i64,
    pub failures: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub calls: i64,
    pub failures: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

/// Current standing of one rate-limit window
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub window: WindowKind,
    pub used: i32,
    pub limit: i32,
    pub remaining: i32,
    pub token_count: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub by_operation: Vec<OperationUsage>,
    pub totals: UsageTotals,
    pub rate_limits: Vec<WindowStatus>,
}

/// Tracks and enforces per-tenant call budgets across the three windows
pub struct QuotaLedger<'a> {
    db: &'a Database,
    limits: &'a QuotaConfig,
}

impl<'a> QuotaLedger<'a> {
    pub fn new(db: &'a Database, limits: &'a QuotaConfig) -> Self {
        Self { db, limits }
    }

    fn limit_for(&self, kind: WindowKind) -> i32 {
        match kind {
            WindowKind::Minute => self.limits.minute_calls,
            WindowKind::Hour => self.limits.hour_calls,
            WindowKind::Day => self.limits.day_calls,
        }
    }

    /// Fail-open result for a store error during a check.
    /// StorePolicy::for_operation(StoreOp::QuotaCheck) pins this choice.
    fn open_check(limit: i32, err: db::DbError) -> WindowCheck {
        debug_assert_eq!(
            StorePolicy::for_operation(StoreOp::QuotaCheck),
            StorePolicy::FailOpen
        );
        WindowCheck {
            allowed: true,
            remaining: limit,
            reason: Some(err.to_string()),
        }
    }

    /// Check one window for a tenant against its call limit
    pub fn check_window(&self, tenant_id: &str, kind: WindowKind) -> WindowCheck {
        self.check_window_at(tenant_id, kind, Utc::now())
    }

    pub fn check_window_at(
        &self,
        tenant_id: &str,
        kind: WindowKind,
        now: DateTime<Utc>,
    ) -> WindowCheck {
        let limit = self.limit_for(kind);

        let row = match self.db.window_row(tenant_id, kind.as_str()) {
            Ok(row) => row,
            Err(e) => return Self::open_check(limit, e),
        };

        let row = match row {
            // No row yet: the first call will create it with full budget
            None => {
                return WindowCheck {
                    allowed: true,
                    remaining: limit,
                    reason: None,
                }
            }
            Some(row) => row,
        };

        let elapsed = match db::parse_ts(&row.window_start) {
            Some(start) => (now - start).num_seconds() >= kind.duration_secs(),
            // Unreadable start counts as elapsed: roll forward rather than
            // lock the tenant out on a corrupt row
            None => true,
        };

        if elapsed {
            // Reset before evaluating; a failed reset still fails open
            let reason = self
                .db
                .reset_window(tenant_id, kind.as_str(), &now.to_rfc3339())
                .err()
                .map(|e| e.to_string());
            return WindowCheck {
                allowed: true,
                remaining: limit,
                reason,
            };
        }

        WindowCheck {
            allowed: row.call_count < limit,
            remaining: (limit - row.call_count).max(0),
            reason: None,
        }
    }

    /// Gate an AI invocation: minute, then hour, then day, short-circuiting
    /// on the first exhausted window.
    pub fn enforce(&self, tenant_id: &str) -> Result<(), RateLimitExceeded> {
        self.enforce_at(tenant_id, Utc::now())
    }

    pub fn enforce_at(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitExceeded> {
        for kind in WindowKind::all() {
            let check = self.check_window_at(tenant_id, kind, now);
            if !check.allowed {
                return Err(RateLimitExceeded { window: kind });
            }
        }
        Ok(())
    }

    /// Record one successful AI call: +1 call and +tokens on all three
    /// windows, each as a single atomic upsert.
    pub fn record_usage(&self, tenant_id: &str, tokens: i32) -> db::Result<()> {
        self.record_usage_at(tenant_id, tokens, Utc::now())
    }

    pub fn record_usage_at(
        &self,
        tenant_id: &str,
        tokens: i32,
        now: DateTime<Utc>,
    ) -> db::Result<()> {
        let now_str = now.to_rfc3339();
        for kind in WindowKind::all() {
            self.db.bump_window(tenant_id, kind.as_str(), tokens, &now_str)?;
        }
        Ok(())
    }

    /// Append an audit record. Never raises: losing an audit row must not
    /// fail the caller's primary operation
    /// (StorePolicy::for_operation(StoreOp::AuditLog)).
    pub fn log_api_call(&self, record: &ApiCallRecord) {
        self.log_api_call_at(record, Utc::now());
    }

    pub fn log_api_call_at(&self, record: &ApiCallRecord, now: DateTime<Utc>) {
        debug_assert_eq!(
            StorePolicy::for_operation(StoreOp::AuditLog),
            StorePolicy::Swallow
        );
        let request_id = Uuid::new_v4().to_string();
        let created_at = now.to_rfc3339();
        let row = NewApiCall {
            request_id: &request_id,
            tenant_id: &record.tenant_id,
            user_id: record.user_id.as_deref(),
            service: &record.service,
            operation: &record.operation,
            model: &record.model,
            prompt_tokens: record.prompt_tokens,
            completion_tokens: record.completion_tokens,
            duration_ms: record.duration_ms,
            success: record.success,
            error_message: record.error_message.as_deref(),
            created_at: &created_at,
        };
        let _ = self.db.insert_api_call(&row);
    }

    /// Read-only usage aggregation for reporting; not on the enforcement path
    pub fn usage_stats(&self, tenant_id: &str, period: UsagePeriod) -> db::Result<UsageStats> {
        self.usage_stats_at(tenant_id, period, Utc::now())
    }

    pub fn usage_stats_at(
        &self,
        tenant_id: &str,
        period: UsagePeriod,
        now: DateTime<Utc>,
    ) -> db::Result<UsageStats> {
        let since = (now - period.lookback()).to_rfc3339();
        let calls = self.db.api_calls_since(tenant_id, &since)?;

        let mut by_operation: Vec<OperationUsage> = Vec::new();
        let mut totals = UsageTotals::default();
        for call in &calls {
            totals.calls += 1;
            totals.prompt_tokens += i64::from(call.prompt_tokens);
            totals.completion_tokens += i64::from(call.completion_tokens);
            if !call.success {
                totals.failures += 1;
            }

            let pos = by_operation
                .iter()
                .position(|u| u.service == call.service && u.operation == call.operation);
            let idx = match pos {
                Some(idx) => idx,
                None => {
                    by_operation.push(OperationUsage {
                        service: call.service.clone(),
                        operation: call.operation.clone(),
                        calls: 0,
                        failures: 0,
                        prompt_tokens: 0,
                        completion_tokens: 0,
                    });
                    by_operation.len() - 1
                }
            };
            let entry = &mut by_operation[idx];
            entry.calls += 1;
            entry.prompt_tokens += i64::from(call.prompt_tokens);
            entry.completion_tokens += i64::from(call.completion_tokens);
            if !call.success {
                entry.failures += 1;
            }
        }

        let windows = self.db.windows_for_tenant(tenant_id)?;
        let mut rate_limits = Vec::new();
        for kind in WindowKind::all() {
            let limit = self.limit_for(kind);
            let row = windows.iter().find(|w| w.window_type == kind.as_str());
            // Count an elapsed window as empty without mutating it
            let (used, token_count) = match row {
                Some(row) => {
                    let live = db::parse_ts(&row.window_start)
                        .map(|start| (now - start).num_seconds() < kind.duration_secs())
                        .unwrap_or(false);
                    if live {
                        (row.call_count, row.token_count)
                    } else {
                        (0, 0)
                    }
                }
                None => (0, 0),
            };
            rate_limits.push(WindowStatus {
                window: kind,
                used,
                limit,
                remaining: (limit - used).max(0),
                token_count,
            });
        }

        Ok(UsageStats {
            by_operation,
            totals,
            rate_limits,
        })
    }
}
