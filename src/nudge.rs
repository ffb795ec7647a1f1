//! Proactive nudge generation and lifecycle
//!
//! Scans a user's tasks and calendar for candidates (overdue, due soon,
//! stalled, meeting starting soon) and inserts at most one pending nudge
//! per candidate. Dedup is enforced by the store's partial unique index:
//! a losing insert is a skip, not an error. Nudges expire naturally via
//! expires_at and are filtered, never deleted.

use crate::config::NudgeConfig;
use crate::context::{
    CalendarSource, Capabilities, ContextError, SettingsSource, TaskRecord, TaskSource,
};
use crate::db::{self, Database, InsertOutcome, NewNudge, NudgeRow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeType {
    OverdueTask,
    StaleTask,
    UpcomingDeadline,
    UpcomingMeeting,
}

impl NudgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NudgeType::OverdueTask => "overdue_task",
            NudgeType::StaleTask => "stale_task",
            NudgeType::UpcomingDeadline => "upcoming_deadline",
            NudgeType::UpcomingMeeting => "upcoming_meeting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NudgePriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl NudgePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            NudgePriority::Low => "low",
            NudgePriority::Medium => "medium",
            NudgePriority::High => "high",
            NudgePriority::Urgent => "urgent",
        }
    }

    fn rank(value: &str) -> u8 {
        match value {
            "urgent" => 3,
            "high" => 2,
            "medium" => 1,
            _ => 0,
        }
    }
}

/// Error from nudge operations
#[derive(Debug)]
pub enum NudgeError {
    NotFound(i32),
    InvalidStatus(String),
    Db(db::DbError),
    Context(ContextError),
}

impl std::fmt::Display for NudgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NudgeError::NotFound(id) => write!(f, "Nudge {} not found", id),
            NudgeError::InvalidStatus(s) => {
                write!(f, "Invalid nudge status '{}' (expected acted or dismissed)", s)
            }
            NudgeError::Db(e) => write!(f, "{}", e),
            NudgeError::Context(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for NudgeError {}

impl From<db::DbError> for NudgeError {
    fn from(e: db::DbError) -> Self {
        NudgeError::Db(e)
    }
}

impl From<ContextError> for NudgeError {
    fn from(e: ContextError) -> Self {
        NudgeError::Context(e)
    }
}

/// One candidate reminder, before it is persisted
struct Candidate {
    nudge_type: NudgeType,
    title: String,
    message: String,
    priority: NudgePriority,
    related_task_id: Option<String>,
    related_event_id: Option<String>,
    suggested_actions: &'static [&'static str],
    expires_at: Option<DateTime<Utc>>,
}

/// Derives, deduplicates, and expires nudges for a user
pub struct NudgeGenerator<'a> {
    db: &'a Database,
    tasks: &'a dyn TaskSource,
    calendar: &'a dyn CalendarSource,
    settings: &'a dyn SettingsSource,
    config: &'a NudgeConfig,
}

impl<'a> NudgeGenerator<'a> {
    pub fn new(
        db: &'a Database,
        tasks: &'a dyn TaskSource,
        calendar: &'a dyn CalendarSource,
        settings: &'a dyn SettingsSource,
        config: &'a NudgeConfig,
    ) -> Self {
        Self {
            db,
            tasks,
            calendar,
            settings,
            config,
        }
    }

    /// Generate nudges for a user right now. Returns only the newly
    /// created nudges; candidates already covered by a pending nudge are
    /// skipped, so repeated calls create nothing new.
    pub fn generate_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<NudgeRow>, NudgeError> {
        self.generate_for_user_at(tenant_id, user_id, Utc::now())
    }

    pub fn generate_for_user_at(
        &self,
        tenant_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NudgeRow>, NudgeError> {
        // Flags and preferences resolved once for the whole request.
        // An off switch means no task/calendar reads and no writes.
        let caps = Capabilities::resolve(self.settings, tenant_id, user_id)?;
        if !caps.smart_nudges {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let prefs = &caps.nudge_preferences;

        if prefs.overdue || prefs.stale || prefs.upcoming_deadline {
            let tasks = self.tasks.user_tasks(tenant_id, user_id)?;
            for task in tasks.iter().filter(|t| t.status.is_open()) {
                if let Some(candidate) = self.task_candidate(task, prefs, now) {
                    candidates.push(candidate);
                }
                if prefs.stale {
                    if let Some(candidate) = self.stale_candidate(task, now) {
                        candidates.push(candidate);
                    }
                }
            }
        }

        if prefs.upcoming_meeting {
            let horizon = now + Duration::hours(self.config.meeting_lookahead_hours);
            let events = self
                .calendar
                .events_between(tenant_id, user_id, now, horizon)?;
            for event in events.iter().filter(|e| !e.is_all_day) {
                if event.start_at > now {
                    candidates.push(self.meeting_candidate(event, now));
                }
            }
        }

        let mut created = Vec::new();
        for candidate in candidates {
            let created_at = now.to_rfc3339();
            let expires_at = candidate.expires_at.map(|e| e.to_rfc3339());
            let actions = serde_json::to_string(candidate.suggested_actions)
                .unwrap_or_else(|_| "[]".to_string());
            let row = NewNudge {
                tenant_id,
                user_id,
                nudge_type: candidate.nudge_type.as_str(),
                title: &candidate.title,
                message: &candidate.message,
                priority: candidate.priority.as_str(),
                related_task_id: candidate.related_task_id.as_deref(),
                related_event_id: candidate.related_event_id.as_deref(),
                status: "pending",
                suggested_actions: &actions,
                created_at: &created_at,
                expires_at: expires_at.as_deref(),
            };
            match self.db.insert_nudge(&row)? {
                InsertOutcome::Inserted(nudge) => created.push(nudge),
                // A pending nudge for this candidate already exists
                InsertOutcome::Conflict => {}
            }
        }
        Ok(created)
    }

    /// Overdue beats due-soon for the same task; a task produces at most
    /// one deadline-flavored candidate.
    fn task_candidate(
        &self,
        task: &TaskRecord,
        prefs: &crate::context::NudgePreferences,
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        let due = task.due_at?;
        if due < now {
            if !prefs.overdue {
                return None;
            }
            let overdue_days = (now - due).num_days();
            let priority = if overdue_days > 7 {
                NudgePriority::Urgent
            } else {
                NudgePriority::High
            };
            let message = if overdue_days == 0 {
                format!("\"{}\" was due earlier today.", task.title)
            } else if overdue_days == 1 {
                format!("\"{}\" was due 1 day ago.", task.title)
            } else {
                format!("\"{}\" was due {} days ago.", task.title, overdue_days)
            };
            return Some(Candidate {
                nudge_type: NudgeType::OverdueTask,
                title: format!("Overdue: {}", task.title),
                message,
                priority,
                related_task_id: Some(task.id.clone()),
                related_event_id: None,
                suggested_actions: &["complete_task", "reschedule", "dismiss"],
                expires_at: Some(now + Duration::days(self.config.overdue_expiry_days)),
            });
        }

        if !prefs.upcoming_deadline {
            return None;
        }
        let lookahead = Duration::hours(self.config.deadline_lookahead_hours);
        if due > now + lookahead {
            return None;
        }
        let hours_left = (due - now).num_hours();
        let priority = if hours_left <= 24 {
            NudgePriority::High
        } else {
            NudgePriority::Medium
        };
        Some(Candidate {
            nudge_type: NudgeType::UpcomingDeadline,
            title: format!("Due soon: {}", task.title),
            message: format!("\"{}\" is due in about {} hour(s).", task.title, hours_left.max(1)),
            priority,
            related_task_id: Some(task.id.clone()),
            related_event_id: None,
            suggested_actions: &["view_task", "complete_task", "dismiss"],
            // Pointless after the deadline passes; the overdue nudge takes over
            expires_at: Some(due),
        })
    }

    fn stale_candidate(&self, task: &TaskRecord, now: DateTime<Utc>) -> Option<Candidate> {
        if task.due_at.is_some() {
            return None;
        }
        let age_days = (now - task.created_at).num_days();
        let inactive_days = match task.updated_at {
            Some(updated) => (now - updated).num_days(),
            None => age_days,
        };
        if age_days <= self.config.stale_after_days || inactive_days <= self.config.stale_after_days
        {
            return None;
        }
        Some(Candidate {
            nudge_type: NudgeType::StaleTask,
            title: format!("Stalled: {}", task.title),
            message: format!(
                "\"{}\" has had no activity for over {} days.",
                task.title, self.config.stale_after_days
            ),
            priority: NudgePriority::Medium,
            related_task_id: Some(task.id.clone()),
            related_event_id: None,
            suggested_actions: &["view_task", "update_status", "dismiss"],
            expires_at: Some(now + Duration::days(self.config.stale_expiry_days)),
        })
    }

    fn meeting_candidate(&self, event: &crate::context::CalendarEvent, now: DateTime<Utc>) -> Candidate {
        let minutes_away = (event.start_at - now).num_minutes();
        let priority = if minutes_away <= 120 {
            NudgePriority::High
        } else {
            NudgePriority::Medium
        };
        Candidate {
            nudge_type: NudgeType::UpcomingMeeting,
            title: format!("Upcoming: {}", event.title),
            message: format!(
                "\"{}\" starts at {} UTC.",
                event.title,
                event.start_at.format("%H:%M")
            ),
            priority,
            related_task_id: None,
            related_event_id: Some(event.id.clone()),
            suggested_actions: &["view_event", "dismiss"],
            expires_at: Some(event.start_at),
        }
    }
}

/// Pending, unexpired nudges for a user, highest priority first then oldest
pub fn pending_nudges(db: &Database, tenant_id: &str, user_id: &str) -> db::Result<Vec<NudgeRow>> {
    pending_nudges_at(db, tenant_id, user_id, Utc::now())
}

pub fn pending_nudges_at(
    db: &Database,
    tenant_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> db::Result<Vec<NudgeRow>> {
    let mut rows: Vec<NudgeRow> = db
        .pending_nudge_rows(tenant_id, user_id)?
        .into_iter()
        .filter(|row| match row.expires_at.as_deref().and_then(db::parse_ts) {
            Some(expires) => expires > now,
            None => row.expires_at.is_none(),
        })
        .collect();
    rows.sort_by(|a, b| {
        NudgePriority::rank(&b.priority)
            .cmp(&NudgePriority::rank(&a.priority))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    Ok(rows)
}

/// Transition a pending nudge to acted or dismissed, stamping the matching
/// timestamp. Any other status value is rejected.
pub fn update_nudge_status(
    db: &Database,
    nudge_id: i32,
    status: &str,
    user_id: &str,
) -> Result<NudgeRow, NudgeError> {
    update_nudge_status_at(db, nudge_id, status, user_id, Utc::now())
}

pub fn update_nudge_status_at(
    db: &Database,
    nudge_id: i32,
    status: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<NudgeRow, NudgeError> {
    let now_str = now.to_rfc3339();
    let (acted_at, dismissed_at) = match status {
        "acted" => (Some(now_str.as_str()), None),
        "dismissed" => (None, Some(now_str.as_str())),
        other => return Err(NudgeError::InvalidStatus(other.to_string())),
    };

    let row = db
        .nudge_by_id(nudge_id)?
        .ok_or(NudgeError::NotFound(nudge_id))?;
    // Not revealing other users' nudges: wrong owner reads as absent
    if row.user_id != user_id {
        return Err(NudgeError::NotFound(nudge_id));
    }

    db.set_nudge_status(nudge_id, status, acted_at, dismissed_at)?;
    db.nudge_by_id(nudge_id)?.ok_or(NudgeError::NotFound(nudge_id))
}

/// Context handed back to the caller after acting on a nudge, so the
/// follow-up (open the task, jump to the event) can happen upstream
#[derive(Debug, Clone, Serialize)]
pub struct NudgeActionReceipt {
    pub success: bool,
    pub action: String,
    pub nudge_type: String,
    pub related_task_id: Option<String>,
    pub related_event_id: Option<String>,
}

/// Mark a nudge acted and return enough context for the follow-up
pub fn act_on_nudge(
    db: &Database,
    nudge_id: i32,
    action: &str,
    user_id: &str,
) -> Result<NudgeActionReceipt, NudgeError> {
    act_on_nudge_at(db, nudge_id, action, user_id, Utc::now())
}

pub fn act_on_nudge_at(
    db: &Database,
    nudge_id: i32,
    action: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<NudgeActionReceipt, NudgeError> {
    let row = update_nudge_status_at(db, nudge_id, "acted", user_id, now)?;
    Ok(NudgeActionReceipt {
        success: true,
        action: action.to_string(),
        nudge_type: row.nudge_type,
        related_task_id: row.related_task_id,
        related_event_id: row.related_event_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CalendarEvent;
    use crate::testutil::{task_due, temp_db, MockCalendar, MockSettings, MockTasks};

    fn cfg() -> NudgeConfig {
        NudgeConfig::default()
    }

    #[test]
    fn test_flag_off_short_circuits_without_reads() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let tasks = MockTasks::new(vec![task_due("t-1", now, Some(now - Duration::days(3)))]);
        let calendar = MockCalendar::new(vec![]);
        let settings = MockSettings {
            smart_nudges: false,
            ..MockSettings::default()
        };
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);

        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert!(created.is_empty());
        assert_eq!(tasks.calls.get(), 0);
        assert!(pending_nudges_at(&db, "acme", "u1", now).unwrap().is_empty());
    }

    #[test]
    fn test_overdue_priorities_and_dedup() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let tasks = MockTasks::new(vec![
            task_due("t-old", now - Duration::days(30), Some(now - Duration::days(10))),
            task_due("t-new", now - Duration::days(5), Some(now - Duration::days(2))),
        ]);
        let calendar = MockCalendar::new(vec![]);
        let settings = MockSettings::default();
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);

        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert_eq!(created.len(), 2);
        let by_task = |id: &str| created.iter().find(|n| n.related_task_id.as_deref() == Some(id)).unwrap();
        assert_eq!(by_task("t-old").priority, "urgent");
        assert_eq!(by_task("t-new").priority, "high");
        assert!(by_task("t-old").message.contains("10 days ago"));

        // Second pass: every candidate already has a pending nudge
        let again = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert!(again.is_empty());
        assert_eq!(pending_nudges_at(&db, "acme", "u1", now).unwrap().len(), 2);
    }

    #[test]
    fn test_dismissed_nudge_frees_the_slot() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let tasks = MockTasks::new(vec![task_due("t-1", now - Duration::days(5), Some(now - Duration::days(2)))]);
        let calendar = MockCalendar::new(vec![]);
        let settings = MockSettings::default();
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);

        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert_eq!(created.len(), 1);
        update_nudge_status_at(&db, created[0].id, "dismissed", "u1", now).unwrap();

        // The pending slot is free again; regeneration may re-nudge
        let again = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert_eq!(again.len(), 1);
        assert_ne!(again[0].id, created[0].id);
    }

    #[test]
    fn test_deadline_stale_and_meeting_candidates() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let mut stale = task_due("t-stale", now - Duration::days(20), None);
        stale.updated_at = None;
        let tasks = MockTasks::new(vec![
            task_due("t-due", now - Duration::days(1), Some(now + Duration::hours(10))),
            stale,
        ]);
        let calendar = MockCalendar::new(vec![CalendarEvent {
            id: "e-1".into(),
            title: "Planning".into(),
            start_at: now + Duration::minutes(45),
            end_at: now + Duration::minutes(105),
            is_all_day: false,
        }]);
        let settings = MockSettings::default();
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);

        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert_eq!(created.len(), 3);
        let of_type = |t: &str| created.iter().find(|n| n.nudge_type == t).unwrap();
        assert_eq!(of_type("upcoming_deadline").priority, "high");
        assert_eq!(of_type("stale_task").priority, "medium");
        assert_eq!(of_type("upcoming_meeting").priority, "high");
        assert_eq!(of_type("upcoming_meeting").related_event_id.as_deref(), Some("e-1"));
    }

    #[test]
    fn test_preferences_disable_categories() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let mut stale = task_due("t-stale", now - Duration::days(20), None);
        stale.updated_at = None;
        let tasks = MockTasks::new(vec![
            task_due("t-over", now - Duration::days(5), Some(now - Duration::days(2))),
            stale,
        ]);
        let calendar = MockCalendar::new(vec![]);
        let mut settings = MockSettings::default();
        settings.prefs.stale = false;
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);

        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].nudge_type, "overdue_task");
    }

    #[test]
    fn test_pending_excludes_expired_and_orders_by_priority() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let tasks = MockTasks::new(vec![
            task_due("t-old", now - Duration::days(30), Some(now - Duration::days(10))),
            task_due("t-due", now - Duration::days(1), Some(now + Duration::hours(30))),
        ]);
        let calendar = MockCalendar::new(vec![CalendarEvent {
            id: "e-1".into(),
            title: "Sync".into(),
            start_at: now + Duration::minutes(30),
            end_at: now + Duration::minutes(60),
            is_all_day: false,
        }]);
        let settings = MockSettings::default();
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);
        gen.generate_for_user_at("acme", "u1", now).unwrap();

        let pending = pending_nudges_at(&db, "acme", "u1", now).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].priority, "urgent");

        // The meeting nudge expires at event start
        let later = now + Duration::hours(2);
        let pending = pending_nudges_at(&db, "acme", "u1", later).unwrap();
        assert!(pending.iter().all(|n| n.nudge_type != "upcoming_meeting"));
    }

    #[test]
    fn test_update_status_validation_and_ownership() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let tasks = MockTasks::new(vec![task_due("t-1", now - Duration::days(5), Some(now - Duration::days(2)))]);
        let calendar = MockCalendar::new(vec![]);
        let settings = MockSettings::default();
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);
        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();
        let id = created[0].id;

        match update_nudge_status_at(&db, id, "snoozed", "u1", now) {
            Err(NudgeError::InvalidStatus(s)) => assert_eq!(s, "snoozed"),
            other => panic!("expected InvalidStatus, got {:?}", other.map(|r| r.status)),
        }
        assert!(matches!(
            update_nudge_status_at(&db, id, "acted", "intruder", now),
            Err(NudgeError::NotFound(_))
        ));
        assert!(matches!(
            update_nudge_status_at(&db, 9999, "acted", "u1", now),
            Err(NudgeError::NotFound(9999))
        ));

        let row = update_nudge_status_at(&db, id, "acted", "u1", now).unwrap();
        assert_eq!(row.status, "acted");
        assert!(row.acted_at.is_some());
        assert!(row.dismissed_at.is_none());
    }

    #[test]
    fn test_act_on_nudge_returns_follow_up_context() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let tasks = MockTasks::new(vec![task_due("t-7", now - Duration::days(5), Some(now - Duration::days(2)))]);
        let calendar = MockCalendar::new(vec![]);
        let settings = MockSettings::default();
        let config = cfg();
        let gen = NudgeGenerator::new(&db, &tasks, &calendar, &settings, &config);
        let created = gen.generate_for_user_at("acme", "u1", now).unwrap();

        let receipt = act_on_nudge_at(&db, created[0].id, "complete_task", "u1", now).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.action, "complete_task");
        assert_eq!(receipt.nudge_type, "overdue_task");
        assert_eq!(receipt.related_task_id.as_deref(), Some("t-7"));

        assert!(matches!(
            act_on_nudge_at(&db, 4242, "complete_task", "u1", now),
            Err(NudgeError::NotFound(4242))
        ));
    }
}
