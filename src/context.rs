//! Collaborator seams for the engine
//!
//! The engine never owns a task list, a calendar, a settings store, or an
//! AI client; it receives them through these traits. Implementations live
//! in the transport layer (or in tests), and every component takes them as
//! explicit constructor arguments rather than reaching for globals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Task / Calendar Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Health and nudges only apply to open work
    pub fn is_open(self) -> bool {
        matches!(self, TaskStatus::Todo | TaskStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
    Critical,
}

impl TaskPriority {
    /// `urgent` and `critical` are one severity tier for scoring purposes
    pub fn is_urgent(self) -> bool {
        matches!(self, TaskPriority::Urgent | TaskPriority::Critical)
    }
}

/// A work item as supplied by the external task read API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last recorded activity on the task, if any
    pub updated_at: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
}

/// A calendar entry as supplied by the external calendar read API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_all_day: bool,
}

impl CalendarEvent {
    pub fn duration_hours(&self) -> f64 {
        (self.end_at - self.start_at).num_minutes() as f64 / 60.0
    }
}

// ============================================================================
// Collaborator Errors
// ============================================================================

/// Error from an external read API (tasks, calendar, settings)
#[derive(Debug)]
pub struct ContextError(pub String);

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Context source error: {}", self.0)
    }
}

impl std::error::Error for ContextError {}

/// Error from the AI text-generation provider
#[derive(Debug)]
pub enum AiError {
    /// The call did not complete within the configured timeout
    Timeout,
    /// The provider rejected or failed the request
    Provider(String),
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiError::Timeout => write!(f, "AI provider call timed out"),
            AiError::Provider(msg) => write!(f, "AI provider error: {}", msg),
        }
    }
}

impl std::error::Error for AiError {}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Read access to the tenant's work items
pub trait TaskSource {
    /// Tasks visible to one user
    fn user_tasks(&self, tenant_id: &str, user_id: &str) -> Result<Vec<TaskRecord>, ContextError>;

    /// All tasks for a tenant (bulk health refresh)
    fn team_tasks(&self, tenant_id: &str) -> Result<Vec<TaskRecord>, ContextError>;

    fn task_by_id(&self, tenant_id: &str, task_id: &str) -> Result<Option<TaskRecord>, ContextError>;
}

/// Read access to the user's calendar
pub trait CalendarSource {
    fn events_between(
        &self,
        tenant_id: &str,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ContextError>;
}

/// Proactive feature toggles resolved per tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    SmartNudges,
    MorningFocus,
    Standup,
    WeeklyReview,
}

impl Feature {
    pub fn key(self) -> &'static str {
        match self {
            Feature::SmartNudges => "smart_nudges",
            Feature::MorningFocus => "morning_focus",
            Feature::Standup => "standup",
            Feature::WeeklyReview => "weekly_review",
        }
    }
}

/// Which nudge categories a user wants to receive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgePreferences {
    pub overdue: bool,
    pub stale: bool,
    pub upcoming_deadline: bool,
    pub upcoming_meeting: bool,
}

impl Default for NudgePreferences {
    fn default() -> Self {
        Self {
            overdue: true,
            stale: true,
            upcoming_deadline: true,
            upcoming_meeting: true,
        }
    }
}

/// Feature-flag / team-settings store
pub trait SettingsSource {
    fn proactive_feature(&self, tenant_id: &str, feature: Feature) -> Result<bool, ContextError>;

    fn nudge_preferences(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<NudgePreferences, ContextError>;
}

/// Flags and preferences resolved once per request and threaded through,
/// so a single operation sees one consistent view of the toggles.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub smart_nudges: bool,
    pub morning_focus: bool,
    pub standup: bool,
    pub weekly_review: bool,
    pub nudge_preferences: NudgePreferences,
}

impl Capabilities {
    pub fn resolve(
        settings: &dyn SettingsSource,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Self, ContextError> {
        Ok(Self {
            smart_nudges: settings.proactive_feature(tenant_id, Feature::SmartNudges)?,
            morning_focus: settings.proactive_feature(tenant_id, Feature::MorningFocus)?,
            standup: settings.proactive_feature(tenant_id, Feature::Standup)?,
            weekly_review: settings.proactive_feature(tenant_id, Feature::WeeklyReview)?,
            nudge_preferences: settings.nudge_preferences(tenant_id, user_id)?,
        })
    }

    pub fn ceremony_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::SmartNudges => self.smart_nudges,
            Feature::MorningFocus => self.morning_focus,
            Feature::Standup => self.standup,
            Feature::WeeklyReview => self.weekly_review,
        }
    }
}

// ============================================================================
// AI Provider
// ============================================================================

/// One request to the text-generation provider. The timeout is mandatory:
/// a stuck call must not hold the quota-check-to-record window open.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub timeout: Duration,
}

/// Provider response with token accounting for the quota ledger
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl Completion {
    pub fn total_tokens(&self) -> i32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// AI text-generation provider
pub trait AiProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_openness() {
        assert!(TaskStatus::Todo.is_open());
        assert!(TaskStatus::InProgress.is_open());
        assert!(!TaskStatus::Done.is_open());
        assert!(!TaskStatus::Cancelled.is_open());
    }

    #[test]
    fn test_urgent_tier_alias() {
        assert!(TaskPriority::Urgent.is_urgent());
        assert!(TaskPriority::Critical.is_urgent());
        assert!(!TaskPriority::High.is_urgent());
    }

    #[test]
    fn test_event_duration() {
        let start = chrono::Utc::now();
        let event = CalendarEvent {
            id: "e1".into(),
            title: "Sync".into(),
            start_at: start,
            end_at: start + chrono::Duration::minutes(90),
            is_all_day: false,
        };
        assert!((event.duration_hours() - 1.5).abs() < f64::EPSILON);
    }
}
