//! Shared fixtures and in-memory collaborators for unit tests

use crate::context::{
    AiError, AiProvider, CalendarEvent, CalendarSource, Completion, CompletionRequest,
    ContextError, Feature, NudgePreferences, SettingsSource, TaskPriority, TaskRecord, TaskSource,
    TaskStatus,
};
use crate::db::Database;
use chrono::{DateTime, Utc};
use std::cell::Cell;
use tempfile::TempDir;

/// Fresh file-backed database in a temp dir. Keep the TempDir alive for
/// the duration of the test; dropping it deletes the file under the pool.
pub fn temp_db() -> (TempDir, Database) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("engine.db");
    let db = Database::open_at(&path).expect("open test database");
    (dir, db)
}

/// Minimal open task: todo, medium priority, no estimate, no activity
pub fn task_due(
    id: &str,
    created_at: DateTime<Utc>,
    due_at: Option<DateTime<Utc>>,
) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("Task {}", id),
        status: TaskStatus::Todo,
        priority: TaskPriority::Medium,
        due_at,
        created_at,
        updated_at: None,
        estimated_hours: None,
    }
}

/// Canned task source that counts reads, so tests can assert that a
/// disabled feature never touches task data.
pub struct MockTasks {
    tasks: Vec<TaskRecord>,
    pub calls: Cell<usize>,
}

impl MockTasks {
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        Self {
            tasks,
            calls: Cell::new(0),
        }
    }
}

impl TaskSource for MockTasks {
    fn user_tasks(&self, _tenant_id: &str, _user_id: &str) -> Result<Vec<TaskRecord>, ContextError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.tasks.clone())
    }

    fn team_tasks(&self, _tenant_id: &str) -> Result<Vec<TaskRecord>, ContextError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.tasks.clone())
    }

    fn task_by_id(
        &self,
        _tenant_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, ContextError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.tasks.iter().find(|t| t.id == task_id).cloned())
    }
}

pub struct MockCalendar {
    events: Vec<CalendarEvent>,
}

impl MockCalendar {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self { events }
    }
}

impl CalendarSource for MockCalendar {
    fn events_between(
        &self,
        _tenant_id: &str,
        _user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ContextError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.start_at >= from && e.start_at < to)
            .cloned()
            .collect())
    }
}

/// Settings store with every flag as a plain field
pub struct MockSettings {
    pub smart_nudges: bool,
    pub morning_focus: bool,
    pub standup: bool,
    pub weekly_review: bool,
    pub prefs: NudgePreferences,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            smart_nudges: true,
            morning_focus: true,
            standup: true,
            weekly_review: true,
            prefs: NudgePreferences::default(),
        }
    }
}

impl SettingsSource for MockSettings {
    fn proactive_feature(&self, _tenant_id: &str, feature: Feature) -> Result<bool, ContextError> {
        Ok(match feature {
            Feature::SmartNudges => self.smart_nudges,
            Feature::MorningFocus => self.morning_focus,
            Feature::Standup => self.standup,
            Feature::WeeklyReview => self.weekly_review,
        })
    }

    fn nudge_preferences(
        &self,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<NudgePreferences, ContextError> {
        Ok(self.prefs.clone())
    }
}

/// Provider stub: a fixed reply, or a failure on every call
pub struct MockAi {
    reply: Option<String>,
    pub calls: Cell<usize>,
}

impl MockAi {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            calls: Cell::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Cell::new(0),
        }
    }
}

impl AiProvider for MockAi {
    fn complete(&self, _request: &CompletionRequest) -> Result<Completion, AiError> {
        self.calls.set(self.calls.get() + 1);
        match &self.reply {
            Some(text) => Ok(Completion {
                text: text.clone(),
                prompt_tokens: 120,
                completion_tokens: 80,
            }),
            None => Err(AiError::Provider("boom".to_string())),
        }
    }
}
