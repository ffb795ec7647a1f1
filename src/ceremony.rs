//! Ceremony orchestration
//!
//! A ceremony is a periodic AI-authored artifact: a morning focus plan, a
//! daily standup, or a weekly review, generated at most once per user per
//! period. Generation is evaluated fresh on every call: flag check, quota
//! check, cached-row check, context gathering, provider call, persist.
//! Policy states (disabled, rate limited, already completed) are returned
//! as values, never thrown. The period uniqueness constraint lives in the
//! store; a losing concurrent caller re-fetches and returns the winner's
//! row.

use crate::config::EngineConfig;
use crate::context::{
    AiProvider, CalendarEvent, CalendarSource, Capabilities, CompletionRequest, ContextError,
    Feature, SettingsSource, TaskRecord, TaskSource,
};
use crate::db::{self, CeremonyRow, Database, InsertOutcome, NewCeremony};
use crate::nudge::pending_nudges_at;
use crate::plan::{
    MorningFocusPlan, StandupQuestions, StandupResponses, StandupSummary, WeeklyReviewPlan,
};
use crate::quota::{ApiCallRecord, QuotaLedger, WindowKind};
use crate::workload::{week_bounds, WorkloadAnalyzer, WorkloadReport};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use std::time::Duration as StdDuration;
use std::time::Instant;

const SERVICE: &str = "ai-provider";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    MorningFocus,
    Standup,
    WeeklyReview,
}

impl CeremonyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CeremonyKind::MorningFocus => "morning_focus",
            CeremonyKind::Standup => "standup",
            CeremonyKind::WeeklyReview => "weekly_review",
        }
    }

    fn feature(self) -> Feature {
        match self {
            CeremonyKind::MorningFocus => Feature::MorningFocus,
            CeremonyKind::Standup => Feature::Standup,
            CeremonyKind::WeeklyReview => Feature::WeeklyReview,
        }
    }

    /// Daily ceremonies key on the date; the weekly review keys on the
    /// ISO week.
    pub fn period_key(self, now: DateTime<Utc>) -> String {
        match self {
            CeremonyKind::MorningFocus | CeremonyKind::Standup => {
                now.format("%Y-%m-%d").to_string()
            }
            CeremonyKind::WeeklyReview => {
                let week = now.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }
}

/// Outcome of a generate call. Policy states are values, not errors.
#[derive(Debug)]
pub enum CeremonyOutcome {
    /// The team's flag for this ceremony type is off; nothing was written
    Disabled,
    /// A quota window is exhausted; nothing was written
    RateLimited(WindowKind),
    /// This period already has a completed ceremony; cached row returned
    AlreadyCompleted(CeremonyRow),
    /// Freshly generated and persisted
    Generated(CeremonyRow),
    /// The provider call failed and no safe fallback exists; nothing
    /// was persisted
    Error(String),
}

/// Standup lifecycle as seen by get_or_create
#[derive(Debug)]
pub enum StandupState {
    Disabled,
    /// Pending, waiting for the user's responses
    Open(CeremonyRow),
    Completed(CeremonyRow),
}

#[derive(Debug)]
pub enum CeremonyError {
    NotFound(i32),
    Forbidden(i32),
    Db(db::DbError),
    Context(ContextError),
}

impl std::fmt::Display for CeremonyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CeremonyError::NotFound(id) => write!(f, "Ceremony {} not found", id),
            CeremonyError::Forbidden(id) => {
                write!(f, "Ceremony {} does not belong to the caller", id)
            }
            CeremonyError::Db(e) => write!(f, "{}", e),
            CeremonyError::Context(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CeremonyError {}

impl From<db::DbError> for CeremonyError {
    fn from(e: db::DbError) -> Self {
        CeremonyError::Db(e)
    }
}

impl From<ContextError> for CeremonyError {
    fn from(e: ContextError) -> Self {
        CeremonyError::Context(e)
    }
}

/// Context gathered for one generation
struct GatheredContext {
    open_tasks: Vec<TaskRecord>,
    events: Vec<CalendarEvent>,
    workload: WorkloadReport,
    pending_nudge_count: usize,
    recent_standups: Vec<CeremonyRow>,
}

pub struct CeremonyOrchestrator<'a> {
    db: &'a Database,
    tasks: &'a dyn TaskSource,
    calendar: &'a dyn CalendarSource,
    settings: &'a dyn SettingsSource,
    ai: &'a dyn AiProvider,
    config: &'a EngineConfig,
}

impl<'a> CeremonyOrchestrator<'a> {
    pub fn new(
        db: &'a Database,
        tasks: &'a dyn TaskSource,
        calendar: &'a dyn CalendarSource,
        settings: &'a dyn SettingsSource,
        ai: &'a dyn AiProvider,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            db,
            tasks,
            calendar,
            settings,
            ai,
            config,
        }
    }

    fn ledger(&self) -> QuotaLedger<'a> {
        QuotaLedger::new(self.db, &self.config.quota)
    }

    // ========================================================================
    // Morning Focus / Weekly Review
    // ========================================================================

    pub fn generate_morning_focus(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<CeremonyOutcome, CeremonyError> {
        self.generate_at(CeremonyKind::MorningFocus, tenant_id, user_id, Utc::now())
    }

    pub fn generate_weekly_review(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<CeremonyOutcome, CeremonyError> {
        self.generate_at(CeremonyKind::WeeklyReview, tenant_id, user_id, Utc::now())
    }

    pub fn get_morning_focus(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<CeremonyRow>, CeremonyError> {
        self.get_at(CeremonyKind::MorningFocus, tenant_id, user_id, Utc::now())
    }

    pub fn get_weekly_review(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<CeremonyRow>, CeremonyError> {
        self.get_at(CeremonyKind::WeeklyReview, tenant_id, user_id, Utc::now())
    }

    pub fn get_at(
        &self,
        kind: CeremonyKind,
        tenant_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CeremonyRow>, CeremonyError> {
        let period_key = kind.period_key(now);
        Ok(self
            .db
            .ceremony_for_period(tenant_id, user_id, kind.as_str(), &period_key)?)
    }

    pub fn generate_at(
        &self,
        kind: CeremonyKind,
        tenant_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CeremonyOutcome, CeremonyError> {
        debug_assert_ne!(kind, CeremonyKind::Standup, "standups use get_or_create");

        let caps = Capabilities::resolve(self.settings, tenant_id, user_id)?;
        if !caps.ceremony_enabled(kind.feature()) {
            return Ok(CeremonyOutcome::Disabled);
        }

        let ledger = self.ledger();
        if let Err(exceeded) = ledger.enforce_at(tenant_id, now) {
            return Ok(CeremonyOutcome::RateLimited(exceeded.window));
        }

        let period_key = kind.period_key(now);
        if let Some(existing) =
            self.db
                .ceremony_for_period(tenant_id, user_id, kind.as_str(), &period_key)?
        {
            if existing.status == "completed" {
                return Ok(CeremonyOutcome::AlreadyCompleted(existing));
            }
        }

        let context = self.gather_context(kind, tenant_id, user_id, now)?;
        let prompt = match kind {
            CeremonyKind::MorningFocus => self.morning_prompt(&context, now),
            CeremonyKind::WeeklyReview => self.weekly_prompt(&context, &period_key),
            CeremonyKind::Standup => unreachable!("standups use get_or_create"),
        };

        let started = Instant::now();
        let completion = self.ai.complete(&CompletionRequest {
            prompt,
            model: self.config.ai.model.clone(),
            timeout: StdDuration::from_secs(self.config.ai.timeout_secs),
        });
        let duration_ms = started.elapsed().as_millis() as i32;

        let completion = match completion {
            Ok(completion) => completion,
            Err(e) => {
                // Provider failure: persist nothing, audit the attempt
                ledger.log_api_call_at(
                    &ApiCallRecord {
                        tenant_id: tenant_id.to_string(),
                        user_id: Some(user_id.to_string()),
                        service: SERVICE.to_string(),
                        operation: kind.as_str().to_string(),
                        model: self.config.ai.model.clone(),
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        duration_ms,
                        success: false,
                        error_message: Some(e.to_string()),
                    },
                    now,
                );
                return Ok(CeremonyOutcome::Error(e.to_string()));
            }
        };

        // Malformed provider output degrades to a deterministic plan
        // rather than failing the whole operation
        let (plan_json, summary) = match kind {
            CeremonyKind::MorningFocus => {
                let plan = MorningFocusPlan::parse(&completion.text).unwrap_or_else(|| {
                    let top = context
                        .open_tasks
                        .first()
                        .map(|t| t.title.as_str());
                    MorningFocusPlan::fallback(top, &context.events)
                });
                let summary = plan.top_priority.clone();
                (serde_json::to_string(&plan), summary)
            }
            CeremonyKind::WeeklyReview => {
                let plan = WeeklyReviewPlan::parse(&completion.text).unwrap_or_else(|| {
                    WeeklyReviewPlan::fallback(
                        &period_key,
                        context.recent_standups.len(),
                        context.open_tasks.len(),
                        context.workload.meeting_hours,
                    )
                });
                let summary = plan.headline.clone();
                (serde_json::to_string(&plan), summary)
            }
            CeremonyKind::Standup => unreachable!("standups use get_or_create"),
        };
        let plan_json = plan_json.map_err(|e| {
            CeremonyError::Context(ContextError(format!("plan serialization failed: {}", e)))
        })?;

        // The provider call already happened; charge and audit it now,
        // whatever the insert outcome turns out to be
        ledger.record_usage_at(tenant_id, completion.total_tokens(), now)?;
        ledger.log_api_call_at(
            &ApiCallRecord {
                tenant_id: tenant_id.to_string(),
                user_id: Some(user_id.to_string()),
                service: SERVICE.to_string(),
                operation: kind.as_str().to_string(),
                model: self.config.ai.model.clone(),
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
                duration_ms,
                success: true,
                error_message: None,
            },
            now,
        );

        let now_str = now.to_rfc3339();
        let new_row = NewCeremony {
            tenant_id,
            user_id,
            ceremony_type: kind.as_str(),
            period_key: &period_key,
            status: "completed",
            ai_plan: Some(&plan_json),
            ai_summary: Some(&summary),
            responses: None,
            created_at: &now_str,
            completed_at: Some(&now_str),
        };
        match self.db.insert_ceremony(&new_row)? {
            InsertOutcome::Inserted(row) => Ok(CeremonyOutcome::Generated(row)),
            // Lost the race; the winner's row stands in for ours, but
            // only a completed one
            InsertOutcome::Conflict => {
                match self
                    .db
                    .ceremony_for_period(tenant_id, user_id, kind.as_str(), &period_key)?
                {
                    Some(winner) if winner.status == "completed" => {
                        Ok(CeremonyOutcome::AlreadyCompleted(winner))
                    }
                    _ => Ok(CeremonyOutcome::Error(
                        "period is held by an incomplete ceremony".to_string(),
                    )),
                }
            }
        }
    }

    // ========================================================================
    // Standup
    // ========================================================================

    /// Today's standup for the user, created as a pending three-question
    /// template on first call. No AI call happens here.
    pub fn get_or_create_standup(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<StandupState, CeremonyError> {
        self.get_or_create_standup_at(tenant_id, user_id, Utc::now())
    }

    pub fn get_or_create_standup_at(
        &self,
        tenant_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StandupState, CeremonyError> {
        let caps = Capabilities::resolve(self.settings, tenant_id, user_id)?;
        if !caps.standup {
            return Ok(StandupState::Disabled);
        }

        let kind = CeremonyKind::Standup;
        let period_key = kind.period_key(now);
        if let Some(existing) =
            self.db
                .ceremony_for_period(tenant_id, user_id, kind.as_str(), &period_key)?
        {
            return Ok(Self::standup_state(existing));
        }

        let questions = serde_json::to_string(&StandupQuestions::template())
            .unwrap_or_else(|_| "{\"questions\":[]}".to_string());
        let now_str = now.to_rfc3339();
        let new_row = NewCeremony {
            tenant_id,
            user_id,
            ceremony_type: kind.as_str(),
            period_key: &period_key,
            status: "pending",
            ai_plan: Some(&questions),
            ai_summary: None,
            responses: None,
            created_at: &now_str,
            completed_at: None,
        };
        match self.db.insert_ceremony(&new_row)? {
            InsertOutcome::Inserted(row) => Ok(StandupState::Open(row)),
            InsertOutcome::Conflict => {
                match self
                    .db
                    .ceremony_for_period(tenant_id, user_id, kind.as_str(), &period_key)?
                {
                    Some(winner) => Ok(Self::standup_state(winner)),
                    None => Err(CeremonyError::NotFound(0)),
                }
            }
        }
    }

    fn standup_state(row: CeremonyRow) -> StandupState {
        if row.status == "completed" {
            StandupState::Completed(row)
        } else {
            StandupState::Open(row)
        }
    }

    /// Record the user's responses and complete the standup. The AI
    /// one-liner is best-effort: rate limits and provider failures fall
    /// back to a deterministic summary and never block the submission.
    pub fn submit_standup(
        &self,
        ceremony_id: i32,
        user_id: &str,
        responses: &StandupResponses,
    ) -> Result<CeremonyRow, CeremonyError> {
        self.submit_standup_at(ceremony_id, user_id, responses, Utc::now())
    }

    pub fn submit_standup_at(
        &self,
        ceremony_id: i32,
        user_id: &str,
        responses: &StandupResponses,
        now: DateTime<Utc>,
    ) -> Result<CeremonyRow, CeremonyError> {
        let row = self
            .db
            .ceremony_by_id(ceremony_id)?
            .filter(|r| r.ceremony_type == CeremonyKind::Standup.as_str())
            .ok_or(CeremonyError::NotFound(ceremony_id))?;
        if row.user_id != user_id {
            return Err(CeremonyError::Forbidden(ceremony_id));
        }
        if row.status == "completed" {
            // Already submitted; idempotent read
            return Ok(row);
        }

        let summary = self.standup_summary(&row.tenant_id, user_id, responses, now);
        let responses_json = serde_json::to_string(responses)
            .map_err(|e| CeremonyError::Context(ContextError(e.to_string())))?;
        self.db.complete_ceremony(
            ceremony_id,
            Some(&summary.summary),
            Some(&responses_json),
            &now.to_rfc3339(),
        )?;
        self.db
            .ceremony_by_id(ceremony_id)?
            .ok_or(CeremonyError::NotFound(ceremony_id))
    }

    fn standup_summary(
        &self,
        tenant_id: &str,
        user_id: &str,
        responses: &StandupResponses,
        now: DateTime<Utc>,
    ) -> StandupSummary {
        let ledger = self.ledger();
        if ledger.enforce_at(tenant_id, now).is_err() {
            return StandupSummary::fallback(responses);
        }

        let prompt = format!(
            "Summarize this standup in one sentence.\nYesterday: {}\nToday: {}\nBlockers: {}",
            responses.yesterday, responses.today, responses.blockers
        );
        let started = Instant::now();
        let result = self.ai.complete(&CompletionRequest {
            prompt,
            model: self.config.ai.model.clone(),
            timeout: StdDuration::from_secs(self.config.ai.timeout_secs),
        });
        let duration_ms = started.elapsed().as_millis() as i32;

        match result {
            Ok(completion) => {
                // Recording usage is best-effort here: the standup must
                // still complete if the ledger write fails
                let _ = ledger.record_usage_at(tenant_id, completion.total_tokens(), now);
                ledger.log_api_call_at(
                    &ApiCallRecord {
                        tenant_id: tenant_id.to_string(),
                        user_id: Some(user_id.to_string()),
                        service: SERVICE.to_string(),
                        operation: CeremonyKind::Standup.as_str().to_string(),
                        model: self.config.ai.model.clone(),
                        prompt_tokens: completion.prompt_tokens,
                        completion_tokens: completion.completion_tokens,
                        duration_ms,
                        success: true,
                        error_message: None,
                    },
                    now,
                );
                StandupSummary::from_text(&completion.text)
                    .unwrap_or_else(|| StandupSummary::fallback(responses))
            }
            Err(e) => {
                ledger.log_api_call_at(
                    &ApiCallRecord {
                        tenant_id: tenant_id.to_string(),
                        user_id: Some(user_id.to_string()),
                        service: SERVICE.to_string(),
                        operation: CeremonyKind::Standup.as_str().to_string(),
                        model: self.config.ai.model.clone(),
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        duration_ms,
                        success: false,
                        error_message: Some(e.to_string()),
                    },
                    now,
                );
                StandupSummary::fallback(responses)
            }
        }
    }

    // ========================================================================
    // Context Gathering / Prompts
    // ========================================================================

    fn gather_context(
        &self,
        kind: CeremonyKind,
        tenant_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<GatheredContext, CeremonyError> {
        let all_tasks = self.tasks.user_tasks(tenant_id, user_id)?;
        let mut open_tasks: Vec<TaskRecord> = all_tasks
            .into_iter()
            .filter(|t| t.status.is_open())
            .collect();
        // Most pressing first: urgent before low, dated before undated,
        // earlier due dates first
        open_tasks.sort_by(|a, b| {
            b.priority
                .is_urgent()
                .cmp(&a.priority.is_urgent())
                .then_with(|| a.due_at.is_none().cmp(&b.due_at.is_none()))
                .then_with(|| a.due_at.cmp(&b.due_at))
        });

        let (from, to) = match kind {
            CeremonyKind::MorningFocus | CeremonyKind::Standup => {
                let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
                (day_start, day_start + Duration::days(1))
            }
            CeremonyKind::WeeklyReview => week_bounds(now),
        };
        let events = self.calendar.events_between(tenant_id, user_id, from, to)?;

        let analyzer = WorkloadAnalyzer::new(self.tasks, self.calendar, &self.config.workload);
        let workload = analyzer.analyze_at(tenant_id, user_id, now)?;

        let pending_nudge_count = pending_nudges_at(self.db, tenant_id, user_id, now)?.len();

        let recent_standups = if kind == CeremonyKind::WeeklyReview {
            let since = (now - Duration::days(7)).to_rfc3339();
            self.db.completed_ceremonies_since(
                tenant_id,
                user_id,
                CeremonyKind::Standup.as_str(),
                &since,
            )?
        } else {
            Vec::new()
        };

        Ok(GatheredContext {
            open_tasks,
            events,
            workload,
            pending_nudge_count,
            recent_standups,
        })
    }

    fn morning_prompt(&self, context: &GatheredContext, now: DateTime<Utc>) -> String {
        let mut prompt = format!(
            "You are a focused planning assistant. Today is {}.\n\nOpen tasks:\n",
            now.format("%A, %Y-%m-%d")
        );
        for task in context.open_tasks.iter().take(10) {
            let due = task
                .due_at
                .map(|d| format!(" (due {})", d.format("%Y-%m-%d")))
                .unwrap_or_default();
            prompt.push_str(&format!("- {}{}\n", task.title, due));
        }
        prompt.push_str("\nToday's calendar:\n");
        for event in context.events.iter().filter(|e| !e.is_all_day) {
            prompt.push_str(&format!(
                "- {} at {}\n",
                event.title,
                event.start_at.format("%H:%M")
            ));
        }
        prompt.push_str(&format!(
            "\nWorkload this week: {} ({} pending reminders).\n\n\
             Reply with JSON only: {{\"greeting\": string, \"top_priority\": string, \
             \"schedule\": [{{\"time\": \"HH:MM\", \"activity\": string}}]}}",
            context.workload.workload_level, context.pending_nudge_count
        ));
        prompt
    }

    fn weekly_prompt(&self, context: &GatheredContext, period_key: &str) -> String {
        let mut prompt = format!(
            "You are a reflective team assistant writing a weekly review for week {}.\n\nStandups this week:\n",
            period_key
        );
        for standup in &context.recent_standups {
            if let Some(summary) = &standup.ai_summary {
                prompt.push_str(&format!("- {}: {}\n", standup.period_key, summary));
            }
        }
        prompt.push_str(&format!(
            "\nOpen tasks: {}. Meeting hours: {:.1}. Workload: {}.\n\n\
             Reply with JSON only: {{\"headline\": string, \"highlights\": [string], \
             \"metrics\": object}}",
            context.open_tasks.len(),
            context.workload.meeting_hours,
            context.workload.workload_level
        ));
        prompt
    }
}
