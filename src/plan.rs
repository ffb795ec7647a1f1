//! Ceremony plan shapes
//!
//! The AI provider returns free text; each ceremony type owns a closed
//! JSON shape that the text must parse into. Parsing is tolerant of
//! code-fenced output, and every shape has a deterministic fallback built
//! from the gathered context so a malformed response never fails the whole
//! generation. These serialized shapes are surfaced directly to callers
//! and must stay backward-compatible per ceremony type.

use crate::context::CalendarEvent;
use serde::{Deserialize, Serialize};

/// Extract the JSON object from provider output that may be wrapped in
/// markdown fences or prose.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

// ============================================================================
// Morning Focus
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub time: String,
    pub activity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorningFocusPlan {
    pub greeting: String,
    pub top_priority: String,
    #[serde(default)]
    pub schedule: Vec<ScheduleSlot>,
}

impl MorningFocusPlan {
    pub fn parse(text: &str) -> Option<Self> {
        let json = extract_json(text)?;
        let plan: Self = serde_json::from_str(json).ok()?;
        if plan.greeting.trim().is_empty() || plan.top_priority.trim().is_empty() {
            return None;
        }
        Some(plan)
    }

    /// Deterministic plan from raw context when the provider output is
    /// unusable
    pub fn fallback(top_task: Option<&str>, events: &[CalendarEvent]) -> Self {
        let schedule = events
            .iter()
            .filter(|e| !e.is_all_day)
            .map(|e| ScheduleSlot {
                time: e.start_at.format("%H:%M").to_string(),
                activity: e.title.clone(),
            })
            .collect();
        Self {
            greeting: "Good morning! Here's your plan for today.".to_string(),
            top_priority: top_task
                .map(|t| t.to_string())
                .unwrap_or_else(|| "Review your task list and pick a focus".to_string()),
            schedule,
        }
    }
}

// ============================================================================
// Weekly Review
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReviewPlan {
    pub headline: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

impl WeeklyReviewPlan {
    pub fn parse(text: &str) -> Option<Self> {
        let json = extract_json(text)?;
        let plan: Self = serde_json::from_str(json).ok()?;
        if plan.headline.trim().is_empty() {
            return None;
        }
        Some(plan)
    }

    pub fn fallback(period_key: &str, standups_logged: usize, open_tasks: usize, meeting_hours: f64) -> Self {
        Self {
            headline: format!("Week {} in review", period_key),
            highlights: vec![
                format!("{} standup(s) logged", standups_logged),
                format!("{} task(s) still open", open_tasks),
            ],
            metrics: serde_json::json!({
                "standups_logged": standups_logged,
                "open_tasks": open_tasks,
                "meeting_hours": meeting_hours,
            }),
        }
    }
}

// ============================================================================
// Standup
// ============================================================================

/// The fixed three-question template a pending standup is created with
pub const STANDUP_QUESTIONS: [&str; 3] = [
    "What did you work on yesterday?",
    "What will you work on today?",
    "Anything blocking you?",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandupQuestions {
    pub questions: Vec<String>,
}

impl StandupQuestions {
    pub fn template() -> Self {
        Self {
            questions: STANDUP_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        }
    }
}

/// A user's answers to the standup template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandupResponses {
    pub yesterday: String,
    pub today: String,
    #[serde(default)]
    pub blockers: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandupSummary {
    pub summary: String,
}

impl StandupSummary {
    /// The provider returns a one-liner, not JSON; take the first
    /// non-empty line.
    pub fn from_text(text: &str) -> Option<Self> {
        let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
        Some(Self {
            summary: line.to_string(),
        })
    }

    /// AI failure must never block recording a standup
    pub fn fallback(responses: &StandupResponses) -> Self {
        Self {
            summary: format!("Working on: {}", responses.today),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let text = r#"{"greeting": "Morning!", "top_priority": "Ship the release", "schedule": [{"time": "09:00", "activity": "Standup"}]}"#;
        let plan = MorningFocusPlan::parse(text).unwrap();
        assert_eq!(plan.top_priority, "Ship the release");
        assert_eq!(plan.schedule.len(), 1);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here is your plan:\n```json\n{\"greeting\": \"Hi\", \"top_priority\": \"Fix the bug\"}\n```\nHave a great day!";
        let plan = MorningFocusPlan::parse(text).unwrap();
        assert_eq!(plan.top_priority, "Fix the bug");
        assert!(plan.schedule.is_empty());
    }

    #[test]
    fn test_parse_rejects_junk_and_blank_fields() {
        assert!(MorningFocusPlan::parse("I could not generate a plan today.").is_none());
        assert!(MorningFocusPlan::parse(r#"{"greeting": "", "top_priority": "x"}"#).is_none());
        assert!(WeeklyReviewPlan::parse(r#"{"headline": "  "}"#).is_none());
    }

    #[test]
    fn test_morning_fallback_uses_context() {
        let start = chrono::Utc::now();
        let events = vec![CalendarEvent {
            id: "e1".into(),
            title: "Design review".into(),
            start_at: start,
            end_at: start + chrono::Duration::hours(1),
            is_all_day: false,
        }];
        let plan = MorningFocusPlan::fallback(Some("Finish the report"), &events);
        assert_eq!(plan.top_priority, "Finish the report");
        assert_eq!(plan.schedule.len(), 1);
        assert_eq!(plan.schedule[0].activity, "Design review");
    }

    #[test]
    fn test_weekly_parse_and_fallback() {
        let text = r#"{"headline": "Strong week", "highlights": ["Shipped v2"], "metrics": {"tasks_completed": 7}}"#;
        let plan = WeeklyReviewPlan::parse(text).unwrap();
        assert_eq!(plan.highlights.len(), 1);

        let fb = WeeklyReviewPlan::fallback("2026-W35", 4, 12, 9.5);
        assert!(fb.headline.contains("2026-W35"));
        assert_eq!(fb.metrics["standups_logged"], 4);
    }

    #[test]
    fn test_standup_summary_first_line_and_fallback() {
        let summary = StandupSummary::from_text("\n  Shipped the importer; pairing on review today.  \nextra").unwrap();
        assert_eq!(summary.summary, "Shipped the importer; pairing on review today.");
        assert!(StandupSummary::from_text("   \n  ").is_none());

        let responses = StandupResponses {
            yesterday: "importer".into(),
            today: "review backlog".into(),
            blockers: String::new(),
        };
        assert_eq!(StandupSummary::fallback(&responses).summary, "Working on: review backlog");
    }

    #[test]
    fn test_standup_template_shape() {
        let template = StandupQuestions::template();
        assert_eq!(template.questions.len(), 3);
        let json = serde_json::to_string(&template).unwrap();
        let back: StandupQuestions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.questions, template.questions);
    }
}
