//! Weekly workload classification
//!
//! Aggregates the current ISO week's task estimates and meeting hours into
//! a workload level and a short recommendation. Pure read-side computation
//! over the injected task and calendar sources.

use crate::config::WorkloadConfig;
use crate::context::{CalendarSource, ContextError, TaskSource};
use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadLevel {
    Balanced,
    Busy,
    Overloaded,
}

impl WorkloadLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadLevel::Balanced => "balanced",
            WorkloadLevel::Busy => "busy",
            WorkloadLevel::Overloaded => "overloaded",
        }
    }
}

impl std::fmt::Display for WorkloadLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub tasks_due: usize,
    pub estimated_task_hours: f64,
    pub meeting_hours: f64,
    pub available_hours: f64,
    pub workload_level: WorkloadLevel,
    pub recommendation: String,
}

// Busy starts at three quarters of capacity; overloaded past capacity
const BUSY_RATIO: f64 = 0.75;

/// The current ISO week as a half-open UTC interval [monday, next monday)
pub fn week_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let week = now.date_naive().week(Weekday::Mon);
    let start = week.first_day().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(7))
}

pub struct WorkloadAnalyzer<'a> {
    tasks: &'a dyn TaskSource,
    calendar: &'a dyn CalendarSource,
    config: &'a WorkloadConfig,
}

impl<'a> WorkloadAnalyzer<'a> {
    pub fn new(
        tasks: &'a dyn TaskSource,
        calendar: &'a dyn CalendarSource,
        config: &'a WorkloadConfig,
    ) -> Self {
        Self {
            tasks,
            calendar,
            config,
        }
    }

    pub fn analyze(&self, tenant_id: &str, user_id: &str) -> Result<WorkloadReport, ContextError> {
        self.analyze_at(tenant_id, user_id, Utc::now())
    }

    pub fn analyze_at(
        &self,
        tenant_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkloadReport, ContextError> {
        let (week_start, week_end) = week_bounds(now);

        let tasks = self.tasks.user_tasks(tenant_id, user_id)?;
        let due_this_week: Vec<_> = tasks
            .iter()
            .filter(|t| t.status.is_open())
            .filter(|t| {
                t.due_at
                    .map(|due| due >= week_start && due < week_end)
                    .unwrap_or(false)
            })
            .collect();
        let estimated_task_hours: f64 = due_this_week
            .iter()
            .map(|t| t.estimated_hours.unwrap_or(self.config.default_task_hours))
            .sum();

        let events = self
            .calendar
            .events_between(tenant_id, user_id, week_start, week_end)?;
        let meeting_hours: f64 = events
            .iter()
            .filter(|e| !e.is_all_day)
            .filter(|e| e.start_at >= week_start && e.start_at < week_end)
            .map(|e| e.duration_hours())
            .sum();

        let committed = estimated_task_hours + meeting_hours;
        let capacity = self.config.weekly_capacity_hours;
        let workload_level = if committed > capacity {
            WorkloadLevel::Overloaded
        } else if committed > capacity * BUSY_RATIO {
            WorkloadLevel::Busy
        } else {
            WorkloadLevel::Balanced
        };

        let recommendation = match workload_level {
            WorkloadLevel::Overloaded => {
                "Committed hours exceed weekly capacity. Defer low-priority tasks or renegotiate deadlines.".to_string()
            }
            WorkloadLevel::Busy => {
                "Near capacity this week. Protect focus time and avoid taking on new work.".to_string()
            }
            WorkloadLevel::Balanced => {
                "Workload looks manageable. Good week for progress on larger goals.".to_string()
            }
        };

        Ok(WorkloadReport {
            tasks_due: due_this_week.len(),
            estimated_task_hours,
            meeting_hours,
            available_hours: (capacity - committed).max(0.0),
            workload_level,
            recommendation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CalendarEvent;
    use crate::testutil::{task_due, MockCalendar, MockTasks};

    fn cfg() -> WorkloadConfig {
        WorkloadConfig::default()
    }

    fn meeting(id: &str, start: DateTime<Utc>, hours: i64) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            title: format!("Meeting {}", id),
            start_at: start,
            end_at: start + Duration::hours(hours),
            is_all_day: false,
        }
    }

    #[test]
    fn test_overloaded_week() {
        let now = Utc::now();
        let mut tasks = Vec::new();
        for i in 0..10 {
            let mut t = task_due(&format!("t-{}", i), now, Some(now));
            t.estimated_hours = Some(8.0);
            tasks.push(t);
        }
        let (week_start, _) = week_bounds(now);
        let events: Vec<_> = (0..10)
            .map(|i| meeting(&i.to_string(), week_start + Duration::hours(9 + i), 2))
            .collect();

        let tasks = MockTasks::new(tasks);
        let calendar = MockCalendar::new(events);
        let config = cfg();
        let analyzer = WorkloadAnalyzer::new(&tasks, &calendar, &config);
        let report = analyzer.analyze_at("acme", "u1", now).unwrap();

        assert_eq!(report.tasks_due, 10);
        assert_eq!(report.estimated_task_hours, 80.0);
        assert_eq!(report.meeting_hours, 20.0);
        assert_eq!(report.workload_level, WorkloadLevel::Overloaded);
        assert_eq!(report.available_hours, 0.0);
        assert!(report.recommendation.contains("Defer"));
    }

    #[test]
    fn test_balanced_week_with_unestimated_tasks() {
        let now = Utc::now();
        let tasks = MockTasks::new(vec![
            task_due("t-1", now, Some(now)),
            task_due("t-2", now, Some(now)),
        ]);
        let calendar = MockCalendar::new(vec![]);
        let config = cfg();
        let analyzer = WorkloadAnalyzer::new(&tasks, &calendar, &config);
        let report = analyzer.analyze_at("acme", "u1", now).unwrap();

        // Default 2h per unestimated task
        assert_eq!(report.estimated_task_hours, 4.0);
        assert_eq!(report.workload_level, WorkloadLevel::Balanced);
        assert_eq!(report.available_hours, 36.0);
    }

    #[test]
    fn test_busy_between_ratio_and_capacity() {
        let now = Utc::now();
        let mut tasks = Vec::new();
        for i in 0..16 {
            tasks.push(task_due(&format!("t-{}", i), now, Some(now)));
        }
        let tasks = MockTasks::new(tasks);
        let calendar = MockCalendar::new(vec![]);
        let config = cfg();
        let analyzer = WorkloadAnalyzer::new(&tasks, &calendar, &config);
        let report = analyzer.analyze_at("acme", "u1", now).unwrap();

        assert_eq!(report.estimated_task_hours, 32.0);
        assert_eq!(report.workload_level, WorkloadLevel::Busy);
    }

    #[test]
    fn test_all_day_events_and_undated_tasks_excluded() {
        let now = Utc::now();
        let (week_start, _) = week_bounds(now);
        let mut offsite = meeting("offsite", week_start + Duration::hours(24), 8);
        offsite.is_all_day = true;

        let tasks = MockTasks::new(vec![task_due("t-1", now, None)]);
        let calendar = MockCalendar::new(vec![offsite]);
        let config = cfg();
        let analyzer = WorkloadAnalyzer::new(&tasks, &calendar, &config);
        let report = analyzer.analyze_at("acme", "u1", now).unwrap();

        assert_eq!(report.tasks_due, 0);
        assert_eq!(report.meeting_hours, 0.0);
        assert_eq!(report.workload_level, WorkloadLevel::Balanced);
    }
}
