//! Configuration file support for cadence
//!
//! Reads from .cadence/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct EngineConfig {
    /// Per-tenant call limits for the rate-limit windows
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Task health scoring knobs
    #[serde(default)]
    pub health: HealthConfig,

    /// Nudge generation lookaheads and expiries
    #[serde(default)]
    pub nudges: NudgeConfig,

    /// Weekly workload classification
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// AI provider call settings
    #[serde(default)]
    pub ai: AiConfig,
}

/// Per-window call limits. One AI invocation counts against all three.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QuotaConfig {
    /// Calls allowed per rolling minute window. Default: 20
    #[serde(default = "default_minute_calls")]
    pub minute_calls: i32,

    /// Calls allowed per rolling hour window. Default: 200
    #[serde(default = "default_hour_calls")]
    pub hour_calls: i32,

    /// Calls allowed per rolling day window. Default: 2000
    #[serde(default = "default_day_calls")]
    pub day_calls: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthConfig {
    /// Days without activity before an undated task counts as stale. Default: 14
    #[serde(default = "default_stale_days")]
    pub stale_after_days: i64,

    /// Days an urgent/critical task may exist before aging is flagged. Default: 3
    #[serde(default = "default_urgent_aging_days")]
    pub urgent_aging_days: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NudgeConfig {
    /// How far ahead to look for upcoming deadlines, in hours. Default: 48
    #[serde(default = "default_deadline_lookahead")]
    pub deadline_lookahead_hours: i64,

    /// How far ahead to look for upcoming meetings, in hours. Default: 4
    #[serde(default = "default_meeting_lookahead")]
    pub meeting_lookahead_hours: i64,

    /// Days without activity before a task earns a stale nudge. Default: 14
    #[serde(default = "default_stale_days")]
    pub stale_after_days: i64,

    /// Lifetime of an overdue-task nudge, in days. Default: 3
    #[serde(default = "default_overdue_expiry")]
    pub overdue_expiry_days: i64,

    /// Lifetime of a stale-task nudge, in days. Default: 7
    #[serde(default = "default_stale_expiry")]
    pub stale_expiry_days: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkloadConfig {
    /// Weekly capacity in hours to classify against. Default: 40
    #[serde(default = "default_weekly_capacity")]
    pub weekly_capacity_hours: f64,

    /// Assumed hours for a task with no estimate. Default: 2
    #[serde(default = "default_task_hours")]
    pub default_task_hours: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AiConfig {
    /// Model name passed to the provider. Default: "gpt-4o-mini"
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for a single provider call, in seconds. Default: 30
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

fn default_minute_calls() -> i32 {
    20
}

fn default_hour_calls() -> i32 {
    200
}

fn default_day_calls() -> i32 {
    2000
}

fn default_stale_days() -> i64 {
    14
}

fn default_urgent_aging_days() -> i64 {
    3
}

fn default_deadline_lookahead() -> i64 {
    48
}

fn default_meeting_lookahead() -> i64 {
    4
}

fn default_overdue_expiry() -> i64 {
    3
}

fn default_stale_expiry() -> i64 {
    7
}

fn default_weekly_capacity() -> f64 {
    40.0
}

fn default_task_hours() -> f64 {
    2.0
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_timeout() -> u64 {
    30
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            minute_calls: default_minute_calls(),
            hour_calls: default_hour_calls(),
            day_calls: default_day_calls(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_days: default_stale_days(),
            urgent_aging_days: default_urgent_aging_days(),
        }
    }
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            deadline_lookahead_hours: default_deadline_lookahead(),
            meeting_lookahead_hours: default_meeting_lookahead(),
            stale_after_days: default_stale_days(),
            overdue_expiry_days: default_overdue_expiry(),
            stale_expiry_days: default_stale_expiry(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            weekly_capacity_hours: default_weekly_capacity(),
            default_task_hours: default_task_hours(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

impl EngineConfig {
    /// Load config from .cadence/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str(&contents) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".cadence").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.quota.minute_calls, 20);
        assert_eq!(config.quota.hour_calls, 200);
        assert_eq!(config.quota.day_calls, 2000);
        assert_eq!(config.health.stale_after_days, 14);
        assert_eq!(config.workload.weekly_capacity_hours, 40.0);
        assert_eq!(config.ai.timeout_secs, 30);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[quota]
minute_calls = 5

[workload]
weekly_capacity_hours = 32.0
"#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.quota.minute_calls, 5);
        // Unset fields keep their defaults
        assert_eq!(config.quota.hour_calls, 200);
        assert_eq!(config.workload.weekly_capacity_hours, 32.0);
        assert_eq!(config.workload.default_task_hours, 2.0);
    }
}
