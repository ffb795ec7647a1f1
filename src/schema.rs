// Cadence schema - Proactive engine tables for Diesel ORM

// ============================================================================
// Quota Ledger Tables
// ============================================================================

diesel::table! {
    rate_limit_windows (tenant_id, window_type) {
        tenant_id -> Text,
        window_type -> Text,
        window_start -> Text,
        call_count -> Integer,
        token_count -> Integer,
    }
}

diesel::table! {
    api_call_log (id) {
        id -> Integer,
        request_id -> Text,              // UUID per invocation attempt
        tenant_id -> Text,
        user_id -> Nullable<Text>,
        service -> Text,
        operation -> Text,
        model -> Text,
        prompt_tokens -> Integer,
        completion_tokens -> Integer,
        duration_ms -> Integer,
        success -> Bool,
        error_message -> Nullable<Text>,
        created_at -> Text,
    }
}

// ============================================================================
// Task Health Tables
// ============================================================================

diesel::table! {
    task_health_snapshots (task_id) {
        task_id -> Text,
        tenant_id -> Text,
        health_score -> Double,
        risk_level -> Text,
        risk_factors -> Text,            // JSON array of strings
        computed_at -> Text,
    }
}

// ============================================================================
// Nudge Tables
// ============================================================================

diesel::table! {
    nudges (id) {
        id -> Integer,
        tenant_id -> Text,
        user_id -> Text,
        nudge_type -> Text,
        title -> Text,
        message -> Text,
        priority -> Text,
        related_task_id -> Nullable<Text>,
        related_event_id -> Nullable<Text>,
        status -> Text,
        suggested_actions -> Text,       // JSON array of strings
        created_at -> Text,
        expires_at -> Nullable<Text>,
        acted_at -> Nullable<Text>,
        dismissed_at -> Nullable<Text>,
    }
}

// ============================================================================
// Ceremony Tables
// ============================================================================

diesel::table! {
    ceremonies (id) {
        id -> Integer,
        tenant_id -> Text,
        user_id -> Text,
        ceremony_type -> Text,
        period_key -> Text,              // YYYY-MM-DD or YYYY-Www
        status -> Text,
        ai_plan -> Nullable<Text>,       // JSON, shape per ceremony type
        ai_summary -> Nullable<Text>,
        responses -> Nullable<Text>,     // JSON, standup only
        created_at -> Text,
        completed_at -> Nullable<Text>,
    }
}
