use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attempt record as returned by the statistics API.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttempt {
    pub lti_user_id: String,
    #[serde(default)]
    pub passback_params: Option<String>,
    #[serde(default)]
    pub is_correct: Value,
    pub attempt_type: String,
    pub created_at: String,
}

/// One row of the `Users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    pub user_id: String,
    pub oauth_consumer_key: String,
    pub lis_result_sourcedid: String,
    pub lis_outcome_service_url: String,
    pub is_correct: Option<bool>,
    pub attempt_type: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeOfDay {
    pub morning: u64,
    pub afternoon: u64,
    pub evening: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    pub attempts: u64,
    pub success: u64,
    pub count_users: u64,
    pub time_of_day: TimeOfDay,
}
