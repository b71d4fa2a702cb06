//! Raw API records to `Users` rows.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{EtlError, Result};
use crate::models::{NormalizedRow, RawAttempt, RejectedRecord};
use crate::passback::{self, Literal};

pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Default)]
pub struct Normalized {
    pub rows: Vec<NormalizedRow>,
    pub rejected: Vec<RejectedRecord>,
}

/// Converts every record, keeping source order. Records that cannot be
/// converted are reported in `rejected` with their position in `records`.
pub fn normalize(records: &[Value]) -> Normalized {
    let mut out = Normalized {
        rows: Vec::with_capacity(records.len()),
        rejected: Vec::new(),
    };

    for (index, record) in records.iter().enumerate() {
        match normalize_record(record) {
            Ok(row) => out.rows.push(row),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed attempt record");
                out.rejected.push(RejectedRecord {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    out
}

pub fn normalize_record(record: &Value) -> Result<NormalizedRow> {
    let raw = RawAttempt::deserialize(record).map_err(|e| EtlError::Record(e.to_string()))?;

    let passback = passback::parse_mapping(raw.passback_params.as_deref().unwrap_or(""))?;
    let field = |key: &str| passback.get(key).map(Literal::to_text).unwrap_or_default();

    Ok(NormalizedRow {
        oauth_consumer_key: field("oauth_consumer_key"),
        lis_result_sourcedid: field("lis_result_sourcedid"),
        lis_outcome_service_url: field("lis_outcome_service_url"),
        is_correct: parse_correctness(&raw.is_correct)?,
        created_at: parse_created_at(&raw.created_at)?,
        user_id: raw.lti_user_id,
        attempt_type: raw.attempt_type,
    })
}

/// Coerces the API's correctness flag. `null` means the attempt was not graded.
pub fn parse_correctness(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Ok(Some(true)),
            Some(v) if v == 0.0 => Ok(Some(false)),
            _ => Err(EtlError::Record(format!("is_correct out of range: {n}"))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(Some(true)),
            "0" | "false" => Ok(Some(false)),
            "" => Ok(None),
            other => Err(EtlError::Record(format!("is_correct not a flag: {other:?}"))),
        },
        other => Err(EtlError::Record(format!("is_correct not a flag: {other}"))),
    }
}

pub fn parse_created_at(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), CREATED_AT_FORMAT)
        .map_err(|e| EtlError::Record(format!("created_at {raw:?}: {e}")))
}
