use std::collections::HashSet;

use chrono::Timelike;

use crate::models::{AggregateSnapshot, NormalizedRow, TimeOfDay};

pub const SUBMIT: &str = "submit";

pub fn compute(rows: &[NormalizedRow]) -> AggregateSnapshot {
    let mut snapshot = AggregateSnapshot::default();
    let mut users: HashSet<&str> = HashSet::new();

    for row in rows {
        users.insert(row.user_id.as_str());

        if row.is_correct == Some(true) {
            snapshot.success += 1;
        }

        if row.attempt_type != SUBMIT {
            continue;
        }
        snapshot.attempts += 1;
        bucket_hour(&mut snapshot.time_of_day, row.created_at.hour());
    }

    snapshot.count_users = users.len() as u64;
    snapshot
}

/// Morning is 04–11, afternoon 12–17, evening 18–23. Night hours 00–03 are
/// not counted anywhere.
pub fn bucket_hour(buckets: &mut TimeOfDay, hour: u32) {
    match hour {
        4..=11 => buckets.morning += 1,
        12..=17 => buckets.afternoon += 1,
        18..=23 => buckets.evening += 1,
        _ => {}
    }
}
