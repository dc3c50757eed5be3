use std::collections::{HashMap, HashSet};

use chrono::Datelike;

use crate::models::{
    CategorySlice, DailyPoint, InteractionRecord, InteractionSummary, LogRecord, QaEntry,
};

/// Days shown on the interaction chart
pub const DEFAULT_WINDOW_DAYS: u32 = 30;
/// Categories shown before the rest fold into "Others"
pub const DEFAULT_TOP_N: usize = 4;
pub const OTHERS_LABEL: &str = "Others";


/// Interactions per day-of-month, one point per day in `1..=window_days`.
///
/// Only the day component of the timestamp is used, so records from
/// different months that share a day number land in the same bucket.
/// Days beyond the window are dropped.
pub fn build_daily_series(records: &[InteractionRecord], window_days: u32) -> Vec<DailyPoint> {
    let mut grouped: HashMap<u32, usize> = HashMap::new();
    for record in records {
        *grouped.entry(record.timestamp.day()).or_insert(0) += 1;
    }

    (1..=window_days)
        .map(|day| DailyPoint {
            day,
            count: grouped.get(&day).copied().unwrap_or(0),
        })
        .collect()
}

/// Total sessions, distinct session ids and the mean duration per distinct session.
pub fn summarize(records: &[InteractionRecord]) -> InteractionSummary {
    let sessions: HashSet<&str> = records.iter().map(|r| r.session_id.as_str()).collect();
    let unique_count = sessions.len();
    let sum: f64 = records.iter().map(|r| r.duration_seconds).sum();

    InteractionSummary {
        total: records.len(),
        unique_count,
        mean_duration: if unique_count > 0 { sum / unique_count as f64 } else { 0.0 },
    }
}

/// Question-type distribution: the `top_n` largest categories plus an
/// "Others" slice when more categories exist.
pub fn build_category_summary(
    entries: &[QaEntry],
    top_n: usize,
    palette: &[String],
) -> Vec<CategorySlice> {
    // first-seen order, so the stable sort below breaks ties by appearance
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        let label = entry.category_label();
        match positions.get(label) {
            Some(&idx) => counts[idx].1 += 1,
            None => {
                positions.insert(label, counts.len());
                counts.push((label, 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let mut slices: Vec<(String, usize)> = counts
        .iter()
        .take(top_n)
        .map(|(label, count)| (label.to_string(), *count))
        .collect();

    if counts.len() > top_n {
        let others: usize = counts[top_n..].iter().map(|(_, count)| count).sum();
        slices.push((OTHERS_LABEL.to_string(), others));
    }

    slices
        .into_iter()
        .enumerate()
        .map(|(color_index, (label, count))| CategorySlice {
            label,
            count,
            color_index,
            color: palette.get(color_index).cloned(),
        })
        .collect()
}

/// Mean reply latency, 0 for an empty log.
pub fn mean_latency(logs: &[LogRecord]) -> f64 {
    if logs.is_empty() {
        return 0.0;
    }
    let sum: f64 = logs.iter().map(|l| l.latency_value).sum();
    sum / logs.len() as f64
}
