//! Edge between the backend's loosely typed JSON and the typed records.
//!
//! Every element of a fetched `data` array is decoded on its own; elements
//! that fail to decode or validate are dropped and reported, so one bad row
//! never hides the rest of the fetch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::models::{InteractionRecord, LogRecord, QaEntry, UnansweredQuestion};

/// A number that may arrive as a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<f64> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

/// Session tokens are strings, but older rows store a number or an ip.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Token {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
pub struct RawInteraction {
    id: i64,
    #[serde(default, alias = "ip")]
    session_id: Option<Token>,
    #[serde(alias = "time_value")]
    duration: Numeric,
    date: String,
}

#[derive(Debug, Deserialize)]
pub struct RawLatencyLog {
    id: i64,
    #[serde(alias = "latency")]
    time_value: Numeric,
    #[serde(default)]
    res_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawQa {
    id: i64,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawUnanswered {
    id: i64,
    question: String,
    #[serde(default)]
    category: Option<String>,
}

impl TryFrom<RawInteraction> for InteractionRecord {
    type Error = String;

    fn try_from(raw: RawInteraction) -> Result<Self, Self::Error> {
        let duration = raw
            .duration
            .value()
            .filter(|d| *d >= 0.0)
            .ok_or_else(|| format!("interaction {} has an invalid duration", raw.id))?;
        let timestamp = parse_timestamp(&raw.date)
            .ok_or_else(|| format!("interaction {} has an unreadable date {:?}", raw.id, raw.date))?;
        let session_id = match raw.session_id {
            Some(Token::Text(s)) => s,
            Some(Token::Number(n)) => n.to_string(),
            None => String::new(),
        };

        Ok(InteractionRecord {
            id: raw.id,
            session_id,
            duration_seconds: duration,
            timestamp,
        })
    }
}

impl TryFrom<RawLatencyLog> for LogRecord {
    type Error = String;

    fn try_from(raw: RawLatencyLog) -> Result<Self, Self::Error> {
        let latency = raw
            .time_value
            .value()
            .ok_or_else(|| format!("log {} has an invalid latency", raw.id))?;

        Ok(LogRecord {
            id: raw.id,
            latency_value: latency,
            response_type: raw.res_type.unwrap_or_else(|| "text".to_string()),
        })
    }
}

impl TryFrom<RawQa> for QaEntry {
    type Error = String;

    fn try_from(raw: RawQa) -> Result<Self, Self::Error> {
        Ok(QaEntry {
            id: raw.id,
            question: raw.question.unwrap_or_default(),
            answer: raw.answer.unwrap_or_default(),
            category: raw.category,
        })
    }
}

impl TryFrom<RawUnanswered> for UnansweredQuestion {
    type Error = String;

    fn try_from(raw: RawUnanswered) -> Result<Self, Self::Error> {
        if raw.question.trim().is_empty() {
            return Err(format!("unanswered question {} is empty", raw.id));
        }
        Ok(UnansweredQuestion {
            id: raw.id,
            question: raw.question,
            category: raw.category,
        })
    }
}

/// Decode and validate each element, dropping the ones that fail.
pub fn parse_records<R, T>(endpoint: &str, values: Vec<Value>) -> Vec<T>
where
    R: DeserializeOwned,
    T: TryFrom<R, Error = String>,
{
    let received = values.len();
    let mut records = Vec::with_capacity(received);

    for value in values {
        let parsed = serde_json::from_value::<R>(value)
            .map_err(|e| e.to_string())
            .and_then(T::try_from);
        match parsed {
            Ok(record) => records.push(record),
            Err(reason) => tracing::debug!(endpoint, reason = %reason, "Dropping record"),
        }
    }

    let dropped = received - records.len();
    if dropped > 0 {
        tracing::warn!(endpoint, received, dropped, "Malformed records dropped");
    }
    records
}

/// A lone number from a response, as a JSON number or a numeric string.
pub fn parse_number(value: &Value) -> Option<f64> {
    Numeric::deserialize(value).ok()?.value()
}

/// Accepts the timestamp shapes the backend has been seen to emit.
/// Naive values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
