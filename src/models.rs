use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DashboardError;

/// Label used for entries without a category
pub const UNCATEGORIZED: &str = "Uncategorized";
/// Shown in the chat widget when the bot could not be reached
pub const CHAT_FALLBACK: &str = "Sorry, something went wrong. Please try again.";

/// One chat-widget session as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRecord {
    pub id: i64,
    pub session_id: String,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// One bot reply with its measured latency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub latency_value: f64,
    pub response_type: String,
}

/// Knowledge-base entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
}

impl QaEntry {
    /// Category used for grouping; blank or missing becomes "Uncategorized".
    pub fn category_label(&self) -> &str {
        match self.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => category,
            _ => UNCATEGORIZED,
        }
    }
}

/// A user question the bot could not match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnansweredQuestion {
    pub id: i64,
    pub question: String,
    pub category: Option<String>,
}

/// One point of the daily interaction chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyPoint {
    pub day: u32,
    pub count: usize,
}

/// One slice of the question-type distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySlice {
    pub label: String,
    pub count: usize,
    pub color_index: usize,
    pub color: Option<String>,
}

/// Headline numbers for the interaction cards
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InteractionSummary {
    pub total: usize,
    #[serde(rename = "count")]
    pub unique_count: usize,
    #[serde(rename = "avg")]
    pub mean_duration: f64,
}

/// New knowledge-base entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQa {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: String,
}

/// Replacement fields for an existing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaEdit {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: String,
}

/// Answer to an unanswered question; question and category are echoed back
/// so the backend can move the pair into the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Duration report sent by the chat widget when it closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDuration {
    pub duration: f64,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// One message already shown in the chat widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(default)]
    pub id: i64,
    pub text: String,
    pub sender: String,
}

/// A new user message plus the conversation so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
    /// True when `response` is the canned fallback text
    pub fallback: bool,
}

impl ChatReply {
    pub fn fallback() -> Self {
        Self {
            response: CHAT_FALLBACK.to_string(),
            fallback: true,
        }
    }
}

impl NewQa {
    pub fn validate(&self) -> Result<(), DashboardError> {
        require_question_and_answer(&self.question, &self.answer)
    }
}

impl QaEdit {
    pub fn validate(&self) -> Result<(), DashboardError> {
        require_question_and_answer(&self.question, &self.answer)
    }
}

impl AnswerSubmission {
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.answer.trim().is_empty() {
            return Err(DashboardError::Validation(
                "Please provide an answer.".to_string(),
            ));
        }
        Ok(())
    }
}

impl SessionDuration {
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.session_id.trim().is_empty() {
            return Err(DashboardError::Validation(
                "session_id is required".to_string(),
            ));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(DashboardError::Validation(
                "duration must be a non-negative number of seconds".to_string(),
            ));
        }
        Ok(())
    }
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.message.trim().is_empty() {
            return Err(DashboardError::Validation("Message is required".to_string()));
        }
        Ok(())
    }
}

fn require_question_and_answer(question: &str, answer: &str) -> Result<(), DashboardError> {
    if question.trim().is_empty() || answer.trim().is_empty() {
        return Err(DashboardError::Validation(
            "Question and Answer are required".to_string(),
        ));
    }
    Ok(())
}

/// API Response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
        }
    }
}
