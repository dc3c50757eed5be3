use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DashboardError;
use crate::ingest::{
    parse_number, parse_records, RawInteraction, RawLatencyLog, RawQa, RawUnanswered,
};
use crate::models::{
    AnswerSubmission, ChatRequest, InteractionRecord, LogRecord, NewQa, QaEdit, QaEntry,
    SessionDuration, UnansweredQuestion,
};

pub const FETCH_QA: &str = "/fetch-database";
pub const FETCH_INTERACTIONS: &str = "/get-interaction-data";
pub const FETCH_LATENCY_LOGS: &str = "/get-logs";
pub const FETCH_UNANSWERED: &str = "/get-unanswered";
pub const ADD_QA: &str = "/add-qa";
pub const EDIT_QA: &str = "/edit-qa";
pub const EDIT_UNANSWERED: &str = "/edit_unanswered";
pub const RECORD_SESSION_DURATION: &str = "/session-duration";
pub const ASK: &str = "/ask";
/// Label for the feedback service, which lives outside the backend
pub const FEEDBACK: &str = "feedback";

/// Shape shared by every backend response. Reads carry `data`,
/// mutations carry `status` (1 = success) and maybe a `message`.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    /// Only sent by `/get-logs`
    #[serde(default)]
    average: Option<Value>,
}

impl Envelope {
    fn succeeded(&self) -> bool {
        self.status.as_ref().and_then(Value::as_i64) == Some(1)
    }
}

/// Latency rows plus the average the backend computed, if it sent one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyReport {
    pub records: Vec<LogRecord>,
    pub reported_average: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AskReply {
    response: String,
}

/// Typed client for the chatbot backend.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DashboardError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DashboardError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_all_qa(&self) -> Result<Vec<QaEntry>, DashboardError> {
        let values = self.fetch_list(FETCH_QA).await?;
        Ok(parse_records::<RawQa, _>(FETCH_QA, values))
    }

    pub async fn fetch_interactions(&self) -> Result<Vec<InteractionRecord>, DashboardError> {
        let values = self.fetch_list(FETCH_INTERACTIONS).await?;
        Ok(parse_records::<RawInteraction, _>(FETCH_INTERACTIONS, values))
    }

    pub async fn fetch_latency_logs(&self) -> Result<LatencyReport, DashboardError> {
        let envelope = self.fetch_envelope(FETCH_LATENCY_LOGS).await?;
        let reported_average = envelope.average.as_ref().and_then(parse_number);
        let values = data_list(FETCH_LATENCY_LOGS, envelope.data)?;
        Ok(LatencyReport {
            records: parse_records::<RawLatencyLog, _>(FETCH_LATENCY_LOGS, values),
            reported_average,
        })
    }

    pub async fn fetch_unanswered(&self) -> Result<Vec<UnansweredQuestion>, DashboardError> {
        let values = self.fetch_list(FETCH_UNANSWERED).await?;
        Ok(parse_records::<RawUnanswered, _>(FETCH_UNANSWERED, values))
    }

    pub async fn add_qa(&self, qa: &NewQa) -> Result<Option<Value>, DashboardError> {
        self.mutate(ADD_QA, qa, "Failed to add entry, please try again")
            .await
    }

    pub async fn edit_qa(&self, id: i64, edit: &QaEdit) -> Result<Option<Value>, DashboardError> {
        let body = json!({
            "id": id,
            "question": edit.question,
            "answer": edit.answer,
            "category": edit.category,
        });
        self.mutate(EDIT_QA, &body, "Failed to save edit").await
    }

    pub async fn edit_unanswered(
        &self,
        id: i64,
        submission: &AnswerSubmission,
    ) -> Result<Option<Value>, DashboardError> {
        let body = json!({
            "id": id,
            "question": submission.question,
            "answer": submission.answer,
            "category": submission.category,
        });
        self.mutate(EDIT_UNANSWERED, &body, "Something went wrong")
            .await
    }

    pub async fn record_session_duration(
        &self,
        report: &SessionDuration,
    ) -> Result<Option<Value>, DashboardError> {
        self.mutate(
            RECORD_SESSION_DURATION,
            report,
            "Failed to record session duration",
        )
        .await
    }

    /// Relay a chat message and its history to the bot; returns the bot's reply text.
    pub async fn ask(&self, request: &ChatRequest) -> Result<String, DashboardError> {
        let started = Instant::now();
        let (status, text) = self.post_text(ASK, &self.url(ASK), request).await?;

        tracing::debug!(
            endpoint = ASK,
            status = status.as_u16(),
            history = request.history.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Chat relayed"
        );

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope>(&text)
                .ok()
                .and_then(|e| e.message);
            return Err(http_failure(ASK, status, message));
        }

        let reply: AskReply = serde_json::from_str(&text).map_err(|e| DashboardError::Decode {
            endpoint: ASK,
            message: e.to_string(),
        })?;
        Ok(reply.response)
    }

    /// POST feedback to the external feedback service and return its JSON answer.
    pub async fn forward_feedback(&self, url: &str, body: &Value) -> Result<Value, DashboardError> {
        let (status, text) = self.post_text(FEEDBACK, url, body).await?;
        tracing::info!(endpoint = FEEDBACK, status = status.as_u16(), "Feedback forwarded");

        if !status.is_success() {
            return Err(http_failure(FEEDBACK, status, None));
        }
        serde_json::from_str(&text).map_err(|e| DashboardError::Decode {
            endpoint: FEEDBACK,
            message: e.to_string(),
        })
    }

    /// GET an endpoint and return its `data` array; a missing `data` is an empty list.
    async fn fetch_list(&self, endpoint: &'static str) -> Result<Vec<Value>, DashboardError> {
        let envelope = self.fetch_envelope(endpoint).await?;
        data_list(endpoint, envelope.data)
    }

    async fn fetch_envelope(&self, endpoint: &'static str) -> Result<Envelope, DashboardError> {
        let started = Instant::now();
        let response = self
            .http
            .get(self.url(endpoint))
            .send()
            .await
            .map_err(|source| DashboardError::Network { endpoint, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| DashboardError::Network { endpoint, source })?;

        tracing::debug!(
            endpoint,
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Backend fetch"
        );

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope>(&body)
                .ok()
                .and_then(|e| e.message);
            return Err(http_failure(endpoint, status, message));
        }

        serde_json::from_str(&body).map_err(|e| DashboardError::Decode {
            endpoint,
            message: e.to_string(),
        })
    }

    /// POST a JSON body and require `status == 1` in the answer.
    async fn mutate<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        body: &B,
        fallback_message: &str,
    ) -> Result<Option<Value>, DashboardError> {
        let started = Instant::now();
        let (status, text) = self.post_text(endpoint, &self.url(endpoint), body).await?;
        // an unreadable body is treated like an empty one
        let envelope: Envelope = serde_json::from_str(&text).unwrap_or_default();

        tracing::info!(
            endpoint,
            status = status.as_u16(),
            accepted = envelope.succeeded(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Backend mutation"
        );

        if status.is_success() && envelope.succeeded() {
            return Ok(envelope.data);
        }

        let message = envelope
            .message
            .unwrap_or_else(|| fallback_message.to_string());
        Err(DashboardError::Application {
            endpoint,
            http_status: Some(status.as_u16()),
            message,
        })
    }

    async fn post_text<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        url: &str,
        body: &B,
    ) -> Result<(StatusCode, String), DashboardError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| DashboardError::Network { endpoint, source })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| DashboardError::Network { endpoint, source })?;
        Ok((status, text))
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

fn http_failure(endpoint: &'static str, status: StatusCode, message: Option<String>) -> DashboardError {
    DashboardError::Application {
        endpoint,
        http_status: Some(status.as_u16()),
        message: message.unwrap_or_else(|| format!("{} returned HTTP {}", endpoint, status.as_u16())),
    }
}

fn data_list(endpoint: &'static str, data: Option<Value>) -> Result<Vec<Value>, DashboardError> {
    match data {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => Ok(values),
        Some(other) => Err(DashboardError::Decode {
            endpoint,
            message: format!("expected `data` to be an array, got {}", kind_of(&other)),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
