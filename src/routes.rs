//! Dashboard endpoints. Each handler fetches what it needs from the
//! backend, derives its view with the pure projections and returns JSON.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::LatencyReport;
use crate::error::{DashboardError, ErrorBody};
use crate::gate::{session_from_headers, SessionGate};
use crate::knowledge::{self, KnowledgePage, KnowledgeQuery, TriageItem};
use crate::models::{
    AnswerSubmission, ApiResponse, CategorySlice, ChatReply, ChatRequest, DailyPoint,
    InteractionRecord, InteractionSummary, LoginRequest, NewQa, QaEdit, QaEntry,
    SessionDuration,
};
use crate::projections::{build_category_summary, build_daily_series, mean_latency, summarize};
use crate::retry::{self, ActionPayload, RetryableAction};
use crate::AppState;

/// A dashboard section that could not be loaded
#[derive(Debug, Serialize)]
pub struct SectionError {
    pub section: &'static str,
    #[serde(flatten)]
    pub error: ErrorBody,
}

/// Everything the analytics page shows. Sections whose fetch failed are
/// left empty and reported in `errors`.
#[derive(Debug, Default, Serialize)]
pub struct DashboardView {
    pub overview: Option<InteractionSummary>,
    pub avg_session_secs: Option<u64>,
    pub interactions: Option<Vec<DailyPoint>>,
    pub question_types: Option<Vec<CategorySlice>>,
    pub question_count: Option<usize>,
    pub avg_reply_secs: Option<u64>,
    pub errors: Vec<SectionError>,
}

#[derive(Debug, Serialize)]
pub struct InteractionsView {
    pub summary: InteractionSummary,
    pub avg_session_secs: u64,
    pub series: Vec<DailyPoint>,
}

#[derive(Debug, Serialize)]
pub struct CategoriesView {
    pub question_count: usize,
    pub slices: Vec<CategorySlice>,
}

#[derive(Debug, Serialize)]
pub struct ReplySpeedView {
    pub average: f64,
    pub avg_reply_secs: u64,
    pub samples: usize,
}

#[derive(Debug, Serialize)]
pub struct TrainingView {
    pub pending: usize,
    pub questions: Vec<TriageItem>,
}

/// Floor for display, negatives clamp to zero.
fn display_secs(value: f64) -> u64 {
    value.floor().max(0.0) as u64
}

fn interactions_view(state: &AppState, records: &[InteractionRecord]) -> InteractionsView {
    let summary = summarize(records);
    InteractionsView {
        avg_session_secs: display_secs(summary.mean_duration),
        series: build_daily_series(records, state.config.window_days),
        summary,
    }
}

fn categories_view(state: &AppState, entries: &[QaEntry]) -> CategoriesView {
    CategoriesView {
        question_count: entries.len(),
        slices: build_category_summary(entries, state.config.top_n, &state.config.palette),
    }
}

/// Mean of the readable rows; the backend's own average only when none are left.
fn reply_speed_view(report: &LatencyReport) -> ReplySpeedView {
    let average = match report.reported_average {
        Some(reported) if report.records.is_empty() => reported,
        _ => mean_latency(&report.records),
    };
    ReplySpeedView {
        average,
        avg_reply_secs: display_secs(average),
        samples: report.records.len(),
    }
}

/// Analytics page: the three fetches run concurrently and fill
/// independent sections.
pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardView> {
    let backend = &state.backend;
    let (interactions, logs, entries) = tokio::join!(
        backend.fetch_interactions(),
        backend.fetch_latency_logs(),
        backend.fetch_all_qa(),
    );

    let mut view = DashboardView::default();

    match interactions {
        Ok(records) => {
            let derived = interactions_view(&state, &records);
            view.overview = Some(derived.summary);
            view.avg_session_secs = Some(derived.avg_session_secs);
            view.interactions = Some(derived.series);
        }
        Err(error) => view.errors.push(section_error("interactions", error)),
    }

    match logs {
        Ok(report) => view.avg_reply_secs = Some(reply_speed_view(&report).avg_reply_secs),
        Err(error) => view.errors.push(section_error("reply_speed", error)),
    }

    match entries {
        Ok(entries) => {
            let derived = categories_view(&state, &entries);
            view.question_count = Some(derived.question_count);
            view.question_types = Some(derived.slices);
        }
        Err(error) => view.errors.push(section_error("question_types", error)),
    }

    Json(view)
}

fn section_error(section: &'static str, error: DashboardError) -> SectionError {
    tracing::warn!(section, error = %error, "Dashboard section unavailable");
    SectionError {
        section,
        error: error.to_body(),
    }
}

pub async fn interactions(
    State(state): State<AppState>,
) -> Result<Json<InteractionsView>, DashboardError> {
    let records = state.backend.fetch_interactions().await?;
    Ok(Json(interactions_view(&state, &records)))
}

pub async fn categories(
    State(state): State<AppState>,
) -> Result<Json<CategoriesView>, DashboardError> {
    let entries = state.backend.fetch_all_qa().await?;
    Ok(Json(categories_view(&state, &entries)))
}

pub async fn reply_speed(
    State(state): State<AppState>,
) -> Result<Json<ReplySpeedView>, DashboardError> {
    let report = state.backend.fetch_latency_logs().await?;
    Ok(Json(reply_speed_view(&report)))
}

pub async fn list_knowledge(
    State(state): State<AppState>,
    Query(query): Query<KnowledgeQuery>,
) -> Result<Json<KnowledgePage>, DashboardError> {
    let entries = state.backend.fetch_all_qa().await?;
    Ok(Json(knowledge::browse(&entries, &query, state.config.page_size)))
}

pub async fn add_knowledge(State(state): State<AppState>, Json(qa): Json<NewQa>) -> Response {
    if let Err(error) = qa.validate() {
        return error.into_response();
    }
    run_mutation(&state, ActionPayload::AddQa(qa), "Entry added successfully.").await
}

pub async fn edit_knowledge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(edit): Json<QaEdit>,
) -> Response {
    if let Err(error) = edit.validate() {
        return error.into_response();
    }
    run_mutation(&state, ActionPayload::EditQa { id, edit }, "Saved successfully").await
}

/// Unanswered queue with similar existing entries. Suggestions are best
/// effort: if the knowledge base cannot be fetched the queue is still served.
pub async fn list_unanswered(
    State(state): State<AppState>,
) -> Result<Json<TrainingView>, DashboardError> {
    let (queue, entries) = tokio::join!(
        state.backend.fetch_unanswered(),
        state.backend.fetch_all_qa(),
    );
    let queue = queue?;
    let entries = entries.unwrap_or_else(|error| {
        tracing::warn!(error = %error, "Suggestions unavailable");
        Vec::new()
    });

    let questions = knowledge::triage(
        queue,
        &entries,
        state.config.suggestion_limit,
        state.config.suggestion_threshold,
    );
    Ok(Json(TrainingView {
        pending: questions.len(),
        questions,
    }))
}

pub async fn answer_unanswered(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(submission): Json<AnswerSubmission>,
) -> Response {
    if let Err(error) = submission.validate() {
        return error.into_response();
    }
    run_mutation(
        &state,
        ActionPayload::AnswerUnanswered { id, submission },
        "Answer saved",
    )
    .await
}

/// Called by the chat widget when it closes. Public, so a failure is
/// reported to the caller but never parked in the admin action queue.
pub async fn record_session_duration(
    State(state): State<AppState>,
    Json(report): Json<SessionDuration>,
) -> Response {
    if let Err(error) = report.validate() {
        return error.into_response();
    }
    let payload = ActionPayload::RecordSessionDuration(report);
    match retry::send_once(&payload, &state.backend, &state.in_flight).await {
        Ok(data) => Json(ApiResponse::success("Duration recorded", data)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Session duration not recorded");
            error.into_response()
        }
    }
}

/// Chat widget message relay. Backend failures become the fallback reply.
pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if let Err(error) = request.validate() {
        return error.into_response();
    }
    let reply = match state.backend.ask(&request).await {
        Ok(response) => ChatReply { response, fallback: false },
        Err(error) => {
            tracing::warn!(error = %error, "Chat reply unavailable");
            ChatReply::fallback()
        }
    };
    Json(reply).into_response()
}

/// Forwards the widget's feedback form to the configured feedback service.
pub async fn feedback(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let forwarded = match state.config.feedback_url.as_deref() {
        Some(url) => state.backend.forward_feedback(url, &body).await,
        None => Err(DashboardError::Config("feedback_url is not configured".into())),
    };
    match forwarded {
        Ok(data) => Json(json!({ "message": "Success!", "data": data })).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Feedback not delivered");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Failed to send feedback", "error": error.to_string() })),
            )
                .into_response()
        }
    }
}

async fn run_mutation(state: &AppState, payload: ActionPayload, success: &str) -> Response {
    match retry::submit(payload, &state.backend, &state.in_flight, &state.actions).await {
        Ok(data) => Json(ApiResponse::success(success, data)).into_response(),
        Err((error, Some(action))) => error.into_response_with_retry(action),
        Err((error, None)) => error.into_response(),
    }
}

pub async fn list_actions(State(state): State<AppState>) -> Json<Vec<RetryableAction>> {
    Json(state.actions.list())
}

pub async fn retry_action(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state
        .actions
        .retry(id, &state.backend, &state.in_flight)
        .await
    {
        Ok(data) => Json(ApiResponse::success("Retried successfully", data)).into_response(),
        // still parked, the same id can be retried again
        Err(error) if error.is_retryable() => error.into_response_with_retry(id),
        Err(error) => error.into_response(),
    }
}

pub async fn dismiss_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse>, DashboardError> {
    let action = state.actions.dismiss(id)?;
    tracing::info!(action = %id, kind = action.payload.kind(), "Action dismissed");
    Ok(Json(ApiResponse::success("Dismissed", None)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, DashboardError> {
    let session = state.gate.login(&request.password)?;
    let cookie = state.gate.session_cookie(&session);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success("Logged in", None)),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = session_from_headers(&headers) {
        state.gate.logout(&session);
    }
    (
        [(header::SET_COOKIE, SessionGate::clear_cookie())],
        Json(ApiResponse::success("Logged out", None)),
    )
        .into_response()
}
