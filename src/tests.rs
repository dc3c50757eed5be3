use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::backend;
use crate::config::Config;
use crate::{build_router, AppState};

const PASSWORD: &str = "yabatech";

/// Serve `router` on an ephemeral port and return its base URL.
pub(crate) async fn spawn_backend(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone, Default)]
struct FakeBackend {
    mutations: Arc<AtomicUsize>,
    reject_edits: Arc<AtomicBool>,
    last_duration: Arc<parking_lot::Mutex<Option<Value>>>,
    last_feedback: Arc<parking_lot::Mutex<Option<Value>>>,
}

fn fake_routes(fake: FakeBackend, with_logs: bool) -> Router {
    let mut router = Router::new()
        .route(
            backend::FETCH_INTERACTIONS,
            get(|| async {
                Json(json!({ "data": [
                    { "id": 1, "session_id": "a", "duration": 10, "date": "2025-08-01T09:00:00Z" },
                    { "id": 2, "session_id": "a", "duration": 20, "date": "2025-08-02T09:00:00Z" },
                    { "id": 3, "session_id": "b", "duration": 30, "date": "2025-08-02T12:00:00Z" },
                    { "id": 4, "session_id": "c", "duration": 5, "date": "2025-08-31T12:00:00Z" },
                    { "id": 5, "session_id": "d", "duration": "n/a", "date": "2025-08-03T12:00:00Z" }
                ]}))
            }),
        )
        .route(
            backend::FETCH_QA,
            get(|| async {
                Json(json!({ "data": [
                    { "id": 1, "question": "When does admission open?", "answer": "September", "category": "A" },
                    { "id": 2, "question": "What are library hours?", "answer": "8am to 8pm", "category": "A" },
                    { "id": 3, "question": "Where is the bursary?", "answer": "Block B", "category": "A" },
                    { "id": 4, "question": "How do I pay fees?", "answer": "Online portal", "category": "B" },
                    { "id": 5, "question": "Is there a hostel?", "answer": "Yes", "category": "B" },
                    { "id": 6, "question": "What is Flask?", "answer": "A Python framework", "category": "C" },
                    { "id": 7, "question": "Who is the rector?", "answer": "See staff page", "category": "D" },
                    { "id": 8, "question": "Is there wifi?", "answer": "Yes, campus wide", "category": "E" }
                ]}))
            }),
        )
        .route(
            backend::FETCH_UNANSWERED,
            get(|| async {
                Json(json!({ "data": [
                    { "id": 40, "question": "what are the library hours?", "category": "Campus" },
                    { "id": 41, "question": "Can I defer my admission by a year?" }
                ]}))
            }),
        )
        .route(backend::ADD_QA, post(accept))
        .route(backend::EDIT_QA, post(edit))
        .route(backend::EDIT_UNANSWERED, post(accept))
        .route(backend::RECORD_SESSION_DURATION, post(record_duration))
        .route(backend::ASK, post(ask))
        .route("/feedback-sink", post(feedback_sink));

    if with_logs {
        router = router.route(
            backend::FETCH_LATENCY_LOGS,
            get(|| async {
                Json(json!({ "data": [
                    { "id": 1, "time_value": 1.5, "res_type": "text" },
                    { "id": 2, "time_value": 2.9, "res_type": "json" }
                ]}))
            }),
        );
    }

    router.with_state(fake)
}

async fn accept(State(fake): State<FakeBackend>) -> Json<Value> {
    fake.mutations.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "status": 1 }))
}

async fn edit(State(fake): State<FakeBackend>) -> Json<Value> {
    fake.mutations.fetch_add(1, Ordering::SeqCst);
    if fake.reject_edits.load(Ordering::SeqCst) {
        Json(json!({ "status": 0, "message": "Question is locked" }))
    } else {
        Json(json!({ "status": 1 }))
    }
}

async fn record_duration(State(fake): State<FakeBackend>, Json(body): Json<Value>) -> Json<Value> {
    fake.mutations.fetch_add(1, Ordering::SeqCst);
    *fake.last_duration.lock() = Some(body);
    Json(json!({ "status": 1, "data": { "saved": true } }))
}

async fn ask(Json(body): Json<Value>) -> Json<Value> {
    let message = body["message"].as_str().unwrap_or_default();
    let turns = body["history"].as_array().map(Vec::len).unwrap_or(0);
    Json(json!({ "response": format!("You asked: {} ({} earlier)", message, turns) }))
}

async fn feedback_sink(State(fake): State<FakeBackend>, Json(body): Json<Value>) -> Json<Value> {
    *fake.last_feedback.lock() = Some(body);
    Json(json!({ "result": "success", "row": 12 }))
}

async fn dashboard_app(fake: FakeBackend, with_logs: bool) -> Router {
    let base = spawn_backend(fake_routes(fake, with_logs)).await;
    let config = Config {
        feedback_url: Some(format!("{}/feedback-sink", base)),
        api_url: base,
        admin_password: PASSWORD.to_string(),
        ..Config::default()
    };
    build_router(AppState::new(config).unwrap())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// Log in and return the `name=value` part of the session cookie.
async fn login(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/login", None, json!({ "password": PASSWORD })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let (status, body) = send(&app, get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_dashboard_requires_session() {
    let app = dashboard_app(FakeBackend::default(), true).await;

    let (status, body) = send(&app, get_request("/analytics", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");

    let forged = get_request("/analytics", Some("admin-session=forged"));
    assert_eq!(send(&app, forged).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let (status, body) = send(
        &app,
        json_request("POST", "/login", None, json!({ "password": "guess" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid access code. Please try again.");
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let cookie = login(&app).await;

    let (status, _) = send(&app, json_request("POST", "/logout", Some(&cookie), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, get_request("/analytics", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_dashboard_derives_all_sections() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let cookie = login(&app).await;

    let (status, body) = send(&app, get_request("/analytics", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);

    // record 5 has an unreadable duration and is dropped at ingest
    assert_eq!(body["overview"], json!({ "total": 4, "count": 3, "avg": 65.0 / 3.0 }));
    assert_eq!(body["avg_session_secs"], 21);

    let series = body["interactions"].as_array().unwrap();
    assert_eq!(series.len(), 30);
    assert_eq!(series[1], json!({ "day": 2, "count": 2 }));
    // day 31 falls outside the window
    let plotted: u64 = series.iter().map(|p| p["count"].as_u64().unwrap()).sum();
    assert_eq!(plotted, 3);

    assert_eq!(body["avg_reply_secs"], 2);
    assert_eq!(body["question_count"], 8);

    let slices = body["question_types"].as_array().unwrap();
    let labels: Vec<&str> = slices.iter().map(|s| s["label"].as_str().unwrap()).collect();
    assert_eq!(labels, vec!["A", "B", "C", "D", "Others"]);
    assert_eq!(slices[4]["count"], 1);
    assert_eq!(slices[0]["color"], "#FF6B6B");
    assert!(body["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_dashboard_keeps_sections_when_one_fetch_fails() {
    let app = dashboard_app(FakeBackend::default(), false).await;
    let cookie = login(&app).await;

    let (status, body) = send(&app, get_request("/analytics", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["avg_reply_secs"].is_null());
    assert_eq!(body["overview"]["total"], 4);
    assert_eq!(body["question_count"], 8);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["section"], "reply_speed");
    assert_eq!(errors[0]["kind"], "application");
}

#[tokio::test]
async fn test_single_sections() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let cookie = login(&app).await;

    let (_, body) = send(&app, get_request("/analytics/reply-speed", Some(&cookie))).await;
    assert_eq!(body["samples"], 2);
    assert_eq!(body["avg_reply_secs"], 2);

    let (_, body) = send(&app, get_request("/analytics/categories", Some(&cookie))).await;
    assert_eq!(body["slices"].as_array().unwrap().len(), 5);

    let (_, body) = send(&app, get_request("/analytics/interactions", Some(&cookie))).await;
    assert_eq!(body["summary"]["count"], 3);

    let (status, _) = send(&app, get_request("/analytics/reply-speed", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_knowledge_search_and_pages() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let cookie = login(&app).await;

    let (status, body) = send(&app, get_request("/knowledge?search=yes", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 8]);

    let (_, body) = send(&app, get_request("/knowledge?page=2", Some(&cookie))).await;
    assert_eq!(body["page"], 2);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["categories"][0], "All");
}

#[tokio::test]
async fn test_add_knowledge_validates_before_sending() {
    let fake = FakeBackend::default();
    let app = dashboard_app(fake.clone(), true).await;
    let cookie = login(&app).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/knowledge",
            Some(&cookie),
            json!({ "question": "", "answer": "Yes", "category": "Campus" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Question and Answer are required");
    assert_eq!(fake.mutations.load(Ordering::SeqCst), 0);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/knowledge",
            Some(&cookie),
            json!({ "question": "Is there a clinic?", "answer": "Yes", "category": "Campus" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Entry added successfully.");
    assert_eq!(fake.mutations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_edit_is_parked_and_retried() {
    let fake = FakeBackend::default();
    fake.reject_edits.store(true, Ordering::SeqCst);
    let app = dashboard_app(fake.clone(), true).await;
    let cookie = login(&app).await;

    let edit = json!({ "question": "What is Flask?", "answer": "A micro framework", "category": "C" });
    let (status, body) = send(&app, json_request("PUT", "/knowledge/6", Some(&cookie), edit)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["message"], "Question is locked");
    assert_eq!(body["retryable"], true);
    let action = body["retry_action"].as_str().unwrap().to_string();

    let (_, listed) = send(&app, get_request("/actions", Some(&cookie))).await;
    assert_eq!(listed[0]["id"], action.as_str());
    assert_eq!(listed[0]["kind"], "edit_qa");
    assert_eq!(listed[0]["payload"]["id"], 6);

    // still rejected: same action id comes back
    let retry_uri = format!("/actions/{}/retry", action);
    let (status, body) = send(&app, json_request("POST", &retry_uri, Some(&cookie), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["retry_action"], action.as_str());

    fake.reject_edits.store(false, Ordering::SeqCst);
    let (status, body) = send(&app, json_request("POST", &retry_uri, Some(&cookie), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(fake.mutations.load(Ordering::SeqCst), 3);

    let (_, listed) = send(&app, get_request("/actions", Some(&cookie))).await;
    assert!(listed.as_array().unwrap().is_empty());

    let (status, _) = send(&app, json_request("POST", &retry_uri, Some(&cookie), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dismiss_action() {
    let fake = FakeBackend::default();
    fake.reject_edits.store(true, Ordering::SeqCst);
    let app = dashboard_app(fake, true).await;
    let cookie = login(&app).await;

    let edit = json!({ "question": "q", "answer": "a", "category": "" });
    let (_, body) = send(&app, json_request("PUT", "/knowledge/2", Some(&cookie), edit)).await;
    let action = body["retry_action"].as_str().unwrap().to_string();

    let uri = format!("/actions/{}", action);
    let request = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&app, get_request("/actions", Some(&cookie))).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_training_queue_with_suggestions() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let cookie = login(&app).await;

    let (status, body) = send(&app, get_request("/training", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending"], 2);
    assert_eq!(body["questions"][0]["id"], 40);
    assert_eq!(body["questions"][0]["suggestions"][0]["id"], 2);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/training/40/answer",
            Some(&cookie),
            json!({ "question": "what are the library hours?", "answer": "  ", "category": "Campus" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Please provide an answer.");

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/training/40/answer",
            Some(&cookie),
            json!({ "question": "what are the library hours?", "answer": "8am to 8pm", "category": "Campus" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_widget_reports_duration_without_login() {
    let fake = FakeBackend::default();
    let app = dashboard_app(fake.clone(), true).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/sessions/duration",
            None,
            json!({ "duration": 95, "session_id": "4c1f-token" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["saved"], true);

    let sent = fake.last_duration.lock().clone().unwrap();
    assert_eq!(sent["session_id"], "4c1f-token");
    assert_eq!(sent["duration"], 95.0);
}

#[tokio::test]
async fn test_widget_failures_are_not_parked() {
    let config = Config {
        api_url: "http://127.0.0.1:9".to_string(),
        admin_password: PASSWORD.to_string(),
        ..Config::default()
    };
    let state = AppState::new(config).unwrap();
    let app = build_router(state.clone());

    for n in 0..20 {
        let report = json!({ "duration": 30, "session_id": format!("visitor-{}", n) });
        let (status, body) = send(&app, json_request("POST", "/sessions/duration", None, report)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.get("retry_action").is_none());
    }
    assert_eq!(state.actions.len(), 0);
}

#[tokio::test]
async fn test_chat_relays_message_and_history() {
    let app = dashboard_app(FakeBackend::default(), true).await;
    let message = json!({
        "message": "Where is the clinic?",
        "history": [
            { "id": 1, "text": "Hi", "sender": "user" },
            { "id": 2, "text": "Hello! How can I help?", "sender": "bot" }
        ]
    });

    let (status, body) = send(&app, json_request("POST", "/chat", None, message)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "You asked: Where is the clinic? (2 earlier)");
    assert_eq!(body["fallback"], false);

    let (status, _) = send(&app, json_request("POST", "/chat", None, json!({ "message": " " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_chat_falls_back_when_bot_unreachable() {
    let config = Config {
        api_url: "http://127.0.0.1:9".to_string(),
        admin_password: PASSWORD.to_string(),
        ..Config::default()
    };
    let app = build_router(AppState::new(config).unwrap());

    let (status, body) = send(&app, json_request("POST", "/chat", None, json!({ "message": "Hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], crate::models::CHAT_FALLBACK);
    assert_eq!(body["fallback"], true);
}

#[tokio::test]
async fn test_feedback_is_forwarded() {
    let fake = FakeBackend::default();
    let app = dashboard_app(fake.clone(), true).await;
    let form = json!({ "name": "Ada", "rating": 5, "comment": "Very helpful" });

    let (status, body) = send(&app, json_request("POST", "/feedback", None, form.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Success!");
    assert_eq!(body["data"]["row"], 12);
    assert_eq!(fake.last_feedback.lock().clone(), Some(form));
}

#[tokio::test]
async fn test_feedback_failure_is_500() {
    let config = Config {
        api_url: "http://127.0.0.1:9".to_string(),
        admin_password: PASSWORD.to_string(),
        feedback_url: Some("http://127.0.0.1:9/exec".to_string()),
        ..Config::default()
    };
    let app = build_router(AppState::new(config).unwrap());

    let (status, body) = send(&app, json_request("POST", "/feedback", None, json!({ "rating": 1 }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to send feedback");
    assert!(body["error"].as_str().unwrap().contains("feedback"));
}

#[tokio::test]
async fn test_feedback_without_target() {
    let config = Config {
        api_url: "http://127.0.0.1:9".to_string(),
        admin_password: PASSWORD.to_string(),
        ..Config::default()
    };
    let app = build_router(AppState::new(config).unwrap());

    let (status, body) = send(&app, json_request("POST", "/feedback", None, json!({ "rating": 3 }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("feedback_url"));
}

#[tokio::test]
async fn test_unreachable_backend_is_reported() {
    let config = Config {
        api_url: "http://127.0.0.1:9".to_string(),
        admin_password: PASSWORD.to_string(),
        ..Config::default()
    };
    let app = build_router(AppState::new(config).unwrap());
    let cookie = login(&app).await;

    let (status, body) = send(&app, get_request("/knowledge", Some(&cookie))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "transient_network");
    assert_eq!(body["retryable"], true);
}
