use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::DashboardError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "admin-session";

/// Single-password admin gate with in-memory sessions
#[derive(Clone)]
pub struct SessionGate {
    password: Arc<String>,
    ttl: Duration,
    sessions: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl SessionGate {
    pub fn new(password: &str, ttl_hours: i64) -> Self {
        Self {
            password: Arc::new(password.to_string()),
            ttl: Duration::hours(ttl_hours),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Issue a session id when the password matches.
    pub fn login(&self, password: &str) -> Result<String, DashboardError> {
        if password != self.password.as_str() {
            tracing::warn!("Rejected admin login");
            return Err(DashboardError::InvalidPassword);
        }
        let session = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        sessions.retain(|_, expires| *expires > now);
        sessions.insert(session.clone(), now + self.ttl);
        drop(sessions);
        tracing::info!("Admin session opened");
        Ok(session)
    }

    pub fn logout(&self, session: &str) {
        self.sessions.write().remove(session);
    }

    /// Live sessions pass; expired ones are forgotten on the way.
    pub fn is_valid(&self, session: &str) -> bool {
        let now = Utc::now();
        let expires = self.sessions.read().get(session).copied();
        match expires {
            Some(at) if at > now => true,
            Some(_) => {
                self.sessions.write().remove(session);
                false
            }
            None => false,
        }
    }

    pub fn session_cookie(&self, session: &str) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
            SESSION_COOKIE,
            session,
            self.ttl.num_seconds()
        )
    }

    pub fn clear_cookie() -> String {
        format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict", SESSION_COOKIE)
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    #[cfg(test)]
    pub(crate) fn expire_all(&self) {
        let past = Utc::now() - Duration::seconds(1);
        for expires in self.sessions.write().values_mut() {
            *expires = past;
        }
    }
}

/// Value of the admin session cookie, if the request carries one.
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Middleware rejecting requests without a live admin session.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let session = session_from_headers(request.headers());
    match session {
        Some(session) if state.gate.is_valid(&session) => next.run(request).await,
        _ => DashboardError::Unauthorized.into_response(),
    }
}
