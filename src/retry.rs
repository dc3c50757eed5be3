//! Failed mutations kept as retryable actions, and the in-flight guard that
//! stops the same mutation from being submitted twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::error::DashboardError;
use crate::models::{AnswerSubmission, NewQa, QaEdit, SessionDuration};

/// What failed, with everything needed to send it again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ActionPayload {
    AddQa(NewQa),
    EditQa { id: i64, edit: QaEdit },
    AnswerUnanswered { id: i64, submission: AnswerSubmission },
    RecordSessionDuration(SessionDuration),
}

impl ActionPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionPayload::AddQa(_) => "add_qa",
            ActionPayload::EditQa { .. } => "edit_qa",
            ActionPayload::AnswerUnanswered { .. } => "answer_unanswered",
            ActionPayload::RecordSessionDuration(_) => "record_session_duration",
        }
    }

    /// Key for the in-flight guard: kind plus the targeted record.
    pub fn flight_key(&self) -> String {
        match self {
            ActionPayload::AddQa(qa) => format!("add_qa:{}", qa.question.trim().to_lowercase()),
            ActionPayload::EditQa { id, .. } => format!("edit_qa:{}", id),
            ActionPayload::AnswerUnanswered { id, .. } => format!("answer_unanswered:{}", id),
            ActionPayload::RecordSessionDuration(report) => {
                format!("record_session_duration:{}", report.session_id)
            }
        }
    }

    /// Issue the request this payload describes.
    pub async fn attempt(&self, backend: &BackendClient) -> Result<Option<Value>, DashboardError> {
        match self {
            ActionPayload::AddQa(qa) => backend.add_qa(qa).await,
            ActionPayload::EditQa { id, edit } => backend.edit_qa(*id, edit).await,
            ActionPayload::AnswerUnanswered { id, submission } => {
                backend.edit_unanswered(*id, submission).await
            }
            ActionPayload::RecordSessionDuration(report) => {
                backend.record_session_duration(report).await
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryableAction {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: ActionPayload,
    pub attempts: u32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
}

/// Failed mutations waiting for the user to retry or dismiss them.
#[derive(Clone, Default)]
pub struct ActionQueue {
    actions: Arc<RwLock<HashMap<Uuid, RetryableAction>>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a failed mutation and return its id.
    pub fn register(&self, payload: ActionPayload, error: &DashboardError) -> Uuid {
        let action = RetryableAction {
            id: Uuid::new_v4(),
            payload,
            attempts: 1,
            last_error: error.to_string(),
            created_at: Utc::now(),
        };
        let id = action.id;
        tracing::info!(action = %id, kind = action.payload.kind(), error = %error, "Mutation parked for retry");
        self.actions.write().insert(id, action);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<RetryableAction> {
        self.actions.read().get(&id).cloned()
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<RetryableAction> {
        let mut actions: Vec<RetryableAction> = self.actions.read().values().cloned().collect();
        actions.sort_by_key(|a| a.created_at);
        actions
    }

    pub fn dismiss(&self, id: Uuid) -> Result<RetryableAction, DashboardError> {
        self.actions
            .write()
            .remove(&id)
            .ok_or(DashboardError::NotFound(id))
    }

    /// Re-send a parked action. Success removes it; failure bumps the attempt count.
    pub async fn retry(
        &self,
        id: Uuid,
        backend: &BackendClient,
        in_flight: &InFlight,
    ) -> Result<Option<Value>, DashboardError> {
        let action = self.get(id).ok_or(DashboardError::NotFound(id))?;
        let _guard = in_flight.begin(action.payload.flight_key())?;

        match action.payload.attempt(backend).await {
            Ok(data) => {
                self.actions.write().remove(&id);
                tracing::info!(action = %id, attempts = action.attempts + 1, "Retried action succeeded");
                Ok(data)
            }
            Err(error) => {
                if let Some(stored) = self.actions.write().get_mut(&id) {
                    stored.attempts += 1;
                    stored.last_error = error.to_string();
                }
                Err(error)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.actions.read().len()
    }
}

/// Keys of mutations currently being sent.
#[derive(Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Releases its key when dropped.
pub struct FlightGuard {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: String) -> Result<FlightGuard, DashboardError> {
        let mut keys = self.keys.lock();
        if !keys.insert(key.clone()) {
            return Err(DashboardError::Busy(key));
        }
        Ok(FlightGuard {
            key,
            keys: self.keys.clone(),
        })
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// Run a mutation under the in-flight guard, once, without parking it.
pub async fn send_once(
    payload: &ActionPayload,
    backend: &BackendClient,
    in_flight: &InFlight,
) -> Result<Option<Value>, DashboardError> {
    let _guard = in_flight.begin(payload.flight_key())?;
    payload.attempt(backend).await
}

/// Run a mutation under the in-flight guard and park it on retryable failure.
pub async fn submit(
    payload: ActionPayload,
    backend: &BackendClient,
    in_flight: &InFlight,
    queue: &ActionQueue,
) -> Result<Option<Value>, (DashboardError, Option<Uuid>)> {
    let result = send_once(&payload, backend, in_flight).await;
    match result {
        Ok(data) => Ok(data),
        Err(error) if error.is_retryable() => {
            let id = queue.register(payload, &error);
            Err((error, Some(id)))
        }
        Err(error) => Err((error, None)),
    }
}
