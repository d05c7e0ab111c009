//! Request/response round trips over an [`EventChannel`], correlated by `requestId`.

use crate::channel::{ChannelError, EventChannel, EventHandler, ListenerId};
use crate::trackers::messages::UNKNOWN_ERROR_MESSAGE;
use podflow_core::wire::request_id_of;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestConfig {
    pub timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("no {event} response within {after:?}")]
    Timeout { event: String, after: Duration },
    #[error("{0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Envelope handed to UI-facing callers instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

type PendingMap = HashMap<String, oneshot::Sender<Value>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct SocketRequester {
    channel: Arc<dyn EventChannel>,
    config: RequestConfig,
    pending: Arc<Mutex<PendingMap>>,
    listeners: Arc<Mutex<HashMap<String, ListenerId>>>,
}

impl SocketRequester {
    pub fn new(channel: Arc<dyn EventChannel>, config: RequestConfig) -> Self {
        Self {
            channel,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> RequestConfig {
        self.config
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// One listener per response event, shared by every in-flight request.
    fn ensure_listener(&self, response_event: &str) {
        let mut listeners = lock(&self.listeners);
        if listeners.contains_key(response_event) {
            return;
        }
        let pending = self.pending.clone();
        let handler: EventHandler = Arc::new(move |payload: &Value| {
            let Some(request_id) = request_id_of(payload) else {
                return;
            };
            let waiter = lock(&pending).remove(request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(payload.clone());
                }
                None => debug!(event = "response_unmatched", request_id = request_id),
            }
        });
        let id = self.channel.on(response_event, handler);
        listeners.insert(response_event.to_string(), id);
    }

    /// Emits `payload` with a fresh `requestId` and waits for the matching
    /// `response_event`. A `success: false` response becomes [`RequestError::Rejected`].
    pub async fn request(
        &self,
        request_event: &str,
        response_event: &str,
        payload: Value,
    ) -> Result<Value, RequestError> {
        let Value::Object(mut body) = payload else {
            return Err(ChannelError::Encode("request payload must be an object".to_string()).into());
        };
        self.ensure_listener(response_event);

        let request_id = Uuid::new_v4().to_string();
        body.insert("requestId".to_string(), Value::String(request_id.clone()));
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), tx);

        if let Err(err) = self.channel.emit(request_event, Value::Object(body)) {
            lock(&self.pending).remove(&request_id);
            warn!(event = "request_emit_failed", request_event = request_event, error = %err);
            return Err(err.into());
        }

        let response = match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ChannelError::Closed.into()),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                warn!(
                    event = "request_timeout",
                    request_event = request_event,
                    request_id = %request_id
                );
                return Err(RequestError::Timeout {
                    event: response_event.to_string(),
                    after: self.config.timeout,
                });
            }
        };

        if response.get("success").and_then(Value::as_bool) == Some(false) {
            let error = response
                .get("error")
                .and_then(Value::as_str)
                .filter(|error| !error.trim().is_empty())
                .unwrap_or(UNKNOWN_ERROR_MESSAGE);
            return Err(RequestError::Rejected(error.to_string()));
        }
        Ok(response)
    }

    /// Like [`SocketRequester::request`], decoding the response into `T`.
    pub async fn request_as<B: Serialize, T: DeserializeOwned>(
        &self,
        request_event: &str,
        response_event: &str,
        body: &B,
    ) -> Result<T, RequestError> {
        let payload =
            serde_json::to_value(body).map_err(|err| ChannelError::Encode(err.to_string()))?;
        let response = self.request(request_event, response_event, payload).await?;
        serde_json::from_value(response).map_err(|err| RequestError::Decode(err.to_string()))
    }

    /// Drops every listener and fails the requests still waiting.
    pub fn close(&self) {
        for (event, id) in lock(&self.listeners).drain() {
            self.channel.off(&event, id);
        }
        lock(&self.pending).clear();
    }
}
