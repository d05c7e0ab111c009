//! Directed connections between pods on one canvas.
//!
//! The graph is plain owned state. Every observable change bumps
//! [`ConnectionGraph::revision`], which renderers poll instead of subscribing.

use crate::backend::ConnectionBackend;
use crate::channel::{EventChannel, Inbox};
use crate::request::RequestError;
use podflow_core::events::{
    CONNECTION_CREATED, CONNECTION_DELETED, CONNECTION_UPDATED, GRAPH_EVENTS, POD_DELETED,
};
use podflow_core::payloads::{
    ConnectionDeletedPayload, ConnectionPayload, CreateConnectionRequest, DeleteConnectionRequest,
    ListConnectionsRequest, PodDeletedPayload, UpdateConnectionRequest,
};
use podflow_core::{Anchor, Connection, ConnectionStatus, SocketFrame, TriggerMode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("a connection cannot link a pod to itself")]
    SelfLoop,
    #[error("connection already exists")]
    Duplicate,
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("connection not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Endpoints for a connection the user is about to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnection {
    pub source_pod_id: Option<String>,
    pub source_anchor: Anchor,
    pub target_pod_id: String,
    pub target_anchor: Anchor,
    pub trigger_mode: Option<TriggerMode>,
}

impl NewConnection {
    pub fn between(
        source_pod_id: impl Into<String>,
        source_anchor: Anchor,
        target_pod_id: impl Into<String>,
        target_anchor: Anchor,
    ) -> Self {
        Self {
            source_pod_id: Some(source_pod_id.into()),
            source_anchor,
            target_pod_id: target_pod_id.into(),
            target_anchor,
            trigger_mode: None,
        }
    }

    pub fn with_trigger_mode(mut self, trigger_mode: TriggerMode) -> Self {
        self.trigger_mode = Some(trigger_mode);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Edge being drawn by the pointer, not yet sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DraggingConnection {
    pub source_pod_id: Option<String>,
    pub source_anchor: Anchor,
    pub start: Point,
    pub current: Point,
}

pub struct ConnectionGraph {
    canvas_id: String,
    connections: Vec<Connection>,
    selected: Option<String>,
    dragging: Option<DraggingConnection>,
    revision: u64,
    inbox: Inbox,
}

impl ConnectionGraph {
    pub fn new(canvas_id: impl Into<String>) -> Self {
        Self {
            canvas_id: canvas_id.into(),
            connections: Vec::new(),
            selected: None,
            dragging: None,
            revision: 0,
            inbox: Inbox::new(),
        }
    }

    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // Queries

    pub fn get(&self, connection_id: &str) -> Option<&Connection> {
        self.connections.iter().find(|conn| conn.id == connection_id)
    }

    pub fn all(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn outgoing(&self, pod_id: &str) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|conn| conn.source_pod_id.as_deref() == Some(pod_id))
            .collect()
    }

    pub fn incoming(&self, pod_id: &str) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|conn| conn.target_pod_id == pod_id)
            .collect()
    }

    pub fn by_pod(&self, pod_id: &str) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|conn| conn.touches_pod(pod_id))
            .collect()
    }

    fn by_mode(&self, mode: TriggerMode, source_pod_id: Option<&str>) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|conn| conn.trigger_mode == mode)
            .filter(|conn| source_pod_id.map_or(true, |pod| conn.source_pod_id.as_deref() == Some(pod)))
            .collect()
    }

    pub fn ai_decide_connections(&self, source_pod_id: Option<&str>) -> Vec<&Connection> {
        self.by_mode(TriggerMode::AiDecide, source_pod_id)
    }

    pub fn direct_connections(&self, source_pod_id: Option<&str>) -> Vec<&Connection> {
        self.by_mode(TriggerMode::Direct, source_pod_id)
    }

    /// True when nothing feeds this pod.
    pub fn is_source_pod(&self, pod_id: &str) -> bool {
        !self.has_upstream_connections(pod_id)
    }

    pub fn has_upstream_connections(&self, pod_id: &str) -> bool {
        self.connections.iter().any(|conn| conn.target_pod_id == pod_id)
    }

    // Validation and backend round trips

    pub fn validate_new(&self, draft: &NewConnection) -> Result<(), ConnectionError> {
        if draft.target_pod_id.trim().is_empty() {
            return Err(ConnectionError::InvalidId("targetPodId".to_string()));
        }
        if draft
            .source_pod_id
            .as_deref()
            .is_some_and(|source| source.trim().is_empty())
        {
            return Err(ConnectionError::InvalidId("sourcePodId".to_string()));
        }
        if draft.source_pod_id.as_deref() == Some(draft.target_pod_id.as_str()) {
            return Err(ConnectionError::SelfLoop);
        }
        let duplicate = self
            .connections
            .iter()
            .any(|conn| conn.same_endpoints(draft.source_pod_id.as_deref(), &draft.target_pod_id));
        if duplicate {
            return Err(ConnectionError::Duplicate);
        }
        Ok(())
    }

    /// Validates locally, then asks the backend. The graph only changes on success.
    pub async fn create(
        &mut self,
        backend: &dyn ConnectionBackend,
        draft: NewConnection,
    ) -> Result<Connection, ConnectionError> {
        if let Err(err) = self.validate_new(&draft) {
            debug!(event = "connection_create_rejected", reason = %err);
            return Err(err);
        }
        let request = CreateConnectionRequest {
            canvas_id: self.canvas_id.clone(),
            source_pod_id: draft.source_pod_id,
            source_anchor: draft.source_anchor,
            target_pod_id: draft.target_pod_id,
            target_anchor: draft.target_anchor,
            trigger_mode: draft.trigger_mode,
        };
        let connection = backend.create(request).await?;
        info!(event = "connection_created", connection_id = %connection.id);
        self.apply_created(connection.clone());
        Ok(connection)
    }

    pub async fn update_trigger_mode(
        &mut self,
        backend: &dyn ConnectionBackend,
        connection_id: &str,
        trigger_mode: TriggerMode,
    ) -> Result<Connection, ConnectionError> {
        if self.get(connection_id).is_none() {
            return Err(ConnectionError::NotFound(connection_id.to_string()));
        }
        let request = UpdateConnectionRequest {
            canvas_id: self.canvas_id.clone(),
            connection_id: connection_id.to_string(),
            trigger_mode,
        };
        let connection = backend.update_trigger_mode(request).await?;
        info!(
            event = "connection_trigger_mode_updated",
            connection_id = %connection.id,
            trigger_mode = connection.trigger_mode.as_str()
        );
        self.apply_updated(connection.clone());
        Ok(connection)
    }

    pub async fn delete_connection(
        &mut self,
        backend: &dyn ConnectionBackend,
        connection_id: &str,
    ) -> Result<(), ConnectionError> {
        if self.get(connection_id).is_none() {
            return Err(ConnectionError::NotFound(connection_id.to_string()));
        }
        let request = DeleteConnectionRequest {
            canvas_id: self.canvas_id.clone(),
            connection_id: connection_id.to_string(),
        };
        backend.delete(request).await?;
        self.apply_deleted(connection_id);
        Ok(())
    }

    /// Replaces every edge with the backend's list.
    pub async fn load_from_backend(
        &mut self,
        backend: &dyn ConnectionBackend,
    ) -> Result<usize, ConnectionError> {
        let request = ListConnectionsRequest {
            canvas_id: self.canvas_id.clone(),
        };
        let connections = backend.list(request).await?;
        self.connections = connections;
        if let Some(selected) = self.selected.clone() {
            if self.get(&selected).is_none() {
                self.selected = None;
            }
        }
        self.touch();
        info!(
            event = "connections_loaded",
            canvas_id = %self.canvas_id,
            count = self.connections.len()
        );
        Ok(self.connections.len())
    }

    // Local mutations

    /// Inserts or replaces by id.
    pub fn apply_created(&mut self, connection: Connection) {
        match self.connections.iter_mut().find(|conn| conn.id == connection.id) {
            Some(existing) if *existing == connection => return,
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
        self.touch();
    }

    pub fn apply_updated(&mut self, connection: Connection) {
        self.apply_created(connection);
    }

    pub fn apply_deleted(&mut self, connection_id: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|conn| conn.id != connection_id);
        if self.connections.len() == before {
            return false;
        }
        if self.selected.as_deref() == Some(connection_id) {
            self.selected = None;
        }
        self.touch();
        true
    }

    /// Removes every edge touching `pod_id`. Returns how many were removed.
    pub fn delete_connections_by_pod_id(&mut self, pod_id: &str) -> usize {
        let before = self.connections.len();
        self.connections.retain(|conn| !conn.touches_pod(pod_id));
        let removed = before - self.connections.len();
        let selection_dangling = self
            .selected
            .as_deref()
            .is_some_and(|selected| !self.connections.iter().any(|conn| conn.id == selected));
        if selection_dangling {
            self.selected = None;
        }
        if removed > 0 || selection_dangling {
            self.touch();
        }
        if removed > 0 {
            info!(event = "pod_connections_removed", pod_id = pod_id, removed = removed);
        }
        removed
    }

    pub fn select_connection(&mut self, connection_id: Option<&str>) {
        let next = connection_id
            .filter(|id| self.get(id).is_some())
            .map(str::to_string);
        if next != self.selected {
            self.selected = next;
            self.touch();
        }
    }

    pub fn selected_connection_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn start_dragging(&mut self, source_pod_id: Option<String>, source_anchor: Anchor, start: Point) {
        self.dragging = Some(DraggingConnection {
            source_pod_id,
            source_anchor,
            start,
            current: start,
        });
        self.touch();
    }

    pub fn update_dragging_position(&mut self, current: Point) {
        if let Some(dragging) = self.dragging.as_mut() {
            dragging.current = current;
            self.touch();
        }
    }

    pub fn end_dragging(&mut self) -> Option<DraggingConnection> {
        let ended = self.dragging.take();
        if ended.is_some() {
            self.touch();
        }
        ended
    }

    pub fn dragging_connection(&self) -> Option<&DraggingConnection> {
        self.dragging.as_ref()
    }

    /// Sets one edge's status. Returns `false` if the edge is unknown or unchanged.
    pub fn set_status(
        &mut self,
        connection_id: &str,
        status: ConnectionStatus,
        reason: Option<String>,
    ) -> bool {
        let Some(conn) = self.connections.iter_mut().find(|conn| conn.id == connection_id) else {
            debug!(event = "status_for_unknown_connection", connection_id = connection_id);
            return false;
        };
        let before = (conn.status, conn.decide_reason.clone());
        conn.set_status(status, reason);
        let changed = before != (conn.status, conn.decide_reason.clone());
        if changed {
            self.touch();
        }
        changed
    }

    /// Moves every `auto`/`ai-decide` edge into `pod_id` that `eligible` accepts.
    /// Returns how many edges changed.
    pub fn transition_by_target<F>(&mut self, pod_id: &str, status: ConnectionStatus, eligible: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let mut changed = 0;
        for conn in self
            .connections
            .iter_mut()
            .filter(|conn| conn.target_pod_id == pod_id && conn.trigger_mode.fans_out_by_target())
        {
            if !eligible(conn) {
                continue;
            }
            if conn.status != status || conn.decide_reason.is_some() {
                conn.set_status(status, None);
                changed += 1;
            }
        }
        if changed > 0 {
            self.touch();
        }
        changed
    }

    /// By-target primitive. Moving to `active` only picks edges that may fire
    /// (`idle` or `ai-approved`); other statuses apply to every fan-out edge.
    pub fn update_connection_status_by_target_pod(&mut self, pod_id: &str, status: ConnectionStatus) -> usize {
        self.transition_by_target(pod_id, status, |conn| {
            status != ConnectionStatus::Active || conn.status.can_activate()
        })
    }

    pub fn reset(&mut self) {
        self.connections.clear();
        self.selected = None;
        self.dragging = None;
        self.touch();
    }

    /// Switches to another canvas, dropping every edge of the current one.
    pub fn reset_for_canvas(&mut self, canvas_id: impl Into<String>) {
        self.canvas_id = canvas_id.into();
        self.reset();
    }

    // Server-pushed events

    pub fn setup_listeners(&mut self, channel: &dyn EventChannel) -> bool {
        self.inbox.subscribe(channel, &GRAPH_EVENTS)
    }

    pub fn cleanup_listeners(&mut self, channel: &dyn EventChannel) -> bool {
        self.inbox.unsubscribe(channel)
    }

    pub fn is_listening(&self) -> bool {
        self.inbox.is_listening()
    }

    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(frame) = self.inbox.try_next() {
            self.handle_frame(&frame);
            applied += 1;
        }
        applied
    }

    pub fn handle_frame(&mut self, frame: &SocketFrame) {
        if frame.payload.get("success").and_then(Value::as_bool) == Some(false) {
            debug!(event = "graph_event_failed_response", name = %frame.event);
            return;
        }
        match frame.event.as_str() {
            CONNECTION_CREATED => {
                if let Some(payload) = decode::<ConnectionPayload>(frame) {
                    self.apply_created(payload.connection);
                }
            }
            CONNECTION_UPDATED => {
                if let Some(payload) = decode::<ConnectionPayload>(frame) {
                    self.apply_updated(payload.connection);
                }
            }
            CONNECTION_DELETED => {
                if let Some(payload) = decode::<ConnectionDeletedPayload>(frame) {
                    self.apply_deleted(&payload.connection_id);
                }
            }
            POD_DELETED => {
                if let Some(payload) = decode::<PodDeletedPayload>(frame) {
                    self.delete_connections_by_pod_id(&payload.pod_id);
                }
            }
            _ => {}
        }
    }
}

fn decode<T: DeserializeOwned>(frame: &SocketFrame) -> Option<T> {
    match serde_json::from_value(frame.payload.clone()) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(event = "graph_payload_invalid", name = %frame.event, error = %err);
            None
        }
    }
}
