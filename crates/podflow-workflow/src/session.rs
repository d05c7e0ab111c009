//! Per-canvas context owning the graph, the workflow reducer and the trackers.

use crate::backend::ConnectionBackend;
use crate::channel::{EventChannel, Inbox};
use crate::collaborators::{Notifier, RepositoryStore};
use crate::graph::{ConnectionGraph, NewConnection};
use crate::registry::{ProgressTask, TaskRegistry, TrackerSpec, TrackerTimings};
use crate::request::OperationResult;
use crate::trackers::{
    CheckoutRegistry, CheckoutTracker, CloneRegistry, CloneTracker, PullRegistry, PullTracker,
};
use crate::workflow::WorkflowStateMachine;
use podflow_core::events::{GRAPH_EVENTS, WORKFLOW_EVENTS};
use podflow_core::payloads::{CheckoutRequest, CloneRequest, PullRequest};
use podflow_core::{Connection, SocketFrame, TriggerMode};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub channel: Arc<dyn EventChannel>,
    pub backend: Arc<dyn ConnectionBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub repositories: Arc<dyn RepositoryStore>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub timings: TrackerTimings,
}

pub struct CanvasSession {
    channel: Arc<dyn EventChannel>,
    backend: Arc<dyn ConnectionBackend>,
    graph: ConnectionGraph,
    workflow: WorkflowStateMachine,
    clones: CloneRegistry,
    pulls: PullRegistry,
    checkouts: CheckoutRegistry,
    inbox: Inbox,
}

/// Every event a session listens for, graph and workflow first.
fn session_events() -> Vec<&'static str> {
    let mut events = Vec::with_capacity(GRAPH_EVENTS.len() + WORKFLOW_EVENTS.len() + 6);
    events.extend(GRAPH_EVENTS);
    events.extend(WORKFLOW_EVENTS);
    events.extend([
        CloneTracker::PROGRESS_EVENT,
        CloneTracker::RESULT_EVENT,
        PullTracker::PROGRESS_EVENT,
        PullTracker::RESULT_EVENT,
        CheckoutTracker::PROGRESS_EVENT,
        CheckoutTracker::RESULT_EVENT,
    ]);
    events
}

impl CanvasSession {
    pub fn new(canvas_id: impl Into<String>, deps: SessionDeps, config: SessionConfig) -> Self {
        let clones = TaskRegistry::with_timings(
            CloneTracker::new(deps.notifier.clone(), deps.repositories.clone()),
            config.timings,
        );
        let pulls = TaskRegistry::with_timings(PullTracker::new(deps.notifier.clone()), config.timings);
        let checkouts = TaskRegistry::with_timings(
            CheckoutTracker::new(deps.notifier, deps.repositories),
            config.timings,
        );
        Self {
            channel: deps.channel,
            backend: deps.backend,
            graph: ConnectionGraph::new(canvas_id),
            workflow: WorkflowStateMachine::new(),
            clones,
            pulls,
            checkouts,
            inbox: Inbox::new(),
        }
    }

    pub fn canvas_id(&self) -> &str {
        self.graph.canvas_id()
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ConnectionGraph {
        &mut self.graph
    }

    pub fn clones(&self) -> &CloneRegistry {
        &self.clones
    }

    pub fn pulls(&self) -> &PullRegistry {
        &self.pulls
    }

    pub fn checkouts(&self) -> &CheckoutRegistry {
        &self.checkouts
    }

    /// All components share one subscription, so they are either all
    /// listening or none is.
    pub fn is_listening(&self) -> bool {
        self.inbox.is_listening()
    }

    /// Registers one handler per session event and re-arms tracker timers
    /// suspended by an earlier cleanup. Returns `false` if already listening.
    pub fn setup_listeners(&mut self) -> bool {
        let registered = self
            .inbox
            .subscribe(self.channel.as_ref(), &session_events());
        if registered {
            self.clones.resume_timers();
            self.pulls.resume_timers();
            self.checkouts.resume_timers();
            info!(event = "session_listening", canvas_id = %self.graph.canvas_id());
        }
        registered
    }

    /// Deregisters every handler, drops unapplied frames and cancels every
    /// pending tracker timer.
    pub fn cleanup_listeners(&mut self) -> bool {
        let removed = self.inbox.unsubscribe(self.channel.as_ref());
        self.clones.suspend_timers();
        self.pulls.suspend_timers();
        self.checkouts.suspend_timers();
        if removed {
            info!(event = "session_stopped", canvas_id = %self.graph.canvas_id());
        }
        removed
    }

    /// Applies every queued inbound event in socket arrival order. Returns how
    /// many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(frame) = self.inbox.try_next() {
            self.dispatch(&frame);
            applied += 1;
        }
        applied
    }

    fn dispatch(&mut self, frame: &SocketFrame) {
        let name = frame.event.as_str();
        if GRAPH_EVENTS.contains(&name) {
            self.graph.handle_frame(frame);
        } else if WORKFLOW_EVENTS.contains(&name) {
            self.workflow.handle_frame(&mut self.graph, frame);
        } else if name == CloneTracker::PROGRESS_EVENT || name == CloneTracker::RESULT_EVENT {
            self.clones.handle_frame(frame);
        } else if name == PullTracker::PROGRESS_EVENT || name == PullTracker::RESULT_EVENT {
            self.pulls.handle_frame(frame);
        } else if name == CheckoutTracker::PROGRESS_EVENT || name == CheckoutTracker::RESULT_EVENT {
            self.checkouts.handle_frame(frame);
        }
    }

    pub fn poll_timers(&mut self) -> usize {
        let now = Instant::now();
        self.clones.poll_timers_at(now) + self.pulls.poll_timers_at(now) + self.checkouts.poll_timers_at(now)
    }

    /// Earliest tracker deadline, for a driver's `sleep_until`.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.clones.next_deadline(),
            self.pulls.next_deadline(),
            self.checkouts.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Tears the session down and rebuilds it empty for `canvas_id`.
    pub fn switch_canvas(&mut self, canvas_id: impl Into<String>) {
        let was_listening = self.cleanup_listeners();
        self.clones.reset();
        self.pulls.reset();
        self.checkouts.reset();
        self.graph.reset_for_canvas(canvas_id);
        info!(event = "canvas_switched", canvas_id = %self.graph.canvas_id());
        if was_listening {
            self.setup_listeners();
        }
    }

    /// Every tracked task in display order: clones, pulls, then checkouts.
    pub fn progress_tasks(&self) -> Vec<ProgressTask> {
        let mut tasks = self.clones.progress_tasks();
        tasks.extend(self.pulls.progress_tasks());
        tasks.extend(self.checkouts.progress_tasks());
        tasks
    }

    pub async fn load_connections(&mut self) -> OperationResult<usize> {
        OperationResult::from_result(self.graph.load_from_backend(self.backend.as_ref()).await)
    }

    pub async fn create_connection(&mut self, draft: NewConnection) -> OperationResult<Connection> {
        OperationResult::from_result(self.graph.create(self.backend.as_ref(), draft).await)
    }

    pub async fn update_trigger_mode(
        &mut self,
        connection_id: &str,
        trigger_mode: TriggerMode,
    ) -> OperationResult<Connection> {
        let result = self
            .graph
            .update_trigger_mode(self.backend.as_ref(), connection_id, trigger_mode)
            .await;
        OperationResult::from_result(result)
    }

    pub async fn delete_connection(&mut self, connection_id: &str) -> OperationResult<()> {
        let result = self
            .graph
            .delete_connection(self.backend.as_ref(), connection_id)
            .await;
        OperationResult::from_result(result)
    }

    pub fn start_clone(&mut self, request: CloneRequest) -> OperationResult<()> {
        OperationResult::from_result(self.clones.start_clone(self.channel.as_ref(), request))
    }

    pub fn start_pull(&mut self, request: PullRequest, repository_name: &str) -> OperationResult<()> {
        let result = self
            .pulls
            .start_pull(self.channel.as_ref(), request, repository_name);
        OperationResult::from_result(result)
    }

    pub fn start_checkout(&mut self, request: CheckoutRequest) -> OperationResult<()> {
        OperationResult::from_result(self.checkouts.start_checkout(self.channel.as_ref(), request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalEventBus;
    use crate::collaborators::InMemoryRepositoryStore;
    use crate::graph::test_support::{connection, ScriptedBackend};
    use crate::trackers::test_support::RecordingNotifier;
    use podflow_core::events::{
        CONNECTION_CREATED, CONNECTION_UPDATED, REPOSITORY_CLONE_PROGRESS, REPOSITORY_PULL_PROGRESS,
        WORKFLOW_AUTO_TRIGGERED, WORKFLOW_QUEUED,
    };
    use podflow_core::{Anchor, ConnectionStatus};
    use serde_json::json;
    use std::time::Duration;

    fn session(bus: &LocalEventBus, backend: Arc<ScriptedBackend>) -> CanvasSession {
        let deps = SessionDeps {
            channel: Arc::new(bus.clone()),
            backend,
            notifier: Arc::new(RecordingNotifier::default()),
            repositories: Arc::new(InMemoryRepositoryStore::default()),
        };
        CanvasSession::new("canvas-1", deps, SessionConfig::default())
    }

    #[test]
    fn setup_is_idempotent_across_components() {
        let bus = LocalEventBus::new();
        let mut session = session(&bus, Arc::new(ScriptedBackend::default()));
        assert!(!session.is_listening());
        assert!(session.setup_listeners());
        assert!(!session.setup_listeners());
        assert!(session.is_listening());
        assert_eq!(bus.listener_count(WORKFLOW_QUEUED), 1);
        assert_eq!(bus.listener_count(CONNECTION_CREATED), 1);
        assert_eq!(bus.listener_count(REPOSITORY_CLONE_PROGRESS), 1);

        assert!(session.cleanup_listeners());
        assert!(!session.cleanup_listeners());
        assert!(!session.is_listening());
        assert_eq!(bus.listener_count(WORKFLOW_QUEUED), 0);
        assert_eq!(bus.listener_count(CONNECTION_CREATED), 0);
        assert!(session.setup_listeners());
        assert_eq!(bus.listener_count(REPOSITORY_PULL_PROGRESS), 1);
    }

    #[tokio::test]
    async fn create_connection_reports_local_rejection_as_result() {
        let bus = LocalEventBus::new();
        let backend = Arc::new(ScriptedBackend::default());
        let mut session = session(&bus, backend.clone());

        let created = session
            .create_connection(NewConnection::between("pod-a", Anchor::Right, "pod-b", Anchor::Left))
            .await;
        assert!(created.success);

        let duplicate = session
            .create_connection(NewConnection::between("pod-a", Anchor::Right, "pod-b", Anchor::Left))
            .await;
        assert!(!duplicate.success);
        assert_eq!(duplicate.error.as_deref(), Some("connection already exists"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_deadline_tracks_earliest_timer() {
        let bus = LocalEventBus::new();
        bus.set_connected(true);
        let mut session = session(&bus, Arc::new(ScriptedBackend::default()));
        assert!(session.next_deadline().is_none());

        let started = Instant::now();
        let result = session.start_checkout(CheckoutRequest {
            request_id: "r1".to_string(),
            repository_id: "repo-1".to_string(),
            branch_name: "feature".to_string(),
            force: false,
        });
        assert!(result.success);
        assert_eq!(session.next_deadline(), Some(started + Duration::from_secs(60)));
        assert_eq!(session.progress_tasks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_canvas_clears_state_and_keeps_listening() {
        let bus = LocalEventBus::new();
        bus.set_connected(true);
        let mut session = session(&bus, Arc::new(ScriptedBackend::default()));
        session.setup_listeners();
        session
            .graph_mut()
            .apply_created(connection("c1", "pod-a", "pod-b", TriggerMode::Auto));
        let started = session.start_pull(
            PullRequest {
                request_id: "p1".to_string(),
                repository_id: "repo-1".to_string(),
            },
            "api",
        );
        assert!(started.success);
        bus.deliver(WORKFLOW_QUEUED, &json!({"connectionId": "c1"}));

        session.switch_canvas("canvas-2");
        assert_eq!(session.canvas_id(), "canvas-2");
        assert!(session.graph().is_empty());
        assert!(session.progress_tasks().is_empty());
        assert!(session.next_deadline().is_none());
        assert_eq!(session.pump(), 0);
        assert_eq!(bus.listener_count(WORKFLOW_QUEUED), 1);

        session
            .graph_mut()
            .apply_created(connection("c2", "pod-a", "pod-b", TriggerMode::Auto));
        bus.deliver(WORKFLOW_QUEUED, &json!({"connectionId": "c2"}));
        assert_eq!(session.pump(), 1);
        assert_eq!(
            session.graph().get("c2").map(|conn| conn.status),
            Some(ConnectionStatus::Queued)
        );
    }

    #[test]
    fn interleaved_graph_and_workflow_events_apply_in_arrival_order() {
        let bus = LocalEventBus::new();
        let mut session = session(&bus, Arc::new(ScriptedBackend::default()));
        session.setup_listeners();
        session
            .graph_mut()
            .apply_created(connection("c1", "pod-a", "pod-x", TriggerMode::Auto));
        session
            .graph_mut()
            .apply_created(connection("c2", "pod-b", "pod-x", TriggerMode::Auto));

        bus.deliver(WORKFLOW_AUTO_TRIGGERED, &json!({"connectionId": "c1"}));
        let now_direct = connection("c1", "pod-a", "pod-x", TriggerMode::Direct);
        bus.deliver(
            CONNECTION_UPDATED,
            &json!({"connection": serde_json::to_value(&now_direct).expect("serialize")}),
        );
        assert_eq!(session.pump(), 2);

        assert_eq!(
            session.graph().get("c2").map(|conn| conn.status),
            Some(ConnectionStatus::Active)
        );
        assert_eq!(
            session.graph().get("c1").map(|conn| conn.trigger_mode),
            Some(TriggerMode::Direct)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn relistening_resumes_task_timeouts() {
        let bus = LocalEventBus::new();
        bus.set_connected(true);
        let mut session = session(&bus, Arc::new(ScriptedBackend::default()));
        session.setup_listeners();
        let started = session.start_pull(
            PullRequest {
                request_id: "p1".to_string(),
                repository_id: "repo-1".to_string(),
            },
            "api",
        );
        assert!(started.success);

        session.cleanup_listeners();
        assert!(session.next_deadline().is_none());
        session.setup_listeners();
        assert!(session.next_deadline().is_some());

        tokio::time::advance(Duration::from_secs(60)).await;
        session.poll_timers();
        let tasks = session.progress_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, "failed");

        tokio::time::advance(Duration::from_secs(2)).await;
        session.poll_timers();
        assert!(session.progress_tasks().is_empty());
        assert!(session.next_deadline().is_none());
    }

    #[test]
    fn start_failure_surfaces_as_result() {
        let bus = LocalEventBus::new();
        let mut session = session(&bus, Arc::new(ScriptedBackend::default()));
        let result = session.start_clone(CloneRequest {
            request_id: "c1".to_string(),
            repository_url: "https://github.com/acme/widgets.git".to_string(),
            branch: None,
        });
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("socket not connected"));
        assert_eq!(session.progress_tasks()[0].status, "failed");
    }
}
