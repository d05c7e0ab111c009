//! Reducer from workflow lifecycle events to connection status changes.
//!
//! `auto` and `ai-decide` edges move together with every other fan-out edge
//! into the same target pod. `direct` edges only move when named.

use crate::channel::{EventChannel, Inbox};
use crate::graph::ConnectionGraph;
use podflow_core::events::{
    WORKFLOW_AI_DECIDE_CLEAR, WORKFLOW_AI_DECIDE_ERROR, WORKFLOW_AI_DECIDE_PENDING,
    WORKFLOW_AI_DECIDE_RESULT, WORKFLOW_AUTO_TRIGGERED, WORKFLOW_COMPLETE,
    WORKFLOW_DIRECT_TRIGGERED, WORKFLOW_DIRECT_WAITING, WORKFLOW_EVENTS, WORKFLOW_QUEUED,
    WORKFLOW_QUEUE_PROCESSED,
};
use podflow_core::payloads::{
    AiDecideBatchPayload, AiDecideErrorPayload, AiDecideResultPayload, WorkflowCompletePayload,
    WorkflowQueuePayload, WorkflowTriggerPayload,
};
use podflow_core::{Connection, ConnectionStatus, SocketFrame, TriggerMode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    AutoTriggered(WorkflowTriggerPayload),
    DirectTriggered(WorkflowTriggerPayload),
    DirectWaiting(WorkflowTriggerPayload),
    Queued(WorkflowQueuePayload),
    QueueProcessed(WorkflowQueuePayload),
    Complete(WorkflowCompletePayload),
    AiDecidePending(AiDecideBatchPayload),
    AiDecideResult(AiDecideResultPayload),
    AiDecideError(AiDecideErrorPayload),
    AiDecideClear(AiDecideBatchPayload),
}

fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload.clone())
}

impl WorkflowEvent {
    /// `Ok(None)` for events that are not workflow lifecycle events.
    pub fn parse(event: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let parsed = match event {
            WORKFLOW_AUTO_TRIGGERED => Self::AutoTriggered(parse_payload(payload)?),
            WORKFLOW_DIRECT_TRIGGERED => Self::DirectTriggered(parse_payload(payload)?),
            WORKFLOW_DIRECT_WAITING => Self::DirectWaiting(parse_payload(payload)?),
            WORKFLOW_QUEUED => Self::Queued(parse_payload(payload)?),
            WORKFLOW_QUEUE_PROCESSED => Self::QueueProcessed(parse_payload(payload)?),
            WORKFLOW_COMPLETE => Self::Complete(parse_payload(payload)?),
            WORKFLOW_AI_DECIDE_PENDING => Self::AiDecidePending(parse_payload(payload)?),
            WORKFLOW_AI_DECIDE_RESULT => Self::AiDecideResult(parse_payload(payload)?),
            WORKFLOW_AI_DECIDE_ERROR => Self::AiDecideError(parse_payload(payload)?),
            WORKFLOW_AI_DECIDE_CLEAR => Self::AiDecideClear(parse_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AutoTriggered(_) => WORKFLOW_AUTO_TRIGGERED,
            Self::DirectTriggered(_) => WORKFLOW_DIRECT_TRIGGERED,
            Self::DirectWaiting(_) => WORKFLOW_DIRECT_WAITING,
            Self::Queued(_) => WORKFLOW_QUEUED,
            Self::QueueProcessed(_) => WORKFLOW_QUEUE_PROCESSED,
            Self::Complete(_) => WORKFLOW_COMPLETE,
            Self::AiDecidePending(_) => WORKFLOW_AI_DECIDE_PENDING,
            Self::AiDecideResult(_) => WORKFLOW_AI_DECIDE_RESULT,
            Self::AiDecideError(_) => WORKFLOW_AI_DECIDE_ERROR,
            Self::AiDecideClear(_) => WORKFLOW_AI_DECIDE_CLEAR,
        }
    }
}

/// Edge selection for one event.
enum Selection<'a> {
    ByTarget(String),
    Named(&'a str),
    Unknown,
}

/// Resolves which edges an event about `connection_id` moves. The stored
/// edge's trigger mode wins over the mode hinted in the payload.
fn select<'a>(
    graph: &ConnectionGraph,
    connection_id: &'a str,
    hinted_mode: Option<TriggerMode>,
    hinted_target: Option<&str>,
) -> Selection<'a> {
    let stored = graph.get(connection_id);
    let mode = stored.map(|conn| conn.trigger_mode).or(hinted_mode);
    let target = stored
        .map(|conn| conn.target_pod_id.clone())
        .or_else(|| hinted_target.map(str::to_string));
    match (mode, target) {
        (Some(mode), Some(target)) if mode.fans_out_by_target() => Selection::ByTarget(target),
        _ if stored.is_some() => Selection::Named(connection_id),
        _ => Selection::Unknown,
    }
}

fn can_fire(conn: &Connection) -> bool {
    conn.status.can_activate()
}

#[derive(Default)]
pub struct WorkflowStateMachine {
    inbox: Inbox,
}

impl WorkflowStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event to the graph. Returns how many edges changed.
    pub fn transition(&self, graph: &mut ConnectionGraph, event: &WorkflowEvent) -> usize {
        let changed = match event {
            WorkflowEvent::AutoTriggered(payload) => {
                let selection = select(
                    graph,
                    &payload.connection_id,
                    Some(TriggerMode::Auto),
                    payload.target_pod_id.as_deref(),
                );
                match selection {
                    Selection::ByTarget(target) => {
                        graph.transition_by_target(&target, ConnectionStatus::Active, can_fire)
                    }
                    _ => 0,
                }
            }
            WorkflowEvent::DirectTriggered(payload) => {
                graph.set_status(&payload.connection_id, ConnectionStatus::Active, None) as usize
            }
            WorkflowEvent::DirectWaiting(payload) => {
                graph.set_status(&payload.connection_id, ConnectionStatus::Waiting, None) as usize
            }
            WorkflowEvent::Queued(payload) => {
                let selection = select(
                    graph,
                    &payload.connection_id,
                    Some(payload.trigger_mode),
                    payload.target_pod_id.as_deref(),
                );
                move_selection(graph, selection, ConnectionStatus::Queued, |_| true)
            }
            WorkflowEvent::QueueProcessed(payload) => {
                let selection = select(
                    graph,
                    &payload.connection_id,
                    Some(payload.trigger_mode),
                    payload.target_pod_id.as_deref(),
                );
                move_selection(graph, selection, ConnectionStatus::Active, |conn| {
                    can_fire(conn) || conn.status == ConnectionStatus::Queued
                })
            }
            WorkflowEvent::Complete(payload) => {
                let selection = select(
                    graph,
                    &payload.connection_id,
                    Some(payload.trigger_mode),
                    payload.target_pod_id.as_deref(),
                );
                move_selection(graph, selection, ConnectionStatus::Idle, |_| true)
            }
            WorkflowEvent::AiDecidePending(payload) => payload
                .connection_ids
                .iter()
                .filter(|id| graph.set_status(id, ConnectionStatus::AiDeciding, None))
                .count(),
            WorkflowEvent::AiDecideResult(payload) => {
                let (status, reason) = if payload.should_trigger {
                    (ConnectionStatus::AiApproved, None)
                } else {
                    (ConnectionStatus::AiRejected, payload.reason.clone())
                };
                graph.set_status(&payload.connection_id, status, reason) as usize
            }
            WorkflowEvent::AiDecideError(payload) => graph.set_status(
                &payload.connection_id,
                ConnectionStatus::AiError,
                Some(payload.error.clone()),
            ) as usize,
            WorkflowEvent::AiDecideClear(payload) => payload
                .connection_ids
                .iter()
                .filter(|id| graph.set_status(id, ConnectionStatus::Idle, None))
                .count(),
        };
        if changed > 0 {
            info!(event = "workflow_transition", name = event.name(), changed = changed);
        } else {
            debug!(event = "workflow_transition_noop", name = event.name());
        }
        changed
    }

    pub fn handle_frame(&self, graph: &mut ConnectionGraph, frame: &SocketFrame) -> usize {
        match WorkflowEvent::parse(&frame.event, &frame.payload) {
            Ok(Some(event)) => self.transition(graph, &event),
            Ok(None) => 0,
            Err(err) => {
                warn!(event = "workflow_payload_invalid", name = %frame.event, error = %err);
                0
            }
        }
    }

    pub fn setup_listeners(&mut self, channel: &dyn EventChannel) -> bool {
        self.inbox.subscribe(channel, &WORKFLOW_EVENTS)
    }

    pub fn cleanup_listeners(&mut self, channel: &dyn EventChannel) -> bool {
        self.inbox.unsubscribe(channel)
    }

    pub fn is_listening(&self) -> bool {
        self.inbox.is_listening()
    }

    /// Applies queued lifecycle events in arrival order. Returns how many were applied.
    pub fn pump(&mut self, graph: &mut ConnectionGraph) -> usize {
        let mut applied = 0;
        while let Some(frame) = self.inbox.try_next() {
            self.handle_frame(graph, &frame);
            applied += 1;
        }
        applied
    }
}

fn move_selection<F>(
    graph: &mut ConnectionGraph,
    selection: Selection<'_>,
    status: ConnectionStatus,
    eligible: F,
) -> usize
where
    F: Fn(&Connection) -> bool,
{
    match selection {
        Selection::ByTarget(target) => graph.transition_by_target(&target, status, eligible),
        Selection::Named(connection_id) => graph.set_status(connection_id, status, None) as usize,
        Selection::Unknown => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalEventBus;
    use crate::graph::test_support::connection;
    use serde_json::json;

    fn graph() -> ConnectionGraph {
        let mut graph = ConnectionGraph::new("canvas-1");
        graph.apply_created(connection("auto1", "pod-a", "pod-x", TriggerMode::Auto));
        graph.apply_created(connection("auto2", "pod-b", "pod-x", TriggerMode::Auto));
        graph.apply_created(connection("ai1", "pod-c", "pod-x", TriggerMode::AiDecide));
        graph.apply_created(connection("direct1", "pod-d", "pod-x", TriggerMode::Direct));
        graph.apply_created(connection("other", "pod-a", "pod-y", TriggerMode::Auto));
        graph
    }

    fn status(graph: &ConnectionGraph, id: &str) -> ConnectionStatus {
        graph.get(id).map(|conn| conn.status).unwrap_or_default()
    }

    fn apply(machine: &WorkflowStateMachine, graph: &mut ConnectionGraph, event: &str, payload: Value) -> usize {
        machine.handle_frame(graph, &SocketFrame::new(event, payload))
    }

    #[test]
    fn auto_trigger_fans_out_to_every_fan_out_edge_of_the_target() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        let changed = apply(&machine, &mut graph, WORKFLOW_AUTO_TRIGGERED, json!({"connectionId": "auto1"}));
        assert_eq!(changed, 3);
        for id in ["auto1", "auto2", "ai1"] {
            assert_eq!(status(&graph, id), ConnectionStatus::Active);
        }
        assert_eq!(status(&graph, "direct1"), ConnectionStatus::Idle);
        assert_eq!(status(&graph, "other"), ConnectionStatus::Idle);

        let changed = apply(&machine, &mut graph, WORKFLOW_COMPLETE, json!({"connectionId": "auto2"}));
        assert_eq!(changed, 3);
        assert_eq!(status(&graph, "auto1"), ConnectionStatus::Idle);
    }

    #[test]
    fn auto_trigger_skips_edges_that_are_not_ready() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        graph.set_status("auto2", ConnectionStatus::Waiting, None);
        graph.set_status("ai1", ConnectionStatus::AiRejected, Some("no".to_string()));

        apply(&machine, &mut graph, WORKFLOW_AUTO_TRIGGERED, json!({"connectionId": "auto1"}));
        assert_eq!(status(&graph, "auto1"), ConnectionStatus::Active);
        assert_eq!(status(&graph, "auto2"), ConnectionStatus::Waiting);
        assert_eq!(status(&graph, "ai1"), ConnectionStatus::AiRejected);
    }

    #[test]
    fn direct_events_move_only_the_named_edge() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        apply(&machine, &mut graph, WORKFLOW_DIRECT_WAITING, json!({"connectionId": "direct1"}));
        assert_eq!(status(&graph, "direct1"), ConnectionStatus::Waiting);
        apply(&machine, &mut graph, WORKFLOW_DIRECT_TRIGGERED, json!({"connectionId": "direct1"}));
        assert_eq!(status(&graph, "direct1"), ConnectionStatus::Active);
        assert_eq!(status(&graph, "auto1"), ConnectionStatus::Idle);

        let changed = apply(
            &machine,
            &mut graph,
            WORKFLOW_COMPLETE,
            json!({"connectionId": "direct1", "triggerMode": "direct"}),
        );
        assert_eq!(changed, 1);
        assert_eq!(status(&graph, "direct1"), ConnectionStatus::Idle);
    }

    #[test]
    fn queued_auto_edge_moves_siblings_but_not_direct_edge() {
        let machine = WorkflowStateMachine::new();
        let mut graph = ConnectionGraph::new("canvas-1");
        graph.apply_created(connection("C_auto1", "pod-a", "X", TriggerMode::Auto));
        graph.apply_created(connection("C_auto2", "pod-b", "X", TriggerMode::Auto));
        graph.apply_created(connection("C_direct", "pod-c", "X", TriggerMode::Direct));
        graph.set_status("C_direct", ConnectionStatus::Waiting, None);

        apply(
            &machine,
            &mut graph,
            WORKFLOW_QUEUED,
            json!({"connectionId": "C_auto1", "triggerMode": "auto", "position": 1, "queueSize": 2}),
        );
        assert_eq!(status(&graph, "C_auto1"), ConnectionStatus::Queued);
        assert_eq!(status(&graph, "C_auto2"), ConnectionStatus::Queued);
        assert_eq!(status(&graph, "C_direct"), ConnectionStatus::Waiting);

        apply(
            &machine,
            &mut graph,
            WORKFLOW_QUEUE_PROCESSED,
            json!({"connectionId": "C_auto1", "triggerMode": "auto"}),
        );
        assert_eq!(status(&graph, "C_auto1"), ConnectionStatus::Active);
        assert_eq!(status(&graph, "C_auto2"), ConnectionStatus::Active);
        assert_eq!(status(&graph, "C_direct"), ConnectionStatus::Waiting);
    }

    #[test]
    fn stored_trigger_mode_wins_over_payload_default() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        apply(&machine, &mut graph, WORKFLOW_QUEUED, json!({"connectionId": "direct1"}));
        assert_eq!(status(&graph, "direct1"), ConnectionStatus::Queued);
        assert_eq!(status(&graph, "auto1"), ConnectionStatus::Idle);
    }

    #[test]
    fn ai_decide_lifecycle() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        let changed = apply(
            &machine,
            &mut graph,
            WORKFLOW_AI_DECIDE_PENDING,
            json!({"connectionIds": ["ai1", "auto1", "missing"]}),
        );
        assert_eq!(changed, 2);
        assert_eq!(status(&graph, "ai1"), ConnectionStatus::AiDeciding);

        apply(
            &machine,
            &mut graph,
            WORKFLOW_AI_DECIDE_RESULT,
            json!({"connectionId": "ai1", "shouldTrigger": false, "reason": "off topic"}),
        );
        let ai1 = graph.get("ai1").expect("ai1");
        assert_eq!(ai1.status, ConnectionStatus::AiRejected);
        assert_eq!(ai1.decide_reason.as_deref(), Some("off topic"));

        apply(
            &machine,
            &mut graph,
            WORKFLOW_AI_DECIDE_ERROR,
            json!({"connectionId": "auto1", "error": "model unavailable"}),
        );
        assert_eq!(
            graph.get("auto1").and_then(|conn| conn.decide_reason.as_deref()),
            Some("model unavailable")
        );

        apply(
            &machine,
            &mut graph,
            WORKFLOW_AI_DECIDE_RESULT,
            json!({"connectionId": "ai1", "shouldTrigger": true, "reason": "relevant"}),
        );
        let ai1 = graph.get("ai1").expect("ai1");
        assert_eq!(ai1.status, ConnectionStatus::AiApproved);
        assert_eq!(ai1.decide_reason, None);

        apply(
            &machine,
            &mut graph,
            WORKFLOW_AI_DECIDE_CLEAR,
            json!({"connectionIds": ["ai1", "auto1"]}),
        );
        assert_eq!(status(&graph, "ai1"), ConnectionStatus::Idle);
        assert_eq!(graph.get("auto1").and_then(|conn| conn.decide_reason.clone()), None);
    }

    #[test]
    fn approved_edge_fires_with_its_siblings() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        graph.set_status("ai1", ConnectionStatus::AiApproved, None);
        apply(&machine, &mut graph, WORKFLOW_AUTO_TRIGGERED, json!({"connectionId": "ai1"}));
        assert_eq!(status(&graph, "ai1"), ConnectionStatus::Active);
        assert_eq!(status(&graph, "auto2"), ConnectionStatus::Active);
    }

    #[test]
    fn malformed_and_unknown_events_change_nothing() {
        let machine = WorkflowStateMachine::new();
        let mut graph = graph();
        let revision = graph.revision();
        assert_eq!(apply(&machine, &mut graph, WORKFLOW_QUEUED, json!({"position": 1})), 0);
        assert_eq!(apply(&machine, &mut graph, "workflow:unknown", json!({})), 0);
        assert_eq!(
            apply(&machine, &mut graph, WORKFLOW_DIRECT_TRIGGERED, json!({"connectionId": "missing"})),
            0
        );
        assert_eq!(graph.revision(), revision);
    }

    #[test]
    fn listeners_are_idempotent_and_pump_applies_in_order() {
        let bus = LocalEventBus::new();
        let mut machine = WorkflowStateMachine::new();
        let mut graph = graph();
        assert!(machine.setup_listeners(&bus));
        assert!(!machine.setup_listeners(&bus));
        assert_eq!(bus.listener_count(WORKFLOW_QUEUED), 1);

        bus.deliver(WORKFLOW_DIRECT_WAITING, &json!({"connectionId": "direct1"}));
        bus.deliver(WORKFLOW_DIRECT_TRIGGERED, &json!({"connectionId": "direct1"}));
        assert_eq!(machine.pump(&mut graph), 2);
        assert_eq!(status(&graph, "direct1"), ConnectionStatus::Active);

        assert!(machine.cleanup_listeners(&bus));
        assert!(machine.setup_listeners(&bus));
        assert_eq!(bus.listener_count(WORKFLOW_QUEUED), 1);
    }
}
