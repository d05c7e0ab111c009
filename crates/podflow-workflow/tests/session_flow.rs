use podflow_core::events::{
    CONNECTION_CREATE, CONNECTION_CREATED, POD_DELETED, REPOSITORY_CLONE, REPOSITORY_CLONE_PROGRESS,
    REPOSITORY_CLONE_RESULT, WORKFLOW_AUTO_TRIGGERED, WORKFLOW_COMPLETE, WORKFLOW_QUEUED,
};
use podflow_core::payloads::{CloneRequest, PullRequest};
use podflow_core::{Anchor, ConnectionStatus, Repository, SocketFrame, TriggerMode};
use podflow_workflow::{
    CanvasSession, InMemoryRepositoryStore, LocalEventBus, NewConnection, Notifier, RequestConfig,
    SessionConfig, SessionDeps, SocketConnectionBackend, SocketRequester, TaskStatus,
    TIMEOUT_MESSAGE,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct ToastLog {
    entries: Mutex<Vec<(bool, String, String)>>,
}

impl ToastLog {
    fn entries(&self) -> Vec<(bool, String, String)> {
        self.entries.lock().expect("toast lock").clone()
    }
}

impl Notifier for ToastLog {
    fn show_success_toast(&self, _category: &str, title: &str, detail: &str) {
        self.entries
            .lock()
            .expect("toast lock")
            .push((true, title.to_string(), detail.to_string()));
    }

    fn show_error_toast(&self, _category: &str, title: &str, detail: &str) {
        self.entries
            .lock()
            .expect("toast lock")
            .push((false, title.to_string(), detail.to_string()));
    }
}

/// Answers connection creates and clones the way the backend does. Pulls go unanswered.
fn spawn_fake_backend(bus: LocalEventBus, mut outbound: mpsc::UnboundedReceiver<SocketFrame>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut created = 0;
        while let Some(frame) = outbound.recv().await {
            let request_id = frame.request_id().unwrap_or_default().to_string();
            match frame.event.as_str() {
                CONNECTION_CREATE => {
                    created += 1;
                    let mut connection = frame.payload.clone();
                    connection["id"] = json!(format!("conn-{created}"));
                    bus.deliver(
                        CONNECTION_CREATED,
                        &json!({"requestId": request_id, "success": true, "connection": connection}),
                    );
                }
                REPOSITORY_CLONE => {
                    bus.deliver(
                        REPOSITORY_CLONE_PROGRESS,
                        &json!({"requestId": request_id, "progress": 40, "message": "Receiving objects"}),
                    );
                    bus.deliver(
                        REPOSITORY_CLONE_RESULT,
                        &json!({"requestId": request_id, "success": true, "repositoryId": "repo-9"}),
                    );
                }
                _ => {}
            }
        }
    })
}

struct Harness {
    bus: LocalEventBus,
    session: CanvasSession,
    toasts: Arc<ToastLog>,
    repositories: Arc<InMemoryRepositoryStore>,
    _server: JoinHandle<()>,
}

fn harness() -> Harness {
    let (tx, rx) = mpsc::unbounded_channel();
    let bus = LocalEventBus::with_outbound(tx);
    bus.set_connected(true);
    let server = spawn_fake_backend(bus.clone(), rx);

    let toasts = Arc::new(ToastLog::default());
    let repositories = Arc::new(InMemoryRepositoryStore::new(vec![Repository {
        id: "repo-1".to_string(),
        name: "api".to_string(),
        current_branch: Some("main".to_string()),
    }]));
    let requester = SocketRequester::new(Arc::new(bus.clone()), RequestConfig::default());
    let deps = SessionDeps {
        channel: Arc::new(bus.clone()),
        backend: Arc::new(SocketConnectionBackend::new(requester)),
        notifier: toasts.clone(),
        repositories: repositories.clone(),
    };
    let mut session = CanvasSession::new("canvas-1", deps, SessionConfig::default());
    session.setup_listeners();
    Harness {
        bus,
        session,
        toasts,
        repositories,
        _server: server,
    }
}

fn status(session: &CanvasSession, id: &str) -> Option<ConnectionStatus> {
    session.graph().get(id).map(|conn| conn.status)
}

#[tokio::test]
async fn connections_created_over_socket_follow_workflow_events() {
    let mut h = harness();
    for (source, mode) in [
        ("pod-a", TriggerMode::Auto),
        ("pod-b", TriggerMode::Auto),
        ("pod-c", TriggerMode::Direct),
    ] {
        let result = h
            .session
            .create_connection(
                NewConnection::between(source, Anchor::Right, "pod-x", Anchor::Left)
                    .with_trigger_mode(mode),
            )
            .await;
        assert!(result.success, "create failed: {:?}", result.error);
    }
    h.session.pump();
    assert_eq!(h.session.graph().len(), 3);
    assert_eq!(
        h.session.graph().get("conn-3").map(|conn| conn.trigger_mode),
        Some(TriggerMode::Direct)
    );

    let self_loop = h
        .session
        .create_connection(NewConnection::between("pod-x", Anchor::Top, "pod-x", Anchor::Bottom))
        .await;
    assert!(!self_loop.success);

    h.bus.deliver(
        WORKFLOW_QUEUED,
        &json!({"connectionId": "conn-1", "triggerMode": "auto"}),
    );
    h.session.pump();
    assert_eq!(status(&h.session, "conn-1"), Some(ConnectionStatus::Queued));
    assert_eq!(status(&h.session, "conn-2"), Some(ConnectionStatus::Queued));
    assert_eq!(status(&h.session, "conn-3"), Some(ConnectionStatus::Idle));

    h.bus.deliver(WORKFLOW_COMPLETE, &json!({"connectionId": "conn-2"}));
    h.bus.deliver(WORKFLOW_AUTO_TRIGGERED, &json!({"connectionId": "conn-1"}));
    h.session.pump();
    assert_eq!(status(&h.session, "conn-1"), Some(ConnectionStatus::Active));
    assert_eq!(status(&h.session, "conn-2"), Some(ConnectionStatus::Active));

    h.bus.deliver(POD_DELETED, &json!({"podId": "pod-x"}));
    h.session.pump();
    assert!(h.session.graph().is_empty());
}

#[tokio::test]
async fn clone_round_trip_completes_and_reloads_repositories() {
    let mut h = harness();
    let started = h.session.start_clone(CloneRequest {
        request_id: "clone-1".to_string(),
        repository_url: "https://github.com/acme/widgets.git".to_string(),
        branch: None,
    });
    assert!(started.success);

    for _ in 0..100 {
        tokio::task::yield_now().await;
        h.session.pump();
        let done = h
            .session
            .clones()
            .get("clone-1")
            .map(|task| task.status.is_terminal())
            .unwrap_or(false);
        if done {
            break;
        }
    }

    let task = h.session.clones().get("clone-1").expect("clone task");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(h.repositories.reload_requests(), 1);
    assert_eq!(
        h.toasts.entries(),
        vec![(true, "Clone succeeded".to_string(), "widgets is ready".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_pull_times_out_then_disappears() {
    let mut h = harness();
    let started = h.session.start_pull(
        PullRequest {
            request_id: "pull-1".to_string(),
            repository_id: "repo-1".to_string(),
        },
        "api",
    );
    assert!(started.success);
    assert_eq!(h.session.progress_tasks()[0].status, "processing");

    tokio::time::advance(Duration::from_secs(60)).await;
    h.session.poll_timers();
    let task = h.session.pulls().get("pull-1").expect("pull task");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.message, TIMEOUT_MESSAGE);
    assert_eq!(h.toasts.entries().len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    h.session.poll_timers();
    assert!(h.session.progress_tasks().is_empty());
    assert!(h.session.next_deadline().is_none());
    assert_eq!(
        h.repositories.repositories()[0].current_branch.as_deref(),
        Some("main")
    );
}
