//! Workflow coordination for a pod canvas: connection graph, trigger state
//! machine and the tracked git operations, all driven by socket events.

pub mod backend;
pub mod channel;
pub mod collaborators;
pub mod graph;
pub mod registry;
pub mod request;
pub mod session;
pub mod timer;
pub mod trackers;
pub mod workflow;

pub use backend::{ConnectionBackend, SocketConnectionBackend};
pub use channel::{ChannelError, EventChannel, EventHandler, Inbox, ListenerId, LocalEventBus};
pub use collaborators::{InMemoryRepositoryStore, Notifier, RepositoryStore, TracingNotifier};
pub use graph::{ConnectionError, ConnectionGraph, DraggingConnection, NewConnection, Point};
pub use registry::{
    Correlated, ProgressTask, Task, TaskRegistry, TaskStatus, TrackerSpec, TrackerTimings,
    PROCESSING_STATUS, TIMEOUT_MESSAGE,
};
pub use request::{OperationResult, RequestConfig, RequestError, SocketRequester};
pub use session::{CanvasSession, SessionConfig, SessionDeps};
pub use workflow::{WorkflowEvent, WorkflowStateMachine};
