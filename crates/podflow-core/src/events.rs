//! Socket event names shared by the client and the backend.

pub const CONNECTION_CREATE: &str = "connection:create";
pub const CONNECTION_CREATED: &str = "connection:created";
pub const CONNECTION_UPDATE: &str = "connection:update";
pub const CONNECTION_UPDATED: &str = "connection:updated";
pub const CONNECTION_DELETE: &str = "connection:delete";
pub const CONNECTION_DELETED: &str = "connection:deleted";
pub const CONNECTION_LIST: &str = "connection:list";
pub const CONNECTION_LIST_RESULT: &str = "connection:list:result";

pub const POD_DELETED: &str = "pod:deleted";

pub const REPOSITORY_CLONE: &str = "repository:clone";
pub const REPOSITORY_CLONE_PROGRESS: &str = "repository:clone:progress";
pub const REPOSITORY_CLONE_RESULT: &str = "repository:clone:result";
pub const REPOSITORY_PULL: &str = "repository:pull";
pub const REPOSITORY_PULL_PROGRESS: &str = "repository:pull:progress";
pub const REPOSITORY_PULL_RESULT: &str = "repository:pull:result";
pub const REPOSITORY_CHECKOUT: &str = "repository:checkout";
pub const REPOSITORY_CHECKOUT_PROGRESS: &str = "repository:checkout:progress";
pub const REPOSITORY_CHECKOUT_RESULT: &str = "repository:checkout:result";

pub const WORKFLOW_AUTO_TRIGGERED: &str = "workflow:auto-triggered";
pub const WORKFLOW_DIRECT_TRIGGERED: &str = "workflow:direct-triggered";
pub const WORKFLOW_DIRECT_WAITING: &str = "workflow:direct-waiting";
pub const WORKFLOW_QUEUED: &str = "workflow:queued";
pub const WORKFLOW_QUEUE_PROCESSED: &str = "workflow:queue-processed";
pub const WORKFLOW_COMPLETE: &str = "workflow:complete";
pub const WORKFLOW_AI_DECIDE_PENDING: &str = "workflow:ai-decide-pending";
pub const WORKFLOW_AI_DECIDE_RESULT: &str = "workflow:ai-decide-result";
pub const WORKFLOW_AI_DECIDE_ERROR: &str = "workflow:ai-decide-error";
pub const WORKFLOW_AI_DECIDE_CLEAR: &str = "workflow:ai-decide-clear";

pub const WORKFLOW_EVENTS: [&str; 10] = [
    WORKFLOW_AUTO_TRIGGERED,
    WORKFLOW_DIRECT_TRIGGERED,
    WORKFLOW_DIRECT_WAITING,
    WORKFLOW_QUEUED,
    WORKFLOW_QUEUE_PROCESSED,
    WORKFLOW_COMPLETE,
    WORKFLOW_AI_DECIDE_PENDING,
    WORKFLOW_AI_DECIDE_RESULT,
    WORKFLOW_AI_DECIDE_ERROR,
    WORKFLOW_AI_DECIDE_CLEAR,
];

pub const GRAPH_EVENTS: [&str; 4] = [
    CONNECTION_CREATED,
    CONNECTION_UPDATED,
    CONNECTION_DELETED,
    POD_DELETED,
];
