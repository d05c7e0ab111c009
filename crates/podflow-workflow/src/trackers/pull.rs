use super::messages::pull_error_message;
use super::GIT_TOAST_CATEGORY;
use crate::channel::{ChannelError, EventChannel};
use crate::collaborators::Notifier;
use crate::registry::{Task, TaskRegistry, TrackerSpec};
use podflow_core::events::{REPOSITORY_PULL, REPOSITORY_PULL_PROGRESS, REPOSITORY_PULL_RESULT};
use podflow_core::payloads::{PullProgressPayload, PullRequest, PullResultPayload};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullIdentity {
    pub repository_id: String,
    pub repository_name: String,
}

/// Pull tasks are always registered by the caller before the request is sent;
/// progress for an unknown request is dropped.
pub struct PullTracker {
    notifier: Arc<dyn Notifier>,
}

pub type PullRegistry = TaskRegistry<PullTracker>;

impl PullTracker {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl TrackerSpec for PullTracker {
    type Identity = PullIdentity;
    type Progress = PullProgressPayload;
    type Outcome = PullResultPayload;

    const KIND: &'static str = "pull";
    const IN_PROGRESS_LABEL: &'static str = "pulling";
    const PROGRESS_EVENT: &'static str = REPOSITORY_PULL_PROGRESS;
    const RESULT_EVENT: &'static str = REPOSITORY_PULL_RESULT;

    fn create_task(&self, _payload: &PullProgressPayload) -> Option<Task<PullIdentity>> {
        None
    }

    fn update_task(&self, task: &mut Task<PullIdentity>, payload: &PullProgressPayload) {
        task.progress = payload.progress;
        task.message = payload.message.clone();
    }

    fn on_result(&self, task: &mut Task<PullIdentity>, payload: &PullResultPayload) {
        if !payload.success {
            self.on_failure(task, pull_error_message(payload.error.as_deref()));
            return;
        }
        task.complete("Pull complete");
        let detail = match &payload.branch_name {
            Some(branch) => format!("{} ({branch}) is up to date", task.identity.repository_name),
            None => format!("{} is up to date", task.identity.repository_name),
        };
        self.notifier
            .show_success_toast(GIT_TOAST_CATEGORY, "Pull succeeded", &detail);
    }

    fn on_failure(&self, task: &mut Task<PullIdentity>, message: String) {
        self.notifier
            .show_error_toast(GIT_TOAST_CATEGORY, "Pull failed", &message);
        task.fail(message);
    }

    fn title(&self, task: &Task<PullIdentity>) -> String {
        format!("Pull {}", task.identity.repository_name)
    }
}

impl TaskRegistry<PullTracker> {
    pub fn start_pull(
        &mut self,
        channel: &dyn EventChannel,
        request: PullRequest,
        repository_name: &str,
    ) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_value(&request).map_err(|err| ChannelError::Encode(err.to_string()))?;
        let identity = PullIdentity {
            repository_id: request.repository_id.clone(),
            repository_name: repository_name.to_string(),
        };
        self.add_task(
            &request.request_id,
            Task::new(&request.request_id, identity, "Preparing pull"),
        );
        if let Err(err) = channel.emit(REPOSITORY_PULL, payload) {
            self.fail_task(&request.request_id, err.to_string());
            return Err(err);
        }
        Ok(())
    }
}
