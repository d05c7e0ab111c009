use super::messages::clone_error_message;
use super::GIT_TOAST_CATEGORY;
use crate::channel::{ChannelError, EventChannel};
use crate::collaborators::{Notifier, RepositoryStore};
use crate::registry::{Task, TaskRegistry, TrackerSpec};
use podflow_core::events::{REPOSITORY_CLONE, REPOSITORY_CLONE_PROGRESS, REPOSITORY_CLONE_RESULT};
use podflow_core::payloads::{CloneProgressPayload, CloneRequest, CloneResultPayload};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloneIdentity {
    pub repo_name: String,
}

pub struct CloneTracker {
    notifier: Arc<dyn Notifier>,
    repositories: Arc<dyn RepositoryStore>,
}

pub type CloneRegistry = TaskRegistry<CloneTracker>;

impl CloneTracker {
    pub fn new(notifier: Arc<dyn Notifier>, repositories: Arc<dyn RepositoryStore>) -> Self {
        Self {
            notifier,
            repositories,
        }
    }
}

impl TrackerSpec for CloneTracker {
    type Identity = CloneIdentity;
    type Progress = CloneProgressPayload;
    type Outcome = CloneResultPayload;

    const KIND: &'static str = "clone";
    const IN_PROGRESS_LABEL: &'static str = "cloning";
    const PROGRESS_EVENT: &'static str = REPOSITORY_CLONE_PROGRESS;
    const RESULT_EVENT: &'static str = REPOSITORY_CLONE_RESULT;

    fn create_task(&self, payload: &CloneProgressPayload) -> Option<Task<CloneIdentity>> {
        let identity = CloneIdentity {
            repo_name: payload.repo_name.clone().unwrap_or_default(),
        };
        Some(Task::new(&payload.request_id, identity, "Preparing clone"))
    }

    fn update_task(&self, task: &mut Task<CloneIdentity>, payload: &CloneProgressPayload) {
        task.progress = payload.progress;
        task.message = payload.message.clone();
        if task.identity.repo_name.is_empty() {
            if let Some(name) = &payload.repo_name {
                task.identity.repo_name = name.clone();
            }
        }
    }

    fn on_result(&self, task: &mut Task<CloneIdentity>, payload: &CloneResultPayload) {
        if let Some(name) = payload.repo_name.as_ref().filter(|name| !name.is_empty()) {
            task.identity.repo_name = name.clone();
        }
        if !payload.success {
            self.on_failure(task, clone_error_message(payload.error.as_deref()));
            return;
        }
        task.complete("Clone complete");
        let detail = if task.identity.repo_name.is_empty() {
            "Repository is ready".to_string()
        } else {
            format!("{} is ready", task.identity.repo_name)
        };
        self.notifier
            .show_success_toast(GIT_TOAST_CATEGORY, "Clone succeeded", &detail);
        self.repositories.load_repositories();
    }

    fn on_failure(&self, task: &mut Task<CloneIdentity>, message: String) {
        self.notifier
            .show_error_toast(GIT_TOAST_CATEGORY, "Clone failed", &message);
        task.fail(message);
    }

    fn title(&self, task: &Task<CloneIdentity>) -> String {
        if task.identity.repo_name.is_empty() {
            "Clone repository".to_string()
        } else {
            format!("Clone {}", task.identity.repo_name)
        }
    }
}

impl TaskRegistry<CloneTracker> {
    /// Pre-registers the task, then asks the backend to clone.
    pub fn start_clone(
        &mut self,
        channel: &dyn EventChannel,
        request: CloneRequest,
    ) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_value(&request).map_err(|err| ChannelError::Encode(err.to_string()))?;
        let identity = CloneIdentity {
            repo_name: repo_name_from_url(&request.repository_url),
        };
        self.add_task(
            &request.request_id,
            Task::new(&request.request_id, identity, "Preparing clone"),
        );
        if let Err(err) = channel.emit(REPOSITORY_CLONE, payload) {
            self.fail_task(&request.request_id, err.to_string());
            return Err(err);
        }
        Ok(())
    }
}

/// Last path segment of a git URL without the `.git` suffix.
pub(crate) fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(|ch| ch == '/' || ch == ':')
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}
