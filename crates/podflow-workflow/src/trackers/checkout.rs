use super::messages::checkout_error_message;
use super::GIT_TOAST_CATEGORY;
use crate::channel::{ChannelError, EventChannel};
use crate::collaborators::{Notifier, RepositoryStore};
use crate::registry::{Task, TaskRegistry, TrackerSpec};
use podflow_core::events::{
    REPOSITORY_CHECKOUT, REPOSITORY_CHECKOUT_PROGRESS, REPOSITORY_CHECKOUT_RESULT,
};
use podflow_core::payloads::{CheckoutProgressPayload, CheckoutRequest, CheckoutResultPayload};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckoutIdentity {
    pub repository_id: String,
    pub branch_name: String,
}

impl CheckoutIdentity {
    pub fn new(branch_name: impl Into<String>, repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            branch_name: branch_name.into(),
        }
    }
}

pub struct CheckoutTracker {
    notifier: Arc<dyn Notifier>,
    repositories: Arc<dyn RepositoryStore>,
}

pub type CheckoutRegistry = TaskRegistry<CheckoutTracker>;

impl CheckoutTracker {
    pub fn new(notifier: Arc<dyn Notifier>, repositories: Arc<dyn RepositoryStore>) -> Self {
        Self {
            notifier,
            repositories,
        }
    }
}

fn success_detail(action: Option<&str>, branch: &str) -> String {
    match action {
        Some("created") => format!("Created and switched to {branch}"),
        Some("fetched") => format!("Fetched and switched to {branch}"),
        _ => format!("Switched to {branch}"),
    }
}

impl TrackerSpec for CheckoutTracker {
    type Identity = CheckoutIdentity;
    type Progress = CheckoutProgressPayload;
    type Outcome = CheckoutResultPayload;

    const KIND: &'static str = "checkout";
    const IN_PROGRESS_LABEL: &'static str = "checking-out";
    const PROGRESS_EVENT: &'static str = REPOSITORY_CHECKOUT_PROGRESS;
    const RESULT_EVENT: &'static str = REPOSITORY_CHECKOUT_RESULT;

    fn create_task(&self, payload: &CheckoutProgressPayload) -> Option<Task<CheckoutIdentity>> {
        let identity = CheckoutIdentity {
            repository_id: payload.repository_id.clone().unwrap_or_default(),
            branch_name: payload.branch_name.clone().unwrap_or_default(),
        };
        Some(Task::new(&payload.request_id, identity, "Preparing checkout"))
    }

    fn update_task(&self, task: &mut Task<CheckoutIdentity>, payload: &CheckoutProgressPayload) {
        task.progress = payload.progress;
        task.message = payload.message.clone();
        if task.identity.branch_name.is_empty() {
            if let Some(branch) = &payload.branch_name {
                task.identity.branch_name = branch.clone();
            }
        }
        if task.identity.repository_id.is_empty() {
            if let Some(repository_id) = &payload.repository_id {
                task.identity.repository_id = repository_id.clone();
            }
        }
    }

    fn on_result(&self, task: &mut Task<CheckoutIdentity>, payload: &CheckoutResultPayload) {
        if !payload.success {
            self.on_failure(task, checkout_error_message(payload.error.as_deref()));
            return;
        }
        let branch = payload
            .branch_name
            .clone()
            .unwrap_or_else(|| task.identity.branch_name.clone());
        let repository_id = payload
            .repository_id
            .clone()
            .unwrap_or_else(|| task.identity.repository_id.clone());
        let detail = success_detail(payload.action.as_deref(), &branch);
        task.complete(detail.clone());

        if !self.repositories.set_current_branch(&repository_id, &branch) {
            warn!(
                event = "checkout_repository_missing",
                repository_id = %repository_id,
                branch = %branch
            );
        }
        self.notifier
            .show_success_toast(GIT_TOAST_CATEGORY, "Checkout succeeded", &detail);
    }

    fn on_failure(&self, task: &mut Task<CheckoutIdentity>, message: String) {
        self.notifier
            .show_error_toast(GIT_TOAST_CATEGORY, "Checkout failed", &message);
        task.fail(message);
    }

    fn title(&self, task: &Task<CheckoutIdentity>) -> String {
        format!("Checkout {}", task.identity.branch_name)
    }
}

impl TaskRegistry<CheckoutTracker> {
    pub fn start_checkout(
        &mut self,
        channel: &dyn EventChannel,
        request: CheckoutRequest,
    ) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_value(&request).map_err(|err| ChannelError::Encode(err.to_string()))?;
        let identity = CheckoutIdentity::new(&request.branch_name, &request.repository_id);
        self.add_task(
            &request.request_id,
            Task::new(&request.request_id, identity, "Preparing checkout"),
        );
        if let Err(err) = channel.emit(REPOSITORY_CHECKOUT, payload) {
            self.fail_task(&request.request_id, err.to_string());
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryRepositoryStore;
    use crate::registry::{TaskStatus, PROCESSING_STATUS, TIMEOUT_MESSAGE};
    use crate::trackers::test_support::RecordingNotifier;
    use podflow_core::Repository;
    use serde_json::json;
    use std::time::Duration;

    fn tracker() -> (
        CheckoutRegistry,
        Arc<RecordingNotifier>,
        Arc<InMemoryRepositoryStore>,
    ) {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(InMemoryRepositoryStore::new(vec![Repository {
            id: "repo-1".to_string(),
            name: "api".to_string(),
            current_branch: Some("main".to_string()),
        }]));
        let registry = TaskRegistry::new(CheckoutTracker::new(notifier.clone(), store.clone()));
        (registry, notifier, store)
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_success_patches_branch_and_clears_after_one_second() {
        let (mut checkouts, notifier, store) = tracker();
        checkouts.add_task(
            "r1",
            Task::new("r1", CheckoutIdentity::new("feature", "repo-1"), "Preparing checkout"),
        );
        checkouts.handle_value(
            REPOSITORY_CHECKOUT_PROGRESS,
            json!({"requestId": "r1", "progress": 50, "message": "Switching"}),
        );
        assert_eq!(checkouts.progress_tasks()[0].status, PROCESSING_STATUS);

        checkouts.handle_value(
            REPOSITORY_CHECKOUT_RESULT,
            json!({"requestId": "r1", "success": true, "action": "fetched"}),
        );
        let task = checkouts.get("r1").expect("task");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.message, "Fetched and switched to feature");
        assert_eq!(
            store.repositories()[0].current_branch.as_deref(),
            Some("feature")
        );
        assert_eq!(notifier.toasts()[0].detail, "Fetched and switched to feature");

        tokio::time::advance(Duration::from_millis(1_000)).await;
        checkouts.poll_timers();
        assert!(checkouts.get("r1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_silence_times_out_then_clears() {
        let (mut checkouts, notifier, store) = tracker();
        checkouts.add_task(
            "r1",
            Task::new("r1", CheckoutIdentity::new("feature", "repo-1"), "Preparing checkout"),
        );

        tokio::time::advance(Duration::from_millis(60_000)).await;
        checkouts.poll_timers();
        let task = checkouts.get("r1").expect("task");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.message, TIMEOUT_MESSAGE);
        assert_eq!(checkouts.to_view_model(task).status, "failed");
        assert_eq!(notifier.toasts().len(), 1);
        assert_eq!(
            store.repositories()[0].current_branch.as_deref(),
            Some("main")
        );

        tokio::time::advance(Duration::from_millis(2_000)).await;
        checkouts.poll_timers();
        assert!(checkouts.is_empty());
    }

    #[test]
    fn progress_before_registration_synthesizes_task() {
        let (mut checkouts, _, _) = tracker();
        checkouts.handle_value(
            REPOSITORY_CHECKOUT_PROGRESS,
            json!({"requestId": "r9", "progress": 10, "message": "Fetching", "repositoryId": "repo-1", "branchName": "dev"}),
        );
        let task = checkouts.get("r9").expect("synthesized");
        assert_eq!(task.identity, CheckoutIdentity::new("dev", "repo-1"));
        assert_eq!(checkouts.to_view_model(task).title, "Checkout dev");
        assert_eq!(checkouts.to_view_model(task).status, PROCESSING_STATUS);
    }

    #[test]
    fn invalid_ref_failure_maps_message_and_keeps_branch() {
        let (mut checkouts, notifier, store) = tracker();
        checkouts.add_task(
            "r1",
            Task::new("r1", CheckoutIdentity::new("nope", "repo-1"), "Preparing checkout"),
        );
        checkouts.handle_value(
            REPOSITORY_CHECKOUT_RESULT,
            json!({"requestId": "r1", "success": false, "error": "fatal: invalid reference: nope"}),
        );
        let task = checkouts.get("r1").expect("task");
        assert_eq!(task.message, "Branch does not exist");
        assert_eq!(
            store.repositories()[0].current_branch.as_deref(),
            Some("main")
        );
        assert_eq!(notifier.toasts()[0].title, "Checkout failed");
    }

    #[test]
    fn success_detail_reflects_action() {
        assert_eq!(success_detail(Some("created"), "x"), "Created and switched to x");
        assert_eq!(success_detail(Some("switched"), "x"), "Switched to x");
        assert_eq!(success_detail(None, "x"), "Switched to x");
    }
}
