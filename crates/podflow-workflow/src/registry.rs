//! Generic tracker for long-running remote operations.
//!
//! A [`TaskRegistry`] correlates `progress` and `result` socket events by
//! `requestId`, guards every task with a timeout, and removes finished tasks
//! after a short visible delay. Operation-specific behaviour lives in a
//! [`TrackerSpec`] implementation (see `trackers`).

use crate::channel::{EventChannel, Inbox};
use crate::timer::{TimerHandle, TimerQueue};
use podflow_core::SocketFrame;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const TIMEOUT_MESSAGE: &str = "operation timed out, please retry";
pub const PROCESSING_STATUS: &str = "processing";

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SUCCESS_REMOVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FAILURE_REMOVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerTimings {
    pub timeout: Duration,
    pub success_removal: Duration,
    pub failure_removal: Duration,
}

impl Default for TrackerTimings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TASK_TIMEOUT,
            success_removal: DEFAULT_SUCCESS_REMOVAL,
            failure_removal: DEFAULT_FAILURE_REMOVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }
}

/// One tracked operation. `identity` carries the operation-specific fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Task<I> {
    pub request_id: String,
    pub identity: I,
    pub progress: u8,
    pub message: String,
    pub status: TaskStatus,
}

impl<I> Task<I> {
    pub fn new(request_id: impl Into<String>, identity: I, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            identity,
            progress: 0,
            message: message.into(),
            status: TaskStatus::InProgress,
        }
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.message = message.into();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.message = message.into();
    }
}

/// Display projection handed to rendering code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTask {
    pub request_id: String,
    pub title: String,
    pub progress: u8,
    pub message: String,
    pub status: String,
}

/// Payloads that carry the correlating `requestId`.
pub trait Correlated {
    fn request_id(&self) -> &str;
}

pub trait TrackerSpec {
    type Identity: Clone + fmt::Debug;
    type Progress: Correlated + DeserializeOwned;
    type Outcome: Correlated + DeserializeOwned;

    /// Short operation name used in logs (`clone`, `pull`, ...).
    const KIND: &'static str;
    /// Status label shown while the task runs (`cloning`, `pulling`, ...).
    const IN_PROGRESS_LABEL: &'static str;
    const PROGRESS_EVENT: &'static str;
    const RESULT_EVENT: &'static str;

    /// Builds a task for progress that arrived without pre-registration.
    /// Returning `None` drops the orphan progress.
    fn create_task(&self, payload: &Self::Progress) -> Option<Task<Self::Identity>>;

    fn update_task(&self, task: &mut Task<Self::Identity>, payload: &Self::Progress);

    /// Moves the task to a terminal state and runs success/failure side effects.
    fn on_result(&self, task: &mut Task<Self::Identity>, payload: &Self::Outcome);

    fn on_failure(&self, task: &mut Task<Self::Identity>, message: String) {
        task.fail(message);
    }

    fn on_timeout(&self, task: &mut Task<Self::Identity>) {
        self.on_failure(task, TIMEOUT_MESSAGE.to_string());
    }

    fn is_in_progress(&self, task: &Task<Self::Identity>) -> bool {
        task.status == TaskStatus::InProgress
    }

    fn title(&self, task: &Task<Self::Identity>) -> String;

    fn status_label(&self, status: TaskStatus) -> &'static str {
        match status {
            TaskStatus::InProgress => Self::IN_PROGRESS_LABEL,
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Timeout,
    Removal,
}

#[derive(Debug)]
struct Entry<I> {
    task: Task<I>,
    seq: u64,
    timeout: Option<TimerHandle>,
    removal: Option<TimerHandle>,
}

pub struct TaskRegistry<S: TrackerSpec> {
    spec: S,
    timings: TrackerTimings,
    tasks: HashMap<String, Entry<S::Identity>>,
    next_seq: u64,
    timers: TimerQueue<(String, TimerKind)>,
    inbox: Inbox,
}

impl<S: TrackerSpec> TaskRegistry<S> {
    pub fn new(spec: S) -> Self {
        Self::with_timings(spec, TrackerTimings::default())
    }

    pub fn with_timings(spec: S, timings: TrackerTimings) -> Self {
        Self {
            spec,
            timings,
            tasks: HashMap::new(),
            next_seq: 0,
            timers: TimerQueue::new(),
            inbox: Inbox::new(),
        }
    }

    pub fn spec(&self) -> &S {
        &self.spec
    }

    pub fn timings(&self) -> TrackerTimings {
        self.timings
    }

    /// Registers `task` under `request_id` and starts its timeout guard.
    /// An existing task with the same id is replaced and its timers cancelled.
    pub fn add_task(&mut self, request_id: &str, mut task: Task<S::Identity>) {
        if let Some(previous) = self.tasks.remove(request_id) {
            self.cancel_entry_timers(&previous);
            debug!(event = "task_replaced", kind = S::KIND, request_id = request_id);
        }
        task.request_id = request_id.to_string();
        let timeout = self
            .timers
            .schedule(self.timings.timeout, (request_id.to_string(), TimerKind::Timeout));
        self.next_seq += 1;
        self.tasks.insert(
            request_id.to_string(),
            Entry {
                task,
                seq: self.next_seq,
                timeout: Some(timeout),
                removal: None,
            },
        );
        info!(event = "task_registered", kind = S::KIND, request_id = request_id);
    }

    pub fn remove_task(&mut self, request_id: &str) -> Option<Task<S::Identity>> {
        let entry = self.tasks.remove(request_id)?;
        self.cancel_entry_timers(&entry);
        debug!(event = "task_removed", kind = S::KIND, request_id = request_id);
        Some(entry.task)
    }

    pub fn on_progress(&mut self, payload: &S::Progress) {
        let request_id = payload.request_id();
        if !self.tasks.contains_key(request_id) {
            let Some(task) = self.spec.create_task(payload) else {
                debug!(event = "orphan_progress_dropped", kind = S::KIND, request_id = request_id);
                return;
            };
            self.add_task(request_id, task);
        }
        let Some(entry) = self.tasks.get_mut(request_id) else {
            return;
        };
        if !self.spec.is_in_progress(&entry.task) {
            debug!(event = "terminal_progress_ignored", kind = S::KIND, request_id = request_id);
            return;
        }
        self.spec.update_task(&mut entry.task, payload);
    }

    pub fn on_result(&mut self, payload: &S::Outcome) {
        let request_id = payload.request_id();
        let Some(entry) = self.tasks.get_mut(request_id) else {
            debug!(event = "orphan_result_dropped", kind = S::KIND, request_id = request_id);
            return;
        };
        if entry.task.status.is_terminal() {
            debug!(event = "duplicate_result_ignored", kind = S::KIND, request_id = request_id);
            return;
        }
        self.spec.on_result(&mut entry.task, payload);
        let status = entry.task.status;
        info!(
            event = "task_finished",
            kind = S::KIND,
            request_id = request_id,
            status = self.spec.status_label(status)
        );
        let request_id = request_id.to_string();
        self.finish(&request_id);
    }

    /// Fails a still-running task locally, e.g. when its request never left.
    pub fn fail_task(&mut self, request_id: &str, message: impl Into<String>) {
        let Some(entry) = self.tasks.get_mut(request_id) else {
            return;
        };
        if entry.task.status.is_terminal() {
            return;
        }
        self.spec.on_failure(&mut entry.task, message.into());
        warn!(event = "task_failed_locally", kind = S::KIND, request_id = request_id);
        self.finish(request_id);
    }

    /// Cancels the timeout guard of a task that just became terminal and
    /// schedules its removal.
    fn finish(&mut self, request_id: &str) {
        let Some(entry) = self.tasks.get_mut(request_id) else {
            return;
        };
        if let Some(handle) = entry.timeout.take() {
            self.timers.cancel(handle);
        }
        let delay = match entry.task.status {
            TaskStatus::Completed => self.timings.success_removal,
            _ => self.timings.failure_removal,
        };
        if let Some(handle) = entry.removal.take() {
            self.timers.cancel(handle);
        }
        entry.removal = Some(
            self.timers
                .schedule(delay, (request_id.to_string(), TimerKind::Removal)),
        );
    }

    pub fn handle_frame(&mut self, frame: &SocketFrame) {
        if frame.event == S::PROGRESS_EVENT {
            match serde_json::from_value::<S::Progress>(frame.payload.clone()) {
                Ok(payload) => self.on_progress(&payload),
                Err(err) => warn!(event = "progress_payload_invalid", kind = S::KIND, error = %err),
            }
        } else if frame.event == S::RESULT_EVENT {
            match serde_json::from_value::<S::Outcome>(frame.payload.clone()) {
                Ok(payload) => self.on_result(&payload),
                Err(err) => warn!(event = "result_payload_invalid", kind = S::KIND, error = %err),
            }
        }
    }

    pub fn handle_value(&mut self, event: &str, payload: Value) {
        self.handle_frame(&SocketFrame::new(event, payload));
    }

    /// Applies every frame queued by the socket handlers, in arrival order.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(frame) = self.inbox.try_next() {
            self.handle_frame(&frame);
            applied += 1;
        }
        applied
    }

    pub fn poll_timers(&mut self) -> usize {
        self.poll_timers_at(Instant::now())
    }

    /// Fires every timer due at `now`. Returns how many fired.
    pub fn poll_timers_at(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some((handle, (request_id, kind))) = self.timers.pop_due(now) {
            fired += 1;
            match kind {
                TimerKind::Timeout => self.fire_timeout(&request_id, handle),
                TimerKind::Removal => self.fire_removal(&request_id, handle),
            }
        }
        fired
    }

    fn fire_timeout(&mut self, request_id: &str, handle: TimerHandle) {
        let Some(entry) = self.tasks.get_mut(request_id) else {
            return;
        };
        if entry.timeout != Some(handle) {
            return;
        }
        entry.timeout = None;
        if !self.spec.is_in_progress(&entry.task) {
            return;
        }
        self.spec.on_timeout(&mut entry.task);
        warn!(event = "task_timeout", kind = S::KIND, request_id = request_id);
        self.finish(request_id);
    }

    fn fire_removal(&mut self, request_id: &str, handle: TimerHandle) {
        let matches = self
            .tasks
            .get(request_id)
            .map(|entry| entry.removal == Some(handle))
            .unwrap_or(false);
        if matches {
            self.remove_task(request_id);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn is_listening(&self) -> bool {
        self.inbox.is_listening()
    }

    /// Subscribes to the tracker's progress and result events and re-arms the
    /// timers of tasks that outlived a previous cleanup. Idempotent.
    pub fn setup_listeners(&mut self, channel: &dyn EventChannel) -> bool {
        let registered = self
            .inbox
            .subscribe(channel, &[S::PROGRESS_EVENT, S::RESULT_EVENT]);
        if registered {
            self.resume_timers();
            debug!(event = "tracker_listening", kind = S::KIND);
        }
        registered
    }

    /// Unsubscribes and cancels every outstanding timeout and removal timer.
    /// Tasks stay visible until the next `setup_listeners` re-arms them.
    pub fn cleanup_listeners(&mut self, channel: &dyn EventChannel) -> bool {
        let removed = self.inbox.unsubscribe(channel);
        self.suspend_timers();
        if removed {
            debug!(event = "tracker_stopped", kind = S::KIND);
        }
        removed
    }

    /// Cancels every timer while keeping the tasks.
    pub fn suspend_timers(&mut self) {
        self.timers.clear();
        for entry in self.tasks.values_mut() {
            entry.timeout = None;
            entry.removal = None;
        }
    }

    /// Gives every unguarded task a timer again: a fresh timeout for running
    /// tasks, the status-specific removal delay for finished ones. Returns how
    /// many timers were armed.
    pub fn resume_timers(&mut self) -> usize {
        let mut armed = 0;
        for (request_id, entry) in self.tasks.iter_mut() {
            if self.spec.is_in_progress(&entry.task) {
                if entry.timeout.is_none() {
                    entry.timeout = Some(
                        self.timers
                            .schedule(self.timings.timeout, (request_id.clone(), TimerKind::Timeout)),
                    );
                    armed += 1;
                }
            } else if entry.removal.is_none() {
                let delay = match entry.task.status {
                    TaskStatus::Completed => self.timings.success_removal,
                    _ => self.timings.failure_removal,
                };
                entry.removal = Some(
                    self.timers
                        .schedule(delay, (request_id.clone(), TimerKind::Removal)),
                );
                armed += 1;
            }
        }
        if armed > 0 {
            debug!(event = "tracker_timers_resumed", kind = S::KIND, armed = armed);
        }
        armed
    }

    pub fn reset(&mut self) {
        self.tasks.clear();
        self.timers.clear();
    }

    fn cancel_entry_timers(&mut self, entry: &Entry<S::Identity>) {
        if let Some(handle) = entry.timeout {
            self.timers.cancel(handle);
        }
        if let Some(handle) = entry.removal {
            self.timers.cancel(handle);
        }
    }

    pub fn get(&self, request_id: &str) -> Option<&Task<S::Identity>> {
        self.tasks.get(request_id).map(|entry| &entry.task)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.tasks.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> Vec<&Task<S::Identity>> {
        let mut entries = self.tasks.values().collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| &entry.task).collect()
    }

    pub fn to_view_model(&self, task: &Task<S::Identity>) -> ProgressTask {
        let status = match task.status {
            TaskStatus::InProgress => PROCESSING_STATUS,
            other => self.spec.status_label(other),
        };
        ProgressTask {
            request_id: task.request_id.clone(),
            title: self.spec.title(task),
            progress: task.progress,
            message: task.message.clone(),
            status: status.to_string(),
        }
    }

    pub fn progress_tasks(&self) -> Vec<ProgressTask> {
        self.tasks()
            .into_iter()
            .map(|task| self.to_view_model(task))
            .collect()
    }
}
