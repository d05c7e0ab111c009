//! Services the trackers reach outside themselves through.

use podflow_core::Repository;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub trait Notifier: Send + Sync {
    fn show_success_toast(&self, category: &str, title: &str, detail: &str);
    fn show_error_toast(&self, category: &str, title: &str, detail: &str);
}

pub trait RepositoryStore: Send + Sync {
    fn load_repositories(&self);
    /// Returns `false` when no repository has that id.
    fn set_current_branch(&self, repository_id: &str, branch: &str) -> bool;
}

/// Notifier for headless sessions: toasts become log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_success_toast(&self, category: &str, title: &str, detail: &str) {
        info!(event = "toast_success", category = category, title = title, detail = detail);
    }

    fn show_error_toast(&self, category: &str, title: &str, detail: &str) {
        warn!(event = "toast_error", category = category, title = title, detail = detail);
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    repositories: Vec<Repository>,
    reload_requests: usize,
}

/// Repository store for headless sessions and tests.
///
/// It owns no repository source: `load_repositories` only records that a
/// reload was asked for, which the session binary logs and tests read back
/// through [`InMemoryRepositoryStore::reload_requests`]. A UI embedding the
/// session supplies its own [`RepositoryStore`] that refetches the list.
#[derive(Debug, Default)]
pub struct InMemoryRepositoryStore {
    state: Mutex<RepositoryState>,
}

impl InMemoryRepositoryStore {
    pub fn new(repositories: Vec<Repository>) -> Self {
        Self {
            state: Mutex::new(RepositoryState {
                repositories,
                reload_requests: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.lock().repositories.clone()
    }

    pub fn replace(&self, repositories: Vec<Repository>) {
        self.lock().repositories = repositories;
    }

    pub fn reload_requests(&self) -> usize {
        self.lock().reload_requests
    }
}

impl RepositoryStore for InMemoryRepositoryStore {
    fn load_repositories(&self) {
        let mut state = self.lock();
        state.reload_requests += 1;
        info!(event = "repositories_reload_requested", count = state.reload_requests);
    }

    fn set_current_branch(&self, repository_id: &str, branch: &str) -> bool {
        let mut state = self.lock();
        match state
            .repositories
            .iter_mut()
            .find(|repository| repository.id == repository_id)
        {
            Some(repository) => {
                repository.current_branch = Some(branch.to_string());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_current_branch_patches_matching_repository_only() {
        let store = InMemoryRepositoryStore::new(vec![
            Repository {
                id: "repo-1".to_string(),
                name: "api".to_string(),
                current_branch: Some("main".to_string()),
            },
            Repository {
                id: "repo-2".to_string(),
                name: "web".to_string(),
                current_branch: None,
            },
        ]);
        assert!(store.set_current_branch("repo-2", "feature"));
        assert!(!store.set_current_branch("repo-9", "feature"));

        let repositories = store.repositories();
        assert_eq!(repositories[0].current_branch.as_deref(), Some("main"));
        assert_eq!(repositories[1].current_branch.as_deref(), Some("feature"));
    }

    #[test]
    fn load_repositories_counts_requests() {
        let store = InMemoryRepositoryStore::default();
        store.load_repositories();
        store.load_repositories();
        assert_eq!(store.reload_requests(), 2);
    }
}
