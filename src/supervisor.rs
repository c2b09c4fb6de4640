//! Watcher Supervisor, `spec.md` §4.5.
//!
//! Owns exactly one [`crate::watcher::WatcherHandle`] per active project
//! and serializes start/stop/swap operations per project so a rapid
//! sequence of config writes can never race two watchers onto the same
//! directory. Mirrors the teacher's preference (`core/forge.rs`) for a
//! `parking_lot`-guarded registry plus `tokio::sync::Mutex` for the
//! async critical sections that can't use a sync lock.
//!
//! Per `spec.md` invariant (vi), exactly one Watcher is live per active
//! project at any time; the `slots` map below is the single source of
//! truth for that invariant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::baseline::BaselineCache;
use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::models::{Project, ProjectId};
use crate::store::Store;
use crate::watcher::{self, ChangeObserver, WatcherHandle};

const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Supervisor {
    store: Arc<Store>,
    broadcaster: Arc<Broadcaster>,
    baseline: Arc<BaselineCache>,
    observer: Arc<dyn ChangeObserver>,
    config: Arc<Config>,
    slots: Mutex<HashMap<ProjectId, WatcherHandle>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<Store>,
        broadcaster: Arc<Broadcaster>,
        baseline: Arc<BaselineCache>,
        observer: Arc<dyn ChangeObserver>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            baseline,
            observer,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Start a Watcher for every currently-active project. Called once
    /// at boot.
    pub async fn start_active_projects(&self) -> anyhow::Result<()> {
        let projects = self.store.list_projects(Some(true))?;
        for entry in projects {
            if let Err(err) = self.start(&entry.project).await {
                error!(project_id = entry.project.id, error = %err, "failed to start watcher");
            }
        }
        Ok(())
    }

    /// Starts a Watcher for `project`. A spawn failure (e.g. the
    /// project's directory no longer exists) does not propagate: it is
    /// recorded as an `error` Event and the project is left with no
    /// running Watcher until the next `start`/`restart` call, per
    /// `spec.md` §8 boundary behavior.
    pub async fn start(&self, project: &Project) -> anyhow::Result<()> {
        let mut slots = self.slots.lock().await;
        if slots.contains_key(&project.id) {
            return Ok(());
        }
        match self.spawn(project) {
            Ok(handle) => {
                slots.insert(project.id, handle);
            }
            Err(err) => self.record_spawn_failure(project, &err),
        }
        Ok(())
    }

    pub async fn stop(&self, project_id: ProjectId) {
        let handle = {
            let mut slots = self.slots.lock().await;
            slots.remove(&project_id)
        };
        let Some(handle) = handle else { return };
        if tokio::time::timeout(TEARDOWN_GRACE, handle.stop()).await.is_err() {
            warn!(project_id, "watcher teardown exceeded grace period");
        }
        self.baseline.forget_project(project_id);
    }

    /// Swaps a project's Watcher for a freshly-spawned one, used after a
    /// config change to `ignore_patterns` so the new patterns take
    /// effect immediately, `spec.md` §4.7. The replacement is
    /// constructed and inserted *before* the old one is torn down, so
    /// there is never an interval with zero live watchers for the
    /// project (nor, since `slots` is keyed by project id, two at once).
    /// A spawn failure restores the previous Watcher, per `spec.md` §7
    /// "Configuration updates that fail mid-swap restore the previous
    /// Watcher."
    pub async fn restart(&self, project: &Project) -> anyhow::Result<()> {
        if !project.active {
            self.stop(project.id).await;
            return Ok(());
        }

        let mut slots = self.slots.lock().await;
        let old = slots.remove(&project.id);
        match self.spawn(project) {
            Ok(handle) => {
                slots.insert(project.id, handle);
                drop(slots);
                if let Some(old) = old {
                    if tokio::time::timeout(TEARDOWN_GRACE, old.stop()).await.is_err() {
                        warn!(project_id = project.id, "watcher teardown exceeded grace period during restart");
                    }
                    self.baseline.forget_project(project.id);
                }
            }
            Err(err) => {
                if let Some(old) = old {
                    slots.insert(project.id, old);
                }
                drop(slots);
                self.record_spawn_failure(project, &err);
            }
        }
        Ok(())
    }

    fn spawn(&self, project: &Project) -> anyhow::Result<WatcherHandle> {
        let handle = watcher::spawn(
            project,
            Arc::clone(&self.store),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.baseline),
            Arc::clone(&self.observer),
            &self.config,
        )?;
        info!(project_id = project.id, path = %project.path, "watcher started");
        Ok(handle)
    }

    fn record_spawn_failure(&self, project: &Project, err: &anyhow::Error) {
        error!(project_id = project.id, path = %project.path, error = %err, "watcher failed to start");
        let payload = crate::models::EventPayload::ErrorNote {
            message: format!("watcher failed to start for {}: {err}", project.path),
            context: None,
        };
        if let Ok(event_id) =
            self.store.append_event(crate::models::EventKind::Error, Some(project.id), None, &payload)
        {
            if let Ok(event) = self.store.read_event(event_id) {
                self.broadcaster.publish(event);
            }
        }
    }

    pub async fn is_running(&self, project_id: ProjectId) -> bool {
        self.slots.lock().await.contains_key(&project_id)
    }

    pub async fn running_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn shutdown_all(&self) {
        let handles: Vec<_> = {
            let mut slots = self.slots.lock().await;
            slots.drain().collect()
        };
        for (project_id, handle) in handles {
            if tokio::time::timeout(TEARDOWN_GRACE, handle.stop()).await.is_err() {
                warn!(project_id, "watcher teardown exceeded grace period during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::NullObserver;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".into(),
            openai_matching_model: "gpt-4o".into(),
            port: 0,
            db_path: "devtrace-test.db".into(),
            repo_path: None,
            max_bytes: 2_000_000,
            ignore_parts: vec![".git".into()],
            cors_enabled: false,
            cors_origins: vec![],
            debounce_ms: 0,
            worker_concurrency: 1,
            correlation_window_secs: 300,
            llm_timeout_secs: 60,
        })
    }

    #[tokio::test]
    async fn starting_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store
            .create_project("p", dir.path().to_str().unwrap(), "", vec![], None)
            .unwrap();
        let supervisor = Supervisor::new(
            store,
            Arc::new(Broadcaster::new()),
            Arc::new(BaselineCache::new()),
            Arc::new(NullObserver),
            test_config(),
        );
        supervisor.start(&project).await.unwrap();
        supervisor.start(&project).await.unwrap();
        assert_eq!(supervisor.running_count().await, 1);
        supervisor.stop(project.id).await;
        assert_eq!(supervisor.running_count().await, 0);
    }
}
