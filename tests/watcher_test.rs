//! Watcher Supervisor lifecycle and boundary behaviors, `spec.md` §4.4/§4.5/§8.

use std::sync::Arc;
use std::time::Duration;

use devtrace::baseline::BaselineCache;
use devtrace::broadcaster::Broadcaster;
use devtrace::config::Config;
use devtrace::models::EventKind;
use devtrace::store::Store;
use devtrace::supervisor::Supervisor;
use devtrace::watcher::NullObserver;

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        openai_api_key: None,
        openai_model: "gpt-4o-mini".into(),
        openai_matching_model: "gpt-4o".into(),
        port: 0,
        db_path: "devtrace-watcher-test.db".into(),
        repo_path: None,
        max_bytes: 2_000_000,
        ignore_parts: vec![".git".into()],
        cors_enabled: false,
        cors_origins: vec![],
        debounce_ms: 20,
        worker_concurrency: 1,
        correlation_window_secs: 300,
        llm_timeout_secs: 60,
    })
}

#[tokio::test]
async fn watcher_against_missing_directory_records_error_and_stays_dead() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster,
        baseline,
        Arc::new(NullObserver),
        test_config(),
    ));

    let project = store
        .create_project("A", "/this/path/does/not/exist/devtrace-test", "", vec![], None)
        .unwrap();

    supervisor.start(&project).await.unwrap();
    assert!(!supervisor.is_running(project.id).await);

    let (events, total) = store.list_events(Some(project.id), Some(EventKind::Error), None, 0, 10).unwrap();
    assert_eq!(total, 1);
    assert!(matches!(events[0].payload, devtrace::models::EventPayload::ErrorNote { .. }));
}

#[tokio::test]
async fn start_is_idempotent_and_stop_tears_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster,
        baseline,
        Arc::new(NullObserver),
        test_config(),
    ));

    let project = store
        .create_project("A", dir.path().to_str().unwrap(), "", vec![], None)
        .unwrap();

    supervisor.start(&project).await.unwrap();
    supervisor.start(&project).await.unwrap();
    assert_eq!(supervisor.running_count().await, 1);

    supervisor.stop(project.id).await;
    assert!(!supervisor.is_running(project.id).await);

    // No third Watcher should ever be alive between the old one's last
    // event and the new one's first, `spec.md` §8 invariant; a restart
    // after `stop` must succeed cleanly.
    supervisor.start(&project).await.unwrap();
    assert!(supervisor.is_running(project.id).await);

    supervisor.shutdown_all().await;
    assert_eq!(supervisor.running_count().await, 0);
}

#[tokio::test]
async fn event_ids_strictly_increase_across_a_watcher_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster,
        baseline,
        Arc::new(NullObserver),
        test_config(),
    ));

    let project = store
        .create_project("A", dir.path().to_str().unwrap(), "", vec![], None)
        .unwrap();
    supervisor.start(&project).await.unwrap();

    std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
    wait_for_event_count(&store, project.id, 1).await;

    supervisor.restart(&project).await.unwrap();

    std::fs::write(dir.path().join("b.txt"), "two\n").unwrap();
    wait_for_event_count(&store, project.id, 2).await;

    let (events, _) = store
        .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
        .unwrap();
    // `list_events` orders strictly descending by id; the most recent
    // write (b.txt, after the restart) must have the larger id.
    assert_eq!(events[0].path.as_deref(), Some("b.txt"));
    assert!(events[0].id > events[1].id);

    supervisor.shutdown_all().await;
}

async fn wait_for_event_count(store: &Store, project_id: i64, count: usize) {
    let start = tokio::time::Instant::now();
    loop {
        let (events, _) = store
            .list_events(Some(project_id), Some(EventKind::FileChange), None, 0, 10)
            .unwrap();
        if events.len() >= count {
            return;
        }
        if start.elapsed() > Duration::from_secs(5) {
            panic!("timed out waiting for {count} file_change events");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
