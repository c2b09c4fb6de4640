//! The literal end-to-end scenarios from `spec.md` §8, driven against a
//! real temp-directory filesystem and an in-memory Store.

use std::sync::Arc;
use std::time::Duration;

use devtrace::baseline::BaselineCache;
use devtrace::broadcaster::Broadcaster;
use devtrace::config::Config;
use devtrace::models::{BaselineSource, EventKind, EventPayload, ProjectConfig};
use devtrace::store::Store;
use devtrace::supervisor::Supervisor;
use devtrace::watcher::NullObserver;

fn test_config(debounce_ms: u64) -> Arc<Config> {
    Arc::new(Config {
        openai_api_key: None,
        openai_model: "gpt-4o-mini".into(),
        openai_matching_model: "gpt-4o".into(),
        port: 0,
        db_path: "devtrace-scenarios-test.db".into(),
        repo_path: None,
        max_bytes: 2_000_000,
        ignore_parts: vec![".git".into()],
        cors_enabled: false,
        cors_origins: vec![],
        debounce_ms,
        worker_concurrency: 2,
        correlation_window_secs: 300,
        llm_timeout_secs: 60,
    })
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn scenario_1_create_and_edit() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster,
        baseline,
        Arc::new(NullObserver),
        test_config(20),
    ));

    let project = store
        .create_project("A", dir.path().to_str().unwrap(), "", vec![], None)
        .unwrap();
    supervisor.start(&project).await.unwrap();

    std::fs::write(dir.path().join("f.txt"), "hello\n").unwrap();

    let got_event = wait_until(
        || {
            let (events, _) = store
                .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
                .unwrap();
            !events.is_empty()
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(got_event, "expected a file_change event for f.txt");

    let (events, _) = store
        .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
        .unwrap();
    let event = events.into_iter().next().unwrap();
    assert_eq!(event.path.as_deref(), Some("f.txt"));
    match event.payload {
        EventPayload::FileCreated { size, diff, baseline, .. }
        | EventPayload::FileModified { size, diff, baseline, .. } => {
            assert_eq!(size, 6);
            assert_eq!(baseline, BaselineSource::Cache);
            assert!(diff.contains("hello"), "diff was: {diff}");
        }
        other => panic!("expected a file_change payload, got {other:?}"),
    }

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn scenario_2_ignore_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster,
        baseline,
        Arc::new(NullObserver),
        test_config(20),
    ));

    let project = store
        .create_project("A", dir.path().to_str().unwrap(), "", vec!["*.log".to_string()], None)
        .unwrap();
    supervisor.start(&project).await.unwrap();

    std::fs::write(dir.path().join("x.log"), "noise\n").unwrap();
    std::fs::write(dir.path().join("x.txt"), "signal\n").unwrap();

    let got_txt_event = wait_until(
        || {
            let (events, _) = store
                .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
                .unwrap();
            events.iter().any(|e| e.path.as_deref() == Some("x.txt"))
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(got_txt_event, "expected an event for x.txt");

    let (events, _) = store
        .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
        .unwrap();
    assert!(events.iter().all(|e| e.path.as_deref() != Some("x.log")));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn scenario_3_config_swap_changes_ignore_patterns() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster,
        baseline,
        Arc::new(NullObserver),
        test_config(20),
    ));

    let project = store
        .create_project("A", dir.path().to_str().unwrap(), "", vec![], None)
        .unwrap();
    supervisor.start(&project).await.unwrap();

    let updated = store
        .update_project_config(
            project.id,
            &ProjectConfig {
                ignore_patterns: vec!["*.tmp".to_string()],
                architecture_document_path: None,
            },
        )
        .unwrap();
    supervisor.restart(&updated).await.unwrap();

    std::fs::write(dir.path().join("x.tmp"), "noise\n").unwrap();
    std::fs::write(dir.path().join("x.log"), "signal\n").unwrap();

    let got_log_event = wait_until(
        || {
            let (events, _) = store
                .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
                .unwrap();
            events.iter().any(|e| e.path.as_deref() == Some("x.log"))
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(got_log_event, "expected an event for x.log after config swap");

    let (events, _) = store
        .list_events(Some(project.id), Some(EventKind::FileChange), None, 0, 10)
        .unwrap();
    assert!(events.iter().all(|e| e.path.as_deref() != Some("x.tmp")));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn scenario_5_pagination() {
    let store = Store::open_in_memory().unwrap();
    let project = store.create_project("p", "/p", "", vec![], None).unwrap();
    let payload = EventPayload::Summary { content: "x".into() };
    for _ in 0..315 {
        store
            .append_event(EventKind::Summary, Some(project.id), None, &payload)
            .unwrap();
    }

    let (page1, total) = store.list_events(Some(project.id), None, None, 0, 50).unwrap();
    assert_eq!(total, 315);
    assert_eq!(page1.len(), 50);

    let (page7, _) = store.list_events(Some(project.id), None, None, 300, 50).unwrap();
    assert_eq!(page7.len(), 15);
}

#[tokio::test]
async fn scenario_6_architecture_impact_via_observer() {
    use devtrace::architecture::ArchitectureTracker;
    use devtrace::error::DevtraceError;
    use devtrace::llm::{ImpactSummary, LlmClient, MatchCandidate, MatchScore};
    use devtrace::models::ArchitectureRecord;
    use devtrace::watcher::ChangeObserver;

    struct StubLlm;

    #[async_trait::async_trait]
    impl LlmClient for StubLlm {
        async fn score_matches(
            &self,
            _prompt: &str,
            _candidates: &[MatchCandidate],
        ) -> Result<Vec<MatchScore>, DevtraceError> {
            Ok(vec![])
        }

        async fn summarize_impact(
            &self,
            _overview: &str,
            _diff: &str,
            _path: &str,
        ) -> Result<ImpactSummary, DevtraceError> {
            Ok(ImpactSummary {
                affected_features: vec!["F".to_string()],
                modified_classes: vec![],
                new_classes: vec![],
                architectural_change: false,
                impact_level: "minor".to_string(),
                summary: "touched svc.py".to_string(),
                concerns: vec![],
                recommendations: vec![],
            })
        }
    }

    let store = Arc::new(Store::open_in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new());
    let project = store.create_project("p", "/p", "", vec![], None).unwrap();

    let record = ArchitectureRecord {
        source_document_path: "ARCHITECTURE.md".to_string(),
        last_updated: chrono::Utc::now(),
        overview: "a service".to_string(),
        features: vec![devtrace::models::FeatureMapping {
            name: "F".to_string(),
            classes: vec![],
            files: vec!["svc.py".to_string()],
            dependencies: vec![],
        }],
        class_registry: Default::default(),
        dependencies: Default::default(),
        change_log: vec![],
    };
    store.update_project_architecture(project.id, &record).unwrap();

    let tracker = ArchitectureTracker::new(store.clone(), broadcaster.clone(), Arc::new(StubLlm));

    let event_id = store
        .append_event(
            EventKind::FileChange,
            Some(project.id),
            Some("svc.py"),
            &EventPayload::FileModified {
                diff: "+ def handler(): ...".to_string(),
                sha: "abc".to_string(),
                size: 20,
                baseline: BaselineSource::Cache,
            },
        )
        .unwrap();
    let event = store.read_event(event_id).unwrap();

    tracker.on_event(project.id, event);

    let updated = wait_until(
        || {
            let project = store.get_project(project.id).unwrap();
            project
                .architecture
                .map(|a| !a.change_log.is_empty())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(updated, "expected an architecture change-log entry");

    let project = store.get_project(project.id).unwrap();
    let architecture = project.architecture.unwrap();
    assert_eq!(architecture.change_log[0].affected_features, vec!["F".to_string()]);

    let (implications, _) = store
        .list_events(Some(project.id), Some(EventKind::ImplicationsAnalysis), None, 0, 10)
        .unwrap();
    assert_eq!(implications.len(), 1);
}
