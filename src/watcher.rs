//! File-system Watcher, one instance per active project, `spec.md` §4.4.
//!
//! Built on `notify` + `notify_debouncer_full`, the same pair the teacher
//! uses for its `FileWatcher` in the retrieval pack. Unlike the teacher's
//! dual LSP/filesystem design, a devtrace Watcher only ever sees the
//! filesystem — there is no LSP tier here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use notify::{CreateKind, EventKind as NotifyEventKind, ModifyKind, RecommendedWatcher, RecursiveMode, RemoveKind};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, FileIdMap};
use tokio::runtime::Handle;

use crate::baseline::BaselineCache;
use crate::config::Config;
use crate::models::{BaselineSource, Event, EventKind, EventPayload, Project, ProjectId};
use crate::store::Store;

/// Notified whenever the Watcher durably records an event, so the
/// Architecture Tracker can enqueue an impact update without the
/// Watcher needing to know anything about it, `spec.md` §4.9.
pub trait ChangeObserver: Send + Sync {
    fn on_event(&self, project_id: ProjectId, event: Event);
}

pub struct NullObserver;
impl ChangeObserver for NullObserver {
    fn on_event(&self, _project_id: ProjectId, _event: Event) {}
}

pub struct WatcherHandle {
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    project_id: ProjectId,
}

impl WatcherHandle {
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Stops watching and gives any in-flight debounce callback a grace
    /// window to finish before returning. The Supervisor wraps this in
    /// its own outer timeout, `spec.md` §4.5.
    pub async fn stop(mut self) {
        self.debouncer.take();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn spawn(
    project: &Project,
    store: Arc<Store>,
    broadcaster: Arc<crate::broadcaster::Broadcaster>,
    baseline: Arc<BaselineCache>,
    observer: Arc<dyn ChangeObserver>,
    config: &Config,
) -> Result<WatcherHandle> {
    let project_id = project.id;
    let root = PathBuf::from(&project.path);
    let global_ignore_parts = config.ignore_parts.clone();
    let project_patterns = project.ignore_patterns.clone();
    let max_bytes = config.max_bytes;

    let repo = crate::baseline::open_repo(&root);
    let repo_root = repo.as_ref().and_then(|r| r.workdir().map(Path::to_path_buf));
    let rt_handle = Handle::current();

    let debounce_window = Duration::from_millis(config.debounce_ms.max(1));
    let debouncer = new_debouncer(debounce_window, None, move |result: DebounceEventResult| {
        let Ok(events) = result else { return };
        for debounced in events {
            if let Some((kind, path)) = classify(&debounced) {
                if should_ignore(&path, &root, &global_ignore_parts, &project_patterns) {
                    continue;
                }
                let relative = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
                handle_change(
                    project_id,
                    &path,
                    &relative,
                    kind,
                    &store,
                    &broadcaster,
                    &baseline,
                    repo.as_ref(),
                    repo_root.as_deref(),
                    max_bytes,
                    &observer,
                    &rt_handle,
                );
            }
        }
    })
    .context("failed to construct debouncer")?;

    let mut debouncer = debouncer;
    debouncer
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;

    Ok(WatcherHandle {
        debouncer: Some(debouncer),
        project_id,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    FileCreated,
    FileModified,
    FileRemoved,
    FolderCreated,
    FolderRemoved,
}

fn classify(event: &DebouncedEvent) -> Option<(RawKind, PathBuf)> {
    let path = event.event.paths.first()?.clone();
    let kind = match event.event.kind {
        NotifyEventKind::Create(CreateKind::Folder) => RawKind::FolderCreated,
        NotifyEventKind::Create(_) => RawKind::FileCreated,
        NotifyEventKind::Modify(ModifyKind::Data(_)) | NotifyEventKind::Modify(ModifyKind::Any) => {
            RawKind::FileModified
        }
        NotifyEventKind::Remove(RemoveKind::Folder) => RawKind::FolderRemoved,
        NotifyEventKind::Remove(_) => RawKind::FileRemoved,
        _ => return None,
    };
    Some((kind, path))
}

/// `P` is ignored iff any segment of its project-relative path equals a
/// global ignore segment, or any project pattern glob matches the
/// relative path, or any project pattern glob matches the basename of
/// `P` (`spec.md` §4.4 step 2) — a project pattern of `*.log` must catch
/// a nested `sub/x.log` too, which a relative-path-only glob match would
/// miss since `*` does not cross `/`.
fn should_ignore(path: &Path, root: &Path, global_ignore_parts: &[String], project_patterns: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let relative_str = relative.to_string_lossy();
    let basename = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

    if relative
        .components()
        .any(|c| global_ignore_parts.iter().any(|part| c.as_os_str().to_string_lossy() == *part))
    {
        return true;
    }

    for pattern in project_patterns {
        let Ok(glob_pattern) = glob::Pattern::new(pattern) else { continue };
        if glob_pattern.matches(&relative_str) || glob_pattern.matches(&basename) {
            return true;
        }
    }
    false
}

#[allow(clippy::too_many_arguments)]
fn handle_change(
    project_id: ProjectId,
    path: &Path,
    relative_path: &Path,
    kind: RawKind,
    store: &Store,
    broadcaster: &crate::broadcaster::Broadcaster,
    baseline: &BaselineCache,
    repo: Option<&git2::Repository>,
    repo_root: Option<&Path>,
    max_bytes: u64,
    observer: &Arc<dyn ChangeObserver>,
    rt_handle: &Handle,
) {
    let path_str = relative_path.to_string_lossy().to_string();

    let (event_kind, payload) = match kind {
        RawKind::FolderCreated => (EventKind::FolderCreated, EventPayload::FolderCreated),
        RawKind::FolderRemoved => {
            baseline.forget(project_id, path);
            (EventKind::FolderDeleted, EventPayload::FolderDeleted)
        }
        RawKind::FileRemoved => {
            baseline.forget(project_id, path);
            (EventKind::FileDeleted, EventPayload::FileDeleted)
        }
        RawKind::FileCreated | RawKind::FileModified => {
            let Ok(content) = std::fs::read(path) else {
                return;
            };
            let Some(diff_result) =
                baseline.diff_and_update(project_id, path, &content, repo, repo_root, max_bytes)
            else {
                return;
            };
            let baseline_source = diff_result.baseline;
            let payload = if kind == RawKind::FileCreated {
                EventPayload::FileCreated {
                    diff: diff_result.diff,
                    sha: sha256_hex(&content),
                    size: diff_result.size,
                    baseline: baseline_source,
                }
            } else {
                EventPayload::FileModified {
                    diff: diff_result.diff,
                    sha: sha256_hex(&content),
                    size: diff_result.size,
                    baseline: baseline_source,
                }
            };
            (EventKind::FileChange, payload)
        }
    };

    let Ok(event_id) = store.append_event(event_kind, Some(project_id), Some(&path_str), &payload) else {
        return;
    };
    let Ok(event) = store.read_event(event_id) else {
        return;
    };

    broadcaster.publish(event.clone());

    let observer = Arc::clone(observer);
    rt_handle.spawn(async move {
        observer.on_event(project_id, event);
    });
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
