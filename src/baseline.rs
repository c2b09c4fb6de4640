//! Baseline Cache, `spec.md` §4.3.
//!
//! Holds the last-seen bytes of every tracked file so a write can be
//! diffed against what came before instead of against disk, which would
//! already have been overwritten. Seeded lazily from a project's VCS HEAD
//! via `git2` the first time a path is seen, following the teacher's use
//! of `git2` for blob access in the retrieval pack's storage layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use similar::{ChangeTag, TextDiff};

use crate::models::{BaselineSource, ProjectId};

#[derive(Clone)]
struct CacheEntry {
    content: Arc<Vec<u8>>,
}

#[derive(Default)]
pub struct BaselineCache {
    entries: DashMap<(ProjectId, PathBuf), CacheEntry>,
}

pub struct DiffResult {
    pub diff: String,
    pub size: u64,
    pub baseline: BaselineSource,
}

impl BaselineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the previous content for `path` within `project_id`,
    /// seeding from `repo`'s HEAD if this is the first time the path has
    /// been seen and a repository is available.
    fn baseline_for(
        &self,
        project_id: ProjectId,
        path: &Path,
        repo: Option<&git2::Repository>,
        repo_root: Option<&Path>,
    ) -> Option<(Vec<u8>, BaselineSource)> {
        let key = (project_id, path.to_path_buf());
        if let Some(entry) = self.entries.get(&key) {
            return Some((entry.content.as_ref().clone(), BaselineSource::Cache));
        }

        let repo = repo?;
        let repo_root = repo_root?;
        let relative = path.strip_prefix(repo_root).ok()?;
        let head = repo.head().ok()?.peel_to_tree().ok()?;
        let entry = head.get_path(relative).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some((blob.content().to_vec(), BaselineSource::Head))
    }

    /// Compute a unified diff for a modified/created file and refresh the
    /// cached baseline to the new content for next time. `max_bytes` is
    /// the configured per-file diff cap (`spec.md` §4.3/§6, `MAX_BYTES`).
    ///
    /// Returns `None` when the notification must be dropped entirely:
    /// the file is above `max_bytes` (neither diffed nor cached), or the
    /// new bytes are byte-equal to the cached baseline (coalesce).
    pub fn diff_and_update(
        &self,
        project_id: ProjectId,
        path: &Path,
        new_content: &[u8],
        repo: Option<&git2::Repository>,
        repo_root: Option<&Path>,
        max_bytes: u64,
    ) -> Option<DiffResult> {
        let size = new_content.len() as u64;
        if size > max_bytes {
            return None;
        }

        let previous = self.baseline_for(project_id, path, repo, repo_root);
        if let Some((bytes, _)) = &previous {
            if bytes.as_slice() == new_content {
                return None;
            }
        }

        if looks_binary(new_content) {
            self.update(project_id, path, new_content);
            return Some(DiffResult {
                diff: "[binary file]".to_string(),
                size,
                baseline: previous.map(|(_, source)| source).unwrap_or(BaselineSource::Cache),
            });
        }

        let (old_text, baseline) = match &previous {
            Some((bytes, source)) if !looks_binary(bytes) => {
                (String::from_utf8_lossy(bytes).into_owned(), *source)
            }
            Some((_, source)) => (String::new(), *source),
            None => (String::new(), BaselineSource::Cache),
        };
        let new_text = String::from_utf8_lossy(new_content).into_owned();

        let diff = TextDiff::from_lines(&old_text, &new_text);
        let mut unified = String::new();
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
                ChangeTag::Equal => ' ',
            };
            unified.push(sign);
            let text = change.as_str().unwrap_or("");
            unified.push_str(text);
            if !text.ends_with('\n') {
                unified.push('\n');
            }
        }

        self.update(project_id, path, new_content);

        Some(DiffResult {
            diff: unified,
            size,
            baseline,
        })
    }

    pub fn update(&self, project_id: ProjectId, path: &Path, content: &[u8]) {
        self.entries.insert(
            (project_id, path.to_path_buf()),
            CacheEntry {
                content: Arc::new(content.to_vec()),
            },
        );
    }

    pub fn forget(&self, project_id: ProjectId, path: &Path) {
        self.entries.remove(&(project_id, path.to_path_buf()));
    }

    pub fn forget_project(&self, project_id: ProjectId) {
        self.entries.retain(|(pid, _), _| *pid != project_id);
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|&b| b == 0)
}

pub fn open_repo(repo_root: &Path) -> Option<git2::Repository> {
    git2::Repository::discover(repo_root).ok()
}
