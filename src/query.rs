//! Query API — the read paths and the config-write path, `spec.md` §4.7.

use std::sync::Arc;

use crate::error::{DevtraceError, Result};
use crate::models::{
    AIConversation, ConversationTimeline, Event, EventKind, Project, ProjectConfig, ProjectId,
    ProjectWithStats, TimelineEntry,
};
use crate::store::Store;
use crate::supervisor::Supervisor;

/// Pagination envelope, `spec.md` §4.7.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub page: u64,
    pub total_pages: u64,
}

fn paginate<T>(items: Vec<T>, total: u64, offset: u64, limit: u64) -> Page<T> {
    let limit = limit.max(1);
    Page {
        items,
        total,
        offset,
        limit,
        page: offset / limit + 1,
        total_pages: total.div_ceil(limit).max(1),
    }
}

pub struct Query {
    store: Arc<Store>,
    supervisor: Arc<Supervisor>,
}

impl Query {
    pub fn new(store: Arc<Store>, supervisor: Arc<Supervisor>) -> Self {
        Self { store, supervisor }
    }

    pub fn list_projects(&self, active_filter: Option<bool>) -> Result<Vec<ProjectWithStats>> {
        Ok(self.store.list_projects(active_filter)?)
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Project> {
        Ok(self.store.get_project(id)?)
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<()> {
        self.supervisor.stop(id).await;
        self.store.delete_project(id)?;
        Ok(())
    }

    pub fn project_config(&self, id: ProjectId) -> Result<ProjectConfig> {
        let project = self.store.get_project(id)?;
        Ok(ProjectConfig {
            ignore_patterns: project.ignore_patterns,
            architecture_document_path: project.architecture_document_path,
        })
    }

    /// A successful write invokes the Supervisor swap before returning,
    /// per `spec.md` §4.7.
    pub async fn update_project_config(&self, id: ProjectId, config: ProjectConfig) -> Result<Project> {
        let project = self.store.update_project_config(id, &config)?;
        self.supervisor.restart(&project).await.map_err(|e| DevtraceError::Transient(e.to_string()))?;
        Ok(project)
    }

    pub fn list_events(
        &self,
        project_id: Option<ProjectId>,
        kind: Option<EventKind>,
        search: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<Event>> {
        let (items, total) = self.store.list_events(project_id, kind, search, offset, limit)?;
        Ok(paginate(items, total, offset, limit))
    }

    pub fn read_event(&self, id: i64) -> Result<Event> {
        Ok(self.store.read_event(id)?)
    }

    pub fn list_ai_conversations(
        &self,
        project_id: Option<ProjectId>,
        provider: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Page<AIConversation>> {
        let (items, total) = self.store.list_ai_conversations(project_id, provider, limit, offset)?;
        Ok(paginate(items, total, offset, limit))
    }

    pub fn read_ai_conversation(&self, id: i64) -> Result<AIConversation> {
        Ok(self.store.read_ai_conversation(id)?)
    }

    pub fn ai_stats(&self, project_id: Option<ProjectId>) -> Result<crate::models::AiStats> {
        Ok(self.store.ai_stats(project_id)?)
    }

    /// `{event_id, path, match_category, confidence, reasoning,
    /// time_delta_seconds, diff?}` sorted by descending confidence,
    /// `spec.md` §4.7.
    pub fn conversation_timeline(&self, id: i64) -> Result<ConversationTimeline> {
        let conversation = self.store.read_ai_conversation(id)?;
        let matches = self.store.list_ai_matches(id)?;

        let mut entries = Vec::with_capacity(matches.len());
        for m in matches {
            let diff = self.store.read_event(m.event_id).ok().and_then(|e| match e.payload {
                crate::models::EventPayload::FileCreated { diff, .. }
                | crate::models::EventPayload::FileModified { diff, .. } => Some(diff),
                _ => None,
            });
            let path = self.store.read_event(m.event_id).ok().and_then(|e| e.path);
            entries.push(TimelineEntry {
                event_id: m.event_id,
                path,
                match_category: m.match_category,
                confidence: m.confidence,
                reasoning: m.reasoning,
                time_delta_seconds: m.time_delta_seconds,
                diff,
            });
        }
        entries.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ConversationTimeline {
            conversation,
            matches: entries,
        })
    }
}
