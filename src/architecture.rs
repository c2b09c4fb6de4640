//! Architecture Tracker, `spec.md` §4.9.
//!
//! Parses an optional per-project architecture document into a
//! structured [`ArchitectureRecord`] and keeps it current by asking the
//! LLM for an impact analysis on every file-change event, serialized
//! per project so two rapid-fire changes can't race each other's
//! read-modify-write of the record. Grounded on the teacher's
//! `orchestrator.rs`, which also keys a `DashMap` by id to get
//! per-entity serialization without a single global lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;
use crate::llm::LlmClient;
use crate::models::{
    ArchitectureRecord, ChangeLogEntry, Dependencies, Event, EventKind, EventPayload,
    FeatureMapping, ImpactLevel, Project, ProjectId,
};
use crate::store::Store;
use crate::watcher::ChangeObserver;

#[derive(Clone)]
pub struct ArchitectureTracker {
    store: Arc<Store>,
    broadcaster: Arc<Broadcaster>,
    llm: Arc<dyn LlmClient>,
    locks: Arc<DashMap<ProjectId, Arc<AsyncMutex<()>>>>,
}

impl ArchitectureTracker {
    pub fn new(store: Arc<Store>, broadcaster: Arc<Broadcaster>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            store,
            broadcaster,
            llm,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, project_id: ProjectId) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.locks
                .entry(project_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Registers (or replaces) the architecture document for a project.
    pub async fn set_document(&self, project_id: ProjectId, document_path: &str, contents: &str) -> anyhow::Result<()> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;
        let record = parse_architecture_document(contents, document_path);
        self.store.update_project_architecture(project_id, &record)?;
        Ok(())
    }

    async fn update_for_event(&self, project_id: ProjectId, event: Event) {
        let diff = match &event.payload {
            EventPayload::FileCreated { diff, .. } | EventPayload::FileModified { diff, .. } => diff.clone(),
            _ => return,
        };
        let Some(path) = event.path.clone() else { return };

        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let project = match self.store.get_project(project_id) {
            Ok(p) => p,
            Err(err) => {
                warn!(project_id, error = %err, "could not load project for impact analysis");
                return;
            }
        };
        let Some(mut record) = project.architecture else {
            return;
        };

        let impact = match self.llm.summarize_impact(&record.overview, &diff, &path).await {
            Ok(impact) => impact,
            Err(err) => {
                warn!(project_id, error = %err, "impact analysis failed");
                return;
            }
        };

        for feature_name in &impact.affected_features {
            let feature = record
                .features
                .iter_mut()
                .find(|f| &f.name == feature_name);
            match feature {
                Some(feature) => {
                    if !feature.files.contains(&path) {
                        feature.files.push(path.clone());
                    }
                }
                None => record.features.push(FeatureMapping {
                    name: feature_name.clone(),
                    classes: vec![],
                    files: vec![path.clone()],
                    dependencies: vec![],
                }),
            }
        }
        for class in impact.modified_classes.iter().chain(impact.new_classes.iter()) {
            record.class_registry.insert(class.clone(), path.clone());
        }

        let entry = ChangeLogEntry {
            event_id: event.id,
            instant: Utc::now(),
            path: path.clone(),
            affected_features: impact.affected_features,
            modified_classes: impact.modified_classes,
            new_classes: impact.new_classes,
            architectural_change: impact.architectural_change,
            impact_level: ImpactLevel::from_str(&impact.impact_level),
            summary: impact.summary.clone(),
            concerns: impact.concerns,
            recommendations: impact.recommendations,
        };
        record.push_change_log_entry(entry);
        record.last_updated = Utc::now();

        if let Err(err) = self.store.update_project_architecture(project_id, &record) {
            warn!(project_id, error = %err, "failed to persist architecture update");
            return;
        }

        let analysis_payload = EventPayload::ImplicationsAnalysis {
            content: impact.summary,
            project_id,
            event_count: record.change_log.len() as u64,
        };
        match self
            .store
            .append_event(EventKind::ImplicationsAnalysis, Some(project_id), Some(&path), &analysis_payload)
        {
            Ok(id) => {
                if let Ok(event) = self.store.read_event(id) {
                    self.broadcaster.publish(event);
                }
            }
            Err(err) => warn!(project_id, error = %err, "failed to record implications_analysis event"),
        }

        info!(project_id, path, "architecture impact analysis recorded");
    }
}

impl ChangeObserver for ArchitectureTracker {
    fn on_event(&self, project_id: ProjectId, event: Event) {
        let this = self.clone();
        tokio::spawn(async move {
            this.update_for_event(project_id, event).await;
        });
    }
}

/// Hand-rolled Markdown parser, `spec.md` §4.9: an "Overview" heading's
/// trailing paragraphs; one `## Feature: <name>` heading per feature
/// with `- Classes:`/`- Files:`/`- Dependencies:` bullets; any other
/// `- Name: description` bullet feeding the class registry; and
/// `- Production:`/`- Development:` bullets for dependencies. Tolerant
/// by design — missing sections yield empty collections.
pub fn parse_architecture_document(contents: &str, source_document_path: &str) -> ArchitectureRecord {
    let mut overview = String::new();
    let mut features: Vec<FeatureMapping> = Vec::new();
    let mut class_registry: HashMap<String, String> = HashMap::new();
    let mut dependencies = Dependencies::default();

    let mut in_overview = false;
    let mut current_feature: Option<usize> = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(stripped) = line.strip_prefix('#') {
            let heading = stripped.trim_start_matches('#').trim();
            if let Some(name) = heading.strip_prefix("Feature:") {
                features.push(FeatureMapping {
                    name: name.trim().to_string(),
                    classes: vec![],
                    files: vec![],
                    dependencies: vec![],
                });
                current_feature = Some(features.len() - 1);
                in_overview = false;
            } else {
                in_overview = heading.eq_ignore_ascii_case("overview");
                current_feature = None;
            }
            continue;
        }

        if let Some(item) = line.strip_prefix("- ") {
            if let Some((label, rest)) = item.split_once(':') {
                let label = label.trim();
                let rest = rest.trim();
                let csv = || {
                    rest.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                };
                match label {
                    "Classes" => {
                        if let Some(i) = current_feature {
                            features[i].classes = csv();
                        }
                    }
                    "Files" => {
                        if let Some(i) = current_feature {
                            features[i].files = csv();
                        }
                    }
                    "Dependencies" => {
                        if let Some(i) = current_feature {
                            features[i].dependencies = csv();
                        }
                    }
                    "Production" => dependencies.production = csv(),
                    "Development" => dependencies.development = csv(),
                    name => {
                        class_registry.insert(name.to_string(), rest.to_string());
                    }
                }
            }
            continue;
        }

        if in_overview {
            if !overview.is_empty() {
                overview.push(' ');
            }
            overview.push_str(line);
        }
    }

    ArchitectureRecord {
        source_document_path: source_document_path.to_string(),
        last_updated: Utc::now(),
        overview,
        features,
        class_registry,
        dependencies,
        change_log: Vec::new(),
    }
}
