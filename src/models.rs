//! Core data model — `spec.md` §3.
//!
//! Event payloads are a closed, per-kind union (Design Note "Dynamic
//! payloads"): the Store persists them as an opaque JSON blob and never
//! interprets the contents, but every producer and consumer in this crate
//! goes through [`EventPayload`] rather than a bare `serde_json::Value`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ProjectId = i64;
pub type EventId = i64;
pub type ConversationId = i64;
pub type MatchId = i64;

/// `spec.md` §3 closed enum of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FileChange,
    FileDeleted,
    FolderCreated,
    FolderDeleted,
    Prompt,
    CopilotChat,
    Error,
    Summary,
    AiMatch,
    ImplicationsAnalysis,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FileChange => "file_change",
            EventKind::FileDeleted => "file_deleted",
            EventKind::FolderCreated => "folder_created",
            EventKind::FolderDeleted => "folder_deleted",
            EventKind::Prompt => "prompt",
            EventKind::CopilotChat => "copilot_chat",
            EventKind::Error => "error",
            EventKind::Summary => "summary",
            EventKind::AiMatch => "ai_match",
            EventKind::ImplicationsAnalysis => "implications_analysis",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "file_change" => EventKind::FileChange,
            "file_deleted" => EventKind::FileDeleted,
            "folder_created" => EventKind::FolderCreated,
            "folder_deleted" => EventKind::FolderDeleted,
            "prompt" => EventKind::Prompt,
            "copilot_chat" => EventKind::CopilotChat,
            "error" => EventKind::Error,
            "summary" => EventKind::Summary,
            "ai_match" => EventKind::AiMatch,
            "implications_analysis" => EventKind::ImplicationsAnalysis,
            _ => return None,
        })
    }
}

/// Per-kind payload shapes, `spec.md` §6 "Event-payload shapes"
/// (authoritative). Only the file/folder-change kinds carry an `event`
/// discriminant field (`"created"|"modified"|"deleted"`, plus
/// `type:"directory"` for folder kinds); the rest serialize as plain
/// flat objects with no wrapper field. That mixed shape can't be
/// expressed with a single `#[serde(tag = "...")]` attribute, so
/// [`Serialize`]/[`Deserialize`] are implemented by hand below.
#[derive(Debug, Clone)]
pub enum EventPayload {
    FileCreated {
        diff: String,
        sha: String,
        size: u64,
        baseline: BaselineSource,
    },
    FileModified {
        diff: String,
        sha: String,
        size: u64,
        baseline: BaselineSource,
    },
    FileDeleted,
    FolderCreated,
    FolderDeleted,
    Prompt {
        text: String,
        source: Option<String>,
        model: Option<String>,
    },
    CopilotChat {
        prompt: String,
        response: String,
        source: Option<String>,
        model: Option<String>,
        conversation_id: Option<String>,
    },
    ErrorNote {
        message: String,
        context: Option<serde_json::Value>,
    },
    Summary {
        content: String,
    },
    AiMatch {
        prompt_count: u64,
        code_change_count: u64,
        match_count: u64,
    },
    ImplicationsAnalysis {
        content: String,
        project_id: ProjectId,
        event_count: u64,
    },
}

impl Serialize for EventPayload {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            EventPayload::FileCreated { diff, sha, size, baseline } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("event", "created")?;
                map.serialize_entry("diff", diff)?;
                map.serialize_entry("sha", sha)?;
                map.serialize_entry("size", size)?;
                map.serialize_entry("baseline", baseline)?;
                map.end()
            }
            EventPayload::FileModified { diff, sha, size, baseline } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("event", "modified")?;
                map.serialize_entry("diff", diff)?;
                map.serialize_entry("sha", sha)?;
                map.serialize_entry("size", size)?;
                map.serialize_entry("baseline", baseline)?;
                map.end()
            }
            EventPayload::FileDeleted => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("event", "deleted")?;
                map.end()
            }
            EventPayload::FolderCreated => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("event", "created")?;
                map.serialize_entry("type", "directory")?;
                map.end()
            }
            EventPayload::FolderDeleted => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("event", "deleted")?;
                map.serialize_entry("type", "directory")?;
                map.end()
            }
            EventPayload::Prompt { text, source, model } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("text", text)?;
                map.serialize_entry("source", source)?;
                map.serialize_entry("model", model)?;
                map.end()
            }
            EventPayload::CopilotChat { prompt, response, source, model, conversation_id } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("prompt", prompt)?;
                map.serialize_entry("response", response)?;
                map.serialize_entry("source", source)?;
                map.serialize_entry("model", model)?;
                map.serialize_entry("conversation_id", conversation_id)?;
                map.end()
            }
            EventPayload::ErrorNote { message, context } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("message", message)?;
                map.serialize_entry("context", context)?;
                map.end()
            }
            EventPayload::Summary { content } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("content", content)?;
                map.end()
            }
            EventPayload::AiMatch { prompt_count, code_change_count, match_count } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("prompt_count", prompt_count)?;
                map.serialize_entry("code_change_count", code_change_count)?;
                map.serialize_entry("match_count", match_count)?;
                map.end()
            }
            EventPayload::ImplicationsAnalysis { content, project_id, event_count } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("content", content)?;
                map.serialize_entry("project_id", project_id)?;
                map.serialize_entry("event_count", event_count)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for EventPayload {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let value = serde_json::Value::deserialize(deserializer)?;
        let event = value.get("event").and_then(serde_json::Value::as_str);
        let kind = value.get("type").and_then(serde_json::Value::as_str);
        let from_value = |v: serde_json::Value| serde_json::from_value(v).map_err(D::Error::custom);

        match (event, kind) {
            (Some("created"), Some("directory")) => Ok(EventPayload::FolderCreated),
            (Some("deleted"), Some("directory")) => Ok(EventPayload::FolderDeleted),
            (Some("deleted"), None) => Ok(EventPayload::FileDeleted),
            (Some("created"), None) => {
                #[derive(Deserialize)]
                struct Inner {
                    diff: String,
                    sha: String,
                    size: u64,
                    baseline: BaselineSource,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::FileCreated {
                    diff: inner.diff,
                    sha: inner.sha,
                    size: inner.size,
                    baseline: inner.baseline,
                })
            }
            (Some("modified"), None) => {
                #[derive(Deserialize)]
                struct Inner {
                    diff: String,
                    sha: String,
                    size: u64,
                    baseline: BaselineSource,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::FileModified {
                    diff: inner.diff,
                    sha: inner.sha,
                    size: inner.size,
                    baseline: inner.baseline,
                })
            }
            _ if value.get("text").is_some() => {
                #[derive(Deserialize)]
                struct Inner {
                    text: String,
                    source: Option<String>,
                    model: Option<String>,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::Prompt {
                    text: inner.text,
                    source: inner.source,
                    model: inner.model,
                })
            }
            _ if value.get("prompt").is_some() && value.get("response").is_some() => {
                #[derive(Deserialize)]
                struct Inner {
                    prompt: String,
                    response: String,
                    source: Option<String>,
                    model: Option<String>,
                    conversation_id: Option<String>,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::CopilotChat {
                    prompt: inner.prompt,
                    response: inner.response,
                    source: inner.source,
                    model: inner.model,
                    conversation_id: inner.conversation_id,
                })
            }
            _ if value.get("message").is_some() => {
                #[derive(Deserialize)]
                struct Inner {
                    message: String,
                    context: Option<serde_json::Value>,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::ErrorNote {
                    message: inner.message,
                    context: inner.context,
                })
            }
            _ if value.get("project_id").is_some() && value.get("event_count").is_some() => {
                #[derive(Deserialize)]
                struct Inner {
                    content: String,
                    project_id: ProjectId,
                    event_count: u64,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::ImplicationsAnalysis {
                    content: inner.content,
                    project_id: inner.project_id,
                    event_count: inner.event_count,
                })
            }
            _ if value.get("prompt_count").is_some() => {
                #[derive(Deserialize)]
                struct Inner {
                    prompt_count: u64,
                    code_change_count: u64,
                    match_count: u64,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::AiMatch {
                    prompt_count: inner.prompt_count,
                    code_change_count: inner.code_change_count,
                    match_count: inner.match_count,
                })
            }
            _ if value.get("content").is_some() => {
                #[derive(Deserialize)]
                struct Inner {
                    content: String,
                }
                let inner: Inner = from_value(value)?;
                Ok(EventPayload::Summary { content: inner.content })
            }
            _ => Err(D::Error::custom("unrecognized event payload shape")),
        }
    }
}

/// Marker for whether a `file_change`'s previous bytes came from the
/// in-memory cache or from a version-control HEAD lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    Cache,
    Head,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub project_id: Option<ProjectId>,
    pub instant: DateTime<Utc>,
    pub kind: EventKind,
    pub path: Option<String>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub path: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub ignore_patterns: Vec<String>,
    pub architecture_document_path: Option<String>,
    pub architecture: Option<ArchitectureRecord>,
}

/// Derived stats attached to `GET /projects` list entries, per `spec.md`
/// §4.1 ("list_projects ... including derived stats").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub event_count: u64,
    pub has_architecture: bool,
    pub change_log_size: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectWithStats {
    #[serde(flatten)]
    pub project: Project,
    pub stats: ProjectStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub ignore_patterns: Vec<String>,
    pub architecture_document_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub language: Option<String>,
    pub text: String,
    pub line_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIConversation {
    pub id: ConversationId,
    pub session_id: String,
    pub project_id: Option<ProjectId>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub instant: DateTime<Utc>,
    pub user_prompt: String,
    pub assistant_response: String,
    pub code_snippets: Vec<CodeSnippet>,
    pub file_references: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub matched_to_events: Vec<EventId>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCategory {
    Direct,
    Related,
    Suggested,
}

impl MatchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCategory::Direct => "direct",
            MatchCategory::Related => "related",
            MatchCategory::Suggested => "suggested",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "direct" => MatchCategory::Direct,
            "related" => MatchCategory::Related,
            "suggested" => MatchCategory::Suggested,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AICodeMatch {
    pub id: MatchId,
    pub conversation_id: ConversationId,
    pub event_id: EventId,
    pub match_category: MatchCategory,
    pub confidence: f64,
    pub reasoning: String,
    pub file_overlap_count: u32,
    pub time_delta_seconds: i64,
    pub created_at: DateTime<Utc>,
}

/// Joined timeline row returned by `conversation_timeline`, `spec.md` §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event_id: EventId,
    pub path: Option<String>,
    pub match_category: MatchCategory,
    pub confidence: f64,
    pub reasoning: String,
    pub time_delta_seconds: i64,
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTimeline {
    pub conversation: AIConversation,
    pub matches: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Minor,
    Moderate,
    Major,
}

impl ImpactLevel {
    pub fn from_str(s: &str) -> Self {
        match s {
            "major" => ImpactLevel::Major,
            "moderate" => ImpactLevel::Moderate,
            _ => ImpactLevel::Minor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub event_id: EventId,
    pub instant: DateTime<Utc>,
    pub path: String,
    pub affected_features: Vec<String>,
    pub modified_classes: Vec<String>,
    pub new_classes: Vec<String>,
    pub architectural_change: bool,
    pub impact_level: ImpactLevel,
    pub summary: String,
    pub concerns: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureMapping {
    pub name: String,
    pub classes: Vec<String>,
    pub files: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    pub production: Vec<String>,
    pub development: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiStats {
    pub total: u64,
    pub by_provider: HashMap<String, u64>,
}

/// The max length of `ArchitectureRecord::change_log`, `spec.md` invariant (v).
pub const CHANGE_LOG_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureRecord {
    pub source_document_path: String,
    pub last_updated: DateTime<Utc>,
    pub overview: String,
    pub features: Vec<FeatureMapping>,
    pub class_registry: HashMap<String, String>,
    pub dependencies: Dependencies,
    pub change_log: Vec<ChangeLogEntry>,
}

impl ArchitectureRecord {
    /// Prepend an entry, evicting the oldest if the cap is exceeded.
    /// `spec.md` invariant (v): `|change_log| <= CHANGE_LOG_CAP`.
    pub fn push_change_log_entry(&mut self, entry: ChangeLogEntry) {
        self.change_log.insert(0, entry);
        self.change_log.truncate(CHANGE_LOG_CAP);
    }
}
