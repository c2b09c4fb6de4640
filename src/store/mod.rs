//! The Store — sole durable home of Projects, Events, AIConversations, and
//! AICodeMatches, `spec.md` §4.1.
//!
//! Backed by `rusqlite` behind a `parking_lot::Mutex`, following the
//! teacher's preference for `parking_lot` locks over `std::sync` ones
//! throughout `core/forge.rs` and `orchestrator.rs`. All mutating
//! operations accept primitive values only; the store never interprets
//! an event payload.

mod schema;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{StoreError, StoreResult};
use crate::models::*;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub fn create_project(
        &self,
        name: &str,
        path: &str,
        description: &str,
        ignore_patterns: Vec<String>,
        architecture_document_path: Option<String>,
    ) -> StoreResult<Project> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let patterns_json = serde_json::to_string(&ignore_patterns)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let result = conn.execute(
            "INSERT INTO projects (name, path, description, created_at, active, ignore_patterns, architecture_document_path)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            params![
                name,
                path,
                description,
                now.to_rfc3339(),
                patterns_json,
                architecture_document_path,
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Conflict(format!(
                    "project already registered at path {path}"
                )))
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_project(id)
    }

    pub fn get_project(&self, id: ProjectId) -> StoreResult<Project> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM projects WHERE id = ?1", params![id], row_to_project)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn update_project_config(
        &self,
        id: ProjectId,
        config: &ProjectConfig,
    ) -> StoreResult<Project> {
        let conn = self.conn.lock();
        let patterns_json = serde_json::to_string(&config.ignore_patterns)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let changed = conn.execute(
            "UPDATE projects SET ignore_patterns = ?1, architecture_document_path = ?2 WHERE id = ?3",
            params![patterns_json, config.architecture_document_path, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        drop(conn);
        self.get_project(id)
    }

    pub fn set_project_active(&self, id: ProjectId, active: bool) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE projects SET active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn update_project_architecture(
        &self,
        id: ProjectId,
        record: &ArchitectureRecord,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let json = serde_json::to_string(record).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let changed = conn.execute(
            "UPDATE projects SET architecture = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete_project(&self, id: ProjectId) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        // Cascade: foreign keys are ON, but events/ai_conversations rows
        // inserted before PRAGMA foreign_keys took effect on an older
        // connection could still linger, so sweep explicitly too.
        conn.execute("DELETE FROM events WHERE project_id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM ai_code_matches WHERE conversation_id IN (SELECT id FROM ai_conversations WHERE project_id = ?1)",
            params![id],
        )?;
        conn.execute("DELETE FROM ai_conversations WHERE project_id = ?1", params![id])?;
        Ok(())
    }

    pub fn list_projects(&self, active_filter: Option<bool>) -> StoreResult<Vec<ProjectWithStats>> {
        let conn = self.conn.lock();
        let (sql, active_param) = match active_filter {
            Some(active) => (
                "SELECT * FROM projects WHERE active = ?1 ORDER BY id".to_string(),
                Some(active as i64),
            ),
            None => ("SELECT * FROM projects ORDER BY id".to_string(), None),
        };

        let mut stmt = conn.prepare(&sql)?;
        let projects: Vec<Project> = match active_param {
            Some(v) => stmt
                .query_map(params![v], row_to_project)?
                .collect::<std::result::Result<_, _>>()?,
            None => stmt
                .query_map([], row_to_project)?
                .collect::<std::result::Result<_, _>>()?,
        };
        drop(stmt);

        let mut out = Vec::with_capacity(projects.len());
        for project in projects {
            let event_count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE project_id = ?1",
                params![project.id],
                |r| r.get::<_, i64>(0),
            )? as u64;
            let last_updated: Option<DateTime<Utc>> = conn
                .query_row(
                    "SELECT instant FROM events WHERE project_id = ?1 ORDER BY id DESC LIMIT 1",
                    params![project.id],
                    |r| r.get::<_, String>(0),
                )
                .optional()?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let stats = ProjectStats {
                event_count,
                has_architecture: project.architecture.is_some(),
                change_log_size: project
                    .architecture
                    .as_ref()
                    .map(|a| a.change_log.len())
                    .unwrap_or(0),
                last_updated,
            };
            out.push(ProjectWithStats { project, stats });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Atomic append; the returned id is durable by the time this
    /// returns, per the write contract in `spec.md` §4.1.
    pub fn append_event(
        &self,
        kind: EventKind,
        project_id: Option<ProjectId>,
        path: Option<&str>,
        payload: &EventPayload,
    ) -> StoreResult<EventId> {
        let conn = self.conn.lock();
        let payload_json =
            serde_json::to_string(payload).map_err(|e| StoreError::Invalid(e.to_string()))?;
        conn.execute(
            "INSERT INTO events (project_id, instant, kind, path, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, Utc::now().to_rfc3339(), kind.as_str(), path, payload_json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn read_event(&self, id: EventId) -> StoreResult<Event> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM events WHERE id = ?1", params![id], row_to_event)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// `spec.md` §4.7: ordering strictly descending by id; `search` is a
    /// case-insensitive substring match on `path` and the stringified
    /// payload; `total` reflects the same filter set as `items`.
    pub fn list_events(
        &self,
        project_id: Option<ProjectId>,
        kind: Option<EventKind>,
        search: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> StoreResult<(Vec<Event>, u64)> {
        let conn = self.conn.lock();
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(pid) = project_id {
            clauses.push(format!("project_id = ?{}", values.len() + 1));
            values.push(Box::new(pid));
        }
        if let Some(k) = kind {
            clauses.push(format!("kind = ?{}", values.len() + 1));
            values.push(Box::new(k.as_str().to_string()));
        }
        if let Some(s) = search {
            let pattern = format!("%{}%", s.to_lowercase());
            clauses.push(format!(
                "(LOWER(COALESCE(path, '')) LIKE ?{} OR LOWER(payload) LIKE ?{})",
                values.len() + 1,
                values.len() + 2
            ));
            values.push(Box::new(pattern.clone()));
            values.push(Box::new(pattern));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM events {where_sql}");
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let total: u64 =
            conn.query_row(&count_sql, param_refs.as_slice(), |r| r.get::<_, i64>(0))? as u64;

        let list_sql = format!(
            "SELECT * FROM events {where_sql} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            values.len() + 1,
            values.len() + 2
        );
        let mut list_values = values;
        list_values.push(Box::new(limit as i64));
        list_values.push(Box::new(offset as i64));
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            list_values.iter().map(|v| v.as_ref()).collect();

        let mut stmt = conn.prepare(&list_sql)?;
        let items: Vec<Event> = stmt
            .query_map(param_refs.as_slice(), row_to_event)?
            .collect::<std::result::Result<_, _>>()?;

        Ok((items, total))
    }

    // ------------------------------------------------------------------
    // AI conversations
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_ai_conversation(
        &self,
        session_id: &str,
        project_id: Option<ProjectId>,
        provider: Option<&str>,
        model: Option<&str>,
        user_prompt: &str,
        assistant_response: &str,
        code_snippets: &[CodeSnippet],
        file_references: &[String],
        metadata: &HashMap<String, serde_json::Value>,
    ) -> StoreResult<AIConversation> {
        let conn = self.conn.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO ai_conversations
                (session_id, project_id, provider, model, instant, user_prompt, assistant_response,
                 code_snippets, file_references, metadata, matched_to_events, confidence_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, '[]', 0.0)",
            params![
                session_id,
                project_id,
                provider,
                model,
                now.to_rfc3339(),
                user_prompt,
                assistant_response,
                serde_json::to_string(code_snippets).map_err(|e| StoreError::Invalid(e.to_string()))?,
                serde_json::to_string(file_references).map_err(|e| StoreError::Invalid(e.to_string()))?,
                serde_json::to_string(metadata).map_err(|e| StoreError::Invalid(e.to_string()))?,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.read_ai_conversation(id)
    }

    pub fn read_ai_conversation(&self, id: ConversationId) -> StoreResult<AIConversation> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM ai_conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn list_ai_conversations(
        &self,
        project_id: Option<ProjectId>,
        provider: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<AIConversation>, u64)> {
        let conn = self.conn.lock();
        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(pid) = project_id {
            clauses.push(format!("project_id = ?{}", values.len() + 1));
            values.push(Box::new(pid));
        }
        if let Some(p) = provider {
            clauses.push(format!("provider = ?{}", values.len() + 1));
            values.push(Box::new(p.to_string()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM ai_conversations {where_sql}");
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let total: u64 =
            conn.query_row(&count_sql, param_refs.as_slice(), |r| r.get::<_, i64>(0))? as u64;

        let list_sql = format!(
            "SELECT * FROM ai_conversations {where_sql} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            values.len() + 1,
            values.len() + 2
        );
        let mut list_values = values;
        list_values.push(Box::new(limit as i64));
        list_values.push(Box::new(offset as i64));
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            list_values.iter().map(|v| v.as_ref()).collect();

        let mut stmt = conn.prepare(&list_sql)?;
        let items = stmt
            .query_map(param_refs.as_slice(), row_to_conversation)?
            .collect::<std::result::Result<_, _>>()?;
        Ok((items, total))
    }

    /// Overwrites `matched_to_events` and `confidence_score` after the
    /// Correlator finishes, `spec.md` §4.8.
    pub fn update_conversation_matches(
        &self,
        id: ConversationId,
        matched_to_events: &[EventId],
        confidence_score: f64,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let json = serde_json::to_string(matched_to_events)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let changed = conn.execute(
            "UPDATE ai_conversations SET matched_to_events = ?1, confidence_score = ?2 WHERE id = ?3",
            params![json, confidence_score, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn insert_ai_match(
        &self,
        conversation_id: ConversationId,
        event_id: EventId,
        match_category: MatchCategory,
        confidence: f64,
        reasoning: &str,
        file_overlap_count: u32,
        time_delta_seconds: i64,
    ) -> StoreResult<MatchId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ai_code_matches
                (conversation_id, event_id, match_category, confidence, reasoning, file_overlap_count, time_delta_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation_id,
                event_id,
                match_category.as_str(),
                confidence,
                reasoning,
                file_overlap_count,
                time_delta_seconds,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_ai_matches(&self, conversation_id: ConversationId) -> StoreResult<Vec<AICodeMatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM ai_code_matches WHERE conversation_id = ?1 ORDER BY confidence DESC",
        )?;
        let items = stmt
            .query_map(params![conversation_id], row_to_match)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(items)
    }

    pub fn ai_stats(&self, project_id: Option<ProjectId>) -> StoreResult<AiStats> {
        let conn = self.conn.lock();
        let (total_sql, by_provider_sql, param): (&str, &str, Option<ProjectId>) = if project_id.is_some()
        {
            (
                "SELECT COUNT(*) FROM ai_conversations WHERE project_id = ?1",
                "SELECT COALESCE(provider, 'unknown'), COUNT(*) FROM ai_conversations WHERE project_id = ?1 GROUP BY provider",
                project_id,
            )
        } else {
            (
                "SELECT COUNT(*) FROM ai_conversations",
                "SELECT COALESCE(provider, 'unknown'), COUNT(*) FROM ai_conversations GROUP BY provider",
                None,
            )
        };

        let total: u64 = match param {
            Some(pid) => conn.query_row(total_sql, params![pid], |r| r.get::<_, i64>(0))? as u64,
            None => conn.query_row(total_sql, [], |r| r.get::<_, i64>(0))? as u64,
        };

        let mut stmt = conn.prepare(by_provider_sql)?;
        let rows: Vec<(String, i64)> = match param {
            Some(pid) => stmt
                .query_map(params![pid], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<_, _>>()?,
            None => stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<_, _>>()?,
        };

        let by_provider = rows.into_iter().map(|(k, v)| (k, v as u64)).collect();
        Ok(AiStats { total, by_provider })
    }
}

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    let ignore_patterns_json: String = row.get("ignore_patterns")?;
    let ignore_patterns: Vec<String> = serde_json::from_str(&ignore_patterns_json).unwrap_or_default();
    let architecture_json: Option<String> = row.get("architecture")?;
    let architecture = architecture_json.and_then(|s| serde_json::from_str(&s).ok());
    let created_at: String = row.get("created_at")?;

    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        description: row.get("description")?,
        created_at: parse_rfc3339(&created_at),
        active: row.get::<_, i64>("active")? != 0,
        ignore_patterns,
        architecture_document_path: row.get("architecture_document_path")?,
        architecture,
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let kind_str: String = row.get("kind")?;
    let payload_json: String = row.get("payload")?;
    let instant: String = row.get("instant")?;
    Ok(Event {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        instant: parse_rfc3339(&instant),
        kind: EventKind::from_str(&kind_str).unwrap_or(EventKind::Error),
        path: row.get("path")?,
        payload: serde_json::from_str(&payload_json).unwrap_or(EventPayload::Summary {
            content: String::new(),
        }),
    })
}

fn row_to_conversation(row: &Row) -> rusqlite::Result<AIConversation> {
    let instant: String = row.get("instant")?;
    let snippets_json: String = row.get("code_snippets")?;
    let refs_json: String = row.get("file_references")?;
    let metadata_json: String = row.get("metadata")?;
    let matched_json: String = row.get("matched_to_events")?;
    Ok(AIConversation {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        project_id: row.get("project_id")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        instant: parse_rfc3339(&instant),
        user_prompt: row.get("user_prompt")?,
        assistant_response: row.get("assistant_response")?,
        code_snippets: serde_json::from_str(&snippets_json).unwrap_or_default(),
        file_references: serde_json::from_str(&refs_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        matched_to_events: serde_json::from_str(&matched_json).unwrap_or_default(),
        confidence_score: row.get("confidence_score")?,
    })
}

fn row_to_match(row: &Row) -> rusqlite::Result<AICodeMatch> {
    let category: String = row.get("match_category")?;
    let created_at: String = row.get("created_at")?;
    Ok(AICodeMatch {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        event_id: row.get("event_id")?,
        match_category: MatchCategory::from_str(&category).unwrap_or(MatchCategory::Related),
        confidence: row.get("confidence")?,
        reasoning: row.get("reasoning")?,
        file_overlap_count: row.get::<_, i64>("file_overlap_count")? as u32,
        time_delta_seconds: row.get("time_delta_seconds")?,
        created_at: parse_rfc3339(&created_at),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_fetch_project() {
        let store = store();
        let project = store
            .create_project("A", "/p/a", "", vec![], None)
            .unwrap();
        assert_eq!(project.name, "A");
        assert!(project.active);

        let fetched = store.get_project(project.id).unwrap();
        assert_eq!(fetched.path, "/p/a");
    }

    #[test]
    fn duplicate_project_path_is_conflict() {
        let store = store();
        store.create_project("A", "/p/a", "", vec![], None).unwrap();
        let err = store.create_project("B", "/p/a", "", vec![], None).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn append_event_ids_strictly_increase() {
        let store = store();
        let payload = EventPayload::Summary { content: "x".into() };
        let id1 = store.append_event(EventKind::Summary, None, None, &payload).unwrap();
        let id2 = store.append_event(EventKind::Summary, None, None, &payload).unwrap();
        assert!(id2 > id1);
    }

    #[test]
    fn pagination_is_disjoint_and_concatenates() {
        let store = store();
        let payload = EventPayload::Summary { content: "x".into() };
        for _ in 0..30 {
            store.append_event(EventKind::Summary, None, None, &payload).unwrap();
        }
        let (page1, total) = store.list_events(None, None, None, 0, 10).unwrap();
        let (page2, _) = store.list_events(None, None, None, 10, 10).unwrap();
        let (all, _) = store.list_events(None, None, None, 0, 20).unwrap();
        assert_eq!(total, 30);
        assert_eq!(page1.len(), 10);
        assert_eq!(page2.len(), 10);
        let combined_ids: Vec<_> = page1.iter().chain(page2.iter()).map(|e| e.id).collect();
        let all_ids: Vec<_> = all.iter().map(|e| e.id).collect();
        assert_eq!(combined_ids, all_ids);
    }

    #[test]
    fn delete_project_cascades_events() {
        let store = store();
        let project = store.create_project("A", "/p/a", "", vec![], None).unwrap();
        let payload = EventPayload::Summary { content: "x".into() };
        store
            .append_event(EventKind::Summary, Some(project.id), None, &payload)
            .unwrap();
        store.delete_project(project.id).unwrap();
        let (items, total) = store.list_events(Some(project.id), None, None, 0, 10).unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());
    }

    #[test]
    fn search_filters_by_path_and_payload() {
        let store = store();
        store
            .append_event(
                EventKind::FileChange,
                None,
                Some("src/auth/token.rs"),
                &EventPayload::FileModified {
                    diff: "diff".into(),
                    sha: "abc".into(),
                    size: 10,
                    baseline: BaselineSource::Cache,
                },
            )
            .unwrap();
        store
            .append_event(
                EventKind::FileChange,
                None,
                Some("src/main.rs"),
                &EventPayload::FileModified {
                    diff: "diff".into(),
                    sha: "def".into(),
                    size: 10,
                    baseline: BaselineSource::Cache,
                },
            )
            .unwrap();

        let (items, total) = store.list_events(None, None, Some("auth"), 0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].path.as_deref(), Some("src/auth/token.rs"));
    }
}
