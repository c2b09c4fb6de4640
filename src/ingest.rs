//! Ingest API — the write paths external tools call into, `spec.md` §4.6.
//!
//! A plain struct over `Arc<Store>` + `Arc<Broadcaster>` + `Arc<Correlator>`,
//! exposed as inherent async methods so the HTTP layer (`src/http/ingest.rs`)
//! stays a thin translation from JSON to these calls, matching the
//! teacher's preference for keeping request handlers thin and pushing
//! logic into `core`/`orchestrator`-style structs.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::broadcaster::Broadcaster;
use crate::correlator::Correlator;
use crate::error::Result;
use crate::models::{
    AIConversation, CodeSnippet, Event, EventKind, EventPayload, ProjectId,
};
use crate::store::Store;

pub struct Ingest {
    store: Arc<Store>,
    broadcaster: Arc<Broadcaster>,
    correlator: Arc<Correlator>,
}

impl Ingest {
    pub fn new(store: Arc<Store>, broadcaster: Arc<Broadcaster>, correlator: Arc<Correlator>) -> Self {
        Self {
            store,
            broadcaster,
            correlator,
        }
    }

    pub async fn log_prompt(
        &self,
        project_id: Option<ProjectId>,
        text: String,
        source: Option<String>,
        model: Option<String>,
    ) -> Result<Event> {
        let payload = EventPayload::Prompt { text, source, model };
        self.append_and_publish(EventKind::Prompt, project_id, None, payload).await
    }

    pub async fn log_chat(
        &self,
        project_id: Option<ProjectId>,
        prompt: String,
        response: String,
        source: Option<String>,
        model: Option<String>,
        conversation_id: Option<String>,
    ) -> Result<Event> {
        let payload = EventPayload::CopilotChat {
            prompt,
            response,
            source,
            model,
            conversation_id,
        };
        self.append_and_publish(EventKind::CopilotChat, project_id, None, payload).await
    }

    pub async fn log_error(
        &self,
        project_id: Option<ProjectId>,
        message: String,
        context: Option<serde_json::Value>,
    ) -> Result<Event> {
        let payload = EventPayload::ErrorNote { message, context };
        self.append_and_publish(EventKind::Error, project_id, None, payload).await
    }

    /// Inserts an AIConversation row, extracting snippets and file
    /// references deterministically, then schedules the Correlator.
    /// Returns as soon as the conversation row is durable — the caller
    /// never waits on correlation, `spec.md` §4.8.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_ai_conversation(
        &self,
        session_id: String,
        project_id: Option<ProjectId>,
        provider: Option<String>,
        model: Option<String>,
        user_prompt: String,
        assistant_response: String,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<AIConversation> {
        let snippets = extract_snippets(&assistant_response);
        let file_references = extract_file_references(&user_prompt, &assistant_response);

        let conversation = self.store.insert_ai_conversation(
            &session_id,
            project_id,
            provider.as_deref(),
            model.as_deref(),
            &user_prompt,
            &assistant_response,
            &snippets,
            &file_references,
            &metadata,
        )?;

        self.correlator.schedule(conversation.clone());
        Ok(conversation)
    }

    async fn append_and_publish(
        &self,
        kind: EventKind,
        project_id: Option<ProjectId>,
        path: Option<&str>,
        payload: EventPayload,
    ) -> Result<Event> {
        let id = self.store.append_event(kind, project_id, path, &payload)?;
        let event = self.store.read_event(id)?;
        self.broadcaster.publish(event.clone());
        Ok(event)
    }
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n(.*?)\n```").unwrap());

/// Extract each maximal fenced code block, `spec.md` §4.8.
pub fn extract_snippets(text: &str) -> Vec<CodeSnippet> {
    FENCE_RE
        .captures_iter(text)
        .map(|caps| {
            let language = caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()).map(str::to_string);
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string();
            let line_count = body.lines().count();
            CodeSnippet {
                language,
                text: body,
                line_count,
            }
        })
        .collect()
}

static FILE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_./\\-]+\.[A-Za-z0-9]{1,6}").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z][a-zA-Z0-9+.-]*://\S+").unwrap());

/// Extract dotted file-path-looking tokens outside code fences,
/// deduplicated, `spec.md` §4.8. Fenced regions and absolute URLs are
/// stripped first so a snippet body's own paths, or a URL's trailing
/// path segment, can't masquerade as a file reference.
pub fn extract_file_references(user_prompt: &str, assistant_response: &str) -> Vec<String> {
    let stripped_response = FENCE_RE.replace_all(assistant_response, "");
    let combined = format!("{user_prompt}\n{stripped_response}");
    let without_urls = URL_RE.replace_all(&combined, "");

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in FILE_REF_RE.find_iter(&without_urls) {
        let token = m.as_str().to_string();
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_snippets_finds_fenced_blocks_with_language() {
        let text = "intro\n```rust\nfn main() {}\n```\nmore text";
        let snippets = extract_snippets(text);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language.as_deref(), Some("rust"));
        assert_eq!(snippets[0].text, "fn main() {}");
        assert_eq!(snippets[0].line_count, 1);
    }

    #[test]
    fn extract_snippets_handles_no_language_tag() {
        let text = "```\nplain\n```";
        let snippets = extract_snippets(text);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].language.is_none());
    }

    #[test]
    fn extract_file_references_finds_dotted_paths_and_dedupes() {
        let refs = extract_file_references(
            "please update auth/token.py",
            "I modified auth/token.py and also src/main.rs.",
        );
        assert_eq!(refs, vec!["auth/token.py".to_string(), "src/main.rs".to_string()]);
    }

    #[test]
    fn extract_file_references_excludes_urls() {
        let refs = extract_file_references("see https://example.com/readme.md", "ok");
        assert!(refs.is_empty());
    }

    #[test]
    fn extract_file_references_excludes_fenced_snippet_contents() {
        let refs = extract_file_references(
            "no mentions here",
            "```rust\nlet path = \"inner/fake.rs\";\n```\nreal/outer.rs is the real one",
        );
        assert_eq!(refs, vec!["real/outer.rs".to_string()]);
    }
}
