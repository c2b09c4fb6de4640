//! `/prompt`, `/copilot`, `/error`, `/ai-chat` handlers, `spec.md` §6.

use std::collections::HashMap;

use axum::extract::{Path, Query as QueryExtractor, State};
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::models::{AIConversation, AiStats, ConversationTimeline, Event, ProjectId};
use crate::query::Page;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub project_id: Option<ProjectId>,
    pub text: String,
    pub source: Option<String>,
    pub model: Option<String>,
}

pub async fn log_prompt(State(state): State<AppState>, Json(req): Json<PromptRequest>) -> Result<Json<Event>> {
    Ok(Json(
        state
            .ingest
            .log_prompt(req.project_id, req.text, req.source, req.model)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub project_id: Option<ProjectId>,
    pub prompt: String,
    pub response: String,
    pub source: Option<String>,
    pub model: Option<String>,
    pub conversation_id: Option<String>,
}

pub async fn log_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Json<Event>> {
    Ok(Json(
        state
            .ingest
            .log_chat(req.project_id, req.prompt, req.response, req.source, req.model, req.conversation_id)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ErrorRequest {
    pub project_id: Option<ProjectId>,
    pub message: String,
    pub context: Option<serde_json::Value>,
}

pub async fn log_error(State(state): State<AppState>, Json(req): Json<ErrorRequest>) -> Result<Json<Event>> {
    Ok(Json(state.ingest.log_error(req.project_id, req.message, req.context).await?))
}

#[derive(Debug, Deserialize)]
pub struct AiChatRequest {
    pub session_id: String,
    pub project_id: Option<ProjectId>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub user_prompt: String,
    pub assistant_response: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

pub async fn log_ai_conversation(
    State(state): State<AppState>,
    Json(req): Json<AiChatRequest>,
) -> Result<Json<AIConversation>> {
    Ok(Json(
        state
            .ingest
            .log_ai_conversation(
                req.session_id,
                req.project_id,
                req.provider,
                req.model,
                req.user_prompt,
                req.assistant_response,
                req.metadata,
            )
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListAiChatQuery {
    pub project_id: Option<ProjectId>,
    pub ai_provider: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_limit() -> u64 {
    50
}

pub async fn list_ai_conversations(
    State(state): State<AppState>,
    QueryExtractor(q): QueryExtractor<ListAiChatQuery>,
) -> Result<Json<Page<AIConversation>>> {
    Ok(Json(
        state
            .query
            .list_ai_conversations(q.project_id, q.ai_provider.as_deref(), q.limit, q.offset)?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AiStatsQuery {
    pub project_id: Option<ProjectId>,
}

/// Registered before `/ai-chat/{id}` in the router so this never
/// shadows the single-conversation handler, `spec.md` §9 "Open question
/// (route shadowing)".
pub async fn ai_chat_stats(
    State(state): State<AppState>,
    QueryExtractor(q): QueryExtractor<AiStatsQuery>,
) -> Result<Json<AiStats>> {
    Ok(Json(state.query.ai_stats(q.project_id)?))
}

pub async fn get_ai_conversation(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<AIConversation>> {
    Ok(Json(state.query.read_ai_conversation(id)?))
}

pub async fn conversation_timeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ConversationTimeline>> {
    Ok(Json(state.query.conversation_timeline(id)?))
}

/// Manual Correlator trigger, `spec.md` §6.
pub async fn trigger_match(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<AIConversation>> {
    let conversation = state.query.read_ai_conversation(id)?;
    state.correlator.schedule(conversation.clone());
    Ok(Json(conversation))
}
