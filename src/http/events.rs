//! `/events`, `/events/stream`, `/events/export`, `spec.md` §6.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query as QueryExtractor, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::Result;
use crate::models::{Event, EventKind, ProjectId};
use crate::query::Page;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub project_id: Option<ProjectId>,
    pub kind: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

pub async fn list_events(
    State(state): State<AppState>,
    QueryExtractor(q): QueryExtractor<ListEventsQuery>,
) -> Result<Json<Page<Event>>> {
    let kind = q.kind.as_deref().and_then(EventKind::from_str);
    Ok(Json(state.query.list_events(q.project_id, kind, q.search.as_deref(), q.offset, q.limit)?))
}

/// Live push channel: one SSE frame per Event envelope. A lagging
/// subscriber's stream ends (forced disconnect), per the Broadcaster's
/// documented overflow policy; reconnecting clients recover missed
/// events via `GET /events`.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let rx = state.broadcaster.attach();
    let stream = BroadcastStream::new(rx).take_while(|item| futures::future::ready(item.is_ok())).map(
        |item| {
            let event = item.expect("take_while filters errors");
            let json = serde_json::to_string(&event).unwrap_or_default();
            Ok(SseEvent::default().data(json))
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

pub async fn export_events(
    State(state): State<AppState>,
    QueryExtractor(q): QueryExtractor<ExportQuery>,
) -> Result<axum::response::Response> {
    use axum::response::IntoResponse;

    let page = state.query.list_events(q.project_id, None, None, 0, 10_000)?;
    if q.format == "markdown" {
        let mut out = String::from("# Event export\n\n");
        for event in &page.items {
            out.push_str(&format!(
                "- `#{}` {} {} {}\n",
                event.id,
                event.instant.to_rfc3339(),
                event.kind.as_str(),
                event.path.clone().unwrap_or_default()
            ));
        }
        Ok(([(axum::http::header::CONTENT_TYPE, "text/markdown")], out).into_response())
    } else {
        Ok(Json(page.items).into_response())
    }
}
