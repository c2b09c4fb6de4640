//! LLM client abstraction, `spec.md` §5 and §9.
//!
//! Both the Correlator and the Architecture Tracker go through this
//! trait rather than calling an HTTP client directly, so tests can swap
//! in a deterministic client and so a missing `OPENAI_API_KEY` degrades
//! to a no-op instead of failing startup. Grounded on the teacher's
//! `storage/r2.rs`, which builds a bare `reqwest::Client` and wraps every
//! call's error into its own error type rather than leaking `reqwest`
//! errors to callers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DevtraceError;
use crate::models::{EventId, MatchCategory};

/// One candidate event offered to the LLM for correlation scoring.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub event_id: EventId,
    pub path: Option<String>,
    pub diff_excerpt: String,
    pub time_delta_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchScore {
    pub event_id: EventId,
    pub category: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl MatchScore {
    pub fn category(&self) -> MatchCategory {
        MatchCategory::from_str(&self.category).unwrap_or(MatchCategory::Related)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImpactSummary {
    pub summary: String,
    pub affected_features: Vec<String>,
    pub modified_classes: Vec<String>,
    pub new_classes: Vec<String>,
    pub architectural_change: bool,
    pub impact_level: String,
    pub concerns: Vec<String>,
    pub recommendations: Vec<String>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn score_matches(
        &self,
        prompt_text: &str,
        candidates: &[MatchCandidate],
    ) -> Result<Vec<MatchScore>, DevtraceError>;

    async fn summarize_impact(
        &self,
        architecture_overview: &str,
        diff: &str,
        path: &str,
    ) -> Result<ImpactSummary, DevtraceError>;
}

/// Used whenever `OPENAI_API_KEY` is unset — correlation and impact
/// analysis degrade gracefully instead of erroring, `spec.md` §5 "LLM
/// unavailable" edge case.
pub struct NoopLlmClient;

#[async_trait]
impl LlmClient for NoopLlmClient {
    async fn score_matches(
        &self,
        _prompt_text: &str,
        candidates: &[MatchCandidate],
    ) -> Result<Vec<MatchScore>, DevtraceError> {
        Ok(candidates
            .iter()
            .map(|c| MatchScore {
                event_id: c.event_id,
                category: "related".to_string(),
                confidence: 0.0,
                reasoning: "LLM unavailable; falling back to time-proximity ordering".to_string(),
            })
            .collect())
    }

    async fn summarize_impact(
        &self,
        _architecture_overview: &str,
        _diff: &str,
        path: &str,
    ) -> Result<ImpactSummary, DevtraceError> {
        Ok(ImpactSummary {
            summary: format!("{path} changed; LLM unavailable for impact analysis"),
            affected_features: vec![],
            modified_classes: vec![],
            new_classes: vec![],
            architectural_change: false,
            impact_level: "minor".to_string(),
            concerns: vec![],
            recommendations: vec![],
        })
    }
}

pub struct OpenAiLlmClient {
    client: reqwest::Client,
    api_key: String,
    scoring_model: String,
    summarizing_model: String,
    timeout: Duration,
}

impl OpenAiLlmClient {
    pub fn new(api_key: String, scoring_model: String, summarizing_model: String, timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            scoring_model,
            summarizing_model,
            timeout,
        }
    }

    async fn chat_completion(&self, model: &str, system: &str, user: &str) -> Result<String, DevtraceError> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            response_format: ResponseFormat<'a>,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
        }
        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }
        #[derive(Deserialize)]
        struct ResponseMessage {
            content: String,
        }

        let body = Request {
            model,
            messages: vec![
                Message { role: "system", content: system },
                Message { role: "user", content: user },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        let send = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| DevtraceError::Transient("OpenAI request timed out".to_string()))?
            .map_err(|e| DevtraceError::Transient(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DevtraceError::Transient(format!(
                "OpenAI returned status {}",
                response.status()
            )));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| DevtraceError::Transient(format!("failed to parse OpenAI response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DevtraceError::Transient("OpenAI returned no choices".to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn score_matches(
        &self,
        prompt_text: &str,
        candidates: &[MatchCandidate],
    ) -> Result<Vec<MatchScore>, DevtraceError> {
        let candidates_json = serde_json::to_string(candidates)
            .map_err(|e| DevtraceError::Validation(e.to_string()))?;
        let user = format!(
            "AI prompt/response:\n{prompt_text}\n\nCandidate code-change events (JSON):\n{candidates_json}\n\n\
             Return a JSON object {{\"matches\": [{{\"event_id\": number, \"category\": \"direct\"|\"related\"|\"suggested\", \
             \"confidence\": number 0..1, \"reasoning\": string}}]}}."
        );
        let raw = self
            .chat_completion(
                &self.scoring_model,
                "You correlate AI coding-assistant conversations with code-change events. Respond with strict JSON only.",
                &user,
            )
            .await?;

        #[derive(Deserialize)]
        struct Wrapper {
            matches: Vec<MatchScore>,
        }
        let wrapper: Wrapper =
            serde_json::from_str(&raw).map_err(|e| DevtraceError::Transient(format!("malformed LLM JSON: {e}")))?;
        Ok(wrapper.matches)
    }

    async fn summarize_impact(
        &self,
        architecture_overview: &str,
        diff: &str,
        path: &str,
    ) -> Result<ImpactSummary, DevtraceError> {
        let user = format!(
            "Architecture overview:\n{architecture_overview}\n\nChanged file: {path}\nUnified diff:\n{diff}\n\n\
             Return a JSON object matching: {{\"summary\": string, \"affected_features\": [string], \
             \"modified_classes\": [string], \"new_classes\": [string], \"architectural_change\": bool, \
             \"impact_level\": \"minor\"|\"moderate\"|\"major\", \"concerns\": [string], \"recommendations\": [string]}}."
        );
        let raw = self
            .chat_completion(
                &self.summarizing_model,
                "You analyze the architectural impact of a code change against a living architecture summary. Respond with strict JSON only.",
                &user,
            )
            .await?;
        serde_json::from_str(&raw).map_err(|e| DevtraceError::Transient(format!("malformed LLM JSON: {e}")))
    }
}
