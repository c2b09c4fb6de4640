//! Correlator — links AI conversations to the code changes they likely
//! produced, `spec.md` §4.8.
//!
//! Runs off the hot ingest path: `Ingest::log_ai_conversation` stores the
//! conversation first, then hands it to [`Correlator::correlate`] on a
//! bounded worker pool (`tokio::sync::Semaphore`, mirroring the
//! teacher's `num_cpus`-sized pools), so a slow or unavailable LLM never
//! blocks the caller.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::llm::{LlmClient, MatchCandidate, MatchScore};
use crate::models::{AIConversation, EventKind, MatchCategory};
use crate::store::Store;

pub struct Correlator {
    store: Arc<Store>,
    llm: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    window_secs: i64,
}

impl Correlator {
    pub fn new(store: Arc<Store>, llm: Arc<dyn LlmClient>, worker_concurrency: usize, window_secs: i64) -> Self {
        Self {
            store,
            llm,
            semaphore: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            window_secs,
        }
    }

    /// Schedules correlation for `conversation` on the worker pool.
    /// Fire-and-forget by design: the caller (Ingest API) has already
    /// durably stored the conversation and does not wait on this.
    pub fn schedule(self: &Arc<Self>, conversation: AIConversation) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = this.semaphore.acquire().await;
            if let Err(err) = this.correlate(&conversation).await {
                warn!(conversation_id = conversation.id, error = %err, "correlation failed");
            }
        });
    }

    async fn correlate(&self, conversation: &AIConversation) -> anyhow::Result<()> {
        let Some(project_id) = conversation.project_id else {
            return Ok(());
        };

        let (events, _total) = self.store.list_events(
            Some(project_id),
            Some(EventKind::FileChange),
            None,
            0,
            200,
        )?;

        let window_start = conversation.instant - chrono::Duration::seconds(self.window_secs);
        let window_end = conversation.instant + chrono::Duration::seconds(self.window_secs);

        let candidates: Vec<MatchCandidate> = events
            .iter()
            .filter(|e| e.instant >= window_start && e.instant <= window_end)
            .map(|e| MatchCandidate {
                event_id: e.id,
                path: e.path.clone(),
                diff_excerpt: excerpt(&e.payload),
                time_delta_seconds: (e.instant - conversation.instant).num_seconds(),
            })
            .collect();

        if candidates.is_empty() {
            self.store.update_conversation_matches(conversation.id, &[], 0.0)?;
            return Ok(());
        }

        let prompt_text = format!("{}\n\n{}", conversation.user_prompt, conversation.assistant_response);
        let scores = match self.llm.score_matches(&prompt_text, &candidates).await {
            Ok(scores) => scores,
            Err(err) => {
                warn!(
                    conversation_id = conversation.id,
                    error = %err,
                    "LLM scoring failed, falling back to literal file-reference matching"
                );
                degenerate_matches(conversation, &candidates)
            }
        };

        let mut matched_ids = Vec::with_capacity(scores.len());
        let mut confidence_sum = 0.0_f64;
        for score in &scores {
            let candidate = candidates.iter().find(|c| c.event_id == score.event_id);
            let Some(candidate) = candidate else { continue };
            let category = score.category();
            self.store.insert_ai_match(
                conversation.id,
                score.event_id,
                category,
                score.confidence,
                &score.reasoning,
                file_overlap(conversation, candidate),
                candidate.time_delta_seconds,
            )?;
            matched_ids.push(score.event_id);
            confidence_sum += score.confidence;
        }

        // `spec.md` §4.8: aggregate confidence is the mean of inserted
        // confidences, zero if none were inserted.
        let mean_confidence = if matched_ids.is_empty() {
            0.0
        } else {
            confidence_sum / matched_ids.len() as f64
        };

        self.store
            .update_conversation_matches(conversation.id, &matched_ids, mean_confidence)?;

        self.store.append_event(
            EventKind::AiMatch,
            Some(project_id),
            None,
            &crate::models::EventPayload::AiMatch {
                prompt_count: 1,
                code_change_count: candidates.len() as u64,
                match_count: matched_ids.len() as u64,
            },
        )?;

        info!(
            conversation_id = conversation.id,
            matches = matched_ids.len(),
            "correlation complete"
        );
        Ok(())
    }
}

/// Fallback matcher when the LLM call fails or returns malformed output,
/// `spec.md` §4.8 Fallback: insert a `related` match at confidence 0.5
/// for every candidate whose path appears literally in the
/// conversation's file-reference list.
fn degenerate_matches(conversation: &AIConversation, candidates: &[MatchCandidate]) -> Vec<MatchScore> {
    candidates
        .iter()
        .filter(|candidate| {
            candidate
                .path
                .as_deref()
                .map(|path| conversation.file_references.iter().any(|reference| reference == path))
                .unwrap_or(false)
        })
        .map(|candidate| MatchScore {
            event_id: candidate.event_id,
            category: "related".to_string(),
            confidence: 0.5,
            reasoning: "literal file-reference match (LLM unavailable)".to_string(),
        })
        .collect()
}

fn excerpt(payload: &crate::models::EventPayload) -> String {
    use crate::models::EventPayload::*;
    match payload {
        FileCreated { diff, .. } | FileModified { diff, .. } => diff.chars().take(2000).collect(),
        _ => String::new(),
    }
}

fn file_overlap(conversation: &AIConversation, candidate: &MatchCandidate) -> u32 {
    let Some(path) = &candidate.path else { return 0 };
    conversation
        .file_references
        .iter()
        .filter(|r| path.contains(r.as_str()) || r.contains(path.as_str()))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NoopLlmClient;
    use crate::models::EventPayload;
    use std::collections::HashMap;

    #[tokio::test]
    async fn conversation_with_no_candidates_gets_zero_confidence() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store.create_project("p", "/p", "", vec![], None).unwrap();
        let conversation = store
            .insert_ai_conversation(
                "session-1",
                Some(project.id),
                Some("openai"),
                Some("gpt-4o"),
                "add logging",
                "done",
                &[],
                &[],
                &HashMap::new(),
            )
            .unwrap();

        let correlator = Correlator::new(store.clone(), Arc::new(NoopLlmClient), 2, 300);
        correlator.correlate(&conversation).await.unwrap();

        let refreshed = store.read_ai_conversation(conversation.id).unwrap();
        assert_eq!(refreshed.confidence_score, 0.0);
        assert!(refreshed.matched_to_events.is_empty());
    }

    #[tokio::test]
    async fn candidate_within_window_gets_matched() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store.create_project("p", "/p", "", vec![], None).unwrap();
        store
            .append_event(
                EventKind::FileChange,
                Some(project.id),
                Some("src/main.rs"),
                &EventPayload::FileModified {
                    diff: "+ println!()".to_string(),
                    sha: "abc".to_string(),
                    size: 10,
                    baseline: crate::models::BaselineSource::Cache,
                },
            )
            .unwrap();
        let conversation = store
            .insert_ai_conversation(
                "session-1",
                Some(project.id),
                Some("openai"),
                Some("gpt-4o"),
                "add logging",
                "done",
                &[],
                &["src/main.rs".to_string()],
                &HashMap::new(),
            )
            .unwrap();

        let correlator = Correlator::new(store.clone(), Arc::new(NoopLlmClient), 2, 300);
        correlator.correlate(&conversation).await.unwrap();

        let matches = store.list_ai_matches(conversation.id).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_category, MatchCategory::Related);
    }

    struct FixedScoresLlm(Vec<MatchScore>);

    #[async_trait::async_trait]
    impl LlmClient for FixedScoresLlm {
        async fn score_matches(
            &self,
            _prompt: &str,
            _candidates: &[MatchCandidate],
        ) -> Result<Vec<MatchScore>, crate::error::DevtraceError> {
            Ok(self.0.clone())
        }

        async fn summarize_impact(
            &self,
            _overview: &str,
            _diff: &str,
            _path: &str,
        ) -> Result<crate::llm::ImpactSummary, crate::error::DevtraceError> {
            unreachable!("not exercised by correlator tests")
        }
    }

    #[tokio::test]
    async fn aggregate_confidence_is_the_mean_not_the_max() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store.create_project("p", "/p", "", vec![], None).unwrap();
        let event_a = store
            .append_event(
                EventKind::FileChange,
                Some(project.id),
                Some("a.rs"),
                &EventPayload::FileModified {
                    diff: "+ a".to_string(),
                    sha: "a".to_string(),
                    size: 1,
                    baseline: crate::models::BaselineSource::Cache,
                },
            )
            .unwrap();
        let event_b = store
            .append_event(
                EventKind::FileChange,
                Some(project.id),
                Some("b.rs"),
                &EventPayload::FileModified {
                    diff: "+ b".to_string(),
                    sha: "b".to_string(),
                    size: 1,
                    baseline: crate::models::BaselineSource::Cache,
                },
            )
            .unwrap();
        let conversation = store
            .insert_ai_conversation(
                "session-1",
                Some(project.id),
                Some("openai"),
                Some("gpt-4o"),
                "touch a and b",
                "done",
                &[],
                &[],
                &HashMap::new(),
            )
            .unwrap();

        let llm = FixedScoresLlm(vec![
            MatchScore {
                event_id: event_a,
                category: "direct".to_string(),
                confidence: 1.0,
                reasoning: "a".to_string(),
            },
            MatchScore {
                event_id: event_b,
                category: "related".to_string(),
                confidence: 0.0,
                reasoning: "b".to_string(),
            },
        ]);
        let correlator = Correlator::new(store.clone(), Arc::new(llm), 2, 300);
        correlator.correlate(&conversation).await.unwrap();

        let refreshed = store.read_ai_conversation(conversation.id).unwrap();
        assert_eq!(refreshed.confidence_score, 0.5);
    }

    struct FailingLlm;

    #[async_trait::async_trait]
    impl LlmClient for FailingLlm {
        async fn score_matches(
            &self,
            _prompt: &str,
            _candidates: &[MatchCandidate],
        ) -> Result<Vec<MatchScore>, crate::error::DevtraceError> {
            Err(crate::error::DevtraceError::Transient("LLM down".to_string()))
        }

        async fn summarize_impact(
            &self,
            _overview: &str,
            _diff: &str,
            _path: &str,
        ) -> Result<crate::llm::ImpactSummary, crate::error::DevtraceError> {
            unreachable!("not exercised by correlator tests")
        }
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_literal_file_reference_matches() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store.create_project("p", "/p", "", vec![], None).unwrap();
        store
            .append_event(
                EventKind::FileChange,
                Some(project.id),
                Some("src/main.rs"),
                &EventPayload::FileModified {
                    diff: "+ println!()".to_string(),
                    sha: "abc".to_string(),
                    size: 10,
                    baseline: crate::models::BaselineSource::Cache,
                },
            )
            .unwrap();
        store
            .append_event(
                EventKind::FileChange,
                Some(project.id),
                Some("src/other.rs"),
                &EventPayload::FileModified {
                    diff: "+ unrelated".to_string(),
                    sha: "def".to_string(),
                    size: 10,
                    baseline: crate::models::BaselineSource::Cache,
                },
            )
            .unwrap();
        let conversation = store
            .insert_ai_conversation(
                "session-1",
                Some(project.id),
                Some("openai"),
                Some("gpt-4o"),
                "add logging",
                "done",
                &[],
                &["src/main.rs".to_string()],
                &HashMap::new(),
            )
            .unwrap();

        let correlator = Correlator::new(store.clone(), Arc::new(FailingLlm), 2, 300);
        correlator.correlate(&conversation).await.unwrap();

        let matches = store.list_ai_matches(conversation.id).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].confidence, 0.5);
        assert_eq!(matches[0].match_category, MatchCategory::Related);

        let refreshed = store.read_ai_conversation(conversation.id).unwrap();
        assert_eq!(refreshed.confidence_score, 0.5);
    }
}
