//! 리랭킹 단계
//!
//! 검색 후보를 (질문, 후보 텍스트) 쌍 단위로 다시 채점하여
//! 관련도 내림차순으로 재정렬하고 상위만 남깁니다.
//! 채점 실패 시 원래 순서를 유지하고 폴백 발생을 기록합니다.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::TextGenerator;

use super::PipelineState;

/// 채점 프롬프트에 넣을 후보 텍스트 최대 길이
const MAX_PASSAGE_CHARS: usize = 800;

// ============================================================================
// RelevanceScorer Trait
// ============================================================================

/// 크로스 인코더 스타일 관련도 채점기
///
/// 각 (질문, 후보) 쌍에 대해 높을수록 관련 있는 점수를 돌려줍니다.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// 모든 후보 채점 (입력 순서대로)
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>>;
}

// ============================================================================
// LLM-backed Scorer
// ============================================================================

/// LLM을 관련도 판정기로 쓰는 채점기
///
/// 후보마다 JSON 판정을 요청하고 0.0~1.0 점수로 변환합니다.
pub struct LlmRelevanceScorer {
    generator: Arc<dyn TextGenerator>,
}

impl LlmRelevanceScorer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());

        for passage in passages {
            let snippet: String = passage.chars().take(MAX_PASSAGE_CHARS).collect();
            let prompt = format!(
                "Judge whether the following passage is relevant to the user question. \
                 Answer with ONLY a JSON object: {{\"relevant\": true/false, \"confidence\": 0.0-1.0}}

Question: {question}

Passage:
{snippet}

Response:"
            );

            let response = self.generator.generate(&prompt).await?;
            scores.push(parse_relevance_score(&response));
        }

        Ok(scores)
    }
}

/// 판정 응답을 점수로 변환
///
/// JSON 파싱 -> 응답에 묻힌 JSON 추출 -> 키워드 순으로 시도합니다.
fn parse_relevance_score(content: &str) -> f32 {
    #[derive(Deserialize)]
    struct RelevanceVerdict {
        relevant: bool,
        #[serde(default = "default_confidence")]
        confidence: f32,
    }

    fn default_confidence() -> f32 {
        0.5
    }

    fn verdict_score(v: RelevanceVerdict) -> f32 {
        let base = if v.relevant { 0.5 } else { 0.0 };
        base + v.confidence.clamp(0.0, 1.0) * 0.5
    }

    if let Ok(v) = serde_json::from_str::<RelevanceVerdict>(content.trim()) {
        return verdict_score(v);
    }

    // 모델이 JSON 주변에 말을 덧붙였을 수 있음
    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<RelevanceVerdict>(&content[start..=end]) {
                return verdict_score(v);
            }
        }
    }

    // 키워드 폴백
    let lower = content.to_lowercase();
    if lower.contains("\"relevant\": true") || lower.contains("yes") {
        0.7
    } else if lower.contains("\"relevant\": false") || lower.contains("no") {
        0.2
    } else {
        0.5
    }
}

// ============================================================================
// Rerank Stage
// ============================================================================

/// 리랭킹 단계 실행
///
/// 후보가 1개 이하면 건너뜁니다. 채점 성공 시 점수 내림차순으로
/// 재정렬하고 `keep`개로 자른 뒤 최상위 후보를 컨텍스트로 승격합니다.
pub async fn rerank_stage(
    scorer: &dyn RelevanceScorer,
    mut state: PipelineState,
    keep: usize,
) -> PipelineState {
    if state.sources.len() <= 1 {
        tracing::info!("No reranking needed: insufficient results");
        return state;
    }

    let passages: Vec<String> = state.sources.iter().map(|s| s.full_text.clone()).collect();

    match scorer.score(&state.question, &passages).await {
        Ok(scores) if scores.len() == state.sources.len() => {
            let original_count = state.sources.len();

            let mut paired: Vec<_> = state.sources.drain(..).zip(scores).collect();
            paired.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            paired.truncate(keep);

            state.sources = paired.into_iter().map(|(source, _)| source).collect();

            if let Some(top) = state.sources.first() {
                state.context = top.full_text.clone();
            }

            state.meta.reranking_applied = true;
            tracing::info!(
                "Reranking completed: {} -> {} results",
                original_count,
                state.sources.len()
            );
        }
        Ok(scores) => {
            tracing::warn!(
                "Scorer returned {} scores for {} candidates, keeping original order",
                scores.len(),
                state.sources.len()
            );
            state.meta.degraded.push("rerank".to_string());
        }
        Err(e) => {
            tracing::error!("Reranking failed, using original order: {:#}", e);
            state.meta.degraded.push("rerank".to_string());
        }
    }

    state
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::SourceInfo;

    struct FixedScorer {
        scores: Option<Vec<f32>>,
    }

    #[async_trait]
    impl RelevanceScorer for FixedScorer {
        async fn score(&self, _question: &str, _passages: &[String]) -> Result<Vec<f32>> {
            match &self.scores {
                Some(s) => Ok(s.clone()),
                None => anyhow::bail!("scorer unavailable"),
            }
        }
    }

    fn state_with_sources(texts: &[&str]) -> PipelineState {
        let mut state = PipelineState::new("question?");
        state.has_results = true;
        state.total_results = texts.len();
        state.context = texts[0].to_string();
        state.sources = texts
            .iter()
            .enumerate()
            .map(|(i, t)| SourceInfo {
                text: t.to_string(),
                page_number: Some(1),
                similarity: 0.9 - i as f32 * 0.1,
                chunk_id: i as u64,
                full_text: t.to_string(),
            })
            .collect();
        state
    }

    #[test]
    fn test_parse_relevance_score_json() {
        let score = parse_relevance_score(r#"{"relevant": true, "confidence": 0.9}"#);
        assert!((score - 0.95).abs() < 1e-6);

        let score = parse_relevance_score(r#"{"relevant": false, "confidence": 0.6}"#);
        assert!((score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_relevance_score_embedded_json() {
        let score =
            parse_relevance_score(r#"Sure! {"relevant": true, "confidence": 1.0} there you go"#);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_relevance_score_missing_confidence() {
        let score = parse_relevance_score(r#"{"relevant": true}"#);
        assert!((score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parse_relevance_score_keyword_fallback() {
        assert!((parse_relevance_score("yes, it is relevant") - 0.7).abs() < 1e-6);
        assert!((parse_relevance_score("hmm") - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_rerank_reorders_by_score() {
        let scorer = FixedScorer {
            scores: Some(vec![0.1, 0.9, 0.5]),
        };
        let state = state_with_sources(&["first", "second", "third"]);

        let state = rerank_stage(&scorer, state, 3).await;

        assert!(state.meta.reranking_applied);
        assert_eq!(state.sources[0].full_text, "second");
        assert_eq!(state.sources[1].full_text, "third");
        assert_eq!(state.sources[2].full_text, "first");
        // 최상위 후보가 컨텍스트로 승격
        assert_eq!(state.context, "second");
    }

    #[tokio::test]
    async fn test_rerank_truncates_to_keep() {
        let scorer = FixedScorer {
            scores: Some(vec![0.4, 0.3, 0.2, 0.9]),
        };
        let state = state_with_sources(&["a", "b", "c", "d"]);

        let state = rerank_stage(&scorer, state, 3).await;

        assert_eq!(state.sources.len(), 3);
        assert_eq!(state.sources[0].full_text, "d");
    }

    #[tokio::test]
    async fn test_rerank_skips_single_candidate() {
        let scorer = FixedScorer { scores: None };
        let state = state_with_sources(&["only one"]);

        let state = rerank_stage(&scorer, state, 3).await;

        assert!(!state.meta.reranking_applied);
        assert!(state.meta.degraded.is_empty());
        assert_eq!(state.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_original_order() {
        let scorer = FixedScorer { scores: None };
        let state = state_with_sources(&["first", "second"]);

        let state = rerank_stage(&scorer, state, 3).await;

        assert!(!state.meta.reranking_applied);
        assert!(state.meta.degraded.contains(&"rerank".to_string()));
        assert_eq!(state.sources[0].full_text, "first");
        assert_eq!(state.sources[1].full_text, "second");
        assert_eq!(state.context, "first");
    }

    #[tokio::test]
    async fn test_rerank_score_count_mismatch_falls_back() {
        let scorer = FixedScorer {
            scores: Some(vec![0.9]),
        };
        let state = state_with_sources(&["first", "second"]);

        let state = rerank_stage(&scorer, state, 3).await;

        assert!(!state.meta.reranking_applied);
        assert_eq!(state.sources[0].full_text, "first");
    }
}
