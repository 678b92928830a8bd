//! 질문 재작성 단계
//!
//! 모호한 질문을 검색에 유리한 구체적인 자연어 질문으로 바꿉니다.
//! 재작성 호출이 실패하면 파이프라인을 중단하지 않고
//! 원래 질문 그대로 계속합니다.

use crate::llm::TextGenerator;

use super::PipelineState;

/// 질문 재작성 LLM 호출
async fn rewrite_question(
    generator: &dyn TextGenerator,
    question: &str,
) -> anyhow::Result<String> {
    let prompt = format!(
        "You are a question rewriter for a document retrieval system. Your job is to improve user questions to make them more specific and searchable while keeping them as natural language questions.

IMPORTANT RULES:
1. ALWAYS return a natural language question, never SQL, code, or database syntax
2. Make vague questions more specific and detailed
3. Add context that helps find relevant information in documents
4. Keep the question format (question words like \"what\", \"who\", \"where\", \"how\", etc.)
5. Do NOT convert to database queries or technical syntax

EXAMPLES:
- Input: \"Show me authors\" -> Output: \"Who are the authors mentioned in this document?\"
- Input: \"What's this about?\" -> Output: \"What is the main topic and purpose of this document?\"
- Input: \"Tell me more\" -> Output: \"What are the key details and important information in this document?\"

USER QUESTION:
{question}

Rewrite this question to be more specific and searchable while keeping it as a natural language question:"
    );

    generator.generate(&prompt).await
}

/// 재작성 단계 실행
///
/// 성공 시 state.question을 교체하고 rewritten 플래그를 세웁니다.
/// 실패 시 원래 질문을 유지하고 degraded에 기록합니다.
pub async fn rewrite_stage(
    generator: &dyn TextGenerator,
    mut state: PipelineState,
) -> PipelineState {
    match rewrite_question(generator, &state.question).await {
        Ok(rewritten) => {
            let rewritten = rewritten.trim();
            if rewritten.is_empty() {
                tracing::warn!("Rewriter returned empty text, keeping original question");
                state.meta.degraded.push("rewrite".to_string());
            } else {
                tracing::info!("Question rewritten: {}", rewritten);
                state.question = rewritten.to_string();
                state.meta.rewritten = true;
            }
        }
        Err(e) => {
            tracing::error!(
                "Question rewriting failed, continuing with original: {:#}",
                e
            );
            state.meta.degraded.push("rewrite".to_string());
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
    use anyhow::Result;
    use async_trait::async_trait;

    struct CannedGenerator {
        response: Option<String>,
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            match &self.response {
                Some(r) => Ok(r.clone()),
                None => anyhow::bail!("provider unavailable"),
            }
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_rewrite_replaces_question() {
        let generator = CannedGenerator {
            response: Some("What is the main topic of this document?".to_string()),
        };
        let state = PipelineState::new("what's this about?");

        let state = rewrite_stage(&generator, state).await;

        assert_eq!(state.question, "What is the main topic of this document?");
        assert_eq!(state.original_question, "what's this about?");
        assert!(state.meta.rewritten);
    }

    #[tokio::test]
    async fn test_rewrite_failure_keeps_original() {
        let generator = CannedGenerator { response: None };
        let state = PipelineState::new("what's this about?");

        let state = rewrite_stage(&generator, state).await;

        assert_eq!(state.question, "what's this about?");
        assert!(!state.meta.rewritten);
        assert!(state.meta.degraded.contains(&"rewrite".to_string()));
    }

    #[tokio::test]
    async fn test_rewrite_empty_result_keeps_original() {
        let generator = CannedGenerator {
            response: Some("   ".to_string()),
        };
        let state = PipelineState::new("original question?");

        let state = rewrite_stage(&generator, state).await;

        assert_eq!(state.question, "original question?");
        assert!(!state.meta.rewritten);
    }
}
