//! RAG 프롬프트 템플릿과 폴백 답변
//!
//! 컨텍스트는 설정된 문자 예산으로 잘라서 프롬프트에 넣습니다.
//! 생성 실패 시의 폴백 답변은 LLM 없이 결정적으로 만들어집니다.

use serde::Serialize;

/// 폴백 답변에 사용할 컨텍스트 길이 (문자 수)
const FALLBACK_CONTEXT_CHARS: usize = 500;

/// 컨텍스트가 전혀 없을 때의 폴백 답변
pub const NO_CONTEXT_ANSWER: &str = "I'm sorry, I could not find relevant information to answer \
your question. Please try rephrasing it or check that it relates to the document content.";

// ============================================================================
// Prompt Building
// ============================================================================

/// RAG 답변 생성 프롬프트 구성
///
/// 컨텍스트는 `max_context_chars`로 잘리고 (UTF-8 경계 안전),
/// 모델에게 컨텍스트 안에서만 답하도록 지시합니다.
pub fn build_rag_prompt(
    context: &str,
    question: &str,
    images_len: usize,
    max_context_chars: usize,
) -> String {
    let context = truncate_chars(context, max_context_chars);

    format!(
        "You are an expert assistant that answers questions based only on the provided context.

CONTEXT:
{context}

USER QUESTION:
{question}

IMAGES LENGTH:
{images_len}

INSTRUCTIONS:
1. Answer only using the provided context.
2. If you cannot answer with the given context, clearly state that you do not have enough information.
3. Be precise, clear, and concise.
4. If there is specific information such as numbers, dates, or names, include them exactly as they appear in the context.
5. Structure your answer logically and make it easy to understand.
6. If the image length is greater than 0, naturally mention that there are related images available for the user to view, which may provide additional visual context to support your answer.

ANSWER:"
    )
}

// ============================================================================
// Prompt Stats
// ============================================================================

/// 생성된 프롬프트 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptStats {
    /// 전체 길이 (문자 수)
    pub length: usize,
    /// 단어 수
    pub word_count: usize,
    /// 추정 토큰 수 (문자 수 / 4 근사)
    pub estimated_tokens: usize,
}

/// 프롬프트 통계 계산
pub fn prompt_stats(prompt: &str) -> PromptStats {
    let length = prompt.chars().count();
    PromptStats {
        length,
        word_count: prompt.split_whitespace().count(),
        estimated_tokens: length / 4,
    }
}

// ============================================================================
// Fallback Answer
// ============================================================================

/// 생성 실패 시의 결정적 폴백 답변
///
/// 컨텍스트가 있으면 앞 500자 + 줄임표, 없으면 고정 사과문을 반환합니다.
/// 호출자는 `fallback_used` 플래그로 모델 답변과 구분할 수 있어야 합니다.
pub fn fallback_answer(context: &str) -> String {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        return NO_CONTEXT_ANSWER.to_string();
    }

    let head = truncate_chars(trimmed, FALLBACK_CONTEXT_CHARS);
    if head.len() < trimmed.len() {
        format!("{}...", head)
    } else {
        head.to_string()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 수 기준으로 앞부분 자르기 (UTF-8 경계 안전)
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ============================================================================
// Tests
// ============================================================================
