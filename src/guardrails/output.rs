//! 출력 가드레일 체인
//!
//! 고정 순서: 구조 검사 -> 결정적 새니타이즈 -> LLM 품질 검증 -> 개선 패스.
//! 구조/검증 거부는 체인을 중단하고, LLM 호출 실패는 통과로 폴백합니다.
//! 개선 패스는 원문 길이의 80% 이상을 유지할 때만 채택됩니다
//! (개선기가 답변을 잘라먹는 것을 방지).

use regex::Regex;

use crate::llm::TextGenerator;

use super::GuardrailError;

/// 개선 결과 채택 최소 비율 (원문 길이 대비)
const ENHANCEMENT_MIN_RATIO: f32 = 0.8;

/// 같은 문자 반복 허용 한도 (초과 시 3개로 축약)
const MAX_CHAR_RUN: usize = 10;

// ============================================================================
// Structural Checks
// ============================================================================

/// 기본 출력 검증 (LLM 없이)
pub fn basic_output_checks(
    answer: &str,
    min_chars: usize,
    max_chars: usize,
) -> Result<String, GuardrailError> {
    let trimmed = answer.trim();

    if trimmed.is_empty() {
        return Err(GuardrailError::EmptyOutput);
    }
    if trimmed.chars().count() < min_chars {
        return Err(GuardrailError::OutputTooShort { min: min_chars });
    }
    if trimmed.chars().count() > max_chars {
        return Err(GuardrailError::OutputTooLong { max: max_chars });
    }

    Ok(trimmed.to_string())
}

// ============================================================================
// Sanitization
// ============================================================================

/// 결정적 출력 새니타이즈
///
/// 마크업 태그 제거, URL 마스킹, 과도한 문자 반복 축약, 공백 정리.
pub fn sanitize_answer(answer: &str) -> String {
    // 마크업 태그 제거
    let tag_re = Regex::new(r"<[^>]+>").expect("Invalid regex");
    let answer = tag_re.replace_all(answer, "");

    // URL 마스킹
    let url_re = Regex::new(r"https?://\S+").expect("Invalid regex");
    let answer = url_re.replace_all(&answer, "[URL removed for security]");

    // 같은 문자 반복 축약 (regex 백레퍼런스 없이 수동 처리)
    let answer = collapse_char_runs(&answer, MAX_CHAR_RUN, 3);

    // 연속 공백 정리
    let ws_re = Regex::new(r"\s+").expect("Invalid regex");
    let answer = ws_re.replace_all(&answer, " ");

    answer.trim().to_string()
}

/// 같은 문자가 `max_run`번 넘게 반복되면 `keep`개로 축약
fn collapse_char_runs(text: &str, max_run: usize, keep: usize) -> String {
    let mut result = String::with_capacity(text.len());
    let mut run_char: Option<char> = None;
    let mut run_len = 0usize;

    for c in text.chars() {
        if Some(c) == run_char {
            run_len += 1;
        } else {
            run_char = Some(c);
            run_len = 1;
        }

        if run_len <= max_run {
            result.push(c);
        } else if run_len == max_run + 1 {
            // 한도를 넘는 순간 유지분(keep)만 남기고 잘라냄
            let excess = max_run - keep;
            for _ in 0..excess {
                result.pop();
            }
        }
    }

    result
}

// ============================================================================
// LLM-backed Validation
// ============================================================================

/// LLM 기반 출력 품질 검증
///
/// 인식할 수 없는 판정이나 호출 실패는 기본 검증 결과로 폴백합니다.
async fn classify_output(
    generator: &dyn TextGenerator,
    question: &str,
    answer: &str,
) -> Result<(), GuardrailError> {
    let prompt = format!(
        "You are an output validation system for a document Q&A chatbot. Analyze the following response and determine if it's appropriate and helpful.

Original Question: \"{question}\"
Generated Answer: \"{answer}\"

Check for:
1. Inappropriate content (offensive language, harmful advice)
2. Answer coherence and relevance to the question
3. Professional tone and helpfulness
4. Potential misinformation or hallucinations
5. Completeness of the response

Respond with ONLY one of these:
- VALID: if the response is appropriate and helpful
- INVALID_INAPPROPRIATE: if contains inappropriate content
- INVALID_INCOHERENT: if the answer doesn't make sense or is irrelevant
- INVALID_UNPROFESSIONAL: if tone is unprofessional or unhelpful
- INVALID_MISINFORMATION: if contains potential misinformation
- INVALID_INCOMPLETE: if the response is too vague or incomplete

Response:"
    );

    let verdict = match generator.generate(&prompt).await {
        Ok(response) => response.trim().to_uppercase(),
        Err(e) => {
            tracing::error!("Output classifier call failed, keeping answer: {}", e);
            return Ok(());
        }
    };

    tracing::info!(
        "Output classifier verdict: {} (answer length {})",
        verdict,
        answer.len()
    );

    match verdict.as_str() {
        "VALID" => Ok(()),
        "INVALID_INAPPROPRIATE" => Err(GuardrailError::OutputInappropriate),
        "INVALID_INCOHERENT" => Err(GuardrailError::OutputIncoherent),
        "INVALID_UNPROFESSIONAL" => Err(GuardrailError::OutputUnprofessional),
        "INVALID_MISINFORMATION" => Err(GuardrailError::OutputMisinformationSuspected),
        "INVALID_INCOMPLETE" => Err(GuardrailError::OutputIncomplete),
        other => {
            tracing::warn!("Unrecognized output verdict: {}, keeping answer", other);
            Ok(())
        }
    }
}

// ============================================================================
// Enhancement
// ============================================================================

/// 답변 개선 패스
///
/// 구조와 가독성을 다듬은 버전을 생성하되, 원문 길이의 80% 이상일 때만
/// 채택합니다. 반환: (최종 답변, 개선 적용 여부).
pub async fn enhance_answer(
    generator: &dyn TextGenerator,
    question: &str,
    answer: &str,
) -> (String, bool) {
    let prompt = format!(
        "You are a response enhancement system. Improve the following answer by making it more structured and helpful while keeping the core content unchanged.

Original Question: \"{question}\"
Original Answer: \"{answer}\"

Enhance the answer by:
1. Adding clear structure with bullet points or numbering if appropriate
2. Ensuring proper formatting
3. Adding helpful context if missing
4. Making it more readable and professional

Return ONLY the enhanced answer without any additional commentary:"
    );

    match generator.generate(&prompt).await {
        Ok(enhanced) => {
            let enhanced = enhanced.trim();
            let min_len = (answer.chars().count() as f32 * ENHANCEMENT_MIN_RATIO) as usize;

            if enhanced.chars().count() >= min_len && !enhanced.is_empty() {
                tracing::info!("Answer enhanced successfully");
                (enhanced.to_string(), true)
            } else {
                tracing::warn!("Enhancement produced insufficient result, keeping original");
                (answer.to_string(), false)
            }
        }
        Err(e) => {
            tracing::error!("Enhancement call failed, keeping original: {}", e);
            (answer.to_string(), false)
        }
    }
}

// ============================================================================
// Chain
// ============================================================================

/// 전체 출력 가드레일 체인 실행 (개선 패스 제외)
///
/// 성공 시 새니타이즈된 답변을 반환합니다.
pub async fn validate_output(
    generator: &dyn TextGenerator,
    question: &str,
    answer: &str,
    min_chars: usize,
    max_chars: usize,
) -> Result<String, GuardrailError> {
    let checked = basic_output_checks(answer, min_chars, max_chars)?;
    let sanitized = sanitize_answer(&checked);

    // 새니타이즈가 내용을 전부 지웠으면 빈 출력으로 처리
    if sanitized.is_empty() {
        return Err(GuardrailError::EmptyOutput);
    }

    classify_output(generator, question, &sanitized).await?;
    Ok(sanitized)
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

    impl CannedGenerator {
        fn ok(response: &str) -> Self {
            Self {
                response: Some(response.to_string()),
            }
        }

        fn failing() -> Self {
            Self { response: None }
        }
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

    #[test]
    fn test_basic_rejects_empty_and_bounds() {
        assert_eq!(
            basic_output_checks("", 10, 5000),
            Err(GuardrailError::EmptyOutput)
        );
        assert_eq!(
            basic_output_checks("short", 10, 5000),
            Err(GuardrailError::OutputTooShort { min: 10 })
        );

        let long_answer = "y".repeat(5001);
        assert_eq!(
            basic_output_checks(&long_answer, 10, 5000),
            Err(GuardrailError::OutputTooLong { max: 5000 })
        );
    }

    #[test]
    fn test_sanitize_strips_tags() {
        let sanitized = sanitize_answer("The <b>answer</b> is <script>alert(1)</script>42.");
        assert!(!sanitized.contains('<'));
        assert!(sanitized.contains("answer"));
        assert!(sanitized.contains("42"));
    }

    #[test]
    fn test_sanitize_redacts_urls() {
        let sanitized = sanitize_answer("See https://evil.example.com/payload for details.");
        assert!(!sanitized.contains("evil.example.com"));
        assert!(sanitized.contains("[URL removed for security]"));
    }

    #[test]
    fn test_sanitize_collapses_repeats() {
        let sanitized = sanitize_answer(&format!("wow{}", "!".repeat(30)));
        assert_eq!(sanitized, "wow!!!");
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        let sanitized = sanitize_answer("too   many\n\n\nspaces");
        assert_eq!(sanitized, "too many spaces");
    }

    #[test]
    fn test_collapse_char_runs_below_limit_untouched() {
        assert_eq!(collapse_char_runs("aaa", 10, 3), "aaa");
        assert_eq!(collapse_char_runs("hello", 10, 3), "hello");
    }

    #[tokio::test]
    async fn test_validate_output_passes_valid() {
        let generator = CannedGenerator::ok("VALID");
        let result =
            validate_output(&generator, "q?", "a perfectly fine answer", 10, 5000).await;
        assert_eq!(result.unwrap(), "a perfectly fine answer");
    }

    #[tokio::test]
    async fn test_validate_output_verdict_mapping() {
        for (verdict, expected) in [
            ("INVALID_INAPPROPRIATE", GuardrailError::OutputInappropriate),
            ("INVALID_INCOHERENT", GuardrailError::OutputIncoherent),
            ("INVALID_UNPROFESSIONAL", GuardrailError::OutputUnprofessional),
            (
                "INVALID_MISINFORMATION",
                GuardrailError::OutputMisinformationSuspected,
            ),
            ("INVALID_INCOMPLETE", GuardrailError::OutputIncomplete),
        ] {
            let generator = CannedGenerator::ok(verdict);
            let result =
                validate_output(&generator, "q?", "some questionable answer", 10, 5000).await;
            assert_eq!(result, Err(expected));
        }
    }

    #[tokio::test]
    async fn test_validate_output_llm_failure_passes() {
        let generator = CannedGenerator::failing();
        let result = validate_output(&generator, "q?", "a decent answer here", 10, 5000).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_enhancement_accepted_when_long_enough() {
        let generator = CannedGenerator::ok("A much better, restructured answer with detail.");
        let (answer, enhanced) = enhance_answer(&generator, "q?", "original answer text").await;
        assert!(enhanced);
        assert!(answer.contains("restructured"));
    }

    #[tokio::test]
    async fn test_enhancement_rejected_when_truncated() {
        // 개선 결과가 원문의 80% 미만이면 원문 유지
        let generator = CannedGenerator::ok("tiny");
        let original = "a long original answer that should not be replaced by a stub";
        let (answer, enhanced) = enhance_answer(&generator, "q?", original).await;
        assert!(!enhanced);
        assert_eq!(answer, original);
    }

    #[tokio::test]
    async fn test_enhancement_failure_keeps_original() {
        let generator = CannedGenerator::failing();
        let (answer, enhanced) = enhance_answer(&generator, "q?", "the original").await;
        assert!(!enhanced);
        assert_eq!(answer, "the original");
    }
}
