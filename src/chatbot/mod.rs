//! Chatbot 모듈 - 질문 답변 파이프라인
//!
//! 질문 하나는 명명된 단계들의 고정 목록을 순서대로 통과합니다:
//!
//! ```text
//! ValidateInput -> Rewrite -> Retrieve -> Rerank -> Generate -> ValidateOutput
//! ```
//!
//! 각 단계는 `PipelineState`를 받아 갱신된 상태 또는 에러를 돌려주는
//! 함수이고, 러너는 가드레일 에러에서만 조기 중단합니다.
//! 재작성/리랭킹/생성 실패는 폴백으로 흡수됩니다 (중단 대신 품질 저하).

pub mod rerank;
pub mod rewrite;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::guardrails::{enhance_answer, validate_input, validate_output, GuardrailError};
use crate::knowledge::{SearchHit, VectorIndex};
use crate::llm::{build_rag_prompt, fallback_answer, prompt_stats, PromptStats, TextGenerator};

pub use rerank::{LlmRelevanceScorer, RelevanceScorer};

/// 응답에 실을 출처 미리보기 길이 (문자 수)
const SOURCE_PREVIEW_CHARS: usize = 200;

// ============================================================================
// Pipeline State
// ============================================================================

/// 출처 정보 (응답 페이로드용)
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// 청크 텍스트 미리보기
    pub text: String,
    /// 출처 페이지 번호
    pub page_number: Option<usize>,
    /// 검색 유사도
    pub similarity: f32,
    /// 인덱스가 할당한 청크 ID
    pub chunk_id: u64,
    /// 청크 전체 텍스트 (리랭킹/컨텍스트용, 응답에는 미포함)
    #[serde(skip)]
    pub full_text: String,
}

/// 답변 생성 메타데이터
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerMeta {
    /// 사용한 모델 식별자 (폴백 시 None)
    pub model: Option<String>,
    /// 프롬프트 통계
    pub prompt_stats: Option<PromptStats>,
    /// 컨텍스트 폴백 답변 여부
    pub fallback_used: bool,
    /// 폴백 사유 ("no_context" | "generation_error")
    pub fallback_reason: Option<String>,
    /// 질문 재작성 적용 여부
    pub rewritten: bool,
    /// 리랭킹 적용 여부
    pub reranking_applied: bool,
    /// 개선 패스 채택 여부
    pub enhanced: bool,
    /// 폴백으로 계속 진행한 단계 이름들
    pub degraded: Vec<String>,
}

/// 파이프라인 단계 간에 흐르는 단일 상태 구조체
///
/// 각 단계가 읽고 갱신된 사본을 돌려줍니다.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// 현재 질문 (재작성되었을 수 있음)
    pub question: String,
    /// 사용자가 입력한 원래 질문
    pub original_question: String,
    /// 집계된 컨텍스트 텍스트
    pub context: String,
    /// 순서 있는 출처 목록
    pub sources: Vec<SourceInfo>,
    /// 연관 이미지 경로 (중복 제거, 처음 본 순서)
    pub images: Vec<String>,
    /// 검색 결과 존재 여부
    pub has_results: bool,
    /// 검색된 결과 수
    pub total_results: usize,
    /// 생성된 답변
    pub answer: String,
    /// 생성 메타데이터
    pub meta: AnswerMeta,
}

impl PipelineState {
    /// 원래 질문으로 초기 상태 생성
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            original_question: question.to_string(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// 파이프라인 단계 에러
///
/// Guardrail만 조기 중단을 일으키고, Retrieval은 구조화된
/// 실패 응답으로 변환됩니다.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error("retrieval failed: {0}")]
    Retrieval(String),
}

// ============================================================================
// Stages
// ============================================================================

/// 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    ValidateInput,
    Rewrite,
    Retrieve,
    Rerank,
    Generate,
    ValidateOutput,
}

impl Stage {
    /// 로그용 단계 이름
    pub fn name(self) -> &'static str {
        match self {
            Stage::ValidateInput => "validate_input",
            Stage::Rewrite => "rewrite",
            Stage::Retrieve => "retrieve",
            Stage::Rerank => "rerank",
            Stage::Generate => "generate",
            Stage::ValidateOutput => "validate_output",
        }
    }
}

/// 단계 실행 순서 (선형, 분기 없음)
pub const PIPELINE: [Stage; 6] = [
    Stage::ValidateInput,
    Stage::Rewrite,
    Stage::Retrieve,
    Stage::Rerank,
    Stage::Generate,
    Stage::ValidateOutput,
];

// ============================================================================
// Response Types
// ============================================================================

/// 질문 실패 분류
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AskErrorKind {
    /// 가드레일 거부 (질문을 바꾸면 복구 가능)
    Validation,
    /// 검색 단계 실패 (임베딩/인덱스)
    Retrieval,
}

/// 질문 실패 정보
#[derive(Debug, Clone, Serialize)]
pub struct AskError {
    pub kind: AskErrorKind,
    /// 가드레일 분류 코드 (해당 시)
    pub code: Option<&'static str>,
    pub message: String,
}

/// 질문 응답
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub success: bool,
    pub answer: String,
    /// 실제 검색에 사용된 질문 (재작성되었을 수 있음)
    pub question: String,
    pub original_question: String,
    pub sources: Vec<SourceInfo>,
    pub images: Vec<String>,
    pub total_results: usize,
    pub meta: AnswerMeta,
    pub error: Option<AskError>,
}

impl AskResponse {
    /// 가드레일 거부 응답
    fn validation_failure(question: &str, err: GuardrailError) -> Self {
        Self {
            success: false,
            answer: err.to_string(),
            question: question.to_string(),
            original_question: question.to_string(),
            sources: Vec::new(),
            images: Vec::new(),
            total_results: 0,
            meta: AnswerMeta::default(),
            error: Some(AskError {
                kind: AskErrorKind::Validation,
                code: Some(err.code()),
                message: err.to_string(),
            }),
        }
    }

    /// 검색 실패 응답
    fn retrieval_failure(question: &str, message: String) -> Self {
        Self {
            success: false,
            answer: "I'm sorry, a technical error occurred while processing your question."
                .to_string(),
            question: question.to_string(),
            original_question: question.to_string(),
            sources: Vec::new(),
            images: Vec::new(),
            total_results: 0,
            meta: AnswerMeta::default(),
            error: Some(AskError {
                kind: AskErrorKind::Retrieval,
                code: None,
                message,
            }),
        }
    }

    /// 완주한 파이프라인 상태를 응답으로 변환
    fn from_state(state: PipelineState) -> Self {
        Self {
            success: state.has_results,
            answer: state.answer,
            question: state.question,
            original_question: state.original_question,
            sources: state.sources,
            images: state.images,
            total_results: state.total_results,
            meta: state.meta,
            error: None,
        }
    }
}

// ============================================================================
// ChatbotService
// ============================================================================

/// 질문 답변 서비스
///
/// 의존성은 생성자 주입 - 싱글턴 레지스트리 없음.
/// 요청마다 독립적인 PipelineState를 쓰므로 여러 질문을
/// 동시에 처리해도 안전합니다 (공유 자원은 인덱스뿐).
pub struct ChatbotService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    generator: Arc<dyn TextGenerator>,
    scorer: Arc<dyn RelevanceScorer>,
    config: RagConfig,
}

impl ChatbotService {
    /// 새 서비스 생성
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        generator: Arc<dyn TextGenerator>,
        scorer: Arc<dyn RelevanceScorer>,
        config: RagConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            scorer,
            config,
        }
    }

    /// 질문에 답변
    ///
    /// 가드레일 거부와 검색 실패는 구조화된 실패 응답으로,
    /// 생성 실패는 컨텍스트 폴백 답변으로 처리됩니다.
    /// 어떤 경우에도 패닉하지 않습니다.
    pub async fn ask(&self, question: &str) -> AskResponse {
        tracing::debug!("Processing question: {}", question);

        let mut state = PipelineState::new(question);

        for stage in PIPELINE {
            tracing::debug!("Pipeline stage: {}", stage.name());

            state = match self.run_stage(stage, state).await {
                Ok(next) => next,
                Err(PipelineError::Guardrail(e)) => {
                    tracing::warn!("Guardrail rejected at {}: {}", stage.name(), e);
                    return AskResponse::validation_failure(question, e);
                }
                Err(PipelineError::Retrieval(message)) => {
                    tracing::error!("Retrieval failed: {}", message);
                    return AskResponse::retrieval_failure(question, message);
                }
            };
        }

        tracing::info!("Question processed (has_results={})", state.has_results);
        AskResponse::from_state(state)
    }

    /// 단일 단계 실행
    async fn run_stage(
        &self,
        stage: Stage,
        state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        match stage {
            Stage::ValidateInput => self.stage_validate_input(state).await,
            Stage::Rewrite => Ok(rewrite::rewrite_stage(self.generator.as_ref(), state).await),
            Stage::Retrieve => self.stage_retrieve(state).await,
            Stage::Rerank => Ok(rerank::rerank_stage(
                self.scorer.as_ref(),
                state,
                self.config.rerank_keep,
            )
            .await),
            Stage::Generate => Ok(self.stage_generate(state).await),
            Stage::ValidateOutput => self.stage_validate_output(state).await,
        }
    }

    /// 입력 가드레일 단계
    async fn stage_validate_input(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        let validated = validate_input(
            self.generator.as_ref(),
            &state.question,
            self.config.max_question_chars,
        )
        .await?;

        state.question = validated;
        Ok(state)
    }

    /// 검색 단계: 질문 임베딩 -> 인덱스 검색 -> 컨텍스트 구성
    async fn stage_retrieve(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        let embedding = self
            .embedder
            .embed(&state.question)
            .await
            .map_err(|e| PipelineError::Retrieval(format!("embedding failed: {:#}", e)))?;

        let hits = self
            .index
            .search(&embedding, self.config.top_k)
            .map_err(|e| PipelineError::Retrieval(format!("index search failed: {}", e)))?;

        if hits.is_empty() {
            // 결과 없음은 정상 결과이지 에러가 아님
            tracing::info!("No search results for question");
            state.has_results = false;
            state.context.clear();
            return Ok(state);
        }

        state.has_results = true;
        state.total_results = hits.len();
        state.context = hits[0].metadata.text.clone();
        state.sources = hits.iter().map(source_from_hit).collect();
        state.images = collect_image_paths(&hits);

        Ok(state)
    }

    /// 생성 단계: 프롬프트 구성 -> LLM 호출 (1회) -> 실패 시 폴백
    async fn stage_generate(&self, mut state: PipelineState) -> PipelineState {
        if !state.has_results {
            state.answer = crate::llm::prompts::NO_CONTEXT_ANSWER.to_string();
            state.meta.fallback_used = true;
            state.meta.fallback_reason = Some("no_context".to_string());
            return state;
        }

        let prompt = build_rag_prompt(
            &state.context,
            &state.question,
            state.images.len(),
            self.config.max_context_chars,
        );
        let stats = prompt_stats(&prompt);

        match self.generator.generate(&prompt).await {
            Ok(answer) => {
                state.answer = answer.trim().to_string();
                state.meta.model = Some(self.generator.model().to_string());
                state.meta.prompt_stats = Some(stats);
            }
            Err(e) => {
                tracing::warn!("Generation failed, using context fallback: {:#}", e);
                state.answer = fallback_answer(&state.context);
                state.meta.fallback_used = true;
                state.meta.fallback_reason = Some("generation_error".to_string());
                state.meta.prompt_stats = Some(stats);
                state.meta.degraded.push("generate".to_string());
            }
        }

        state
    }

    /// 출력 가드레일 + 개선 단계
    async fn stage_validate_output(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        let validated = validate_output(
            self.generator.as_ref(),
            &state.question,
            &state.answer,
            self.config.min_answer_chars,
            self.config.max_answer_chars,
        )
        .await?;

        // 폴백 답변은 결정적이어야 하므로 개선 패스를 건너뜀
        if state.meta.fallback_used {
            state.answer = validated;
            return Ok(state);
        }

        let (final_answer, enhanced) =
            enhance_answer(self.generator.as_ref(), &state.question, &validated).await;

        state.answer = final_answer;
        state.meta.enhanced = enhanced;
        Ok(state)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 검색 결과를 출처 정보로 변환
fn source_from_hit(hit: &SearchHit) -> SourceInfo {
    let full_text = hit.metadata.text.clone();
    let preview: String = full_text.chars().take(SOURCE_PREVIEW_CHARS).collect();
    let text = if preview.len() < full_text.len() {
        format!("{}...", preview)
    } else {
        preview
    };

    SourceInfo {
        text,
        page_number: hit.metadata.page_number,
        similarity: hit.similarity,
        chunk_id: hit.id,
        full_text,
    }
}

/// 결과들의 이미지 경로 수집 (처음 본 순서 유지, 중복 제거)
fn collect_image_paths(hits: &[SearchHit]) -> Vec<String> {
    let mut paths = Vec::new();

    for hit in hits {
        for image in &hit.metadata.images {
            if !paths.contains(&image.path) {
                paths.push(image.path.clone());
            }
        }
    }

    paths
}

// ============================================================================
// Tests
// ============================================================================
