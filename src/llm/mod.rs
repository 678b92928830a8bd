//! LLM 모듈 - 텍스트 생성 프로바이더와 프롬프트
//!
//! - provider: 텍스트 생성 트레이트 + Gemini 구현
//! - prompts: RAG 프롬프트 템플릿, 통계, 폴백 답변

pub mod prompts;
pub mod provider;

// Re-exports
pub use prompts::{build_rag_prompt, fallback_answer, prompt_stats, PromptStats};
pub use provider::{GeminiGenerator, TextGenerator};
