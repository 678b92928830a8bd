//! docrag - PDF 문서 기반 멀티모달 RAG 질의응답 시스템
//!
//! PDF를 텍스트 청크로 나눠 임베딩하고, 청크-이미지 연관과 함께
//! 벡터 인덱스에 저장한 뒤, 질문을
//! 재작성 -> 검색 -> 리랭킹 -> 생성 -> 검증 파이프라인으로 답변합니다.

pub mod chatbot;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod guardrails;
pub mod ingestion;
pub mod knowledge;
pub mod llm;
pub mod system;

// Re-exports
pub use chatbot::{
    AskError, AskErrorKind, AskResponse, ChatbotService, LlmRelevanceScorer, PipelineState,
    RelevanceScorer, SourceInfo,
};
pub use config::{get_data_dir, RagConfig};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use guardrails::GuardrailError;
pub use ingestion::{
    ExtractedDocument, Extractor, IngestReport, IngestionService, PdfExtractor,
};
pub use knowledge::{
    ChunkInfo, ChunkMetadata, ImageRecord, IndexError, IndexKind, IndexStats, SearchHit,
    VectorIndex,
};
pub use llm::{GeminiGenerator, TextGenerator};
pub use system::RagSystem;
