//! 컴포지션 루트 - 전체 시스템 조립
//!
//! 임베더, 생성기, 인덱스, 서비스들을 프로세스 시작 시 한 번 만들어
//! 참조로 내려보냅니다. 암묵적 전역 레지스트리나 싱글턴 캐시는 없습니다.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chatbot::{ChatbotService, LlmRelevanceScorer, RelevanceScorer};
use crate::config::RagConfig;
use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::ingestion::{Extractor, IngestionService, PdfExtractor};
use crate::knowledge::{index_files_exist, remove_index_files, VectorIndex};
use crate::llm::{GeminiGenerator, TextGenerator};

// ============================================================================
// RagSystem
// ============================================================================

/// 조립된 RAG 시스템
///
/// 두 공개 작업의 진입점입니다: 인제스천과 질문 답변.
pub struct RagSystem {
    pub config: RagConfig,
    pub index: Arc<VectorIndex>,
    pub ingestion: IngestionService,
    pub chatbot: ChatbotService,
}

impl RagSystem {
    /// 환경변수의 API 키로 기본 프로바이더(Gemini)를 붙여 조립
    pub fn from_env(config: RagConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            GeminiEmbedding::from_env(config.dimension).context("Failed to create embedder")?,
        );
        let generator: Arc<dyn TextGenerator> =
            Arc::new(GeminiGenerator::from_env().context("Failed to create generator")?);

        Ok(Self::assemble(config, embedder, generator))
    }

    /// 주입된 프로바이더로 조립
    ///
    /// 테스트나 대체 구현을 붙일 때 사용합니다.
    pub fn assemble(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let index = Arc::new(VectorIndex::new(config.dimension, config.index_kind));
        let extractor: Arc<dyn Extractor> = Arc::new(PdfExtractor::default());
        let scorer: Arc<dyn RelevanceScorer> =
            Arc::new(LlmRelevanceScorer::new(generator.clone()));

        let ingestion = IngestionService::new(extractor, embedder.clone(), index.clone());
        let chatbot = ChatbotService::new(
            embedder,
            index.clone(),
            generator,
            scorer,
            config.clone(),
        );

        Self {
            config,
            index,
            ingestion,
            chatbot,
        }
    }

    /// 저장된 인덱스가 있으면 불러오기
    ///
    /// # Returns
    /// 불러왔으면 true, 저장본이 없으면 false (빈 인덱스 유지)
    pub fn load_index(&self) -> Result<bool> {
        let base = self.config.index_base_path();
        if !index_files_exist(&base) {
            return Ok(false);
        }

        self.index
            .load(&base)
            .with_context(|| format!("Failed to load index from {}", base.display()))?;
        Ok(true)
    }

    /// 인덱스를 기본 경로에 저장
    pub fn save_index(&self) -> Result<()> {
        let base = self.config.index_base_path();
        self.index
            .save(&base)
            .with_context(|| format!("Failed to save index to {}", base.display()))
    }

    /// 메모리와 디스크의 인덱스 모두 삭제
    pub fn clear_index(&self) -> Result<()> {
        self.index.clear().context("Failed to clear index")?;
        remove_index_files(&self.config.index_base_path())
            .context("Failed to remove index files")?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
