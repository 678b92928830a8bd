//! 인제스천 모듈 - 문서를 추출/임베딩하여 인덱스에 적재
//!
//! 추출기(Extractor)는 좁은 계약의 외부 협력자입니다:
//! 청크 텍스트, 청크별 메타데이터, 이미지 레코드를 돌려주고
//! 텍스트 수와 메타데이터 수가 같음을 보장합니다.
//!
//! IngestionService가 추출 -> 이미지 연결 -> 임베딩 -> 인덱스 적재를
//! 순서대로 수행하고 결과 통계를 반환합니다.

pub mod pdf;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::knowledge::{link_images, ChunkInfo, ImageRecord, VectorIndex};

pub use pdf::PdfExtractor;

// ============================================================================
// Extractor Contract
// ============================================================================

/// 추출된 문서 내용
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    /// 순서 있는 청크 텍스트
    pub chunk_texts: Vec<String>,
    /// 청크별 메타데이터 (chunk_texts와 같은 길이)
    pub metadata: Vec<ChunkInfo>,
    /// 문서에서 추출된 이미지 레코드
    pub images: Vec<ImageRecord>,
}

/// 문서 추출기 트레이트
///
/// CPU 바운드 동기 작업입니다 - 서비스가 spawn_blocking으로 감쌉니다.
pub trait Extractor: Send + Sync {
    /// 소스 파일에서 청크/메타데이터/이미지 추출
    fn extract(&self, source: &Path) -> Result<ExtractedDocument>;
}

// ============================================================================
// Ingest Report
// ============================================================================

/// 인제스천 결과 보고
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub message: String,
    pub source: String,
    pub chunk_count: usize,
    pub image_count: usize,
    pub embedding_dimension: usize,
    pub assigned_ids: Vec<u64>,
    pub error: Option<String>,
}

impl IngestReport {
    /// 실패 보고 생성
    fn failure(source: &Path, error: String) -> Self {
        Self {
            success: false,
            message: format!("Ingestion failed for {}", source.display()),
            source: source.display().to_string(),
            chunk_count: 0,
            image_count: 0,
            embedding_dimension: 0,
            assigned_ids: Vec::new(),
            error: Some(error),
        }
    }
}

// ============================================================================
// IngestionService
// ============================================================================

/// 인제스천 서비스
///
/// 의존성은 생성자 주입으로 받습니다 - 전역 레지스트리 없음.
pub struct IngestionService {
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
}

impl IngestionService {
    /// 새 서비스 생성
    pub fn new(
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            extractor,
            embedder,
            index,
        }
    }

    /// 문서 인제스천 수행
    ///
    /// 어떤 단계가 실패해도 패닉하지 않고 실패 보고로 변환합니다.
    /// 실패 시 인덱스는 변경되지 않습니다.
    pub async fn ingest(&self, source: &Path) -> IngestReport {
        tracing::info!("Starting ingestion: {}", source.display());

        // 1. 추출 (CPU 바운드 - blocking 풀에서)
        let extractor = self.extractor.clone();
        let path = source.to_path_buf();
        let extracted = match tokio::task::spawn_blocking(move || extractor.extract(&path)).await
        {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => {
                tracing::error!("Extraction failed: {:#}", e);
                return IngestReport::failure(source, format!("extraction failed: {:#}", e));
            }
            Err(e) => {
                tracing::error!("Extraction task panicked: {}", e);
                return IngestReport::failure(source, format!("extraction task failed: {}", e));
            }
        };

        if extracted.chunk_texts.is_empty() {
            return IngestReport::failure(source, "no text extracted from document".to_string());
        }

        // 추출기 계약 재검증
        if extracted.chunk_texts.len() != extracted.metadata.len() {
            return IngestReport::failure(
                source,
                format!(
                    "extractor contract violation: {} chunks, {} metadata records",
                    extracted.chunk_texts.len(),
                    extracted.metadata.len()
                ),
            );
        }

        // 2. 같은 페이지의 이미지를 청크에 연결
        let mut metadata = extracted.metadata;
        link_images(&mut metadata, &extracted.images);

        // 3. 임베딩 생성
        tracing::info!(
            "Generating embeddings for {} chunks",
            extracted.chunk_texts.len()
        );
        let embeddings = match self.embedder.embed_batch(&extracted.chunk_texts).await {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("Embedding failed: {:#}", e);
                return IngestReport::failure(source, format!("embedding failed: {:#}", e));
            }
        };

        // 4. 인덱스 적재
        let assigned_ids =
            match self
                .index
                .add(embeddings, &extracted.chunk_texts, Some(metadata))
            {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!("Index insert failed: {}", e);
                    return IngestReport::failure(source, format!("index insert failed: {}", e));
                }
            };

        let report = IngestReport {
            success: true,
            message: format!(
                "Processed {} chunks and {} images",
                extracted.chunk_texts.len(),
                extracted.images.len()
            ),
            source: source.display().to_string(),
            chunk_count: extracted.chunk_texts.len(),
            image_count: extracted.images.len(),
            embedding_dimension: self.embedder.dimension(),
            assigned_ids,
            error: None,
        };

        tracing::info!(
            "Ingestion complete: {} chunks, {} images, dimension {}",
            report.chunk_count,
            report.image_count,
            report.embedding_dimension
        );

        report
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::IndexKind;
    use anyhow::Result;
    use async_trait::async_trait;

    /// 고정 결과를 돌려주는 테스트 추출기
    struct StubExtractor {
        document: ExtractedDocument,
    }

    impl Extractor for StubExtractor {
        fn extract(&self, _source: &Path) -> Result<ExtractedDocument> {
            Ok(self.document.clone())
        }
    }

    /// 항상 실패하는 추출기
    struct FailingExtractor;

    impl Extractor for FailingExtractor {
        fn extract(&self, _source: &Path) -> Result<ExtractedDocument> {
            anyhow::bail!("cannot read file")
        }
    }

    /// 텍스트 길이 기반 결정적 테스트 임베더
    struct StubEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0; self.dimension];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dimension] += b as f32;
            }
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn image(page: usize, name: &str) -> ImageRecord {
        ImageRecord {
            page,
            path: name.to_string(),
            width: 10,
            height: 10,
            bbox: [0.0, 0.0, 10.0, 10.0],
        }
    }

    fn service_with(document: ExtractedDocument) -> (IngestionService, Arc<VectorIndex>) {
        let index = Arc::new(VectorIndex::new(4, IndexKind::Flat));
        let service = IngestionService::new(
            Arc::new(StubExtractor { document }),
            Arc::new(StubEmbedder { dimension: 4 }),
            index.clone(),
        );
        (service, index)
    }

    fn sample_document() -> ExtractedDocument {
        ExtractedDocument {
            chunk_texts: vec![
                "first chunk about topic A".to_string(),
                "second chunk about topic B".to_string(),
            ],
            metadata: vec![
                ChunkInfo {
                    chunk_id: "page_1_chunk_0".to_string(),
                    page_number: Some(1),
                    chunk_index: 0,
                    images: Vec::new(),
                },
                ChunkInfo {
                    chunk_id: "page_2_chunk_0".to_string(),
                    page_number: Some(2),
                    chunk_index: 0,
                    images: Vec::new(),
                },
            ],
            images: vec![image(2, "page_2_img_0.png")],
        }
    }

    #[tokio::test]
    async fn test_ingest_success_report() {
        let (service, index) = service_with(sample_document());

        let report = service.ingest(Path::new("doc.pdf")).await;

        assert!(report.success);
        assert_eq!(report.chunk_count, 2);
        assert_eq!(report.image_count, 1);
        assert_eq!(report.embedding_dimension, 4);
        assert_eq!(report.assigned_ids, vec![0, 1]);
        assert!(report.error.is_none());
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_links_images_by_page() {
        let (service, index) = service_with(sample_document());
        service.ingest(Path::new("doc.pdf")).await;

        // 1페이지 청크에는 이미지 없음
        let first = index.get_by_id(0).unwrap().unwrap();
        assert_eq!(first.image_count, 0);

        // 2페이지 청크에 이미지 연결
        let second = index.get_by_id(1).unwrap().unwrap();
        assert_eq!(second.image_count, 1);
        assert_eq!(second.images[0].path, "page_2_img_0.png");
    }

    #[tokio::test]
    async fn test_ingest_extraction_failure() {
        let index = Arc::new(VectorIndex::new(4, IndexKind::Flat));
        let service = IngestionService::new(
            Arc::new(FailingExtractor),
            Arc::new(StubEmbedder { dimension: 4 }),
            index.clone(),
        );

        let report = service.ingest(Path::new("missing.pdf")).await;

        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("extraction failed"));
        assert_eq!(index.len(), 0);
    }

    #[tokio::test]
    async fn test_ingest_empty_document_fails() {
        let (service, index) = service_with(ExtractedDocument::default());

        let report = service.ingest(Path::new("empty.pdf")).await;

        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("no text"));
        assert_eq!(index.len(), 0);
    }

    #[tokio::test]
    async fn test_ingest_contract_violation_fails() {
        let mut doc = sample_document();
        doc.metadata.pop();
        let (service, index) = service_with(doc);

        let report = service.ingest(Path::new("bad.pdf")).await;

        assert!(!report.success);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("contract violation"));
        assert_eq!(index.len(), 0);
    }
}
