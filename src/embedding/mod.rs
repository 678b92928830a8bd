//! 임베딩 모듈 - 질문과 청크의 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더 인터페이스와
//! Gemini 임베딩 구현을 제공합니다.
//!
//! 문서 임베딩(`embed_batch`)과 질의 임베딩(`embed`)은
//! 서로 다른 task type으로 요청됩니다.
//! ref: https://ai.google.dev/gemini-api/docs/embeddings

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 차원은 인덱스의 수명 동안 일정해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 질의 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 문서 청크 배치 임베딩
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// 문서 저장용 task type
const TASK_DOCUMENT: &str = "RETRIEVAL_DOCUMENT";
/// 검색 질의용 task type
const TASK_QUERY: &str = "RETRIEVAL_QUERY";

/// 호출 간 최소 딜레이 (무료 티어 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;
/// HTTP 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    limiter: Arc<Mutex<MinDelayLimiter>>,
}

/// 요청 간 최소 간격을 보장하는 단순 리미터
#[derive(Debug)]
struct MinDelayLimiter {
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl MinDelayLimiter {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: None,
        }
    }

    /// 직전 요청과의 간격이 부족하면 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                tracing::debug!("Embedding rate limit: waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

impl GeminiEmbedding {
    /// 새 인스턴스 생성 (기본 차원)
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `dimension` - 768, 1536, 3072 중 선택
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
            limiter: Arc::new(Mutex::new(MinDelayLimiter::new(Duration::from_millis(
                MIN_DELAY_MS,
            )))),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(dimension: usize) -> Result<Self> {
        Self::with_dimension(get_api_key()?, dimension)
    }

    /// task type을 지정하여 단일 텍스트 임베딩
    async fn embed_with_task(&self, text: &str, task_type: &str) -> Result<Vec<f32>> {
        // 빈 텍스트는 영벡터로
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: "models/gemini-embedding-001".to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task_type.to_string(),
            output_dimensionality: Some(self.dimension),
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 429는 지수 백오프로 재시도, 그 외 에러는 즉시 실패
        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.limiter.lock().await;
                limiter.acquire().await;
            }

            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        backoff_sleep(attempt).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read embedding response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return Ok(parsed.embedding.values);
            }

            if status.as_u16() == 429 {
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < MAX_RETRIES {
                    tracing::warn!(
                        "Embedding rate limit hit, retrying (attempt {}/{})",
                        attempt + 1,
                        MAX_RETRIES
                    );
                    backoff_sleep(attempt).await;
                    continue;
                }
            } else {
                if let Ok(err) = serde_json::from_str::<GeminiError>(&body) {
                    anyhow::bail!(
                        "Gemini embedding error ({}): {}",
                        err.error.status,
                        err.error.message
                    );
                }
                anyhow::bail!("Gemini embedding error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, TASK_QUERY).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // 배치 API가 없으므로 순차 처리 (리미터가 간격 조절)
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding chunk {}/{}", i + 1, texts.len());
            results.push(self.embed_with_task(text, TASK_DOCUMENT).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

/// 지수 백오프 대기
async fn backoff_sleep(attempt: u32) {
    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
    tokio::time::sleep(backoff).await;
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위: GEMINI_API_KEY > GOOGLE_AI_API_KEY
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부
pub fn has_api_key() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================
