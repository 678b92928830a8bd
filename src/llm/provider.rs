//! 텍스트 생성 프로바이더
//!
//! Gemini generateContent API를 사용한 텍스트 생성 구현입니다.
//! 이 계층은 질문당 한 번만 호출되며 재시도하지 않습니다 -
//! 실패 처리는 호출자(파이프라인 단계)의 폴백 정책을 따릅니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Gemini 텍스트 생성 엔드포인트 베이스
const GEMINI_GENERATE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";

/// 기본 모델
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// HTTP 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 최대 출력 토큰
const MAX_OUTPUT_TOKENS: u32 = 2048;

// ============================================================================
// TextGenerator Trait
// ============================================================================

/// 텍스트 생성 트레이트
///
/// 전송/프로바이더 에러는 Err로 전파됩니다. 스트리밍 계약은 없습니다.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 프롬프트로 텍스트 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 식별자
    fn model(&self) -> &str;
}

// ============================================================================
// Gemini Generator
// ============================================================================

/// Gemini generateContent 기반 생성기
#[derive(Debug)]
pub struct GeminiGenerator {
    api_key: String,
    client: reqwest::Client,
    model: String,
    temperature: f32,
}

impl GeminiGenerator {
    /// 새 생성기 생성
    pub fn new(api_key: String, model: impl Into<String>, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: model.into(),
            temperature,
        })
    }

    /// 환경변수 키 + 기본 모델로 생성
    pub fn from_env() -> Result<Self> {
        let api_key = crate::embedding::get_api_key()?;
        Self::new(api_key, DEFAULT_MODEL, 0.7)
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/{}:generateContent", GEMINI_GENERATE_URL, self.model);

        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send generation request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read generation response body")?;

        if !status.is_success() {
            anyhow::bail!("Gemini generation error ({}): {}", status, body);
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generation response")?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        if text.is_empty() {
            anyhow::bail!("Gemini returned an empty candidate");
        }

        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerateContent {
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize)]
struct GeneratePart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: String,
}

// ============================================================================
// Tests
// ============================================================================
