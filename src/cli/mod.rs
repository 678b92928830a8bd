//! CLI 모듈
//!
//! docrag CLI 명령어 정의 및 구현.
//! HTTP/UI 없이 인제스천과 질문 답변 두 작업을 바로 호출하는
//! 얇은 래퍼입니다.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RagConfig;
use crate::embedding::has_api_key;
use crate::knowledge::{index_files_exist, remove_index_files, VectorIndex};
use crate::system::RagSystem;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docrag")]
#[command(version, about = "PDF 문서 기반 멀티모달 RAG 질의응답 시스템", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF 문서를 벡터 인덱스에 적재
    Ingest {
        /// 적재할 PDF 파일 경로
        file: PathBuf,

        /// 기존 인덱스를 비우고 새로 시작
        #[arg(long)]
        fresh: bool,
    },

    /// 적재된 문서에 대해 질문
    Ask {
        /// 질문
        question: String,

        /// 출처 출력 생략
        #[arg(long)]
        no_sources: bool,
    },

    /// 인덱스 상태 확인
    Status,

    /// 인덱스 삭제
    Clear,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { file, fresh } => cmd_ingest(file, fresh).await,
        Commands::Ask {
            question,
            no_sources,
        } => cmd_ask(&question, no_sources).await,
        Commands::Status => cmd_status(),
        Commands::Clear => cmd_clear(),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// API 키 확인 (없으면 안내 후 종료)
fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 문서 적재 명령어 (ingest)
async fn cmd_ingest(file: PathBuf, fresh: bool) -> Result<()> {
    require_api_key()?;

    if !file.exists() {
        bail!("파일을 찾을 수 없습니다: {}", file.display());
    }

    let system = RagSystem::from_env(RagConfig::default()).context("시스템 초기화 실패")?;

    if fresh {
        system.clear_index().context("인덱스 초기화 실패")?;
        println!("[*] 기존 인덱스를 비웠습니다.");
    } else if system.load_index().context("인덱스 불러오기 실패")? {
        println!("[*] 기존 인덱스를 불러왔습니다 ({} 청크).", system.index.len());
    }

    println!("[*] PDF 처리 중: {}", file.display());

    let report = system.ingestion.ingest(&file).await;

    if !report.success {
        bail!(
            "인제스천 실패: {}",
            report.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    system.save_index().context("인덱스 저장 실패")?;

    println!("[OK] 적재 완료");
    println!("     청크: {} 개", report.chunk_count);
    println!("     이미지: {} 개", report.image_count);
    println!("     임베딩 차원: {}", report.embedding_dimension);
    println!(
        "     할당 ID: {}..{}",
        report.assigned_ids.first().copied().unwrap_or(0),
        report.assigned_ids.last().copied().unwrap_or(0)
    );

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(question: &str, no_sources: bool) -> Result<()> {
    require_api_key()?;

    let system = RagSystem::from_env(RagConfig::default()).context("시스템 초기화 실패")?;

    if !system.load_index().context("인덱스 불러오기 실패")? {
        println!("[!] 저장된 인덱스가 없습니다. 먼저 ingest를 실행하세요.");
    }

    println!("[*] 질문 처리 중: \"{}\"", question);

    let response = system.chatbot.ask(question).await;

    if let Some(ref error) = response.error {
        println!("\n[!] {}", error.message);
        return Ok(());
    }

    println!("\n{}", response.answer);

    if response.meta.fallback_used {
        println!("\n[!] 모델 생성 대신 폴백 답변이 사용되었습니다.");
    }

    if !no_sources && !response.sources.is_empty() {
        println!("\n[*] 출처 ({} 건):", response.sources.len());
        for (i, source) in response.sources.iter().enumerate() {
            let page = source
                .page_number
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {}. [페이지 {}] [유사도 {:.4}] #{}",
                i + 1,
                page,
                source.similarity,
                source.chunk_id
            );
            println!("     {}", truncate_text(&source.text, 120));
        }
    }

    if !response.images.is_empty() {
        println!("\n[*] 관련 이미지:");
        for path in &response.images {
            println!("  - {}", path);
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
///
/// API 키 없이도 동작합니다.
fn cmd_status() -> Result<()> {
    println!("docrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = RagConfig::default();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let base = config.index_base_path();
    if !index_files_exist(&base) {
        println!("[!] 저장된 인덱스가 없습니다.");
        return Ok(());
    }

    let index = VectorIndex::new(config.dimension, config.index_kind);
    match index.load(&base) {
        Ok(()) => {
            let stats = index.stats()?;
            println!("[OK] 인덱스: {} 청크", stats.count);
            println!("     차원: {}", stats.dimension);
            println!("     종류: {} (trained: {})", stats.index_kind, stats.trained);
        }
        Err(e) => {
            println!("[!] 인덱스 불러오기 실패: {}", e);
        }
    }

    Ok(())
}

/// 인덱스 삭제 명령어 (clear)
fn cmd_clear() -> Result<()> {
    let config = RagConfig::default();
    let base = config.index_base_path();

    if !index_files_exist(&base) {
        println!("[!] 삭제할 인덱스가 없습니다.");
        return Ok(());
    }

    remove_index_files(&base).context("인덱스 파일 삭제 실패")?;
    println!("[OK] 인덱스가 삭제되었습니다.");

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        assert_eq!(truncate_text(korean, 5), "안녕하세요...");
    }
}
