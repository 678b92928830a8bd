//! PDF 추출기
//!
//! pdf-extract 크레이트로 텍스트를 뽑아 페이지별로 나누고,
//! 각 페이지를 단어 윈도우로 청킹합니다. 페이지 번호는 1부터 시작합니다.
//!
//! PDF 내장 이미지 디코딩은 이 추출기의 범위 밖입니다. 대신 업스트림
//! 파이프라인이 저장해 둔 사이드카 디렉토리(`<stem>_images/`)의
//! `page_{n}_img_{m}.png` 파일을 이미지 레코드로 등록합니다.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use crate::knowledge::{ChunkInfo, ImageRecord};

use super::{ExtractedDocument, Extractor};

/// 이보다 짧은 청크는 버림 (문자 수)
const MIN_CHUNK_CHARS: usize = 50;

// ============================================================================
// PdfExtractor
// ============================================================================

/// PDF 문서 추출기
pub struct PdfExtractor {
    /// 청크 당 단어 수
    chunk_words: usize,
    /// 청크 간 중첩 단어 수
    overlap_words: usize,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self {
            chunk_words: 120,
            overlap_words: 20,
        }
    }
}

impl PdfExtractor {
    /// 청킹 설정으로 생성
    pub fn new(chunk_words: usize, overlap_words: usize) -> Self {
        Self {
            chunk_words,
            overlap_words: overlap_words.min(chunk_words.saturating_sub(1)),
        }
    }
}

impl Extractor for PdfExtractor {
    fn extract(&self, source: &Path) -> Result<ExtractedDocument> {
        let bytes = std::fs::read(source)
            .with_context(|| format!("Failed to read PDF: {:?}", source))?;

        let text = pdf_extract::extract_text_from_mem(&bytes)
            .with_context(|| format!("Failed to extract text from PDF: {:?}", source))?;

        if text.trim().is_empty() {
            tracing::warn!(
                "No text extracted from PDF: {:?}. It might be a scanned document.",
                source
            );
        }

        let pages = split_pdf_pages(&text);

        let mut chunk_texts = Vec::new();
        let mut metadata = Vec::new();

        for (page_idx, page_text) in pages.iter().enumerate() {
            let page_number = page_idx + 1;
            let cleaned = clean_text(page_text);
            if cleaned.is_empty() {
                continue;
            }

            for (chunk_idx, chunk) in chunk_text(&cleaned, self.chunk_words, self.overlap_words)
                .into_iter()
                .enumerate()
            {
                if chunk.chars().count() < MIN_CHUNK_CHARS {
                    continue;
                }

                metadata.push(ChunkInfo {
                    chunk_id: format!("page_{}_chunk_{}", page_number, chunk_idx),
                    page_number: Some(page_number),
                    chunk_index: chunk_idx,
                    images: Vec::new(),
                });
                chunk_texts.push(chunk);
            }
        }

        let images = scan_sidecar_images(source);

        tracing::info!(
            "Extracted {} chunks and {} images from {:?}",
            chunk_texts.len(),
            images.len(),
            source
        );

        Ok(ExtractedDocument {
            chunk_texts,
            metadata,
            images,
        })
    }
}

// ============================================================================
// Page Splitting
// ============================================================================

/// PDF 텍스트를 페이지별로 분리
///
/// 폼피드 문자(\x0c) 우선, 없으면 페이지 구분자 패턴으로 시도합니다.
/// 분리 실패 시 전체를 1페이지로 취급합니다.
fn split_pdf_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 일부 PDF는 "--- Page 1 ---" 형태의 구분자를 사용
    let page_pattern =
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").expect("Invalid regex");

    if page_pattern.is_match(text) {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    if text.trim().is_empty() {
        vec![]
    } else {
        vec![text.trim().to_string()]
    }
}

// ============================================================================
// Text Chunking
// ============================================================================

/// 연속 공백 정리
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 텍스트를 단어 윈도우 청크로 분할
///
/// `overlap`으로 청크 간 중첩 단어 수를 지정합니다.
fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        return vec![];
    }

    if words.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));

        if end >= words.len() {
            break;
        }

        start += chunk_size - overlap;
    }

    chunks
}

// ============================================================================
// Sidecar Images
// ============================================================================

/// 사이드카 이미지 디렉토리 스캔
///
/// `<pdf 디렉토리>/<stem>_images/page_{n}_img_{m}.png` 파일을
/// 이미지 레코드로 변환합니다. 디렉토리가 없으면 빈 목록입니다.
fn scan_sidecar_images(pdf_path: &Path) -> Vec<ImageRecord> {
    let stem = match pdf_path.file_stem().and_then(|s| s.to_str()) {
        Some(s) => s,
        None => return Vec::new(),
    };

    let images_dir = pdf_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}_images", stem));

    if !images_dir.is_dir() {
        return Vec::new();
    }

    let name_pattern =
        Regex::new(r"^page_(\d+)_img_(\d+)\.(?:png|jpg|jpeg)$").expect("Invalid regex");

    let entries = match std::fs::read_dir(&images_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read images dir {:?}: {}", images_dir, e);
            return Vec::new();
        }
    };

    let mut found: Vec<(usize, usize, ImageRecord)> = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };

        let captures = match name_pattern.captures(name) {
            Some(c) => c,
            None => continue,
        };

        let page: usize = match captures[1].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let img_index: usize = captures[2].parse().unwrap_or(0);

        let (width, height) = png_dimensions(&path).unwrap_or((0, 0));

        found.push((
            page,
            img_index,
            ImageRecord {
                page,
                path: path.display().to_string(),
                width,
                height,
                bbox: [0.0, 0.0, width as f32, height as f32],
            },
        ));
    }

    // 파일 시스템 순서는 비결정적이므로 (페이지, 순번)으로 정렬
    found.sort_by_key(|(page, idx, _)| (*page, *idx));
    found.into_iter().map(|(_, _, record)| record).collect()
}

/// PNG 헤더에서 픽셀 크기 읽기 (IHDR)
///
/// PNG가 아니거나 읽기 실패 시 None.
fn png_dimensions(path: &Path) -> Option<(u32, u32)> {
    const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE {
        return None;
    }

    // 8바이트 시그니처 + 4바이트 길이 + "IHDR" 다음에 width/height (big-endian)
    if &bytes[12..16] != b"IHDR" {
        return None;
    }

    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some((width, height))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let text = "Page 1 content\x0cPage 2 content\x0cPage 3 content";
        let pages = split_pdf_pages(text);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[1], "Page 2 content");
    }

    #[test]
    fn test_split_pdf_pages_with_separator_lines() {
        let text = "Intro text\n--- Page 1 ---\nbody one\n--- Page 2 ---\nbody two";
        let pages = split_pdf_pages(text);
        assert!(pages.len() > 1);
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let pages = split_pdf_pages("Just some text without page breaks");
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_split_pdf_pages_empty() {
        assert!(split_pdf_pages("   ").is_empty());
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("a  b\n\nc\t d"), "a b c d");
    }

    #[test]
    fn test_chunk_text_window_and_overlap() {
        let text = "a b c d e f g h i j";
        let chunks = chunk_text(text, 4, 1);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "a b c d");
        assert_eq!(chunks[1], "d e f g");
        assert_eq!(chunks[2], "g h i j");
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", 4, 1).is_empty());
    }

    #[test]
    fn test_chunk_text_small_input_single_chunk() {
        let chunks = chunk_text("a b c", 4, 1);
        assert_eq!(chunks, vec!["a b c".to_string()]);
    }

    #[test]
    fn test_chunk_text_no_overlap() {
        let chunks = chunk_text("a b c d e f g h", 4, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a b c d");
        assert_eq!(chunks[1], "e f g h");
    }

    /// 최소 PNG 헤더 생성 (시그니처 + IHDR 길이/타입 + 크기)
    fn fake_png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    #[test]
    fn test_png_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.png");
        std::fs::write(&path, fake_png(640, 480)).unwrap();

        assert_eq!(png_dimensions(&path), Some((640, 480)));
    }

    #[test]
    fn test_png_dimensions_not_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.png");
        std::fs::write(&path, b"not a png at all").unwrap();

        assert_eq!(png_dimensions(&path), None);
    }

    #[test]
    fn test_scan_sidecar_images() {
        let dir = TempDir::new().unwrap();
        let pdf_path = dir.path().join("report.pdf");
        std::fs::write(&pdf_path, b"fake pdf").unwrap();

        let images_dir = dir.path().join("report_images");
        std::fs::create_dir(&images_dir).unwrap();
        std::fs::write(images_dir.join("page_2_img_1.png"), fake_png(30, 40)).unwrap();
        std::fs::write(images_dir.join("page_2_img_0.png"), fake_png(10, 20)).unwrap();
        std::fs::write(images_dir.join("page_1_img_0.png"), fake_png(50, 60)).unwrap();
        std::fs::write(images_dir.join("notes.txt"), b"ignored").unwrap();

        let images = scan_sidecar_images(&pdf_path);

        assert_eq!(images.len(), 3);
        // (페이지, 순번) 정렬
        assert_eq!(images[0].page, 1);
        assert_eq!(images[1].page, 2);
        assert!(images[1].path.contains("page_2_img_0"));
        assert_eq!(images[1].width, 10);
        assert_eq!(images[1].height, 20);
        assert_eq!(images[2].bbox, [0.0, 0.0, 30.0, 40.0]);
    }

    #[test]
    fn test_scan_sidecar_images_missing_dir() {
        let dir = TempDir::new().unwrap();
        let pdf_path = dir.path().join("lonely.pdf");
        assert!(scan_sidecar_images(&pdf_path).is_empty());
    }
}
