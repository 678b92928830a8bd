//! 청크-이미지 링커
//!
//! 추출된 이미지 레코드를 같은 페이지의 텍스트 청크에 연결합니다.
//! 연결 기준은 페이지 번호 동일성뿐이며 (bbox/근접도 휴리스틱 없음),
//! 페이지 번호가 없는 청크는 이미지를 받지 않습니다.

use super::vector::{ChunkInfo, ImageRecord};

/// 특정 페이지에 속한 이미지 선택
///
/// 입력 순서를 유지합니다. `page`가 None이면 항상 빈 목록입니다.
pub fn images_for_page(images: &[ImageRecord], page: Option<usize>) -> Vec<ImageRecord> {
    match page {
        Some(p) => images.iter().filter(|img| img.page == p).cloned().collect(),
        None => Vec::new(),
    }
}

/// 모든 청크에 같은 페이지의 이미지를 연결
///
/// 인덱싱 전에 한 번 호출되며, 각 청크의 `images`를 채웁니다.
/// 이미지는 청크에 소유되지 않는 약한 연관입니다 - 같은 페이지의
/// 여러 청크가 같은 이미지를 공유할 수 있습니다.
pub fn link_images(chunks: &mut [ChunkInfo], images: &[ImageRecord]) {
    if images.is_empty() {
        return;
    }

    for chunk in chunks.iter_mut() {
        chunk.images = images_for_page(images, chunk.page_number);
    }
}

// ============================================================================
// Tests
// ============================================================================
