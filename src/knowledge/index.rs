//! 벡터 인덱스 - 임베딩 저장 및 최근접 이웃 검색
//!
//! 정규화된 임베딩 벡터와 청크 메타데이터를 함께 저장합니다.
//! 벡터 하나당 메타데이터 하나가 원자적으로 추가되어
//! 두 저장소의 개수는 항상 일치합니다.
//!
//! 동시성 정책: 삽입은 쓰기 락으로 직렬화되고, 검색은 읽기 락으로
//! 동시 수행됩니다. save/load는 전체 상태를 직렬화하므로
//! 진행 중인 삽입과 배타적입니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use super::vector::{
    distance_to_similarity, l2_distance, normalize_l2, ChunkInfo, ChunkMetadata, IndexError,
    SearchHit,
};

/// 메타데이터에 저장할 이미지 최대 개수
const MAX_IMAGES_PER_CHUNK: usize = 3;

/// IVF k-means 반복 횟수
const KMEANS_ITERATIONS: usize = 10;

// ============================================================================
// Index Kind
// ============================================================================

/// 인덱스 종류
///
/// 모든 종류는 동일한 정렬/정규화 계약을 지킵니다.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// 정확한 전수 스캔 (기본값, 학습 불필요)
    Flat,
    /// 클러스터 기반 근사 검색 (첫 삽입 전 train 필요)
    Ivf {
        /// 클러스터 수
        nlist: usize,
        /// 검색 시 탐색할 클러스터 수
        nprobe: usize,
    },
}

impl IndexKind {
    /// 삽입 전 학습이 필요한 종류인지
    pub fn requires_training(&self) -> bool {
        matches!(self, IndexKind::Ivf { .. })
    }

    /// 통계 출력용 이름
    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Ivf { .. } => "ivf",
        }
    }
}

/// 인덱스 통계
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub dimension: usize,
    pub index_kind: &'static str,
    pub trained: bool,
    pub metadata_count: usize,
}

// ============================================================================
// Internal State
// ============================================================================

/// 락으로 보호되는 인덱스 내부 상태
///
/// vectors/metadata/ids는 항상 같은 길이를 유지합니다.
struct IndexState {
    vectors: Vec<Vec<f32>>,
    metadata: Vec<ChunkMetadata>,
    ids: Vec<u64>,
    id_to_pos: HashMap<u64, usize>,
    next_id: u64,
    centroids: Vec<Vec<f32>>,
    assignments: Vec<Vec<usize>>,
    trained: bool,
}

impl IndexState {
    fn empty(kind: IndexKind) -> Self {
        Self {
            vectors: Vec::new(),
            metadata: Vec::new(),
            ids: Vec::new(),
            id_to_pos: HashMap::new(),
            next_id: 0,
            centroids: Vec::new(),
            assignments: Vec::new(),
            trained: !kind.requires_training(),
        }
    }
}

// ============================================================================
// Persistence File Formats
// ============================================================================

/// `<base>.index.json` 파일 내용
#[derive(Serialize, Deserialize)]
struct IndexFile {
    dimension: usize,
    kind: IndexKind,
    trained: bool,
    centroids: Vec<Vec<f32>>,
    vectors: Vec<Vec<f32>>,
}

/// `<base>.meta.json` 파일 내용
#[derive(Serialize, Deserialize)]
struct MetaFile {
    dimension: usize,
    kind: IndexKind,
    metadata: Vec<ChunkMetadata>,
    id_to_pos: HashMap<u64, usize>,
    next_id: u64,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 벡터 인덱스
///
/// 저장된 모든 벡터와 메타데이터를 단독 소유합니다.
pub struct VectorIndex {
    dimension: usize,
    kind: IndexKind,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// 새 인덱스 생성
    ///
    /// # Arguments
    /// * `dimension` - 임베딩 차원 (이후 변경 불가)
    /// * `kind` - 인덱스 종류
    pub fn new(dimension: usize, kind: IndexKind) -> Self {
        tracing::info!(
            "Vector index initialized: kind={}, dimension={}",
            kind.label(),
            dimension
        );

        Self {
            dimension,
            kind,
            state: RwLock::new(IndexState::empty(kind)),
        }
    }

    /// 설정된 임베딩 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 인덱스 종류
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// 저장된 벡터 수
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.vectors.len()).unwrap_or(0)
    }

    /// 비어 있는지
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 클러스터 인덱스 학습 (IVF 전용)
    ///
    /// 대표 벡터 배치로 센트로이드를 계산합니다.
    /// 이미 학습된 인덱스에 다시 호출해도 아무 일도 하지 않습니다 (멱등).
    /// Flat 인덱스에서는 no-op입니다.
    pub fn train(&self, batch: &[Vec<f32>]) -> Result<(), IndexError> {
        let nlist = match self.kind {
            IndexKind::Flat => return Ok(()),
            IndexKind::Ivf { nlist, .. } => nlist,
        };

        for v in batch {
            if v.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: v.len(),
                });
            }
        }

        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        if state.trained {
            tracing::debug!("Index already trained, skipping");
            return Ok(());
        }

        if batch.is_empty() {
            tracing::warn!("Empty training batch, index remains untrained");
            return Ok(());
        }

        // 정규화된 사본으로 학습 (저장 벡터와 같은 공간)
        let mut normalized: Vec<Vec<f32>> = batch.to_vec();
        for v in normalized.iter_mut() {
            normalize_l2(v);
        }

        let effective_nlist = nlist.min(normalized.len()).max(1);
        if effective_nlist < nlist {
            tracing::warn!(
                "Training batch smaller than nlist: using {} clusters instead of {}",
                effective_nlist,
                nlist
            );
        }

        state.centroids = kmeans(&normalized, effective_nlist, KMEANS_ITERATIONS);
        state.assignments = vec![Vec::new(); state.centroids.len()];
        state.trained = true;

        tracing::info!(
            "Trained IVF index with {} centroids from {} vectors",
            state.centroids.len(),
            normalized.len()
        );

        Ok(())
    }

    /// 벡터 배치 삽입
    ///
    /// 각 벡터를 정규화한 뒤 메타데이터와 함께 원자적으로 추가합니다.
    /// ID는 영속 카운터에서 순차 할당되며 재사용되지 않습니다.
    /// 메타데이터를 생략하면 최소 메타데이터를 합성합니다 (페이지 없음).
    ///
    /// # Returns
    /// 입력 순서대로 할당된 ID 목록
    pub fn add(
        &self,
        vectors: Vec<Vec<f32>>,
        chunk_texts: &[String],
        metadata: Option<Vec<ChunkInfo>>,
    ) -> Result<Vec<u64>, IndexError> {
        // 모든 검증은 변경 전에 수행 - 실패 시 인덱스는 그대로
        if vectors.len() != chunk_texts.len() {
            return Err(IndexError::BatchMismatch {
                vectors: vectors.len(),
                texts: chunk_texts.len(),
            });
        }

        if let Some(ref meta) = metadata {
            if meta.len() != vectors.len() {
                return Err(IndexError::BatchMismatch {
                    vectors: vectors.len(),
                    texts: meta.len(),
                });
            }
        }

        for v in &vectors {
            if v.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: v.len(),
                });
            }
        }

        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;

        if self.kind.requires_training() && !state.trained {
            return Err(IndexError::NotTrained);
        }

        let mut assigned_ids = Vec::with_capacity(vectors.len());
        let now = Utc::now();

        for (i, (mut vector, text)) in vectors.into_iter().zip(chunk_texts.iter()).enumerate() {
            normalize_l2(&mut vector);

            let info = metadata
                .as_ref()
                .map(|m| m[i].clone())
                .unwrap_or_else(|| ChunkInfo {
                    chunk_id: format!("chunk_{}", i),
                    page_number: None,
                    chunk_index: i,
                    images: Vec::new(),
                });

            let image_count = info.images.len();
            let mut images = info.images;
            images.truncate(MAX_IMAGES_PER_CHUNK);

            let meta = ChunkMetadata {
                chunk_id: info.chunk_id,
                text: text.clone(),
                page_number: info.page_number,
                chunk_index: info.chunk_index,
                image_count,
                images,
                ingested_at: now,
            };

            let pos = state.vectors.len();
            let id = state.next_id;

            // IVF: 가장 가까운 센트로이드 리스트에 배정
            if self.kind.requires_training() && !state.centroids.is_empty() {
                let centroid = nearest_centroids(&vector, &state.centroids, 1)
                    .into_iter()
                    .next()
                    .unwrap_or(0);
                state.assignments[centroid].push(pos);
            }

            state.vectors.push(vector);
            state.metadata.push(meta);
            state.ids.push(id);
            state.id_to_pos.insert(id, pos);
            state.next_id += 1;

            assigned_ids.push(id);
        }

        tracing::info!(
            "Added {} vectors to index (total: {})",
            assigned_ids.len(),
            state.vectors.len()
        );

        Ok(assigned_ids)
    }

    /// 최근접 이웃 검색
    ///
    /// 질의 벡터를 저장 벡터와 같은 방식으로 정규화한 뒤
    /// 거리 오름차순으로 최대 `k`개를 반환합니다.
    /// 인덱스가 비어 있으면 빈 목록을 반환합니다 (에러 아님).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut q = query.to_vec();
        normalize_l2(&mut q);

        let state = self.state.read().map_err(|_| IndexError::LockPoisoned)?;

        if state.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        // 후보 선정: Flat은 전수, IVF는 nprobe개 클러스터만
        let candidates: Vec<usize> = match self.kind {
            IndexKind::Flat => (0..state.vectors.len()).collect(),
            IndexKind::Ivf { nprobe, .. } => {
                let probed = nearest_centroids(&q, &state.centroids, nprobe.max(1));
                let mut positions: Vec<usize> = probed
                    .into_iter()
                    .flat_map(|c| state.assignments[c].iter().copied())
                    .collect();

                // 탐색한 클러스터가 모두 비었으면 전수 스캔으로 폴백
                if positions.is_empty() {
                    positions = (0..state.vectors.len()).collect();
                }
                positions
            }
        };

        let mut scored: Vec<(f32, usize)> = candidates
            .into_iter()
            .map(|pos| (l2_distance(&q, &state.vectors[pos]), pos))
            .collect();

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let hits = scored
            .into_iter()
            .map(|(distance, pos)| SearchHit {
                id: state.ids[pos],
                metadata: state.metadata[pos].clone(),
                distance,
                similarity: distance_to_similarity(distance),
            })
            .collect();

        Ok(hits)
    }

    /// ID로 메타데이터 조회 (O(1))
    pub fn get_by_id(&self, id: u64) -> Result<Option<ChunkMetadata>, IndexError> {
        let state = self.state.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(state
            .id_to_pos
            .get(&id)
            .map(|&pos| state.metadata[pos].clone()))
    }

    /// 인덱스 통계
    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        let state = self.state.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(IndexStats {
            count: state.vectors.len(),
            dimension: self.dimension,
            index_kind: self.kind.label(),
            trained: state.trained,
            metadata_count: state.metadata.len(),
        })
    }

    /// 인덱스 비우기
    ///
    /// 내용만 비우고 차원/종류 설정은 유지합니다.
    pub fn clear(&self) -> Result<(), IndexError> {
        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        *state = IndexState::empty(self.kind);
        tracing::info!("Vector index cleared");
        Ok(())
    }

    /// 인덱스 저장
    ///
    /// `<base>.index.json`(벡터/센트로이드)과 `<base>.meta.json`
    /// (메타데이터/ID 맵/카운터) 두 파일로 저장합니다.
    /// 읽기 락을 잡으므로 진행 중인 삽입과 배타적입니다.
    pub fn save(&self, base: &Path) -> Result<(), IndexError> {
        let state = self.state.read().map_err(|_| IndexError::LockPoisoned)?;

        let index_file = IndexFile {
            dimension: self.dimension,
            kind: self.kind,
            trained: state.trained,
            centroids: state.centroids.clone(),
            vectors: state.vectors.clone(),
        };

        let meta_file = MetaFile {
            dimension: self.dimension,
            kind: self.kind,
            metadata: state.metadata.clone(),
            id_to_pos: state.id_to_pos.clone(),
            next_id: state.next_id,
        };

        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IndexError::Persistence(format!("create dir failed: {}", e)))?;
            }
        }

        let index_json = serde_json::to_string(&index_file)
            .map_err(|e| IndexError::Persistence(format!("serialize index failed: {}", e)))?;
        let meta_json = serde_json::to_string(&meta_file)
            .map_err(|e| IndexError::Persistence(format!("serialize metadata failed: {}", e)))?;

        std::fs::write(index_file_path(base), index_json)
            .map_err(|e| IndexError::Persistence(format!("write index file failed: {}", e)))?;
        std::fs::write(meta_file_path(base), meta_json)
            .map_err(|e| IndexError::Persistence(format!("write metadata file failed: {}", e)))?;

        tracing::info!("Vector index saved to {}", base.display());
        Ok(())
    }

    /// 인덱스 복원
    ///
    /// 두 파일을 모두 읽고 검증이 끝난 뒤에만 메모리 상태를 교체합니다.
    /// 파일 누락, 손상, 차원 불일치 시 기존 상태는 변경되지 않습니다.
    pub fn load(&self, base: &Path) -> Result<(), IndexError> {
        let index_path = index_file_path(base);
        let meta_path = meta_file_path(base);

        if !index_path.exists() {
            return Err(IndexError::Persistence(format!(
                "index file not found: {}",
                index_path.display()
            )));
        }
        if !meta_path.exists() {
            return Err(IndexError::Persistence(format!(
                "metadata file not found: {}",
                meta_path.display()
            )));
        }

        let index_json = std::fs::read_to_string(&index_path)
            .map_err(|e| IndexError::Persistence(format!("read index file failed: {}", e)))?;
        let meta_json = std::fs::read_to_string(&meta_path)
            .map_err(|e| IndexError::Persistence(format!("read metadata file failed: {}", e)))?;

        let index_file: IndexFile = serde_json::from_str(&index_json)
            .map_err(|e| IndexError::Persistence(format!("parse index file failed: {}", e)))?;
        let meta_file: MetaFile = serde_json::from_str(&meta_json)
            .map_err(|e| IndexError::Persistence(format!("parse metadata file failed: {}", e)))?;

        // 차원/종류 검증 - 실패하면 메모리 상태는 그대로
        if index_file.dimension != self.dimension || meta_file.dimension != self.dimension {
            return Err(IndexError::Persistence(format!(
                "dimension mismatch on load: expected {}, index file has {}, metadata file has {}",
                self.dimension, index_file.dimension, meta_file.dimension
            )));
        }
        if index_file.kind != self.kind || meta_file.kind != self.kind {
            return Err(IndexError::Persistence(format!(
                "index kind mismatch on load: expected {}",
                self.kind.label()
            )));
        }
        if index_file.vectors.len() != meta_file.metadata.len() {
            return Err(IndexError::Persistence(format!(
                "vector/metadata count mismatch on load: {} vectors, {} metadata",
                index_file.vectors.len(),
                meta_file.metadata.len()
            )));
        }
        for v in &index_file.vectors {
            if v.len() != self.dimension {
                return Err(IndexError::Persistence(format!(
                    "stored vector has wrong dimension: expected {}, got {}",
                    self.dimension,
                    v.len()
                )));
            }
        }
        if meta_file.id_to_pos.len() != index_file.vectors.len() {
            return Err(IndexError::Persistence(
                "id map size does not match vector count".to_string(),
            ));
        }

        // pos -> id 역매핑 재구성
        let mut ids = vec![0u64; index_file.vectors.len()];
        let mut seen = vec![false; index_file.vectors.len()];
        for (&id, &pos) in &meta_file.id_to_pos {
            if pos >= ids.len() || seen[pos] {
                return Err(IndexError::Persistence(
                    "corrupt id map: invalid or duplicate position".to_string(),
                ));
            }
            ids[pos] = id;
            seen[pos] = true;
        }

        // IVF: 배정 리스트 재계산
        let assignments = if index_file.trained && !index_file.centroids.is_empty() {
            let mut assignments = vec![Vec::new(); index_file.centroids.len()];
            for (pos, v) in index_file.vectors.iter().enumerate() {
                let centroid = nearest_centroids(v, &index_file.centroids, 1)
                    .into_iter()
                    .next()
                    .unwrap_or(0);
                assignments[centroid].push(pos);
            }
            assignments
        } else {
            Vec::new()
        };

        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        *state = IndexState {
            vectors: index_file.vectors,
            metadata: meta_file.metadata,
            ids,
            id_to_pos: meta_file.id_to_pos,
            next_id: meta_file.next_id,
            centroids: index_file.centroids,
            assignments,
            trained: index_file.trained,
        };

        tracing::info!(
            "Vector index loaded from {} ({} vectors)",
            base.display(),
            state.vectors.len()
        );
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 인덱스 파일 경로 (`<base>.index.json`)
fn index_file_path(base: &Path) -> PathBuf {
    PathBuf::from(format!("{}.index.json", base.display()))
}

/// 메타데이터 파일 경로 (`<base>.meta.json`)
fn meta_file_path(base: &Path) -> PathBuf {
    PathBuf::from(format!("{}.meta.json", base.display()))
}

/// 저장된 인덱스 파일 쌍 존재 여부
pub fn index_files_exist(base: &Path) -> bool {
    index_file_path(base).exists() && meta_file_path(base).exists()
}

/// 저장된 인덱스 파일 쌍 삭제
///
/// 없는 파일은 무시합니다.
pub fn remove_index_files(base: &Path) -> std::io::Result<()> {
    for path in [index_file_path(base), meta_file_path(base)] {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// 질의와 가장 가까운 센트로이드 인덱스들 (거리 오름차순, 최대 n개)
fn nearest_centroids(query: &[f32], centroids: &[Vec<f32>], n: usize) -> Vec<usize> {
    let mut scored: Vec<(f32, usize)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (l2_distance(query, c), i))
        .collect();

    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(n);
    scored.into_iter().map(|(_, i)| i).collect()
}

/// 결정적 k-means (Lloyd)
///
/// 초기 센트로이드는 배치에서 균등 간격으로 선택합니다.
/// 빈 클러스터는 기존 센트로이드를 유지합니다.
fn kmeans(batch: &[Vec<f32>], k: usize, iterations: usize) -> Vec<Vec<f32>> {
    let stride = (batch.len() / k).max(1);
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| batch[(i * stride).min(batch.len() - 1)].clone())
        .collect();

    let dim = batch[0].len();

    for _ in 0..iterations {
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];

        for v in batch {
            let nearest = nearest_centroids(v, &centroids, 1)
                .into_iter()
                .next()
                .unwrap_or(0);
            for (s, x) in sums[nearest].iter_mut().zip(v.iter()) {
                *s += x;
            }
            counts[nearest] += 1;
        }

        for (i, centroid) in centroids.iter_mut().enumerate() {
            if counts[i] > 0 {
                for (c, s) in centroid.iter_mut().zip(sums[i].iter()) {
                    *c = s / counts[i] as f32;
                }
            }
        }
    }

    centroids
}

// ============================================================================
// Tests
// ============================================================================
