//! 네임스페이스 레지스트리
//!
//! 네임스페이스(global / 세션)별로 로드된 인덱스 핸들을 캐시합니다.
//!
//! - 읽기: `Arc` 스냅샷을 복제한 뒤 락 없이 검색
//! - 쓰기: 네임스페이스별 writer 락 아래에서 copy-on-write → 저장 → 교체
//! - 다른 네임스페이스끼리는 락을 공유하지 않음

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::Chunk;
use super::session::{Namespace, SessionId, SessionStore};
use super::vector::{embed_chunks, VectorIndex};

// ============================================================================
// Types
// ============================================================================

/// 검색된 구절 (요청마다 생성, 저장하지 않음)
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    /// 코사인 유사도
    pub score: f32,
    /// 출처 네임스페이스
    pub namespace: Namespace,
}

/// 쓰기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// 새로 추가된 청크 수
    pub added: usize,
    /// 쓰기 후 전체 청크 수
    pub total: usize,
    /// 이번 쓰기로 인덱스가 새로 만들어졌는지
    pub created: bool,
}

/// 네임스페이스 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub chunks: usize,
    pub embedding_model: String,
    pub dimension: usize,
}

enum SlotState {
    /// 아직 디스크를 확인하지 않음
    Unloaded,
    /// 디스크에 인덱스 없음
    Absent,
    Ready(Arc<VectorIndex>),
}

struct Slot {
    writer: tokio::sync::Mutex<()>,
    state: RwLock<SlotState>,
    /// 세션 삭제로 맵에서 빠진 슬롯
    retired: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            writer: tokio::sync::Mutex::new(()),
            state: RwLock::new(SlotState::Unloaded),
            retired: AtomicBool::new(false),
        }
    }

    /// 로드된 상태면 스냅샷 반환
    fn current(&self) -> Option<Option<Arc<VectorIndex>>> {
        match &*self.state.read() {
            SlotState::Unloaded => None,
            SlotState::Absent => Some(None),
            SlotState::Ready(index) => Some(Some(Arc::clone(index))),
        }
    }

    fn set(&self, index: Option<Arc<VectorIndex>>) {
        *self.state.write() = match index {
            Some(index) => SlotState::Ready(index),
            None => SlotState::Absent,
        };
    }
}

// ============================================================================
// IndexRegistry
// ============================================================================

/// 네임스페이스 → 인덱스 핸들 맵
pub struct IndexRegistry {
    store: SessionStore,
    slots: DashMap<Namespace, Arc<Slot>>,
}

impl IndexRegistry {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            slots: DashMap::new(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn slot(&self, ns: Namespace) -> Arc<Slot> {
        // 샤드 락은 이 문장 안에서만 잡음
        self.slots
            .entry(ns)
            .or_insert_with(|| Arc::new(Slot::new()))
            .value()
            .clone()
    }

    /// 현재 스냅샷. 인덱스가 없으면 `None`.
    ///
    /// 첫 조회 시 디스크에서 로드합니다. 로드는 writer 락 아래에서 하므로
    /// 저장 중인 파일을 읽지 않습니다.
    pub async fn snapshot(&self, ns: Namespace) -> Result<Option<Arc<VectorIndex>>> {
        let slot = self.slot(ns);
        if let Some(current) = slot.current() {
            return Ok(current);
        }

        let _guard = slot.writer.lock().await;
        self.load_locked(ns, &slot).await
    }

    /// writer 락을 잡은 상태에서 호출
    async fn load_locked(&self, ns: Namespace, slot: &Slot) -> Result<Option<Arc<VectorIndex>>> {
        if let Some(current) = slot.current() {
            return Ok(current);
        }

        let dir = self.store.namespace_path(&ns);
        let loaded = tokio::task::spawn_blocking(move || VectorIndex::load(&dir))
            .await
            .map_err(|e| RagError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))??
            .map(Arc::new);

        match &loaded {
            Some(index) => tracing::info!("Loaded {} index ({} chunks)", ns, index.len()),
            None => tracing::debug!("No index for {}", ns),
        }

        slot.set(loaded.clone());
        Ok(loaded)
    }

    /// 인덱스 존재 여부
    pub async fn exists(&self, ns: Namespace) -> Result<bool> {
        Ok(self.snapshot(ns).await?.is_some())
    }

    /// 청크를 임베딩해 네임스페이스에 추가 (없으면 생성)
    ///
    /// 임베딩은 락 밖에서 수행하고, 저장과 스냅샷 교체만 직렬화합니다.
    pub async fn ingest_chunks(
        &self,
        ns: Namespace,
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<WriteOutcome> {
        let slot = self.slot(ns);

        // 빈 입력: 기존 인덱스가 있으면 변화 없음, 없으면 EmptyInput
        if chunks.is_empty() {
            return match self.snapshot(ns).await? {
                Some(index) => Ok(WriteOutcome {
                    added: 0,
                    total: index.len(),
                    created: false,
                }),
                None => Err(RagError::EmptyInput),
            };
        }

        let entries = embed_chunks(chunks, embedder).await?;

        let _guard = slot.writer.lock().await;
        if slot.retired.load(Ordering::Acquire) {
            return Err(RagError::InvalidSession(format!("{} was deleted", ns)));
        }

        let current = self.load_locked(ns, &slot).await?;
        let (next, added, created) = match current {
            Some(index) => {
                let mut next = VectorIndex::clone(&index);
                let added = next.append(embedder.name(), entries)?;
                (next, added, false)
            }
            None => {
                let next = VectorIndex::from_embedded(embedder.name(), embedder.dimension(), entries)?;
                let added = next.len();
                (next, added, true)
            }
        };

        let next = Arc::new(next);
        let dir = self.store.namespace_path(&ns);
        let to_save = Arc::clone(&next);
        tokio::task::spawn_blocking(move || to_save.save(&dir))
            .await
            .map_err(|e| RagError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))??;

        let total = next.len();
        slot.set(Some(next));

        tracing::info!(
            "{} {} index: +{} chunks ({} total)",
            if created { "Created" } else { "Updated" },
            ns,
            added,
            total
        );

        Ok(WriteOutcome {
            added,
            total,
            created,
        })
    }

    /// 세션 삭제 - 인덱스/업로드 디렉토리 제거 후 슬롯 제거
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        let ns = Namespace::Session(*id);
        let slot = self.slot(ns);

        let _guard = slot.writer.lock().await;
        self.store.delete_session(id)?;
        slot.retired.store(true, Ordering::Release);
        slot.set(None);
        self.slots.remove(&ns);
        Ok(())
    }

    /// 디스크에 있는 네임스페이스별 통계 (읽을 수 없는 인덱스는 건너뜀)
    pub async fn stats(&self) -> Result<Vec<NamespaceStats>> {
        let mut stats = Vec::new();

        for ns in self.store.list_namespaces()? {
            match self.snapshot(ns).await {
                Ok(Some(index)) => stats.push(NamespaceStats {
                    namespace: ns.to_string(),
                    chunks: index.len(),
                    embedding_model: index.embedding_model().to_string(),
                    dimension: index.dimension(),
                }),
                Ok(None) => {}
                Err(e) => tracing::warn!("Cannot read {}: {}", ns, e),
            }
        }

        Ok(stats)
    }

    /// 캐시된 핸들 무효화 (다음 조회 시 디스크에서 다시 로드)
    pub fn invalidate(&self, ns: Namespace) {
        if let Some(slot) = self.slots.get(&ns) {
            *slot.state.write() = SlotState::Unloaded;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
