//! 외부 협력자 인터페이스.
//!
//! 어그리게이터와 프로바이더 어댑터는 이 trait들에만 의존합니다. 실제 구현
//! (Redis, Postgres, 로컬 파일 시스템, SVG 렌더러)은 `market-aggregator`의
//! `storage` 모듈에 있습니다.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

use crate::domain::{KlineSeries, TrackedAsset};
use crate::error::MarketResult;

// =============================================================================
// SnapshotStore
// =============================================================================

/// 문자열 키로 접근하는 불투명 blob 저장소.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 키에 저장된 값을 읽습니다. 없으면 `None`.
    async fn get(&self, key: &str) -> MarketResult<Option<Vec<u8>>>;

    /// 키에 값을 저장합니다 (덮어쓰기).
    async fn put(&self, key: &str, value: Vec<u8>) -> MarketResult<()>;
}

/// JSON으로 역직렬화하여 읽습니다.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    key: &str,
) -> MarketResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// JSON으로 직렬화하여 저장합니다.
pub async fn store_json<T: Serialize + ?Sized>(
    store: &dyn SnapshotStore,
    key: &str,
    value: &T,
) -> MarketResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, bytes).await
}

/// 프로세스 내 메모리 저장소.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: &str) -> MarketResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> MarketResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// 객체 업로드 저장소.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// 고정 ID로 파일을 업로드하고 공개 URL을 반환합니다.
    ///
    /// 같은 `(id, bucket, filename)`으로 다시 호출하면 기존 객체를 덮어씁니다.
    async fn upload_with_fixed_id(
        &self,
        id: &str,
        bucket: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> MarketResult<String>;
}

// =============================================================================
// ChartRenderer
// =============================================================================

/// 렌더링된 차트 이미지.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChart {
    pub bytes: Vec<u8>,
    /// 파일 확장자 (점 제외, 예: "svg")
    pub extension: String,
    pub content_type: String,
}

/// 가격 시계열을 이미지로 변환합니다.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, series: &KlineSeries) -> MarketResult<RenderedChart>;
}

// =============================================================================
// AssetRegistrySource
// =============================================================================

/// 추적 대상 자산 목록의 원천 (영속화된 비즈니스 엔티티).
#[async_trait]
pub trait AssetRegistrySource: Send + Sync {
    async fn list_tracked_assets(&self) -> MarketResult<Vec<TrackedAsset>>;
}
