//! 프로바이더 카탈로그 캐시.
//!
//! 프로바이더가 실제로 거래/제공하는 심볼 목록을 보관합니다. 시작 시 REST로 새로
//! 받아오고, 실패하면 스냅샷 저장소에 남아 있는 마지막 카탈로그를 사용합니다.
//! 둘 다 없으면 카탈로그는 "사용 불가" 상태이며 심볼 필터링을 하지 않습니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use market_core::{load_json, store_json, SnapshotStore};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::FeedResult;

/// 카탈로그 항목.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// 프로바이더 상품 ID (예: "BTCUSDT", "BTC-USDT")
    pub instrument: String,
    /// 유통 공급량 (제공하는 프로바이더만)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supply: Option<Decimal>,
    /// 총 공급량 (제공하는 프로바이더만)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<Decimal>,
}

impl CatalogEntry {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            supply: None,
            total_supply: None,
        }
    }
}

/// 영속화 형식.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedCatalog {
    saved_at: DateTime<Utc>,
    entries: HashMap<String, CatalogEntry>,
}

/// 카탈로그 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    /// 아직 불러오지 않았거나 사용 불가
    Unavailable,
    /// REST에서 새로 받아옴
    Remote,
    /// 영속 캐시에서 복원함
    Persisted,
}

/// 내부 심볼 → 카탈로그 항목 캐시.
pub struct CatalogCache {
    provider: String,
    store: Arc<dyn SnapshotStore>,
    entries: RwLock<Option<HashMap<String, CatalogEntry>>>,
    source: RwLock<CatalogSource>,
}

impl CatalogCache {
    pub fn new(provider: impl Into<String>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            provider: provider.into(),
            store,
            entries: RwLock::new(None),
            source: RwLock::new(CatalogSource::Unavailable),
        }
    }

    /// 저장소 키.
    pub fn storage_key(&self) -> String {
        format!("feed:catalog:{}", self.provider)
    }

    /// REST 조회를 먼저 시도하고 실패하면 영속 캐시로 대체합니다.
    pub async fn hydrate<F, Fut>(&self, fetch: F) -> CatalogSource
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeedResult<HashMap<String, CatalogEntry>>>,
    {
        match fetch().await {
            Ok(entries) => {
                info!(
                    provider = %self.provider,
                    count = entries.len(),
                    "Catalog fetched"
                );
                self.replace(entries, CatalogSource::Remote);
                return CatalogSource::Remote;
            }
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Catalog fetch failed, trying persisted cache");
            }
        }

        let key = self.storage_key();
        match load_json::<PersistedCatalog>(self.store.as_ref(), &key).await {
            Ok(Some(persisted)) => {
                info!(
                    provider = %self.provider,
                    count = persisted.entries.len(),
                    saved_at = %persisted.saved_at,
                    "Catalog restored from cache"
                );
                self.replace(persisted.entries, CatalogSource::Persisted);
                CatalogSource::Persisted
            }
            Ok(None) => {
                warn!(provider = %self.provider, "No catalog available, symbol filtering disabled");
                CatalogSource::Unavailable
            }
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Catalog cache unreadable, symbol filtering disabled");
                CatalogSource::Unavailable
            }
        }
    }

    /// 카탈로그 내용을 교체합니다.
    pub fn replace(&self, entries: HashMap<String, CatalogEntry>, source: CatalogSource) {
        *self.entries.write() = Some(entries);
        *self.source.write() = source;
    }

    pub fn source(&self) -> CatalogSource {
        *self.source.read()
    }

    pub fn is_available(&self) -> bool {
        self.entries.read().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 심볼이 구독 가능한지. 카탈로그가 없으면 항상 true.
    pub fn contains(&self, symbol: &str) -> bool {
        match self.entries.read().as_ref() {
            Some(entries) => entries.contains_key(symbol),
            None => true,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<CatalogEntry> {
        self.entries.read().as_ref()?.get(symbol).cloned()
    }

    /// 카탈로그에 없는 심볼을 걸러냅니다.
    pub fn filter(&self, symbols: &[String]) -> Vec<String> {
        let guard = self.entries.read();
        let Some(entries) = guard.as_ref() else {
            return symbols.to_vec();
        };

        let (kept, skipped): (Vec<_>, Vec<_>) = symbols
            .iter()
            .cloned()
            .partition(|s| entries.contains_key(s));

        if !skipped.is_empty() {
            debug!(
                provider = %self.provider,
                skipped = skipped.len(),
                "Symbols not listed by provider"
            );
        }
        kept
    }

    /// 카탈로그를 영속 저장소에 기록합니다. 카탈로그가 없으면 아무것도 하지 않습니다.
    pub async fn flush(&self) -> FeedResult<()> {
        let Some(entries) = self.entries.read().clone() else {
            return Ok(());
        };

        let persisted = PersistedCatalog {
            saved_at: Utc::now(),
            entries,
        };
        store_json(self.store.as_ref(), &self.storage_key(), &persisted).await?;
        debug!(provider = %self.provider, "Catalog flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use market_core::MemorySnapshotStore;

    fn sample() -> HashMap<String, CatalogEntry> {
        let mut entries = HashMap::new();
        entries.insert("BTC".to_string(), CatalogEntry::new("BTCUSDT"));
        entries.insert("ETH".to_string(), CatalogEntry::new("ETHUSDT"));
        entries
    }

    #[tokio::test]
    async fn test_hydrate_prefers_remote() {
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = CatalogCache::new("binance", store);

        let source = cache.hydrate(|| async { Ok(sample()) }).await;
        assert_eq!(source, CatalogSource::Remote);
        assert!(cache.contains("BTC"));
        assert!(!cache.contains("DOGE"));
        assert_eq!(
            cache.filter(&["BTC".into(), "DOGE".into(), "ETH".into()]),
            vec!["BTC".to_string(), "ETH".to_string()]
        );
    }

    #[tokio::test]
    async fn test_hydrate_falls_back_to_persisted() {
        let store = Arc::new(MemorySnapshotStore::new());

        let first = CatalogCache::new("okx", store.clone());
        first.replace(sample(), CatalogSource::Remote);
        first.flush().await.unwrap();
        assert!(store.contains("feed:catalog:okx"));

        let second = CatalogCache::new("okx", store);
        let source = second
            .hydrate(|| async { Err(FeedError::NetworkError("offline".into())) })
            .await;
        assert_eq!(source, CatalogSource::Persisted);
        assert_eq!(second.len(), 2);
        assert_eq!(second.get("ETH").unwrap().instrument, "ETHUSDT");
    }

    #[tokio::test]
    async fn test_unavailable_catalog_disables_filtering() {
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = CatalogCache::new("cryptocompare", store.clone());

        let source = cache
            .hydrate(|| async { Err(FeedError::Timeout("slow".into())) })
            .await;
        assert_eq!(source, CatalogSource::Unavailable);
        assert!(cache.contains("ANYTHING"));
        assert_eq!(cache.filter(&["X".into()]), vec!["X".to_string()]);

        // 비어 있는 캐시는 기록하지 않음
        cache.flush().await.unwrap();
        assert!(store.is_empty());
    }
}
