//! 재시작 복구용 영속 스냅샷.

use chrono::{DateTime, NaiveTime, Utc};
use market_core::{load_json, store_json, AssetMarketInfo, MarketResult, SnapshotStore};
use serde::{Deserialize, Serialize};

/// 저장된 읽기 뷰.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub saved_at: DateTime<Utc>,
    pub assets: Vec<AssetMarketInfo>,
}

impl MarketSnapshot {
    pub fn new(assets: Vec<AssetMarketInfo>) -> Self {
        Self {
            saved_at: Utc::now(),
            assets,
        }
    }

    /// `now`가 속한 UTC 날짜의 0시 이후에 저장되었는지.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.saved_at >= start_of_utc_day(now)
    }

    /// 차트 URL이 있는 엔트리 수.
    pub fn chart_count(&self) -> usize {
        self.assets.iter().filter(|a| a.chart_url.is_some()).count()
    }

    pub async fn load(store: &dyn SnapshotStore, key: &str) -> MarketResult<Option<Self>> {
        load_json(store, key).await
    }

    pub async fn save(&self, store: &dyn SnapshotStore, key: &str) -> MarketResult<()> {
        store_json(store, key, self).await
    }
}

/// UTC 기준 당일 0시.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use market_core::MemorySnapshotStore;

    #[test]
    fn test_freshness_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();

        let mut snapshot = MarketSnapshot::new(Vec::new());
        snapshot.saved_at = midnight;
        assert!(snapshot.is_fresh(now));

        snapshot.saved_at = midnight - Duration::seconds(1);
        assert!(!snapshot.is_fresh(now));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemorySnapshotStore::new();
        let mut info = AssetMarketInfo::placeholder("42");
        info.chart_url = Some("http://cdn/42.svg".to_string());
        let snapshot = MarketSnapshot::new(vec![info, AssetMarketInfo::placeholder("43")]);

        snapshot.save(&store, "snap").await.unwrap();
        let loaded = MarketSnapshot::load(&store, "snap").await.unwrap().unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.chart_count(), 1);
        assert!(MarketSnapshot::load(&store, "missing").await.unwrap().is_none());
    }
}
