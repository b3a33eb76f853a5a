//! 시세 상태 저장소.
//!
//! - **쓰기 측**: 이벤트 콜백과 자산 추가가 하나의 거친 잠금(coarse lock) 아래에서 변경합니다.
//! - **읽기 측**: 순위가 매겨진 불변 뷰. 조정 주기마다 새 뷰를 만들어 포인터를 교체합니다.
//!
//! 조회는 현재 뷰의 `Arc`만 복제하므로 이벤트 수집과 경쟁하지 않습니다.
//! 읽기 측은 최대 한 조정 주기만큼 뒤처질 수 있습니다.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use market_core::{normalize_symbol, AssetMarketInfo, MarketEvent, TrackedAsset};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{AggregatorError, AggregatorResult};
use crate::registry::AssetRegistry;

// ============================================================================
// 읽기 측
// ============================================================================

/// 순위가 매겨진 읽기 전용 뷰.
#[derive(Debug, Clone, Default)]
pub struct ReadView {
    /// 시가총액 내림차순 (조정 이후 추가된 자산은 끝에 붙음)
    assets: Vec<Arc<AssetMarketInfo>>,
    index: HashMap<String, usize>,
    published_at: Option<DateTime<Utc>>,
}

impl ReadView {
    fn from_ranked(assets: Vec<Arc<AssetMarketInfo>>, published_at: DateTime<Utc>) -> Self {
        let index = assets
            .iter()
            .enumerate()
            .map(|(i, info)| (info.id.clone(), i))
            .collect();
        Self {
            assets,
            index,
            published_at: Some(published_at),
        }
    }

    pub fn get(&self, id: &str) -> Option<&AssetMarketInfo> {
        self.index.get(id).map(|&i| self.assets[i].as_ref())
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// 마지막 게시 시각.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    /// 뷰 순서대로 모든 엔트리를 복제합니다.
    pub fn to_vec(&self) -> Vec<AssetMarketInfo> {
        self.assets.iter().map(|a| a.as_ref().clone()).collect()
    }

    /// 1부터 시작하는 순위 구간 `[min, max]`를 반환합니다.
    ///
    /// - `min == 0`이면 1
    /// - `max == 0`이거나 `max > n`이면 n
    /// - `min > n`이면 `NotFound`
    /// - `min > max`이면 빈 목록
    pub fn rank_range(&self, min: usize, max: usize) -> AggregatorResult<Vec<AssetMarketInfo>> {
        let n = self.assets.len();
        let min = min.max(1);
        let max = if max == 0 || max > n { n } else { max };

        if min > n {
            return Err(AggregatorError::NotFound(format!(
                "rank {} exceeds tracked population {}",
                min, n
            )));
        }
        if min > max {
            return Ok(Vec::new());
        }

        Ok(self.assets[min - 1..max]
            .iter()
            .map(|a| a.as_ref().clone())
            .collect())
    }

    /// 엔트리 하나를 추가한 새 뷰. 기존 엔트리는 `Arc`로 공유됩니다.
    fn with_appended(&self, info: AssetMarketInfo) -> Self {
        let mut assets = Vec::with_capacity(self.assets.len() + 1);
        assets.extend(self.assets.iter().cloned());
        let mut index = self.index.clone();
        index.insert(info.id.clone(), assets.len());
        assets.push(Arc::new(info));
        Self {
            assets,
            index,
            published_at: self.published_at,
        }
    }
}

// ============================================================================
// 쓰기 측
// ============================================================================

#[derive(Debug, Clone)]
struct BookEntry {
    info: AssetMarketInfo,
    /// 프로바이더가 총 공급량을 한 번이라도 보고했는지
    total_supply_reported: bool,
}

impl BookEntry {
    fn seeded(asset: &TrackedAsset) -> Self {
        Self {
            info: AssetMarketInfo::seeded(asset),
            total_supply_reported: asset.total_supply.is_some(),
        }
    }

    fn apply(&mut self, event: &MarketEvent) {
        let info = &mut self.info;
        info.price = event.price;
        info.updated_at = Some(event.timestamp);
        if let Some(supply) = event.supply {
            info.circulating_supply = supply;
        }
        if let Some(total) = event.total_supply {
            info.total_supply = total;
            self.total_supply_reported = true;
        }
        if !self.total_supply_reported {
            info.total_supply = info.circulating_supply;
        }
        info.recompute_market_cap();
    }
}

#[derive(Debug, Default)]
struct WriteSide {
    registry: AssetRegistry,
    entries: HashMap<String, BookEntry>,
}

impl WriteSide {
    fn insert(&mut self, asset: TrackedAsset) -> bool {
        if !self.registry.insert(asset.clone()) {
            return false;
        }
        // 정규화된 심볼로 다시 가져옴
        let normalized = TrackedAsset {
            symbol: self
                .registry
                .symbol_of(&asset.id)
                .unwrap_or_default()
                .to_string(),
            ..asset
        };
        self.entries
            .insert(normalized.id.clone(), BookEntry::seeded(&normalized));
        true
    }

    /// 시가총액 내림차순, 같으면 id 오름차순.
    fn ranked(&self) -> Vec<Arc<AssetMarketInfo>> {
        let mut infos: Vec<AssetMarketInfo> =
            self.entries.values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| {
            b.market_cap
                .cmp(&a.market_cap)
                .then_with(|| a.id.cmp(&b.id))
        });
        infos
            .into_iter()
            .enumerate()
            .map(|(i, mut info)| {
                info.rank = (i + 1) as u32;
                Arc::new(info)
            })
            .collect()
    }
}

// ============================================================================
// MarketBook
// ============================================================================

/// 쓰기 측과 읽기 측을 함께 관리합니다.
#[derive(Debug, Default)]
pub struct MarketBook {
    write: Mutex<WriteSide>,
    view: RwLock<Arc<ReadView>>,
}

impl MarketBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 레지스트리의 모든 자산을 0 값 엔트리로 채우고 순위가 매겨진 뷰를 게시합니다.
    pub fn seed(&self, registry: &AssetRegistry) {
        let mut write = self.write.lock();
        for asset in registry.assets() {
            write.insert(asset.clone());
        }
        let ranked = write.ranked();
        *self.view.write() = Arc::new(ReadView::from_ranked(ranked, Utc::now()));
    }

    /// 이벤트를 쓰기 측에 반영합니다. 갱신된 자산 수를 반환합니다 (미등록 심볼이면 0).
    pub fn apply_event(&self, event: &MarketEvent) -> usize {
        let symbol = normalize_symbol(&event.symbol);
        let mut write = self.write.lock();
        let ids = write.registry.ids_for(&symbol).to_vec();
        for id in &ids {
            if let Some(entry) = write.entries.get_mut(id) {
                entry.apply(event);
            }
        }
        ids.len()
    }

    /// 쓰기 측 전체를 복사하여 순위를 매기고 새 뷰를 게시합니다.
    ///
    /// 게시는 쓰기 잠금을 쥔 채로 수행합니다. 잠금 순서는 항상 쓰기 측, 읽기 측입니다.
    pub fn reconcile(&self) -> Arc<ReadView> {
        let write = self.write.lock();
        let view = Arc::new(ReadView::from_ranked(write.ranked(), Utc::now()));
        *self.view.write() = view.clone();
        drop(write);

        debug!(assets = view.len(), "Read view published");
        view
    }

    /// 자산을 추가합니다. 새로 추가되었으면 `true`.
    ///
    /// 현재 뷰를 얕게 복사하여 새 엔트리를 붙인 뷰를 게시합니다. 이미 뷰를 쥐고 있는
    /// 조회자는 영향을 받지 않습니다.
    pub fn add_asset(&self, asset: TrackedAsset) -> bool {
        let mut write = self.write.lock();
        let id = asset.id.clone();
        if !write.insert(asset) {
            return false;
        }

        let Some(info) = write.entries.get(&id).map(|e| e.info.clone()) else {
            return false;
        };
        let mut view = self.view.write();
        let next = view.with_appended(info);
        *view = Arc::new(next);
        true
    }

    /// 차트 URL을 쓰기 측에 기록합니다. 다음 게시에 반영됩니다.
    pub fn set_chart_url(&self, id: &str, url: String) -> bool {
        match self.write.lock().entries.get_mut(id) {
            Some(entry) => {
                entry.info.chart_url = Some(url);
                true
            }
            None => false,
        }
    }

    /// 스냅샷의 차트 URL을 미리 채우고 뷰를 다시 게시합니다. 복원된 개수를 반환합니다.
    pub fn restore_chart_urls<'a>(
        &self,
        snapshot: impl IntoIterator<Item = &'a AssetMarketInfo>,
    ) -> usize {
        let restored = {
            let mut write = self.write.lock();
            let mut restored = 0;
            for saved in snapshot {
                let (Some(url), Some(entry)) = (&saved.chart_url, write.entries.get_mut(&saved.id))
                else {
                    continue;
                };
                entry.info.chart_url = Some(url.clone());
                restored += 1;
            }
            restored
        };
        self.reconcile();
        restored
    }

    /// 현재 읽기 뷰.
    pub fn view(&self) -> Arc<ReadView> {
        self.view.read().clone()
    }

    /// 차트 생성 대상 (심볼이 있는 자산의 id, 심볼).
    pub fn chart_targets(&self) -> Vec<(String, String)> {
        self.write
            .lock()
            .registry
            .assets()
            .iter()
            .filter(|a| !a.symbol.is_empty())
            .map(|a| (a.id.clone(), a.symbol.clone()))
            .collect()
    }

    /// id의 심볼. 미등록이면 `None`, 심볼이 없으면 `Some("")`.
    pub fn symbol_of(&self, id: &str) -> Option<String> {
        self.write
            .lock()
            .registry
            .symbol_of(id)
            .map(str::to_string)
    }

    /// 구독 대상 심볼.
    pub fn symbols(&self) -> Vec<String> {
        self.write.lock().registry.symbols()
    }

    /// 쓰기 측 엔트리 수.
    pub fn len(&self) -> usize {
        self.write.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn book_with(assets: Vec<TrackedAsset>) -> MarketBook {
        let book = MarketBook::new();
        book.seed(&AssetRegistry::from_assets(assets));
        book
    }

    fn event(symbol: &str, price: Decimal) -> MarketEvent {
        MarketEvent::new(symbol, price, Utc::now())
    }

    #[test]
    fn test_seed_publishes_zero_valued_entries() {
        let book = book_with(vec![
            TrackedAsset::new("1", "BTC", dec!(19000000)),
            TrackedAsset::new("2", "", dec!(100)),
        ]);

        let view = book.view();
        assert_eq!(view.len(), 2);
        let btc = view.get("1").unwrap();
        assert_eq!(btc.price, Decimal::ZERO);
        assert_eq!(btc.market_cap, Decimal::ZERO);
        assert!(btc.updated_at.is_none());
        assert!(view.get("2").is_some());
    }

    #[test]
    fn test_event_updates_every_id_sharing_symbol() {
        let book = book_with(vec![
            TrackedAsset::new("1", "BTC", dec!(10)),
            TrackedAsset::new("2", "BTC", dec!(20)),
        ]);

        assert_eq!(book.apply_event(&event("BTC", dec!(3))), 2);
        assert_eq!(book.apply_event(&event("DOGE", dec!(1))), 0);

        let view = book.reconcile();
        assert_eq!(view.get("1").unwrap().market_cap, dec!(30));
        assert_eq!(view.get("2").unwrap().market_cap, dec!(60));
    }

    #[test]
    fn test_total_supply_falls_back_to_circulating() {
        let book = book_with(vec![
            TrackedAsset::new("1", "ETH", dec!(100)),
            TrackedAsset::new("2", "SOL", dec!(100)).with_total_supply(dec!(500)),
        ]);

        book.apply_event(&event("ETH", dec!(2)).with_supply(dec!(120)));
        book.apply_event(&event("SOL", dec!(2)).with_supply(dec!(150)));

        let view = book.reconcile();
        let eth = view.get("1").unwrap();
        assert_eq!(eth.circulating_supply, dec!(120));
        assert_eq!(eth.total_supply, dec!(120));
        assert_eq!(view.get("2").unwrap().total_supply, dec!(500));

        // 보고된 총 공급량은 이후 유통량 변경에 덮어쓰이지 않음
        book.apply_event(&event("ETH", dec!(2)).with_total_supply(dec!(1000)));
        book.apply_event(&event("ETH", dec!(2)).with_supply(dec!(130)));
        assert_eq!(book.reconcile().get("1").unwrap().total_supply, dec!(1000));
    }

    #[test]
    fn test_reads_lag_until_reconcile() {
        let book = book_with(vec![TrackedAsset::new("1", "BTC", dec!(1))]);
        let before = book.view();

        book.apply_event(&event("BTC", dec!(50000)));
        assert_eq!(book.view().get("1").unwrap().price, Decimal::ZERO);

        let after = book.reconcile();
        assert_eq!(after.get("1").unwrap().price, dec!(50000));
        // 이전에 획득한 뷰는 변하지 않음
        assert_eq!(before.get("1").unwrap().price, Decimal::ZERO);
    }

    #[test]
    fn test_rank_ties_break_by_id() {
        let book = book_with(vec![
            TrackedAsset::new("b", "", dec!(0)),
            TrackedAsset::new("a", "", dec!(0)),
            TrackedAsset::new("c", "BTC", dec!(1)),
        ]);
        book.apply_event(&event("BTC", dec!(10)));

        let ids: Vec<String> = book.reconcile().to_vec().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_add_asset_copy_on_write() {
        let book = book_with(vec![TrackedAsset::new("1", "BTC", dec!(1))]);
        let held = book.view();

        assert!(book.add_asset(TrackedAsset::new("2", "eth", dec!(5))));
        assert!(!book.add_asset(TrackedAsset::new("2", "ETH", dec!(5))));

        assert_eq!(held.len(), 1);
        let view = book.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view.get("2").unwrap().symbol, "ETH");
        assert_eq!(view.get("2").unwrap().rank, 0);

        book.apply_event(&event("ETH", dec!(2)));
        assert_eq!(book.reconcile().get("2").unwrap().market_cap, dec!(10));
    }

    #[test]
    fn test_rank_range_edges() {
        let assets = (1..=10)
            .map(|i| TrackedAsset::new(format!("{:02}", i), format!("S{}", i), Decimal::from(i)))
            .collect();
        let book = book_with(assets);
        for i in 1..=10 {
            book.apply_event(&event(&format!("S{}", i), dec!(1)));
        }
        let view = book.reconcile();

        assert_eq!(view.rank_range(0, 0).unwrap().len(), 10);
        let tail = view.rank_range(5, 0).unwrap();
        assert_eq!(tail.len(), 6);
        assert_eq!(tail[0].rank, 5);
        assert_eq!(tail[5].rank, 10);
        assert_eq!(view.rank_range(3, 100).unwrap().len(), 8);
        assert!(view.rank_range(6, 4).unwrap().is_empty());
        assert!(matches!(
            view.rank_range(11, 0),
            Err(AggregatorError::NotFound(_))
        ));
    }

    #[test]
    fn test_added_asset_survives_concurrent_reconcile() {
        let book = Arc::new(book_with(vec![TrackedAsset::new("seed", "BTC", dec!(1))]));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reconcilers: Vec<_> = (0..3)
            .map(|_| {
                let book = book.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(std::sync::atomic::Ordering::Relaxed) {
                        book.reconcile();
                    }
                })
            })
            .collect();

        let mut missing = Vec::new();
        for i in 0..1500 {
            let id = format!("added-{}", i);
            book.add_asset(TrackedAsset::new(id.clone(), format!("A{}", i), dec!(1)));
            if book.view().get(&id).is_none() {
                missing.push(id);
            }
        }

        done.store(true, std::sync::atomic::Ordering::Relaxed);
        for handle in reconcilers {
            handle.join().unwrap();
        }
        assert!(missing.is_empty(), "assets missing from view: {:?}", missing);
        assert_eq!(book.reconcile().len(), 1501);
    }

    proptest! {
        #[test]
        fn prop_market_cap_invariant_and_ranking(
            prices in proptest::collection::vec(0u32..100_000, 1..30),
            supply in 1u32..1_000_000,
        ) {
            let assets: Vec<TrackedAsset> = (0..prices.len())
                .map(|i| TrackedAsset::new(format!("id{:03}", i), format!("S{}", i), Decimal::from(supply)))
                .collect();
            let book = book_with(assets);
            for (i, price) in prices.iter().enumerate() {
                book.apply_event(&event(&format!("S{}", i), Decimal::from(*price)));
            }

            let ranked = book.reconcile().to_vec();
            for (i, info) in ranked.iter().enumerate() {
                prop_assert_eq!(info.market_cap, info.price * info.circulating_supply);
                prop_assert_eq!(info.rank as usize, i + 1);
            }
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].market_cap >= pair[1].market_cap);
            }
        }
    }
}
