//! 추적 자산 레지스트리.
//!
//! 시작 시 한 번 [`AssetRegistrySource`]를 조회하여 id↔심볼 매핑을 만듭니다.
//! 이후에는 [`AssetRegistry::insert`]로만 늘어납니다.

use std::collections::{BTreeSet, HashMap};

use market_core::{normalize_symbol, AssetRegistrySource, MarketResult, TrackedAsset};
use tracing::info;

/// id와 심볼 사이의 매핑.
///
/// 여러 id가 같은 심볼을 공유할 수 있습니다. 심볼이 없는 자산은 빈 문자열로 추적됩니다.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: Vec<TrackedAsset>,
    symbol_by_id: HashMap<String, String>,
    ids_by_symbol: HashMap<String, Vec<String>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 원천에서 전체 목록을 읽어 레지스트리를 만듭니다.
    pub async fn load(source: &dyn AssetRegistrySource) -> MarketResult<Self> {
        let assets = source.list_tracked_assets().await?;
        let registry = Self::from_assets(assets);

        info!(
            assets = registry.len(),
            symbols = registry.ids_by_symbol.len(),
            "Asset registry loaded"
        );
        Ok(registry)
    }

    /// 자산 목록으로 레지스트리를 만듭니다. 같은 id가 반복되면 처음 것만 사용합니다.
    pub fn from_assets(assets: impl IntoIterator<Item = TrackedAsset>) -> Self {
        let mut registry = Self::new();
        for asset in assets {
            registry.insert(asset);
        }
        registry
    }

    /// 자산을 추가합니다. 새로 추가되었으면 `true`.
    pub fn insert(&mut self, mut asset: TrackedAsset) -> bool {
        if self.symbol_by_id.contains_key(&asset.id) {
            return false;
        }
        asset.symbol = normalize_symbol(&asset.symbol);

        self.symbol_by_id
            .insert(asset.id.clone(), asset.symbol.clone());
        if !asset.symbol.is_empty() {
            self.ids_by_symbol
                .entry(asset.symbol.clone())
                .or_default()
                .push(asset.id.clone());
        }
        self.assets.push(asset);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.symbol_by_id.contains_key(id)
    }

    /// id의 심볼. 심볼이 없는 자산은 `Some("")`.
    pub fn symbol_of(&self, id: &str) -> Option<&str> {
        self.symbol_by_id.get(id).map(String::as_str)
    }

    /// 심볼을 공유하는 모든 id.
    pub fn ids_for(&self, symbol: &str) -> &[String] {
        self.ids_by_symbol
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 구독 대상 심볼 (비어 있지 않은 것, 정렬·중복 제거).
    pub fn symbols(&self) -> Vec<String> {
        self.ids_by_symbol
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 등록 순서의 자산 목록.
    pub fn assets(&self) -> &[TrackedAsset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn asset(id: &str, symbol: &str) -> TrackedAsset {
        TrackedAsset::new(id, symbol, Decimal::ZERO)
    }

    #[test]
    fn test_shared_symbol_maps_to_all_ids() {
        let registry = AssetRegistry::from_assets(vec![
            asset("1", "btc"),
            asset("2", " BTC "),
            asset("3", "eth"),
        ]);

        assert_eq!(registry.ids_for("BTC"), ["1", "2"]);
        assert_eq!(registry.ids_for("ETH"), ["3"]);
        assert!(registry.ids_for("DOGE").is_empty());
        assert_eq!(registry.symbols(), vec!["BTC", "ETH"]);
    }

    #[test]
    fn test_empty_symbol_is_tracked_but_not_subscribed() {
        let registry = AssetRegistry::from_assets(vec![asset("1", ""), asset("2", "sol")]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.symbol_of("1"), Some(""));
        assert_eq!(registry.symbols(), vec!["SOL"]);
        assert!(registry.ids_for("").is_empty());
    }

    #[test]
    fn test_duplicate_id_is_ignored() {
        let mut registry = AssetRegistry::new();
        assert!(registry.insert(asset("1", "BTC")));
        assert!(!registry.insert(asset("1", "ETH")));

        assert_eq!(registry.symbol_of("1"), Some("BTC"));
        assert!(registry.ids_for("ETH").is_empty());
    }
}
