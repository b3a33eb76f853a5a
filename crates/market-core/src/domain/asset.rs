//! 자산별 시세 정보와 레지스트리 행.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 자산 레지스트리에서 읽어온 추적 대상 자산.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAsset {
    /// 내부 자산 ID
    pub id: String,
    /// 외부 심볼 (없으면 빈 문자열)
    pub symbol: String,
    /// 유통 공급량
    pub circulating_supply: Decimal,
    /// 총 공급량 (알 수 없으면 None)
    pub total_supply: Option<Decimal>,
}

impl TrackedAsset {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, circulating_supply: Decimal) -> Self {
        Self {
            id: id.into(),
            symbol: normalize_symbol(&symbol.into()),
            circulating_supply,
            total_supply: None,
        }
    }

    /// 총 공급량을 설정합니다.
    pub fn with_total_supply(mut self, total_supply: Decimal) -> Self {
        self.total_supply = Some(total_supply);
        self
    }
}

/// 심볼을 정규화합니다 (공백 제거, 대문자).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// 자산의 시장 정보.
///
/// `market_cap`은 항상 `price * circulating_supply`입니다. 값을 바꾸는 모든 경로는
/// [`AssetMarketInfo::recompute_market_cap`]을 호출해야 합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMarketInfo {
    /// 내부 자산 ID
    pub id: String,
    /// 외부 심볼 (빈 문자열 가능)
    pub symbol: String,
    /// 현재 가격
    pub price: Decimal,
    /// 마지막 업데이트 시각
    pub updated_at: Option<DateTime<Utc>>,
    /// 유통 공급량
    pub circulating_supply: Decimal,
    /// 총 공급량
    pub total_supply: Decimal,
    /// 시가총액
    pub market_cap: Decimal,
    /// 시가총액 순위 (1부터, 0은 미순위)
    pub rank: u32,
    /// 최근 7일 차트 이미지 URL
    pub chart_url: Option<String>,
}

impl AssetMarketInfo {
    /// 시세가 없는 자산의 0 값 엔트리.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: String::new(),
            price: Decimal::ZERO,
            updated_at: None,
            circulating_supply: Decimal::ZERO,
            total_supply: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            rank: 0,
            chart_url: None,
        }
    }

    /// 레지스트리 행으로부터 0 가격 엔트리를 생성합니다.
    pub fn seeded(asset: &TrackedAsset) -> Self {
        let mut info = Self::placeholder(asset.id.clone());
        info.symbol = asset.symbol.clone();
        info.circulating_supply = asset.circulating_supply;
        info.total_supply = asset.total_supply.unwrap_or(asset.circulating_supply);
        info
    }

    /// 시가총액을 다시 계산합니다.
    ///
    /// 곱셈이 `Decimal` 범위를 넘으면 `Decimal::MAX`로 포화됩니다.
    pub fn recompute_market_cap(&mut self) {
        self.market_cap = self
            .price
            .checked_mul(self.circulating_supply)
            .unwrap_or(Decimal::MAX);
    }

    /// 시세 데이터를 한 번이라도 받은 적이 있는지.
    pub fn has_market_data(&self) -> bool {
        self.updated_at.is_some()
    }
}
