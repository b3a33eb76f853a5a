//! 프로바이더 어댑터가 만들어내는 정규화된 시장 이벤트.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 정규화된 시세 업데이트.
///
/// `symbol`은 프로바이더 상품 ID가 아니라 레지스트리 심볼입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub price: Decimal,
    pub supply: Option<Decimal>,
    pub total_supply: Option<Decimal>,
}

impl MarketEvent {
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            price,
            supply: None,
            total_supply: None,
        }
    }

    pub fn with_supply(mut self, supply: Decimal) -> Self {
        self.supply = Some(supply);
        self
    }

    pub fn with_total_supply(mut self, total_supply: Decimal) -> Self {
        self.total_supply = Some(total_supply);
        self
    }
}
