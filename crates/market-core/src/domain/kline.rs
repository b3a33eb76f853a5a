//! 과거 가격 시계열.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 과거 시세 조회 결과.
///
/// `timestamps`와 `prices`는 길이가 같고 오래된 것부터 정렬됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub prices: Vec<Decimal>,
}

impl KlineSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            prices: Vec::with_capacity(capacity),
        }
    }

    /// (시각, 가격) 쌍 목록에서 생성합니다. 시간순으로 정렬됩니다.
    pub fn from_points(mut points: Vec<(DateTime<Utc>, Decimal)>) -> Self {
        points.sort_by_key(|(ts, _)| *ts);
        let (timestamps, prices) = points.into_iter().unzip();
        Self { timestamps, prices }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, price: Decimal) {
        self.timestamps.push(timestamp);
        self.prices.push(price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// 마지막(가장 최근) 가격.
    pub fn last_price(&self) -> Option<Decimal> {
        self.prices.last().copied()
    }

    /// (최저가, 최고가).
    pub fn price_range(&self) -> Option<(Decimal, Decimal)> {
        let min = self.prices.iter().min()?;
        let max = self.prices.iter().max()?;
        Some((*min, *max))
    }

    pub fn points(&self) -> impl Iterator<Item = (&DateTime<Utc>, &Decimal)> {
        self.timestamps.iter().zip(self.prices.iter())
    }
}
