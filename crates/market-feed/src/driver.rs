//! 프로바이더 어댑터 공통 계약.
//!
//! 어그리게이터는 [`Driver`] trait에만 의존하며, 세 프로바이더(Binance, OKX,
//! CryptoCompare)가 각각 이를 구현합니다.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use market_core::{KlineInterval, KlineSeries, MarketEvent};

use crate::error::{FeedError, FeedResult};

/// 정규화된 이벤트를 전달받는 콜백.
///
/// 연결마다 하나의 읽기 태스크에서 수신 순서대로 호출됩니다.
pub type EventCallback = Arc<dyn Fn(MarketEvent) + Send + Sync>;

/// 7일 차트에 사용하는 봉 간격.
pub const LAST_7_DAYS_INTERVAL: &str = "1h";

/// 시장 데이터 프로바이더 드라이버.
///
/// 모든 메서드는 `&self`를 받습니다. 구현체는 내부 가변성으로 상태를 관리하며
/// `Arc<dyn Driver>`로 공유됩니다.
#[async_trait]
pub trait Driver: Send + Sync {
    /// 프로바이더 이름 (`binance`, `okx`, `cryptocompare`).
    fn name(&self) -> &str;

    /// 구독할 심볼과 이벤트 콜백을 설정합니다. I/O를 수행하지 않습니다.
    fn configure(&self, symbols: Vec<String>, callback: EventCallback);

    /// 카탈로그를 불러오고 설정된 심볼로 연결을 엽니다.
    async fn start(&self) -> FeedResult<()>;

    /// 모든 연결을 닫고 재연결을 막습니다. 여러 번 호출해도 안전합니다.
    async fn stop(&self) -> FeedResult<()>;

    /// 과거 시세를 조회합니다.
    ///
    /// # Errors
    ///
    /// - `FeedError::InvalidInterval`: 알 수 없는 간격 문자열 (재시도 없음)
    /// - `FeedError::UnsupportedAsset`: 프로바이더에 데이터 없음
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<KlineSeries>;

    /// 최근 7일 시간봉 시세.
    async fn fetch_last_7_days_klines(&self, symbol: &str) -> FeedResult<KlineSeries> {
        let end = Utc::now();
        let start = end - Duration::days(7);
        self.fetch_klines(symbol, LAST_7_DAYS_INTERVAL, start, end)
            .await
    }

    /// 현재 구독에 없는 심볼만 추가로 구독합니다. 기존 구독은 제거하지 않습니다.
    async fn update_subscription_tokens(&self, symbols: &[String]) -> FeedResult<()>;

    /// 프로바이더 카탈로그 캐시를 영속 저장소에 기록합니다.
    async fn flush_cache(&self) -> FeedResult<()>;
}

/// 간격 문자열을 파싱합니다. 실패는 즉시 반환되는 파라미터 에러입니다.
pub fn parse_interval(interval: &str) -> FeedResult<KlineInterval> {
    interval
        .parse::<KlineInterval>()
        .map_err(|_| FeedError::InvalidInterval(interval.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1d").unwrap(), KlineInterval::D1);
        assert!(matches!(
            parse_interval("7h"),
            Err(FeedError::InvalidInterval(s)) if s == "7h"
        ));
    }
}
