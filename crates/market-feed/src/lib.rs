//! 시장 데이터 프로바이더 어댑터.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - [`Driver`]: 어그리게이터가 사용하는 프로바이더 공통 계약
//! - [`ConnectionManager`]: 용량 제한 연결 그룹, 재구독, keepalive, 재연결
//! - Binance / OKX / CryptoCompare 어댑터
//! - 프로바이더 카탈로그 캐시와 고정 간격 재시도

pub mod catalog;
pub mod connection;
pub mod driver;
pub mod error;
pub mod provider;
pub mod retry;

pub use catalog::{CatalogCache, CatalogEntry, CatalogSource};
pub use connection::{plan_subscription, ConnectionManager, Frame, StreamProtocol, SubscriptionPlan};
pub use driver::{parse_interval, Driver, EventCallback, LAST_7_DAYS_INTERVAL};
pub use error::*;
pub use provider::{
    build_drivers, BinanceDriver, BinanceProtocol, CryptoCompareDriver, CryptoCompareProtocol,
    OkxDriver, OkxProtocol,
};
pub use retry::{with_retry, with_retry_if, RetryConfig};
