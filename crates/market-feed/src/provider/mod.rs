//! 프로바이더 어댑터.
//!
//! 각 어댑터는 [`Driver`](crate::Driver)와 [`StreamProtocol`](crate::StreamProtocol)을
//! 구현합니다. 연결 수명주기는 공통 [`ConnectionManager`](crate::ConnectionManager)가
//! 담당하고, 어댑터는 메시지 정규화와 과거 시세/카탈로그 REST 호출만 다룹니다.

mod binance;
mod cryptocompare;
mod okx;
mod runtime;

pub use binance::{BinanceDriver, BinanceProtocol};
pub use cryptocompare::{CryptoCompareDriver, CryptoCompareProtocol};
pub use okx::{OkxDriver, OkxProtocol};

pub(crate) use runtime::StreamRuntime;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use market_core::{normalize_symbol, ProvidersConfig, SnapshotStore};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::driver::Driver;
use crate::error::{FeedError, FeedResult};

/// REST 요청 타임아웃.
const HTTP_TIMEOUT_SECS: u64 = 15;

/// 설정에서 활성화된 드라이버를 생성합니다. 반환 순서는 binance, okx, cryptocompare.
pub fn build_drivers(
    config: &ProvidersConfig,
    store: Arc<dyn SnapshotStore>,
) -> FeedResult<Vec<Arc<dyn Driver>>> {
    let mut drivers: Vec<Arc<dyn Driver>> = Vec::new();

    if config.binance.enabled {
        drivers.push(Arc::new(BinanceDriver::new(
            config.binance.clone(),
            store.clone(),
        )?));
    }
    if config.okx.enabled {
        drivers.push(Arc::new(OkxDriver::new(config.okx.clone(), store.clone())?));
    }
    if config.cryptocompare.enabled {
        drivers.push(Arc::new(CryptoCompareDriver::new(
            config.cryptocompare.clone(),
            store,
        )?));
    }

    info!(
        drivers = ?drivers.iter().map(|d| d.name().to_string()).collect::<Vec<_>>(),
        "Drivers built"
    );
    Ok(drivers)
}

/// 공용 HTTP 클라이언트.
pub(crate) fn http_client() -> FeedResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| FeedError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e)))
}

/// GET 요청을 보내고 상태 코드와 본문을 반환합니다.
pub(crate) async fn get_text(
    client: &Client,
    url: &str,
    params: &[(&str, String)],
    api_key: Option<&str>,
) -> FeedResult<(StatusCode, String)> {
    debug!("GET {} {:?}", url, params);

    let mut request = client.get(url).query(params);
    if let Some(key) = api_key {
        request = request.header("authorization", format!("Apikey {}", key));
    }

    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

/// 프로바이더별 해석이 없는 HTTP 에러 상태를 매핑합니다.
pub(crate) fn status_error(status: StatusCode, body: &str) -> FeedError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FeedError::RateLimited
    } else if status.is_server_error() {
        FeedError::NetworkError(format!("HTTP {}: {}", status.as_u16(), body))
    } else {
        FeedError::ApiError {
            code: status.as_u16() as i32,
            message: body.to_string(),
        }
    }
}

/// JSON 숫자 또는 문자열을 Decimal로 변환합니다.
pub(crate) fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// 문자열을 Decimal로 변환합니다. 지수 표기도 허용합니다.
pub(crate) fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// 밀리초 타임스탬프 변환. 범위를 벗어나면 현재 시각.
pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// 프로바이더 상품 ID에서 내부 심볼을 얻습니다.
pub(crate) fn base_symbol(instrument: &str, suffix: &str) -> Option<String> {
    let upper = instrument.to_uppercase();
    let base = upper.strip_suffix(&suffix.to_uppercase())?;
    if base.is_empty() {
        None
    } else {
        Some(normalize_symbol(base))
    }
}
