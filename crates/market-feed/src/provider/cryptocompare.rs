//! CryptoCompare 어댑터.
//!
//! - 스트림: `5~CCCAGG~<SYM>~<QUOTE>` 집계 시세 구독
//! - 메시지 TYPE: `5` 시세, `16` 구독 완료, `20` 환영, `999` heartbeat,
//!   `401`/`429`/`500` 에러
//! - 과거 시세: `/data/v2/histominute`, `histohour`, `histoday`
//! - 카탈로그: `/data/all/coinlist` (유통/최대 공급량 포함). 스트림 이벤트에
//!   카탈로그의 공급량을 붙여 보냅니다.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{KlineInterval, KlineSeries, MarketEvent, ProviderConfig, SnapshotStore};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument};

use super::{decimal_from_json, get_text, http_client, status_error, StreamRuntime};
use crate::catalog::{CatalogCache, CatalogEntry};
use crate::connection::{Frame, StreamProtocol};
use crate::driver::{parse_interval, Driver, EventCallback};
use crate::error::{FeedError, FeedResult};
use crate::retry::{with_retry, RetryConfig};

const PROVIDER: &str = "cryptocompare";

/// 집계 거래소 이름.
const AGGREGATE_MARKET: &str = "CCCAGG";

/// 한 번에 조회 가능한 최대 봉 수.
const MAX_HISTO_LIMIT: u64 = 2000;

const TYPE_AGGREGATE_INDEX: &str = "5";
const TYPE_SUBSCRIBE_COMPLETE: &str = "16";
const TYPE_STREAMER_WELCOME: &str = "20";
const TYPE_HEARTBEAT: &str = "999";
const TYPE_UNAUTHORIZED: &str = "401";
const TYPE_TOO_MANY_REQUESTS: &str = "429";
const TYPE_ERROR: &str = "500";

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    action: &'a str,
    subs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoResponse {
    response: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<HistoData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoData {
    #[serde(default)]
    data: Vec<HistoPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoPoint {
    time: i64,
    close: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CoinListResponse {
    response: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: HashMap<String, CoinInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CoinInfo {
    symbol: String,
    #[serde(default)]
    total_coins_mined: Value,
    #[serde(default)]
    max_supply: Value,
}

/// interval → (엔드포인트, aggregate).
fn histo_endpoint(interval: KlineInterval) -> (&'static str, u64) {
    match interval {
        KlineInterval::M1 => ("histominute", 1),
        KlineInterval::M5 => ("histominute", 5),
        KlineInterval::M15 => ("histominute", 15),
        KlineInterval::M30 => ("histominute", 30),
        KlineInterval::H1 => ("histohour", 1),
        KlineInterval::H4 => ("histohour", 4),
        KlineInterval::D1 => ("histoday", 1),
        KlineInterval::W1 => ("histoday", 7),
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    message.to_lowercase().contains("rate limit")
}

// ============================================================================
// 프로토콜
// ============================================================================

/// CryptoCompare 스트리밍 프로토콜.
pub struct CryptoCompareProtocol {
    ws_url: String,
    quote: String,
    api_key: Option<String>,
    catalog: Arc<CatalogCache>,
}

impl CryptoCompareProtocol {
    pub fn new(
        ws_url: impl Into<String>,
        quote: impl Into<String>,
        api_key: Option<String>,
        catalog: Arc<CatalogCache>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            quote: quote.into().to_uppercase(),
            api_key,
            catalog,
        }
    }

    fn subscription(&self, symbol: &str) -> String {
        format!(
            "{}~{}~{}~{}",
            TYPE_AGGREGATE_INDEX,
            AGGREGATE_MARKET,
            symbol.to_uppercase(),
            self.quote
        )
    }

    fn price_event(&self, value: &Value) -> Frame {
        let Some(symbol) = value.get("FROMSYMBOL").and_then(Value::as_str) else {
            return Frame::Ignore;
        };
        let to_symbol = value.get("TOSYMBOL").and_then(Value::as_str).unwrap_or_default();
        if !to_symbol.eq_ignore_ascii_case(&self.quote) {
            return Frame::Ignore;
        }
        // 거래량만 바뀐 업데이트에는 PRICE가 없음
        let Some(price) = value.get("PRICE").and_then(decimal_from_json) else {
            return Frame::Ignore;
        };

        let timestamp = value
            .get("LASTUPDATE")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        let symbol = symbol.to_uppercase();
        let mut event = MarketEvent::new(symbol.clone(), price, timestamp);
        if let Some(entry) = self.catalog.get(&symbol) {
            event.supply = entry.supply;
            event.total_supply = entry.total_supply;
        }
        Frame::Events(vec![event])
    }
}

impl StreamProtocol for CryptoCompareProtocol {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn endpoint(&self) -> String {
        self.ws_url.clone()
    }

    fn request_headers(&self) -> Vec<(&'static str, String)> {
        match &self.api_key {
            Some(key) => vec![("authorization", format!("Apikey {}", key))],
            None => Vec::new(),
        }
    }

    fn subscribe_message(&self, symbols: &[String]) -> FeedResult<Message> {
        let request = SubscribeRequest {
            action: "SubAdd",
            subs: symbols.iter().map(|s| self.subscription(s)).collect(),
        };
        Ok(Message::Text(serde_json::to_string(&request)?))
    }

    fn classify(&self, text: &str) -> Frame {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unrecognized frame");
                return Frame::Ignore;
            }
        };

        // TYPE은 문자열로 오지만 숫자인 경우도 허용
        let message_type = match value.get("TYPE") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Frame::Ignore,
        };

        match message_type.as_str() {
            TYPE_AGGREGATE_INDEX => self.price_event(&value),
            TYPE_SUBSCRIBE_COMPLETE => Frame::Ack,
            TYPE_HEARTBEAT => Frame::Pong,
            TYPE_STREAMER_WELCOME => Frame::Ignore,
            TYPE_ERROR | TYPE_UNAUTHORIZED | TYPE_TOO_MANY_REQUESTS => {
                let message = value.get("MESSAGE").and_then(Value::as_str).unwrap_or("");
                let info = value.get("INFO").and_then(Value::as_str).unwrap_or("");
                Frame::Rejected(format!("{} {}: {}", message_type, message, info))
            }
            _ => Frame::Ignore,
        }
    }
}

// ============================================================================
// 드라이버
// ============================================================================

/// CryptoCompare 드라이버.
pub struct CryptoCompareDriver {
    config: ProviderConfig,
    client: Client,
    retry: RetryConfig,
    catalog: Arc<CatalogCache>,
    runtime: StreamRuntime<CryptoCompareProtocol>,
}

impl CryptoCompareDriver {
    pub fn new(config: ProviderConfig, store: Arc<dyn SnapshotStore>) -> FeedResult<Self> {
        Ok(Self {
            client: http_client()?,
            retry: RetryConfig::from(&config.retry),
            catalog: Arc::new(CatalogCache::new(PROVIDER, store)),
            runtime: StreamRuntime::new(PROVIDER, config.connection.clone()),
            config,
        })
    }

    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }

    pub async fn subscription_groups(&self) -> Vec<Vec<String>> {
        self.runtime.groups().await
    }

    fn quote(&self) -> String {
        self.config.quote_asset.to_uppercase()
    }

    fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    /// 코인 목록과 공급량.
    pub async fn fetch_catalog(&self) -> FeedResult<HashMap<String, CatalogEntry>> {
        let url = format!("{}/data/all/coinlist", self.config.rest_url);
        let (status, body) = get_text(&self.client, &url, &[], self.api_key()).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let response: CoinListResponse = serde_json::from_str(&body)?;
        if response.response != "Success" {
            return Err(if is_rate_limit_message(&response.message) {
                FeedError::RateLimited
            } else {
                FeedError::ApiError {
                    code: status.as_u16() as i32,
                    message: response.message,
                }
            });
        }

        Ok(response
            .data
            .into_values()
            .map(|coin| {
                let symbol = coin.symbol.to_uppercase();
                let supply = decimal_from_json(&coin.total_coins_mined)
                    .filter(|v| *v > Decimal::ZERO);
                let total_supply =
                    decimal_from_json(&coin.max_supply).filter(|v| *v > Decimal::ZERO);
                let entry = CatalogEntry {
                    instrument: symbol.clone(),
                    supply,
                    total_supply,
                };
                (symbol, entry)
            })
            .collect())
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<KlineSeries> {
        let (endpoint, aggregate) = histo_endpoint(interval);
        let url = format!("{}/data/v2/{}", self.config.rest_url, endpoint);
        let limit = interval
            .buckets_between(start.timestamp_millis(), end.timestamp_millis())
            .clamp(1, MAX_HISTO_LIMIT);

        let params = [
            ("fsym", symbol.to_uppercase()),
            ("tsym", self.quote()),
            ("toTs", end.timestamp().to_string()),
            ("limit", limit.to_string()),
            ("aggregate", aggregate.to_string()),
        ];

        let (status, body) = get_text(&self.client, &url, &params, self.api_key()).await?;
        let response: HistoResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(_) if !status.is_success() => return Err(status_error(status, &body)),
            Err(e) => return Err(e.into()),
        };

        if response.response == "Error" {
            return Err(if is_rate_limit_message(&response.message) {
                FeedError::RateLimited
            } else {
                FeedError::UnsupportedAsset(response.message)
            });
        }

        let start_secs = start.timestamp();
        let points: Vec<(DateTime<Utc>, Decimal)> = response
            .data
            .map(|d| d.data)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.time >= start_secs)
            .filter_map(|p| {
                let close = decimal_from_json(&p.close)?;
                let ts = DateTime::from_timestamp(p.time, 0)?;
                Some((ts, close))
            })
            .collect();

        // 데이터가 없는 쌍은 0 가격으로 채워져 옴
        if points.iter().all(|(_, close)| close.is_zero()) {
            return Err(FeedError::UnsupportedAsset(format!(
                "{}-{} has no {} history",
                symbol,
                self.quote(),
                interval
            )));
        }
        Ok(KlineSeries::from_points(points))
    }
}

#[async_trait]
impl Driver for CryptoCompareDriver {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn configure(&self, symbols: Vec<String>, callback: EventCallback) {
        self.runtime.configure(symbols, callback);
    }

    async fn start(&self) -> FeedResult<()> {
        self.catalog.hydrate(|| self.fetch_catalog()).await;
        let protocol = Arc::new(CryptoCompareProtocol::new(
            self.config.ws_url.clone(),
            self.quote(),
            self.config.api_key.clone(),
            self.catalog.clone(),
        ));
        self.runtime.start(protocol, &self.catalog).await
    }

    async fn stop(&self) -> FeedResult<()> {
        self.runtime.stop().await;
        Ok(())
    }

    #[instrument(skip(self), fields(provider = PROVIDER))]
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<KlineSeries> {
        let interval = parse_interval(interval)?;
        if !self.catalog.contains(symbol) {
            return Err(FeedError::UnsupportedAsset(symbol.to_string()));
        }

        with_retry(&self.retry, "cryptocompare.histo", || {
            self.fetch_range(symbol, interval, start, end)
        })
        .await
    }

    async fn update_subscription_tokens(&self, symbols: &[String]) -> FeedResult<()> {
        self.runtime.update(symbols, &self.catalog).await
    }

    async fn flush_cache(&self) -> FeedResult<()> {
        self.catalog.flush().await
    }
}
