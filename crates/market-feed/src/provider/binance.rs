//! Binance Spot 어댑터.
//!
//! - 스트림: `<symbol><quote>@miniTicker`
//! - 과거 시세: `/api/v3/klines`
//! - 카탈로그: `/api/v3/exchangeInfo`의 거래 중인 현물 상품

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{KlineInterval, KlineSeries, MarketEvent, ProviderConfig, SnapshotStore};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument};

use super::{
    base_symbol, get_text, http_client, millis_to_datetime, parse_decimal, status_error,
    StreamRuntime,
};
use crate::catalog::{CatalogCache, CatalogEntry};
use crate::connection::{Frame, StreamProtocol};
use crate::driver::{parse_interval, Driver, EventCallback};
use crate::error::{FeedError, FeedResult};
use crate::retry::{with_retry, RetryConfig};

const PROVIDER: &str = "binance";

/// 한 번에 조회하는 최대 캔들 수.
const KLINE_PAGE_LIMIT: usize = 1000;

/// 페이지 수 상한.
const MAX_KLINE_PAGES: usize = 20;

/// 존재하지 않는 심볼 에러 코드.
const ERR_INVALID_SYMBOL: i32 = -1121;

/// 요청 한도 초과 에러 코드.
const ERR_TOO_MANY_REQUESTS: i32 = -1003;

// ============================================================================
// WebSocket 메시지 타입
// ============================================================================

#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    method: &'a str,
    params: Vec<String>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WsError {
    code: i64,
    msg: String,
}

/// 24시간 미니 티커 이벤트.
#[derive(Debug, Deserialize)]
struct WsMiniTicker {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WsFrame {
    Error { error: WsError },
    Response { result: serde_json::Value, id: u64 },
    Combined { data: WsMiniTicker },
    MiniTicker(WsMiniTicker),
}

// ============================================================================
// REST 응답 타입
// ============================================================================

/// Binance 캔들 배열.
#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,    // open time
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time
    String, // quote volume
    u64,    // trades
    String, // taker buy base
    String, // taker buy quote
    String, // ignore
);

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

// ============================================================================
// 프로토콜
// ============================================================================

/// Binance 스트리밍 프로토콜.
pub struct BinanceProtocol {
    ws_url: String,
    quote: String,
    request_id: AtomicU64,
}

impl BinanceProtocol {
    pub fn new(ws_url: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            quote: quote.into().to_uppercase(),
            request_id: AtomicU64::new(1),
        }
    }

    fn stream_name(&self, symbol: &str) -> String {
        format!(
            "{}{}@miniTicker",
            symbol.to_lowercase(),
            self.quote.to_lowercase()
        )
    }

    fn ticker_event(&self, ticker: WsMiniTicker) -> Frame {
        let Some(symbol) = base_symbol(&ticker.symbol, &self.quote) else {
            debug!(symbol = %ticker.symbol, "Ticker for unexpected quote asset");
            return Frame::Ignore;
        };
        match parse_decimal(&ticker.close) {
            Some(price) => Frame::Events(vec![MarketEvent::new(
                symbol,
                price,
                millis_to_datetime(ticker.event_time),
            )]),
            None => {
                debug!(symbol = %ticker.symbol, close = %ticker.close, "Unparseable price");
                Frame::Ignore
            }
        }
    }
}

impl StreamProtocol for BinanceProtocol {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn endpoint(&self) -> String {
        self.ws_url.clone()
    }

    fn subscribe_message(&self, symbols: &[String]) -> FeedResult<Message> {
        let message = SubscribeMessage {
            method: "SUBSCRIBE",
            params: symbols.iter().map(|s| self.stream_name(s)).collect(),
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
        };
        Ok(Message::Text(serde_json::to_string(&message)?))
    }

    fn classify(&self, text: &str) -> Frame {
        match serde_json::from_str::<WsFrame>(text) {
            Ok(WsFrame::Error { error }) => {
                Frame::Rejected(format!("{}: {}", error.code, error.msg))
            }
            Ok(WsFrame::Response { result, id }) => {
                if result.is_null() {
                    Frame::Ack
                } else {
                    debug!(id, %result, "Non-subscribe response");
                    Frame::Ignore
                }
            }
            Ok(WsFrame::Combined { data }) | Ok(WsFrame::MiniTicker(data)) => {
                self.ticker_event(data)
            }
            Err(e) => {
                debug!(error = %e, "Unrecognized frame");
                Frame::Ignore
            }
        }
    }
}

// ============================================================================
// 드라이버
// ============================================================================

/// Binance 드라이버.
pub struct BinanceDriver {
    config: ProviderConfig,
    client: Client,
    retry: RetryConfig,
    catalog: Arc<CatalogCache>,
    runtime: StreamRuntime<BinanceProtocol>,
}

impl BinanceDriver {
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

    /// 연결별 구독 심볼.
    pub async fn subscription_groups(&self) -> Vec<Vec<String>> {
        self.runtime.groups().await
    }

    fn quote(&self) -> String {
        self.config.quote_asset.to_uppercase()
    }

    fn instrument(&self, symbol: &str) -> String {
        self.catalog
            .get(symbol)
            .map(|entry| entry.instrument)
            .unwrap_or_else(|| format!("{}{}", symbol, self.quote()))
    }

    /// 거래 중인 현물 상품 목록.
    pub async fn fetch_catalog(&self) -> FeedResult<HashMap<String, CatalogEntry>> {
        let url = format!("{}/api/v3/exchangeInfo", self.config.rest_url);
        let (status, body) = get_text(&self.client, &url, &[], None).await?;
        if !status.is_success() {
            return Err(Self::map_error(status, &body));
        }

        let info: ExchangeInfo = serde_json::from_str(&body)?;
        let quote = self.quote();
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.quote_asset.eq_ignore_ascii_case(&quote))
            .map(|s| (s.base_asset.to_uppercase(), CatalogEntry::new(s.symbol)))
            .collect())
    }

    fn map_error(status: reqwest::StatusCode, body: &str) -> FeedError {
        match serde_json::from_str::<BinanceError>(body) {
            Ok(error) => match error.code {
                ERR_INVALID_SYMBOL => FeedError::UnsupportedAsset(error.msg),
                ERR_TOO_MANY_REQUESTS => FeedError::RateLimited,
                code => FeedError::ApiError {
                    code,
                    message: error.msg,
                },
            },
            Err(_) if status.as_u16() == 418 => FeedError::RateLimited,
            Err(_) => status_error(status, body),
        }
    }

    async fn fetch_page(
        &self,
        instrument: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> FeedResult<Vec<BinanceKline>> {
        let url = format!("{}/api/v3/klines", self.config.rest_url);
        let params = [
            ("symbol", instrument.to_string()),
            ("interval", interval.as_str().to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", KLINE_PAGE_LIMIT.to_string()),
        ];

        let (status, body) = get_text(&self.client, &url, &params, None).await?;
        if !status.is_success() {
            return Err(Self::map_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_range(
        &self,
        instrument: &str,
        interval: KlineInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<KlineSeries> {
        let step_ms = interval.as_secs() as i64 * 1000;
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut series = KlineSeries::new();

        for _ in 0..MAX_KLINE_PAGES {
            let page = self.fetch_page(instrument, interval, cursor, end_ms).await?;
            let full = page.len() >= KLINE_PAGE_LIMIT;
            let Some(last_open) = page.last().map(|k| k.0) else {
                break;
            };

            for kline in page {
                if let Some(close) = parse_decimal(&kline.4) {
                    series.push(millis_to_datetime(kline.0), close);
                }
            }

            cursor = last_open + step_ms;
            if !full || cursor > end_ms {
                break;
            }
        }

        if series.is_empty() {
            return Err(FeedError::UnsupportedAsset(format!(
                "{} has no {} klines",
                instrument, interval
            )));
        }
        Ok(series)
    }
}

#[async_trait]
impl Driver for BinanceDriver {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn configure(&self, symbols: Vec<String>, callback: EventCallback) {
        self.runtime.configure(symbols, callback);
    }

    async fn start(&self) -> FeedResult<()> {
        self.catalog.hydrate(|| self.fetch_catalog()).await;
        let protocol = Arc::new(BinanceProtocol::new(
            self.config.ws_url.clone(),
            self.quote(),
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

        let instrument = self.instrument(symbol);
        with_retry(&self.retry, "binance.klines", || {
            self.fetch_range(&instrument, interval, start, end)
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
