//! OKX 현물 어댑터.
//!
//! - 스트림: `tickers` 채널, 상품 ID `<SYM>-<QUOTE>`
//! - keepalive: 텍스트 `ping` / `pong`
//! - 과거 시세: `/api/v5/market/history-candles` (최신순 응답)
//! - 카탈로그: `/api/v5/public/instruments?instType=SPOT`

use std::collections::HashMap;
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

const PROVIDER: &str = "okx";

const CHANNEL: &str = "tickers";

/// history-candles 최대 페이지 크기.
const CANDLE_PAGE_LIMIT: usize = 100;

const MAX_CANDLE_PAGES: usize = 30;

/// 존재하지 않는 상품 에러 코드.
const ERR_INSTRUMENT_NOT_FOUND: &str = "51001";

/// 요청 한도 초과 에러 코드.
const ERR_RATE_LIMITED: &str = "50011";

// ============================================================================
// 메시지 타입
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelArg {
    channel: String,
    inst_id: String,
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    op: &'a str,
    args: Vec<ChannelArg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsTicker {
    inst_id: String,
    last: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WsFrame {
    Event {
        event: String,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        msg: Option<String>,
    },
    Data {
        arg: ChannelArg,
        data: Vec<WsTicker>,
    },
}

/// OKX REST 응답 공통 형식.
#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    inst_id: String,
    base_ccy: String,
    quote_ccy: String,
    state: String,
}

/// interval → OKX bar 파라미터.
fn bar(interval: KlineInterval) -> &'static str {
    match interval {
        KlineInterval::M1 => "1m",
        KlineInterval::M5 => "5m",
        KlineInterval::M15 => "15m",
        KlineInterval::M30 => "30m",
        KlineInterval::H1 => "1H",
        KlineInterval::H4 => "4H",
        KlineInterval::D1 => "1D",
        KlineInterval::W1 => "1W",
    }
}

// ============================================================================
// 프로토콜
// ============================================================================

/// OKX 스트리밍 프로토콜.
pub struct OkxProtocol {
    ws_url: String,
    quote: String,
}

impl OkxProtocol {
    pub fn new(ws_url: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            quote: quote.into().to_uppercase(),
        }
    }

    fn inst_id(&self, symbol: &str) -> String {
        format!("{}-{}", symbol.to_uppercase(), self.quote)
    }

    fn ticker_events(&self, tickers: Vec<WsTicker>) -> Frame {
        let suffix = format!("-{}", self.quote);
        let events: Vec<MarketEvent> = tickers
            .into_iter()
            .filter_map(|ticker| {
                let symbol = base_symbol(&ticker.inst_id, &suffix)?;
                let price = parse_decimal(&ticker.last)?;
                let ts = ticker.ts.parse::<i64>().ok()?;
                Some(MarketEvent::new(symbol, price, millis_to_datetime(ts)))
            })
            .collect();

        if events.is_empty() {
            Frame::Ignore
        } else {
            Frame::Events(events)
        }
    }
}

impl StreamProtocol for OkxProtocol {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn endpoint(&self) -> String {
        self.ws_url.clone()
    }

    fn subscribe_message(&self, symbols: &[String]) -> FeedResult<Message> {
        let request = SubscribeRequest {
            op: "subscribe",
            args: symbols
                .iter()
                .map(|s| ChannelArg {
                    channel: CHANNEL.to_string(),
                    inst_id: self.inst_id(s),
                })
                .collect(),
        };
        Ok(Message::Text(serde_json::to_string(&request)?))
    }

    fn ping_message(&self) -> Message {
        Message::Text("ping".to_string())
    }

    fn classify(&self, text: &str) -> Frame {
        if text == "pong" {
            return Frame::Pong;
        }

        match serde_json::from_str::<WsFrame>(text) {
            Ok(WsFrame::Event { event, code, msg }) => match event.as_str() {
                "subscribe" => Frame::Ack,
                "error" => Frame::Rejected(format!(
                    "{}: {}",
                    code.unwrap_or_default(),
                    msg.unwrap_or_default()
                )),
                _ => Frame::Ignore,
            },
            Ok(WsFrame::Data { arg, data }) if arg.channel == CHANNEL => self.ticker_events(data),
            Ok(WsFrame::Data { arg, .. }) => {
                debug!(channel = %arg.channel, "Data for unexpected channel");
                Frame::Ignore
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

/// OKX 드라이버.
pub struct OkxDriver {
    config: ProviderConfig,
    client: Client,
    retry: RetryConfig,
    catalog: Arc<CatalogCache>,
    runtime: StreamRuntime<OkxProtocol>,
}

impl OkxDriver {
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

    fn instrument(&self, symbol: &str) -> String {
        self.catalog
            .get(symbol)
            .map(|entry| entry.instrument)
            .unwrap_or_else(|| format!("{}-{}", symbol, self.quote()))
    }

    /// REST 응답 본문을 확인하고 data를 꺼냅니다.
    fn unwrap_response<T: for<'de> Deserialize<'de>>(
        status: reqwest::StatusCode,
        body: &str,
    ) -> FeedResult<Vec<T>> {
        let response = match serde_json::from_str::<OkxResponse<T>>(body) {
            Ok(response) => response,
            Err(_) if !status.is_success() => return Err(status_error(status, body)),
            Err(e) => return Err(e.into()),
        };

        match response.code.as_str() {
            "0" => Ok(response.data),
            ERR_INSTRUMENT_NOT_FOUND => Err(FeedError::UnsupportedAsset(response.msg)),
            ERR_RATE_LIMITED => Err(FeedError::RateLimited),
            code => Err(FeedError::ApiError {
                code: code.parse().unwrap_or(-1),
                message: response.msg,
            }),
        }
    }

    /// 거래 가능한 현물 상품 목록.
    pub async fn fetch_catalog(&self) -> FeedResult<HashMap<String, CatalogEntry>> {
        let url = format!("{}/api/v5/public/instruments", self.config.rest_url);
        let params = [("instType", "SPOT".to_string())];
        let (status, body) = get_text(&self.client, &url, &params, None).await?;
        let instruments: Vec<Instrument> = Self::unwrap_response(status, &body)?;

        let quote = self.quote();
        Ok(instruments
            .into_iter()
            .filter(|i| i.state == "live" && i.quote_ccy.eq_ignore_ascii_case(&quote))
            .map(|i| (i.base_ccy.to_uppercase(), CatalogEntry::new(i.inst_id)))
            .collect())
    }

    async fn fetch_range(
        &self,
        instrument: &str,
        interval: KlineInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<KlineSeries> {
        let url = format!("{}/api/v5/market/history-candles", self.config.rest_url);
        let start_ms = start.timestamp_millis();
        // after/before는 배타적 경계
        let mut after = end.timestamp_millis() + 1;
        let mut points = Vec::new();

        for _ in 0..MAX_CANDLE_PAGES {
            let params = [
                ("instId", instrument.to_string()),
                ("bar", bar(interval).to_string()),
                ("after", after.to_string()),
                ("before", (start_ms - 1).to_string()),
                ("limit", CANDLE_PAGE_LIMIT.to_string()),
            ];
            let (status, body) = get_text(&self.client, &url, &params, None).await?;
            let rows: Vec<Vec<String>> = Self::unwrap_response(status, &body)?;
            let page_len = rows.len();

            let mut oldest = None;
            for row in rows {
                let (Some(ts), Some(close)) = (row.first(), row.get(4)) else {
                    continue;
                };
                let (Ok(ts), Some(close)) = (ts.parse::<i64>(), parse_decimal(close)) else {
                    continue;
                };
                oldest = Some(oldest.map_or(ts, |o: i64| o.min(ts)));
                points.push((millis_to_datetime(ts), close));
            }

            match oldest {
                Some(ts) if page_len >= CANDLE_PAGE_LIMIT && ts > start_ms => after = ts,
                _ => break,
            }
        }

        if points.is_empty() {
            return Err(FeedError::UnsupportedAsset(format!(
                "{} has no {} candles",
                instrument, interval
            )));
        }
        Ok(KlineSeries::from_points(points))
    }
}

#[async_trait]
impl Driver for OkxDriver {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn configure(&self, symbols: Vec<String>, callback: EventCallback) {
        self.runtime.configure(symbols, callback);
    }

    async fn start(&self) -> FeedResult<()> {
        self.catalog.hydrate(|| self.fetch_catalog()).await;
        let protocol = Arc::new(OkxProtocol::new(self.config.ws_url.clone(), self.quote()));
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
        with_retry(&self.retry, "okx.history_candles", || {
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
