//! 프로바이더 피드 에러 타입.

use market_core::MarketError;
use thiserror::Error;

/// 프로바이더 어댑터 관련 에러.
#[derive(Debug, Error)]
pub enum FeedError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// WebSocket 프로토콜 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// API 에러 코드
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 구독 요청이 프로바이더에 의해 거부됨
    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    /// 프로바이더가 해당 심볼/간격의 데이터를 갖고 있지 않음
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    /// 알 수 없는 봉 간격
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// 드라이버가 설정/시작되지 않음
    #[error("Not started: {0}")]
    NotStarted(String),

    /// 카탈로그 캐시 저장소 에러
    #[error("Storage error: {0}")]
    Storage(String),
}

/// 피드 작업을 위한 Result 타입.
pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::NetworkError(_)
                | FeedError::Disconnected(_)
                | FeedError::RateLimited
                | FeedError::Timeout(_)
                | FeedError::WebSocket(_)
        )
    }

    /// 프로바이더 폴백을 유도하는 에러인지 확인.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, FeedError::UnsupportedAsset(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(err.to_string())
        } else if err.is_decode() {
            FeedError::ParseError(err.to_string())
        } else {
            FeedError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                FeedError::Disconnected(err.to_string())
            }
            WsError::Io(e) => FeedError::NetworkError(e.to_string()),
            other => FeedError::WebSocket(other.to_string()),
        }
    }
}

impl From<MarketError> for FeedError {
    fn from(err: MarketError) -> Self {
        FeedError::Storage(err.to_string())
    }
}
