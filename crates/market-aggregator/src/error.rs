//! 에러 타입 정의.

use market_core::MarketError;
use market_feed::FeedError;
use thiserror::Error;

/// 어그리게이터 에러 타입.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// 시작 단계 실패 (레지스트리 로드, 설정 등)
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// 드라이버 시작 실패
    #[error("Driver '{driver}' failed to start: {source}")]
    DriverStart {
        driver: String,
        #[source]
        source: FeedError,
    },

    /// 현재 상태에서 허용되지 않는 작업
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 찾을 수 없음
    #[error("Not found: {0}")]
    NotFound(String),

    /// 어떤 프로바이더도 해당 자산을 지원하지 않음
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    /// 피드 에러
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// 핵심 에러 (저장소, 렌더러 등)
    #[error(transparent)]
    Core(#[from] MarketError),
}

/// Result 타입 별칭.
pub type AggregatorResult<T> = Result<T, AggregatorError>;

impl AggregatorError {
    /// 데이터 부재를 나타내는 에러인지 확인합니다.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            AggregatorError::UnsupportedAsset(_) | AggregatorError::Feed(FeedError::UnsupportedAsset(_))
        )
    }
}
