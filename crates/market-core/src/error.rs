//! 어그리게이터 공통 에러 타입.
//!
//! 외부 협력자(저장소, 렌더러, 레지스트리)와 설정 계층에서 발생하는 에러를 정의합니다.

use thiserror::Error;

/// 핵심 에러.
#[derive(Debug, Error)]
pub enum MarketError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 스냅샷/캐시 저장소 에러
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 파일 업로드 에러
    #[error("업로드 에러: {0}")]
    Upload(String),

    /// 차트 렌더링 에러
    #[error("렌더링 에러: {0}")]
    Render(String),

    /// 자산 레지스트리 조회 에러
    #[error("레지스트리 에러: {0}")]
    Registry(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 핵심 작업을 위한 Result 타입.
pub type MarketResult<T> = Result<T, MarketError>;

impl MarketError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Storage(_) | MarketError::Upload(_))
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for MarketError {
    fn from(err: config::ConfigError) -> Self {
        MarketError::Config(err.to_string())
    }
}
