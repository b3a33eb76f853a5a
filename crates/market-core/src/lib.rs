//! # Market Core
//!
//! 시장 데이터 어그리게이터의 핵심 도메인 모델 및 공통 인프라를 제공합니다.
//!
//! 이 크레이트는 다른 모든 크레이트가 공유하는 기본 타입을 제공합니다:
//! - 자산 시세 정보 및 정규화된 시장 이벤트
//! - 과거 시세(kline) 시계열 및 간격 타입
//! - 외부 협력자 인터페이스 (스냅샷 저장소, 파일 저장소, 차트 렌더러, 자산 레지스트리)
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use ports::*;
pub use types::*;
