//! 시장 데이터 어그리게이터의 도메인 모델.

mod asset;
mod event;
mod kline;

pub use asset::*;
pub use event::*;
pub use kline::*;
