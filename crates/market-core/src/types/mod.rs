//! 어그리게이터 전반에서 사용되는 공통 타입.

mod interval;

pub use interval::*;
