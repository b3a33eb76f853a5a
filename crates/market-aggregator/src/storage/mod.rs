//! 외부 협력자 구현.
//!
//! - [`RedisSnapshotStore`]: 스냅샷/카탈로그 캐시 저장 (Redis)
//! - [`PgAssetSource`]: 추적 자산 목록 (PostgreSQL)
//! - [`LocalFileStore`]: 차트 이미지 저장 (로컬 파일 시스템)

mod file;
mod postgres;
mod redis;

pub use self::file::LocalFileStore;
pub use self::postgres::PgAssetSource;
pub use self::redis::RedisSnapshotStore;
