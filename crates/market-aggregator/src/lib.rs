//! 실시간 시장 데이터 어그리게이터.
//!
//! 여러 프로바이더의 스트리밍 시세를 하나의 조회 가능한 스냅샷으로 모읍니다:
//! - 자산 레지스트리 (id ↔ 심볼)
//! - 쓰기 측/읽기 측 분리 상태와 주기적 시가총액 순위 조정
//! - 과거 시세 프로바이더 폴백과 일일 차트 재생성
//! - 재시작 복구용 스냅샷
//! - Redis / PostgreSQL / 로컬 파일 저장소 어댑터

pub mod book;
pub mod chart;
pub mod error;
pub mod history;
pub mod market;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod snapshot;
pub mod stats;
pub mod storage;

pub use book::{MarketBook, ReadView};
pub use chart::ChartRefresher;
pub use error::{AggregatorError, AggregatorResult};
pub use market::{Market, MarketDeps, MarketSettings, MarketState};
pub use registry::AssetRegistry;
pub use render::SvgChartRenderer;
pub use scheduler::{job, next_daily_run, Job, Schedule, Scheduler, TokioScheduler};
pub use snapshot::MarketSnapshot;
pub use stats::ChartRefreshStats;
pub use storage::{LocalFileStore, PgAssetSource, RedisSnapshotStore};
