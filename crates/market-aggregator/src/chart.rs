//! 최근 7일 차트 재생성.
//!
//! 심볼이 있는 자산마다 우선순위 순서로 드라이버에 7일 시세를 요청하고, 렌더링하여
//! `<id>.<ext>` 이름으로 업로드한 뒤 URL을 쓰기 측에 기록합니다. 끝나면 뷰를 게시하고
//! 스냅샷을 저장하며 모든 드라이버의 카탈로그 캐시를 기록합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use market_core::{ChartRenderer, FileStore, KlineSeries, SnapshotStore};
use market_feed::{Driver, FeedResult};
use tracing::{debug, info, instrument, warn};

use crate::book::MarketBook;
use crate::error::AggregatorResult;
use crate::history::first_supported;
use crate::snapshot::MarketSnapshot;
use crate::stats::ChartRefreshStats;

/// 차트 재생성에 필요한 협력자.
pub struct ChartRefresher {
    book: Arc<MarketBook>,
    /// 우선순위 순서
    drivers: Vec<Arc<dyn Driver>>,
    renderer: Arc<dyn ChartRenderer>,
    file_store: Arc<dyn FileStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    bucket: String,
    snapshot_key: String,
    running: AtomicBool,
}

impl ChartRefresher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        book: Arc<MarketBook>,
        drivers: Vec<Arc<dyn Driver>>,
        renderer: Arc<dyn ChartRenderer>,
        file_store: Arc<dyn FileStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        bucket: impl Into<String>,
        snapshot_key: impl Into<String>,
    ) -> Self {
        Self {
            book,
            drivers,
            renderer,
            file_store,
            snapshot_store,
            bucket: bucket.into(),
            snapshot_key: snapshot_key.into(),
            running: AtomicBool::new(false),
        }
    }

    /// 전체 재생성을 수행합니다. 이미 진행 중이면 건너뜁니다.
    ///
    /// 자산별 실패는 기록만 하고 다음 자산으로 넘어갑니다.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> ChartRefreshStats {
        let mut stats = ChartRefreshStats::new();
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            info!("Chart refresh already running, skipped");
            stats.skipped = true;
            return stats;
        };

        let started = Instant::now();
        let targets = self.book.chart_targets();
        stats.total = targets.len();
        info!(assets = targets.len(), "Chart refresh started");

        for (id, symbol) in targets {
            match self.refresh_one(&id, &symbol).await {
                Ok(url) => {
                    self.book.set_chart_url(&id, url);
                    stats.success += 1;
                }
                Err(e) if e.is_unsupported() => {
                    debug!(id = %id, symbol = %symbol, "No provider has chart data");
                    stats.unsupported += 1;
                }
                Err(e) => {
                    warn!(id = %id, symbol = %symbol, error = %e, "Chart refresh failed for asset");
                    stats.errors += 1;
                }
            }
        }

        let view = self.book.reconcile();
        let snapshot = MarketSnapshot::new(view.to_vec());
        if let Err(e) = snapshot
            .save(self.snapshot_store.as_ref(), &self.snapshot_key)
            .await
        {
            warn!(error = %e, "Failed to persist snapshot");
        }

        for driver in &self.drivers {
            if let Err(e) = driver.flush_cache().await {
                warn!(provider = driver.name(), error = %e, "Failed to flush provider cache");
            }
        }

        stats.elapsed = started.elapsed();
        stats.log_summary();
        stats
    }

    async fn refresh_one(&self, id: &str, symbol: &str) -> AggregatorResult<String> {
        let (provider, series) = first_supported(&self.drivers, symbol, |driver| {
            let symbol = symbol.to_string();
            let fut: BoxFuture<'static, FeedResult<KlineSeries>> =
                Box::pin(async move { driver.fetch_last_7_days_klines(&symbol).await });
            fut
        })
        .await?;

        let chart = self.renderer.render(&series)?;
        let filename = format!("{}.{}", id, chart.extension);
        let url = self
            .file_store
            .upload_with_fixed_id(id, &self.bucket, &filename, chart.bytes)
            .await?;

        debug!(id, symbol, provider = %provider, points = series.len(), url = %url, "Chart uploaded");
        Ok(url)
    }
}

/// 진행 중 플래그. 실행이 중간에 취소되어도 해제됩니다.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
