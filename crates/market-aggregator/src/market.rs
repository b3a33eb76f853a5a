//! 어그리게이터 본체.
//!
//! 수명주기: `Unconfigured → Starting → Running → Stopping → Stopped`.
//!
//! # 시작 순서
//!
//! 1. 레지스트리 로드 (실패 시 중단)
//! 2. 쓰기/읽기 측을 0 값 엔트리로 채움
//! 3. 드라이버를 순서대로 설정·시작 (첫 실패 시 중단)
//! 4. 스냅샷 복원
//! 5. 조정 작업과 일일 차트 작업 등록
//! 6. 스냅샷이 없거나 오늘 것이 아니면 즉시 차트 재생성

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use futures::future::BoxFuture;
use market_core::{
    AppConfig, AssetMarketInfo, AssetRegistrySource, ChartRenderer, FileStore, KlineSeries,
    MarketEvent, MarketResult, SnapshotStore, TrackedAsset,
};
use market_feed::{parse_interval, Driver, EventCallback, FeedResult, LAST_7_DAYS_INTERVAL};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::book::{MarketBook, ReadView};
use crate::chart::ChartRefresher;
use crate::error::{AggregatorError, AggregatorResult};
use crate::history::{first_supported, order_by_priority};
use crate::registry::AssetRegistry;
use crate::scheduler::{job, Schedule, Scheduler};
use crate::snapshot::MarketSnapshot;
use crate::stats::ChartRefreshStats;

/// 어그리게이터 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Unconfigured,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// 어그리게이터 동작 설정.
#[derive(Debug, Clone)]
pub struct MarketSettings {
    pub reconcile_interval: Duration,
    /// 일일 차트 재생성 시각 (UTC)
    pub chart_refresh_at: NaiveTime,
    pub driver_priority: Vec<String>,
    pub snapshot_key: String,
    pub bucket: String,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5),
            chart_refresh_at: NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN),
            driver_priority: vec![
                "binance".to_string(),
                "okx".to_string(),
                "cryptocompare".to_string(),
            ],
            snapshot_key: "market:snapshot".to_string(),
            bucket: "market-charts".to_string(),
        }
    }
}

impl MarketSettings {
    pub fn from_config(config: &AppConfig) -> MarketResult<Self> {
        Ok(Self {
            reconcile_interval: config.aggregator.reconcile_interval(),
            chart_refresh_at: config.aggregator.chart_refresh_time()?,
            driver_priority: config.aggregator.driver_priority.clone(),
            snapshot_key: config.aggregator.snapshot_key.clone(),
            bucket: config.storage.bucket.clone(),
        })
    }
}

/// 어그리게이터가 주입받는 협력자.
pub struct MarketDeps {
    pub registry: Arc<dyn AssetRegistrySource>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    pub file_store: Arc<dyn FileStore>,
    pub renderer: Arc<dyn ChartRenderer>,
    pub scheduler: Arc<dyn Scheduler>,
    pub drivers: Vec<Arc<dyn Driver>>,
}

/// 실시간 시장 데이터 어그리게이터.
pub struct Market {
    settings: MarketSettings,
    registry_source: Arc<dyn AssetRegistrySource>,
    snapshot_store: Arc<dyn SnapshotStore>,
    scheduler: Arc<dyn Scheduler>,
    /// 우선순위 순서
    drivers: Vec<Arc<dyn Driver>>,
    book: Arc<MarketBook>,
    charts: Arc<ChartRefresher>,
    state: Mutex<MarketState>,
}

impl Market {
    pub fn new(deps: MarketDeps, settings: MarketSettings) -> Self {
        let drivers = order_by_priority(&deps.drivers, &settings.driver_priority);
        let book = Arc::new(MarketBook::new());
        let charts = Arc::new(ChartRefresher::new(
            book.clone(),
            drivers.clone(),
            deps.renderer,
            deps.file_store,
            deps.snapshot_store.clone(),
            settings.bucket.clone(),
            settings.snapshot_key.clone(),
        ));

        Self {
            settings,
            registry_source: deps.registry,
            snapshot_store: deps.snapshot_store,
            scheduler: deps.scheduler,
            drivers,
            book,
            charts,
            state: Mutex::new(MarketState::Unconfigured),
        }
    }

    pub fn state(&self) -> MarketState {
        *self.state.lock()
    }

    /// 우선순위 순서의 드라이버 이름.
    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }

    // ========================================================================
    // 수명주기
    // ========================================================================

    /// 어그리게이터를 시작합니다. 실패하면 이미 시작된 드라이버를 중지하고 `Stopped`가 됩니다.
    #[instrument(skip(self))]
    pub async fn start(&self) -> AggregatorResult<()> {
        {
            let mut state = self.state.lock();
            if *state != MarketState::Unconfigured {
                return Err(AggregatorError::InvalidState(format!(
                    "cannot start from {:?}",
                    *state
                )));
            }
            *state = MarketState::Starting;
        }

        match self.bootstrap().await {
            Ok(()) => {
                *self.state.lock() = MarketState::Running;
                info!(assets = self.book.len(), "Market started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Market start failed");
                self.scheduler.shutdown().await;
                self.stop_drivers().await;
                *self.state.lock() = MarketState::Stopped;
                Err(e)
            }
        }
    }

    async fn bootstrap(&self) -> AggregatorResult<()> {
        let registry = AssetRegistry::load(self.registry_source.as_ref())
            .await
            .map_err(|e| AggregatorError::Bootstrap(format!("asset registry load failed: {}", e)))?;
        self.book.seed(&registry);

        let symbols = registry.symbols();
        let callback = event_callback(self.book.clone());
        for driver in &self.drivers {
            driver.configure(symbols.clone(), callback.clone());
            driver
                .start()
                .await
                .map_err(|source| AggregatorError::DriverStart {
                    driver: driver.name().to_string(),
                    source,
                })?;
            info!(provider = driver.name(), symbols = symbols.len(), "Driver started");
        }

        let fresh = self.restore_snapshot(Utc::now()).await;

        let book = self.book.clone();
        self.scheduler.register(
            "reconcile",
            Schedule::Every(self.settings.reconcile_interval),
            job(move || {
                let book = book.clone();
                async move {
                    book.reconcile();
                }
            }),
        );
        self.scheduler.register(
            "chart-refresh",
            Schedule::DailyAt(self.settings.chart_refresh_at),
            self.chart_job(),
        );

        if !fresh {
            info!("Snapshot missing or stale, regenerating charts now");
            self.scheduler
                .register("chart-refresh-initial", Schedule::Once, self.chart_job());
        }
        Ok(())
    }

    /// 스냅샷의 차트 URL을 복원합니다. 오늘 저장된 스냅샷이면 `true`.
    async fn restore_snapshot(&self, now: DateTime<Utc>) -> bool {
        let snapshot =
            match MarketSnapshot::load(self.snapshot_store.as_ref(), &self.settings.snapshot_key)
                .await
            {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    info!("No persisted snapshot");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load snapshot");
                    return false;
                }
            };

        if !snapshot.is_fresh(now) {
            info!(saved_at = %snapshot.saved_at, "Snapshot is from a previous day");
            return false;
        }

        let restored = self.book.restore_chart_urls(&snapshot.assets);
        info!(saved_at = %snapshot.saved_at, restored, "Chart URLs restored from snapshot");
        true
    }

    fn chart_job(&self) -> crate::scheduler::Job {
        let charts = self.charts.clone();
        job(move || {
            let charts = charts.clone();
            async move {
                charts.refresh().await;
            }
        })
    }

    /// 스케줄러와 모든 드라이버를 중지합니다. 여러 번 호출해도 안전합니다.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> AggregatorResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                MarketState::Stopped | MarketState::Stopping => return Ok(()),
                MarketState::Unconfigured => {
                    *state = MarketState::Stopped;
                    return Ok(());
                }
                MarketState::Starting => {
                    return Err(AggregatorError::InvalidState(
                        "start in progress".to_string(),
                    ))
                }
                MarketState::Running => *state = MarketState::Stopping,
            }
        }

        self.scheduler.shutdown().await;
        self.stop_drivers().await;

        *self.state.lock() = MarketState::Stopped;
        info!("Market stopped");
        Ok(())
    }

    async fn stop_drivers(&self) {
        for driver in &self.drivers {
            if let Err(e) = driver.stop().await {
                warn!(provider = driver.name(), error = %e, "Driver stop failed");
            }
        }
    }

    // ========================================================================
    // 쓰기
    // ========================================================================

    /// 자산을 추가하고 모든 드라이버의 구독을 확장합니다. 새로 추가되었으면 `true`.
    ///
    /// 이미 있는 id여도 구독 확장은 수행합니다. 드라이버 에러는 기록만 합니다.
    #[instrument(skip(self))]
    pub async fn add_asset(
        &self,
        id: &str,
        symbol: &str,
        circulating_supply: Decimal,
    ) -> AggregatorResult<bool> {
        let state = self.state();
        if state != MarketState::Running {
            return Err(AggregatorError::InvalidState(format!(
                "cannot add asset while {:?}",
                state
            )));
        }

        let asset = TrackedAsset::new(id, symbol, circulating_supply);
        let symbol = asset.symbol.clone();
        let added = self.book.add_asset(asset);
        if !added {
            debug!(id, "Asset already tracked");
        }

        if !symbol.is_empty() {
            let tokens = vec![symbol];
            for driver in &self.drivers {
                if let Err(e) = driver.update_subscription_tokens(&tokens).await {
                    warn!(provider = driver.name(), error = %e, "Subscription update failed");
                }
            }
        }
        Ok(added)
    }

    /// 쓰기 측을 즉시 읽기 측에 게시합니다.
    pub fn reconcile(&self) -> Arc<ReadView> {
        self.book.reconcile()
    }

    /// 차트를 즉시 재생성합니다.
    pub async fn refresh_charts(&self) -> ChartRefreshStats {
        self.charts.refresh().await
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 현재 읽기 뷰.
    pub fn view(&self) -> Arc<ReadView> {
        self.book.view()
    }

    /// id의 시장 정보. 없으면 0 값 엔트리.
    pub fn find_by_id(&self, id: &str) -> AssetMarketInfo {
        let view = self.book.view();
        view.get(id)
            .cloned()
            .unwrap_or_else(|| AssetMarketInfo::placeholder(id))
    }

    /// id마다 하나씩, 입력 순서대로 반환합니다.
    pub fn find_by_ids(&self, ids: &[String]) -> Vec<AssetMarketInfo> {
        let view = self.book.view();
        ids.iter()
            .map(|id| {
                view.get(id)
                    .cloned()
                    .unwrap_or_else(|| AssetMarketInfo::placeholder(id.as_str()))
            })
            .collect()
    }

    /// 시가총액 순위 `[min, max]` (1부터, 양끝 포함).
    pub fn find_by_market_cap_range(
        &self,
        min: usize,
        max: usize,
    ) -> AggregatorResult<Vec<AssetMarketInfo>> {
        self.book.view().rank_range(min, max)
    }

    /// 과거 시세를 우선순위 순서로 조회합니다.
    ///
    /// # Errors
    ///
    /// - `NotFound`: 등록되지 않은 id
    /// - `UnsupportedAsset`: 심볼이 없거나 어떤 프로바이더도 데이터를 갖고 있지 않음
    /// - `Feed(InvalidInterval)`: 알 수 없는 간격
    #[instrument(skip(self))]
    pub async fn fetch_klines(
        &self,
        id: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AggregatorResult<KlineSeries> {
        parse_interval(interval)?;

        let symbol = self
            .book
            .symbol_of(id)
            .ok_or_else(|| AggregatorError::NotFound(format!("asset '{}'", id)))?;
        if symbol.is_empty() {
            return Err(AggregatorError::UnsupportedAsset(format!(
                "asset '{}' has no symbol",
                id
            )));
        }

        let interval = interval.to_string();
        let (provider, series) = first_supported(&self.drivers, &symbol, |driver| {
            let symbol = symbol.clone();
            let interval = interval.clone();
            let fut: BoxFuture<'static, FeedResult<KlineSeries>> = Box::pin(async move {
                driver.fetch_klines(&symbol, &interval, start, end).await
            });
            fut
        })
        .await?;

        debug!(id, provider = %provider, points = series.len(), "History served");
        Ok(series)
    }

    /// 최근 7일 시간봉.
    pub async fn fetch_last_7_days_klines(&self, id: &str) -> AggregatorResult<KlineSeries> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(7);
        self.fetch_klines(id, LAST_7_DAYS_INTERVAL, start, end).await
    }
}

/// 드라이버 이벤트를 쓰기 측에 반영하는 콜백.
fn event_callback(book: Arc<MarketBook>) -> EventCallback {
    Arc::new(move |event: MarketEvent| {
        if book.apply_event(&event) == 0 {
            warn!(symbol = %event.symbol, "Event for untracked symbol dropped");
        }
    })
}
