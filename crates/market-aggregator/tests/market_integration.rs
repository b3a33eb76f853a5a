//! 모의 드라이버를 이용한 어그리게이터 통합 테스트.
//!
//! 프로바이더 폴백, 시가총액 순위/구간 조회, 시작/중지 수명주기, 차트 재생성,
//! 스냅샷 복원을 검증합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_aggregator::{
    AggregatorError, Job, Market, MarketDeps, MarketSettings, MarketSnapshot, MarketState,
    Schedule, Scheduler, SvgChartRenderer,
};
use market_core::{
    AssetMarketInfo, AssetRegistrySource, FileStore, KlineSeries, MarketError, MarketEvent,
    MarketResult, MemorySnapshotStore, SnapshotStore, TrackedAsset,
};
use market_feed::{parse_interval, Driver, EventCallback, FeedError, FeedResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ============================================================================
// 모의 협력자
// ============================================================================

#[derive(Default)]
struct MockDriver {
    name: &'static str,
    /// 심볼별 과거 시세. 없으면 UnsupportedAsset
    history: HashMap<String, KlineSeries>,
    /// 모든 조회에 반환할 에러
    history_error: Option<fn() -> FeedError>,
    fail_start: bool,
    callback: Mutex<Option<EventCallback>>,
    configured: Mutex<Vec<String>>,
    started: AtomicBool,
    stop_calls: AtomicUsize,
    flush_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    updates: Mutex<Vec<Vec<String>>>,
}

impl MockDriver {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn with_history(mut self, symbol: &str, points: usize) -> Self {
        let start = Utc::now() - chrono::Duration::days(7);
        let series = KlineSeries::from_points(
            (0..points)
                .map(|i| {
                    (
                        start + chrono::Duration::hours(i as i64),
                        Decimal::from(100 + i as i64),
                    )
                })
                .collect(),
        );
        self.history.insert(symbol.to_string(), series);
        self
    }

    fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    fn failing_history(mut self, error: fn() -> FeedError) -> Self {
        self.history_error = Some(error);
        self
    }

    fn emit(&self, event: MarketEvent) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        self.name
    }

    fn configure(&self, symbols: Vec<String>, callback: EventCallback) {
        *self.configured.lock().unwrap() = symbols;
        *self.callback.lock().unwrap() = Some(callback);
    }

    async fn start(&self) -> FeedResult<()> {
        if self.fail_start {
            return Err(FeedError::NetworkError("connection refused".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> FeedResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> FeedResult<KlineSeries> {
        parse_interval(interval)?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.history_error {
            return Err(error());
        }
        self.history
            .get(symbol)
            .cloned()
            .ok_or_else(|| FeedError::UnsupportedAsset(symbol.to_string()))
    }

    async fn update_subscription_tokens(&self, symbols: &[String]) -> FeedResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(FeedError::NotStarted(self.name.to_string()));
        }
        self.updates.lock().unwrap().push(symbols.to_vec());
        Ok(())
    }

    async fn flush_cache(&self) -> FeedResult<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StaticRegistry {
    assets: Option<Vec<TrackedAsset>>,
}

#[async_trait]
impl AssetRegistrySource for StaticRegistry {
    async fn list_tracked_assets(&self) -> MarketResult<Vec<TrackedAsset>> {
        self.assets
            .clone()
            .ok_or_else(|| MarketError::Registry("database unavailable".to_string()))
    }
}

#[derive(Default)]
struct RecordingFileStore {
    uploads: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl FileStore for RecordingFileStore {
    async fn upload_with_fixed_id(
        &self,
        id: &str,
        bucket: &str,
        filename: &str,
        _bytes: Vec<u8>,
    ) -> MarketResult<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((id.to_string(), bucket.to_string(), filename.to_string()));
        Ok(format!("mem://{}/{}", bucket, filename))
    }
}

/// 등록만 기록하고, 테스트가 직접 작업을 실행합니다.
#[derive(Default)]
struct ManualScheduler {
    jobs: Mutex<Vec<(String, Schedule, Job)>>,
    shutdowns: AtomicUsize,
}

impl ManualScheduler {
    fn names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    fn schedule_of(&self, name: &str) -> Option<Schedule> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, schedule, _)| *schedule)
    }

    async fn run(&self, name: &str) {
        let job = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, job)| job.clone())
            .unwrap_or_else(|| panic!("job '{}' not registered", name));
        job().await;
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    fn register(&self, name: &str, schedule: Schedule, job: Job) {
        self.jobs
            .lock()
            .unwrap()
            .push((name.to_string(), schedule, job));
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// 조립
// ============================================================================

struct Harness {
    market: Market,
    drivers: Vec<Arc<MockDriver>>,
    scheduler: Arc<ManualScheduler>,
    store: Arc<MemorySnapshotStore>,
    files: Arc<RecordingFileStore>,
}

fn harness(assets: Option<Vec<TrackedAsset>>, drivers: Vec<MockDriver>) -> Harness {
    harness_with_store(assets, drivers, Arc::new(MemorySnapshotStore::new()))
}

fn harness_with_store(
    assets: Option<Vec<TrackedAsset>>,
    drivers: Vec<MockDriver>,
    store: Arc<MemorySnapshotStore>,
) -> Harness {
    let drivers: Vec<Arc<MockDriver>> = drivers.into_iter().map(Arc::new).collect();
    let scheduler = Arc::new(ManualScheduler::default());
    let files = Arc::new(RecordingFileStore::default());

    let settings = MarketSettings {
        reconcile_interval: Duration::from_secs(5),
        driver_priority: vec!["alpha".to_string(), "beta".to_string()],
        bucket: "charts".to_string(),
        ..Default::default()
    };

    let market = Market::new(
        MarketDeps {
            registry: Arc::new(StaticRegistry { assets }),
            snapshot_store: store.clone(),
            file_store: files.clone(),
            renderer: Arc::new(SvgChartRenderer::default()),
            scheduler: scheduler.clone(),
            drivers: drivers
                .iter()
                .map(|d| d.clone() as Arc<dyn Driver>)
                .collect(),
        },
        settings,
    );

    Harness {
        market,
        drivers,
        scheduler,
        store,
        files,
    }
}

fn ten_assets() -> Vec<TrackedAsset> {
    (1..=10)
        .map(|i| TrackedAsset::new(format!("{:02}", i), format!("T{}", i), Decimal::from(i)))
        .collect()
}

fn event(symbol: &str, price: Decimal) -> MarketEvent {
    MarketEvent::new(symbol, price, Utc::now())
}

fn week() -> (DateTime<Utc>, DateTime<Utc>) {
    let end = Utc::now();
    (end - chrono::Duration::days(7), end)
}

// ============================================================================
// 과거 시세 폴백
// ============================================================================

#[tokio::test]
async fn test_history_falls_back_to_next_provider() {
    let h = harness(
        Some(vec![
            TrackedAsset::new("1", "BTC", dec!(19000000)),
            TrackedAsset::new("2", "", dec!(0)),
            TrackedAsset::new("3", "RARE", dec!(1)),
        ]),
        vec![
            // 우선순위와 반대 순서로 전달
            MockDriver::new("beta").with_history("BTC", 7),
            MockDriver::new("alpha"),
        ],
    );
    h.market.start().await.unwrap();
    assert_eq!(h.market.driver_names(), vec!["alpha", "beta"]);

    let (start, end) = week();
    let series = h.market.fetch_klines("1", "1h", start, end).await.unwrap();
    assert_eq!(series.len(), 7);
    assert_eq!(h.drivers[1].fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.drivers[0].fetch_calls.load(Ordering::SeqCst), 1);

    assert!(matches!(
        h.market.fetch_klines("404", "1h", start, end).await,
        Err(AggregatorError::NotFound(_))
    ));
    assert!(matches!(
        h.market.fetch_klines("2", "1h", start, end).await,
        Err(AggregatorError::UnsupportedAsset(_))
    ));
    assert!(matches!(
        h.market.fetch_klines("3", "1h", start, end).await,
        Err(AggregatorError::UnsupportedAsset(_))
    ));
    assert!(matches!(
        h.market.fetch_klines("1", "7h", start, end).await,
        Err(AggregatorError::Feed(FeedError::InvalidInterval(_)))
    ));

    h.market.stop().await.unwrap();
}

#[tokio::test]
async fn test_history_does_not_fall_back_on_transient_error() {
    let h = harness(
        Some(vec![TrackedAsset::new("1", "BTC", dec!(1))]),
        vec![
            MockDriver::new("alpha").failing_history(|| FeedError::RateLimited),
            MockDriver::new("beta").with_history("BTC", 3),
        ],
    );
    h.market.start().await.unwrap();

    let result = h.market.fetch_last_7_days_klines("1").await;
    assert!(matches!(
        result,
        Err(AggregatorError::Feed(FeedError::RateLimited))
    ));
    assert_eq!(h.drivers[1].fetch_calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// 순위와 조회
// ============================================================================

#[tokio::test]
async fn test_market_cap_range_queries() {
    let h = harness(Some(ten_assets()), vec![MockDriver::new("alpha")]);
    h.market.start().await.unwrap();

    for i in 1..=10 {
        h.drivers[0].emit(event(&format!("T{}", i), dec!(2)));
    }
    h.scheduler.run("reconcile").await;

    let all = h.market.find_by_market_cap_range(0, 0).unwrap();
    assert_eq!(all.len(), 10);
    assert_eq!(all[0].id, "10");
    assert_eq!(all[0].market_cap, dec!(20));

    let tail = h.market.find_by_market_cap_range(5, 0).unwrap();
    let ranks: Vec<u32> = tail.iter().map(|a| a.rank).collect();
    assert_eq!(ranks, vec![5, 6, 7, 8, 9, 10]);

    assert_eq!(h.market.find_by_market_cap_range(1, 3).unwrap().len(), 3);
    assert!(h.market.find_by_market_cap_range(4, 2).unwrap().is_empty());
    assert!(matches!(
        h.market.find_by_market_cap_range(11, 0),
        Err(AggregatorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_untouched_and_unknown_assets() {
    let h = harness(
        Some(vec![
            TrackedAsset::new("1", "BTC", dec!(10)),
            TrackedAsset::new("2", "ETH", dec!(10)),
        ]),
        vec![MockDriver::new("alpha")],
    );
    h.market.start().await.unwrap();

    h.drivers[0].emit(event("BTC", dec!(5)));
    // 미등록 심볼은 버려짐
    h.drivers[0].emit(event("DOGE", dec!(1)));
    h.market.reconcile();

    let eth = h.market.find_by_id("2");
    assert_eq!(eth.market_cap, Decimal::ZERO);
    assert!(eth.updated_at.is_none());
    assert_eq!(eth.rank, 2);

    let missing = h.market.find_by_id("999");
    assert_eq!(missing, AssetMarketInfo::placeholder("999"));

    let batch = h
        .market
        .find_by_ids(&["1".to_string(), "999".to_string()]);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].market_cap, dec!(50));
    assert_eq!(batch[1].id, "999");
    assert_eq!(h.market.view().len(), 2);
}

#[tokio::test]
async fn test_supply_updates_and_total_supply_fallback() {
    let h = harness(
        Some(vec![
            TrackedAsset::new("1", "BTC", dec!(100)),
            TrackedAsset::new("2", "BTC", dec!(100)),
        ]),
        vec![MockDriver::new("alpha")],
    );
    h.market.start().await.unwrap();

    h.drivers[0].emit(event("btc", dec!(3)).with_supply(dec!(200)));
    h.market.reconcile();

    for id in ["1", "2"] {
        let info = h.market.find_by_id(id);
        assert_eq!(info.circulating_supply, dec!(200));
        assert_eq!(info.total_supply, dec!(200));
        assert_eq!(info.market_cap, info.price * info.circulating_supply);
    }

    h.drivers[0].emit(event("BTC", dec!(4)).with_total_supply(dec!(1000)));
    h.market.reconcile();
    let info = h.market.find_by_id("1");
    assert_eq!(info.total_supply, dec!(1000));
    assert_eq!(info.market_cap, dec!(800));
}

// ============================================================================
// 수명주기
// ============================================================================

#[tokio::test]
async fn test_start_configures_drivers_and_registers_jobs() {
    let h = harness(
        Some(vec![
            TrackedAsset::new("1", "btc", dec!(1)),
            TrackedAsset::new("2", "", dec!(1)),
            TrackedAsset::new("3", "ETH", dec!(1)),
        ]),
        vec![MockDriver::new("alpha"), MockDriver::new("beta")],
    );
    assert_eq!(h.market.state(), MarketState::Unconfigured);

    h.market.start().await.unwrap();
    assert_eq!(h.market.state(), MarketState::Running);

    for driver in &h.drivers {
        assert!(driver.started.load(Ordering::SeqCst));
        assert_eq!(*driver.configured.lock().unwrap(), vec!["BTC", "ETH"]);
    }

    assert_eq!(
        h.scheduler.names(),
        vec!["reconcile", "chart-refresh", "chart-refresh-initial"]
    );
    assert_eq!(
        h.scheduler.schedule_of("reconcile"),
        Some(Schedule::Every(Duration::from_secs(5)))
    );
    assert!(matches!(
        h.scheduler.schedule_of("chart-refresh"),
        Some(Schedule::DailyAt(_))
    ));

    assert!(matches!(
        h.market.start().await,
        Err(AggregatorError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_driver_start_failure_is_fatal() {
    let h = harness(
        Some(vec![TrackedAsset::new("1", "BTC", dec!(1))]),
        vec![MockDriver::new("alpha"), MockDriver::new("beta").failing_start()],
    );

    let result = h.market.start().await;
    assert!(matches!(
        result,
        Err(AggregatorError::DriverStart { ref driver, .. }) if driver == "beta"
    ));
    assert_eq!(h.market.state(), MarketState::Stopped);
    assert!(!h.drivers[0].started.load(Ordering::SeqCst));
    assert!(h.drivers[0].stop_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_registry_failure_is_fatal() {
    let h = harness(None, vec![MockDriver::new("alpha")]);

    let result = h.market.start().await;
    assert!(matches!(result, Err(AggregatorError::Bootstrap(_))));
    assert_eq!(h.market.state(), MarketState::Stopped);
    assert!(!h.drivers[0].started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness(Some(ten_assets()), vec![MockDriver::new("alpha")]);
    h.market.start().await.unwrap();

    h.market.stop().await.unwrap();
    h.market.stop().await.unwrap();

    assert_eq!(h.market.state(), MarketState::Stopped);
    assert_eq!(h.scheduler.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.drivers[0].stop_calls.load(Ordering::SeqCst), 1);

    // 조회는 중지 후에도 마지막 뷰를 반환
    assert_eq!(h.market.find_by_market_cap_range(0, 0).unwrap().len(), 10);
}

// ============================================================================
// 자산 추가
// ============================================================================

#[tokio::test]
async fn test_add_asset_extends_subscriptions() {
    let h = harness(
        Some(vec![TrackedAsset::new("1", "BTC", dec!(1))]),
        vec![MockDriver::new("alpha"), MockDriver::new("beta")],
    );

    assert!(matches!(
        h.market.add_asset("2", "ADA", dec!(1)).await,
        Err(AggregatorError::InvalidState(_))
    ));

    h.market.start().await.unwrap();
    let held = h.market.view();

    assert!(h.market.add_asset("2", " ada ", dec!(35)).await.unwrap());
    assert!(!h.market.add_asset("2", "ADA", dec!(35)).await.unwrap());
    assert!(h.market.add_asset("3", "", dec!(1)).await.unwrap());

    for driver in &h.drivers {
        assert_eq!(
            *driver.updates.lock().unwrap(),
            vec![vec!["ADA".to_string()], vec!["ADA".to_string()]]
        );
    }

    // 이미 획득한 뷰는 그대로, 새 뷰에는 바로 보임
    assert_eq!(held.len(), 1);
    let ada = h.market.find_by_id("2");
    assert_eq!(ada.symbol, "ADA");
    assert_eq!(ada.circulating_supply, dec!(35));
    assert_eq!(ada.rank, 0);

    h.drivers[0].emit(event("ADA", dec!(2)));
    h.market.reconcile();
    let ada = h.market.find_by_id("2");
    assert_eq!(ada.market_cap, dec!(70));
    assert_eq!(ada.rank, 1);
}

// ============================================================================
// 차트와 스냅샷
// ============================================================================

#[tokio::test]
async fn test_chart_refresh_uploads_and_persists() {
    let h = harness(
        Some(vec![
            TrackedAsset::new("1", "BTC", dec!(1)),
            TrackedAsset::new("2", "ETH", dec!(1)),
            TrackedAsset::new("3", "", dec!(1)),
            TrackedAsset::new("4", "RARE", dec!(1)),
        ]),
        vec![
            MockDriver::new("alpha").with_history("BTC", 168),
            MockDriver::new("beta").with_history("ETH", 168),
        ],
    );
    h.market.start().await.unwrap();
    h.scheduler.run("chart-refresh-initial").await;

    let mut uploads = h.files.uploads.lock().unwrap().clone();
    uploads.sort();
    assert_eq!(
        uploads,
        vec![
            ("1".to_string(), "charts".to_string(), "1.svg".to_string()),
            ("2".to_string(), "charts".to_string(), "2.svg".to_string()),
        ]
    );

    assert_eq!(
        h.market.find_by_id("1").chart_url.as_deref(),
        Some("mem://charts/1.svg")
    );
    assert!(h.market.find_by_id("4").chart_url.is_none());

    let snapshot = MarketSnapshot::load(&*h.store, "market:snapshot")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.assets.len(), 4);
    assert_eq!(snapshot.chart_count(), 2);

    for driver in &h.drivers {
        assert_eq!(driver.flush_calls.load(Ordering::SeqCst), 1);
    }

    let stats = h.market.refresh_charts().await;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.success, 2);
    assert_eq!(stats.unsupported, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn test_fresh_snapshot_restores_chart_urls() {
    let store = Arc::new(MemorySnapshotStore::new());
    let mut saved = AssetMarketInfo::placeholder("1");
    saved.chart_url = Some("mem://charts/1.svg".to_string());
    MarketSnapshot::new(vec![saved, AssetMarketInfo::placeholder("gone")])
        .save(&*store, "market:snapshot")
        .await
        .unwrap();

    let h = harness_with_store(
        Some(vec![TrackedAsset::new("1", "BTC", dec!(1))]),
        vec![MockDriver::new("alpha")],
        store,
    );
    h.market.start().await.unwrap();

    assert_eq!(h.scheduler.names(), vec!["reconcile", "chart-refresh"]);
    assert_eq!(
        h.market.find_by_id("1").chart_url.as_deref(),
        Some("mem://charts/1.svg")
    );
    assert!(h.files.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_snapshot_triggers_regeneration() {
    let store = Arc::new(MemorySnapshotStore::new());
    let mut snapshot = MarketSnapshot::new(vec![AssetMarketInfo::placeholder("1")]);
    snapshot.saved_at = Utc::now() - chrono::Duration::days(2);
    snapshot
        .save(&*store as &dyn SnapshotStore, "market:snapshot")
        .await
        .unwrap();

    let h = harness_with_store(
        Some(vec![TrackedAsset::new("1", "BTC", dec!(1))]),
        vec![MockDriver::new("alpha")],
        store,
    );
    h.market.start().await.unwrap();

    assert!(h
        .scheduler
        .names()
        .contains(&"chart-refresh-initial".to_string()));
}
