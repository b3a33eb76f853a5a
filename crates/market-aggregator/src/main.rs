//! 시장 데이터 어그리게이터 서비스 CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use market_aggregator::{
    LocalFileStore, Market, MarketDeps, MarketSettings, MarketSnapshot, PgAssetSource,
    RedisSnapshotStore, SvgChartRenderer, TokioScheduler,
};
use market_core::{init_logging, AppConfig, LogConfig, SnapshotStore};
use market_feed::build_drivers;

#[derive(Parser)]
#[command(name = "market-aggregator")]
#[command(about = "Real-time market data aggregator", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 어그리게이터 실행 (Ctrl-C로 종료)
    Run,

    /// 저장된 스냅샷 요약 출력
    Snapshot,

    /// 프로바이더 폴백을 거쳐 과거 시세 조회
    Klines {
        /// 자산 ID
        #[arg(long)]
        id: String,

        /// 봉 간격 (1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w)
        #[arg(long, default_value = "1h")]
        interval: String,

        /// 조회 기간 (일)
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    init_logging(LogConfig::from_settings(&config.logging))
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await,
        Commands::Snapshot => print_snapshot(&config).await,
        Commands::Klines { id, interval, days } => klines(&config, &id, &interval, days).await,
    }
}

async fn build_market(config: &AppConfig) -> anyhow::Result<(Market, Arc<PgAssetSource>)> {
    let snapshot_store: Arc<dyn SnapshotStore> = Arc::new(
        RedisSnapshotStore::connect(&config.redis)
            .await
            .context("Redis connection failed")?,
    );
    let registry = Arc::new(
        PgAssetSource::connect(&config.database)
            .await
            .context("database connection failed")?,
    );
    let drivers =
        build_drivers(&config.providers, snapshot_store.clone()).context("driver setup failed")?;
    let settings = MarketSettings::from_config(config)?;

    let market = Market::new(
        MarketDeps {
            registry: registry.clone(),
            snapshot_store,
            file_store: Arc::new(LocalFileStore::from_config(&config.storage)),
            renderer: Arc::new(SvgChartRenderer::default()),
            scheduler: Arc::new(TokioScheduler::new()),
            drivers,
        },
        settings,
    );
    Ok((market, registry))
}

async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let (market, registry) = build_market(config).await?;
    tracing::info!(drivers = ?market.driver_names(), "Starting market aggregator");

    market.start().await.context("market start failed")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    market.stop().await?;
    registry.close().await;
    tracing::info!("Market aggregator stopped");
    Ok(())
}

async fn print_snapshot(config: &AppConfig) -> anyhow::Result<()> {
    let store = RedisSnapshotStore::connect(&config.redis).await?;
    let Some(snapshot) = MarketSnapshot::load(&store, &config.aggregator.snapshot_key).await?
    else {
        println!("No snapshot stored at '{}'", config.aggregator.snapshot_key);
        return Ok(());
    };

    println!(
        "Snapshot saved at {} (fresh: {})",
        snapshot.saved_at,
        snapshot.is_fresh(Utc::now())
    );
    println!(
        "{} assets, {} with charts",
        snapshot.assets.len(),
        snapshot.chart_count()
    );
    for asset in snapshot.assets.iter().filter(|a| a.rank > 0).take(20) {
        println!(
            "{:>4}  {:<10} {:>20} {:>24}",
            asset.rank, asset.symbol, asset.price, asset.market_cap
        );
    }
    Ok(())
}

async fn klines(config: &AppConfig, id: &str, interval: &str, days: i64) -> anyhow::Result<()> {
    let (market, registry) = build_market(config).await?;
    market.start().await.context("market start failed")?;

    let end = Utc::now();
    let start = end - Duration::days(days.max(1));
    let result = market.fetch_klines(id, interval, start, end).await;

    market.stop().await?;
    registry.close().await;

    let series = result.with_context(|| format!("history query failed for asset '{}'", id))?;
    println!("{} points for asset {} ({})", series.len(), id, interval);
    for (timestamp, price) in series.points() {
        println!("{}  {}", timestamp.to_rfc3339(), price);
    }
    Ok(())
}
