//! PostgreSQL 자산 레지스트리 원천.

use async_trait::async_trait;
use market_core::{AssetRegistrySource, DatabaseConfig, MarketError, MarketResult, TrackedAsset};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument};

/// 설정된 쿼리로 추적 자산을 읽습니다.
///
/// 쿼리는 `id`, `symbol`, `circulating_supply`, `total_supply` 네 컬럼을 이 순서로
/// 반환해야 합니다. `symbol`과 공급량 컬럼은 NULL일 수 있습니다.
pub struct PgAssetSource {
    pool: PgPool,
    query: String,
}

impl PgAssetSource {
    pub fn new(pool: PgPool, query: impl Into<String>) -> Self {
        Self {
            pool,
            query: query.into(),
        }
    }

    /// 설정으로 연결 풀을 만듭니다.
    pub async fn connect(config: &DatabaseConfig) -> MarketResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| MarketError::Registry(format!("database connection failed: {}", e)))?;

        info!("Database connection established");
        Ok(Self::new(pool, config.registry_query.clone()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

type AssetRow = (String, Option<String>, Option<Decimal>, Option<Decimal>);

#[async_trait]
impl AssetRegistrySource for PgAssetSource {
    #[instrument(skip(self))]
    async fn list_tracked_assets(&self) -> MarketResult<Vec<TrackedAsset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(&self.query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MarketError::Registry(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, symbol, circulating, total)| TrackedAsset {
                total_supply: total,
                ..TrackedAsset::new(
                    id,
                    symbol.unwrap_or_default(),
                    circulating.unwrap_or(Decimal::ZERO),
                )
            })
            .collect())
    }
}
