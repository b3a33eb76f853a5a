//! Redis 스냅샷 저장소.

use std::sync::Arc;

use async_trait::async_trait;
use market_core::{MarketError, MarketResult, RedisConfig, SnapshotStore};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// 키마다 바이트 값을 그대로 저장하는 Redis 저장소. 만료 시간은 두지 않습니다.
#[derive(Clone)]
pub struct RedisSnapshotStore {
    connection: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisSnapshotStore {
    /// Redis에 연결합니다.
    pub async fn connect(config: &RedisConfig) -> MarketResult<Self> {
        info!("Connecting to Redis...");

        let client = Client::open(config.url.as_str()).map_err(storage_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(storage_error)?;

        info!("Redis connection established");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Redis 상태를 확인합니다.
    pub async fn health_check(&self) -> MarketResult<bool> {
        let mut conn = self.connection.lock().await;
        let result: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(storage_error)?;
        Ok(result == "PONG")
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> MarketResult<Option<Vec<u8>>> {
        let mut conn = self.connection.lock().await;
        conn.get(key).await.map_err(storage_error)
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn put(&self, key: &str, value: Vec<u8>) -> MarketResult<()> {
        let mut conn = self.connection.lock().await;
        conn.set::<_, _, ()>(key, value).await.map_err(storage_error)
    }
}

fn storage_error(err: redis::RedisError) -> MarketError {
    MarketError::Storage(err.to_string())
}
