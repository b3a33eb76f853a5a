//! 드라이버 공통 스트리밍 상태.
//!
//! 설정된 심볼/콜백과 현재 연결 관리자를 보관합니다. 세 드라이버가 같은 방식으로
//! 시작, 중지, 구독 확장을 수행하도록 묶어 둔 것입니다.

use std::collections::HashSet;
use std::sync::Arc;

use market_core::{normalize_symbol, ConnectionSettings};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use crate::catalog::CatalogCache;
use crate::connection::{ConnectionManager, StreamProtocol};
use crate::driver::EventCallback;
use crate::error::{FeedError, FeedResult};

struct Configured {
    symbols: Vec<String>,
    callback: EventCallback,
}

pub(crate) struct StreamRuntime<P: StreamProtocol> {
    name: &'static str,
    settings: ConnectionSettings,
    configured: RwLock<Option<Configured>>,
    manager: Mutex<Option<ConnectionManager<P>>>,
}

impl<P: StreamProtocol> StreamRuntime<P> {
    pub(crate) fn new(name: &'static str, settings: ConnectionSettings) -> Self {
        Self {
            name,
            settings,
            configured: RwLock::new(None),
            manager: Mutex::new(None),
        }
    }

    /// 심볼과 콜백을 저장합니다. 빈 심볼과 중복은 제거됩니다.
    pub(crate) fn configure(&self, symbols: Vec<String>, callback: EventCallback) {
        let symbols = dedup_symbols(&symbols);
        *self.configured.write() = Some(Configured { symbols, callback });
    }

    /// 새 연결 관리자를 만들고 카탈로그로 걸러진 심볼을 구독합니다.
    pub(crate) async fn start(&self, protocol: Arc<P>, catalog: &CatalogCache) -> FeedResult<()> {
        let (symbols, callback) = {
            let guard = self.configured.read();
            let configured = guard.as_ref().ok_or_else(|| {
                FeedError::NotStarted(format!("{} driver is not configured", self.name))
            })?;
            (configured.symbols.clone(), configured.callback.clone())
        };

        let mut slot = self.manager.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        let subscribable = catalog.filter(&symbols);
        info!(
            provider = self.name,
            configured = symbols.len(),
            subscribable = subscribable.len(),
            "Starting streams"
        );

        let manager = ConnectionManager::new(protocol, self.settings.clone(), callback);
        if let Err(e) = manager.subscribe(&subscribable).await {
            manager.stop().await;
            return Err(e);
        }

        *slot = Some(manager);
        Ok(())
    }

    /// 연결 관리자를 중지합니다. 시작 전이거나 이미 중지된 경우 아무것도 하지 않습니다.
    pub(crate) async fn stop(&self) {
        let manager = self.manager.lock().await.take();
        if let Some(manager) = manager {
            manager.stop().await;
        }
    }

    /// 구독을 확장합니다.
    pub(crate) async fn update(&self, symbols: &[String], catalog: &CatalogCache) -> FeedResult<()> {
        let symbols = dedup_symbols(symbols);

        let guard = self.manager.lock().await;
        let manager = guard.as_ref().ok_or_else(|| {
            FeedError::NotStarted(format!("{} driver is not started", self.name))
        })?;

        // 재시작 시에도 포함되도록 설정된 목록에 합침
        if let Some(configured) = self.configured.write().as_mut() {
            let known: HashSet<String> = configured.symbols.iter().cloned().collect();
            configured
                .symbols
                .extend(symbols.iter().filter(|s| !known.contains(*s)).cloned());
        }

        manager.subscribe(&catalog.filter(&symbols)).await?;
        Ok(())
    }

    pub(crate) async fn groups(&self) -> Vec<Vec<String>> {
        match self.manager.lock().await.as_ref() {
            Some(manager) => manager.groups().await,
            None => Vec::new(),
        }
    }
}

fn dedup_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| normalize_symbol(s))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
