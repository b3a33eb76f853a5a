//! 연결 그룹 상태와 구독 변경.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use market_core::{feed_span, ConnectionSettings};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::plan::plan_subscription;
use super::session::{dial_and_subscribe, run_connection};
use super::StreamProtocol;
use crate::driver::EventCallback;
use crate::error::{FeedError, FeedResult};

/// 연결 태스크 종료 대기 시간.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Live,
    Reconnecting,
    Closed,
}

/// 하나의 스트리밍 연결.
pub(crate) struct ConnectionSlot {
    pub(crate) id: u64,
    pub(crate) symbols: Vec<String>,
    pub(crate) state: SlotState,
    /// 재연결 성공 횟수
    pub(crate) generation: u32,
    outbound: mpsc::UnboundedSender<Message>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub(crate) struct ConnectionGroup {
    connections: Vec<ConnectionSlot>,
}

impl ConnectionGroup {
    pub(crate) fn find_mut(&mut self, id: u64) -> Option<&mut ConnectionSlot> {
        self.connections.iter_mut().find(|slot| slot.id == id)
    }
}

/// 연결 태스크와 관리자가 공유하는 상태.
pub(crate) struct Shared<P> {
    pub(crate) protocol: Arc<P>,
    pub(crate) settings: ConnectionSettings,
    pub(crate) callback: EventCallback,
    /// 심볼 집합 비교와 연결 교체를 직렬화하는 그룹 잠금
    pub(crate) group: Mutex<ConnectionGroup>,
    shutdown: AtomicBool,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl<P: StreamProtocol> Shared<P> {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) async fn set_state(&self, id: u64, state: SlotState) {
        if let Some(slot) = self.group.lock().await.find_mut(id) {
            slot.state = state;
        }
    }
}

/// 한 프로바이더의 연결 그룹 관리자.
pub struct ConnectionManager<P: StreamProtocol> {
    shared: Arc<Shared<P>>,
}

impl<P: StreamProtocol> ConnectionManager<P> {
    pub fn new(protocol: Arc<P>, settings: ConnectionSettings, callback: EventCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                protocol,
                settings,
                callback,
                group: Mutex::new(ConnectionGroup::default()),
                shutdown: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.protocol.name()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// 목표 심볼 집합에 맞춰 구독을 확장합니다. 추가된 심볼 수를 반환합니다.
    ///
    /// 현재 구독에 없는 심볼만 마지막 연결에 채우고, 나머지는 새 연결로 엽니다.
    /// 같은 목표로 여러 번 호출해도 연결이 늘지 않습니다.
    pub async fn subscribe(&self, target: &[String]) -> FeedResult<usize> {
        if self.is_shutdown() {
            return Err(FeedError::NotStarted(format!(
                "{} connection manager stopped",
                self.name()
            )));
        }

        let mut group = self.shared.group.lock().await;
        // 닫힌 슬롯의 심볼은 버리지 않고 이번 계획에 다시 넣습니다.
        let mut wanted: Vec<String> = group
            .connections
            .iter()
            .filter(|slot| slot.state == SlotState::Closed)
            .flat_map(|slot| slot.symbols.iter().cloned())
            .collect();
        group
            .connections
            .retain(|slot| slot.state != SlotState::Closed);
        if !wanted.is_empty() {
            debug!(
                provider = self.name(),
                reclaimed = wanted.len(),
                "Re-planning symbols of closed connections"
            );
        }
        wanted.extend(target.iter().cloned());

        let current: Vec<Vec<String>> = group
            .connections
            .iter()
            .map(|slot| slot.symbols.clone())
            .collect();
        let plan = plan_subscription(
            &current,
            &wanted,
            self.shared.settings.max_symbols_per_connection,
        );
        if plan.is_empty() {
            return Ok(0);
        }
        let added = plan.added_count();

        if let Some((index, symbols)) = plan.top_off {
            let message = self.shared.protocol.subscribe_message(&symbols)?;
            let slot = &mut group.connections[index];
            if slot.outbound.send(message).is_err() {
                warn!(
                    provider = self.name(),
                    connection_id = slot.id,
                    "Connection task gone, top-off deferred"
                );
            }
            debug!(
                provider = self.name(),
                connection_id = slot.id,
                added = symbols.len(),
                "Topped off connection"
            );
            slot.symbols.extend(symbols);
        }

        for batch in plan.new_batches {
            let slot = self.open(batch).await?;
            group.connections.push(slot);
        }

        info!(
            provider = self.name(),
            added,
            connections = group.connections.len(),
            "Subscription updated"
        );
        Ok(added)
    }

    /// 새 연결을 열고 세션 태스크를 띄웁니다. 호출자가 그룹 잠금을 쥐고 있어야 합니다.
    async fn open(&self, symbols: Vec<String>) -> FeedResult<ConnectionSlot> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);

        let socket = dial_and_subscribe(
            shared.protocol.as_ref(),
            &symbols,
            &shared.settings,
            &shared.callback,
        )
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = shared.cancel.child_token();
        let span = feed_span!("connection", shared.protocol.name());
        let task = tokio::spawn(
            run_connection(shared.clone(), id, socket, rx, cancel).instrument(span),
        );

        info!(
            provider = self.name(),
            connection_id = id,
            symbols = symbols.len(),
            "Connection opened"
        );

        Ok(ConnectionSlot {
            id,
            symbols,
            state: SlotState::Live,
            generation: 0,
            outbound: tx,
            task: Some(task),
        })
    }

    /// 모든 연결을 닫고 재연결을 막습니다. 여러 번 호출해도 안전합니다.
    pub async fn stop(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();

        let slots = std::mem::take(&mut self.shared.group.lock().await.connections);
        let count = slots.len();

        for mut slot in slots {
            if let Some(task) = slot.task.take() {
                if tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await.is_err() {
                    warn!(
                        provider = self.name(),
                        connection_id = slot.id,
                        "Connection task did not finish in time"
                    );
                }
            }
        }

        info!(provider = self.name(), connections = count, "Connections stopped");
    }

    /// 연결별 구독 심볼 (닫힌 연결 제외).
    pub async fn groups(&self) -> Vec<Vec<String>> {
        self.shared
            .group
            .lock()
            .await
            .connections
            .iter()
            .filter(|slot| slot.state != SlotState::Closed)
            .map(|slot| slot.symbols.clone())
            .collect()
    }

    /// 열린 연결 수.
    pub async fn connection_count(&self) -> usize {
        self.groups().await.len()
    }

    /// 전체 재연결 성공 횟수.
    pub async fn reconnect_count(&self) -> u32 {
        self.shared
            .group
            .lock()
            .await
            .connections
            .iter()
            .map(|slot| slot.generation)
            .sum()
    }
}

impl<P: StreamProtocol> Drop for ConnectionManager<P> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cancel.cancel();
    }
}
