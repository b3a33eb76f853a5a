//! 개별 연결의 세션 루프와 재연결.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use market_core::ConnectionSettings;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::group::{Shared, SlotState};
use super::{Frame, StreamProtocol};
use crate::driver::EventCallback;
use crate::error::{FeedError, FeedResult};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 세션 종료 사유.
#[derive(Debug)]
enum SessionEnd {
    /// `stop()`에 의한 종료
    Stopped,
    /// 서버가 정상 종료 코드로 닫음
    Clean,
    /// 읽기 실패, close 프레임 없는 스트림 종료, 비정상 종료 코드, keepalive 타임아웃
    Abrupt(String),
}

/// 연결하고 구독 확인까지 기다립니다.
///
/// 확인 전에 도착한 시세 이벤트는 콜백으로 전달됩니다.
pub(crate) async fn dial_and_subscribe<P: StreamProtocol>(
    protocol: &P,
    symbols: &[String],
    settings: &ConnectionSettings,
    callback: &EventCallback,
) -> FeedResult<WsStream> {
    let provider = protocol.name();
    let timeout = settings.handshake_timeout();

    debug!(provider, symbols = symbols.len(), "Dialing");

    let request = handshake_request(protocol)?;
    let (mut socket, _) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| FeedError::Timeout(format!("connect to {} stream", provider)))??;

    socket.send(protocol.subscribe_message(symbols)?).await?;

    tokio::time::timeout(timeout, wait_for_ack(protocol, &mut socket, callback))
        .await
        .map_err(|_| FeedError::Timeout("subscription acknowledgment".to_string()))??;

    Ok(socket)
}

fn handshake_request<P: StreamProtocol>(protocol: &P) -> FeedResult<Request> {
    let mut request = protocol.endpoint().as_str().into_client_request()?;
    for (name, value) in protocol.request_headers() {
        let value = HeaderValue::from_str(&value).map_err(|_| {
            FeedError::WebSocket(format!("invalid {} header for {}", name, protocol.name()))
        })?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// 구독 확인 응답을 읽습니다.
async fn wait_for_ack<P: StreamProtocol>(
    protocol: &P,
    socket: &mut WsStream,
    callback: &EventCallback,
) -> FeedResult<()> {
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => match protocol.classify(&text) {
                Frame::Ack => return Ok(()),
                Frame::Rejected(reason) => return Err(FeedError::SubscriptionRejected(reason)),
                Frame::Events(events) => {
                    for event in events {
                        callback(event);
                    }
                }
                Frame::Pong | Frame::Ignore => {}
            },
            Message::Ping(data) => socket.send(Message::Pong(data)).await?,
            Message::Close(frame) => {
                return Err(FeedError::Disconnected(format!(
                    "closed before acknowledgment: {:?}",
                    frame
                )));
            }
            _ => {}
        }
    }

    Err(FeedError::Disconnected(
        "stream ended before acknowledgment".to_string(),
    ))
}

/// 연결 태스크 본체. 세션이 비정상 종료되면 재연결합니다.
pub(crate) async fn run_connection<P: StreamProtocol>(
    shared: Arc<Shared<P>>,
    id: u64,
    socket: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    let mut socket = socket;

    loop {
        match run_session(&shared, socket, &mut outbound, &cancel).await {
            SessionEnd::Stopped => {
                debug!(connection_id = id, "Session stopped");
                break;
            }
            SessionEnd::Clean => {
                info!(connection_id = id, "Connection closed by server");
                break;
            }
            SessionEnd::Abrupt(reason) => {
                warn!(connection_id = id, %reason, "Connection lost");
                match reconnect(&shared, id, &mut outbound, &cancel).await {
                    Some(next) => socket = next,
                    None => break,
                }
            }
        }
    }

    shared.set_state(id, SlotState::Closed).await;
}

async fn run_session<P: StreamProtocol>(
    shared: &Shared<P>,
    socket: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();
    let settings = &shared.settings;

    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval(),
        settings.ping_interval(),
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // ping 이후 아무 프레임도 받지 못한 채 이 시각이 지나면 연결을 끊음
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;

        tokio::select! {
            _ = cancel.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "shutdown".into(),
                }));
                let _ = write.send(close).await;
                return SessionEnd::Stopped;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = write.send(message).await {
                    return SessionEnd::Abrupt(format!("send failed: {}", e));
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write.send(shared.protocol.ping_message()).await {
                    return SessionEnd::Abrupt(format!("ping failed: {}", e));
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + settings.pong_timeout());
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                return SessionEnd::Abrupt("keepalive timeout".to_string());
            }
            message = read.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return SessionEnd::Abrupt(format!("read error: {}", e)),
                    None => return SessionEnd::Abrupt("stream ended without close frame".to_string()),
                };

                // 어떤 프레임이든 수신되면 연결이 살아 있는 것으로 간주
                pong_deadline = None;

                match message {
                    Message::Text(text) => dispatch(shared, &text),
                    Message::Ping(data) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Message::Close(frame) => return classify_close(frame),
                    Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                }
            }
        }
    }
}

fn dispatch<P: StreamProtocol>(shared: &Shared<P>, text: &str) {
    match shared.protocol.classify(text) {
        Frame::Events(events) => {
            for event in events {
                (shared.callback)(event);
            }
        }
        Frame::Rejected(reason) => {
            warn!(provider = shared.protocol.name(), %reason, "Provider error frame");
        }
        Frame::Ack | Frame::Pong | Frame::Ignore => {}
    }
}

fn classify_close(frame: Option<CloseFrame<'static>>) -> SessionEnd {
    match frame {
        Some(frame) if frame.code == CloseCode::Normal => SessionEnd::Clean,
        Some(frame) => SessionEnd::Abrupt(format!(
            "closed with code {}: {}",
            u16::from(frame.code),
            frame.reason
        )),
        None => SessionEnd::Abrupt("closed without status".to_string()),
    }
}

/// 같은 심볼 집합으로 재연결합니다.
///
/// 매 시도 전에 종료 플래그를 확인하며, 심볼 조회와 상태 교체는 그룹 잠금 안에서
/// 수행합니다.
async fn reconnect<P: StreamProtocol>(
    shared: &Arc<Shared<P>>,
    id: u64,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> Option<WsStream> {
    let settings = &shared.settings;
    shared.set_state(id, SlotState::Reconnecting).await;

    for attempt in 1..=settings.max_reconnect_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(settings.reconnect_interval()) => {}
        }

        if shared.is_shutdown() {
            info!(connection_id = id, "Shutdown requested, reconnect suppressed");
            return None;
        }

        let mut group = shared.group.lock().await;
        if shared.is_shutdown() || cancel.is_cancelled() {
            return None;
        }
        let slot = group.find_mut(id)?;
        let symbols = slot.symbols.clone();

        // 대기 중이던 추가 구독은 전체 재구독에 포함됨
        while outbound.try_recv().is_ok() {}

        match dial_and_subscribe(
            shared.protocol.as_ref(),
            &symbols,
            settings,
            &shared.callback,
        )
        .await
        {
            Ok(socket) => {
                slot.state = SlotState::Live;
                slot.generation += 1;
                info!(
                    connection_id = id,
                    attempt,
                    symbols = symbols.len(),
                    "Reconnected"
                );
                return Some(socket);
            }
            Err(e) => {
                warn!(
                    connection_id = id,
                    attempt,
                    max_attempts = settings.max_reconnect_attempts,
                    error = %e,
                    "Reconnect attempt failed"
                );
            }
        }
    }

    error!(
        connection_id = id,
        "Reconnect attempts exhausted ({})", settings.max_reconnect_attempts
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(code: CloseCode) -> Option<CloseFrame<'static>> {
        Some(CloseFrame {
            code,
            reason: "bye".into(),
        })
    }

    struct KeyedProtocol;

    impl StreamProtocol for KeyedProtocol {
        fn name(&self) -> &'static str {
            "keyed"
        }

        fn endpoint(&self) -> String {
            "wss://example.invalid/stream".to_string()
        }

        fn request_headers(&self) -> Vec<(&'static str, String)> {
            vec![("authorization", "Apikey secret".to_string())]
        }

        fn subscribe_message(&self, _symbols: &[String]) -> FeedResult<Message> {
            Ok(Message::Text("{}".into()))
        }

        fn classify(&self, _text: &str) -> Frame {
            Frame::Ignore
        }
    }

    #[test]
    fn test_handshake_request_carries_headers() {
        let request = handshake_request(&KeyedProtocol).unwrap();
        assert_eq!(request.uri().to_string(), "wss://example.invalid/stream");
        assert_eq!(request.headers()["authorization"], "Apikey secret");
        assert!(!request.uri().to_string().contains("secret"));
    }

    #[test]
    fn test_classify_close() {
        assert!(matches!(classify_close(close(CloseCode::Normal)), SessionEnd::Clean));
        assert!(matches!(
            classify_close(close(CloseCode::Away)),
            SessionEnd::Abrupt(_)
        ));
        assert!(matches!(classify_close(None), SessionEnd::Abrupt(_)));
    }
}
