//! 스트리밍 연결 관리자.
//!
//! 모든 프로바이더가 공유하는 연결 수명주기 구현입니다. 프로바이더별 차이
//! (엔드포인트, 구독 메시지, 프레임 해석, keepalive 메시지)는 [`StreamProtocol`]
//! 로 주입됩니다.
//!
//! - 심볼은 연결당 용량 제한을 가진 그룹으로 나뉩니다 ([`plan_subscription`]).
//! - 연결을 열 때 구독 메시지를 보내고 확인 응답을 기다립니다. 에러 응답이면
//!   연결 시도가 실패합니다.
//! - 비정상 종료 시 같은 심볼 집합으로 고정 간격, 제한 횟수 재연결을 시도합니다.
//! - [`ConnectionManager::stop`] 이후에는 재연결하지 않습니다.

mod group;
mod plan;
mod session;

pub use group::ConnectionManager;
pub use plan::{plan_subscription, SubscriptionPlan};

use market_core::MarketEvent;
use tokio_tungstenite::tungstenite::Message;

use crate::error::FeedResult;

/// 수신 텍스트 프레임의 해석 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 구독 확인
    Ack,
    /// 프로바이더 에러 응답
    Rejected(String),
    /// keepalive 응답 (pong, heartbeat)
    Pong,
    /// 정규화된 시세 이벤트
    Events(Vec<MarketEvent>),
    /// 무시할 메시지 (환영 메시지 등)
    Ignore,
}

/// 프로바이더별 스트리밍 프로토콜.
pub trait StreamProtocol: Send + Sync + 'static {
    /// 프로바이더 이름.
    fn name(&self) -> &'static str;

    /// WebSocket 엔드포인트 URL. 자격 증명은 넣지 않습니다.
    fn endpoint(&self) -> String;

    /// 핸드셰이크 요청에 추가할 헤더.
    fn request_headers(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// 주어진 심볼들에 대한 구독 제어 메시지.
    fn subscribe_message(&self, symbols: &[String]) -> FeedResult<Message>;

    /// keepalive 메시지. 기본은 WebSocket ping 프레임.
    fn ping_message(&self) -> Message {
        Message::Ping(Vec::new())
    }

    /// 텍스트 프레임을 해석합니다. 파싱 실패는 `Frame::Ignore`로 처리합니다.
    fn classify(&self, text: &str) -> Frame;
}
