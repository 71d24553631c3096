//! 会话事件与 Event Sink 契约
//!
//! 状态机在每次状态迁移和数据事件上同步调用 sink。所有回调都是
//! fire-and-forget，sink 实现不得阻塞会话的事件循环。
//! 事件以穷举的 tagged enum 表达，消费者 match 一次即可覆盖全部
//! 回调，避免把按角色分支散落到多个 handler 里。

use tokio::sync::mpsc;

use crate::adapter::RangedBeacon;
use crate::codec::Payload;
use crate::error::SessionError;

/// 状态机对外发布的事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 观察者：一次测距的首个 beacon 测量值
    RangedBeacon(RangedBeacon),
    /// 角色配置开始
    ConfigurationStarted,
    /// 扫描/测距开始
    ScanningStarted,
    PeerConnected { name: Option<String> },
    PeerDisconnected { name: Option<String> },
    DataSent,
    DataReceived { payload: Payload },
    ConnectionFailed,
    AdvertisingStarted,
    AdvertisingStopped,
    /// 会话进入 Failed 状态；错误只上报一次
    SessionFailed { error: SessionError },
}

/// Event Sink：核心 → 消费者的观察者接口
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// 把事件转发进 mpsc 通道的 sink
///
/// 消费者拿 `Receiver` 当事件流用；通道满时丢弃而不是阻塞，
/// 保证不拖住会话的执行上下文。
pub struct ChannelSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: SessionEvent) {
        let _ = self.tx.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.on_event(SessionEvent::DataSent);
        sink.on_event(SessionEvent::ConfigurationStarted);
        assert_eq!(rx.recv().await, Some(SessionEvent::DataSent));
        assert_eq!(rx.recv().await, Some(SessionEvent::ConfigurationStarted));
    }

    #[tokio::test]
    async fn channel_sink_drops_when_full_instead_of_blocking() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.on_event(SessionEvent::DataSent);
        sink.on_event(SessionEvent::ConnectionFailed);
        assert_eq!(rx.recv().await, Some(SessionEvent::DataSent));
        assert!(rx.try_recv().is_err());
    }
}
