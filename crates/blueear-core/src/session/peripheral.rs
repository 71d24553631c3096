//! GATT peripheral 角色（client peripheral）
//!
//! 广播固定 ServiceDescriptor 描述的自定义服务，向订阅者周期推送
//! 键值 payload。
//!
//! 状态机: Idle → RadioReady → ServiceRegistered → Advertising →
//! Subscribed → Idle，任意状态在适配器错误时进入 Failed。
//!
//! 注册是异步的：只有适配器确认服务添加成功之后才请求广播——对未
//! 注册的服务广播会被多数平台的协议栈拒绝，提前发出即逻辑错误。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapter::{
    PeripheralAdapter, PeripheralEvent, RadioState, SubscriberId, WriteRequest, WriteResult,
};
use crate::codec::{self, Payload};
use crate::content::ContentProvider;
use crate::error::SessionError;
use crate::event::{EventSink, SessionEvent};
use crate::identity::ServiceDescriptor;
use crate::session::SessionState;

/// 默认推送间隔
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(20);

/// peripheral 会话配置
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    pub descriptor: ServiceDescriptor,
    /// 广播里携带的本地名
    pub local_name: String,
    pub tick_interval: Duration,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            descriptor: ServiceDescriptor::default(),
            local_name: "blueear-peripheral".to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

enum Command {
    Start,
    Stop,
    Send(Payload),
}

/// GATT peripheral 会话
pub struct PeripheralSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl PeripheralSession {
    /// 内容提供者在构造时显式注入，而不是在回调里读取全局配置
    pub fn spawn(
        adapter: Arc<dyn PeripheralAdapter>,
        events: mpsc::Receiver<PeripheralEvent>,
        config: PeripheralConfig,
        provider: Box<dyn ContentProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let actor = Actor {
            adapter,
            config,
            provider,
            sink,
            state: state_tx,
            radio: RadioState::Unknown,
            active: false,
            registered: false,
            advertising: false,
            subscribers: Vec::new(),
            reset_tick: false,
        };
        let task = tokio::spawn(actor.run(cmd_rx, events));
        Self {
            commands: cmd_tx,
            state: state_rx,
            task,
        }
    }

    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// 停止广播并注销服务；重复 stop 是 no-op
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// tick 之外向当前全部订阅者推送一个 payload
    pub fn send_payload(&self, payload: Payload) {
        let _ = self.commands.send(Command::Send(payload));
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl Drop for PeripheralSession {
    fn drop(&mut self) {
        // abort 同时终结推送定时器，杜绝对已拆除特征的悬空发送
        self.task.abort();
    }
}

struct Actor {
    adapter: Arc<dyn PeripheralAdapter>,
    config: PeripheralConfig,
    provider: Box<dyn ContentProvider>,
    sink: Arc<dyn EventSink>,
    state: watch::Sender<SessionState>,
    radio: RadioState,
    active: bool,
    registered: bool,
    advertising: bool,
    subscribers: Vec<SubscriberId>,
    reset_tick: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<PeripheralEvent>,
    ) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Start) => self.handle_start().await,
                    Some(Command::Stop) => self.handle_stop().await,
                    Some(Command::Send(payload)) => self.push_payload(payload).await,
                    None => break,
                },
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev).await,
                    None => break,
                },
                _ = tick.tick(), if !self.subscribers.is_empty() => {
                    let payload = self.provider.next_payload();
                    self.push_payload(payload).await;
                }
            }
            if self.reset_tick {
                // 首个订阅者出现时从整周期重新计时
                tick.reset();
                self.reset_tick = false;
            }
        }
    }

    async fn handle_start(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.sink.on_event(SessionEvent::ConfigurationStarted);
        match self.radio {
            RadioState::PoweredOn => {
                self.set_state(SessionState::RadioReady);
                self.register().await;
            }
            _ => self.set_state(SessionState::WaitingForRadio),
        }
    }

    async fn handle_stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.subscribers.clear();
        if self.advertising {
            if let Err(e) = self.adapter.stop_advertising().await {
                warn!("failed to stop advertising: {e}");
            }
            self.advertising = false;
        }
        if self.registered {
            if let Err(e) = self.adapter.unregister_service().await {
                warn!("failed to unregister service: {e}");
            }
            self.registered = false;
        }
        self.set_state(SessionState::Idle);
        self.sink.on_event(SessionEvent::AdvertisingStopped);
    }

    async fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::RadioState(state) => {
                self.radio = state;
                match state {
                    RadioState::PoweredOn => {
                        if self.active && !self.registered {
                            self.set_state(SessionState::RadioReady);
                            self.register().await;
                        }
                    }
                    RadioState::PoweredOff => {
                        // 协议栈状态随掉电丢失；开机后重走注册→广播
                        self.registered = false;
                        self.advertising = false;
                        self.subscribers.clear();
                        if self.active {
                            self.set_state(SessionState::WaitingForRadio);
                        }
                    }
                    RadioState::Unknown => {}
                }
            }
            PeripheralEvent::ServiceRegistered { service_id } => {
                if !self.active {
                    return;
                }
                debug!(%service_id, "service registered");
                self.registered = true;
                self.set_state(SessionState::ServiceRegistered);
                // 注册确认在手，现在才允许请求广播
                if let Err(e) = self
                    .adapter
                    .start_advertising(&self.config.local_name, service_id)
                    .await
                {
                    self.fail(SessionError::from(&e));
                }
            }
            PeripheralEvent::RegistrationFailed { reason } => {
                if self.active {
                    self.fail(SessionError::Adapter(reason));
                }
            }
            PeripheralEvent::AdvertisingStarted => {
                if self.active {
                    self.advertising = true;
                    info!(local_name = %self.config.local_name, "peripheral advertising started");
                    self.set_state(SessionState::Advertising);
                    self.sink.on_event(SessionEvent::AdvertisingStarted);
                }
            }
            PeripheralEvent::SubscriptionChanged {
                subscriber,
                characteristic_id,
                subscribed,
            } => {
                if characteristic_id != self.config.descriptor.characteristic_id {
                    return;
                }
                if subscribed {
                    info!(%subscriber, "central subscribed");
                    if self.subscribers.is_empty() {
                        self.reset_tick = true;
                    }
                    if !self.subscribers.contains(&subscriber) {
                        self.subscribers.push(subscriber);
                    }
                    self.set_state(SessionState::Subscribed);
                } else {
                    debug!(%subscriber, "central unsubscribed");
                    self.subscribers.retain(|s| *s != subscriber);
                    if self.subscribers.is_empty() && self.advertising {
                        self.set_state(SessionState::Advertising);
                    }
                }
            }
            PeripheralEvent::WriteRequests(requests) => {
                self.handle_writes(requests).await;
            }
        }
    }

    async fn handle_writes(&mut self, requests: Vec<WriteRequest>) {
        for request in requests {
            if request.characteristic_id != self.config.descriptor.characteristic_id {
                // 不属于本服务的请求交由适配器默认处理
                continue;
            }
            if request.offset > request.value.len() {
                debug!(
                    request_id = request.request_id,
                    offset = request.offset,
                    "write offset out of range"
                );
                if let Err(e) = self
                    .adapter
                    .respond_write(request.request_id, WriteResult::InvalidOffset)
                    .await
                {
                    warn!("failed to acknowledge invalid-offset write: {e}");
                }
                continue;
            }
            match codec::decode(&request.value) {
                Ok(payload) => {
                    if let Err(e) = self
                        .adapter
                        .respond_write(request.request_id, WriteResult::Success)
                        .await
                    {
                        warn!("failed to acknowledge write: {e}");
                    }
                    self.sink.on_event(SessionEvent::DataReceived { payload });
                }
                Err(e) => {
                    // 静默丢弃畸形写入，会话继续
                    debug!(request_id = request.request_id, "dropping malformed write: {e}");
                }
            }
        }
    }

    async fn push_payload(&mut self, payload: Payload) {
        if self.subscribers.is_empty() {
            return;
        }
        let bytes = match codec::encode(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("payload encode failed, dropping tick: {e}");
                return;
            }
        };
        for subscriber in &self.subscribers {
            match self.adapter.notify_subscriber(subscriber, &bytes).await {
                Ok(()) => self.sink.on_event(SessionEvent::DataSent),
                Err(e) => warn!(%subscriber, "notify failed: {e}"),
            }
        }
    }

    async fn register(&mut self) {
        if let Err(e) = self.adapter.register_service(&self.config.descriptor).await {
            self.fail(SessionError::from(&e));
        }
    }

    fn fail(&mut self, error: SessionError) {
        warn!("peripheral session failed: {error}");
        self.active = false;
        self.set_state(SessionState::Failed(error.clone()));
        self.sink.on_event(SessionEvent::SessionFailed { error });
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }
}
