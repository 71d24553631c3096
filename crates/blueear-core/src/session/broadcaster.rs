//! iBeacon 广播角色
//!
//! 以固定 BeaconIdentity 广播 iBeacon。只广播，不回读任何数据。
//!
//! 生命周期:
//! - `start()`：已在广播则先完全释放旧广播再重新获取（幂等重启）。
//!   radio 开机确认后 Idle → Advertising；radio 关机则驻留
//!   `WaitingForRadio`，开机信号到来时自动恢复。
//! - `stop()`：停止广播并释放身份数据，回到 Idle；重复 stop 是 no-op。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{BeaconAdvertiser, BeaconEvent, RadioState};
use crate::error::SessionError;
use crate::event::{EventSink, SessionEvent};
use crate::identity::BeaconIdentity;
use crate::session::SessionState;

enum Command {
    Start,
    Stop,
}

/// iBeacon 广播会话
pub struct BroadcasterSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl BroadcasterSession {
    /// 构造会话并启动其 actor 任务。适配器事件接收端在此移交，
    /// 同一适配器不得再交给其他会话。
    pub fn spawn(
        adapter: Arc<dyn BeaconAdvertiser>,
        events: mpsc::Receiver<BeaconEvent>,
        identity: BeaconIdentity,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let actor = Actor {
            adapter,
            identity,
            sink,
            state: state_tx,
            radio: RadioState::Unknown,
            active: false,
            advertising: false,
        };
        let task = tokio::spawn(actor.run(cmd_rx, events));
        Self {
            commands: cmd_tx,
            state: state_rx,
            task,
        }
    }

    /// 立即返回；广播开始经 `SessionEvent::AdvertisingStarted` 观察
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl Drop for BroadcasterSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Actor {
    adapter: Arc<dyn BeaconAdvertiser>,
    identity: BeaconIdentity,
    sink: Arc<dyn EventSink>,
    state: watch::Sender<SessionState>,
    radio: RadioState,
    /// start() 过且尚未 stop()
    active: bool,
    /// 适配器已确认广播中
    advertising: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<BeaconEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Start) => self.handle_start().await,
                    Some(Command::Stop) => self.handle_stop().await,
                    None => break,
                },
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_start(&mut self) {
        // 幂等重启：先完全释放上一次的广播，再重新获取
        if self.advertising {
            debug!("restart requested, releasing previous advertisement");
            if let Err(e) = self.adapter.stop_advertising().await {
                warn!("failed to release previous advertisement: {e}");
            }
            self.advertising = false;
        }
        self.active = true;
        match self.radio {
            RadioState::PoweredOn => self.begin_advertising().await,
            _ => self.set_state(SessionState::WaitingForRadio),
        }
    }

    async fn handle_stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if self.advertising {
            if let Err(e) = self.adapter.stop_advertising().await {
                warn!("failed to stop advertising: {e}");
            }
            self.advertising = false;
        }
        self.set_state(SessionState::Idle);
        self.sink.on_event(SessionEvent::AdvertisingStopped);
    }

    async fn handle_event(&mut self, event: BeaconEvent) {
        match event {
            BeaconEvent::RadioState(state) => {
                self.radio = state;
                match state {
                    RadioState::PoweredOn => {
                        if self.active && !self.advertising {
                            self.begin_advertising().await;
                        }
                    }
                    RadioState::PoweredOff => {
                        // 广播途中掉电：隐式 stop，驻留等待开机恢复
                        if self.advertising {
                            if let Err(e) = self.adapter.stop_advertising().await {
                                debug!("stop after power-off failed: {e}");
                            }
                            self.advertising = false;
                        }
                        if self.active {
                            self.set_state(SessionState::WaitingForRadio);
                        }
                    }
                    RadioState::Unknown => {}
                }
            }
            BeaconEvent::AdvertisingStarted => {
                if self.active {
                    self.advertising = true;
                    info!(label = %self.identity.label, "beacon advertising started");
                    self.set_state(SessionState::Advertising);
                    self.sink.on_event(SessionEvent::AdvertisingStarted);
                }
            }
        }
    }

    async fn begin_advertising(&mut self) {
        if let Err(e) = self.adapter.start_advertising(&self.identity).await {
            warn!("failed to start beacon advertising: {e}");
            let error = SessionError::from(&e);
            self.set_state(SessionState::Failed(error.clone()));
            self.sink.on_event(SessionEvent::SessionFailed { error });
        }
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }
}
