//! iBeacon 观察角色
//!
//! 监测广播端的 region 并上报测距结果。
//!
//! `start()` 先向环境请求定位/区域授权：被拒则会话进入
//! `Failed(PermissionDenied)`，不再有任何动作；获准则请求区域监测
//! 与测距。每次非空测距回调只取**第一个**条目上报——核心不对适配器
//! 返回的顺序做重排，这是沿袭下来的有意简化，不是顺序保证。空结果
//! 不产生事件。释放会话即取消监测/测距。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{Authorization, BeaconRanger, RangingEvent};
use crate::error::SessionError;
use crate::event::{EventSink, SessionEvent};
use crate::identity::BeaconIdentity;
use crate::session::SessionState;

enum Command {
    Start,
    Stop,
}

/// iBeacon 观察会话
pub struct ObserverSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl ObserverSession {
    pub fn spawn(
        ranger: Arc<dyn BeaconRanger>,
        events: mpsc::Receiver<RangingEvent>,
        identity: BeaconIdentity,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let actor = Actor {
            ranger,
            identity,
            sink,
            state: state_tx,
            ranging: false,
            failed: false,
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

    /// 与 teardown 等价：取消监测/测距
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

impl Drop for ObserverSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Actor {
    ranger: Arc<dyn BeaconRanger>,
    identity: BeaconIdentity,
    sink: Arc<dyn EventSink>,
    state: watch::Sender<SessionState>,
    ranging: bool,
    failed: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<RangingEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Start) => self.handle_start().await,
                    Some(Command::Stop) => self.handle_stop().await,
                    None => break,
                },
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => break,
                },
            }
        }
    }

    async fn handle_start(&mut self) {
        if self.ranging || self.failed {
            return;
        }
        match self.ranger.request_authorization().await {
            Ok(Authorization::Granted) => {
                if let Err(e) = self.ranger.start_monitoring(&self.identity).await {
                    self.fail(SessionError::from(&e));
                    return;
                }
                if let Err(e) = self.ranger.start_ranging(&self.identity).await {
                    self.fail(SessionError::from(&e));
                    return;
                }
                self.ranging = true;
                info!(region = %self.identity.region_id, "beacon ranging started");
                self.set_state(SessionState::Scanning);
                self.sink.on_event(SessionEvent::ScanningStarted);
            }
            Ok(Authorization::Denied) => {
                warn!("location authorization denied");
                self.fail(SessionError::PermissionDenied);
            }
            Err(e) => {
                self.fail(SessionError::from(&e));
            }
        }
    }

    async fn handle_stop(&mut self) {
        if self.ranging {
            if let Err(e) = self.ranger.stop_ranging().await {
                warn!("failed to cancel ranging: {e}");
            }
            self.ranging = false;
        }
        self.set_state(SessionState::Idle);
    }

    fn handle_event(&mut self, event: RangingEvent) {
        match event {
            RangingEvent::Ranged(beacons) => {
                // 空批次不产生事件；非空只取适配器给出的第一个条目
                let Some(first) = beacons.into_iter().next() else {
                    debug!("ranging callback delivered no beacons");
                    return;
                };
                self.sink.on_event(SessionEvent::RangedBeacon(first));
            }
        }
    }

    fn fail(&mut self, error: SessionError) {
        self.failed = true;
        self.set_state(SessionState::Failed(error.clone()));
        self.sink.on_event(SessionEvent::SessionFailed { error });
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }
}
