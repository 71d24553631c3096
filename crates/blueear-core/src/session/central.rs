//! GATT central 角色（server central）
//!
//! 扫描广播已知服务的 peripheral，自动连接、订阅并交换键值 payload。
//!
//! 状态机: Idle → RadioReady → Scanning → Discovered → Connecting →
//! ServiceDiscovery → CharacteristicDiscovery → Subscribed →
//! (Connected|Disconnected|Failed)。
//!
//! 每个见过的对端都有一条 PeerRecord，按 peer id 键入、会话存续期内
//! 不删除：把"为防止底层栈释放而保留强引用"的意图改成显式的所有权
//! 表（best-effort 缓存，不做淘汰）。radio 重新开机时先走一遍缓存
//! 尝试恢复既有关系，然后才重新扫描。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{CentralAdapter, CentralEvent, CharacteristicState, PeerId, RadioState};
use crate::codec::{self, Payload};
use crate::error::SessionError;
use crate::event::{EventSink, SessionEvent};
use crate::identity::ServiceDescriptor;
use crate::session::SessionState;

/// 对端连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

/// 一个见过的对端；发现时创建，连接/断开时更新，会话存续期内不删除
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub display_name: Option<String>,
    pub connection_state: ConnectionState,
    /// 已发现的服务列表；None 表示尚未发现
    pub services: Option<Vec<uuid::Uuid>>,
    /// 目标服务下已发现的特征；None 表示尚未发现
    pub characteristics: Option<Vec<CharacteristicState>>,
}

impl PeerRecord {
    fn new(peer_id: PeerId, display_name: Option<String>) -> Self {
        Self {
            peer_id,
            display_name,
            connection_state: ConnectionState::Discovered,
            services: None,
            characteristics: None,
        }
    }
}

enum Command {
    Start,
    Stop,
    Write(Payload),
}

/// GATT central 会话
pub struct CentralSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl CentralSession {
    pub fn spawn(
        adapter: Arc<dyn CentralAdapter>,
        events: mpsc::Receiver<CentralEvent>,
        descriptor: ServiceDescriptor,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let actor = Actor {
            adapter,
            descriptor,
            sink,
            state: state_tx,
            radio: RadioState::Unknown,
            active: false,
            scanning: false,
            peers: HashMap::new(),
            current: None,
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

    /// 断开被跟踪的对端、停止扫描并释放会话
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// 把 payload 写到当前连接对端的特征上
    pub fn write_payload(&self, payload: Payload) {
        let _ = self.commands.send(Command::Write(payload));
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl Drop for CentralSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum ResumeAction {
    Subscribe(PeerId),
    DiscoverCharacteristics(PeerId),
    DiscoverServices(PeerId),
}

struct Actor {
    adapter: Arc<dyn CentralAdapter>,
    descriptor: ServiceDescriptor,
    sink: Arc<dyn EventSink>,
    state: watch::Sender<SessionState>,
    radio: RadioState,
    active: bool,
    scanning: bool,
    peers: HashMap<PeerId, PeerRecord>,
    /// 当前跟踪的对端
    current: Option<PeerId>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<CentralEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Start) => self.handle_start().await,
                    Some(Command::Stop) => self.handle_stop().await,
                    Some(Command::Write(payload)) => self.handle_write(payload).await,
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
        if self.active {
            return;
        }
        self.active = true;
        self.sink.on_event(SessionEvent::ConfigurationStarted);
        if self.radio == RadioState::PoweredOn {
            self.on_power_on().await;
        }
    }

    async fn handle_stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(peer_id) = self.current {
            if let Err(e) = self.adapter.disconnect(peer_id).await {
                debug!(%peer_id, "disconnect on stop failed: {e}");
            }
            let name = self.display_name(peer_id);
            self.sink.on_event(SessionEvent::PeerDisconnected { name });
        }
        if self.scanning {
            if let Err(e) = self.adapter.stop_scan().await {
                warn!("failed to stop scan: {e}");
            }
            self.scanning = false;
        }
        self.set_state(SessionState::Idle);
    }

    async fn handle_write(&mut self, payload: Payload) {
        let Some(peer_id) = self.current else {
            warn!("write requested without a tracked peer");
            return;
        };
        let bytes = match codec::encode(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("payload encode failed, dropping write: {e}");
                return;
            }
        };
        match self
            .adapter
            .write_value(peer_id, self.descriptor.characteristic_id, &bytes)
            .await
        {
            Ok(()) => self.sink.on_event(SessionEvent::DataSent),
            Err(e) => warn!(%peer_id, "write failed: {e}"),
        }
    }

    async fn handle_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::RadioState(state) => {
                self.radio = state;
                match state {
                    RadioState::PoweredOn => {
                        if self.active && !self.scanning {
                            self.on_power_on().await;
                        }
                    }
                    RadioState::PoweredOff => {
                        self.scanning = false;
                        if self.active {
                            self.set_state(SessionState::WaitingForRadio);
                        }
                    }
                    RadioState::Unknown => {}
                }
            }
            CentralEvent::PeerDiscovered {
                peer_id,
                name,
                rssi,
            } => {
                if !self.active {
                    return;
                }
                debug!(%peer_id, ?name, ?rssi, "peer discovered");
                let record = self
                    .peers
                    .entry(peer_id)
                    .or_insert_with(|| PeerRecord::new(peer_id, name.clone()));
                if name.is_some() {
                    record.display_name = name;
                }
                match record.connection_state {
                    // 已在连或已连上就不再重复发起
                    ConnectionState::Connecting | ConnectionState::Connected => return,
                    _ => record.connection_state = ConnectionState::Connecting,
                }
                // 保留强引用（所有权表），随后立即自动连接，无确认步骤
                self.current = Some(peer_id);
                self.set_state(SessionState::Discovered);
                if let Err(e) = self.adapter.connect(peer_id).await {
                    warn!(%peer_id, "connect request failed: {e}");
                    self.mark_peer(peer_id, ConnectionState::Disconnected);
                    self.sink.on_event(SessionEvent::ConnectionFailed);
                    return;
                }
                self.set_state(SessionState::Connecting);
            }
            CentralEvent::PeerConnected { peer_id } => {
                if !self.active {
                    return;
                }
                self.mark_peer(peer_id, ConnectionState::Connected);
                let name = self.display_name(peer_id);
                info!(%peer_id, ?name, "peer connected");
                self.sink.on_event(SessionEvent::PeerConnected { name });
                if let Err(e) = self
                    .adapter
                    .discover_services(peer_id, self.descriptor.service_id)
                    .await
                {
                    warn!(%peer_id, "service discovery request failed: {e}");
                    return;
                }
                self.set_state(SessionState::ServiceDiscovery);
            }
            CentralEvent::ConnectFailed { peer_id, reason } => {
                if !self.active {
                    return;
                }
                warn!(%peer_id, %reason, "connect failed");
                self.mark_peer(peer_id, ConnectionState::Disconnected);
                // 不自动重试；重试策略属于外部调用方
                self.sink.on_event(SessionEvent::ConnectionFailed);
                if self.scanning {
                    self.set_state(SessionState::Scanning);
                }
            }
            CentralEvent::PeerDisconnected { peer_id } => {
                self.mark_peer(peer_id, ConnectionState::Disconnected);
                let name = self.display_name(peer_id);
                info!(%peer_id, ?name, "peer disconnected");
                self.sink.on_event(SessionEvent::PeerDisconnected { name });
                if self.active {
                    // PeerRecord 保留，可重新扫描再附着
                    self.set_state(SessionState::Disconnected);
                }
            }
            CentralEvent::ServicesDiscovered { peer_id, services } => {
                if let Some(record) = self.peers.get_mut(&peer_id) {
                    record.services = Some(services.clone());
                }
                if !self.active || !services.contains(&self.descriptor.service_id) {
                    return;
                }
                if let Err(e) = self
                    .adapter
                    .discover_characteristics(
                        peer_id,
                        self.descriptor.service_id,
                        self.descriptor.characteristic_id,
                    )
                    .await
                {
                    warn!(%peer_id, "characteristic discovery request failed: {e}");
                    return;
                }
                self.set_state(SessionState::CharacteristicDiscovery);
            }
            CentralEvent::CharacteristicsDiscovered {
                peer_id,
                service_id,
                characteristics,
            } => {
                if service_id != self.descriptor.service_id {
                    return;
                }
                let target = self.descriptor.characteristic_id;
                let found = characteristics
                    .iter()
                    .any(|c| c.characteristic_id == target);
                if let Some(record) = self.peers.get_mut(&peer_id) {
                    record.characteristics = Some(characteristics);
                }
                if !self.active || !found {
                    return;
                }
                self.subscribe(peer_id).await;
            }
            CentralEvent::ValueUpdated {
                peer_id,
                characteristic_id,
                value,
            } => {
                if characteristic_id != self.descriptor.characteristic_id {
                    return;
                }
                match codec::decode(&value) {
                    Ok(payload) => {
                        debug!(%peer_id, "value update decoded, {} pair(s)", payload.len());
                        self.set_state(SessionState::Connected);
                        self.sink.on_event(SessionEvent::DataReceived { payload });
                    }
                    Err(e) => {
                        // 畸形更新丢弃，会话继续
                        warn!(%peer_id, "dropping malformed value update: {e}");
                    }
                }
            }
        }
    }

    /// radio 开机：先走一遍保留的 PeerRecord 缓存恢复既有关系，
    /// 然后才发起新一轮扫描
    async fn on_power_on(&mut self) {
        self.set_state(SessionState::RadioReady);
        self.resume_known_peers().await;
        self.sink.on_event(SessionEvent::ScanningStarted);
        match self.adapter.start_scan(self.descriptor.service_id).await {
            Ok(()) => {
                self.scanning = true;
                self.set_state(SessionState::Scanning);
            }
            Err(e) => {
                self.fail(SessionError::from(&e));
            }
        }
    }

    async fn resume_known_peers(&mut self) {
        let actions: Vec<ResumeAction> = self
            .peers
            .values()
            .map(|record| {
                let peer_id = record.peer_id;
                match &record.services {
                    Some(services) if services.contains(&self.descriptor.service_id) => {
                        match &record.characteristics {
                            Some(chars) => {
                                match chars
                                    .iter()
                                    .find(|c| c.characteristic_id == self.descriptor.characteristic_id)
                                {
                                    // 服务与特征都在缓存里且未在通知：直接订阅，
                                    // 不必从零重跑发现
                                    Some(c) if !c.notifying => ResumeAction::Subscribe(peer_id),
                                    Some(_) => ResumeAction::DiscoverCharacteristics(peer_id),
                                    None => ResumeAction::DiscoverCharacteristics(peer_id),
                                }
                            }
                            None => ResumeAction::DiscoverCharacteristics(peer_id),
                        }
                    }
                    // 服务列表缺失或过期：重跑服务发现
                    _ => ResumeAction::DiscoverServices(peer_id),
                }
            })
            .collect();

        for action in actions {
            match action {
                ResumeAction::Subscribe(peer_id) => {
                    debug!(%peer_id, "resuming known peer: subscribe");
                    self.subscribe(peer_id).await;
                }
                ResumeAction::DiscoverCharacteristics(peer_id) => {
                    debug!(%peer_id, "resuming known peer: characteristic discovery");
                    if let Err(e) = self
                        .adapter
                        .discover_characteristics(
                            peer_id,
                            self.descriptor.service_id,
                            self.descriptor.characteristic_id,
                        )
                        .await
                    {
                        debug!(%peer_id, "resume discovery failed: {e}");
                    }
                }
                ResumeAction::DiscoverServices(peer_id) => {
                    debug!(%peer_id, "resuming known peer: service discovery");
                    if let Err(e) = self
                        .adapter
                        .discover_services(peer_id, self.descriptor.service_id)
                        .await
                    {
                        debug!(%peer_id, "resume discovery failed: {e}");
                    }
                }
            }
        }
    }

    async fn subscribe(&mut self, peer_id: PeerId) {
        match self
            .adapter
            .subscribe(peer_id, self.descriptor.characteristic_id)
            .await
        {
            Ok(()) => {
                if let Some(record) = self.peers.get_mut(&peer_id) {
                    if let Some(chars) = record.characteristics.as_mut() {
                        for c in chars.iter_mut() {
                            if c.characteristic_id == self.descriptor.characteristic_id {
                                c.notifying = true;
                            }
                        }
                    }
                }
                self.set_state(SessionState::Subscribed);
            }
            Err(e) => {
                warn!(%peer_id, "subscribe failed: {e}");
            }
        }
    }

    fn mark_peer(&mut self, peer_id: PeerId, state: ConnectionState) {
        if let Some(record) = self.peers.get_mut(&peer_id) {
            record.connection_state = state;
        }
    }

    fn display_name(&self, peer_id: PeerId) -> Option<String> {
        self.peers
            .get(&peer_id)
            .and_then(|r| r.display_name.clone())
    }

    fn fail(&mut self, error: SessionError) {
        warn!("central session failed: {error}");
        self.set_state(SessionState::Failed(error.clone()));
        self.sink.on_event(SessionEvent::SessionFailed { error });
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }
}
