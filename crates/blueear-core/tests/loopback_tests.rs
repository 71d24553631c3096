//! 端到端回环测试
//!
//! 用一对互联的 mock 适配器把 peripheral 会话和 central 会话接成
//! 回环：peripheral 的 notify 变成 central 的 value update，central
//! 的 write 变成 peripheral 的写请求。验证完整链路：注册 → 广播 →
//! 扫描 → 发现 → 连接 → 服务/特征发现 → 订阅 → 双向数据交换。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use blueear_core::{
    AdapterError, CentralAdapter, CentralEvent, CentralSession, ChannelSink, CharacteristicState,
    Payload, PeerId, PeripheralAdapter, PeripheralConfig, PeripheralEvent, PeripheralSession,
    RadioState, SequenceProvider, ServiceDescriptor, SessionEvent, SessionState, SubscriberId,
    WriteRequest, WriteResult,
};
use uuid::Uuid;

/// 两侧适配器共享的链路状态
struct Bus {
    descriptor: ServiceDescriptor,
    peripheral_advertising: bool,
    central_scanning: bool,
    peer_delivered: bool,
    next_request_id: u64,
}

struct Loopback {
    bus: Mutex<Bus>,
    peer_id: PeerId,
    subscriber: SubscriberId,
    local_name: Mutex<String>,
    peripheral_events: mpsc::Sender<PeripheralEvent>,
    central_events: mpsc::Sender<CentralEvent>,
    acks: mpsc::UnboundedSender<(u64, WriteResult)>,
}

impl Loopback {
    fn deliver_discovery_locked(&self, bus: &Bus) -> bool {
        bus.peripheral_advertising && bus.central_scanning && !bus.peer_delivered
    }

    fn maybe_discover(&self) {
        let mut bus = self.bus.lock().unwrap();
        if self.deliver_discovery_locked(&bus) {
            bus.peer_delivered = true;
            let name = self.local_name.lock().unwrap().clone();
            let _ = self.central_events.try_send(CentralEvent::PeerDiscovered {
                peer_id: self.peer_id,
                name: Some(name),
                rssi: Some(-52),
            });
        }
    }
}

struct LoopbackPeripheral(Arc<Loopback>);
struct LoopbackCentral(Arc<Loopback>);

#[async_trait]
impl PeripheralAdapter for LoopbackPeripheral {
    async fn register_service(&self, descriptor: &ServiceDescriptor) -> Result<(), AdapterError> {
        let _ = self
            .0
            .peripheral_events
            .try_send(PeripheralEvent::ServiceRegistered {
                service_id: descriptor.service_id,
            });
        Ok(())
    }

    async fn unregister_service(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn start_advertising(
        &self,
        local_name: &str,
        _service_id: Uuid,
    ) -> Result<(), AdapterError> {
        *self.0.local_name.lock().unwrap() = local_name.to_string();
        self.0.bus.lock().unwrap().peripheral_advertising = true;
        let _ = self
            .0
            .peripheral_events
            .try_send(PeripheralEvent::AdvertisingStarted);
        self.0.maybe_discover();
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        self.0.bus.lock().unwrap().peripheral_advertising = false;
        Ok(())
    }

    async fn notify_subscriber(
        &self,
        _subscriber: &SubscriberId,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let characteristic_id = self.0.bus.lock().unwrap().descriptor.characteristic_id;
        let _ = self.0.central_events.try_send(CentralEvent::ValueUpdated {
            peer_id: self.0.peer_id,
            characteristic_id,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn respond_write(
        &self,
        request_id: u64,
        result: WriteResult,
    ) -> Result<(), AdapterError> {
        let _ = self.0.acks.send((request_id, result));
        Ok(())
    }
}

#[async_trait]
impl CentralAdapter for LoopbackCentral {
    async fn start_scan(&self, _service_id: Uuid) -> Result<(), AdapterError> {
        self.0.bus.lock().unwrap().central_scanning = true;
        self.0.maybe_discover();
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.0.bus.lock().unwrap().central_scanning = false;
        Ok(())
    }

    async fn connect(&self, peer_id: PeerId) -> Result<(), AdapterError> {
        let _ = self
            .0
            .central_events
            .try_send(CentralEvent::PeerConnected { peer_id });
        Ok(())
    }

    async fn disconnect(&self, peer_id: PeerId) -> Result<(), AdapterError> {
        let _ = self
            .0
            .central_events
            .try_send(CentralEvent::PeerDisconnected { peer_id });
        Ok(())
    }

    async fn discover_services(
        &self,
        peer_id: PeerId,
        service_id: Uuid,
    ) -> Result<(), AdapterError> {
        let _ = self
            .0
            .central_events
            .try_send(CentralEvent::ServicesDiscovered {
                peer_id,
                services: vec![service_id],
            });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peer_id: PeerId,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<(), AdapterError> {
        let _ = self
            .0
            .central_events
            .try_send(CentralEvent::CharacteristicsDiscovered {
                peer_id,
                service_id,
                characteristics: vec![CharacteristicState {
                    characteristic_id,
                    notifying: false,
                }],
            });
        Ok(())
    }

    async fn subscribe(
        &self,
        _peer_id: PeerId,
        characteristic_id: Uuid,
    ) -> Result<(), AdapterError> {
        let subscriber = self.0.subscriber;
        let _ = self
            .0
            .peripheral_events
            .try_send(PeripheralEvent::SubscriptionChanged {
                subscriber,
                characteristic_id,
                subscribed: true,
            });
        Ok(())
    }

    async fn write_value(
        &self,
        _peer_id: PeerId,
        characteristic_id: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let request_id = {
            let mut bus = self.0.bus.lock().unwrap();
            bus.next_request_id += 1;
            bus.next_request_id
        };
        let _ = self
            .0
            .peripheral_events
            .try_send(PeripheralEvent::WriteRequests(vec![WriteRequest {
                request_id,
                characteristic_id,
                value: value.to_vec(),
                offset: 0,
            }]));
        Ok(())
    }
}

struct Link {
    peripheral: PeripheralSession,
    central: CentralSession,
    peripheral_sink: mpsc::Receiver<SessionEvent>,
    central_sink: mpsc::Receiver<SessionEvent>,
    peripheral_power: mpsc::Sender<PeripheralEvent>,
    central_power: mpsc::Sender<CentralEvent>,
    acks: mpsc::UnboundedReceiver<(u64, WriteResult)>,
}

fn link_up(tick: Duration, items: Vec<Payload>) -> Link {
    let (peripheral_tx, peripheral_rx) = mpsc::channel(64);
    let (central_tx, central_rx) = mpsc::channel(64);
    let (acks_tx, acks_rx) = mpsc::unbounded_channel();
    let descriptor = ServiceDescriptor::default();

    let loopback = Arc::new(Loopback {
        bus: Mutex::new(Bus {
            descriptor: descriptor.clone(),
            peripheral_advertising: false,
            central_scanning: false,
            peer_delivered: false,
            next_request_id: 0,
        }),
        peer_id: PeerId(Uuid::new_v4()),
        subscriber: SubscriberId(Uuid::new_v4()),
        local_name: Mutex::new(String::new()),
        peripheral_events: peripheral_tx.clone(),
        central_events: central_tx.clone(),
        acks: acks_tx,
    });

    let (peripheral_sink, peripheral_sink_rx) = ChannelSink::new(64);
    let peripheral = PeripheralSession::spawn(
        Arc::new(LoopbackPeripheral(loopback.clone())),
        peripheral_rx,
        PeripheralConfig {
            descriptor: descriptor.clone(),
            local_name: "loopback-peripheral".to_string(),
            tick_interval: tick,
        },
        Box::new(SequenceProvider::new(items)),
        Arc::new(peripheral_sink),
    );

    let (central_sink, central_sink_rx) = ChannelSink::new(64);
    let central = CentralSession::spawn(
        Arc::new(LoopbackCentral(loopback)),
        central_rx,
        descriptor,
        Arc::new(central_sink),
    );

    Link {
        peripheral,
        central,
        peripheral_sink: peripheral_sink_rx,
        central_sink: central_sink_rx,
        peripheral_power: peripheral_tx,
        central_power: central_tx,
        acks: acks_rx,
    }
}

/// 在事件流里等到下一个 DataReceived
async fn wait_for_data(rx: &mut mpsc::Receiver<SessionEvent>) -> Payload {
    timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await.expect("sink closed") {
                SessionEvent::DataReceived { payload } => return payload,
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for data")
}

#[tokio::test]
async fn peripheral_push_reaches_central_within_one_tick() {
    let lat = Payload::from_pairs([("lat", "55.67")]);
    let mut link = link_up(Duration::from_millis(100), vec![lat.clone()]);

    link.peripheral.start();
    link.central.start();
    link.peripheral_power
        .send(PeripheralEvent::RadioState(RadioState::PoweredOn))
        .await
        .unwrap();
    link.central_power
        .send(CentralEvent::RadioState(RadioState::PoweredOn))
        .await
        .unwrap();

    // 完整链路建立后，一个 tick 内送达
    let received = wait_for_data(&mut link.central_sink).await;
    assert_eq!(received, lat);
}

#[tokio::test]
async fn central_write_is_received_and_acked_by_peripheral() {
    // 长 tick：本测试只关心写路径
    let mut link = link_up(Duration::from_secs(120), Vec::new());

    link.peripheral.start();
    link.central.start();
    link.peripheral_power
        .send(PeripheralEvent::RadioState(RadioState::PoweredOn))
        .await
        .unwrap();
    link.central_power
        .send(CentralEvent::RadioState(RadioState::PoweredOn))
        .await
        .unwrap();

    // 等 central 建好订阅再写
    let mut state = link.central.watch_state();
    timeout(Duration::from_secs(10), async {
        loop {
            if *state.borrow() == SessionState::Subscribed {
                break;
            }
            state.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("central never subscribed");

    let ping = Payload::from_pairs([("cmd", "ping")]);
    link.central.write_payload(ping.clone());

    let received = wait_for_data(&mut link.peripheral_sink).await;
    assert_eq!(received, ping);

    let (_, result) = timeout(Duration::from_secs(10), link.acks.recv())
        .await
        .expect("timed out waiting for ack")
        .expect("ack channel closed");
    assert_eq!(result, WriteResult::Success);
}
