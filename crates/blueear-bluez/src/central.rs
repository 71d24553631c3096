//! btleplug GATT central 适配器
//!
//! 扫描、连接、服务/特征发现、订阅与写入。btleplug 的事件流被桥接
//! 成 blueear-core 的 CentralEvent；平台侧 PeripheralId 映射到稳定的
//! PeerId，平台 peripheral 对象保留在表里防止被底层释放。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent as BtlEvent, CentralState, Characteristic, Manager as _, Peripheral,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use blueear_core::{
    AdapterError, CentralAdapter, CentralEvent, CharacteristicState, PeerId, RadioState,
};

fn btl(e: btleplug::Error) -> AdapterError {
    AdapterError::Backend(e.to_string())
}

#[derive(Default)]
struct PeerTable {
    by_peer: HashMap<PeerId, PlatformPeripheral>,
    by_platform: HashMap<PeripheralId, PeerId>,
}

type Peers = Arc<StdMutex<PeerTable>>;

/// btleplug central 适配器
pub struct BtleplugCentralAdapter {
    adapter: Adapter,
    events: mpsc::Sender<CentralEvent>,
    peers: Peers,
    /// 本适配器发起过的订阅，(peer, characteristic)
    subscriptions: Arc<StdMutex<HashSet<(PeerId, Uuid)>>>,
    /// 已有通知泵的对端
    pumped: StdMutex<HashSet<PeerId>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl BtleplugCentralAdapter {
    pub async fn new() -> anyhow::Result<(Arc<Self>, mpsc::Receiver<CentralEvent>)> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no Bluetooth adapters found"))?;

        let (tx, rx) = mpsc::channel(64);
        let peers: Peers = Arc::new(StdMutex::new(PeerTable::default()));

        let event_task = tokio::spawn(pump_events(adapter.clone(), tx.clone(), peers.clone()));

        Ok((
            Arc::new(Self {
                adapter,
                events: tx,
                peers,
                subscriptions: Arc::new(StdMutex::new(HashSet::new())),
                pumped: StdMutex::new(HashSet::new()),
                tasks: StdMutex::new(vec![event_task]),
            }),
            rx,
        ))
    }

    fn peripheral(&self, peer_id: PeerId) -> Result<PlatformPeripheral, AdapterError> {
        self.peers
            .lock()
            .expect("peer table lock")
            .by_peer
            .get(&peer_id)
            .cloned()
            .ok_or(AdapterError::PeerNotFound)
    }

    /// 每个对端只起一个通知泵
    fn spawn_notification_pump(&self, peer_id: PeerId, peripheral: &PlatformPeripheral) {
        {
            let mut pumped = self.pumped.lock().expect("pumped lock");
            if !pumped.insert(peer_id) {
                return;
            }
        }
        let peripheral = peripheral.clone();
        let tx = self.events.clone();
        let task = tokio::spawn(async move {
            let mut stream = match peripheral.notifications().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%peer_id, "failed to open notification stream: {e}");
                    return;
                }
            };
            while let Some(notification) = stream.next().await {
                let event = CentralEvent::ValueUpdated {
                    peer_id,
                    characteristic_id: notification.uuid,
                    value: notification.value,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.tasks.lock().expect("tasks lock").push(task);
    }
}

impl Drop for BtleplugCentralAdapter {
    fn drop(&mut self) {
        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl CentralAdapter for BtleplugCentralAdapter {
    async fn start_scan(&self, service_id: Uuid) -> Result<(), AdapterError> {
        debug!(%service_id, "starting filtered scan");
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service_id],
            })
            .await
            .map_err(btl)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.adapter.stop_scan().await.map_err(btl)
    }

    async fn connect(&self, peer_id: PeerId) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peer_id)?;
        let tx = self.events.clone();
        // 连接结果异步送达：成功走事件流的 DeviceConnected，
        // 失败在这里折算成 ConnectFailed
        let task = tokio::spawn(async move {
            if let Err(e) = peripheral.connect().await {
                warn!(%peer_id, "connect failed: {e}");
                let _ = tx
                    .send(CentralEvent::ConnectFailed {
                        peer_id,
                        reason: e.to_string(),
                    })
                    .await;
            }
        });
        self.tasks.lock().expect("tasks lock").push(task);
        Ok(())
    }

    async fn disconnect(&self, peer_id: PeerId) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peer_id)?;
        peripheral.disconnect().await.map_err(btl)
    }

    async fn discover_services(
        &self,
        peer_id: PeerId,
        _service_id: Uuid,
    ) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peer_id)?;
        peripheral.discover_services().await.map_err(btl)?;
        let services: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid).collect();
        debug!(%peer_id, "discovered {} service(s)", services.len());
        let _ = self
            .events
            .try_send(CentralEvent::ServicesDiscovered { peer_id, services });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peer_id: PeerId,
        service_id: Uuid,
        _characteristic_id: Uuid,
    ) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peer_id)?;
        for service in peripheral.services() {
            if service.uuid != service_id {
                continue;
            }
            let subscriptions = self.subscriptions.lock().expect("subscriptions lock");
            let characteristics: Vec<CharacteristicState> = service
                .characteristics
                .iter()
                .map(|c| CharacteristicState {
                    characteristic_id: c.uuid,
                    notifying: subscriptions.contains(&(peer_id, c.uuid)),
                })
                .collect();
            drop(subscriptions);
            let _ = self.events.try_send(CentralEvent::CharacteristicsDiscovered {
                peer_id,
                service_id,
                characteristics,
            });
            return Ok(());
        }
        Err(AdapterError::ServiceNotFound(service_id))
    }

    async fn subscribe(&self, peer_id: PeerId, characteristic_id: Uuid) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peer_id)?;
        let characteristic = find_characteristic(&peripheral, characteristic_id)?;
        peripheral.subscribe(&characteristic).await.map_err(btl)?;
        self.subscriptions
            .lock()
            .expect("subscriptions lock")
            .insert((peer_id, characteristic_id));
        self.spawn_notification_pump(peer_id, &peripheral);
        debug!(%peer_id, %characteristic_id, "subscribed to notifications");
        Ok(())
    }

    async fn write_value(
        &self,
        peer_id: PeerId,
        characteristic_id: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peer_id)?;
        let characteristic = find_characteristic(&peripheral, characteristic_id)?;
        debug!(%peer_id, "writing {} byte(s)", value.len());
        peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await
            .map_err(btl)
    }
}

fn find_characteristic(
    peripheral: &PlatformPeripheral,
    characteristic_id: Uuid,
) -> Result<Characteristic, AdapterError> {
    for service in peripheral.services() {
        for characteristic in service.characteristics {
            if characteristic.uuid == characteristic_id {
                return Ok(characteristic);
            }
        }
    }
    Err(AdapterError::CharacteristicNotFound(characteristic_id))
}

/// btleplug 事件流 → 核心 CentralEvent
async fn pump_events(adapter: Adapter, tx: mpsc::Sender<CentralEvent>, peers: Peers) {
    let mut stream = match adapter.events().await {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to open adapter event stream: {e}");
            return;
        }
    };

    while let Some(event) = stream.next().await {
        let mapped = match event {
            BtlEvent::StateUpdate(state) => {
                let state = match state {
                    CentralState::PoweredOn => RadioState::PoweredOn,
                    CentralState::PoweredOff => RadioState::PoweredOff,
                    _ => RadioState::Unknown,
                };
                Some(CentralEvent::RadioState(state))
            }
            BtlEvent::DeviceDiscovered(id) => discovered_event(&adapter, &peers, &id).await,
            BtlEvent::DeviceConnected(id) => {
                lookup(&peers, &id).map(|peer_id| CentralEvent::PeerConnected { peer_id })
            }
            BtlEvent::DeviceDisconnected(id) => {
                lookup(&peers, &id).map(|peer_id| CentralEvent::PeerDisconnected { peer_id })
            }
            _ => None,
        };
        if let Some(event) = mapped {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
}

fn lookup(peers: &Peers, id: &PeripheralId) -> Option<PeerId> {
    peers
        .lock()
        .expect("peer table lock")
        .by_platform
        .get(id)
        .copied()
}

/// 新发现的对端：建立 PeerId 映射并保留平台对象的强引用
async fn discovered_event(
    adapter: &Adapter,
    peers: &Peers,
    id: &PeripheralId,
) -> Option<CentralEvent> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    let peer_id = {
        let mut table = peers.lock().expect("peer table lock");
        match table.by_platform.get(id) {
            Some(existing) => *existing,
            None => {
                let peer_id = PeerId(Uuid::new_v4());
                table.by_platform.insert(id.clone(), peer_id);
                table.by_peer.insert(peer_id, peripheral.clone());
                peer_id
            }
        }
    };

    Some(CentralEvent::PeerDiscovered {
        peer_id,
        name: properties.local_name,
        rssi: properties.rssi,
    })
}
