//! BlueZ iBeacon 广播与测距
//!
//! # 广播
//!
//! iBeacon 没有独立的广播接口：把 23 字节帧（type/len/uuid/major/
//! minor/power）挂在 company id 0x004C 的厂商数据下广播即可。
//!
//! # 测距
//!
//! BlueZ 没有 region monitoring 原语，监测与测距共用一个发现会话：
//! 周期扫一遍已知设备，解析厂商数据里的 iBeacon 帧，匹配固定身份的
//! 设备按 RSSI 推导距离分类后按批上报。
//!
//! Linux 上没有定位授权门槛，适配器可用即视为授权通过。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bluer::adv::Advertisement;
use bluer::{Adapter, AdapterEvent, Session};
use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use blueear_core::{
    APPLE_COMPANY_ID, AdapterError, Authorization, BeaconAdvertiser, BeaconEvent, BeaconFrame,
    BeaconIdentity, BeaconRanger, Proximity, RangedBeacon, RangingEvent,
};

use crate::{backend, spawn_power_watch};

/// 广播帧携带的标称发射功率（1 米处 RSSI）
const MEASURED_POWER: i8 = -59;

/// 测距扫描周期
const RANGING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// BlueZ iBeacon 广播端
pub struct BlueZBeaconAdvertiser {
    adapter: Adapter,
    _session: Session,
    events: mpsc::Sender<BeaconEvent>,
    handle: Mutex<Option<bluer::adv::AdvertisementHandle>>,
    power_task: JoinHandle<()>,
}

impl BlueZBeaconAdvertiser {
    pub async fn new() -> anyhow::Result<(Arc<Self>, mpsc::Receiver<BeaconEvent>)> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        debug!("beacon advertiser bound to adapter '{}'", adapter.name());

        let (tx, rx) = mpsc::channel(16);
        let power_task = spawn_power_watch(adapter.clone(), tx.clone(), BeaconEvent::RadioState);

        Ok((
            Arc::new(Self {
                adapter,
                _session: session,
                events: tx,
                handle: Mutex::new(None),
                power_task,
            }),
            rx,
        ))
    }
}

impl Drop for BlueZBeaconAdvertiser {
    fn drop(&mut self) {
        self.power_task.abort();
    }
}

#[async_trait]
impl BeaconAdvertiser for BlueZBeaconAdvertiser {
    async fn start_advertising(&self, identity: &BeaconIdentity) -> Result<(), AdapterError> {
        self.adapter.set_powered(true).await.map_err(backend)?;

        let mut manufacturer_data = BTreeMap::new();
        manufacturer_data.insert(APPLE_COMPANY_ID, identity.to_frame(MEASURED_POWER));

        let adv = Advertisement {
            advertisement_type: bluer::adv::Type::Broadcast,
            manufacturer_data,
            local_name: Some(identity.label.clone()),
            ..Default::default()
        };

        let handle = self.adapter.advertise(adv).await.map_err(backend)?;
        *self.handle.lock().await = Some(handle);

        info!(
            region = %identity.region_id,
            major = identity.major,
            minor = identity.minor,
            "iBeacon advertisement registered"
        );
        let _ = self.events.try_send(BeaconEvent::AdvertisingStarted);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        // drop handle 即向 BlueZ 撤销广播
        if self.handle.lock().await.take().is_some() {
            debug!("iBeacon advertisement released");
        }
        Ok(())
    }
}

/// BlueZ iBeacon 测距端
pub struct BlueZBeaconRanger {
    adapter: Adapter,
    _session: Session,
    events: mpsc::Sender<RangingEvent>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BlueZBeaconRanger {
    pub async fn new() -> anyhow::Result<(Arc<Self>, mpsc::Receiver<RangingEvent>)> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        debug!("beacon ranger bound to adapter '{}'", adapter.name());

        let (tx, rx) = mpsc::channel(16);
        Ok((
            Arc::new(Self {
                adapter,
                _session: session,
                events: tx,
                scan_task: Mutex::new(None),
            }),
            rx,
        ))
    }
}

impl Drop for BlueZBeaconRanger {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.scan_task.try_lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl BeaconRanger for BlueZBeaconRanger {
    async fn request_authorization(&self) -> Result<Authorization, AdapterError> {
        // Linux 没有定位授权门槛；能拿到适配器即视为授权通过
        match self.adapter.is_powered().await {
            Ok(_) => Ok(Authorization::Granted),
            Err(_) => Ok(Authorization::Denied),
        }
    }

    async fn start_monitoring(&self, _identity: &BeaconIdentity) -> Result<(), AdapterError> {
        // 监测与测距共用发现会话；这里只确保 radio 就绪
        self.adapter.set_powered(true).await.map_err(backend)?;
        Ok(())
    }

    async fn start_ranging(&self, identity: &BeaconIdentity) -> Result<(), AdapterError> {
        let mut guard = self.scan_task.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let adapter = self.adapter.clone();
        let identity = identity.clone();
        let tx = self.events.clone();
        let task = tokio::spawn(async move {
            let mut discoverer = match adapter.discover_devices().await {
                Ok(d) => d,
                Err(e) => {
                    warn!("failed to start discovery: {e}");
                    return;
                }
            };

            let mut sweep = tokio::time::interval(RANGING_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    event = discoverer.next() => match event {
                        Some(AdapterEvent::DeviceAdded(addr)) => {
                            let Ok(device) = adapter.device(addr) else { continue };
                            if let Ok(Some(beacon)) = ranged_beacon(&device, &identity).await {
                                let _ = tx.send(RangingEvent::Ranged(vec![beacon])).await;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = sweep.tick() => {
                        let batch = sweep_known_devices(&adapter, &identity).await;
                        if !batch.is_empty() {
                            if tx.send(RangingEvent::Ranged(batch)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        *guard = Some(task);
        info!("beacon ranging started");
        Ok(())
    }

    async fn stop_ranging(&self) -> Result<(), AdapterError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
            debug!("beacon ranging cancelled");
        }
        Ok(())
    }
}

/// 扫一遍适配器已知设备，收集匹配身份的测量值
async fn sweep_known_devices(adapter: &Adapter, identity: &BeaconIdentity) -> Vec<RangedBeacon> {
    let mut batch = Vec::new();
    let addrs = match adapter.device_addresses().await {
        Ok(a) => a,
        Err(_) => return batch,
    };
    for addr in addrs {
        let Ok(device) = adapter.device(addr) else {
            continue;
        };
        if let Ok(Some(beacon)) = ranged_beacon(&device, identity).await {
            batch.push(beacon);
        }
    }
    batch
}

/// 从设备厂商数据解析 iBeacon 帧并匹配身份
async fn ranged_beacon(
    device: &bluer::Device,
    identity: &BeaconIdentity,
) -> anyhow::Result<Option<RangedBeacon>> {
    let manufacturer_data = device.manufacturer_data().await?.unwrap_or_default();
    let Some(data) = manufacturer_data.get(&APPLE_COMPANY_ID) else {
        return Ok(None);
    };
    let Some(frame) = BeaconFrame::parse(data) else {
        return Ok(None);
    };
    if !identity.matches(&frame) {
        return Ok(None);
    }

    let rssi = device.rssi().await?;
    debug!(addr = %device.address(), ?rssi, "ranged matching beacon");
    Ok(Some(RangedBeacon {
        identity: identity.clone(),
        proximity: Proximity::from_rssi(rssi),
        // RSSI 不可用时沿用 0 约定
        rssi: rssi.unwrap_or(0),
        timestamp: SystemTime::now(),
    }))
}
