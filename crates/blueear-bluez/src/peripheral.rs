//! BlueZ 本地 GATT 应用（peripheral 原语）
//!
//! 按 ServiceDescriptor 搭建 read/write/notify 特征：
//!
//! - notify：BlueZ 在 central 订阅时交给我们一个 notifier，存入槽位
//!   并上报 SubscriptionChanged；会话随后经 `notify_subscriber` 推送。
//! - write：BlueZ 的写回调要求就地给出结果，而判定（解码、偏移检查）
//!   在会话里。用挂起表 + oneshot 把请求桥接给会话，等 `respond_write`
//!   拿到判定后再向 BlueZ 应答；会话静默丢弃的请求按超时失败处理。
//! - read：返回最近一次推送的值。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::Advertisement;
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicNotifier, CharacteristicRead, CharacteristicWrite, CharacteristicWriteMethod,
    ReqError, Service,
};
use bluer::{Adapter, Session};
use futures_util::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blueear_core::{
    AdapterError, PeripheralAdapter, PeripheralEvent, ServiceDescriptor, SubscriberId,
    WriteRequest, WriteResult,
};

use crate::{backend, spawn_power_watch};

/// 会话应答写请求的时限；超时按失败回给 BlueZ
const WRITE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

type PendingWrites = Arc<StdMutex<HashMap<u64, oneshot::Sender<WriteResult>>>>;
type NotifierSlot = Arc<Mutex<Option<(SubscriberId, Uuid, CharacteristicNotifier)>>>;

/// BlueZ GATT peripheral 适配器
pub struct BlueZPeripheralAdapter {
    adapter: Adapter,
    _session: Session,
    events: mpsc::Sender<PeripheralEvent>,
    app_handle: Mutex<Option<bluer::gatt::local::ApplicationHandle>>,
    adv_handle: Mutex<Option<bluer::adv::AdvertisementHandle>>,
    notifier: NotifierSlot,
    last_value: Arc<Mutex<Vec<u8>>>,
    pending: PendingWrites,
    next_request_id: Arc<AtomicU64>,
    power_task: JoinHandle<()>,
}

impl BlueZPeripheralAdapter {
    pub async fn new() -> anyhow::Result<(Arc<Self>, mpsc::Receiver<PeripheralEvent>)> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        debug!("peripheral adapter bound to '{}'", adapter.name());

        let (tx, rx) = mpsc::channel(32);
        let power_task = spawn_power_watch(adapter.clone(), tx.clone(), PeripheralEvent::RadioState);

        Ok((
            Arc::new(Self {
                adapter,
                _session: session,
                events: tx,
                app_handle: Mutex::new(None),
                adv_handle: Mutex::new(None),
                notifier: Arc::new(Mutex::new(None)),
                last_value: Arc::new(Mutex::new(Vec::new())),
                pending: Arc::new(StdMutex::new(HashMap::new())),
                next_request_id: Arc::new(AtomicU64::new(1)),
                power_task,
            }),
            rx,
        ))
    }

    fn build_characteristic(&self, descriptor: &ServiceDescriptor) -> Characteristic {
        let characteristic_id = descriptor.characteristic_id;
        let caps = descriptor.capabilities;

        let read = caps.read.then(|| {
            let last_value = self.last_value.clone();
            CharacteristicRead {
                read: true,
                fun: Box::new(move |req| {
                    let last_value = last_value.clone();
                    async move {
                        let value = last_value.lock().await;
                        let offset = req.offset as usize;
                        if offset >= value.len() {
                            return Ok(Vec::new());
                        }
                        Ok(value[offset..].to_vec())
                    }
                    .boxed()
                }),
                ..Default::default()
            }
        });

        let write = (caps.write || caps.write_without_response).then(|| {
            let events = self.events.clone();
            let pending = self.pending.clone();
            let next_request_id = self.next_request_id.clone();
            CharacteristicWrite {
                write: caps.write,
                write_without_response: caps.write_without_response,
                method: CharacteristicWriteMethod::Fun(Box::new(move |value, req| {
                    let events = events.clone();
                    let pending = pending.clone();
                    let next_request_id = next_request_id.clone();
                    async move {
                        let request_id = next_request_id.fetch_add(1, Ordering::SeqCst);
                        let (ack_tx, ack_rx) = oneshot::channel();
                        pending.lock().expect("pending lock").insert(request_id, ack_tx);

                        let request = WriteRequest {
                            request_id,
                            characteristic_id,
                            value,
                            offset: req.offset as usize,
                        };
                        if events
                            .try_send(PeripheralEvent::WriteRequests(vec![request]))
                            .is_err()
                        {
                            pending.lock().expect("pending lock").remove(&request_id);
                            return Err(ReqError::Failed);
                        }

                        match tokio::time::timeout(WRITE_ACK_TIMEOUT, ack_rx).await {
                            Ok(Ok(WriteResult::Success)) => Ok(()),
                            Ok(Ok(WriteResult::InvalidOffset)) => Err(ReqError::InvalidOffset),
                            _ => {
                                // 会话静默丢弃或已拆除
                                pending.lock().expect("pending lock").remove(&request_id);
                                Err(ReqError::Failed)
                            }
                        }
                    }
                    .boxed()
                })),
                ..Default::default()
            }
        });

        let notify = caps.notify.then(|| {
            let events = self.events.clone();
            let slot = self.notifier.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let events = events.clone();
                    let slot = slot.clone();
                    async move {
                        let subscriber = SubscriberId(Uuid::new_v4());
                        info!(%subscriber, "central subscribed to characteristic");
                        *slot.lock().await = Some((subscriber, characteristic_id, notifier));
                        let _ = events.try_send(PeripheralEvent::SubscriptionChanged {
                            subscriber,
                            characteristic_id,
                            subscribed: true,
                        });
                    }
                    .boxed()
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid: characteristic_id,
            read,
            write,
            notify,
            ..Default::default()
        }
    }
}

impl Drop for BlueZPeripheralAdapter {
    fn drop(&mut self) {
        self.power_task.abort();
    }
}

#[async_trait]
impl PeripheralAdapter for BlueZPeripheralAdapter {
    async fn register_service(&self, descriptor: &ServiceDescriptor) -> Result<(), AdapterError> {
        self.adapter.set_powered(true).await.map_err(backend)?;

        let app = Application {
            services: vec![Service {
                uuid: descriptor.service_id,
                primary: true,
                characteristics: vec![self.build_characteristic(descriptor)],
                ..Default::default()
            }],
            ..Default::default()
        };

        debug!(service_id = %descriptor.service_id, "registering GATT application");
        let handle = self
            .adapter
            .serve_gatt_application(app)
            .await
            .map_err(backend)?;
        *self.app_handle.lock().await = Some(handle);

        let _ = self.events.try_send(PeripheralEvent::ServiceRegistered {
            service_id: descriptor.service_id,
        });
        Ok(())
    }

    async fn unregister_service(&self) -> Result<(), AdapterError> {
        self.app_handle.lock().await.take();
        *self.notifier.lock().await = None;
        debug!("GATT application unregistered");
        Ok(())
    }

    async fn start_advertising(
        &self,
        local_name: &str,
        service_id: Uuid,
    ) -> Result<(), AdapterError> {
        let adv = Advertisement {
            advertisement_type: bluer::adv::Type::Peripheral,
            service_uuids: vec![service_id].into_iter().collect(),
            local_name: Some(local_name.to_string()),
            discoverable: Some(true),
            ..Default::default()
        };

        let handle = self.adapter.advertise(adv).await.map_err(backend)?;
        *self.adv_handle.lock().await = Some(handle);

        info!(%service_id, local_name, "peripheral advertising started");
        let _ = self.events.try_send(PeripheralEvent::AdvertisingStarted);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        if self.adv_handle.lock().await.take().is_some() {
            debug!("peripheral advertisement released");
        }
        Ok(())
    }

    async fn notify_subscriber(
        &self,
        subscriber: &SubscriberId,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        *self.last_value.lock().await = value.to_vec();

        let mut slot = self.notifier.lock().await;
        let stopped = match slot.as_mut() {
            Some((id, characteristic_id, notifier)) if id == subscriber => {
                if notifier.is_stopped() {
                    (*id, *characteristic_id)
                } else {
                    return notifier
                        .notify(value.to_vec())
                        .await
                        .map_err(|e| AdapterError::Backend(e.to_string()));
                }
            }
            _ => {
                return Err(AdapterError::Backend(format!(
                    "no such subscriber: {subscriber}"
                )));
            }
        };

        // central 已退订
        let (gone, characteristic_id) = stopped;
        *slot = None;
        let _ = self.events.try_send(PeripheralEvent::SubscriptionChanged {
            subscriber: gone,
            characteristic_id,
            subscribed: false,
        });
        Err(AdapterError::Backend("subscriber gone".to_string()))
    }

    async fn respond_write(
        &self,
        request_id: u64,
        result: WriteResult,
    ) -> Result<(), AdapterError> {
        let ack = self.pending.lock().expect("pending lock").remove(&request_id);
        match ack {
            Some(tx) => {
                let _ = tx.send(result);
                Ok(())
            }
            None => {
                warn!(request_id, "no pending write to acknowledge");
                Ok(())
            }
        }
    }
}
