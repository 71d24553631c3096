//! 测试用 mock 适配器
//!
//! 每个 mock 把收到的命令按序转发进一个通道，测试端 await 即可断言
//! 调用顺序；适配器回调由测试通过事件通道手工注入。

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use blueear_core::{
    AdapterError, Authorization, BeaconAdvertiser, BeaconIdentity, BeaconRanger, CentralAdapter,
    PeerId, PeripheralAdapter, ServiceDescriptor, SessionEvent, SubscriberId, WriteResult,
};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(5);

/// 等待下一个 sink 事件
pub async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("sink channel closed")
}

/// 等待下一条 mock 调用记录
pub async fn next_call<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for adapter call")
        .expect("call channel closed")
}

/// 留给 actor 处理在途消息的时间
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ---------------------------------------------------------------------------
// beacon 广播
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub enum AdvertiserCall {
    Start,
    Stop,
}

pub struct MockBeaconAdvertiser {
    calls: mpsc::UnboundedSender<AdvertiserCall>,
}

impl MockBeaconAdvertiser {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AdvertiserCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls: tx }), rx)
    }
}

#[async_trait]
impl BeaconAdvertiser for MockBeaconAdvertiser {
    async fn start_advertising(&self, _identity: &BeaconIdentity) -> Result<(), AdapterError> {
        let _ = self.calls.send(AdvertiserCall::Start);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        let _ = self.calls.send(AdvertiserCall::Stop);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// beacon 测距
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub enum RangerCall {
    RequestAuthorization,
    StartMonitoring,
    StartRanging,
    StopRanging,
}

pub struct MockBeaconRanger {
    authorization: Authorization,
    calls: mpsc::UnboundedSender<RangerCall>,
}

impl MockBeaconRanger {
    pub fn new(
        authorization: Authorization,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RangerCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                authorization,
                calls: tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl BeaconRanger for MockBeaconRanger {
    async fn request_authorization(&self) -> Result<Authorization, AdapterError> {
        let _ = self.calls.send(RangerCall::RequestAuthorization);
        Ok(self.authorization)
    }

    async fn start_monitoring(&self, _identity: &BeaconIdentity) -> Result<(), AdapterError> {
        let _ = self.calls.send(RangerCall::StartMonitoring);
        Ok(())
    }

    async fn start_ranging(&self, _identity: &BeaconIdentity) -> Result<(), AdapterError> {
        let _ = self.calls.send(RangerCall::StartRanging);
        Ok(())
    }

    async fn stop_ranging(&self) -> Result<(), AdapterError> {
        let _ = self.calls.send(RangerCall::StopRanging);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GATT peripheral
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub enum PeripheralCall {
    Register,
    Unregister,
    Advertise,
    StopAdvertising,
    Notify(SubscriberId, Vec<u8>),
    Respond(u64, WriteResult),
}

pub struct MockPeripheralAdapter {
    calls: mpsc::UnboundedSender<PeripheralCall>,
}

impl MockPeripheralAdapter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PeripheralCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls: tx }), rx)
    }
}

#[async_trait]
impl PeripheralAdapter for MockPeripheralAdapter {
    async fn register_service(&self, _descriptor: &ServiceDescriptor) -> Result<(), AdapterError> {
        let _ = self.calls.send(PeripheralCall::Register);
        Ok(())
    }

    async fn unregister_service(&self) -> Result<(), AdapterError> {
        let _ = self.calls.send(PeripheralCall::Unregister);
        Ok(())
    }

    async fn start_advertising(
        &self,
        _local_name: &str,
        _service_id: Uuid,
    ) -> Result<(), AdapterError> {
        let _ = self.calls.send(PeripheralCall::Advertise);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        let _ = self.calls.send(PeripheralCall::StopAdvertising);
        Ok(())
    }

    async fn notify_subscriber(
        &self,
        subscriber: &SubscriberId,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let _ = self
            .calls
            .send(PeripheralCall::Notify(*subscriber, value.to_vec()));
        Ok(())
    }

    async fn respond_write(
        &self,
        request_id: u64,
        result: WriteResult,
    ) -> Result<(), AdapterError> {
        let _ = self.calls.send(PeripheralCall::Respond(request_id, result));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GATT central
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub enum CentralCall {
    StartScan,
    StopScan,
    Connect(PeerId),
    Disconnect(PeerId),
    DiscoverServices(PeerId),
    DiscoverCharacteristics(PeerId),
    Subscribe(PeerId),
    Write(PeerId, Vec<u8>),
}

pub struct MockCentralAdapter {
    calls: mpsc::UnboundedSender<CentralCall>,
    /// subscribe 请求失败一次性开关，模拟订阅未生效的恢复场景
    pub fail_subscribe: AtomicBool,
}

impl MockCentralAdapter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CentralCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                calls: tx,
                fail_subscribe: AtomicBool::new(false),
            }),
            rx,
        )
    }
}

#[async_trait]
impl CentralAdapter for MockCentralAdapter {
    async fn start_scan(&self, _service_id: Uuid) -> Result<(), AdapterError> {
        let _ = self.calls.send(CentralCall::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        let _ = self.calls.send(CentralCall::StopScan);
        Ok(())
    }

    async fn connect(&self, peer_id: PeerId) -> Result<(), AdapterError> {
        let _ = self.calls.send(CentralCall::Connect(peer_id));
        Ok(())
    }

    async fn disconnect(&self, peer_id: PeerId) -> Result<(), AdapterError> {
        let _ = self.calls.send(CentralCall::Disconnect(peer_id));
        Ok(())
    }

    async fn discover_services(
        &self,
        peer_id: PeerId,
        _service_id: Uuid,
    ) -> Result<(), AdapterError> {
        let _ = self.calls.send(CentralCall::DiscoverServices(peer_id));
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peer_id: PeerId,
        _service_id: Uuid,
        _characteristic_id: Uuid,
    ) -> Result<(), AdapterError> {
        let _ = self
            .calls
            .send(CentralCall::DiscoverCharacteristics(peer_id));
        Ok(())
    }

    async fn subscribe(
        &self,
        peer_id: PeerId,
        _characteristic_id: Uuid,
    ) -> Result<(), AdapterError> {
        let _ = self.calls.send(CentralCall::Subscribe(peer_id));
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(AdapterError::Backend("subscribe refused".to_string()));
        }
        Ok(())
    }

    async fn write_value(
        &self,
        peer_id: PeerId,
        _characteristic_id: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let _ = self
            .calls
            .send(CentralCall::Write(peer_id, value.to_vec()));
        Ok(())
    }
}
