//! 适配器契约
//!
//! 核心不实现任何无线驱动；它编排一个外部 "BLE 适配器" 能力的四组
//! 原语：beacon 广播、beacon 区域监测/测距、GATT peripheral、GATT
//! central。命令经 trait 方法下发，适配器回调以事件枚举经 mpsc 通道
//! 送回会话，一次一条——通道即单线程回调纪律。一个适配器实例同一
//! 时刻至多被一个会话持有。

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AdapterError;
use crate::identity::{BeaconIdentity, Proximity, ServiceDescriptor};

/// radio 电源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    PoweredOn,
    PoweredOff,
}

/// 定位/区域授权结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied,
}

/// peripheral 侧看到的订阅者（central）标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub Uuid);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// central 侧看到的对端（peripheral）标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub Uuid);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 一次测距回调里的单个 beacon 测量值
#[derive(Debug, Clone, PartialEq)]
pub struct RangedBeacon {
    pub identity: BeaconIdentity,
    pub proximity: Proximity,
    pub rssi: i16,
    pub timestamp: SystemTime,
}

/// 已发现特征及其当前通知状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicState {
    pub characteristic_id: Uuid,
    pub notifying: bool,
}

/// 来自对端的写请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub request_id: u64,
    pub characteristic_id: Uuid,
    pub value: Vec<u8>,
    pub offset: usize,
}

/// 写请求应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Success,
    InvalidOffset,
}

// ---------------------------------------------------------------------------
// 事件：适配器 → 会话
// ---------------------------------------------------------------------------

/// beacon 广播角色收到的适配器事件
#[derive(Debug, Clone, PartialEq)]
pub enum BeaconEvent {
    RadioState(RadioState),
    AdvertisingStarted,
}

/// beacon 观察角色收到的适配器事件
#[derive(Debug, Clone, PartialEq)]
pub enum RangingEvent {
    /// 一批测距结果，顺序由适配器决定，核心不重排
    Ranged(Vec<RangedBeacon>),
}

/// GATT peripheral 角色收到的适配器事件
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    RadioState(RadioState),
    /// 服务注册完成的异步确认；广播必须等它之后才能请求
    ServiceRegistered { service_id: Uuid },
    RegistrationFailed { reason: String },
    AdvertisingStarted,
    SubscriptionChanged {
        subscriber: SubscriberId,
        characteristic_id: Uuid,
        subscribed: bool,
    },
    WriteRequests(Vec<WriteRequest>),
}

/// GATT central 角色收到的适配器事件
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    RadioState(RadioState),
    PeerDiscovered {
        peer_id: PeerId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    PeerConnected { peer_id: PeerId },
    ConnectFailed { peer_id: PeerId, reason: String },
    PeerDisconnected { peer_id: PeerId },
    ServicesDiscovered {
        peer_id: PeerId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        peer_id: PeerId,
        service_id: Uuid,
        characteristics: Vec<CharacteristicState>,
    },
    ValueUpdated {
        peer_id: PeerId,
        characteristic_id: Uuid,
        value: Vec<u8>,
    },
}

// ---------------------------------------------------------------------------
// 命令：会话 → 适配器
// ---------------------------------------------------------------------------

/// iBeacon 广播原语
#[async_trait]
pub trait BeaconAdvertiser: Send + Sync {
    /// 请求以给定身份开始 iBeacon 广播；确认经 `BeaconEvent::AdvertisingStarted` 送达
    async fn start_advertising(&self, identity: &BeaconIdentity) -> Result<(), AdapterError>;

    /// 停止广播并释放广告数据
    async fn stop_advertising(&self) -> Result<(), AdapterError>;
}

/// beacon 区域监测/测距原语
#[async_trait]
pub trait BeaconRanger: Send + Sync {
    /// 请求定位/区域授权；结果是 granted/denied 二值
    async fn request_authorization(&self) -> Result<Authorization, AdapterError>;

    async fn start_monitoring(&self, identity: &BeaconIdentity) -> Result<(), AdapterError>;

    async fn start_ranging(&self, identity: &BeaconIdentity) -> Result<(), AdapterError>;

    /// 取消监测与测距；会话释放时必然调用
    async fn stop_ranging(&self) -> Result<(), AdapterError>;
}

/// GATT peripheral 原语
#[async_trait]
pub trait PeripheralAdapter: Send + Sync {
    /// 注册服务/特征。注册是异步的：完成经
    /// `PeripheralEvent::ServiceRegistered` 确认。
    async fn register_service(&self, descriptor: &ServiceDescriptor) -> Result<(), AdapterError>;

    async fn unregister_service(&self) -> Result<(), AdapterError>;

    /// 以本地名与服务 UUID 开始广播。只能在注册确认之后调用。
    async fn start_advertising(&self, local_name: &str, service_id: Uuid)
    -> Result<(), AdapterError>;

    async fn stop_advertising(&self) -> Result<(), AdapterError>;

    /// 向特定订阅者推送一个特征值
    async fn notify_subscriber(
        &self,
        subscriber: &SubscriberId,
        value: &[u8],
    ) -> Result<(), AdapterError>;

    /// 应答一个写请求
    async fn respond_write(&self, request_id: u64, result: WriteResult)
    -> Result<(), AdapterError>;
}

/// GATT central 原语
#[async_trait]
pub trait CentralAdapter: Send + Sync {
    /// 开始按服务 UUID 过滤扫描
    async fn start_scan(&self, service_id: Uuid) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// 请求连接；结果经 `PeerConnected` / `ConnectFailed` 事件送达
    async fn connect(&self, peer_id: PeerId) -> Result<(), AdapterError>;

    async fn disconnect(&self, peer_id: PeerId) -> Result<(), AdapterError>;

    async fn discover_services(&self, peer_id: PeerId, service_id: Uuid)
    -> Result<(), AdapterError>;

    async fn discover_characteristics(
        &self,
        peer_id: PeerId,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<(), AdapterError>;

    /// 订阅特征通知，启用对端后续写入的推送
    async fn subscribe(&self, peer_id: PeerId, characteristic_id: Uuid)
    -> Result<(), AdapterError>;

    /// 带应答写入特征值
    async fn write_value(
        &self,
        peer_id: PeerId,
        characteristic_id: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError>;
}
