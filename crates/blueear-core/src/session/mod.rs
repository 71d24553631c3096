//! 角色会话状态机
//!
//! 每个激活角色一个会话实例。会话在构造时 spawn 一个 actor 任务，
//! 独占全部可变状态；`start`/`stop`/发送命令与适配器事件都经通道
//! 汇入该任务，由 `select!` 循环一次一条地处理。因此公开方法立即
//! 返回、从不与回调竞争，完成情况通过 Event Sink 异步观察。
//!
//! 会话从不原地切换角色：换角色就是 drop 旧会话、构造新会话。

pub mod broadcaster;
pub mod central;
pub mod observer;
pub mod peripheral;

pub use broadcaster::BroadcasterSession;
pub use central::{CentralSession, ConnectionState, PeerRecord};
pub use observer::ObserverSession;
pub use peripheral::{PeripheralConfig, PeripheralSession};

use crate::error::SessionError;

/// 会话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    BeaconBroadcaster,
    BeaconObserver,
    GattPeripheral,
    GattCentral,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::BeaconBroadcaster => "beacon-broadcaster",
            Role::BeaconObserver => "beacon-observer",
            Role::GattPeripheral => "gatt-peripheral",
            Role::GattCentral => "gatt-central",
        }
    }
}

/// 会话状态
///
/// 各角色只使用其中一个子集；状态只由 actor 任务在命令或适配器
/// 事件驱动下变更。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    WaitingForRadio,
    RadioReady,
    ServiceRegistered,
    Advertising,
    Subscribed,
    Scanning,
    Discovered,
    Connecting,
    ServiceDiscovery,
    CharacteristicDiscovery,
    Connected,
    Disconnected,
    Failed(SessionError),
}
