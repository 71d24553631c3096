//! Blueear Core Library
//!
//! BLE 角色/会话管理器的核心实现：同一台主机可互换地充当 iBeacon
//! 广播端、iBeacon 观察端、推送键值 payload 的 GATT peripheral、或
//! 发现并订阅该服务的 GATT central。
//!
//! # 模块
//!
//! - **codec**: 键值 payload 的二进制编解码
//! - **identity**: beacon 身份、固定服务描述与 iBeacon 帧格式
//! - **adapter**: 外部 BLE 适配器能力的命令/事件契约
//! - **event**: 会话事件枚举与 Event Sink 契约
//! - **session**: 四个角色的状态机
//! - **content**: peripheral 推送用的内容提供者策略
//!
//! # 使用示例
//!
//! ## 作为 GATT central 订阅对端
//!
//! ```ignore
//! use blueear_core::{CentralSession, ChannelSink, ServiceDescriptor, SessionEvent};
//!
//! let (sink, mut events) = ChannelSink::new(32);
//! let session = CentralSession::spawn(adapter, adapter_events,
//!     ServiceDescriptor::default(), Arc::new(sink));
//! session.start();
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::DataReceived { payload } => println!("{payload:?}"),
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## 作为 GATT peripheral 周期推送
//!
//! ```ignore
//! use blueear_core::{PeripheralConfig, PeripheralSession, SequenceProvider};
//!
//! let session = PeripheralSession::spawn(adapter, adapter_events,
//!     PeripheralConfig::default(), Box::new(provider), sink);
//! session.start();
//! ```

pub mod adapter;
pub mod codec;
pub mod content;
pub mod error;
pub mod event;
pub mod identity;
pub mod session;

// Codec re-exports
pub use codec::{CodecError, Payload, decode, encode};

// Identity re-exports
pub use identity::{
    APPLE_COMPANY_ID, BEACON_MAJOR, BEACON_MINOR, BEACON_REGION_UUID, BeaconFrame, BeaconIdentity,
    Capabilities, DATA_CHARACTERISTIC_UUID, DATA_SERVICE_UUID, Proximity, ServiceDescriptor,
};

// Adapter re-exports
pub use adapter::{
    Authorization, BeaconAdvertiser, BeaconEvent, BeaconRanger, CentralAdapter, CentralEvent,
    CharacteristicState, PeerId, PeripheralAdapter, PeripheralEvent, RadioState, RangedBeacon,
    RangingEvent, SubscriberId, WriteRequest, WriteResult,
};

// Event re-exports
pub use event::{ChannelSink, EventSink, SessionEvent};

// Error re-exports
pub use error::{AdapterError, SessionError};

// Session re-exports
pub use session::{
    BroadcasterSession, CentralSession, ConnectionState, ObserverSession, PeerRecord,
    PeripheralConfig, PeripheralSession, Role, SessionState,
};

// Content re-exports
pub use content::{ContentProvider, SequenceProvider, UptimeProvider};
