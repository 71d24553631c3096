//! Linux 平台 BLE 适配器
//!
//! 实现 blueear-core 的四组适配器契约：
//!
//! - **beacon**: bluer (BlueZ D-Bus) —— iBeacon 广播与测距。iBeacon 帧
//!   放在 company id 0x004C 的厂商数据里；测距即解析扫描到的厂商数据。
//! - **peripheral**: bluer —— 本地 GATT 应用（注册服务、广播、notify、
//!   写请求桥接）。
//! - **central**: btleplug —— 扫描、连接、服务/特征发现、订阅与写入。
//!
//! 核心只编排这些原语，从不直接触碰无线栈。每个适配器实例构造时
//! 返回其事件接收端，移交给且只移交给一个会话。

pub mod beacon;
pub mod central;
pub mod peripheral;

pub use beacon::{BlueZBeaconAdvertiser, BlueZBeaconRanger};
pub use central::BtleplugCentralAdapter;
pub use peripheral::BlueZPeripheralAdapter;

use std::time::Duration;

use blueear_core::RadioState;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 电源状态轮询间隔
pub(crate) const POWER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 轮询 BlueZ 适配器电源状态，变化时作为事件重新发布。
/// 首次轮询结果也会发出，让会话拿到初始状态。
pub(crate) fn spawn_power_watch<E, F>(
    adapter: bluer::Adapter,
    tx: mpsc::Sender<E>,
    map: F,
) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn(RadioState) -> E + Send + 'static,
{
    tokio::spawn(async move {
        let mut last = RadioState::Unknown;
        loop {
            let powered = adapter.is_powered().await.unwrap_or(false);
            let state = if powered {
                RadioState::PoweredOn
            } else {
                RadioState::PoweredOff
            };
            if state != last {
                last = state;
                if tx.send(map(state)).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(POWER_POLL_INTERVAL).await;
        }
    })
}

pub(crate) fn backend(e: bluer::Error) -> blueear_core::AdapterError {
    blueear_core::AdapterError::Backend(e.to_string())
}
