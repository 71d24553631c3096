//! Beacon 身份与固定服务描述
//!
//! (region UUID, major, minor) 三元组加人类可读标签构成 iBeacon 身份，
//! 广播端与观察端共享同一身份以约定同一 region。数据交换服务的
//! service/characteristic UUID 同样是双方先验已知的，连接后只发现
//! 对端是否暴露它们，而不发现应该使用哪些 UUID。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// iBeacon region
pub const BEACON_REGION_UUID: Uuid = Uuid::from_u128(0x7d0d9b66_0554_4ccf_a6e4_ade12325c4f0);
pub const BEACON_MAJOR: u16 = 123;
pub const BEACON_MINOR: u16 = 789;

/// 数据交换服务
pub const DATA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0cdbe648_eed0_11e6_bc64_92361f002671);
pub const DATA_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x199ab74c_eed0_11e6_bc64_92361f002672);

/// iBeacon 厂商数据使用 Apple 的 company id
pub const APPLE_COMPANY_ID: u16 = 0x004c;

const FRAME_TYPE_IBEACON: u8 = 0x02;
const FRAME_LEN_IBEACON: u8 = 0x15;

/// 正在广播或观察的 iBeacon 身份，进程生命周期内不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconIdentity {
    pub region_id: Uuid,
    pub major: u16,
    pub minor: u16,
    pub label: String,
}

impl Default for BeaconIdentity {
    fn default() -> Self {
        Self {
            region_id: BEACON_REGION_UUID,
            major: BEACON_MAJOR,
            minor: BEACON_MINOR,
            label: "blueear".to_string(),
        }
    }
}

impl BeaconIdentity {
    pub fn new(region_id: Uuid, major: u16, minor: u16, label: impl Into<String>) -> Self {
        Self {
            region_id,
            major,
            minor,
            label: label.into(),
        }
    }

    /// 构造 iBeacon 厂商数据帧（不含 company id 本身）
    ///
    /// 布局: type(0x02) len(0x15) uuid[16] major[2] minor[2] power[1]，
    /// major/minor 大端。
    pub fn to_frame(&self, measured_power: i8) -> Vec<u8> {
        let mut frame = Vec::with_capacity(23);
        frame.push(FRAME_TYPE_IBEACON);
        frame.push(FRAME_LEN_IBEACON);
        frame.extend_from_slice(self.region_id.as_bytes());
        frame.extend_from_slice(&self.major.to_be_bytes());
        frame.extend_from_slice(&self.minor.to_be_bytes());
        frame.push(measured_power as u8);
        frame
    }

    /// 判断一个解析出的帧是否属于本 region
    pub fn matches(&self, frame: &BeaconFrame) -> bool {
        frame.region_id == self.region_id && frame.major == self.major && frame.minor == self.minor
    }
}

/// 从厂商数据中解析出的 iBeacon 帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    pub region_id: Uuid,
    pub major: u16,
    pub minor: u16,
    pub measured_power: i8,
}

impl BeaconFrame {
    /// 解析 company id 0x004C 下的厂商数据；非 iBeacon 帧返回 None
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != 23 || data[0] != FRAME_TYPE_IBEACON || data[1] != FRAME_LEN_IBEACON {
            return None;
        }
        let region_id = Uuid::from_slice(&data[2..18]).ok()?;
        let major = u16::from_be_bytes([data[18], data[19]]);
        let minor = u16::from_be_bytes([data[20], data[21]]);
        Some(Self {
            region_id,
            major,
            minor,
            measured_power: data[22] as i8,
        })
    }
}

/// 由信号强度推导的粗粒度距离分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proximity {
    Immediate,
    Near,
    Far,
    Unknown,
}

impl Proximity {
    /// RSSI → 距离分类；阈值是经验值，只保证单调
    pub fn from_rssi(rssi: Option<i16>) -> Self {
        match rssi {
            Some(r) if r >= -40 => Proximity::Immediate,
            Some(r) if r >= -70 => Proximity::Near,
            Some(_) => Proximity::Far,
            None => Proximity::Unknown,
        }
    }
}

/// 特征能力集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub read: bool,
    pub notify: bool,
    pub write: bool,
    pub write_without_response: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            read: true,
            notify: true,
            write: true,
            write_without_response: true,
        }
    }
}

/// 双方先验约定的 GATT 服务/特征描述，不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub capabilities: Capabilities,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            service_id: DATA_SERVICE_UUID,
            characteristic_id: DATA_CHARACTERISTIC_UUID,
            capabilities: Capabilities::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let identity = BeaconIdentity::default();
        let frame = identity.to_frame(-59);
        let parsed = BeaconFrame::parse(&frame).unwrap();
        assert_eq!(parsed.region_id, identity.region_id);
        assert_eq!(parsed.major, BEACON_MAJOR);
        assert_eq!(parsed.minor, BEACON_MINOR);
        assert_eq!(parsed.measured_power, -59);
        assert!(identity.matches(&parsed));
    }

    #[test]
    fn frame_major_minor_big_endian() {
        let identity = BeaconIdentity::new(BEACON_REGION_UUID, 0x0102, 0x0304, "t");
        let frame = identity.to_frame(0);
        assert_eq!(&frame[18..22], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn parse_rejects_foreign_frames() {
        // 长度错误
        assert!(BeaconFrame::parse(&[0x02, 0x15, 0x00]).is_none());
        // 非 iBeacon type 字节
        let mut frame = BeaconIdentity::default().to_frame(0);
        frame[0] = 0x06;
        assert!(BeaconFrame::parse(&frame).is_none());
    }

    #[test]
    fn foreign_region_does_not_match() {
        let identity = BeaconIdentity::default();
        let other = BeaconIdentity::new(Uuid::from_u128(0xdead_beef), 1, 2, "other");
        let parsed = BeaconFrame::parse(&other.to_frame(0)).unwrap();
        assert!(!identity.matches(&parsed));
    }

    #[test]
    fn proximity_from_rssi_is_monotonic() {
        assert_eq!(Proximity::from_rssi(Some(-30)), Proximity::Immediate);
        assert_eq!(Proximity::from_rssi(Some(-60)), Proximity::Near);
        assert_eq!(Proximity::from_rssi(Some(-85)), Proximity::Far);
        assert_eq!(Proximity::from_rssi(None), Proximity::Unknown);
    }
}
