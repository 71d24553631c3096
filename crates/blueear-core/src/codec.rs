//! Payload 编解码
//!
//! 将扁平的 String→String 字典编码为 GATT 特征上交换的紧凑二进制 blob。
//! 线格式为 bincode，仅在本系统的通信实例之间私有使用，不承诺跨版本兼容。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 通过特征交换的键值数据单元
///
/// 键顺序无关紧要：`decode(encode(p))` 恢复同一键值集合，
/// 但 `encode(decode(bytes))` 不保证字节级一致。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从键值对构造
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 第一个值（通知文本等展示用途取首项即可）
    pub fn first_value(&self) -> Option<&str> {
        self.0.values().next().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 编解码错误
///
/// 编解码失败只丢弃当前请求/更新，不会终止会话。
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload encode failed: {0}")]
    Serialization(#[source] bincode::Error),

    #[error("payload decode failed: {0}")]
    Deserialization(#[source] bincode::Error),
}

/// 编码为线格式 blob
pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(payload).map_err(CodecError::Serialization)
}

/// 从线格式 blob 解码
pub fn decode(bytes: &[u8]) -> Result<Payload, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_pairs() {
        let payload = Payload::from_pairs([("lat", "55.6761"), ("lon", "12.5683")]);
        let bytes = encode(&payload).unwrap();
        assert_eq!(decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn roundtrip_is_order_independent() {
        let a = Payload::from_pairs([("one", "1"), ("two", "2"), ("three", "3")]);
        let b = Payload::from_pairs([("three", "3"), ("one", "1"), ("two", "2")]);
        assert_eq!(a, b);
        assert_eq!(decode(&encode(&a).unwrap()).unwrap(), b);
    }

    #[test]
    fn roundtrip_unicode() {
        let payload = Payload::from_pairs([("城市", "哥本哈根"), ("note", "Tver'")]);
        assert_eq!(decode(&encode(&payload).unwrap()).unwrap(), payload);
    }

    #[test]
    fn roundtrip_empty() {
        let payload = Payload::new();
        assert_eq!(decode(&encode(&payload).unwrap()).unwrap(), payload);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(&[0xff; 16]).unwrap_err();
        assert!(matches!(err, CodecError::Deserialization(_)));
    }

    #[test]
    fn decode_rejects_truncated() {
        let payload = Payload::from_pairs([("cmd", "ping")]);
        let bytes = encode(&payload).unwrap();
        assert!(decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
