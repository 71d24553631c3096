//! 内容提供者
//!
//! peripheral 角色每个推送 tick 拉取一个 payload。具体策略由外部
//! 注入——在构造会话时显式传入，而不是在回调深处读全局状态。

use std::time::Instant;

use crate::codec::Payload;

/// 可替换的 payload 生成策略
pub trait ContentProvider: Send {
    fn next_payload(&mut self) -> Payload;
}

/// 循环播放调用方给定的 payload 列表
pub struct SequenceProvider {
    items: Vec<Payload>,
    next: usize,
}

impl SequenceProvider {
    /// 空列表会退化为永远发送空 payload
    pub fn new(items: Vec<Payload>) -> Self {
        Self { items, next: 0 }
    }
}

impl ContentProvider for SequenceProvider {
    fn next_payload(&mut self) -> Payload {
        if self.items.is_empty() {
            return Payload::new();
        }
        let payload = self.items[self.next % self.items.len()].clone();
        self.next = self.next.wrapping_add(1);
        payload
    }
}

/// 报告自会话启动以来经过的秒数
pub struct UptimeProvider {
    started: Instant,
}

impl UptimeProvider {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for UptimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentProvider for UptimeProvider {
    fn next_payload(&mut self) -> Payload {
        Payload::from_pairs([("uptime", self.started.elapsed().as_secs().to_string())])
    }
}
