//! 错误分类
//!
//! 没有任何错误对进程是全局致命的：每个失败都限定在当前会话内，
//! 并通过 Event Sink 交给消费者决定提示或重试策略。

use thiserror::Error;
use uuid::Uuid;

/// 会话级错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// 定位/区域授权被拒绝。对观察者角色致命，只上报一次，不重试。
    #[error("authorization denied")]
    PermissionDenied,

    /// radio 关闭。可恢复，会话驻留等待并在开机信号到来时自动恢复。
    #[error("radio unavailable")]
    RadioUnavailable,

    /// 适配器原语失败
    #[error("adapter failure: {0}")]
    Adapter(String),
}

/// 适配器原语错误
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("radio powered off")]
    PoweredOff,

    #[error("peer not found")]
    PeerNotFound,

    #[error("service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<&AdapterError> for SessionError {
    fn from(err: &AdapterError) -> Self {
        SessionError::Adapter(err.to_string())
    }
}
