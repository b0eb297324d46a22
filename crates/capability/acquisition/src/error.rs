//! 采集编排错误类型定义

use mgw_protocol::ProtocolError;

/// 采集编排错误
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    /// 传输层错误（连接、超时、异常响应）
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),

    /// 未连接
    #[error("not connected")]
    NotConnected,

    /// 校验错误（未知点位、只读点写入、值越界），同步拒绝，不重试
    #[error("validation error: {0}")]
    Validation(String),

    /// 解码错误（寄存器数量不足等）
    #[error("decode error: {0}")]
    Decode(String),

    /// 批次处理器错误
    #[error("handler error: {0}")]
    Handler(String),
}

impl AcquisitionError {
    /// 是否值得就地重试（仅传输类故障）。
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AcquisitionError::Transport(
                ProtocolError::Timeout(_)
                    | ProtocolError::Io(_)
                    | ProtocolError::Connection(_)
                    | ProtocolError::ChannelClosed
            )
        )
    }
}
