//! 协议错误类型定义

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 响应超时
    #[error("timeout: {0}")]
    Timeout(String),

    /// 断开连接时取消未完成事务
    #[error("transaction cancelled")]
    Cancelled,

    /// 帧格式错误（畸形帧、事务号不匹配）
    #[error("frame error: {0}")]
    Frame(String),

    /// 从站返回异常响应
    #[error("modbus exception: function 0x{function:02x}, code 0x{code:02x}")]
    Exception { function: u8, code: u8 },

    /// 请求参数非法（数量超限等）
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 通道关闭
    #[error("channel closed")]
    ChannelClosed,
}
