//! 网关事件定义
//!
//! 采集编排器对外的事件扇出：告警、上报等外部服务通过
//! 有界广播通道订阅，避免阻塞采集控制流。

use domain::{Quality, ValueData};

/// 网关事件。
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// 连接建立
    Connected,
    /// 连接断开
    Disconnected { reason: String },
    /// 传输/保活错误
    Error { message: String },
    /// 单事务超时
    Timeout { transaction_id: u16 },
    /// 点位值更新
    DataUpdate {
        identifier: String,
        value: ValueData,
        quality: Quality,
    },
    /// 调度了一次重连
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// 重连次数耗尽（终态，不再自动重试）
    ReconnectFailed { attempts: u32 },
    /// 写入完成
    WriteCompleted { identifier: String },
}
