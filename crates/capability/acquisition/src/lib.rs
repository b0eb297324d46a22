//! # 采集编排能力模块
//!
//! 在协议主站之上提供采集编排：
//! - **连接状态机**：connect/disconnect、指数退避重连、终态事件
//! - **轮询调度**：可读点位分批读取，批间步进延迟，单点就地重试
//! - **值解码**：整数位宽、IEEE-754 浮点、位提取、派生位（`decode`）
//! - **写入通道**：格式范围校验、BIT 读-改-写、缓存刷新
//! - **事件扇出**：connected / disconnected / error / timeout /
//!   dataUpdate / reconnecting / reconnect_failed / write_completed
//!
//! ## 架构设计
//!
//! ```text
//! PointRegistry（外部点表，只读）
//!       │
//!       ▼
//! Orchestrator ──批读──▶ ModbusMaster（协议层）
//!       │
//!       ├──▶ 最新值缓存（编排器独占）
//!       ├──▶ broadcast<GatewayEvent>
//!       └──▶ ValueBatchHandler（存储引擎实现）
//! ```

mod decode;
mod error;
mod events;
mod orchestrator;

pub use decode::{decode_value, encode_float32, encode_write, format_value};
pub use error::AcquisitionError;
pub use events::GatewayEvent;
pub use orchestrator::{
    AcquisitionConfig, ConnectionState, Orchestrator, PollingStatus, ValueBatchHandler,
};
