//! # 协议通信能力模块
//!
//! Modbus TCP 主站实现，独占底层 TCP 套接字：
//! - **帧编解码**：MBAP 头 + PDU 的构造与解析（`frame`）
//! - **事务关联**：按事务号登记在途请求，超时定期扫描（`pending`）
//! - **主站生命周期**：连接、断开、保活、连接事件广播（`master`）
//! - **位操作**：位写入所需的读-改-写辅助（`bits`）
//!
//! ## 架构设计
//!
//! ```text
//! ModbusMaster::submit(request)
//!       │ 登记 PendingTable，写套接字
//!       ▼
//! reader_loop ──按事务号──▶ oneshot 完成
//! sweeper_loop ──按期限──▶ 超时完成
//! keep_alive_loop ──固定间隔──▶ 普通读取
//!       │
//!       ▼
//! broadcast<LinkEvent>（connected / disconnected / error / timeout）
//! ```
//!
//! ## 失败语义
//!
//! 套接字错误只通过事件与 `connect` 的返回值暴露，不跨任务边界
//! 抛出；断开连接时全部在途事务以取消错误立即完成，而不是等待
//! 各自超时。

mod bits;
mod error;
mod frame;
mod master;
mod pending;

pub use bits::{register_bit, set_bit_in_register};
pub use error::ProtocolError;
pub use frame::{
    decode_header, decode_response, exception_name, validate_header, FrameHeader, Request,
    Response, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    MAX_PDU_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS, MBAP_HEADER_LEN,
};
pub use master::{KeepAliveConfig, LinkEvent, MasterConfig, ModbusMaster, Submitted};
