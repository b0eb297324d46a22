//! Modbus TCP 主站
//!
//! 独占 TCP 套接字：请求编码后写入套接字并登记在途事务，
//! 读取任务按事务号将响应帧路由回发起方，扫描任务按期限
//! 将超时事务置为超时错误。连接级事件通过广播通道对外发布。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let config = MasterConfig {
//!     host: "192.168.1.100".to_string(),
//!     ..MasterConfig::default_for_host("192.168.1.100")
//! };
//! let master = ModbusMaster::new(config);
//! master.connect().await?;
//! let words = master.read_holding_registers(100, 2).await?;
//! ```

use crate::error::ProtocolError;
use crate::frame::{
    decode_header, decode_response, validate_header, Request, Response, FC_READ_COILS,
    FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    MBAP_HEADER_LEN,
};
use crate::pending::PendingTable;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 连接事件广播缓冲大小
const EVENT_CAPACITY: usize = 64;

/// 超时扫描周期（毫秒）
const SWEEP_INTERVAL_MS: u64 = 100;

/// 保活配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// 保活读取间隔（毫秒）
    #[serde(default = "default_keep_alive_interval")]
    pub interval_ms: u64,
    /// 保活读取地址
    #[serde(default)]
    pub address: u16,
    /// 保活读取功能码（默认读保持寄存器）
    #[serde(default = "default_keep_alive_function")]
    pub function: u8,
}

fn default_keep_alive_interval() -> u64 {
    10_000
}

fn default_keep_alive_function() -> u8 {
    FC_READ_HOLDING_REGISTERS
}

/// 主站连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// 从站主机地址
    pub host: String,
    /// 从站端口（默认 502）
    #[serde(default = "default_port")]
    pub port: u16,
    /// 单元号
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// 单事务响应超时（毫秒）
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// 连接建立超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 保活读取（可选）
    #[serde(default)]
    pub keep_alive: Option<KeepAliveConfig>,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout() -> u64 {
    3000
}

fn default_connect_timeout() -> u64 {
    5000
}

impl MasterConfig {
    /// 指定主机、其余取默认值的配置。
    pub fn default_for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            keep_alive: None,
        }
    }
}

/// 连接级事件。
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// 套接字建立
    Connected,
    /// 套接字关闭（主动断开或对端异常）
    Disconnected { reason: String },
    /// 套接字/保活错误
    Error { message: String },
    /// 单事务超时
    Timeout { transaction_id: u16 },
}

/// 已提交的请求：事务号 + 完成接收端。
pub struct Submitted {
    pub transaction_id: u16,
    completion: oneshot::Receiver<Result<Response, ProtocolError>>,
}

impl Submitted {
    /// 等待响应交付（响应帧、超时扫描或取消）。
    pub async fn response(self) -> Result<Response, ProtocolError> {
        self.completion
            .await
            .map_err(|_| ProtocolError::ChannelClosed)?
    }
}

struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    keep_alive: Option<JoinHandle<()>>,
}

struct MasterInner {
    config: MasterConfig,
    pending: Mutex<PendingTable>,
    connection: Mutex<Option<Connection>>,
    events: broadcast::Sender<LinkEvent>,
}

/// Modbus TCP 主站句柄（可克隆，内部共享）。
#[derive(Clone)]
pub struct ModbusMaster {
    inner: Arc<MasterInner>,
}

impl ModbusMaster {
    /// 创建主站（未连接）。
    pub fn new(config: MasterConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MasterInner {
                config,
                pending: Mutex::new(PendingTable::new()),
                connection: Mutex::new(None),
                events,
            }),
        }
    }

    /// 订阅连接事件。
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// 当前配置。
    pub fn config(&self) -> &MasterConfig {
        &self.inner.config
    }

    /// 是否已连接。
    pub async fn is_connected(&self) -> bool {
        self.inner.connection.lock().await.is_some()
    }

    /// 建立连接：启动读取、超时扫描与保活任务。已连接时幂等。
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let mut slot = self.inner.connection.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.inner.config.host, self.inner.config.port);
        let connect_timeout = Duration::from_millis(self.inner.config.connect_timeout_ms);
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                let message = format!("connect to {addr} failed: {err}");
                let _ = self.inner.events.send(LinkEvent::Error {
                    message: message.clone(),
                });
                return Err(ProtocolError::Connection(message));
            }
            Err(_) => {
                let message = format!("connect to {addr} timed out");
                let _ = self.inner.events.send(LinkEvent::Error {
                    message: message.clone(),
                });
                return Err(ProtocolError::Timeout(message));
            }
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let reader = tokio::spawn(reader_loop(Arc::downgrade(&self.inner), read_half));
        let sweeper = tokio::spawn(sweeper_loop(Arc::downgrade(&self.inner)));
        let keep_alive = self
            .inner
            .config
            .keep_alive
            .clone()
            .map(|config| tokio::spawn(keep_alive_loop(Arc::downgrade(&self.inner), config)));

        *slot = Some(Connection {
            writer: write_half,
            reader,
            sweeper,
            keep_alive,
        });
        drop(slot);

        info!(addr = %addr, unit = self.inner.config.unit_id, "modbus master connected");
        let _ = self.inner.events.send(LinkEvent::Connected);
        Ok(())
    }

    /// 断开连接：取消全部在途事务并清理定时任务。幂等。
    pub async fn disconnect(&self) {
        teardown(&self.inner, "disconnect requested", None).await;
    }

    /// 提交请求：登记事务、写入套接字，立即返回事务号与完成接收端。
    pub async fn submit(&self, request: Request) -> Result<Submitted, ProtocolError> {
        request.validate()?;

        let mut slot = self.inner.connection.lock().await;
        let connection = slot
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("not connected".to_string()))?;

        let timeout = Duration::from_millis(self.inner.config.timeout_ms);
        let (transaction_id, completion) = self
            .inner
            .pending
            .lock()
            .await
            .register(request.function(), timeout);

        let frame = request.encode(transaction_id, self.inner.config.unit_id);
        if let Err(err) = connection.writer.write_all(&frame).await {
            // 写失败视作连接失效：摘除刚登记的事务并整体拆线
            self.inner
                .pending
                .lock()
                .await
                .complete(transaction_id, Err(ProtocolError::Cancelled));
            drop(slot);
            teardown(
                &self.inner,
                "socket write failed",
                Some(format!("write failed: {err}")),
            )
            .await;
            return Err(ProtocolError::Io(err));
        }

        debug!(
            transaction = transaction_id,
            function = request.function(),
            "request submitted"
        );
        Ok(Submitted {
            transaction_id,
            completion,
        })
    }

    /// 读保持寄存器 (FC03)。
    pub async fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.submit(Request::ReadWords {
            function: FC_READ_HOLDING_REGISTERS,
            address,
            quantity,
        })
        .await?
        .response()
        .await?
        .into_words()
    }

    /// 读输入寄存器 (FC04)。
    pub async fn read_input_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.submit(Request::ReadWords {
            function: FC_READ_INPUT_REGISTERS,
            address,
            quantity,
        })
        .await?
        .response()
        .await?
        .into_words()
    }

    /// 读线圈 (FC01)。
    pub async fn read_coils(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        self.submit(Request::ReadBits {
            function: FC_READ_COILS,
            address,
            quantity,
        })
        .await?
        .response()
        .await?
        .into_bits()
    }

    /// 读离散输入 (FC02)。
    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        self.submit(Request::ReadBits {
            function: FC_READ_DISCRETE_INPUTS,
            address,
            quantity,
        })
        .await?
        .response()
        .await?
        .into_bits()
    }

    /// 写单寄存器 (FC06)。
    pub async fn write_single_register(
        &self,
        address: u16,
        value: u16,
    ) -> Result<(), ProtocolError> {
        let response = self
            .submit(Request::WriteSingle { address, value })
            .await?
            .response()
            .await?;
        match response {
            Response::WriteAck { .. } => Ok(()),
            other => Err(ProtocolError::Frame(format!(
                "expected write ack, got {other:?}"
            ))),
        }
    }

    /// 写多寄存器 (FC16)。
    pub async fn write_multiple_registers(
        &self,
        address: u16,
        values: Vec<u16>,
    ) -> Result<(), ProtocolError> {
        let response = self
            .submit(Request::WriteMultiple { address, values })
            .await?
            .response()
            .await?;
        match response {
            Response::WriteAck { .. } => Ok(()),
            other => Err(ProtocolError::Frame(format!(
                "expected write ack, got {other:?}"
            ))),
        }
    }

    /// 在途事务数量（观测用）。
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

/// 拆线：取消在途事务、停止定时任务、发布事件。
async fn teardown(inner: &Arc<MasterInner>, reason: &str, error: Option<String>) {
    let mut slot = inner.connection.lock().await;
    let Some(mut connection) = slot.take() else {
        return;
    };
    drop(slot);

    let _ = connection.writer.shutdown().await;
    let cancelled = inner.pending.lock().await.cancel_all();
    if cancelled > 0 {
        warn!(cancelled, reason, "cancelled in-flight transactions");
    }

    if let Some(message) = error {
        let _ = inner.events.send(LinkEvent::Error { message });
    }
    let _ = inner.events.send(LinkEvent::Disconnected {
        reason: reason.to_string(),
    });
    info!(reason, "modbus master disconnected");

    // 自拆线时 reader 即将自行退出，abort 对其无害
    connection.sweeper.abort();
    if let Some(task) = connection.keep_alive.take() {
        task.abort();
    }
    connection.reader.abort();
}

/// 读取任务：按 MBAP 头取帧并路由到在途事务。
async fn reader_loop(inner: Weak<MasterInner>, mut read_half: OwnedReadHalf) {
    let mut header_buf = [0u8; MBAP_HEADER_LEN];
    loop {
        if let Err(err) = read_half.read_exact(&mut header_buf).await {
            if let Some(inner) = inner.upgrade() {
                let reason = if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    "peer closed connection".to_string()
                } else {
                    format!("socket read failed: {err}")
                };
                teardown(&inner, "socket error", Some(reason)).await;
            }
            return;
        }

        let header = decode_header(&header_buf);
        if let Err(err) = validate_header(&header) {
            // MBAP 头损坏意味着字节流失步，无法继续取帧
            if let Some(inner) = inner.upgrade() {
                teardown(&inner, "corrupt frame", Some(err.to_string())).await;
            }
            return;
        }

        let mut pdu = vec![0u8; header.length as usize - 1];
        if let Err(err) = read_half.read_exact(&mut pdu).await {
            if let Some(inner) = inner.upgrade() {
                teardown(
                    &inner,
                    "socket error",
                    Some(format!("socket read failed: {err}")),
                )
                .await;
            }
            return;
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut pending = inner.pending.lock().await;
        let Some(expected) = pending.expected_function(header.transaction_id) else {
            warn!(
                transaction = header.transaction_id,
                "discarding unsolicited frame"
            );
            continue;
        };
        match decode_response(expected, &pdu) {
            Ok(response) => {
                pending.complete(header.transaction_id, Ok(response));
            }
            Err(err @ ProtocolError::Exception { .. }) => {
                pending.complete(header.transaction_id, Err(err));
            }
            Err(err) => {
                // 功能码不匹配/畸形 PDU：丢帧并等事务自然超时
                warn!(
                    transaction = header.transaction_id,
                    error = %err,
                    "discarding mismatched frame"
                );
            }
        }
    }
}

/// 超时扫描任务：周期性将过期事务置为超时错误。
async fn sweeper_loop(inner: Weak<MasterInner>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let expired = inner.pending.lock().await.sweep_expired(Instant::now());
        for transaction_id in expired {
            warn!(transaction = transaction_id, "transaction timed out");
            let _ = inner.events.send(LinkEvent::Timeout { transaction_id });
        }
    }
}

/// 保活任务：固定间隔发出一次读取，失败走普通错误路径。
async fn keep_alive_loop(inner: Weak<MasterInner>, config: KeepAliveConfig) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.interval_ms.max(100)));
    // 首个 tick 立即触发，跳过以避免连接后立刻保活
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let master = ModbusMaster { inner };

        let result = match config.function {
            FC_READ_COILS => master.read_coils(config.address, 1).await.map(|_| ()),
            FC_READ_DISCRETE_INPUTS => master
                .read_discrete_inputs(config.address, 1)
                .await
                .map(|_| ()),
            FC_READ_INPUT_REGISTERS => master
                .read_input_registers(config.address, 1)
                .await
                .map(|_| ()),
            _ => master
                .read_holding_registers(config.address, 1)
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => debug!(address = config.address, "keep-alive ok"),
            Err(err) => {
                warn!(error = %err, "keep-alive read failed");
                let _ = master.inner.events.send(LinkEvent::Error {
                    message: format!("keep-alive failed: {err}"),
                });
            }
        }
    }
}
