//! 采集编排器
//!
//! 持有连接状态机、轮询调度与写入通道：
//! - 连接：`Disconnected → Connecting → Connected → Reconnecting`，
//!   重连延迟按 1.5 倍指数退避，封顶 30 秒；次数耗尽发终态事件。
//! - 轮询：可读点位按批读取，批间有步进延迟；单点失败就地重试，
//!   不中断整个周期。
//! - 失败分级：单次读失败仅计数，连续失败达到阈值才拆线重连；
//!   套接字关闭事件则立即转移状态。

use crate::decode;
use crate::error::AcquisitionError;
use crate::events::GatewayEvent;
use async_trait::async_trait;
use domain::{DataPoint, DataValue, PointRegistry, Quality, RawValue, RegisterKind, ValueData,
    ValueFormat, WriteKind};
use mgw_protocol::{
    set_bit_in_register, LinkEvent, ModbusMaster, ProtocolError, Request, Response,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// 事件广播缓冲大小
const EVENT_CAPACITY: usize = 256;

/// 重连延迟封顶（毫秒）
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// 最小轮询间隔下限（毫秒）
const MIN_POLL_FLOOR_MS: u64 = 5000;

/// 单批读取耗时估计（毫秒，最小轮询间隔估算用）
const BATCH_READ_ESTIMATE_MS: u64 = 300;

/// 采集编排配置。
///
/// 批大小、步进延迟、失败阈值均为经验默认值，按现场情况调整。
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// 断开后是否自动重连
    pub auto_reconnect: bool,
    /// 最大重连次数
    pub max_reconnect_attempts: u32,
    /// 重连基础延迟（毫秒）
    pub reconnect_base_delay_ms: u64,
    /// 单批点位数量
    pub batch_size: usize,
    /// 批间步进延迟（毫秒）
    pub batch_delay_ms: u64,
    /// 单点读取追加重试次数
    pub read_max_retries: u32,
    /// 重试基础延迟（毫秒，逐次翻倍）
    pub retry_base_delay_ms: u64,
    /// 拆线前的连续失败阈值
    pub failure_threshold: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            batch_size: 8,
            batch_delay_ms: 200,
            read_max_retries: 2,
            retry_base_delay_ms: 200,
            failure_threshold: 5,
        }
    }
}

impl AcquisitionConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.failure_threshold == 0 {
            self.failure_threshold = 1;
        }
        self
    }
}

/// 连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// 轮询状态（查询面）。
#[derive(Debug, Clone)]
pub struct PollingStatus {
    pub active: bool,
    pub interval_ms: u64,
    pub last_cycle_ms: u64,
    pub min_interval_ms: u64,
    pub point_count: usize,
}

/// 周期批次处理器：每个轮询周期结束后收到全部点位值。
///
/// 存储引擎实现该接口完成变化检测落库。
#[async_trait]
pub trait ValueBatchHandler: Send + Sync {
    async fn handle(
        &self,
        points: &[DataPoint],
        values: &HashMap<String, DataValue>,
    ) -> Result<(), AcquisitionError>;
}

struct PollingHandle {
    stop: watch::Sender<bool>,
}

struct OrchestratorInner {
    master: ModbusMaster,
    registry: Arc<PointRegistry>,
    config: AcquisitionConfig,
    handler: Option<Arc<dyn ValueBatchHandler>>,
    state: RwLock<ConnectionState>,
    /// 编排器自己的最新值缓存（与存储引擎的缓存彼此独立）
    cache: RwLock<HashMap<String, DataValue>>,
    consecutive_failures: AtomicU32,
    reconnect_attempts: AtomicU32,
    shutting_down: AtomicBool,
    polling: Mutex<Option<PollingHandle>>,
    polling_active: AtomicBool,
    poll_interval_ms: AtomicU64,
    last_cycle_ms: AtomicU64,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<GatewayEvent>,
}

/// 采集编排器句柄（可克隆，内部共享）。
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    /// 显式注入主站、点表与批次处理器。
    pub fn new(
        master: ModbusMaster,
        registry: Arc<PointRegistry>,
        config: AcquisitionConfig,
        handler: Option<Arc<dyn ValueBatchHandler>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let link_events = master.subscribe();
        let inner = Arc::new(OrchestratorInner {
            master,
            registry,
            config: config.sanitized(),
            handler,
            state: RwLock::new(ConnectionState::Disconnected),
            cache: RwLock::new(HashMap::new()),
            consecutive_failures: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
            shutting_down: AtomicBool::new(false),
            polling: Mutex::new(None),
            polling_active: AtomicBool::new(false),
            poll_interval_ms: AtomicU64::new(0),
            last_cycle_ms: AtomicU64::new(0),
            reconnect_task: StdMutex::new(None),
            events,
        });
        tokio::spawn(link_event_pump(Arc::downgrade(&inner), link_events));
        Self { inner }
    }

    /// 订阅网关事件。
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    /// 当前连接状态。
    pub fn connection_state(&self) -> ConnectionState {
        connection_state(&self.inner)
    }

    /// 建立连接；失败时按配置调度重连。
    pub async fn connect(&self) -> Result<(), AcquisitionError> {
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        set_state(&self.inner, ConnectionState::Connecting);
        match self.inner.master.connect().await {
            Ok(()) => {
                set_state(&self.inner, ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "connect failed");
                if self.inner.config.auto_reconnect {
                    schedule_reconnect(&self.inner);
                } else {
                    set_state(&self.inner, ConnectionState::Disconnected);
                }
                Err(err.into())
            }
        }
    }

    /// 断开连接：停止轮询、清理重连定时器、取消在途事务。幂等。
    pub async fn disconnect(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.inner.reconnect_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
        self.stop_polling().await;
        self.inner.master.disconnect().await;
        set_state(&self.inner, ConnectionState::Disconnected);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// 启动轮询。已在轮询中时保持原任务不变。
    pub async fn start_polling(&self, interval_ms: u64) -> Result<(), AcquisitionError> {
        let mut slot = self.inner.polling.lock().await;
        if slot.is_some() {
            warn!("polling already active");
            return Ok(());
        }

        let min_interval = self.min_poll_interval_ms();
        if interval_ms < min_interval {
            warn!(
                interval_ms,
                min_interval, "poll interval below advisory minimum"
            );
        }

        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(poll_loop(
            Arc::downgrade(&self.inner),
            interval_ms,
            stop_rx,
        ));
        *slot = Some(PollingHandle { stop });
        self.inner
            .poll_interval_ms
            .store(interval_ms, Ordering::SeqCst);
        self.inner.polling_active.store(true, Ordering::SeqCst);
        info!(interval_ms, points = self.inner.registry.len(), "polling started");
        Ok(())
    }

    /// 停止轮询：阻止后续周期，但不中止在途批次。
    pub async fn stop_polling(&self) {
        let mut slot = self.inner.polling.lock().await;
        if let Some(handle) = slot.take() {
            let _ = handle.stop.send(true);
            self.inner.polling_active.store(false, Ordering::SeqCst);
            info!("polling stopped");
        }
    }

    /// 轮询状态（查询面）。
    pub fn polling_status(&self) -> PollingStatus {
        PollingStatus {
            active: self.inner.polling_active.load(Ordering::SeqCst),
            interval_ms: self.inner.poll_interval_ms.load(Ordering::SeqCst),
            last_cycle_ms: self.inner.last_cycle_ms.load(Ordering::SeqCst),
            min_interval_ms: self.min_poll_interval_ms(),
            point_count: self.inner.registry.len(),
        }
    }

    /// 按点位数量估算的最小轮询间隔（毫秒，建议值）。
    pub fn min_poll_interval_ms(&self) -> u64 {
        min_poll_interval_ms(
            self.inner.registry.pollable().len(),
            self.inner.config.batch_size,
            self.inner.config.batch_delay_ms,
        )
    }

    /// 缓存中的全部最新值。
    pub fn latest_values(&self) -> Vec<DataValue> {
        self.inner
            .cache
            .read()
            .map(|cache| cache.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 缓存中的单点最新值。
    pub fn latest_value(&self, identifier: &str) -> Option<DataValue> {
        self.inner
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(identifier).cloned())
    }

    /// 写入点位值（工程量）。
    ///
    /// 校验失败同步拒绝；传输失败按配置重试；成功后刷新缓存并
    /// 发布写完成事件。BIT 格式走读-改-写，只改目标位。
    pub async fn write_point_value(
        &self,
        identifier: &str,
        value: f64,
    ) -> Result<(), AcquisitionError> {
        let point = self
            .inner
            .registry
            .find(identifier)
            .cloned()
            .ok_or_else(|| {
                AcquisitionError::Validation(format!("unknown data point: {identifier}"))
            })?;
        if !point.access.writable() {
            return Err(AcquisitionError::Validation(format!(
                "point {identifier} is read-only"
            )));
        }
        if point.format == ValueFormat::Point {
            return Err(AcquisitionError::Validation(format!(
                "point {identifier} is derived and not writable"
            )));
        }

        let mut attempt = 0;
        let mut delay = self.inner.config.retry_base_delay_ms;
        loop {
            match write_once(&self.inner, &point, value).await {
                Ok(written) => {
                    if let Ok(mut cache) = self.inner.cache.write() {
                        cache.insert(written.identifier.clone(), written.clone());
                    }
                    emit(
                        &self.inner,
                        GatewayEvent::DataUpdate {
                            identifier: written.identifier.clone(),
                            value: written.value.clone(),
                            quality: written.quality,
                        },
                    );
                    emit(
                        &self.inner,
                        GatewayEvent::WriteCompleted {
                            identifier: written.identifier.clone(),
                        },
                    );
                    mgw_telemetry::record_write_ok();
                    info!(point = %written.identifier, value, "write completed");
                    return Ok(());
                }
                Err(err) if err.retryable() && attempt < self.inner.config.read_max_retries => {
                    attempt += 1;
                    warn!(point = identifier, attempt, error = %err, "write retry");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => {
                    mgw_telemetry::record_write_failure();
                    return Err(err);
                }
            }
        }
    }
}

fn connection_state(inner: &OrchestratorInner) -> ConnectionState {
    inner
        .state
        .read()
        .map(|state| *state)
        .unwrap_or(ConnectionState::Disconnected)
}

fn set_state(inner: &OrchestratorInner, state: ConnectionState) {
    if let Ok(mut guard) = inner.state.write() {
        if *guard != state {
            debug!(from = guard.as_str(), to = state.as_str(), "connection state");
            *guard = state;
        }
    }
}

fn emit(inner: &OrchestratorInner, event: GatewayEvent) {
    let _ = inner.events.send(event);
}

/// 最小轮询间隔估算：`batches*300 + (batches-1)*delay`，再乘 1.5，
/// 下限 5 秒。仅为建议值，供配置前预警。
fn min_poll_interval_ms(point_count: usize, batch_size: usize, batch_delay_ms: u64) -> u64 {
    if point_count == 0 {
        return MIN_POLL_FLOOR_MS;
    }
    let batches = point_count.div_ceil(batch_size.max(1)) as u64;
    let estimate = batches * BATCH_READ_ESTIMATE_MS + batches.saturating_sub(1) * batch_delay_ms;
    (estimate.saturating_mul(3) / 2).max(MIN_POLL_FLOOR_MS)
}

/// 重连延迟：`base * 1.5^(attempt-1)`，封顶 30 秒。
fn reconnect_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    let factor = 1.5f64.powi(attempt.saturating_sub(1) as i32);
    ((base_delay_ms as f64 * factor) as u64).min(MAX_RECONNECT_DELAY_MS)
}

/// 调度一次重连；次数耗尽时进入终态并发 `ReconnectFailed`。
fn schedule_reconnect(inner: &Arc<OrchestratorInner>) {
    let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    let max_attempts = inner.config.max_reconnect_attempts;
    if attempt > max_attempts {
        inner
            .reconnect_attempts
            .store(max_attempts, Ordering::SeqCst);
        set_state(inner, ConnectionState::Disconnected);
        warn!(attempts = max_attempts, "reconnect attempts exhausted");
        emit(
            inner,
            GatewayEvent::ReconnectFailed {
                attempts: max_attempts,
            },
        );
        return;
    }

    set_state(inner, ConnectionState::Reconnecting);
    let delay_ms = reconnect_delay_ms(inner.config.reconnect_base_delay_ms, attempt);
    info!(attempt, delay_ms, "reconnect scheduled");
    emit(inner, GatewayEvent::Reconnecting { attempt, delay_ms });

    let weak = Arc::downgrade(inner);
    let task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        mgw_telemetry::record_reconnect();
        match inner.master.connect().await {
            Ok(()) => set_state(&inner, ConnectionState::Connected),
            Err(err) => {
                warn!(attempt, error = %err, "reconnect attempt failed");
                schedule_reconnect(&inner);
            }
        }
    });
    if let Ok(mut guard) = inner.reconnect_task.lock() {
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
    }
}

/// 连接事件泵：将协议层事件翻译为网关事件并驱动状态机。
async fn link_event_pump(
    inner: Weak<OrchestratorInner>,
    mut link_events: broadcast::Receiver<LinkEvent>,
) {
    loop {
        let event = match link_events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "link event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            LinkEvent::Connected => {
                set_state(&inner, ConnectionState::Connected);
                inner.reconnect_attempts.store(0, Ordering::SeqCst);
                inner.consecutive_failures.store(0, Ordering::SeqCst);
                emit(&inner, GatewayEvent::Connected);
            }
            LinkEvent::Disconnected { reason } => {
                emit(&inner, GatewayEvent::Disconnected {
                    reason: reason.clone(),
                });
                if inner.shutting_down.load(Ordering::SeqCst) {
                    set_state(&inner, ConnectionState::Disconnected);
                } else if inner.config.auto_reconnect {
                    // 套接字关闭立即转移状态，无需等失败计数
                    schedule_reconnect(&inner);
                } else {
                    set_state(&inner, ConnectionState::Disconnected);
                }
            }
            LinkEvent::Error { message } => {
                emit(&inner, GatewayEvent::Error { message });
            }
            LinkEvent::Timeout { transaction_id } => {
                mgw_telemetry::record_read_timeout();
                emit(&inner, GatewayEvent::Timeout { transaction_id });
            }
        }
    }
}

/// 轮询循环：周期边界检查停止信号，不中止在途批次。
async fn poll_loop(
    inner: Weak<OrchestratorInner>,
    interval_ms: u64,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => return,
        }
        if *stop.borrow() {
            return;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if connection_state(&inner) != ConnectionState::Connected {
            debug!("skip poll cycle: not connected");
            continue;
        }
        run_poll_cycle(&inner).await;
    }
}

/// 单个轮询周期：批读、派生、合并缓存、发事件、交存储。
async fn run_poll_cycle(inner: &Arc<OrchestratorInner>) {
    let started = Instant::now();
    let pollable: Vec<DataPoint> = inner
        .registry
        .pollable()
        .into_iter()
        .cloned()
        .collect();
    if pollable.is_empty() {
        return;
    }

    let mut values: HashMap<String, DataValue> = HashMap::new();
    for (index, chunk) in pollable.chunks(inner.config.batch_size).enumerate() {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(inner.config.batch_delay_ms)).await;
        }

        // 批内并发下发，按事务号各自关联响应
        let mut reads = JoinSet::new();
        for point in chunk {
            let point = point.clone();
            let inner = Arc::clone(inner);
            reads.spawn(async move {
                let result = read_point_with_retry(&inner, &point).await;
                (point, result)
            });
        }
        while let Some(joined) = reads.join_next().await {
            let Ok((point, result)) = joined else {
                continue;
            };
            match result {
                Ok(value) => {
                    inner.consecutive_failures.store(0, Ordering::SeqCst);
                    mgw_telemetry::record_read_ok();
                    values.insert(point.identifier.clone(), value);
                }
                Err(err) => {
                    mgw_telemetry::record_read_failure();
                    let failures =
                        inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(point = %point.identifier, failures, error = %err, "read failed");
                    values.insert(point.identifier.clone(), bad_value(inner, &point));
                }
            }
        }
    }

    derive_point_values(inner, &mut values);

    if let Ok(mut cache) = inner.cache.write() {
        for value in values.values() {
            cache.insert(value.identifier.clone(), value.clone());
        }
    }
    for value in values.values() {
        emit(
            inner,
            GatewayEvent::DataUpdate {
                identifier: value.identifier.clone(),
                value: value.value.clone(),
                quality: value.quality,
            },
        );
    }

    if let Some(handler) = &inner.handler {
        let points: Vec<DataPoint> = inner
            .registry
            .readable()
            .into_iter()
            .cloned()
            .collect();
        if let Err(err) = handler.handle(&points, &values).await {
            warn!(error = %err, "batch handler failed");
            emit(
                inner,
                GatewayEvent::Error {
                    message: format!("batch handler failed: {err}"),
                },
            );
        }
    }

    let cycle_ms = started.elapsed().as_millis() as u64;
    inner.last_cycle_ms.store(cycle_ms, Ordering::SeqCst);
    mgw_telemetry::record_poll_cycle();
    debug!(cycle_ms, points = values.len(), "poll cycle finished");

    // 失败分级：阈值内只告警，达到阈值才拆线交给重连策略
    if inner.consecutive_failures.load(Ordering::SeqCst) >= inner.config.failure_threshold
        && connection_state(inner) == ConnectionState::Connected
    {
        warn!(
            threshold = inner.config.failure_threshold,
            "consecutive read failures reached threshold, marking connection down"
        );
        inner.consecutive_failures.store(0, Ordering::SeqCst);
        inner.master.disconnect().await;
    }
}

/// 派生点取值：从来源点位本周期（或缓存）的寄存器字中取位。
fn derive_point_values(inner: &Arc<OrchestratorInner>, values: &mut HashMap<String, DataValue>) {
    let derived_points: Vec<DataPoint> = inner
        .registry
        .points()
        .iter()
        .filter(|point| point.format == ValueFormat::Point && point.access.readable())
        .cloned()
        .collect();

    for point in derived_points {
        let Some(source_id) = point.source_identifier.as_deref() else {
            continue;
        };
        let source = values.get(source_id).cloned().or_else(|| {
            inner
                .cache
                .read()
                .ok()
                .and_then(|cache| cache.get(source_id).cloned())
        });
        let Some(source) = source else {
            debug!(point = %point.identifier, source = source_id, "derived source missing");
            continue;
        };
        let Some(word) = source.raw.first_word() else {
            continue;
        };
        let raw = RawValue::Words(vec![word]);
        let Ok(value) = decode::decode_value(&point, &raw) else {
            continue;
        };
        let formatted = decode::format_value(&point, &value);
        values.insert(
            point.identifier.clone(),
            DataValue {
                identifier: point.identifier.clone(),
                raw,
                value,
                formatted,
                quality: source.quality,
                ts_ms: source.ts_ms,
                read_time_ms: 0,
            },
        );
    }
}

/// 读失败占位值：保留旧值，质量置坏。
fn bad_value(inner: &Arc<OrchestratorInner>, point: &DataPoint) -> DataValue {
    let prior = inner
        .cache
        .read()
        .ok()
        .and_then(|cache| cache.get(&point.identifier).cloned());
    match prior {
        Some(mut value) => {
            value.quality = Quality::Bad;
            value.ts_ms = now_epoch_ms();
            value.read_time_ms = 0;
            value
        }
        None => DataValue {
            identifier: point.identifier.clone(),
            raw: RawValue::Words(Vec::new()),
            value: ValueData::String(String::new()),
            formatted: String::new(),
            quality: Quality::Bad,
            ts_ms: now_epoch_ms(),
            read_time_ms: 0,
        },
    }
}

/// 单点读取（重试外层）：传输类故障按 200ms 起步翻倍退避。
async fn read_point_with_retry(
    inner: &Arc<OrchestratorInner>,
    point: &DataPoint,
) -> Result<DataValue, AcquisitionError> {
    let mut attempt = 0;
    let mut delay = inner.config.retry_base_delay_ms;
    loop {
        match read_point_once(inner, point).await {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable() && attempt < inner.config.read_max_retries => {
                attempt += 1;
                mgw_telemetry::record_read_retry();
                debug!(point = %point.identifier, attempt, error = %err, "read retry");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }
}

/// 单点读取：按寄存器区域选传输调用，等待至多 2 倍传输超时。
async fn read_point_once(
    inner: &Arc<OrchestratorInner>,
    point: &DataPoint,
) -> Result<DataValue, AcquisitionError> {
    let started = Instant::now();
    let quantity = point.format.register_count();
    let request = match point.read_function {
        RegisterKind::Holding => Request::ReadWords {
            function: FC_READ_HOLDING_REGISTERS,
            address: point.address,
            quantity,
        },
        RegisterKind::Input => Request::ReadWords {
            function: FC_READ_INPUT_REGISTERS,
            address: point.address,
            quantity,
        },
        RegisterKind::Coil => Request::ReadBits {
            function: FC_READ_COILS,
            address: point.address,
            quantity: 1,
        },
        RegisterKind::DiscreteInput => Request::ReadBits {
            function: FC_READ_DISCRETE_INPUTS,
            address: point.address,
            quantity: 1,
        },
    };

    let submitted = inner.master.submit(request).await?;
    let wait = Duration::from_millis(inner.master.config().timeout_ms.saturating_mul(2));
    let response = tokio::time::timeout(wait, submitted.response())
        .await
        .map_err(|_| {
            ProtocolError::Timeout(format!("no completion within {}ms", wait.as_millis()))
        })??;

    let raw = match response {
        Response::Words(words) => RawValue::Words(words),
        Response::Bits(bits) => RawValue::Bits(bits),
        Response::WriteAck { .. } => {
            return Err(AcquisitionError::Decode(
                "unexpected write ack for read".to_string(),
            ));
        }
    };
    let value = decode::decode_value(point, &raw)?;
    let formatted = decode::format_value(point, &value);
    Ok(DataValue {
        identifier: point.identifier.clone(),
        raw,
        value,
        formatted,
        quality: Quality::Good,
        ts_ms: now_epoch_ms(),
        read_time_ms: started.elapsed().as_millis() as u64,
    })
}

/// 单次写入：BIT 走读-改-写，其余按格式编码。
async fn write_once(
    inner: &Arc<OrchestratorInner>,
    point: &DataPoint,
    value: f64,
) -> Result<DataValue, AcquisitionError> {
    let (raw, written_value) = match point.format {
        ValueFormat::Bit => {
            let bit = point.bit_position.ok_or_else(|| {
                AcquisitionError::Validation(format!(
                    "point {} missing bit_position",
                    point.identifier
                ))
            })?;
            let words = inner
                .master
                .read_holding_registers(point.address, 1)
                .await?;
            let current = words.first().copied().ok_or_else(|| {
                AcquisitionError::Decode("empty register response".to_string())
            })?;
            let target = value != 0.0;
            let updated = set_bit_in_register(current, bit, target);
            inner
                .master
                .write_single_register(point.address, updated)
                .await?;
            (RawValue::Words(vec![updated]), ValueData::Bool(target))
        }
        _ => {
            let words = decode::encode_write(point, value)?;
            match point.effective_write_kind() {
                WriteKind::SingleRegister => {
                    inner
                        .master
                        .write_single_register(point.address, words[0])
                        .await?;
                }
                WriteKind::MultipleRegisters => {
                    inner
                        .master
                        .write_multiple_registers(point.address, words.clone())
                        .await?;
                }
            }
            (RawValue::Words(words), ValueData::F64(value))
        }
    };

    let formatted = decode::format_value(point, &written_value);
    Ok(DataValue {
        identifier: point.identifier.clone(),
        raw,
        value: written_value,
        formatted,
        quality: Quality::Good,
        ts_ms: now_epoch_ms(),
        read_time_ms: 0,
    })
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
