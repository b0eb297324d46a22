//! 追踪与运行计数。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 进程级运行标识。
#[derive(Debug, Clone)]
pub struct RunIds {
    pub run_id: String,
    pub trace_id: String,
}

/// 采集链路指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub poll_cycles: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub read_retries: u64,
    pub read_timeouts: u64,
    pub reconnects: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub persist_errors: u64,
}

/// 采集链路指标。
pub struct TelemetryMetrics {
    poll_cycles: AtomicU64,
    reads_ok: AtomicU64,
    reads_failed: AtomicU64,
    read_retries: AtomicU64,
    read_timeouts: AtomicU64,
    reconnects: AtomicU64,
    writes_ok: AtomicU64,
    writes_failed: AtomicU64,
    persist_errors: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            poll_cycles: AtomicU64::new(0),
            reads_ok: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            read_retries: AtomicU64::new(0),
            read_timeouts: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            writes_ok: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            persist_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            read_retries: self.read_retries.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 run_id 与 trace_id。
pub fn new_run_ids() -> RunIds {
    RunIds {
        run_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录完成一个轮询周期。
pub fn record_poll_cycle() {
    metrics().poll_cycles.fetch_add(1, Ordering::Relaxed);
}

/// 记录单点读取成功。
pub fn record_read_ok() {
    metrics().reads_ok.fetch_add(1, Ordering::Relaxed);
}

/// 记录单点读取最终失败（重试耗尽）。
pub fn record_read_failure() {
    metrics().reads_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录单点读取重试一次。
pub fn record_read_retry() {
    metrics().read_retries.fetch_add(1, Ordering::Relaxed);
}

/// 记录事务超时一次。
pub fn record_read_timeout() {
    metrics().read_timeouts.fetch_add(1, Ordering::Relaxed);
}

/// 记录发起一次重连。
pub fn record_reconnect() {
    metrics().reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入成功。
pub fn record_write_ok() {
    metrics().writes_ok.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入最终失败。
pub fn record_write_failure() {
    metrics().writes_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次落库失败。
pub fn record_persist_error() {
    metrics().persist_errors.fetch_add(1, Ordering::Relaxed);
}
