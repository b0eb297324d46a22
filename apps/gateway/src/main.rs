//! 采集网关进程：点表加载、主站/编排器/落库引擎接线与停机。

use async_trait::async_trait;
use domain::{DataPoint, DataValue, PointRegistry};
use mgw_acquisition::{
    AcquisitionConfig, AcquisitionError, GatewayEvent, Orchestrator, ValueBatchHandler,
};
use mgw_config::AppConfig;
use mgw_protocol::{KeepAliveConfig, MasterConfig, ModbusMaster};
use mgw_storage::{
    InMemoryValueStore, LatestRecord, PgValueStore, RecorderConfig, RedisLatestStore,
    ValueRecorder, ValueSink,
};
use mgw_telemetry::{init_tracing, metrics, new_run_ids};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 轮询批次 → 变化检测引擎（+ 可选 Redis 镜像）的桥接。
struct RecorderHandler {
    recorder: Arc<ValueRecorder>,
    mirror: Option<Arc<RedisLatestStore>>,
}

#[async_trait]
impl ValueBatchHandler for RecorderHandler {
    async fn handle(
        &self,
        points: &[DataPoint],
        values: &HashMap<String, DataValue>,
    ) -> Result<(), AcquisitionError> {
        let report = self
            .recorder
            .store_latest_values(points, values)
            .await
            .map_err(|err| {
                mgw_telemetry::record_persist_error();
                AcquisitionError::Handler(err.to_string())
            })?;
        debug!(
            processed = report.processed,
            changed = report.changed,
            unchanged = report.unchanged,
            first_time = report.first_time,
            forced = report.forced,
            "batch stored"
        );

        // 事务落库成功后的尽力而为镜像：失败只记日志，不影响批次
        if let Some(mirror) = &self.mirror {
            let now = now_epoch_ms();
            let records: Vec<LatestRecord> = points
                .iter()
                .filter_map(|point| {
                    values
                        .get(&point.identifier)
                        .map(|value| LatestRecord::from_value(point, value, now))
                })
                .collect();
            if let Err(err) = mirror.mirror_latest(&records).await {
                warn!(error = %err, "redis mirror failed");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();
    let ids = new_run_ids();
    info!(run_id = %ids.run_id, "gateway starting");

    // 点表（外部只读配置），加载后校验不变式
    let points_json = std::fs::read_to_string(&config.points_file)?;
    let points: Vec<DataPoint> = serde_json::from_str(&points_json)?;
    let registry = Arc::new(PointRegistry::new(points)?);
    info!(points = registry.len(), file = %config.points_file, "point registry loaded");

    // 落库后端：配置了数据库则用 Postgres，否则回退内存存储
    let sink: Arc<dyn ValueSink> = match &config.database_url {
        Some(url) => {
            let store = PgValueStore::connect(url).await?;
            info!("using postgres value store");
            Arc::new(store)
        }
        None => {
            warn!("MGW_DATABASE_URL not set, falling back to in-memory store");
            Arc::new(InMemoryValueStore::new())
        }
    };
    let recorder = Arc::new(ValueRecorder::with_config(
        sink,
        RecorderConfig {
            abs_tolerance: config.abs_tolerance,
            rel_tolerance: config.rel_tolerance,
            force_insert_interval_ms: config.force_insert_interval_ms,
            compare_formatted: config.compare_formatted,
        },
    ));

    // 可选的 Redis 快照镜像
    let mirror = match &config.redis_url {
        Some(url) => {
            let store =
                RedisLatestStore::connect_with_ttl(url, config.redis_latest_ttl_seconds)?;
            info!("redis latest mirror enabled");
            Some(Arc::new(store))
        }
        None => None,
    };

    // 协议主站
    let master = ModbusMaster::new(MasterConfig {
        host: config.modbus_host.clone(),
        port: config.modbus_port,
        unit_id: config.modbus_unit_id,
        timeout_ms: config.modbus_timeout_ms,
        connect_timeout_ms: config.connect_timeout_ms,
        keep_alive: config.keepalive_enabled.then(|| KeepAliveConfig {
            interval_ms: config.keepalive_interval_ms,
            address: config.keepalive_address,
            function: config.keepalive_function,
        }),
    });

    // 采集编排器（显式注入主站、点表与批次处理器）
    let handler = Arc::new(RecorderHandler {
        recorder: recorder.clone(),
        mirror,
    });
    let orchestrator = Orchestrator::new(
        master,
        registry,
        AcquisitionConfig {
            auto_reconnect: config.auto_reconnect,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_base_delay_ms: config.reconnect_base_delay_ms,
            batch_size: config.poll_batch_size,
            batch_delay_ms: config.poll_batch_delay_ms,
            read_max_retries: config.read_max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
            failure_threshold: config.failure_threshold,
        },
        Some(handler),
    );

    // 事件日志任务
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "gateway event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let min_interval = orchestrator.min_poll_interval_ms();
    if config.poll_interval_ms < min_interval {
        warn!(
            configured = config.poll_interval_ms,
            advisory = min_interval,
            "configured poll interval is below the advisory minimum"
        );
    }

    if let Err(err) = orchestrator.connect().await {
        // 自动重连开启时由重连策略接管，这里只记录首次失败
        warn!(error = %err, "initial connect failed");
    }
    orchestrator.start_polling(config.poll_interval_ms).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    orchestrator.disconnect().await;

    let snapshot = metrics().snapshot();
    let stats = recorder.stats();
    info!(
        poll_cycles = snapshot.poll_cycles,
        reads_ok = snapshot.reads_ok,
        reads_failed = snapshot.reads_failed,
        history_written = stats.changed + stats.first_time + stats.forced,
        history_skipped = stats.unchanged,
        "gateway stopped"
    );
    Ok(())
}

fn log_event(event: GatewayEvent) {
    match event {
        GatewayEvent::Connected => info!("link connected"),
        GatewayEvent::Disconnected { reason } => warn!(%reason, "link disconnected"),
        GatewayEvent::Error { message } => warn!(%message, "link error"),
        GatewayEvent::Timeout { transaction_id } => {
            debug!(transaction_id, "transaction timeout");
        }
        GatewayEvent::DataUpdate {
            identifier,
            quality,
            ..
        } => debug!(point = %identifier, quality = quality.as_str(), "data update"),
        GatewayEvent::Reconnecting { attempt, delay_ms } => {
            info!(attempt, delay_ms, "reconnecting");
        }
        GatewayEvent::ReconnectFailed { attempts } => {
            warn!(attempts, "reconnect attempts exhausted");
        }
        GatewayEvent::WriteCompleted { identifier } => {
            info!(point = %identifier, "write completed");
        }
    }
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
