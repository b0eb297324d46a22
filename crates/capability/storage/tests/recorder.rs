//! 变化检测引擎集成测试。

use domain::{
    AccessMode, DataPoint, DataValue, Quality, RawValue, RegisterKind, ValueData, ValueFormat,
    WriteKind,
};
use mgw_storage::{
    InMemoryValueStore, PersistBatch, RecorderConfig, StorageError, ValueQuery, ValueRecorder,
    ValueSink,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn point(identifier: &str) -> DataPoint {
    DataPoint {
        id: identifier.to_string(),
        name: identifier.to_string(),
        identifier: identifier.to_string(),
        address: 0,
        access: AccessMode::Read,
        read_function: RegisterKind::Holding,
        write_function: WriteKind::SingleRegister,
        format: ValueFormat::Float32,
        bit_position: None,
        source_identifier: None,
        point_bit_position: None,
        scale: 1.0,
        offset: 0.0,
        unit: String::new(),
    }
}

fn value(identifier: &str, value: f64) -> DataValue {
    DataValue {
        identifier: identifier.to_string(),
        raw: RawValue::Words(vec![0, 0]),
        value: ValueData::F64(value),
        formatted: ValueData::F64(value).display(),
        quality: Quality::Good,
        ts_ms: now_ms(),
        read_time_ms: 1,
    }
}

fn bad_value(identifier: &str) -> DataValue {
    DataValue {
        identifier: identifier.to_string(),
        raw: RawValue::Words(Vec::new()),
        value: ValueData::String(String::new()),
        formatted: String::new(),
        quality: Quality::Bad,
        ts_ms: now_ms(),
        read_time_ms: 0,
    }
}

fn batch(values: Vec<DataValue>) -> HashMap<String, DataValue> {
    values
        .into_iter()
        .map(|value| (value.identifier.clone(), value))
        .collect()
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[tokio::test]
async fn tolerance_suppresses_insignificant_change() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store.clone());
    let points = vec![point("T1")];

    // 首次：写历史（initial）
    let report = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.000)]))
        .await
        .expect("store");
    assert_eq!(report.first_time, 1);

    // 容差内（|Δ| = 0.0005 < 0.001）：跳过历史，仍更新快照
    let report = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0005)]))
        .await
        .expect("store");
    assert_eq!(report.unchanged, 1);
    assert_eq!(store.history_len(), 1);
    assert_eq!(store.latest_len(), 1);

    // 实质变化：第二行历史，描述记录新旧值
    let report = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 25.0)]))
        .await
        .expect("store");
    assert_eq!(report.changed, 1);
    assert_eq!(store.history_len(), 2);

    let history = store
        .history_values("T1", None, None, 10)
        .await
        .expect("history");
    assert_eq!(history[0].change_description, "from 20.0005 to 25");
    assert_eq!(history[1].change_description, "initial");
}

#[tokio::test]
async fn relative_tolerance_applies_to_large_values() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store.clone());
    let points = vec![point("P1")];

    recorder
        .store_latest_values(&points, &batch(vec![value("P1", 100_000.0)]))
        .await
        .expect("store");
    // |Δ| = 50 ≥ 0.001，但相对差 50 / 100050 < 0.001 → 未变
    let report = recorder
        .store_latest_values(&points, &batch(vec![value("P1", 100_050.0)]))
        .await
        .expect("store");
    assert_eq!(report.unchanged, 1);
    assert_eq!(store.history_len(), 1);
}

#[tokio::test]
async fn forced_checkpoint_after_interval() {
    let store = Arc::new(InMemoryValueStore::new());
    let config = RecorderConfig {
        force_insert_interval_ms: 1,
        ..RecorderConfig::default()
    };
    let recorder = ValueRecorder::with_config(store.clone(), config);
    let points = vec![point("T1")];

    recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect("store");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    // 值未变但超过强制间隔：仍写历史，原因 forced
    let report = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect("store");
    assert_eq!(report.forced, 1);

    let history = store
        .history_values("T1", None, None, 10)
        .await
        .expect("history");
    assert_eq!(history[0].change_description, "forced");
}

#[tokio::test]
async fn latest_row_is_idempotent_per_identifier() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store.clone());
    let points = vec![point("T1"), point("T2")];

    for round in 0..5 {
        let values = batch(vec![
            value("T1", 20.0 + round as f64),
            value("T2", 1.0),
        ]);
        recorder
            .store_latest_values(&points, &values)
            .await
            .expect("store");
    }

    // 任意次落库后每个点位恰好一行快照
    assert_eq!(store.latest_len(), 2);
    let latest = store.latest_values().await.expect("latest");
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].identifier, "T1");
    assert_eq!(latest[0].value, "24");
}

#[tokio::test]
async fn quality_transition_records_no_data() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store.clone());
    let points = vec![point("T1")];

    recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect("store");
    recorder
        .store_latest_values(&points, &batch(vec![bad_value("T1")]))
        .await
        .expect("store");
    recorder
        .store_latest_values(&points, &batch(vec![value("T1", 25.0)]))
        .await
        .expect("store");

    let history = store
        .history_values("T1", None, None, 10)
        .await
        .expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].change_description, "from no data to 25");
    assert_eq!(history[1].change_description, "from 20 to no data");
}

/// 可开关的失败落库（回滚语义测试用）。
struct FlakySink {
    store: Arc<InMemoryValueStore>,
    fail: AtomicBool,
}

#[async_trait::async_trait]
impl ValueSink for FlakySink {
    async fn persist(&self, persist: &PersistBatch) -> Result<(), StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::new("forced failure"));
        }
        self.store.persist(persist).await
    }
}

#[tokio::test]
async fn failed_persist_leaves_cache_untouched() {
    let store = Arc::new(InMemoryValueStore::new());
    let sink = Arc::new(FlakySink {
        store: store.clone(),
        fail: AtomicBool::new(true),
    });
    let recorder = ValueRecorder::new(sink.clone());
    let points = vec![point("T1")];

    let err = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect_err("forced failure");
    assert_eq!(err.to_string(), "forced failure");
    assert_eq!(recorder.cache_len(), 0);
    assert_eq!(recorder.stats().errors, 1);

    // 失败的批次未进入缓存：恢复后同一值按首次处理
    sink.fail.store(false, Ordering::SeqCst);
    let report = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect("store");
    assert_eq!(report.first_time, 1);
    assert_eq!(store.history_len(), 1);
}

#[tokio::test]
async fn stats_accumulate_and_reset() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store);
    let points = vec![point("T1"), point("T2")];

    recorder
        .store_latest_values(
            &points,
            &batch(vec![value("T1", 1.0), value("T2", 2.0)]),
        )
        .await
        .expect("store");
    recorder
        .store_latest_values(
            &points,
            &batch(vec![value("T1", 1.0), value("T2", 5.0)]),
        )
        .await
        .expect("store");

    let stats = recorder.stats();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.first_time, 2);
    assert_eq!(stats.changed, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.store_calls, 2);
    assert!((stats.change_rate() - 0.75).abs() < f64::EPSILON);
    assert_eq!(stats.error_rate(), 0.0);

    recorder.reset_stats();
    assert_eq!(recorder.stats().processed, 0);
}

#[tokio::test]
async fn clear_cache_restarts_first_time_tracking() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store.clone());
    let points = vec![point("T1")];

    recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect("store");
    recorder.clear_cache();

    let report = recorder
        .store_latest_values(&points, &batch(vec![value("T1", 20.0)]))
        .await
        .expect("store");
    assert_eq!(report.first_time, 1);
    assert_eq!(store.history_len(), 2);
}

#[tokio::test]
async fn non_numeric_values_compare_exactly() {
    let store = Arc::new(InMemoryValueStore::new());
    let recorder = ValueRecorder::new(store.clone());
    let points = vec![point("B1")];

    let bool_value = |flag: bool| DataValue {
        identifier: "B1".to_string(),
        raw: RawValue::Bits(vec![flag]),
        value: ValueData::Bool(flag),
        formatted: flag.to_string(),
        quality: Quality::Good,
        ts_ms: now_ms(),
        read_time_ms: 0,
    };

    recorder
        .store_latest_values(&points, &batch(vec![bool_value(false)]))
        .await
        .expect("store");
    let report = recorder
        .store_latest_values(&points, &batch(vec![bool_value(false)]))
        .await
        .expect("store");
    assert_eq!(report.unchanged, 1);

    let report = recorder
        .store_latest_values(&points, &batch(vec![bool_value(true)]))
        .await
        .expect("store");
    assert_eq!(report.changed, 1);

    let history = store
        .history_values("B1", None, None, 10)
        .await
        .expect("history");
    assert_eq!(history[0].change_description, "from false to true");
}
