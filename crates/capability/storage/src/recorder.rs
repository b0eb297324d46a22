//! 变化检测落库引擎
//!
//! 每个批次一次调用：逐点与内部缓存比较，仅在值发生实质变化
//! （或到期强制快照）时追加历史行；快照行无条件更新。整个批次
//! 作为单事务交给 [`ValueSink`]，失败时内部缓存保持不动，下个
//! 周期从最后已知良好状态重新判定。

use crate::error::StorageError;
use crate::models::{
    CachedValue, HistoryRecord, LatestRecord, PersistBatch, RecorderConfig, StoreReport,
    StoreStats,
};
use crate::traits::ValueSink;
use domain::{DataPoint, DataValue, Quality, ValueData};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// 单点判定结果。
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    /// 首次出现，写历史（"initial"）
    First,
    /// 实质变化，写历史（"from X to Y"）
    Changed,
    /// 容差内未变，跳过历史
    Unchanged,
    /// 容差内未变但距上次落历史超过强制间隔，写历史（"forced"）
    Forced,
}

/// 变化检测落库引擎。
pub struct ValueRecorder {
    sink: Arc<dyn ValueSink>,
    config: RecorderConfig,
    /// 引擎独占缓存（与采集编排器的缓存彼此独立）
    cache: RwLock<HashMap<String, CachedValue>>,
    stats: Mutex<StoreStats>,
}

impl ValueRecorder {
    pub fn new(sink: Arc<dyn ValueSink>) -> Self {
        Self::with_config(sink, RecorderConfig::default())
    }

    pub fn with_config(sink: Arc<dyn ValueSink>, config: RecorderConfig) -> Self {
        Self {
            sink,
            config,
            cache: RwLock::new(HashMap::new()),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    /// 批量落库：变化检测 → 单事务写入 → 提交缓存。
    ///
    /// 点表中有值的每个点位参与判定；落库失败时缓存不更新。
    pub async fn store_latest_values(
        &self,
        points: &[DataPoint],
        values: &HashMap<String, DataValue>,
    ) -> Result<StoreReport, StorageError> {
        let now = now_epoch_ms();
        let mut report = StoreReport::default();
        let mut batch = PersistBatch::default();
        let mut cache_updates: Vec<(String, CachedValue)> = Vec::new();

        {
            let cache = self
                .cache
                .read()
                .map_err(|_| StorageError::new("lock failed"))?;

            for point in points {
                let Some(value) = values.get(&point.identifier) else {
                    continue;
                };
                report.processed += 1;

                let cached = cache.get(&point.identifier);
                let decision = self.decide(cached, value, now);

                let inserted = match decision {
                    Decision::First => {
                        report.first_time += 1;
                        batch.history.push(history_record(
                            point,
                            value,
                            "initial".to_string(),
                        ));
                        true
                    }
                    Decision::Changed => {
                        report.changed += 1;
                        batch.history.push(history_record(
                            point,
                            value,
                            change_description(cached, value),
                        ));
                        true
                    }
                    Decision::Forced => {
                        report.forced += 1;
                        batch
                            .history
                            .push(history_record(point, value, "forced".to_string()));
                        true
                    }
                    Decision::Unchanged => {
                        report.unchanged += 1;
                        false
                    }
                };

                batch.latest.push(LatestRecord::from_value(point, value, now));

                cache_updates.push((
                    point.identifier.clone(),
                    CachedValue {
                        value: value.value.clone(),
                        formatted: value.formatted.clone(),
                        quality: value.quality,
                        last_insert_ms: if inserted {
                            now
                        } else {
                            cached.map(|cached| cached.last_insert_ms).unwrap_or(now)
                        },
                        last_update_ms: now,
                    },
                ));
            }
        }

        if let Err(err) = self.sink.persist(&batch).await {
            // 批次回滚：缓存保持最后已知良好状态
            if let Ok(mut stats) = self.stats.lock() {
                stats.errors += 1;
            }
            return Err(err);
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        for (identifier, cached) in cache_updates {
            cache.insert(identifier, cached);
        }
        drop(cache);

        if let Ok(mut stats) = self.stats.lock() {
            stats.processed += report.processed;
            stats.changed += report.changed;
            stats.unchanged += report.unchanged;
            stats.first_time += report.first_time;
            stats.forced += report.forced;
            stats.store_calls += 1;
        }
        Ok(report)
    }

    /// 滚动统计快照。
    pub fn stats(&self) -> StoreStats {
        self.stats
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    /// 重置滚动统计。
    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = StoreStats::default();
        }
    }

    /// 清空内部缓存（此后所有点位按首次处理）。
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// 缓存点位数量（测试用）。
    pub fn cache_len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    fn decide(&self, cached: Option<&CachedValue>, value: &DataValue, now: i64) -> Decision {
        let Some(cached) = cached else {
            return Decision::First;
        };
        if !self.value_equal(cached, value) {
            return Decision::Changed;
        }
        if now - cached.last_insert_ms > self.config.force_insert_interval_ms {
            return Decision::Forced;
        }
        Decision::Unchanged
    }

    /// 值相等判定：质量一致，数值走组合容差，非数值精确相等。
    fn value_equal(&self, cached: &CachedValue, value: &DataValue) -> bool {
        if cached.quality != value.quality {
            return false;
        }
        if self.config.compare_formatted && cached.formatted != value.formatted {
            return false;
        }
        match (&cached.value, &value.value) {
            (
                ValueData::F64(_) | ValueData::I64(_),
                ValueData::F64(_) | ValueData::I64(_),
            ) => {
                let old = cached.value.as_f64().unwrap_or(f64::NAN);
                let new = value.value.as_f64().unwrap_or(f64::NAN);
                let diff = (new - old).abs();
                if diff < self.config.abs_tolerance {
                    return true;
                }
                let relative = diff / new.abs().max(old.abs()).max(1.0);
                relative < self.config.rel_tolerance
            }
            (old, new) => old == new,
        }
    }
}

fn history_record(point: &DataPoint, value: &DataValue, description: String) -> HistoryRecord {
    HistoryRecord {
        identifier: point.identifier.clone(),
        value: value.value.display(),
        formatted_value: value.formatted.clone(),
        quality: value.quality.as_str().to_string(),
        data_type: point.format.as_str().to_string(),
        change_description: description,
        ts_ms: value.ts_ms,
    }
}

/// 变化描述："from X to Y"，坏质量一侧显示为 "no data"。
fn change_description(cached: Option<&CachedValue>, value: &DataValue) -> String {
    let old = match cached {
        Some(cached) if cached.quality == Quality::Good => cached.value.display(),
        Some(_) => "no data".to_string(),
        None => return "initial".to_string(),
    };
    let new = if value.quality == Quality::Good {
        value.value.display()
    } else {
        "no data".to_string()
    };
    format!("from {old} to {new}")
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
