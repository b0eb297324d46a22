//! 数据模型
//!
//! 定义存储相关的数据模型：
//! - 历史模型：HistoryRecord（只追加，每次接受的变化或强制快照一行）
//! - 快照模型：LatestRecord（每个点位唯一一行，原地更新）
//! - 缓存模型：CachedValue（变化检测引擎内部缓存）
//! - 落库批次：PersistBatch（单事务写入单元）
//! - 结果与统计：StoreReport / StoreStats

use domain::{DataPoint, DataValue, Quality, ValueData};

/// 历史行（只追加）。
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub identifier: String,
    pub value: String,
    pub formatted_value: String,
    pub quality: String,
    pub data_type: String,
    pub change_description: String,
    pub ts_ms: i64,
}

/// 快照行（每个点位唯一一行）。
#[derive(Debug, Clone, PartialEq)]
pub struct LatestRecord {
    pub identifier: String,
    pub value: String,
    pub formatted_value: String,
    pub quality: String,
    pub data_type: String,
    pub updated_at_ms: i64,
}

impl LatestRecord {
    /// 由点位定义与采集值构造快照行。
    pub fn from_value(point: &DataPoint, value: &DataValue, updated_at_ms: i64) -> Self {
        Self {
            identifier: point.identifier.clone(),
            value: value.value.display(),
            formatted_value: value.formatted.clone(),
            quality: value.quality.as_str().to_string(),
            data_type: point.format.as_str().to_string(),
            updated_at_ms,
        }
    }
}

/// 单事务落库批次：历史追加 + 快照更新，要么全部生效要么全部回滚。
#[derive(Debug, Clone, Default)]
pub struct PersistBatch {
    pub history: Vec<HistoryRecord>,
    pub latest: Vec<LatestRecord>,
}

impl PersistBatch {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.latest.is_empty()
    }
}

/// 变化检测引擎的内部缓存项（每个点位一项）。
#[derive(Debug, Clone)]
pub struct CachedValue {
    pub value: ValueData,
    pub formatted: String,
    pub quality: Quality,
    /// 上次写入历史行的时间（强制快照判定用）
    pub last_insert_ms: i64,
    /// 上次收到该点位值的时间
    pub last_update_ms: i64,
}

/// 变化检测配置。
///
/// 容差与强制快照间隔来自运行经验，保留为可配置默认值。
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// 绝对容差
    pub abs_tolerance: f64,
    /// 相对容差（相对 max(|new|,|old|,1)）
    pub rel_tolerance: f64,
    /// 强制快照间隔（毫秒）：值未变但距上次落历史超过该间隔仍插入
    pub force_insert_interval_ms: i64,
    /// 是否同时要求展示文本一致
    pub compare_formatted: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            abs_tolerance: 0.001,
            rel_tolerance: 0.001,
            force_insert_interval_ms: 3_600_000,
            compare_formatted: false,
        }
    }
}

/// 单次落库调用的处理结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// 本次处理的点位数
    pub processed: u64,
    /// 判定变化并写历史的点位数
    pub changed: u64,
    /// 判定未变并跳过历史的点位数
    pub unchanged: u64,
    /// 首次出现并写历史的点位数
    pub first_time: u64,
    /// 强制快照写历史的点位数
    pub forced: u64,
}

/// 进程生命周期内的滚动统计。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoreStats {
    pub processed: u64,
    pub changed: u64,
    pub unchanged: u64,
    pub first_time: u64,
    pub forced: u64,
    pub store_calls: u64,
    pub errors: u64,
}

impl StoreStats {
    /// 变化率：写历史的比例（变化 + 首次 + 强制）。
    pub fn change_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        (self.changed + self.first_time + self.forced) as f64 / self.processed as f64
    }

    /// 错误率：失败调用占全部调用的比例。
    pub fn error_rate(&self) -> f64 {
        let calls = self.store_calls + self.errors;
        if calls == 0 {
            return 0.0;
        }
        self.errors as f64 / calls as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_handle_empty_stats() {
        let stats = StoreStats::default();
        assert_eq!(stats.change_rate(), 0.0);
        assert_eq!(stats.error_rate(), 0.0);
    }

    #[test]
    fn rates_compute_from_totals() {
        let stats = StoreStats {
            processed: 10,
            changed: 2,
            unchanged: 5,
            first_time: 2,
            forced: 1,
            store_calls: 3,
            errors: 1,
        };
        assert_eq!(stats.change_rate(), 0.5);
        assert_eq!(stats.error_rate(), 0.25);
    }
}
