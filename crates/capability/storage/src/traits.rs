//! 存储接口 Trait 定义
//!
//! - ValueSink：单事务落库（历史追加 + 快照更新）
//! - ValueQuery：只读查询（快照全量、历史按时间窗）
//!
//! 设计原则：
//! - 一个批次一个事务，部分失败整体回滚
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use crate::models::{HistoryRecord, LatestRecord, PersistBatch};
use async_trait::async_trait;

/// 落库接口。
///
/// 实现方保证批次原子性：历史行与快照行要么全部生效，要么全部
/// 回滚。变化检测引擎只在落库成功后才提交内部缓存。
#[async_trait]
pub trait ValueSink: Send + Sync {
    async fn persist(&self, batch: &PersistBatch) -> Result<(), StorageError>;
}

/// 只读查询接口（供路由/上报侧消费）。
#[async_trait]
pub trait ValueQuery: Send + Sync {
    /// 全部点位的最新快照（每个点位恰好一行）。
    async fn latest_values(&self) -> Result<Vec<LatestRecord>, StorageError>;

    /// 单点历史，新值在前。
    async fn history_values(
        &self,
        identifier: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: i64,
    ) -> Result<Vec<HistoryRecord>, StorageError>;
}
