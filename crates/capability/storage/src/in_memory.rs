//! 内存存储实现
//!
//! 仅用于本地测试和占位。单个写锁内应用整个批次，与事务语义等价。

use crate::error::StorageError;
use crate::models::{HistoryRecord, LatestRecord, PersistBatch};
use crate::traits::{ValueQuery, ValueSink};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct State {
    history: Vec<HistoryRecord>,
    latest: HashMap<String, LatestRecord>,
}

/// 内存值存储（历史 + 快照）。
#[derive(Default)]
pub struct InMemoryValueStore {
    state: RwLock<State>,
}

impl InMemoryValueStore {
    /// 创建空存储。
    pub fn new() -> Self {
        Self::default()
    }

    /// 历史行数量（测试用）。
    pub fn history_len(&self) -> usize {
        self.state.read().map(|state| state.history.len()).unwrap_or(0)
    }

    /// 快照行数量（测试用）。
    pub fn latest_len(&self) -> usize {
        self.state.read().map(|state| state.latest.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ValueSink for InMemoryValueStore {
    async fn persist(&self, batch: &PersistBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        state.history.extend(batch.history.iter().cloned());
        for record in &batch.latest {
            state.latest.insert(record.identifier.clone(), record.clone());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ValueQuery for InMemoryValueStore {
    async fn latest_values(&self) -> Result<Vec<LatestRecord>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<LatestRecord> = state.latest.values().cloned().collect();
        items.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(items)
    }

    async fn history_values(
        &self,
        identifier: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: i64,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let limit = limit.max(0) as usize;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut selected: Vec<HistoryRecord> = state
            .history
            .iter()
            .filter(|record| {
                if record.identifier != identifier {
                    return false;
                }
                if let Some(from) = from_ms {
                    if record.ts_ms < from {
                        return false;
                    }
                }
                if let Some(to) = to_ms {
                    if record.ts_ms > to {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        // 新值在前
        selected.sort_by(|a, b| b.ts_ms.cmp(&a.ts_ms));
        selected.truncate(limit);
        Ok(selected)
    }
}
