//! Postgres 存储实现
//!
//! 表结构（bit 相关列）：
//!
//! ```sql
//! create table data_point_history (
//!     id bigserial primary key,
//!     data_point_identifier text not null,
//!     value text not null,
//!     formatted_value text not null,
//!     quality text not null,
//!     data_type text not null,
//!     change_description text not null,
//!     ts timestamptz not null
//! );
//! create index idx_history_point_ts on data_point_history (data_point_identifier, ts desc);
//!
//! create table data_point_latest (
//!     data_point_identifier text primary key,
//!     value text not null,
//!     formatted_value text not null,
//!     quality text not null,
//!     data_type text not null,
//!     updated_at timestamptz not null
//! );
//! ```

use crate::error::StorageError;
use crate::models::{HistoryRecord, LatestRecord, PersistBatch};
use crate::traits::{ValueQuery, ValueSink};
use sqlx::{PgPool, Row};

/// Postgres 值存储（历史 + 快照）。
pub struct PgValueStore {
    pub pool: PgPool,
}

impl PgValueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl ValueSink for PgValueStore {
    async fn persist(&self, batch: &PersistBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in &batch.history {
            sqlx::query(
                "insert into data_point_history \
                 (data_point_identifier, value, formatted_value, quality, data_type, \
                  change_description, ts) \
                 values ($1, $2, $3, $4, $5, $6, to_timestamp($7 / 1000.0))",
            )
            .bind(&record.identifier)
            .bind(&record.value)
            .bind(&record.formatted_value)
            .bind(&record.quality)
            .bind(&record.data_type)
            .bind(&record.change_description)
            .bind(record.ts_ms as f64)
            .execute(&mut *tx)
            .await?;
        }
        for record in &batch.latest {
            sqlx::query(
                "insert into data_point_latest \
                 (data_point_identifier, value, formatted_value, quality, data_type, updated_at) \
                 values ($1, $2, $3, $4, $5, to_timestamp($6 / 1000.0)) \
                 on conflict (data_point_identifier) do update set \
                 value = excluded.value, \
                 formatted_value = excluded.formatted_value, \
                 quality = excluded.quality, \
                 data_type = excluded.data_type, \
                 updated_at = excluded.updated_at",
            )
            .bind(&record.identifier)
            .bind(&record.value)
            .bind(&record.formatted_value)
            .bind(&record.quality)
            .bind(&record.data_type)
            .bind(record.updated_at_ms as f64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ValueQuery for PgValueStore {
    async fn latest_values(&self) -> Result<Vec<LatestRecord>, StorageError> {
        let rows = sqlx::query(
            "select data_point_identifier, value, formatted_value, quality, data_type, \
             (extract(epoch from updated_at) * 1000)::bigint as updated_at_ms \
             from data_point_latest \
             order by data_point_identifier",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(LatestRecord {
                identifier: row.try_get("data_point_identifier")?,
                value: row.try_get("value")?,
                formatted_value: row.try_get("formatted_value")?,
                quality: row.try_get("quality")?,
                data_type: row.try_get("data_type")?,
                updated_at_ms: row.try_get("updated_at_ms")?,
            });
        }
        Ok(items)
    }

    async fn history_values(
        &self,
        identifier: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: i64,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let limit = limit.max(0);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "select data_point_identifier, value, formatted_value, quality, data_type, \
             change_description, \
             (extract(epoch from ts) * 1000)::bigint as ts_ms \
             from data_point_history \
             where data_point_identifier = $1 \
             and ($2 is null or ts >= to_timestamp($2 / 1000.0)) \
             and ($3 is null or ts <= to_timestamp($3 / 1000.0)) \
             order by ts desc \
             limit $4",
        )
        .bind(identifier)
        .bind(from_ms.map(|value| value as f64))
        .bind(to_ms.map(|value| value as f64))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(HistoryRecord {
                identifier: row.try_get("data_point_identifier")?,
                value: row.try_get("value")?,
                formatted_value: row.try_get("formatted_value")?,
                quality: row.try_get("quality")?,
                data_type: row.try_get("data_type")?,
                change_description: row.try_get("change_description")?,
                ts_ms: row.try_get("ts_ms")?,
            });
        }
        Ok(items)
    }
}
