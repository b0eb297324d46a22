//! Redis 快照镜像实现
//!
//! 在事务落库成功之后镜像最新值到 Redis，供看板/告警侧低延迟
//! 读取。尽力而为：镜像失败不回滚批次，由调用方记录日志。

use crate::error::StorageError;
use crate::models::LatestRecord;
use redis::AsyncCommands;

#[derive(serde::Serialize, serde::Deserialize)]
struct LatestPayload {
    value: String,
    formatted_value: String,
    quality: String,
    data_type: String,
    updated_at_ms: i64,
}

fn latest_key(identifier: &str) -> String {
    format!("mgw:point:{identifier}:latest")
}

fn parse_identifier_from_key(key: &str) -> Option<&str> {
    key.strip_prefix("mgw:point:")
        .and_then(|rest| rest.strip_suffix(":latest"))
}

/// Redis 快照镜像存储。
pub struct RedisLatestStore {
    client: redis::Client,
    ttl_seconds: Option<u64>,
}

impl RedisLatestStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            ttl_seconds: None,
        }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self::new(client))
    }

    pub fn connect_with_ttl(
        redis_url: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        let ttl = ttl_seconds.filter(|value| *value > 0);
        Ok(Self {
            client,
            ttl_seconds: ttl,
        })
    }

    /// 镜像一批快照行。
    pub async fn mirror_latest(&self, records: &[LatestRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        for record in records {
            let payload = serde_json::to_string(&LatestPayload {
                value: record.value.clone(),
                formatted_value: record.formatted_value.clone(),
                quality: record.quality.clone(),
                data_type: record.data_type.clone(),
                updated_at_ms: record.updated_at_ms,
            })
            .map_err(|err| StorageError::new(err.to_string()))?;
            let key = latest_key(&record.identifier);
            match self.ttl_seconds {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, payload, ttl).await?,
                None => conn.set::<_, _, ()>(key, payload).await?,
            }
        }
        Ok(())
    }

    /// 枚举全部镜像快照（SCAN 遍历，不阻塞服务端）。
    pub async fn list_latest(&self) -> Result<Vec<LatestRecord>, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = {
            let mut keys = Vec::new();
            let mut iter: redis::AsyncIter<String> =
                conn.scan_match("mgw:point:*:latest").await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(identifier) = parse_identifier_from_key(&key).map(str::to_string) else {
                continue;
            };
            let payload: Option<String> = conn.get(&key).await?;
            let Some(payload) = payload else {
                continue;
            };
            let payload: LatestPayload = serde_json::from_str(&payload)
                .map_err(|err| StorageError::new(err.to_string()))?;
            items.push(LatestRecord {
                identifier,
                value: payload.value,
                formatted_value: payload.formatted_value,
                quality: payload.quality,
                data_type: payload.data_type,
                updated_at_ms: payload.updated_at_ms,
            });
        }
        items.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(items)
    }

    /// 读取单点镜像快照。
    pub async fn get_latest(
        &self,
        identifier: &str,
    ) -> Result<Option<LatestRecord>, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(latest_key(identifier)).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let payload: LatestPayload =
            serde_json::from_str(&payload).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Some(LatestRecord {
            identifier: identifier.to_string(),
            value: payload.value,
            formatted_value: payload.formatted_value,
            quality: payload.quality,
            data_type: payload.data_type,
            updated_at_ms: payload.updated_at_ms,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip() {
        let key = latest_key("temp_1");
        assert_eq!(key, "mgw:point:temp_1:latest");
        assert_eq!(parse_identifier_from_key(&key), Some("temp_1"));
        assert_eq!(parse_identifier_from_key("other:key"), None);
    }
}
