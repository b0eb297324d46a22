//! 应用运行配置加载。
//!
//! 轮询批大小、步进延迟、失败阈值与变化容差都是经验默认值，
//! 全部保留为环境变量可调。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Modbus 从站地址
    pub modbus_host: String,
    pub modbus_port: u16,
    pub modbus_unit_id: u8,
    /// 单事务响应超时（毫秒）
    pub modbus_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub keepalive_enabled: bool,
    pub keepalive_interval_ms: u64,
    pub keepalive_address: u16,
    pub keepalive_function: u8,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    pub poll_batch_size: usize,
    pub poll_batch_delay_ms: u64,
    pub read_max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// 拆线前连续失败阈值
    pub failure_threshold: u32,
    /// 点表文件路径（JSON）
    pub points_file: String,
    /// Postgres 连接串；缺省回退内存存储
    pub database_url: Option<String>,
    /// Redis 连接串；缺省不开启快照镜像
    pub redis_url: Option<String>,
    pub redis_latest_ttl_seconds: Option<u64>,
    /// 变化检测绝对容差
    pub abs_tolerance: f64,
    /// 变化检测相对容差
    pub rel_tolerance: f64,
    /// 强制快照间隔（毫秒）
    pub force_insert_interval_ms: i64,
    pub compare_formatted: bool,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let modbus_host = env::var("MGW_MODBUS_HOST")
            .map_err(|_| ConfigError::Missing("MGW_MODBUS_HOST".to_string()))?;
        let points_file = env::var("MGW_POINTS_FILE")
            .map_err(|_| ConfigError::Missing("MGW_POINTS_FILE".to_string()))?;

        let modbus_port = read_u16_with_default("MGW_MODBUS_PORT", 502)?;
        let modbus_unit_id = read_u8_with_default("MGW_MODBUS_UNIT_ID", 1)?;
        let modbus_timeout_ms = read_u64_with_default("MGW_MODBUS_TIMEOUT_MS", 3000)?;
        let connect_timeout_ms = read_u64_with_default("MGW_CONNECT_TIMEOUT_MS", 5000)?;
        let auto_reconnect = read_bool_with_default("MGW_AUTO_RECONNECT", true);
        let max_reconnect_attempts = read_u32_with_default("MGW_MAX_RECONNECT_ATTEMPTS", 5)?;
        let reconnect_base_delay_ms = read_u64_with_default("MGW_RECONNECT_BASE_DELAY_MS", 1000)?;
        let keepalive_enabled = read_bool_with_default("MGW_KEEPALIVE", false);
        let keepalive_interval_ms = read_u64_with_default("MGW_KEEPALIVE_INTERVAL_MS", 10_000)?;
        let keepalive_address = read_u16_with_default("MGW_KEEPALIVE_ADDRESS", 0)?;
        let keepalive_function = read_u8_with_default("MGW_KEEPALIVE_FUNCTION", 3)?;
        let poll_interval_ms = read_u64_with_default("MGW_POLL_INTERVAL_MS", 5000)?;
        let poll_batch_size = read_u64_with_default("MGW_POLL_BATCH_SIZE", 8)? as usize;
        let poll_batch_delay_ms = read_u64_with_default("MGW_POLL_BATCH_DELAY_MS", 200)?;
        let read_max_retries = read_u32_with_default("MGW_READ_MAX_RETRIES", 2)?;
        let retry_base_delay_ms = read_u64_with_default("MGW_RETRY_BASE_DELAY_MS", 200)?;
        let failure_threshold = read_u32_with_default("MGW_FAILURE_THRESHOLD", 5)?;
        let database_url = read_optional("MGW_DATABASE_URL");
        let redis_url = read_optional("MGW_REDIS_URL");
        let redis_latest_ttl_seconds =
            read_optional_u64("MGW_REDIS_LATEST_TTL_SECONDS")?.filter(|value| *value > 0);
        let abs_tolerance = read_f64_with_default("MGW_ABS_TOLERANCE", 0.001)?;
        let rel_tolerance = read_f64_with_default("MGW_REL_TOLERANCE", 0.001)?;
        let force_insert_interval_ms =
            read_i64_with_default("MGW_FORCE_INSERT_INTERVAL_MS", 3_600_000)?;
        let compare_formatted = read_bool_with_default("MGW_COMPARE_FORMATTED", false);

        Ok(Self {
            modbus_host,
            modbus_port,
            modbus_unit_id,
            modbus_timeout_ms,
            connect_timeout_ms,
            auto_reconnect,
            max_reconnect_attempts,
            reconnect_base_delay_ms,
            keepalive_enabled,
            keepalive_interval_ms,
            keepalive_address,
            keepalive_function,
            poll_interval_ms,
            poll_batch_size,
            poll_batch_delay_ms,
            read_max_retries,
            retry_base_delay_ms,
            failure_threshold,
            points_file,
            database_url,
            redis_url,
            redis_latest_ttl_seconds,
            abs_tolerance,
            rel_tolerance,
            force_insert_interval_ms,
            compare_formatted,
        })
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_i64_with_default(key: &str, default: i64) -> Result<i64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<i64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
