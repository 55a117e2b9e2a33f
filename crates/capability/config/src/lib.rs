//! 应用运行配置加载。

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
    pub http_addr: String,
    /// 时序库连接串；缺省时使用内存 sink（仅演示/测试）。
    pub database_url: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub ingest_enabled: bool,
    pub heartbeat_interval_ms: u64,
    pub offline_miss_threshold: u32,
    pub heartbeat_miss_multiplier: u32,
    pub sweep_interval_ms: u64,
    pub batch_max_size: usize,
    pub batch_max_age_ms: u64,
    pub connection_pool_size: usize,
    pub acquire_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub window_capacity: usize,
    pub bus_queue_capacity: usize,
    pub yield_parameter: String,
    pub yield_pass_threshold: f64,
    pub yield_window_records: usize,
    pub yield_epsilon: f64,
    pub yield_publish_interval_ms: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = env::var("FAB_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let database_url = read_optional("FAB_DATABASE_URL");
        let mqtt_host = env::var("FAB_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("FAB_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("FAB_MQTT_USERNAME");
        let mqtt_password = read_optional("FAB_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env::var("FAB_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "factory/telemetry".to_string());
        let ingest_enabled = read_bool_with_default("FAB_INGEST", false);
        let heartbeat_interval_ms = read_u64_with_default("FAB_HEARTBEAT_INTERVAL_MS", 5000)?;
        let offline_miss_threshold = read_u32_with_default("FAB_OFFLINE_MISS_THRESHOLD", 6)?;
        let heartbeat_miss_multiplier = read_u32_with_default("FAB_HEARTBEAT_MISS_MULTIPLIER", 2)?;
        let sweep_interval_ms = read_u64_with_default("FAB_SWEEP_INTERVAL_MS", 5000)?;
        let batch_max_size = read_usize_with_default("FAB_BATCH_MAX_SIZE", 500)?;
        let batch_max_age_ms = read_u64_with_default("FAB_BATCH_MAX_AGE_MS", 1000)?;
        let connection_pool_size = read_usize_with_default("FAB_CONNECTION_POOL_SIZE", 10)?;
        let acquire_timeout_ms = read_u64_with_default("FAB_ACQUIRE_TIMEOUT_MS", 2000)?;
        let retry_max_attempts = read_u32_with_default("FAB_RETRY_MAX_ATTEMPTS", 5)?;
        let retry_base_backoff_ms = read_u64_with_default("FAB_RETRY_BASE_BACKOFF_MS", 200)?;
        let window_capacity = read_usize_with_default("FAB_WINDOW_CAPACITY", 100)?;
        let bus_queue_capacity = read_usize_with_default("FAB_BUS_QUEUE_CAPACITY", 1024)?;
        let yield_parameter =
            env::var("FAB_YIELD_PARAMETER").unwrap_or_else(|_| "yield".to_string());
        let yield_pass_threshold = read_f64_with_default("FAB_YIELD_PASS_THRESHOLD", 90.0)?;
        let yield_window_records = read_usize_with_default("FAB_YIELD_WINDOW_RECORDS", 1000)?;
        let yield_epsilon = read_f64_with_default("FAB_YIELD_EPSILON", 0.5)?;
        let yield_publish_interval_ms =
            read_u64_with_default("FAB_YIELD_PUBLISH_INTERVAL_MS", 5000)?;

        Ok(Self {
            http_addr,
            database_url,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            ingest_enabled,
            heartbeat_interval_ms,
            offline_miss_threshold,
            heartbeat_miss_multiplier,
            sweep_interval_ms,
            batch_max_size,
            batch_max_age_ms,
            connection_pool_size,
            acquire_timeout_ms,
            retry_max_attempts,
            retry_base_backoff_ms,
            window_capacity,
            bus_queue_capacity,
            yield_parameter,
            yield_pass_threshold,
            yield_window_records,
            yield_epsilon,
            yield_publish_interval_ms,
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

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
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

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
