//! Gateway configuration.
//!
//! An explicit configuration record built once at startup from environment
//! variables and passed into every component constructor. Startup refuses
//! to run on configurations that cannot work (ping interval not shorter
//! than the pong timeout, missing brokers, a lone TLS path).

use crate::ingress::{TOPIC_USER_MARGIN, TOPIC_USER_POSITION};
use std::time::Duration;
use thiserror::Error;

/// Application-level settings.
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Deployment environment name (`development`, `production`, ...).
    pub env: String,
    /// Log level (`debug`, `info`, `warn`, `error`).
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Kafka consumer settings.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub topics: Vec<String>,
    pub consumer_group: String,
    /// `earliest` or `latest`.
    pub initial_offset: String,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topics: vec![TOPIC_USER_MARGIN.to_string(), TOPIC_USER_POSITION.to_string()],
            consumer_group: String::new(),
            initial_offset: "latest".to_string(),
            session_timeout: Duration::from_millis(20_000),
            heartbeat_interval: Duration::from_millis(6_000),
        }
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub enabled: bool,
    pub port: u16,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    /// Interval between transport pings sent by the write pump.
    pub ping_interval: Duration,
    /// Read deadline; a silent peer is dropped after this long.
    pub ping_timeout: Duration,
    /// 0 means no per-user connection limit.
    pub max_connections_per_user: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            tls_cert_path: String::new(),
            tls_key_path: String::new(),
            ping_interval: Duration::from_millis(2_000),
            ping_timeout: Duration::from_millis(30_000),
            max_connections_per_user: 0,
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            shutdown_timeout: Duration::from_millis(10_000),
        }
    }
}

/// coin-cfx-adapter settings.
#[derive(Debug, Clone, Default)]
pub struct CfxAdapterSettings {
    pub host: String,
}

/// coin-data settings.
#[derive(Debug, Clone)]
pub struct CoinDataSettings {
    pub host: String,
    pub cache_ttl: Duration,
    /// Base-currency path segment of the exchange rate endpoint.
    pub cfx_usdt_asset: String,
}

impl Default for CoinDataSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            cache_ttl: Duration::from_secs(60),
            cfx_usdt_asset: "USDT".to_string(),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub app: AppSettings,
    pub kafka: KafkaSettings,
    pub websocket_server: ServerSettings,
    pub coin_cfx_adapter: CfxAdapterSettings,
    pub coin_data: CoinDataSettings,
    /// Prometheus exporter port; 0 disables the exporter.
    pub metrics_port: u16,
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl GatewayConfig {
    /// Build the configuration from environment variables and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app = AppSettings {
            env: env_or("APP_ENV", &AppSettings::default().env),
            log_level: env_or("APP_LOG_LEVEL", &AppSettings::default().log_level),
        };

        let kafka_defaults = KafkaSettings::default();
        let kafka = KafkaSettings {
            brokers: required_list("KAFKA_BROKERS")?,
            topics: env_list("KAFKA_TOPICS").unwrap_or(kafka_defaults.topics),
            consumer_group: required("KAFKA_CONSUMER_GROUP")?,
            initial_offset: env_or("KAFKA_INITIAL_OFFSET", &kafka_defaults.initial_offset),
            session_timeout: env_duration_millis(
                "KAFKA_SESSION_TIMEOUT_MS",
                kafka_defaults.session_timeout,
            ),
            heartbeat_interval: env_duration_millis(
                "KAFKA_HEARTBEAT_INTERVAL_MS",
                kafka_defaults.heartbeat_interval,
            ),
        };

        let server_defaults = ServerSettings::default();
        let websocket_server = ServerSettings {
            enabled: env_bool("WS_SERVER_ENABLED", server_defaults.enabled),
            port: env_parse("WS_SERVER_PORT", server_defaults.port),
            tls_cert_path: env_or("WS_SERVER_TLS_CERT_PATH", ""),
            tls_key_path: env_or("WS_SERVER_TLS_KEY_PATH", ""),
            ping_interval: env_duration_millis(
                "WS_SERVER_PING_INTERVAL_MS",
                server_defaults.ping_interval,
            ),
            ping_timeout: env_duration_millis(
                "WS_SERVER_PING_TIMEOUT_MS",
                server_defaults.ping_timeout,
            ),
            max_connections_per_user: env_parse(
                "WS_SERVER_MAX_CONNECTIONS_PER_USER",
                server_defaults.max_connections_per_user,
            ),
            read_buffer_size: env_parse("WS_SERVER_READ_BUFFER_SIZE", server_defaults.read_buffer_size),
            write_buffer_size: env_parse(
                "WS_SERVER_WRITE_BUFFER_SIZE",
                server_defaults.write_buffer_size,
            ),
            shutdown_timeout: env_duration_millis(
                "WS_SERVER_SHUTDOWN_TIMEOUT_MS",
                server_defaults.shutdown_timeout,
            ),
        };

        let coin_cfx_adapter = CfxAdapterSettings {
            host: required("COIN_CFX_ADAPTER_HOST")?,
        };

        let coin_data_defaults = CoinDataSettings::default();
        let coin_data = CoinDataSettings {
            host: required("COIN_DATA_HOST")?,
            cache_ttl: env_duration_secs("COIN_DATA_CACHE_TTL_SECONDS", coin_data_defaults.cache_ttl),
            cfx_usdt_asset: env_or("COIN_DATA_CFX_USDT_ASSET", &coin_data_defaults.cfx_usdt_asset),
        };

        let config = Self {
            app,
            kafka,
            websocket_server,
            coin_cfx_adapter,
            coin_data,
            metrics_port: env_parse("METRICS_PORT", 9090),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot satisfy the gateway's liveness
    /// contract.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket_server.ping_interval >= self.websocket_server.ping_timeout {
            return Err(ConfigError::Invalid(format!(
                "ping_interval_ms ({}) must be shorter than ping_timeout_ms ({})",
                self.websocket_server.ping_interval.as_millis(),
                self.websocket_server.ping_timeout.as_millis()
            )));
        }
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Invalid("kafka.brokers cannot be empty".to_string()));
        }
        if self.kafka.topics.is_empty() {
            return Err(ConfigError::Invalid("kafka.topics cannot be empty".to_string()));
        }
        let tls = &self.websocket_server;
        if tls.tls_cert_path.is_empty() != tls.tls_key_path.is_empty() {
            return Err(ConfigError::Invalid(
                "tls_cert_path and tls_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn required(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn required_list(key: &str) -> Result<Vec<String>, ConfigError> {
    let raw = required(key)?;
    Ok(split_list(&raw))
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|raw| split_list(&raw))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
