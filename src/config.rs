//! 配置管理模块
//! 支持从环境变量和配置文件加载配置
//!
//! 注意：主种子不在 Config 里——Config 可序列化、可打印，
//! 种子由 domain::MasterSeed::from_env 单独加载并注入派生引擎。

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 链监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// TronGrid API 根地址
    pub tron_api_url: String,
    /// TronGrid API Key（可选，提升限流额度）
    pub tron_api_key: Option<String>,
    /// USDT TRC20 合约地址
    pub usdt_contract: String,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 扫描窗口（秒）：只查询最近这段时间内的转账事件
    pub scan_window_secs: u64,
    /// 单地址外部查询超时（秒），一个无响应地址不能拖垮整个周期
    pub address_fetch_timeout_secs: u64,
    /// 单周期内并发抓取的地址数上限
    pub max_concurrent_addresses: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://postgres@localhost:5432/vaultcore".into()),
            max_connections: std::env::var("DB_MAX_CONNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            min_connections: std::env::var("DB_MIN_CONNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            acquire_timeout_secs: std::env::var("DB_ACQ_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            tron_api_url: std::env::var("TRON_API_URL")
                .unwrap_or_else(|_| "https://api.trongrid.io".into()),
            tron_api_key: std::env::var("TRON_API_KEY").ok(),
            usdt_contract: std::env::var("USDT_CONTRACT")
                .unwrap_or_else(|_| "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".into()),
            poll_interval_secs: std::env::var("CHAIN_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            scan_window_secs: std::env::var("CHAIN_SCAN_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(24 * 3600),
            address_fetch_timeout_secs: std::env::var("CHAIN_ADDRESS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            max_concurrent_addresses: std::env::var("CHAIN_MAX_CONCURRENT_ADDRESSES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            chain: ChainConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                let file_config = Self::from_file(path)?;
                config = file_config;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.chain.poll_interval_secs == 0 {
            anyhow::bail!("CHAIN_POLL_INTERVAL_SECS must be positive");
        }

        if self.chain.max_concurrent_addresses == 0 {
            anyhow::bail!("CHAIN_MAX_CONCURRENT_ADDRESSES must be positive");
        }

        if !self.chain.usdt_contract.starts_with('T') {
            anyhow::bail!("USDT_CONTRACT must be a base58 TRON address");
        }

        Ok(())
    }
}
