//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::ChainRegistry;

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    /// 链注册表文件（TOML）。为空时使用内置默认链
    #[serde(default)]
    pub chains_file: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 每条链最多派生的地址数量
    pub max_addresses_per_chain: u32,
}

/// 迁移配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// 广播后等待最终化的截止时间
    pub submission_timeout_secs: u64,
    /// 目标（合并）账户的派生路径
    pub destination_path: String,
    /// 是否要求在设备上确认目标地址
    pub confirm_destination_on_device: bool,
}

impl MigrationConfig {
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
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

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_addresses_per_chain: std::env::var("SYNC_MAX_ADDRESSES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            submission_timeout_secs: std::env::var("SUBMISSION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120), // 2分钟
            destination_path: std::env::var("DESTINATION_PATH")
                .unwrap_or_else(|_| "m/44'/354'/0'/0'/0'".into()),
            confirm_destination_on_device: std::env::var("CONFIRM_DESTINATION")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }
}

impl Config {
    /// 从环境变量加载配置（先读取 .env）
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            logging: LoggingConfig::default(),
            sync: SyncConfig::default(),
            migration: MigrationConfig::default(),
            chains_file: std::env::var("CHAINS_FILE").ok(),
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
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 加载链注册表：配置了文件则从文件读取，否则使用内置默认链
    pub fn chain_registry(&self) -> Result<ChainRegistry> {
        match self.chains_file.as_deref() {
            Some(path) => ChainRegistry::from_file(path),
            None => Ok(ChainRegistry::with_defaults()),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.sync.max_addresses_per_chain == 0 {
            anyhow::bail!("SYNC_MAX_ADDRESSES must be greater than 0");
        }

        if self.migration.submission_timeout_secs == 0 {
            anyhow::bail!("SUBMISSION_TIMEOUT_SECS must be greater than 0");
        }

        if !self.migration.destination_path.starts_with("m/") {
            anyhow::bail!("DESTINATION_PATH must start with m/");
        }

        Ok(())
    }
}
