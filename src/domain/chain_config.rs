//! 多链配置模块
//!
//! 定义所有支持迁移的 Substrate 链及其派生路径、地址前缀和端点

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// 原生代币信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// 代币符号 (DOT, KSM, ...)
    pub symbol: String,
    /// 精度
    pub decimals: u32,
}

/// 区块浏览器信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub id: String,
    pub network: String,
}

fn default_era_duration_hours() -> u32 {
    24
}

/// 链配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 链 ID ("polkadot", "kusama", ...)
    pub id: String,
    /// 链名称
    pub name: String,
    /// 派生路径模板，`{index}` 为地址索引
    pub derivation_path_template: String,
    /// SS58 地址前缀
    pub ss58_prefix: u16,
    pub token: TokenConfig,
    /// 主 RPC 端点
    pub rpc_endpoint: String,
    /// 身份信息所在的 People 链端点
    #[serde(default)]
    pub people_rpc_endpoint: Option<String>,
    #[serde(default)]
    pub explorer: Option<ExplorerConfig>,
    /// 多签索引服务中的链标识
    #[serde(default)]
    pub multisig_index_id: Option<String>,
    /// 每个 era 的小时数（用于解锁时间估算）
    #[serde(default = "default_era_duration_hours")]
    pub era_duration_hours: u32,
}

impl ChainConfig {
    /// 生成第 `index` 个地址的派生路径
    pub fn derivation_path(&self, index: u32) -> String {
        self.derivation_path_template
            .replace("{index}", &index.to_string())
    }

    /// 检查配置完整性（缺失端点属于配置错误）
    pub fn ensure_complete(&self) -> Result<(), MigrationError> {
        if self.rpc_endpoint.trim().is_empty() {
            return Err(MigrationError::configuration(format!(
                "chain {} has no rpc endpoint",
                self.id
            )));
        }
        if !self.derivation_path_template.contains("{index}") {
            return Err(MigrationError::configuration(format!(
                "chain {} derivation path template has no {{index}} placeholder",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    chains: Vec<ChainConfig>,
}

/// 链配置注册表（加载一次，之后只读）
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    configs: BTreeMap<String, ChainConfig>,
    order: Vec<String>,
}

impl ChainRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建预配置的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_default_chains();
        registry
    }

    /// 从 TOML 文本加载（`[[chains]]` 数组）
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile =
            toml::from_str(content).context("Failed to parse chain registry as TOML")?;

        let mut registry = Self::new();
        for chain in file.chains {
            registry.register(chain);
        }
        Ok(registry)
    }

    /// 从 TOML 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read chain registry: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    fn register_default_chains(&mut self) {
        // Polkadot
        self.register(ChainConfig {
            id: "polkadot".to_string(),
            name: "Polkadot".to_string(),
            derivation_path_template: "m/44'/354'/0'/0'/{index}'".to_string(),
            ss58_prefix: 0,
            token: TokenConfig {
                symbol: "DOT".to_string(),
                decimals: 10,
            },
            rpc_endpoint: "wss://rpc.polkadot.io".to_string(),
            people_rpc_endpoint: Some("wss://polkadot-people-rpc.polkadot.io".to_string()),
            explorer: Some(ExplorerConfig {
                id: "subscan".to_string(),
                network: "polkadot".to_string(),
            }),
            multisig_index_id: Some("polkadot".to_string()),
            era_duration_hours: 24,
        });

        // Kusama
        self.register(ChainConfig {
            id: "kusama".to_string(),
            name: "Kusama".to_string(),
            derivation_path_template: "m/44'/434'/0'/0'/{index}'".to_string(),
            ss58_prefix: 2,
            token: TokenConfig {
                symbol: "KSM".to_string(),
                decimals: 12,
            },
            rpc_endpoint: "wss://kusama-rpc.polkadot.io".to_string(),
            people_rpc_endpoint: Some("wss://kusama-people-rpc.polkadot.io".to_string()),
            explorer: Some(ExplorerConfig {
                id: "subscan".to_string(),
                network: "kusama".to_string(),
            }),
            multisig_index_id: Some("kusama".to_string()),
            era_duration_hours: 6,
        });

        // Asset Hub Polkadot（NFT / Uniques 所在链）
        self.register(ChainConfig {
            id: "asset-hub-polkadot".to_string(),
            name: "Polkadot Asset Hub".to_string(),
            derivation_path_template: "m/44'/354'/0'/0'/{index}'".to_string(),
            ss58_prefix: 0,
            token: TokenConfig {
                symbol: "DOT".to_string(),
                decimals: 10,
            },
            rpc_endpoint: "wss://polkadot-asset-hub-rpc.polkadot.io".to_string(),
            people_rpc_endpoint: None,
            explorer: Some(ExplorerConfig {
                id: "subscan".to_string(),
                network: "assethub-polkadot".to_string(),
            }),
            multisig_index_id: None,
            era_duration_hours: 24,
        });
    }

    /// 注册链（同 id 覆盖，保留首次注册顺序）
    pub fn register(&mut self, config: ChainConfig) {
        if !self.configs.contains_key(&config.id) {
            self.order.push(config.id.clone());
        }
        self.configs.insert(config.id.clone(), config);
    }

    pub fn get(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.configs.get(chain_id)
    }

    /// 获取链配置，缺失时为配置错误
    pub fn require(&self, chain_id: &str) -> Result<&ChainConfig, MigrationError> {
        self.get(chain_id).ok_or_else(|| {
            MigrationError::configuration(format!("chain {} is not configured", chain_id))
        })
    }

    /// 按注册顺序返回所有链
    pub fn chains(&self) -> Vec<ChainConfig> {
        self.order
            .iter()
            .filter_map(|id| self.configs.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
