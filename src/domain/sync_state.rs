//! 同步结果（会话内存状态，不持久化）

use serde::{Deserialize, Serialize};

use crate::domain::{account::DerivedAccount, balance::BucketKind, chain_config::ChainConfig};

/// 整体同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Loading,
    /// 完成（包括被取消后提前结束）
    Synchronized,
}

/// 单链同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSyncStatus {
    Pending,
    Synchronized,
    Error,
}

/// 同步阶段错误（按链隔离）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "message", rename_all = "snake_case")]
pub enum SyncError {
    /// 地址派生失败
    Derivation(String),
    /// RPC 连接失败
    Connection(String),
    /// 链配置不完整，重新扫描不会重试
    Configuration(String),
}

impl SyncError {
    pub fn message(&self) -> &str {
        match self {
            Self::Derivation(msg) | Self::Connection(msg) | Self::Configuration(msg) => msg,
        }
    }

    /// 重新扫描可以重试的错误
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

/// 单链同步结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSyncResult {
    pub chain: ChainConfig,
    pub status: ChainSyncStatus,
    pub error: Option<SyncError>,
    pub accounts: Vec<DerivedAccount>,
}

impl ChainSyncResult {
    pub fn failed(chain: ChainConfig, error: SyncError) -> Self {
        Self {
            chain,
            status: ChainSyncStatus::Error,
            error: Some(error),
            accounts: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain.id
    }
}

/// 同步状态（按链保存结果）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub chains: Vec<ChainSyncResult>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            chains: Vec::new(),
        }
    }
}

impl SyncState {
    pub fn chain(&self, chain_id: &str) -> Option<&ChainSyncResult> {
        self.chains.iter().find(|c| c.chain_id() == chain_id)
    }

    pub fn chain_mut(&mut self, chain_id: &str) -> Option<&mut ChainSyncResult> {
        self.chains.iter_mut().find(|c| c.chain_id() == chain_id)
    }

    /// 写入单链结果（同 id 替换）
    pub fn upsert_chain(&mut self, result: ChainSyncResult) {
        match self.chain_mut(&result.chain.id) {
            Some(existing) => *existing = result,
            None => self.chains.push(result),
        }
    }

    pub fn account(&self, chain_id: &str, path: &str) -> Option<&DerivedAccount> {
        self.chain(chain_id)?
            .accounts
            .iter()
            .find(|a| a.derivation_path == path)
    }

    pub fn account_mut(&mut self, chain_id: &str, path: &str) -> Option<&mut DerivedAccount> {
        self.chain_mut(chain_id)?
            .accounts
            .iter_mut()
            .find(|a| a.derivation_path == path)
    }

    /// 出错的链
    pub fn errored_chains(&self) -> Vec<&ChainSyncResult> {
        self.chains
            .iter()
            .filter(|c| c.status == ChainSyncStatus::Error)
            .collect()
    }

    /// 出错账户数量（所有已同步链）
    pub fn errored_account_count(&self) -> usize {
        self.chains
            .iter()
            .flat_map(|c| c.accounts.iter())
            .filter(|a| a.has_error())
            .count()
    }

    /// 某个桶的当前交易状态
    pub fn bucket_status(
        &self,
        chain_id: &str,
        path: &str,
        kind: BucketKind,
    ) -> Option<crate::domain::transaction_status::TransactionStatus> {
        self.account(chain_id, path)?
            .bucket(kind)?
            .transaction
            .as_ref()
            .map(|tx| tx.status)
    }
}
