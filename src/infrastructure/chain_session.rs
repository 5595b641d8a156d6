//! 链会话接口
//!
//! 每个端点一个会话：状态查询、手续费估算、元数据证明、extrinsic 提交。
//! 会话由打开它的操作独占，并且必须由同一操作在所有退出路径上断开（见 `SessionGuard`）。

use std::{
    ops::Deref,
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::domain::{Identity, NftItem, PendingCall};

/// 账户余额原始数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountData {
    pub free: u128,
    pub reserved: u128,
    pub frozen: u128,
}

/// 解锁条目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockingEntry {
    pub value: u128,
    pub era: u32,
}

/// 质押账本
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StakingLedger {
    pub controller: Option<String>,
    pub active: u128,
    pub total: u128,
    pub unlocking: Vec<UnlockingEntry>,
}

/// 签名所需的运行时上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub genesis_hash: [u8; 32],
    pub spec_version: u32,
    pub transaction_version: u32,
}

/// 调用索引 (pallet index, call index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallIndex {
    pub pallet: u8,
    pub call: u8,
}

/// 元数据摘要与证明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataProof {
    /// merkleized 元数据根哈希（CheckMetadataHash 使用）
    pub digest: [u8; 32],
    /// 覆盖本次调用所需类型信息的证明
    pub proof: Vec<u8>,
}

/// Weight V2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Weight {
    pub ref_time: u64,
    pub proof_size: u64,
}

/// 手续费估算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub partial_fee: u128,
    pub weight: Weight,
}

/// 提交后的状态事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionEvent {
    InBlock {
        block_hash: String,
        block_number: u64,
        extrinsic_index: u32,
    },
    Finalized {
        block_hash: String,
        block_number: u64,
        extrinsic_index: u32,
    },
    /// 节点拒绝 / 交易无效 / 被丢弃
    Error { message: String },
    Warning { message: String },
}

/// 链上 dispatch 错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    Module {
        pallet: String,
        name: String,
        docs: Vec<String>,
    },
    /// 无法解码时的原始错误
    Other(String),
}

impl DispatchError {
    /// 人类可读的错误信息
    pub fn describe(&self) -> String {
        match self {
            Self::Module { pallet, name, docs } if docs.is_empty() => {
                format!("{}.{}", pallet, name)
            }
            Self::Module { pallet, name, docs } => {
                format!("{}.{}: {}", pallet, name, docs.join(" "))
            }
            Self::Other(raw) => raw.clone(),
        }
    }
}

/// 区块中某个 extrinsic 的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtrinsicEvent {
    /// System.ExtrinsicSuccess
    Success,
    /// System.ExtrinsicFailed
    Failed(DispatchError),
    Other { pallet: String, method: String },
}

/// 链会话
#[async_trait]
pub trait ChainSession: Send + Sync {
    async fn account_balance(&self, address: &str) -> Result<AccountData>;

    async fn account_nonce(&self, address: &str) -> Result<u32>;

    async fn staking_ledger(&self, address: &str) -> Result<Option<StakingLedger>>;

    async fn current_era(&self) -> Result<u32>;

    async fn nft_items(&self, address: &str) -> Result<Vec<NftItem>>;

    async fn unique_items(&self, address: &str) -> Result<Vec<NftItem>>;

    async fn identity(&self, address: &str) -> Result<Option<Identity>>;

    /// 多签账户上待批准的调用
    async fn multisig_pending_calls(&self, multisig_address: &str) -> Result<Vec<PendingCall>>;

    async fn runtime_context(&self) -> Result<RuntimeContext>;

    /// 从运行时元数据解析调用索引
    async fn call_index(&self, pallet: &str, call: &str) -> Result<CallIndex>;

    /// 元数据摘要 + 覆盖 `call` 与 `signed_extra` 的证明
    async fn metadata_digest_and_proof(
        &self,
        call: &[u8],
        signed_extra: &[u8],
    ) -> Result<MetadataProof>;

    /// 试运行手续费（payment_queryInfo）
    async fn estimate_fee(&self, call: &[u8], signer: &str) -> Result<FeeEstimate>;

    /// 广播签名后的 extrinsic，返回状态事件流
    async fn submit(&self, extrinsic: Vec<u8>) -> Result<BoxStream<'static, SubmissionEvent>>;

    async fn block_events(
        &self,
        block_hash: &str,
        extrinsic_index: u32,
    ) -> Result<Vec<ExtrinsicEvent>>;

    async fn disconnect(&self);
}

/// 会话连接器
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn ChainSession>>;
}

/// 会话守卫：保证会话在所有路径上恰好断开一次
///
/// 正常路径调用 `release().await`；提前返回 / panic / 任务取消时由 Drop 在
/// 当前 tokio 运行时上补发断开。
pub struct SessionGuard {
    session: Arc<dyn ChainSession>,
    endpoint: String,
    released: bool,
}

impl SessionGuard {
    pub fn new(session: Box<dyn ChainSession>, endpoint: impl Into<String>) -> Self {
        Self {
            session: Arc::from(session),
            endpoint: endpoint.into(),
            released: false,
        }
    }

    /// 连接并包装为守卫
    pub async fn connect(connector: &dyn ChainConnector, endpoint: &str) -> Result<Self> {
        let session = connector.connect(endpoint).await?;
        tracing::debug!(endpoint = %endpoint, "Chain session opened");
        Ok(Self::new(session, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 断开会话
    pub async fn release(mut self) {
        self.released = true;
        self.session.disconnect().await;
        tracing::debug!(endpoint = %self.endpoint, "Chain session closed");
    }
}

impl Deref for SessionGuard {
    type Target = dyn ChainSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let session = self.session.clone();
        let endpoint = std::mem::take(&mut self.endpoint);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.disconnect().await;
                    tracing::debug!(endpoint = %endpoint, "Chain session closed on drop");
                });
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint, "No runtime to close chain session");
            }
        }
    }
}
