//! 余额桶领域模型
//!
//! 每个账户最多一个 Native 桶，另有 NFT / Uniques 持仓桶。
//! 每个桶最多持有一笔进行中的迁移交易。

use serde::{Deserialize, Serialize};

use crate::domain::transaction_status::{Transaction, TransactionStatus};

/// 解锁中的质押份额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockChunk {
    pub value: u128,
    /// 解锁所在 era
    pub era: u32,
    /// 人类可读的剩余时间
    pub time_remaining: String,
    /// unlock_era <= current_era
    pub can_withdraw: bool,
}

/// 质押信息
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StakingInfo {
    pub controller: Option<String>,
    pub active: u128,
    pub total: u128,
    pub unlocking: Vec<UnlockChunk>,
}

impl StakingInfo {
    /// 已可提取的解锁额
    pub fn withdrawable(&self) -> u128 {
        self.unlocking
            .iter()
            .filter(|chunk| chunk.can_withdraw)
            .map(|chunk| chunk.value)
            .sum()
    }
}

/// 原生代币余额
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NativeBalance {
    pub free: u128,
    pub reserved: u128,
    pub frozen: u128,
    /// free + reserved
    pub total: u128,
    /// free - frozen
    pub transferable: u128,
    pub staking: Option<StakingInfo>,
}

impl NativeBalance {
    pub fn new(free: u128, reserved: u128, frozen: u128) -> Self {
        Self {
            free,
            reserved,
            frozen,
            total: free.saturating_add(reserved),
            transferable: free.saturating_sub(frozen),
            staking: None,
        }
    }
}

/// NFT / Unique 资产条目
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NftItem {
    pub collection_id: u32,
    pub item_id: u32,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub is_frozen: bool,
}

/// 余额桶资产（判别联合）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BucketAsset {
    Native(NativeBalance),
    Nfts(Vec<NftItem>),
    Uniques(Vec<NftItem>),
}

/// 桶类型（用于定位 / 事件）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Native,
    Nfts,
    Uniques,
}

impl BucketAsset {
    pub fn kind(&self) -> BucketKind {
        match self {
            Self::Native(_) => BucketKind::Native,
            Self::Nfts(_) => BucketKind::Nfts,
            Self::Uniques(_) => BucketKind::Uniques,
        }
    }

    /// 是否有任何持仓（决定账户是否保留）
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Native(native) => {
                native.total == 0 && native.staking.as_ref().map_or(true, |s| s.total == 0)
            }
            Self::Nfts(items) | Self::Uniques(items) => items.is_empty(),
        }
    }

    /// 是否有可迁移的资产
    pub fn is_migratable(&self) -> bool {
        match self {
            Self::Native(native) => native.transferable > 0,
            Self::Nfts(items) | Self::Uniques(items) => !items.is_empty(),
        }
    }
}

/// 余额桶
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceBucket {
    pub asset: BucketAsset,
    pub transaction: Option<Transaction>,
}

impl BalanceBucket {
    pub fn new(asset: BucketAsset) -> Self {
        Self {
            asset,
            transaction: None,
        }
    }

    pub fn kind(&self) -> BucketKind {
        self.asset.kind()
    }

    pub fn is_migrated(&self) -> bool {
        self.transaction.as_ref().is_some_and(Transaction::is_success)
    }

    /// 正在签名 / 广播 / 等待最终化
    pub fn is_in_flight(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|tx| !tx.status.is_final() && tx.status != TransactionStatus::Idle)
    }

    /// 可参与本轮迁移：未成功、未在途、有可迁移资产
    pub fn is_eligible(&self) -> bool {
        !self.is_migrated() && !self.is_in_flight() && self.asset.is_migratable()
    }

    pub fn native(&self) -> Option<&NativeBalance> {
        match &self.asset {
            BucketAsset::Native(native) => Some(native),
            _ => None,
        }
    }
}
