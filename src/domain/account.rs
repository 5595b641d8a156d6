//! 派生账户领域模型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    balance::{BalanceBucket, BucketAsset, BucketKind, NativeBalance},
    multisig::MultisigAccount,
};

/// 子查询类型（用于错误标记）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    Balance,
    Staking,
    Nfts,
    Uniques,
    Identity,
    Multisig,
}

/// 链上身份
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: Option<String>,
    pub legal_name: Option<String>,
    pub email: Option<String>,
    pub web: Option<String>,
    pub twitter: Option<String>,
    /// 有 Reasonable / KnownGood 判定
    pub is_verified: bool,
    /// 身份押金
    pub deposit: u128,
}

/// 账户级错误（原生余额获取失败即为账户错误）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountError {
    pub kind: FetchKind,
    pub message: String,
}

/// 由硬件设备派生出的账户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAccount {
    pub address: String,
    /// 0x 前缀的公钥
    pub public_key: String,
    pub derivation_path: String,
    pub chain_id: String,
    #[serde(default)]
    pub balances: Vec<BalanceBucket>,
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub multisig: Vec<MultisigAccount>,
    #[serde(default)]
    pub error: Option<AccountError>,
    /// 各子查询的独立错误
    #[serde(default)]
    pub fetch_errors: BTreeMap<FetchKind, String>,
}

impl DerivedAccount {
    pub fn new(
        chain_id: impl Into<String>,
        derivation_path: impl Into<String>,
        address: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            public_key: public_key.into(),
            derivation_path: derivation_path.into(),
            chain_id: chain_id.into(),
            balances: Vec::new(),
            identity: None,
            multisig: Vec::new(),
            error: None,
            fetch_errors: BTreeMap::new(),
        }
    }

    /// 身份键 (chain_id, derivation_path)
    pub fn key(&self) -> (&str, &str) {
        (&self.chain_id, &self.derivation_path)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn bucket(&self, kind: BucketKind) -> Option<&BalanceBucket> {
        self.balances.iter().find(|bucket| bucket.kind() == kind)
    }

    pub fn bucket_mut(&mut self, kind: BucketKind) -> Option<&mut BalanceBucket> {
        self.balances.iter_mut().find(|bucket| bucket.kind() == kind)
    }

    pub fn native(&self) -> Option<&NativeBalance> {
        self.bucket(BucketKind::Native).and_then(BalanceBucket::native)
    }

    /// 写入桶；同类型桶已存在时替换资产并保留交易（保证最多一个 Native 桶）
    pub fn set_bucket(&mut self, asset: BucketAsset) {
        match self.bucket_mut(asset.kind()) {
            Some(existing) => existing.asset = asset,
            None => self.balances.push(BalanceBucket::new(asset)),
        }
    }

    /// 是否有非零持仓
    pub fn has_holdings(&self) -> bool {
        self.balances.iter().any(|bucket| !bucket.asset.is_zero())
    }

    /// 同步后是否保留：非零持仓、出错、或属于多签
    pub fn should_keep(&self) -> bool {
        self.has_holdings() || self.has_error() || !self.multisig.is_empty()
    }

    /// 有至少一个可迁移的桶
    pub fn has_eligible_bucket(&self) -> bool {
        self.balances.iter().any(BalanceBucket::is_eligible)
    }
}
