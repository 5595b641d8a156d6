//! 余额与持仓获取服务
//!
//! 对单个地址并发拉取：原生余额、质押、NFT、Uniques、身份、多签。
//! 各子查询失败互相独立；只有原生余额失败会把整个账户标记为出错。

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use futures::future::join_all;

use crate::{
    domain::{
        AccountError, BucketAsset, BucketKind, ChainConfig, DerivedAccount, FetchKind, Identity,
        MultisigAccount, NativeBalance, NftItem, StakingInfo, UnlockChunk,
    },
    infrastructure::{chain_session::StakingLedger, ChainSession, MultisigIndexer},
    utils::time_utils::format_unlock_time_remaining,
};

/// 单个地址的持仓汇总
#[derive(Debug, Clone, Default)]
pub struct AccountHoldings {
    pub native: Option<NativeBalance>,
    pub nfts: Vec<NftItem>,
    pub uniques: Vec<NftItem>,
    pub identity: Option<Identity>,
    pub multisig: Vec<MultisigAccount>,
    /// 各子查询的错误
    pub errors: BTreeMap<FetchKind, String>,
}

impl AccountHoldings {
    /// 写回账户；已有桶上的交易保留
    pub fn apply_to(self, account: &mut DerivedAccount) {
        account.error = self.errors.get(&FetchKind::Balance).map(|message| AccountError {
            kind: FetchKind::Balance,
            message: message.clone(),
        });

        if let Some(native) = self.native {
            account.set_bucket(BucketAsset::Native(native));
        }
        apply_items(account, BucketKind::Nfts, self.nfts);
        apply_items(account, BucketKind::Uniques, self.uniques);

        account.identity = self.identity;
        account.multisig = self.multisig;
        account.fetch_errors = self.errors;
    }
}

fn apply_items(account: &mut DerivedAccount, kind: BucketKind, items: Vec<NftItem>) {
    if items.is_empty() {
        // 没有在途交易的空桶直接移除
        account
            .balances
            .retain(|bucket| bucket.kind() != kind || bucket.transaction.is_some());
        return;
    }

    let asset = match kind {
        BucketKind::Nfts => BucketAsset::Nfts(items),
        BucketKind::Uniques => BucketAsset::Uniques(items),
        BucketKind::Native => return,
    };
    account.set_bucket(asset);
}

/// 持仓获取器
pub struct BalanceFetcher {
    indexer: Arc<dyn MultisigIndexer>,
}

impl BalanceFetcher {
    pub fn new(indexer: Arc<dyn MultisigIndexer>) -> Self {
        Self { indexer }
    }

    /// 拉取并写回账户
    ///
    /// # Arguments
    /// * `primary` - 主链会话
    /// * `people` - 身份所在链的会话，未配置时身份从主链读取
    pub async fn fetch_account(
        &self,
        mut account: DerivedAccount,
        chain: &ChainConfig,
        primary: &dyn ChainSession,
        people: Option<&dyn ChainSession>,
    ) -> DerivedAccount {
        let holdings = self
            .fetch_holdings(&account.address, chain, primary, people)
            .await;
        holdings.apply_to(&mut account);
        account
    }

    /// 并发拉取一个地址的全部持仓
    pub async fn fetch_holdings(
        &self,
        address: &str,
        chain: &ChainConfig,
        primary: &dyn ChainSession,
        people: Option<&dyn ChainSession>,
    ) -> AccountHoldings {
        let identity_session = people.unwrap_or(primary);

        let (native, staking, nfts, uniques, identity, multisig) = tokio::join!(
            primary.account_balance(address),
            fetch_staking(primary, address, chain.era_duration_hours),
            primary.nft_items(address),
            primary.unique_items(address),
            identity_session.identity(address),
            self.fetch_multisig(primary, chain, address),
        );

        let mut holdings = AccountHoldings::default();

        match native {
            Ok(data) => {
                let mut balance = NativeBalance::new(data.free, data.reserved, data.frozen);
                match staking {
                    Ok(info) => balance.staking = info,
                    Err(e) => record(&mut holdings, FetchKind::Staking, address, &e),
                }
                holdings.native = Some(balance);
            }
            Err(e) => record(&mut holdings, FetchKind::Balance, address, &e),
        }

        match nfts {
            Ok(items) => holdings.nfts = items,
            Err(e) => record(&mut holdings, FetchKind::Nfts, address, &e),
        }
        match uniques {
            Ok(items) => holdings.uniques = items,
            Err(e) => record(&mut holdings, FetchKind::Uniques, address, &e),
        }
        match identity {
            Ok(identity) => holdings.identity = identity,
            Err(e) => record(&mut holdings, FetchKind::Identity, address, &e),
        }
        match multisig {
            Ok(accounts) => holdings.multisig = accounts,
            Err(e) => record(&mut holdings, FetchKind::Multisig, address, &e),
        }

        holdings
    }

    /// 多签成员关系 + 每个多签账户上的待批准调用
    async fn fetch_multisig(
        &self,
        session: &dyn ChainSession,
        chain: &ChainConfig,
        address: &str,
    ) -> Result<Vec<MultisigAccount>> {
        let Some(index_id) = chain.multisig_index_id.as_deref() else {
            return Ok(Vec::new());
        };

        let mut accounts = self
            .indexer
            .multisig_accounts(index_id, address)
            .await
            .context("Failed to query multisig index")?;

        let pending = join_all(
            accounts
                .iter()
                .map(|multisig| session.multisig_pending_calls(&multisig.address)),
        )
        .await;

        for (multisig, calls) in accounts.iter_mut().zip(pending) {
            multisig.pending_calls = calls.with_context(|| {
                format!("Failed to query pending calls of {}", multisig.address)
            })?;
        }

        Ok(accounts)
    }
}

async fn fetch_staking(
    session: &dyn ChainSession,
    address: &str,
    era_duration_hours: u32,
) -> Result<Option<StakingInfo>> {
    let (ledger, current_era) = tokio::try_join!(
        session.staking_ledger(address),
        session.current_era()
    )?;
    Ok(ledger.map(|ledger| staking_info(ledger, current_era, era_duration_hours)))
}

/// 给解锁条目标注剩余时间与可提取标记
pub fn staking_info(ledger: StakingLedger, current_era: u32, era_duration_hours: u32) -> StakingInfo {
    StakingInfo {
        controller: ledger.controller,
        active: ledger.active,
        total: ledger.total,
        unlocking: ledger
            .unlocking
            .into_iter()
            .map(|entry| UnlockChunk {
                value: entry.value,
                era: entry.era,
                time_remaining: format_unlock_time_remaining(
                    entry.era,
                    current_era,
                    era_duration_hours,
                ),
                can_withdraw: entry.era <= current_era,
            })
            .collect(),
    }
}

fn record(holdings: &mut AccountHoldings, kind: FetchKind, address: &str, err: &anyhow::Error) {
    tracing::warn!(
        address = %address,
        kind = ?kind,
        error = %format!("{:#}", err),
        "Holdings sub-query failed"
    );
    holdings.errors.insert(kind, format!("{:#}", err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::chain_session::UnlockingEntry;

    #[test]
    fn test_staking_info_annotation() {
        let ledger = StakingLedger {
            controller: None,
            active: 100,
            total: 130,
            unlocking: vec![
                UnlockingEntry { value: 10, era: 99 },
                UnlockingEntry { value: 20, era: 103 },
            ],
        };

        let info = staking_info(ledger, 100, 24);
        assert!(info.unlocking[0].can_withdraw);
        assert_eq!(info.unlocking[0].time_remaining, "ready");
        assert!(!info.unlocking[1].can_withdraw);
        assert_eq!(info.unlocking[1].time_remaining, "3 days");
        assert_eq!(info.withdrawable(), 10);
    }

    #[test]
    fn test_apply_native_failure_marks_account() {
        let mut account = DerivedAccount::new("polkadot", "m/0", "addr", "0x00");
        let mut holdings = AccountHoldings::default();
        holdings
            .errors
            .insert(FetchKind::Balance, "rpc timeout".to_string());
        holdings.nfts = vec![NftItem {
            collection_id: 1,
            item_id: 1,
            creator: None,
            is_frozen: false,
        }];

        holdings.apply_to(&mut account);

        assert!(account.has_error());
        assert!(account.native().is_none());
        assert!(account.bucket(BucketKind::Nfts).is_some());
        assert!(account.should_keep());
    }

    #[test]
    fn test_apply_optional_failure_keeps_account_healthy() {
        let mut account = DerivedAccount::new("polkadot", "m/0", "addr", "0x00");
        let mut holdings = AccountHoldings {
            native: Some(NativeBalance::new(500, 0, 0)),
            ..Default::default()
        };
        holdings
            .errors
            .insert(FetchKind::Identity, "people chain down".to_string());

        holdings.apply_to(&mut account);

        assert!(!account.has_error());
        assert_eq!(account.native().unwrap().transferable, 500);
        assert!(account.fetch_errors.contains_key(&FetchKind::Identity));
    }
}
