//! 迁移编排服务
//!
//! 链 → 账户 → 余额桶逐层遍历，每个迁移单元调用构建器与提交状态机。
//! 设备签名按顺序进行；广播后的最终化等待不阻塞后续账户，句柄由 `MigrationRun` 收集。

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    config::MigrationConfig,
    domain::{
        BucketAsset, BucketKind, ChainConfig, ChainSyncStatus, DerivedAccount, SyncState,
        Transaction, TransactionStatus,
    },
    error::{MigrationError, MigrationResult, ValidationError},
    infrastructure::{
        event_bus::{publish_or_log, EventBus, MigrationEvent},
        ChainConnector, SessionGuard, SigningDevice,
    },
    service::{
        run_context::{MigrationCounters, MigrationRunContext},
        submission::{SubmissionHandle, SubmissionStateMachine, TransactionScope},
        transaction_builder::{TransactionBuilder, TransferAmount, TransferRequest},
    },
};

/// 每条链的目标（合并）地址，键为链 id
pub type Destinations = HashMap<String, String>;

/// 迁移单元：同一账户中一起提交的余额桶
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub chain_id: String,
    pub derivation_path: String,
    pub buckets: Vec<BucketKind>,
}

struct PendingMigration {
    unit: MigrationUnit,
    handle: SubmissionHandle,
}

/// 一次迁移运行
///
/// 持有尚未最终化的提交句柄；`finish` 等待全部结束并写回状态。
pub struct MigrationRun {
    context: Arc<MigrationRunContext>,
    pending: Vec<PendingMigration>,
}

impl MigrationRun {
    fn new() -> Self {
        Self {
            context: Arc::new(MigrationRunContext::new()),
            pending: Vec::new(),
        }
    }

    pub fn counters(&self) -> MigrationCounters {
        self.context.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 等待所有在途交易进入终态，写回余额桶并返回计数
    pub async fn finish(self, state: &mut SyncState) -> MigrationCounters {
        for pending in self.pending {
            let transaction = pending.handle.wait().await;
            apply_transaction(state, &pending.unit, &transaction);
        }
        let counters = self.context.snapshot();
        tracing::info!(
            success = counters.success,
            fails = counters.fails,
            total = counters.total,
            "Migration run finished"
        );
        counters
    }
}

/// 迁移编排器
pub struct MigrationOrchestrator {
    device: Arc<dyn SigningDevice>,
    connector: Arc<dyn ChainConnector>,
    builder: TransactionBuilder,
    submission: SubmissionStateMachine,
    events: Arc<dyn EventBus>,
    config: MigrationConfig,
}

impl MigrationOrchestrator {
    pub fn new(
        device: Arc<dyn SigningDevice>,
        connector: Arc<dyn ChainConnector>,
        events: Arc<dyn EventBus>,
        config: MigrationConfig,
    ) -> Self {
        let submission =
            SubmissionStateMachine::new(device.clone(), events.clone(), config.submission_timeout());
        Self {
            device,
            connector,
            builder: TransactionBuilder::new(),
            submission,
            events,
            config,
        }
    }

    /// 在每条链上向设备获取合并账户地址
    pub async fn derive_destinations(&self, chains: &[ChainConfig]) -> MigrationResult<Destinations> {
        let mut destinations = Destinations::new();
        for chain in chains {
            let derived = self
                .device
                .derive_address(
                    &self.config.destination_path,
                    chain.ss58_prefix,
                    self.config.confirm_destination_on_device,
                )
                .await?;
            tracing::debug!(
                chain_id = %chain.id,
                destination = %derived.address,
                "Destination derived"
            );
            destinations.insert(chain.id.clone(), derived.address);
        }
        Ok(destinations)
    }

    /// 迁移所有已同步链上的所有可迁移账户
    pub async fn migrate_all(
        &self,
        state: &mut SyncState,
        destinations: &Destinations,
    ) -> MigrationRun {
        let mut run = MigrationRun::new();

        let units: Vec<(ChainConfig, MigrationUnit)> = state
            .chains
            .iter()
            .filter(|chain| chain.status == ChainSyncStatus::Synchronized)
            .flat_map(|chain| {
                chain
                    .accounts
                    .iter()
                    .filter(|account| !account.has_error() && account.has_eligible_bucket())
                    .map(move |account| {
                        let buckets = account
                            .balances
                            .iter()
                            .filter(|bucket| bucket.is_eligible())
                            .map(|bucket| bucket.kind())
                            .collect();
                        (
                            chain.chain.clone(),
                            MigrationUnit {
                                chain_id: chain.chain.id.clone(),
                                derivation_path: account.derivation_path.clone(),
                                buckets,
                            },
                        )
                    })
            })
            .collect();

        tracing::info!(units = units.len(), "Starting migration of all accounts");

        for (chain, unit) in units {
            self.migrate_unit(state, &chain, unit, destinations, &mut run)
                .await;
        }

        run
    }

    /// 迁移单个账户的所有可迁移余额桶
    pub async fn migrate_account(
        &self,
        state: &mut SyncState,
        chain_id: &str,
        derivation_path: &str,
        destinations: &Destinations,
    ) -> MigrationResult<MigrationRun> {
        let (chain, account) = locate(state, chain_id, derivation_path)?;
        let buckets: Vec<BucketKind> = account
            .balances
            .iter()
            .filter(|bucket| bucket.is_eligible())
            .map(|bucket| bucket.kind())
            .collect();

        let mut run = MigrationRun::new();
        if buckets.is_empty() || account.has_error() {
            tracing::debug!(chain_id = %chain_id, path = %derivation_path, "Nothing to migrate");
            return Ok(run);
        }

        let unit = MigrationUnit {
            chain_id: chain_id.to_string(),
            derivation_path: derivation_path.to_string(),
            buckets,
        };
        self.migrate_unit(state, &chain, unit, destinations, &mut run)
            .await;
        Ok(run)
    }

    /// 迁移单个余额桶；已成功或在途的桶直接返回空运行
    pub async fn migrate_balance(
        &self,
        state: &mut SyncState,
        chain_id: &str,
        derivation_path: &str,
        kind: BucketKind,
        destinations: &Destinations,
    ) -> MigrationResult<MigrationRun> {
        let (chain, account) = locate(state, chain_id, derivation_path)?;
        let bucket = account
            .bucket(kind)
            .ok_or(ValidationError::NothingToMigrate)?;

        let mut run = MigrationRun::new();
        if !bucket.is_eligible() {
            tracing::debug!(
                chain_id = %chain_id,
                path = %derivation_path,
                bucket = ?kind,
                migrated = bucket.is_migrated(),
                "Bucket skipped"
            );
            return Ok(run);
        }

        let unit = MigrationUnit {
            chain_id: chain_id.to_string(),
            derivation_path: derivation_path.to_string(),
            buckets: vec![kind],
        };
        self.migrate_unit(state, &chain, unit, destinations, &mut run)
            .await;
        Ok(run)
    }

    /// 执行一个迁移单元，所有错误收敛为该单元的终态
    async fn migrate_unit(
        &self,
        state: &mut SyncState,
        chain: &ChainConfig,
        unit: MigrationUnit,
        destinations: &Destinations,
        run: &mut MigrationRun,
    ) {
        let counters = run.context.record_start(unit.buckets.len());
        self.publish_counters(counters).await;

        let destination = destinations.get(&unit.chain_id).cloned().unwrap_or_default();
        let request = match build_request(state, &unit, &destination) {
            Some(request) => request,
            None => {
                let err = MigrationError::from(ValidationError::NothingToMigrate);
                self.fail_unit(state, &unit, &destination, &err, run).await;
                return;
            }
        };

        let session = match SessionGuard::connect(self.connector.as_ref(), &chain.rpc_endpoint)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let err = MigrationError::connection(format!("{:#}", e));
                self.fail_unit(state, &unit, &destination, &err, run).await;
                return;
            }
        };

        let prepared = match self.builder.prepare_transfer(&*session, &request, chain).await {
            Ok(prepared) => prepared,
            Err(e) => {
                session.release().await;
                self.fail_unit(state, &unit, &destination, &e, run).await;
                return;
            }
        };

        let scope = TransactionScope {
            chain_id: unit.chain_id.clone(),
            derivation_path: unit.derivation_path.clone(),
            buckets: unit.buckets.clone(),
            run: run.context.clone(),
        };
        let handle = self.submission.submit(session, prepared, scope).await;
        apply_transaction(state, &unit, handle.snapshot());

        if handle.is_pending() {
            run.pending.push(PendingMigration { unit, handle });
        }
    }

    /// 广播前失败：Error 终态 + 计入 fails
    async fn fail_unit(
        &self,
        state: &mut SyncState,
        unit: &MigrationUnit,
        destination: &str,
        err: &MigrationError,
        run: &MigrationRun,
    ) {
        tracing::warn!(
            chain_id = %unit.chain_id,
            path = %unit.derivation_path,
            code = err.code(),
            error = %err,
            "Migration attempt failed before broadcast"
        );

        let mut transaction = Transaction::new(destination);
        transaction.transition(TransactionStatus::Error, Some(err.to_string()));
        apply_transaction(state, unit, &transaction);

        publish_or_log(
            self.events.as_ref(),
            MigrationEvent::TransactionUpdated {
                chain_id: unit.chain_id.clone(),
                derivation_path: unit.derivation_path.clone(),
                buckets: unit.buckets.clone(),
                transaction: transaction.clone(),
            },
        )
        .await;

        let counters = run
            .context
            .record_terminal(transaction.status, unit.buckets.len());
        self.publish_counters(counters).await;
    }

    async fn publish_counters(&self, counters: MigrationCounters) {
        publish_or_log(
            self.events.as_ref(),
            MigrationEvent::CountersUpdated {
                success: counters.success,
                fails: counters.fails,
                total: counters.total,
            },
        )
        .await;
    }
}

fn locate<'a>(
    state: &'a SyncState,
    chain_id: &str,
    derivation_path: &str,
) -> MigrationResult<(ChainConfig, &'a DerivedAccount)> {
    let chain = state.chain(chain_id).ok_or_else(|| {
        MigrationError::configuration(format!("chain {} is not synchronized", chain_id))
    })?;
    let account = state.account(chain_id, derivation_path).ok_or_else(|| {
        ValidationError::UnknownAccount(format!("{}:{}", chain_id, derivation_path))
    })?;
    Ok((chain.chain.clone(), account))
}

/// 由账户当前持仓生成转账请求
fn build_request(state: &SyncState, unit: &MigrationUnit, destination: &str) -> Option<TransferRequest> {
    let account = state.account(&unit.chain_id, &unit.derivation_path)?;

    let mut request = TransferRequest {
        sender: account.address.clone(),
        sender_path: account.derivation_path.clone(),
        receiver: destination.to_string(),
        amount: None,
        nft_items: Vec::new(),
        uniques: Vec::new(),
    };

    for kind in &unit.buckets {
        match &account.bucket(*kind)?.asset {
            BucketAsset::Native(_) => request.amount = Some(TransferAmount::Max),
            BucketAsset::Nfts(items) => request.nft_items = items.clone(),
            BucketAsset::Uniques(items) => request.uniques = items.clone(),
        }
    }

    Some(request)
}

/// 把交易写入单元覆盖的所有余额桶
fn apply_transaction(state: &mut SyncState, unit: &MigrationUnit, transaction: &Transaction) {
    let Some(account) = state.account_mut(&unit.chain_id, &unit.derivation_path) else {
        return;
    };
    for kind in &unit.buckets {
        if let Some(bucket) = account.bucket_mut(*kind) {
            bucket.transaction = Some(transaction.clone());
        }
    }
}
