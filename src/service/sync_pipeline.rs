//! 多链同步流水线
//!
//! 链按顺序处理（签名设备一次只能处理一个请求），单链内所有地址的持仓并发拉取。
//! 取消标记只在链与链之间检查；单链失败只标记该链，不中断整个运行。

use std::sync::Arc;

use futures::future::join_all;

use crate::{
    domain::{
        AccountError, ChainConfig, ChainSyncResult, ChainSyncStatus, DerivedAccount, FetchKind,
        SyncError, SyncState, SyncStatus,
    },
    error::{MigrationError, MigrationResult},
    infrastructure::{
        event_bus::{publish_or_log, EventBus, MigrationEvent},
        ChainConnector, ChainSession, SessionGuard, SigningDevice,
    },
    service::{
        balance_fetcher::BalanceFetcher,
        run_context::{SyncProgress, SyncRunContext},
    },
    utils::hashing::to_hex_prefixed,
};

/// 同步流水线
pub struct SyncPipeline {
    device: Arc<dyn SigningDevice>,
    connector: Arc<dyn ChainConnector>,
    fetcher: BalanceFetcher,
    events: Arc<dyn EventBus>,
}

/// 单链打开的会话
struct ChainSessions {
    primary: SessionGuard,
    people: Option<SessionGuard>,
}

impl ChainSessions {
    async fn release(self) {
        self.primary.release().await;
        if let Some(people) = self.people {
            people.release().await;
        }
    }
}

impl SyncPipeline {
    pub fn new(
        device: Arc<dyn SigningDevice>,
        connector: Arc<dyn ChainConnector>,
        fetcher: BalanceFetcher,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            device,
            connector,
            fetcher,
            events,
        }
    }

    /// 同步所有链
    ///
    /// 设备不可达时直接返回连接错误，不做任何其它工作。
    pub async fn synchronize_all(
        &self,
        chains: &[ChainConfig],
        max_addresses_per_chain: u32,
        ctx: &SyncRunContext,
    ) -> MigrationResult<SyncState> {
        self.probe_device().await?;

        let mut state = SyncState {
            status: SyncStatus::Loading,
            chains: Vec::new(),
        };

        ctx.begin(chains.len());
        publish_or_log(
            self.events.as_ref(),
            MigrationEvent::SyncStarted {
                total_chains: chains.len(),
            },
        )
        .await;

        for chain in chains {
            if ctx.is_cancel_requested() {
                tracing::info!(
                    chain_id = %chain.id,
                    scanned = ctx.progress().scanned,
                    "Synchronization cancelled"
                );
                break;
            }

            let result = self.sync_chain(chain, max_addresses_per_chain).await;
            self.finish_chain(&mut state, result, ctx).await;
        }

        let cancelled = ctx.finish();
        state.status = SyncStatus::Synchronized;
        publish_or_log(self.events.as_ref(), MigrationEvent::SyncFinished { cancelled }).await;

        tracing::info!(
            chains = state.chains.len(),
            errored_chains = state.errored_chains().len(),
            cancelled = cancelled,
            "Synchronization finished"
        );

        Ok(state)
    }

    /// 只重新同步出错的链和出错的账户
    ///
    /// 配置错误的链不会重试，需要先修正链配置。
    ///
    /// # Arguments
    /// * `chain_ids` - 限定范围；`None` 表示所有出错项
    /// * `max_addresses_per_chain` - 出错链重新派生的地址数量
    pub async fn rescan(
        &self,
        state: &mut SyncState,
        chain_ids: Option<&[String]>,
        max_addresses_per_chain: u32,
        ctx: &SyncRunContext,
    ) -> MigrationResult<()> {
        let in_scope = |id: &str| chain_ids.map_or(true, |ids| ids.iter().any(|c| c == id));

        let failed_chains: Vec<ChainConfig> = state
            .chains
            .iter()
            .filter(|c| c.status == ChainSyncStatus::Error && in_scope(c.chain_id()))
            .filter(|c| c.error.as_ref().map_or(true, SyncError::is_retryable))
            .map(|c| c.chain.clone())
            .collect();
        let chains_with_errored_accounts: Vec<ChainConfig> = state
            .chains
            .iter()
            .filter(|c| c.status == ChainSyncStatus::Synchronized && in_scope(c.chain_id()))
            .filter(|c| c.accounts.iter().any(DerivedAccount::has_error))
            .map(|c| c.chain.clone())
            .collect();

        if failed_chains.is_empty() && chains_with_errored_accounts.is_empty() {
            tracing::debug!("Nothing to rescan");
            return Ok(());
        }

        if !failed_chains.is_empty() {
            self.probe_device().await?;
        }

        state.status = SyncStatus::Loading;
        ctx.begin(failed_chains.len() + chains_with_errored_accounts.len());

        for chain in &failed_chains {
            if ctx.is_cancel_requested() {
                break;
            }
            let result = self.sync_chain(chain, max_addresses_per_chain).await;
            self.finish_chain(state, result, ctx).await;
        }

        for chain in &chains_with_errored_accounts {
            if ctx.is_cancel_requested() {
                break;
            }
            if let Some(existing) = state.chain_mut(&chain.id) {
                self.refetch_errored_accounts(existing).await;
            }
            let progress = ctx.advance();
            self.publish_progress(progress).await;
        }

        let cancelled = ctx.finish();
        state.status = SyncStatus::Synchronized;
        publish_or_log(self.events.as_ref(), MigrationEvent::SyncFinished { cancelled }).await;
        Ok(())
    }

    async fn probe_device(&self) -> MigrationResult<()> {
        match self.device.version().await {
            Ok(version) => {
                tracing::debug!(version = %version, "Signing device ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Signing device unavailable");
                Err(MigrationError::connection(e.to_string()))
            }
        }
    }

    async fn finish_chain(
        &self,
        state: &mut SyncState,
        result: ChainSyncResult,
        ctx: &SyncRunContext,
    ) {
        publish_or_log(
            self.events.as_ref(),
            MigrationEvent::ChainStatusChanged {
                chain_id: result.chain.id.clone(),
                status: result.status,
                error: result.error.as_ref().map(|e| e.message().to_string()),
            },
        )
        .await;
        state.upsert_chain(result);

        let progress = ctx.advance();
        self.publish_progress(progress).await;
    }

    async fn publish_progress(&self, progress: SyncProgress) {
        publish_or_log(
            self.events.as_ref(),
            MigrationEvent::SyncProgress {
                scanned: progress.scanned,
                total: progress.total,
                percentage: progress.percentage,
            },
        )
        .await;
    }

    /// 同步单条链，错误收敛为该链的 Error 状态
    async fn sync_chain(&self, chain: &ChainConfig, max_addresses: u32) -> ChainSyncResult {
        if let Err(e) = chain.ensure_complete() {
            tracing::error!(chain_id = %chain.id, error = %e, "Chain configuration incomplete");
            return ChainSyncResult::failed(chain.clone(), SyncError::Configuration(e.to_string()));
        }

        let derived = match self.derive_accounts(chain, max_addresses).await {
            Ok(derived) => derived,
            Err(e) => {
                tracing::warn!(chain_id = %chain.id, error = %e, "Address derivation failed");
                return ChainSyncResult::failed(chain.clone(), SyncError::Derivation(e.to_string()));
            }
        };

        let sessions = match self.open_sessions(chain).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(chain_id = %chain.id, error = %e, "Chain connection failed");
                return ChainSyncResult::failed(chain.clone(), SyncError::Connection(e.to_string()));
            }
        };

        let primary: &dyn ChainSession = &*sessions.primary;
        let people = sessions.people.as_deref();
        let fetched = join_all(
            derived
                .iter()
                .cloned()
                .map(|account| self.fetcher.fetch_account(account, chain, primary, people)),
        )
        .await;
        sessions.release().await;

        let accounts = retain_accounts(fetched, &derived);

        tracing::info!(
            chain_id = %chain.id,
            derived = derived.len(),
            kept = accounts.len(),
            "Chain synchronized"
        );

        ChainSyncResult {
            chain: chain.clone(),
            status: ChainSyncStatus::Synchronized,
            error: None,
            accounts,
        }
    }

    /// 顺序派生地址（设备串行）
    async fn derive_accounts(
        &self,
        chain: &ChainConfig,
        max_addresses: u32,
    ) -> MigrationResult<Vec<DerivedAccount>> {
        let mut accounts = Vec::with_capacity(max_addresses as usize);
        for index in 0..max_addresses {
            let path = chain.derivation_path(index);
            let derived = self
                .device
                .derive_address(&path, chain.ss58_prefix, false)
                .await?;
            accounts.push(DerivedAccount::new(
                chain.id.clone(),
                path,
                derived.address,
                to_hex_prefixed(&derived.public_key),
            ));
        }
        Ok(accounts)
    }

    async fn open_sessions(&self, chain: &ChainConfig) -> anyhow::Result<ChainSessions> {
        let primary = SessionGuard::connect(self.connector.as_ref(), &chain.rpc_endpoint).await?;
        let people = match chain.people_rpc_endpoint.as_deref() {
            Some(endpoint) => {
                // 失败时 primary 由守卫在 drop 时断开
                Some(SessionGuard::connect(self.connector.as_ref(), endpoint).await?)
            }
            None => None,
        };
        Ok(ChainSessions { primary, people })
    }

    /// 对已同步链中出错的账户重新拉取（地址已知，不访问设备）
    async fn refetch_errored_accounts(&self, result: &mut ChainSyncResult) {
        let chain = result.chain.clone();
        let sessions = match self.open_sessions(&chain).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(chain_id = %chain.id, error = %e, "Rescan connection failed");
                for account in result.accounts.iter_mut().filter(|a| a.has_error()) {
                    account.error = Some(AccountError {
                        kind: FetchKind::Balance,
                        message: format!("{:#}", e),
                    });
                }
                return;
            }
        };

        let primary: &dyn ChainSession = &*sessions.primary;
        let people = sessions.people.as_deref();
        let chain = &chain;
        let errored: Vec<(usize, DerivedAccount)> = result
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.has_error())
            .map(|(i, a)| (i, a.clone()))
            .collect();

        let refreshed = join_all(errored.into_iter().map(|(i, account)| async move {
            let account = self
                .fetcher
                .fetch_account(account, chain, primary, people)
                .await;
            (i, account)
        }))
        .await;
        sessions.release().await;

        for (i, account) in refreshed {
            result.accounts[i] = account;
        }

        let derived: Vec<(String, String)> = result
            .accounts
            .iter()
            .map(|a| (a.address.clone(), a.derivation_path.clone()))
            .collect();
        mark_internal(&mut result.accounts, &derived);
        result.accounts.retain(DerivedAccount::should_keep);
    }
}

/// 标记多签 internal 成员并丢弃空账户
fn retain_accounts(fetched: Vec<DerivedAccount>, derived: &[DerivedAccount]) -> Vec<DerivedAccount> {
    let pairs: Vec<(String, String)> = derived
        .iter()
        .map(|a| (a.address.clone(), a.derivation_path.clone()))
        .collect();

    let mut accounts = fetched;
    mark_internal(&mut accounts, &pairs);
    accounts.retain(DerivedAccount::should_keep);
    accounts
}

fn mark_internal(accounts: &mut [DerivedAccount], derived: &[(String, String)]) {
    let pairs: Vec<(&str, &str)> = derived
        .iter()
        .map(|(address, path)| (address.as_str(), path.as_str()))
        .collect();
    for account in accounts.iter_mut() {
        for multisig in &mut account.multisig {
            multisig.mark_internal_members(pairs.iter().copied());
        }
    }
}
