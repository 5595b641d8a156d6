//! 签名与提交状态机
//!
//! Idle → AwaitingSignature → Submitted → InBlock → Finalized → 终态。
//! 广播后的跟踪在独立任务中运行，受提交超时约束；链会话在每条路径上恰好断开一次。

use std::{sync::Arc, time::Duration};

use futures::{stream::BoxStream, StreamExt};
use tokio::task::JoinHandle;

use crate::{
    domain::{BucketKind, Transaction, TransactionStatus},
    error::MigrationError,
    infrastructure::{
        chain_session::{ExtrinsicEvent, SubmissionEvent},
        event_bus::{publish_or_log, EventBus, MigrationEvent},
        ChainSession, SessionGuard, SigningDevice,
    },
    service::{
        run_context::MigrationRunContext, transaction_builder::PreparedTransaction,
    },
    utils::hashing::{blake2_256, to_hex_prefixed},
};

/// 一次提交对应的余额桶与计数上下文
#[derive(Clone)]
pub struct TransactionScope {
    pub chain_id: String,
    pub derivation_path: String,
    pub buckets: Vec<BucketKind>,
    pub run: Arc<MigrationRunContext>,
}

impl TransactionScope {
    /// 计数时按桶数计（多签批准没有桶，按 1 计）
    pub fn weight(&self) -> usize {
        self.buckets.len().max(1)
    }

    fn updated(&self, transaction: &Transaction) -> MigrationEvent {
        MigrationEvent::TransactionUpdated {
            chain_id: self.chain_id.clone(),
            derivation_path: self.derivation_path.clone(),
            buckets: self.buckets.clone(),
            transaction: transaction.clone(),
        }
    }
}

/// 提交结果句柄
pub enum SubmissionHandle {
    /// 广播前已经结束（签名被拒、载荷不一致、节点拒绝）
    Resolved(Transaction),
    /// 已广播，等待最终化
    Pending {
        snapshot: Transaction,
        task: JoinHandle<Transaction>,
        scope: TransactionScope,
        events: Arc<dyn EventBus>,
    },
}

impl SubmissionHandle {
    /// 当前可见的交易状态
    pub fn snapshot(&self) -> &Transaction {
        match self {
            Self::Resolved(transaction) => transaction,
            Self::Pending { snapshot, .. } => snapshot,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// 等待终态
    pub async fn wait(self) -> Transaction {
        match self {
            Self::Resolved(transaction) => transaction,
            Self::Pending {
                mut snapshot,
                task,
                scope,
                events,
            } => match task.await {
                Ok(transaction) => transaction,
                Err(e) => {
                    tracing::error!(
                        chain_id = %scope.chain_id,
                        error = %e,
                        "Finalization tracking task aborted"
                    );
                    // 跟踪任务没有走到计数这一步
                    advance(
                        events.as_ref(),
                        &mut snapshot,
                        TransactionStatus::Unknown,
                        Some(format!("tracking task aborted: {}", e)),
                        &scope,
                    )
                    .await;
                    record_terminal(events.as_ref(), &scope, &snapshot).await;
                    snapshot
                }
            },
        }
    }
}

/// 签名与提交状态机
pub struct SubmissionStateMachine {
    device: Arc<dyn SigningDevice>,
    events: Arc<dyn EventBus>,
    timeout: Duration,
}

impl SubmissionStateMachine {
    pub fn new(device: Arc<dyn SigningDevice>, events: Arc<dyn EventBus>, timeout: Duration) -> Self {
        Self {
            device,
            events,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 签名并提交；会话所有权转移到状态机
    pub async fn submit(
        &self,
        session: SessionGuard,
        prepared: PreparedTransaction,
        scope: TransactionScope,
    ) -> SubmissionHandle {
        let mut transaction = Transaction::new(prepared.destination_address.clone());
        self.advance(&mut transaction, TransactionStatus::AwaitingSignature, None, &scope)
            .await;

        let payload = prepared.signing_payload();
        let signature = match self
            .device
            .sign(
                &prepared.signer_path,
                &payload,
                &prepared.chain_tag,
                &prepared.metadata.proof,
            )
            .await
        {
            Ok(signature) => signature,
            Err(e) => {
                tracing::warn!(
                    chain_id = %scope.chain_id,
                    path = %prepared.signer_path,
                    error = %e,
                    "Device signing failed"
                );
                return self
                    .resolve(session, transaction, TransactionStatus::Error, e.to_string(), &scope)
                    .await;
            }
        };

        let extrinsic = match prepared.signed_extrinsic(&payload, &signature) {
            Ok(extrinsic) => extrinsic,
            Err(e) => {
                return self
                    .resolve(session, transaction, TransactionStatus::Error, e.to_string(), &scope)
                    .await;
            }
        };

        let tx_hash = to_hex_prefixed(&blake2_256(&extrinsic));
        // TODO: 广播前重新估算手续费并校验可转余额，目前只在 prepare 时估算一次
        let stream = match session.submit(extrinsic).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(chain_id = %scope.chain_id, error = ?e, "Broadcast failed");
                return self
                    .resolve(
                        session,
                        transaction,
                        TransactionStatus::Error,
                        format!("{:#}", e),
                        &scope,
                    )
                    .await;
            }
        };

        transaction.tx_hash = Some(tx_hash.clone());
        self.advance(&mut transaction, TransactionStatus::Submitted, None, &scope)
            .await;
        tracing::info!(
            chain_id = %scope.chain_id,
            path = %scope.derivation_path,
            tx_hash = %tx_hash,
            "Transaction submitted"
        );

        let snapshot = transaction.clone();
        let events = self.events.clone();
        let tracked_scope = scope.clone();
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            track(session, stream, transaction, events, tracked_scope, timeout).await
        });

        SubmissionHandle::Pending {
            snapshot,
            task,
            scope,
            events: self.events.clone(),
        }
    }

    /// 广播前结束：断开会话、写入终态、计数
    async fn resolve(
        &self,
        session: SessionGuard,
        mut transaction: Transaction,
        status: TransactionStatus,
        message: String,
        scope: &TransactionScope,
    ) -> SubmissionHandle {
        session.release().await;
        self.advance(&mut transaction, status, Some(message), scope)
            .await;
        record_terminal(self.events.as_ref(), scope, &transaction).await;
        SubmissionHandle::Resolved(transaction)
    }

    async fn advance(
        &self,
        transaction: &mut Transaction,
        status: TransactionStatus,
        message: Option<String>,
        scope: &TransactionScope,
    ) {
        advance(self.events.as_ref(), transaction, status, message, scope).await;
    }
}

async fn advance(
    events: &dyn EventBus,
    transaction: &mut Transaction,
    status: TransactionStatus,
    message: Option<String>,
    scope: &TransactionScope,
) -> bool {
    let changed = transaction.transition(status, message);
    if changed {
        publish_or_log(events, scope.updated(transaction)).await;
    }
    changed
}

async fn record_terminal(events: &dyn EventBus, scope: &TransactionScope, transaction: &Transaction) {
    let counters = scope
        .run
        .record_terminal(transaction.status, scope.weight());
    publish_or_log(
        events,
        MigrationEvent::CountersUpdated {
            success: counters.success,
            fails: counters.fails,
            total: counters.total,
        },
    )
    .await;
}

/// 广播后的跟踪任务
async fn track(
    session: SessionGuard,
    mut stream: BoxStream<'static, SubmissionEvent>,
    mut transaction: Transaction,
    events: Arc<dyn EventBus>,
    scope: TransactionScope,
    timeout: Duration,
) -> Transaction {
    let outcome = tokio::time::timeout(
        timeout,
        follow_status(&*session, &mut stream, &mut transaction, events.as_ref(), &scope),
    )
    .await;

    if outcome.is_err() {
        tracing::warn!(
            chain_id = %scope.chain_id,
            tx_hash = ?transaction.tx_hash,
            timeout_secs = timeout.as_secs(),
            "No finalization signal before deadline"
        );
        advance(
            events.as_ref(),
            &mut transaction,
            TransactionStatus::Unknown,
            Some(MigrationError::Timeout(timeout).to_string()),
            &scope,
        )
        .await;
    }

    drop(stream);
    session.release().await;

    tracing::info!(
        chain_id = %scope.chain_id,
        path = %scope.derivation_path,
        status = %transaction.status,
        "Transaction resolved"
    );
    record_terminal(events.as_ref(), &scope, &transaction).await;
    transaction
}

/// 消费状态事件直到终态
async fn follow_status(
    session: &dyn ChainSession,
    stream: &mut BoxStream<'static, SubmissionEvent>,
    transaction: &mut Transaction,
    events: &dyn EventBus,
    scope: &TransactionScope,
) {
    while let Some(event) = stream.next().await {
        match event {
            SubmissionEvent::InBlock {
                block_hash,
                block_number,
                ..
            } => {
                if transaction.transition(TransactionStatus::InBlock, None) {
                    transaction.block_hash = Some(block_hash);
                    transaction.block_number = Some(block_number);
                    publish_or_log(events, scope.updated(transaction)).await;
                }
            }
            SubmissionEvent::Finalized {
                block_hash,
                block_number,
                extrinsic_index,
            } => {
                if !transaction.transition(TransactionStatus::Finalized, None) {
                    continue;
                }
                transaction.block_hash = Some(block_hash.clone());
                transaction.block_number = Some(block_number);
                publish_or_log(events, scope.updated(transaction)).await;

                let (status, message) = classify(session, &block_hash, extrinsic_index).await;
                advance(events, transaction, status, Some(message), scope).await;
                return;
            }
            SubmissionEvent::Error { message } => {
                advance(events, transaction, TransactionStatus::Error, Some(message), scope).await;
                return;
            }
            SubmissionEvent::Warning { message } => {
                tracing::warn!(
                    chain_id = %scope.chain_id,
                    tx_hash = ?transaction.tx_hash,
                    warning = %message,
                    "Submission warning"
                );
            }
        }
    }

    // 事件流结束但没有最终化
    advance(
        events,
        transaction,
        TransactionStatus::Unknown,
        Some("status stream closed before finalization".to_string()),
        scope,
    )
    .await;
}

/// 根据最终化区块中的事件判定结果
async fn classify(
    session: &dyn ChainSession,
    block_hash: &str,
    extrinsic_index: u32,
) -> (TransactionStatus, String) {
    let events = match session.block_events(block_hash, extrinsic_index).await {
        Ok(events) => events,
        Err(e) => {
            return (
                TransactionStatus::Unknown,
                format!("failed to read block events: {:#}", e),
            )
        }
    };

    for event in events {
        match event {
            ExtrinsicEvent::Success => {
                return (
                    TransactionStatus::Success,
                    "Transaction finalized successfully".to_string(),
                )
            }
            ExtrinsicEvent::Failed(error) => {
                return (
                    TransactionStatus::Failed,
                    MigrationError::ChainRejection(error.describe()).to_string(),
                )
            }
            ExtrinsicEvent::Other { .. } => {}
        }
    }

    (
        TransactionStatus::Unknown,
        "no success or failure event for the extrinsic".to_string(),
    )
}
