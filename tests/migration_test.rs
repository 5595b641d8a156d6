//! 迁移编排集成测试
//!
//! 同步 → 派生目标地址 → 迁移 → 等待最终化，全部使用内存 mock

mod common;

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use common::{
    device_address, nft, path, test_chain, MockConnector, MockDevice, MockNetwork, Outcome,
    FINALIZED_HASH,
};
use ironmigrate::{
    config::MigrationConfig,
    domain::{BucketKind, ChainConfig, SyncState, Transaction, TransactionStatus},
    infrastructure::{multisig_indexer::NoopMultisigIndexer, InMemoryEventBus, MigrationEvent},
    service::{
        BalanceFetcher, MigrationCounters, MigrationOrchestrator, SyncPipeline, SyncRunContext,
    },
};

struct Harness {
    network: Arc<MockNetwork>,
    device: Arc<MockDevice>,
    bus: Arc<InMemoryEventBus>,
    orchestrator: MigrationOrchestrator,
    chains: Vec<ChainConfig>,
}

impl Harness {
    fn new(chains: Vec<ChainConfig>, network: Arc<MockNetwork>, timeout_secs: u64) -> Self {
        let device = MockDevice::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = MigrationOrchestrator::new(
            device.clone(),
            MockConnector::new(network.clone()),
            bus.clone(),
            MigrationConfig {
                submission_timeout_secs: timeout_secs,
                destination_path: "m/44'/354'/0'/0'/99'".to_string(),
                confirm_destination_on_device: false,
            },
        );
        Self {
            network,
            device,
            bus,
            orchestrator,
            chains,
        }
    }

    async fn sync(&self) -> SyncState {
        SyncPipeline::new(
            self.device.clone(),
            MockConnector::new(self.network.clone()),
            BalanceFetcher::new(Arc::new(NoopMultisigIndexer)),
            self.bus.clone(),
        )
        .synchronize_all(&self.chains, 1, &SyncRunContext::new())
        .await
        .unwrap()
    }
}

fn owner() -> String {
    device_address(&path(0), 0)
}

/// 单链单账户迁移到终态，返回原生余额桶的交易与计数
async fn migrate_single(network: Arc<MockNetwork>) -> (Transaction, MigrationCounters) {
    let harness = Harness::new(vec![test_chain("a", "wss://a")], network, 30);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let counters = harness
        .orchestrator
        .migrate_all(&mut state, &destinations)
        .await
        .finish(&mut state)
        .await;
    let tx = state
        .account("a", &path(0))
        .unwrap()
        .bucket(BucketKind::Native)
        .unwrap()
        .transaction
        .clone()
        .unwrap();
    (tx, counters)
}

fn funded(outcome: Outcome) -> Arc<MockNetwork> {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);
    network.set_outcome("wss://a", outcome);
    network
}

#[tokio::test]
async fn test_counters_add_up_with_mixed_outcomes() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);
    network.give_nfts("wss://a", &owner(), vec![nft(1, 1), nft(1, 2)]);
    network.fund("wss://b", &owner(), 500);
    network.set_outcome("wss://b", Outcome::Failed);

    let harness = Harness::new(
        vec![test_chain("a", "wss://a"), test_chain("b", "wss://b")],
        network.clone(),
        30,
    );
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();
    assert_eq!(
        destinations.get("a"),
        Some(&device_address("m/44'/354'/0'/0'/99'", 0))
    );

    let run = harness.orchestrator.migrate_all(&mut state, &destinations).await;
    // 每个账户一次签名：a 的 NFT 与原生余额合并为一笔批量交易
    assert_eq!(harness.device.sign_count(), 2);
    assert_eq!(run.pending_count(), 2);

    let counters = run.finish(&mut state).await;
    assert_eq!(counters.total, 3);
    assert_eq!(counters.success, 2);
    assert_eq!(counters.fails, 1);
    assert_eq!(counters.success + counters.fails, counters.total);

    let a = state.account("a", &path(0)).unwrap();
    for kind in [BucketKind::Native, BucketKind::Nfts] {
        let tx = a.bucket(kind).unwrap().transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.block_hash.as_deref(), Some(FINALIZED_HASH));
    }

    let b = state.account("b", &path(0)).unwrap();
    let tx = b.bucket(BucketKind::Native).unwrap().transaction.as_ref().unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx
        .message
        .as_deref()
        .unwrap()
        .contains("Balances.InsufficientBalance"));

    assert_eq!(network.submitted().len(), 2);
    assert_eq!(network.connects(), network.disconnects());
}

#[tokio::test]
async fn test_migrate_balance_after_success_is_noop() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);

    let harness = Harness::new(vec![test_chain("a", "wss://a")], network.clone(), 30);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let run = harness
        .orchestrator
        .migrate_balance(&mut state, "a", &path(0), BucketKind::Native, &destinations)
        .await
        .unwrap();
    let counters = run.finish(&mut state).await;
    assert_eq!((counters.success, counters.fails, counters.total), (1, 0, 1));
    assert_eq!(
        state.bucket_status("a", &path(0), BucketKind::Native),
        Some(TransactionStatus::Success)
    );

    let again = harness
        .orchestrator
        .migrate_balance(&mut state, "a", &path(0), BucketKind::Native, &destinations)
        .await
        .unwrap();
    assert_eq!(again.pending_count(), 0);
    assert_eq!(again.counters().total, 0);
    assert_eq!(harness.device.sign_count(), 1);
    assert_eq!(network.submitted().len(), 1);

    // 整体迁移也跳过已成功的桶
    let all = harness.orchestrator.migrate_all(&mut state, &destinations).await;
    assert_eq!(all.counters().total, 0);
}

#[tokio::test]
async fn test_unknown_account_and_missing_bucket() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);

    let harness = Harness::new(vec![test_chain("a", "wss://a")], network, 30);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .migrate_account(&mut state, "a", &path(7), &destinations)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "validation_error");

    let err = harness
        .orchestrator
        .migrate_balance(&mut state, "a", &path(0), BucketKind::Nfts, &destinations)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "validation_error");

    let err = harness
        .orchestrator
        .migrate_account(&mut state, "zz", &path(0), &destinations)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "configuration_error");
}

#[tokio::test]
async fn test_submission_timeout_resolves_unknown() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);
    network.set_outcome("wss://a", Outcome::Hang);

    let harness = Harness::new(vec![test_chain("a", "wss://a")], network.clone(), 1);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let run = harness
        .orchestrator
        .migrate_account(&mut state, "a", &path(0), &destinations)
        .await
        .unwrap();
    let tx = state
        .account("a", &path(0))
        .unwrap()
        .bucket(BucketKind::Native)
        .unwrap()
        .transaction
        .clone()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Submitted);

    let counters = run.finish(&mut state).await;
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));

    let tx = state
        .account("a", &path(0))
        .unwrap()
        .bucket(BucketKind::Native)
        .unwrap()
        .transaction
        .clone()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Unknown);
    assert!(tx.message.unwrap().contains("no finalization signal"));

    // 同步 1 次 + 迁移 1 次，每个会话恰好断开一次
    assert_eq!(network.connects(), 2);
    assert_eq!(network.disconnects(), 2);
}

#[tokio::test]
async fn test_late_in_block_does_not_regress_status() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);
    network.set_outcome("wss://a", Outcome::LateInBlock);

    let harness = Harness::new(vec![test_chain("a", "wss://a")], network, 30);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let counters = harness
        .orchestrator
        .migrate_all(&mut state, &destinations)
        .await
        .finish(&mut state)
        .await;
    assert_eq!(counters.success, 1);

    let tx = state
        .account("a", &path(0))
        .unwrap()
        .bucket(BucketKind::Native)
        .unwrap()
        .transaction
        .clone()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(tx.block_hash.as_deref(), Some(FINALIZED_HASH));

    let statuses: Vec<TransactionStatus> = common::event_history(harness.bus.as_ref())
        .await
        .into_iter()
        .filter_map(|e| match e {
            MigrationEvent::TransactionUpdated { transaction, .. } => Some(transaction.status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            TransactionStatus::AwaitingSignature,
            TransactionStatus::Submitted,
            TransactionStatus::InBlock,
            TransactionStatus::Finalized,
            TransactionStatus::Success,
        ]
    );
}

#[tokio::test]
async fn test_device_rejection_counts_as_fail() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), 1_000);

    let harness = Harness::new(vec![test_chain("a", "wss://a")], network.clone(), 30);
    harness.device.reject_signing.store(true, Ordering::SeqCst);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let run = harness.orchestrator.migrate_all(&mut state, &destinations).await;
    assert_eq!(run.pending_count(), 0);
    let counters = run.finish(&mut state).await;
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));

    let tx = state
        .account("a", &path(0))
        .unwrap()
        .bucket(BucketKind::Native)
        .unwrap()
        .transaction
        .clone()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Error);
    assert!(network.submitted().is_empty());
    assert_eq!(network.connects(), network.disconnects());

    // 出错的桶可以再次迁移
    harness.device.reject_signing.store(false, Ordering::SeqCst);
    let retry = harness
        .orchestrator
        .migrate_balance(&mut state, "a", &path(0), BucketKind::Native, &destinations)
        .await
        .unwrap()
        .finish(&mut state)
        .await;
    assert_eq!(retry.success, 1);
}

#[tokio::test]
async fn test_fee_exceeding_balance_fails_before_signing() {
    let network = MockNetwork::new();
    network.fund("wss://a", &owner(), common::FEE);

    let harness = Harness::new(vec![test_chain("a", "wss://a")], network.clone(), 30);
    let mut state = harness.sync().await;
    let destinations = harness
        .orchestrator
        .derive_destinations(&harness.chains)
        .await
        .unwrap();

    let counters = harness
        .orchestrator
        .migrate_all(&mut state, &destinations)
        .await
        .finish(&mut state)
        .await;
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));
    assert_eq!(harness.device.sign_count(), 0);

    let tx = state
        .account("a", &path(0))
        .unwrap()
        .bucket(BucketKind::Native)
        .unwrap()
        .transaction
        .clone()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Error);
    assert!(tx.message.unwrap().contains("insufficient balance"));
    assert_eq!(network.connects(), network.disconnects());
}

#[tokio::test]
async fn test_finalized_without_outcome_event_is_unknown() {
    let network = funded(Outcome::NoSignal);
    let (tx, counters) = migrate_single(network.clone()).await;

    assert_eq!(tx.status, TransactionStatus::Unknown);
    assert!(tx.message.unwrap().contains("no success or failure event"));
    assert_eq!(tx.block_hash.as_deref(), Some(FINALIZED_HASH));
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));
    assert_eq!((network.connects(), network.disconnects()), (2, 2));
}

#[tokio::test]
async fn test_status_stream_closed_before_finalization_is_unknown() {
    let network = funded(Outcome::StreamEnds);
    let (tx, counters) = migrate_single(network.clone()).await;

    assert_eq!(tx.status, TransactionStatus::Unknown);
    assert!(tx.message.unwrap().contains("closed before finalization"));
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));
    assert_eq!((network.connects(), network.disconnects()), (2, 2));
}

#[tokio::test]
async fn test_node_error_after_broadcast_is_error() {
    let network = funded(Outcome::StreamError);
    let (tx, counters) = migrate_single(network.clone()).await;

    assert_eq!(tx.status, TransactionStatus::Error);
    assert_eq!(tx.message.as_deref(), Some("transaction dropped from pool"));
    assert!(tx.tx_hash.is_some());
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));
    assert_eq!((network.connects(), network.disconnects()), (2, 2));
}

#[tokio::test]
async fn test_unreadable_block_events_is_unknown() {
    let network = funded(Outcome::BlockEventsFail);
    let (tx, counters) = migrate_single(network.clone()).await;

    assert_eq!(tx.status, TransactionStatus::Unknown);
    assert!(tx.message.unwrap().contains("failed to read block events"));
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));
    assert_eq!((network.connects(), network.disconnects()), (2, 2));
}

#[tokio::test]
async fn test_crashed_tracking_task_still_settles_counters() {
    let network = funded(Outcome::BlockEventsPanic);
    let (tx, counters) = migrate_single(network.clone()).await;

    assert_eq!(tx.status, TransactionStatus::Unknown);
    assert!(tx.message.unwrap().contains("tracking task aborted"));
    assert_eq!((counters.success, counters.fails, counters.total), (0, 1, 1));
    assert!(counters.is_settled());

    // 会话守卫在 drop 时异步断开
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(network.connects(), network.disconnects());
}
