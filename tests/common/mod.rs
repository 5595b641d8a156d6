//! 测试辅助模块
//! 提供内存版签名设备、链连接器与链会话

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use ironmigrate::{
    domain::{ChainConfig, Identity, NftItem, PendingCall, TokenConfig},
    infrastructure::{
        chain_session::{
            AccountData, CallIndex, DispatchError, ExtrinsicEvent, FeeEstimate, MetadataProof,
            RuntimeContext, StakingLedger, SubmissionEvent, Weight,
        },
        device::{DeviceAddress, DeviceError, DeviceVersion},
        ChainConnector, ChainSession, EventBus, MigrationEvent, SigningDevice,
    },
    service::SyncRunContext,
    utils::{hashing::blake2_256, ss58},
};

pub const PATH_TEMPLATE: &str = "m/44'/354'/0'/0'/{index}'";
pub const FEE: u128 = 10;
pub const IN_BLOCK_HASH: &str = "0xaaaa";
pub const FINALIZED_HASH: &str = "0xbbbb";
pub const LATE_BLOCK_HASH: &str = "0xcccc";

/// 测试用链配置
pub fn test_chain(id: &str, endpoint: &str) -> ChainConfig {
    ChainConfig {
        id: id.to_string(),
        name: id.to_string(),
        derivation_path_template: PATH_TEMPLATE.to_string(),
        ss58_prefix: 0,
        token: TokenConfig {
            symbol: "DOT".to_string(),
            decimals: 10,
        },
        rpc_endpoint: endpoint.to_string(),
        people_rpc_endpoint: None,
        explorer: None,
        multisig_index_id: None,
        era_duration_hours: 24,
    }
}

pub fn path(index: u32) -> String {
    PATH_TEMPLATE.replace("{index}", &index.to_string())
}

/// 设备对某条路径派生出的地址（公钥 = blake2_256(path)）
pub fn device_address(path: &str, prefix: u16) -> String {
    ss58::encode(&blake2_256(path.as_bytes()), prefix)
}

pub fn nft(collection_id: u32, item_id: u32) -> NftItem {
    NftItem {
        collection_id,
        item_id,
        creator: None,
        is_frozen: false,
    }
}

// ============ 签名设备 ============

#[derive(Default)]
pub struct MockDevice {
    pub unreachable: AtomicBool,
    pub reject_signing: AtomicBool,
    /// 派生地址失败（App 未打开），版本查询仍然正常
    pub fail_derive: AtomicBool,
    pub sign_count: AtomicUsize,
    pub derive_count: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sign_count(&self) -> usize {
        self.sign_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningDevice for MockDevice {
    async fn derive_address(
        &self,
        path: &str,
        ss58_prefix: u16,
        _confirm_on_device: bool,
    ) -> Result<DeviceAddress, DeviceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("usb disconnected".into()));
        }
        if self.fail_derive.load(Ordering::SeqCst) {
            return Err(DeviceError::AppNotOpen("Polkadot".into()));
        }
        self.derive_count.fetch_add(1, Ordering::SeqCst);
        let public_key = blake2_256(path.as_bytes());
        Ok(DeviceAddress {
            address: ss58::encode(&public_key, ss58_prefix),
            public_key,
        })
    }

    async fn version(&self) -> Result<DeviceVersion, DeviceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("usb disconnected".into()));
        }
        Ok(DeviceVersion {
            major: 100,
            minor: 0,
            patch: 5,
            locked: false,
        })
    }

    async fn sign(
        &self,
        _path: &str,
        _payload: &[u8],
        _chain_tag: &str,
        _metadata_proof: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        if self.reject_signing.load(Ordering::SeqCst) {
            return Err(DeviceError::Rejected("user cancelled".into()));
        }
        // sr25519 MultiSignature
        let mut signature = vec![0x01];
        signature.extend_from_slice(&[0u8; 64]);
        Ok(signature)
    }
}

// ============ 链网络 ============

/// 提交后的链上表现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// ExtrinsicFailed(Balances.InsufficientBalance)
    Failed,
    /// 没有任何状态事件
    Hang,
    /// InBlock → Finalized → 迟到的 InBlock
    LateInBlock,
    /// 最终化区块里既没有成功也没有失败事件
    NoSignal,
    /// InBlock 之后事件流结束
    StreamEnds,
    /// InBlock 之后节点报告错误（例如交易被丢弃）
    StreamError,
    /// 读取区块事件失败
    BlockEventsFail,
    /// 读取区块事件时崩溃
    BlockEventsPanic,
}

/// 所有端点共享的内存链状态
#[derive(Default)]
pub struct MockNetwork {
    balances: Mutex<HashMap<(String, String), u128>>,
    nfts: Mutex<HashMap<(String, String), Vec<NftItem>>>,
    outcomes: Mutex<HashMap<String, Outcome>>,
    failing_endpoints: Mutex<HashSet<String>>,
    failing_balances: Mutex<HashSet<String>>,
    cancel_on_connect: Mutex<Option<(usize, Arc<SyncRunContext>)>>,
    submitted: Mutex<Vec<Vec<u8>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fund(&self, endpoint: &str, address: &str, free: u128) {
        self.balances
            .lock()
            .unwrap()
            .insert((endpoint.to_string(), address.to_string()), free);
    }

    pub fn give_nfts(&self, endpoint: &str, address: &str, items: Vec<NftItem>) {
        self.nfts
            .lock()
            .unwrap()
            .insert((endpoint.to_string(), address.to_string()), items);
    }

    pub fn set_outcome(&self, endpoint: &str, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), outcome);
    }

    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing_endpoints
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn restore_endpoint(&self, endpoint: &str) {
        self.failing_endpoints.lock().unwrap().remove(endpoint);
    }

    pub fn fail_balance(&self, address: &str, failing: bool) {
        let mut set = self.failing_balances.lock().unwrap();
        if failing {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// 第 `n` 次成功连接时请求取消
    pub fn cancel_on_connect(&self, n: usize, ctx: Arc<SyncRunContext>) {
        *self.cancel_on_connect.lock().unwrap() = Some((n, ctx));
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }

    fn outcome(&self, endpoint: &str) -> Outcome {
        self.outcomes
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(Outcome::Success)
    }
}

pub struct MockConnector {
    network: Arc<MockNetwork>,
}

impl MockConnector {
    pub fn new(network: Arc<MockNetwork>) -> Arc<Self> {
        Arc::new(Self { network })
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn ChainSession>> {
        if self.network.failing_endpoints.lock().unwrap().contains(endpoint) {
            bail!("connection refused: {}", endpoint);
        }
        let connects = self.network.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, ctx)) = self.network.cancel_on_connect.lock().unwrap().as_ref() {
            if connects == *n {
                ctx.cancel();
            }
        }
        Ok(Box::new(MockSession {
            network: self.network.clone(),
            endpoint: endpoint.to_string(),
        }))
    }
}

pub struct MockSession {
    network: Arc<MockNetwork>,
    endpoint: String,
}

fn in_block(block_hash: &str, block_number: u64) -> SubmissionEvent {
    SubmissionEvent::InBlock {
        block_hash: block_hash.to_string(),
        block_number,
        extrinsic_index: 1,
    }
}

fn finalized() -> SubmissionEvent {
    SubmissionEvent::Finalized {
        block_hash: FINALIZED_HASH.to_string(),
        block_number: 11,
        extrinsic_index: 1,
    }
}

#[async_trait]
impl ChainSession for MockSession {
    async fn account_balance(&self, address: &str) -> Result<AccountData> {
        if self.network.failing_balances.lock().unwrap().contains(address) {
            bail!("state_getStorage timed out");
        }
        let free = self
            .network
            .balances
            .lock()
            .unwrap()
            .get(&(self.endpoint.clone(), address.to_string()))
            .copied()
            .unwrap_or(0);
        Ok(AccountData {
            free,
            reserved: 0,
            frozen: 0,
        })
    }

    async fn account_nonce(&self, _address: &str) -> Result<u32> {
        Ok(0)
    }

    async fn staking_ledger(&self, _address: &str) -> Result<Option<StakingLedger>> {
        Ok(None)
    }

    async fn current_era(&self) -> Result<u32> {
        Ok(1_500)
    }

    async fn nft_items(&self, address: &str) -> Result<Vec<NftItem>> {
        Ok(self
            .network
            .nfts
            .lock()
            .unwrap()
            .get(&(self.endpoint.clone(), address.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn unique_items(&self, _address: &str) -> Result<Vec<NftItem>> {
        Ok(vec![])
    }

    async fn identity(&self, _address: &str) -> Result<Option<Identity>> {
        Ok(None)
    }

    async fn multisig_pending_calls(&self, _multisig_address: &str) -> Result<Vec<PendingCall>> {
        Ok(vec![])
    }

    async fn runtime_context(&self) -> Result<RuntimeContext> {
        Ok(RuntimeContext {
            genesis_hash: [0x91; 32],
            spec_version: 1_003_000,
            transaction_version: 26,
        })
    }

    async fn call_index(&self, pallet: &str, call: &str) -> Result<CallIndex> {
        let (pallet_index, call_index) = match (pallet, call) {
            ("Balances", "transfer_allow_death") => (5, 0),
            ("Balances", "transfer_keep_alive") => (5, 3),
            ("Utility", "batch_all") => (26, 2),
            ("Multisig", "as_multi") => (31, 1),
            ("Multisig", "approve_as_multi") => (31, 2),
            ("Nfts", "transfer") => (52, 6),
            ("Uniques", "transfer") => (51, 5),
            _ => bail!("unknown call {}.{}", pallet, call),
        };
        Ok(CallIndex {
            pallet: pallet_index,
            call: call_index,
        })
    }

    async fn metadata_digest_and_proof(
        &self,
        _call: &[u8],
        _signed_extra: &[u8],
    ) -> Result<MetadataProof> {
        Ok(MetadataProof {
            digest: [0x55; 32],
            proof: vec![0xde, 0xad],
        })
    }

    async fn estimate_fee(&self, _call: &[u8], _signer: &str) -> Result<FeeEstimate> {
        Ok(FeeEstimate {
            partial_fee: FEE,
            weight: Weight {
                ref_time: 1_000_000,
                proof_size: 4_096,
            },
        })
    }

    async fn submit(&self, extrinsic: Vec<u8>) -> Result<BoxStream<'static, SubmissionEvent>> {
        self.network.submitted.lock().unwrap().push(extrinsic);
        let stream = match self.network.outcome(&self.endpoint) {
            Outcome::Success
            | Outcome::Failed
            | Outcome::NoSignal
            | Outcome::BlockEventsFail
            | Outcome::BlockEventsPanic => {
                stream::iter(vec![in_block(IN_BLOCK_HASH, 10), finalized()]).boxed()
            }
            Outcome::StreamEnds => stream::iter(vec![in_block(IN_BLOCK_HASH, 10)]).boxed(),
            Outcome::StreamError => stream::iter(vec![
                in_block(IN_BLOCK_HASH, 10),
                SubmissionEvent::Error {
                    message: "transaction dropped from pool".to_string(),
                },
            ])
            .boxed(),
            Outcome::Hang => stream::pending::<SubmissionEvent>().boxed(),
            Outcome::LateInBlock => stream::iter(vec![
                in_block(IN_BLOCK_HASH, 10),
                finalized(),
                in_block(LATE_BLOCK_HASH, 12),
            ])
            .boxed(),
        };
        Ok(stream)
    }

    async fn block_events(
        &self,
        _block_hash: &str,
        _extrinsic_index: u32,
    ) -> Result<Vec<ExtrinsicEvent>> {
        let deposit = ExtrinsicEvent::Other {
            pallet: "Balances".into(),
            method: "Withdraw".into(),
        };
        let outcome = match self.network.outcome(&self.endpoint) {
            Outcome::Failed => ExtrinsicEvent::Failed(DispatchError::Module {
                pallet: "Balances".into(),
                name: "InsufficientBalance".into(),
                docs: vec!["Balance too low to send value.".into()],
            }),
            Outcome::NoSignal => return Ok(vec![deposit]),
            Outcome::BlockEventsFail => bail!("chain_getBlock timed out"),
            Outcome::BlockEventsPanic => panic!("block decoder crashed"),
            _ => ExtrinsicEvent::Success,
        };
        Ok(vec![deposit, outcome])
    }

    async fn disconnect(&self) {
        self.network.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// 事件历史（按发布顺序）
pub async fn event_history(bus: &dyn EventBus) -> Vec<MigrationEvent> {
    let mut history = bus.get_event_history(usize::MAX, 0).await.unwrap();
    history.reverse();
    history.into_iter().map(|envelope| envelope.event).collect()
}
