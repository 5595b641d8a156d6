//! 迁移交易构建器
//!
//! 构建单笔原生转账、批量转账（NFT/Uniques 在前，原生余额在后，一次签名）
//! 或多签调用，并附带运行时元数据摘要与证明，供硬件设备校验载荷。

use serde::{Deserialize, Serialize};

use crate::{
    domain::{BucketKind, ChainConfig, NativeBalance, NftItem},
    error::{MigrationError, MigrationResult, Shortfall, ValidationError},
    infrastructure::chain_session::{CallIndex, ChainSession, MetadataProof, RuntimeContext},
    service::extrinsic::{self, SignedExtra, MULTI_SIGNATURE_LEN},
    utils::{amount::format_balance, hashing::blake2_256, ss58},
};

/// 转账金额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TransferAmount {
    /// 可转余额扣除手续费后的全部
    Max,
    Exact(u128),
}

/// 迁移转账请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender: String,
    pub sender_path: String,
    pub receiver: String,
    /// 为空时不转原生余额
    pub amount: Option<TransferAmount>,
    #[serde(default)]
    pub nft_items: Vec<NftItem>,
    #[serde(default)]
    pub uniques: Vec<NftItem>,
}

impl TransferRequest {
    /// 本次请求覆盖的余额桶
    pub fn buckets(&self) -> Vec<BucketKind> {
        let mut buckets = Vec::new();
        if !self.nft_items.is_empty() {
            buckets.push(BucketKind::Nfts);
        }
        if !self.uniques.is_empty() {
            buckets.push(BucketKind::Uniques);
        }
        if self.amount.is_some() {
            buckets.push(BucketKind::Native);
        }
        buckets
    }
}

/// 已准备好、等待签名的交易
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub chain_id: String,
    /// 设备识别链所用的标签
    pub chain_tag: String,
    pub signer_address: String,
    pub signer_path: String,
    pub signer_public_key: [u8; 32],
    pub destination_address: String,
    pub call: Vec<u8>,
    pub call_hash: [u8; 32],
    pub extra: SignedExtra,
    pub runtime: RuntimeContext,
    pub metadata: MetadataProof,
    pub fee: u128,
    /// 实际转出的原生金额
    pub amount: Option<u128>,
    pub buckets: Vec<BucketKind>,
}

impl PreparedTransaction {
    /// 设备签名的规范载荷
    pub fn signing_payload(&self) -> Vec<u8> {
        extrinsic::signing_payload(
            &self.call,
            &self.extra.encode(),
            &extrinsic::additional_signed(&self.runtime, &self.metadata.digest),
        )
    }

    /// 用设备返回的签名组装 extrinsic
    ///
    /// 重新生成载荷并要求与实际签名的字节完全一致。
    pub fn signed_extrinsic(
        &self,
        signed_payload: &[u8],
        signature: &[u8],
    ) -> Result<Vec<u8>, ValidationError> {
        if self.signing_payload() != signed_payload {
            return Err(ValidationError::PayloadMismatch);
        }
        if signature.len() != MULTI_SIGNATURE_LEN {
            return Err(ValidationError::MalformedSignature(signature.len()));
        }

        Ok(extrinsic::signed_extrinsic(
            &self.signer_public_key,
            signature,
            &self.extra.encode(),
            &self.call,
        ))
    }
}

/// 计算实际转出金额并检查余额
///
/// `Max` 时金额 = 可转余额 − 手续费。
pub fn resolve_amount(
    amount: Option<TransferAmount>,
    transferable: u128,
    fee: u128,
) -> Result<Option<u128>, ValidationError> {
    let fee_only = || ValidationError::InsufficientBalance {
        shortfall: Shortfall::FeeOnly,
        available: transferable,
        required: fee,
    };

    match amount {
        None if fee > transferable => Err(fee_only()),
        None => Ok(None),
        Some(TransferAmount::Max) if fee >= transferable => Err(fee_only()),
        Some(TransferAmount::Max) => Ok(Some(transferable - fee)),
        Some(TransferAmount::Exact(_)) if fee > transferable => Err(fee_only()),
        Some(TransferAmount::Exact(value)) => {
            let required = value.saturating_add(fee);
            if required > transferable {
                Err(ValidationError::InsufficientBalance {
                    shortfall: Shortfall::AmountPlusFee,
                    available: transferable,
                    required,
                })
            } else {
                Ok(Some(value))
            }
        }
    }
}

fn connection(err: anyhow::Error) -> MigrationError {
    MigrationError::connection(format!("{:#}", err))
}

fn decode_address(address: &str) -> Result<[u8; 32], ValidationError> {
    ss58::account_id(address).map_err(|_| ValidationError::InvalidAddress(address.to_string()))
}

/// 签名者与链上下文
struct SignerContext<'a> {
    chain: &'a ChainConfig,
    address: &'a str,
    public_key: [u8; 32],
    path: &'a str,
    nonce: u32,
    runtime: RuntimeContext,
}

/// 交易构建器
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder;

impl TransactionBuilder {
    pub fn new() -> Self {
        Self
    }

    /// 准备迁移转账
    ///
    /// # Arguments
    /// * `session` - 已连接的链会话（由调用方负责断开）
    /// * `request` - 转账请求
    /// * `chain` - 链配置
    pub async fn prepare_transfer(
        &self,
        session: &dyn ChainSession,
        request: &TransferRequest,
        chain: &ChainConfig,
    ) -> MigrationResult<PreparedTransaction> {
        if request.receiver.trim().is_empty() {
            return Err(ValidationError::MissingReceiver.into());
        }
        if request.amount.is_none() && request.nft_items.is_empty() && request.uniques.is_empty()
        {
            return Err(ValidationError::NothingToMigrate.into());
        }
        let receiver = decode_address(&request.receiver)?;
        let sender = decode_address(&request.sender)?;

        let (nonce, runtime, balance) = tokio::try_join!(
            session.account_nonce(&request.sender),
            session.runtime_context(),
            session.account_balance(&request.sender),
        )
        .map_err(connection)?;
        let transferable = NativeBalance::new(balance.free, balance.reserved, balance.frozen)
            .transferable;

        let item_calls = self.item_calls(session, request, &receiver).await?;
        let native_index = match request.amount {
            Some(TransferAmount::Max) => Some(
                session
                    .call_index("Balances", "transfer_allow_death")
                    .await
                    .map_err(connection)?,
            ),
            Some(TransferAmount::Exact(_)) => Some(
                session
                    .call_index("Balances", "transfer_keep_alive")
                    .await
                    .map_err(connection)?,
            ),
            None => None,
        };
        let batch_index = if item_calls.len() + usize::from(native_index.is_some()) > 1 {
            Some(
                session
                    .call_index("Utility", "batch_all")
                    .await
                    .map_err(connection)?,
            )
        } else {
            None
        };

        let compose = |native_value: Option<u128>| -> Vec<u8> {
            let mut calls = item_calls.clone();
            if let (Some(index), Some(value)) = (native_index, native_value) {
                calls.push(extrinsic::transfer_call(index, &receiver, value));
            }
            match batch_index {
                Some(index) => extrinsic::batch_all_call(index, &calls),
                None => calls.into_iter().next().unwrap_or_default(),
            }
        };

        // Max 先用可转余额占位试算手续费
        let provisional = match request.amount {
            Some(TransferAmount::Max) => Some(transferable),
            Some(TransferAmount::Exact(value)) => Some(value),
            None => None,
        };
        let fee = session
            .estimate_fee(&compose(provisional), &request.sender)
            .await
            .map_err(connection)?
            .partial_fee;

        let amount = resolve_amount(request.amount, transferable, fee).map_err(|e| {
            tracing::warn!(
                chain_id = %chain.id,
                sender = %request.sender,
                transferable = %format_balance(transferable, chain.token.decimals, &chain.token.symbol),
                fee = %format_balance(fee, chain.token.decimals, &chain.token.symbol),
                "Insufficient balance for migration"
            );
            e
        })?;

        let signer = SignerContext {
            chain,
            address: &request.sender,
            public_key: sender,
            path: &request.sender_path,
            nonce,
            runtime,
        };
        let prepared = self
            .assemble(
                session,
                signer,
                &request.receiver,
                compose(amount),
                fee,
                amount,
                request.buckets(),
            )
            .await?;

        tracing::info!(
            chain_id = %chain.id,
            sender = %request.sender,
            receiver = %request.receiver,
            amount = ?amount.map(|a| format_balance(a, chain.token.decimals, &chain.token.symbol)),
            fee = %fee,
            batched = batch_index.is_some(),
            "Migration transfer prepared"
        );

        Ok(prepared)
    }

    /// 准备任意调用（多签批准使用），只要求签名者付得起手续费
    pub async fn prepare_call(
        &self,
        session: &dyn ChainSession,
        chain: &ChainConfig,
        signer_address: &str,
        signer_path: &str,
        destination: &str,
        call: Vec<u8>,
    ) -> MigrationResult<PreparedTransaction> {
        let public_key = decode_address(signer_address)?;

        let (nonce, runtime, balance) = tokio::try_join!(
            session.account_nonce(signer_address),
            session.runtime_context(),
            session.account_balance(signer_address),
        )
        .map_err(connection)?;
        let transferable = NativeBalance::new(balance.free, balance.reserved, balance.frozen)
            .transferable;

        let fee = session
            .estimate_fee(&call, signer_address)
            .await
            .map_err(connection)?
            .partial_fee;
        resolve_amount(None, transferable, fee)?;

        let signer = SignerContext {
            chain,
            address: signer_address,
            public_key,
            path: signer_path,
            nonce,
            runtime,
        };
        self.assemble(session, signer, destination, call, fee, None, Vec::new())
            .await
    }

    /// NFT / Uniques 转移调用，按请求顺序
    async fn item_calls(
        &self,
        session: &dyn ChainSession,
        request: &TransferRequest,
        receiver: &[u8; 32],
    ) -> MigrationResult<Vec<Vec<u8>>> {
        let mut calls = Vec::with_capacity(request.nft_items.len() + request.uniques.len());
        for (pallet, items) in [("Nfts", &request.nft_items), ("Uniques", &request.uniques)] {
            if items.is_empty() {
                continue;
            }
            let index: CallIndex = session
                .call_index(pallet, "transfer")
                .await
                .map_err(connection)?;
            calls.extend(items.iter().map(|item| {
                extrinsic::item_transfer_call(index, item.collection_id, item.item_id, receiver)
            }));
        }
        Ok(calls)
    }

    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        &self,
        session: &dyn ChainSession,
        signer: SignerContext<'_>,
        destination: &str,
        call: Vec<u8>,
        fee: u128,
        amount: Option<u128>,
        buckets: Vec<BucketKind>,
    ) -> MigrationResult<PreparedTransaction> {
        let extra = SignedExtra::new(signer.nonce);
        let metadata = session
            .metadata_digest_and_proof(&call, &extra.encode())
            .await
            .map_err(connection)?;

        Ok(PreparedTransaction {
            chain_id: signer.chain.id.clone(),
            chain_tag: signer.chain.token.symbol.to_lowercase(),
            signer_address: signer.address.to_string(),
            signer_path: signer.path.to_string(),
            signer_public_key: signer.public_key,
            destination_address: destination.to_string(),
            call_hash: blake2_256(&call),
            call,
            extra,
            runtime: signer.runtime,
            metadata,
            fee,
            amount,
            buckets,
        })
    }
}
