//! 多签批准子流程
//!
//! 所有校验（阈值、成员、签名者、调用哈希）都在访问设备之前完成。
//! 达到阈值的最后一次批准提交 `Multisig.as_multi`（需要调用数据），
//! 其余提交 `Multisig.approve_as_multi`。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChainConfig, MultisigAccount, Timepoint},
    error::{MigrationError, MigrationResult, ValidationError},
    infrastructure::{
        chain_session::{ChainSession, Weight},
        ChainConnector, SessionGuard,
    },
    service::{
        extrinsic,
        run_context::MigrationRunContext,
        submission::{SubmissionHandle, SubmissionStateMachine, TransactionScope},
        transaction_builder::{PreparedTransaction, TransactionBuilder},
    },
    utils::{
        hashing::{blake2_256, from_hex_prefixed, parse_hash, to_hex_prefixed},
        ss58,
    },
};

/// 多签批准请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigApprovalRequest {
    pub chain_id: String,
    pub multisig: MultisigAccount,
    /// 选中的待批准调用哈希
    pub call_hash: String,
    /// 签名成员地址
    pub signer: String,
    /// 十六进制调用数据；最后一次批准必填
    #[serde(default)]
    pub call_data: Option<String>,
}

/// 校验通过的批准
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedApproval {
    pub signer_address: String,
    pub signer_path: String,
    pub multisig_address: String,
    pub threshold: u16,
    /// 除签名者以外的成员公钥
    pub other_signatories: Vec<[u8; 32]>,
    pub timepoint: Timepoint,
    pub call_hash: [u8; 32],
    pub call_data: Option<Vec<u8>>,
    /// 本次批准后达到阈值
    pub is_final: bool,
}

/// 纯校验，不访问设备和网络
pub fn validate_approval(
    request: &MultisigApprovalRequest,
) -> Result<ValidatedApproval, ValidationError> {
    let multisig = &request.multisig;
    if multisig.threshold == 0 {
        return Err(ValidationError::MissingThreshold);
    }
    if multisig.members.is_empty() {
        return Err(ValidationError::MissingMembers);
    }

    let pending = multisig
        .pending_call(&request.call_hash)
        .ok_or_else(|| ValidationError::UnknownCall(request.call_hash.clone()))?;
    let call_hash = parse_hash(&pending.call_hash)
        .ok_or_else(|| ValidationError::UnknownCall(pending.call_hash.clone()))?;

    if request.signer.trim().is_empty() {
        return Err(ValidationError::MissingSigner);
    }
    let member = multisig
        .member(&request.signer)
        .ok_or_else(|| ValidationError::SignerNotMember(request.signer.clone()))?;
    let signer_path = match (&member.path, member.internal) {
        (Some(path), true) => path.clone(),
        _ => return Err(ValidationError::SignerNotInternal(request.signer.clone())),
    };
    if pending.is_approved_by(&request.signer) {
        return Err(ValidationError::AlreadyApproved(request.signer.clone()));
    }

    let is_final = pending.approvals.len() + 1 >= multisig.threshold as usize;

    let call_data = match request.call_data.as_deref().map(str::trim) {
        Some(hex) if !hex.is_empty() => {
            let data = from_hex_prefixed(hex).map_err(|_| ValidationError::MalformedCallData)?;
            let actual = blake2_256(&data);
            if actual != call_hash {
                return Err(ValidationError::CallHashMismatch {
                    expected: to_hex_prefixed(&call_hash),
                    actual: to_hex_prefixed(&actual),
                });
            }
            Some(data)
        }
        _ if is_final => return Err(ValidationError::MissingCallData),
        _ => None,
    };

    let signer_key = ss58::account_id(&member.address)
        .map_err(|_| ValidationError::InvalidAddress(member.address.clone()))?;
    let mut other_signatories = Vec::with_capacity(multisig.members.len());
    for other in &multisig.members {
        let key = ss58::account_id(&other.address)
            .map_err(|_| ValidationError::InvalidAddress(other.address.clone()))?;
        if key != signer_key {
            other_signatories.push(key);
        }
    }

    Ok(ValidatedApproval {
        signer_address: member.address.clone(),
        signer_path,
        multisig_address: multisig.address.clone(),
        threshold: multisig.threshold,
        other_signatories,
        timepoint: pending.timepoint,
        call_hash,
        call_data,
        is_final,
    })
}

/// 多签批准服务
pub struct MultisigApprovalService {
    connector: Arc<dyn ChainConnector>,
    builder: TransactionBuilder,
    submission: Arc<SubmissionStateMachine>,
}

impl MultisigApprovalService {
    pub fn new(connector: Arc<dyn ChainConnector>, submission: Arc<SubmissionStateMachine>) -> Self {
        Self {
            connector,
            builder: TransactionBuilder::new(),
            submission,
        }
    }

    /// 校验、构建并提交批准
    ///
    /// 校验失败立即返回错误；否则返回跟踪句柄与本次批准的计数上下文。
    pub async fn approve_multisig_call(
        &self,
        chain: &ChainConfig,
        request: &MultisigApprovalRequest,
    ) -> MigrationResult<(SubmissionHandle, Arc<MigrationRunContext>)> {
        let approval = validate_approval(request)?;

        tracing::info!(
            chain_id = %chain.id,
            multisig = %approval.multisig_address,
            signer = %approval.signer_address,
            is_final = approval.is_final,
            "Approving multisig call"
        );

        let session = SessionGuard::connect(self.connector.as_ref(), &chain.rpc_endpoint)
            .await
            .map_err(|e| MigrationError::connection(format!("{:#}", e)))?;

        let prepared = match self.prepare(&*session, chain, &approval).await {
            Ok(prepared) => prepared,
            Err(e) => {
                session.release().await;
                return Err(e);
            }
        };

        let run = Arc::new(MigrationRunContext::new());
        run.record_start(1);
        let scope = TransactionScope {
            chain_id: chain.id.clone(),
            derivation_path: approval.signer_path.clone(),
            buckets: Vec::new(),
            run: run.clone(),
        };

        let handle = self.submission.submit(session, prepared, scope).await;
        Ok((handle, run))
    }

    async fn prepare(
        &self,
        session: &dyn ChainSession,
        chain: &ChainConfig,
        approval: &ValidatedApproval,
    ) -> MigrationResult<PreparedTransaction> {
        let connection = |e: anyhow::Error| MigrationError::connection(format!("{:#}", e));

        let call = match &approval.call_data {
            Some(call_data) if approval.is_final => {
                let index = session
                    .call_index("Multisig", "as_multi")
                    .await
                    .map_err(connection)?;
                // 内部调用以多签账户为 origin 试算 weight
                let max_weight = session
                    .estimate_fee(call_data, &approval.multisig_address)
                    .await
                    .map_err(connection)?
                    .weight;
                extrinsic::as_multi_call(
                    index,
                    approval.threshold,
                    &approval.other_signatories,
                    Some(approval.timepoint),
                    call_data,
                    max_weight,
                )
            }
            _ => {
                let index = session
                    .call_index("Multisig", "approve_as_multi")
                    .await
                    .map_err(connection)?;
                extrinsic::approve_as_multi_call(
                    index,
                    approval.threshold,
                    &approval.other_signatories,
                    Some(approval.timepoint),
                    &approval.call_hash,
                    Weight::default(),
                )
            }
        };

        self.builder
            .prepare_call(
                session,
                chain,
                &approval.signer_address,
                &approval.signer_path,
                &approval.multisig_address,
                call,
            )
            .await
    }
}
