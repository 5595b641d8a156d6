//! 迁移引擎统一错误类型
//!
//! 错误分类：配置错误、连接错误、校验错误、设备拒绝、链上拒绝、超时。
//! 同步错误按链隔离，迁移错误按余额桶隔离。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 余额不足的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shortfall {
    /// 可转余额连手续费都不够
    FeeOnly,
    /// 可转余额不够支付 金额 + 手续费
    AmountPlusFee,
}

/// 单次迁移尝试的校验错误（只影响当前尝试）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("insufficient balance ({shortfall:?}): available {available}, required {required}")]
    InsufficientBalance {
        shortfall: Shortfall,
        available: u128,
        required: u128,
    },

    #[error("receiver address is missing")]
    MissingReceiver,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("nothing to migrate")]
    NothingToMigrate,

    #[error("multisig threshold is missing")]
    MissingThreshold,

    #[error("multisig members are missing")]
    MissingMembers,

    #[error("pending call {0} not found")]
    UnknownCall(String),

    #[error("signer is missing")]
    MissingSigner,

    #[error("signer {0} is not a member of the multisig")]
    SignerNotMember(String),

    #[error("signer {0} is not controlled by this device")]
    SignerNotInternal(String),

    #[error("signer {0} has already approved this call")]
    AlreadyApproved(String),

    #[error("call data is required for the final approval")]
    MissingCallData,

    #[error("call data is not valid hex")]
    MalformedCallData,

    #[error("call data hash {actual} does not match the selected call hash {expected}")]
    CallHashMismatch { expected: String, actual: String },

    #[error("signed payload does not match the prepared payload")]
    PayloadMismatch,

    #[error("device returned a signature of {0} bytes")]
    MalformedSignature(usize),

    #[error("account {0} is not part of the synchronized state")]
    UnknownAccount(String),
}

/// 迁移引擎错误
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// 缺少链配置/端点，不重试
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 设备或节点不可达
    #[error("connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 用户在设备上取消 / 设备锁定
    #[error("device rejected the request: {0}")]
    DeviceRejection(String),

    /// 链上 dispatch 失败
    #[error("transaction failed on chain: {0}")]
    ChainRejection(String),

    /// 截止时间内没有最终化信号
    #[error("no finalization signal within {0:?}")]
    Timeout(Duration),
}

impl MigrationError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 错误码（前端展示与日志使用）
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Connection(_) => "connection_error",
            Self::Validation(ValidationError::InsufficientBalance { .. }) => "insufficient_balance",
            Self::Validation(ValidationError::CallHashMismatch { .. }) => "call_hash_mismatch",
            Self::Validation(_) => "validation_error",
            Self::DeviceRejection(_) => "device_rejection",
            Self::ChainRejection(_) => "chain_rejection",
            Self::Timeout(_) => "timeout",
        }
    }

    /// 只有连接错误允许重新扫描/重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
