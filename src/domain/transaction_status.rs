//! 迁移交易状态定义
//!
//! Idle → AwaitingSignature → Submitted → InBlock → Finalized → 终态
//! 终态：Success | Failed | Error | Unknown

use std::fmt;

use serde::{Deserialize, Serialize};

/// 交易状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// 迁移尚未开始
    Idle,

    /// 等待硬件设备签名
    AwaitingSignature,

    /// 已广播到节点
    Submitted,

    /// 已打包进区块
    InBlock,

    /// 区块已最终化，等待事件判定
    Finalized,

    /// 链上执行成功
    Success,

    /// 链上执行失败（dispatch error）
    Failed,

    /// 签名/连接/校验阶段出错
    Error,

    /// 没有拿到成功或失败信号（含超时）
    Unknown,
}

impl TransactionStatus {
    /// 获取状态描述
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Ready to migrate",
            Self::AwaitingSignature => "Please sign the transaction on your device",
            Self::Submitted => "Transaction submitted",
            Self::InBlock => "Transaction included in block",
            Self::Finalized => "Transaction finalized",
            Self::Success => "Migration completed",
            Self::Failed => "Transaction failed",
            Self::Error => "Migration error",
            Self::Unknown => "Transaction status unknown",
        }
    }

    /// 是否为最终状态（不可再转换）
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Error | Self::Unknown
        )
    }

    /// 已广播（链上状态可能已变化）
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Submitted | Self::InBlock | Self::Finalized)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::AwaitingSignature => 1,
            Self::Submitted => 2,
            Self::InBlock => 3,
            Self::Finalized => 4,
            Self::Success | Self::Failed | Self::Error | Self::Unknown => 5,
        }
    }

    /// 验证状态转换合法性
    ///
    /// 只允许沿定义顺序前进；任何非终态可以直接跳到 Error/Failed；
    /// Success 只能由 Finalized 到达，Unknown 只能在广播之后出现。
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use TransactionStatus::*;

        if self.is_final() {
            return false;
        }

        match target {
            Error | Failed => true,
            Success => *self == Finalized,
            Unknown => self.is_broadcast(),
            Idle => false,
            _ => target.rank() > self.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSignature => "awaiting_signature",
            Self::Submitted => "submitted",
            Self::InBlock => "in_block",
            Self::Finalized => "finalized",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单个余额桶的迁移交易（由状态机独占修改）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub status: TransactionStatus,
    pub message: Option<String>,
    pub tx_hash: Option<String>,
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub destination_address: String,
}

impl Transaction {
    pub fn new(destination_address: impl Into<String>) -> Self {
        Self {
            status: TransactionStatus::Idle,
            message: None,
            tx_hash: None,
            block_hash: None,
            block_number: None,
            destination_address: destination_address.into(),
        }
    }

    /// 尝试转换状态，非法转换被忽略并返回 false
    pub fn transition(&mut self, to: TransactionStatus, message: Option<String>) -> bool {
        if !self.status.can_transition_to(&to) {
            tracing::debug!(
                from = %self.status,
                to = %to,
                "Ignoring illegal transaction status transition"
            );
            return false;
        }

        self.status = to;
        if message.is_some() {
            self.message = message;
        }
        true
    }

    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TransactionStatus::*;

        // 合法转换
        assert!(Idle.can_transition_to(&AwaitingSignature));
        assert!(AwaitingSignature.can_transition_to(&Submitted));
        assert!(Submitted.can_transition_to(&InBlock));
        assert!(Submitted.can_transition_to(&Finalized));
        assert!(InBlock.can_transition_to(&Finalized));
        assert!(Finalized.can_transition_to(&Success));
        assert!(Finalized.can_transition_to(&Unknown));
        assert!(Idle.can_transition_to(&Error));
        assert!(InBlock.can_transition_to(&Failed));

        // 非法转换
        assert!(!Finalized.can_transition_to(&InBlock));
        assert!(!InBlock.can_transition_to(&Submitted));
        assert!(!Submitted.can_transition_to(&Success));
        assert!(!AwaitingSignature.can_transition_to(&Unknown));

        // 最终状态不可转换
        assert!(!Success.can_transition_to(&Error));
        assert!(!Failed.can_transition_to(&Success));
    }

    #[test]
    fn test_status_is_monotonic_after_finalized() {
        let mut tx = Transaction::new("dest");
        assert!(tx.transition(TransactionStatus::AwaitingSignature, None));
        assert!(tx.transition(TransactionStatus::Submitted, None));
        assert!(tx.transition(TransactionStatus::Finalized, None));

        // 迟到的 InBlock 回调不能回退状态
        assert!(!tx.transition(TransactionStatus::InBlock, None));
        assert_eq!(tx.status, TransactionStatus::Finalized);

        assert!(tx.transition(TransactionStatus::Success, Some("ok".into())));
        assert!(!tx.transition(TransactionStatus::Failed, None));
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.message.as_deref(), Some("ok"));
    }

    #[test]
    fn test_is_final() {
        use TransactionStatus::*;

        assert!(!Idle.is_final());
        assert!(!Finalized.is_final());
        assert!(Success.is_final());
        assert!(Unknown.is_final());
        assert!(Error.is_final());
    }
}
