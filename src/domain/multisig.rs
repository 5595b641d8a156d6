//! 多签账户领域模型

use serde::{Deserialize, Serialize};

use crate::utils::ss58;

/// 多签成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigMember {
    pub address: String,
    /// 由本设备派生时的派生路径
    pub path: Option<String>,
    /// 是否由本设备控制（只有 internal 成员可以签名）
    pub internal: bool,
}

/// 多签调用的时间点（首次批准所在区块与交易序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timepoint {
    pub height: u32,
    pub index: u32,
}

/// 待批准的多签调用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCall {
    /// 0x 前缀的 blake2_256 调用哈希
    pub call_hash: String,
    pub timepoint: Timepoint,
    pub depositor: String,
    pub deposit: u128,
    /// 已批准的成员地址
    pub approvals: Vec<String>,
}

impl PendingCall {
    pub fn is_approved_by(&self, address: &str) -> bool {
        self.approvals
            .iter()
            .any(|approver| ss58::same_account(approver, address))
    }
}

/// 多签账户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigAccount {
    pub address: String,
    pub threshold: u16,
    pub members: Vec<MultisigMember>,
    #[serde(default)]
    pub pending_calls: Vec<PendingCall>,
}

impl MultisigAccount {
    pub fn member(&self, address: &str) -> Option<&MultisigMember> {
        self.members
            .iter()
            .find(|member| ss58::same_account(&member.address, address))
    }

    pub fn pending_call(&self, call_hash: &str) -> Option<&PendingCall> {
        self.pending_calls
            .iter()
            .find(|call| call.call_hash.eq_ignore_ascii_case(call_hash))
    }

    /// 本设备控制的成员
    pub fn internal_members(&self) -> impl Iterator<Item = &MultisigMember> {
        self.members.iter().filter(|member| member.internal)
    }

    /// 根据本链已派生的 (地址, 路径) 标记 internal 成员
    pub fn mark_internal_members<'a, I>(&mut self, derived: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        for member in &mut self.members {
            if let Some((_, path)) = derived
                .clone()
                .into_iter()
                .find(|(address, _)| ss58::same_account(address, &member.address))
            {
                member.internal = true;
                member.path = Some(path.to_string());
            }
        }
    }
}
