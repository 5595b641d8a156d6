//! 多签索引服务接口
//!
//! 按链的索引 id 查询某地址参与的多签账户。返回的成员 `internal` 一律为 false，
//! 由同步流程根据本设备派生的地址标记；待批准调用从链上读取。

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::MultisigAccount;

#[async_trait]
pub trait MultisigIndexer: Send + Sync {
    async fn multisig_accounts(&self, index_id: &str, address: &str)
        -> Result<Vec<MultisigAccount>>;
}

/// 没有配置索引服务时使用
pub struct NoopMultisigIndexer;

#[async_trait]
impl MultisigIndexer for NoopMultisigIndexer {
    async fn multisig_accounts(
        &self,
        _index_id: &str,
        _address: &str,
    ) -> Result<Vec<MultisigAccount>> {
        Ok(Vec::new())
    }
}
