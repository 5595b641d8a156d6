//! Domain 模块
//!
//! 包含迁移引擎的领域模型

pub mod account;
pub mod balance;
pub mod chain_config;
pub mod multisig;
pub mod sync_state;
pub mod transaction_status;

// 重新导出常用类型
pub use account::{AccountError, DerivedAccount, FetchKind, Identity};
pub use balance::{
    BalanceBucket, BucketAsset, BucketKind, NativeBalance, NftItem, StakingInfo, UnlockChunk,
};
pub use chain_config::{ChainConfig, ChainRegistry, ExplorerConfig, TokenConfig};
pub use multisig::{MultisigAccount, MultisigMember, PendingCall, Timepoint};
pub use sync_state::{ChainSyncResult, ChainSyncStatus, SyncError, SyncState, SyncStatus};
pub use transaction_status::{Transaction, TransactionStatus};
