//! IronMigrate - 硬件钱包多链账户迁移引擎
//!
//! 私钥始终留在签名设备内：引擎只负责同步持仓、构建载荷、提交与跟踪

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use error::{MigrationError, MigrationResult, ValidationError};

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{
            BucketKind, ChainConfig, ChainRegistry, ChainSyncStatus, DerivedAccount, SyncState,
            Transaction, TransactionStatus,
        },
        error::{MigrationError, MigrationResult, ValidationError},
        infrastructure::{
            ChainConnector, ChainSession, EventBus, InMemoryEventBus, MigrationEvent,
            MultisigIndexer, SessionGuard, SigningDevice,
        },
        service::{
            BalanceFetcher, MigrationOrchestrator, MultisigApprovalService, SubmissionStateMachine,
            SyncPipeline, SyncRunContext,
        },
    };
}
