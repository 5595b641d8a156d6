//! Service 模块
//!
//! 同步流水线、交易构建、签名提交状态机与迁移编排

pub mod balance_fetcher;
pub mod extrinsic;
pub mod migration_orchestrator;
pub mod multisig_approval;
pub mod run_context;
pub mod submission;
pub mod sync_pipeline;
pub mod transaction_builder;

pub use balance_fetcher::{AccountHoldings, BalanceFetcher};
pub use migration_orchestrator::{Destinations, MigrationOrchestrator, MigrationRun, MigrationUnit};
pub use multisig_approval::{MultisigApprovalRequest, MultisigApprovalService, ValidatedApproval};
pub use run_context::{MigrationCounters, MigrationRunContext, SyncProgress, SyncRunContext};
pub use submission::{SubmissionHandle, SubmissionStateMachine, TransactionScope};
pub use sync_pipeline::SyncPipeline;
pub use transaction_builder::{
    PreparedTransaction, TransactionBuilder, TransferAmount, TransferRequest,
};
