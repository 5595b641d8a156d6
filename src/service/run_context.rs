//! 每次运行的簿记（同步进度 / 取消标记 / 迁移计数器）
//!
//! 每次 `synchronize_all` / `migrate_all` 各自创建一个上下文，并发运行互不干扰。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::TransactionStatus;

/// 同步进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    pub scanned: usize,
    pub total: usize,
    pub percentage: u8,
}

impl SyncProgress {
    fn new(scanned: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            (scanned.min(total) * 100 / total) as u8
        };
        Self {
            scanned,
            total,
            percentage,
        }
    }
}

/// 同步运行上下文
#[derive(Debug, Default)]
pub struct SyncRunContext {
    cancel_requested: AtomicBool,
    scanned: AtomicUsize,
    total: AtomicUsize,
}

impl SyncRunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消：已开始的链会跑完，之后不再开始新的链
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// 开始一次运行：进度归零，清除上次遗留的取消标记
    pub fn begin(&self, total: usize) -> SyncProgress {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.scanned.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        SyncProgress::new(0, total)
    }

    /// 完成一条链
    pub fn advance(&self) -> SyncProgress {
        let scanned = self.scanned.fetch_add(1, Ordering::SeqCst) + 1;
        SyncProgress::new(scanned, self.total.load(Ordering::SeqCst))
    }

    pub fn progress(&self) -> SyncProgress {
        SyncProgress::new(
            self.scanned.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    /// 运行结束：清除取消标记，返回本次是否被取消
    pub fn finish(&self) -> bool {
        self.cancel_requested.swap(false, Ordering::SeqCst)
    }
}

/// 迁移计数器快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigrationCounters {
    pub success: usize,
    pub fails: usize,
    pub total: usize,
}

impl MigrationCounters {
    /// 所有已开始的桶都已有结果
    pub fn is_settled(&self) -> bool {
        self.total == self.success + self.fails
    }
}

/// 迁移运行上下文
///
/// 每个桶在开始时计入 `total` 一次，终态时计入 `success` 或 `fails` 之一。
#[derive(Debug, Default)]
pub struct MigrationRunContext {
    success: AtomicUsize,
    fails: AtomicUsize,
    total: AtomicUsize,
}

impl MigrationRunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self, buckets: usize) -> MigrationCounters {
        self.total.fetch_add(buckets, Ordering::SeqCst);
        self.snapshot()
    }

    /// 记录终态；非终态被忽略
    pub fn record_terminal(&self, status: TransactionStatus, buckets: usize) -> MigrationCounters {
        match status {
            TransactionStatus::Success => {
                self.success.fetch_add(buckets, Ordering::SeqCst);
            }
            TransactionStatus::Failed | TransactionStatus::Error | TransactionStatus::Unknown => {
                self.fails.fetch_add(buckets, Ordering::SeqCst);
            }
            other => {
                tracing::warn!(status = %other, "Ignoring non-terminal status in counters");
            }
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> MigrationCounters {
        MigrationCounters {
            success: self.success.load(Ordering::SeqCst),
            fails: self.fails.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}
