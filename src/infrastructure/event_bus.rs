// Event Bus 框架
// 向展示层推送同步进度、交易状态和计数器的异步发布/订阅系统

use std::{collections::VecDeque, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::{BucketKind, ChainSyncStatus, Transaction};

/// 内存中保留的历史事件数量
const HISTORY_CAPACITY: usize = 1000;

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum MigrationEvent {
    SyncStarted {
        total_chains: usize,
    },
    SyncProgress {
        scanned: usize,
        total: usize,
        percentage: u8,
    },
    ChainStatusChanged {
        chain_id: String,
        status: ChainSyncStatus,
        error: Option<String>,
    },
    SyncFinished {
        cancelled: bool,
    },
    TransactionUpdated {
        chain_id: String,
        derivation_path: String,
        buckets: Vec<BucketKind>,
        transaction: Transaction,
    },
    CountersUpdated {
        success: usize,
        fails: usize,
        total: usize,
    },
}

impl MigrationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SyncStarted { .. } => "SyncStarted",
            Self::SyncProgress { .. } => "SyncProgress",
            Self::ChainStatusChanged { .. } => "ChainStatusChanged",
            Self::SyncFinished { .. } => "SyncFinished",
            Self::TransactionUpdated { .. } => "TransactionUpdated",
            Self::CountersUpdated { .. } => "CountersUpdated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: MigrationEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

// ============ Event Handler Trait ============

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &MigrationEvent) -> Result<()>;
    fn event_types(&self) -> Vec<&'static str>;
}

// ============ Event Bus 接口 ============

#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件
    async fn publish(&self, event: MigrationEvent) -> Result<()>;

    /// 订阅事件
    async fn subscribe(&self, handler: Arc<dyn EventHandler>);

    /// 获取事件历史（最新在前）
    async fn get_event_history(&self, limit: usize, offset: usize) -> Result<Vec<EventEnvelope>>;
}

// ============ 内存 Event Bus 实现 ============

pub struct InMemoryEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    history: RwLock<VecDeque<EventEnvelope>>,
    sender: mpsc::UnboundedSender<EventEnvelope>,
}

impl InMemoryEventBus {
    /// 必须在 tokio 运行时内创建
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<EventEnvelope>();
        let handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>> = Arc::new(RwLock::new(Vec::new()));

        let handlers_clone = handlers.clone();

        // 后台任务：按发布顺序分发事件
        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let handlers_read = handlers_clone.read().await;
                let event_type = envelope.event.event_type();

                for handler in handlers_read.iter() {
                    if handler.event_types().contains(&event_type) {
                        if let Err(e) = handler.handle(&envelope.event).await {
                            tracing::error!(
                                event_id = %envelope.event_id,
                                event_type = event_type,
                                error = ?e,
                                "Event handler error"
                            );
                        }
                    }
                }
            }
        });

        Self {
            handlers,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            sender,
        }
    }

    async fn record(&self, envelope: &EventEnvelope) {
        let mut history = self.history.write().await;
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(envelope.clone());
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: MigrationEvent) -> Result<()> {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        };

        self.record(&envelope).await;

        // 发送到处理队列
        self.sender
            .send(envelope)
            .map_err(|e| anyhow::anyhow!("Failed to send event: {}", e))?;

        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    async fn get_event_history(&self, limit: usize, offset: usize) -> Result<Vec<EventEnvelope>> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// 发布事件，失败只记录日志（事件推送不影响迁移流程）
pub async fn publish_or_log(bus: &dyn EventBus, event: MigrationEvent) {
    let event_type = event.event_type();
    if let Err(e) = bus.publish(event).await {
        tracing::warn!(event_type = event_type, error = ?e, "Failed to publish event");
    }
}

// ============ 日志 Handler ============

/// 把交易状态变化写入日志
pub struct TransactionLogHandler;

#[async_trait]
impl EventHandler for TransactionLogHandler {
    async fn handle(&self, event: &MigrationEvent) -> Result<()> {
        if let MigrationEvent::TransactionUpdated {
            chain_id,
            derivation_path,
            transaction,
            ..
        } = event
        {
            tracing::info!(
                chain_id = %chain_id,
                path = %derivation_path,
                status = %transaction.status,
                description = transaction.status.description(),
                tx_hash = ?transaction.tx_hash,
                "Transaction updated"
            );
        }
        Ok(())
    }

    fn event_types(&self) -> Vec<&'static str> {
        vec!["TransactionUpdated"]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::TransactionStatus;

    struct Recorder {
        seen: Mutex<Vec<MigrationEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &MigrationEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn event_types(&self) -> Vec<&'static str> {
            vec!["SyncProgress", "CountersUpdated"]
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = InMemoryEventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(recorder.clone()).await;
        bus.subscribe(Arc::new(TransactionLogHandler)).await;

        bus.publish(MigrationEvent::SyncProgress {
            scanned: 1,
            total: 2,
            percentage: 50,
        })
        .await
        .unwrap();
        bus.publish(MigrationEvent::SyncFinished { cancelled: false })
            .await
            .unwrap();
        bus.publish(MigrationEvent::CountersUpdated {
            success: 1,
            fails: 0,
            total: 1,
        })
        .await
        .unwrap();

        // 等待异步处理
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event_type(), "SyncProgress");
    }

    #[tokio::test]
    async fn test_event_history_newest_first() {
        let bus = InMemoryEventBus::new();
        for scanned in 1..=3 {
            bus.publish(MigrationEvent::SyncProgress {
                scanned,
                total: 3,
                percentage: (scanned * 100 / 3) as u8,
            })
            .await
            .unwrap();
        }

        let history = bus.get_event_history(2, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(matches!(
            history[0].event,
            MigrationEvent::SyncProgress { scanned: 3, .. }
        ));
    }

    #[test]
    fn test_event_serialization() {
        let mut transaction = Transaction::new("15oF4uVJwmo4TdGW7VfQxNLavjCXviqxT9S1MgbjMNHr6Sp5");
        transaction.transition(TransactionStatus::AwaitingSignature, None);
        let event = MigrationEvent::TransactionUpdated {
            chain_id: "polkadot".to_string(),
            derivation_path: "m/44'/354'/0'/0'/1'".to_string(),
            buckets: vec![BucketKind::Native],
            transaction,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("TransactionUpdated"));
        assert!(json.contains("awaiting_signature"));

        let parsed: MigrationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
