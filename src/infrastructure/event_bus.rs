// 通知扇出总线
// 账本状态变更的异步发布/订阅，尽力投递：投递失败绝不回滚触发它的账本变更

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    /// 监控器新记录到一笔待审批充值
    DepositDetected {
        transaction_id: Uuid,
        wallet_id: Uuid,
        amount: Decimal,
        currency: String,
        status: String,
        detected_at: DateTime<Utc>,
    },
    /// 结算/拒绝/取消：交易离开 pending
    TransactionSettled {
        transaction_id: Uuid,
        status: String,
        tx_type: String,
        amount: Decimal,
        currency: String,
        updated_at: DateTime<Utc>,
        rejection_reason: Option<String>,
    },
    /// 管理端广播：出现新的待审批交易
    PendingTransactionBroadcast {
        transaction_id: Uuid,
        tx_type: String,
        amount: Decimal,
        currency: String,
        created_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DepositDetected { .. } => "DepositDetected",
            Self::TransactionSettled { .. } => "TransactionSettled",
            Self::PendingTransactionBroadcast { .. } => "PendingTransactionBroadcast",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: DomainEvent,
    pub published_at: DateTime<Utc>,
}

// ============ Event Handler Trait ============

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
    fn event_types(&self) -> Vec<&'static str>;
}

// ============ Event Bus 接口 ============

#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件（尽力投递）
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// 订阅事件
    async fn subscribe(&self, handler: Arc<dyn EventHandler>);
}

// ============ 内存 Event Bus 实现 ============

pub struct InMemoryEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    sender: mpsc::UnboundedSender<EventEnvelope>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<EventEnvelope>();
        let handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>> = Arc::new(RwLock::new(Vec::new()));

        let handlers_clone = handlers.clone();

        // 后台任务：事件分发
        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let handlers_read = handlers_clone.read().await;
                let event_type = envelope.event.event_type();

                for handler in handlers_read.iter() {
                    if handler.event_types().contains(&event_type) {
                        if let Err(e) = handler.handle(&envelope.event).await {
                            // 投递失败只记日志，账本变更已提交
                            tracing::error!(
                                event_id = %envelope.event_id,
                                event_type = %event_type,
                                error = ?e,
                                "Event handler error"
                            );
                        }
                    }
                }
            }
        });

        Self { handlers, sender }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: Utc::now(),
        };

        self.sender
            .send(envelope)
            .map_err(|e| anyhow::anyhow!("Event bus channel closed: {}", e))?;

        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }
}
