//! 事件系统模块 - 同步层对外广播的状态事件
//!
//! 功能包括：
//! - 布局 provisioning 完成事件
//! - 回写完成事件（含写入 / 失败 / 缺口统计）
//! - 本地回退成功 / 失败事件（UI 据此展示“正在显示缓存数据”）

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::schema::LayoutChange;

/// 同步层事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    Provisioned {
        version: i64,
        change: LayoutChange,
        tables: usize,
        timestamp: i64,
    },
    WriteBackCompleted {
        operation_key: u64,
        written: usize,
        failed: usize,
        gaps: usize,
        timestamp: i64,
    },
    /// 网络失败，已用本地数据补位
    FallbackServed {
        operation_key: u64,
        fields: Vec<String>,
        network_error: String,
        timestamp: i64,
    },
    FallbackFailed {
        operation_key: u64,
        field: String,
        message: String,
        timestamp: i64,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::Provisioned { .. } => "provisioned",
            SyncEvent::WriteBackCompleted { .. } => "write_back_completed",
            SyncEvent::FallbackServed { .. } => "fallback_served",
            SyncEvent::FallbackFailed { .. } => "fallback_failed",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::Provisioned { timestamp, .. }
            | SyncEvent::WriteBackCompleted { timestamp, .. }
            | SyncEvent::FallbackServed { timestamp, .. }
            | SyncEvent::FallbackFailed { timestamp, .. } => *timestamp,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub last_event_time: Option<i64>,
}

/// 事件管理器
#[derive(Debug, Clone)]
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        info!("新增同步事件订阅者");
        self.sender.subscribe()
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscribers_and_counts() {
        let events = EventManager::new(8);
        let mut rx = events.subscribe();
        events
            .emit(SyncEvent::FallbackServed {
                operation_key: 1,
                fields: vec!["hive".to_string()],
                network_error: "offline".to_string(),
                timestamp: now_millis(),
            })
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "fallback_served");
        let stats = events.get_stats().await;
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type["fallback_served"], 1);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_fine() {
        let events = EventManager::new(1);
        events
            .emit(SyncEvent::Provisioned {
                version: 1,
                change: LayoutChange::Additive,
                tables: 3,
                timestamp: now_millis(),
            })
            .await;
        assert_eq!(events.subscriber_count(), 0);
    }
}
