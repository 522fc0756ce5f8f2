//! Apiary Sync - 离线优先的 GraphQL 同步层
//!
//! 位于 GraphQL 客户端管道中，负责：
//! - 🔨 启动时由 schema 推导本地缓存的表布局并幂等地 provisioning
//! - 📦 查询成功后把响应按类型拆分回写到本地表（父外键反范式化）
//! - 🔌 网络失败时用本地解析器从缓存重新组装同形状的结果
//! - ⚙️ 事件系统：provisioning、回写、回退都会广播事件
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use apiary_sync::sync::{FnExchange, Operation, OperationResult};
//! use apiary_sync::{apiary, Exchange, SyncConfig, SyncExchange};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder().data_dir("/path/to/data").build();
//!     let ctx = apiary::bootstrap(config).await?;
//!
//!     // 网络边界由上层提供
//!     let network = FnExchange::new(|op: Operation| async move {
//!         OperationResult::ok(op, serde_json::json!({"apiaries": []}))
//!     });
//!
//!     let exchange = SyncExchange::new(Arc::new(ctx), Arc::new(network));
//!     let result = exchange
//!         .execute(Operation::query("{ apiaries { id name } }"))
//!         .await;
//!     println!("来自缓存: {}", result.is_from_cache());
//!     Ok(())
//! }
//! ```

pub mod apiary;
pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod storage;
pub mod sync;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{SyncConfig, SyncConfigBuilder, WriteBackMode};
pub use error::{ApiarySyncError, Result};
pub use events::{EventManager, EventStats, SyncEvent};
pub use schema::{
    provision, IndexSpec, LayoutChange, LayoutOptions, ProvisionReport, SchemaRegistry,
    StorageLayout, TableSpec,
};
pub use storage::{EntityKey, EntityStore, Record, SqliteStore};
pub use sync::{
    CacheOutcome, Exchange, Operation, OperationError, OperationKind, OperationResult,
    RequestPolicy, SyncContext, SyncExchange,
};
pub use version::{SYNC_DB_VERSION, SYNC_VERSION};
