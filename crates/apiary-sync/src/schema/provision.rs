//! 存储布局 provisioning 入口
//!
//! 启动时调用一次：schema → 布局 → 应用到存储引擎。
//! 失败即致命：继续使用过期 / 未建表的布局会让后续写入静默丢失。

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{LayoutChange, LayoutOptions, SchemaRegistry, StorageLayout};
use crate::error::{ApiarySyncError, Result};
use crate::storage::EntityStore;

/// provisioning 结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// 应用后的布局版本（单调递增）
    pub version: i64,
    pub change: LayoutChange,
    pub tables: usize,
}

/// 推导布局并应用到存储；任何失败都以 `SchemaProvision` 返回
pub async fn provision(
    schema: &SchemaRegistry,
    options: &LayoutOptions,
    store: &dyn EntityStore,
) -> Result<(StorageLayout, ProvisionReport)> {
    let layout = StorageLayout::derive(schema, options)?;
    info!("🔨 provisioning 开始: {} 张表", layout.len());

    let report = store.apply_layout(&layout).await.map_err(|e| {
        error!("❌ provisioning 失败: {}", e);
        match e {
            ApiarySyncError::SchemaProvision(_) => e,
            other => ApiarySyncError::SchemaProvision(other.to_string()),
        }
    })?;

    info!(
        "✅ provisioning 完成: version={}, change={:?}, tables={}",
        report.version, report.change, report.tables
    );
    Ok((layout, report))
}
