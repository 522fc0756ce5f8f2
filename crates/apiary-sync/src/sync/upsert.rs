//! Entity Upsert Engine - 读取已有记录、浅合并（新字段覆盖）、写回
//!
//! 所有写钩子都只通过这里写入，保证整个缓存只有一种合并语义。

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ApiarySyncError, Result};
use crate::schema::{StorageLayout, TableSpec};
use crate::storage::{EntityKey, EntityStore, Record};

#[derive(Debug, Clone)]
pub struct UpsertEngine {
    store: Arc<dyn EntityStore>,
    layout: Arc<StorageLayout>,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn EntityStore>, layout: Arc<StorageLayout>) -> Self {
        Self { store, layout }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn table(&self, table: &str) -> Result<&TableSpec> {
        self.layout
            .table(table)
            .ok_or_else(|| ApiarySyncError::UnknownTable(table.to_string()))
    }

    /// 按表主键读取旧记录并浅合并后写入，返回合并后的记录
    pub async fn upsert(&self, table: &str, entity: Record) -> Result<Record> {
        let spec = self.table(table)?;
        let key = entity
            .get(&spec.primary_key)
            .and_then(EntityKey::from_value)
            .ok_or_else(|| ApiarySyncError::MissingIdentifier {
                table: table.to_string(),
                key_field: spec.primary_key.clone(),
            })?;

        let merged = self
            .store
            .merge(table, &key, Box::new(move |existing| shallow_merge(existing, entity)))
            .await?;
        debug!("upsert {}[{}]", table, key);
        Ok(merged)
    }

    /// 带主键校验的 upsert：主键不是数值时告警并跳过，返回是否写入
    pub async fn upsert_guarded(&self, table: &str, entity: Record) -> Result<bool> {
        let spec = self.table(table)?;
        let key = entity.get(&spec.primary_key).and_then(EntityKey::from_value);
        match key {
            Some(key) if key.is_numeric() => {
                self.upsert(table, entity).await?;
                Ok(true)
            }
            _ => {
                warn!(
                    "⚠️ 跳过写入 {}: 缺少可用的数值主键 {}, payload={}",
                    table,
                    spec.primary_key,
                    serde_json::Value::Object(entity)
                );
                Ok(false)
            }
        }
    }

    /// 删除外键取值落在 `parent_keys` 中的全部记录
    pub async fn delete_by_parent(
        &self,
        table: &str,
        foreign_key: &str,
        parent_keys: &[EntityKey],
    ) -> Result<usize> {
        self.table(table)?;
        let values: Vec<Value> = parent_keys.iter().map(EntityKey::to_json).collect();
        let removed = self.store.delete_where(table, foreign_key, &values).await?;
        debug!("delete_by_parent {}.{}: 删除 {} 条", table, foreign_key, removed);
        Ok(removed)
    }
}

/// 浅合并：以已有记录为底，新字段覆盖
pub fn shallow_merge(existing: Option<Record>, incoming: Record) -> Record {
    let mut merged = existing.unwrap_or_default();
    for (k, v) in incoming {
        merged.insert(k, v);
    }
    merged
}
