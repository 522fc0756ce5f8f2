//! 基于 SQLite 的 EntityStore 实现

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use super::db_actor::DbActorHandle;
use super::{EntityKey, EntityStore, MergeFn, Record};
use crate::error::Result;
use crate::schema::{ProvisionReport, StorageLayout};

/// SQLite 缓存库；所有访问经由 DB Actor
#[derive(Debug, Clone)]
pub struct SqliteStore {
    actor: DbActorHandle,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let actor = DbActorHandle::spawn(Some(path.as_ref().to_path_buf())).await?;
        Ok(Self { actor })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let actor = DbActorHandle::spawn(None).await?;
        Ok(Self { actor })
    }

    pub fn shutdown(&self) {
        self.actor.shutdown();
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn apply_layout(&self, layout: &StorageLayout) -> Result<ProvisionReport> {
        self.actor.apply_layout(layout.clone()).await
    }

    async fn schema_version(&self) -> Result<i64> {
        self.actor.schema_version().await
    }

    async fn get(&self, table: &str, key: &EntityKey) -> Result<Option<Record>> {
        self.actor.get(table.to_string(), key.clone()).await
    }

    async fn put(&self, table: &str, key: &EntityKey, record: Record) -> Result<()> {
        self.actor.put(table.to_string(), key.clone(), record).await
    }

    async fn merge(&self, table: &str, key: &EntityKey, merge: MergeFn) -> Result<Record> {
        self.actor.merge(table.to_string(), key.clone(), merge).await
    }

    async fn delete(&self, table: &str, key: &EntityKey) -> Result<bool> {
        self.actor.delete(table.to_string(), key.clone()).await
    }

    async fn delete_where(&self, table: &str, field: &str, values: &[Value]) -> Result<usize> {
        self.actor
            .delete_where(table.to_string(), field.to_string(), values.to_vec())
            .await
    }

    async fn find_by(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
        self.actor
            .find_by(table.to_string(), field.to_string(), value.clone())
            .await
    }

    async fn all(&self, table: &str) -> Result<Vec<Record>> {
        self.actor.all(table.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiarySyncError;
    use crate::schema::{IndexSpec, LayoutChange, TableSpec};
    use serde_json::json;

    fn layout(box_key: &str) -> StorageLayout {
        StorageLayout::from_tables(vec![TableSpec {
            name: "box".to_string(),
            type_name: "Box".to_string(),
            primary_key: box_key.to_string(),
            key_from_first_field: false,
            fields: vec!["id".to_string(), "position".to_string()],
            indexes: vec![IndexSpec::single("hiveId")],
        }])
    }

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn provisioning_twice_keeps_version() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.apply_layout(&layout("id")).await.unwrap();
        let second = store.apply_layout(&layout("id")).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 1);
        assert_eq!(second.change, LayoutChange::Unchanged);
        assert_eq!(store.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn breaking_layout_bumps_version_and_clears_table() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.apply_layout(&layout("id")).await.unwrap();
        store
            .put("box", &EntityKey::Int(1), record(json!({"id": 1})))
            .await
            .unwrap();

        let report = store.apply_layout(&layout("position")).await.unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.change, LayoutChange::Breaking);
        assert!(store.all("box").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_reads_existing_record() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.apply_layout(&layout("id")).await.unwrap();
        let key = EntityKey::Int(5);
        store
            .put("box", &key, record(json!({"id": 5, "color": "red", "hiveId": 1})))
            .await
            .unwrap();

        let merged = store
            .merge(
                "box",
                &key,
                Box::new(|existing| {
                    let mut r = existing.unwrap_or_default();
                    r.insert("color".to_string(), json!("blue"));
                    r
                }),
            )
            .await
            .unwrap();
        assert_eq!(merged["color"], "blue");
        assert_eq!(merged["hiveId"], 1);
        assert_eq!(store.find_by("box", "hiveId", &json!(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_table_is_a_database_error() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store.get("nope", &EntityKey::Int(1)).await.unwrap_err();
        assert!(matches!(err, ApiarySyncError::Sqlite(_)));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache").join("apiary.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.apply_layout(&layout("id")).await.unwrap();
            store
                .put("box", &EntityKey::Int(9), record(json!({"id": 9})))
                .await
                .unwrap();
            store.shutdown();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), 1);
        let report = store.apply_layout(&layout("id")).await.unwrap();
        assert_eq!(report.change, LayoutChange::Unchanged);
        assert!(store.get("box", &EntityKey::Int(9)).await.unwrap().is_some());
    }
}
