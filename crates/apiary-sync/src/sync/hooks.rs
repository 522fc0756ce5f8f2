//! Write-Hook Registry - 按类型名注册的归一化 + 持久化函数
//!
//! 钩子契约：`(parent, node, ctx) -> ()`。
//! - 把标识字段转换为存储主键类型
//! - 可选布尔字段补默认值
//! - 从 parent 推导父外键
//! - 从 ctx 中未裁剪的原始节点读取嵌套 id（响应显式为 null 时写 null）
//! - 响应里没有出现的外键可以取自根字段参数
//! - 空 payload 直接返回
//! - 钩子自己从不写嵌套对象 / 列表字段，它们由更深层的递归负责

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::operation::Variables;
use super::upsert::UpsertEngine;
use crate::error::{ApiarySyncError, Result};
use crate::schema::StorageLayout;
use crate::storage::{EntityStore, Record};

/// 钩子执行时可见的上下文
pub struct HookContext<'a> {
    pub upsert: &'a UpsertEngine,
    /// 当前节点解析出的类型名
    pub type_name: &'a str,
    pub parent_type: Option<&'a str>,
    /// 未经投影的原始响应节点
    pub original: &'a Value,
    /// 响应路径（response key，点分）
    pub path: &'a str,
    /// 节点所属根字段求值后的参数
    pub root_arguments: &'a Variables,
}

impl<'a> HookContext<'a> {
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        self.upsert.store()
    }

    /// 沿对象键读取原始节点中的嵌套值
    pub fn original_at(&self, path: &[&str]) -> Option<&'a Value> {
        path.iter()
            .try_fold(self.original, |value, key| value.as_object()?.get(*key))
    }
}

#[async_trait]
pub trait WriteHook: Send + Sync {
    async fn write(&self, parent: Option<&Record>, node: Record, ctx: &HookContext<'_>) -> Result<()>;
}

/// 钩子注册表（开放注册，配合 `audit` 做覆盖检查）
#[derive(Default)]
pub struct WriteHookRegistry {
    hooks: RwLock<HashMap<String, Arc<dyn WriteHook>>>,
}

impl std::fmt::Debug for WriteHookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHookRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

impl WriteHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或覆盖某类型的钩子
    pub fn register<H: WriteHook + 'static>(&self, type_name: &str, hook: H) {
        self.register_arc(type_name, Arc::new(hook));
    }

    pub fn register_arc(&self, type_name: &str, hook: Arc<dyn WriteHook>) {
        if self.hooks.write().insert(type_name.to_string(), hook).is_some() {
            debug!("覆盖写钩子: {}", type_name);
        }
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn WriteHook>> {
        self.hooks.read().get(type_name).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.hooks.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// 覆盖审计：布局中没有对应钩子的类型
    pub fn audit(&self, layout: &StorageLayout) -> Vec<String> {
        let hooks = self.hooks.read();
        layout
            .tables()
            .filter(|t| !hooks.contains_key(&t.type_name))
            .map(|t| t.type_name.clone())
            .collect()
    }
}

/// 数值字符串 → 数值，其余原样返回
pub fn coerce_id(value: &Value) -> Value {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone)]
struct ParentKey {
    attribute: String,
    parent_type: String,
    parent_field: String,
}

#[derive(Debug, Clone)]
struct NestedId {
    attribute: String,
    path: Vec<String>,
}

/// 声明式实体钩子，覆盖绝大多数类型的写入规则
#[derive(Debug, Clone)]
pub struct EntityHook {
    table: String,
    id_fields: Vec<String>,
    bool_defaults: Vec<(String, bool)>,
    parent_keys: Vec<ParentKey>,
    nested_ids: Vec<NestedId>,
    /// (属性, 根字段参数名)
    root_args: Vec<(String, String)>,
    guarded: bool,
}

impl EntityHook {
    /// 默认：`id` 为标识字段，要求数值主键
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            id_fields: vec!["id".to_string()],
            bool_defaults: Vec::new(),
            parent_keys: Vec::new(),
            nested_ids: Vec::new(),
            root_args: Vec::new(),
            guarded: true,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_field(mut self, field: &str) -> Self {
        self.id_fields.push(field.to_string());
        self
    }

    pub fn default_bool(mut self, field: &str, value: bool) -> Self {
        self.bool_defaults.push((field.to_string(), value));
        self
    }

    /// parent 为 `parent_type` 时，`attribute = parent[parent_field]`
    pub fn parent_key(mut self, attribute: &str, parent_type: &str, parent_field: &str) -> Self {
        self.parent_keys.push(ParentKey {
            attribute: attribute.to_string(),
            parent_type: parent_type.to_string(),
            parent_field: parent_field.to_string(),
        });
        self
    }

    /// 从原始节点沿 `path` 读取嵌套 id（例如 `family.id` → `familyId`）
    pub fn nested_id(mut self, attribute: &str, path: &[&str]) -> Self {
        self.nested_ids.push(NestedId {
            attribute: attribute.to_string(),
            path: path.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// 节点没有 `attribute` 时取根字段参数 `argument`
    /// （例如 `inspections(hiveId:)` 返回的检查记录通常不带 hiveId）
    pub fn root_arg_key(mut self, attribute: &str, argument: &str) -> Self {
        self.root_args
            .push((attribute.to_string(), argument.to_string()));
        self
    }

    /// 主键不要求是数值（文本键的表）
    pub fn unguarded(mut self) -> Self {
        self.guarded = false;
        self
    }

    /// 归一化：父外键、嵌套 id、标识字段、布尔默认值
    pub fn normalize(&self, parent: Option<&Record>, mut node: Record, ctx: &HookContext<'_>) -> Record {
        if let Some(parent) = parent {
            for link in &self.parent_keys {
                if ctx.parent_type != Some(link.parent_type.as_str()) {
                    continue;
                }
                if let Some(v) = parent.get(&link.parent_field).filter(|v| !v.is_null()) {
                    node.insert(link.attribute.clone(), coerce_id(v));
                }
            }
        }

        for nested in &self.nested_ids {
            let path: Vec<&str> = nested.path.iter().map(String::as_str).collect();
            match ctx.original_at(&path) {
                Some(v) => {
                    node.insert(nested.attribute.clone(), coerce_id(v));
                }
                // `family: null`：关系被清空，覆盖旧外键
                None if path.len() > 1
                    && ctx
                        .original_at(&path[..path.len() - 1])
                        .is_some_and(Value::is_null) =>
                {
                    node.insert(nested.attribute.clone(), Value::Null);
                }
                None => {}
            }
        }

        for (attribute, argument) in &self.root_args {
            if node.get(attribute).is_some_and(|v| !v.is_null()) {
                continue;
            }
            if let Some(v) = ctx.root_arguments.get(argument).filter(|v| !v.is_null()) {
                node.insert(attribute.clone(), coerce_id(v));
            }
        }

        for field in &self.id_fields {
            if let Some(v) = node.get_mut(field) {
                *v = coerce_id(v);
            }
        }

        for (field, default) in &self.bool_defaults {
            let entry = node.entry(field.clone()).or_insert(Value::Null);
            if entry.is_null() {
                *entry = Value::Bool(*default);
            }
        }

        node
    }
}

#[async_trait]
impl WriteHook for EntityHook {
    async fn write(&self, parent: Option<&Record>, node: Record, ctx: &HookContext<'_>) -> Result<()> {
        if node.is_empty() {
            return Ok(());
        }
        let node = self.normalize(parent, node, ctx);

        if self.guarded {
            ctx.upsert.upsert_guarded(&self.table, node).await?;
            return Ok(());
        }
        match ctx.upsert.upsert(&self.table, node).await {
            Ok(_) => Ok(()),
            Err(ApiarySyncError::MissingIdentifier { table, key_field }) => {
                warn!("⚠️ 跳过写入 {}: 缺少主键 {}", table, key_field);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexSpec, TableSpec};
    use crate::storage::{EntityKey, SqliteStore};
    use serde_json::json;
    use std::sync::LazyLock;

    static NO_ARGUMENTS: LazyLock<Variables> = LazyLock::new(Variables::new);

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    async fn engine() -> UpsertEngine {
        let table = |name: &str, ty: &str, key: &str| TableSpec {
            name: name.to_string(),
            type_name: ty.to_string(),
            primary_key: key.to_string(),
            key_from_first_field: key != "id",
            fields: vec![key.to_string()],
            indexes: vec![IndexSpec::single("hiveId")],
        };
        let layout = StorageLayout::from_tables(vec![
            table("hive", "Hive", "id"),
            table("box", "Box", "id"),
            table("locale", "Locale", "key"),
        ]);
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.apply_layout(&layout).await.unwrap();
        UpsertEngine::new(Arc::new(store), Arc::new(layout))
    }

    fn ctx<'a>(
        upsert: &'a UpsertEngine,
        type_name: &'a str,
        parent_type: Option<&'a str>,
        original: &'a Value,
    ) -> HookContext<'a> {
        HookContext {
            upsert,
            type_name,
            parent_type,
            original,
            path: "hive.boxes",
            root_arguments: &*NO_ARGUMENTS,
        }
    }

    #[test]
    fn coerces_numeric_strings() {
        assert_eq!(coerce_id(&json!("12")), json!(12));
        assert_eq!(coerce_id(&json!("abc")), json!("abc"));
        assert_eq!(coerce_id(&json!(3)), json!(3));
    }

    #[tokio::test]
    async fn box_hook_injects_parent_key_and_defaults() {
        let engine = engine().await;
        let hook = EntityHook::new("box")
            .id_field("hiveId")
            .parent_key("hiveId", "Hive", "id")
            .default_bool("roofStyle", false);
        let parent = record(json!({"id": "1", "name": "A"}));
        let original = json!({"id": "10", "position": 0, "frames": [{"id": 3}]});
        let node = record(json!({"id": "10", "position": 0}));

        hook.write(Some(&parent), node, &ctx(&engine, "Box", Some("Hive"), &original))
            .await
            .unwrap();

        let stored = engine.store().get("box", &EntityKey::Int(10)).await.unwrap().unwrap();
        assert_eq!(
            Value::Object(stored),
            json!({"id": 10, "position": 0, "hiveId": 1, "roofStyle": false})
        );
    }

    #[tokio::test]
    async fn parent_key_requires_matching_parent_type() {
        let engine = engine().await;
        let hook = EntityHook::new("box").parent_key("hiveId", "Hive", "id");
        let parent = record(json!({"id": 99}));
        let original = json!({"id": 1});
        hook.write(Some(&parent), record(json!({"id": 1})), &ctx(&engine, "Box", Some("Apiary"), &original))
            .await
            .unwrap();
        let stored = engine.store().get("box", &EntityKey::Int(1)).await.unwrap().unwrap();
        assert!(stored.get("hiveId").is_none());
    }

    #[tokio::test]
    async fn nested_ids_come_from_original_node() {
        let engine = engine().await;
        let hook = EntityHook::new("hive").nested_id("familyId", &["family", "id"]);
        let original = json!({"id": 2, "family": {"id": "5", "race": "carnica"}});
        hook.write(None, record(json!({"id": 2})), &ctx(&engine, "Hive", None, &original))
            .await
            .unwrap();
        let stored = engine.store().get("hive", &EntityKey::Int(2)).await.unwrap().unwrap();
        assert_eq!(stored["familyId"], 5);
    }

    #[tokio::test]
    async fn cleared_relationship_overwrites_nested_id() {
        let engine = engine().await;
        let hook = EntityHook::new("hive").nested_id("familyId", &["family", "id"]);
        let linked = json!({"id": 2, "family": {"id": 5}});
        hook.write(None, record(json!({"id": 2})), &ctx(&engine, "Hive", None, &linked))
            .await
            .unwrap();

        // 没有选 family：保留旧值
        let untouched = json!({"id": 2, "name": "B"});
        hook.write(None, record(json!({"id": 2, "name": "B"})), &ctx(&engine, "Hive", None, &untouched))
            .await
            .unwrap();
        let stored = engine.store().get("hive", &EntityKey::Int(2)).await.unwrap().unwrap();
        assert_eq!(stored["familyId"], 5);

        let cleared = json!({"id": 2, "family": null});
        hook.write(None, record(json!({"id": 2})), &ctx(&engine, "Hive", None, &cleared))
            .await
            .unwrap();
        let stored = engine.store().get("hive", &EntityKey::Int(2)).await.unwrap().unwrap();
        assert_eq!(stored["familyId"], Value::Null);
        assert_eq!(stored["name"], "B");
    }

    #[tokio::test]
    async fn root_argument_fills_missing_foreign_key() {
        let engine = engine().await;
        let hook = EntityHook::new("box").id_field("hiveId").root_arg_key("hiveId", "hiveId");
        let arguments = record(json!({"hiveId": "3", "limit": 5}));
        let original = json!({"id": 10});
        let ctx = HookContext {
            root_arguments: &arguments,
            ..ctx(&engine, "Box", None, &original)
        };

        hook.write(None, record(json!({"id": 10})), &ctx).await.unwrap();
        // 响应里带了外键时以响应为准
        hook.write(None, record(json!({"id": 11, "hiveId": 4})), &ctx).await.unwrap();

        let first = engine.store().get("box", &EntityKey::Int(10)).await.unwrap().unwrap();
        assert_eq!(first["hiveId"], 3);
        let second = engine.store().get("box", &EntityKey::Int(11)).await.unwrap().unwrap();
        assert_eq!(second["hiveId"], 4);
    }

    #[tokio::test]
    async fn empty_payload_and_missing_keys_are_skipped() {
        let engine = engine().await;
        let original = json!({});
        EntityHook::new("hive")
            .write(None, Record::new(), &ctx(&engine, "Hive", None, &original))
            .await
            .unwrap();
        EntityHook::new("hive")
            .write(None, record(json!({"id": "x1"})), &ctx(&engine, "Hive", None, &original))
            .await
            .unwrap();
        EntityHook::new("locale")
            .unguarded()
            .write(None, record(json!({"en": "Hive"})), &ctx(&engine, "Locale", None, &original))
            .await
            .unwrap();
        assert!(engine.store().all("hive").await.unwrap().is_empty());
        assert!(engine.store().all("locale").await.unwrap().is_empty());
    }

    #[test]
    fn audit_lists_uncovered_types() {
        let registry = WriteHookRegistry::new();
        registry.register("Hive", EntityHook::new("hive"));
        let layout = StorageLayout::from_tables(vec![
            TableSpec {
                name: "hive".to_string(),
                type_name: "Hive".to_string(),
                primary_key: "id".to_string(),
                key_from_first_field: false,
                fields: vec![],
                indexes: vec![],
            },
            TableSpec {
                name: "files".to_string(),
                type_name: "File".to_string(),
                primary_key: "id".to_string(),
                key_from_first_field: false,
                fields: vec![],
                indexes: vec![],
            },
        ]);
        assert_eq!(registry.audit(&layout), vec!["File".to_string()]);
        assert!(registry.get("Hive").is_some());
        assert!(registry.get("Box").is_none());
    }
}
