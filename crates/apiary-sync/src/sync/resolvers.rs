//! Local Resolver Set - 每个顶层查询字段一个解析器，只读本地存储
//!
//! 用作网络失败时的回退，也可在 `RequestPolicy::CacheOnly` 时作为主读取路径。

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::hooks::coerce_id;
use super::operation::Variables;
use crate::error::{ApiarySyncError, Result};
use crate::schema::StorageLayout;
use crate::storage::{EntityKey, EntityStore, Record};

/// 解析器入参：根字段名、求值后的字段参数、原始变量
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    pub field: String,
    pub arguments: Variables,
    pub variables: Variables,
}

impl ResolverArgs {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name).filter(|v| !v.is_null())
    }

    /// 参数作为主键；数值字符串按数值处理
    pub fn key(&self, name: &str) -> Result<EntityKey> {
        self.argument(name)
            .and_then(|v| EntityKey::from_value(&coerce_id(v)))
            .ok_or_else(|| {
                ApiarySyncError::InvalidArgument(format!("{} 缺少参数 {}", self.field, name))
            })
    }

    pub fn limit(&self, name: &str) -> Option<usize> {
        self.argument(name)
            .and_then(|v| coerce_id(v).as_u64())
            .map(|n| n as usize)
    }
}

/// 解析器可见的本地存储
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub store: Arc<dyn EntityStore>,
    pub layout: Arc<StorageLayout>,
}

impl ResolverContext {
    pub async fn get(&self, table: &str, key: &EntityKey) -> Result<Option<Record>> {
        self.store.get(table, key).await
    }

    pub async fn find_by(&self, table: &str, field: &str, key: &EntityKey) -> Result<Vec<Record>> {
        self.store.find_by(table, field, &key.to_json()).await
    }

    pub async fn all(&self, table: &str) -> Result<Vec<Record>> {
        self.store.all(table).await
    }
}

#[async_trait]
pub trait LocalResolver: Send + Sync {
    async fn resolve(&self, args: &ResolverArgs, ctx: &ResolverContext) -> Result<Value>;
}

/// 闭包形式的解析器
pub struct FnResolver<F> {
    f: F,
}

impl<F> FnResolver<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> LocalResolver for FnResolver<F>
where
    F: Fn(ResolverArgs, ResolverContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn resolve(&self, args: &ResolverArgs, ctx: &ResolverContext) -> Result<Value> {
        (self.f)(args.clone(), ctx.clone()).await
    }
}

#[derive(Default)]
pub struct LocalResolverSet {
    resolvers: RwLock<HashMap<String, Arc<dyn LocalResolver>>>,
}

impl std::fmt::Debug for LocalResolverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalResolverSet")
            .field("fields", &self.fields())
            .finish()
    }
}

impl LocalResolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或覆盖某顶层字段的解析器
    pub fn register<R: LocalResolver + 'static>(&self, field: &str, resolver: R) {
        if self
            .resolvers
            .write()
            .insert(field.to_string(), Arc::new(resolver))
            .is_some()
        {
            debug!("覆盖本地解析器: {}", field);
        }
    }

    pub fn register_fn<F, Fut>(&self, field: &str, f: F)
    where
        F: Fn(ResolverArgs, ResolverContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(field, FnResolver::new(f));
    }

    pub fn get(&self, field: &str) -> Option<Arc<dyn LocalResolver>> {
        self.resolvers.read().get(field).cloned()
    }

    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<_> = self.resolvers.read().keys().cloned().collect();
        fields.sort();
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn args_parse_keys_and_limits() {
        let mut arguments = Variables::new();
        arguments.insert("id".to_string(), json!("12"));
        arguments.insert("limit".to_string(), json!(5));
        arguments.insert("empty".to_string(), Value::Null);
        let args = ResolverArgs {
            field: "hive".to_string(),
            arguments,
            variables: Variables::new(),
        };
        assert_eq!(args.key("id").unwrap(), EntityKey::Int(12));
        assert_eq!(args.limit("limit"), Some(5));
        assert!(matches!(args.key("empty"), Err(ApiarySyncError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn closures_register_as_resolvers() {
        let set = LocalResolverSet::new();
        set.register_fn("ping", |args, _ctx| async move {
            Ok(json!({ "field": args.field }))
        });
        assert_eq!(set.fields(), vec!["ping".to_string()]);

        let store = crate::storage::SqliteStore::open_in_memory().await.unwrap();
        let ctx = ResolverContext {
            store: Arc::new(store),
            layout: Arc::new(StorageLayout::default()),
        };
        let args = ResolverArgs {
            field: "ping".to_string(),
            ..Default::default()
        };
        let value = set.get("ping").unwrap().resolve(&args, &ctx).await.unwrap();
        assert_eq!(value, json!({"field": "ping"}));
        assert!(set.get("pong").is_none());
    }
}
