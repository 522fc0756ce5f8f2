//! 同步上下文 - 启动时构建一次，显式传给管道、钩子和解析器

use std::sync::Arc;
use tracing::{info, warn};

use super::hooks::WriteHookRegistry;
use super::resolvers::{LocalResolverSet, ResolverContext};
use super::upsert::UpsertEngine;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::schema::{provision, ProvisionReport, SchemaRegistry, StorageLayout};
use crate::storage::{EntityStore, SqliteStore};

#[derive(Debug)]
pub struct SyncContext {
    pub schema: Arc<SchemaRegistry>,
    pub layout: Arc<StorageLayout>,
    pub store: Arc<dyn EntityStore>,
    pub upsert: UpsertEngine,
    pub hooks: Arc<WriteHookRegistry>,
    pub resolvers: Arc<LocalResolverSet>,
    pub config: SyncConfig,
    pub events: EventManager,
    pub provision_report: ProvisionReport,
}

impl SyncContext {
    /// 解析 schema、打开缓存库、provisioning；任何一步失败都直接返回错误
    pub async fn provision(
        config: SyncConfig,
        sdl: &str,
        hooks: WriteHookRegistry,
        resolvers: LocalResolverSet,
    ) -> Result<Self> {
        let schema = SchemaRegistry::from_sdl(sdl, &config.opaque_scalars)?;
        let store: Arc<dyn EntityStore> = match config.db_path() {
            Some(path) => Arc::new(SqliteStore::open(path).await?),
            None => Arc::new(SqliteStore::open_in_memory().await?),
        };
        Self::with_store(config, schema, store, hooks, resolvers).await
    }

    /// 使用外部提供的存储句柄
    pub async fn with_store(
        config: SyncConfig,
        schema: SchemaRegistry,
        store: Arc<dyn EntityStore>,
        hooks: WriteHookRegistry,
        resolvers: LocalResolverSet,
    ) -> Result<Self> {
        let (layout, report) = provision(&schema, &config.layout, store.as_ref()).await?;

        let missing = hooks.audit(&layout);
        if !missing.is_empty() {
            warn!("⚠️ 以下类型没有写钩子，响应中的这些实体不会被缓存: {:?}", missing);
        }

        let layout = Arc::new(layout);
        let events = EventManager::new(config.event_capacity);
        events
            .emit(SyncEvent::Provisioned {
                version: report.version,
                change: report.change,
                tables: report.tables,
                timestamp: now_millis(),
            })
            .await;
        info!("✅ 同步上下文就绪: {} 张表, version={}", layout.len(), report.version);

        Ok(Self {
            schema: Arc::new(schema),
            upsert: UpsertEngine::new(store.clone(), layout.clone()),
            layout,
            store,
            hooks: Arc::new(hooks),
            resolvers: Arc::new(resolvers),
            config,
            events,
            provision_report: report,
        })
    }

    pub fn resolver_context(&self) -> ResolverContext {
        ResolverContext {
            store: self.store.clone(),
            layout: self.layout.clone(),
        }
    }
}
