//! Sync Exchange - 组合类型表、回写与本地回退的管道阶段
//!
//! 状态流转：
//! - RECEIVED → (mutation / subscription) → PASSTHROUGH：原样转发，不回写
//! - RECEIVED → (query) → FORWARDED → 网络
//!   - 有数据且无错误 → WRITE_BACK
//!   - 无数据且有错误 → LOCAL_FALLBACK：按根字段调用本地解析器，原始错误移到 original_error
//!   - 其余（部分数据 + 错误）原样返回，不回写
//! - `RequestPolicy::CacheOnly` 的查询不经过网络，直接走本地解析器

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::context::SyncContext;
use super::document::{field_arguments, QueryDocument};
use super::operation::{
    CacheOutcome, Operation, OperationError, OperationKind, OperationResult, RequestPolicy,
    Variables,
};
use super::projection::project;
use super::resolvers::ResolverArgs;
use super::type_map::FieldPathTypeMap;
use super::write_back::{self, WriteBack, WriteBackReport};
use crate::config::WriteBackMode;
use crate::error::ApiarySyncError;
use crate::events::{now_millis, SyncEvent};

/// 管道阶段：接收 Operation，产出 Result Bubble
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn execute(&self, operation: Operation) -> OperationResult;
}

/// 闭包形式的管道阶段（常用于网络边界的适配）
pub struct FnExchange<F> {
    f: F,
}

impl<F> FnExchange<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Exchange for FnExchange<F>
where
    F: Fn(Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OperationResult> + Send + 'static,
{
    async fn execute(&self, operation: Operation) -> OperationResult {
        (self.f)(operation).await
    }
}

#[derive(Clone)]
pub struct SyncExchange {
    ctx: Arc<SyncContext>,
    forward: Arc<dyn Exchange>,
}

impl std::fmt::Debug for SyncExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncExchange")
            .field("ctx", &self.ctx)
            .field("forward", &"<exchange>")
            .finish()
    }
}

impl SyncExchange {
    pub fn new(ctx: Arc<SyncContext>, forward: Arc<dyn Exchange>) -> Self {
        Self { ctx, forward }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// 有界并发地处理一串操作，结果按完成顺序产出
    pub fn run_stream<S>(&self, operations: S) -> impl Stream<Item = OperationResult> + Send
    where
        S: Stream<Item = Operation> + Send + 'static,
    {
        let this = self.clone();
        let limit = self.ctx.config.max_in_flight.max(1);
        operations
            .map(move |operation| {
                let this = this.clone();
                async move { this.execute(operation).await }
            })
            .buffer_unordered(limit)
    }

    async fn execute_query(&self, operation: Operation) -> OperationResult {
        let document =
            match QueryDocument::parse(&operation.query, operation.operation_name.as_deref()) {
                Ok(document) => document,
                Err(e) => {
                    // 文档解析失败时无法回写 / 回退，交给网络边界处理
                    warn!("⚠️ 查询文档解析失败，直接转发: {}", e);
                    return self.forward.execute(operation).await;
                }
            };

        if operation.context.request_policy == RequestPolicy::CacheOnly {
            return self.resolve_locally(operation, &document, None).await;
        }

        let map = FieldPathTypeMap::build(&self.ctx.schema, &document);
        let mut result = self.forward.execute(operation).await;

        let has_data = result.has_data();
        match result.error.clone() {
            None if has_data => {
                result.operation.context.cache_outcome = Some(CacheOutcome::Network);
                if let Some(data) = &result.data {
                    let arguments = document.root_arguments(&result.operation.variables);
                    self.write_back(result.operation.key, data, &map, arguments)
                        .await;
                }
                result
            }
            Some(network_error) if !has_data => {
                self.resolve_locally(result.operation, &document, Some(network_error))
                    .await
            }
            _ => {
                debug!("部分数据或空结果，原样返回: key={}", result.operation.key);
                result.operation.context.cache_outcome = Some(CacheOutcome::Network);
                result
            }
        }
    }

    /// 回写：同步规划，再在独立任务中执行（调用方被丢弃也会跑完）
    async fn write_back(
        &self,
        operation_key: u64,
        data: &Value,
        map: &FieldPathTypeMap,
        root_arguments: HashMap<String, Variables>,
    ) {
        let plan = WriteBack::new(&self.ctx.schema, map)
            .with_root_arguments(root_arguments)
            .plan(data);
        let ctx = self.ctx.clone();
        let task = async move {
            let report: WriteBackReport =
                write_back::execute(plan, &ctx.hooks, &ctx.upsert, ctx.config.debug_mode).await;
            ctx.events
                .emit(SyncEvent::WriteBackCompleted {
                    operation_key,
                    written: report.written,
                    failed: report.failed,
                    gaps: report.gaps,
                    timestamp: now_millis(),
                })
                .await;
            report
        };

        let handle = tokio::spawn(task);
        if self.ctx.config.write_back == WriteBackMode::Await {
            if let Err(e) = handle.await {
                error!("❌ 回写任务异常退出: key={}, error={}", operation_key, e);
            }
        }
    }

    /// 用本地解析器计算结果；`network_error` 为 None 表示 CacheOnly 读取
    async fn resolve_locally(
        &self,
        mut operation: Operation,
        document: &QueryDocument,
        network_error: Option<OperationError>,
    ) -> OperationResult {
        let schema = &self.ctx.schema;
        let variables = document.effective_variables(&operation.variables);
        let resolver_ctx = self.ctx.resolver_context();
        let root = schema.root_type(OperationKind::Query);

        let mut data = Map::new();
        let mut fields = Vec::new();
        for field in document.root_fields() {
            let name = field.name.node.as_str();
            let key = field.response_key().node.to_string();
            if name == "__typename" {
                data.insert(key, root.map(|r| Value::from(r.name.as_str())).unwrap_or(Value::Null));
                continue;
            }

            let Some(resolver) = self.ctx.resolvers.get(name) else {
                let message = ApiarySyncError::NoLocalResolver(name.to_string()).to_string();
                return self
                    .fallback_failed(operation, name, message, network_error)
                    .await;
            };
            let args = ResolverArgs {
                field: name.to_string(),
                arguments: field_arguments(field, &variables),
                variables: variables.clone(),
            };
            match resolver.resolve(&args, &resolver_ctx).await {
                Ok(value) => {
                    let declared = root
                        .and_then(|r| schema.field_type(r, name))
                        .map(|t| t.name.as_str());
                    let projected =
                        project(schema, document, &value, &field.selection_set.node, declared);
                    data.insert(key, projected);
                    fields.push(name.to_string());
                }
                Err(e) => {
                    return self
                        .fallback_failed(operation, name, e.to_string(), network_error)
                        .await;
                }
            }
        }

        match &network_error {
            Some(network) => {
                operation.context.cache_outcome = Some(CacheOutcome::Fallback);
                info!(
                    "📦 网络失败，使用本地数据: key={}, fields={:?}, error={}",
                    operation.key, fields, network
                );
                self.ctx
                    .events
                    .emit(SyncEvent::FallbackServed {
                        operation_key: operation.key,
                        fields,
                        network_error: network.to_string(),
                        timestamp: now_millis(),
                    })
                    .await;
            }
            None => {
                operation.context.cache_outcome = Some(CacheOutcome::CacheOnly);
                debug!("本地读取完成: key={}, fields={:?}", operation.key, fields);
            }
        }

        OperationResult {
            operation,
            data: Some(Value::Object(data)),
            error: None,
            original_error: network_error,
        }
    }

    async fn fallback_failed(
        &self,
        operation: Operation,
        field: &str,
        message: String,
        network_error: Option<OperationError>,
    ) -> OperationResult {
        let failure = ApiarySyncError::LocalFallback {
            field: field.to_string(),
            message: message.clone(),
        };
        error!("❌ {}: key={}", failure, operation.key);
        self.ctx
            .events
            .emit(SyncEvent::FallbackFailed {
                operation_key: operation.key,
                field: field.to_string(),
                message: message.clone(),
                timestamp: now_millis(),
            })
            .await;
        OperationResult {
            operation,
            data: None,
            error: Some(OperationError::LocalFallback {
                field: field.to_string(),
                message,
            }),
            original_error: network_error,
        }
    }
}

#[async_trait]
impl Exchange for SyncExchange {
    async fn execute(&self, operation: Operation) -> OperationResult {
        match operation.kind {
            OperationKind::Mutation | OperationKind::Subscription => {
                debug!("透传 {:?}: key={}", operation.kind, operation.key);
                self.forward.execute(operation).await
            }
            OperationKind::Query => self.execute_query(operation).await,
        }
    }
}
