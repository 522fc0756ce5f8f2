//! Operation / Result Bubble - 在管道中流转的操作与结果

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_OPERATION_KEY: AtomicU64 = AtomicU64::new(1);

pub type Variables = Map<String, Value>;

/// 操作种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// 读取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestPolicy {
    /// 先走网络，失败时回退本地
    #[default]
    NetworkFirst,
    /// 只读本地（离线优先）
    CacheOnly,
}

/// 本次结果的来源标注
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOutcome {
    Network,
    /// 网络失败，由本地解析器补位
    Fallback,
    CacheOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationContext {
    pub request_policy: RequestPolicy,
    pub cache_outcome: Option<CacheOutcome>,
}

/// 一次操作（可变：管道中会被打上 cache_outcome 标注）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub key: u64,
    pub kind: OperationKind,
    pub query: String,
    pub variables: Variables,
    pub operation_name: Option<String>,
    pub context: OperationContext,
}

impl Operation {
    pub fn new(kind: OperationKind, query: impl Into<String>) -> Self {
        Self {
            key: NEXT_OPERATION_KEY.fetch_add(1, Ordering::Relaxed),
            kind,
            query: query.into(),
            variables: Variables::new(),
            operation_name: None,
            context: OperationContext::default(),
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, query)
    }

    pub fn mutation(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, query)
    }

    pub fn subscription(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Subscription, query)
    }

    /// 非对象的变量值会被忽略
    pub fn with_variables(mut self, variables: Value) -> Self {
        if let Value::Object(map) = variables {
            self.variables = map;
        }
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.context.request_policy = policy;
        self
    }
}

/// 结果中携带的操作级错误
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OperationError {
    #[error("network error: {message}")]
    Network { message: String },
    #[error("graphql errors: {}", .messages.join("; "))]
    GraphQl { messages: Vec<String> },
    #[error("local fallback for `{field}` failed: {message}")]
    LocalFallback { field: String, message: String },
}

impl OperationError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

/// Result Bubble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: Operation,
    pub data: Option<Value>,
    pub error: Option<OperationError>,
    /// 本地回退替换了数据时保留的原始网络错误
    pub original_error: Option<OperationError>,
}

impl OperationResult {
    pub fn ok(operation: Operation, data: Value) -> Self {
        Self {
            operation,
            data: Some(data),
            error: None,
            original_error: None,
        }
    }

    pub fn failed(operation: Operation, error: OperationError) -> Self {
        Self {
            operation,
            data: None,
            error: Some(error),
            original_error: None,
        }
    }

    /// 数据存在（非 null）
    pub fn has_data(&self) -> bool {
        matches!(&self.data, Some(v) if !v.is_null())
    }

    /// 展示的是缓存数据
    pub fn is_from_cache(&self) -> bool {
        matches!(
            self.operation.context.cache_outcome,
            Some(CacheOutcome::Fallback) | Some(CacheOutcome::CacheOnly)
        )
    }
}
