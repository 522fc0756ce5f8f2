//! 同步模块 - 查询管道中的离线优先同步层
//!
//! - operation：Operation / Result Bubble
//! - document / type_map：查询文档解析与字段路径类型表
//! - upsert / hooks / write_back：成功响应的归一化回写
//! - resolvers / projection：网络失败时的本地回退
//! - exchange：把以上组合成一个管道阶段
//! - context：显式的同步上下文

pub mod context;
pub mod document;
pub mod exchange;
pub mod hooks;
pub mod operation;
pub mod projection;
pub mod resolvers;
pub mod type_map;
pub mod upsert;
pub mod write_back;

pub use context::SyncContext;
pub use document::QueryDocument;
pub use exchange::{Exchange, FnExchange, SyncExchange};
pub use hooks::{coerce_id, EntityHook, HookContext, WriteHook, WriteHookRegistry};
pub use operation::{
    CacheOutcome, Operation, OperationContext, OperationError, OperationKind, OperationResult,
    RequestPolicy, Variables,
};
pub use resolvers::{FnResolver, LocalResolver, LocalResolverSet, ResolverArgs, ResolverContext};
pub use type_map::{FieldPathEntry, FieldPathTypeMap};
pub use upsert::{shallow_merge, UpsertEngine};
pub use write_back::{ResponseNode, WriteBackReport, WritePlan, WriteStep};
