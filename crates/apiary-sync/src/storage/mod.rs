//! 存储模块 - 离线缓存的数据持久化层
//!
//! 采用分层架构设计：
//! - EntityStore：存储句柄 trait（按表 get / put / merge / delete / 过滤删除 / 布局应用）
//! - SqliteStore：基于 SQLite 的实现，所有访问经由单线程 DB Actor
//! - DAO Layer：实体表与布局元数据的 SQL 操作
//!
//! 实体表是文档表：`(pk, body)`，body 为 JSON 对象；二级索引为 json_extract 表达式索引。

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::schema::{ProvisionReport, StorageLayout};

pub mod dao;
pub mod db_actor;
pub mod migrate;
mod sqlite;

pub use sqlite::SqliteStore;

/// 实体记录：任意属性 + 可解析的唯一键
pub type Record = serde_json::Map<String, Value>;

/// 在存储事务内执行的读-改-写函数
pub type MergeFn = Box<dyn FnOnce(Option<Record>) -> Record + Send>;

/// 实体主键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Int(i64),
    Text(String),
}

impl EntityKey {
    /// 从 JSON 值解析主键；null / 对象 / 数组 / 空串 / 布尔都不是可用的键
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| Self::Int(f as i64))
                } else {
                    Some(Self::Text(n.to_string()))
                }
            }
            Value::String(s) if !s.is_empty() => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// 存储句柄
///
/// 所有方法都是异步的，可能挂起；同一 key 的并发写由存储引擎自身的事务串行化。
#[async_trait]
pub trait EntityStore: Send + Sync + fmt::Debug {
    /// 应用表布局（幂等），返回应用后的版本
    async fn apply_layout(&self, layout: &StorageLayout) -> Result<ProvisionReport>;

    async fn schema_version(&self) -> Result<i64>;

    async fn get(&self, table: &str, key: &EntityKey) -> Result<Option<Record>>;

    /// 整条覆盖写入
    async fn put(&self, table: &str, key: &EntityKey, record: Record) -> Result<()>;

    /// 在一个事务内读取旧记录、调用 `merge`、写回结果
    async fn merge(&self, table: &str, key: &EntityKey, merge: MergeFn) -> Result<Record>;

    async fn delete(&self, table: &str, key: &EntityKey) -> Result<bool>;

    /// 删除 `field` 取值在 `values` 中的全部记录
    async fn delete_where(&self, table: &str, field: &str, values: &[Value]) -> Result<usize>;

    /// 按字段等值查询（主键升序）
    async fn find_by(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>>;

    async fn all(&self, table: &str) -> Result<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_key_from_value() {
        assert_eq!(EntityKey::from_value(&json!(1)), Some(EntityKey::Int(1)));
        assert_eq!(EntityKey::from_value(&json!(3.0)), Some(EntityKey::Int(3)));
        assert_eq!(EntityKey::from_value(&json!("en")), Some(EntityKey::Text("en".into())));
        assert_eq!(EntityKey::from_value(&json!("")), None);
        assert_eq!(EntityKey::from_value(&json!(null)), None);
        assert_eq!(EntityKey::from_value(&json!({"id": 1})), None);
        assert_eq!(EntityKey::from_value(&json!(true)), None);
        assert!(EntityKey::Int(7).is_numeric());
        assert_eq!(EntityKey::Int(7).to_json(), json!(7));
    }
}
