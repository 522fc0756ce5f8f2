//! 数据访问层 (DAO)
//!
//! - EntityDao：动态实体表（文档表）的读写
//! - LayoutDao：sync_layout / sync_meta 元数据与布局应用

pub mod entity;
pub mod layout;

pub use entity::EntityDao;
pub use layout::LayoutDao;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::{ApiarySyncError, Result};
use crate::storage::EntityKey;

/// 表名 / 字段名只允许 GraphQL 名字字符，它们会被拼进 SQL
pub(crate) fn check_ident(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ApiarySyncError::InvalidArgument(format!("非法标识符: {}", name)))
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

/// 与表达式索引保持一致的取值表达式
pub(crate) fn field_expr(field: &str) -> String {
    format!("json_extract(body, '$.{}')", field)
}

pub(crate) fn key_to_sql(key: &EntityKey) -> SqlValue {
    match key {
        EntityKey::Int(i) => SqlValue::Integer(*i),
        EntityKey::Text(s) => SqlValue::Text(s.clone()),
    }
}

/// JSON 值 → 与 json_extract 返回值可比较的 SQL 值
pub(crate) fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
