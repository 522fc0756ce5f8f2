//! 选择集投影 - 把本地解析器的输出裁剪成与网络响应同形的结果
//!
//! 解析器按 schema 字段名返回对象；投影后按 response key（别名）输出，只保留被选中的字段，
//! 未选中的字段丢弃，缺失的字段补 null，`__typename` 按具体类型填写。

use async_graphql_parser::types::SelectionSet;
use serde_json::{Map, Value};

use super::document::QueryDocument;
use crate::schema::{SchemaRegistry, TypeKind};

pub fn project(
    schema: &SchemaRegistry,
    document: &QueryDocument,
    value: &Value,
    set: &SelectionSet,
    declared_type: Option<&str>,
) -> Value {
    if set.items.is_empty() {
        return value.clone();
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| project(schema, document, item, set, declared_type))
                .collect(),
        ),
        Value::Object(object) => project_object(schema, document, object, set, declared_type),
        other => other.clone(),
    }
}

fn project_object(
    schema: &SchemaRegistry,
    document: &QueryDocument,
    object: &Map<String, Value>,
    set: &SelectionSet,
    declared_type: Option<&str>,
) -> Value {
    let concrete = object
        .get("__typename")
        .and_then(Value::as_str)
        .or_else(|| {
            declared_type.filter(|t| {
                schema
                    .get(t)
                    .map(|d| d.kind == TypeKind::Object)
                    .unwrap_or(false)
            })
        });
    let descriptor = concrete.and_then(|t| schema.get(t));

    let mut out = Map::new();
    for field in document.collect_fields(set, concrete, Some(schema)) {
        let name = field.name.node.as_str();
        let key = field.response_key().node.to_string();

        if name == "__typename" {
            out.insert(key, concrete.map(Value::from).unwrap_or(Value::Null));
            continue;
        }

        let child = object.get(name).unwrap_or(&Value::Null);
        let child_type = descriptor
            .and_then(|d| schema.field_type(d, name))
            .map(|t| t.name.as_str());
        let projected = project(schema, document, child, &field.selection_set.node, child_type);

        // 同一个 key 被多次选择（片段重叠）时合并子字段
        match out.get_mut(&key) {
            Some(existing) => {
                if let (Value::Object(existing), Value::Object(more)) = (existing, projected) {
                    for (k, v) in more {
                        existing.entry(k).or_insert(v);
                    }
                }
            }
            None => {
                out.insert(key, projected);
            }
        }
    }
    Value::Object(out)
}
