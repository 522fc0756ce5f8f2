//! 查询文档 - 解析后的可执行 GraphQL 文档（选中的那个操作 + 片段定义）

use async_graphql_parser::parse_query;
use async_graphql_parser::types::{
    DocumentOperations, Field, FragmentDefinition, OperationDefinition, OperationType,
    Selection, SelectionSet,
};
use async_graphql_value::{ConstValue, Name};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;

use super::operation::{OperationKind, Variables};
use crate::error::{ApiarySyncError, Result};
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone)]
pub struct QueryDocument {
    operation: OperationDefinition,
    fragments: HashMap<String, FragmentDefinition>,
}

impl QueryDocument {
    /// 解析文档；多操作文档需要 `operation_name` 选出其中一个
    pub fn parse(query: &str, operation_name: Option<&str>) -> Result<Self> {
        let document =
            parse_query(query).map_err(|e| ApiarySyncError::QueryParse(e.to_string()))?;

        let operation = match document.operations {
            DocumentOperations::Single(op) => op.node,
            DocumentOperations::Multiple(mut ops) => {
                let name = match operation_name {
                    Some(name) => name.to_string(),
                    None if ops.len() == 1 => ops
                        .keys()
                        .next()
                        .map(|n| n.to_string())
                        .unwrap_or_default(),
                    None => {
                        return Err(ApiarySyncError::QueryParse(
                            "文档包含多个操作，必须指定 operationName".to_string(),
                        ))
                    }
                };
                ops.remove(&Name::new(&name))
                    .map(|op| op.node)
                    .ok_or_else(|| ApiarySyncError::QueryParse(format!("操作不存在: {}", name)))?
            }
        };

        let fragments = document
            .fragments
            .into_iter()
            .map(|(name, fragment)| (name.to_string(), fragment.node))
            .collect();

        Ok(Self {
            operation,
            fragments,
        })
    }

    pub fn kind(&self) -> OperationKind {
        match self.operation.ty {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => OperationKind::Subscription,
        }
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.operation.selection_set.node
    }

    pub fn fragment(&self, name: &str) -> Option<&FragmentDefinition> {
        self.fragments.get(name)
    }

    /// 根字段（展开根上的片段）
    pub fn root_fields(&self) -> Vec<&Field> {
        self.collect_fields(self.selection_set(), None, None)
    }

    /// 展开片段后的字段列表，保持出现顺序
    ///
    /// `type_name` 给出时只展开类型条件满足的片段；None 时展开全部。
    pub fn collect_fields<'a>(
        &'a self,
        set: &'a SelectionSet,
        type_name: Option<&str>,
        schema: Option<&SchemaRegistry>,
    ) -> Vec<&'a Field> {
        let mut out = Vec::new();
        let mut visiting = Vec::new();
        self.collect_into(set, type_name, schema, &mut visiting, &mut out);
        out
    }

    fn collect_into<'a>(
        &'a self,
        set: &'a SelectionSet,
        type_name: Option<&str>,
        schema: Option<&SchemaRegistry>,
        visiting: &mut Vec<&'a str>,
        out: &mut Vec<&'a Field>,
    ) {
        let applies = |condition: &str| match (type_name, schema) {
            (Some(concrete), Some(schema)) => schema.is_possible_type(condition, concrete),
            (Some(concrete), None) => condition == concrete,
            (None, _) => true,
        };

        for item in &set.items {
            match &item.node {
                Selection::Field(field) => out.push(&field.node),
                Selection::InlineFragment(fragment) => {
                    let fragment = &fragment.node;
                    let matches = fragment
                        .type_condition
                        .as_ref()
                        .map(|c| applies(c.node.on.node.as_str()))
                        .unwrap_or(true);
                    if matches {
                        self.collect_into(&fragment.selection_set.node, type_name, schema, visiting, out);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    let Some((key, fragment)) = self.fragments.get_key_value(name) else {
                        continue;
                    };
                    if visiting.contains(&key.as_str())
                        || !applies(fragment.type_condition.node.on.node.as_str())
                    {
                        continue;
                    }
                    visiting.push(key.as_str());
                    self.collect_into(&fragment.selection_set.node, type_name, schema, visiting, out);
                    visiting.pop();
                }
            }
        }
    }

    /// 根字段 response key → 求值后的参数
    pub fn root_arguments(&self, variables: &Variables) -> HashMap<String, Variables> {
        let variables = self.effective_variables(variables);
        self.root_fields()
            .into_iter()
            .map(|field| {
                (
                    field.response_key().node.to_string(),
                    field_arguments(field, &variables),
                )
            })
            .collect()
    }

    /// 操作声明的变量默认值，再用实际传入的变量覆盖
    pub fn effective_variables(&self, variables: &Variables) -> Variables {
        let mut out = Variables::new();
        for definition in &self.operation.variable_definitions {
            let definition = &definition.node;
            if let Some(default) = &definition.default_value {
                if let Ok(v) = default.node.clone().into_json() {
                    out.insert(definition.name.node.to_string(), v);
                }
            }
        }
        for (k, v) in variables {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

/// 字段参数求值为 JSON；未提供的变量为 null
pub fn field_arguments(field: &Field, variables: &Variables) -> Variables {
    let mut out = Variables::new();
    for (name, value) in &field.arguments {
        let resolved = value
            .node
            .clone()
            .into_const_with(|var: Name| -> std::result::Result<ConstValue, Infallible> {
                Ok(variables
                    .get(var.as_str())
                    .and_then(|v| ConstValue::from_json(v.clone()).ok())
                    .unwrap_or(ConstValue::Null))
            })
            .ok()
            .and_then(|v| v.into_json().ok())
            .unwrap_or(Value::Null);
        out.insert(name.node.to_string(), resolved);
    }
    out
}
