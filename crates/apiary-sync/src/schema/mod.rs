//! Schema Registry - 启动时从 API 类型 schema 构建的类型描述
//!
//! - TypeDescriptor：类型名、种类、字段 → 类型引用（保持声明顺序）
//! - SchemaRegistry：全部类型 + 根操作类型
//! - layout：由 schema 推导本地存储表布局
//! - provision：把布局应用到存储引擎（幂等、失败即致命）

mod sdl;
pub mod layout;
pub mod provision;

pub use layout::{IndexSpec, LayoutChange, LayoutOptions, StorageLayout, TableSpec};
pub use provision::{provision, ProvisionReport};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::sync::OperationKind;

/// GraphQL 内置标量
const BUILTIN_SCALARS: &[&str] = &["Int", "Float", "String", "Boolean", "ID"];

/// 类型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Enum,
    Scalar,
    /// 不再细分、不做归一化的标量（如 JSON）
    Opaque,
    InputObject,
}

impl TypeKind {
    /// 叶子类型：回写时作为属性值保留
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Enum | Self::Scalar | Self::Opaque)
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, Self::Interface | Self::Union)
    }
}

/// 字段的类型引用（去掉 List / NonNull 包装后的命名类型 + 包装信息）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub named: String,
    pub list: bool,
    pub non_null: bool,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            named: name.into(),
            list: false,
            non_null: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeRef,
}

/// 类型描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    /// 字段按声明顺序保存（provisioning 需要「第一个声明的字段」）
    pub fields: Vec<FieldDescriptor>,
    /// union 成员 / interface 实现类型
    pub possible_types: Vec<String>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: Vec::new(),
            possible_types: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// 启动时构建一次的类型注册表
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    types: HashMap<String, TypeDescriptor>,
    /// 类型声明顺序，保证布局推导结果稳定
    order: Vec<String>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

impl SchemaRegistry {
    /// 从 GraphQL SDL 构建注册表；`opaque_scalars` 中的标量视为不透明叶子
    pub fn from_sdl(sdl: &str, opaque_scalars: &[String]) -> Result<Self> {
        sdl::build_registry(sdl, opaque_scalars)
    }

    pub(crate) fn from_parts(
        declared: Vec<TypeDescriptor>,
        query_type: String,
        mutation_type: Option<String>,
        subscription_type: Option<String>,
    ) -> Self {
        let mut types = HashMap::new();
        let mut order = Vec::new();
        for name in BUILTIN_SCALARS {
            types.insert(name.to_string(), TypeDescriptor::new(*name, TypeKind::Scalar));
        }
        for desc in declared {
            if !types.contains_key(&desc.name) {
                order.push(desc.name.clone());
            }
            types.insert(desc.name.clone(), desc);
        }
        Self {
            types,
            order,
            query_type,
            mutation_type,
            subscription_type,
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// 按声明顺序遍历（不含内置标量）
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.order.iter().filter_map(|n| self.types.get(n))
    }

    pub fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(self.query_type.as_str()),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&TypeDescriptor> {
        self.root_type_name(kind).and_then(|n| self.get(n))
    }

    pub fn is_root_type(&self, name: &str) -> bool {
        name == self.query_type
            || self.mutation_type.as_deref() == Some(name)
            || self.subscription_type.as_deref() == Some(name)
    }

    /// 父类型上某字段的命名类型描述
    pub fn field_type(&self, parent: &TypeDescriptor, field: &str) -> Option<&TypeDescriptor> {
        parent.field(field).and_then(|f| self.get(&f.ty.named))
    }

    /// `concrete` 是否可以出现在 `type_condition` 所在位置
    pub fn is_possible_type(&self, type_condition: &str, concrete: &str) -> bool {
        if type_condition == concrete {
            return true;
        }
        self.get(type_condition)
            .map(|t| t.possible_types.iter().any(|p| p == concrete))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        scalar JSON
        type Query { hive(id: ID!): Hive node: Node }
        interface Node { id: ID! }
        type Hive implements Node { id: ID!, name: String, boxes: [Box!]!, meta: JSON }
        type Box implements Node { id: ID!, position: Int }
        union SearchResult = Hive | Box
    "#;

    #[test]
    fn registry_resolves_fields_and_kinds() {
        let schema = SchemaRegistry::from_sdl(SDL, &["JSON".to_string()]).unwrap();
        let hive = schema.get("Hive").unwrap();
        assert_eq!(hive.kind, TypeKind::Object);
        assert_eq!(hive.field_names().collect::<Vec<_>>(), vec!["id", "name", "boxes", "meta"]);

        let boxes = hive.field("boxes").unwrap();
        assert_eq!(boxes.ty.named, "Box");
        assert!(boxes.ty.list);
        assert!(boxes.ty.non_null);

        assert_eq!(schema.field_type(hive, "meta").unwrap().kind, TypeKind::Opaque);
        assert_eq!(schema.get("ID").unwrap().kind, TypeKind::Scalar);
        assert_eq!(schema.root_type(OperationKind::Query).unwrap().name, "Query");
        assert!(schema.root_type(OperationKind::Mutation).is_none());
    }

    #[test]
    fn abstract_types_know_their_members() {
        let schema = SchemaRegistry::from_sdl(SDL, &[]).unwrap();
        assert!(schema.is_possible_type("SearchResult", "Box"));
        assert!(schema.is_possible_type("Node", "Hive"));
        assert!(!schema.is_possible_type("Hive", "Box"));
        assert_eq!(schema.get("JSON").unwrap().kind, TypeKind::Scalar);
    }
}
