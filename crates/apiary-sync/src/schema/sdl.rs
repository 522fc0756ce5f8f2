//! SDL → TypeDescriptor

use async_graphql_parser::parse_schema;
use async_graphql_parser::types::{
    BaseType, FieldDefinition, InputValueDefinition, Type, TypeKind as AstTypeKind,
    TypeSystemDefinition,
};
use async_graphql_parser::Positioned;
use std::collections::HashMap;
use tracing::debug;

use super::{FieldDescriptor, SchemaRegistry, TypeDescriptor, TypeKind, TypeRef};
use crate::error::{ApiarySyncError, Result};

pub(super) fn build_registry(sdl: &str, opaque_scalars: &[String]) -> Result<SchemaRegistry> {
    let document =
        parse_schema(sdl).map_err(|e| ApiarySyncError::SchemaParse(e.to_string()))?;

    let mut declared: Vec<TypeDescriptor> = Vec::new();
    let mut query_type = None;
    let mut mutation_type = None;
    let mut subscription_type = None;
    // (interface, 实现类型)
    let mut implementations: Vec<(String, String)> = Vec::new();

    for definition in document.definitions {
        match definition {
            TypeSystemDefinition::Schema(schema) => {
                let schema = schema.node;
                if let Some(q) = schema.query {
                    query_type = Some(q.node.to_string());
                }
                if let Some(m) = schema.mutation {
                    mutation_type = Some(m.node.to_string());
                }
                if let Some(s) = schema.subscription {
                    subscription_type = Some(s.node.to_string());
                }
            }
            TypeSystemDefinition::Type(ty) => {
                let ty = ty.node;
                let name = ty.name.node.to_string();
                let mut desc = match ty.kind {
                    AstTypeKind::Scalar => {
                        let kind = if opaque_scalars.iter().any(|s| *s == name) {
                            TypeKind::Opaque
                        } else {
                            TypeKind::Scalar
                        };
                        TypeDescriptor::new(name.clone(), kind)
                    }
                    AstTypeKind::Object(object) => {
                        for iface in &object.implements {
                            implementations.push((iface.node.to_string(), name.clone()));
                        }
                        let mut d = TypeDescriptor::new(name.clone(), TypeKind::Object);
                        d.fields = output_fields(&object.fields);
                        d
                    }
                    AstTypeKind::Interface(iface) => {
                        for parent in &iface.implements {
                            implementations.push((parent.node.to_string(), name.clone()));
                        }
                        let mut d = TypeDescriptor::new(name.clone(), TypeKind::Interface);
                        d.fields = output_fields(&iface.fields);
                        d
                    }
                    AstTypeKind::Union(union) => {
                        let mut d = TypeDescriptor::new(name.clone(), TypeKind::Union);
                        d.possible_types =
                            union.members.iter().map(|m| m.node.to_string()).collect();
                        d
                    }
                    AstTypeKind::Enum(_) => TypeDescriptor::new(name.clone(), TypeKind::Enum),
                    AstTypeKind::InputObject(input) => {
                        let mut d = TypeDescriptor::new(name.clone(), TypeKind::InputObject);
                        d.fields = input_fields(&input.fields);
                        d
                    }
                };

                // extend type：把字段追加到已声明的类型上
                if ty.extend {
                    if let Some(existing) = declared.iter_mut().find(|d| d.name == name) {
                        existing.fields.append(&mut desc.fields);
                        existing.possible_types.append(&mut desc.possible_types);
                        continue;
                    }
                }
                declared.push(desc);
            }
            TypeSystemDefinition::Directive(_) => {}
        }
    }

    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (i, d) in declared.iter().enumerate() {
        by_name.insert(d.name.clone(), i);
    }
    for (iface, implementor) in implementations {
        if let Some(&i) = by_name.get(&iface) {
            if !declared[i].possible_types.contains(&implementor) {
                declared[i].possible_types.push(implementor);
            }
        }
    }

    debug!("schema 解析完成: {} 个类型", declared.len());

    Ok(SchemaRegistry::from_parts(
        declared,
        query_type.unwrap_or_else(|| "Query".to_string()),
        mutation_type.or_else(|| by_name.contains_key("Mutation").then(|| "Mutation".to_string())),
        subscription_type.or_else(|| {
            by_name
                .contains_key("Subscription")
                .then(|| "Subscription".to_string())
        }),
    ))
}

fn output_fields(fields: &[Positioned<FieldDefinition>]) -> Vec<FieldDescriptor> {
    fields
        .iter()
        .map(|f| FieldDescriptor {
            name: f.node.name.node.to_string(),
            ty: type_ref(&f.node.ty.node),
        })
        .collect()
}

fn input_fields(fields: &[Positioned<InputValueDefinition>]) -> Vec<FieldDescriptor> {
    fields
        .iter()
        .map(|f| FieldDescriptor {
            name: f.node.name.node.to_string(),
            ty: type_ref(&f.node.ty.node),
        })
        .collect()
}

fn type_ref(ty: &Type) -> TypeRef {
    match &ty.base {
        BaseType::Named(name) => TypeRef {
            named: name.to_string(),
            list: false,
            non_null: !ty.nullable,
        },
        BaseType::List(inner) => {
            let mut r = type_ref(inner);
            r.list = true;
            r.non_null = !ty.nullable;
            r
        }
    }
}
