//! 存储表布局 - 由 schema 推导，每个非根对象类型一张表
//!
//! 规则：
//! - 跳过根操作类型（Query / Mutation / Subscription）与错误类型
//! - 字段 `id` 为主键；没有 `id` 时第一个声明的字段作为唯一键
//! - 二级 / 复合索引来自手工维护的索引表（父外键、(父, position) 排序）
//! - 少数类型通过别名表映射到其他表名，避免冲突

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::{SchemaRegistry, TypeKind};
use crate::error::{ApiarySyncError, Result};

/// 二级索引（多个字段即复合索引）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn single(field: &str) -> Self {
        Self {
            fields: vec![field.to_string()],
        }
    }

    pub fn compound(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// 索引在存储引擎中的名字
    pub fn index_name(&self, table: &str) -> String {
        format!("idx_{}__{}", table, self.fields.join("_"))
    }
}

/// 单张表的布局
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub type_name: String,
    pub primary_key: String,
    /// 主键不是 `id`，而是强制唯一的第一个字段
    pub key_from_first_field: bool,
    pub fields: Vec<String>,
    pub indexes: Vec<IndexSpec>,
}

/// 布局推导选项（别名表、索引表、排除类型）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutOptions {
    /// 类型名 → 表名
    pub table_aliases: BTreeMap<String, String>,
    /// 表名 → 二级索引
    pub secondary_indexes: BTreeMap<String, Vec<IndexSpec>>,
    /// 额外排除的类型
    pub excluded_types: Vec<String>,
    /// 以此结尾的类型视为错误类型，不建表
    pub error_type_suffix: String,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            table_aliases: BTreeMap::new(),
            secondary_indexes: BTreeMap::new(),
            excluded_types: Vec::new(),
            error_type_suffix: "Error".to_string(),
        }
    }
}

impl LayoutOptions {
    pub fn alias(mut self, type_name: &str, table: &str) -> Self {
        self.table_aliases
            .insert(type_name.to_string(), table.to_string());
        self
    }

    pub fn index(mut self, table: &str, index: IndexSpec) -> Self {
        self.secondary_indexes
            .entry(table.to_string())
            .or_default()
            .push(index);
        self
    }

    pub fn table_name(&self, type_name: &str) -> String {
        self.table_aliases
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| type_name.to_lowercase())
    }

    fn is_excluded(&self, type_name: &str) -> bool {
        self.excluded_types.iter().any(|t| t == type_name)
            || (!self.error_type_suffix.is_empty() && type_name.ends_with(&self.error_type_suffix))
    }
}

/// 布局变化程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayoutChange {
    Unchanged,
    /// 只新增表 / 索引 / 字段
    Additive,
    /// 主键变化、删表、删索引、删字段
    Breaking,
}

/// 新布局相对已应用布局的差异
#[derive(Debug, Clone, Default)]
pub struct LayoutDiff {
    pub create: Vec<TableSpec>,
    /// 主键变化，需要删表重建（缓存数据可丢弃）
    pub rebuild: Vec<TableSpec>,
    pub drop: Vec<String>,
    pub add_indexes: Vec<(String, IndexSpec)>,
    pub drop_indexes: Vec<(String, IndexSpec)>,
    /// 只需要改写 sync_layout 记录的表
    pub updated: Vec<TableSpec>,
    pub change: Option<LayoutChange>,
}

impl LayoutDiff {
    pub fn change(&self) -> LayoutChange {
        self.change.unwrap_or(LayoutChange::Unchanged)
    }

    fn mark(&mut self, change: LayoutChange) {
        self.change = Some(self.change().max(change));
    }
}

/// 完整的存储布局
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageLayout {
    tables: BTreeMap<String, TableSpec>,
    by_type: HashMap<String, String>,
}

impl StorageLayout {
    /// 由 schema 推导布局；两个类型映射到同一张表时报错
    pub fn derive(schema: &SchemaRegistry, options: &LayoutOptions) -> Result<Self> {
        let mut layout = StorageLayout::default();

        for ty in schema.types() {
            if ty.kind != TypeKind::Object
                || schema.is_root_type(&ty.name)
                || options.is_excluded(&ty.name)
            {
                continue;
            }
            let Some(first) = ty.fields.first() else {
                warn!("类型 {} 没有字段，跳过建表", ty.name);
                continue;
            };

            let name = options.table_name(&ty.name);
            if let Some(other) = layout.tables.get(&name) {
                return Err(ApiarySyncError::SchemaProvision(format!(
                    "类型 {} 与 {} 映射到同一张表 {}，请在别名表中区分",
                    ty.name, other.type_name, name
                )));
            }

            let has_id = ty.field("id").is_some();
            let spec = TableSpec {
                name: name.clone(),
                type_name: ty.name.clone(),
                primary_key: if has_id { "id".to_string() } else { first.name.clone() },
                key_from_first_field: !has_id,
                fields: ty.field_names().map(String::from).collect(),
                indexes: options
                    .secondary_indexes
                    .get(&name)
                    .cloned()
                    .unwrap_or_default(),
            };
            layout.by_type.insert(ty.name.clone(), name.clone());
            layout.tables.insert(name, spec);
        }

        for table in options.secondary_indexes.keys() {
            if !layout.tables.contains_key(table) {
                warn!("索引表引用了不存在的表: {}", table);
            }
        }

        Ok(layout)
    }

    pub fn from_tables(tables: impl IntoIterator<Item = TableSpec>) -> Self {
        let mut layout = StorageLayout::default();
        for t in tables {
            layout.by_type.insert(t.type_name.clone(), t.name.clone());
            layout.tables.insert(t.name.clone(), t);
        }
        layout
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    pub fn table_for_type(&self, type_name: &str) -> Option<&TableSpec> {
        self.by_type.get(type_name).and_then(|t| self.tables.get(t))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// 与已应用布局比较
    pub fn diff(&self, applied: &BTreeMap<String, TableSpec>) -> LayoutDiff {
        let mut diff = LayoutDiff::default();

        for (name, table) in &self.tables {
            let Some(old) = applied.get(name) else {
                diff.create.push(table.clone());
                diff.mark(LayoutChange::Additive);
                continue;
            };
            if old.primary_key != table.primary_key {
                diff.rebuild.push(table.clone());
                diff.mark(LayoutChange::Breaking);
                continue;
            }
            for index in &table.indexes {
                if !old.indexes.contains(index) {
                    diff.add_indexes.push((name.clone(), index.clone()));
                    diff.mark(LayoutChange::Additive);
                }
            }
            for index in &old.indexes {
                if !table.indexes.contains(index) {
                    diff.drop_indexes.push((name.clone(), index.clone()));
                    diff.mark(LayoutChange::Breaking);
                }
            }
            if old.fields != table.fields || old.type_name != table.type_name {
                let removed = old.fields.iter().any(|f| !table.fields.contains(f));
                diff.mark(if removed || old.type_name != table.type_name {
                    LayoutChange::Breaking
                } else {
                    LayoutChange::Additive
                });
            }
            if old != table {
                diff.updated.push(table.clone());
            }
        }

        for name in applied.keys() {
            if !self.tables.contains_key(name) {
                diff.drop.push(name.clone());
                diff.mark(LayoutChange::Breaking);
            }
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query { hive(id: ID!): Hive }
        type Mutation { addHive: AddHiveResult }
        type Error { code: String }
        type ValidationError { field: String }
        union AddHiveResult = Hive | Error
        type Hive { id: ID!, name: String, boxes: [Box] }
        type Box { id: ID!, position: Int, color: String, type: String }
        type Locale { key: String!, en: String }
        type File { id: ID!, url: String }
    "#;

    fn options() -> LayoutOptions {
        LayoutOptions::default()
            .alias("File", "files")
            .index("box", IndexSpec::single("hiveId"))
            .index("box", IndexSpec::compound(&["hiveId", "position"]))
    }

    fn layout() -> StorageLayout {
        let schema = SchemaRegistry::from_sdl(SDL, &[]).unwrap();
        StorageLayout::derive(&schema, &options()).unwrap()
    }

    #[test]
    fn roots_and_error_types_have_no_table() {
        let layout = layout();
        assert_eq!(layout.table_names(), vec!["box", "files", "hive", "locale"]);
    }

    #[test]
    fn id_is_primary_key_otherwise_first_field() {
        let layout = layout();
        let hive = layout.table("hive").unwrap();
        assert_eq!(hive.primary_key, "id");
        assert!(!hive.key_from_first_field);

        let locale = layout.table("locale").unwrap();
        assert_eq!(locale.primary_key, "key");
        assert!(locale.key_from_first_field);
    }

    #[test]
    fn aliases_and_indexes_are_applied() {
        let layout = layout();
        assert_eq!(layout.table_for_type("File").unwrap().name, "files");
        let boxes = layout.table_for_type("Box").unwrap();
        assert_eq!(boxes.indexes.len(), 2);
        assert_eq!(boxes.indexes[1].index_name("box"), "idx_box__hiveId_position");
    }

    #[test]
    fn alias_collision_is_rejected() {
        let schema = SchemaRegistry::from_sdl(SDL, &[]).unwrap();
        let opts = options().alias("Locale", "hive");
        assert!(matches!(
            StorageLayout::derive(&schema, &opts),
            Err(ApiarySyncError::SchemaProvision(_))
        ));
    }

    #[test]
    fn diff_classifies_changes() {
        let layout = layout();
        let applied: BTreeMap<String, TableSpec> = layout
            .tables()
            .map(|t| (t.name.clone(), t.clone()))
            .collect();
        assert_eq!(layout.diff(&applied).change(), LayoutChange::Unchanged);

        // 少一张表 => 新布局为新增
        let mut partial = applied.clone();
        partial.remove("locale");
        let diff = layout.diff(&partial);
        assert_eq!(diff.change(), LayoutChange::Additive);
        assert_eq!(diff.create.len(), 1);

        // 多一张表 / 主键变化 => 破坏性
        let mut extra = applied.clone();
        let mut legacy = applied["hive"].clone();
        legacy.name = "legacy".into();
        extra.insert("legacy".into(), legacy);
        let mut hive = applied["hive"].clone();
        hive.primary_key = "name".into();
        extra.insert("hive".into(), hive);
        let diff = layout.diff(&extra);
        assert_eq!(diff.change(), LayoutChange::Breaking);
        assert_eq!(diff.drop, vec!["legacy".to_string()]);
        assert_eq!(diff.rebuild.len(), 1);
    }
}
