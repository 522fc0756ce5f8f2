//! Field-Path Type Resolver
//!
//! 深度优先遍历查询文档里被选中的字段，用祖先路径栈拼出路径键（以 response key
//! 即别名优先），用“当前类型”跟踪器在下降时进入子类型、回溯时恢复父类型。
//! 只读请求的形状，不看响应；解析不到类型的字段记为缺口，不报错。

use async_graphql_parser::types::{Selection, SelectionSet};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::document::QueryDocument;
use crate::schema::{SchemaRegistry, TypeDescriptor};

/// 路径上的字段：schema 字段名 + 声明的命名类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPathEntry {
    pub path: String,
    pub field_name: String,
    pub type_name: String,
}

/// 按路径排序的字段类型表，每次查询新建，用完即弃
#[derive(Debug, Clone, Default)]
pub struct FieldPathTypeMap {
    entries: Vec<FieldPathEntry>,
    index: HashMap<String, usize>,
    gaps: Vec<String>,
}

impl FieldPathTypeMap {
    pub fn build(schema: &SchemaRegistry, document: &QueryDocument) -> Self {
        let mut map = FieldPathTypeMap::default();
        let Some(root) = schema.root_type_name(document.kind()) else {
            warn!("schema 没有 {:?} 根类型，类型表为空", document.kind());
            return map;
        };

        let mut walker = Walker {
            schema,
            document,
            path: Vec::new(),
            tracker: TypeTracker::new(root),
            visiting: Vec::new(),
            map: &mut map,
        };
        walker.visit(document.selection_set());

        debug!(
            "类型表构建完成: {} 条, {} 个缺口",
            map.entries.len(),
            map.gaps.len()
        );
        map
    }

    pub fn get(&self, path: &str) -> Option<&FieldPathEntry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    pub fn type_name(&self, path: &str) -> Option<&str> {
        self.get(path).map(|e| e.type_name.as_str())
    }

    /// 按首次出现顺序
    pub fn entries(&self) -> &[FieldPathEntry] {
        &self.entries
    }

    /// 解析不到类型的路径
    pub fn gaps(&self) -> &[String] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: FieldPathEntry) {
        // 同一路径出现多次（片段重复选择 / 不同 union 分支）时第一次为准
        if self.index.contains_key(&entry.path) {
            return;
        }
        self.index.insert(entry.path.clone(), self.entries.len());
        self.entries.push(entry);
    }

    fn gap(&mut self, path: String) {
        if !self.gaps.contains(&path) {
            self.gaps.push(path);
        }
    }
}

/// 当前类型跟踪器：None 表示已经走出 schema 能描述的范围
struct TypeTracker {
    stack: Vec<Option<String>>,
}

impl TypeTracker {
    fn new(root: &str) -> Self {
        Self {
            stack: vec![Some(root.to_string())],
        }
    }

    fn enter(&mut self, type_name: Option<&str>) {
        self.stack.push(type_name.map(String::from));
    }

    fn leave(&mut self) {
        self.stack.pop();
    }

    fn current<'s>(&self, schema: &'s SchemaRegistry) -> Option<&'s TypeDescriptor> {
        self.stack
            .last()
            .and_then(|t| t.as_deref())
            .and_then(|t| schema.get(t))
    }
}

struct Walker<'a> {
    schema: &'a SchemaRegistry,
    document: &'a QueryDocument,
    path: Vec<String>,
    tracker: TypeTracker,
    visiting: Vec<String>,
    map: &'a mut FieldPathTypeMap,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, set: &'a SelectionSet) {
        for item in &set.items {
            match &item.node {
                Selection::Field(field) => {
                    let field = &field.node;
                    let name = field.name.node.as_str();
                    if name.starts_with("__") {
                        continue;
                    }
                    self.path.push(field.response_key().node.to_string());
                    let path = self.path.join(".");

                    let declared = self
                        .tracker
                        .current(self.schema)
                        .and_then(|parent| self.schema.field_type(parent, name));
                    match declared {
                        Some(ty) => self.map.insert(FieldPathEntry {
                            path: path.clone(),
                            field_name: name.to_string(),
                            type_name: ty.name.clone(),
                        }),
                        None => {
                            debug!("类型缺口: {}", path);
                            self.map.gap(path);
                        }
                    }

                    if !field.selection_set.node.items.is_empty() {
                        self.tracker.enter(declared.map(|t| t.name.as_str()));
                        self.visit(&field.selection_set.node);
                        self.tracker.leave();
                    }
                    self.path.pop();
                }
                Selection::InlineFragment(fragment) => {
                    let fragment = &fragment.node;
                    match &fragment.type_condition {
                        Some(condition) => {
                            self.tracker.enter(Some(condition.node.on.node.as_str()));
                            self.visit(&fragment.selection_set.node);
                            self.tracker.leave();
                        }
                        None => self.visit(&fragment.selection_set.node),
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    let Some(fragment) = self.document.fragment(name) else {
                        warn!("片段未定义: {}", name);
                        continue;
                    };
                    if self.visiting.iter().any(|v| v == name) {
                        continue;
                    }
                    self.visiting.push(name.to_string());
                    self.tracker
                        .enter(Some(fragment.type_condition.node.on.node.as_str()));
                    self.visit(&fragment.selection_set.node);
                    self.tracker.leave();
                    self.visiting.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        scalar JSON
        type Query { hive(id: ID!): Hive, search: [SearchResult], inspections(hiveId: ID!): [Inspection] }
        union SearchResult = Hive | Box
        type Hive { id: ID!, name: String, boxes: [Box], family: Family }
        type Box { id: ID!, position: Int, color: String, frames: [Frame] }
        type Frame { id: ID!, position: Int }
        type Family { id: ID!, race: String }
        type Inspection { id: ID!, data: JSON }
    "#;

    fn build(query: &str) -> FieldPathTypeMap {
        let schema = SchemaRegistry::from_sdl(SDL, &["JSON".to_string()]).unwrap();
        let doc = QueryDocument::parse(query, None).unwrap();
        FieldPathTypeMap::build(&schema, &doc)
    }

    #[test]
    fn one_entry_per_selected_field() {
        let map = build("{ hive(id: 1) { id name boxes { id frames { id position } } family { race } } }");
        let paths: Vec<_> = map.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "hive",
                "hive.id",
                "hive.name",
                "hive.boxes",
                "hive.boxes.id",
                "hive.boxes.frames",
                "hive.boxes.frames.id",
                "hive.boxes.frames.position",
                "hive.family",
                "hive.family.race",
            ]
        );
        assert_eq!(map.type_name("hive"), Some("Hive"));
        assert_eq!(map.type_name("hive.boxes"), Some("Box"));
        assert_eq!(map.type_name("hive.boxes.frames"), Some("Frame"));
        assert_eq!(map.type_name("hive.boxes.frames.position"), Some("Int"));
        assert_eq!(map.type_name("hive.family"), Some("Family"));
        assert!(map.gaps().is_empty());
    }

    #[test]
    fn tracker_restores_parent_after_descent() {
        // boxes 之后的 name 必须按 Hive 解析，而不是 Box
        let map = build("{ hive(id: 1) { boxes { color } name } }");
        assert_eq!(map.type_name("hive.name"), Some("String"));
        assert_eq!(map.type_name("hive.boxes.color"), Some("String"));
    }

    #[test]
    fn aliases_and_meta_fields() {
        let map = build("{ h: hive(id: 1) { __typename key: id } }");
        let entry = map.get("h").unwrap();
        assert_eq!(entry.field_name, "hive");
        assert_eq!(entry.type_name, "Hive");
        assert_eq!(map.get("h.key").unwrap().field_name, "id");
        assert!(map.get("h.__typename").is_none());
    }

    #[test]
    fn union_branches_and_named_fragments() {
        let map = build(
            r#"
            { search { ... on Hive { name boxes { id } } ...BoxParts } }
            fragment BoxParts on Box { position }
            "#,
        );
        assert_eq!(map.type_name("search"), Some("SearchResult"));
        assert_eq!(map.type_name("search.name"), Some("String"));
        assert_eq!(map.type_name("search.boxes"), Some("Box"));
        assert_eq!(map.type_name("search.position"), Some("Int"));
    }

    #[test]
    fn unknown_fields_are_gaps() {
        let map = build("{ hive(id: 1) { id legacy { id } } inspections(hiveId: 1) { data } }");
        assert_eq!(map.gaps(), &["hive.legacy".to_string(), "hive.legacy.id".to_string()]);
        assert_eq!(map.type_name("inspections.data"), Some("JSON"));
        assert_eq!(map.type_name("hive.id"), Some("ID"));
    }

    #[test]
    fn recursive_fragments_terminate() {
        let map = build(
            r#"
            { hive(id: 1) { ...A } }
            fragment A on Hive { id ...B }
            fragment B on Hive { name ...A }
            "#,
        );
        assert_eq!(map.len(), 3);
    }
}
