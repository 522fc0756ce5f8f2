//! 回写遍历 - 把成功的查询响应归一化写入本地缓存
//!
//! 两阶段：
//! 1. 规划：同步遍历响应树，按声明类型把每个节点归类为 Scalar / Object / List / Opaque，
//!    为每个对象节点生成一步写入（类型名、父记录、浅投影、原始节点）。列表对父引用透明，
//!    进入对象节点后它成为子节点的父记录。
//! 2. 执行：按先序依次调用写钩子。单个钩子失败只记日志，不影响兄弟与祖先。
//!
//! Opaque 节点（如 JSON 标量）整体作为属性保留，不再向内递归。

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::hooks::{HookContext, WriteHookRegistry};
use super::operation::Variables;
use super::type_map::FieldPathTypeMap;
use super::upsert::UpsertEngine;
use crate::error::ApiarySyncError;
use crate::schema::{SchemaRegistry, TypeDescriptor, TypeKind};
use crate::storage::Record;

/// 响应节点的封闭分类
#[derive(Debug)]
pub enum ResponseNode<'v> {
    Scalar(&'v Value),
    Object(&'v Map<String, Value>),
    List(&'v [Value]),
    /// 不透明叶子：内容不做任何归一化
    Opaque(&'v Value),
}

impl<'v> ResponseNode<'v> {
    pub fn classify(value: &'v Value, declared: Option<&TypeDescriptor>) -> Self {
        match declared.map(|t| t.kind) {
            Some(TypeKind::Opaque) => return ResponseNode::Opaque(value),
            Some(kind) if kind.is_leaf() && (value.is_object() || value.is_array()) => {
                return ResponseNode::Opaque(value)
            }
            _ => {}
        }
        match value {
            Value::Array(items) => ResponseNode::List(items),
            Value::Object(map) => ResponseNode::Object(map),
            other => ResponseNode::Scalar(other),
        }
    }
}

/// 一步写入
#[derive(Debug, Clone)]
pub struct WriteStep {
    pub path: String,
    /// 所属根字段的 response key
    pub root: String,
    pub type_name: String,
    pub parent: Option<Record>,
    pub parent_type: Option<String>,
    /// 只含标量 / 不透明属性的浅投影
    pub node: Record,
    pub original: Value,
}

/// 规划结果
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    pub steps: Vec<WriteStep>,
    /// 对象节点解析不到类型的路径
    pub gaps: Vec<String>,
    /// 根字段（response key）→ 求值后的参数
    pub root_arguments: HashMap<String, Variables>,
}

/// 执行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBackReport {
    pub steps: usize,
    pub written: usize,
    /// 没有钩子或投影为空
    pub skipped: usize,
    pub failed: usize,
    pub gaps: usize,
}

/// 父节点：投影后的记录 + 类型名
type Parent = Option<(Record, Option<String>)>;

pub struct WriteBack<'a> {
    schema: &'a SchemaRegistry,
    map: &'a FieldPathTypeMap,
    root_arguments: HashMap<String, Variables>,
}

impl<'a> WriteBack<'a> {
    pub fn new(schema: &'a SchemaRegistry, map: &'a FieldPathTypeMap) -> Self {
        Self {
            schema,
            map,
            root_arguments: HashMap::new(),
        }
    }

    /// 根字段参数，钩子可以从中取得响应里没有出现的外键
    pub fn with_root_arguments(mut self, arguments: HashMap<String, Variables>) -> Self {
        self.root_arguments = arguments;
        self
    }

    /// 规划整棵响应树；根对象本身是 Query 根，不写入
    pub fn plan(&self, data: &Value) -> WritePlan {
        let mut plan = WritePlan {
            root_arguments: self.root_arguments.clone(),
            ..Default::default()
        };
        if let Value::Object(root) = data {
            for (key, value) in root {
                self.visit(key, key, value, &None, &mut plan);
            }
        }
        plan
    }

    fn declared(&self, path: &str) -> Option<&'a TypeDescriptor> {
        self.map
            .type_name(path)
            .and_then(|name| self.schema.get(name))
    }

    fn visit(&self, root: &str, path: &str, value: &Value, parent: &Parent, plan: &mut WritePlan) {
        match ResponseNode::classify(value, self.declared(path)) {
            ResponseNode::Scalar(_) | ResponseNode::Opaque(_) => {}
            ResponseNode::List(items) => {
                for item in items {
                    self.visit(root, path, item, parent, plan);
                }
            }
            ResponseNode::Object(object) => {
                let type_name = self.resolve_type(path, object);
                let node = self.project(path, object);

                match &type_name {
                    Some(type_name) => plan.steps.push(WriteStep {
                        path: path.to_string(),
                        root: root.to_string(),
                        type_name: type_name.clone(),
                        parent: parent.as_ref().map(|(r, _)| r.clone()),
                        parent_type: parent.as_ref().and_then(|(_, t)| t.clone()),
                        node: node.clone(),
                        original: value.clone(),
                    }),
                    None => {
                        debug!("{}", ApiarySyncError::TypeResolutionGap(path.to_string()));
                        if !plan.gaps.iter().any(|g| g == path) {
                            plan.gaps.push(path.to_string());
                        }
                    }
                }

                let next: Parent = Some((node, type_name));
                for (key, child) in object {
                    if child.is_object() || child.is_array() {
                        self.visit(root, &format!("{}.{}", path, key), child, &next, plan);
                    }
                }
            }
        }
    }

    /// `__typename` 优先（能区分 union / interface 的具体成员），其次是路径类型表
    fn resolve_type(&self, path: &str, object: &Map<String, Value>) -> Option<String> {
        if let Some(name) = object.get("__typename").and_then(Value::as_str) {
            if self.schema.get(name).map(|t| t.kind) == Some(TypeKind::Object) {
                return Some(name.to_string());
            }
        }
        // 抽象类型没有 __typename 就无法确定落到哪张表
        self.declared(path)
            .filter(|t| !t.kind.is_abstract())
            .map(|t| t.name.clone())
    }

    /// 浅投影：只保留叶子类型的字段，按 schema 字段名输出（别名还原）
    fn project(&self, path: &str, object: &Map<String, Value>) -> Record {
        let mut out = Record::new();
        for (key, value) in object {
            if key == "__typename" {
                continue;
            }
            let child_path = format!("{}.{}", path, key);
            match self.map.get(&child_path) {
                Some(entry) => {
                    let leaf = self
                        .schema
                        .get(&entry.type_name)
                        .map(|t| t.kind.is_leaf())
                        .unwrap_or(false);
                    if leaf {
                        out.insert(entry.field_name.clone(), value.clone());
                    }
                }
                // 请求里没有描述的字段：只保留非结构化的值
                None if !value.is_object() && !value.is_array() => {
                    out.insert(key.clone(), value.clone());
                }
                None => {}
            }
        }
        out
    }
}

/// 按规划依次执行写钩子
pub async fn execute(
    plan: WritePlan,
    hooks: &WriteHookRegistry,
    upsert: &UpsertEngine,
    debug_mode: bool,
) -> WriteBackReport {
    let mut report = WriteBackReport {
        steps: plan.steps.len(),
        gaps: plan.gaps.len(),
        ..Default::default()
    };

    let no_arguments = Variables::new();
    for step in plan.steps {
        let Some(hook) = hooks.get(&step.type_name) else {
            if debug_mode {
                debug!("类型 {} 没有写钩子，跳过 {}", step.type_name, step.path);
            }
            report.skipped += 1;
            continue;
        };
        if step.node.is_empty() {
            report.skipped += 1;
            continue;
        }

        let payload = Value::Object(step.node.clone());
        let ctx = HookContext {
            upsert,
            type_name: &step.type_name,
            parent_type: step.parent_type.as_deref(),
            original: &step.original,
            path: &step.path,
            root_arguments: plan.root_arguments.get(&step.root).unwrap_or(&no_arguments),
        };
        match hook.write(step.parent.as_ref(), step.node, &ctx).await {
            Ok(()) => {
                if debug_mode {
                    debug!("✅ 写入 {} @ {}", step.type_name, step.path);
                }
                report.written += 1;
            }
            Err(e) => {
                let failure = ApiarySyncError::WriteHookFailure {
                    type_name: step.type_name.clone(),
                    message: e.to_string(),
                };
                warn!("⚠️ {}: path={}, payload={}", failure, step.path, payload);
                report.failed += 1;
            }
        }
    }

    info!(
        "回写完成: steps={}, written={}, skipped={}, failed={}, gaps={}",
        report.steps, report.written, report.skipped, report.failed, report.gaps
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexSpec, LayoutOptions, StorageLayout};
    use crate::storage::{EntityKey, EntityStore, SqliteStore};
    use crate::sync::document::QueryDocument;
    use crate::sync::hooks::{EntityHook, WriteHook};
    use crate::error::{ApiarySyncError, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    const SDL: &str = r#"
        scalar JSON
        type Query { hive(id: ID!): Hive, hives: [Hive], search: [SearchResult] }
        union SearchResult = Hive | Box
        type Hive { id: ID!, name: String, boxes: [Box], meta: JSON }
        type Box { id: ID!, position: Int, color: String, type: String }
    "#;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::from_sdl(SDL, &["JSON".to_string()]).unwrap()
    }

    fn plan_for(query: &str, data: Value) -> WritePlan {
        let schema = schema();
        let doc = QueryDocument::parse(query, None).unwrap();
        let map = FieldPathTypeMap::build(&schema, &doc);
        WriteBack::new(&schema, &map).plan(&data)
    }

    async fn setup() -> (UpsertEngine, WriteHookRegistry) {
        let options = LayoutOptions::default().index("box", IndexSpec::single("hiveId"));
        let layout = StorageLayout::derive(&schema(), &options).unwrap();
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.apply_layout(&layout).await.unwrap();
        let hooks = WriteHookRegistry::new();
        hooks.register("Hive", EntityHook::new("hive"));
        hooks.register("Box", EntityHook::new("box").parent_key("hiveId", "Hive", "id"));
        (UpsertEngine::new(Arc::new(store), Arc::new(layout)), hooks)
    }

    #[test]
    fn classify_nodes() {
        let schema = schema();
        let json_ty = schema.get("JSON");
        assert!(matches!(ResponseNode::classify(&json!({"a": 1}), json_ty), ResponseNode::Opaque(_)));
        assert!(matches!(ResponseNode::classify(&json!([1]), None), ResponseNode::List(_)));
        assert!(matches!(ResponseNode::classify(&json!({}), None), ResponseNode::Object(_)));
        assert!(matches!(ResponseNode::classify(&json!(3), None), ResponseNode::Scalar(_)));
    }

    #[test]
    fn lists_are_transparent_for_parents() {
        let plan = plan_for(
            "{ hive(id: 1) { id name boxes { id color } meta } }",
            json!({"hive": {"id": 1, "name": "A", "meta": {"x": {"id": 9}},
                            "boxes": [{"id": 10, "color": "red"}, {"id": 11, "color": "blue"}]}}),
        );
        assert_eq!(plan.steps.len(), 3);
        let hive = &plan.steps[0];
        assert_eq!(hive.type_name, "Hive");
        assert!(hive.parent.is_none());
        assert_eq!(Value::Object(hive.node.clone()), json!({"id": 1, "name": "A", "meta": {"x": {"id": 9}}}));

        for step in &plan.steps[1..] {
            assert_eq!(step.type_name, "Box");
            assert_eq!(step.parent_type.as_deref(), Some("Hive"));
            assert_eq!(step.parent.as_ref().unwrap()["id"], 1);
        }
        assert!(plan.gaps.is_empty());
    }

    #[test]
    fn aliases_are_restored_and_typename_wins() {
        let plan = plan_for(
            "{ search { __typename ... on Hive { hiveName: name } ... on Box { position } } }",
            json!({"search": [
                {"__typename": "Hive", "hiveName": "A"},
                {"__typename": "Box", "position": 2}
            ]}),
        );
        assert_eq!(plan.steps[0].type_name, "Hive");
        assert_eq!(Value::Object(plan.steps[0].node.clone()), json!({"name": "A"}));
        assert_eq!(plan.steps[1].type_name, "Box");
    }

    #[test]
    fn union_without_typename_is_a_gap() {
        let plan = plan_for("{ search { ... on Box { position } } }", json!({"search": [{"position": 2}]}));
        assert!(plan.steps.is_empty());
        assert_eq!(plan.gaps, vec!["search".to_string()]);
    }

    #[test]
    fn steps_remember_their_root_field() {
        let schema = schema();
        let doc = QueryDocument::parse("{ first: hive(id: 1) { id } second: hive(id: 2) { id } }", None).unwrap();
        let map = FieldPathTypeMap::build(&schema, &doc);
        let plan = WriteBack::new(&schema, &map)
            .with_root_arguments(doc.root_arguments(&Variables::new()))
            .plan(&json!({"first": {"id": 1}, "second": {"id": 2}}));

        let roots: Vec<_> = plan.steps.iter().map(|s| s.root.as_str()).collect();
        assert_eq!(roots, vec!["first", "second"]);
        assert_eq!(plan.root_arguments["second"]["id"], json!(2));
    }

    #[test]
    fn unknown_objects_are_gaps_but_children_are_visited() {
        let plan = plan_for(
            "{ hive(id: 1) { id legacy { boxes { id } } } }",
            json!({"hive": {"id": 1, "legacy": {"__typename": "Nope", "boxes": [{"__typename": "Box", "id": 3}]}}}),
        );
        assert_eq!(plan.gaps, vec!["hive.legacy".to_string()]);
        let types: Vec<_> = plan.steps.iter().map(|s| s.type_name.as_str()).collect();
        assert_eq!(types, vec!["Hive", "Box"]);
    }

    struct FailingHook;

    #[async_trait]
    impl WriteHook for FailingHook {
        async fn write(&self, _parent: Option<&Record>, _node: Record, _ctx: &HookContext<'_>) -> Result<()> {
            Err(ApiarySyncError::Database("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn writes_entities_with_parent_keys() {
        let (engine, hooks) = setup().await;
        let schema = schema();
        let doc = QueryDocument::parse("{ hive(id: 1) { id name boxes { id position color type } } }", None).unwrap();
        let map = FieldPathTypeMap::build(&schema, &doc);
        let data = json!({"hive": {"id": 1, "name": "A", "boxes": [
            {"id": 10, "position": 0, "color": "red", "type": "DEEP"}
        ]}});

        let report = execute(WriteBack::new(&schema, &map).plan(&data), &hooks, &engine, true).await;
        assert_eq!(report.written, 2);

        let store = engine.store();
        let hive = store.get("hive", &EntityKey::Int(1)).await.unwrap().unwrap();
        assert_eq!(Value::Object(hive), json!({"id": 1, "name": "A"}));
        let b = store.get("box", &EntityKey::Int(10)).await.unwrap().unwrap();
        assert_eq!(
            Value::Object(b),
            json!({"id": 10, "hiveId": 1, "position": 0, "color": "red", "type": "DEEP"})
        );
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_siblings() {
        let (engine, hooks) = setup().await;
        hooks.register("Hive", FailingHook);
        let schema = schema();
        let doc = QueryDocument::parse("{ hives { id boxes { id } } }", None).unwrap();
        let map = FieldPathTypeMap::build(&schema, &doc);
        let data = json!({"hives": [
            {"id": 1, "boxes": [{"id": 10}]},
            {"id": 2, "boxes": [{"id": 20}, {}]}
        ]});

        let report = execute(WriteBack::new(&schema, &map).plan(&data), &hooks, &engine, false).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(engine.store().all("box").await.unwrap().len(), 2);
        assert!(engine.store().all("hive").await.unwrap().is_empty());
    }
}
