//! 蜂场领域的本地解析器 - 只读本地缓存，按调用方期望的嵌套形状重新组装
//!
//! hive → boxes（按 position）→ frames（按 position）→ leftSide / rightSide，外加 family。

use serde_json::Value;
use std::cmp::Ordering;

use crate::error::Result;
use crate::storage::{EntityKey, Record};
use crate::sync::{LocalResolverSet, ResolverArgs, ResolverContext};

pub fn default_resolvers() -> LocalResolverSet {
    let set = LocalResolverSet::new();
    set.register_fn("apiaries", apiaries);
    set.register_fn("apiary", apiary);
    set.register_fn("hive", hive);
    set.register_fn("hiveFrame", hive_frame);
    set.register_fn("hiveFrameSide", hive_frame_side);
    set.register_fn("hiveFrameSideFile", hive_frame_side_file);
    set.register_fn("inspections", inspections);
    set.register_fn("inspection", inspection);
    set.register_fn("user", user);
    set.register_fn("locales", locales);
    set
}

fn record_key(record: &Record, field: &str) -> Option<EntityKey> {
    record.get(field).and_then(EntityKey::from_value)
}

fn list(records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(Value::Object).collect())
}

fn or_null(record: Option<Record>) -> Value {
    record.map(Value::Object).unwrap_or(Value::Null)
}

/// position 升序，缺失的排最后；相同时按 id
fn sort_by_position(records: &mut [Record]) {
    let position = |r: &Record| r.get("position").and_then(Value::as_f64);
    let id = |r: &Record| r.get("id").and_then(Value::as_i64);
    records.sort_by(|a, b| {
        let by_position = match (position(a), position(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_position.then_with(|| id(a).cmp(&id(b)))
    });
}

async fn attach_sides(ctx: &ResolverContext, mut frame: Record) -> Result<Record> {
    for (attr, field) in [("leftId", "leftSide"), ("rightId", "rightSide")] {
        let side = match record_key(&frame, attr) {
            Some(key) => ctx.get("frameside", &key).await?,
            None => None,
        };
        frame.insert(field.to_string(), or_null(side));
    }
    Ok(frame)
}

async fn attach_frames(ctx: &ResolverContext, mut b: Record) -> Result<Record> {
    let mut frames = match record_key(&b, "id") {
        Some(key) => ctx.find_by("frame", "boxId", &key).await?,
        None => Vec::new(),
    };
    sort_by_position(&mut frames);
    let mut assembled = Vec::with_capacity(frames.len());
    for frame in frames {
        assembled.push(attach_sides(ctx, frame).await?);
    }
    b.insert("frames".to_string(), list(assembled));
    Ok(b)
}

async fn assemble_hive(ctx: &ResolverContext, mut hive: Record) -> Result<Record> {
    let Some(key) = record_key(&hive, "id") else {
        return Ok(hive);
    };

    let mut boxes = ctx.find_by("box", "hiveId", &key).await?;
    sort_by_position(&mut boxes);
    let mut assembled = Vec::with_capacity(boxes.len());
    for b in boxes {
        assembled.push(attach_frames(ctx, b).await?);
    }
    hive.insert("boxes".to_string(), list(assembled));

    // familyId 为 null 表示蜂群已被清空，不再按 hiveId 兜底
    let family = match hive.get("familyId") {
        Some(Value::Null) => None,
        Some(_) => match record_key(&hive, "familyId") {
            Some(family_key) => ctx.get("family", &family_key).await?,
            None => None,
        },
        None => ctx.find_by("family", "hiveId", &key).await?.into_iter().next(),
    };
    hive.insert("family".to_string(), or_null(family));
    Ok(hive)
}

async fn hives_of(ctx: &ResolverContext, apiary: &Record) -> Result<Vec<Record>> {
    let Some(key) = record_key(apiary, "id") else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for hive in ctx.find_by("hive", "apiaryId", &key).await? {
        out.push(assemble_hive(ctx, hive).await?);
    }
    Ok(out)
}

async fn apiaries(_args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    let mut out = Vec::new();
    for mut apiary in ctx.all("apiary").await? {
        let hives = hives_of(&ctx, &apiary).await?;
        apiary.insert("hives".to_string(), list(hives));
        out.push(apiary);
    }
    Ok(list(out))
}

async fn apiary(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    let Some(mut apiary) = ctx.get("apiary", &args.key("id")?).await? else {
        return Ok(Value::Null);
    };
    let hives = hives_of(&ctx, &apiary).await?;
    apiary.insert("hives".to_string(), list(hives));
    Ok(Value::Object(apiary))
}

async fn hive(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    match ctx.get("hive", &args.key("id")?).await? {
        Some(hive) => Ok(Value::Object(assemble_hive(&ctx, hive).await?)),
        None => Ok(Value::Null),
    }
}

async fn hive_frame(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    match ctx.get("frame", &args.key("id")?).await? {
        Some(frame) => Ok(Value::Object(attach_sides(&ctx, frame).await?)),
        None => Ok(Value::Null),
    }
}

async fn hive_frame_side(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    Ok(or_null(ctx.get("frameside", &args.key("id")?).await?))
}

async fn hive_frame_side_file(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    let Some(mut side_file) = ctx
        .get("frame_side_files", &args.key("frameSideId")?)
        .await?
    else {
        return Ok(Value::Null);
    };
    let file = match record_key(&side_file, "fileId") {
        Some(key) => ctx.get("files", &key).await?,
        None => None,
    };
    let file = match file {
        Some(mut file) => {
            let resizes = match record_key(&file, "id") {
                Some(key) => ctx.find_by("fileresize", "file_id", &key).await?,
                None => Vec::new(),
            };
            file.insert("resizes".to_string(), list(resizes));
            Some(file)
        }
        None => None,
    };
    side_file.insert("file".to_string(), or_null(file));
    Ok(Value::Object(side_file))
}

/// 最新的在前
async fn inspections(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    let mut rows = ctx.find_by("inspection", "hiveId", &args.key("hiveId")?).await?;
    rows.reverse();
    if let Some(limit) = args.limit("limit") {
        rows.truncate(limit);
    }
    Ok(list(rows))
}

async fn inspection(args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    Ok(or_null(ctx.get("inspection", &args.key("inspectionId")?).await?))
}

async fn user(_args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    Ok(or_null(ctx.all("user").await?.into_iter().next()))
}

async fn locales(_args: ResolverArgs, ctx: ResolverContext) -> Result<Value> {
    Ok(list(ctx.all("locale").await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positions_sort_with_missing_last() {
        let mut rows: Vec<Record> = [
            json!({"id": 3, "position": 2}),
            json!({"id": 1}),
            json!({"id": 2, "position": 0}),
            json!({"id": 4, "position": 0}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        sort_by_position(&mut rows);
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn every_query_field_has_a_resolver() {
        let set = default_resolvers();
        let schema = crate::schema::SchemaRegistry::from_sdl(super::super::SCHEMA, &["JSON".to_string()])
            .unwrap();
        let query = schema.root_type(crate::sync::OperationKind::Query).unwrap();
        for field in query.field_names() {
            assert!(set.get(field).is_some(), "缺少本地解析器: {}", field);
        }
    }
}
