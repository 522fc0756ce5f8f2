//! 命名的级联删除 - 缓存行只在这里被删除
//!
//! 父子关系在写入时被反范式化为子记录上的外键，这里沿外键自下而上删除。

use tracing::info;

use crate::error::Result;
use crate::storage::{EntityKey, EntityStore, Record};
use crate::sync::UpsertEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub apiaries: usize,
    pub hives: usize,
    pub boxes: usize,
    pub frames: usize,
    pub frame_sides: usize,
    pub families: usize,
    pub inspections: usize,
}

async fn child_keys(
    engine: &UpsertEngine,
    table: &str,
    foreign_key: &str,
    parents: &[EntityKey],
) -> Result<Vec<EntityKey>> {
    let mut keys = Vec::new();
    for parent in parents {
        let rows: Vec<Record> = engine
            .store()
            .find_by(table, foreign_key, &parent.to_json())
            .await?;
        keys.extend(rows.iter().filter_map(|r| r.get("id").and_then(EntityKey::from_value)));
    }
    Ok(keys)
}

/// 删除蜂箱及其下的箱体、框、框面、蜂群与检查记录
pub async fn delete_hive_cascade(engine: &UpsertEngine, hive_ids: &[EntityKey]) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();
    if hive_ids.is_empty() {
        return Ok(report);
    }

    let box_ids = child_keys(engine, "box", "hiveId", hive_ids).await?;
    let frame_ids = child_keys(engine, "frame", "boxId", &box_ids).await?;

    report.frame_sides = engine.delete_by_parent("frameside", "frameId", &frame_ids).await?;
    report.frames = engine.delete_by_parent("frame", "boxId", &box_ids).await?;
    report.boxes = engine.delete_by_parent("box", "hiveId", hive_ids).await?;
    report.families = engine.delete_by_parent("family", "hiveId", hive_ids).await?;
    report.inspections = engine.delete_by_parent("inspection", "hiveId", hive_ids).await?;
    for key in hive_ids {
        if engine.store().delete("hive", key).await? {
            report.hives += 1;
        }
    }

    info!("🗑️ 级联删除蜂箱 {:?}: {:?}", hive_ids, report);
    Ok(report)
}

/// 删除蜂场及其下全部蜂箱
pub async fn delete_apiary_cascade(
    engine: &UpsertEngine,
    apiary_ids: &[EntityKey],
) -> Result<CascadeReport> {
    let hive_ids = child_keys(engine, "hive", "apiaryId", apiary_ids).await?;
    let mut report = delete_hive_cascade(engine, &hive_ids).await?;
    for key in apiary_ids {
        if engine.store().delete("apiary", key).await? {
            report.apiaries += 1;
        }
    }
    Ok(report)
}
