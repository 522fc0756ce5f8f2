//! 蜂场领域的写钩子

use crate::sync::{EntityHook, WriteHookRegistry};

/// 每张表一个钩子
pub fn default_hooks() -> WriteHookRegistry {
    let registry = WriteHookRegistry::new();

    registry.register("Apiary", EntityHook::new("apiary"));

    registry.register(
        "Hive",
        EntityHook::new("hive")
            .id_field("apiaryId")
            .parent_key("apiaryId", "Apiary", "id")
            .nested_id("familyId", &["family", "id"])
            .default_bool("isNew", false),
    );

    registry.register(
        "Box",
        EntityHook::new("box")
            .id_field("hiveId")
            .parent_key("hiveId", "Hive", "id"),
    );

    registry.register(
        "Frame",
        EntityHook::new("frame")
            .id_field("boxId")
            .parent_key("boxId", "Box", "id")
            .nested_id("leftId", &["leftSide", "id"])
            .nested_id("rightId", &["rightSide", "id"]),
    );

    registry.register(
        "FrameSide",
        EntityHook::new("frameside")
            .id_field("frameId")
            .parent_key("frameId", "Frame", "id")
            .default_bool("queenDetected", false),
    );

    registry.register(
        "Family",
        EntityHook::new("family")
            .id_field("hiveId")
            .parent_key("hiveId", "Hive", "id"),
    );

    // `inspections(hiveId:)` 的结果里通常不选 hiveId
    registry.register(
        "Inspection",
        EntityHook::new("inspection")
            .id_field("hiveId")
            .root_arg_key("hiveId", "hiveId"),
    );

    registry.register(
        "User",
        EntityHook::new("user")
            .default_bool("hasSubscription", false)
            .default_bool("isSubscriptionExpired", false),
    );

    // 文本主键
    registry.register("Locale", EntityHook::new("locale").unguarded());

    registry.register("File", EntityHook::new("files"));

    registry.register(
        "FileResize",
        EntityHook::new("fileresize")
            .id_field("file_id")
            .parent_key("file_id", "File", "id"),
    );

    // 没有 id，主键是 frameSideId，响应里缺省时取 `hiveFrameSideFile(frameSideId:)`
    registry.register(
        "FrameSideFile",
        EntityHook::new("frame_side_files")
            .id_field("frameSideId")
            .root_arg_key("frameSideId", "frameSideId")
            .nested_id("fileId", &["file", "id"])
            .default_bool("queenDetected", false),
    );

    registry
}
