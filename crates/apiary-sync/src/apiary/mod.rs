//! 蜂场领域包 - schema、写钩子、本地解析器、索引表与级联删除
//!
//! 上层只需要 `bootstrap`：
//!
//! ```rust,no_run
//! # async fn demo() -> apiary_sync::Result<()> {
//! use apiary_sync::{apiary, SyncConfig};
//!
//! let ctx = apiary::bootstrap(SyncConfig::builder().data_dir("/tmp/apiary").build()).await?;
//! println!("version = {}", ctx.provision_report.version);
//! # Ok(())
//! # }
//! ```

mod cascade;
mod hooks;
mod resolvers;

pub use cascade::{delete_apiary_cascade, delete_hive_cascade, CascadeReport};
pub use hooks::default_hooks;
pub use resolvers::default_resolvers;

use tracing::info;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::schema::{IndexSpec, LayoutOptions};
use crate::sync::SyncContext;

/// 客户端使用的 GraphQL schema
pub const SCHEMA: &str = include_str!("schema.graphql");

/// 别名表 + 索引表（父外键、(父, position) 排序）
pub fn default_options() -> LayoutOptions {
    LayoutOptions::default()
        .alias("File", "files")
        .alias("FrameSideFile", "frame_side_files")
        .index("box", IndexSpec::single("hiveId"))
        .index("box", IndexSpec::compound(&["hiveId", "position"]))
        .index("frame", IndexSpec::single("boxId"))
        .index("frame", IndexSpec::compound(&["boxId", "position"]))
        .index("hive", IndexSpec::single("apiaryId"))
        .index("family", IndexSpec::single("hiveId"))
        .index("inspection", IndexSpec::single("hiveId"))
        .index("frameside", IndexSpec::single("frameId"))
        .index("fileresize", IndexSpec::single("file_id"))
}

/// 用蜂场 schema、默认钩子和默认解析器构建同步上下文
///
/// 配置里没有自定义布局时使用 [`default_options`]。
pub async fn bootstrap(mut config: SyncConfig) -> Result<SyncContext> {
    if config.layout == LayoutOptions::default() {
        config.layout = default_options();
    }
    info!("🔨 初始化蜂场同步层: data_dir={:?}", config.data_dir);
    SyncContext::provision(config, SCHEMA, default_hooks(), default_resolvers()).await
}
