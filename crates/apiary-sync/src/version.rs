//! 版本与运行时元信息
//!
//! - **Crate Version** → Cargo.toml（唯一权威源）
//! - **Migration Version** → migrations 文件（文件即版本，由 refinery 自动管理）
//! - **Layout Version** → sync_meta 表中的 schema_version，由 provisioning 递增

/// crate semver，来自 Cargo.toml
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

// build.rs 扫描 migrations/ 生成
include!(concat!(env!("OUT_DIR"), "/db_version.rs"));
