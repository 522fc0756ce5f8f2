//! 生成 `$OUT_DIR/db_version.rs`：元数据 migration 的最高版本号
//!
//! migration 文件名遵循 refinery 约定 `V{version}__{name}.sql`。

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn migration_version(file_name: &str) -> Option<i64> {
    let stem = file_name.strip_prefix('V')?.strip_suffix(".sql")?;
    let (version, _) = stem.split_once("__")?;
    version.parse().ok()
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let migrations = Path::new(&manifest_dir).join("migrations");

    let latest = fs::read_dir(&migrations)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|entry| entry.file_name().to_str().and_then(migration_version))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_else(|_| ".".to_string()));
    let generated = format!(
        "/// 当前支持的最高元数据 migration 版本（refinery_schema_history 的 version）\npub const SYNC_DB_VERSION: i64 = {};\n",
        latest
    );
    if let Err(e) = fs::write(out_dir.join("db_version.rs"), generated) {
        panic!("写入 db_version.rs 失败: {}", e);
    }
    println!("cargo:rerun-if-changed=migrations");
}
