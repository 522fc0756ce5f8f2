//! 布局 DAO - sync_layout / sync_meta 与实体表的建 / 删

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{check_ident, field_expr, quote_ident};
use crate::error::{ApiarySyncError, Result};
use crate::schema::{IndexSpec, LayoutChange, ProvisionReport, StorageLayout, TableSpec};

const SCHEMA_VERSION_KEY: &str = "schema_version";

pub struct LayoutDao<'a> {
    conn: &'a Connection,
}

impl<'a> LayoutDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 已应用的表布局
    pub fn load_applied(&self) -> Result<BTreeMap<String, TableSpec>> {
        let mut stmt = self
            .conn
            .prepare("SELECT table_name, spec FROM sync_layout")?;
        let mut rows = stmt.query([])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let spec: String = row.get(1)?;
            out.insert(name, serde_json::from_str(&spec)?);
        }
        Ok(out)
    }

    pub fn schema_version(&self) -> Result<i64> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                [SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// 在一个事务内应用布局：与已应用布局做 diff，有变化则版本 +1
    pub fn apply(&self, layout: &StorageLayout) -> Result<ProvisionReport> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| ApiarySyncError::Database(format!("开始事务失败: {}", e)))?;

        let applied = self.load_applied()?;
        let diff = layout.diff(&applied);
        let current = self.schema_version()?;

        for name in &diff.drop {
            check_ident(name)?;
            info!("🗑️ 删除不再需要的表: {}", name);
            self.conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
            self.conn
                .execute("DELETE FROM sync_layout WHERE table_name = ?1", [name])?;
        }
        for table in &diff.rebuild {
            info!("♻️ 主键变化，重建表: {}", table.name);
            check_ident(&table.name)?;
            self.conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_ident(&table.name)
            ))?;
        }
        for (table, index) in &diff.drop_indexes {
            check_ident(table)?;
            self.conn.execute_batch(&format!(
                "DROP INDEX IF EXISTS {}",
                quote_ident(&index.index_name(table))
            ))?;
        }

        // CREATE ... IF NOT EXISTS：新表、重建表、新增索引，以及被外部删掉的表都在这里补齐
        for table in layout.tables() {
            self.create_table(table)?;
        }

        let now = chrono::Utc::now().timestamp_millis();
        for table in diff.create.iter().chain(&diff.rebuild).chain(&diff.updated) {
            self.conn.execute(
                "INSERT INTO sync_layout (table_name, spec, applied_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(table_name) DO UPDATE SET spec = excluded.spec, applied_at = excluded.applied_at",
                params![table.name, serde_json::to_string(table)?, now],
            )?;
        }

        let change = diff.change();
        let version = if change != LayoutChange::Unchanged || current == 0 {
            current + 1
        } else {
            current
        };
        if version != current {
            self.conn.execute(
                "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_VERSION_KEY, version.to_string()],
            )?;
        }

        tx.commit()
            .map_err(|e| ApiarySyncError::Database(format!("提交事务失败: {}", e)))?;

        debug!(
            "布局应用完成: version {} -> {}, create={}, rebuild={}, drop={}",
            current,
            version,
            diff.create.len(),
            diff.rebuild.len(),
            diff.drop.len()
        );

        Ok(ProvisionReport {
            version,
            change,
            tables: layout.len(),
        })
    }

    fn create_table(&self, table: &TableSpec) -> Result<()> {
        check_ident(&table.name)?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (pk PRIMARY KEY NOT NULL, body TEXT NOT NULL)",
            quote_ident(&table.name)
        ))?;
        for index in &table.indexes {
            self.create_index(&table.name, index)?;
        }
        Ok(())
    }

    fn create_index(&self, table: &str, index: &IndexSpec) -> Result<()> {
        for field in &index.fields {
            check_ident(field)?;
        }
        let exprs = index
            .fields
            .iter()
            .map(|f| field_expr(f))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&index.index_name(table)),
            quote_ident(table),
            exprs
        ))?;
        Ok(())
    }
}
