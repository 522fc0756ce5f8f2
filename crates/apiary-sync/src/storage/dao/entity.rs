//! 实体 DAO - 动态文档表 `(pk, body)`

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use super::{check_ident, field_expr, json_to_sql, key_to_sql, quote_ident};
use crate::error::{ApiarySyncError, Result};
use crate::storage::{EntityKey, Record};

pub struct EntityDao<'a> {
    conn: &'a Connection,
}

impl<'a> EntityDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, table: &str, key: &EntityKey) -> Result<Option<Record>> {
        check_ident(table)?;
        let sql = format!("SELECT body FROM {} WHERE pk = ?1", quote_ident(table));
        let body: Option<String> = self
            .conn
            .query_row(&sql, params![key_to_sql(key)], |row| row.get(0))
            .optional()?;
        body.map(|b| parse_body(&b)).transpose()
    }

    pub fn put(&self, table: &str, key: &EntityKey, record: &Record) -> Result<()> {
        check_ident(table)?;
        let sql = format!(
            "INSERT INTO {} (pk, body) VALUES (?1, ?2)
             ON CONFLICT(pk) DO UPDATE SET body = excluded.body",
            quote_ident(table)
        );
        let body = serde_json::to_string(record)?;
        self.conn.execute(&sql, params![key_to_sql(key), body])?;
        Ok(())
    }

    pub fn delete(&self, table: &str, key: &EntityKey) -> Result<bool> {
        check_ident(table)?;
        let sql = format!("DELETE FROM {} WHERE pk = ?1", quote_ident(table));
        let affected = self.conn.execute(&sql, params![key_to_sql(key)])?;
        Ok(affected > 0)
    }

    pub fn delete_where(&self, table: &str, field: &str, values: &[Value]) -> Result<usize> {
        check_ident(table)?;
        check_ident(field)?;
        if values.is_empty() {
            return Ok(0);
        }
        let placeholders = (0..values.len())
            .map(|i| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(table),
            field_expr(field),
            placeholders
        );
        let args: Vec<_> = values.iter().map(json_to_sql).collect();
        let affected = self.conn.execute(&sql, params_from_iter(args.iter()))?;
        Ok(affected)
    }

    pub fn find_by(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
        check_ident(table)?;
        check_ident(field)?;
        let sql = format!(
            "SELECT body FROM {} WHERE {} = ?1 ORDER BY pk",
            quote_ident(table),
            field_expr(field)
        );
        self.collect(&sql, params![json_to_sql(value)])
    }

    pub fn all(&self, table: &str) -> Result<Vec<Record>> {
        check_ident(table)?;
        let sql = format!("SELECT body FROM {} ORDER BY pk", quote_ident(table));
        self.collect(&sql, params![])
    }

    fn collect<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            out.push(parse_body(&body)?);
        }
        Ok(out)
    }
}

fn parse_body(body: &str) -> Result<Record> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(ApiarySyncError::Database(format!(
            "实体 body 不是 JSON 对象: {}",
            other
        ))),
    }
}
