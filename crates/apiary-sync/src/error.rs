use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiarySyncError {
    // 存储层
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("DB actor stopped: {0}")]
    ActorStopped(String),
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    // 布局 / schema
    #[error("Schema provision error: {0}")]
    SchemaProvision(String),
    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    // 查询文档与回写
    #[error("Query parse error: {0}")]
    QueryParse(String),
    #[error("Type resolution gap at `{0}`")]
    TypeResolutionGap(String),
    #[error("Write hook for `{type_name}` failed: {message}")]
    WriteHookFailure { type_name: String, message: String },
    #[error("Missing identifier for `{table}` (key field `{key_field}`)")]
    MissingIdentifier { table: String, key_field: String },

    // 本地回退
    #[error("No local resolver registered for `{0}`")]
    NoLocalResolver(String),
    #[error("Local fallback for `{field}` failed: {message}")]
    LocalFallback { field: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for ApiarySyncError {
    fn from(error: serde_json::Error) -> Self {
        ApiarySyncError::Json(error.to_string())
    }
}

impl From<std::io::Error> for ApiarySyncError {
    fn from(error: std::io::Error) -> Self {
        ApiarySyncError::Io(error.to_string())
    }
}

impl ApiarySyncError {
    /// 是否为致命错误（需要上抛给调用方，而不是降级处理）
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ApiarySyncError::TypeResolutionGap(_)
                | ApiarySyncError::WriteHookFailure { .. }
                | ApiarySyncError::MissingIdentifier { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ApiarySyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_kinds_are_not_fatal() {
        assert!(!ApiarySyncError::TypeResolutionGap("hive.boxes".into()).is_fatal());
        assert!(!ApiarySyncError::MissingIdentifier {
            table: "box".into(),
            key_field: "id".into(),
        }
        .is_fatal());
        assert!(ApiarySyncError::SchemaProvision("disk full".into()).is_fatal());
        assert!(ApiarySyncError::LocalFallback {
            field: "hive".into(),
            message: "boom".into(),
        }
        .is_fatal());
    }
}
