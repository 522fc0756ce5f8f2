//! 数据库 Actor - 单线程数据库访问模型
//!
//! 核心设计：
//! - SQLite Connection 永远只在一个专用线程中
//! - 所有数据库操作通过 channel 发送命令，结果经 oneshot 返回
//! - merge（读-改-写）在 actor 线程内的一个事务里完成，同一 key 的并发写天然串行

use crossbeam_channel::{unbounded, Receiver, Sender};
use rusqlite::Connection;
use serde_json::Value;
use std::path::PathBuf;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::{ApiarySyncError, Result};
use crate::schema::{ProvisionReport, StorageLayout};
use crate::storage::dao::{EntityDao, LayoutDao};
use crate::storage::migrate;
use crate::storage::{EntityKey, MergeFn, Record};

type Reply<T> = oneshot::Sender<Result<T>>;

/// 数据库命令
pub enum DbCommand {
    /// 应用表布局
    ApplyLayout {
        layout: StorageLayout,
        respond_to: Reply<ProvisionReport>,
    },

    SchemaVersion {
        respond_to: Reply<i64>,
    },

    Get {
        table: String,
        key: EntityKey,
        respond_to: Reply<Option<Record>>,
    },

    Put {
        table: String,
        key: EntityKey,
        record: Record,
        respond_to: Reply<()>,
    },

    /// 事务内读-改-写
    Merge {
        table: String,
        key: EntityKey,
        merge: MergeFn,
        respond_to: Reply<Record>,
    },

    Delete {
        table: String,
        key: EntityKey,
        respond_to: Reply<bool>,
    },

    DeleteWhere {
        table: String,
        field: String,
        values: Vec<Value>,
        respond_to: Reply<usize>,
    },

    FindBy {
        table: String,
        field: String,
        value: Value,
        respond_to: Reply<Vec<Record>>,
    },

    All {
        table: String,
        respond_to: Reply<Vec<Record>>,
    },

    /// 停止 Actor
    Shutdown,
}

struct DbActor {
    conn: Connection,
    receiver: Receiver<DbCommand>,
    thread_id: thread::ThreadId,
}

impl DbActor {
    fn open(path: Option<&PathBuf>) -> Result<Connection> {
        let mut conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!("📂 打开缓存库: {}", path.display());
                Connection::open(path)?
            }
            None => {
                info!("📂 打开内存缓存库");
                Connection::open_in_memory()?
            }
        };
        migrate::init_db(&mut conn)?;
        Ok(conn)
    }

    /// 运行 Actor 主循环
    fn run(self) {
        info!("🔄 [Thread {:?}] DbActor 开始处理命令", self.thread_id);

        while let Ok(command) = self.receiver.recv() {
            match command {
                DbCommand::Shutdown => {
                    info!("🛑 [Thread {:?}] DbActor 收到停止信号", self.thread_id);
                    break;
                }

                DbCommand::ApplyLayout { layout, respond_to } => {
                    let result = LayoutDao::new(&self.conn).apply(&layout);
                    let _ = respond_to.send(result);
                }

                DbCommand::SchemaVersion { respond_to } => {
                    let result = LayoutDao::new(&self.conn).schema_version();
                    let _ = respond_to.send(result);
                }

                DbCommand::Get {
                    table,
                    key,
                    respond_to,
                } => {
                    let result = EntityDao::new(&self.conn).get(&table, &key);
                    let _ = respond_to.send(result);
                }

                DbCommand::Put {
                    table,
                    key,
                    record,
                    respond_to,
                } => {
                    let result = EntityDao::new(&self.conn).put(&table, &key, &record);
                    let _ = respond_to.send(result);
                }

                DbCommand::Merge {
                    table,
                    key,
                    merge,
                    respond_to,
                } => {
                    let result = self.handle_merge(&table, &key, merge);
                    let _ = respond_to.send(result);
                }

                DbCommand::Delete {
                    table,
                    key,
                    respond_to,
                } => {
                    let result = EntityDao::new(&self.conn).delete(&table, &key);
                    let _ = respond_to.send(result);
                }

                DbCommand::DeleteWhere {
                    table,
                    field,
                    values,
                    respond_to,
                } => {
                    let result = EntityDao::new(&self.conn).delete_where(&table, &field, &values);
                    let _ = respond_to.send(result);
                }

                DbCommand::FindBy {
                    table,
                    field,
                    value,
                    respond_to,
                } => {
                    let result = EntityDao::new(&self.conn).find_by(&table, &field, &value);
                    let _ = respond_to.send(result);
                }

                DbCommand::All { table, respond_to } => {
                    let result = EntityDao::new(&self.conn).all(&table);
                    let _ = respond_to.send(result);
                }
            }
        }

        info!("👋 [Thread {:?}] DbActor 已退出", self.thread_id);
    }

    fn handle_merge(&self, table: &str, key: &EntityKey, merge: MergeFn) -> Result<Record> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| ApiarySyncError::Database(format!("开始事务失败: {}", e)))?;
        let dao = EntityDao::new(&self.conn);
        let existing = dao.get(table, key)?;
        let merged = merge(existing);
        dao.put(table, key, &merged)?;
        tx.commit()
            .map_err(|e| ApiarySyncError::Database(format!("提交事务失败: {}", e)))?;
        debug!("merge {}[{}] 完成", table, key);
        Ok(merged)
    }
}

/// 数据库 Actor 句柄（用于异步调用）
#[derive(Clone)]
pub struct DbActorHandle {
    sender: Sender<DbCommand>,
}

impl std::fmt::Debug for DbActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbActorHandle")
            .field("sender", &"<channel>")
            .finish()
    }
}

impl DbActorHandle {
    /// 启动 DB Actor
    ///
    /// `path` 为 None 时使用内存库。连接打开与 migration 在 actor 线程内完成，
    /// 本方法等到初始化结果返回后才交出句柄。
    pub async fn spawn(path: Option<PathBuf>) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("sync-db-actor".to_string())
            .spawn(move || match DbActor::open(path.as_ref()) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    DbActor {
                        conn,
                        receiver,
                        thread_id: thread::current().id(),
                    }
                    .run();
                }
                Err(e) => {
                    error!("❌ DB Actor 初始化失败: {}", e);
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| ApiarySyncError::Io(format!("无法启动 DB Actor 线程: {}", e)))?;

        ready_rx
            .await
            .map_err(|_| ApiarySyncError::ActorStopped("DB Actor 初始化未返回".to_string()))??;

        Ok(Self { sender })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> DbCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .map_err(|_| ApiarySyncError::ActorStopped("DB Actor 已停止".to_string()))?;
        rx.await
            .map_err(|_| ApiarySyncError::ActorStopped("DB Actor 响应失败".to_string()))?
    }

    pub async fn apply_layout(&self, layout: StorageLayout) -> Result<ProvisionReport> {
        self.request(|respond_to| DbCommand::ApplyLayout { layout, respond_to })
            .await
    }

    pub async fn schema_version(&self) -> Result<i64> {
        self.request(|respond_to| DbCommand::SchemaVersion { respond_to })
            .await
    }

    pub async fn get(&self, table: String, key: EntityKey) -> Result<Option<Record>> {
        self.request(|respond_to| DbCommand::Get {
            table,
            key,
            respond_to,
        })
        .await
    }

    pub async fn put(&self, table: String, key: EntityKey, record: Record) -> Result<()> {
        self.request(|respond_to| DbCommand::Put {
            table,
            key,
            record,
            respond_to,
        })
        .await
    }

    pub async fn merge(&self, table: String, key: EntityKey, merge: MergeFn) -> Result<Record> {
        self.request(|respond_to| DbCommand::Merge {
            table,
            key,
            merge,
            respond_to,
        })
        .await
    }

    pub async fn delete(&self, table: String, key: EntityKey) -> Result<bool> {
        self.request(|respond_to| DbCommand::Delete {
            table,
            key,
            respond_to,
        })
        .await
    }

    pub async fn delete_where(&self, table: String, field: String, values: Vec<Value>) -> Result<usize> {
        self.request(|respond_to| DbCommand::DeleteWhere {
            table,
            field,
            values,
            respond_to,
        })
        .await
    }

    pub async fn find_by(&self, table: String, field: String, value: Value) -> Result<Vec<Record>> {
        self.request(|respond_to| DbCommand::FindBy {
            table,
            field,
            value,
            respond_to,
        })
        .await
    }

    pub async fn all(&self, table: String) -> Result<Vec<Record>> {
        self.request(|respond_to| DbCommand::All { table, respond_to })
            .await
    }

    /// 停止 Actor（已在队列中的命令仍会先执行完）
    pub fn shutdown(&self) {
        let _ = self.sender.send(DbCommand::Shutdown);
    }
}
