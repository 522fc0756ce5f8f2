//! 同步层配置

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::schema::{IndexSpec, LayoutOptions};

/// 回写的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteBackMode {
    /// 回写完成后才把结果交给调用方
    #[default]
    Await,
    /// 结果立即返回，回写在独立任务中跑完（调用方被丢弃也不会中断）
    Detached,
}

/// 同步层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 缓存库目录；None 使用内存库
    pub data_dir: Option<PathBuf>,
    /// 缓存库文件名
    pub db_file_name: String,
    /// 视为不透明叶子的标量
    pub opaque_scalars: Vec<String>,
    /// 布局推导选项
    pub layout: LayoutOptions,
    pub write_back: WriteBackMode,
    /// 流式管道中同时处理的操作数上限
    pub max_in_flight: usize,
    /// 事件广播缓冲大小
    pub event_capacity: usize,
    /// 调试模式（回写时输出每一步）
    pub debug_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_file_name: "apiary-cache.db".to_string(),
            opaque_scalars: vec!["JSON".to_string()],
            layout: LayoutOptions::default(),
            write_back: WriteBackMode::Await,
            max_in_flight: 16,
            event_capacity: 256,
            debug_mode: false,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 缓存库完整路径；内存库返回 None
    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(&self.db_file_name))
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.data_dir = None;
        self
    }

    pub fn db_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.db_file_name = name.into();
        self
    }

    pub fn opaque_scalar<S: Into<String>>(mut self, name: S) -> Self {
        let name = name.into();
        if !self.config.opaque_scalars.contains(&name) {
            self.config.opaque_scalars.push(name);
        }
        self
    }

    pub fn layout(mut self, layout: LayoutOptions) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn table_alias(mut self, type_name: &str, table: &str) -> Self {
        self.config.layout = self.config.layout.alias(type_name, table);
        self
    }

    pub fn secondary_index(mut self, table: &str, index: IndexSpec) -> Self {
        self.config.layout = self.config.layout.index(table, index);
        self
    }

    pub fn write_back(mut self, mode: WriteBackMode) -> Self {
        self.config.write_back = mode;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.config.max_in_flight = n.max(1);
        self
    }

    pub fn event_capacity(mut self, n: usize) -> Self {
        self.config.event_capacity = n.max(1);
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}
