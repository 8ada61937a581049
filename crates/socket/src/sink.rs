/// 诊断日志输出
///
/// 连接管理器把连接、关闭、错误、发送等事件写入宿主注入的 `LogSink`，
/// 格式和存储由宿主决定。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 日志颜色标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogColor {
    Green,
    Red,
}

/// 一条日志
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub time: DateTime<Utc>,
    pub color: Option<LogColor>,
}

/// 日志接收方
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, color: Option<LogColor>);
}

/// 默认实现：转发到 tracing，红色记为 warn
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, message: &str, color: Option<LogColor>) {
        match color {
            Some(LogColor::Red) => warn!("{}", message),
            _ => info!("{}", message),
        }
    }
}

/// 内存日志，只追加不删除
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前全部日志的快照
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LogSink for MemoryLog {
    fn log(&self, message: &str, color: Option<LogColor>) {
        debug!("📝 {}", message);
        self.entries.lock().push(LogEntry {
            message: message.to_owned(),
            time: Utc::now(),
            color,
        });
    }
}
