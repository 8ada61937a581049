/// 命令解析与日志渲染

use chrono::Local;
use socket::{LogColor, LogEntry};
use std::str::FromStr;

pub const HELP: &str = "命令: connect | close | post | status | logs | help | quit";

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Close,
    Post,
    Status,
    Logs,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(Self::Connect),
            "close" => Ok(Self::Close),
            "post" => Ok(Self::Post),
            "status" => Ok(Self::Status),
            "logs" => Ok(Self::Logs),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("未知命令: {}，{}", other, HELP)),
        }
    }
}

/// 渲染为 `MM:SS :: message`，带颜色的条目用 ANSI 着色
pub fn format_entry(entry: &LogEntry) -> String {
    let line = format!(
        "{} :: {}",
        entry.time.with_timezone(&Local).format("%M:%S"),
        entry.message
    );

    match entry.color {
        Some(LogColor::Green) => format!("{}{}{}", GREEN, line, RESET),
        Some(LogColor::Red) => format!("{}{}{}", RED, line, RESET),
        None => line,
    }
}
