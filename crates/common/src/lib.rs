/// WS Socket - 公共库
/// 
/// 提供连接管理器与宿主程序共享的消息封包、错误类型、工具函数等

pub mod errors;
pub mod utils;
pub mod ws_rpc;

// 重新导出常用类型
pub use errors::{Error, Result};
pub use ws_rpc::{MethodKind, RpcError, RpcErrorCode, RpcMessage};
