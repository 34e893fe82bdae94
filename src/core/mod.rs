//! 核心模块
//!
//! 包含桥接层的基础设施：
//! - `error` - 错误类型定义
//! - `logging` - 日志初始化与引擎诊断行缓冲

pub mod error;
pub mod logging;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{BridgeError, BridgeResult, ErrorKind, ScriptError, ScriptResult};
pub use logging::{init_logging, LogSink};
