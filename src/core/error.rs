//! 统一错误处理模块
//!
//! 提供桥接层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **协议层错误** (`BridgeError`): 参数形状、句柄、动作码等协议问题，以及脚本异常
//! - **脚本层错误** (`ScriptError`): 模块解析与加载失败
//!
//! `BridgeError` 的 `Display` 文本就是写入 `results[0]` 的协议消息。

use thiserror::Error;

/// 桥接核心错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("WrongArguments")]
    WrongArguments,

    #[error("NotImplement")]
    NotImplemented(i32),

    #[error("Too many arguments ({0})")]
    TooManyArguments(usize),

    #[error("Object is not constructor")]
    NotConstructor,

    #[error("Object is not function")]
    NotFunction,

    #[error("Wrong result")]
    WrongResult,

    #[error("Invalid handle ({0})")]
    InvalidHandle(u32),

    #[error("Promise is not pending ({0})")]
    PromiseNotPending(u32),

    #[error("Class id {0} is already registered")]
    DuplicateClass(i32),

    #[error("Host handler is busy")]
    HostBusy,

    /// 脚本抛出的值，已渲染为文本
    #[error("{0}")]
    Exception(String),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("Initialization error: {0}")]
    Init(String),
}

/// 错误分类，对应协议约定的四类失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 参数个数或类型不符
    Protocol,
    /// 脚本异常
    Exception,
    /// 未识别的动作码
    Failure,
    /// 参数个数超过配置上限
    Exhaustion,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotImplemented(_) => ErrorKind::Failure,
            BridgeError::TooManyArguments(_) => ErrorKind::Exhaustion,
            BridgeError::Exception(_) | BridgeError::Engine(_) | BridgeError::Script(_) => {
                ErrorKind::Exception
            }
            _ => ErrorKind::Protocol,
        }
    }
}

/// 脚本系统错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Cannot resolve module '{name}' from '{base}'")]
    Unresolved { base: String, name: String },

    #[error("Module name is not a string: {0}")]
    InvalidName(String),
}

/// 桥接结果类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let script_err = ScriptError::NotFound("lib/util.js".to_string());
        let bridge_err: BridgeError = script_err.into();
        assert!(matches!(bridge_err, BridgeError::Script(_)));
        assert_eq!(bridge_err.kind(), ErrorKind::Exception);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(BridgeError::WrongArguments.to_string(), "WrongArguments");
        assert_eq!(BridgeError::NotImplemented(77).to_string(), "NotImplement");
        assert_eq!(
            BridgeError::TooManyArguments(20).to_string(),
            "Too many arguments (20)"
        );
        assert_eq!(
            BridgeError::NotConstructor.to_string(),
            "Object is not constructor"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(BridgeError::WrongArguments.kind(), ErrorKind::Protocol);
        assert_eq!(BridgeError::NotImplemented(3).kind(), ErrorKind::Failure);
        assert_eq!(BridgeError::TooManyArguments(3).kind(), ErrorKind::Exhaustion);
        assert_eq!(
            BridgeError::Exception("boom".into()).kind(),
            ErrorKind::Exception
        );
    }
}
