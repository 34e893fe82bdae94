//! 脚本引擎侧
//!
//! - `engine` - 桥接上下文与共享状态
//! - `dispatcher` - 动作码分发
//! - `classes` - 宿主类投影与函数包装
//! - `promise` - 宿主驱动的 Promise
//! - `modules` - 模块解析与 CommonJS 包装
//! - `console` - `console` 与 `global`
//! - `jobs` - 待处理任务循环

pub mod classes;
pub mod console;
pub mod dispatcher;
pub mod engine;
pub mod jobs;
pub mod modules;
pub mod promise;

pub use engine::{BridgeContext, CLASS_MARKER, TARGET_MARKER};
pub use jobs::{DrainReport, JobStatus};
pub use modules::{has_export, module_source, normalize_specifier, wrap_commonjs};
pub use promise::Outcome;
