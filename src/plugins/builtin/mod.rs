//! 内置插件模块

pub mod js_script;

// 重新导出内置插件
pub use js_script::JsScriptPlugin;
