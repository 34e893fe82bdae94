//! 插件系统核心
//!
//! 宿主传输层上的命名通道。每个插件占用一个通道，注册时执行一次性初始化。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 插件版本信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PluginVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 插件元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub channel: String,
    pub version: PluginVersion,
    pub description: String,
}

/// 通道消息：JSON 编码的 `{method, arguments}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(message: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(message)
    }
}

/// 通道答复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodResponse {
    Success { result: serde_json::Value },
    Error { code: String, message: String },
    NotImplemented,
}

/// 桥接插件 Trait
pub trait BridgePlugin: Send + Sync {
    /// 插件名称
    fn name(&self) -> &'static str;

    /// 占用的通道名
    fn channel(&self) -> &'static str;

    /// 插件版本
    fn version(&self) -> PluginVersion {
        PluginVersion::new(1, 0, 0)
    }

    /// 插件描述
    fn description(&self) -> &'static str {
        ""
    }

    /// 注册时调用
    fn setup(&self) {}

    /// 处理一条通道消息
    fn handle(&self, message: &[u8]) -> MethodResponse;

    /// 获取插件元数据
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: self.name().to_string(),
            channel: self.channel().to_string(),
            version: self.version(),
            description: self.description().to_string(),
        }
    }
}

// 重新导出注册表
pub mod registry;
pub use registry::{PluginError, PluginRegistry, PluginResult};

// 内置插件
pub mod builtin;
