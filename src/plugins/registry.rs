//! 插件注册表
//!
//! 按名称与通道管理已注册的插件。

use super::{BridgePlugin, MethodResponse, PluginMetadata};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Duplicate plugin: {0}")]
    DuplicatePlugin(String),
    #[error("Channel {channel} is already used by {owner}")]
    DuplicateChannel { channel: String, owner: String },
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}

pub type PluginResult<T> = Result<T, PluginError>;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn BridgePlugin>>,
    metadata: HashMap<String, PluginMetadata>,
    channels: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加插件并执行其初始化
    pub fn add<P: BridgePlugin + 'static>(&mut self, plugin: P) -> PluginResult<&mut Self> {
        let metadata = plugin.metadata();

        // 检查重复插件
        if self.metadata.contains_key(&metadata.name) {
            return Err(PluginError::DuplicatePlugin(metadata.name));
        }
        if let Some(&index) = self.channels.get(&metadata.channel) {
            return Err(PluginError::DuplicateChannel {
                channel: metadata.channel,
                owner: self.plugins[index].name().to_string(),
            });
        }

        plugin.setup();
        tracing::info!(
            target: "js_script::plugins",
            name = %metadata.name,
            channel = %metadata.channel,
            version = %metadata.version,
            "plugin registered"
        );

        self.channels.insert(metadata.channel.clone(), self.plugins.len());
        self.metadata.insert(metadata.name.clone(), metadata);
        self.plugins.push(Box::new(plugin));
        Ok(self)
    }

    /// 把消息交给通道的插件
    pub fn send(&self, channel: &str, message: &[u8]) -> PluginResult<MethodResponse> {
        let index = self
            .channels
            .get(channel)
            .ok_or_else(|| PluginError::UnknownChannel(channel.to_string()))?;
        Ok(self.plugins[*index].handle(message))
    }

    pub fn get_metadata(&self, name: &str) -> Option<&PluginMetadata> {
        self.metadata.get(name)
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// 已注册插件（按注册顺序）
    pub fn list_plugins(&self) -> Vec<&PluginMetadata> {
        self.plugins
            .iter()
            .filter_map(|plugin| self.metadata.get(plugin.name()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
