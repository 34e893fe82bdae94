//! js_script 通道插件
//!
//! 通道本身不提供任何方法，所有调用都答复未实现；注册时完成进程级初始化。

use std::sync::Once;

use crate::config::BridgeConfig;
use crate::core::logging::init_logging;
use crate::plugins::{BridgePlugin, MethodCall, MethodResponse, PluginVersion};

/// 通道名
pub const CHANNEL: &str = "js_script";

static SETUP: Once = Once::new();

/// 进程级初始化是否已完成
pub fn is_initialized() -> bool {
    SETUP.is_completed()
}

#[derive(Debug, Clone, Default)]
pub struct JsScriptPlugin {
    config: Option<BridgeConfig>,
}

impl JsScriptPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定配置初始化，而不是搜索配置文件
    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            config: Some(config),
        }
    }
}

impl BridgePlugin for JsScriptPlugin {
    fn name(&self) -> &'static str {
        "JsScriptPlugin"
    }

    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn version(&self) -> PluginVersion {
        PluginVersion::new(0, 1, 0)
    }

    fn description(&self) -> &'static str {
        "QuickJS script bridge channel"
    }

    fn setup(&self) {
        SETUP.call_once(|| {
            let config = self.config.clone().unwrap_or_else(BridgeConfig::load_or_default);
            init_logging(&config.logging);
            tracing::info!(
                target: "js_script::plugins",
                max_arguments = config.max_arguments,
                "js_script channel ready"
            );
        });
    }

    fn handle(&self, message: &[u8]) -> MethodResponse {
        match MethodCall::decode(message) {
            Ok(call) => {
                tracing::debug!(target: "js_script::plugins", method = %call.method, "method not implemented");
                MethodResponse::NotImplemented
            }
            Err(err) => {
                tracing::warn!(target: "js_script::plugins", error = %err, "undecodable channel message");
                MethodResponse::Error {
                    code: "bad_message".to_string(),
                    message: err.to_string(),
                }
            }
        }
    }
}
