/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// 槽位数量下限：构造回调需要 classId 与对象令牌两个固定槽位，成员调用需要三个
pub const MIN_ARGUMENTS: usize = 4;

/// 桥接配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 桥接主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// 参数槽位数量
    pub max_arguments: usize,

    /// 引擎内存上限（字节），0 表示不限制
    pub memory_limit: usize,

    /// 引擎栈上限（字节），0 表示使用引擎默认值
    pub max_stack_size: usize,

    /// GC 触发阈值（字节），0 表示使用引擎默认值
    pub gc_threshold: usize,

    /// 是否把未处理的 Promise 拒绝写入日志
    pub track_unhandled_rejections: bool,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl_default!(BridgeConfig {
    max_arguments: 16,
    memory_limit: 0,
    max_stack_size: 0,
    gc_threshold: 0,
    track_unhandled_rejections: true,
    logging: LoggingConfig::default(),
});

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("JS_SCRIPT_MAX_ARGUMENTS") {
            if let Ok(count) = val.parse() {
                self.max_arguments = count;
            }
        }
        if let Ok(val) = env::var("JS_SCRIPT_MEMORY_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.memory_limit = limit;
            }
        }
        if let Ok(val) = env::var("JS_SCRIPT_MAX_STACK_SIZE") {
            if let Ok(limit) = val.parse() {
                self.max_stack_size = limit;
            }
        }
        if let Ok(val) = env::var("JS_SCRIPT_TRACK_REJECTIONS") {
            self.track_unhandled_rejections =
                val.parse().unwrap_or(self.track_unhandled_rejections);
        }
        if let Ok(val) = env::var("JS_SCRIPT_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_arguments < MIN_ARGUMENTS {
            return Err(ConfigError::ValidationError(format!(
                "max_arguments must be at least {}, got {}",
                MIN_ARGUMENTS, self.max_arguments
            )));
        }
        if self.max_arguments > i32::MAX as usize {
            return Err(ConfigError::ValidationError(format!(
                "max_arguments is too large: {}",
                self.max_arguments
            )));
        }
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./js_script.toml
    /// 2. ./js_script.json
    /// 3. <用户配置目录>/js_script/config.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置都会再应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::find().unwrap_or_else(|| {
            tracing::debug!(target: "js_script::config", "Using default configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn find() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("js_script.toml") {
            tracing::debug!(target: "js_script::config", "Loaded config from js_script.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("js_script.json") {
            tracing::debug!(target: "js_script::config", "Loaded config from js_script.json");
            return Some(config);
        }

        let config_path = dirs::config_dir()?.join("js_script").join("config.toml");
        match Self::from_toml_file(&config_path) {
            Ok(config) => {
                tracing::debug!(target: "js_script::config", path = ?config_path, "Loaded config");
                Some(config)
            }
            Err(_) => None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// `EnvFilter` 指令字符串
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}
