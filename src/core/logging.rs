//! 日志
//!
//! `tracing` 订阅器初始化，以及引擎诊断输出的行缓冲。

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 安装全局 `tracing` 订阅器
///
/// `RUST_LOG` 优先于配置中的级别。重复调用不会报错。
pub fn init_logging(config: &LoggingConfig) {
    if !config.log_to_console {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    tracing::info!(target: "js_script", "Logging initialized");
}

/// 引擎诊断文本的行缓冲
///
/// 片段累积到出现换行为止，然后按行交出。
#[derive(Debug, Default)]
pub struct LogSink {
    buffer: String,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加片段，返回所有已完整的行（不含换行符）
    pub fn write(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete
            .strip_suffix('\n')
            .unwrap_or(&complete)
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }

    /// 取出未完成的行
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
