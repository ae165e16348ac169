//! 运行时配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__AGENT__MAX_CALL_DEPTH=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub logging: LoggingSection,
}

/// [agent] 段：调用轮数、工具超时、同轮并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 每次运行允许的工具调用轮数
    pub max_call_depth: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 同一轮内最多并发执行的调用数；1 为顺序执行
    pub max_concurrent_calls: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_call_depth: 1,
            tool_timeout_secs: 30,
            max_concurrent_calls: 1,
        }
    }
}

/// [logging] 段：默认过滤指令（RUST_LOG 优先）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 重新从磁盘与环境变量加载
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
