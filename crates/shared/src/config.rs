//! 配置管理模块
//!
//! 支持多层配置文件加载、环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 日志级别（如 "info", "debug"），RUST_LOG 优先
    pub log_level: String,
    /// 是否输出 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleEngineConfig {
    /// 定期同步快照的间隔（秒）
    pub reload_interval_seconds: u64,
    /// 是否记录条件评估追踪
    pub trace_conditions: bool,
    /// 条件树最大嵌套深度
    pub max_condition_depth: usize,
    /// 启动时加载的规则文件
    pub rules_path: Option<PathBuf>,
    /// 启动时加载的旅程文件
    pub journeys_path: Option<PathBuf>,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            reload_interval_seconds: 30,
            trace_conditions: false,
            max_condition_depth: 16,
            rules_path: None,
            journeys_path: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub observability: ObservabilityConfig,
    pub rule_engine: RuleEngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "journey-rule-engine".to_string(),
            environment: "development".to_string(),
            observability: ObservabilityConfig::default(),
            rule_engine: RuleEngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置，JOURNEY_ENV 指定）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（JOURNEY_ 前缀，如 JOURNEY_RULE_ENGINE__TRACE_CONDITIONS -> rule_engine.trace_conditions）
    ///
    /// 配置文件都是可选的，缺失时使用默认值。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(service_name, config_dir)
    }

    /// 从指定配置目录加载
    pub fn load_from(service_name: &str, config_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let env = std::env::var("JOURNEY_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 字段名本身含下划线，嵌套层级用双下划线分隔
            .add_source(
                Environment::with_prefix("JOURNEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
