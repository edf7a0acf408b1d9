//! 统一可观测性模块
//!
//! 提供日志和指标的统一初始化。
//! 指标通过 `metrics` 门面记录，导出器由宿主进程自行安装；未安装时记录为空操作。

pub mod metrics;
pub mod tracing;

pub use crate::config::ObservabilityConfig;

use ::tracing::info;
use anyhow::Result;

/// 统一初始化可观测性
///
/// 1. Tracing（EnvFilter + pretty/JSON 日志层）
/// 2. 指标描述注册
///
/// # Example
///
/// ```ignore
/// use journey_shared::config::AppConfig;
/// use journey_shared::observability;
///
/// fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("journey-rule-engine")?;
///     observability::init(&config.service_name, &config.observability)?;
///     Ok(())
/// }
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<()> {
    tracing::init(config)?;
    metrics::describe();

    info!(
        service = %service_name,
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "Observability initialized"
    );
    Ok(())
}
