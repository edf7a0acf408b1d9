//! 共享库
//!
//! 包含旅程规则引擎各组件共用的配置加载和可观测性初始化。

pub mod config;
pub mod observability;
