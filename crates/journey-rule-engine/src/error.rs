//! 规则引擎错误类型
//!
//! 错误按处理策略分组：
//! - 定义错误：规则编写阶段即被拒绝，永远不会进入快照
//! - 评估告警：字段缺失时谓词按 false 处理并记录告警；类型不匹配时跳过该规则
//! - 变更错误：动作引用的阶段在当前旅程中不存在，跳过该动作
//! - 存储错误：仅对触发它的那次调用致命

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    // ==================== 定义错误 ====================
    #[error("规则定义无效: {0}")]
    Definition(String),

    // ==================== 评估告警 ====================
    #[error("字段不存在: {0}")]
    FieldResolution(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    // ==================== 变更错误 ====================
    #[error("引用阶段不存在: {phase_id}")]
    ReferenceNotFound { phase_id: String },

    #[error("阶段已存在: {phase_id}")]
    DuplicatePhase { phase_id: String },

    // ==================== 存储错误 ====================
    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("规则存储失败: {0}")]
    Store(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    // ==================== 旅程错误 ====================
    #[error("旅程未找到: {0}")]
    JourneyNotFound(String),

    #[error("旅程无效: {0}")]
    InvalidJourney(String),
}

impl RuleError {
    /// 评估阶段的条件告警（字段缺失或类型不匹配）
    pub fn is_evaluation_warning(&self) -> bool {
        matches!(self, Self::FieldResolution(_) | Self::TypeMismatch { .. })
    }

    /// 变更阶段可跳过的动作错误
    pub fn is_mutation_error(&self) -> bool {
        matches!(
            self,
            Self::ReferenceNotFound { .. } | Self::DuplicatePhase { .. }
        )
    }

    /// 用于指标标签和跳过记录的简短分类名
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Definition(_) => "definition",
            Self::FieldResolution(_) => "field_resolution",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::ReferenceNotFound { .. } => "reference_not_found",
            Self::DuplicatePhase { .. } => "duplicate_phase",
            Self::RuleNotFound(_) => "rule_not_found",
            Self::Store(_) => "store",
            Self::JsonError(_) => "json",
            Self::JourneyNotFound(_) => "journey_not_found",
            Self::InvalidJourney(_) => "invalid_journey",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
