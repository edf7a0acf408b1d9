//! 规则操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    // 通用比较
    Equals,
    NotEquals,

    // 数值比较
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,

    // 包含检查（字符串子串 / 数组元素）
    Contains,
    NotContains,

    // 集合成员
    In,
    NotIn,
}

impl Operator {
    /// 是否为数值比较操作符
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterEqual | Self::LessEqual
        )
    }

    /// 是否要求数组类型的期望值
    pub fn requires_array(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::GreaterEqual => "GREATER_EQUAL",
            Self::LessEqual => "LESS_EQUAL",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
        };
        write!(f, "{}", s)
    }
}

/// 逻辑组合符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
    Not,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}
