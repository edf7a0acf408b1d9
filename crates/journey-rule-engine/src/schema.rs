//! 上下文字段模式
//!
//! 可选地为编译器提供上下文字段的类型信息，使字段路径错误和
//! 操作符类型错误在规则定义时就被拒绝。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Number,
    String,
    Boolean,
    Array,
    Object,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{}", s)
    }
}

/// 上下文模式：点号路径 -> 字段类型
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSchema {
    fields: BTreeMap<String, FieldType>,
}

impl ContextSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_field(mut self, path: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(path.into(), field_type);
        self
    }

    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 校验字段存在且类型与操作符兼容
    pub fn check(&self, field: &str, operator: Operator) -> Result<()> {
        let field_type = self.field_type(field).ok_or_else(|| {
            RuleError::Definition(format!("字段 '{}' 不在上下文模式中", field))
        })?;

        let compatible = match operator {
            op if op.is_numeric() => field_type == FieldType::Number,
            Operator::Contains | Operator::NotContains => {
                matches!(field_type, FieldType::String | FieldType::Array)
            }
            _ => field_type != FieldType::Object,
        };

        if compatible {
            Ok(())
        } else {
            Err(RuleError::Definition(format!(
                "操作符 {} 不支持 {} 类型的字段 '{}'",
                operator, field_type, field
            )))
        }
    }
}
