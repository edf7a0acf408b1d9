//! 条件评估器
//!
//! 实现各操作符的评估逻辑。数值比较统一转换为 f64，
//! 不兼容的类型返回 `TypeMismatch`，由调用方决定是否跳过规则。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use serde_json::Value;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估单个谓词
    ///
    /// # Arguments
    /// * `field_value` - 从上下文中解析出的字段值
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的期望值
    pub fn evaluate(field_value: &Value, operator: Operator, expected_value: &Value) -> Result<bool> {
        match operator {
            Operator::Equals => Ok(Self::eq(field_value, expected_value)),
            Operator::NotEquals => Ok(!Self::eq(field_value, expected_value)),
            Operator::GreaterThan => Self::compare(field_value, expected_value, |a, b| a > b),
            Operator::LessThan => Self::compare(field_value, expected_value, |a, b| a < b),
            Operator::GreaterEqual => Self::compare(field_value, expected_value, |a, b| a >= b),
            Operator::LessEqual => Self::compare(field_value, expected_value, |a, b| a <= b),
            Operator::Contains => Self::contains(field_value, expected_value),
            Operator::NotContains => Self::contains(field_value, expected_value).map(|r| !r),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::NotIn => Self::in_list(field_value, expected_value).map(|r| !r),
        }
    }

    /// 相等比较
    fn eq(field: &Value, expected: &Value) -> bool {
        // 数值统一转为浮点数，避免 100 == 100.0 比较失败
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (f1 - f2).abs() < f64::EPSILON;
        }

        field == expected
    }

    /// 数值比较
    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        let field_num = Self::as_f64(field).ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: Self::type_name(field).to_string(),
        })?;

        let expected_num = Self::as_f64(expected).ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: Self::type_name(expected).to_string(),
        })?;

        Ok(cmp(field_num, expected_num))
    }

    /// 集合成员检查 (IN)
    ///
    /// 标量字段检查是否在列表中；数组字段只要有一个元素在列表中即为真。
    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array".to_string(),
            actual: Self::type_name(expected).to_string(),
        })?;

        let found = match field {
            Value::Array(items) => items
                .iter()
                .any(|item| arr.iter().any(|candidate| Self::eq(item, candidate))),
            _ => arr.iter().any(|candidate| Self::eq(field, candidate)),
        };

        Ok(found)
    }

    /// 字符串子串 / 数组元素包含检查
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: Self::type_name(expected).to_string(),
                })?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected))),
            _ => Err(RuleError::TypeMismatch {
                expected: "string or array".to_string(),
                actual: Self::type_name(field).to_string(),
            }),
        }
    }

    /// 尝试将 Value 转换为 f64
    pub(crate) fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 获取值的类型名称
    pub(crate) fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
