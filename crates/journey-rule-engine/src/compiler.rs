//! 规则编译器
//!
//! 在规则进入存储之前完成全部定义期校验（条件树结构、操作符与值的兼容性、
//! 动作的引用阶段等），并预提取规则使用的字段路径。

use crate::error::{Result, RuleError};
use crate::models::{ActionKind, ConditionGroup, ConditionRule, PhasePosition, RuleAction, RuleDefinition};
use crate::operators::Combinator;
use crate::schema::ContextSchema;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// 条件嵌套深度默认上限
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// 合法字段路径：点号分隔，每段为标识符或数组下标
static FIELD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").expect("字段路径正则应合法")
});

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: RuleDefinition,
    /// 规则中使用的所有字段路径
    pub required_fields: HashSet<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn id(&self) -> &str {
        &self.rule.rule_id
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn priority(&self) -> i32 {
        self.rule.priority
    }

    pub fn condition(&self) -> &ConditionGroup {
        &self.rule.condition
    }

    pub fn action(&self) -> &RuleAction {
        &self.rule.action
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
    max_depth: usize,
    schema: Option<ContextSchema>,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self {
            compile_version: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            schema: None,
        }
    }

    /// 设置上下文模式，启用字段存在性和字段类型校验
    pub fn with_schema(mut self, schema: ContextSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule> {
        let rule: RuleDefinition = serde_json::from_str(json)?;
        self.compile(rule)
    }

    /// 编译规则
    pub fn compile(&mut self, rule: RuleDefinition) -> Result<CompiledRule> {
        self.validate(&rule)?;

        let mut required_fields = HashSet::new();
        Self::collect_fields(&rule.condition, &mut required_fields);

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            required_fields,
            compile_version: self.compile_version,
        })
    }

    /// 只做校验，不分配编译版本
    pub fn validate(&self, rule: &RuleDefinition) -> Result<()> {
        if rule.rule_id.is_empty() {
            return Err(RuleError::Definition("规则 ID 不能为空".to_string()));
        }

        if rule.name.trim().is_empty() {
            return Err(RuleError::Definition("规则名称不能为空".to_string()));
        }

        self.validate_group(&rule.condition, "condition", 1)?;
        self.validate_action(&rule.action)?;

        Ok(())
    }

    /// 验证条件组
    fn validate_group(&self, group: &ConditionGroup, path: &str, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(RuleError::Definition(format!(
                "条件组 '{}' 嵌套超过 {} 层",
                path, self.max_depth
            )));
        }

        let count = group.predicate_count();
        match group.combinator {
            // NOT 作用于多个谓词存在歧义，只允许恰好一个子谓词
            Combinator::Not if count != 1 => {
                return Err(RuleError::Definition(format!(
                    "NOT 条件组 '{}' 必须恰好包含一个子谓词，当前有 {} 个",
                    path, count
                )));
            }
            Combinator::And | Combinator::Or if count == 0 => {
                return Err(RuleError::Definition(format!("条件组 '{}' 不能为空", path)));
            }
            _ => {}
        }

        for (i, rule) in group.rules.iter().enumerate() {
            self.validate_condition(rule, &format!("{}.rules[{}]", path, i))?;
        }

        for (i, child) in group.groups.iter().enumerate() {
            self.validate_group(child, &format!("{}.groups[{}]", path, i), depth + 1)?;
        }

        Ok(())
    }

    /// 验证条件谓词
    fn validate_condition(&self, cond: &ConditionRule, path: &str) -> Result<()> {
        if !FIELD_PATH.is_match(&cond.field) {
            return Err(RuleError::Definition(format!(
                "条件 '{}' 的字段路径无效: '{}'",
                path, cond.field
            )));
        }

        if cond.operator.requires_array() && !cond.value.is_array() {
            return Err(RuleError::Definition(format!(
                "条件 '{}' 的 {} 操作符需要数组值",
                path, cond.operator
            )));
        }

        if cond.operator.is_numeric() && !cond.value.is_number() {
            return Err(RuleError::Definition(format!(
                "条件 '{}' 的 {} 操作符需要数值",
                path, cond.operator
            )));
        }

        if !cond.operator.requires_array() && (cond.value.is_array() || cond.value.is_object()) {
            return Err(RuleError::Definition(format!(
                "条件 '{}' 的 {} 操作符需要标量值",
                path, cond.operator
            )));
        }

        if let Some(schema) = &self.schema {
            schema
                .check(&cond.field, cond.operator)
                .map_err(|e| RuleError::Definition(format!("条件 '{}': {}", path, e)))?;
        }

        Ok(())
    }

    /// 验证动作
    fn validate_action(&self, action: &RuleAction) -> Result<()> {
        if action.modification.reason.trim().is_empty() {
            return Err(RuleError::Definition("变更原因不能为空".to_string()));
        }

        let phase = &action.phase;
        if phase.id.trim().is_empty() {
            return Err(RuleError::Definition("阶段 id 不能为空".to_string()));
        }

        if phase.target_duration_days == 0 {
            return Err(RuleError::Definition(format!(
                "阶段 '{}' 的目标天数必须为正整数",
                phase.id
            )));
        }

        let mut seen = HashSet::with_capacity(phase.module_ids.len());
        if let Some(dup) = phase.module_ids.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(RuleError::Definition(format!(
                "阶段 '{}' 的模块 '{}' 重复",
                phase.id, dup
            )));
        }

        let has_reference = phase
            .reference_phase_id
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());

        if phase.position.requires_reference() && !has_reference {
            return Err(RuleError::Definition(format!(
                "阶段 '{}' 的位置 {:?} 需要 reference_phase_id",
                phase.id, phase.position
            )));
        }

        match action.kind {
            ActionKind::InsertPhase if phase.position == PhasePosition::Replace => {
                Err(RuleError::Definition(format!(
                    "INSERT_PHASE '{}' 不能使用 REPLACE 位置，请使用 REPLACE_PHASE",
                    phase.id
                )))
            }
            ActionKind::ReplacePhase if !has_reference => Err(RuleError::Definition(format!(
                "REPLACE_PHASE '{}' 需要 reference_phase_id",
                phase.id
            ))),
            _ => Ok(()),
        }
    }

    /// 递归收集字段
    fn collect_fields(group: &ConditionGroup, fields: &mut HashSet<String>) {
        for rule in &group.rules {
            fields.insert(rule.field.clone());
        }
        for child in &group.groups {
            Self::collect_fields(child, fields);
        }
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn rule_json(condition: &str, action: &str) -> String {
        format!(
            r#"{{
                "rule_id": "rule-001",
                "name": "low_credit_score",
                "priority": 10,
                "condition": {},
                "action": {}
            }}"#,
            condition, action
        )
    }

    const INSERT_AFTER: &str = r#"{
        "kind": "INSERT_PHASE",
        "phase": {"id": "manual-review", "position": "AFTER", "reference_phase_id": "assessment", "target_duration_days": 3},
        "modification": {"reason": "信用分过低", "criticality": "HIGH"}
    }"#;

    const CREDIT_CONDITION: &str = r#"{
        "combinator": "AND",
        "rules": [{"field": "customer_data.credit_score", "operator": "LESS_THAN", "value": 620}],
        "groups": [{
            "combinator": "OR",
            "rules": [
                {"field": "customer_data.segment", "operator": "EQUALS", "value": "retail"},
                {"field": "risk_flags", "operator": "CONTAINS", "value": "PEP"}
            ]
        }]
    }"#;

    #[test]
    fn test_compile_from_json() {
        let mut compiler = RuleCompiler::new();
        let compiled = compiler
            .compile_from_json(&rule_json(CREDIT_CONDITION, INSERT_AFTER))
            .unwrap();

        assert_eq!(compiled.id(), "rule-001");
        assert_eq!(compiled.priority(), 10);
        assert_eq!(compiled.required_fields.len(), 3);
        assert!(compiled.required_fields.contains("risk_flags"));
    }

    #[test]
    fn test_compile_version() {
        let mut compiler = RuleCompiler::new();
        let json = rule_json(CREDIT_CONDITION, INSERT_AFTER);

        let compiled1 = compiler.compile_from_json(&json).unwrap();
        let compiled2 = compiler.compile_from_json(&json).unwrap();

        assert_eq!(compiled1.compile_version, 1);
        assert_eq!(compiled2.compile_version, 2);
    }

    #[test]
    fn test_reject_not_with_multiple_predicates() {
        let condition = r#"{
            "combinator": "NOT",
            "rules": [
                {"field": "a", "operator": "EQUALS", "value": 1},
                {"field": "b", "operator": "EQUALS", "value": 2}
            ]
        }"#;

        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(condition, INSERT_AFTER))
            .unwrap_err();
        assert!(err.to_string().contains("恰好包含一个子谓词"));
    }

    #[test]
    fn test_accept_not_with_single_group() {
        let condition = r#"{
            "combinator": "NOT",
            "groups": [{
                "combinator": "AND",
                "rules": [{"field": "a", "operator": "EQUALS", "value": 1}]
            }]
        }"#;

        assert!(RuleCompiler::new()
            .compile_from_json(&rule_json(condition, INSERT_AFTER))
            .is_ok());
    }

    #[test]
    fn test_reject_empty_group() {
        let condition = r#"{"combinator": "OR", "rules": []}"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(condition, INSERT_AFTER))
            .unwrap_err();
        assert!(err.to_string().contains("不能为空"));
    }

    #[test]
    fn test_reject_in_with_scalar() {
        let condition = r#"{
            "combinator": "AND",
            "rules": [{"field": "country", "operator": "IN", "value": "DE"}]
        }"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(condition, INSERT_AFTER))
            .unwrap_err();
        assert!(err.to_string().contains("需要数组值"));
    }

    #[test]
    fn test_reject_numeric_operator_with_string_value() {
        let condition = r#"{
            "combinator": "AND",
            "rules": [{"field": "score", "operator": "GREATER_THAN", "value": "high"}]
        }"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(condition, INSERT_AFTER))
            .unwrap_err();
        assert!(matches!(err, RuleError::Definition(_)));
    }

    #[test]
    fn test_reject_invalid_field_path() {
        let condition = r#"{
            "combinator": "AND",
            "rules": [{"field": "customer_data..score", "operator": "EQUALS", "value": 1}]
        }"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(condition, INSERT_AFTER))
            .unwrap_err();
        assert!(err.to_string().contains("字段路径无效"));
    }

    #[test]
    fn test_reject_missing_reference() {
        let action = r#"{
            "kind": "INSERT_PHASE",
            "phase": {"id": "x", "position": "BEFORE", "target_duration_days": 1},
            "modification": {"reason": "r", "criticality": "LOW"}
        }"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(CREDIT_CONDITION, action))
            .unwrap_err();
        assert!(err.to_string().contains("reference_phase_id"));
    }

    #[test]
    fn test_reject_empty_reason_and_zero_duration() {
        let empty_reason = r#"{
            "kind": "INSERT_PHASE",
            "phase": {"id": "x", "position": "AT_END", "target_duration_days": 1},
            "modification": {"reason": "  ", "criticality": "LOW"}
        }"#;
        assert!(RuleCompiler::new()
            .compile_from_json(&rule_json(CREDIT_CONDITION, empty_reason))
            .is_err());

        let zero_duration = r#"{
            "kind": "INSERT_PHASE",
            "phase": {"id": "x", "position": "AT_END", "target_duration_days": 0},
            "modification": {"reason": "r", "criticality": "LOW"}
        }"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(CREDIT_CONDITION, zero_duration))
            .unwrap_err();
        assert!(err.to_string().contains("正整数"));
    }

    #[test]
    fn test_reject_duplicate_modules() {
        let action = r#"{
            "kind": "INSERT_PHASE",
            "phase": {"id": "x", "position": "AT_END", "module_ids": ["m1", "m1"], "target_duration_days": 1},
            "modification": {"reason": "r", "criticality": "LOW"}
        }"#;
        let err = RuleCompiler::new()
            .compile_from_json(&rule_json(CREDIT_CONDITION, action))
            .unwrap_err();
        assert!(err.to_string().contains("重复"));
    }

    #[test]
    fn test_reject_insert_with_replace_position() {
        let action = r#"{
            "kind": "INSERT_PHASE",
            "phase": {"id": "x", "position": "REPLACE", "reference_phase_id": "a", "target_duration_days": 1},
            "modification": {"reason": "r", "criticality": "LOW"}
        }"#;
        assert!(RuleCompiler::new()
            .compile_from_json(&rule_json(CREDIT_CONDITION, action))
            .is_err());
    }

    #[test]
    fn test_max_depth() {
        let mut group = ConditionGroup::and(vec![ConditionRule::new(
            "a",
            crate::operators::Operator::Equals,
            1,
        )]);
        for _ in 0..3 {
            group = ConditionGroup::and(vec![]).with_group(group);
        }

        let json = rule_json(&serde_json::to_string(&group).unwrap(), INSERT_AFTER);
        assert!(RuleCompiler::new()
            .with_max_depth(3)
            .compile_from_json(&json)
            .is_err());
        assert!(RuleCompiler::new()
            .with_max_depth(4)
            .compile_from_json(&json)
            .is_ok());
    }

    #[test]
    fn test_schema_validation() {
        let schema = ContextSchema::new()
            .with_field("customer_data.credit_score", FieldType::Number)
            .with_field("customer_data.segment", FieldType::String)
            .with_field("risk_flags", FieldType::Array);

        let mut compiler = RuleCompiler::new().with_schema(schema);
        assert!(compiler
            .compile_from_json(&rule_json(CREDIT_CONDITION, INSERT_AFTER))
            .is_ok());

        let unknown = r#"{
            "combinator": "AND",
            "rules": [{"field": "customer_data.age", "operator": "GREATER_THAN", "value": 18}]
        }"#;
        let err = compiler
            .compile_from_json(&rule_json(unknown, INSERT_AFTER))
            .unwrap_err();
        assert!(err.to_string().contains("不在上下文模式中"));
    }
}
