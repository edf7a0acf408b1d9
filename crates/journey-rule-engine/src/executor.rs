//! 条件执行器
//!
//! 递归评估条件树，AND/OR 短路求值，NOT 对唯一子谓词取反。
//! 字段不存在时该谓词按 false 处理，并在结果中记录一条字段告警；
//! 类型不匹配仍返回错误，由引擎将该规则记为跳过。

use crate::compiler::CompiledRule;
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{ConditionGroup, ConditionRule, EvaluationContext, Predicate};
use crate::operators::Combinator;
use serde::Serialize;

/// 单条规则的条件匹配结果
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    pub rule_id: String,
    pub rule_name: String,
    pub matched_conditions: Vec<String>,
    pub evaluation_trace: Vec<String>,
    /// 无法解析的字段路径，对应谓词已按 false 处理
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_fields: Vec<String>,
}

impl MatchResult {
    pub fn new(rule_id: String, rule_name: String) -> Self {
        Self {
            matched: false,
            rule_id,
            rule_name,
            matched_conditions: Vec::new(),
            evaluation_trace: Vec::new(),
            unresolved_fields: Vec::new(),
        }
    }
}

/// 评估条件组（不记录追踪）
pub fn evaluate_group(group: &ConditionGroup, context: &EvaluationContext) -> Result<bool> {
    let mut scratch = MatchResult::new(String::new(), String::new());
    RuleExecutor::new().evaluate_group(group, context, &mut scratch, "condition")
}

/// 规则条件执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// 执行规则条件评估
    pub fn execute(&self, rule: &CompiledRule, context: &EvaluationContext) -> Result<MatchResult> {
        let mut result = MatchResult::new(rule.id().to_string(), rule.name().to_string());
        result.matched = self.evaluate_group(rule.condition(), context, &mut result, "condition")?;
        Ok(result)
    }

    /// 评估谓词
    fn evaluate_predicate(
        &self,
        predicate: Predicate<'_>,
        context: &EvaluationContext,
        result: &mut MatchResult,
        path: &str,
    ) -> Result<bool> {
        match predicate {
            Predicate::Rule(cond) => self.evaluate_condition(cond, context, result, path),
            Predicate::Group(group) => self.evaluate_group(group, context, result, path),
        }
    }

    /// 评估条件谓词
    fn evaluate_condition(
        &self,
        cond: &ConditionRule,
        context: &EvaluationContext,
        result: &mut MatchResult,
        path: &str,
    ) -> Result<bool> {
        let Some(field_value) = context.get_field(&cond.field) else {
            if !result.unresolved_fields.contains(&cond.field) {
                result.unresolved_fields.push(cond.field.clone());
            }
            if self.trace_enabled {
                result
                    .evaluation_trace
                    .push(format!("{}: {} => FIELD_MISSING (按 false 处理)", path, cond));
            }
            return Ok(false);
        };

        let matched = ConditionEvaluator::evaluate(field_value, cond.operator, &cond.value)?;

        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: {} => {}",
                path,
                cond,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if matched {
            result.matched_conditions.push(format!("{}: {}", path, cond));
        }

        Ok(matched)
    }

    /// 评估条件组（短路求值）
    fn evaluate_group(
        &self,
        group: &ConditionGroup,
        context: &EvaluationContext,
        result: &mut MatchResult,
        path: &str,
    ) -> Result<bool> {
        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: 开始评估 {} 组 (共 {} 个子谓词)",
                path,
                group.combinator,
                group.predicate_count()
            ));
        }

        let child_path = |predicate: &Predicate<'_>, index: usize| match predicate {
            Predicate::Rule(_) => format!("{}.rules[{}]", path, index),
            Predicate::Group(_) => format!("{}.groups[{}]", path, index - group.rules.len()),
        };

        match group.combinator {
            Combinator::And => {
                // AND: 所有谓词都必须满足，遇到 false 立即返回
                for (i, predicate) in group.predicates().enumerate() {
                    let p = child_path(&predicate, i);
                    if !self.evaluate_predicate(predicate, context, result, &p)? {
                        if self.trace_enabled {
                            result
                                .evaluation_trace
                                .push(format!("{}: AND 短路 - {} 不匹配", path, p));
                        }
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Combinator::Or => {
                // OR: 任一谓词满足即可，遇到 true 立即返回
                for (i, predicate) in group.predicates().enumerate() {
                    let p = child_path(&predicate, i);
                    if self.evaluate_predicate(predicate, context, result, &p)? {
                        if self.trace_enabled {
                            result
                                .evaluation_trace
                                .push(format!("{}: OR 短路 - {} 匹配", path, p));
                        }
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Combinator::Not => {
                // 编译期已保证恰好一个子谓词，这里仍拒绝未经编译的条件树
                let mut predicates = group.predicates();
                match (predicates.next(), predicates.next()) {
                    (Some(predicate), None) => {
                        let p = child_path(&predicate, 0);
                        let inner = self.evaluate_predicate(predicate, context, result, &p)?;
                        Ok(!inner)
                    }
                    _ => Err(RuleError::Definition(format!(
                        "NOT 条件组 '{}' 必须恰好包含一个子谓词，当前有 {} 个",
                        path,
                        group.predicate_count()
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::operators::Operator;
    use serde_json::json;

    fn create_test_context() -> EvaluationContext {
        EvaluationContext::new(json!({
            "customer_data": {
                "credit_score": 600,
                "segment": "retail",
                "country": "DE"
            },
            "transaction_data": {
                "amount": 250000,
                "channel": "online"
            },
            "risk_flags": ["PEP", "HIGH_VALUE"],
            "compliance_requirements": ["KYC", "AML"]
        }))
    }

    fn compile_rule(condition: &str) -> CompiledRule {
        let json = format!(
            r#"{{
                "rule_id": "rule-001",
                "name": "test",
                "condition": {},
                "action": {{
                    "kind": "INSERT_PHASE",
                    "phase": {{"id": "x", "position": "AT_END", "target_duration_days": 1}},
                    "modification": {{"reason": "r", "criticality": "LOW"}}
                }}
            }}"#,
            condition
        );
        RuleCompiler::new().compile_from_json(&json).unwrap()
    }

    #[test]
    fn test_simple_condition_match() {
        let rule = compile_rule(
            r#"{"combinator": "AND", "rules": [
                {"field": "customer_data.credit_score", "operator": "LESS_THAN", "value": 620}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .execute(&rule, &create_test_context())
            .unwrap();

        assert!(result.matched);
        assert_eq!(result.matched_conditions.len(), 1);
    }

    #[test]
    fn test_and_group_short_circuit() {
        let rule = compile_rule(
            r#"{"combinator": "AND", "rules": [
                {"field": "customer_data.segment", "operator": "EQUALS", "value": "corporate"},
                {"field": "customer_data.unknown", "operator": "EQUALS", "value": 1}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .with_trace()
            .execute(&rule, &create_test_context())
            .unwrap();

        // 第一个谓词不匹配，第二个（字段缺失）不会被评估
        assert!(!result.matched);
        assert!(result.evaluation_trace.iter().any(|t| t.contains("短路")));
    }

    #[test]
    fn test_or_group_short_circuit() {
        let rule = compile_rule(
            r#"{"combinator": "OR", "rules": [
                {"field": "risk_flags", "operator": "CONTAINS", "value": "PEP"},
                {"field": "customer_data.unknown", "operator": "EQUALS", "value": 1}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .with_trace()
            .execute(&rule, &create_test_context())
            .unwrap();

        assert!(result.matched);
        assert!(result.evaluation_trace.iter().any(|t| t.contains("OR 短路")));
    }

    #[test]
    fn test_not_group() {
        let rule = compile_rule(
            r#"{"combinator": "NOT", "rules": [
                {"field": "customer_data.country", "operator": "IN", "value": ["US", "GB"]}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .execute(&rule, &create_test_context())
            .unwrap();
        assert!(result.matched);
    }

    #[test]
    fn test_nested_groups() {
        // credit_score < 620 AND (segment == corporate OR (amount > 100000 AND NOT channel == branch))
        let rule = compile_rule(
            r#"{
                "combinator": "AND",
                "rules": [{"field": "customer_data.credit_score", "operator": "LESS_THAN", "value": 620}],
                "groups": [{
                    "combinator": "OR",
                    "rules": [{"field": "customer_data.segment", "operator": "EQUALS", "value": "corporate"}],
                    "groups": [{
                        "combinator": "AND",
                        "rules": [{"field": "transaction_data.amount", "operator": "GREATER_THAN", "value": 100000}],
                        "groups": [{
                            "combinator": "NOT",
                            "rules": [{"field": "transaction_data.channel", "operator": "EQUALS", "value": "branch"}]
                        }]
                    }]
                }]
            }"#,
        );

        let result = RuleExecutor::new()
            .execute(&rule, &create_test_context())
            .unwrap();
        assert!(result.matched);
    }

    #[test]
    fn test_missing_field_evaluates_false() {
        let rule = compile_rule(
            r#"{"combinator": "AND", "rules": [
                {"field": "customer_data.income", "operator": "GREATER_THAN", "value": 1000}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .with_trace()
            .execute(&rule, &create_test_context())
            .unwrap();
        assert!(!result.matched);
        assert_eq!(result.unresolved_fields, vec!["customer_data.income".to_string()]);
        assert!(result.evaluation_trace.iter().any(|t| t.contains("FIELD_MISSING")));
    }

    #[test]
    fn test_or_with_missing_field_falls_through() {
        let rule = compile_rule(
            r#"{"combinator": "OR", "rules": [
                {"field": "customer_data.net_worth", "operator": "GREATER_THAN", "value": 1000000},
                {"field": "risk_flags", "operator": "CONTAINS", "value": "PEP"}
            ]}"#,
        );
        let ctx = EvaluationContext::new(json!({"customer_data": {}, "risk_flags": ["PEP"]}));

        let result = RuleExecutor::new().execute(&rule, &ctx).unwrap();
        assert!(result.matched);
        assert_eq!(result.unresolved_fields, vec!["customer_data.net_worth".to_string()]);
    }

    #[test]
    fn test_not_over_missing_field() {
        let rule = compile_rule(
            r#"{"combinator": "NOT", "rules": [
                {"field": "customer_data.net_worth", "operator": "GREATER_THAN", "value": 1000000}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .execute(&rule, &create_test_context())
            .unwrap();
        // 缺失字段的谓词为 false，取反后为 true
        assert!(result.matched);
        assert_eq!(result.unresolved_fields.len(), 1);
    }

    #[test]
    fn test_evaluate_group_missing_field_is_false() {
        let group = ConditionGroup::new(
            Combinator::And,
            vec![ConditionRule::new("customer_data.unknown", Operator::Equals, 1)],
        );
        assert!(!evaluate_group(&group, &create_test_context()).unwrap());
    }

    #[test]
    fn test_type_mismatch_propagates() {
        let rule = compile_rule(
            r#"{"combinator": "AND", "rules": [
                {"field": "customer_data.segment", "operator": "GREATER_THAN", "value": 1}
            ]}"#,
        );

        let err = RuleExecutor::new()
            .execute(&rule, &create_test_context())
            .unwrap_err();
        assert!(err.is_evaluation_warning());
    }

    #[test]
    fn test_evaluate_group_rejects_uncompiled_not() {
        let group = ConditionGroup::new(
            Combinator::Not,
            vec![
                ConditionRule::new("customer_data.segment", Operator::Equals, "retail"),
                ConditionRule::new("customer_data.country", Operator::Equals, "DE"),
            ],
        );

        let err = evaluate_group(&group, &create_test_context()).unwrap_err();
        assert!(matches!(err, RuleError::Definition(_)));
    }

    #[test]
    fn test_trace_output() {
        let rule = compile_rule(
            r#"{"combinator": "AND", "rules": [
                {"field": "compliance_requirements", "operator": "CONTAINS", "value": "KYC"}
            ]}"#,
        );

        let result = RuleExecutor::new()
            .with_trace()
            .execute(&rule, &create_test_context())
            .unwrap();

        assert!(result.evaluation_trace[0].contains("开始评估 AND"));
        assert!(result.evaluation_trace[1].contains("MATCHED"));
    }
}
