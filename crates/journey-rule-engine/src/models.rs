//! 规则引擎领域模型

use crate::operators::{Combinator, Operator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// 规则定义
///
/// 由规则存储持有，版本号从 1 开始，每次更新递增。
/// 删除永远是软删除（`active = false`），保证历史决策可审计。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 优先级，数值越大越先评估
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub condition: ConditionGroup,
    pub action: RuleAction,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub created_by: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl RuleDefinition {
    /// 由草稿创建新规则（分配 ID，版本为 1）
    pub fn from_draft(draft: RuleDraft) -> Self {
        let now = Utc::now();
        Self {
            rule_id: Uuid::new_v4().to_string(),
            name: draft.name,
            description: draft.description,
            priority: draft.priority,
            active: draft.active,
            condition: draft.condition,
            action: draft.action,
            version: 1,
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// 用草稿内容覆盖当前规则，版本号加一
    ///
    /// ID、创建者和创建时间保持不变。
    pub fn revise(&self, draft: RuleDraft) -> Self {
        Self {
            rule_id: self.rule_id.clone(),
            name: draft.name,
            description: draft.description,
            priority: draft.priority,
            active: draft.active,
            condition: draft.condition,
            action: draft.action,
            version: self.version + 1,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// 规则草稿（规则编写接口的输入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub condition: ConditionGroup,
    pub action: RuleAction,
    #[serde(default)]
    pub created_by: String,
}

impl RuleDraft {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        condition: ConditionGroup,
        action: RuleAction,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            priority,
            active: true,
            condition,
            action,
            created_by: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn created_by(mut self, author: impl Into<String>) -> Self {
        self.created_by = author.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

impl From<&RuleDefinition> for RuleDraft {
    fn from(rule: &RuleDefinition) -> Self {
        Self {
            name: rule.name.clone(),
            description: rule.description.clone(),
            priority: rule.priority,
            active: rule.active,
            condition: rule.condition.clone(),
            action: rule.action.clone(),
            created_by: rule.created_by.clone(),
        }
    }
}

// ==================== 条件表达式 ====================

/// 单个条件谓词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl ConditionRule {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

impl fmt::Display for ConditionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// 条件组：直接谓词与嵌套组共用同一个组合符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub combinator: Combinator,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<ConditionGroup>,
}

impl ConditionGroup {
    pub fn new(combinator: Combinator, rules: Vec<ConditionRule>) -> Self {
        Self {
            combinator,
            rules,
            groups: Vec::new(),
        }
    }

    pub fn and(rules: Vec<ConditionRule>) -> Self {
        Self::new(Combinator::And, rules)
    }

    pub fn or(rules: Vec<ConditionRule>) -> Self {
        Self::new(Combinator::Or, rules)
    }

    /// 对单个谓词取反
    pub fn not(rule: ConditionRule) -> Self {
        Self::new(Combinator::Not, vec![rule])
    }

    /// 对单个嵌套组取反
    pub fn not_group(group: ConditionGroup) -> Self {
        Self {
            combinator: Combinator::Not,
            rules: Vec::new(),
            groups: vec![group],
        }
    }

    pub fn with_group(mut self, group: ConditionGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// 直接谓词与嵌套组的总数
    pub fn predicate_count(&self) -> usize {
        self.rules.len() + self.groups.len()
    }

    /// 按声明顺序遍历子谓词：先直接规则，后嵌套组
    pub fn predicates(&self) -> impl Iterator<Item = Predicate<'_>> {
        self.rules
            .iter()
            .map(Predicate::Rule)
            .chain(self.groups.iter().map(Predicate::Group))
    }
}

/// 条件树节点的借用视图
#[derive(Debug, Clone, Copy)]
pub enum Predicate<'a> {
    Rule(&'a ConditionRule),
    Group(&'a ConditionGroup),
}

// ==================== 动作 ====================

/// 阶段插入位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhasePosition {
    Before,
    After,
    Replace,
    AtStart,
    AtEnd,
}

impl PhasePosition {
    /// 是否需要引用阶段
    pub fn requires_reference(&self) -> bool {
        matches!(self, Self::Before | Self::After | Self::Replace)
    }
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    InsertPhase,
    RemovePhase,
    ReplacePhase,
    ModifyPhase,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InsertPhase => "INSERT_PHASE",
            Self::RemovePhase => "REMOVE_PHASE",
            Self::ReplacePhase => "REPLACE_PHASE",
            Self::ModifyPhase => "MODIFY_PHASE",
        };
        write!(f, "{}", s)
    }
}

/// 变更严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// 阶段动作描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAction {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub position: PhasePosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_phase_id: Option<String>,
    /// 有序且不重复
    #[serde(default)]
    pub module_ids: Vec<String>,
    pub target_duration_days: u32,
}

impl PhaseAction {
    pub fn new(id: impl Into<String>, position: PhasePosition, target_duration_days: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            position,
            reference_phase_id: None,
            module_ids: Vec::new(),
            target_duration_days,
        }
    }

    pub fn with_reference(mut self, phase_id: impl Into<String>) -> Self {
        self.reference_phase_id = Some(phase_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_modules(mut self, module_ids: Vec<String>) -> Self {
        self.module_ids = module_ids;
        self
    }

    /// 删除/修改动作的目标阶段：优先引用阶段，否则为动作自身的 id
    pub fn target_phase_id(&self) -> &str {
        self.reference_phase_id.as_deref().unwrap_or(&self.id)
    }
}

/// 变更说明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub reason: String,
    pub criticality: Criticality,
}

/// 规则动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub kind: ActionKind,
    pub phase: PhaseAction,
    pub modification: Modification,
}

impl RuleAction {
    pub fn new(
        kind: ActionKind,
        phase: PhaseAction,
        reason: impl Into<String>,
        criticality: Criticality,
    ) -> Self {
        Self {
            kind,
            phase,
            modification: Modification {
                reason: reason.into(),
                criticality,
            },
        }
    }
}

// ==================== 评估上下文 ====================

/// 评估上下文 - 提供给规则引擎的业务数据
///
/// 典型结构包括客户属性、交易属性、风险标记集合和合规要求集合。
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    data: Value,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 对象创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 获取字段值（支持点号分隔的路径，如 "customer_data.credit_score"）
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;

        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    // 支持数组索引访问，如 "transactions.0.amount"
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_action() -> RuleAction {
        RuleAction::new(
            ActionKind::InsertPhase,
            PhaseAction::new("manual-review", PhasePosition::After, 3)
                .with_reference("assessment"),
            "信用分过低需要人工复核",
            Criticality::High,
        )
    }

    #[test]
    fn test_rule_definition_deserialization() {
        let json = r#"
        {
            "rule_id": "rule-001",
            "name": "low_credit_score",
            "priority": 10,
            "condition": {
                "combinator": "AND",
                "rules": [
                    {"field": "customer_data.credit_score", "operator": "LESS_THAN", "value": 620}
                ]
            },
            "action": {
                "kind": "INSERT_PHASE",
                "phase": {
                    "id": "manual-review",
                    "position": "AFTER",
                    "reference_phase_id": "assessment",
                    "target_duration_days": 3
                },
                "modification": {"reason": "信用分过低", "criticality": "HIGH"}
            }
        }
        "#;

        let rule: RuleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(rule.rule_id, "rule-001");
        assert!(rule.active);
        assert_eq!(rule.version, 1);
        assert_eq!(rule.condition.rules[0].operator, Operator::LessThan);
        assert_eq!(rule.action.phase.target_phase_id(), "assessment");
        assert_eq!(rule.action.modification.criticality, Criticality::High);
    }

    #[test]
    fn test_rule_serialization_round_trip() {
        let rule = RuleDefinition::from_draft(RuleDraft::new(
            "low_credit_score",
            10,
            ConditionGroup::and(vec![ConditionRule::new(
                "customer_data.credit_score",
                Operator::LessThan,
                620,
            )]),
            sample_action(),
        ));

        let json = serde_json::to_string(&rule).unwrap();
        let parsed: RuleDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);
    }

    #[test]
    fn test_revise_bumps_version() {
        let rule = RuleDefinition::from_draft(
            RuleDraft::new("r", 1, ConditionGroup::and(vec![]), sample_action())
                .created_by("alice"),
        );
        let mut draft = RuleDraft::from(&rule);
        draft.priority = 20;

        let revised = rule.revise(draft);
        assert_eq!(revised.rule_id, rule.rule_id);
        assert_eq!(revised.version, 2);
        assert_eq!(revised.priority, 20);
        assert_eq!(revised.created_by, "alice");
        assert!(revised.updated_at >= rule.updated_at);
    }

    #[test]
    fn test_predicates_order() {
        let group = ConditionGroup::or(vec![ConditionRule::new("a", Operator::Equals, 1)])
            .with_group(ConditionGroup::and(vec![ConditionRule::new(
                "b",
                Operator::Equals,
                2,
            )]));

        let kinds: Vec<&str> = group
            .predicates()
            .map(|p| match p {
                Predicate::Rule(_) => "rule",
                Predicate::Group(_) => "group",
            })
            .collect();
        assert_eq!(kinds, vec!["rule", "group"]);
        assert_eq!(group.predicate_count(), 2);
    }

    #[test]
    fn test_evaluation_context() {
        let ctx = EvaluationContext::new(json!({
            "customer_data": {"credit_score": 600, "segment": "retail"},
            "transaction_data": {"items": [{"amount": 100}]},
            "risk_flags": ["PEP"]
        }));

        assert_eq!(ctx.get_field("customer_data.credit_score"), Some(&json!(600)));
        assert_eq!(
            ctx.get_field("transaction_data.items.0.amount"),
            Some(&json!(100))
        );
        assert_eq!(ctx.get_field("risk_flags"), Some(&json!(["PEP"])));
        assert_eq!(ctx.get_field("customer_data.missing"), None);
        assert_eq!(ctx.get_field("risk_flags.5"), None);
    }

    #[test]
    fn test_criticality_ordering() {
        assert!(Criticality::Critical > Criticality::High);
        assert!(Criticality::Medium > Criticality::Low);
    }
}
