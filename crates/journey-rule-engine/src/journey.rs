//! 流程旅程模型
//!
//! 旅程是一组有序且 id 唯一的阶段。评估过程中产生的旅程只是返回给调用方的值，
//! 引擎从不回写存储。

use crate::error::{Result, RuleError};
use crate::models::{ActionKind, Criticality, PhaseAction, RuleDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 旅程阶段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub module_ids: Vec<String>,
    pub target_duration_days: u32,
}

impl Phase {
    pub fn new(id: impl Into<String>, name: impl Into<String>, target_duration_days: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            module_ids: Vec::new(),
            target_duration_days,
        }
    }

    pub fn with_modules(mut self, module_ids: Vec<String>) -> Self {
        self.module_ids = module_ids;
        self
    }
}

impl From<&PhaseAction> for Phase {
    fn from(action: &PhaseAction) -> Self {
        Self {
            id: action.id.clone(),
            name: action.name.clone(),
            description: action.description.clone(),
            module_ids: action.module_ids.clone(),
            target_duration_days: action.target_duration_days,
        }
    }
}

/// 流程旅程
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Journey {
    pub id: String,
    pub name: String,
    phases: Vec<Phase>,
}

impl Journey {
    /// 创建旅程，阶段 id 重复时失败
    pub fn new(id: impl Into<String>, name: impl Into<String>, phases: Vec<Phase>) -> Result<Self> {
        let id = id.into();
        let mut seen = HashSet::with_capacity(phases.len());
        for phase in &phases {
            if !seen.insert(phase.id.as_str()) {
                return Err(RuleError::InvalidJourney(format!(
                    "旅程 '{}' 中阶段 id '{}' 重复",
                    id, phase.id
                )));
            }
        }

        Ok(Self {
            id,
            name: name.into(),
            phases,
        })
    }

    /// 从 JSON 创建，同样校验阶段唯一性
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawJourney = serde_json::from_str(json)?;
        Self::new(raw.id, raw.name, raw.phases)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phase_ids(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn position_of(&self, phase_id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.id == phase_id)
    }

    pub fn contains(&self, phase_id: &str) -> bool {
        self.position_of(phase_id).is_some()
    }

    pub fn get(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    // 以下变更方法只在 crate 内由变更器调用，调用方负责维护 id 唯一性

    pub(crate) fn insert_at(&mut self, index: usize, phase: Phase) {
        self.phases.insert(index, phase);
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Phase {
        self.phases.remove(index)
    }

    pub(crate) fn replace_at(&mut self, index: usize, phase: Phase) -> Phase {
        std::mem::replace(&mut self.phases[index], phase)
    }

    pub(crate) fn phase_mut(&mut self, index: usize) -> &mut Phase {
        &mut self.phases[index]
    }
}

#[derive(Deserialize)]
struct RawJourney {
    id: String,
    name: String,
    #[serde(default)]
    phases: Vec<Phase>,
}

impl<'de> Deserialize<'de> for Journey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawJourney::deserialize(deserializer)?;
        Journey::new(raw.id, raw.name, raw.phases).map_err(serde::de::Error::custom)
    }
}

/// 变更记录（审计轨迹）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub action: ActionKind,
    pub phase_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_phase_id: Option<String>,
    pub reason: String,
    pub criticality: Criticality,
    /// 重复动作被抑制（如重复删除、重复插入），旅程未发生变化
    #[serde(default)]
    pub duplicate_suppressed: bool,
}

impl ModificationRecord {
    /// 绑定产生该变更的规则
    pub fn with_rule(mut self, rule: &RuleDefinition) -> Self {
        self.rule_id = Some(rule.rule_id.clone());
        self.rule_name = Some(rule.name.clone());
        self
    }
}
