//! 旅程变更器
//!
//! 把单条规则动作应用到旅程上，返回新旅程和变更记录。
//! 输入旅程不会被修改。
//!
//! 一次评估共用一个变更器实例：它记录每个引用阶段最近一次 AFTER 插入的阶段，
//! 使低优先级规则对同一引用的 AFTER 插入排在高优先级插入之后。

use crate::error::{Result, RuleError};
use crate::journey::{Journey, ModificationRecord, Phase};
use crate::models::{ActionKind, PhasePosition, RuleAction};
use std::collections::HashMap;
use tracing::debug;

/// 旅程变更器
#[derive(Debug, Default)]
pub struct JourneyMutator {
    /// 引用阶段 id -> 本次评估中最后一次插入在其后的阶段 id
    after_anchors: HashMap<String, String>,
}

impl JourneyMutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用动作
    ///
    /// 成功时返回新旅程和变更记录；引用阶段缺失时返回 `ReferenceNotFound`，
    /// 调用方应跳过该动作而不是中断整次评估。
    pub fn apply(
        &mut self,
        journey: &Journey,
        action: &RuleAction,
    ) -> Result<(Journey, ModificationRecord)> {
        let mut next = journey.clone();
        let (phase_id, suppressed) = match action.kind {
            ActionKind::InsertPhase => self.insert(&mut next, action)?,
            ActionKind::RemovePhase => Self::remove(&mut next, action),
            ActionKind::ReplacePhase => self.replace(&mut next, action)?,
            ActionKind::ModifyPhase => Self::modify(&mut next, action)?,
        };

        debug!(
            action = %action.kind,
            phase_id = %phase_id,
            duplicate_suppressed = suppressed,
            "动作已应用"
        );

        let record = ModificationRecord {
            rule_id: None,
            rule_name: None,
            action: action.kind,
            phase_id,
            reference_phase_id: action.phase.reference_phase_id.clone(),
            reason: action.modification.reason.clone(),
            criticality: action.modification.criticality,
            duplicate_suppressed: suppressed,
        };

        Ok((next, record))
    }

    /// 插入阶段；同 id 阶段已存在时不做变化并标记为重复抑制
    fn insert(&mut self, journey: &mut Journey, action: &RuleAction) -> Result<(String, bool)> {
        let phase = Phase::from(&action.phase);
        let phase_id = phase.id.clone();

        if journey.contains(&phase_id) {
            return Ok((phase_id, true));
        }

        let index = match action.phase.position {
            PhasePosition::AtStart => 0,
            PhasePosition::AtEnd => journey.len(),
            PhasePosition::Before => Self::reference_index(journey, action)?,
            PhasePosition::After => {
                let reference = Self::reference_id(action)?;
                let reference_index = Self::reference_index(journey, action)?;
                // 同一引用上已有更高优先级的 AFTER 插入时，以最后插入的阶段为锚点
                let anchor_index = self
                    .after_anchors
                    .get(reference)
                    .and_then(|anchor| journey.position_of(anchor))
                    .filter(|&i| i > reference_index)
                    .unwrap_or(reference_index);
                self.after_anchors
                    .insert(reference.to_string(), phase_id.clone());
                anchor_index + 1
            }
            PhasePosition::Replace => {
                return Err(RuleError::Definition(format!(
                    "INSERT_PHASE '{}' 不能使用 REPLACE 位置",
                    phase_id
                )));
            }
        };

        journey.insert_at(index, phase);
        Ok((phase_id, false))
    }

    /// 删除阶段；目标不存在时为幂等空操作
    fn remove(journey: &mut Journey, action: &RuleAction) -> (String, bool) {
        let target = action.phase.target_phase_id().to_string();
        match journey.position_of(&target) {
            Some(index) => {
                journey.remove_at(index);
                (target, false)
            }
            None => (target, true),
        }
    }

    /// 替换引用阶段，新阶段占据原位置
    fn replace(&mut self, journey: &mut Journey, action: &RuleAction) -> Result<(String, bool)> {
        let reference = Self::reference_id(action)?;
        let index = Self::reference_index(journey, action)?;
        let phase = Phase::from(&action.phase);
        let phase_id = phase.id.clone();

        if phase_id != reference && journey.contains(&phase_id) {
            return Err(RuleError::DuplicatePhase { phase_id });
        }

        journey.replace_at(index, phase);

        // 锚点中的旧阶段 id 一律改指新阶段，无论它是引用还是最近插入的阶段
        if let Some(anchor) = self.after_anchors.remove(reference) {
            self.after_anchors.insert(phase_id.clone(), anchor);
        }
        for anchor in self.after_anchors.values_mut() {
            if anchor.as_str() == reference {
                *anchor = phase_id.clone();
            }
        }

        Ok((phase_id, false))
    }

    /// 原地修改目标阶段的目标天数和模块列表
    fn modify(journey: &mut Journey, action: &RuleAction) -> Result<(String, bool)> {
        let target = action.phase.target_phase_id().to_string();
        let index = journey
            .position_of(&target)
            .ok_or_else(|| RuleError::ReferenceNotFound {
                phase_id: target.clone(),
            })?;

        let phase = journey.phase_mut(index);
        let mut changed = false;

        if phase.target_duration_days != action.phase.target_duration_days {
            phase.target_duration_days = action.phase.target_duration_days;
            changed = true;
        }

        // 动作未列出模块时保留原模块
        if !action.phase.module_ids.is_empty() && phase.module_ids != action.phase.module_ids {
            phase.module_ids = action.phase.module_ids.clone();
            changed = true;
        }

        Ok((target, !changed))
    }

    fn reference_id(action: &RuleAction) -> Result<&str> {
        action.phase.reference_phase_id.as_deref().ok_or_else(|| {
            RuleError::Definition(format!(
                "阶段 '{}' 的动作缺少 reference_phase_id",
                action.phase.id
            ))
        })
    }

    fn reference_index(journey: &Journey, action: &RuleAction) -> Result<usize> {
        let reference = Self::reference_id(action)?;
        journey
            .position_of(reference)
            .ok_or_else(|| RuleError::ReferenceNotFound {
                phase_id: reference.to_string(),
            })
    }
}
