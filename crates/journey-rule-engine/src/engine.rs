//! 规则引擎编排器
//!
//! 按快照顺序评估规则、逐条应用动作并汇总风险分。
//!
//! 当前快照保存在 `ArcSwap` 中：评估开始时原子 load 一次并在整个评估过程中持有，
//! 重载只替换指针，进行中的评估始终使用它开始时的快照。
//! 单条规则的条件错误或动作错误只会跳过该规则，不会中断整次评估；
//! 条件引用的字段缺失时谓词按 false 处理，并作为字段告警写入报告。

use crate::compiler::CompiledRule;
use crate::error::{Result, RuleError};
use crate::executor::{MatchResult, RuleExecutor};
use crate::journey::{Journey, ModificationRecord};
use crate::models::EvaluationContext;
use crate::mutator::JourneyMutator;
use crate::repository::JourneyRepository;
use crate::risk;
use crate::snapshot::{RuleSnapshot, RuleSource};
use arc_swap::ArcSwap;
use journey_shared::config::RuleEngineConfig;
use journey_shared::observability::metrics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 单次评估的状态
///
/// 规则级错误只会跳过规则，评估本身总能到达 `Done`；
/// `Failed` 仅出现在评估开始前旅程加载失败时（`Idle -> Failed`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationState {
    Idle,
    Evaluating,
    Done,
    Failed,
}

impl EvaluationState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Evaluating)
                | (Self::Idle, Self::Failed)
                | (Self::Evaluating, Self::Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn advance(self, next: Self) -> Self {
        debug_assert!(self.can_transition_to(next), "{} -> {}", self, next);
        debug!(from = %self, to = %next, "评估状态变更");
        next
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Evaluating => "EVALUATING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// 评估结果
///
/// 不包含耗时等非确定性信息，相同输入序列化后逐字节一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub original_journey_id: String,
    pub modified_journey: Journey,
    /// 按应用顺序排列
    pub modifications: Vec<ModificationRecord>,
    pub total_phases_added: usize,
    pub total_phases_removed: usize,
    pub risk_score: f64,
}

/// 规则被跳过的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipStage {
    /// 条件无法求值（类型不匹配）
    Condition,
    /// 动作无法应用（引用阶段缺失等）
    Action,
}

/// 被跳过的规则
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRule {
    pub rule_id: String,
    pub rule_name: String,
    pub stage: SkipStage,
    pub error_kind: String,
    pub reason: String,
}

impl SkippedRule {
    fn new(rule: &CompiledRule, stage: SkipStage, error: &RuleError) -> Self {
        Self {
            rule_id: rule.id().to_string(),
            rule_name: rule.name().to_string(),
            stage,
            error_kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// 条件字段缺失告警，对应谓词已按 false 处理
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWarning {
    pub rule_id: String,
    pub rule_name: String,
    pub field: String,
}

/// 评估报告：评估结果加上可观测性信息
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub result: EvaluationResult,
    pub state: EvaluationState,
    pub snapshot_revision: u64,
    /// 条件匹配的规则 ID（含动作被跳过的规则）
    pub matched_rules: Vec<String>,
    pub skipped: Vec<SkippedRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_warnings: Vec<FieldWarning>,
    /// 启用条件追踪时每条规则的匹配详情
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<MatchResult>,
    pub elapsed_micros: u64,
}

/// 单条规则的处理结果
enum RuleOutcome {
    NotMatched,
    Applied(Journey, ModificationRecord),
    Skipped(SkippedRule),
}

/// 规则引擎
pub struct RuleEngine {
    source: Arc<dyn RuleSource>,
    snapshot: ArcSwap<RuleSnapshot>,
    journeys: Option<Arc<dyn JourneyRepository>>,
    executor: RuleExecutor,
}

impl RuleEngine {
    /// 创建引擎并立即加载一次快照
    ///
    /// 初次加载失败时以空快照启动，等待后续重载信号或定期同步恢复。
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        let engine = Self {
            source,
            snapshot: ArcSwap::from_pointee(RuleSnapshot::empty()),
            journeys: None,
            executor: RuleExecutor::new(),
        };

        if let Err(e) = engine.reload() {
            warn!(error = %e, "初始规则快照加载失败，使用空快照启动");
        }

        engine
    }

    /// 按配置创建引擎
    pub fn from_config(source: Arc<dyn RuleSource>, config: &RuleEngineConfig) -> Self {
        let engine = Self::new(source);
        if config.trace_conditions {
            engine.with_trace()
        } else {
            engine
        }
    }

    pub fn with_journey_repository(mut self, journeys: Arc<dyn JourneyRepository>) -> Self {
        self.journeys = Some(journeys);
        self
    }

    /// 启用条件评估追踪
    pub fn with_trace(mut self) -> Self {
        self.executor = self.executor.with_trace();
        self
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot.load_full()
    }

    /// 立即从规则来源刷新快照（幂等）
    ///
    /// 读取失败时保留原快照并返回错误。快照修订号只增不减：
    /// 读到的修订号低于当前快照时保留当前快照，返回当前修订号。
    #[instrument(skip(self))]
    pub fn reload(&self) -> Result<u64> {
        let revision = self.source.revision();
        let rules = match self.source.list_active_rules_sorted() {
            Ok(rules) => rules,
            Err(e) => {
                metrics::record_snapshot_reload("failed");
                warn!(error = %e, "规则快照重载失败，保留当前快照");
                return Err(e);
            }
        };

        let fresh = Arc::new(RuleSnapshot::new(revision, rules));
        let count = fresh.len();
        let previous = self.snapshot.rcu(|current| {
            if current.revision() > revision {
                Arc::clone(current)
            } else {
                Arc::clone(&fresh)
            }
        });

        if previous.revision() > revision {
            metrics::record_snapshot_reload("stale");
            debug!(
                current = previous.revision(),
                revision, "读到的修订号落后于当前快照，保留当前快照"
            );
            return Ok(previous.revision());
        }

        metrics::record_snapshot_reload("success");
        info!(revision, rules = count, "规则快照已重载");
        Ok(revision)
    }

    /// 来源修订号比当前快照新时才重载，返回是否发生了重载
    pub fn reload_if_stale(&self) -> Result<bool> {
        if self.source.revision() <= self.snapshot.load().revision() {
            return Ok(false);
        }
        self.reload().map(|_| true)
    }

    /// 使用当前快照评估旅程
    pub fn evaluate(&self, journey: &Journey, context: &EvaluationContext) -> EvaluationReport {
        let snapshot = self.snapshot.load_full();
        self.evaluate_with_snapshot(&snapshot, journey, context)
    }

    /// 先从仓储加载旅程再评估
    #[instrument(skip(self, context))]
    pub async fn evaluate_journey(
        &self,
        journey_id: &str,
        context: &EvaluationContext,
    ) -> Result<EvaluationReport> {
        let started = Instant::now();
        let loaded = match &self.journeys {
            Some(repo) => repo.get_journey_by_id(journey_id).await,
            None => Err(RuleError::JourneyNotFound(format!(
                "{} (未配置旅程仓储)",
                journey_id
            ))),
        };

        match loaded {
            Ok(journey) => Ok(self.evaluate(&journey, context)),
            Err(e) => {
                let state = EvaluationState::Idle.advance(EvaluationState::Failed);
                metrics::record_journey_evaluation(
                    &state.to_string(),
                    started.elapsed().as_secs_f64(),
                );
                warn!(error = %e, state = %state, "旅程加载失败");
                Err(e)
            }
        }
    }

    /// 使用指定快照评估旅程
    #[instrument(
        skip_all,
        fields(journey_id = %journey.id, revision = snapshot.revision(), rules = snapshot.len())
    )]
    pub fn evaluate_with_snapshot(
        &self,
        snapshot: &RuleSnapshot,
        journey: &Journey,
        context: &EvaluationContext,
    ) -> EvaluationReport {
        let started = Instant::now();
        let state = EvaluationState::Idle.advance(EvaluationState::Evaluating);

        let mut mutator = JourneyMutator::new();
        let mut current = journey.clone();
        let mut modifications = Vec::new();
        let mut matched_rules = Vec::new();
        let mut skipped = Vec::new();
        let mut field_warnings = Vec::new();
        let mut traces = Vec::new();

        for rule in snapshot.iter() {
            let outcome = self.process_rule(
                rule,
                &current,
                context,
                &mut mutator,
                &mut field_warnings,
                &mut traces,
            );
            match outcome {
                RuleOutcome::NotMatched => {}
                RuleOutcome::Applied(next, record) => {
                    matched_rules.push(rule.id().to_string());
                    current = next;
                    modifications.push(record);
                }
                RuleOutcome::Skipped(skip) => {
                    if skip.stage == SkipStage::Action {
                        matched_rules.push(rule.id().to_string());
                    }
                    metrics::record_rule_skipped(&skip.error_kind);
                    skipped.push(skip);
                }
            }
        }

        let (added, removed) = phase_set_difference(journey, &current);
        let risk_score = risk::score_modifications(&modifications);

        let result = EvaluationResult {
            original_journey_id: journey.id.clone(),
            modified_journey: current,
            modifications,
            total_phases_added: added,
            total_phases_removed: removed,
            risk_score,
        };

        let state = state.advance(EvaluationState::Done);
        let elapsed = started.elapsed();
        metrics::record_journey_evaluation(&state.to_string(), elapsed.as_secs_f64());

        info!(
            matched = matched_rules.len(),
            applied = result.modifications.len(),
            skipped = skipped.len(),
            field_warnings = field_warnings.len(),
            risk_score = result.risk_score,
            "旅程评估完成"
        );

        EvaluationReport {
            result,
            state,
            snapshot_revision: snapshot.revision(),
            matched_rules,
            skipped,
            field_warnings,
            traces,
            elapsed_micros: elapsed.as_micros() as u64,
        }
    }

    /// 评估单条规则的条件并在匹配时应用其动作
    fn process_rule(
        &self,
        rule: &CompiledRule,
        current: &Journey,
        context: &EvaluationContext,
        mutator: &mut JourneyMutator,
        field_warnings: &mut Vec<FieldWarning>,
        traces: &mut Vec<MatchResult>,
    ) -> RuleOutcome {
        let matched = match self.executor.execute(rule, context) {
            Ok(result) => {
                let matched = result.matched;
                for field in &result.unresolved_fields {
                    let warning = RuleError::FieldResolution(field.clone());
                    warn!(rule_id = %rule.id(), warning = %warning, "谓词按 false 处理");
                    metrics::record_field_warning();
                    field_warnings.push(FieldWarning {
                        rule_id: rule.id().to_string(),
                        rule_name: rule.name().to_string(),
                        field: field.clone(),
                    });
                }
                if self.executor.trace_enabled() {
                    traces.push(result);
                }
                matched
            }
            Err(e) => {
                warn!(rule_id = %rule.id(), error = %e, "规则条件无法求值，跳过该规则");
                return RuleOutcome::Skipped(SkippedRule::new(rule, SkipStage::Condition, &e));
            }
        };

        if !matched {
            debug!(rule_id = %rule.id(), "规则未匹配");
            return RuleOutcome::NotMatched;
        }

        match mutator.apply(current, rule.action()) {
            Ok((next, record)) => {
                debug!(rule_id = %rule.id(), action = %record.action, "规则动作已应用");
                RuleOutcome::Applied(next, record.with_rule(&rule.rule))
            }
            Err(e) => {
                warn!(rule_id = %rule.id(), error = %e, "规则动作无法应用，跳过该动作");
                RuleOutcome::Skipped(SkippedRule::new(rule, SkipStage::Action, &e))
            }
        }
    }
}

/// 原始与最终阶段 id 集合的净差：(新增数, 删除数)
fn phase_set_difference(original: &Journey, modified: &Journey) -> (usize, usize) {
    let before: HashSet<&str> = original.phase_ids().into_iter().collect();
    let after: HashSet<&str> = modified.phase_ids().into_iter().collect();
    (
        after.difference(&before).count(),
        before.difference(&after).count(),
    )
}
