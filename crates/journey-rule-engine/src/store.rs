//! 规则存储管理
//!
//! 使用 DashMap 提供线程安全的规则缓存，支持规则的创建、更新、软删除、启停和批量导入。
//! 每次成功变更都会递增修订号并通过 watch channel 发布重载信号，
//! 引擎据此原子替换快照，二者之间不共享可变状态。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::models::{RuleDefinition, RuleDraft};
use crate::snapshot::{snapshot_order, RuleSnapshot, RuleSource};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// 规则列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub active: Option<bool>,
    pub name_contains: Option<String>,
    pub min_priority: Option<i32>,
    pub created_by: Option<String>,
}

impl RuleFilter {
    pub fn active_only() -> Self {
        Self {
            active: Some(true),
            ..Default::default()
        }
    }

    fn matches(&self, rule: &RuleDefinition) -> bool {
        self.active.is_none_or(|a| rule.active == a)
            && self
                .name_contains
                .as_deref()
                .is_none_or(|s| rule.name.contains(s))
            && self.min_priority.is_none_or(|p| rule.priority >= p)
            && self
                .created_by
                .as_deref()
                .is_none_or(|c| rule.created_by == c)
    }
}

/// 批量导入结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub loaded: Vec<String>,
    /// (规则 ID, 失败原因)
    pub failed: Vec<(String, String)>,
}

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// 编译后的规则
    rules: Arc<DashMap<String, Arc<CompiledRule>>>,
    /// 规则编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
    /// 修订号与重载信号
    reload_tx: Arc<watch::Sender<u64>>,
}

impl RuleStore {
    /// 创建新的规则存储
    pub fn new() -> Self {
        Self::with_compiler(RuleCompiler::new())
    }

    /// 使用自定义编译器（如带上下文模式）创建规则存储
    pub fn with_compiler(compiler: RuleCompiler) -> Self {
        let (reload_tx, _) = watch::channel(0);
        Self {
            rules: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(compiler)),
            reload_tx: Arc::new(reload_tx),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 订阅重载信号，值为最新修订号
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    /// 当前修订号
    pub fn current_revision(&self) -> u64 {
        *self.reload_tx.borrow()
    }

    /// 递增修订号并发布重载信号
    fn publish(&self) -> u64 {
        self.reload_tx.send_modify(|revision| *revision += 1);
        self.current_revision()
    }

    fn compile(&self, rule: RuleDefinition) -> Result<CompiledRule> {
        let mut compiler = self.compiler.lock();
        compiler.compile(rule)
    }

    /// 创建规则（分配 ID，版本为 1）
    #[instrument(skip(self, draft), fields(rule_name = %draft.name))]
    pub fn create(&self, draft: RuleDraft) -> Result<RuleDefinition> {
        let compiled = self.compile(RuleDefinition::from_draft(draft))?;
        let rule = compiled.rule.clone();

        self.rules
            .insert(rule.rule_id.clone(), Arc::new(compiled));
        let revision = self.publish();

        info!(rule_id = %rule.rule_id, revision, "规则已创建");
        Ok(rule)
    }

    /// 更新规则，版本号加一
    #[instrument(skip(self, draft))]
    pub fn update(&self, rule_id: &str, draft: RuleDraft) -> Result<RuleDefinition> {
        let rule = {
            let mut entry = self.rules.get_mut(rule_id).ok_or_else(|| {
                warn!("更新不存在的规则: {}", rule_id);
                RuleError::RuleNotFound(rule_id.to_string())
            })?;

            let compiled = self.compile(entry.rule.revise(draft))?;
            let rule = compiled.rule.clone();
            *entry = Arc::new(compiled);
            rule
        };
        let revision = self.publish();

        info!(version = rule.version, revision, "规则已更新");
        Ok(rule)
    }

    /// 软删除规则（仅置为未启用，不物理删除）
    #[instrument(skip(self))]
    pub fn soft_delete(&self, rule_id: &str) -> Result<RuleDefinition> {
        let rule = self.set_active(rule_id, false)?;
        info!("规则已软删除");
        Ok(rule)
    }

    /// 启用或停用规则
    ///
    /// 状态未变化时不递增版本，也不发布重载信号。
    #[instrument(skip(self))]
    pub fn set_active(&self, rule_id: &str, active: bool) -> Result<RuleDefinition> {
        let (rule, changed) = {
            let mut entry = self.rules.get_mut(rule_id).ok_or_else(|| {
                warn!("启停不存在的规则: {}", rule_id);
                RuleError::RuleNotFound(rule_id.to_string())
            })?;

            if entry.rule.active == active {
                (entry.rule.clone(), false)
            } else {
                let mut updated = (**entry).clone();
                updated.rule.active = active;
                updated.rule.version += 1;
                updated.rule.updated_at = Utc::now();
                let rule = updated.rule.clone();
                *entry = Arc::new(updated);
                (rule, true)
            }
        };

        if changed {
            let revision = self.publish();
            info!(active, version = rule.version, revision, "规则状态已变更");
        }

        Ok(rule)
    }

    /// 获取规则定义
    pub fn get(&self, rule_id: &str) -> Option<RuleDefinition> {
        self.rules.get(rule_id).map(|r| r.rule.clone())
    }

    /// 获取编译后的规则
    pub fn get_compiled(&self, rule_id: &str) -> Option<Arc<CompiledRule>> {
        self.rules.get(rule_id).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    /// 按过滤条件列出规则（按快照顺序排序）
    pub fn list(&self, filter: &RuleFilter) -> Vec<RuleDefinition> {
        let mut rules: Vec<Arc<CompiledRule>> = self
            .rules
            .iter()
            .filter(|r| filter.matches(&r.rule))
            .map(|r| Arc::clone(r.value()))
            .collect();
        rules.sort_by(|a, b| snapshot_order(a, b));
        rules.iter().map(|r| r.rule.clone()).collect()
    }

    /// 生成当前启用规则的不可变快照
    pub fn snapshot(&self) -> RuleSnapshot {
        let revision = self.current_revision();
        let rules = self.rules.iter().map(|r| Arc::clone(r.value())).collect();
        RuleSnapshot::new(revision, rules)
    }

    /// 批量导入已持久化的规则定义（保留 ID 和版本）
    ///
    /// 无效规则被跳过并记录在报告中，不影响其余规则。
    /// 已存在的规则只接受更高版本，版本不高于已有版本的定义记为失败。
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub fn import(&self, rules: Vec<RuleDefinition>) -> ImportReport {
        let mut report = ImportReport::default();

        for rule in rules {
            let rule_id = rule.rule_id.clone();
            match self.compile(rule) {
                Ok(compiled) => match self.rules.entry(rule_id.clone()) {
                    Entry::Occupied(entry)
                        if entry.get().rule.version >= compiled.rule.version =>
                    {
                        let stored = entry.get().rule.version;
                        warn!(
                            rule_id = %rule_id,
                            incoming = compiled.rule.version,
                            stored,
                            "导入版本不高于已有版本，保留已有规则"
                        );
                        report.failed.push((
                            rule_id,
                            format!(
                                "版本 {} 不高于已有版本 {}",
                                compiled.rule.version, stored
                            ),
                        ));
                    }
                    Entry::Occupied(mut entry) => {
                        entry.insert(Arc::new(compiled));
                        report.loaded.push(rule_id);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(Arc::new(compiled));
                        report.loaded.push(rule_id);
                    }
                },
                Err(e) => {
                    warn!(rule_id = %rule_id, error = %e, "规则导入失败");
                    report.failed.push((rule_id, e.to_string()));
                }
            }
        }

        if !report.loaded.is_empty() {
            self.publish();
        }

        info!(
            "批量导入完成: {} 成功, {} 失败",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// 从 JSON 数组导入规则
    pub fn load_from_json(&self, json: &str) -> Result<ImportReport> {
        let rules: Vec<RuleDefinition> = serde_json::from_str(json)?;
        Ok(self.import(rules))
    }

    /// 导出全部规则（含未启用规则）为 JSON 数组
    pub fn export_json(&self) -> Result<String> {
        let rules = self.list(&RuleFilter::default());
        Ok(serde_json::to_string_pretty(&rules)?)
    }

    /// 获取规则统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let rules_count = self.rules.len();
        let active_count = self.rules.iter().filter(|r| r.rule.active).count();
        let total_fields: usize = self.rules.iter().map(|r| r.required_fields.len()).sum();

        RuleStoreStats {
            rules_count,
            active_count,
            total_fields,
            revision: self.current_revision(),
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSource for RuleStore {
    fn list_active_rules_sorted(&self) -> Result<Vec<Arc<CompiledRule>>> {
        Ok(self.snapshot().rules().to_vec())
    }

    fn revision(&self) -> u64 {
        self.current_revision()
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone, Serialize)]
pub struct RuleStoreStats {
    /// 规则总数（含未启用）
    pub rules_count: usize,
    /// 启用规则数
    pub active_count: usize,
    /// 所有规则使用的字段总数
    pub total_fields: usize,
    /// 当前修订号
    pub revision: u64,
}
