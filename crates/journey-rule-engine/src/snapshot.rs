//! 规则快照
//!
//! 快照是一次评估使用的不可变、按优先级排序的启用规则集合。
//! 快照只持有 `Arc<CompiledRule>` 引用，不复制规则定义。

use crate::compiler::CompiledRule;
use crate::error::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// 规则来源（规则存储的协作接口）
#[cfg_attr(test, mockall::automock)]
pub trait RuleSource: Send + Sync {
    /// 按 (优先级降序, 名称升序) 返回所有启用规则
    fn list_active_rules_sorted(&self) -> Result<Vec<Arc<CompiledRule>>>;

    /// 当前修订号，每次变更递增
    fn revision(&self) -> u64;
}

/// 快照排序：优先级降序，名称升序，规则 ID 升序（保证全序）
pub fn snapshot_order(a: &CompiledRule, b: &CompiledRule) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.id().cmp(b.id()))
}

/// 不可变规则快照
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    revision: u64,
    rules: Vec<Arc<CompiledRule>>,
}

impl RuleSnapshot {
    /// 创建快照，过滤未启用规则并排序
    pub fn new(revision: u64, rules: Vec<Arc<CompiledRule>>) -> Self {
        let mut rules: Vec<_> = rules.into_iter().filter(|r| r.rule.active).collect();
        rules.sort_by(|a, b| snapshot_order(a, b));
        Self { revision, rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 快照中的规则 ID（按评估顺序）
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id()).collect()
    }
}
