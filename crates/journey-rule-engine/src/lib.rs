//! 旅程规则引擎
//!
//! 根据客户上下文评估业务规则，对入职旅程的阶段做插入、删除、替换和修改，
//! 并给出变更记录和风险评分：
//! - JSON 规则定义、编译期校验和可选的上下文字段模式
//! - 嵌套 AND/OR/NOT 条件树，短路求值
//! - 按优先级排序的不可变快照，运行期热重载
//! - 逐条规则容错：条件或动作出错只跳过该规则

pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod journey;
pub mod models;
pub mod mutator;
pub mod operators;
pub mod reload;
pub mod repository;
pub mod risk;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use compiler::{CompiledRule, RuleCompiler};
pub use engine::{
    EvaluationReport, EvaluationResult, EvaluationState, FieldWarning, RuleEngine, SkipStage,
    SkippedRule,
};
pub use error::{Result, RuleError};
pub use executor::{MatchResult, RuleExecutor};
pub use journey::{Journey, ModificationRecord, Phase};
pub use models::{
    ActionKind, ConditionGroup, ConditionRule, Criticality, EvaluationContext, Modification,
    PhaseAction, PhasePosition, RuleAction, RuleDefinition, RuleDraft,
};
pub use mutator::JourneyMutator;
pub use operators::{Combinator, Operator};
pub use reload::{ReloadHandle, ReloadWorker};
pub use repository::{InMemoryJourneyRepository, JourneyRepository};
pub use schema::{ContextSchema, FieldType};
pub use snapshot::{RuleSnapshot, RuleSource};
pub use store::{ImportReport, RuleFilter, RuleStore, RuleStoreStats};
