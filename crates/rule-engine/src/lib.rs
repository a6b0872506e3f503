//! 资格规则引擎
//!
//! 按名称管理规则，并针对任意 JSON 载荷评估一组规则：
//! - 条件树校验（AND / OR / 叶子条件）
//! - 失败即 false 的条件评估
//! - 同步评估与基于任务执行层的异步评估
//! - REST API

pub mod error;
pub mod evaluator;
pub mod http;
pub mod models;
pub mod operators;
pub mod orchestrator;
pub mod pg_store;
pub mod resolver;
pub mod store;
pub mod task;
pub mod validator;

pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use models::{
    Condition, EvaluationContext, EvaluationResult, LeafCondition, NewRule, Payload,
    ResolvedRule, Rule, RuleUpdate, Verdict,
};
pub use operators::{LogicalOperator, Operator};
pub use orchestrator::{RuleEvaluationService, evaluate_rules, evaluate_rules_async, job_handler};
pub use pg_store::PgRuleStore;
pub use resolver::RuleResolver;
pub use store::{InMemoryRuleStore, RuleStore};
pub use task::{
    EvaluationJob, InProcessTaskSubstrate, OutcomeStatus, TaskOutcome, TaskState, TaskStatusView,
    TaskSubstrate,
};
pub use validator::ConditionValidator;
