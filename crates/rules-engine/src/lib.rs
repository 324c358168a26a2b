//! 条件与动作规则引擎
//!
//! 提供面向无代码配置平台的规则评估能力，支持：
//! - JSON 规则定义和解析（条件树 + 动作列表）
//! - 作用域过滤、优先级调度与治理限额（超时、规则数、嵌套深度）
//! - 短路求值与 explain 追踪
//! - 单一变更入口的动作执行（字段写入、事件、值转换、自定义处理器）
//! - 可选的条件求值记忆化缓存

pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod memo;
pub mod models;
pub mod operators;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod trace;

pub use config::{ActionPolicy, ConfigPatch, EngineConfig, configure, current, reset};
pub use error::{Result, RuleError};
pub use evaluator::{ConditionEvaluator, EvalOutcome};
pub use memo::MemoCache;
pub use models::{
    Action, Condition, ExecutionContext, Operand, Rule, RuleScope, TransformKind, TransformSpec,
};
pub use operators::{CombinatorKind, ExplainKind, Operator};
pub use registry::{CustomActionFn, CustomActionRegistry};
pub use resolver::resolve_path;
pub use scheduler::{EvaluateOptions, EvaluateOutcome, EvaluateRequest, evaluate};
pub use trace::{
    ActionDiff, AppliedAction, EmittedEvent, ExplainNode, ExplainOperand, FieldRead, Trace,
    TraceError,
};
